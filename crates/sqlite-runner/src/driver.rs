use crate::{Error, Statement, StatementResult};
use std::path::{Path, PathBuf};

/// Options of an open request.
///
/// The `android*` flags are presence-based: the key being present
/// (with any value) enables it.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOptions {
    /// Name of the database, resolved by the Storage into its location.
    pub name: String,
    /// Location hint of the client. Accepted but not interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Select the legacy driver.
    #[serde(
        rename = "androidOldDatabaseImplementation",
        default,
        deserialize_with = "present",
        skip_serializing_if = "is_false"
    )]
    pub legacy: bool,
    /// Apply the legacy driver's close/reopen workaround after a lone COMMIT.
    #[serde(
        rename = "androidBugWorkaround",
        default,
        deserialize_with = "present",
        skip_serializing_if = "is_false"
    )]
    pub bug_workaround: bool,
}

impl OpenOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn legacy(self) -> Self {
        Self {
            legacy: true,
            ..self
        }
    }

    pub fn with_bug_workaround(self) -> Self {
        Self {
            bug_workaround: true,
            ..self
        }
    }

    /// The workaround applies only to the legacy driver.
    pub fn bug_workaround_enabled(&self) -> bool {
        self.legacy && self.bug_workaround
    }
}

fn present<'de, D: serde::Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let _: serde::de::IgnoredAny = serde::Deserialize::deserialize(d)?;
    Ok(true)
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Storage resolves database names and opens Drivers over them.
/// It's shared by every Runner of a Dispatcher.
pub trait Storage: Send + Sync + 'static {
    type Driver: Driver;

    /// Map a database `name` into the locator of its persisted storage.
    fn locate(&self, name: &str) -> Result<PathBuf, Error>;

    /// Open or create the database at `locator`, creating parent directories as needed.
    fn open(&self, locator: &Path, options: &OpenOptions) -> Result<Self::Driver, Error>;

    /// Delete the persisted storage at `locator`, returning whether it existed.
    /// Must be callable when no Driver of the database is open.
    fn delete(&self, locator: &Path) -> Result<bool, Error>;
}

/// Driver is an open handle to one database.
/// It's used only from the worker thread of its Runner, except for an
/// out-of-band close during teardown.
pub trait Driver: Send + 'static {
    /// Execute `statements` in order, returning a result for each.
    /// The first failing statement aborts the batch with Error::Statement.
    fn execute_batch(&mut self, statements: &[Statement]) -> Result<Vec<StatementResult>, Error>;

    /// Release the handle. Idempotent.
    fn close_now(&mut self) -> Result<(), Error>;

    /// Fixup invoked after a batch of a lone COMMIT, when configured.
    fn bug_workaround(&mut self) -> Result<(), Error> {
        Ok(())
    }
}
