//! sqlite-runner serializes work against named SQLite databases.
//!
//! Every open database is owned by a [`Runner`]: one dedicated worker thread
//! draining one FIFO queue of [`Command`]s. Data (statement batches) and
//! control (close, delete, stop) travel through the same queue, so they are
//! applied in exactly the order they were submitted. Different databases are
//! served by different workers and proceed in parallel.
//!
//! The [`Dispatcher`] is the entry point. It resolves database names through
//! its [`Registry`], creates Runners on open, and delivers every completion
//! to a [`Responder`] tagged with the caller's [`CallbackId`].

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("database name {name:?} must be a relative path within the storage root")]
    InvalidName { name: String },
    #[error("can't open database {name}")]
    Open {
        name: String,
        #[source]
        source: Box<Error>,
    },
    #[error("couldn't start worker thread for database {name}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("database not open")]
    NotOpen { name: String },
    #[error("couldn't add to queue")]
    Queue { name: String },
    #[error("database {name} is closed")]
    Closed { name: String },
    #[error("statement {index} failed: {message}")]
    Statement {
        index: usize,
        sql_code: i32,
        message: String,
    },
    #[error("couldn't close database {name}")]
    Close {
        name: String,
        #[source]
        source: Box<Error>,
    },
    #[error("couldn't delete database {name}")]
    Delete {
        name: String,
        #[source]
        source: Option<Box<Error>>,
    },
    #[error("missing executes list")]
    MissingExecutes,
    #[error("invalid request")]
    Request(#[source] serde_json::Error),

    // rusqlite does a pretty good job of showing context in its errors.
    #[error(transparent)]
    Rusqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Render this error and its chain of sources as a single message,
    /// in the manner of anyhow's alternate Display.
    pub fn render(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);

        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}

mod command;
mod dispatcher;
mod driver;
mod registry;
mod request;
mod response;
mod runner;
mod sqlite;

#[cfg(test)]
mod testing;

pub use command::{Command, Statement};
pub use dispatcher::Dispatcher;
pub use driver::{Driver, OpenOptions, Storage};
pub use registry::Registry;
pub use request::{DbArgs, Envelope, Request};
pub use response::{CallbackId, Responder, Response, StatementResult};
pub use runner::Runner;
pub use sqlite::{Flavor, SqliteDriver, SqliteStorage};
