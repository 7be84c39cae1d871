use crate::{Driver, Error, OpenOptions, Statement, StatementResult, Storage};
use rusqlite::Connection;
use serde_json::{Map, Value};
use std::path::{Component, Path, PathBuf};

/// SqliteStorage resolves database names as relative paths beneath `root`.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    root: PathBuf,
}

impl SqliteStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Storage for SqliteStorage {
    type Driver = SqliteDriver;

    fn locate(&self, name: &str) -> Result<PathBuf, Error> {
        let relative = Path::new(name);

        if name.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(Error::InvalidName {
                name: name.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }

    fn open(&self, locator: &Path, options: &OpenOptions) -> Result<SqliteDriver, Error> {
        if let Some(parent) = locator.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let flavor = if options.legacy {
            Flavor::Legacy
        } else {
            Flavor::Standard
        };
        tracing::debug!(locator = %locator.display(), ?flavor, "opening sqlite database");

        let conn = flavor.connect(locator)?;

        Ok(SqliteDriver {
            locator: locator.to_owned(),
            flavor,
            conn: Some(conn),
        })
    }

    fn delete(&self, locator: &Path) -> Result<bool, Error> {
        let existed = remove_if_exists(locator)?;

        // Remove side files left behind by the rollback journal or write-ahead log.
        for suffix in ["-journal", "-wal", "-shm"] {
            let mut side = locator.as_os_str().to_owned();
            side.push(suffix);
            remove_if_exists(Path::new(&side))?;
        }
        tracing::debug!(locator = %locator.display(), existed, "deleted sqlite database");

        Ok(existed)
    }
}

fn remove_if_exists(path: &Path) -> Result<bool, Error> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Flavor selects between the standard and legacy driver behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// Write-ahead log journal.
    Standard,
    /// Rollback journal, with support for the close/reopen workaround.
    Legacy,
}

impl Flavor {
    fn connect(self, locator: &Path) -> Result<Connection, Error> {
        let conn = Connection::open(locator)?;

        let journal_mode = match self {
            Flavor::Standard => "WAL",
            Flavor::Legacy => "DELETE",
        };
        // rusqlite is a bit finicky about this pragma and we must use query_row.
        conn.query_row(&format!("PRAGMA journal_mode={journal_mode}"), [], |_row| {
            Ok(())
        })?;

        Ok(conn)
    }
}

/// SqliteDriver is an open rusqlite Connection.
pub struct SqliteDriver {
    locator: PathBuf,
    flavor: Flavor,
    conn: Option<Connection>,
}

impl SqliteDriver {
    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn connection(&self) -> Result<&Connection, Error> {
        self.conn.as_ref().ok_or_else(|| Error::Closed {
            name: self.locator.display().to_string(),
        })
    }
}

impl Driver for SqliteDriver {
    fn execute_batch(&mut self, statements: &[Statement]) -> Result<Vec<StatementResult>, Error> {
        let conn = self.connection()?;

        statements
            .iter()
            .enumerate()
            .map(|(index, statement)| {
                execute(conn, statement).map_err(|err| Error::Statement {
                    index,
                    sql_code: sql_code(&err),
                    message: err.to_string(),
                })
            })
            .collect()
    }

    fn close_now(&mut self) -> Result<(), Error> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_conn, err)| err)?;
            tracing::debug!(locator = %self.locator.display(), "closed sqlite database");
        }
        Ok(())
    }

    fn bug_workaround(&mut self) -> Result<(), Error> {
        if self.flavor != Flavor::Legacy {
            return Ok(());
        }
        // Close and re-open, releasing any lock the connection may still hold.
        self.close_now()?;
        self.conn = Some(self.flavor.connect(&self.locator)?);

        tracing::debug!(
            locator = %self.locator.display(),
            "re-opened sqlite database after COMMIT"
        );
        Ok(())
    }
}

fn execute(conn: &Connection, statement: &Statement) -> rusqlite::Result<StatementResult> {
    let mut stmt = conn.prepare(&statement.sql)?;
    let params = rusqlite::params_from_iter(statement.params.iter().map(to_sql));

    if stmt.column_count() == 0 {
        let changes = stmt.execute(params)?;

        // SQLite reports the changes of the most recent INSERT, UPDATE or DELETE,
        // which are stale for any other kind of statement.
        let (rows_affected, insert_id) = match Kind::of(&statement.sql) {
            Kind::Insert if changes != 0 => (changes, Some(conn.last_insert_rowid())),
            Kind::Insert | Kind::Update => (changes, None),
            Kind::Other => (0, None),
        };
        return Ok(StatementResult {
            rows: Vec::new(),
            rows_affected,
            insert_id,
        });
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();

    while let Some(row) = rows.next()? {
        let mut obj = Map::with_capacity(columns.len());
        for (index, column) in columns.iter().enumerate() {
            obj.insert(column.clone(), from_sql(row.get_ref(index)?));
        }
        out.push(obj);
    }

    Ok(StatementResult {
        rows: out,
        rows_affected: 0,
        insert_id: None,
    })
}

enum Kind {
    Insert,
    Update,
    Other,
}

impl Kind {
    fn of(sql: &str) -> Self {
        let verb = sql
            .trim_start()
            .split(|c: char| !c.is_ascii_alphabetic())
            .next()
            .unwrap_or_default();

        if verb.eq_ignore_ascii_case("INSERT") || verb.eq_ignore_ascii_case("REPLACE") {
            Kind::Insert
        } else if verb.eq_ignore_ascii_case("UPDATE") || verb.eq_ignore_ascii_case("DELETE") {
            Kind::Update
        } else {
            Kind::Other
        }
    }
}

fn to_sql(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;

    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Sql::Integer(i),
            None => Sql::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => Sql::Text(s.clone()),
        // Arrays and objects are bound as their JSON text.
        other => Sql::Text(other.to_string()),
    }
}

fn from_sql(value: rusqlite::types::ValueRef<'_>) -> Value {
    use rusqlite::types::ValueRef;
    use serde_json::Number;

    match value {
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).into_owned()),
        ValueRef::Blob(b) => Value::String(base64::encode(b)),
        ValueRef::Integer(i) => Value::Number(Number::from(i)),
        ValueRef::Real(f) => match Number::from_f64(f) {
            Some(n) => Value::Number(n),
            _ => Value::String(format!("{f}")),
        },
        ValueRef::Null => Value::Null,
    }
}

// Map an error into the WebSQL SQLError code reported to clients.
fn sql_code(err: &rusqlite::Error) -> i32 {
    use rusqlite::ErrorCode;

    const UNKNOWN: i32 = 0;
    const DATABASE: i32 = 1;
    const TOO_LARGE: i32 = 3;
    const QUOTA: i32 = 4;
    const SYNTAX: i32 = 5;
    const CONSTRAINT: i32 = 6;

    if err.to_string().contains("syntax error") {
        return SYNTAX;
    }
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::ConstraintViolation => CONSTRAINT,
            ErrorCode::TooBig => TOO_LARGE,
            ErrorCode::DiskFull => QUOTA,
            _ => DATABASE,
        },
        _ => UNKNOWN,
    }
}
