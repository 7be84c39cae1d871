use crate::CallbackId;

/// Statement is one SQL text with its positional arguments.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Statement {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<serde_json::Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    // Matches `COMMIT`, ignoring case, surrounding whitespace and a trailing ';'.
    fn is_commit(&self) -> bool {
        let sql = self.sql.trim();
        let sql = sql.strip_suffix(';').unwrap_or(sql).trim_end();
        sql.eq_ignore_ascii_case("COMMIT")
    }
}

/// Command is a unit of work placed on a Runner's queue.
/// Completions of Batch and Close are delivered to their own `callback`.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Execute `statements` in order, stopping at the first failure.
    Batch {
        statements: Vec<Statement>,
        callback: CallbackId,
    },
    /// Terminate the worker without touching its driver.
    Stop,
    /// Close the driver, then optionally delete its storage, then terminate the worker.
    Close { delete: bool, callback: CallbackId },
}

impl Command {
    /// Is this a Batch consisting of exactly one COMMIT statement?
    pub fn is_lone_commit(&self) -> bool {
        matches!(
            self,
            Command::Batch { statements, .. }
                if statements.len() == 1 && statements[0].is_commit()
        )
    }

    /// Stop and Close end the worker. Nothing queued behind them is executed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Command::Batch { .. })
    }
}
