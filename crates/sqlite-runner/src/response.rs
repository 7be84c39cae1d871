use crate::Error;
use serde_json::{Map, Value};

/// CallbackId correlates a Response with the request which caused it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct CallbackId(pub i64);

impl CallbackId {
    /// Used by requests which don't ask for a callback.
    pub const NONE: CallbackId = CallbackId(-1);
}

impl Default for CallbackId {
    fn default() -> Self {
        Self::NONE
    }
}

/// Result of one successfully executed statement.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementResult {
    /// Rows returned by the statement, each keyed by output column name.
    pub rows: Vec<Map<String, Value>>,
    /// Rows changed by an INSERT, UPDATE, DELETE or REPLACE. Zero otherwise.
    pub rows_affected: usize,
    /// Rowid of the row added by an INSERT or REPLACE which changed rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_id: Option<i64>,
}

/// Response is the single completion delivered for a request.
///
/// `code` is 0 on success, where `message` may carry an informational note,
/// and 1 on failure, where `message` describes the error.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub callback: CallbackId,
    pub success: bool,
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Index of the failed statement of a batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<usize>,
    /// WebSQL-style classification of a failed statement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<StatementResult>>,
}

impl Response {
    pub fn ok(callback: CallbackId) -> Self {
        Self {
            callback,
            success: true,
            code: 0,
            message: None,
            statement: None,
            sql_code: None,
            results: None,
        }
    }

    pub fn ok_with_message(callback: CallbackId, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::ok(callback)
        }
    }

    pub fn results(callback: CallbackId, results: Vec<StatementResult>) -> Self {
        Self {
            results: Some(results),
            ..Self::ok(callback)
        }
    }

    pub fn failure(callback: CallbackId, err: &Error) -> Self {
        let (statement, sql_code) = match err {
            Error::Statement {
                index, sql_code, ..
            } => (Some(*index), Some(*sql_code)),
            _ => (None, None),
        };

        Self {
            callback,
            success: false,
            code: 1,
            message: Some(err.render()),
            statement,
            sql_code,
            results: None,
        }
    }
}

/// Responder receives the completions of all requests of a Dispatcher.
/// It's called from request threads and from Runner worker threads alike.
pub trait Responder: Send + Sync + 'static {
    fn respond(&self, response: Response);
}

impl Responder for tokio::sync::mpsc::UnboundedSender<Response> {
    fn respond(&self, response: Response) {
        if let Err(err) = self.send(response) {
            tracing::warn!(callback = ?err.0.callback, "dropping response: receiver has gone away");
        }
    }
}
