use crate::{CallbackId, Error, OpenOptions, Statement};

/// Request is one decoded call of the external surface.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    /// Reply with `value`, as a liveness probe.
    #[serde(rename = "echoStringValue")]
    Echo { value: String },
    Open { options: OpenOptions },
    Close { path: String },
    Delete { path: String },
    ExecuteSqlBatch {
        dbargs: DbArgs,
        #[serde(default)]
        executes: Vec<Statement>,
    },
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct DbArgs {
    pub dbname: String,
}

/// Envelope is a Request with the CallbackId its Response is delivered to.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub callback: CallbackId,
    #[serde(flatten)]
    pub request: Request,
}

impl Envelope {
    /// Decode an Envelope from JSON `text`. On failure, return the callback
    /// which the rejection should be delivered to, if it could be recovered.
    pub fn decode(text: &str) -> Result<Self, (CallbackId, Error)> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|err| (CallbackId::NONE, Error::Request(err)))?;

        let callback = value
            .get("callback")
            .and_then(serde_json::Value::as_i64)
            .map(CallbackId)
            .unwrap_or_default();

        serde_json::from_value(value).map_err(|err| (callback, Error::Request(err)))
    }
}
