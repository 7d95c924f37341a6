use serde::Serialize;
use serde_json::Value;

/// The uniform response shape every JSON endpoint returns, success or
/// error. Constructed once per request, never persisted.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub status: &'static str,
    pub module: String,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn success(module: impl Into<String>, data: Value) -> Self {
        Self {
            status: "SUCCESS",
            module: module.into(),
            data,
            message: None,
            error: None,
        }
    }

    pub fn error(
        module: impl Into<String>,
        error_kind: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: "ERROR",
            module: module.into(),
            data: Value::Null,
            message: Some(message.into()),
            error: Some(error_kind.to_string()),
        }
    }
}
