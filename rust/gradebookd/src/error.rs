use serde_json::json;

/// Failure kinds surfaced by the grading core. Clamping of out-of-range
/// component scores is never one of these.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<serde_json::Value>,
    },
    #[error("{what} not found")]
    NotFound { what: &'static str, id: String },
    #[error("{0}")]
    InvalidState(String),
    #[error("grading scale: {0}")]
    Config(String),
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            what,
            id: id.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation { .. } => "bad_params",
            CoreError::NotFound { .. } => "not_found",
            CoreError::InvalidState(_) => "invalid_state",
            CoreError::Config(_) => "config_invalid",
            CoreError::Db(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            CoreError::Validation { details, .. } => details.clone(),
            CoreError::NotFound { what, id } => Some(json!({ "entity": what, "id": id })),
            _ => None,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_distinguish_the_four_kinds() {
        assert_eq!(CoreError::validation("x").code(), "bad_params");
        assert_eq!(CoreError::not_found("term", "t1").code(), "not_found");
        assert_eq!(CoreError::InvalidState("x".into()).code(), "invalid_state");
        assert_eq!(CoreError::Config("x".into()).code(), "config_invalid");
    }

    #[test]
    fn not_found_carries_entity_details() {
        let e = CoreError::not_found("subject offering", "abc");
        assert_eq!(e.to_string(), "subject offering not found");
        assert_eq!(
            e.details(),
            Some(json!({ "entity": "subject offering", "id": "abc" }))
        );
    }
}
