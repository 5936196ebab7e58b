//! Reply envelopes. Every line written to stdout is one of these:
//! `{"id","ok":true,"result"}` or `{"id","ok":false,"error":{code,message,details?}}`.

use crate::error::CoreError;
use serde_json::{json, Value};

/// A failed request as it goes over the wire. `code` is one of the stable
/// protocol codes (`bad_params`, `not_found`, `forbidden`, ...).
#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

pub type HandlerResult = Result<Value, HandlerErr>;

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    fn body(self) -> Value {
        let mut body = json!({ "code": self.code, "message": self.message });
        if let Some(d) = self.details {
            body["details"] = d;
        }
        body
    }

    pub fn response(self, id: &str) -> Value {
        json!({ "id": id, "ok": false, "error": self.body() })
    }
}

impl From<CoreError> for HandlerErr {
    fn from(e: CoreError) -> Self {
        HandlerErr {
            code: e.code(),
            details: e.details(),
            message: e.to_string(),
        }
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        HandlerErr::new("db_query_failed", e.to_string())
    }
}

pub fn ok(id: &str, result: Value) -> Value {
    json!({ "id": id, "ok": true, "result": result })
}

pub fn err(id: &str, code: &'static str, message: impl Into<String>) -> Value {
    HandlerErr::new(code, message).response(id)
}

/// Reply to a line that is not a request at all; there is no id to echo.
pub fn bad_json(e: &serde_json::Error) -> Value {
    json!({ "ok": false, "error": HandlerErr::new("bad_json", e.to_string()).body() })
}

pub fn outcome(id: &str, result: HandlerResult) -> Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_carries_details_only_when_present() {
        let plain = err("7", "not_found", "student not found: s1");
        assert_eq!(plain["ok"], json!(false));
        assert_eq!(plain["error"]["code"], json!("not_found"));
        assert!(plain["error"].get("details").is_none());

        let mut e = HandlerErr::bad_params("duplicate");
        e.details = Some(json!({ "index": 2 }));
        let r = outcome("8", Err(e));
        assert_eq!(r["id"], json!("8"));
        assert_eq!(r["error"]["details"]["index"], json!(2));
    }

    #[test]
    fn core_errors_keep_their_wire_code() {
        let r = outcome("9", Err(CoreError::InvalidState("no current term".into()).into()));
        assert_eq!(r["error"]["code"], json!("invalid_state"));
        assert_eq!(outcome("9", Ok(json!({ "n": 1 })))["result"]["n"], json!(1));
    }

    #[test]
    fn bad_json_has_no_id() {
        let parse = serde_json::from_str::<Value>("{oops").expect_err("invalid");
        let r = bad_json(&parse);
        assert!(r.get("id").is_none());
        assert_eq!(r["error"]["code"], json!("bad_json"));
    }
}
