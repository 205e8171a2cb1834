//! Outbound execution of resolved requests
//!
//! The transport surfaces the upstream response unmodified: non-2xx statuses
//! are data, not errors. Only network-level failures produce an error.

mod http;

pub use self::http::HttpTransport;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::Result;
use crate::resolver::ResolvedRequest;

/// Raw upstream response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransportResponse {
    /// Status code
    pub status: u16,
    /// Canonical reason phrase
    pub status_text: String,
    /// Response headers
    pub headers: BTreeMap<String, String>,
    /// JSON body, or the raw text as a JSON string when it is not JSON
    pub body: Value,
}

impl TransportResponse {
    /// Whether the status is 2xx
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes resolved requests
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and return the upstream response
    async fn send(&self, request: &ResolvedRequest) -> Result<TransportResponse>;
}

/// Decode a body: JSON when it parses, otherwise the text itself
pub(crate) fn decode_body(text: &str) -> Value {
    if text.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_body() {
        assert_eq!(decode_body(r#"{"ok":true}"#), json!({"ok": true}));
        assert_eq!(decode_body("<html>nope</html>"), json!("<html>nope</html>"));
        assert_eq!(decode_body(""), Value::Null);
    }

    #[test]
    fn test_is_success() {
        let mut response = TransportResponse {
            status: 204,
            status_text: "No Content".into(),
            headers: BTreeMap::new(),
            body: Value::Null,
        };
        assert!(response.is_success());
        response.status = 404;
        assert!(!response.is_success());
    }
}
