//! Vendor payload codecs: serialization, validation, and size limits.

pub mod apns;
pub mod fcm;
pub mod raw;

use crate::model::{Provider, PushResult, PushStatus};
use serde_json::{Map, Value};
use thiserror::Error;

/// A shaped wire payload: body bytes plus request headers.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPayload {
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

/// Local shaping failures, surfaced before any network I/O.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("payload of {size} bytes exceeds the {limit}-byte limit")]
    TooLarge { size: usize, limit: usize },
}

impl CodecError {
    /// The client-sourced result this failure maps to.
    pub fn to_result(&self) -> PushResult {
        match self {
            CodecError::Invalid(reason) => {
                PushResult::client_error(PushStatus::InvalidRequest, reason.clone())
            }
            CodecError::TooLarge { .. } => {
                PushResult::client_error(PushStatus::TooLargePayload, self.to_string())
            }
        }
    }
}

/// Enforce the provider's payload byte limit.
pub(crate) fn check_size(provider: Provider, body: &[u8]) -> Result<(), CodecError> {
    if let Some(limit) = provider.max_payload_len() {
        if body.len() > limit {
            return Err(CodecError::TooLarge { size: body.len(), limit });
        }
    }
    Ok(())
}

/// Merge `source` into `target`, dropping entries whose value is null.
/// Nulls nested inside arrays and objects are preserved; only the top
/// layer of the map field is filtered.
pub(crate) fn merge_dropping_nulls(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        if value.is_null() {
            continue;
        }
        target.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResultSource;

    #[test]
    fn size_check_honors_provider_limits() {
        let body = vec![b'x'; 4096];
        assert!(check_size(Provider::Apple, &body).is_ok());
        assert!(check_size(Provider::Firebase, &body).is_ok());
        assert!(check_size(Provider::Web, &body).is_err());
        assert!(check_size(Provider::Generic, &vec![b'x'; 1 << 20]).is_ok());

        let over = vec![b'x'; 4097];
        let err = check_size(Provider::Apple, &over).unwrap_err();
        assert_eq!(err, CodecError::TooLarge { size: 4097, limit: 4096 });
    }

    #[test]
    fn errors_map_to_client_results() {
        let invalid = CodecError::Invalid("bad".to_string()).to_result();
        assert_eq!(invalid.status, PushStatus::InvalidRequest);
        assert_eq!(invalid.result_source, ResultSource::Client);

        let too_large = CodecError::TooLarge { size: 5000, limit: 4096 }.to_result();
        assert_eq!(too_large.status, PushStatus::TooLargePayload);
        assert_eq!(too_large.result_source, ResultSource::Client);
    }

    #[test]
    fn null_dropping_is_top_layer_only() {
        let source: Map<String, Value> = serde_json::from_str(
            r#"{"a":null,"b":[1,null],"c":{"inner":null},"d":"keep"}"#,
        )
        .unwrap();
        let mut target = Map::new();
        merge_dropping_nulls(&mut target, &source);
        assert!(!target.contains_key("a"));
        assert_eq!(target["b"], serde_json::json!([1, null]));
        assert_eq!(target["c"], serde_json::json!({"inner": null}));
        assert_eq!(target["d"], Value::from("keep"));
    }
}
