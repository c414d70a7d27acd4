//! Raw-push checks.
//!
//! The content string passes through unchanged; only the JSON-object
//! prefix check and the provider size limit apply. Raw headers are
//! forwarded as-is.

use super::{check_size, CodecError, EncodedPayload};
use crate::model::RawPushRequest;
use serde_json::{Map, Value};

pub fn encode(request: &RawPushRequest) -> Result<EncodedPayload, CodecError> {
    let content = &request.raw_push().content;
    if !content.trim_start().starts_with('{') {
        return Err(CodecError::Invalid("raw push content must be a JSON object".to_string()));
    }
    serde_json::from_str::<Map<String, Value>>(content)
        .map_err(|err| CodecError::Invalid(format!("raw push content is not valid JSON: {err}")))?;

    let body = content.as_bytes().to_vec();
    check_size(request.provider(), &body)?;

    let headers = request
        .raw_push()
        .headers
        .iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(value) => value.clone(),
                other => other.to_string(),
            };
            (name.clone(), value)
        })
        .collect();
    Ok(EncodedPayload { body, headers })
}
