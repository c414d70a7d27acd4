//! Send requests: logical pushes and pre-built raw pushes.

use super::{Provider, Push};
use crate::error::Error;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A logical push bound for one device.
///
/// Invariants, checked at construction and on decode:
/// - `device_token` is non-blank,
/// - `provider` is a concrete vendor (never `GENERIC`),
/// - the push content is either generic or already bound to `provider`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "PushRequestWire")]
pub struct PushRequest {
    provider: Provider,
    device_token: String,
    push: Push,
    #[serde(skip_serializing_if = "Option::is_none")]
    idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    variables: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    app_data: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushRequestWire {
    provider: Provider,
    device_token: String,
    push: Push,
    idempotency_key: Option<String>,
    #[serde(default)]
    variables: Map<String, Value>,
    #[serde(default)]
    app_data: Map<String, Value>,
}

impl TryFrom<PushRequestWire> for PushRequest {
    type Error = Error;

    fn try_from(wire: PushRequestWire) -> Result<Self, Error> {
        let mut request =
            PushRequest::new(wire.provider, wire.device_token, wire.push)?;
        request.idempotency_key = wire.idempotency_key;
        request.variables = wire.variables;
        request.app_data = wire.app_data;
        Ok(request)
    }
}

impl PushRequest {
    pub fn new(
        provider: Provider,
        device_token: impl Into<String>,
        push: Push,
    ) -> Result<Self, Error> {
        let device_token = device_token.into();
        validate_target(provider, &device_token)?;
        let push_provider = push.provider();
        if push_provider != Provider::Generic && push_provider != provider {
            return Err(Error::InvalidRequest(format!(
                "push content is bound to {push_provider} but the request targets {provider}"
            )));
        }
        Ok(Self {
            provider,
            device_token,
            push,
            idempotency_key: None,
            variables: Map::new(),
            app_data: Map::new(),
        })
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_app_data(mut self, app_data: Map<String, Value>) -> Self {
        self.app_data = app_data;
        self
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn device_token(&self) -> &str {
        &self.device_token
    }

    pub fn push(&self) -> &Push {
        &self.push
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    pub fn app_data(&self) -> &Map<String, Value> {
        &self.app_data
    }
}

/// A pre-built payload forwarded as-is, subject only to the JSON-object
/// prefix check and the provider size limit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPush {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub headers: Map<String, Value>,
    pub content: String,
}

impl RawPush {
    pub fn new(content: impl Into<String>) -> Self {
        Self { headers: Map::new(), content: content.into() }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), Value::String(value.into()));
        self
    }
}

/// A raw push bound for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawPushRequestWire")]
pub struct RawPushRequest {
    provider: Provider,
    device_token: String,
    raw_push: RawPush,
    #[serde(skip_serializing_if = "Option::is_none")]
    idempotency_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPushRequestWire {
    provider: Provider,
    device_token: String,
    raw_push: RawPush,
    idempotency_key: Option<String>,
}

impl TryFrom<RawPushRequestWire> for RawPushRequest {
    type Error = Error;

    fn try_from(wire: RawPushRequestWire) -> Result<Self, Error> {
        let mut request = RawPushRequest::new(wire.provider, wire.device_token, wire.raw_push)?;
        request.idempotency_key = wire.idempotency_key;
        Ok(request)
    }
}

impl RawPushRequest {
    pub fn new(
        provider: Provider,
        device_token: impl Into<String>,
        raw_push: RawPush,
    ) -> Result<Self, Error> {
        let device_token = device_token.into();
        validate_target(provider, &device_token)?;
        Ok(Self { provider, device_token, raw_push, idempotency_key: None })
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn device_token(&self) -> &str {
        &self.device_token
    }

    pub fn raw_push(&self) -> &RawPush {
        &self.raw_push
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }
}

fn validate_target(provider: Provider, device_token: &str) -> Result<(), Error> {
    if device_token.trim().is_empty() {
        return Err(Error::InvalidRequest("deviceToken must not be blank".to_string()));
    }
    if provider == Provider::Generic {
        return Err(Error::InvalidRequest("request provider must be a concrete vendor".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_and_generic_content() {
        assert!(PushRequest::new(Provider::Apple, "tok", Push::for_apple("t", "b")).is_ok());
        assert!(PushRequest::new(Provider::Apple, "tok", Push::generic("t", "b")).is_ok());
        assert!(PushRequest::new(Provider::Firebase, "tok", Push::for_firebase("t", "b")).is_ok());
    }

    #[test]
    fn rejects_blank_token_and_generic_provider() {
        assert!(PushRequest::new(Provider::Apple, "  ", Push::generic("t", "b")).is_err());
        assert!(PushRequest::new(Provider::Generic, "tok", Push::generic("t", "b")).is_err());
    }

    #[test]
    fn rejects_cross_vendor_content() {
        let err = PushRequest::new(Provider::Firebase, "tok", Push::for_apple("t", "b"));
        assert!(matches!(err, Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn round_trips_through_json() {
        let request = PushRequest::new(Provider::Apple, "tok", Push::for_apple("t", "b"))
            .unwrap()
            .with_idempotency_key("idem-1");
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(serde_json::from_str::<PushRequest>(&json).unwrap(), request);
    }

    #[test]
    fn decode_applies_the_same_validation() {
        let json = r#"{"provider":"GENERIC","deviceToken":"tok","push":{}}"#;
        assert!(serde_json::from_str::<PushRequest>(json).is_err());

        let json = r#"{"provider":"FIREBASE","deviceToken":"tok","push":{"apple":{}}}"#;
        assert!(serde_json::from_str::<PushRequest>(json).is_err());
    }

    #[test]
    fn raw_request_round_trips() {
        let request = RawPushRequest::new(
            Provider::Apple,
            "tok",
            RawPush::new(r#"{"aps":{}}"#).with_header("apns-priority", "10"),
        )
        .unwrap();
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(serde_json::from_str::<RawPushRequest>(&json).unwrap(), request);
    }
}
