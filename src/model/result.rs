//! Uniform delivery results and the canonical status taxonomy.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Canonical delivery status.
///
/// Every vendor response and every local failure maps onto this
/// taxonomy; [`PushStatus::http_status`] is the HTTP code a gateway
/// front end mirrors back for the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PushStatus {
    Success,
    InvalidRequest,
    AuthFailure,
    DeviceUnregistered,
    TooLargePayload,
    QuotaExceeded,
    InternalError,
    ProfileMissing,
    Unavailable,
    InvalidServerResponse,
    Unknown,
}

impl PushStatus {
    /// The HTTP status a gateway mirrors for this result, if defined.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            PushStatus::Success => Some(200),
            PushStatus::InvalidRequest => Some(400),
            PushStatus::AuthFailure => Some(401),
            PushStatus::DeviceUnregistered => Some(410),
            PushStatus::TooLargePayload => Some(413),
            PushStatus::QuotaExceeded => Some(429),
            PushStatus::InternalError => Some(500),
            PushStatus::ProfileMissing => Some(501),
            PushStatus::Unavailable => Some(503),
            PushStatus::InvalidServerResponse => Some(520),
            PushStatus::Unknown => None,
        }
    }

    /// Map a vendor HTTP status onto the canonical taxonomy.
    pub fn from_vendor_status(status: u16) -> Self {
        match status {
            200 => PushStatus::Success,
            400 => PushStatus::InvalidRequest,
            401 | 403 => PushStatus::AuthFailure,
            404 | 410 => PushStatus::DeviceUnregistered,
            413 => PushStatus::TooLargePayload,
            429 => PushStatus::QuotaExceeded,
            500 => PushStatus::InternalError,
            503 => PushStatus::Unavailable,
            _ => PushStatus::Unknown,
        }
    }
}

/// Where a result was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultSource {
    Client,
    Server,
    PushProvider,
}

/// Vendor-specific result fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PushResultProps {
    #[serde(rename = "apple", rename_all = "camelCase")]
    Apple {
        apns_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        apns_unique_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after: Option<String>,
    },
    #[serde(rename = "firebase", rename_all = "camelCase")]
    Firebase {
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<FcmError>,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after: Option<String>,
    },
}

/// The `error` object of a non-200 FCM response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FcmError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<FcmErrorDetails>,
}

/// One open-ended entry of `error.details[]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FcmErrorDetails {
    #[serde(rename = "@type", skip_serializing_if = "Option::is_none")]
    pub type_url: Option<String>,
    #[serde(flatten)]
    pub custom_data: Map<String, Value>,
}

/// The uniform outcome of one delivery.
///
/// The cause chain is retained in memory for embedders but never
/// serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResult {
    pub status: PushStatus,
    pub result_source: ResultSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip)]
    pub cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_result_props: Option<PushResultProps>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

impl PartialEq for PushResult {
    fn eq(&self, other: &Self) -> bool {
        // The in-memory cause is intentionally excluded.
        self.status == other.status
            && self.result_source == other.result_source
            && self.reason == other.reason
            && self.push_result_props == other.push_result_props
            && self.http_status == other.http_status
    }
}

impl PushResult {
    pub fn new(status: PushStatus, result_source: ResultSource) -> Self {
        Self { status, result_source, reason: None, cause: None, push_result_props: None, http_status: None }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_cause(mut self, cause: Arc<dyn std::error::Error + Send + Sync>) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn with_props(mut self, props: PushResultProps) -> Self {
        self.push_result_props = Some(props);
        self
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    /// A locally produced failure (`resultSource = CLIENT`).
    pub fn client_error(status: PushStatus, reason: impl Into<String>) -> Self {
        Self::new(status, ResultSource::Client).with_reason(reason)
    }

    pub fn is_success(&self) -> bool {
        self.status == PushStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mirrors_the_canonical_table() {
        assert_eq!(PushStatus::Success.http_status(), Some(200));
        assert_eq!(PushStatus::ProfileMissing.http_status(), Some(501));
        assert_eq!(PushStatus::InvalidServerResponse.http_status(), Some(520));
        assert_eq!(PushStatus::Unknown.http_status(), None);
    }

    #[test]
    fn vendor_status_mapping() {
        assert_eq!(PushStatus::from_vendor_status(200), PushStatus::Success);
        assert_eq!(PushStatus::from_vendor_status(403), PushStatus::AuthFailure);
        assert_eq!(PushStatus::from_vendor_status(404), PushStatus::DeviceUnregistered);
        assert_eq!(PushStatus::from_vendor_status(410), PushStatus::DeviceUnregistered);
        assert_eq!(PushStatus::from_vendor_status(429), PushStatus::QuotaExceeded);
        assert_eq!(PushStatus::from_vendor_status(503), PushStatus::Unavailable);
        assert_eq!(PushStatus::from_vendor_status(418), PushStatus::Unknown);
    }

    #[test]
    fn result_round_trips_without_cause() {
        let result = PushResult::new(PushStatus::Success, ResultSource::PushProvider)
            .with_http_status(200)
            .with_props(PushResultProps::Apple {
                apns_id: "1".to_string(),
                apns_unique_id: None,
                reason: None,
                retry_after: None,
            });
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(serde_json::from_str::<PushResult>(&json).unwrap(), result);
    }

    #[test]
    fn fcm_error_details_round_trip_arbitrary_fields() {
        let mut custom = Map::new();
        custom.insert("errorCode".to_string(), Value::from("UNREGISTERED"));
        custom.insert("nested".to_string(), serde_json::json!({"a": [1, null, 3]}));
        let details = FcmErrorDetails {
            type_url: Some("type.googleapis.com/google.firebase.fcm.v1.FcmError".to_string()),
            custom_data: custom,
        };
        let error = FcmError {
            code: Some(404),
            message: Some("gone".to_string()),
            status: Some("NOT_FOUND".to_string()),
            details: vec![details],
        };
        let json = serde_json::to_string(&error).unwrap();
        assert_eq!(serde_json::from_str::<FcmError>(&json).unwrap(), error);
    }

    #[test]
    fn cause_is_ignored_by_equality_and_serialization() {
        let cause: Arc<dyn std::error::Error + Send + Sync> =
            Arc::new(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        let with_cause = PushResult::new(PushStatus::InternalError, ResultSource::Client)
            .with_cause(cause);
        let without = PushResult::new(PushStatus::InternalError, ResultSource::Client);
        assert_eq!(with_cause, without);
        assert!(!serde_json::to_string(&with_cause).unwrap().contains("boom"));
    }
}
