//! Result mapping: vendor responses and transport errors into the
//! uniform `PushResult`.
//!
//! Mapping never panics on malformed responses; anything that fails to
//! parse becomes `INVALID_SERVER_RESPONSE`.

use crate::error::DispatchError;
use crate::model::{FcmError, PushResult, PushResultProps, PushStatus, ResultSource};
use serde_json::Value;
use std::sync::Arc;

/// An aggregated vendor response, decoupled from the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorResponse {
    pub status: u16,
    /// Header names are lowercase.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl VendorResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Decode an APNs response.
///
/// `apns-id` is required; a response without it violates the protocol.
pub fn map_apns(response: &VendorResponse) -> PushResult {
    let Some(apns_id) = response.header("apns-id") else {
        return invalid_server_response("response carried no apns-id header")
            .with_http_status(response.status);
    };

    let reason = if response.body.is_empty() {
        None
    } else {
        match serde_json::from_slice::<Value>(&response.body) {
            Ok(body) => body.get("reason").and_then(Value::as_str).map(str::to_string),
            Err(err) => {
                return invalid_server_response(format!("unparseable APNs body: {err}"))
                    .with_http_status(response.status);
            }
        }
    };

    let props = PushResultProps::Apple {
        apns_id: apns_id.to_string(),
        apns_unique_id: response.header("apns-unique-id").map(str::to_string),
        reason: reason.clone(),
        retry_after: response.header("retry-after").map(str::to_string),
    };

    let mut result = PushResult::new(
        PushStatus::from_vendor_status(response.status),
        ResultSource::PushProvider,
    )
    .with_props(props)
    .with_http_status(response.status);
    if let Some(reason) = reason {
        result = result.with_reason(reason);
    }
    result
}

/// Decode an FCM response.
pub fn map_fcm(response: &VendorResponse) -> PushResult {
    let retry_after = response.header("retry-after").map(str::to_string);

    if response.status == 200 {
        let message_id = match serde_json::from_slice::<Value>(&response.body) {
            Ok(body) => body.get("name").and_then(Value::as_str).map(str::to_string),
            Err(err) => {
                return invalid_server_response(format!("unparseable FCM body: {err}"))
                    .with_http_status(200);
            }
        };
        let Some(message_id) = message_id else {
            return invalid_server_response("FCM response carried no message name")
                .with_http_status(200);
        };
        return PushResult::new(PushStatus::Success, ResultSource::PushProvider)
            .with_props(PushResultProps::Firebase {
                message_id: Some(message_id),
                error: None,
                retry_after,
            })
            .with_http_status(200);
    }

    let is_json = response
        .header("content-type")
        .map(|content_type| content_type.contains("json"))
        .unwrap_or(false);
    if !is_json {
        return invalid_server_response("non-JSON FCM error response")
            .with_http_status(response.status);
    }
    let error: FcmError = match serde_json::from_slice::<Value>(&response.body)
        .ok()
        .and_then(|body| body.get("error").cloned())
        .and_then(|error| serde_json::from_value(error).ok())
    {
        Some(error) => error,
        None => {
            return invalid_server_response("unparseable FCM error body")
                .with_http_status(response.status);
        }
    };

    let mut result = PushResult::new(
        PushStatus::from_vendor_status(response.status),
        ResultSource::PushProvider,
    )
    .with_http_status(response.status);
    if let Some(message) = &error.message {
        result = result.with_reason(message.clone());
    }
    result.with_props(PushResultProps::Firebase {
        message_id: None,
        error: Some(error),
        retry_after,
    })
}

/// Decode a relayed gateway response: the body is the remote
/// `PushResult`. A remote `CLIENT` source becomes `SERVER` from this
/// gateway's perspective.
pub fn map_relay(response: &VendorResponse) -> PushResult {
    match serde_json::from_slice::<PushResult>(&response.body) {
        Ok(mut result) => {
            if result.result_source == ResultSource::Client {
                result.result_source = ResultSource::Server;
            }
            if result.http_status.is_none() {
                result.http_status = Some(response.status);
            }
            result
        }
        Err(err) => {
            let mut result = invalid_server_response(format!("unparseable gateway body: {err}"));
            result.result_source = ResultSource::Server;
            result.with_http_status(response.status)
        }
    }
}

/// Map an attempt-level failure. Requests that provably never reached
/// the server are client-sourced; everything else is attributed to the
/// provider.
pub fn map_error(error: DispatchError) -> PushResult {
    let source = if error.is_unprocessed() {
        ResultSource::Client
    } else {
        ResultSource::PushProvider
    };
    let reason = if error.is_timeout() { "timeout".to_string() } else { error.to_string() };
    PushResult::new(PushStatus::InternalError, source)
        .with_reason(reason)
        .with_cause(Arc::new(error))
}

fn invalid_server_response(reason: impl Into<String>) -> PushResult {
    PushResult::new(PushStatus::InvalidServerResponse, ResultSource::PushProvider)
        .with_reason(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn response(status: u16, headers: &[(&str, &str)], body: &str) -> VendorResponse {
        VendorResponse {
            status,
            headers: headers
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn apns_success_extracts_ids() {
        let result = map_apns(&response(
            200,
            &[("apns-id", "1"), ("apns-unique-id", "u-1")],
            "",
        ));
        assert_eq!(result.status, PushStatus::Success);
        assert_eq!(result.result_source, ResultSource::PushProvider);
        assert_eq!(result.http_status, Some(200));
        match result.push_result_props.unwrap() {
            PushResultProps::Apple { apns_id, apns_unique_id, .. } => {
                assert_eq!(apns_id, "1");
                assert_eq!(apns_unique_id.as_deref(), Some("u-1"));
            }
            props => panic!("unexpected props: {props:?}"),
        }
    }

    #[test]
    fn apns_without_id_is_a_protocol_violation() {
        let result = map_apns(&response(200, &[], ""));
        assert_eq!(result.status, PushStatus::InvalidServerResponse);
    }

    #[test]
    fn apns_reason_and_retry_after_are_captured() {
        let result = map_apns(&response(
            429,
            &[("apns-id", "1"), ("retry-after", "30")],
            r#"{"reason":"TooManyRequests"}"#,
        ));
        assert_eq!(result.status, PushStatus::QuotaExceeded);
        assert_eq!(result.reason.as_deref(), Some("TooManyRequests"));
        match result.push_result_props.unwrap() {
            PushResultProps::Apple { reason, retry_after, .. } => {
                assert_eq!(reason.as_deref(), Some("TooManyRequests"));
                assert_eq!(retry_after.as_deref(), Some("30"));
            }
            props => panic!("unexpected props: {props:?}"),
        }
    }

    #[test]
    fn apns_malformed_body_never_panics() {
        let result = map_apns(&response(400, &[("apns-id", "1")], "{{{"));
        assert_eq!(result.status, PushStatus::InvalidServerResponse);
    }

    #[test]
    fn apns_status_table() {
        for (http, status) in [
            (400, PushStatus::InvalidRequest),
            (403, PushStatus::AuthFailure),
            (410, PushStatus::DeviceUnregistered),
            (413, PushStatus::TooLargePayload),
            (429, PushStatus::QuotaExceeded),
            (500, PushStatus::InternalError),
            (503, PushStatus::Unavailable),
        ] {
            let result = map_apns(&response(http, &[("apns-id", "1")], ""));
            assert_eq!(result.status, status, "http {http}");
        }
    }

    #[test]
    fn fcm_success_parses_message_name() {
        let result = map_fcm(&response(
            200,
            &[("content-type", "application/json")],
            r#"{"name":"projects/demo/messages/123"}"#,
        ));
        assert_eq!(result.status, PushStatus::Success);
        match result.push_result_props.unwrap() {
            PushResultProps::Firebase { message_id, .. } => {
                assert_eq!(message_id.as_deref(), Some("projects/demo/messages/123"));
            }
            props => panic!("unexpected props: {props:?}"),
        }
    }

    #[test]
    fn fcm_error_requires_json_content_type() {
        let result = map_fcm(&response(503, &[("content-type", "text/html")], "<html>"));
        assert_eq!(result.status, PushStatus::InvalidServerResponse);

        let result = map_fcm(&response(
            404,
            &[("content-type", "application/json; charset=utf-8")],
            r#"{"error":{"code":404,"message":"unregistered","status":"NOT_FOUND"}}"#,
        ));
        assert_eq!(result.status, PushStatus::DeviceUnregistered);
        assert_eq!(result.reason.as_deref(), Some("unregistered"));
    }

    #[test]
    fn fcm_malformed_error_body_never_panics() {
        let result =
            map_fcm(&response(500, &[("content-type", "application/json")], "not json"));
        assert_eq!(result.status, PushStatus::InvalidServerResponse);
    }

    #[test]
    fn relay_rewrites_remote_client_source() {
        let remote = PushResult::client_error(PushStatus::InvalidRequest, "bad");
        let body = serde_json::to_string(&remote).unwrap();
        let result = map_relay(&response(400, &[], &body));
        assert_eq!(result.status, PushStatus::InvalidRequest);
        assert_eq!(result.result_source, ResultSource::Server);

        let remote = PushResult::new(PushStatus::Success, ResultSource::PushProvider);
        let body = serde_json::to_string(&remote).unwrap();
        let result = map_relay(&response(200, &[], &body));
        assert_eq!(result.result_source, ResultSource::PushProvider);
    }

    #[test]
    fn transport_errors_map_by_origin() {
        let unprocessed = map_error(DispatchError::Unprocessed("refused".to_string()));
        assert_eq!(unprocessed.result_source, ResultSource::Client);
        assert_eq!(unprocessed.status, PushStatus::InternalError);
        assert!(unprocessed.cause.is_some());

        let timeout = map_error(DispatchError::Timeout(Duration::from_secs(5)));
        assert_eq!(timeout.result_source, ResultSource::PushProvider);
        assert_eq!(timeout.reason.as_deref(), Some("timeout"));

        let no_endpoint = map_error(DispatchError::NoEndpoint);
        assert_eq!(no_endpoint.result_source, ResultSource::Client);
    }
}
