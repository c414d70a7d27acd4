//! Per-provider dispatchers over a shared delivery pipeline.
//!
//! Each send composes, innermost first: the user-supplied request hook,
//! the endpoint-group outlier observer, the retry engine, and the
//! metrics stage feeding the delivery sink.

pub(crate) mod http;

mod apns;
mod fcm;
mod relay;

pub use apns::ApnsDispatcher;
pub use fcm::FcmDispatcher;
pub use relay::RelayDispatcher;

use crate::endpoint::{Endpoint, EndpointGroup};
use crate::error::DispatchError;
use crate::mapper::{self, VendorResponse};
use crate::model::{Provider, PushResult};
use crate::retry::{AttemptOutcome, FailureKind, RetryAfter, RetryEngine, RetryPlan};
use crate::telemetry::{DeliveryEvent, DeliverySink};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime};
use tracing::warn;

/// The mutable view a user-supplied hook gets of each attempt.
#[derive(Debug)]
pub struct AttemptRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// User-supplied decorator, applied innermost around each attempt.
pub trait RequestHook: Send + Sync + std::fmt::Debug {
    fn prepare(&self, _request: &mut AttemptRequest) {}
    fn observe(&self, _outcome: &AttemptOutcome) {}
}

/// Wiring shared by every dispatcher kind.
pub(crate) struct DeliveryPipeline {
    pub client: reqwest::Client,
    pub group: EndpointGroup,
    pub engine: RetryEngine,
    pub sink: Arc<dyn DeliverySink>,
    pub hook: Option<Arc<dyn RequestHook>>,
    pub scheme: String,
    pub base_path: String,
}

impl DeliveryPipeline {
    fn request_url(&self, endpoint: &Endpoint, path: &str) -> String {
        format!("{}://{}{}{}", self.scheme, endpoint.authority(), self.base_path, path)
    }

    /// Drive one delivery through retries and map the terminal outcome.
    ///
    /// `finalize` maps the last aggregated response into a `PushResult`
    /// (per-vendor decoding); transport failures are mapped uniformly.
    pub(crate) async fn run(
        &self,
        provider: Provider,
        plan: &RetryPlan,
        path: &str,
        headers: &[(String, String)],
        body: Vec<u8>,
        finalize: impl Fn(&VendorResponse) -> PushResult,
    ) -> PushResult {
        let started = Instant::now();
        let used: Mutex<Vec<Endpoint>> = Mutex::new(Vec::new());
        let body = Arc::new(body);

        let result = self
            .engine
            .execute(plan, |context| {
                let body = Arc::clone(&body);
                let used = &used;
                let finalize = &finalize;
                async move {
                    let used_snapshot =
                        used.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone();
                    let Some(selected) = self.group.select(&used_snapshot).await else {
                        let outcome = AttemptOutcome::Failure(FailureKind::Unprocessed);
                        return (mapper::map_error(DispatchError::NoEndpoint), outcome);
                    };
                    used.lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push(selected.endpoint.clone());

                    let mut attempt_request = AttemptRequest {
                        url: self.request_url(&selected.endpoint, path),
                        headers: headers.to_vec(),
                    };
                    if let Some(hook) = &self.hook {
                        hook.prepare(&mut attempt_request);
                    }
                    self.sink.record(&DeliveryEvent::AttemptStarted {
                        provider,
                        endpoint: Some(selected.endpoint.clone()),
                        attempt: context.attempt,
                    });

                    let attempt = self.issue(attempt_request, body.as_ref().clone());
                    let result = tokio::time::timeout(context.timeout, attempt).await;

                    let (value, outcome) = match result {
                        Ok(Ok(response)) => {
                            // Outlier contract: [200, 500) counts as success.
                            if (200..500).contains(&response.status) {
                                selected.record_success();
                            } else {
                                selected.record_failure();
                            }
                            let retry_after = response
                                .header("retry-after")
                                .and_then(|raw| RetryAfter::parse(raw, SystemTime::now()));
                            let outcome = AttemptOutcome::Response {
                                status: response.status,
                                retry_after,
                            };
                            (finalize(&response), outcome)
                        }
                        Ok(Err(error)) => {
                            selected.record_failure();
                            let outcome = AttemptOutcome::Failure(failure_kind(&error));
                            (mapper::map_error(error), outcome)
                        }
                        Err(_elapsed) => {
                            selected.record_failure();
                            let outcome = AttemptOutcome::Failure(FailureKind::Timeout);
                            (mapper::map_error(DispatchError::Timeout(context.timeout)), outcome)
                        }
                    };

                    if let Some(hook) = &self.hook {
                        hook.observe(&outcome);
                    }
                    self.sink.record(&DeliveryEvent::AttemptFinished {
                        provider,
                        attempt: context.attempt,
                        http_status: match &outcome {
                            AttemptOutcome::Response { status, .. } => Some(*status),
                            AttemptOutcome::Failure(_) => None,
                        },
                    });
                    (value, outcome)
                }
            })
            .await;

        self.sink.record(&DeliveryEvent::DeliveryFinished {
            provider,
            status: result.status,
            elapsed: started.elapsed(),
        });
        result
    }

    /// Send one request and aggregate the response.
    async fn issue(
        &self,
        request: AttemptRequest,
        body: Vec<u8>,
    ) -> Result<VendorResponse, DispatchError> {
        let response = self
            .client
            .post(&request.url)
            .headers(build_header_map(&request.headers))
            .body(body)
            .send()
            .await
            .map_err(DispatchError::from_transport)?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(DispatchError::Aggregation)?;
        Ok(VendorResponse { status, headers, body: body.to_vec() })
    }

    pub(crate) fn close(&self) {
        self.group.close();
    }
}

fn failure_kind(error: &DispatchError) -> FailureKind {
    if error.is_timeout() {
        FailureKind::Timeout
    } else if error.is_unprocessed() {
        FailureKind::Unprocessed
    } else {
        FailureKind::Other
    }
}

fn build_header_map(headers: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for (name, value) in headers {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                map.append(name, value);
            }
            _ => warn!(header = %name, "dropping malformed request header"),
        }
    }
    map
}

/// A profile's base path, normalized so provider paths append cleanly.
pub(crate) fn joined_base_path(endpoint: &url::Url) -> String {
    endpoint.path().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_map_keeps_valid_headers_and_drops_the_rest() {
        let map = build_header_map(&[
            ("apns-topic".to_string(), "com.example".to_string()),
            ("bad name".to_string(), "x".to_string()),
            ("x-ok".to_string(), "value".to_string()),
        ]);
        assert_eq!(map.get("apns-topic").unwrap(), "com.example");
        assert_eq!(map.get("x-ok").unwrap(), "value");
        assert_eq!(map.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn base_path_trims_trailing_slash() {
        let url = url::Url::parse("https://host:2197/base/").unwrap();
        assert_eq!(joined_base_path(&url), "/base");
        let url = url::Url::parse("https://host").unwrap();
        assert_eq!(joined_base_path(&url), "");
    }
}
