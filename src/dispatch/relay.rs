//! Gateway-to-gateway relay dispatcher: POST
//! `/api/v1/<group>/<set>/send` (or `/send/raw`) on another gateway
//! instance, with remote retry options serialized into the reserved
//! header set.

use super::apns::build_pipeline;
use super::http::build_client;
use super::{DeliveryPipeline, RequestHook};
use crate::error::Error;
use crate::mapper;
use crate::model::{PushRequest, PushResult, PushStatus, RawPushRequest};
use crate::profile::RelayProfile;
use crate::retry::{self, PushOptions};
use crate::telemetry::{DeliverySink, LogSink};
use std::sync::Arc;

pub struct RelayDispatcher {
    profile: RelayProfile,
    pipeline: DeliveryPipeline,
}

impl std::fmt::Debug for RelayDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayDispatcher")
            .field("target", &self.profile.endpoint.as_str())
            .finish()
    }
}

impl RelayDispatcher {
    pub fn new(profile: &RelayProfile) -> Result<Self, Error> {
        Self::with_observers(profile, Arc::new(LogSink), None)
    }

    pub fn with_observers(
        profile: &RelayProfile,
        sink: Arc<dyn DeliverySink>,
        hook: Option<Arc<dyn RequestHook>>,
    ) -> Result<Self, Error> {
        let client = build_client(&profile.options.client, None)?;
        let pipeline = build_pipeline(
            client,
            &profile.endpoint,
            profile.static_endpoints.as_deref(),
            &profile.options,
            Arc::clone(&sink),
            hook,
        );
        Ok(Self { profile: profile.clone(), pipeline })
    }

    pub async fn send(&self, request: &PushRequest, options: &PushOptions) -> PushResult {
        let body = match serde_json::to_vec(request) {
            Ok(body) => body,
            Err(err) => {
                return PushResult::client_error(PushStatus::InternalError, err.to_string());
            }
        };
        self.dispatch("/send", body, options).await
    }

    pub async fn send_raw(&self, request: &RawPushRequest, options: &PushOptions) -> PushResult {
        // The raw-push shape and size checks still apply locally before
        // the hop; the remote gateway repeats them.
        if let Err(err) = crate::codec::raw::encode(request) {
            return err.to_result();
        }
        let body = match serde_json::to_vec(request) {
            Ok(body) => body,
            Err(err) => {
                return PushResult::client_error(PushStatus::InternalError, err.to_string());
            }
        };
        self.dispatch("/send/raw", body, options).await
    }

    async fn dispatch(&self, suffix: &str, body: Vec<u8>, options: &PushOptions) -> PushResult {
        let mut headers = vec![(
            "authorization".to_string(),
            format!("{} {}", self.profile.auth_scheme, self.profile.access_token),
        )];
        if let Some(remote) = &options.remote_retry_options {
            for (name, value) in retry::to_header_pairs(remote) {
                headers.push((name.to_string(), value));
            }
        }
        if let Some(timeout) = options.remote_total_timeout {
            let (name, value) = retry::response_timeout_pair(timeout);
            headers.push((name.to_string(), value));
        }

        let plan = self.pipeline.engine.resolve_plan(options.local_retry_options.as_ref());
        let path = format!(
            "/api/v1/{}/{}{}",
            self.profile.profile_set_group, self.profile.profile_set, suffix
        );
        self.pipeline
            .run(self.profile.provider, &plan, &path, &headers, body, mapper::map_relay)
            .await
    }

    pub fn close(&self) {
        self.pipeline.close();
    }
}
