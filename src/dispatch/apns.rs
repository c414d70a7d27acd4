//! APNs dispatcher: HTTP/2 POST `/3/device/<token>`.

use super::http::build_client;
use super::{joined_base_path, DeliveryPipeline, RequestHook};
use crate::auth::ApnsAuth;
use crate::codec;
use crate::endpoint::{AddressResolver, DnsResolver, EndpointGroup, StaticResolver};
use crate::clock::MonotonicClock;
use crate::error::Error;
use crate::mapper;
use crate::model::{Provider, PushRequest, PushResult, RawPushRequest};
use crate::profile::{AppleProfile, ProfileOptions};
use crate::retry::{RetryBudget, RetryEngine, RetryOptions};
use crate::telemetry::{DeliverySink, LogSink};
use std::sync::Arc;

pub struct ApnsDispatcher {
    auth: ApnsAuth,
    pipeline: DeliveryPipeline,
}

impl std::fmt::Debug for ApnsDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApnsDispatcher").finish_non_exhaustive()
    }
}

impl ApnsDispatcher {
    pub fn new(profile: &AppleProfile) -> Result<Self, Error> {
        Self::with_observers(profile, Arc::new(LogSink), None)
    }

    pub fn with_observers(
        profile: &AppleProfile,
        sink: Arc<dyn DeliverySink>,
        hook: Option<Arc<dyn RequestHook>>,
    ) -> Result<Self, Error> {
        let auth = ApnsAuth::from_profile(profile);
        let identity = auth.tls_identity()?;
        let client = build_client(&profile.options.client, identity)?;
        let pipeline = build_pipeline(
            client,
            &profile.endpoint,
            None,
            &profile.options,
            Arc::clone(&sink),
            hook,
        );
        Ok(Self { auth, pipeline })
    }

    pub async fn send(
        &self,
        request: &PushRequest,
        retry_options: Option<&RetryOptions>,
    ) -> PushResult {
        let payload = match codec::apns::encode(request) {
            Ok(payload) => payload,
            Err(err) => return err.to_result(),
        };
        let mut headers = self.auth.request_headers();
        headers.extend(payload.headers);
        let plan = self.pipeline.engine.resolve_plan(retry_options);
        let path = format!("/3/device/{}", request.device_token());
        self.pipeline
            .run(Provider::Apple, &plan, &path, &headers, payload.body, mapper::map_apns)
            .await
    }

    pub async fn send_raw(
        &self,
        request: &RawPushRequest,
        retry_options: Option<&RetryOptions>,
    ) -> PushResult {
        let payload = match codec::raw::encode(request) {
            Ok(payload) => payload,
            Err(err) => return err.to_result(),
        };
        let mut headers = self.auth.request_headers();
        headers.extend(payload.headers);
        let plan = self.pipeline.engine.resolve_plan(retry_options);
        let path = format!("/3/device/{}", request.device_token());
        self.pipeline
            .run(Provider::Apple, &plan, &path, &headers, payload.body, mapper::map_apns)
            .await
    }

    pub fn close(&self) {
        self.pipeline.close();
    }
}

/// Shared pipeline wiring used by every dispatcher kind.
pub(crate) fn build_pipeline(
    client: reqwest::Client,
    endpoint: &url::Url,
    static_endpoints: Option<&[crate::endpoint::Endpoint]>,
    options: &ProfileOptions,
    sink: Arc<dyn DeliverySink>,
    hook: Option<Arc<dyn RequestHook>>,
) -> DeliveryPipeline {
    let clock = Arc::new(MonotonicClock::default());
    let host = endpoint.host_str().unwrap_or_default().to_string();
    let port = endpoint.port_or_known_default().unwrap_or(443);

    let resolver: Arc<dyn AddressResolver> = match static_endpoints {
        Some(endpoints) => Arc::new(StaticResolver::new(endpoints.to_vec())),
        None if host.parse::<std::net::IpAddr>().is_ok() => {
            Arc::new(StaticResolver::new(vec![crate::endpoint::Endpoint::new(host, port)]))
        }
        None => Arc::new(DnsResolver::new(host, port)),
    };
    let group = EndpointGroup::with_parts(
        resolver,
        options.endpoint_group.clone().unwrap_or_default(),
        clock.clone(),
        Arc::clone(&sink),
    );

    let budget = options
        .rate_limit
        .as_ref()
        .map(|rate_limit| RetryBudget::new(rate_limit, clock.clone() as Arc<dyn crate::clock::Clock>));
    let engine = RetryEngine::new(options.retry.as_ref(), budget);

    DeliveryPipeline {
        client,
        group,
        engine,
        sink,
        hook,
        scheme: endpoint.scheme().to_string(),
        base_path: joined_base_path(endpoint),
    }
}
