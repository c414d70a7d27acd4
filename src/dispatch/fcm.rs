//! FCM dispatcher: POST `/v1/projects/<projectId>/messages:send` with
//! an exchanged OAuth2 bearer token.

use super::apns::build_pipeline;
use super::http::build_client;
use super::{DeliveryPipeline, RequestHook};
use crate::auth::{AssertionSigner, TokenExchanger};
use crate::codec;
use crate::error::Error;
use crate::mapper;
use crate::model::{Provider, PushRequest, PushResult, RawPushRequest};
use crate::profile::FirebaseProfile;
use crate::retry::RetryOptions;
use crate::telemetry::{DeliverySink, LogSink};
use std::sync::Arc;

pub struct FcmDispatcher {
    exchanger: Arc<TokenExchanger>,
    pipeline: DeliveryPipeline,
}

impl std::fmt::Debug for FcmDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FcmDispatcher").field("exchanger", &self.exchanger).finish()
    }
}

impl FcmDispatcher {
    pub fn new(profile: &FirebaseProfile) -> Result<Self, Error> {
        Self::with_observers(profile, Arc::new(LogSink), None, None)
    }

    /// Full-wiring constructor: custom sink, user hook, and optionally
    /// a replacement assertion signer (e.g. KMS-backed).
    pub fn with_observers(
        profile: &FirebaseProfile,
        sink: Arc<dyn DeliverySink>,
        hook: Option<Arc<dyn RequestHook>>,
        signer: Option<Arc<dyn AssertionSigner>>,
    ) -> Result<Self, Error> {
        let client = build_client(&profile.options.client, None)?;
        let exchanger = match signer {
            Some(signer) => TokenExchanger::with_signer(
                profile.service_account.clone(),
                client.clone(),
                signer,
            ),
            None => TokenExchanger::new(profile.service_account.clone(), client.clone())?,
        };
        let pipeline = build_pipeline(
            client,
            &profile.endpoint,
            None,
            &profile.options,
            Arc::clone(&sink),
            hook,
        );
        Ok(Self { exchanger: Arc::new(exchanger), pipeline })
    }

    pub async fn send(
        &self,
        request: &PushRequest,
        retry_options: Option<&RetryOptions>,
    ) -> PushResult {
        let payload = match codec::fcm::encode(request) {
            Ok(payload) => payload,
            Err(err) => return err.to_result(),
        };
        self.dispatch(payload.body, retry_options).await
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
        self.dispatch(payload.body, retry_options).await
    }

    async fn dispatch(&self, body: Vec<u8>, retry_options: Option<&RetryOptions>) -> PushResult {
        // The exchanged token is attached per call; the exchanger
        // caches it and pre-refreshes before expiry.
        let token = match self.exchanger.access_token().await {
            Ok(token) => token,
            Err(err) => return mapper::map_error(err),
        };
        let headers = vec![("authorization".to_string(), format!("Bearer {token}"))];
        let plan = self.pipeline.engine.resolve_plan(retry_options);
        let path = format!("/v1/projects/{}/messages:send", self.exchanger.project_id());
        self.pipeline
            .run(Provider::Firebase, &plan, &path, &headers, body, mapper::map_fcm)
            .await
    }

    pub fn close(&self) {
        self.pipeline.close();
    }
}
