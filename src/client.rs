//! The client facade.
//!
//! A `PushClient` owns one dispatcher per (profile set, provider) and
//! addresses them by `group/name`. The two entry points never fail with
//! an error: every internal failure is converted into a `PushResult`.
//! `send` is the suspension form; `send_with_listener` is the callback
//! form layered on top of it, and the listener is invoked exactly once.

use crate::auth::AssertionSigner;
use crate::dispatch::{ApnsDispatcher, FcmDispatcher, RelayDispatcher, RequestHook};
use crate::error::Error;
use crate::model::{Provider, PushRequest, PushResult, PushStatus, RawPushRequest, ResultSource};
use crate::profile::{Profile, ProfileSet};
use crate::retry::PushOptions;
use crate::telemetry::{DeliverySink, LogSink};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
enum Dispatcher {
    Apns(ApnsDispatcher),
    Fcm(FcmDispatcher),
    Relay(RelayDispatcher),
}

impl Dispatcher {
    async fn send(&self, request: &PushRequest, options: &PushOptions) -> PushResult {
        match self {
            Dispatcher::Apns(dispatcher) => {
                dispatcher.send(request, options.local_retry_options.as_ref()).await
            }
            Dispatcher::Fcm(dispatcher) => {
                dispatcher.send(request, options.local_retry_options.as_ref()).await
            }
            Dispatcher::Relay(dispatcher) => dispatcher.send(request, options).await,
        }
    }

    async fn send_raw(&self, request: &RawPushRequest, options: &PushOptions) -> PushResult {
        match self {
            Dispatcher::Apns(dispatcher) => {
                dispatcher.send_raw(request, options.local_retry_options.as_ref()).await
            }
            Dispatcher::Fcm(dispatcher) => {
                dispatcher.send_raw(request, options.local_retry_options.as_ref()).await
            }
            Dispatcher::Relay(dispatcher) => dispatcher.send_raw(request, options).await,
        }
    }

    fn close(&self) {
        match self {
            Dispatcher::Apns(dispatcher) => dispatcher.close(),
            Dispatcher::Fcm(dispatcher) => dispatcher.close(),
            Dispatcher::Relay(dispatcher) => dispatcher.close(),
        }
    }
}

struct SetEntry {
    set: ProfileSet,
    dispatchers: HashMap<Provider, Dispatcher>,
}

struct ClientInner {
    sets: HashMap<String, SetEntry>,
}

/// A handle to the delivery core. Cheap to clone.
#[derive(Clone)]
pub struct PushClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for PushClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushClient").field("sets", &self.inner.sets.keys()).finish()
    }
}

impl PushClient {
    pub fn builder() -> PushClientBuilder {
        PushClientBuilder::default()
    }

    /// Deliver one push. Always resolves to a `PushResult`; the overall
    /// timeout (per-request override or profile default) aborts
    /// in-flight attempts and backoff waits.
    pub async fn send(
        &self,
        group: &str,
        set: &str,
        request: &PushRequest,
        options: &PushOptions,
    ) -> PushResult {
        let (entry, dispatcher) = match self.lookup(group, set, request.provider()) {
            Ok(found) => found,
            Err(result) => return *result,
        };
        let timeout = total_timeout(entry, request.provider(), options);
        Self::bounded(timeout, dispatcher.send(request, options)).await
    }

    /// Deliver a pre-built raw push.
    pub async fn send_raw(
        &self,
        group: &str,
        set: &str,
        request: &RawPushRequest,
        options: &PushOptions,
    ) -> PushResult {
        let (entry, dispatcher) = match self.lookup(group, set, request.provider()) {
            Ok(found) => found,
            Err(result) => return *result,
        };
        let timeout = total_timeout(entry, request.provider(), options);
        Self::bounded(timeout, dispatcher.send_raw(request, options)).await
    }

    /// Callback form of [`send`](Self::send). The listener is invoked
    /// exactly once, on the delivered result.
    pub fn send_with_listener<F>(
        &self,
        group: &str,
        set: &str,
        request: PushRequest,
        options: PushOptions,
        listener: F,
    ) where
        F: FnOnce(PushResult) + Send + 'static,
    {
        let client = self.clone();
        let group = group.to_string();
        let set = set.to_string();
        tokio::spawn(async move {
            let result = client.send(&group, &set, &request, &options).await;
            listener(result);
        });
    }

    /// Callback form of [`send_raw`](Self::send_raw).
    pub fn send_raw_with_listener<F>(
        &self,
        group: &str,
        set: &str,
        request: RawPushRequest,
        options: PushOptions,
        listener: F,
    ) where
        F: FnOnce(PushResult) + Send + 'static,
    {
        let client = self.clone();
        let group = group.to_string();
        let set = set.to_string();
        tokio::spawn(async move {
            let result = client.send_raw(&group, &set, &request, &options).await;
            listener(result);
        });
    }

    pub fn profile_set(&self, group: &str, set: &str) -> Option<&ProfileSet> {
        self.inner.sets.get(&format!("{group}/{set}")).map(|entry| &entry.set)
    }

    /// Stop endpoint refresh tasks and release pooled connections.
    pub fn close(&self) {
        for entry in self.inner.sets.values() {
            for dispatcher in entry.dispatchers.values() {
                dispatcher.close();
            }
        }
    }

    fn lookup(
        &self,
        group: &str,
        set: &str,
        provider: Provider,
    ) -> Result<(&SetEntry, &Dispatcher), Box<PushResult>> {
        let Some(entry) = self.inner.sets.get(&format!("{group}/{set}")) else {
            return Err(Box::new(
                PushResult::new(PushStatus::ProfileMissing, ResultSource::Client)
                    .with_reason(format!("unknown profile set {group}/{set}")),
            ));
        };
        let Some(dispatcher) = entry.dispatchers.get(&provider) else {
            return Err(Box::new(
                PushResult::new(PushStatus::ProfileMissing, ResultSource::Client)
                    .with_reason(format!("no {provider} profile in {group}/{set}")),
            ));
        };
        Ok((entry, dispatcher))
    }

    async fn bounded(
        timeout: Option<Duration>,
        delivery: impl std::future::Future<Output = PushResult>,
    ) -> PushResult {
        match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, delivery).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    debug!(timeout_ms = timeout.as_millis() as u64, "delivery hit total timeout");
                    PushResult::new(PushStatus::InternalError, ResultSource::Client)
                        .with_reason("timeout")
                }
            },
            None => delivery.await,
        }
    }
}

fn total_timeout(
    entry: &SetEntry,
    provider: Provider,
    options: &PushOptions,
) -> Option<Duration> {
    options
        .local_total_timeout
        .or_else(|| entry.set.find(provider).and_then(|profile| profile.options().total_timeout))
}

#[derive(Default)]
pub struct PushClientBuilder {
    sets: Vec<ProfileSet>,
    sink: Option<Arc<dyn DeliverySink>>,
    hook: Option<Arc<dyn RequestHook>>,
    fcm_signer: Option<Arc<dyn AssertionSigner>>,
}

impl PushClientBuilder {
    pub fn profile_set(mut self, set: ProfileSet) -> Self {
        self.sets.push(set);
        self
    }

    /// Sink receiving delivery and endpoint lifecycle events.
    pub fn sink(mut self, sink: Arc<dyn DeliverySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// User-supplied decorator applied innermost around each attempt.
    pub fn request_hook(mut self, hook: Arc<dyn RequestHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Replace the local RSA assertion signer for FCM profiles.
    pub fn fcm_signer(mut self, signer: Arc<dyn AssertionSigner>) -> Self {
        self.fcm_signer = Some(signer);
        self
    }

    /// Build the client and its dispatchers. Must run inside a tokio
    /// runtime; endpoint refresh tasks start here.
    pub fn build(self) -> Result<PushClient, Error> {
        let sink = self.sink.unwrap_or_else(|| Arc::new(LogSink));
        let mut sets = HashMap::new();
        for set in self.sets {
            let id = set.id();
            if sets.contains_key(&id) {
                return Err(Error::InvalidProfileSet(format!("duplicate profile set {id}")));
            }
            let mut dispatchers = HashMap::new();
            for profile in set.profiles() {
                let dispatcher = match profile {
                    Profile::Apple(profile) => Dispatcher::Apns(ApnsDispatcher::with_observers(
                        profile,
                        Arc::clone(&sink),
                        self.hook.clone(),
                    )?),
                    Profile::Firebase(profile) => Dispatcher::Fcm(FcmDispatcher::with_observers(
                        profile,
                        Arc::clone(&sink),
                        self.hook.clone(),
                        self.fcm_signer.clone(),
                    )?),
                    Profile::Relay(profile) => Dispatcher::Relay(RelayDispatcher::with_observers(
                        profile,
                        Arc::clone(&sink),
                        self.hook.clone(),
                    )?),
                };
                dispatchers.insert(profile.provider(), dispatcher);
            }
            sets.insert(id, SetEntry { set, dispatchers });
        }
        debug!(sets = sets.len(), "push client built");
        Ok(PushClient { inner: Arc::new(ClientInner { sets }) })
    }
}
