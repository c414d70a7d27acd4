//! Delivery lifecycle events and pluggable sinks.
//!
//! The core ships no metrics endpoint; embedders hook a sink into the
//! dispatcher's metrics stage instead. `LogSink` forwards to `tracing`
//! and is the default; `MemorySink` records events for tests.

use crate::circuit_breaker::CircuitState;
use crate::endpoint::Endpoint;
use crate::model::{Provider, PushStatus};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryEvent {
    AttemptStarted { provider: Provider, endpoint: Option<Endpoint>, attempt: u32 },
    AttemptFinished { provider: Provider, attempt: u32, http_status: Option<u16> },
    DeliveryFinished { provider: Provider, status: PushStatus, elapsed: Duration },
    EndpointAdded { endpoint: Endpoint },
    EndpointEvicted { endpoint: Endpoint },
    BreakerStateChanged { endpoint: Endpoint, state: CircuitState },
}

pub trait DeliverySink: Send + Sync + std::fmt::Debug {
    fn record(&self, event: &DeliveryEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DeliverySink for LogSink {
    fn record(&self, event: &DeliveryEvent) {
        match event {
            DeliveryEvent::AttemptStarted { provider, endpoint, attempt } => {
                debug!(%provider, ?endpoint, attempt, "delivery attempt started");
            }
            DeliveryEvent::AttemptFinished { provider, attempt, http_status } => {
                debug!(%provider, attempt, ?http_status, "delivery attempt finished");
            }
            DeliveryEvent::DeliveryFinished { provider, status, elapsed } => {
                info!(%provider, ?status, elapsed_ms = elapsed.as_millis() as u64, "delivery finished");
            }
            DeliveryEvent::EndpointAdded { endpoint } => {
                debug!(%endpoint, "endpoint added");
            }
            DeliveryEvent::EndpointEvicted { endpoint } => {
                info!(%endpoint, "endpoint evicted");
            }
            DeliveryEvent::BreakerStateChanged { endpoint, state } => {
                info!(%endpoint, ?state, "breaker state changed");
            }
        }
    }
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DeliverySink for NullSink {
    fn record(&self, _event: &DeliveryEvent) {}
}

/// Records events in memory for assertions.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<DeliveryEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DeliveryEvent> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
    }
}

impl DeliverySink for MemorySink {
    fn record(&self, event: &DeliveryEvent) {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(event.clone());
    }
}
