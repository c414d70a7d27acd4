#![forbid(unsafe_code)]

//! # pushgate
//!
//! A push-notification delivery core for APNs and FCM over HTTP/2, plus
//! gateway-to-gateway relaying.
//!
//! ## Features
//!
//! - **Payload codecs** with vendor-specific validation and size limits
//! - **Endpoint groups** with DNS refresh, per-endpoint circuit
//!   breakers, and outlier eviction
//! - **Composable retry rules**: rate-limit gate → `Retry-After` →
//!   per-status options → policy set, with per-request overrides
//! - **Credential plumbing**: APNs bearer/mTLS, FCM OAuth2 token
//!   exchange with pre-refresh
//! - **Uniform results** over a canonical status taxonomy
//!
//! ## Quick Start
//!
//! ```no_run
//! use pushgate::{
//!     Profile, ProfileSet, Provider, Push, PushClient, PushOptions, PushRequest,
//! };
//! use pushgate::profile::AppleProfile;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pushgate::Error> {
//!     let apple = AppleProfile::builder()
//!         .endpoint("https://api.push.apple.com")
//!         .bundle_id("com.example.app")
//!         .bearer_token(std::env::var("APNS_TOKEN").unwrap_or_default())
//!         .build()?;
//!     let set = ProfileSet::new("talk", "main", vec![Profile::Apple(apple)])?;
//!     let client = PushClient::builder().profile_set(set).build()?;
//!
//!     let request = PushRequest::new(
//!         Provider::Apple,
//!         "device-token",
//!         Push::for_apple("Hello", "World"),
//!     )?;
//!     let result = client.send("talk", "main", &request, &PushOptions::default()).await;
//!     println!("{:?}: {:?}", result.status, result.reason);
//!     client.close();
//!     Ok(())
//! }
//! ```

mod backoff;
mod circuit_breaker;
mod client;
mod clock;
mod error;
mod jitter;
mod mapper;
mod sleeper;
mod window;

pub mod auth;
pub mod codec;
pub mod dispatch;
pub mod endpoint;
pub mod model;
pub mod profile;
pub mod retry;
pub mod telemetry;

// Re-exports
pub use backoff::{Backoff, BackoffSpec, DEFAULT_BACKOFF_SPEC};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerOptions, CircuitState};
pub use client::{PushClient, PushClientBuilder};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{DispatchError, Error};
pub use jitter::Jitter;
pub use mapper::VendorResponse;
pub use model::{
    Provider, Push, PushRequest, PushResult, PushResultProps, PushStatus, RawPush,
    RawPushRequest, ResultSource,
};
pub use profile::{Profile, ProfileSet};
pub use retry::{
    PushOptions, RetryAfterStrategy, RetryOptions, RetryPolicy, RetryRateLimitOptions,
};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use window::SlidingWindowCounter;
