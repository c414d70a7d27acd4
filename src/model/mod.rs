//! Wire-level data model: providers, push content, requests, results.

mod provider;
mod push;
mod request;
mod result;

pub use provider::Provider;
pub use push::{
    AndroidConfig, AndroidNotification, ApnsAlert, ApnsAlertDict, ApnsHeaders, ApnsPushType,
    ApplePushProps, AppleSound, AppleSoundDict, FcmNotification, FcmOptions, FirebasePushProps,
    InterruptionLevel, Push, WebNotification, WebPushProps,
};
pub use request::{PushRequest, RawPush, RawPushRequest};
pub use result::{
    FcmError, FcmErrorDetails, PushResult, PushResultProps, PushStatus, ResultSource,
};
