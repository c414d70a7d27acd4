//! Push content and the per-vendor property blocks.
//!
//! A [`Push`] carries vendor-neutral fields (`title`, `body`,
//! `imageUri`) plus at most one vendor-specific property block. The
//! block present decides the push's [`Provider`]; a push with no block
//! is `GENERIC` and is bound to a vendor at dispatch time.

use super::Provider;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Logical push content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "PushWire")]
pub struct Push {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apple: Option<ApplePushProps>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firebase: Option<FirebasePushProps>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web: Option<WebPushProps>,
}

/// Decode shadow enforcing the at-most-one-vendor-block rule.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushWire {
    title: Option<String>,
    body: Option<String>,
    image_uri: Option<String>,
    apple: Option<ApplePushProps>,
    firebase: Option<FirebasePushProps>,
    web: Option<WebPushProps>,
}

impl TryFrom<PushWire> for Push {
    type Error = String;

    fn try_from(wire: PushWire) -> Result<Self, String> {
        let blocks =
            wire.apple.is_some() as u8 + wire.firebase.is_some() as u8 + wire.web.is_some() as u8;
        if blocks > 1 {
            return Err("push must carry at most one vendor-specific property block".to_string());
        }
        Ok(Push {
            title: wire.title,
            body: wire.body,
            image_uri: wire.image_uri,
            apple: wire.apple,
            firebase: wire.firebase,
            web: wire.web,
        })
    }
}

impl Push {
    /// An APNs-bound push with a synthesized alert title and body.
    pub fn for_apple(title: impl Into<String>, body: impl Into<String>) -> Self {
        Push {
            title: Some(title.into()),
            body: Some(body.into()),
            apple: Some(ApplePushProps::default()),
            ..Push::default()
        }
    }

    /// An FCM-bound push with a synthesized notification title and body.
    pub fn for_firebase(title: impl Into<String>, body: impl Into<String>) -> Self {
        Push {
            title: Some(title.into()),
            body: Some(body.into()),
            firebase: Some(FirebasePushProps::default()),
            ..Push::default()
        }
    }

    /// A vendor-agnostic push.
    pub fn generic(title: impl Into<String>, body: impl Into<String>) -> Self {
        Push { title: Some(title.into()), body: Some(body.into()), ..Push::default() }
    }

    /// The provider implied by the vendor block present, or `Generic`.
    pub fn provider(&self) -> Provider {
        if self.apple.is_some() {
            Provider::Apple
        } else if self.firebase.is_some() {
            Provider::Firebase
        } else if self.web.is_some() {
            Provider::Web
        } else {
            Provider::Generic
        }
    }
}

/// APNs-specific content and headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplePushProps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<ApnsHeaders>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<ApnsAlert>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<AppleSound>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_available: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutable_content: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_content_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interruption_level: Option<InterruptionLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_criteria: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_state: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dismissal_date: Option<i64>,
    /// Extra top-level payload keys, siblings to `aps`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<Map<String, Value>>,
}

/// Request-scoped APNs headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApnsHeaders {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apns_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apns_expiration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apns_priority: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apns_push_type: Option<ApnsPushType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apns_collapse_id: Option<String>,
}

/// The `apns-push-type` header values APNs accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApnsPushType {
    Alert,
    Background,
    Location,
    Voip,
    Complication,
    Fileprovider,
    Mdm,
    Liveactivity,
    Pushtotalk,
}

impl ApnsPushType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApnsPushType::Alert => "alert",
            ApnsPushType::Background => "background",
            ApnsPushType::Location => "location",
            ApnsPushType::Voip => "voip",
            ApnsPushType::Complication => "complication",
            ApnsPushType::Fileprovider => "fileprovider",
            ApnsPushType::Mdm => "mdm",
            ApnsPushType::Liveactivity => "liveactivity",
            ApnsPushType::Pushtotalk => "pushtotalk",
        }
    }
}

/// `aps.alert`: either a bare string or the structured dictionary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApnsAlert {
    Body(String),
    Dict(ApnsAlertDict),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApnsAlertDict {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_loc_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_loc_args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_loc_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_loc_args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loc_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loc_args: Option<Vec<String>>,
}

/// `aps.sound`: either a sound name or the critical-alert dictionary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AppleSound {
    Name(String),
    Dict(AppleSoundDict),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppleSoundDict {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critical: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

/// `aps.interruption-level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterruptionLevel {
    #[serde(rename = "passive")]
    Passive,
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "time-sensitive")]
    TimeSensitive,
    #[serde(rename = "critical")]
    Critical,
}

/// FCM-specific content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirebasePushProps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<FcmNotification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub android: Option<AndroidConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fcm_options: Option<FcmOptions>,
    /// Extra keys merged into the `message` object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FcmNotification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AndroidConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collapse_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restricted_package_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<AndroidNotification>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AndroidNotification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub click_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_loc_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_loc_args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_loc_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_loc_args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FcmOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analytics_label: Option<String>,
}

/// Web-push content. Participates in validation and size limits; wire
/// delivery goes through the generic relay path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebPushProps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<WebNotification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebNotification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_follows_vendor_block() {
        assert_eq!(Push::for_apple("t", "b").provider(), Provider::Apple);
        assert_eq!(Push::for_firebase("t", "b").provider(), Provider::Firebase);
        assert_eq!(Push::generic("t", "b").provider(), Provider::Generic);
    }

    #[test]
    fn two_vendor_blocks_fail_to_decode() {
        let json = r#"{"title":"t","apple":{},"firebase":{}}"#;
        assert!(serde_json::from_str::<Push>(json).is_err());
    }

    #[test]
    fn alert_round_trips_as_string_or_dict() {
        let as_string = ApnsAlert::Body("hello".to_string());
        let json = serde_json::to_string(&as_string).unwrap();
        assert_eq!(json, "\"hello\"");
        assert_eq!(serde_json::from_str::<ApnsAlert>(&json).unwrap(), as_string);

        let as_dict = ApnsAlert::Dict(ApnsAlertDict {
            title: Some("t".to_string()),
            loc_args: Some(vec!["a".to_string()]),
            ..ApnsAlertDict::default()
        });
        let json = serde_json::to_string(&as_dict).unwrap();
        assert_eq!(serde_json::from_str::<ApnsAlert>(&json).unwrap(), as_dict);
    }

    #[test]
    fn sound_round_trips_as_string_or_dict() {
        let name = AppleSound::Name("default".to_string());
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(serde_json::from_str::<AppleSound>(&json).unwrap(), name);

        let dict = AppleSound::Dict(AppleSoundDict {
            critical: Some(1),
            name: Some("siren".to_string()),
            volume: Some(0.5),
        });
        let json = serde_json::to_string(&dict).unwrap();
        assert_eq!(serde_json::from_str::<AppleSound>(&json).unwrap(), dict);
    }

    #[test]
    fn apple_props_round_trip_with_custom_data() {
        let mut custom = Map::new();
        custom.insert("k".to_string(), Value::from(1));
        let props = ApplePushProps {
            badge: Some(3),
            interruption_level: Some(InterruptionLevel::TimeSensitive),
            custom_data: Some(custom),
            ..ApplePushProps::default()
        };
        let json = serde_json::to_string(&props).unwrap();
        assert!(json.contains("\"time-sensitive\""));
        assert_eq!(serde_json::from_str::<ApplePushProps>(&json).unwrap(), props);

        let bare = ApplePushProps::default();
        let json = serde_json::to_string(&bare).unwrap();
        assert_eq!(serde_json::from_str::<ApplePushProps>(&json).unwrap(), bare);
    }

    #[test]
    fn push_type_values_are_lowercase() {
        assert_eq!(serde_json::to_string(&ApnsPushType::Liveactivity).unwrap(), "\"liveactivity\"");
        assert_eq!(ApnsPushType::Background.as_str(), "background");
    }
}
