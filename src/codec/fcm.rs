//! FCM payload shaping.
//!
//! The wire body is `{"message": {...}, "validate_only": false}` with
//! underscored keys throughout. The device token is injected into the
//! message when the content did not already carry one, and a
//! `notification` block is synthesized from the vendor-neutral
//! title/body/imageUri when none is given.

use super::{check_size, merge_dropping_nulls, CodecError, EncodedPayload};
use crate::model::{
    AndroidConfig, AndroidNotification, FcmNotification, FirebasePushProps, Provider, PushRequest,
};
use serde_json::{Map, Value};

pub fn encode(request: &PushRequest) -> Result<EncodedPayload, CodecError> {
    let empty = FirebasePushProps::default();
    let props = request.push().firebase.as_ref().unwrap_or(&empty);

    let mut message = Map::new();
    if let Some(data) = &props.data {
        message.insert("data".to_string(), Value::Object(coerce_string_map(data)));
    }
    if let Some(notification) = resolve_notification(request, props) {
        message.insert("notification".to_string(), notification);
    }
    if let Some(android) = &props.android {
        message.insert("android".to_string(), encode_android(android));
    }
    if let Some(fcm_options) = &props.fcm_options {
        let mut out = Map::new();
        if let Some(label) = &fcm_options.analytics_label {
            out.insert("analytics_label".to_string(), Value::from(label.clone()));
        }
        message.insert("fcm_options".to_string(), Value::Object(out));
    }
    if let Some(custom_data) = &props.custom_data {
        merge_dropping_nulls(&mut message, custom_data);
    }
    if !message.contains_key("token") {
        message.insert("token".to_string(), Value::from(request.device_token().to_string()));
    }

    let mut wrapper = Map::new();
    wrapper.insert("message".to_string(), Value::Object(message));
    wrapper.insert("validate_only".to_string(), Value::Bool(false));

    let body = serde_json::to_vec(&Value::Object(wrapper))
        .map_err(|err| CodecError::Invalid(err.to_string()))?;
    check_size(Provider::Firebase, &body)?;
    Ok(EncodedPayload { body, headers: Vec::new() })
}

/// An explicit notification wins; otherwise one is synthesized when any
/// of title/body/imageUri is set.
fn resolve_notification(request: &PushRequest, props: &FirebasePushProps) -> Option<Value> {
    if let Some(notification) = &props.notification {
        return Some(encode_notification(notification));
    }
    let push = request.push();
    if push.title.is_none() && push.body.is_none() && push.image_uri.is_none() {
        return None;
    }
    Some(encode_notification(&FcmNotification {
        title: push.title.clone(),
        body: push.body.clone(),
        image: push.image_uri.clone(),
    }))
}

fn encode_notification(notification: &FcmNotification) -> Value {
    let mut out = Map::new();
    put_opt(&mut out, "title", &notification.title);
    put_opt(&mut out, "body", &notification.body);
    put_opt(&mut out, "image", &notification.image);
    Value::Object(out)
}

fn encode_android(android: &AndroidConfig) -> Value {
    let mut out = Map::new();
    put_opt(&mut out, "collapse_key", &android.collapse_key);
    put_opt(&mut out, "priority", &android.priority);
    put_opt(&mut out, "ttl", &android.ttl);
    put_opt(&mut out, "restricted_package_name", &android.restricted_package_name);
    if let Some(data) = &android.data {
        out.insert("data".to_string(), Value::Object(coerce_string_map(data)));
    }
    if let Some(notification) = &android.notification {
        out.insert("notification".to_string(), encode_android_notification(notification));
    }
    Value::Object(out)
}

fn encode_android_notification(notification: &AndroidNotification) -> Value {
    let mut out = Map::new();
    put_opt(&mut out, "title", &notification.title);
    put_opt(&mut out, "body", &notification.body);
    put_opt(&mut out, "icon", &notification.icon);
    put_opt(&mut out, "color", &notification.color);
    put_opt(&mut out, "sound", &notification.sound);
    put_opt(&mut out, "tag", &notification.tag);
    put_opt(&mut out, "click_action", &notification.click_action);
    put_opt(&mut out, "body_loc_key", &notification.body_loc_key);
    put_opt_list(&mut out, "body_loc_args", &notification.body_loc_args);
    put_opt(&mut out, "title_loc_key", &notification.title_loc_key);
    put_opt_list(&mut out, "title_loc_args", &notification.title_loc_args);
    put_opt(&mut out, "channel_id", &notification.channel_id);
    put_opt(&mut out, "image", &notification.image);
    Value::Object(out)
}

/// FCM data maps are string-to-string; non-string values are coerced to
/// their printed form, and null entries are dropped.
fn coerce_string_map(data: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in data {
        let coerced = match value {
            Value::Null => continue,
            Value::String(value) => value.clone(),
            other => other.to_string(),
        };
        out.insert(key.clone(), Value::from(coerced));
    }
    out
}

fn put_opt(out: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        out.insert(key.to_string(), Value::from(value.clone()));
    }
}

fn put_opt_list(out: &mut Map<String, Value>, key: &str, value: &Option<Vec<String>>) {
    if let Some(value) = value {
        out.insert(key.to_string(), Value::from(value.clone()));
    }
}
