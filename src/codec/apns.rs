//! APNs payload shaping.
//!
//! The wire body is a JSON object whose top level has `aps` plus the
//! request's custom data keys as siblings. `aps` uses hyphenated names
//! throughout. Request headers are validated here so malformed pushes
//! fail locally, before any network I/O.

use super::{check_size, merge_dropping_nulls, CodecError, EncodedPayload};
use crate::model::{
    ApnsAlert, ApnsAlertDict, ApnsHeaders, ApnsPushType, ApplePushProps, AppleSound, PushRequest,
};
use crate::model::Provider;
use serde_json::{Map, Value};
use uuid::Uuid;

pub fn encode(request: &PushRequest) -> Result<EncodedPayload, CodecError> {
    let empty = ApplePushProps::default();
    let props = request.push().apple.as_ref().unwrap_or(&empty);

    let headers = build_headers(props.headers.as_ref())?;
    let alert = resolve_alert(request, props);
    validate_background_shape(props, &alert)?;

    let mut aps = Map::new();
    if let Some(alert) = alert {
        aps.insert("alert".to_string(), alert);
    }
    if let Some(badge) = props.badge {
        aps.insert("badge".to_string(), Value::from(badge));
    }
    if let Some(sound) = &props.sound {
        aps.insert("sound".to_string(), encode_sound(sound));
    }
    if let Some(thread_id) = &props.thread_id {
        aps.insert("thread-id".to_string(), Value::from(thread_id.clone()));
    }
    if let Some(category) = &props.category {
        aps.insert("category".to_string(), Value::from(category.clone()));
    }
    if props.content_available == Some(true) {
        aps.insert("content-available".to_string(), Value::from(1));
    }
    if props.mutable_content == Some(true) {
        aps.insert("mutable-content".to_string(), Value::from(1));
    }
    if let Some(target_content_id) = &props.target_content_id {
        aps.insert("target-content-id".to_string(), Value::from(target_content_id.clone()));
    }
    if let Some(level) = props.interruption_level {
        aps.insert(
            "interruption-level".to_string(),
            serde_json::to_value(level).unwrap_or(Value::Null),
        );
    }
    if let Some(score) = props.relevance_score {
        aps.insert("relevance-score".to_string(), Value::from(score));
    }
    if let Some(filter_criteria) = &props.filter_criteria {
        aps.insert("filter-criteria".to_string(), Value::from(filter_criteria.clone()));
    }
    if let Some(stale_date) = props.stale_date {
        require_non_negative("stale-date", stale_date)?;
        aps.insert("stale-date".to_string(), Value::from(stale_date));
    }
    if let Some(content_state) = &props.content_state {
        let mut state = Map::new();
        merge_dropping_nulls(&mut state, content_state);
        aps.insert("content-state".to_string(), Value::Object(state));
    }
    if let Some(timestamp) = props.timestamp {
        require_non_negative("timestamp", timestamp)?;
        aps.insert("timestamp".to_string(), Value::from(timestamp));
    }
    if let Some(events) = &props.events {
        aps.insert("events".to_string(), Value::from(events.clone()));
    }
    if let Some(dismissal_date) = props.dismissal_date {
        require_non_negative("dismissal-date", dismissal_date)?;
        aps.insert("dismissal-date".to_string(), Value::from(dismissal_date));
    }

    let mut body = Map::new();
    body.insert("aps".to_string(), Value::Object(aps));
    if let Some(custom_data) = &props.custom_data {
        merge_dropping_nulls(&mut body, custom_data);
    }

    let body = serde_json::to_vec(&Value::Object(body))
        .map_err(|err| CodecError::Invalid(err.to_string()))?;
    check_size(Provider::Apple, &body)?;
    Ok(EncodedPayload { body, headers })
}

/// An explicit alert wins; otherwise one is synthesized from the
/// vendor-neutral title/body.
fn resolve_alert(request: &PushRequest, props: &ApplePushProps) -> Option<Value> {
    if let Some(alert) = &props.alert {
        return Some(encode_alert(alert));
    }
    let push = request.push();
    if push.title.is_none() && push.body.is_none() {
        return None;
    }
    let dict = ApnsAlertDict {
        title: push.title.clone(),
        body: push.body.clone(),
        ..ApnsAlertDict::default()
    };
    Some(encode_alert(&ApnsAlert::Dict(dict)))
}

fn encode_alert(alert: &ApnsAlert) -> Value {
    match alert {
        ApnsAlert::Body(body) => Value::from(body.clone()),
        ApnsAlert::Dict(dict) => {
            let mut out = Map::new();
            put_opt(&mut out, "title", &dict.title);
            put_opt(&mut out, "subtitle", &dict.subtitle);
            put_opt(&mut out, "body", &dict.body);
            put_opt(&mut out, "launch-image", &dict.launch_image);
            put_opt(&mut out, "title-loc-key", &dict.title_loc_key);
            put_opt_list(&mut out, "title-loc-args", &dict.title_loc_args);
            put_opt(&mut out, "subtitle-loc-key", &dict.subtitle_loc_key);
            put_opt_list(&mut out, "subtitle-loc-args", &dict.subtitle_loc_args);
            put_opt(&mut out, "loc-key", &dict.loc_key);
            put_opt_list(&mut out, "loc-args", &dict.loc_args);
            Value::Object(out)
        }
    }
}

fn encode_sound(sound: &AppleSound) -> Value {
    match sound {
        AppleSound::Name(name) => Value::from(name.clone()),
        AppleSound::Dict(dict) => {
            let mut out = Map::new();
            if let Some(critical) = dict.critical {
                out.insert("critical".to_string(), Value::from(critical));
            }
            put_opt(&mut out, "name", &dict.name);
            if let Some(volume) = dict.volume {
                out.insert("volume".to_string(), Value::from(volume));
            }
            Value::Object(out)
        }
    }
}

fn build_headers(headers: Option<&ApnsHeaders>) -> Result<Vec<(String, String)>, CodecError> {
    let mut out = Vec::new();
    let Some(headers) = headers else {
        return Ok(out);
    };
    if let Some(apns_id) = &headers.apns_id {
        Uuid::parse_str(apns_id)
            .map_err(|_| CodecError::Invalid(format!("apns-id {apns_id:?} is not a UUID")))?;
        out.push(("apns-id".to_string(), apns_id.clone()));
    }
    if let Some(expiration) = headers.apns_expiration {
        require_non_negative("apns-expiration", expiration)?;
        out.push(("apns-expiration".to_string(), expiration.to_string()));
    }
    if let Some(priority) = headers.apns_priority {
        out.push(("apns-priority".to_string(), priority.to_string()));
    }
    if let Some(push_type) = headers.apns_push_type {
        out.push(("apns-push-type".to_string(), push_type.as_str().to_string()));
    }
    if let Some(collapse_id) = &headers.apns_collapse_id {
        out.push(("apns-collapse-id".to_string(), collapse_id.clone()));
    }
    Ok(out)
}

/// A background push must be silent: `content-available=1`,
/// `apns-priority=5`, and no alert, badge, or sound.
fn validate_background_shape(
    props: &ApplePushProps,
    alert: &Option<Value>,
) -> Result<(), CodecError> {
    let push_type = props.headers.as_ref().and_then(|headers| headers.apns_push_type);
    if push_type != Some(ApnsPushType::Background) {
        return Ok(());
    }
    if props.content_available != Some(true) {
        return Err(CodecError::Invalid(
            "background push requires content-available=1".to_string(),
        ));
    }
    let priority = props.headers.as_ref().and_then(|headers| headers.apns_priority);
    if priority != Some(5) {
        return Err(CodecError::Invalid(
            "background push requires apns-priority=5".to_string(),
        ));
    }
    if alert.is_some() || props.badge.is_some() || props.sound.is_some() {
        return Err(CodecError::Invalid(
            "background push must not carry alert, badge, or sound".to_string(),
        ));
    }
    Ok(())
}

fn require_non_negative(name: &str, value: i64) -> Result<(), CodecError> {
    if value < 0 {
        return Err(CodecError::Invalid(format!("{name} must be >= 0, got {value}")));
    }
    Ok(())
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
