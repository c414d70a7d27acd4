//! Credentials: APNs auth material, the FCM token exchange, and
//! authorization header parsing.

mod apns;
mod fcm;

pub use apns::ApnsAuth;
pub use fcm::{
    AssertionClaims, AssertionSigner, RsaSigner, TokenExchanger, FIREBASE_MESSAGING_SCOPE,
};

/// Split an `Authorization` header into `(scheme, parameters)`.
///
/// The two components are whitespace-separated and must both be
/// non-empty; anything else is unusable.
pub fn parse_authorization(header: &str) -> Option<(&str, &str)> {
    let trimmed = header.trim();
    let (scheme, params) = trimmed.split_once(char::is_whitespace)?;
    let params = params.trim_start();
    if scheme.is_empty() || params.is_empty() {
        return None;
    }
    Some((scheme, params))
}

/// Match a parsed scheme against a supported one, case-insensitively.
pub fn scheme_matches(scheme: &str, supported: &str) -> bool {
    scheme.eq_ignore_ascii_case(supported)
}
