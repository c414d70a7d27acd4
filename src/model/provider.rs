//! Push service providers.

use serde::{Deserialize, Serialize};

/// A push vendor, or `Generic` for content not yet bound to one.
///
/// `Generic` pushes are content-shaped but vendor-agnostic; they must be
/// bound to a concrete provider at dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provider {
    Apple,
    Firebase,
    Web,
    Generic,
}

impl Provider {
    /// Maximum serialized payload size, if this provider enforces one.
    pub fn max_payload_len(&self) -> Option<usize> {
        match self {
            Provider::Apple => Some(4096),
            Provider::Firebase => Some(4096),
            Provider::Web => Some(4000),
            Provider::Generic => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Provider::Apple => "APPLE",
            Provider::Firebase => "FIREBASE",
            Provider::Web => "WEB",
            Provider::Generic => "GENERIC",
        };
        f.write_str(name)
    }
}
