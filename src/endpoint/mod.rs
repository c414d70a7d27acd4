//! Endpoint pooling: address resolution, the endpoint group with
//! outlier detection, and selection strategies.

mod group;
mod resolver;

pub use group::{
    EndpointContext, EndpointGroup, EndpointGroupOptions, SelectedEndpoint, SelectionStrategy,
};
pub use resolver::{AddressResolver, DnsResolver, ResolveError, StaticResolver};

use serde::{Deserialize, Serialize};

/// A resolved delivery target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Relative weight for weighted selection strategies.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, weight: 1 }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    /// `host:port`, with IPv6 hosts bracketed.
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.authority())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_formats_hosts() {
        assert_eq!(Endpoint::new("example.com", 443).authority(), "example.com:443");
        assert_eq!(Endpoint::new("10.0.0.1", 8080).authority(), "10.0.0.1:8080");
        assert_eq!(Endpoint::new("::1", 443).authority(), "[::1]:443");
    }

    #[test]
    fn weight_is_floored_at_one() {
        assert_eq!(Endpoint::new("a", 1).with_weight(0).weight, 1);
        assert_eq!(Endpoint::new("a", 1).with_weight(5).weight, 5);
    }
}
