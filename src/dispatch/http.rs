//! HTTP/2 client construction from profile options.

use crate::error::Error;
use crate::profile::ClientOptions;
use tracing::debug;

/// Build the client for one profile: HTTP/2 over rustls, the profile's
/// timeouts, and optionally an mTLS identity or disabled verification.
pub(crate) fn build_client(
    options: &ClientOptions,
    identity: Option<reqwest::Identity>,
) -> Result<reqwest::Client, Error> {
    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .connect_timeout(options.connect_timeout)
        .pool_idle_timeout(options.idle_timeout)
        .http2_adaptive_window(true);
    if let Some(max_age) = options.max_connection_age {
        // reqwest has no per-connection age cap; bounding idle reuse is
        // the closest the pool offers.
        builder = builder.pool_idle_timeout(options.idle_timeout.min(max_age));
    }
    if options.tls_no_verify {
        debug!("TLS verification disabled for this client");
        builder = builder.danger_accept_invalid_certs(true);
    }
    if let Some(identity) = identity {
        builder = builder.identity(identity);
    }
    builder.build().map_err(Error::ClientBuild)
}
