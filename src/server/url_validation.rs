use crate::error::RelayError;
use url::{Host, Url};

/// Path prefix every refreshable upstream feed URL must live under
const FEED_PREFIX: &str = "/feeds/";

/// Validate a caller-supplied URL for a forced upstream refresh.
///
/// Only feed URLs on the configured upstream are accepted, so the refresh
/// endpoint cannot be used to make the relay fetch arbitrary hosts.
///
/// # Errors
/// Returns [`RelayError::InvalidUrl`] for:
/// - Invalid or relative URLs
/// - Non-HTTP(S) schemes
/// - A host or port different from the upstream's
/// - A path outside `/feeds/`
pub fn validate_refresh_url(url: &str, upstream_base: &str) -> Result<Url, RelayError> {
    let parsed = Url::parse(url).map_err(|_| RelayError::InvalidUrl(format!("Invalid URL: {url}")))?;
    let upstream = Url::parse(upstream_base)
        .map_err(|_| RelayError::Internal(format!("Upstream URL is invalid: {upstream_base}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(RelayError::InvalidUrl(format!(
                "Scheme '{scheme}' not allowed, only http/https"
            )));
        }
    }

    let host = parsed
        .host()
        .ok_or_else(|| RelayError::InvalidUrl(format!("No host in URL: {url}")))?;
    if !same_host(&host, upstream.host().as_ref())
        || parsed.port_or_known_default() != upstream.port_or_known_default()
    {
        return Err(RelayError::InvalidUrl(format!(
            "Host '{host}' is not the configured upstream"
        )));
    }

    if !parsed.path().starts_with(FEED_PREFIX) {
        return Err(RelayError::InvalidUrl(format!(
            "Path '{}' is not an upstream feed",
            parsed.path()
        )));
    }

    Ok(parsed)
}

fn same_host(host: &Host<&str>, upstream: Option<&Host<&str>>) -> bool {
    match (host, upstream) {
        (Host::Domain(a), Some(Host::Domain(b))) => a.eq_ignore_ascii_case(b),
        (a, Some(b)) => a == b,
        (_, None) => false,
    }
}
