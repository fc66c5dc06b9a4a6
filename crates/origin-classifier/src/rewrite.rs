//! Static host-to-address rewriting for platform node aliases.
//!
//! Node aliases are dotless names (`node1`, `proxy-eu`) that are never
//! resolved through public DNS. A request addressed to an alias is rewritten
//! to the address recorded in the server table; everything else is left
//! untouched.

use serde::Deserialize;
use tracing::debug;
use url::Url;

/// One row of the static server table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerEntry {
    pub host: String,
    pub ip: String,
}

/// Rewrites the host of `url` using `servers`.
///
/// - Unparseable input is returned unmodified.
/// - Hosts containing a `.` are real domain names and are returned unmodified.
/// - A dotless host with a matching entry has its host replaced by the
///   entry's `ip`; the scheme, port, path and query are preserved.
/// - A dotless host without a mapping is returned unmodified.
pub fn rewrite_url(url: &str, servers: &[ServerEntry]) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };

    let Some(host) = parsed.host_str().map(str::to_owned) else {
        return url.to_string();
    };

    if host.contains('.') {
        return url.to_string();
    }

    let Some(entry) = servers
        .iter()
        .find(|entry| entry.host.eq_ignore_ascii_case(&host))
    else {
        debug!(%host, "no server mapping for alias; leaving url unchanged");
        return url.to_string();
    };

    if parsed.set_host(Some(&entry.ip)).is_err() {
        debug!(%host, ip = %entry.ip, "server mapping is not a valid host");
        return url.to_string();
    }

    debug!(from = %host, to = %entry.ip, "rewrote server alias");
    parsed.to_string()
}
