use std::collections::HashSet;

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::parent::ParentLocation;

/// Outcome of classifying a single outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Send the request directly; the tunnel is not engaged.
    Bypass(BypassReason),
    /// Tunnel the request through the host window.
    Proxy,
}

impl Verdict {
    pub fn is_bypass(&self) -> bool {
        matches!(self, Verdict::Bypass(_))
    }
}

/// The rule that decided a bypass, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    /// The target is not an absolute URL.
    Unparseable,
    SameOrigin,
    NonNetworkScheme,
    ParentSameOrigin,
    ParentSameHost,
    ParentOriginPrefix,
    SharedLabels,
    Subdomain,
    /// Parent unreadable and the host is on the platform allow-list.
    PlatformHost,
    WorkerBootstrap,
    DevServer,
    SkipList,
}

/// Tunable lists used by the classifier.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// Substrings that mark a host as first-party when the parent location
    /// cannot be read.
    #[serde(default = "default_platform_hosts")]
    pub platform_hosts: Vec<String>,
    /// Hosts (and their subdomains) that are never tunneled.
    #[serde(default = "default_skip_hosts")]
    pub skip_hosts: Vec<String>,
    /// Path fragments identifying worker bootstrap fetches.
    #[serde(default = "default_bootstrap_markers")]
    pub bootstrap_markers: Vec<String>,
    /// `localhost` ports above this value are treated as dev servers.
    #[serde(default = "default_dev_port_floor")]
    pub dev_port_floor: u16,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            platform_hosts: default_platform_hosts(),
            skip_hosts: default_skip_hosts(),
            bootstrap_markers: default_bootstrap_markers(),
            dev_port_floor: default_dev_port_floor(),
        }
    }
}

fn default_platform_hosts() -> Vec<String> {
    ["bastyon.com", "pocketnet.app", "localhost"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_skip_hosts() -> Vec<String> {
    ["localhost", "127.0.0.1", "[::1]", "bastyon.com", "pocketnet.app"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_bootstrap_markers() -> Vec<String> {
    vec!["service-worker".to_string(), "sw.js".to_string()]
}

fn default_dev_port_floor() -> u16 {
    1024
}

/// Decides whether requests made from the interceptor's own origin go out
/// directly or through the tunnel.
#[derive(Debug, Clone)]
pub struct OriginClassifier {
    own_origin: Url,
    config: ClassifierConfig,
}

impl OriginClassifier {
    pub fn new(own_origin: Url, config: ClassifierConfig) -> Self {
        Self { own_origin, config }
    }

    pub fn own_origin(&self) -> &Url {
        &self.own_origin
    }

    /// Returns `true` when `target` must NOT be tunneled.
    ///
    /// The parent location is read once per call; an unreadable parent
    /// degrades to the platform allow-list.
    pub fn should_bypass_proxy(&self, target: &str, parent: &dyn ParentLocation) -> bool {
        let parent = parent.try_get_parent_origin();
        self.classify_str(target, parent.as_ref()).is_bypass()
    }

    /// Classifies a raw URL string. Strings that do not parse as absolute
    /// URLs are bypassed so the native fetch reports the error.
    pub fn classify_str(&self, target: &str, parent: Option<&Url>) -> Verdict {
        match Url::parse(target) {
            Ok(url) => self.classify(&url, parent),
            Err(err) => {
                debug!(target, %err, "unparseable request url; bypassing");
                Verdict::Bypass(BypassReason::Unparseable)
            }
        }
    }

    /// Classifies a parsed URL. Rules are evaluated in order and the first
    /// match wins:
    ///
    /// 1. same origin as the interceptor
    /// 2. non-`http(s)` scheme
    /// 3. parent rules when the parent is known, the platform allow-list
    ///    when it is not
    /// 4. worker bootstrap paths
    /// 5. `localhost` dev-server ports
    /// 6. static skip list
    pub fn classify(&self, target: &Url, parent: Option<&Url>) -> Verdict {
        let verdict = self.evaluate(target, parent);
        debug!(url = %target, ?verdict, parent_known = parent.is_some(), "classified request");
        verdict
    }

    fn evaluate(&self, target: &Url, parent: Option<&Url>) -> Verdict {
        if target.origin() == self.own_origin.origin() {
            return Verdict::Bypass(BypassReason::SameOrigin);
        }

        if !matches!(target.scheme(), "http" | "https") {
            return Verdict::Bypass(BypassReason::NonNetworkScheme);
        }

        let host = target.host_str().unwrap_or_default();

        match parent {
            Some(parent) => {
                if let Some(reason) = match_parent(target, host, parent) {
                    return Verdict::Bypass(reason);
                }
            }
            None => {
                if self
                    .config
                    .platform_hosts
                    .iter()
                    .any(|platform| host.contains(platform.as_str()))
                {
                    return Verdict::Bypass(BypassReason::PlatformHost);
                }
            }
        }

        let path = target.path();
        if self
            .config
            .bootstrap_markers
            .iter()
            .any(|marker| path.contains(marker.as_str()))
        {
            return Verdict::Bypass(BypassReason::WorkerBootstrap);
        }

        if host == "localhost"
            && target
                .port()
                .is_some_and(|port| port > self.config.dev_port_floor)
        {
            return Verdict::Bypass(BypassReason::DevServer);
        }

        if self
            .config
            .skip_hosts
            .iter()
            .any(|skip| host == skip || is_strict_subdomain(host, skip))
        {
            return Verdict::Bypass(BypassReason::SkipList);
        }

        Verdict::Proxy
    }
}

/// Parent-relative rules. Returns the first matching reason.
fn match_parent(target: &Url, host: &str, parent: &Url) -> Option<BypassReason> {
    if target.origin() == parent.origin() {
        return Some(BypassReason::ParentSameOrigin);
    }

    let parent_host = parent.host_str().unwrap_or_default();
    if !parent_host.is_empty() && host == parent_host {
        return Some(BypassReason::ParentSameHost);
    }

    // Textual prefix on the serialized origin, so
    // "https://host.example.other.net" matches "https://host.example" too.
    let parent_origin = parent.origin().ascii_serialization();
    if parent_origin != "null" && target.as_str().starts_with(&parent_origin) {
        return Some(BypassReason::ParentOriginPrefix);
    }

    if shared_significant_labels(host, parent_host) >= 2 {
        return Some(BypassReason::SharedLabels);
    }

    if is_strict_subdomain(host, parent_host) || is_strict_subdomain(parent_host, host) {
        return Some(BypassReason::Subdomain);
    }

    None
}

/// Counts the distinct domain labels longer than two characters that appear
/// in both hostnames.
pub fn shared_significant_labels(a: &str, b: &str) -> usize {
    let significant = |host: &str| -> HashSet<String> {
        host.split('.')
            .filter(|label| label.len() > 2)
            .map(str::to_ascii_lowercase)
            .collect()
    };

    significant(a).intersection(&significant(b)).count()
}

/// Returns `true` if `child` is a proper subdomain of `parent`
/// (`a.b.com` of `b.com`, but not `b.com` of itself or `xb.com` of `b.com`).
pub fn is_strict_subdomain(child: &str, parent: &str) -> bool {
    if parent.is_empty() || child.len() <= parent.len() {
        return false;
    }

    child
        .strip_suffix(parent)
        .is_some_and(|prefix| prefix.ends_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> OriginClassifier {
        OriginClassifier::new(
            Url::parse("https://miniapp.example.net").unwrap(),
            ClassifierConfig::default(),
        )
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn verdict(target: &str, parent: Option<&str>) -> Verdict {
        let parent = parent.map(url);
        classifier().classify_str(target, parent.as_ref())
    }

    // -----------------------------------------------------------------------
    // own origin and scheme
    // -----------------------------------------------------------------------

    #[test]
    fn own_origin_is_always_bypassed() {
        for target in [
            "https://miniapp.example.net/",
            "https://miniapp.example.net/api/feed?page=2",
            "https://miniapp.example.net/assets/app.js",
        ] {
            assert_eq!(
                verdict(target, Some("https://unrelated.org")),
                Verdict::Bypass(BypassReason::SameOrigin)
            );
            assert_eq!(verdict(target, None), Verdict::Bypass(BypassReason::SameOrigin));
        }
    }

    #[test]
    fn different_port_is_not_own_origin() {
        assert_ne!(
            verdict("https://miniapp.example.net:8443/x", Some("https://other.org")),
            Verdict::Bypass(BypassReason::SameOrigin)
        );
    }

    #[test]
    fn non_network_schemes_are_bypassed() {
        for target in [
            "blob:https://remote.org/5f0e",
            "data:text/plain,hello",
            "file:///etc/hosts",
            "chrome-extension://abcdef/popup.html",
            "moz-extension://abcdef/popup.html",
            "safari-extension://abcdef/popup.html",
            "ws://remote.org/socket",
        ] {
            let v = verdict(target, Some("https://host.example"));
            assert!(v.is_bypass(), "{target} should bypass, got {v:?}");
        }
        assert_eq!(
            verdict("chrome-extension://abcdef/popup.html", None),
            Verdict::Bypass(BypassReason::NonNetworkScheme)
        );
    }

    #[test]
    fn unparseable_target_is_bypassed() {
        assert_eq!(
            verdict("/relative/path", None),
            Verdict::Bypass(BypassReason::Unparseable)
        );
    }

    // -----------------------------------------------------------------------
    // parent rules
    // -----------------------------------------------------------------------

    #[test]
    fn parent_same_origin() {
        assert_eq!(
            verdict("https://host.example/api/v1", Some("https://host.example/app")),
            Verdict::Bypass(BypassReason::ParentSameOrigin)
        );
    }

    #[test]
    fn parent_same_host_ignores_scheme_and_port() {
        assert_eq!(
            verdict("http://host.example:8080/rpc", Some("https://host.example")),
            Verdict::Bypass(BypassReason::ParentSameHost)
        );
    }

    #[test]
    fn parent_origin_prefix_is_textual() {
        assert_eq!(
            verdict(
                "https://host.example.cdn-mirror.net/video.m3u8",
                Some("https://host.example")
            ),
            Verdict::Bypass(BypassReason::ParentOriginPrefix)
        );
    }

    #[test]
    fn shared_labels_bypass() {
        assert_eq!(
            verdict(
                "https://media.bastion.network.org/clip",
                Some("https://app.bastion.network.io")
            ),
            Verdict::Bypass(BypassReason::SharedLabels)
        );
    }

    #[test]
    fn subdomain_of_parent_bypasses() {
        // Short labels keep the shared-label rule out of the way.
        assert_eq!(
            verdict("https://api.xy.io/x", Some("https://xy.io")),
            Verdict::Bypass(BypassReason::Subdomain)
        );
        // Longer labels are already caught by the shared-label rule.
        assert_eq!(
            verdict("https://sub.host.example/api", Some("https://host.example")),
            Verdict::Bypass(BypassReason::SharedLabels)
        );
    }

    #[test]
    fn parent_subdomain_of_target_bypasses() {
        assert_eq!(
            verdict("https://ab.io/api", Some("https://www.ab.io")),
            Verdict::Bypass(BypassReason::Subdomain)
        );
    }

    #[test]
    fn unrelated_domain_under_known_parent_is_proxied() {
        assert_eq!(
            verdict("https://api.example.com/users/1", Some("https://host.example")),
            Verdict::Proxy
        );
    }

    #[test]
    fn known_parent_skips_platform_allow_list() {
        // The allow-list only applies when the parent is unreadable; the skip
        // list (rule 7) still catches exact platform domains.
        assert_eq!(
            verdict("https://cdn.notbastyon.com.evil.org/x", Some("https://host.example")),
            Verdict::Proxy
        );
        assert_eq!(
            verdict("https://cdn.notbastyon.com.evil.org/x", None),
            Verdict::Bypass(BypassReason::PlatformHost)
        );
    }

    // -----------------------------------------------------------------------
    // parent unavailable
    // -----------------------------------------------------------------------

    #[test]
    fn unavailable_parent_falls_back_to_platform_hosts() {
        assert_eq!(
            verdict("https://node1.bastyon.com/rpc", None),
            Verdict::Bypass(BypassReason::PlatformHost)
        );
        assert_eq!(
            verdict("https://pocketnet.app/feed", None),
            Verdict::Bypass(BypassReason::PlatformHost)
        );
        assert_eq!(
            verdict("http://localhost/x", None),
            Verdict::Bypass(BypassReason::PlatformHost)
        );
        assert_eq!(verdict("https://api.example.com/users/1", None), Verdict::Proxy);
    }

    #[test]
    fn should_bypass_proxy_reads_parent_capability() {
        let c = classifier();
        let known: Option<Url> = Some(url("https://host.example"));
        let unknown: Option<Url> = None;

        assert!(c.should_bypass_proxy("https://sub.host.example/a", &known));
        assert!(!c.should_bypass_proxy("https://sub.host.example/a", &unknown));
        assert!(c.should_bypass_proxy("https://node.bastyon.com/a", &unknown));
    }

    // -----------------------------------------------------------------------
    // path, dev server, skip list
    // -----------------------------------------------------------------------

    #[test]
    fn worker_bootstrap_paths_are_bypassed() {
        for target in [
            "https://cdn.other.org/service-worker.js",
            "https://cdn.other.org/static/sw.js",
            "https://cdn.other.org/service-worker/register",
        ] {
            assert_eq!(
                verdict(target, Some("https://host.example")),
                Verdict::Bypass(BypassReason::WorkerBootstrap)
            );
        }
    }

    #[test]
    fn localhost_dev_ports_are_bypassed() {
        assert_eq!(
            verdict("http://localhost:5173/src/main.ts", Some("https://host.example")),
            Verdict::Bypass(BypassReason::DevServer)
        );
        // Privileged port falls through to the skip list instead.
        assert_eq!(
            verdict("http://localhost:80/x", Some("https://host.example")),
            Verdict::Bypass(BypassReason::SkipList)
        );
    }

    #[test]
    fn skip_list_matches_exact_and_subdomains() {
        let parent = Some("https://host.example");
        assert_eq!(
            verdict("http://127.0.0.1/x", parent),
            Verdict::Bypass(BypassReason::SkipList)
        );
        assert_eq!(
            verdict("http://[::1]:80/x", parent),
            Verdict::Bypass(BypassReason::SkipList)
        );
        assert_eq!(
            verdict("https://static.pocketnet.app/img.png", parent),
            Verdict::Bypass(BypassReason::SkipList)
        );
        assert_eq!(verdict("https://pocketnet.app.evil.org/", parent), Verdict::Proxy);
    }

    #[test]
    fn config_overrides_lists() {
        let config = ClassifierConfig {
            platform_hosts: vec!["trusted.dev".to_string()],
            skip_hosts: vec![],
            bootstrap_markers: vec!["bootstrap".to_string()],
            dev_port_floor: 9000,
        };
        let c = OriginClassifier::new(url("https://app.local.test"), config);

        assert!(c.classify(&url("https://a.trusted.dev/"), None).is_bypass());
        assert!(!c.classify(&url("https://pocketnet.app/"), None).is_bypass());
        assert!(!c.classify(&url("https://x.org/sw.js"), None).is_bypass());
        assert!(c.classify(&url("https://x.org/bootstrap"), None).is_bypass());
        assert!(!c.classify(&url("http://localhost:5173/"), Some(&url("https://h.io"))).is_bypass());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: ClassifierConfig = serde_json::from_str(r#"{"dev_port_floor": 3000}"#).unwrap();
        assert_eq!(config.dev_port_floor, 3000);
        assert_eq!(config.bootstrap_markers, vec!["service-worker", "sw.js"]);
        assert!(config.skip_hosts.contains(&"127.0.0.1".to_string()));
    }

    // -----------------------------------------------------------------------
    // heuristics
    // -----------------------------------------------------------------------

    #[test]
    fn significant_labels_ignore_short_labels() {
        assert_eq!(shared_significant_labels("api.example.com", "host.example"), 1);
        assert_eq!(shared_significant_labels("a.co.uk", "b.co.uk"), 0);
        assert_eq!(shared_significant_labels("cdn.social.net", "app.social.net"), 2);
        assert_eq!(shared_significant_labels("Media.Social.NET", "app.social.net"), 2);
        assert_eq!(shared_significant_labels("", "app.social.net"), 0);
    }

    #[test]
    fn strict_subdomain() {
        assert!(is_strict_subdomain("a.b.com", "b.com"));
        assert!(is_strict_subdomain("x.y.b.com", "b.com"));
        assert!(!is_strict_subdomain("b.com", "b.com"));
        assert!(!is_strict_subdomain("xb.com", "b.com"));
        assert!(!is_strict_subdomain("b.com", "a.b.com"));
        assert!(!is_strict_subdomain("a.b.com", ""));
    }
}
