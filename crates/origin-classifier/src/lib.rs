//! # origin-classifier
//!
//! Routing policy for requests leaving a sandboxed mini-app. Every outgoing
//! request is either sent directly (first-party, same-machine or non-network
//! traffic) or tunneled through the host window's alt-transport.
//!
//! ## Usage
//!
//! ```rust
//! use origin_classifier::{ClassifierConfig, OriginClassifier, Verdict};
//! use url::Url;
//!
//! let own = Url::parse("https://app.example").unwrap();
//! let classifier = OriginClassifier::new(own, ClassifierConfig::default());
//!
//! let parent = Url::parse("https://host.example").unwrap();
//! let target = Url::parse("https://api.other.org/users/1").unwrap();
//! assert_eq!(classifier.classify(&target, Some(&parent)), Verdict::Proxy);
//! ```

mod classifier;
mod parent;
pub mod rewrite;

pub use classifier::{
    is_strict_subdomain, shared_significant_labels, BypassReason, ClassifierConfig,
    OriginClassifier, Verdict,
};
pub use parent::ParentLocation;
pub use rewrite::{rewrite_url, ServerEntry};
