use url::Url;

/// Best-effort access to the embedding parent's location.
///
/// Reading a cross-origin parent is denied by the browser; implementations
/// report that as `None` rather than as an error so the classifier can fall
/// back to its static allow-list.
pub trait ParentLocation: Send + Sync {
    fn try_get_parent_origin(&self) -> Option<Url>;
}

impl ParentLocation for Option<Url> {
    fn try_get_parent_origin(&self) -> Option<Url> {
        self.clone()
    }
}
