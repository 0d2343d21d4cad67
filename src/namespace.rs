//! Namespace codec: the sole mechanism for disambiguating tools and
//! prompts contributed by different providers.
//!
//! Wire form is `<namespace>_<name>`. The split is left-biased: only the
//! first `_` is significant, so inner names may themselves contain `_`.

/// Join a namespace and an inner name into wire form.
#[must_use]
pub fn join(namespace: &str, name: &str) -> String {
    format!("{namespace}_{name}")
}

/// Split a wire-form identifier into `(namespace, name)`.
///
/// Fails if `full` contains no `_`, or if the namespace prefix before the
/// first `_` is empty.
pub fn split(full: &str) -> Option<(&str, &str)> {
    let idx = full.find('_')?;
    let (namespace, rest) = full.split_at(idx);
    if namespace.is_empty() {
        return None;
    }
    // rest still has the leading '_'
    Some((namespace, &rest[1..]))
}

/// Whether `full` carries a namespace prefix at all, i.e. contains `_`.
#[must_use]
pub fn is_namespaced(full: &str) -> bool {
    full.contains('_')
}
