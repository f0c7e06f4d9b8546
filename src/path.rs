// src/path.rs
// Path resolution for the flattened module namespace.
//
// A module's effective namespace is the ordered list of namespaced segment
// names between the root and the module itself. Canonical keys join those
// segments with `/` and append the local handler name, so a handler `total`
// in namespace `["shop", "cart"]` is addressed as `shop/cart/total`.

/// Join a namespace and a local name into a canonical global key.
///
/// An empty namespace yields the bare local name, which is how root-level
/// handlers are addressed.
pub fn resolve_key<S: AsRef<str>>(namespace: &[S], local_name: &str) -> String {
    let mut key = String::new();
    for segment in namespace {
        let segment = segment.as_ref();
        if segment.is_empty() {
            continue;
        }
        key.push_str(segment);
        key.push('/');
    }
    key.push_str(local_name);
    key
}

/// Split a canonical key on its first `/` into `(head, rest)`.
///
/// Returns `None` for keys without a separator (root-level keys).
pub fn split_first_segment(key: &str) -> Option<(&str, &str)> {
    key.split_once('/')
}

/// Parse a user-supplied module path (`"a/b/c"`) into its segments.
/// Empty input produces an empty path, which addresses the root module.
pub(crate) fn parse_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Render a segment path for error messages and logs.
pub(crate) fn display_path(path: &[String]) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.join("/")
    }
}
