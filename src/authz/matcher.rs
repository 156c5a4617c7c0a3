use super::PermissionSet;

const WILDCARD_SUFFIX: &str = ".*";

/// Test a requested permission against a granted set.
///
/// A request ending in `.*` matches any granted name that starts with the
/// prefix followed by a dot, so `"categories.*"` matches `"categories.view"`
/// but neither `"categories"` nor `"categoriesx.view"`. Anything else is an
/// exact, case-sensitive membership test.
pub fn matches(requested: &str, granted: &PermissionSet) -> bool {
    match requested.strip_suffix(WILDCARD_SUFFIX) {
        Some(prefix) => granted.iter().any(|name| is_under(name, prefix)),
        None => granted.contains(requested),
    }
}

fn is_under(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('.'))
}
