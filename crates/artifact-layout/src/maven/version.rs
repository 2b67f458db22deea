//! Maven version ordering
//!
//! Versions are split into numeric and qualifier items on `.`, `-` and
//! digit/letter transitions. Numeric items compare numerically; qualifiers
//! rank `alpha < beta < milestone < rc < snapshot < (release) < sp`, and
//! unknown qualifiers sort after known ones, lexically.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;

/// `1.0-20240101.120000-3`: base version, timestamp, build number.
pub(crate) static TIMESTAMPED_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+)-(\d{8}\.\d{6})-(\d+)$").expect("Invalid timestamped version regex")
});

pub(crate) const SNAPSHOT_SUFFIX: &str = "-SNAPSHOT";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    Number(u64),
    Qualifier(String),
}

fn qualifier_rank(qualifier: &str) -> (u8, &str) {
    match qualifier {
        "alpha" | "a" => (0, ""),
        "beta" | "b" => (1, ""),
        "milestone" | "m" => (2, ""),
        "rc" | "cr" => (3, ""),
        "snapshot" => (4, ""),
        "" | "ga" | "final" | "release" => (5, ""),
        "sp" => (6, ""),
        other => (7, other),
    }
}

fn items(version: &str) -> Vec<Item> {
    let mut out = Vec::new();
    for token in version.split(['.', '-']) {
        let mut current = String::new();
        let mut numeric = None;
        for c in token.chars() {
            let is_digit = c.is_ascii_digit();
            if numeric.is_some_and(|n| n != is_digit) {
                out.push(to_item(&current));
                current.clear();
            }
            numeric = Some(is_digit);
            current.push(c.to_ascii_lowercase());
        }
        if !current.is_empty() {
            out.push(to_item(&current));
        }
    }
    // trailing zeros and release markers carry no ordering weight
    while matches!(out.last(), Some(Item::Number(0)))
        || matches!(out.last(), Some(Item::Qualifier(q)) if qualifier_rank(q).0 == 5)
    {
        out.pop();
    }
    out
}

fn to_item(token: &str) -> Item {
    match token.parse::<u64>() {
        Ok(n) => Item::Number(n),
        Err(_) => Item::Qualifier(token.to_string()),
    }
}

fn compare_items(a: Option<&Item>, b: Option<&Item>) -> Ordering {
    match (a, b) {
        (Some(Item::Number(x)), Some(Item::Number(y))) => x.cmp(y),
        (Some(Item::Number(_)), Some(Item::Qualifier(_))) => Ordering::Greater,
        (Some(Item::Qualifier(_)), Some(Item::Number(_))) => Ordering::Less,
        (Some(Item::Qualifier(x)), Some(Item::Qualifier(y))) => {
            qualifier_rank(x).cmp(&qualifier_rank(y))
        }
        (Some(Item::Number(x)), None) => x.cmp(&0),
        (None, Some(Item::Number(y))) => 0.cmp(y),
        (Some(Item::Qualifier(x)), None) => qualifier_rank(x).cmp(&qualifier_rank("")),
        (None, Some(Item::Qualifier(y))) => qualifier_rank("").cmp(&qualifier_rank(y)),
        (None, None) => Ordering::Equal,
    }
}

/// Compare two Maven version strings.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (left, right) = (items(a), items(b));
    let len = left.len().max(right.len());
    (0..len)
        .map(|i| compare_items(left.get(i), right.get(i)))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Base version of a possibly timestamped snapshot version.
///
/// `1.0-20240101.120000-3` becomes `1.0-SNAPSHOT`; anything else is
/// returned unchanged.
pub fn base_version(version: &str) -> String {
    match TIMESTAMPED_VERSION.captures(version) {
        Some(caps) => format!("{}{}", &caps[1], SNAPSHOT_SUFFIX),
        None => version.to_string(),
    }
}

/// Timestamp and build number of a timestamped snapshot version.
pub fn snapshot_build(version: &str) -> Option<(String, u32)> {
    let caps = TIMESTAMPED_VERSION.captures(version)?;
    let build = caps[3].parse().ok()?;
    Some((caps[2].to_string(), build))
}

pub fn is_snapshot_version(version: &str) -> bool {
    version.ends_with(SNAPSHOT_SUFFIX) || TIMESTAMPED_VERSION.is_match(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1.0", "1.1", Ordering::Less)]
    #[case("1.10", "1.9", Ordering::Greater)]
    #[case("1.0", "1.0.0", Ordering::Equal)]
    #[case("1.0-SNAPSHOT", "1.0", Ordering::Less)]
    #[case("1.0-alpha-1", "1.0-beta", Ordering::Less)]
    #[case("1.0-rc1", "1.0", Ordering::Less)]
    #[case("1.0", "1.0-sp1", Ordering::Less)]
    #[case("1.0.1", "1.0-rc1", Ordering::Greater)]
    #[case("2.0", "10.0", Ordering::Less)]
    fn test_ordering(#[case] a: &str, #[case] b: &str, #[case] expected: Ordering) {
        assert_eq!(compare_versions(a, b), expected, "{} vs {}", a, b);
    }

    #[test]
    fn test_base_version() {
        assert_eq!(base_version("1.0-20240101.120000-3"), "1.0-SNAPSHOT");
        assert_eq!(base_version("1.0-SNAPSHOT"), "1.0-SNAPSHOT");
        assert_eq!(base_version("1.0"), "1.0");
        assert_eq!(
            snapshot_build("2.1-20231224.235959-12"),
            Some(("20231224.235959".to_string(), 12))
        );
        assert!(is_snapshot_version("1.0-20240101.120000-3"));
        assert!(!is_snapshot_version("1.0"));
    }
}
