//! Dotted version comparison.
//!
//! Versions are compared segment by segment. Numeric segments compare as
//! integers, missing trailing segments count as `0`, and a non-numeric
//! segment sorts after every numeric one (then lexicographically), which
//! keeps the ordering total. A leading `v` is ignored.

use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Segment<'a> {
    Numeric(u64),
    Text(&'a str),
}

const ZERO: Segment<'static> = Segment::Numeric(0);

fn segments(version: &str) -> Vec<Segment<'_>> {
    let trimmed = version.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed
        .split('.')
        .map(|s| match s.parse::<u64>() {
            Ok(n) => Segment::Numeric(n),
            Err(_) => Segment::Text(s),
        })
        .collect()
}

/// Compare two dotted version strings.
pub fn compare(a: &str, b: &str) -> Ordering {
    let a = segments(a);
    let b = segments(b);
    let len = a.len().max(b.len());
    for i in 0..len {
        let left = a.get(i).unwrap_or(&ZERO);
        let right = b.get(i).unwrap_or(&ZERO);
        match left.cmp(right) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// `true` iff `candidate` is strictly newer than `current`.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    compare(candidate, current) == Ordering::Greater
}

/// Sort versions most recent first; equal versions fall back to string order
/// so the result is deterministic.
pub fn sort_descending<S: AsRef<str>>(versions: &mut [S]) {
    versions.sort_by(|a, b| {
        compare(b.as_ref(), a.as_ref()).then_with(|| b.as_ref().cmp(a.as_ref()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1.2.0", "1.2", Ordering::Equal)]
    #[case("2.0.0", "1.9.9", Ordering::Greater)]
    #[case("1.10", "1.9", Ordering::Greater)]
    #[case("v1.0.1", "1.0.1", Ordering::Equal)]
    #[case("1.0", "1.0.1", Ordering::Less)]
    #[case("", "0.0", Ordering::Equal)]
    #[case("8.0.beta", "8.0.1", Ordering::Greater)]
    #[case("latest", "99", Ordering::Greater)]
    fn compare_cases(#[case] a: &str, #[case] b: &str, #[case] expected: Ordering) {
        assert_eq!(compare(a, b), expected, "compare({a:?}, {b:?})");
    }

    fn triples() -> Vec<String> {
        let mut out = Vec::new();
        for major in 0..3 {
            for minor in [0, 1, 10] {
                for patch in [0, 2] {
                    out.push(format!("{major}.{minor}.{patch}"));
                }
                out.push(format!("{major}.{minor}"));
            }
        }
        out
    }

    #[test]
    fn antisymmetric_over_generated_triples() {
        let all = triples();
        for a in &all {
            for b in &all {
                assert_eq!(compare(a, b), compare(b, a).reverse(), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn transitive_over_generated_triples() {
        let all = triples();
        for a in &all {
            for b in &all {
                for c in &all {
                    if compare(a, b) != Ordering::Greater && compare(b, c) != Ordering::Greater {
                        assert_ne!(compare(a, c), Ordering::Greater, "{a} <= {b} <= {c}");
                    }
                }
            }
        }
    }

    #[test]
    fn is_newer_is_strict() {
        assert!(is_newer("1.0.1", "1.0.0"));
        assert!(!is_newer("1.0", "1.0.0"));
        assert!(!is_newer("0.9", "1.0"));
    }

    #[test]
    fn sort_descending_puts_latest_first() {
        let mut versions = vec!["1.2", "10.0", "1.10.1", "1.2.0", "2.0"];
        sort_descending(&mut versions);
        assert_eq!(versions, vec!["10.0", "2.0", "1.10.1", "1.2.0", "1.2"]);
    }
}
