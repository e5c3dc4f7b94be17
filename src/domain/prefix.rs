//! Lexicographic bounds for prefix search.
//!
//! Every string that starts with `prefix` sorts inside
//! `[prefix, successor(prefix))`, where the successor is the prefix with its
//! last character incremented by one Unicode scalar value. Characters already
//! at `char::MAX` are dropped and the increment carries into the character
//! before them. When nothing is left to increment the range is unbounded
//! above.
//!
//! Bounds are computed over Unicode scalar values. UTF-8 preserves scalar
//! order under bytewise comparison, so the bounds agree with Redis' bytewise
//! `ZRANGEBYLEX` and with `String`'s `Ord`.

/// Half-open range covering every string that starts with a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixBounds {
    /// Inclusive lower bound; equal to the prefix.
    pub lower: String,
    /// Exclusive upper bound; `None` means no upper bound.
    pub upper: Option<String>,
}

impl PrefixBounds {
    /// Computes the bounds for `prefix`.
    #[must_use]
    pub fn for_prefix(prefix: &str) -> Self {
        Self {
            lower: prefix.to_string(),
            upper: successor(prefix),
        }
    }

    /// Returns true if `candidate` lies inside the bounds.
    #[must_use]
    pub fn contains(&self, candidate: &str) -> bool {
        candidate >= self.lower.as_str()
            && self
                .upper
                .as_deref()
                .is_none_or(|upper| candidate < upper)
    }
}

/// Returns the next Unicode scalar value, skipping the surrogate gap.
const fn next_scalar(character: char) -> Option<char> {
    match character {
        char::MAX => None,
        '\u{D7FF}' => Some('\u{E000}'),
        _ => char::from_u32(character as u32 + 1),
    }
}

/// Computes the smallest string greater than every string starting with
/// `prefix`, or `None` if no such string exists.
fn successor(prefix: &str) -> Option<String> {
    let mut characters: Vec<char> = prefix.chars().collect();
    while let Some(last) = characters.pop() {
        if let Some(next) = next_scalar(last) {
            characters.push(next);
            return Some(characters.into_iter().collect());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("al", Some("am"))]
    #[case("a", Some("b"))]
    #[case("alice@demo.co", Some("alice@demo.cp"))]
    #[case("z", Some("{"))]
    #[case("", None)]
    #[case("\u{10FFFF}", None)]
    #[case("\u{10FFFF}\u{10FFFF}", None)]
    #[case("a\u{10FFFF}", Some("b"))]
    #[case("\u{D7FF}", Some("\u{E000}"))]
    #[case("é", Some("ê"))]
    fn test_upper_bound(#[case] prefix: &str, #[case] expected: Option<&str>) {
        let bounds = PrefixBounds::for_prefix(prefix);
        assert_eq!(bounds.lower, prefix);
        assert_eq!(bounds.upper.as_deref(), expected);
    }

    #[rstest]
    fn test_contains() {
        let bounds = PrefixBounds::for_prefix("al");
        assert!(bounds.contains("al"));
        assert!(bounds.contains("alan@demo.com"));
        assert!(bounds.contains("alice@demo.com"));
        assert!(!bounds.contains("am"));
        assert!(!bounds.contains("ak"));
        assert!(!bounds.contains("bob@demo.com"));
    }

    #[rstest]
    fn test_empty_prefix_contains_everything() {
        let bounds = PrefixBounds::for_prefix("");
        assert!(bounds.contains(""));
        assert!(bounds.contains("\u{10FFFF}"));
    }

    proptest! {
        #[test]
        fn prop_contains_matches_starts_with(prefix in "\\PC{0,4}", candidate in "\\PC{0,8}") {
            let bounds = PrefixBounds::for_prefix(&prefix);
            prop_assert_eq!(bounds.contains(&candidate), candidate.starts_with(&prefix));
        }

        #[test]
        fn prop_extensions_fall_inside(prefix in "\\PC{0,4}", suffix in "\\PC{0,4}") {
            let bounds = PrefixBounds::for_prefix(&prefix);
            let candidate = format!("{prefix}{suffix}");
            prop_assert!(bounds.contains(&candidate));
        }
    }
}
