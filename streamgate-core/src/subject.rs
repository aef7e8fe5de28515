//! Dot-separated subjects and the wildcard patterns that select them.
//!
//! `*` matches exactly one token, `>` matches one or more trailing tokens and is only
//! allowed as the last token of a pattern.

const SINGLE_WILDCARD: &str = "*";
const TAIL_WILDCARD: &str = ">";

/// A subject a message can be published on: well-formed and free of wildcards.
pub fn is_valid_subject(subject: &str) -> bool {
    is_valid_filter(subject)
        && subject
            .split('.')
            .all(|token| token != SINGLE_WILDCARD && token != TAIL_WILDCARD)
}

/// A pattern usable as a subject filter.
pub fn is_valid_filter(pattern: &str) -> bool {
    if pattern.is_empty() || pattern.chars().any(char::is_whitespace) {
        return false;
    }

    let tokens: Vec<&str> = pattern.split('.').collect();
    let last = tokens.len() - 1;

    tokens.iter().enumerate().all(|(idx, token)| {
        !token.is_empty() && (*token != TAIL_WILDCARD || idx == last)
    })
}

/// Whether `subject` is selected by `pattern`. An exact pattern matches only itself.
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(TAIL_WILDCARD), Some(_)) => return true,
            (Some(SINGLE_WILDCARD), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Whether some subject exists that both patterns select.
pub fn overlaps(left: &str, right: &str) -> bool {
    let mut left_tokens = left.split('.');
    let mut right_tokens = right.split('.');

    loop {
        match (left_tokens.next(), right_tokens.next()) {
            (Some(TAIL_WILDCARD), Some(_)) | (Some(_), Some(TAIL_WILDCARD)) => return true,
            (Some(l), Some(r)) if l == r || l == SINGLE_WILDCARD || r == SINGLE_WILDCARD => {
                continue
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_pattern_matches_only_itself() {
        assert!(matches("orders.created", "orders.created"));
        assert!(!matches("orders.created", "orders.created.eu"));
        assert!(!matches("orders.created", "orders"));
    }

    #[test]
    fn single_wildcard_matches_one_token() {
        assert!(matches("L.*", "L.a"));
        assert!(matches("orders.*.eu", "orders.created.eu"));
        assert!(!matches("L.*", "L.a.b"));
        assert!(!matches("L.*", "L"));
    }

    #[test]
    fn tail_wildcard_matches_one_or_more_tokens() {
        assert!(matches("L.>", "L.a"));
        assert!(matches("L.>", "L.a.b.c"));
        assert!(!matches("L.>", "L"));
        assert!(matches(">", "anything.at.all"));
    }

    #[test]
    fn filter_validation() {
        assert!(is_valid_filter("L.*"));
        assert!(is_valid_filter("L.>"));
        assert!(is_valid_filter("orders.created"));
        assert!(!is_valid_filter(""));
        assert!(!is_valid_filter("L..a"));
        assert!(!is_valid_filter("L.>.a"));
        assert!(!is_valid_filter("L. a"));
        assert!(!is_valid_filter(".L"));
    }

    #[test]
    fn overlapping_patterns() {
        assert!(overlaps("L.>", "L.a"));
        assert!(overlaps("L.*", "*.a"));
        assert!(overlaps("orders.created", "orders.created"));
        assert!(!overlaps("L.>", "M.>"));
        assert!(!overlaps("L.>", "L"));
        assert!(!overlaps("L.*", "L.a.b"));
    }

    #[test]
    fn publish_subjects_reject_wildcards() {
        assert!(is_valid_subject("L.a"));
        assert!(!is_valid_subject("L.*"));
        assert!(!is_valid_subject("L.>"));
        assert!(!is_valid_subject("L."));
    }
}
