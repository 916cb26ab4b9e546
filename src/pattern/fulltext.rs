//! Whole-word containment search for `CONTAINS` predicates.

use crate::expression::error::{ExpressionError, ExpressionResult};
use crate::pattern::scanner::{to_units, Run, RunItem};

/// Decides where words begin and end.
pub trait WordBreaker {
    fn is_word_unit(&self, unit: u16) -> bool;

    /// A boundary lies between a word unit and a non-word unit, or at either
    /// end of the text.
    fn is_boundary(&self, text: &[u16], pos: usize) -> bool {
        if pos == 0 || pos >= text.len() {
            return true;
        }
        self.is_word_unit(text[pos - 1]) != self.is_word_unit(text[pos])
    }
}

/// Letters and digits form words; everything else separates them.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultWordBreaker;

impl WordBreaker for DefaultWordBreaker {
    fn is_word_unit(&self, unit: u16) -> bool {
        char::from_u32(unit as u32).is_some_and(char::is_alphanumeric)
            || (0xD800..=0xDFFF).contains(&unit)
    }
}

/// A compiled `CONTAINS` search condition: a word or phrase, optionally a
/// prefix term (`"data*"`).
#[derive(Debug, Clone)]
pub struct FullTextQuery {
    terms: Vec<String>,
    prefix: bool,
    case_sensitive: bool,
    run: Run,
}

impl FullTextQuery {
    pub fn parse(condition: &str, case_sensitive: bool) -> ExpressionResult<Self> {
        let malformed = |reason: &str| ExpressionError::malformed_pattern(condition, reason);
        let trimmed = condition.trim();
        let inner = match trimmed.strip_prefix('"') {
            Some(rest) => rest
                .strip_suffix('"')
                .ok_or_else(|| malformed("unterminated phrase"))?,
            None => trimmed,
        };

        let mut terms: Vec<String> = inner.split_whitespace().map(str::to_string).collect();
        if terms.is_empty() {
            return Err(malformed("empty search condition"));
        }

        let mut prefix = false;
        let last = terms.len() - 1;
        for (i, term) in terms.iter_mut().enumerate() {
            if term.contains(['%', '_', '?', '[', ']']) {
                return Err(malformed("LIKE wildcards are not allowed in CONTAINS"));
            }
            let stars = term.matches('*').count();
            if stars > 1 || (stars == 1 && (i != last || !term.ends_with('*'))) {
                return Err(malformed("'*' is only allowed at the end of the last term"));
            }
            if stars == 1 {
                term.pop();
                prefix = true;
                if term.is_empty() {
                    return Err(malformed("prefix term has no characters"));
                }
            }
        }

        let phrase = terms.join(" ");
        let run = Run::new(
            to_units(&phrase, case_sensitive)
                .into_iter()
                .map(RunItem::Unit)
                .collect(),
        );
        Ok(Self {
            terms,
            prefix,
            case_sensitive,
            run,
        })
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn is_prefix(&self) -> bool {
        self.prefix
    }

    /// Whether `text` contains the phrase on word boundaries.
    pub fn matches(&self, text: &str, breaker: &dyn WordBreaker) -> bool {
        let units = to_units(text, self.case_sensitive);
        self.run
            .find_word(&units, 0, self.case_sensitive, self.prefix, breaker)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::error::ErrorKind;

    #[test]
    fn test_single_word() {
        let q = FullTextQuery::parse("cat", false).unwrap();
        let b = DefaultWordBreaker;
        assert!(q.matches("The Cat sat", &b));
        assert!(q.matches("cat", &b));
        assert!(!q.matches("concatenate", &b));
        assert!(!q.matches("cats", &b));
    }

    #[test]
    fn test_prefix_term() {
        let q = FullTextQuery::parse("\"data*\"", false).unwrap();
        let b = DefaultWordBreaker;
        assert!(q.is_prefix());
        assert!(q.matches("big databases", &b));
        assert!(!q.matches("metadata", &b));
    }

    #[test]
    fn test_phrase() {
        let q = FullTextQuery::parse("\"red car\"", true).unwrap();
        let b = DefaultWordBreaker;
        assert_eq!(q.terms(), &["red".to_string(), "car".to_string()]);
        assert!(q.matches("a red car, parked", &b));
        assert!(!q.matches("a red carpet", &b));
        assert!(!q.matches("a Red car", &b));
    }

    #[test]
    fn test_malformed_conditions() {
        for bad in ["", "\"open", "da*ta", "a* b", "%cat", "c_t", "*", "x**"] {
            let err = FullTextQuery::parse(bad, false).unwrap_err();
            assert!(
                matches!(err.kind, ErrorKind::MalformedPattern { .. }),
                "{} should be malformed",
                bad
            );
        }
    }
}
