//! LIKE pattern compilation.
//!
//! A pattern compiles to an ordered list of [`Chunk`]s. Two engines run over
//! the chunks: a translated regular expression for general evaluation, and
//! the Boyer–Moore chunk scanner, which has exact anchor semantics and backs
//! the optimization-level analysis.

use crate::expression::error::{ExpressionError, ExpressionResult};
use crate::pattern::scanner::{to_units, CharSet, ChunkScanner, Run, RunItem};
use regex::Regex;

/// One atomic unit of a compiled pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    Literal(String),
    /// `%`
    AnyChars,
    /// `_`
    SingleChar,
    /// `[...]`
    Include(CharSet),
    /// `[^...]`
    Exclude(CharSet),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationLevel {
    /// Evaluate row by row
    None,
    /// Answerable by an index equality or range scan
    Full,
}

/// The index constraint a fully optimizable pattern stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixConstraint {
    /// No wildcard at all: `col = literal`
    Exact(String),
    /// `literal%`: `literal <= col < literal + max-char`
    Prefix(String),
}

#[derive(Debug, Clone)]
pub struct LikePattern {
    source: String,
    chunks: Vec<Chunk>,
    regex: Regex,
    scanner: ChunkScanner,
}

impl LikePattern {
    pub fn compile(pattern: &str, escape: Option<char>, case_sensitive: bool) -> ExpressionResult<Self> {
        let chunks = parse_chunks(pattern, escape)?;
        let regex_source = to_regex(&chunks, case_sensitive);
        let regex = Regex::new(&regex_source)
            .map_err(|e| ExpressionError::malformed_pattern(pattern, e.to_string()))?;
        let scanner = build_scanner(&chunks, case_sensitive);
        log::trace!("compiled LIKE '{}' as /{}/", pattern, regex_source);
        Ok(Self {
            source: pattern.to_string(),
            chunks,
            regex,
            scanner,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// General LIKE evaluation.
    pub fn is_match(&self, text: &str) -> bool {
        self.compare_with_regex(text)
    }

    pub fn compare_with_regex(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub fn compare_with_scanner(&self, text: &str) -> bool {
        self.scanner.is_match(text)
    }

    pub fn optimization_level(&self) -> OptimizationLevel {
        if self.prefix_constraint().is_some() {
            OptimizationLevel::Full
        } else {
            OptimizationLevel::None
        }
    }

    /// Only a single literal chunk, optionally followed by one trailing `%`,
    /// can become an index constraint.
    pub fn prefix_constraint(&self) -> Option<PrefixConstraint> {
        match self.chunks.as_slice() {
            [Chunk::Literal(s)] => Some(PrefixConstraint::Exact(s.clone())),
            [Chunk::Literal(s), Chunk::AnyChars] => Some(PrefixConstraint::Prefix(s.clone())),
            _ => None,
        }
    }
}

fn push_literal(chunks: &mut Vec<Chunk>, c: char) {
    if let Some(Chunk::Literal(s)) = chunks.last_mut() {
        s.push(c);
    } else {
        chunks.push(Chunk::Literal(c.to_string()));
    }
}

/// Split a pattern into chunks. `%` runs collapse into one `AnyChars`.
pub fn parse_chunks(pattern: &str, escape: Option<char>) -> ExpressionResult<Vec<Chunk>> {
    let malformed = |reason: &str| ExpressionError::malformed_pattern(pattern, reason);
    let mut chunks = Vec::new();
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        if Some(c) == escape {
            let target = chars
                .next()
                .ok_or_else(|| malformed("escape character at end of pattern"))?;
            push_literal(&mut chunks, target);
            continue;
        }
        match c {
            '%' => {
                if chunks.last() != Some(&Chunk::AnyChars) {
                    chunks.push(Chunk::AnyChars);
                }
            }
            '_' => chunks.push(Chunk::SingleChar),
            '[' => {
                let exclude = chars.peek() == Some(&'^');
                if exclude {
                    chars.next();
                }
                let mut members: Vec<char> = Vec::new();
                let mut closed = false;
                while let Some(m) = chars.next() {
                    if Some(m) == escape {
                        let target = chars
                            .next()
                            .ok_or_else(|| malformed("escape character at end of pattern"))?;
                        members.push(target);
                        continue;
                    }
                    if m == ']' && !members.is_empty() {
                        closed = true;
                        break;
                    }
                    members.push(m);
                }
                if !closed {
                    return Err(malformed("unterminated character class"));
                }
                let mut set = CharSet::new();
                let mut i = 0;
                while i < members.len() {
                    if i + 2 < members.len() && members[i + 1] == '-' {
                        let (low, high) = (members[i], members[i + 2]);
                        if low > high {
                            return Err(malformed(&format!("invalid range {}-{}", low, high)));
                        }
                        set.push_range(low, high);
                        i += 3;
                    } else {
                        set.push(members[i]);
                        i += 1;
                    }
                }
                chunks.push(if exclude {
                    Chunk::Exclude(set)
                } else {
                    Chunk::Include(set)
                });
            }
            other => push_literal(&mut chunks, other),
        }
    }
    Ok(chunks)
}

fn push_class_char(out: &mut String, c: char) {
    if matches!(c, '\\' | ']' | '[' | '^' | '-' | '&' | '~') {
        out.push('\\');
    }
    out.push(c);
}

fn class_to_regex(set: &CharSet, exclude: bool) -> String {
    let mut out = String::from("[");
    if exclude {
        out.push('^');
    }
    for (low, high) in set.ranges() {
        push_class_char(&mut out, *low);
        if low != high {
            out.push('-');
            push_class_char(&mut out, *high);
        }
    }
    out.push(']');
    out
}

/// Translate chunks into an anchored regular expression.
pub fn to_regex(chunks: &[Chunk], case_sensitive: bool) -> String {
    let mut out = String::from(if case_sensitive { "(?s)" } else { "(?si)" });
    let leading_any = chunks.first() == Some(&Chunk::AnyChars);
    let trailing_any = chunks.last() == Some(&Chunk::AnyChars);
    if !leading_any {
        out.push('^');
    }
    let body_end = chunks.len() - usize::from(trailing_any && !chunks.is_empty());
    let body_start = usize::from(leading_any).min(body_end);
    for chunk in &chunks[body_start..body_end] {
        match chunk {
            Chunk::Literal(s) => out.push_str(&regex::escape(s)),
            Chunk::AnyChars => out.push_str(".*"),
            Chunk::SingleChar => out.push('.'),
            Chunk::Include(set) => out.push_str(&class_to_regex(set, false)),
            Chunk::Exclude(set) => out.push_str(&class_to_regex(set, true)),
        }
    }
    if !trailing_any {
        out.push('$');
    }
    out
}

fn build_scanner(chunks: &[Chunk], case_sensitive: bool) -> ChunkScanner {
    let leading_any = chunks.first() == Some(&Chunk::AnyChars);
    let trailing_any = chunks.last() == Some(&Chunk::AnyChars);
    let mut runs = Vec::new();
    let mut items: Vec<RunItem> = Vec::new();
    for chunk in chunks {
        match chunk {
            Chunk::AnyChars => {
                if !items.is_empty() {
                    runs.push(Run::new(std::mem::take(&mut items)));
                }
            }
            Chunk::Literal(s) => {
                items.extend(to_units(s, case_sensitive).into_iter().map(RunItem::Unit))
            }
            Chunk::SingleChar => items.push(RunItem::Any),
            Chunk::Include(set) => items.push(RunItem::Include(set.clone())),
            Chunk::Exclude(set) => items.push(RunItem::Exclude(set.clone())),
        }
    }
    if !items.is_empty() {
        runs.push(Run::new(items));
    }
    ChunkScanner::new(runs, leading_any, trailing_any, case_sensitive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::error::ErrorKind;

    fn like(pattern: &str) -> LikePattern {
        LikePattern::compile(pattern, None, true).unwrap()
    }

    fn both(pattern: &LikePattern, text: &str) -> bool {
        let by_regex = pattern.compare_with_regex(text);
        assert_eq!(
            by_regex,
            pattern.compare_with_scanner(text),
            "engines disagree on '{}' LIKE '{}'",
            text,
            pattern.source()
        );
        by_regex
    }

    #[test]
    fn test_chunk_parsing() {
        let chunks = parse_chunks("ab%%_[a-c][^x]z", None).unwrap();
        assert_eq!(chunks.len(), 6);
        assert_eq!(chunks[0], Chunk::Literal("ab".into()));
        assert_eq!(chunks[1], Chunk::AnyChars);
        assert_eq!(chunks[2], Chunk::SingleChar);
        assert!(matches!(&chunks[3], Chunk::Include(set) if set.ranges() == [('a', 'c')]));
        assert!(matches!(&chunks[4], Chunk::Exclude(set) if set.ranges() == [('x', 'x')]));
        assert_eq!(chunks[5], Chunk::Literal("z".into()));
    }

    #[test]
    fn test_escape() {
        let chunks = parse_chunks("10!%%", Some('!')).unwrap();
        assert_eq!(
            chunks,
            vec![Chunk::Literal("10%".into()), Chunk::AnyChars]
        );
        let p = LikePattern::compile("10!%%", Some('!'), true).unwrap();
        assert!(both(&p, "10% off"));
        assert!(!both(&p, "100 off"));
    }

    #[test]
    fn test_malformed_patterns() {
        for (pattern, escape) in [("[abc", None), ("[z-a]", None), ("abc!", Some('!')), ("[]", None)] {
            let err = LikePattern::compile(pattern, escape, true).unwrap_err();
            assert!(
                matches!(err.kind, ErrorKind::MalformedPattern { .. }),
                "{} should be malformed",
                pattern
            );
        }
    }

    #[test]
    fn test_prefix_pattern() {
        let p = like("abc%");
        assert!(both(&p, "abc"));
        assert!(both(&p, "abcdef"));
        assert!(!both(&p, "xabc"));
        assert!(!both(&p, "ab"));
    }

    #[test]
    fn test_single_char_wildcard() {
        let p = like("a_c");
        assert!(both(&p, "abc"));
        assert!(!both(&p, "ac"));
        assert!(!both(&p, "abdc"));
    }

    #[test]
    fn test_character_class() {
        let p = like("[a-c]x");
        for ok in ["ax", "bx", "cx"] {
            assert!(both(&p, ok));
        }
        for bad in ["dx", "Ax", "xx", "ay"] {
            assert!(!both(&p, bad));
        }
        let p = like("[^a-c]x");
        assert!(both(&p, "dx"));
        assert!(!both(&p, "bx"));
    }

    #[test]
    fn test_class_with_literal_specials() {
        let p = like("[-^]%");
        assert!(both(&p, "-a"));
        assert!(both(&p, "^"));
        assert!(!both(&p, "a"));
    }

    #[test]
    fn test_case_insensitive() {
        let p = LikePattern::compile("SM[i]th%", None, false).unwrap();
        assert!(p.compare_with_regex("smith"));
        assert!(p.compare_with_scanner("smith"));
        assert!(p.compare_with_regex("SMITHERS"));
        assert!(p.compare_with_scanner("SMITHERS"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let p = like("a.b*c(d)%");
        assert!(both(&p, "a.b*c(d)e"));
        assert!(!both(&p, "axb*c(d)e"));
    }

    #[test]
    fn test_newlines_match_wildcards() {
        let p = like("a%b_");
        assert!(both(&p, "a\n\nb\n"));
    }

    #[test]
    fn test_optimization_level() {
        assert_eq!(like("smith%").optimization_level(), OptimizationLevel::Full);
        assert_eq!(like("smith").optimization_level(), OptimizationLevel::Full);
        assert_eq!(like("%smith").optimization_level(), OptimizationLevel::None);
        assert_eq!(like("sm%th").optimization_level(), OptimizationLevel::None);
        assert_eq!(like("sm_th%").optimization_level(), OptimizationLevel::None);
        assert_eq!(like("").optimization_level(), OptimizationLevel::None);

        assert_eq!(
            like("smith%").prefix_constraint(),
            Some(PrefixConstraint::Prefix("smith".into()))
        );
        assert_eq!(
            like("smith").prefix_constraint(),
            Some(PrefixConstraint::Exact("smith".into()))
        );
    }

    #[test]
    fn test_regex_translation() {
        let chunks = parse_chunks("%a_[b-d]%", None).unwrap();
        assert_eq!(to_regex(&chunks, true), "(?s)a.[b-d]");
        let chunks = parse_chunks("x%", None).unwrap();
        assert_eq!(to_regex(&chunks, false), "(?si)^x");
        assert_eq!(to_regex(&[], true), "(?s)^$");
        assert_eq!(to_regex(&[Chunk::AnyChars], true), "(?s)");
    }
}
