//! Boyer–Moore–Horspool scanning over UTF-16 code units.
//!
//! A [`Run`] is a fixed-width sequence of matching primitives: literal code
//! units, single-character wildcards and character classes. Adjacent
//! non-`%` chunks of a LIKE pattern fold into one run; a [`ChunkScanner`]
//! matches a whole pattern as runs separated by unbounded wildcards.

use crate::pattern::fulltext::WordBreaker;

const SKIP_TABLE_SIZE: usize = 1 << 16;

/// Lower-case a single UTF-16 code unit when the mapping stays in one unit.
pub fn fold_unit(unit: u16) -> u16 {
    map_unit(unit, |c| c.to_lowercase().collect())
}

pub fn upper_unit(unit: u16) -> u16 {
    map_unit(unit, |c| c.to_uppercase().collect())
}

fn map_unit(unit: u16, f: impl Fn(char) -> Vec<char>) -> u16 {
    let Some(c) = char::from_u32(unit as u32) else {
        return unit;
    };
    match f(c).as_slice() {
        [mapped] if (*mapped as u32) <= 0xFFFF => *mapped as u16,
        _ => unit,
    }
}

/// Encode text as UTF-16, folding case unless `case_sensitive`.
pub fn to_units(text: &str, case_sensitive: bool) -> Vec<u16> {
    let units = text.encode_utf16();
    if case_sensitive {
        units.collect()
    } else {
        units.map(fold_unit).collect()
    }
}

/// Inclusive code-point ranges of a `[...]` class.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CharSet {
    ranges: Vec<(char, char)>,
}

impl CharSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, c: char) {
        self.ranges.push((c, c));
    }

    pub fn push_range(&mut self, low: char, high: char) {
        self.ranges.push((low, high));
    }

    pub fn ranges(&self) -> &[(char, char)] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    fn contains_code(&self, code: u32) -> bool {
        self.ranges
            .iter()
            .any(|(lo, hi)| (*lo as u32) <= code && code <= (*hi as u32))
    }

    /// Membership test for one code unit; without case sensitivity both case
    /// variants of the unit are tried.
    pub fn contains(&self, unit: u16, case_sensitive: bool) -> bool {
        if self.contains_code(unit as u32) {
            return true;
        }
        !case_sensitive
            && (self.contains_code(fold_unit(unit) as u32)
                || self.contains_code(upper_unit(unit) as u32))
    }
}

/// One position of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunItem {
    Unit(u16),
    Any,
    Include(CharSet),
    Exclude(CharSet),
}

impl RunItem {
    fn matches(&self, unit: u16, case_sensitive: bool) -> bool {
        match self {
            RunItem::Unit(u) => *u == unit,
            RunItem::Any => true,
            RunItem::Include(set) => set.contains(unit, case_sensitive),
            RunItem::Exclude(set) => !set.contains(unit, case_sensitive),
        }
    }
}

/// A fixed-width run with its Horspool skip table (one entry per code unit).
#[derive(Debug, Clone)]
pub struct Run {
    items: Vec<RunItem>,
    skip: Vec<u32>,
}

impl Run {
    pub fn new(items: Vec<RunItem>) -> Self {
        let m = items.len();
        let mut default_shift = m.max(1) as u32;
        for (j, item) in items.iter().enumerate().take(m.saturating_sub(1)) {
            if !matches!(item, RunItem::Unit(_)) {
                default_shift = default_shift.min((m - 1 - j) as u32);
            }
        }
        let mut skip = vec![default_shift; SKIP_TABLE_SIZE];
        for (j, item) in items.iter().enumerate().take(m.saturating_sub(1)) {
            if let RunItem::Unit(u) = item {
                let shift = (m - 1 - j) as u32;
                let slot = &mut skip[*u as usize];
                *slot = (*slot).min(shift);
            }
        }
        Self { items, skip }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[RunItem] {
        &self.items
    }

    pub fn matches_at(&self, text: &[u16], pos: usize, case_sensitive: bool) -> bool {
        if pos + self.items.len() > text.len() {
            return false;
        }
        self.items
            .iter()
            .zip(&text[pos..])
            .all(|(item, unit)| item.matches(*unit, case_sensitive))
    }

    /// Leftmost occurrence at or after `from`.
    pub fn find(&self, text: &[u16], from: usize, case_sensitive: bool) -> Option<usize> {
        let m = self.items.len();
        if m == 0 {
            return (from <= text.len()).then_some(from);
        }
        let mut i = from;
        while i + m <= text.len() {
            if self.matches_at(text, i, case_sensitive) {
                return Some(i);
            }
            i += self.skip[text[i + m - 1] as usize] as usize;
        }
        None
    }

    /// Leftmost occurrence that starts on a word boundary and, unless
    /// `prefix`, also ends on one.
    pub fn find_word(
        &self,
        text: &[u16],
        from: usize,
        case_sensitive: bool,
        prefix: bool,
        breaker: &dyn WordBreaker,
    ) -> Option<usize> {
        let mut start = from;
        while let Some(p) = self.find(text, start, case_sensitive) {
            let starts_word = breaker.is_boundary(text, p);
            let ends_word = prefix || breaker.is_boundary(text, p + self.len());
            if starts_word && ends_word {
                return Some(p);
            }
            start = p + 1;
        }
        None
    }
}

/// Matches a whole LIKE pattern: runs separated by unbounded wildcards, with
/// exact anchoring at either end unless a wildcard sits there.
#[derive(Debug, Clone)]
pub struct ChunkScanner {
    runs: Vec<Run>,
    leading_any: bool,
    trailing_any: bool,
    case_sensitive: bool,
}

impl ChunkScanner {
    pub fn new(runs: Vec<Run>, leading_any: bool, trailing_any: bool, case_sensitive: bool) -> Self {
        Self {
            runs,
            leading_any,
            trailing_any,
            case_sensitive,
        }
    }

    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    pub fn is_match(&self, text: &str) -> bool {
        let text = to_units(text, self.case_sensitive);
        self.is_match_units(&text)
    }

    pub fn is_match_units(&self, text: &[u16]) -> bool {
        if self.runs.is_empty() {
            return self.leading_any || text.is_empty();
        }
        let last = self.runs.len() - 1;
        let mut pos = 0;
        for (i, run) in self.runs.iter().enumerate() {
            let anchored_start = i == 0 && !self.leading_any;
            let anchored_end = i == last && !self.trailing_any;
            if anchored_start && anchored_end {
                return text.len() == run.len() && run.matches_at(text, 0, self.case_sensitive);
            }
            if anchored_start {
                if !run.matches_at(text, 0, self.case_sensitive) {
                    return false;
                }
                pos = run.len();
                continue;
            }
            if anchored_end {
                return text.len() >= pos + run.len()
                    && run.matches_at(text, text.len() - run.len(), self.case_sensitive);
            }
            match run.find(text, pos, self.case_sensitive) {
                Some(p) => pos = p + run.len(),
                None => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::fulltext::DefaultWordBreaker;

    fn literal_run(s: &str) -> Run {
        Run::new(s.encode_utf16().map(RunItem::Unit).collect())
    }

    #[test]
    fn test_skip_table() {
        let run = literal_run("abcab");
        assert_eq!(run.skip[b'a' as usize], 1);
        assert_eq!(run.skip[b'c' as usize], 2);
        // last unit does not contribute
        assert_eq!(run.skip[b'b' as usize], 3);
        assert_eq!(run.skip[b'z' as usize], 5);
    }

    #[test]
    fn test_skip_table_with_wildcard() {
        let run = Run::new(vec![
            RunItem::Unit(b'a' as u16),
            RunItem::Any,
            RunItem::Unit(b'c' as u16),
            RunItem::Unit(b'd' as u16),
        ]);
        assert_eq!(run.skip[b'z' as usize], 2);
        assert_eq!(run.skip[b'c' as usize], 1);
    }

    #[test]
    fn test_find() {
        let text: Vec<u16> = "here is a needle in a haystack".encode_utf16().collect();
        let run = literal_run("needle");
        assert_eq!(run.find(&text, 0, true), Some(10));
        assert_eq!(run.find(&text, 11, true), None);
        assert_eq!(literal_run("zzz").find(&text, 0, true), None);
        assert_eq!(literal_run("").find(&text, 3, true), Some(3));
    }

    #[test]
    fn test_find_case_insensitive() {
        let text = to_units("Hello World", false);
        let run = Run::new(to_units("WORLD", false).into_iter().map(RunItem::Unit).collect());
        assert_eq!(run.find(&text, 0, false), Some(6));
    }

    #[test]
    fn test_charset_case_folding() {
        let mut set = CharSet::new();
        set.push_range('A', 'C');
        assert!(set.contains(b'B' as u16, true));
        assert!(!set.contains(b'b' as u16, true));
        assert!(set.contains(b'b' as u16, false));
    }

    #[test]
    fn test_scanner_anchoring() {
        // 'ab%cd'
        let scanner = ChunkScanner::new(vec![literal_run("ab"), literal_run("cd")], false, false, true);
        assert!(scanner.is_match("abcd"));
        assert!(scanner.is_match("ab--cd"));
        assert!(!scanner.is_match("xabcd"));
        assert!(!scanner.is_match("abcdx"));
        assert!(!scanner.is_match("abc"));

        // '%'
        let scanner = ChunkScanner::new(vec![], true, true, true);
        assert!(scanner.is_match(""));
        assert!(scanner.is_match("anything"));

        // ''
        let scanner = ChunkScanner::new(vec![], false, false, true);
        assert!(scanner.is_match(""));
        assert!(!scanner.is_match("x"));
    }

    #[test]
    fn test_overlapping_anchors_do_not_double_count() {
        // 'aba%aba' must not match "aba"
        let scanner = ChunkScanner::new(vec![literal_run("aba"), literal_run("aba")], false, false, true);
        assert!(!scanner.is_match("aba"));
        assert!(scanner.is_match("abaaba"));
    }

    #[test]
    fn test_find_word() {
        let breaker = DefaultWordBreaker;
        let text = to_units("the cathedral cat sat", true);
        let run = literal_run("cat");
        assert_eq!(run.find_word(&text, 0, true, false, &breaker), Some(14));
        assert_eq!(run.find_word(&text, 0, true, true, &breaker), Some(4));
        assert_eq!(literal_run("at").find_word(&text, 0, true, true, &breaker), None);
    }
}
