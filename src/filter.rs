//! Line-level output filtering. A line matching any configured pattern is
//! suppressed before storage and broadcast. Stateless and shared.

use regex::RegexSet;

#[derive(Debug)]
pub struct LogFilter {
    patterns: RegexSet,
}

impl LogFilter {
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            patterns: RegexSet::new(patterns)?,
        })
    }

    /// A filter that suppresses nothing.
    pub fn empty() -> Self {
        Self {
            patterns: RegexSet::empty(),
        }
    }

    pub fn is_filtered(&self, line: &str) -> bool {
        self.patterns.is_match(line)
    }
}

impl Default for LogFilter {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_passes_everything() {
        let filter = LogFilter::empty();
        assert!(!filter.is_filtered("anything at all"));
        assert!(!filter.is_filtered(""));
    }

    #[test]
    fn test_any_matching_rule_suppresses() {
        let filter = LogFilter::new(["^Refreshing state", "\\[reset\\]"]).unwrap();
        assert!(filter.is_filtered("Refreshing state... [id=abc]"));
        assert!(filter.is_filtered("spinner [reset] frame"));
        assert!(!filter.is_filtered("Plan: 2 to add, 0 to change"));
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        assert!(LogFilter::new(["unclosed ["]).is_err());
    }
}
