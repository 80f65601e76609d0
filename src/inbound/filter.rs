//! Inbound file name filter

use wildmatch::WildMatch;

/// Comma-separated list of `*`/`?` patterns; a name passes when any matches
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    patterns: Vec<WildMatch>,
}

impl NameFilter {
    /// Parse `a*.txt, *.csv`; `None` or a blank list accepts everything
    pub fn new(patterns: Option<&str>) -> Self {
        let patterns = patterns
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(WildMatch::new)
            .collect();
        NameFilter { patterns }
    }

    /// Whether `name` passes the filter
    pub fn matches(&self, name: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.matches(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_accepts_all() {
        assert!(NameFilter::new(None).matches("anything"));
        assert!(NameFilter::new(Some(" , ")).matches("anything"));
    }

    #[test]
    fn test_patterns() {
        let filter = NameFilter::new(Some("*.csv, report-??.txt"));
        assert!(filter.matches("data.csv"));
        assert!(filter.matches("report-01.txt"));
        assert!(!filter.matches("report-001.txt"));
        assert!(!filter.matches("data.csv.part"));
    }
}
