//! ThreatDetector - 不審な入力のパターン検知
//!
//! 入力検証ではなく、ReputationTracker に不審イベントを渡すための粗い網です。
//! フィールドの検証はゲートに届く前に済んでいます。

use regex::RegexSet;

use crate::domain::RequestParams;

const PATTERNS: &[(&str, &str)] = &[
    ("sql_keyword", r"(?i)\b(UNION|SELECT|INSERT|DELETE|DROP)\b"),
    ("script_tag", r"(?is)<script[^>]*>.*?</script>"),
    ("javascript_url", r"(?i)javascript:"),
    ("event_handler", r"(?i)\bon\w+\s*="),
    ("path_traversal", r"\.\./.*\.\."),
    ("path_traversal", r"\.\.\\.*\.\."),
    ("shell_metacharacter", r"[;&|`$()]"),
    ("url_scheme", r"(?i)(file|https?)://"),
];

pub struct ThreatDetector {
    set: RegexSet,
    labels: Vec<&'static str>,
}

impl ThreatDetector {
    pub fn new() -> Result<Self, regex::Error> {
        Self::with_patterns(PATTERNS)
    }

    pub fn with_patterns(patterns: &[(&'static str, &str)]) -> Result<Self, regex::Error> {
        Ok(Self {
            set: RegexSet::new(patterns.iter().map(|(_, pattern)| *pattern))?,
            labels: patterns.iter().map(|(label, _)| *label).collect(),
        })
    }

    /// Labels of every pattern family matched by `input`, deduplicated.
    pub fn detect(&self, input: &str) -> Vec<&'static str> {
        let mut found: Vec<&'static str> = self
            .set
            .matches(input)
            .into_iter()
            .map(|i| self.labels[i])
            .collect();
        found.dedup();
        found
    }

    /// Scans every string value (and list element) of a submission.
    pub fn scan(&self, params: &RequestParams) -> Vec<&'static str> {
        let mut found: Vec<&'static str> = params
            .iter()
            .flat_map(|(_, value)| value.strings())
            .flat_map(|s| self.detect(s))
            .collect();
        found.sort_unstable();
        found.dedup();
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::sql("1; DROP TABLE links", "sql_keyword")]
    #[case::script("<script>alert(1)</script>", "script_tag")]
    #[case::js_url("javascript:alert(1)", "javascript_url")]
    #[case::handler("x\" onerror=alert(1)", "event_handler")]
    #[case::traversal("../../etc/passwd..", "path_traversal")]
    #[case::shell("2024 && rm -rf /", "shell_metacharacter")]
    #[case::url("file:///etc/passwd", "url_scheme")]
    fn detects_pattern_families(#[case] input: &str, #[case] label: &str) {
        let detector = ThreatDetector::new().unwrap();
        assert!(detector.detect(input).contains(&label), "{input} -> {label}");
    }

    #[rstest]
    #[case("2024")]
    #[case("temperature")]
    #[case("00:00")]
    #[case("-10.5")]
    #[case("reanalysis")]
    #[case("netcdf")]
    #[case("geopotential")]
    fn ordinary_values_are_clean(#[case] input: &str) {
        let detector = ThreatDetector::new().unwrap();
        assert!(detector.detect(input).is_empty(), "{input}");
    }

    #[test]
    fn scan_checks_list_elements() {
        let detector = ThreatDetector::new().unwrap();
        let params = RequestParams::new()
            .with("year", vec!["2024"])
            .with("variable", vec!["temperature", "<script>x</script>"]);
        assert_eq!(detector.scan(&params), vec!["script_tag"]);
    }
}
