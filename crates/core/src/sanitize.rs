// Redaction of potentially sensitive content in stage error messages

use crate::config::SanitizerConfig;
use regex::Regex;

/// Compiled redaction filter applied to every stage-produced message
/// before it is stored in a `StageResult` or `RunState`.
pub struct Sanitizer {
    patterns: Vec<(Regex, String)>,
    marker: String,
    max_length: usize,
}

impl Sanitizer {
    /// Compile patterns into a regex cache. Invalid patterns are skipped with a warning.
    pub fn new(config: &SanitizerConfig) -> Self {
        let patterns = config
            .all_patterns()
            .filter_map(|p| match Regex::new(&p.pattern) {
                Ok(re) => Some((re, p.label.clone())),
                Err(e) => {
                    tracing::warn!(
                        label = %p.label,
                        error = %e,
                        "Invalid redaction pattern, skipping"
                    );
                    None
                }
            })
            .collect();

        Self {
            patterns,
            marker: config.marker.clone(),
            max_length: config.max_length,
        }
    }

    /// Replace every match with the marker, then cap the length
    pub fn sanitize(&self, message: &str) -> String {
        let mut cleaned = message.to_string();
        for (re, _label) in &self.patterns {
            if re.is_match(&cleaned) {
                cleaned = re.replace_all(&cleaned, self.marker.as_str()).into_owned();
            }
        }

        if cleaned.chars().count() > self.max_length {
            let mut truncated: String = cleaned.chars().take(self.max_length).collect();
            truncated.push_str("...");
            return truncated;
        }

        cleaned
    }

    /// Labels of the patterns that match `message`, for diagnostics
    pub fn matched_labels(&self, message: &str) -> Vec<&str> {
        self.patterns
            .iter()
            .filter(|(re, _)| re.is_match(message))
            .map(|(_, label)| label.as_str())
            .collect()
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(&SanitizerConfig::default())
    }
}
