use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Compiler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Lowest stage id a stage node may reference
    #[serde(default = "default_min_stage_id")]
    pub min_stage_id: u32,

    /// Highest stage id a stage node may reference
    #[serde(default = "default_max_stage_id")]
    pub max_stage_id: u32,

    /// Skip cycle detection. Reserved for future loop constructs; the
    /// runner never executes a cyclic plan.
    #[serde(default)]
    pub allow_cycles: bool,
}

fn default_min_stage_id() -> u32 {
    1
}

fn default_max_stage_id() -> u32 {
    20
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            min_stage_id: default_min_stage_id(),
            max_stage_id: default_max_stage_id(),
            allow_cycles: false,
        }
    }
}

impl CompilerConfig {
    pub fn stage_id_in_range(&self, stage_id: i64) -> bool {
        stage_id >= i64::from(self.min_stage_id) && stage_id <= i64::from(self.max_stage_id)
    }
}

/// DAG and sequential runner settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Simulated review delay for gates in demo governance
    #[serde(default = "default_demo_gate_delay_ms")]
    pub demo_gate_delay_ms: u64,

    /// Upper bound on a single stage invocation; unset means no limit
    #[serde(default)]
    pub stage_timeout_secs: Option<u64>,
}

fn default_demo_gate_delay_ms() -> u64 {
    100
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            demo_gate_delay_ms: default_demo_gate_delay_ms(),
            stage_timeout_secs: None,
        }
    }
}

impl RunnerConfig {
    pub fn demo_gate_delay(&self) -> Duration {
        Duration::from_millis(self.demo_gate_delay_ms)
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_secs.map(Duration::from_secs)
    }
}

/// A named regular expression whose matches get redacted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionPattern {
    pub label: String,
    pub pattern: String,
}

impl RedactionPattern {
    fn new(label: &str, pattern: &str) -> Self {
        Self {
            label: label.to_string(),
            pattern: pattern.to_string(),
        }
    }
}

/// Error message sanitizer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizerConfig {
    /// Maximum length of a stored message, in characters
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Replacement text for every match
    #[serde(default = "default_marker")]
    pub marker: String,

    /// Built-in patterns; replace to change the defaults wholesale
    #[serde(default = "SanitizerConfig::default_patterns")]
    pub patterns: Vec<RedactionPattern>,

    /// Patterns appended to `patterns`
    #[serde(default)]
    pub extra_patterns: Vec<RedactionPattern>,
}

fn default_max_length() -> usize {
    500
}

fn default_marker() -> String {
    "[REDACTED]".to_string()
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            max_length: default_max_length(),
            marker: default_marker(),
            patterns: Self::default_patterns(),
            extra_patterns: Vec::new(),
        }
    }
}

impl SanitizerConfig {
    /// Identifier, contact and path patterns applied in order
    pub fn default_patterns() -> Vec<RedactionPattern> {
        vec![
            RedactionPattern::new("ssn", r"\b\d{3}-\d{2}-\d{4}\b"),
            RedactionPattern::new("mrn", r"(?i)\bMRN[:#\s]*[A-Z0-9-]{4,}\b"),
            RedactionPattern::new("email", r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"),
            RedactionPattern::new(
                "phone",
                r"(?:\+?1[-.\s]?)?\(?\b\d{3}\)?[-.\s]\d{3}[-.\s]\d{4}\b",
            ),
            RedactionPattern::new(
                "dob",
                r"(?i)\b(?:DOB|date of birth)[:\s]*\d{1,4}[-/.]\d{1,2}[-/.]\d{1,4}\b",
            ),
            RedactionPattern::new(
                "user_path",
                r"(?:/home/|/Users/|[A-Za-z]:\\Users\\)[^\s/\\]+",
            ),
        ]
    }

    pub fn all_patterns(&self) -> impl Iterator<Item = &RedactionPattern> {
        self.patterns.iter().chain(self.extra_patterns.iter())
    }
}
