use serde::{Deserialize, Serialize};

/// Feeds known to serve valid RSS/Atom without an XML content-type.
const BUILTIN_EXCEPTIONS: &[&str] = &[
    "https://os.phil-opp.com/atom.xml",
    "https://www.digitalocean.com/blog/rss",
];

/// How an exception pattern is compared against a feed URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Pattern appears anywhere in the URL.
    #[default]
    Substring,
    /// URL starts with the pattern.
    Prefix,
    /// URL equals the pattern.
    Exact,
}

/// A single override entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExceptionRule {
    pub pattern: String,
    #[serde(default, rename = "match")]
    pub mode: MatchMode,
}

impl ExceptionRule {
    pub fn substring(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            mode: MatchMode::Substring,
        }
    }

    pub fn matches(&self, url: &str) -> bool {
        // An empty pattern would match every URL in substring/prefix mode
        if self.pattern.is_empty() {
            return false;
        }
        match self.mode {
            MatchMode::Substring => url.contains(self.pattern.as_str()),
            MatchMode::Prefix => url.starts_with(self.pattern.as_str()),
            MatchMode::Exact => url == self.pattern,
        }
    }
}

/// Feeds that bypass the content-type check once they answer 200.
///
/// Read-only after construction; shared between classification tasks
/// behind the classifier's `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptionList {
    rules: Vec<ExceptionRule>,
}

impl ExceptionList {
    pub fn new(rules: Vec<ExceptionRule>) -> Self {
        Self { rules }
    }

    /// The list shipped with the tool, matched as substrings.
    pub fn builtin() -> Self {
        Self::new(builtin_rules())
    }

    /// Returns the first rule matching `url`.
    pub fn find(&self, url: &str) -> Option<&ExceptionRule> {
        self.rules.iter().find(|rule| rule.matches(url))
    }

    pub fn contains(&self, url: &str) -> bool {
        self.find(url).is_some()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

pub(crate) fn builtin_rules() -> Vec<ExceptionRule> {
    BUILTIN_EXCEPTIONS
        .iter()
        .map(|pattern| ExceptionRule::substring(*pattern))
        .collect()
}
