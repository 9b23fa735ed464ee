//! Rendering of verification outcomes.
//!
//! Text mode keeps the classic line contract: `Invalid: <url>` and
//! `Exception: <url>`, nothing for valid feeds. JSON mode emits one object per
//! outcome. The summary is rendered separately so it can go to stderr.
use serde::Deserialize;
use std::fmt;
use std::io::{self, Write};

use crate::feed::{Verdict, VerificationOutcome};

/// How outcomes are written to stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `Invalid: <url>` / `Exception: <url>` lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Writes outcomes as they arrive and tallies them.
pub struct Reporter<W> {
    out: W,
    format: OutputFormat,
    show_valid: bool,
    summary: Summary,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W, format: OutputFormat, show_valid: bool) -> Self {
        Self {
            out,
            format,
            show_valid,
            summary: Summary::default(),
        }
    }

    /// Records `outcome` and writes its line, if it has one.
    pub fn record(&mut self, outcome: &VerificationOutcome) -> io::Result<()> {
        self.summary.record(outcome);
        if let Some(line) = self.render(outcome)? {
            writeln!(self.out, "{line}")?;
            self.out.flush()?;
        }
        Ok(())
    }

    pub fn summary(&self) -> Summary {
        self.summary
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn render(&self, outcome: &VerificationOutcome) -> io::Result<Option<String>> {
        match self.format {
            OutputFormat::Text => Ok(render_text(outcome, self.show_valid)),
            OutputFormat::Json => serde_json::to_string(outcome).map(Some).map_err(io::Error::from),
        }
    }
}

/// Renders one outcome in text mode. Valid feeds produce no line unless
/// `show_valid` is set.
pub fn render_text(outcome: &VerificationOutcome, show_valid: bool) -> Option<String> {
    match &outcome.verdict {
        Verdict::Invalid(_) => Some(format!("Invalid: {}", outcome.url)),
        Verdict::ExceptionOverride => Some(format!("Exception: {}", outcome.url)),
        Verdict::Valid if show_valid => Some(format!("Valid: {}", outcome.url)),
        Verdict::Valid => None,
    }
}

/// Counts of outcomes seen in one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub checked: usize,
    pub valid: usize,
    pub invalid: usize,
    pub exceptions: usize,
}

impl Summary {
    pub fn record(&mut self, outcome: &VerificationOutcome) {
        self.checked += 1;
        match outcome.verdict {
            Verdict::Valid => self.valid += 1,
            Verdict::Invalid(_) => self.invalid += 1,
            Verdict::ExceptionOverride => self.exceptions += 1,
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Checked {} feeds: {} valid, {} invalid, {} exceptions",
            self.checked, self.valid, self.invalid, self.exceptions
        )
    }
}
