//! Feed verification: OPML loading, classification and the concurrent walk.
//!
//! - [`opml`] - OPML file parsing into an outline tree
//! - [`classifier`] - One HTTP GET per feed and the valid/invalid decision
//! - [`exceptions`] - Known-good feeds that bypass the content-type check
//! - [`walker`] - Concurrent traversal of the outline tree
//!
//! # Example
//!
//! ```ignore
//! use feedaudit::feed::{parse, Classifier, ClassifierOptions, ExceptionList, Verifier};
//!
//! let doc = parse(Path::new("subscriptions.opml")).await?;
//! let classifier = Classifier::new(client, ExceptionList::builtin(), ClassifierOptions::default());
//! let outcomes = Verifier::new(classifier, 10).verify(doc.outlines).await;
//! ```

mod classifier;
mod exceptions;
mod opml;
mod outcome;
mod walker;

pub use classifier::{Classifier, ClassifierOptions, FeedCheck, ResponseHead};
pub(crate) use exceptions::builtin_rules as builtin_exception_rules;
pub use exceptions::{ExceptionList, ExceptionRule, MatchMode};
pub use opml::{
    count_feeds, parse, parse_str, OpmlDocument, OpmlError, OutlineNode, MAX_OPML_DEPTH,
};
pub use outcome::{InvalidReason, Verdict, VerificationOutcome};
pub use walker::Verifier;
