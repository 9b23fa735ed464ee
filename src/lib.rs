//! Audit an OPML subscription list for dead or misconfigured feeds.
//!
//! Every outline typed `rss` is fetched once; a feed passes when it answers
//! 200 with an XML content-type, or when its URL is on the exception list.

pub mod config;
pub mod feed;
pub mod report;
