use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::error::Error as StdError;
use std::future::Future;
use std::time::{Duration, Instant};

use super::exceptions::ExceptionList;
use super::outcome::{InvalidReason, Verdict};

/// Bytes read from a response body before the connection is dropped instead.
const MAX_DRAIN_BYTES: usize = 10 * 1024 * 1024; // 10MB

/// Anything that can turn a feed URL into a [`Verdict`].
///
/// The walker is generic over this so tests can count or fail checks
/// without a network.
pub trait FeedCheck: Send + Sync + 'static {
    fn check(&self, url: &str) -> impl Future<Output = Verdict> + Send;
}

/// Tunables for [`Classifier`].
#[derive(Debug, Clone)]
pub struct ClassifierOptions {
    /// Bound on getting response headers. Draining the body shares what is
    /// left of it but never changes the verdict. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Match `xml` in the content-type case-sensitively.
    pub content_type_case_sensitive: bool,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            content_type_case_sensitive: true,
        }
    }
}

/// Status line and content-type of a response, all the verdict depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub content_type: Option<String>,
}

/// Decides whether a feed URL serves something that looks like RSS/Atom.
///
/// Holds no per-URL state: one GET per call, no retries, no caching.
#[derive(Debug, Clone)]
pub struct Classifier {
    client: reqwest::Client,
    exceptions: ExceptionList,
    options: ClassifierOptions,
}

impl Classifier {
    pub fn new(
        client: reqwest::Client,
        exceptions: ExceptionList,
        options: ClassifierOptions,
    ) -> Self {
        Self {
            client,
            exceptions,
            options,
        }
    }

    /// Classifies a single feed URL.
    ///
    /// # Behavior
    ///
    /// - Empty, unparseable or whitespace-padded URLs are invalid without
    ///   touching the network
    /// - Any transport error, or no response headers within the timeout, is
    ///   invalid
    /// - Only status 200 can pass
    /// - A URL on the exception list passes regardless of content-type
    /// - Otherwise the content-type must contain `xml`
    ///
    /// The verdict is fixed once the headers arrive. The body is then
    /// drained within whatever remains of the timeout so the connection can
    /// be reused; a slow or oversized body only costs the connection.
    pub async fn classify(&self, url: &str) -> Verdict {
        if url.is_empty() {
            return Verdict::Invalid(InvalidReason::EmptyUrl);
        }
        // The url crate strips surrounding spaces; the attribute value is taken as-is
        if url.trim() != url {
            return Verdict::Invalid(InvalidReason::MalformedUrl(
                "surrounding whitespace".to_string(),
            ));
        }
        if let Err(e) = url::Url::parse(url) {
            return Verdict::Invalid(InvalidReason::MalformedUrl(e.to_string()));
        }

        let started = Instant::now();
        let sent = match self.options.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.send(url)).await {
                Ok(result) => result,
                Err(_) => Err(InvalidReason::Timeout(limit.as_millis() as u64)),
            },
            None => self.send(url).await,
        };

        let response = match sent {
            Ok(response) => response,
            Err(reason) => {
                tracing::debug!(url = %url, reason = %reason, "Feed request failed");
                return Verdict::Invalid(reason);
            }
        };

        let head = ResponseHead {
            status: response.status(),
            content_type: response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
        };
        let verdict = self.decide(url, &head);

        match self.options.timeout {
            Some(limit) => {
                let remaining = limit.saturating_sub(started.elapsed());
                if tokio::time::timeout(remaining, drain(response, url))
                    .await
                    .is_err()
                {
                    tracing::debug!(url = %url, "Response body still arriving at timeout, dropping connection");
                }
            }
            None => drain(response, url).await,
        }

        verdict
    }

    /// Applies the status, exception and content-type rules to a response.
    pub fn decide(&self, url: &str, head: &ResponseHead) -> Verdict {
        if head.status != StatusCode::OK {
            return Verdict::Invalid(InvalidReason::HttpStatus(head.status.as_u16()));
        }

        if let Some(rule) = self.exceptions.find(url) {
            tracing::debug!(url = %url, pattern = %rule.pattern, "Exception list override");
            return Verdict::ExceptionOverride;
        }

        let is_xml = head.content_type.as_deref().is_some_and(|ct| {
            if self.options.content_type_case_sensitive {
                ct.contains("xml")
            } else {
                ct.to_ascii_lowercase().contains("xml")
            }
        });

        if is_xml {
            Verdict::Valid
        } else {
            Verdict::Invalid(InvalidReason::ContentType(head.content_type.clone()))
        }
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response, InvalidReason> {
        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| InvalidReason::Network(error_chain(&e)))
    }
}

impl FeedCheck for Classifier {
    async fn check(&self, url: &str) -> Verdict {
        self.classify(url).await
    }
}

/// Reads and discards the body, up to [`MAX_DRAIN_BYTES`].
///
/// Past the limit, or on a read error, the response is dropped, which
/// closes the connection instead of returning it to the pool.
async fn drain(response: reqwest::Response, url: &str) {
    let mut stream = response.bytes_stream();
    let mut received: usize = 0;

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                received = received.saturating_add(chunk.len());
                if received > MAX_DRAIN_BYTES {
                    tracing::debug!(url = %url, "Response body too large to drain, dropping connection");
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Failed to drain response body");
                return;
            }
        }
    }
}

/// Renders a reqwest error with its sources, which carry the DNS/TLS detail.
fn error_chain(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = StdError::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
