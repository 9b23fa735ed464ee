use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};

use super::classifier::{Classifier, FeedCheck};
use super::opml::OutlineNode;
use super::outcome::{InvalidReason, Verdict, VerificationOutcome};

/// Walks an outline tree and classifies every feed in it concurrently.
///
/// One task is spawned per outline node at every level. Each level joins
/// its own tasks before returning, so a call to [`verify_into`] completes
/// only once the whole subtree has been checked.
///
/// HTTP checks share a semaphore of `max_concurrent` permits. Walker tasks
/// hold no permit, so deep trees cannot starve the pool.
///
/// [`verify_into`]: Verifier::verify_into
pub struct Verifier<C = Classifier> {
    checker: Arc<C>,
    permits: Option<Arc<Semaphore>>,
}

impl<C: FeedCheck> Verifier<C> {
    /// Creates a verifier. `max_concurrent == 0` removes the cap.
    pub fn new(checker: C, max_concurrent: usize) -> Self {
        let permits = (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent)));
        Self {
            checker: Arc::new(checker),
            permits,
        }
    }

    pub fn checker(&self) -> &C {
        &self.checker
    }

    /// Verifies every feed under `nodes` and returns the outcomes.
    ///
    /// Outcomes are in completion order, not document order.
    pub async fn verify(&self, nodes: Vec<OutlineNode>) -> Vec<VerificationOutcome> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.verify_into(nodes, tx).await;

        let mut outcomes = Vec::new();
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Verifies every feed under `nodes`, sending each outcome on `tx` as
    /// soon as it is known.
    ///
    /// Returns after every check has finished. A send failure (receiver
    /// dropped) does not stop the walk.
    pub async fn verify_into(
        &self,
        nodes: Vec<OutlineNode>,
        tx: mpsc::UnboundedSender<VerificationOutcome>,
    ) {
        let walk = Walk {
            checker: Arc::clone(&self.checker),
            permits: self.permits.clone(),
            tx,
        };
        walk_level(walk, nodes, Arc::new(Vec::new())).await;
    }
}

/// Shared handles cloned into every node task.
struct Walk<C> {
    checker: Arc<C>,
    permits: Option<Arc<Semaphore>>,
    tx: mpsc::UnboundedSender<VerificationOutcome>,
}

impl<C> Clone for Walk<C> {
    fn clone(&self) -> Self {
        Self {
            checker: Arc::clone(&self.checker),
            permits: self.permits.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<C> Walk<C> {
    fn emit(&self, outcome: VerificationOutcome) {
        if self.tx.send(outcome).is_err() {
            tracing::debug!("Outcome receiver dropped, discarding result");
        }
    }
}

/// Spawns one task per node and waits for all of them.
///
/// Boxed because the future recurses through [`visit`].
fn walk_level<C: FeedCheck>(
    walk: Walk<C>,
    nodes: Vec<OutlineNode>,
    path: Arc<Vec<String>>,
) -> BoxFuture<'static, ()> {
    async move {
        let mut tasks = JoinSet::new();
        for node in nodes {
            tasks.spawn(visit(walk.clone(), node, Arc::clone(&path)));
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                // visit() itself never panics; checks are isolated below
                tracing::error!(error = %e, "Outline task failed");
            }
        }
    }
    .boxed()
}

/// Classifies `node` if it is a feed while descending into its children.
async fn visit<C: FeedCheck>(walk: Walk<C>, node: OutlineNode, path: Arc<Vec<String>>) {
    let is_feed = node.is_feed();
    let OutlineNode {
        text,
        xml_url,
        children,
        ..
    } = node;

    let classify = async {
        if !is_feed {
            return;
        }
        let verdict = match spawn_check(&walk, xml_url.clone()).await {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::warn!(url = %xml_url, error = %e, "Feed check task failed");
                Verdict::Invalid(InvalidReason::TaskFailed(e.to_string()))
            }
        };
        walk.emit(VerificationOutcome {
            url: xml_url.clone(),
            title: text.clone(),
            path: path.as_ref().clone(),
            verdict,
        });
    };

    let descend = async {
        if children.is_empty() {
            return;
        }
        let mut child_path = path.as_ref().clone();
        child_path.push(text.clone());
        walk_level(walk.clone(), children, Arc::new(child_path)).await;
    };

    tokio::join!(classify, descend);
}

/// Runs one check in its own task so a panic is caught by the join handle.
async fn spawn_check<C: FeedCheck>(
    walk: &Walk<C>,
    url: String,
) -> Result<Verdict, JoinError> {
    let checker = Arc::clone(&walk.checker);
    let permits = walk.permits.clone();

    tokio::spawn(async move {
        // Never closed, so acquire cannot fail in practice
        let _permit = match permits {
            Some(semaphore) => semaphore.acquire_owned().await.ok(),
            None => None,
        };
        checker.check(&url).await
    })
    .await
}
