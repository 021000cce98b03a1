//! Concurrent fetch-and-aggregate core.
//!
//! One cycle fetches the advisory feed, fans out one task per entry through
//! a bounded worker pool, and joins them all before returning. Each entry
//! task performs its own detail fetch and either writes a record into the
//! shared collector or reports an error; a failing entry never aborts its
//! siblings. The cycle result is the aggregated snapshot plus a combined
//! error describing every per-entry failure.

use crate::advisory::record::{EntryFields, Record};
use crate::document::{fetch_document, DocumentError, Node};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Fixed path of the warning body inside an entry's detail report.
const WARNING_PATH: &[&str] = &["Report", "Body", "Warning"];

/// Keyed aggregate of one fetch cycle. Rebuilt from scratch every cycle.
pub type Snapshot = HashMap<String, Record>;

// ============================================================================
// Combined Error
// ============================================================================

/// Aggregate of every per-entry failure in one cycle.
///
/// Empty means full success. Non-empty accompanies a possibly-partial
/// snapshot: the snapshot still contains every entry that succeeded.
#[derive(Debug, Default)]
pub struct CycleErrors(Vec<DocumentError>);

impl CycleErrors {
    fn single(err: DocumentError) -> Self {
        Self(vec![err])
    }

    fn push(&mut self, err: DocumentError) {
        self.0.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DocumentError> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<DocumentError> {
        self.0
    }
}

impl fmt::Display for CycleErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "no entry failures");
        }
        write!(f, "{} entry failures: ", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for CycleErrors {}

// ============================================================================
// Aggregate Collector
// ============================================================================

/// Shared result set written to by concurrent entry tasks.
///
/// All writes go through [`Collector::put`] under the mutex; a key collision
/// (two entries sharing `title` and `name`) is last-writer-wins, preserved
/// as documented behavior rather than treated as a defect.
struct Collector {
    records: Mutex<Snapshot>,
}

impl Collector {
    fn new() -> Self {
        Self {
            records: Mutex::new(Snapshot::new()),
        }
    }

    async fn put(&self, key: String, record: Record) {
        self.records.lock().await.insert(key, record);
    }

    async fn take(&self) -> Snapshot {
        std::mem::take(&mut *self.records.lock().await)
    }
}

// ============================================================================
// Fan-Out Orchestrator
// ============================================================================

/// Runs fetch cycles against an advisory feed.
pub struct Fetcher {
    client: reqwest::Client,
    workers: usize,
}

impl Fetcher {
    /// `workers` bounds how many entry fetches run at once. Zero is treated
    /// as one rather than deadlocking the pool.
    pub fn new(client: reqwest::Client, workers: usize) -> Self {
        Self {
            client,
            workers: workers.max(1),
        }
    }

    /// Run one fetch cycle and return the snapshot plus the combined error.
    ///
    /// A failure fetching or navigating the top-level feed is fatal to the
    /// cycle: no entry task starts and the snapshot comes back empty with a
    /// single-error [`CycleErrors`]. Entry-level failures are contained to
    /// their own task and collected.
    ///
    /// Cancelling `cancel` mid-run abandons an in-flight feed fetch, stops
    /// unstarted tasks from dispatching, and abandons in-flight detail
    /// fetches at their next await point; records already collected remain
    /// valid partial results.
    pub async fn fetch_snapshot(
        &self,
        feed_url: &str,
        cancel: &CancellationToken,
    ) -> (Snapshot, CycleErrors) {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(url = feed_url, "feed fetch abandoned by cancellation");
                return (Snapshot::new(), CycleErrors::default());
            }
            result = fetch_document(&self.client, feed_url) => result,
        };
        let feed = match fetched {
            Ok(feed) => feed,
            Err(e) => {
                tracing::error!(url = feed_url, error = %e, "feed fetch failed");
                return (Snapshot::new(), CycleErrors::single(e));
            }
        };

        let entries = match entry_list(&feed) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(url = feed_url, error = %e, "feed has no entry list");
                return (Snapshot::new(), CycleErrors::single(e));
            }
        };

        tracing::info!(
            url = feed_url,
            entries = entries.len(),
            workers = self.workers,
            "dispatching entry fetches"
        );

        let collector = Collector::new();
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();

        stream::iter(entries)
            .map(|entry| {
                let err_tx = err_tx.clone();
                let cancel = cancel.clone();
                let client = &self.client;
                let collector = &collector;
                async move {
                    if cancel.is_cancelled() {
                        return;
                    }
                    match build_record(client, &entry, &cancel).await {
                        Ok(Some((key, record))) => collector.put(key, record).await,
                        Ok(None) => {
                            tracing::debug!("entry fetch abandoned by cancellation");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "entry fetch failed");
                            let _ = err_tx.send(e);
                        }
                    }
                }
            })
            .buffer_unordered(self.workers)
            .collect::<Vec<()>>()
            .await;

        // The pool has joined, so every task-owned sender clone is gone.
        // Dropping ours closes the channel and the drain below is guaranteed
        // to observe every reported error.
        drop(err_tx);
        let mut errors = CycleErrors::default();
        while let Some(err) = err_rx.recv().await {
            errors.push(err);
        }

        (collector.take().await, errors)
    }
}

/// Extract the entry list at `feed -> entry`.
///
/// A single-entry feed converts to a mapping rather than a one-element
/// sequence, so both shapes are accepted.
fn entry_list(feed: &Node) -> Result<Vec<Node>, DocumentError> {
    let node = feed.get_by_path(&["feed", "entry"])?;
    match node {
        Node::Sequence(items) => Ok(items.clone()),
        Node::Mapping(_) => Ok(vec![node.clone()]),
        other => Err(DocumentError::TypeMismatch {
            expected: "sequence",
            found: other.kind(),
        }),
    }
}

/// One entry task: extract the local fields, fetch the detail report, pull
/// the warning body, build the keyed record.
///
/// `Ok(None)` means the task was abandoned by cancellation before its detail
/// fetch completed; it writes neither a record nor an error.
async fn build_record(
    client: &reqwest::Client,
    entry: &Node,
    cancel: &CancellationToken,
) -> Result<Option<(String, Record)>, DocumentError> {
    let fields = EntryFields::from_entry(entry)?;

    let detail = tokio::select! {
        _ = cancel.cancelled() => return Ok(None),
        result = fetch_document(client, &fields.link) => result?,
    };

    let body = detail.get_by_path(WARNING_PATH)?.clone();
    Ok(Some((fields.key(), fields.into_record(body))))
}

// ============================================================================
// Tests
// ============================================================================
