//! Recursive replication of a source directory tree into a sink
//!
//! Every directory goes through the same states:
//!
//! 1. **Listing** - a fresh source connection lists the directory, under the retry policy. The
//!    listing holds one governor unit and its connection is closed before dispatching starts.
//! 2. **Dispatching** - a batch of `min(max_operations, entries)` units is admitted by the
//!    [`Governor`] and one transfer task is started per entry, never more than the batch width at
//!    once.
//! 3. **Collecting** - outcomes are tallied as tasks finish. An entry that turns out to be a
//!    directory starts an independent replication of that directory; the parent does not wait
//!    for it.
//! 4. **Reporting** - the [`DirectoryResult`] is pushed to the run's [`Report`].
//!
//! All directory replications of a run, the root included, are spawned on one task tracker and
//! the run waits for all of them before it computes its summary.

use std::collections::HashMap;
use std::sync::Arc;

use async_recursion::async_recursion;
use throttle::{Governor, Slot};
use tracing::instrument;

use crate::path;
use crate::progress::Progress;
use crate::report::{DirectoryResult, Report, RunSummary};
use crate::retry::{RetryError, RetryPolicy};
use crate::sink::{PutOptions, Sink};
use crate::source::{self, Source};

pub const DEFAULT_CACHE_CONTROL: &str = "public,max-age=86400";
pub const DEFAULT_ACL: &str = "public-read";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Nominal limit of transfer tasks in flight across the whole run
    pub max_operations: usize,
    pub retry: RetryPolicy,
    pub connect_timeout: std::time::Duration,
    pub cache_control: Option<String>,
    pub acl: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_operations: 16,
            retry: RetryPolicy::default(),
            connect_timeout: std::time::Duration::from_secs(60),
            cache_control: Some(DEFAULT_CACHE_CONTROL.to_string()),
            acl: Some(DEFAULT_ACL.to_string()),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_operations == 0 {
            return Err("max operations must be greater than 0".to_string());
        }
        if u32::try_from(self.max_operations + throttle::SLACK).is_err() {
            return Err(format!(
                "max operations is too large: {}",
                self.max_operations
            ));
        }
        self.retry.validate()
    }
}

/// What happened to one listed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Copied { bytes: u64 },
    /// The entry is a directory and must be replicated on its own
    IsDirectory(String),
    Failed(String),
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RunReport {
    pub results: Vec<DirectoryResult>,
    pub summary: RunSummary,
}

/// State shared by every task of one replication run.
pub struct Replicator<S: Source, K: Sink> {
    source: Arc<S>,
    sink: Arc<K>,
    settings: Settings,
    governor: Arc<Governor>,
    progress: Arc<Progress>,
    report: Report,
    tracker: tokio_util::task::TaskTracker,
}

impl<S: Source, K: Sink> std::fmt::Debug for Replicator<S, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replicator")
            .field("settings", &self.settings)
            .field("governor", &self.governor)
            .finish_non_exhaustive()
    }
}

impl<S: Source, K: Sink> Replicator<S, K> {
    pub fn new(
        source: Arc<S>,
        sink: Arc<K>,
        settings: Settings,
        progress: Arc<Progress>,
    ) -> anyhow::Result<Self> {
        settings.validate().map_err(|error| anyhow::anyhow!(error))?;
        Ok(Self {
            source,
            sink,
            governor: Arc::new(Governor::new(settings.max_operations)),
            settings,
            progress,
            report: Report::new(),
            tracker: tokio_util::task::TaskTracker::new(),
        })
    }

    pub fn governor(&self) -> Arc<Governor> {
        self.governor.clone()
    }

    /// Replicates `root` under `output_prefix` and waits for every directory found below it.
    ///
    /// A replicator is meant to run once; results of repeated runs accumulate.
    pub async fn run(self: Arc<Self>, root: &str, output_prefix: &str) -> RunReport {
        let start = std::time::Instant::now();
        let prefix = path::normalize_prefix(output_prefix);
        tracing::info!("replicating {} into '{}'", root, &prefix);
        self.tracker
            .spawn(replicate_directory(self.clone(), root.to_string(), prefix));
        self.tracker.close();
        self.tracker.wait().await;
        let skipped = self.progress.directories_skipped.get() as usize;
        RunReport {
            results: self.report.results(),
            summary: self.report.summary(start.elapsed(), skipped),
        }
    }
}

/// Replicates the tree at `root` into `sink`, keys starting with `output_prefix`.
///
/// Fails only on invalid settings. Per-file and per-directory failures end up in the report.
pub async fn replicate<S: Source, K: Sink>(
    source: Arc<S>,
    sink: Arc<K>,
    root: &str,
    output_prefix: &str,
    settings: Settings,
) -> anyhow::Result<RunReport> {
    replicate_with_progress(
        source,
        sink,
        root,
        output_prefix,
        settings,
        Arc::new(Progress::new()),
    )
    .await
}

pub async fn replicate_with_progress<S: Source, K: Sink>(
    source: Arc<S>,
    sink: Arc<K>,
    root: &str,
    output_prefix: &str,
    settings: Settings,
    progress: Arc<Progress>,
) -> anyhow::Result<RunReport> {
    let replicator = Arc::new(Replicator::new(source, sink, settings, progress)?);
    Ok(replicator.run(root, output_prefix).await)
}

/// Lists `dir` on a connection of its own, closed before the names are returned.
async fn list_directory<S: Source>(
    source: &S,
    settings: &Settings,
    dir: &str,
) -> Result<Vec<String>, RetryError<source::SourceError>> {
    settings
        .retry
        .run(&format!("list {dir}"), || async move {
            let mut conn = source::open(source, settings.connect_timeout).await?;
            let listed = source.list(&mut conn, dir).await;
            source::close_quietly(source, conn, dir).await;
            listed
        })
        .await
}

#[instrument(skip(ctx))]
#[async_recursion]
async fn replicate_directory<S: Source, K: Sink>(
    ctx: Arc<Replicator<S, K>>,
    dir: String,
    prefix: String,
) {
    // a listing holds one unit, released before the batch is admitted
    let listing_slot = ctx.governor.acquire().await;
    let listed = list_directory(&*ctx.source, &ctx.settings, &dir).await;
    drop(listing_slot);
    let listing = match listed {
        Ok(listing) => listing,
        Err(error) => {
            tracing::error!("skipping directory {}: {}", &dir, error.last());
            ctx.progress.directories_skipped.inc();
            return;
        }
    };
    ctx.progress.directories_listed.inc();
    let entries: Vec<String> = listing
        .iter()
        .filter_map(|listed| path::listed_name(listed))
        .map(|name| path::join_entry(&dir, name))
        .collect();
    tracing::debug!("{} entries in {}", entries.len(), &dir);
    let width = ctx.governor.effective_width(entries.len());
    let mut batch = ctx.governor.admit(width).await;
    let mut queue = entries.into_iter().peekable();
    let mut join_set = tokio::task::JoinSet::new();
    let mut in_flight = HashMap::new();
    let mut result = DirectoryResult::new(dir.as_str());
    loop {
        while queue.peek().is_some() {
            let Some(slot) = batch.take() else {
                break;
            };
            let Some(entry) = queue.next() else {
                break;
            };
            let handle = join_set.spawn(transfer_entry(
                ctx.clone(),
                slot,
                entry.clone(),
                prefix.clone(),
            ));
            in_flight.insert(handle.id(), entry);
        }
        if join_set.is_empty() {
            if queue.peek().is_none() {
                break;
            }
            // every unit of the batch went down with a failed task
            let slot = ctx.governor.acquire().await;
            batch.restore(slot);
            continue;
        }
        let Some(joined) = join_set.join_next_with_id().await else {
            continue;
        };
        let outcome = match joined {
            Ok((id, (slot, outcome))) => {
                in_flight.remove(&id);
                if queue.peek().is_some() {
                    batch.restore(slot);
                } else {
                    drop(slot);
                }
                outcome
            }
            Err(error) => {
                let entry = in_flight.remove(&error.id()).unwrap_or_default();
                tracing::error!("transfer of {} did not complete: {}", &entry, &error);
                ctx.progress.files_failed.inc();
                TransferOutcome::Failed(entry)
            }
        };
        match outcome {
            TransferOutcome::Copied { bytes } => result.record_copied(bytes),
            TransferOutcome::Failed(entry) => result.record_failed(entry),
            TransferOutcome::IsDirectory(subpath) => {
                let child_prefix = path::child_prefix(&dir, &prefix, &subpath);
                tracing::debug!("{} is a directory, replicating into '{}'", &subpath, &child_prefix);
                ctx.tracker
                    .spawn(replicate_directory(ctx.clone(), subpath, child_prefix));
            }
        }
    }
    drop(batch);
    let rate = match ctx.progress.files_per_second() {
        Some(rate) => format!("{rate:.2} files/s"),
        None => "n/a".to_string(),
    };
    if result.is_complete() {
        tracing::info!("{} -- speed: {}", &result, rate);
    } else {
        tracing::warn!("{} -- speed: {}", &result, rate);
    }
    ctx.report.push(result);
}

/// Copies one entry, holding `slot` for the duration of the transfer.
#[instrument(skip(ctx, slot))]
async fn transfer_entry<S: Source, K: Sink>(
    ctx: Arc<Replicator<S, K>>,
    slot: Slot,
    entry: String,
    prefix: String,
) -> (Slot, TransferOutcome) {
    let _in_flight = ctx.progress.transfers.guard();
    let outcome = copy_entry(&ctx, &entry, &prefix).await;
    match &outcome {
        TransferOutcome::Copied { bytes } => {
            ctx.progress.files_copied.inc();
            ctx.progress.bytes_copied.add(*bytes);
        }
        TransferOutcome::Failed(_) => ctx.progress.files_failed.inc(),
        TransferOutcome::IsDirectory(_) => {}
    }
    (slot, outcome)
}

async fn copy_entry<S: Source, K: Sink>(
    ctx: &Replicator<S, K>,
    entry: &str,
    prefix: &str,
) -> TransferOutcome {
    let source = &*ctx.source;
    let timeout = ctx.settings.connect_timeout;
    let read = ctx
        .settings
        .retry
        .run(&format!("read {entry}"), || async move {
            let mut conn = source::open(source, timeout).await?;
            match source.read_all(&mut conn, entry).await {
                Ok(body) => Ok((conn, body)),
                Err(error) => {
                    source::close_quietly(source, conn, entry).await;
                    Err(error)
                }
            }
        })
        .await;
    let (conn, body) = match read {
        Ok(read) => read,
        Err(RetryError::Container(_)) => return TransferOutcome::IsDirectory(entry.to_string()),
        Err(RetryError::Exhausted { .. }) => return TransferOutcome::Failed(entry.to_string()),
    };
    let key = path::object_key(prefix, entry);
    let options = PutOptions {
        content_type: path::content_type(entry),
        cache_control: ctx.settings.cache_control.clone(),
        acl: ctx.settings.acl.clone(),
    };
    let bytes = body.len() as u64;
    let sink = &*ctx.sink;
    let key_ref = key.as_str();
    let options_ref = &options;
    let body_ref = &body;
    let upload = ctx
        .settings
        .retry
        .run(&format!("upload {key}"), || async move {
            sink.put_object(body_ref.clone(), key_ref, options_ref).await
        })
        .await;
    source::close_quietly(source, conn, entry).await;
    match upload {
        Ok(()) => {
            tracing::debug!("copied {} to {} ({})", entry, &key, bytesize::ByteSize(bytes));
            TransferOutcome::Copied { bytes }
        }
        Err(_) => TransferOutcome::Failed(entry.to_string()),
    }
}
