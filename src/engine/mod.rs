//! Posting Engine: walks the archive in order and publishes one post at a time.
//!
//! The checkpoint only ever moves past posts that reached the destination (or
//! were already there), so interrupting at any point is safe. After a post
//! fails the checkpoint stays put for the rest of the run; later posts still go
//! out and land in the ledger, so the next run retries the failure and passes
//! over the rest.

mod state;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

pub use state::{EngineState, RunMode, RunOptions, RunSummary};

use crate::archive::{Archive, CanonicalPost};
use crate::bluesky::{ClientError, Destination, Embed, PostRecord, StrongRef};
use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::constants::POST_COLLECTION;
use crate::error::{EngineError, MediaUploadError};
use crate::ledger::{Ledger, PublishRecord};
use crate::media::MediaUploader;
use crate::quote;
use crate::retry::{RetryError, RetryPolicy};
use crate::transform::{build_facets, transform, TransformOptions};

/// How a single post's processing ended, short of success.
#[derive(Debug)]
enum PostError {
    /// Scoped to this post; the run goes on.
    Failed(String),
    Cancelled,
    Fatal(EngineError),
}

impl From<RetryError> for PostError {
    fn from(e: RetryError) -> Self {
        match e {
            RetryError::Cancelled => Self::Cancelled,
            RetryError::Failed(client) if client.is_fatal() => {
                Self::Fatal(EngineError::Authentication(client))
            }
            other => Self::Failed(other.to_string()),
        }
    }
}

impl From<MediaUploadError> for PostError {
    fn from(e: MediaUploadError) -> Self {
        match e {
            MediaUploadError::Upload(retry) => retry.into(),
            other => Self::Failed(other.to_string()),
        }
    }
}

pub struct Engine<'a> {
    archive: &'a Archive,
    destination: &'a dyn Destination,
    checkpoint: &'a dyn CheckpointStore,
    ledger: &'a mut Ledger,
    cancel: CancellationToken,
    retry: RetryPolicy,
    media: MediaUploader,
    transform: TransformOptions,
    post_interval: Duration,
    max_quote_depth: usize,
    backdate: bool,
    state: EngineState,
    /// Posts published (or simulated) during this run.
    published: HashMap<String, StrongRef>,
}

impl<'a> Engine<'a> {
    #[must_use]
    pub fn new(
        archive: &'a Archive,
        destination: &'a dyn Destination,
        checkpoint: &'a dyn CheckpointStore,
        ledger: &'a mut Ledger,
        config: &Config,
        cancel: CancellationToken,
    ) -> Self {
        let retry = RetryPolicy::from_config(config);
        Self {
            archive,
            destination,
            checkpoint,
            ledger,
            cancel,
            media: MediaUploader::new(config.media_policy, retry.clone()),
            retry,
            transform: TransformOptions {
                timestamp_addendum: config.timestamp_addendum,
                ..TransformOptions::default()
            },
            post_interval: config.post_interval,
            max_quote_depth: config.max_quote_depth,
            backdate: config.backdate_posts,
            state: EngineState::Idle,
            published: HashMap::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state
    }

    fn enter(&mut self, state: EngineState) {
        trace!(from = %self.state, to = %state, "Engine state");
        self.state = state;
    }

    /// Migrate every eligible post.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures that make continuing pointless:
    /// authentication, or being unable to persist progress.
    pub async fn run(&mut self, options: RunOptions) -> Result<RunSummary, EngineError> {
        let mut summary = RunSummary {
            dry_run: options.dry_run,
            ..RunSummary::default()
        };

        if !options.dry_run {
            if let Err(e) = self.destination.authenticate().await {
                error!(error = %e, "Authentication failed, aborting before any post");
                self.enter(EngineState::Aborted);
                return Err(EngineError::Authentication(e));
            }
        }

        let watermark = match options.mode {
            RunMode::Resume => self.checkpoint.load(),
            RunMode::StartFrom(ts) => Some(ts),
            RunMode::ReprocessVideos => None,
        };
        let reprocess = options.mode == RunMode::ReprocessVideos;
        let mut persist = options.persists_checkpoint();

        let archive = self.archive;
        let queue: Vec<&CanonicalPost> = archive
            .posts()
            .filter(|p| watermark.map_or(true, |w| p.created_at > w))
            .filter(|p| !reprocess || p.has_video())
            .collect();

        info!(
            eligible = queue.len(),
            total = archive.len(),
            after = ?watermark,
            mode = ?options.mode,
            dry_run = options.dry_run,
            "Starting run"
        );

        for post in queue {
            self.enter(EngineState::Selecting);
            if self.cancel.is_cancelled() {
                info!("Interrupted, stopping before post {}", post.id);
                summary.interrupted = true;
                break;
            }

            if self.is_done(&post.id, reprocess) {
                debug!(post_id = %post.id, "Already published, skipping");
                summary.skipped += 1;
                if persist {
                    self.advance(post, &mut summary)?;
                }
                continue;
            }

            match self.process(post, options.dry_run, &mut summary).await {
                Ok(Some(uri)) => {
                    info!(post_id = %post.id, created_at = %post.created_at, uri = %uri.uri, "Published");
                    summary.published += 1;
                    if persist {
                        self.advance(post, &mut summary)?;
                    }
                    self.pace(options.dry_run).await;
                }
                Ok(None) => {
                    warn!(post_id = %post.id, "Nothing left to post after dropping media, skipping");
                    summary.skipped += 1;
                    if persist {
                        self.advance(post, &mut summary)?;
                    }
                }
                Err(PostError::Failed(reason)) => {
                    warn!(post_id = %post.id, reason = %reason, "Post failed, leaving it for a later run");
                    summary.failed += 1;
                    summary.failed_ids.push(post.id.clone());
                    if persist {
                        info!(post_id = %post.id, "Checkpoint held before failed post for the rest of this run");
                        persist = false;
                    }
                }
                Err(PostError::Cancelled) => {
                    info!(post_id = %post.id, "Interrupted while processing post");
                    summary.interrupted = true;
                    break;
                }
                Err(PostError::Fatal(e)) => {
                    error!(post_id = %post.id, error = %e, "Fatal error, aborting run");
                    self.enter(EngineState::Aborted);
                    return Err(e);
                }
            }
        }

        self.enter(EngineState::Done);
        info!(
            published = summary.published,
            quotes_published = summary.quotes_published,
            skipped = summary.skipped,
            failed = summary.failed,
            dropped_quotes = summary.dropped_quotes,
            interrupted = summary.interrupted,
            "Run finished"
        );
        Ok(summary)
    }

    fn is_done(&self, post_id: &str, reprocess: bool) -> bool {
        self.published.contains_key(post_id) || (!reprocess && self.ledger.contains(post_id))
    }

    fn lookup(&self, post_id: &str) -> Option<StrongRef> {
        self.published
            .get(post_id)
            .cloned()
            .or_else(|| self.ledger.get(post_id).map(|r| r.destination.clone()))
    }

    fn advance(&mut self, post: &CanonicalPost, summary: &mut RunSummary) -> Result<(), EngineError> {
        self.enter(EngineState::Checkpointing);
        if let Err(e) = self.checkpoint.save(post.created_at) {
            error!(post_id = %post.id, error = %e, "Cannot persist checkpoint, aborting run");
            self.enter(EngineState::Aborted);
            return Err(e.into());
        }
        summary.checkpoint = Some(post.created_at);
        Ok(())
    }

    /// Inter-post delay; returns early on interrupt.
    async fn pace(&self, dry_run: bool) {
        if dry_run || self.post_interval.is_zero() {
            return;
        }
        tokio::select! {
            () = self.cancel.cancelled() => {}
            () = tokio::time::sleep(self.post_interval) => {}
        }
    }

    /// Publish `post` and, first, whatever its quote chain needs.
    async fn process(
        &mut self,
        post: &CanonicalPost,
        dry_run: bool,
        summary: &mut RunSummary,
    ) -> Result<Option<StrongRef>, PostError> {
        self.enter(EngineState::Transforming);
        let archive = self.archive;
        let plan = quote::plan(post, archive, |id| self.lookup(id), self.max_quote_depth);
        if plan.dropped.is_some() {
            summary.dropped_quotes += 1;
        }

        let mut embedded = plan.anchor;
        for quoted in plan.to_publish {
            debug!(post_id = %post.id, quoted_id = %quoted.id, "Publishing quoted post first");
            match self.publish(quoted, embedded.take(), dry_run).await {
                Ok(Some(created)) => {
                    summary.quotes_published += 1;
                    embedded = Some(created);
                    self.pace(dry_run).await;
                }
                Ok(None) => {
                    warn!(post_id = %post.id, quoted_id = %quoted.id, "Quoted post has nothing to publish, dropping quote");
                    summary.dropped_quotes += 1;
                }
                Err(PostError::Failed(reason)) => {
                    warn!(post_id = %post.id, quoted_id = %quoted.id, reason = %reason, "Quoted post failed, dropping quote");
                    summary.dropped_quotes += 1;
                }
                Err(e) => return Err(e),
            }
        }

        self.publish(post, embedded, dry_run).await
    }

    /// Transform, attach media, and submit one post. `Ok(None)` means there
    /// was nothing to submit.
    async fn publish(
        &mut self,
        post: &CanonicalPost,
        quote: Option<StrongRef>,
        dry_run: bool,
    ) -> Result<Option<StrongRef>, PostError> {
        self.enter(EngineState::Transforming);
        let transformed = transform(post, quote.is_some(), &self.transform);
        if transformed.truncated {
            debug!(post_id = %post.id, "Text truncated to fit");
        }

        let destination = (!dry_run).then_some(self.destination);

        self.enter(EngineState::Uploading);
        let attached = self
            .media
            .attach(post, self.archive.media_dir(), destination, &self.cancel)
            .await?;

        if transformed.text.is_empty() && attached.embed.is_none() && quote.is_none() {
            return Ok(None);
        }

        let facets = build_facets(&transformed.spans, destination, &self.retry, &self.cancel).await?;
        let created_at = if self.backdate { post.created_at } else { Utc::now() };
        let record = PostRecord::new(
            transformed.text,
            created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            facets,
            Embed::compose(attached.embed, quote),
        );

        self.enter(EngineState::Submitting);
        let created = match destination {
            None => {
                info!(
                    post_id = %post.id,
                    text = %record.text,
                    facets = record.facets.len(),
                    embed = ?record.embed.as_ref().map(embed_kind),
                    "Dry run: would publish"
                );
                StrongRef {
                    uri: format!("at://dry-run/{POST_COLLECTION}/{}", post.id),
                    cid: "dry-run".to_string(),
                }
            }
            Some(destination) => {
                // A lost response may still mean a committed record, so only
                // an outright refusal is sent again.
                let created = self
                    .retry
                    .run_when(
                        &self.cancel,
                        "create_post",
                        ClientError::is_safe_to_replay,
                        || destination.create_post(&record),
                    )
                    .await
                    .map_err(|e| {
                        if matches!(&e, RetryError::Failed(c) if c.is_retryable()) {
                            warn!(post_id = %post.id, error = %e, "Record may exist despite the error, check the account before the next run");
                        }
                        e
                    })?;
                self.ledger
                    .record(PublishRecord {
                        source_post_id: post.id.clone(),
                        destination: created.clone(),
                        published_at: Utc::now(),
                    })
                    .map_err(|source| {
                        PostError::Fatal(EngineError::Ledger {
                            path: self.ledger.path().map(Path::to_path_buf).unwrap_or_default(),
                            source,
                        })
                    })?;
                created
            }
        };

        self.published.insert(post.id.clone(), created.clone());
        Ok(Some(created))
    }
}

fn embed_kind(embed: &Embed) -> &'static str {
    match embed {
        Embed::Images { .. } => "images",
        Embed::Video { .. } => "video",
        Embed::Record { .. } => "record",
        Embed::RecordWithMedia { .. } => "recordWithMedia",
    }
}
