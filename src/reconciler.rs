//! Periodic view count reconciliation
//!
//! Reads only sync a post's view count into the repository when they miss the
//! cache. A hot post can therefore stay cached for a full TTL while its
//! column falls behind. The reconciler closes that gap on a fixed interval by
//! paging through every post and copying its live counter into the column.

use std::time::Duration;

use futures::StreamExt;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info};

use crate::{FastStore, PostError, PostRepository, PostService};

/// Handle to a running reconciliation loop
pub struct ViewCountReconciler {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ViewCountReconciler {
    /// Start the loop on the current tokio runtime.
    ///
    /// The first pass runs one `reconcile_interval` after spawning.
    pub fn spawn<R, S>(service: PostService<R, S>) -> Self
    where
        R: PostRepository,
        S: FastStore,
    {
        let period = service
            .cache()
            .config()
            .reconcile_interval
            .max(Duration::from_millis(1));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match Self::run_once(&service).await {
                            Ok(synced) => debug!("View count reconciliation synced {} posts", synced),
                            Err(e) => error!("View count reconciliation pass failed: {}", e),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("View count reconciler stopped");
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// One full pass over all posts; returns how many columns were written.
    ///
    /// Replays deferred cache purges first. Stops at the first failing page
    /// or counter read.
    pub async fn run_once<R, S>(service: &PostService<R, S>) -> Result<usize, PostError>
    where
        R: PostRepository,
        S: FastStore,
    {
        let replayed = service.cache().retry_pending().await?;
        if replayed > 0 {
            info!("Replayed deferred cache purges for {} posts", replayed);
        }

        let config = service.cache().config();
        let batch_size = config.reconcile_batch_size.max(1);
        let concurrency = config.reconcile_concurrency.max(1);

        let mut synced = 0;
        let mut offset = 0;
        loop {
            let page = service.list(offset, batch_size).await?;
            let page_len = page.len();

            let results: Vec<Result<Option<u64>, PostError>> =
                futures::stream::iter(page.into_iter().map(|post| post.id))
                    .map(|id| service.sync_view_count(id))
                    .buffer_unordered(concurrency)
                    .collect()
                    .await;
            for result in results {
                if result?.is_some() {
                    synced += 1;
                }
            }

            if (page_len as i64) < batch_size {
                return Ok(synced);
            }
            offset += batch_size;
        }
    }

    /// Signal the loop to stop and wait for it to finish its current pass
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!("View count reconciler task failed: {}", e);
        }
    }
}
