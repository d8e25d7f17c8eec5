use std::num::NonZeroUsize;
use std::sync::Arc;

use futures::future::join_all;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::builder::Builder;
use crate::chunker::chunk_stream;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::mapper::{BoundedMap, PendingTransform, Transform};
use crate::worker::WorkerPool;

/// Counters of a completed pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Items transformed and handed to the targets.
    pub items: u64,
    /// Chunks committed to the targets.
    pub chunks: u64,
}

/// Runs the builder to completion.
///
/// The items of the builder are transformed on a worker pool of `settings.num_workers` threads with
/// at most `chunk_size` transforms in flight. Results are collected per chunk of `chunk_size` items
/// and every chunk is committed before the next one is started, so chunks are committed in source
/// order even though the transforms complete in any order.
///
/// Error handling: a failed transform fails the run. The other transforms of the failing chunk are
/// awaited and discarded, the chunk is not committed and the error is returned. Chunks committed
/// before the failure stay committed. The same holds for a cancelled token, which is checked between
/// chunks.
pub async fn run<B>(
    builder: Arc<B>,
    settings: &Settings,
    cln_token: CancellationToken,
) -> Result<RunSummary>
where
    B: Builder + Send + Sync + 'static,
{
    let chunk_size = NonZeroUsize::new(builder.chunk_size())
        .ok_or_else(|| Error::Config("chunk size must be greater than 0".to_string()))?;
    settings.validate()?;

    builder.connect().await?;
    let items = builder.get_items().await?;

    let workers = WorkerPool::new(settings.num_workers)?;
    let transform: Transform<B::Item, B::Output> = {
        let builder = Arc::clone(&builder);
        Arc::new(move |item: B::Item| builder.process_item(item))
    };

    let mapper = BoundedMap::new(items, transform, &workers, chunk_size);
    let chunks = chunk_stream(mapper, chunk_size);
    tokio::pin!(chunks);

    let mut summary = RunSummary::default();
    info!(chunk_size = chunk_size.get(), "Starting pipeline run");

    loop {
        if cln_token.is_cancelled() {
            info!(?summary, "Pipeline run cancelled");
            return Err(Error::Cancelled(format!(
                "stopped after committing {} chunks",
                summary.chunks
            )));
        }

        let Some(chunk) = chunks.next().await else {
            break;
        };

        let outputs = collect_chunk(chunk).await?;
        let num_outputs = outputs.len() as u64;
        builder.update_targets(outputs).await?;

        summary.items += num_outputs;
        summary.chunks += 1;
        info!(
            chunk = summary.chunks,
            items = num_outputs,
            total_items = summary.items,
            "Committed chunk"
        );
    }

    info!(?summary, "Pipeline run completed");
    Ok(summary)
}

/// Waits for every transform of the chunk and returns the outputs in submission order. Every transform
/// is awaited even after one failed, so no work of the chunk is still running when the error is
/// returned; the first error in submission order is returned.
async fn collect_chunk<O>(chunk: Vec<Result<PendingTransform<O>>>) -> Result<Vec<O>> {
    let results = join_all(chunk.into_iter().map(|pending| async move {
        let pending = pending?;
        let index = pending.index();
        pending.resolve().await.inspect_err(|e| {
            error!(index, ?e, "Transform failed");
        })
    }))
    .await;

    results.into_iter().collect()
}
