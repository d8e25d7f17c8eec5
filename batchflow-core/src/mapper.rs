use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures::Stream;
use pin_project::pin_project;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::PollSemaphore;

use crate::builder::ItemStream;
use crate::error::{Error, Result};
use crate::worker::WorkerPool;

/// The transform applied to every source item. It runs on the worker pool, so it must not rely on
/// state shared with the driver.
pub(crate) type Transform<T, O> = Arc<dyn Fn(T) -> Result<O> + Send + Sync>;

/// A transform that has been submitted to the worker pool but whose result has not been collected.
pub(crate) struct PendingTransform<O> {
    /// Position of the item in the source sequence.
    index: u64,
    handle: JoinHandle<Result<O>>,
}

impl<O> PendingTransform<O> {
    pub(crate) fn index(&self) -> u64 {
        self.index
    }

    /// Waits for the transform to finish. A failed or panicked transform is reported with the
    /// position of its source item.
    pub(crate) async fn resolve(self) -> Result<O> {
        let index = self.index;
        match self.handle.await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(Error::Transform(format!("item {index} failed: {e}"))),
            Err(e) => Err(Error::Transform(format!(
                "item {index} did not complete: {e}"
            ))),
        }
    }
}

/// BoundedMap submits a transform to the worker pool for every item of the source and yields the
/// pending transforms, never having more than `capacity` of them running at the same time.
///
/// A permit is acquired before the next source item is pulled, and it travels with the item into the
/// worker task, so it is released the moment the transform finishes (successfully, with an error, or
/// by panicking) rather than when its result is collected. That keeps the source being read while the
/// workers are busy.
#[pin_project]
pub(crate) struct BoundedMap<'a, T, O> {
    source: ItemStream<'a, T>,
    transform: Transform<T, O>,
    workers: &'a WorkerPool,
    semaphore: PollSemaphore,
    permit: Option<OwnedSemaphorePermit>,
    submitted: u64,
    done: bool,
}

impl<'a, T, O> BoundedMap<'a, T, O>
where
    T: Send + 'static,
    O: Send + 'static,
{
    pub(crate) fn new(
        source: ItemStream<'a, T>,
        transform: Transform<T, O>,
        workers: &'a WorkerPool,
        capacity: NonZeroUsize,
    ) -> Self {
        Self {
            source,
            transform,
            workers,
            semaphore: PollSemaphore::new(Arc::new(Semaphore::new(capacity.get()))),
            permit: None,
            submitted: 0,
            done: false,
        }
    }
}

impl<T, O> Stream for BoundedMap<'_, T, O>
where
    T: Send + 'static,
    O: Send + 'static,
{
    type Item = Result<PendingTransform<O>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }

        // back pressure, wait for capacity before pulling the next item
        if this.permit.is_none() {
            match ready!(this.semaphore.poll_acquire(cx)) {
                Some(permit) => *this.permit = Some(permit),
                None => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(Error::WorkerPool(
                        "back pressure semaphore is closed".to_string(),
                    ))));
                }
            }
        }

        match ready!(this.source.as_mut().poll_next(cx)) {
            None => {
                *this.done = true;
                *this.permit = None;
                Poll::Ready(None)
            }
            Some(Err(e)) => {
                *this.done = true;
                *this.permit = None;
                Poll::Ready(Some(Err(e)))
            }
            Some(Ok(item)) => {
                let permit = this.permit.take();
                let transform = Arc::clone(this.transform);
                let index = *this.submitted;
                *this.submitted += 1;

                let handle = this.workers.submit(move || {
                    let _permit = permit;
                    transform(item)
                });
                Poll::Ready(Some(Ok(PendingTransform { index, handle })))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::StreamExt;

    use super::*;

    fn source(items: Vec<Result<u64>>) -> ItemStream<'static, u64> {
        Box::pin(futures::stream::iter(items))
    }

    fn capacity(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_map_yields_one_pending_transform_per_item() {
        let workers = WorkerPool::new(2).unwrap();
        let transform: Transform<u64, u64> = Arc::new(|x: u64| Ok(x * 10));
        let mapper = BoundedMap::new(
            source((0..5).map(Ok).collect()),
            transform,
            &workers,
            capacity(2),
        );

        let pending: Vec<_> = mapper.collect().await;
        assert_eq!(pending.len(), 5);

        let mut outputs = Vec::new();
        for (i, p) in pending.into_iter().enumerate() {
            let p = p.unwrap();
            assert_eq!(p.index(), i as u64);
            outputs.push(p.resolve().await.unwrap());
        }
        assert_eq!(outputs, vec![0, 10, 20, 30, 40]);
    }

    #[tokio::test]
    async fn test_back_pressure_caps_in_flight_transforms() {
        let workers = WorkerPool::new(8).unwrap();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));

        let transform: Transform<u64, u64> = {
            let in_flight = Arc::clone(&in_flight);
            let max_in_flight = Arc::clone(&max_in_flight);
            Arc::new(move |x: u64| {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_in_flight.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(5));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(x)
            })
        };

        let mapper = BoundedMap::new(
            source((0..40).map(Ok).collect()),
            transform,
            &workers,
            capacity(3),
        );
        tokio::pin!(mapper);

        // collect results without waiting for them, only the permits throttle the mapper
        let mut pending = Vec::new();
        while let Some(p) = mapper.next().await {
            pending.push(p.unwrap());
        }
        for p in pending {
            p.resolve().await.unwrap();
        }

        let max = max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 3, "{max} transforms were in flight");
        assert!(max >= 1);
    }

    #[tokio::test]
    async fn test_failure_is_reported_and_capacity_released() {
        let workers = WorkerPool::new(2).unwrap();
        let transform: Transform<u64, u64> = Arc::new(|x: u64| {
            if x == 1 {
                return Err(Error::Builder("bad item".to_string()));
            }
            if x == 2 {
                panic!("transform panicked");
            }
            Ok(x)
        });

        // capacity of one: a permit leaked by a failed transform would hang the test
        let mapper = BoundedMap::new(
            source((0..5).map(Ok).collect()),
            transform,
            &workers,
            capacity(1),
        );
        tokio::pin!(mapper);

        let mut results = Vec::new();
        while let Some(p) = mapper.next().await {
            results.push(p.unwrap().resolve().await);
        }

        assert_eq!(results.len(), 5);
        assert!(
            matches!(&results[1], Err(Error::Transform(msg)) if msg == "item 1 failed: Builder Error - bad item")
        );
        assert!(
            matches!(&results[2], Err(Error::Transform(msg)) if msg.starts_with("item 2 did not complete"))
        );
        assert_eq!(results[4].as_ref().unwrap(), &4);
    }

    #[tokio::test]
    async fn test_source_error_ends_the_map() {
        let workers = WorkerPool::new(1).unwrap();
        let transform: Transform<u64, u64> = Arc::new(|x: u64| Ok(x));
        let mapper = BoundedMap::new(
            source(vec![
                Ok(1),
                Err(Error::Source("cursor lost".to_string())),
                Ok(3),
            ]),
            transform,
            &workers,
            capacity(4),
        );

        let items: Vec<_> = mapper.collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(&items[1], Err(Error::Source(_))));
    }

    #[tokio::test]
    async fn test_empty_source() {
        let workers = WorkerPool::new(1).unwrap();
        let transform: Transform<u64, u64> = Arc::new(|x: u64| Ok(x));
        let mapper = BoundedMap::new(source(vec![]), transform, &workers, capacity(4));
        tokio::pin!(mapper);

        assert!(mapper.next().await.is_none());
        // stays exhausted
        assert!(mapper.next().await.is_none());
    }
}
