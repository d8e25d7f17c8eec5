use std::num::NonZeroUsize;

use futures::Stream;
use futures::StreamExt;
use futures::stream::Chunks;

/// Collects the elements of a stream into groups of `size` elements, in stream order. The last group
/// holds whatever is left and may be shorter, it is never empty. Only one group is held in memory.
pub(crate) fn chunk_stream<S: Stream>(stream: S, size: NonZeroUsize) -> Chunks<S> {
    stream.chunks(size.get())
}

/// Synchronous counterpart of [chunk_stream] for values that are already in memory.
pub(crate) fn group_slice<T: Clone>(items: &[T], size: NonZeroUsize) -> Vec<Vec<T>> {
    items.chunks(size.get()).map(<[T]>::to_vec).collect()
}
