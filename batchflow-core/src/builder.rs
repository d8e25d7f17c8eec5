//! A [Builder] is the unit of work of one pipeline run: where the items come from, how each item is
//! transformed and how the transformed items are written to the targets.

use std::pin::Pin;

use futures::Stream;

use crate::Result;

/// Lazily evaluated, finite sequence of source items.
pub type ItemStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Set of items to be implemented by a builder to be driven by the pipeline.
#[trait_variant::make(Builder: Send)]
pub trait LocalBuilder {
    /// Unit of work handed to [LocalBuilder::process_item].
    type Item: Send + 'static;
    /// Result of [LocalBuilder::process_item], handed to [LocalBuilder::update_targets] in chunks.
    type Output: Send + 'static;

    /// Number of items transformed concurrently and committed together. Must be positive.
    fn chunk_size(&self) -> usize;

    /// Connects the sources and targets. It may be called more than once.
    async fn connect(&self) -> Result<()>;

    /// Returns the items to process.
    async fn get_items(&self) -> Result<ItemStream<'_, Self::Item>>;

    /// Transforms one item. It runs on the worker pool, so it should be a pure function of the item.
    fn process_item(&self, item: Self::Item) -> Result<Self::Output>;

    /// Writes one chunk of transformed items to the targets.
    async fn update_targets(&self, items: Vec<Self::Output>) -> Result<()>;
}
