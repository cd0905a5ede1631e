//! Per-feature value accumulation.
//!
//! Each feature key owns one [`ValueBuffer`] while a batch is parsed. The
//! buffer's [`ShapeBuilder`] records where array boundaries fell so the
//! buffered scalars can later be laid out as dense or sparse tensors.

mod shape_builder;
mod value_buffer;

pub use shape_builder::{Run, ShapeBuilder};
pub use value_buffer::{
    downcast_buffer_mut, merge_value_stores, new_value_store, ValueBuffer, ValueStore,
    ValueStoreMap,
};
