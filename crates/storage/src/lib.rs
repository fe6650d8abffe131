#![forbid(unsafe_code)]

pub mod composites;
mod store;

pub use composites::{AnyComposite, Composite, CompositeTarget, SearchIndexer, Tables, Views};
pub use store::*;
