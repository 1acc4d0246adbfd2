pub mod bm25;
pub mod builder;
pub mod embedder;
pub mod retriever;
pub mod store;

pub use builder::{build_index, load_index, BuildOptions};
pub use retriever::{retrieve, RetrievalOptions, RetrievedNode};
pub use store::VectorIndex;
