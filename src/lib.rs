pub mod annotate;
pub mod chunker;
pub mod core;
pub mod crawl;
pub mod index;
pub mod markify;
pub mod mcp;
pub mod pipeline;
pub mod tools;

// --- Primary core exports ---
pub use self::core::error::{PipelineError, ToolError};
pub use self::core::types;
pub use self::core::types::*;
pub use self::core::AppState;

// --- Convenience module paths ---
pub use crawl::urls;
pub use index::{builder as index_builder, retriever};
pub use pipeline::{Document, PipelineState};
