pub mod discovery;
pub mod query;

pub use discovery::list_available_docs;
pub use query::query_docs;
