pub mod jsonl;
pub mod qdrant;

pub use jsonl::JsonlStore;
pub use qdrant::QdrantStore;
