pub mod fingerprint;
pub mod indexing_coordinator;
pub mod metadata_store;
pub mod passages;
pub mod retriever;
pub mod selector;
pub mod vector_index;
