pub mod chunk_store;
pub mod document_store;
pub mod layout;
pub mod metadata;
pub mod payload_store;
pub mod stats_store;
