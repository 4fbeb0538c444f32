//! Repository ingestion: fetch, discover, chunk, embed and index.

mod discovery;
mod ingestor;
mod manifest;
mod source;
mod state;

pub use discovery::{content_hash, decode_text, discover, DiscoveredFile, Discovery};
pub use ingestor::{IngestOptions, Ingestor};
pub use manifest::{FileEntry, Manifest};
pub use source::{
    canonical_identifier, extract_repo_name, local_source, namespace_for, Checkout, GitSource,
    SourceProvider,
};
pub use state::IngestionState;
