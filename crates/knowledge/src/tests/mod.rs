//! Cross-component tests: ingestion, retrieval, reranking and synthesis
//! wired together through `RepoMind`.

mod degradation;
mod support;
