//! Query-time candidate selection: vector retrieval followed by reranking.

mod reranker;
mod retriever;

pub use reranker::{
    create_relevance_model, HttpCrossEncoder, LexicalRelevance, Ranking, RelevanceModel, Reranker,
};
pub use retriever::{Retrieval, Retriever};
