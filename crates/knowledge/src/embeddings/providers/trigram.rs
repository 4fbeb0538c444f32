//! Hashed character-trigram embeddings over identifier-aware tokens.

use crate::embeddings::provider::EmbeddingProvider;
use crate::tokens::{compound_words, identifier_tokens};
use repomind_core::AppResult;
use std::collections::HashMap;

const MODEL_NAME: &str = "trigram-v2";

/// Trigram-based embedding provider for local, offline operation.
///
/// Text is split into identifier tokens (`getUserName` becomes `get`,
/// `user`, `name`); each token contributes its padded character trigrams and
/// itself to hashed dimensions. The result is deterministic and
/// content-dependent, so related vocabulary (`authenticate`,
/// `authentication`) lands close together without a neural model.
#[derive(Debug)]
pub struct TrigramProvider {
    dimensions: usize,
}

impl TrigramProvider {
    /// Create a new trigram provider with specified dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn generate_trigram_embedding(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];
        if self.dimensions == 0 {
            return embedding;
        }

        let mut token_freq: HashMap<String, u32> = HashMap::new();
        for token in identifier_tokens(text)
            .into_iter()
            .chain(compound_words(text))
        {
            *token_freq.entry(token).or_insert(0) += 1;
        }

        for (token, freq) in &token_freq {
            let freq = *freq as f32;

            let padded: Vec<char> = std::iter::once('^')
                .chain(token.chars())
                .chain(std::iter::once('$'))
                .collect();
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                let idx = (fnv1a(trigram.as_bytes()) % self.dimensions as u64) as usize;
                embedding[idx] += freq.sqrt();
            }

            let idx = (fnv1a(token.as_bytes()) % self.dimensions as u64) as usize;
            embedding[idx] += freq;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }

        embedding
    }
}

/// FNV-1a, stable across platforms and releases.
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[async_trait::async_trait]
impl EmbeddingProvider for TrigramProvider {
    fn provider_name(&self) -> &str {
        "trigram"
    }

    fn model_name(&self) -> &str {
        MODEL_NAME
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| self.generate_trigram_embedding(text))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::cosine_similarity;

    #[tokio::test]
    async fn test_trigram_provider_embed_single() {
        let provider = TrigramProvider::new(384);
        let embedding = provider.embed("fn load_config(path: &Path)").await.unwrap();

        assert_eq!(embedding.len(), 384);

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_trigram_provider_deterministic() {
        let provider = TrigramProvider::new(384);
        let text = "deterministic test";

        let embedding1 = provider.embed(text).await.unwrap();
        let embedding2 = provider.embed(text).await.unwrap();

        for (a, b) in embedding1.iter().zip(&embedding2) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn test_related_vocabulary_is_closer() {
        let provider = TrigramProvider::new(384);
        let query = provider.embed("How is authentication implemented?").await.unwrap();
        let login = provider
            .embed("function login(user, password) { // Authenticate the user")
            .await
            .unwrap();
        let slug = provider
            .embed("def slugify(title): return title.lower().replace(' ', '-')")
            .await
            .unwrap();

        assert!(cosine_similarity(&query, &login) > cosine_similarity(&query, &slug));
    }

    #[tokio::test]
    async fn test_trigram_provider_empty_text() {
        let provider = TrigramProvider::new(384);
        let embedding = provider.embed("").await.unwrap();

        assert_eq!(embedding.len(), 384);
        assert!(embedding.iter().all(|&x| x == 0.0));
    }

    #[tokio::test]
    async fn test_trigram_provider_utf8_safety() {
        let provider = TrigramProvider::new(384);
        let text = "Gamedex é um aplicativo 🎮 brasileiro para gerenciar jogos!";
        let embedding = provider.embed(text).await.unwrap();

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
    }
}
