//! Boundary-aware chunking of source files.
//!
//! Files with a bundled grammar are split at top-level definitions; module
//! level material between definitions becomes its own chunk when it is large
//! enough to be worth retrieving. Everything else, and any file the parser
//! rejects, is cut into overlapping line windows.

mod detection;
mod parser;
mod pipeline;
mod window;

pub use detection::{Grammar, Language, SUPPORTED_EXTENSIONS};
pub use parser::{DefinitionSpan, ParseError, SyntaxParser, TreeSitterParser};
pub use pipeline::{ChunkStrategy, Chunker, Chunks};
pub use window::LineWindows;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::ops::Range;

/// How a chunk's boundaries were chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Splitter {
    /// Exactly one top-level definition
    Definition,
    /// Material between definitions
    Module,
    /// Line window (fallback or oversized definition)
    Window,
}

/// A retrievable span of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// SHA-256 over path, byte range and text
    pub id: String,

    /// Repository-relative path with `/` separators
    pub path: String,

    pub byte_range: Range<usize>,

    /// 1-based inclusive line range
    pub line_range: (usize, usize),

    pub language: Language,

    pub symbol: Option<String>,

    pub text: String,

    pub splitter: Splitter,
}

impl Chunk {
    pub fn new(
        path: String,
        byte_range: Range<usize>,
        line_range: (usize, usize),
        language: Language,
        symbol: Option<String>,
        text: String,
        splitter: Splitter,
    ) -> Self {
        let id = chunk_id(&path, &byte_range, &text);
        Self {
            id,
            path,
            byte_range,
            line_range,
            language,
            symbol,
            text,
            splitter,
        }
    }

    /// Text handed to the embedding model: a short header naming the file,
    /// language and symbol, followed by the raw chunk.
    pub fn embedding_text(&self) -> String {
        let mut header = format!("path: {}\nlanguage: {}\n", self.path, self.language);
        if let Some(symbol) = &self.symbol {
            header.push_str(&format!("symbol: {}\n", symbol));
        }
        header.push('\n');
        header.push_str(&self.text);
        header
    }
}

/// Stable chunk identity.
pub fn chunk_id(path: &str, byte_range: &Range<usize>, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update([0u8]);
    hasher.update(byte_range.start.to_le_bytes());
    hasher.update(byte_range.end.to_le_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
