//! Chunker: strategy dispatch and the lazy chunk sequence.

use super::detection::{Grammar, Language};
use super::parser::{DefinitionSpan, ParseError, SyntaxParser, TreeSitterParser};
use super::window::LineWindows;
use super::{Chunk, Splitter};
use crate::config::ChunkingConfig;
use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;

/// Splitting strategy, chosen once per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    Syntax(Grammar),
    Window,
}

impl ChunkStrategy {
    pub fn for_language(language: Language) -> Self {
        match language.grammar() {
            Some(grammar) => Self::Syntax(grammar),
            None => Self::Window,
        }
    }
}

/// Splits files into chunks.
#[derive(Clone)]
pub struct Chunker {
    config: ChunkingConfig,
    parser: Arc<dyn SyntaxParser>,
}

impl Chunker {
    /// Chunker backed by tree-sitter.
    pub fn new(config: ChunkingConfig) -> Self {
        Self::with_parser(config, Arc::new(TreeSitterParser))
    }

    pub fn with_parser(config: ChunkingConfig, parser: Arc<dyn SyntaxParser>) -> Self {
        Self { config, parser }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Plan the chunks of one file. Parsing happens here; chunk text is
    /// materialized as the returned iterator is advanced.
    pub fn chunk(&self, path: impl Into<String>, text: String, language: Language) -> Chunks {
        let path = path.into();
        let requested = ChunkStrategy::for_language(language);

        let (strategy, segments, fallback) = match requested {
            ChunkStrategy::Syntax(grammar) => match self.parser.parse(&text, grammar) {
                Ok(definitions) => (
                    requested,
                    plan_definitions(&text, definitions, self.config.min_chunk_chars),
                    None,
                ),
                Err(err) => {
                    tracing::warn!("Parse failed for {}, using line windows: {}", path, err);
                    (ChunkStrategy::Window, plan_windows(&text), Some(err))
                }
            },
            ChunkStrategy::Window => (requested, plan_windows(&text), None),
        };

        Chunks {
            line_starts: line_starts(&text),
            path,
            language,
            text,
            segments,
            active: None,
            strategy,
            fallback,
            window_lines: self.config.window_lines,
            overlap_lines: self.config.overlap_lines,
            max_chunk_chars: self.config.max_chunk_chars,
        }
    }
}

#[derive(Debug)]
struct Segment {
    range: Range<usize>,
    symbol: Option<String>,
    splitter: Splitter,
}

#[derive(Debug)]
struct ActiveWindows {
    windows: LineWindows,
    symbol: Option<String>,
}

/// Lazy, finite sequence of chunks for one file. Owns the file text.
#[derive(Debug)]
pub struct Chunks {
    path: String,
    language: Language,
    text: String,
    line_starts: Vec<usize>,
    segments: VecDeque<Segment>,
    active: Option<ActiveWindows>,
    strategy: ChunkStrategy,
    fallback: Option<ParseError>,
    window_lines: usize,
    overlap_lines: usize,
    max_chunk_chars: usize,
}

impl Chunks {
    /// Strategy actually used after any parse fallback.
    pub fn strategy(&self) -> ChunkStrategy {
        self.strategy
    }

    /// Parse error that forced the window fallback.
    pub fn parse_fallback(&self) -> Option<&ParseError> {
        self.fallback.as_ref()
    }

    fn line_of(&self, offset: usize) -> usize {
        self.line_starts.partition_point(|&start| start <= offset)
    }

    fn build(&self, range: Range<usize>, symbol: Option<String>, splitter: Splitter) -> Chunk {
        let last_byte = range.end.saturating_sub(1).max(range.start);
        let line_range = (self.line_of(range.start), self.line_of(last_byte));
        Chunk::new(
            self.path.clone(),
            range.clone(),
            line_range,
            self.language,
            symbol,
            self.text[range].to_string(),
            splitter,
        )
    }
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        loop {
            if let Some(active) = self.active.as_mut() {
                if let Some(range) = active.windows.next_in(&self.text) {
                    let symbol = active.symbol.clone();
                    return Some(self.build(range, symbol, Splitter::Window));
                }
                self.active = None;
            }

            let segment = self.segments.pop_front()?;
            let oversized = segment.splitter == Splitter::Window
                || self.text[segment.range.clone()].chars().count() > self.max_chunk_chars;

            if oversized {
                self.active = Some(ActiveWindows {
                    windows: LineWindows::new(
                        segment.range,
                        self.window_lines,
                        self.overlap_lines,
                        self.max_chunk_chars,
                    ),
                    symbol: segment.symbol,
                });
                continue;
            }

            return Some(self.build(segment.range, segment.symbol, segment.splitter));
        }
    }
}

fn line_starts(text: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(text.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

fn plan_windows(text: &str) -> VecDeque<Segment> {
    let mut segments = VecDeque::new();
    if !text.trim().is_empty() {
        segments.push_back(Segment {
            range: 0..text.len(),
            symbol: None,
            splitter: Splitter::Window,
        });
    }
    segments
}

fn trimmed(text: &str, range: Range<usize>) -> Range<usize> {
    let slice = &text[range.clone()];
    let lead = slice.len() - slice.trim_start().len();
    let trail = slice.len() - slice.trim_end().len();
    if lead == slice.len() {
        return range.start..range.start;
    }
    (range.start + lead)..(range.end - trail)
}

fn plan_definitions(
    text: &str,
    mut definitions: Vec<DefinitionSpan>,
    min_chunk_chars: usize,
) -> VecDeque<Segment> {
    let mut segments = VecDeque::new();

    if definitions.is_empty() {
        let range = trimmed(text, 0..text.len());
        if !range.is_empty() {
            segments.push_back(Segment {
                range,
                symbol: None,
                splitter: Splitter::Module,
            });
        }
        return segments;
    }

    definitions.sort_by_key(|d| d.byte_range.start);

    let push_module = |segments: &mut VecDeque<Segment>, gap: Range<usize>| {
        let range = trimmed(text, gap);
        let weight = text[range.clone()]
            .chars()
            .filter(|c| !c.is_whitespace())
            .count();
        if weight > 0 && weight >= min_chunk_chars {
            segments.push_back(Segment {
                range,
                symbol: None,
                splitter: Splitter::Module,
            });
        }
    };

    let mut cursor = 0;
    for definition in definitions {
        let range = definition.byte_range;
        if range.start < cursor || range.end > text.len() {
            continue;
        }
        push_module(&mut segments, cursor..range.start);
        if !text[range.clone()].trim().is_empty() {
            segments.push_back(Segment {
                range: range.clone(),
                symbol: definition.symbol,
                splitter: Splitter::Definition,
            });
        }
        cursor = range.end;
    }
    push_module(&mut segments, cursor..text.len());

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    const PYTHON_SAMPLE: &str = "import os


def alpha(x):
    return x + 1


class Beta:
    def method(self):
        return 1


def gamma():
    pass
";

    fn chunker() -> Chunker {
        Chunker::new(ChunkingConfig::default())
    }

    #[test]
    fn test_boundaries_match_definition_spans() {
        let chunks: Vec<Chunk> = chunker()
            .chunk("pkg/sample.py", PYTHON_SAMPLE.to_string(), Language::Python)
            .collect();

        let lines: Vec<(usize, usize)> = chunks.iter().map(|c| c.line_range).collect();
        assert_eq!(lines, vec![(4, 5), (8, 10), (13, 14)]);

        let symbols: Vec<Option<&str>> = chunks.iter().map(|c| c.symbol.as_deref()).collect();
        assert_eq!(symbols, vec![Some("alpha"), Some("Beta"), Some("gamma")]);

        let definitions = TreeSitterParser.parse(PYTHON_SAMPLE, Grammar::Python).unwrap();
        for (chunk, definition) in chunks.iter().zip(&definitions) {
            assert_eq!(chunk.byte_range, definition.byte_range);
            assert_eq!(chunk.text, &PYTHON_SAMPLE[definition.byte_range.clone()]);
            assert_eq!(chunk.splitter, Splitter::Definition);
        }
    }

    #[test]
    fn test_module_material_kept_when_large_enough() {
        let code = "// Session handling for the HTTP layer and its helpers.\nconst crypto = require('crypto');\n\nfunction login(user) {\n  return user;\n}\n";
        let chunks: Vec<Chunk> = chunker()
            .chunk("auth.js", code.to_string(), Language::JavaScript)
            .collect();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].splitter, Splitter::Module);
        assert_eq!(chunks[0].symbol, None);
        assert_eq!(chunks[0].line_range, (1, 2));
        assert_eq!(chunks[1].symbol.as_deref(), Some("login"));
    }

    #[test]
    fn test_parse_failure_falls_back_to_windows() {
        let broken = "def broken(:\n    pass\n".repeat(3);
        let chunks = chunker().chunk("bad.py", broken.clone(), Language::Python);
        assert!(chunks.parse_fallback().is_some());
        assert_eq!(chunks.strategy(), ChunkStrategy::Window);

        let collected: Vec<Chunk> = chunks.collect();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].splitter, Splitter::Window);
        assert_eq!(collected[0].text, broken);
    }

    #[test]
    fn test_unsupported_language_uses_windows() {
        let text: String = (1..=90).map(|i| format!("row {}\n", i)).collect();
        let chunks: Vec<Chunk> = chunker()
            .chunk("notes.md", text, Language::Markdown)
            .collect();

        let lines: Vec<(usize, usize)> = chunks.iter().map(|c| c.line_range).collect();
        assert_eq!(lines, vec![(1, 40), (31, 70), (61, 90)]);
    }

    #[test]
    fn test_oversized_definition_is_windowed_with_symbol() {
        let body: String = (0..200)
            .map(|i| format!("    let value_{} = {};\n", i, i))
            .collect();
        let code = format!("fn huge() {{\n{}}}\n", body);
        let chunks: Vec<Chunk> = chunker()
            .chunk("src/huge.rs", code, Language::Rust)
            .collect();

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(chunk.symbol.as_deref(), Some("huge"));
            assert_eq!(chunk.splitter, Splitter::Window);
        }
        assert_eq!(chunks[0].line_range.0, 1);
    }

    #[test]
    fn test_single_long_line_respects_max_chunk_chars() {
        let entries: Vec<String> = (0..1200)
            .map(|i| format!("\"key_{}\": {}", i, i))
            .collect();
        let json = format!("{{{}}}", entries.join(", "));
        let chunks: Vec<Chunk> = chunker()
            .chunk("data.json", json.clone(), Language::Json)
            .collect();

        let max = ChunkingConfig::default().max_chunk_chars;
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= max);
            assert_eq!(chunk.line_range, (1, 1));
        }
        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, json);
    }

    #[test]
    fn test_file_without_definitions_is_one_module_chunk() {
        let code = "x = 1\n";
        let chunks: Vec<Chunk> = chunker()
            .chunk("settings.py", code.to_string(), Language::Python)
            .collect();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "x = 1");
        assert_eq!(chunks[0].line_range, (1, 1));
    }

    #[test]
    fn test_empty_file_has_no_chunks() {
        assert_eq!(chunker().chunk("empty.rs", String::new(), Language::Rust).count(), 0);
    }
}
