//! Language detection by file extension.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Languages accepted for indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
    Java,
    C,
    Cpp,
    CSharp,
    Php,
    Ruby,
    Swift,
    Kotlin,
    Scala,
    R,
    Shell,
    Markdown,
    Text,
    Json,
    Yaml,
    Xml,
    Html,
    Css,
}

/// Grammars the syntax-aware chunker can parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grammar {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
}

/// File extensions picked up by discovery.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "jsx", "tsx", "java", "go", "rs", "cpp", "c", "h", "hpp", "cs", "php", "rb",
    "swift", "kt", "scala", "r", "md", "txt", "json", "yaml", "yml", "xml", "html", "css", "scss",
    "sass", "sh", "bash",
];

impl Language {
    /// Detect from a file extension; `None` means the file is not indexed.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        Self::from_extension(&ext)
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        let language = match ext {
            "rs" => Self::Rust,
            "py" => Self::Python,
            "js" | "jsx" => Self::JavaScript,
            "ts" => Self::TypeScript,
            "tsx" => Self::Tsx,
            "go" => Self::Go,
            "java" => Self::Java,
            "c" | "h" => Self::C,
            "cpp" | "hpp" => Self::Cpp,
            "cs" => Self::CSharp,
            "php" => Self::Php,
            "rb" => Self::Ruby,
            "swift" => Self::Swift,
            "kt" => Self::Kotlin,
            "scala" => Self::Scala,
            "r" => Self::R,
            "sh" | "bash" => Self::Shell,
            "md" => Self::Markdown,
            "txt" => Self::Text,
            "json" => Self::Json,
            "yaml" | "yml" => Self::Yaml,
            "xml" => Self::Xml,
            "html" => Self::Html,
            "css" | "scss" | "sass" => Self::Css,
            _ => return None,
        };
        Some(language)
    }

    /// Stable lowercase tag stored in chunk metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::Go => "go",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
            Self::Php => "php",
            Self::Ruby => "ruby",
            Self::Swift => "swift",
            Self::Kotlin => "kotlin",
            Self::Scala => "scala",
            Self::R => "r",
            Self::Shell => "shell",
            Self::Markdown => "markdown",
            Self::Text => "text",
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Xml => "xml",
            Self::Html => "html",
            Self::Css => "css",
        }
    }

    /// Grammar for syntax-aware chunking, if one is bundled.
    pub fn grammar(&self) -> Option<Grammar> {
        match self {
            Self::Rust => Some(Grammar::Rust),
            Self::Python => Some(Grammar::Python),
            Self::JavaScript => Some(Grammar::JavaScript),
            Self::TypeScript => Some(Grammar::TypeScript),
            Self::Tsx => Some(Grammar::Tsx),
            Self::Go => Some(Grammar::Go),
            _ => None,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Grammar {
    pub fn tree_sitter_language(&self) -> tree_sitter::Language {
        match self {
            Grammar::Rust => tree_sitter_rust::LANGUAGE.into(),
            Grammar::Python => tree_sitter_python::LANGUAGE.into(),
            Grammar::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Grammar::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Grammar::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Grammar::Go => tree_sitter_go::LANGUAGE.into(),
        }
    }
}
