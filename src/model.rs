use crate::error::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Version of the analysis document layout. Consumers built against a
/// different version must refuse the document.
pub const SCHEMA_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    JavaScript,
    TypeScript,
    Tsx,
    Python,
    Go,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::Python => "python",
            Language::Go => "go",
        }
    }

    /// Separator joining fq_name segments.
    pub fn separator(self) -> &'static str {
        match self {
            Language::Rust => "::",
            _ => ".",
        }
    }

    pub fn is_ecmascript(self) -> bool {
        matches!(
            self,
            Language::JavaScript | Language::TypeScript | Language::Tsx
        )
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Class,
    Struct,
    Enum,
    Interface,
    Trait,
    Module,
    Namespace,
    Function,
    Method,
}

impl SymbolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SymbolKind::Class => "class",
            SymbolKind::Struct => "struct",
            SymbolKind::Enum => "enum",
            SymbolKind::Interface => "interface",
            SymbolKind::Trait => "trait",
            SymbolKind::Module => "module",
            SymbolKind::Namespace => "namespace",
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
        }
    }

    pub fn is_callable(self) -> bool {
        matches!(self, SymbolKind::Function | SymbolKind::Method)
    }

    pub fn is_type(self) -> bool {
        matches!(
            self,
            SymbolKind::Class
                | SymbolKind::Struct
                | SymbolKind::Enum
                | SymbolKind::Interface
                | SymbolKind::Trait
        )
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source range. Lines and columns are 1-indexed; `end_col` is exclusive.
/// Columns count bytes within the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl Span {
    pub fn new(start_line: u32, start_col: u32, end_line: u32, end_col: u32) -> Self {
        Self {
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    pub fn start(&self) -> (u32, u32) {
        (self.start_line, self.start_col)
    }

    pub fn contains(&self, other: &Span) -> bool {
        (self.start_line, self.start_col) <= (other.start_line, other.start_col)
            && (other.end_line, other.end_col) <= (self.end_line, self.end_col)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.start_line, self.start_col, self.end_line, self.end_col
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub language: Language,
    #[serde(rename = "hash")]
    pub content_hash: String,
    pub byte_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: String,
    pub name: String,
    pub kind: SymbolKind,
    pub file: String,
    pub span: Span,
    pub fq_name: String,
    pub container: Option<String>,
    pub is_exported: bool,
    pub is_entrypoint: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEdge {
    pub id: String,
    pub caller_id: String,
    pub callee_name: String,
    pub callee_id: Option<String>,
    pub file: String,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisStats {
    pub file_count: usize,
    pub symbol_count: usize,
    pub call_count: usize,
    pub entrypoint_count: usize,
    pub reused_cache_files: usize,
    pub reanalyzed_files: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub schema_version: String,
    pub root: String,
    pub generated_at: String,
    pub stats: AnalysisStats,
    pub files: Vec<FileRecord>,
    pub symbols: Vec<Symbol>,
    pub calls: Vec<CallEdge>,
    pub entrypoints: Vec<String>,
}

#[derive(Deserialize)]
struct VersionHeader {
    schema_version: Option<String>,
}

impl AnalysisResult {
    /// Decodes a document, refusing any schema version other than
    /// [`SCHEMA_VERSION`] before looking at the rest of the structure.
    pub fn from_json(raw: &str) -> Result<Self, SchemaError> {
        let header: VersionHeader = serde_json::from_str(raw).map_err(SchemaError::Malformed)?;
        let found = header.schema_version.unwrap_or_default();
        if found != SCHEMA_VERSION {
            return Err(SchemaError::VersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found,
            });
        }
        serde_json::from_str(raw).map_err(SchemaError::Malformed)
    }

    pub fn to_json(&self, pretty: bool) -> serde_json::Result<String> {
        if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        }
    }

    pub fn symbol(&self, id: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|symbol| symbol.id == id)
    }

    pub fn symbol_by_fq(&self, fq_name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|symbol| symbol.fq_name == fq_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// Non-fatal problem attached to one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub path: String,
    pub severity: Severity,
    pub message: String,
    pub span: Option<Span>,
}

impl Diagnostic {
    pub fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            severity: Severity::Warning,
            message: message.into(),
            span: None,
        }
    }

    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            severity: Severity::Error,
            message: message.into(),
            span: None,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.span {
            Some(span) => write!(
                f,
                "{}:{}:{}: {}",
                self.path, span.start_line, span.start_col, self.message
            ),
            None => write!(f, "{}: {}", self.path, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AnalysisResult {
        AnalysisResult {
            schema_version: SCHEMA_VERSION.to_string(),
            root: "/repo".to_string(),
            generated_at: "2024-01-01T00:00:00Z".to_string(),
            stats: AnalysisStats::default(),
            files: Vec::new(),
            symbols: Vec::new(),
            calls: Vec::new(),
            entrypoints: Vec::new(),
        }
    }

    #[test]
    fn wire_names_are_stable() {
        let file = FileRecord {
            path: "src/main.rs".to_string(),
            language: Language::Rust,
            content_hash: "abc".to_string(),
            byte_size: 3,
        };
        let value = serde_json::to_value(&file).unwrap();
        assert_eq!(value["hash"], "abc");
        assert_eq!(value["language"], "rust");
        assert!(value.get("content_hash").is_none());

        let edge = CallEdge {
            id: "call_1".to_string(),
            caller_id: "sym_1".to_string(),
            callee_name: "println".to_string(),
            callee_id: None,
            file: "src/main.rs".to_string(),
            span: Span::new(1, 1, 1, 5),
        };
        let value = serde_json::to_value(&edge).unwrap();
        assert!(value["callee_id"].is_null());
        assert_eq!(value["span"]["end_col"], 5);
    }

    #[test]
    fn from_json_rejects_other_versions() {
        let mut doc = sample();
        doc.schema_version = "0.9.0".to_string();
        let raw = doc.to_json(false).unwrap();
        match AnalysisResult::from_json(&raw) {
            Err(SchemaError::VersionMismatch { found, .. }) => assert_eq!(found, "0.9.0"),
            other => panic!("unexpected: {other:?}"),
        }

        let raw = sample().to_json(true).unwrap();
        assert_eq!(AnalysisResult::from_json(&raw).unwrap(), sample());
    }

    #[test]
    fn from_json_rejects_missing_version() {
        let err = AnalysisResult::from_json(r#"{"files": []}"#).unwrap_err();
        assert!(matches!(err, SchemaError::VersionMismatch { .. }));
    }

    #[test]
    fn span_containment() {
        let outer = Span::new(1, 1, 10, 2);
        assert!(outer.contains(&Span::new(2, 5, 3, 1)));
        assert!(!outer.contains(&Span::new(9, 1, 11, 1)));
    }
}
