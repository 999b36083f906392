use crate::analysis::go::GoParser;
use crate::analysis::javascript::EcmaParser;
use crate::analysis::python::PythonParser;
use crate::analysis::rust::RustParser;
use crate::model::{Diagnostic, FileRecord, Language, Span, SymbolKind};
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tree_sitter::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Restricted,
    Private,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSymbol {
    pub name: String,
    pub kind: SymbolKind,
    pub fq_name: String,
    pub span: Span,
    pub visibility: Visibility,
    /// Index of the enclosing symbol in the same fragment.
    pub container: Option<u32>,
    pub is_entrypoint: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCall {
    /// Index of the calling symbol in the same fragment.
    pub caller: u32,
    pub callee_name: String,
    pub span: Span,
}

/// A name bound in a file to a path elsewhere in the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Import {
    pub alias: String,
    pub target: String,
}

/// Per-file parse output. This is the unit the content cache stores.
///
/// `symbols[0]` is always the file module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub language: Language,
    /// Prefix under which the file's top-level members are named.
    pub scope: String,
    pub symbols: Vec<RawSymbol>,
    pub calls: Vec<RawCall>,
    pub imports: Vec<Import>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Fragment {
    /// Module-only fragment for a file that could not be parsed at all.
    pub fn fallback(file: &FileRecord, source: &[u8], message: impl Into<String>) -> Self {
        let text = String::from_utf8_lossy(source);
        let module_fq = module_fq(file.language, &file.path);
        let mut builder = FragmentBuilder::new(
            file.language,
            &file.path,
            module_fq,
            text_span(&text),
        );
        builder.diagnostic(Diagnostic::error(file.path.clone(), message));
        builder.finish(|_| false)
    }

    pub fn module(&self) -> Option<&RawSymbol> {
        self.symbols.first()
    }
}

/// Facts handed to a language's entrypoint convention.
#[derive(Debug, Clone, Copy)]
pub struct EntryCandidate<'a> {
    pub name: &'a str,
    pub kind: SymbolKind,
    /// Directly contained by the file module.
    pub at_file_scope: bool,
    /// Attributes or decorators attached to the declaration.
    pub attributes: &'a [String],
    /// File-wide markers such as a `__main__` guard or the Go package.
    pub file_markers: &'a [String],
}

pub trait LanguageParser {
    fn language(&self) -> Language;

    fn parse(&mut self, file: &FileRecord, source: &[u8]) -> Fragment;

    fn is_entrypoint(&self, candidate: &EntryCandidate<'_>) -> bool;
}

/// A declaration as seen by a language walker, before container linking.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub name: String,
    pub kind: SymbolKind,
    pub fq_name: String,
    pub span: Span,
    pub visibility: Visibility,
    pub attributes: Vec<String>,
}

/// Shared accumulator used by every language walker.
pub struct FragmentBuilder {
    language: Language,
    path: String,
    module_fq: String,
    scope: String,
    symbols: Vec<RawSymbol>,
    attributes: Vec<Vec<String>>,
    stack: Vec<u32>,
    calls: Vec<RawCall>,
    imports: Vec<Import>,
    diagnostics: Vec<Diagnostic>,
    file_markers: Vec<String>,
}

impl FragmentBuilder {
    pub fn new(language: Language, path: &str, module_fq: String, module_span: Span) -> Self {
        // Go file modules are named by file, not by package.
        let name = if language == Language::Go {
            path.rsplit('/').next().unwrap_or(path).to_string()
        } else {
            module_fq
                .rsplit(language.separator())
                .next()
                .unwrap_or(&module_fq)
                .to_string()
        };
        let module = RawSymbol {
            name,
            kind: SymbolKind::Module,
            fq_name: module_fq.clone(),
            span: module_span,
            visibility: Visibility::Public,
            container: None,
            is_entrypoint: false,
        };
        Self {
            language,
            path: path.to_string(),
            scope: module_fq.clone(),
            module_fq,
            symbols: vec![module],
            attributes: vec![Vec::new()],
            stack: vec![0],
            calls: Vec::new(),
            imports: Vec::new(),
            diagnostics: Vec::new(),
            file_markers: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn module_fq(&self) -> &str {
        &self.module_fq
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn set_scope(&mut self, scope: String) {
        self.scope = scope;
    }

    pub fn qualify(&self, parent: &str, name: &str) -> String {
        if parent.is_empty() {
            name.to_string()
        } else {
            format!("{parent}{}{name}", self.language.separator())
        }
    }

    pub fn declare(&mut self, decl: Declaration) -> u32 {
        let index = self.symbols.len() as u32;
        self.symbols.push(RawSymbol {
            name: decl.name,
            kind: decl.kind,
            fq_name: decl.fq_name,
            span: decl.span,
            visibility: decl.visibility,
            container: None,
            is_entrypoint: false,
        });
        self.attributes.push(decl.attributes);
        index
    }

    /// Makes `index` the caller of subsequently recorded calls.
    pub fn enter(&mut self, index: u32) {
        self.stack.push(index);
    }

    pub fn leave(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
        }
    }

    pub fn current(&self) -> u32 {
        self.stack.last().copied().unwrap_or(0)
    }

    pub fn call(&mut self, callee_name: String, span: Span) {
        if callee_name.is_empty() {
            return;
        }
        self.calls.push(RawCall {
            caller: self.current(),
            callee_name,
            span,
        });
    }

    pub fn import(&mut self, alias: impl Into<String>, target: impl Into<String>) {
        let alias = alias.into();
        let target = target.into();
        if alias.is_empty() || target.is_empty() || alias == "*" {
            return;
        }
        self.imports.push(Import { alias, target });
    }

    pub fn mark_file(&mut self, marker: impl Into<String>) {
        let marker = marker.into();
        if !self.file_markers.contains(&marker) {
            self.file_markers.push(marker);
        }
    }

    pub fn diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Records a diagnostic at the first error or missing node, if any.
    pub fn check_syntax(&mut self, root: Node<'_>) {
        if !root.has_error() {
            return;
        }
        let (message, at) = match first_syntax_error(root) {
            Some(node) if node.is_missing() => (format!("missing {}", node.kind()), span(node)),
            Some(node) => ("syntax error".to_string(), span(node)),
            None => ("syntax error".to_string(), span(root)),
        };
        self.diagnostics
            .push(Diagnostic::error(self.path.clone(), message).with_span(at));
    }

    /// Links containers by fq prefix and applies the entrypoint convention.
    pub fn finish(mut self, is_entrypoint: impl Fn(&EntryCandidate<'_>) -> bool) -> Fragment {
        let sep = self.language.separator();
        let mut first_by_fq: HashMap<&str, u32> = HashMap::new();
        for (index, symbol) in self.symbols.iter().enumerate() {
            first_by_fq.entry(symbol.fq_name.as_str()).or_insert(index as u32);
        }
        let mut containers = vec![None; self.symbols.len()];
        for (index, symbol) in self.symbols.iter().enumerate().skip(1) {
            let mut container = 0;
            let mut prefix = symbol.fq_name.as_str();
            while let Some((head, _)) = prefix.rsplit_once(sep) {
                prefix = head;
                if prefix == self.module_fq {
                    break;
                }
                match first_by_fq.get(prefix) {
                    Some(&found) if found as usize != index => {
                        container = found;
                        break;
                    }
                    _ => {}
                }
            }
            containers[index] = Some(container);
        }
        for (symbol, container) in self.symbols.iter_mut().zip(containers) {
            symbol.container = container;
        }

        for index in 0..self.symbols.len() {
            let symbol = &self.symbols[index];
            let candidate = EntryCandidate {
                name: &symbol.name,
                kind: symbol.kind,
                at_file_scope: symbol.container == Some(0),
                attributes: &self.attributes[index],
                file_markers: &self.file_markers,
            };
            let flagged = is_entrypoint(&candidate);
            self.symbols[index].is_entrypoint = flagged;
        }

        Fragment {
            language: self.language,
            scope: self.scope,
            symbols: self.symbols,
            calls: self.calls,
            imports: self.imports,
            diagnostics: self.diagnostics,
        }
    }
}

/// Lazily constructed per-worker parsers, one slot per language.
#[derive(Default)]
pub struct ParserSet {
    rust: Option<RustParser>,
    javascript: Option<EcmaParser>,
    typescript: Option<EcmaParser>,
    tsx: Option<EcmaParser>,
    python: Option<PythonParser>,
    go: Option<GoParser>,
}

impl ParserSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(&mut self, file: &FileRecord, source: &[u8]) -> Fragment {
        match self.parser_for(file.language) {
            Ok(parser) => parser.parse(file, source),
            Err(err) => Fragment::fallback(
                file,
                source,
                format!("cannot load {} grammar: {err}", file.language),
            ),
        }
    }

    pub fn parser_for(&mut self, language: Language) -> Result<&mut dyn LanguageParser> {
        let parser: &mut dyn LanguageParser = match language {
            Language::Rust => ensure(&mut self.rust, RustParser::new)?,
            Language::JavaScript => ensure(&mut self.javascript, || {
                EcmaParser::new(Language::JavaScript)
            })?,
            Language::TypeScript => ensure(&mut self.typescript, || {
                EcmaParser::new(Language::TypeScript)
            })?,
            Language::Tsx => ensure(&mut self.tsx, || EcmaParser::new(Language::Tsx))?,
            Language::Python => ensure(&mut self.python, PythonParser::new)?,
            Language::Go => ensure(&mut self.go, GoParser::new)?,
        };
        Ok(parser)
    }
}

fn ensure<P>(slot: &mut Option<P>, make: impl FnOnce() -> Result<P>) -> Result<&mut P> {
    if slot.is_none() {
        *slot = Some(make()?);
    }
    slot.as_mut().ok_or_else(|| anyhow!("parser slot is empty"))
}

/// fq_name of the file module for `rel_path`.
pub fn module_fq(language: Language, rel_path: &str) -> String {
    match language {
        Language::Rust => crate::analysis::rust::module_name_from_rel_path(rel_path),
        Language::JavaScript | Language::TypeScript | Language::Tsx => {
            crate::analysis::javascript::module_name_from_rel_path(rel_path)
        }
        Language::Python => crate::analysis::python::module_name_from_rel_path(rel_path),
        Language::Go => crate::analysis::go::module_name_from_rel_path(rel_path),
    }
}

/// Splits a relative path into module segments: extension stripped, dots in
/// names replaced, and a trailing `collapse` stem (`mod`, `index`, ...)
/// folded into its directory.
pub fn module_segments(rel_path: &str, collapse: &[&str]) -> Vec<String> {
    let mut parts: Vec<String> = rel_path
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .map(|part| part.to_string())
        .collect();
    let Some(file) = parts.pop() else {
        return Vec::new();
    };
    let stem = match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => file,
    };
    let mut segments: Vec<String> = parts.iter().map(|part| sanitize_segment(part)).collect();
    if !(collapse.contains(&stem.as_str()) && !segments.is_empty()) {
        segments.push(sanitize_segment(&stem));
    }
    segments
}

fn sanitize_segment(raw: &str) -> String {
    raw.chars()
        .map(|ch| if ch == '.' || ch == ':' { '_' } else { ch })
        .collect()
}

pub fn span(node: Node<'_>) -> Span {
    let start = node.start_position();
    let end = node.end_position();
    Span::new(
        start.row as u32 + 1,
        start.column as u32 + 1,
        end.row as u32 + 1,
        end.column as u32 + 1,
    )
}

/// Span covering the whole text, for fragments built without a tree.
pub fn text_span(text: &str) -> Span {
    let mut line = 1u32;
    let mut col = 1u32;
    for ch in text.chars() {
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += ch.len_utf8() as u32;
        }
    }
    Span::new(1, 1, line, col)
}

pub fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    source
        .get(node.start_byte()..node.end_byte())
        .unwrap_or("")
        .trim()
}

pub fn first_syntax_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = first_syntax_error(child) {
            return Some(found);
        }
    }
    None
}

pub fn find_child_of_kind<'a>(node: Node<'a>, kind: &str) -> Option<Node<'a>> {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == kind {
            return Some(child);
        }
    }
    None
}

/// Strips matching quotes from a string literal.
pub fn unquote(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let first = raw.chars().next()?;
    if !matches!(first, '"' | '\'' | '`') || raw.len() < 2 || !raw.ends_with(first) {
        return None;
    }
    Some(raw[1..raw.len() - 1].to_string())
}
