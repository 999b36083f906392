use crate::analysis::extract::{
    Declaration, EntryCandidate, Fragment, FragmentBuilder, LanguageParser, Visibility,
    find_child_of_kind, node_text, span, text_span, unquote,
};
use crate::model::{FileRecord, Language, SymbolKind};
use crate::util;
use anyhow::Result;
use tree_sitter::{Node, Parser};

const PACKAGE_MARKER_PREFIX: &str = "package:";

pub struct GoParser {
    parser: Parser,
}

impl GoParser {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        let language = tree_sitter_go::LANGUAGE;
        parser.set_language(&language.into())?;
        Ok(Self { parser })
    }
}

impl LanguageParser for GoParser {
    fn language(&self) -> Language {
        Language::Go
    }

    fn parse(&mut self, file: &FileRecord, source: &[u8]) -> Fragment {
        let text = String::from_utf8_lossy(source);
        let Some(tree) = self.parser.parse(text.as_ref(), None) else {
            return Fragment::fallback(file, source, "go parser produced no tree");
        };
        let mut builder = FragmentBuilder::new(
            Language::Go,
            &file.path,
            module_name_from_rel_path(&file.path),
            text_span(&text),
        );
        let root = tree.root_node();
        builder.check_syntax(root);

        let package = find_child_of_kind(root, "package_clause")
            .and_then(|clause| find_child_of_kind(clause, "package_identifier"))
            .map(|ident| node_text(ident, &text).to_string())
            .unwrap_or_default();
        if !package.is_empty() {
            builder.mark_file(format!("{PACKAGE_MARKER_PREFIX}{package}"));
        }
        builder.set_scope(package_scope(&file.path, &package));

        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            walk_node(child, &text, &mut builder);
        }
        builder.finish(is_go_entrypoint)
    }

    fn is_entrypoint(&self, candidate: &EntryCandidate<'_>) -> bool {
        is_go_entrypoint(candidate)
    }
}

/// `func main` in `package main`.
pub fn is_go_entrypoint(candidate: &EntryCandidate<'_>) -> bool {
    candidate.kind == SymbolKind::Function
        && candidate.name == "main"
        && candidate.at_file_scope
        && candidate
            .file_markers
            .iter()
            .any(|marker| marker == "package:main")
}

/// Go file modules are named by their path; members live in the package scope.
pub fn module_name_from_rel_path(rel_path: &str) -> String {
    rel_path.to_string()
}

/// Directory of the file joined with `.`, or the package name for files at
/// the project root.
pub fn package_scope(rel_path: &str, package: &str) -> String {
    match rel_path.rsplit_once('/') {
        Some((dir, _)) => dir
            .split('/')
            .filter(|part| !part.is_empty())
            .map(|part| part.replace('.', "_"))
            .collect::<Vec<_>>()
            .join("."),
        None => package.to_string(),
    }
}

fn visibility_for(name: &str) -> Visibility {
    if name.chars().next().is_some_and(char::is_uppercase) {
        Visibility::Public
    } else {
        Visibility::Private
    }
}

fn walk_node(node: Node<'_>, source: &str, out: &mut FragmentBuilder) {
    match node.kind() {
        "function_declaration" => handle_function(node, source, out),
        "method_declaration" => handle_method(node, source, out),
        "type_declaration" => {
            let mut cursor = node.walk();
            for spec in node.named_children(&mut cursor) {
                if spec.kind() == "type_spec" {
                    handle_type_spec(spec, source, out);
                }
            }
        }
        "import_declaration" => handle_imports(node, source, out),
        "call_expression" => {
            if let Some(function) = node.child_by_field_name("function") {
                let raw = util::compact_call_text(node_text(function, source));
                out.call(util::truncate_str_bytes(&raw, 160), span(node));
            }
            walk_children(node, source, out);
        }
        "comment" | "interpreted_string_literal" | "raw_string_literal" => {}
        _ => walk_children(node, source, out),
    }
}

fn walk_children(node: Node<'_>, source: &str, out: &mut FragmentBuilder) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        walk_node(child, source, out);
    }
}

fn handle_function(node: Node<'_>, source: &str, out: &mut FragmentBuilder) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, source).to_string();
    let fq_name = out.qualify(out.scope(), &name);
    declare_callable(node, name, SymbolKind::Function, fq_name, source, out);
}

fn handle_method(node: Node<'_>, source: &str, out: &mut FragmentBuilder) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, source).to_string();
    let receiver = node
        .child_by_field_name("receiver")
        .and_then(|list| receiver_type(list, source));
    let parent = match receiver {
        Some(receiver) => out.qualify(out.scope(), &receiver),
        None => out.scope().to_string(),
    };
    let fq_name = out.qualify(&parent, &name);
    declare_callable(node, name, SymbolKind::Method, fq_name, source, out);
}

fn declare_callable(
    node: Node<'_>,
    name: String,
    kind: SymbolKind,
    fq_name: String,
    source: &str,
    out: &mut FragmentBuilder,
) {
    let index = out.declare(Declaration {
        visibility: visibility_for(&name),
        name,
        kind,
        fq_name,
        span: span(node),
        attributes: Vec::new(),
    });
    if let Some(body) = node.child_by_field_name("body") {
        out.enter(index);
        walk_children(body, source, out);
        out.leave();
    }
}

/// Base type name of a receiver such as `(s *Server)` or `(l List[T])`.
fn receiver_type(list: Node<'_>, source: &str) -> Option<String> {
    let param = find_child_of_kind(list, "parameter_declaration")?;
    let ty = param.child_by_field_name("type")?;
    let raw = node_text(ty, source).trim_start_matches('*').trim();
    let base = raw.split('[').next().unwrap_or(raw).trim();
    if base.is_empty() {
        None
    } else {
        Some(base.to_string())
    }
}

fn handle_type_spec(spec: Node<'_>, source: &str, out: &mut FragmentBuilder) {
    let (Some(name_node), Some(ty)) = (
        spec.child_by_field_name("name"),
        spec.child_by_field_name("type"),
    ) else {
        return;
    };
    let kind = match ty.kind() {
        "struct_type" => SymbolKind::Struct,
        "interface_type" => SymbolKind::Interface,
        _ => return,
    };
    let name = node_text(name_node, source).to_string();
    let fq_name = out.qualify(out.scope(), &name);
    out.declare(Declaration {
        visibility: visibility_for(&name),
        name,
        kind,
        fq_name,
        span: span(spec),
        attributes: Vec::new(),
    });
}

fn handle_imports(node: Node<'_>, source: &str, out: &mut FragmentBuilder) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "import_spec" => handle_import_spec(child, source, out),
            "import_spec_list" => {
                let mut inner = child.walk();
                for spec in child.named_children(&mut inner) {
                    if spec.kind() == "import_spec" {
                        handle_import_spec(spec, source, out);
                    }
                }
            }
            _ => {}
        }
    }
}

fn handle_import_spec(spec: Node<'_>, source: &str, out: &mut FragmentBuilder) {
    let Some(path) = spec
        .child_by_field_name("path")
        .and_then(|node| unquote(node_text(node, source)))
    else {
        return;
    };
    let alias = match spec.child_by_field_name("name") {
        Some(name) => node_text(name, source).to_string(),
        None => path.rsplit('/').next().unwrap_or(&path).to_string(),
    };
    if alias == "_" || alias == "." {
        return;
    }
    out.import(alias, path.replace('/', "."));
}
