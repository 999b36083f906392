use crate::analysis::extract::{
    Declaration, EntryCandidate, Fragment, FragmentBuilder, LanguageParser, Visibility,
    find_child_of_kind, module_segments, node_text, span, text_span, unquote,
};
use crate::model::{FileRecord, Language, SymbolKind};
use crate::util;
use anyhow::{Result, bail};
use tree_sitter::{Node, Parser};

const JS_TS_EXTENSIONS: &[&str] = &[
    ".d.ts", ".js", ".jsx", ".mjs", ".cjs", ".ts", ".tsx", ".mts", ".cts",
];

/// File marker set when the file contains `if (require.main === module)`.
pub const REQUIRE_MAIN_MARKER: &str = "require-main";

#[derive(Clone)]
struct Context {
    scope: String,
    exported: bool,
    /// Depth of enclosing function bodies; variable-bound functions are only
    /// declared at depth 0.
    fn_depth: usize,
}

/// Parser for JavaScript, TypeScript and TSX; the grammar is chosen by tag.
pub struct EcmaParser {
    language: Language,
    parser: Parser,
}

impl EcmaParser {
    pub fn new(language: Language) -> Result<Self> {
        let grammar: tree_sitter::Language = match language {
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            other => bail!("{other} is not an ECMAScript dialect"),
        };
        let mut parser = Parser::new();
        parser.set_language(&grammar)?;
        Ok(Self { language, parser })
    }
}

impl LanguageParser for EcmaParser {
    fn language(&self) -> Language {
        self.language
    }

    fn parse(&mut self, file: &FileRecord, source: &[u8]) -> Fragment {
        let text = String::from_utf8_lossy(source);
        let Some(tree) = self.parser.parse(text.as_ref(), None) else {
            return Fragment::fallback(file, source, "parser produced no tree");
        };
        let module = module_name_from_rel_path(&file.path);
        let mut builder =
            FragmentBuilder::new(self.language, &file.path, module.clone(), text_span(&text));
        let root = tree.root_node();
        builder.check_syntax(root);
        let ctx = Context {
            scope: module,
            exported: false,
            fn_depth: 0,
        };
        walk_children(root, &ctx, &text, &mut builder);
        builder.finish(is_ecma_entrypoint)
    }

    fn is_entrypoint(&self, candidate: &EntryCandidate<'_>) -> bool {
        is_ecma_entrypoint(candidate)
    }
}

/// `function main` at file scope; the file module itself when it guards on
/// `require.main === module`.
pub fn is_ecma_entrypoint(candidate: &EntryCandidate<'_>) -> bool {
    match candidate.kind {
        SymbolKind::Function => candidate.name == "main" && candidate.at_file_scope,
        SymbolKind::Module => candidate
            .file_markers
            .iter()
            .any(|marker| marker == REQUIRE_MAIN_MARKER),
        _ => false,
    }
}

pub fn module_name_from_rel_path(rel_path: &str) -> String {
    let path = match rel_path.strip_suffix(".d.ts") {
        Some(stem) => format!("{stem}.ts"),
        None => rel_path.to_string(),
    };
    let segments = module_segments(&path, &["index"]);
    if segments.is_empty() {
        "index".to_string()
    } else {
        segments.join(".")
    }
}

/// Maps a relative import specifier to the module fq it names. Bare package
/// specifiers return `None`.
pub fn resolve_module_specifier(file_rel_path: &str, specifier: &str) -> Option<String> {
    let specifier = specifier
        .split(|ch| ch == '?' || ch == '#')
        .next()
        .unwrap_or(specifier)
        .trim();
    if !(specifier.starts_with("./") || specifier.starts_with("../")) {
        return None;
    }
    let dir = file_rel_path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    let joined = if dir.is_empty() {
        specifier.to_string()
    } else {
        format!("{dir}/{specifier}")
    };
    let mut cleaned = util::clean_rel_path(&joined)?;
    for ext in JS_TS_EXTENSIONS {
        if let Some(stem) = cleaned.strip_suffix(ext) {
            cleaned = stem.to_string();
            break;
        }
    }
    if cleaned.is_empty() {
        return None;
    }
    Some(module_name_from_rel_path(&format!("{cleaned}.js")))
}

fn walk_children(node: Node<'_>, ctx: &Context, source: &str, out: &mut FragmentBuilder) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        walk_node(child, ctx, source, out);
    }
}

fn walk_node(node: Node<'_>, ctx: &Context, source: &str, out: &mut FragmentBuilder) {
    match node.kind() {
        "export_statement" => {
            let mut next = ctx.clone();
            next.exported = true;
            walk_children(node, &next, source, out);
        }
        "function_declaration" | "generator_function_declaration" => {
            handle_function(node, ctx, source, out);
        }
        "class_declaration" | "abstract_class_declaration" => handle_class(node, ctx, source, out),
        "interface_declaration" => {
            declare(node, ctx, source, out, SymbolKind::Interface);
        }
        "enum_declaration" => {
            declare(node, ctx, source, out, SymbolKind::Enum);
        }
        "internal_module" | "module" => handle_namespace(node, ctx, source, out),
        "lexical_declaration" | "variable_declaration" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if child.kind() == "variable_declarator" {
                    handle_variable_declarator(child, ctx, source, out);
                } else {
                    walk_node(child, ctx, source, out);
                }
            }
        }
        "import_statement" => handle_import(node, source, out),
        "call_expression" => {
            if let Some(function) = node.child_by_field_name("function") {
                record_call(node, function, source, out);
            }
            walk_children(node, ctx, source, out);
        }
        "new_expression" => {
            if let Some(constructor) = node.child_by_field_name("constructor") {
                record_call(node, constructor, source, out);
            }
            walk_children(node, ctx, source, out);
        }
        "if_statement" => {
            if ctx.fn_depth == 0 {
                check_require_main(node, source, out);
            }
            walk_children(node, ctx, source, out);
        }
        "arrow_function" | "function_expression" | "function" | "generator_function" => {
            let mut next = ctx.clone();
            next.fn_depth += 1;
            next.exported = false;
            walk_children(node, &next, source, out);
        }
        "comment" | "string" | "regex" => {}
        _ => walk_children(node, ctx, source, out),
    }
}

fn visibility(ctx: &Context) -> Visibility {
    if ctx.exported {
        Visibility::Public
    } else {
        Visibility::Private
    }
}

fn declare(
    node: Node<'_>,
    ctx: &Context,
    source: &str,
    out: &mut FragmentBuilder,
    kind: SymbolKind,
) -> Option<(u32, String)> {
    let name_node = node.child_by_field_name("name")?;
    if !is_plain_name(name_node) {
        return None;
    }
    let name = node_text(name_node, source).to_string();
    let fq_name = out.qualify(&ctx.scope, &name);
    let index = out.declare(Declaration {
        name,
        kind,
        fq_name: fq_name.clone(),
        span: span(node),
        visibility: visibility(ctx),
        attributes: Vec::new(),
    });
    Some((index, fq_name))
}

fn is_plain_name(node: Node<'_>) -> bool {
    matches!(
        node.kind(),
        "identifier"
            | "type_identifier"
            | "property_identifier"
            | "private_property_identifier"
            | "nested_identifier"
    )
}

fn handle_function(node: Node<'_>, ctx: &Context, source: &str, out: &mut FragmentBuilder) {
    let body = node.child_by_field_name("body");
    let mut next = ctx.clone();
    next.exported = false;
    next.fn_depth += 1;
    match declare(node, ctx, source, out, SymbolKind::Function) {
        Some((index, fq_name)) => {
            next.scope = fq_name;
            out.enter(index);
            if let Some(body) = body {
                walk_children(body, &next, source, out);
            }
            out.leave();
        }
        None => {
            if let Some(body) = body {
                walk_children(body, &next, source, out);
            }
        }
    }
}

fn handle_class(node: Node<'_>, ctx: &Context, source: &str, out: &mut FragmentBuilder) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == "class_heritage" {
            walk_node(child, ctx, source, out);
        }
    }
    let Some(body) = node.child_by_field_name("body") else {
        return;
    };
    let Some((index, fq_name)) = declare(node, ctx, source, out, SymbolKind::Class) else {
        walk_children(body, ctx, source, out);
        return;
    };
    let next = Context {
        scope: fq_name,
        exported: true,
        fn_depth: ctx.fn_depth,
    };
    out.enter(index);
    let mut cursor = body.walk();
    for member in body.named_children(&mut cursor) {
        match member.kind() {
            "method_definition" | "method_signature" | "abstract_method_signature" => {
                handle_method(member, member.child_by_field_name("body"), &next, source, out);
            }
            "public_field_definition" | "field_definition" => {
                let value = member.child_by_field_name("value");
                match value {
                    Some(value) if is_function_value(value) => {
                        handle_method(member, value.child_by_field_name("body"), &next, source, out);
                    }
                    _ => walk_children(member, &next, source, out),
                }
            }
            _ => walk_node(member, &next, source, out),
        }
    }
    out.leave();
}

fn handle_method(
    node: Node<'_>,
    body: Option<Node<'_>>,
    ctx: &Context,
    source: &str,
    out: &mut FragmentBuilder,
) {
    let name_node = node
        .child_by_field_name("name")
        .or_else(|| node.child_by_field_name("property"));
    let mut next = ctx.clone();
    next.fn_depth += 1;
    next.exported = false;
    let declared = match name_node {
        Some(name_node) if is_plain_name(name_node) => {
            let name = node_text(name_node, source).to_string();
            let private = name.starts_with('#')
                || find_child_of_kind(node, "accessibility_modifier")
                    .map(|m| node_text(m, source) != "public")
                    .unwrap_or(false);
            let fq_name = out.qualify(&ctx.scope, &name);
            let index = out.declare(Declaration {
                name,
                kind: SymbolKind::Method,
                fq_name: fq_name.clone(),
                span: span(node),
                visibility: if private {
                    Visibility::Private
                } else {
                    Visibility::Public
                },
                attributes: Vec::new(),
            });
            next.scope = fq_name;
            Some(index)
        }
        _ => None,
    };
    if let Some(index) = declared {
        out.enter(index);
    }
    if let Some(body) = body {
        walk_children(body, &next, source, out);
    }
    if declared.is_some() {
        out.leave();
    }
}

fn handle_namespace(node: Node<'_>, ctx: &Context, source: &str, out: &mut FragmentBuilder) {
    let Some(body) = node.child_by_field_name("body") else {
        return;
    };
    let Some((index, fq_name)) = declare(node, ctx, source, out, SymbolKind::Namespace) else {
        walk_children(body, ctx, source, out);
        return;
    };
    let next = Context {
        scope: fq_name,
        exported: false,
        fn_depth: ctx.fn_depth,
    };
    out.enter(index);
    walk_children(body, &next, source, out);
    out.leave();
}

fn is_function_value(node: Node<'_>) -> bool {
    matches!(
        node.kind(),
        "arrow_function" | "function_expression" | "function" | "generator_function"
    )
}

fn handle_variable_declarator(
    node: Node<'_>,
    ctx: &Context,
    source: &str,
    out: &mut FragmentBuilder,
) {
    let name_node = node.child_by_field_name("name");
    let value = node.child_by_field_name("value");
    if let (Some(name_node), Some(value)) = (name_node, value) {
        if value.kind() == "call_expression" {
            handle_require(name_node, value, source, out);
        }
        if ctx.fn_depth == 0 && name_node.kind() == "identifier" && is_function_value(value) {
            let name = node_text(name_node, source).to_string();
            let fq_name = out.qualify(&ctx.scope, &name);
            let index = out.declare(Declaration {
                name,
                kind: SymbolKind::Function,
                fq_name: fq_name.clone(),
                span: span(node),
                visibility: visibility(ctx),
                attributes: Vec::new(),
            });
            let next = Context {
                scope: fq_name,
                exported: false,
                fn_depth: ctx.fn_depth + 1,
            };
            out.enter(index);
            walk_children(value, &next, source, out);
            out.leave();
            return;
        }
    }
    if let Some(value) = value {
        walk_node(value, ctx, source, out);
    }
}

fn record_call(call: Node<'_>, target: Node<'_>, source: &str, out: &mut FragmentBuilder) {
    let raw = util::compact_call_text(&node_text(target, source).replace("?.", "."));
    out.call(util::truncate_str_bytes(&raw, 160), span(call));
}

fn check_require_main(node: Node<'_>, source: &str, out: &mut FragmentBuilder) {
    let Some(condition) = node.child_by_field_name("condition") else {
        return;
    };
    let compact: String = node_text(condition, source)
        .chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '(' && *ch != ')')
        .collect();
    if matches!(
        compact.as_str(),
        "require.main===module" | "module===require.main" | "require.main==module"
    ) {
        out.mark_file(REQUIRE_MAIN_MARKER);
    }
}

fn handle_import(node: Node<'_>, source: &str, out: &mut FragmentBuilder) {
    let Some(source_node) = node.child_by_field_name("source") else {
        return;
    };
    let Some(specifier) = unquote(node_text(source_node, source)) else {
        return;
    };
    let Some(module) = resolve_module_specifier(out.path(), &specifier) else {
        return;
    };
    let Some(clause) = find_child_of_kind(node, "import_clause") else {
        return;
    };
    let mut cursor = clause.walk();
    for part in clause.named_children(&mut cursor) {
        match part.kind() {
            "identifier" => {
                let alias = node_text(part, source).to_string();
                let target = format!("{module}.{alias}");
                out.import(alias, target);
            }
            "namespace_import" => {
                if let Some(ident) = find_child_of_kind(part, "identifier") {
                    out.import(node_text(ident, source), module.clone());
                }
            }
            "named_imports" => {
                let mut inner = part.walk();
                for spec in part.named_children(&mut inner) {
                    if spec.kind() != "import_specifier" {
                        continue;
                    }
                    let Some(name) = spec.child_by_field_name("name") else {
                        continue;
                    };
                    let name = node_text(name, source);
                    let alias = spec
                        .child_by_field_name("alias")
                        .map(|alias| node_text(alias, source))
                        .unwrap_or(name);
                    out.import(alias, format!("{module}.{name}"));
                }
            }
            _ => {}
        }
    }
}

/// `const x = require('./a')` and `const { a, b: c } = require('./a')`.
fn handle_require(pattern: Node<'_>, call: Node<'_>, source: &str, out: &mut FragmentBuilder) {
    let Some(function) = call.child_by_field_name("function") else {
        return;
    };
    if node_text(function, source) != "require" {
        return;
    }
    let Some(arguments) = call.child_by_field_name("arguments") else {
        return;
    };
    let Some(first) = arguments.named_child(0) else {
        return;
    };
    let Some(specifier) = unquote(node_text(first, source)) else {
        return;
    };
    let Some(module) = resolve_module_specifier(out.path(), &specifier) else {
        return;
    };
    match pattern.kind() {
        "identifier" => out.import(node_text(pattern, source), module),
        "object_pattern" => {
            let mut cursor = pattern.walk();
            for prop in pattern.named_children(&mut cursor) {
                match prop.kind() {
                    "shorthand_property_identifier_pattern" => {
                        let name = node_text(prop, source);
                        out.import(name, format!("{module}.{name}"));
                    }
                    "pair_pattern" => {
                        let key = prop.child_by_field_name("key").map(|k| node_text(k, source));
                        let value = prop.child_by_field_name("value");
                        if let (Some(key), Some(value)) = (key, value) {
                            if value.kind() == "identifier" {
                                out.import(node_text(value, source), format!("{module}.{key}"));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}
