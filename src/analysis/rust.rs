use crate::analysis::extract::{
    Declaration, EntryCandidate, Fragment, FragmentBuilder, LanguageParser, Visibility,
    find_child_of_kind, module_segments, node_text, span, text_span,
};
use crate::model::{FileRecord, Language, SymbolKind};
use crate::util;
use anyhow::Result;
use tree_sitter::{Node, Parser};

#[derive(Clone)]
struct Context {
    /// Module the walker is in: the file module or an inline `mod`.
    module: String,
    /// fq prefix for declarations found here.
    scope: String,
    /// Target type of the enclosing `impl` or `trait`.
    owner: Option<String>,
    in_trait: bool,
    /// Directory module that `mod foo;` declarations of the file module resolve against.
    child_base: String,
    crate_root: String,
}

pub struct RustParser {
    parser: Parser,
}

impl RustParser {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        let language = tree_sitter_rust::LANGUAGE;
        parser.set_language(&language.into())?;
        Ok(Self { parser })
    }
}

impl LanguageParser for RustParser {
    fn language(&self) -> Language {
        Language::Rust
    }

    fn parse(&mut self, file: &FileRecord, source: &[u8]) -> Fragment {
        let text = String::from_utf8_lossy(source);
        let Some(tree) = self.parser.parse(text.as_ref(), None) else {
            return Fragment::fallback(file, source, "rust parser produced no tree");
        };
        let module = module_name_from_rel_path(&file.path);
        let mut builder =
            FragmentBuilder::new(Language::Rust, &file.path, module.clone(), text_span(&text));
        let root = tree.root_node();
        builder.check_syntax(root);
        let ctx = Context {
            module: module.clone(),
            scope: module,
            owner: None,
            in_trait: false,
            child_base: child_module_base(&file.path),
            crate_root: crate_root_for(&file.path),
        };
        walk_items(root, &ctx, &text, &mut builder);
        builder.finish(is_rust_entrypoint)
    }

    fn is_entrypoint(&self, candidate: &EntryCandidate<'_>) -> bool {
        is_rust_entrypoint(candidate)
    }
}

/// `fn main` at file scope, or any function carrying an attribute whose
/// path ends in `main` such as `#[tokio::main]`.
pub fn is_rust_entrypoint(candidate: &EntryCandidate<'_>) -> bool {
    if candidate.kind != SymbolKind::Function {
        return false;
    }
    if candidate.name == "main" && candidate.at_file_scope {
        return true;
    }
    candidate
        .attributes
        .iter()
        .any(|attr| attr == "main" || attr.ends_with("::main"))
}

pub fn module_name_from_rel_path(rel_path: &str) -> String {
    let segments = module_segments(rel_path, &["mod"]);
    if segments.is_empty() {
        "crate".to_string()
    } else {
        segments.join("::")
    }
}

/// Module path that `crate::` refers to for a file: everything up to and
/// including the nearest `src` directory, or the repository root.
pub fn crate_root_for(rel_path: &str) -> String {
    let parts: Vec<&str> = rel_path.split('/').collect();
    let dirs = &parts[..parts.len().saturating_sub(1)];
    match dirs.iter().rposition(|part| *part == "src") {
        Some(index) => dirs[..=index]
            .iter()
            .map(|part| part.replace('.', "_"))
            .collect::<Vec<_>>()
            .join("::"),
        None => String::new(),
    }
}

pub fn child_module_base(rel_path: &str) -> String {
    let stem = rel_path
        .rsplit('/')
        .next()
        .and_then(|file| file.strip_suffix(".rs"))
        .unwrap_or("");
    if matches!(stem, "main" | "lib") {
        let parent = match rel_path.rsplit_once('/') {
            Some((dir, _)) => format!("{dir}/mod.rs"),
            None => return String::new(),
        };
        return module_name_from_rel_path(&parent);
    }
    module_name_from_rel_path(rel_path)
}

fn walk_items(node: Node<'_>, ctx: &Context, source: &str, out: &mut FragmentBuilder) {
    let mut pending_attrs: Vec<String> = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == "attribute_item" {
            if let Some(path) = attribute_path(child, source) {
                pending_attrs.push(path);
            }
            continue;
        }
        let attrs = std::mem::take(&mut pending_attrs);
        walk_node(child, ctx, source, out, attrs);
    }
}

fn walk_node(
    node: Node<'_>,
    ctx: &Context,
    source: &str,
    out: &mut FragmentBuilder,
    attrs: Vec<String>,
) {
    match node.kind() {
        "mod_item" => handle_mod(node, ctx, source, out),
        "struct_item" | "union_item" => {
            declare_item(node, ctx, source, out, SymbolKind::Struct);
        }
        "enum_item" => {
            declare_item(node, ctx, source, out, SymbolKind::Enum);
        }
        "trait_item" => handle_trait(node, ctx, source, out),
        "impl_item" => handle_impl(node, ctx, source, out),
        "function_item" => handle_function(node, ctx, source, out, attrs),
        "function_signature_item" => handle_function_signature(node, ctx, source, out),
        "use_declaration" => handle_use(node, ctx, source, out),
        "macro_invocation" | "attribute_item" | "line_comment" | "block_comment" => {}
        "call_expression" => {
            handle_call(node, source, out);
            walk_children(node, ctx, source, out);
        }
        "block" | "declaration_list" | "source_file" => walk_items(node, ctx, source, out),
        _ => walk_children(node, ctx, source, out),
    }
}

fn walk_children(node: Node<'_>, ctx: &Context, source: &str, out: &mut FragmentBuilder) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        walk_node(child, ctx, source, out, Vec::new());
    }
}

fn visibility(node: Node<'_>, source: &str) -> Visibility {
    match find_child_of_kind(node, "visibility_modifier") {
        Some(modifier) if node_text(modifier, source) == "pub" => Visibility::Public,
        Some(_) => Visibility::Restricted,
        None => Visibility::Private,
    }
}

fn declare_item(
    node: Node<'_>,
    ctx: &Context,
    source: &str,
    out: &mut FragmentBuilder,
    kind: SymbolKind,
) -> Option<(u32, String)> {
    let name = extract_name(node, source)?;
    let fq_name = out.qualify(&ctx.scope, &name);
    let index = out.declare(Declaration {
        name,
        kind,
        fq_name: fq_name.clone(),
        span: span(node),
        visibility: visibility(node, source),
        attributes: Vec::new(),
    });
    Some((index, fq_name))
}

fn handle_mod(node: Node<'_>, ctx: &Context, source: &str, out: &mut FragmentBuilder) {
    let Some(name) = extract_name(node, source) else {
        return;
    };
    let Some(body) = node.child_by_field_name("body") else {
        // `mod foo;` binds `foo` to the file module next door.
        let base = if ctx.module == out.module_fq() {
            ctx.child_base.clone()
        } else {
            ctx.module.clone()
        };
        let target = out.qualify(&base, &name);
        out.import(name, target);
        return;
    };
    let Some((index, fq_name)) = declare_item(node, ctx, source, out, SymbolKind::Module) else {
        return;
    };
    let next = Context {
        module: fq_name.clone(),
        scope: fq_name,
        owner: None,
        in_trait: false,
        child_base: ctx.child_base.clone(),
        crate_root: ctx.crate_root.clone(),
    };
    out.enter(index);
    walk_items(body, &next, source, out);
    out.leave();
}

fn handle_trait(node: Node<'_>, ctx: &Context, source: &str, out: &mut FragmentBuilder) {
    let Some((index, fq_name)) = declare_item(node, ctx, source, out, SymbolKind::Trait) else {
        return;
    };
    let Some(body) = node.child_by_field_name("body") else {
        return;
    };
    let mut next = ctx.clone();
    next.scope = fq_name.clone();
    next.owner = Some(fq_name);
    next.in_trait = true;
    out.enter(index);
    walk_items(body, &next, source, out);
    out.leave();
}

fn handle_impl(node: Node<'_>, ctx: &Context, source: &str, out: &mut FragmentBuilder) {
    let Some(type_node) = node.child_by_field_name("type") else {
        return;
    };
    let type_name = normalize_type_path(node_text(type_node, source));
    let Some(short) = type_name.rsplit("::").next().filter(|s| !s.is_empty()) else {
        return;
    };
    let owner = out.qualify(&ctx.module, short);
    let Some(body) = node.child_by_field_name("body") else {
        return;
    };
    let mut next = ctx.clone();
    next.scope = owner.clone();
    next.owner = Some(owner);
    // Trait impl items are as visible as the trait itself.
    next.in_trait = node.child_by_field_name("trait").is_some();
    walk_items(body, &next, source, out);
}

fn handle_function(
    node: Node<'_>,
    ctx: &Context,
    source: &str,
    out: &mut FragmentBuilder,
    attributes: Vec<String>,
) {
    let Some(name) = extract_name(node, source) else {
        return;
    };
    let kind = if ctx.owner.is_some() {
        SymbolKind::Method
    } else {
        SymbolKind::Function
    };
    let visibility = if ctx.in_trait {
        Visibility::Public
    } else {
        visibility(node, source)
    };
    let fq_name = out.qualify(&ctx.scope, &name);
    let index = out.declare(Declaration {
        name,
        kind,
        fq_name: fq_name.clone(),
        span: span(node),
        visibility,
        attributes,
    });
    let Some(body) = node.child_by_field_name("body") else {
        return;
    };
    let mut next = ctx.clone();
    next.scope = fq_name;
    next.owner = None;
    next.in_trait = false;
    out.enter(index);
    walk_items(body, &next, source, out);
    out.leave();
}

fn handle_function_signature(
    node: Node<'_>,
    ctx: &Context,
    source: &str,
    out: &mut FragmentBuilder,
) {
    if ctx.owner.is_none() {
        return;
    }
    let Some(name) = extract_name(node, source) else {
        return;
    };
    let fq_name = out.qualify(&ctx.scope, &name);
    out.declare(Declaration {
        name,
        kind: SymbolKind::Method,
        fq_name,
        span: span(node),
        visibility: Visibility::Public,
        attributes: Vec::new(),
    });
}

fn handle_use(node: Node<'_>, ctx: &Context, source: &str, out: &mut FragmentBuilder) {
    let Some(argument) = node.child_by_field_name("argument") else {
        return;
    };
    for (alias, path) in expand_use_tree(node_text(argument, source)) {
        let target = absolutize_use_path(&path, ctx);
        out.import(alias, target);
    }
}

fn handle_call(node: Node<'_>, source: &str, out: &mut FragmentBuilder) {
    let Some(function) = node.child_by_field_name("function") else {
        return;
    };
    let function = match function.kind() {
        "generic_function" => function.child_by_field_name("function").unwrap_or(function),
        _ => function,
    };
    let raw = util::compact_call_text(node_text(function, source));
    out.call(util::truncate_str_bytes(&raw, 160), span(node));
}

/// Rewrites `self::`, `super::` and `crate::` prefixes of a `use` path into
/// project fq form. Other paths are kept as written.
fn absolutize_use_path(path: &str, ctx: &Context) -> String {
    let mut base: Vec<&str> = ctx.module.split("::").collect();
    let mut rest = path;
    loop {
        if let Some(tail) = rest.strip_prefix("self::") {
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("super::") {
            base.pop();
            rest = tail;
        } else {
            break;
        }
    }
    if let Some(tail) = rest.strip_prefix("crate::") {
        return if ctx.crate_root.is_empty() {
            tail.to_string()
        } else {
            format!("{}::{tail}", ctx.crate_root)
        };
    }
    if rest.len() == path.len() {
        return path.to_string();
    }
    let base = base.join("::");
    if base.is_empty() {
        rest.to_string()
    } else {
        format!("{base}::{rest}")
    }
}

/// Expands a use tree into `(alias, path)` bindings. Globs are dropped.
pub fn expand_use_tree(input: &str) -> Vec<(String, String)> {
    let mut cleaned = input.split_whitespace().collect::<Vec<_>>().join(" ");
    for punct in ["::", "{", "}", ","] {
        cleaned = cleaned
            .replace(&format!(" {punct}"), punct)
            .replace(&format!("{punct} "), punct);
    }
    let mut out = Vec::new();
    expand_into("", &cleaned, &mut out);
    out
}

fn expand_into(prefix: &str, input: &str, out: &mut Vec<(String, String)>) {
    if input.is_empty() {
        return;
    }
    if let Some(open) = input.find('{') {
        let base = input[..open].trim_end_matches("::");
        let inner = &input[open + 1..];
        let inner = inner.strip_suffix('}').unwrap_or(inner);
        let joined = join_path(prefix, base);
        for item in split_top_level(inner) {
            expand_into(&joined, item, out);
        }
        return;
    }
    let (path, alias) = match input.split_once(" as ") {
        Some((path, alias)) => (path.trim(), alias.trim()),
        None => (input, ""),
    };
    if path.ends_with('*') || alias == "_" {
        return;
    }
    let full = if path == "self" {
        prefix.to_string()
    } else {
        join_path(prefix, path)
    };
    if full.is_empty() {
        return;
    }
    let alias = if alias.is_empty() {
        full.rsplit("::").next().unwrap_or(&full).to_string()
    } else {
        alias.to_string()
    };
    out.push((alias, full));
}

fn join_path(prefix: &str, path: &str) -> String {
    match (prefix.is_empty(), path.is_empty()) {
        (true, _) => path.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}::{path}"),
    }
}

fn split_top_level(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, ch) in input.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&input[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts.into_iter().filter(|part| !part.is_empty()).collect()
}

fn attribute_path(node: Node<'_>, source: &str) -> Option<String> {
    let attribute = find_child_of_kind(node, "attribute")?;
    let text = node_text(attribute, source);
    let path = text
        .split(|ch: char| ch == '(' || ch == '=' || ch == '[')
        .next()?
        .trim();
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

fn extract_name(node: Node<'_>, source: &str) -> Option<String> {
    let name = node.child_by_field_name("name")?;
    let text = node_text(name, source);
    if text.is_empty() {
        None
    } else {
        Some(text.trim_start_matches("r#").to_string())
    }
}

fn normalize_type_path(raw: &str) -> String {
    let raw = raw.replace("dyn ", "").replace("mut ", "");
    let mut cleaned = String::new();
    let mut depth = 0usize;
    for ch in raw.trim().chars() {
        match ch {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            _ if depth > 0 => {}
            c if c.is_whitespace() => {}
            c => cleaned.push(c),
        }
    }
    cleaned.trim_start_matches('&').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(path: &str, source: &str) -> Fragment {
        let file = FileRecord {
            path: path.to_string(),
            language: Language::Rust,
            content_hash: util::hash_bytes(source.as_bytes()),
            byte_size: source.len() as u64,
        };
        RustParser::new().unwrap().parse(&file, source.as_bytes())
    }

    #[test]
    fn module_name_from_path() {
        assert_eq!(module_name_from_rel_path("src/lib.rs"), "src::lib");
        assert_eq!(module_name_from_rel_path("src/foo/mod.rs"), "src::foo");
        assert_eq!(module_name_from_rel_path("src/foo/bar.rs"), "src::foo::bar");
        assert_eq!(module_name_from_rel_path("build.rs"), "build");
    }

    #[test]
    fn crate_root_is_nearest_src() {
        assert_eq!(crate_root_for("src/a/b.rs"), "src");
        assert_eq!(crate_root_for("crates/core/src/lib.rs"), "crates::core::src");
        assert_eq!(crate_root_for("build.rs"), "");
    }

    #[test]
    fn use_trees_expand_with_aliases() {
        let mut got = expand_use_tree("crate::foo::{Bar, Baz as Qux, inner::{self, deep}}");
        got.sort();
        assert_eq!(
            got,
            vec![
                ("Bar".to_string(), "crate::foo::Bar".to_string()),
                ("Qux".to_string(), "crate::foo::Baz".to_string()),
                ("deep".to_string(), "crate::foo::inner::deep".to_string()),
                ("inner".to_string(), "crate::foo::inner".to_string()),
            ]
        );
        assert!(expand_use_tree("std::io::*").is_empty());
    }

    #[test]
    fn methods_live_under_impl_target() {
        let fragment = parse(
            "src/shapes.rs",
            r#"
pub struct Circle;

impl Circle {
    pub fn area(&self) -> f64 { self.radius() }
    fn radius(&self) -> f64 { 1.0 }
}

pub trait Shape {
    fn name(&self) -> String;
}
"#,
        );
        let names: Vec<_> = fragment
            .symbols
            .iter()
            .map(|s| (s.kind, s.fq_name.as_str()))
            .collect();
        assert!(names.contains(&(SymbolKind::Struct, "src::shapes::Circle")));
        assert!(names.contains(&(SymbolKind::Method, "src::shapes::Circle::area")));
        assert!(names.contains(&(SymbolKind::Trait, "src::shapes::Shape")));
        assert!(names.contains(&(SymbolKind::Method, "src::shapes::Shape::name")));

        let circle = fragment
            .symbols
            .iter()
            .position(|s| s.fq_name == "src::shapes::Circle")
            .unwrap() as u32;
        let area = fragment
            .symbols
            .iter()
            .find(|s| s.name == "area")
            .unwrap();
        assert_eq!(area.container, Some(circle));
        assert_eq!(area.visibility, Visibility::Public);

        let call = fragment
            .calls
            .iter()
            .find(|c| c.callee_name == "self.radius")
            .unwrap();
        assert_eq!(fragment.symbols[call.caller as usize].name, "area");
    }

    #[test]
    fn trait_impl_methods_are_public() {
        let fragment = parse(
            "src/point.rs",
            r#"
pub struct Point;

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { Ok(()) }
}

impl Point {
    fn norm(&self) -> f64 { 0.0 }
}
"#,
        );
        let visibility = |name: &str| {
            fragment
                .symbols
                .iter()
                .find(|s| s.name == name)
                .map(|s| (s.kind, s.visibility))
        };
        assert_eq!(visibility("fmt"), Some((SymbolKind::Method, Visibility::Public)));
        assert_eq!(visibility("norm"), Some((SymbolKind::Method, Visibility::Private)));
    }

    #[test]
    fn main_and_tokio_main_are_entrypoints() {
        let fragment = parse(
            "src/main.rs",
            r#"
#[tokio::main]
async fn serve() {}

fn main() {}

mod tests {
    fn main() {}
}
"#,
        );
        let flagged: Vec<_> = fragment
            .symbols
            .iter()
            .filter(|s| s.is_entrypoint)
            .map(|s| s.fq_name.as_str())
            .collect();
        assert_eq!(flagged, vec!["src::main::serve", "src::main::main"]);
    }

    #[test]
    fn mod_declarations_become_imports() {
        let fragment = parse("src/main.rs", "mod util;\nuse crate::util::helper;\n");
        assert!(fragment
            .imports
            .iter()
            .any(|i| i.alias == "util" && i.target == "src::util"));
        assert!(fragment
            .imports
            .iter()
            .any(|i| i.alias == "helper" && i.target == "src::util::helper"));
    }

    #[test]
    fn syntax_errors_produce_a_diagnostic_and_partial_symbols() {
        let fragment = parse("src/broken.rs", "fn ok() {}\nfn broken( {\n");
        assert!(!fragment.diagnostics.is_empty());
        assert!(fragment.symbols.iter().any(|s| s.name == "ok"));
    }
}
