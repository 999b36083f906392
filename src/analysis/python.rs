use crate::analysis::extract::{
    Declaration, EntryCandidate, Fragment, FragmentBuilder, LanguageParser, Visibility,
    module_segments, node_text, span, text_span,
};
use crate::model::{FileRecord, Language, SymbolKind};
use crate::util;
use anyhow::Result;
use tree_sitter::{Node, Parser};

/// File marker for an `if __name__ == "__main__":` guard at module level.
pub const MAIN_GUARD_MARKER: &str = "__main__";

const CLI_DECORATORS: &[&str] = &["command", "group"];

#[derive(Clone)]
struct Context {
    scope: String,
    in_class: bool,
    fn_depth: usize,
}

pub struct PythonParser {
    parser: Parser,
}

impl PythonParser {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        let language = tree_sitter_python::LANGUAGE;
        parser.set_language(&language.into())?;
        Ok(Self { parser })
    }
}

impl LanguageParser for PythonParser {
    fn language(&self) -> Language {
        Language::Python
    }

    fn parse(&mut self, file: &FileRecord, source: &[u8]) -> Fragment {
        let text = String::from_utf8_lossy(source);
        let Some(tree) = self.parser.parse(text.as_ref(), None) else {
            return Fragment::fallback(file, source, "python parser produced no tree");
        };
        let module = module_name_from_rel_path(&file.path);
        let package = package_of(&file.path, &module);
        let mut builder =
            FragmentBuilder::new(Language::Python, &file.path, module.clone(), text_span(&text));
        let root = tree.root_node();
        builder.check_syntax(root);
        let ctx = Context {
            scope: module,
            in_class: false,
            fn_depth: 0,
        };
        let mut walker = Walker {
            source: &text,
            package,
            out: &mut builder,
        };
        walker.walk_children(root, &ctx);
        builder.finish(is_python_entrypoint)
    }

    fn is_entrypoint(&self, candidate: &EntryCandidate<'_>) -> bool {
        is_python_entrypoint(candidate)
    }
}

/// `def main` at module level, click/typer `command`/`group` decorated
/// functions, and modules guarded by `if __name__ == "__main__":`.
pub fn is_python_entrypoint(candidate: &EntryCandidate<'_>) -> bool {
    match candidate.kind {
        SymbolKind::Function => {
            (candidate.name == "main" && candidate.at_file_scope)
                || candidate.attributes.iter().any(|decorator| {
                    let last = decorator.rsplit('.').next().unwrap_or(decorator);
                    CLI_DECORATORS.contains(&last)
                })
        }
        SymbolKind::Module => candidate
            .file_markers
            .iter()
            .any(|marker| marker == MAIN_GUARD_MARKER),
        _ => false,
    }
}

pub fn module_name_from_rel_path(rel_path: &str) -> String {
    let segments = module_segments(rel_path, &["__init__"]);
    if segments.is_empty() {
        "__init__".to_string()
    } else {
        segments.join(".")
    }
}

fn package_of(rel_path: &str, module: &str) -> String {
    let is_init = rel_path
        .rsplit('/')
        .next()
        .map(|file| file.starts_with("__init__."))
        .unwrap_or(false);
    if is_init {
        return module.to_string();
    }
    module
        .rsplit_once('.')
        .map(|(package, _)| package.to_string())
        .unwrap_or_default()
}

/// Resolves `from ..x import` style module references against `package`.
pub fn absolutize_module(raw: &str, package: &str) -> String {
    let dots = raw.chars().take_while(|ch| *ch == '.').count();
    if dots == 0 {
        return raw.to_string();
    }
    let mut base: Vec<&str> = package.split('.').filter(|s| !s.is_empty()).collect();
    for _ in 1..dots {
        base.pop();
    }
    let rest = &raw[dots..];
    if !rest.is_empty() {
        base.push(rest);
    }
    base.join(".")
}

fn visibility_for(name: &str) -> Visibility {
    let dunder = name.starts_with("__") && name.ends_with("__");
    if name.starts_with('_') && !dunder {
        Visibility::Private
    } else {
        Visibility::Public
    }
}

struct Walker<'a, 'b> {
    source: &'a str,
    package: String,
    out: &'b mut FragmentBuilder,
}

impl Walker<'_, '_> {
    fn walk_children(&mut self, node: Node<'_>, ctx: &Context) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.walk_node(child, ctx, Vec::new());
        }
    }

    fn walk_node(&mut self, node: Node<'_>, ctx: &Context, decorators: Vec<String>) {
        match node.kind() {
            "decorated_definition" => self.handle_decorated(node, ctx),
            "function_definition" => self.handle_function(node, ctx, decorators),
            "class_definition" => self.handle_class(node, ctx),
            "import_statement" => self.handle_import(node),
            "import_from_statement" => self.handle_import_from(node),
            "call" => {
                if let Some(function) = node.child_by_field_name("function") {
                    let raw = util::compact_call_text(node_text(function, self.source));
                    self.out
                        .call(util::truncate_str_bytes(&raw, 160), span(node));
                }
                self.walk_children(node, ctx);
            }
            "if_statement" => {
                if ctx.fn_depth == 0 && !ctx.in_class {
                    self.check_main_guard(node);
                }
                self.walk_children(node, ctx);
            }
            "comment" => {}
            _ => self.walk_children(node, ctx),
        }
    }

    fn handle_decorated(&mut self, node: Node<'_>, ctx: &Context) {
        let mut decorators = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() != "decorator" {
                continue;
            }
            let text = node_text(child, self.source).trim_start_matches('@');
            let path = text.split('(').next().unwrap_or(text).trim();
            if !path.is_empty() {
                decorators.push(path.to_string());
            }
            // Decorator arguments run in the enclosing scope.
            self.walk_children(child, ctx);
        }
        if let Some(definition) = node.child_by_field_name("definition") {
            self.walk_node(definition, ctx, decorators);
        }
    }

    fn handle_function(&mut self, node: Node<'_>, ctx: &Context, decorators: Vec<String>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, self.source).to_string();
        let kind = if ctx.in_class {
            SymbolKind::Method
        } else {
            SymbolKind::Function
        };
        let fq_name = self.out.qualify(&ctx.scope, &name);
        let index = self.out.declare(Declaration {
            visibility: visibility_for(&name),
            name,
            kind,
            fq_name: fq_name.clone(),
            span: span(node),
            attributes: decorators,
        });
        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        let next = Context {
            scope: fq_name,
            in_class: false,
            fn_depth: ctx.fn_depth + 1,
        };
        self.out.enter(index);
        self.walk_children(body, &next);
        self.out.leave();
    }

    fn handle_class(&mut self, node: Node<'_>, ctx: &Context) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        if let Some(bases) = node.child_by_field_name("superclasses") {
            self.walk_children(bases, ctx);
        }
        let name = node_text(name_node, self.source).to_string();
        let fq_name = self.out.qualify(&ctx.scope, &name);
        let index = self.out.declare(Declaration {
            visibility: visibility_for(&name),
            name,
            kind: SymbolKind::Class,
            fq_name: fq_name.clone(),
            span: span(node),
            attributes: Vec::new(),
        });
        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        let next = Context {
            scope: fq_name,
            in_class: true,
            fn_depth: ctx.fn_depth,
        };
        self.out.enter(index);
        self.walk_children(body, &next);
        self.out.leave();
    }

    fn handle_import(&mut self, node: Node<'_>) {
        let mut cursor = node.walk();
        for name in node.children_by_field_name("name", &mut cursor) {
            match name.kind() {
                "dotted_name" => {
                    let path = node_text(name, self.source);
                    let head = path.split('.').next().unwrap_or(path);
                    self.out.import(head, head);
                }
                "aliased_import" => {
                    let path = name.child_by_field_name("name");
                    let alias = name.child_by_field_name("alias");
                    if let (Some(path), Some(alias)) = (path, alias) {
                        self.out.import(
                            node_text(alias, self.source),
                            node_text(path, self.source),
                        );
                    }
                }
                _ => {}
            }
        }
    }

    fn handle_import_from(&mut self, node: Node<'_>) {
        let Some(module_node) = node.child_by_field_name("module_name") else {
            return;
        };
        let module = absolutize_module(node_text(module_node, self.source), &self.package);
        let mut cursor = node.walk();
        for name in node.children_by_field_name("name", &mut cursor) {
            let (path, alias) = match name.kind() {
                "dotted_name" => {
                    let path = node_text(name, self.source);
                    (path, path.rsplit('.').next().unwrap_or(path))
                }
                "aliased_import" => {
                    let path = name.child_by_field_name("name");
                    let alias = name.child_by_field_name("alias");
                    match (path, alias) {
                        (Some(path), Some(alias)) => (
                            node_text(path, self.source),
                            node_text(alias, self.source),
                        ),
                        _ => continue,
                    }
                }
                _ => continue,
            };
            let target = if module.is_empty() {
                path.to_string()
            } else {
                format!("{module}.{path}")
            };
            self.out.import(alias, target);
        }
    }

    fn check_main_guard(&mut self, node: Node<'_>) {
        let Some(condition) = node.child_by_field_name("condition") else {
            return;
        };
        let compact: String = node_text(condition, self.source)
            .chars()
            .filter(|ch| !ch.is_whitespace() && *ch != '(' && *ch != ')')
            .map(|ch| if ch == '\'' { '"' } else { ch })
            .collect();
        if compact == "__name__==\"__main__\"" || compact == "\"__main__\"==__name__" {
            self.out.mark_file(MAIN_GUARD_MARKER);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(path: &str, source: &str) -> Fragment {
        let file = FileRecord {
            path: path.to_string(),
            language: Language::Python,
            content_hash: util::hash_bytes(source.as_bytes()),
            byte_size: source.len() as u64,
        };
        PythonParser::new().unwrap().parse(&file, source.as_bytes())
    }

    #[test]
    fn module_names() {
        assert_eq!(module_name_from_rel_path("pkg/__init__.py"), "pkg");
        assert_eq!(module_name_from_rel_path("pkg/sub/mod.py"), "pkg.sub.mod");
        assert_eq!(module_name_from_rel_path("__init__.py"), "__init__");
    }

    #[test]
    fn relative_imports_resolve_against_the_package() {
        assert_eq!(absolutize_module(".", "pkg.sub"), "pkg.sub");
        assert_eq!(absolutize_module(".util", "pkg.sub"), "pkg.sub.util");
        assert_eq!(absolutize_module("..core", "pkg.sub"), "pkg.core");
        assert_eq!(absolutize_module("os.path", "pkg"), "os.path");
    }

    #[test]
    fn classes_methods_and_imports() {
        let fragment = parse(
            "app/service.py",
            r#"
from .util import slugify as slug
import os.path

class Service:
    def run(self):
        return self._prepare(slug("x"))

    def _prepare(self, value):
        return value

def helper():
    pass
"#,
        );
        let names: Vec<_> = fragment
            .symbols
            .iter()
            .map(|s| (s.kind, s.fq_name.as_str(), s.visibility))
            .collect();
        assert!(names.contains(&(SymbolKind::Class, "app.service.Service", Visibility::Public)));
        assert!(names.contains(&(SymbolKind::Method, "app.service.Service.run", Visibility::Public)));
        assert!(names.contains(&(
            SymbolKind::Method,
            "app.service.Service._prepare",
            Visibility::Private
        )));
        assert!(names.contains(&(SymbolKind::Function, "app.service.helper", Visibility::Public)));
        assert!(fragment
            .imports
            .iter()
            .any(|i| i.alias == "slug" && i.target == "app.util.slugify"));
        assert!(fragment.imports.iter().any(|i| i.alias == "os" && i.target == "os"));
        let callees: Vec<_> = fragment.calls.iter().map(|c| c.callee_name.as_str()).collect();
        assert!(callees.contains(&"self._prepare"));
        assert!(callees.contains(&"slug"));
    }

    #[test]
    fn entrypoint_conventions() {
        let fragment = parse(
            "tool.py",
            r#"
import click

@click.command()
def cli():
    pass

def main():
    cli()

if __name__ == "__main__":
    main()
"#,
        );
        let flagged: Vec<_> = fragment
            .symbols
            .iter()
            .filter(|s| s.is_entrypoint)
            .map(|s| s.fq_name.as_str())
            .collect();
        assert_eq!(flagged, vec!["tool", "tool.cli", "tool.main"]);
        let guard_call = fragment
            .calls
            .iter()
            .find(|c| c.callee_name == "main")
            .unwrap();
        assert_eq!(guard_call.caller, 0);
    }
}
