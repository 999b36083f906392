use crate::analysis::resolve::{Resolution, ResolvedUnit, SymbolIndex};
use crate::analysis::rust;
use crate::analysis::stable_id::call_id;
use crate::model::{CallEdge, Language, SymbolKind};
use crate::util;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// One way of turning a callee reference into a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStep {
    /// The caller's enclosing fq chain; `self`/`this`/`Self`/`cls` bind to
    /// the enclosing type.
    Container,
    /// The file's scope prefix, with Rust `self::`/`super::`/`crate::`
    /// normalized.
    Module,
    /// Import alias substitution.
    Import,
    /// The path as written matched against fq suffixes.
    Qualified,
    /// Exactly one symbol project-wide with the bare name.
    UniqueName,
}

impl ResolutionStep {
    pub const DEFAULT_ORDER: [ResolutionStep; 5] = [
        ResolutionStep::Container,
        ResolutionStep::Module,
        ResolutionStep::Import,
        ResolutionStep::Qualified,
        ResolutionStep::UniqueName,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionStep::Container => "container",
            ResolutionStep::Module => "module",
            ResolutionStep::Import => "import",
            ResolutionStep::Qualified => "qualified",
            ResolutionStep::UniqueName => "unique_name",
        }
    }
}

impl fmt::Display for ResolutionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStep {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let key = raw.trim().to_ascii_lowercase().replace('-', "_");
        ResolutionStep::DEFAULT_ORDER
            .into_iter()
            .find(|step| step.as_str() == key)
            .ok_or_else(|| format!("unknown link step {raw:?}"))
    }
}

/// Ordered resolution steps; the first step that finds a symbol wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPolicy {
    pub steps: Vec<ResolutionStep>,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            steps: ResolutionStep::DEFAULT_ORDER.to_vec(),
        }
    }
}

impl LinkPolicy {
    pub fn new(steps: Vec<ResolutionStep>) -> Self {
        let mut seen = HashSet::new();
        let steps = steps.into_iter().filter(|step| seen.insert(*step)).collect();
        Self { steps }
    }

    /// Parses a comma separated list such as `import,container,unique_name`.
    pub fn parse_list(raw: &str) -> Result<Self, String> {
        let steps = raw
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(ResolutionStep::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        if steps.is_empty() {
            return Err("link order is empty".to_string());
        }
        Ok(Self::new(steps))
    }

    fn allows(&self, step: ResolutionStep) -> bool {
        self.steps.contains(&step)
    }
}

/// Produces one edge per raw call. Unresolvable callees keep `callee_id`
/// unset; linking never fails.
pub fn link(resolution: &Resolution, policy: &LinkPolicy) -> Vec<CallEdge> {
    let linker = Linker {
        res: resolution,
        index: SymbolIndex::build(resolution),
        policy,
    };
    let mut seen = HashSet::new();
    let mut edges = Vec::new();
    for unit in &resolution.units {
        for call in &unit.calls {
            let caller = unit.symbol_start + call.caller as usize;
            let Some(caller_symbol) = resolution.symbols.get(caller) else {
                tracing::warn!(
                    "dropping call {} in {}: caller index out of range",
                    call.callee_name,
                    unit.file
                );
                continue;
            };
            let id = call_id(&caller_symbol.id, &call.span);
            if !seen.insert(id.clone()) {
                continue;
            }
            let callee_id = linker
                .resolve(unit, caller, &call.callee_name)
                .map(|found| resolution.symbols[found].id.clone());
            edges.push(CallEdge {
                id,
                caller_id: caller_symbol.id.clone(),
                callee_name: call.callee_name.clone(),
                callee_id,
                file: unit.file.clone(),
                span: call.span,
            });
        }
    }
    edges
}

const RECEIVERS: &[&str] = &["self", "Self", "this", "cls"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RustPrefix {
    None,
    SelfModule,
    Super(usize),
    Crate,
}

#[derive(Debug)]
struct CallPath<'a> {
    segments: Vec<&'a str>,
    prefix: RustPrefix,
}

impl<'a> CallPath<'a> {
    fn parse(raw: &'a str, language: Language) -> Self {
        let mut rest = raw;
        let mut prefix = RustPrefix::None;
        if language == Language::Rust {
            if let Some(tail) = rest.strip_prefix("crate::") {
                rest = tail;
                prefix = RustPrefix::Crate;
            } else {
                let mut supers = 0;
                loop {
                    if let Some(tail) = rest.strip_prefix("self::") {
                        rest = tail;
                        if prefix == RustPrefix::None {
                            prefix = RustPrefix::SelfModule;
                        }
                    } else if let Some(tail) = rest.strip_prefix("super::") {
                        rest = tail;
                        supers += 1;
                        prefix = RustPrefix::Super(supers);
                    } else {
                        break;
                    }
                }
            }
        }
        let segments = rest
            .split("::")
            .flat_map(|part| part.split('.'))
            .filter(|part| !part.is_empty())
            .collect();
        Self { segments, prefix }
    }

    fn head(&self) -> Option<&'a str> {
        self.segments.first().copied()
    }

    fn last(&self) -> Option<&'a str> {
        self.segments.last().copied()
    }

    fn is_receiver_bound(&self) -> bool {
        self.prefix == RustPrefix::None
            && self.segments.len() > 1
            && self.head().is_some_and(|head| RECEIVERS.contains(&head))
    }

    fn joined(&self, sep: &str, skip: usize) -> String {
        self.segments[skip.min(self.segments.len())..].join(sep)
    }
}

struct Linker<'a> {
    res: &'a Resolution,
    index: SymbolIndex<'a>,
    policy: &'a LinkPolicy,
}

impl Linker<'_> {
    fn resolve(&self, unit: &ResolvedUnit, caller: usize, callee: &str) -> Option<usize> {
        if !util::is_simple_path(callee) {
            // Only the trailing member of an expression like `make().run` is usable.
            let member = trailing_identifier(callee)?;
            return self
                .policy
                .allows(ResolutionStep::UniqueName)
                .then(|| self.unique_name(member))
                .flatten();
        }
        let path = CallPath::parse(callee, unit.language);
        if path.segments.is_empty() {
            return None;
        }
        for step in &self.policy.steps {
            let found = match step {
                ResolutionStep::Container => self.by_container(unit, caller, &path),
                ResolutionStep::Module => self.by_module(unit, caller, &path),
                ResolutionStep::Import => self.by_import(unit, &path),
                ResolutionStep::Qualified => self.by_qualified(unit, &path),
                ResolutionStep::UniqueName => path.last().and_then(|name| self.unique_name(name)),
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }

    fn by_container(&self, unit: &ResolvedUnit, caller: usize, path: &CallPath<'_>) -> Option<usize> {
        let sep = unit.language.separator();
        if path.is_receiver_bound() {
            let owner = self.enclosing_type(caller)?;
            return self.exact(unit, &format!("{owner}{sep}{}", path.joined(sep, 1)));
        }
        if path.prefix != RustPrefix::None {
            return None;
        }
        let tail = path.joined(sep, 0);
        let mut cursor = Some(caller);
        while let Some(current) = cursor {
            if current == unit.symbol_start {
                break;
            }
            let scope = &self.res.raw_fq[current];
            if let Some(found) = self.exact(unit, &format!("{scope}{sep}{tail}")) {
                return Some(found);
            }
            cursor = self.res.parents[current];
        }
        None
    }

    /// fq of the type a receiver keyword refers to inside `caller`.
    fn enclosing_type(&self, caller: usize) -> Option<String> {
        let mut cursor = self.res.parents[caller];
        while let Some(current) = cursor {
            if self.res.symbols[current].kind.is_type() {
                return Some(self.res.raw_fq[current].clone());
            }
            cursor = self.res.parents[current];
        }
        // Methods whose type lives in another file still carry it in their fq.
        let symbol = &self.res.symbols[caller];
        if symbol.kind != SymbolKind::Method {
            return None;
        }
        let sep = self.res.unit_of(caller)?.language.separator();
        self.res.raw_fq[caller]
            .rsplit_once(sep)
            .map(|(owner, _)| owner.to_string())
    }

    fn by_module(&self, unit: &ResolvedUnit, caller: usize, path: &CallPath<'_>) -> Option<usize> {
        let sep = unit.language.separator();
        let tail = path.joined(sep, 0);
        let bases: Vec<String> = match path.prefix {
            RustPrefix::None => vec![unit.scope.clone()],
            RustPrefix::SelfModule => {
                let mut bases = vec![self.module_of(unit, caller)];
                let child_base = rust::child_module_base(&unit.file);
                if !bases.contains(&child_base) {
                    bases.push(child_base);
                }
                bases
            }
            RustPrefix::Super(levels) => {
                let mut base: Vec<&str> = Vec::new();
                let module = self.module_of(unit, caller);
                base.extend(module.split("::"));
                for _ in 0..levels {
                    base.pop();
                }
                vec![base.join("::")]
            }
            RustPrefix::Crate => {
                let root = rust::crate_root_for(&unit.file);
                ["", "lib", "main"]
                    .into_iter()
                    .map(|entry| {
                        [root.as_str(), entry]
                            .iter()
                            .filter(|part| !part.is_empty())
                            .copied()
                            .collect::<Vec<_>>()
                            .join("::")
                    })
                    .collect()
            }
        };
        bases.iter().find_map(|base| {
            if base.is_empty() {
                self.exact(unit, &tail)
            } else {
                self.exact(unit, &format!("{base}{sep}{tail}"))
            }
        })
    }

    /// Nearest enclosing module of `caller`, honoring inline `mod` blocks.
    fn module_of(&self, unit: &ResolvedUnit, caller: usize) -> String {
        let mut cursor = self.res.parents[caller];
        while let Some(current) = cursor {
            if self.res.symbols[current].kind == SymbolKind::Module {
                return self.res.raw_fq[current].clone();
            }
            cursor = self.res.parents[current];
        }
        unit.module_fq.clone()
    }

    fn by_import(&self, unit: &ResolvedUnit, path: &CallPath<'_>) -> Option<usize> {
        if path.prefix != RustPrefix::None {
            return None;
        }
        let head = path.head()?;
        let import = unit.imports.iter().find(|import| import.alias == head)?;
        let sep = unit.language.separator();
        let rest = path.joined(sep, 1);
        let target = if rest.is_empty() {
            import.target.clone()
        } else {
            format!("{}{sep}{rest}", import.target)
        };
        self.lookup_path(unit, &target)
    }

    fn by_qualified(&self, unit: &ResolvedUnit, path: &CallPath<'_>) -> Option<usize> {
        if path.segments.len() < 2 || path.is_receiver_bound() {
            return None;
        }
        self.lookup_path(unit, &path.joined(unit.language.separator(), 0))
    }

    fn unique_name(&self, name: &str) -> Option<usize> {
        match self.index.by_name.get(name).map(Vec::as_slice) {
            Some([only]) => Some(*only),
            _ => None,
        }
    }

    /// Exact fq match. Several symbols may share a raw fq across files; the
    /// one in the caller's file wins, otherwise the match is ambiguous.
    fn exact(&self, unit: &ResolvedUnit, fq: &str) -> Option<usize> {
        match self.index.by_fq.get(fq).map(Vec::as_slice) {
            Some([only]) => Some(*only),
            Some(many) => {
                let mut local = many
                    .iter()
                    .copied()
                    .filter(|&index| self.res.symbols[index].file == unit.file);
                match (local.next(), local.next()) {
                    (Some(found), None) => Some(found),
                    _ => None,
                }
            }
            None => None,
        }
    }

    /// Exact match, then a unique symbol whose fq ends with the path, then
    /// the same with leading path segments dropped while two remain.
    fn lookup_path(&self, unit: &ResolvedUnit, path: &str) -> Option<usize> {
        if let Some(found) = self.exact(unit, path) {
            return Some(found);
        }
        let sep = unit.language.separator();
        let segments: Vec<&str> = path.split(sep).filter(|s| !s.is_empty()).collect();
        let name = *segments.last()?;
        let candidates = self.index.by_name.get(name)?;
        for skip in 0..segments.len().saturating_sub(1) {
            let suffix = segments[skip..].join(sep);
            let dotted = format!("{sep}{suffix}");
            let mut matches = candidates.iter().copied().filter(|&index| {
                let fq = &self.res.raw_fq[index];
                fq == &suffix || fq.ends_with(&dotted)
            });
            match (matches.next(), matches.next()) {
                (Some(found), None) => return Some(found),
                (Some(_), Some(_)) => return None,
                _ => {}
            }
        }
        None
    }
}

fn trailing_identifier(raw: &str) -> Option<&str> {
    let tail = raw.rsplit(['.', ':']).next()?;
    let valid = !tail.is_empty()
        && tail
            .chars()
            .all(|ch| ch.is_alphanumeric() || matches!(ch, '_' | '$' | '#'));
    valid.then_some(tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::extract::{Declaration, FragmentBuilder, Visibility, text_span};
    use crate::analysis::resolve::{ParsedFile, resolve};
    use crate::model::{FileRecord, Span};

    struct FileSpec<'a> {
        path: &'a str,
        language: Language,
        module: &'a str,
        decls: Vec<(&'a str, SymbolKind, &'a str)>,
        imports: Vec<(&'a str, &'a str)>,
        /// (index of calling declaration, 0 for the module; callee text)
        calls: Vec<(u32, &'a str)>,
    }

    fn build(spec: FileSpec<'_>) -> ParsedFile {
        let mut builder = FragmentBuilder::new(
            spec.language,
            spec.path,
            spec.module.to_string(),
            text_span("x\n"),
        );
        for (line, (name, kind, fq)) in spec.decls.into_iter().enumerate() {
            builder.declare(Declaration {
                name: name.to_string(),
                kind,
                fq_name: fq.to_string(),
                span: Span::new(line as u32 + 1, 1, line as u32 + 1, 20),
                visibility: Visibility::Public,
                attributes: Vec::new(),
            });
        }
        for (alias, target) in spec.imports {
            builder.import(alias, target);
        }
        for (n, (caller, callee)) in spec.calls.into_iter().enumerate() {
            builder.enter(caller);
            builder.call(callee.to_string(), Span::new(50 + n as u32, 1, 50 + n as u32, 9));
            builder.leave();
        }
        ParsedFile {
            record: FileRecord {
                path: spec.path.to_string(),
                language: spec.language,
                content_hash: "h".to_string(),
                byte_size: 1,
            },
            fragment: builder.finish(|_| false),
            reused: false,
        }
    }

    fn callee_fq(res: &Resolution, edges: &[CallEdge], callee: &str) -> Option<String> {
        let edge = edges.iter().find(|e| e.callee_name == callee)?;
        let id = edge.callee_id.as_ref()?;
        res.symbols.iter().find(|s| &s.id == id).map(|s| s.fq_name.clone())
    }

    #[test]
    fn receiver_calls_bind_to_the_enclosing_type() {
        let file = build(FileSpec {
            path: "svc.py",
            language: Language::Python,
            module: "svc",
            decls: vec![
                ("Service", SymbolKind::Class, "svc.Service"),
                ("run", SymbolKind::Method, "svc.Service.run"),
                ("prepare", SymbolKind::Method, "svc.Service.prepare"),
                ("Other", SymbolKind::Class, "svc.Other"),
                ("prepare", SymbolKind::Method, "svc.Other.prepare"),
            ],
            imports: vec![],
            calls: vec![(2, "self.prepare")],
        });
        let res = resolve(vec![file], &[]);
        let edges = link(&res, &LinkPolicy::default());
        assert_eq!(
            callee_fq(&res, &edges, "self.prepare").as_deref(),
            Some("svc.Service.prepare")
        );
    }

    #[test]
    fn module_scope_and_imports() {
        let util = build(FileSpec {
            path: "pkg/util.py",
            language: Language::Python,
            module: "pkg.util",
            decls: vec![("slugify", SymbolKind::Function, "pkg.util.slugify")],
            imports: vec![],
            calls: vec![],
        });
        let app = build(FileSpec {
            path: "pkg/app.py",
            language: Language::Python,
            module: "pkg.app",
            decls: vec![
                ("main", SymbolKind::Function, "pkg.app.main"),
                ("helper", SymbolKind::Function, "pkg.app.helper"),
            ],
            imports: vec![("slug", "pkg.util.slugify"), ("u", "pkg.util")],
            calls: vec![(1, "helper"), (1, "slug"), (1, "u.slugify"), (1, "print")],
        });
        let res = resolve(vec![util, app], &[]);
        let edges = link(&res, &LinkPolicy::default());
        assert_eq!(callee_fq(&res, &edges, "helper").as_deref(), Some("pkg.app.helper"));
        assert_eq!(callee_fq(&res, &edges, "slug").as_deref(), Some("pkg.util.slugify"));
        assert_eq!(callee_fq(&res, &edges, "u.slugify").as_deref(), Some("pkg.util.slugify"));
        assert_eq!(callee_fq(&res, &edges, "print"), None);
        assert_eq!(edges.len(), 4);
    }

    #[test]
    fn unique_name_needs_exactly_one_candidate() {
        let a = build(FileSpec {
            path: "a.js",
            language: Language::JavaScript,
            module: "a",
            decls: vec![
                ("render", SymbolKind::Function, "a.render"),
                ("dup", SymbolKind::Function, "a.dup"),
            ],
            imports: vec![],
            calls: vec![],
        });
        let b = build(FileSpec {
            path: "b.js",
            language: Language::JavaScript,
            module: "b",
            decls: vec![("dup", SymbolKind::Function, "b.dup")],
            imports: vec![],
            calls: vec![(0, "render"), (0, "widget.dup"), (0, "make().render")],
        });
        let res = resolve(vec![a, b], &[]);
        let edges = link(&res, &LinkPolicy::default());
        assert_eq!(callee_fq(&res, &edges, "render").as_deref(), Some("a.render"));
        assert_eq!(callee_fq(&res, &edges, "widget.dup"), None);
        assert_eq!(callee_fq(&res, &edges, "make().render").as_deref(), Some("a.render"));
    }

    #[test]
    fn rust_path_prefixes() {
        let lib = build(FileSpec {
            path: "src/lib.rs",
            language: Language::Rust,
            module: "src::lib",
            decls: vec![("init", SymbolKind::Function, "src::lib::init")],
            imports: vec![],
            calls: vec![],
        });
        let util = build(FileSpec {
            path: "src/net/util.rs",
            language: Language::Rust,
            module: "src::net::util",
            decls: vec![
                ("Conn", SymbolKind::Struct, "src::net::util::Conn"),
                ("open", SymbolKind::Method, "src::net::util::Conn::open"),
                ("close", SymbolKind::Method, "src::net::util::Conn::close"),
            ],
            imports: vec![],
            calls: vec![(2, "crate::init"), (2, "Self::open"), (2, "super::peer")],
        });
        let peer = build(FileSpec {
            path: "src/net/mod.rs",
            language: Language::Rust,
            module: "src::net",
            decls: vec![("peer", SymbolKind::Function, "src::net::peer")],
            imports: vec![],
            calls: vec![],
        });
        let res = resolve(vec![lib, util, peer], &[]);
        let edges = link(&res, &LinkPolicy::default());
        assert_eq!(callee_fq(&res, &edges, "crate::init").as_deref(), Some("src::lib::init"));
        assert_eq!(
            callee_fq(&res, &edges, "Self::open").as_deref(),
            Some("src::net::util::Conn::open")
        );
        assert_eq!(callee_fq(&res, &edges, "super::peer").as_deref(), Some("src::net::peer"));
    }

    #[test]
    fn policy_order_is_configurable() {
        let file = build(FileSpec {
            path: "m.py",
            language: Language::Python,
            module: "m",
            decls: vec![("run", SymbolKind::Function, "m.run")],
            imports: vec![],
            calls: vec![(1, "run")],
        });
        let res = resolve(vec![file], &[]);
        let none = LinkPolicy::parse_list("import").unwrap();
        assert!(link(&res, &none)[0].callee_id.is_none());
        let unique = LinkPolicy::parse_list("unique-name").unwrap();
        assert!(link(&res, &unique)[0].callee_id.is_some());
    }

    #[test]
    fn link_steps_parse() {
        let policy = LinkPolicy::parse_list("module, import,module,unique_name").unwrap();
        assert_eq!(
            policy.steps,
            vec![
                ResolutionStep::Module,
                ResolutionStep::Import,
                ResolutionStep::UniqueName
            ]
        );
        assert!(LinkPolicy::parse_list("").is_err());
        assert!(LinkPolicy::parse_list("nearest").is_err());
    }

    #[test]
    fn trailing_identifiers() {
        assert_eq!(trailing_identifier("new Greeter().greet"), Some("greet"));
        assert_eq!(trailing_identifier("foo()"), None);
        assert_eq!(trailing_identifier("a[0].b"), Some("b"));
    }
}
