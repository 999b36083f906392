use crate::analysis::extract::{Fragment, Import, RawCall, Visibility};
use crate::analysis::stable_id::symbol_id;
use crate::model::{FileRecord, Language, Span, Symbol, SymbolKind};
use std::collections::{BTreeMap, HashMap, HashSet};

/// A file together with its fragment, fresh or from the cache.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub record: FileRecord,
    pub fragment: Fragment,
    pub reused: bool,
}

/// Per-file context the linker needs once symbols have global indexes.
#[derive(Debug, Clone)]
pub struct ResolvedUnit {
    pub file: String,
    pub language: Language,
    pub module_fq: String,
    pub scope: String,
    /// Global index of the file module; fragment symbol `n` lives at
    /// `symbol_start + n`.
    pub symbol_start: usize,
    pub imports: Vec<Import>,
    pub calls: Vec<RawCall>,
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub files: Vec<FileRecord>,
    pub symbols: Vec<Symbol>,
    /// fq_name before disambiguation, parallel to `symbols`.
    pub raw_fq: Vec<String>,
    /// Global index of each symbol's container, parallel to `symbols`.
    pub parents: Vec<Option<usize>>,
    pub units: Vec<ResolvedUnit>,
    pub reused: usize,
    pub reanalyzed: usize,
}

impl Resolution {
    pub fn unit_of(&self, index: usize) -> Option<&ResolvedUnit> {
        let pos = self
            .units
            .partition_point(|unit| unit.symbol_start <= index);
        pos.checked_sub(1).map(|pos| &self.units[pos])
    }
}

struct Pending {
    name: String,
    kind: SymbolKind,
    file: String,
    span: Span,
    visibility: Visibility,
    is_entrypoint: bool,
}

/// Turns per-file fragments into the global symbol table: final fq names,
/// ids, containers, export and entrypoint flags.
pub fn resolve(mut files: Vec<ParsedFile>, manual_entrypoints: &[String]) -> Resolution {
    files.sort_by(|a, b| a.record.path.cmp(&b.record.path));

    let mut out = Resolution::default();
    let mut pending: Vec<Pending> = Vec::new();
    for parsed in files {
        let ParsedFile {
            record,
            fragment,
            reused,
        } = parsed;
        if reused {
            out.reused += 1;
        } else {
            out.reanalyzed += 1;
        }
        let start = pending.len();
        for raw in &fragment.symbols {
            pending.push(Pending {
                name: raw.name.clone(),
                kind: raw.kind,
                file: record.path.clone(),
                span: raw.span,
                visibility: raw.visibility,
                is_entrypoint: raw.is_entrypoint,
            });
            out.raw_fq.push(raw.fq_name.clone());
            out.parents
                .push(raw.container.map(|local| start + local as usize));
        }
        out.units.push(ResolvedUnit {
            file: record.path.clone(),
            language: fragment.language,
            module_fq: fragment
                .module()
                .map(|module| module.fq_name.clone())
                .unwrap_or_default(),
            scope: fragment.scope,
            symbol_start: start,
            imports: fragment.imports,
            calls: fragment.calls,
        });
        out.files.push(record);
    }

    let local_fq = number_local_duplicates(&out, &pending);
    let final_fq = claim_across_files(&local_fq, &pending);
    let exported = exported_flags(&out.parents, &pending);
    let manual: HashSet<&str> = manual_entrypoints.iter().map(String::as_str).collect();

    // Ids hash the file-local fq; `@path` only changes the emitted name.
    let ids: Vec<String> = pending
        .iter()
        .zip(&local_fq)
        .map(|(p, fq)| symbol_id(&p.file, fq, p.kind))
        .collect();
    out.symbols = pending
        .into_iter()
        .enumerate()
        .map(|(index, p)| {
            let fq_name = final_fq[index].clone();
            let is_entrypoint = p.is_entrypoint
                || manual.contains(p.name.as_str())
                || manual.contains(fq_name.as_str());
            Symbol {
                id: ids[index].clone(),
                name: p.name,
                kind: p.kind,
                file: p.file,
                span: p.span,
                container: out.parents[index].map(|parent| ids[parent].clone()),
                fq_name,
                is_exported: exported[index],
                is_entrypoint,
            }
        })
        .collect();
    out
}

/// Same-file duplicates get `#2`, `#3`, ... in span order.
fn number_local_duplicates(out: &Resolution, pending: &[Pending]) -> Vec<String> {
    let mut local_fq = out.raw_fq.clone();
    for (pos, unit) in out.units.iter().enumerate() {
        let end = out
            .units
            .get(pos + 1)
            .map(|next| next.symbol_start)
            .unwrap_or(pending.len());
        let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for index in unit.symbol_start..end {
            groups.entry(out.raw_fq[index].as_str()).or_default().push(index);
        }
        for (fq, mut members) in groups {
            if members.len() < 2 {
                continue;
            }
            members.sort_by_key(|&index| (pending[index].span.start(), pending[index].kind, index));
            for (ordinal, index) in members.into_iter().enumerate().skip(1) {
                local_fq[index] = format!("{fq}#{}", ordinal + 1);
            }
        }
    }
    local_fq
}

/// Cross-file collisions keep the name in the first file by path and get
/// `@path` in later ones.
fn claim_across_files(local_fq: &[String], pending: &[Pending]) -> Vec<String> {
    let mut claimed: HashSet<String> = HashSet::new();
    let mut final_fq = local_fq.to_vec();
    for (index, fq) in final_fq.iter_mut().enumerate() {
        if !claimed.insert(fq.clone()) {
            *fq = format!("{fq}@{}", pending[index].file);
            claimed.insert(fq.clone());
        }
    }
    final_fq
}

fn exported_flags(parents: &[Option<usize>], pending: &[Pending]) -> Vec<bool> {
    let mut memo: Vec<Option<bool>> = vec![None; pending.len()];
    for index in 0..pending.len() {
        let mut chain = Vec::new();
        let mut cursor = Some(index);
        let mut inherited = true;
        while let Some(current) = cursor {
            if let Some(known) = memo[current] {
                inherited = known;
                break;
            }
            chain.push(current);
            cursor = parents[current];
        }
        for &current in chain.iter().rev() {
            let own = match parents[current] {
                None => true,
                Some(_) => pending[current].visibility == Visibility::Public,
            };
            inherited = inherited && own;
            memo[current] = Some(inherited);
        }
    }
    memo.into_iter().map(|flag| flag.unwrap_or(false)).collect()
}

/// Symbols indexed by raw fq and by bare name for the linker.
pub struct SymbolIndex<'a> {
    pub by_fq: HashMap<&'a str, Vec<usize>>,
    pub by_name: HashMap<&'a str, Vec<usize>>,
}

impl<'a> SymbolIndex<'a> {
    /// Module symbols are never call targets and stay out of the index.
    pub fn build(resolution: &'a Resolution) -> Self {
        let mut by_fq: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
        for (index, symbol) in resolution.symbols.iter().enumerate() {
            if symbol.kind == SymbolKind::Module {
                continue;
            }
            by_fq
                .entry(resolution.raw_fq[index].as_str())
                .or_default()
                .push(index);
            by_name.entry(symbol.name.as_str()).or_default().push(index);
        }
        Self { by_fq, by_name }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::extract::{Declaration, FragmentBuilder, text_span};

    fn record(path: &str, language: Language) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            language,
            content_hash: "h".to_string(),
            byte_size: 1,
        }
    }

    fn decl(name: &str, kind: SymbolKind, fq: &str, line: u32, visibility: Visibility) -> Declaration {
        Declaration {
            name: name.to_string(),
            kind,
            fq_name: fq.to_string(),
            span: Span::new(line, 1, line, 10),
            visibility,
            attributes: Vec::new(),
        }
    }

    fn parsed(path: &str, module: &str, decls: Vec<Declaration>) -> ParsedFile {
        let mut builder =
            FragmentBuilder::new(Language::Python, path, module.to_string(), text_span("x\n"));
        for d in decls {
            builder.declare(d);
        }
        ParsedFile {
            record: record(path, Language::Python),
            fragment: builder.finish(|c| c.name == "main"),
            reused: false,
        }
    }

    #[test]
    fn same_file_duplicates_are_numbered_by_position() {
        let file = parsed(
            "m.py",
            "m",
            vec![
                decl("f", SymbolKind::Function, "m.f", 9, Visibility::Public),
                decl("f", SymbolKind::Function, "m.f", 2, Visibility::Public),
            ],
        );
        let res = resolve(vec![file], &[]);
        assert_eq!(res.symbols[2].fq_name, "m.f");
        assert_eq!(res.symbols[1].fq_name, "m.f#2");
        assert_ne!(res.symbols[1].id, res.symbols[2].id);
    }

    #[test]
    fn cross_file_collisions_keep_the_first_path() {
        let b = parsed("b.py", "shared", vec![]);
        let a = parsed("a.py", "shared", vec![]);
        let res = resolve(vec![b, a], &[]);
        assert_eq!(res.files[0].path, "a.py");
        assert_eq!(res.symbols[0].fq_name, "shared");
        assert_eq!(res.symbols[1].fq_name, "shared@b.py");
        assert_eq!(
            res.symbols[1].id,
            symbol_id("b.py", "shared", SymbolKind::Module)
        );
    }

    #[test]
    fn ids_ignore_collisions_with_other_files() {
        let alone = resolve(
            vec![parsed("pkg/b.py", "pkg.b", vec![decl("run", SymbolKind::Function, "pkg.run", 1, Visibility::Public)])],
            &[],
        );
        let crowded = resolve(
            vec![
                parsed("pkg/a.py", "pkg.a", vec![decl("run", SymbolKind::Function, "pkg.run", 1, Visibility::Public)]),
                parsed("pkg/b.py", "pkg.b", vec![decl("run", SymbolKind::Function, "pkg.run", 1, Visibility::Public)]),
            ],
            &[],
        );
        let before = alone.symbols.iter().find(|s| s.name == "run").unwrap();
        let after = crowded
            .symbols
            .iter()
            .find(|s| s.file == "pkg/b.py" && s.name == "run")
            .unwrap();
        assert_eq!(after.fq_name, "pkg.run@pkg/b.py");
        assert_eq!(after.id, before.id);
        let ids: HashSet<&str> = crowded.symbols.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids.len(), crowded.symbols.len());
    }

    #[test]
    fn export_requires_a_public_chain() {
        let file = parsed(
            "m.py",
            "m",
            vec![
                decl("_Hidden", SymbolKind::Class, "m._Hidden", 1, Visibility::Private),
                decl("run", SymbolKind::Method, "m._Hidden.run", 2, Visibility::Public),
                decl("Open", SymbolKind::Class, "m.Open", 5, Visibility::Public),
                decl("go", SymbolKind::Method, "m.Open.go", 6, Visibility::Public),
            ],
        );
        let res = resolve(vec![file], &[]);
        let flags: Vec<_> = res.symbols.iter().map(|s| (s.fq_name.as_str(), s.is_exported)).collect();
        assert_eq!(
            flags,
            vec![
                ("m", true),
                ("m._Hidden", false),
                ("m._Hidden.run", false),
                ("m.Open", true),
                ("m.Open.go", true),
            ]
        );
        assert_eq!(res.symbols[2].container.as_deref(), Some(res.symbols[1].id.as_str()));
    }

    #[test]
    fn manual_entrypoints_match_name_or_fq() {
        let file = parsed(
            "m.py",
            "m",
            vec![
                decl("main", SymbolKind::Function, "m.main", 1, Visibility::Public),
                decl("serve", SymbolKind::Function, "m.serve", 3, Visibility::Public),
                decl("boot", SymbolKind::Function, "m.boot", 5, Visibility::Public),
            ],
        );
        let res = resolve(vec![file], &["m.boot".to_string(), "serve".to_string()]);
        let entries: Vec<_> = res
            .symbols
            .iter()
            .filter(|s| s.is_entrypoint)
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(entries, vec!["main", "serve", "boot"]);
    }

    #[test]
    fn unit_lookup_by_global_index() {
        let a = parsed("a.py", "a", vec![decl("x", SymbolKind::Function, "a.x", 1, Visibility::Public)]);
        let b = parsed("b.py", "b", vec![]);
        let res = resolve(vec![a, b], &[]);
        assert_eq!(res.unit_of(1).map(|u| u.file.as_str()), Some("a.py"));
        assert_eq!(res.unit_of(2).map(|u| u.file.as_str()), Some("b.py"));
    }
}
