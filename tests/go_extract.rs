use astrograph::analysis::analyze_project;
use astrograph::config::Config;
use astrograph::model::{AnalysisResult, SymbolKind};
use std::fs;
use std::path::Path;

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn resolved(result: &AnalysisResult, callee_name: &str) -> Option<String> {
    let call = result
        .calls
        .iter()
        .find(|c| c.callee_name == callee_name)
        .unwrap_or_else(|| panic!("no call to {callee_name}"));
    call.callee_id
        .as_ref()
        .map(|id| result.symbol(id).unwrap().fq_name.clone())
}

#[test]
fn go_packages_span_files_and_imports() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "pkg/store/store.go",
        r#"package store

type Store struct {
	items map[string]string
}

func New() *Store {
	return &Store{items: map[string]string{}}
}

func (s *Store) Put(key string) {
	s.items[key] = key
	s.flush()
}

func (s *Store) flush() {}
"#,
    );
    write(
        dir.path(),
        "cmd/app/main.go",
        r#"package main

import (
	"fmt"

	"example.com/proj/pkg/store"
)

func main() {
	s := store.New()
	s.Put("k")
	report()
	fmt.Println("done")
}
"#,
    );
    write(
        dir.path(),
        "cmd/app/report.go",
        "package main\n\nfunc report() {}\n",
    );

    let result = analyze_project(dir.path(), Config::default()).unwrap().result;
    let names: Vec<_> = result
        .symbols
        .iter()
        .map(|s| (s.kind, s.fq_name.as_str()))
        .collect();
    assert!(names.contains(&(SymbolKind::Struct, "pkg.store.Store")));
    assert!(names.contains(&(SymbolKind::Function, "pkg.store.New")));
    assert!(names.contains(&(SymbolKind::Method, "pkg.store.Store.Put")));
    assert!(names.contains(&(SymbolKind::Function, "cmd.app.main")));
    assert!(names.contains(&(SymbolKind::Function, "cmd.app.report")));

    let put = result.symbol_by_fq("pkg.store.Store.Put").unwrap();
    let store = result.symbol_by_fq("pkg.store.Store").unwrap();
    assert_eq!(put.container.as_deref(), Some(store.id.as_str()));
    assert!(put.is_exported);
    assert!(!result.symbol_by_fq("pkg.store.Store.flush").unwrap().is_exported);

    assert_eq!(resolved(&result, "store.New").as_deref(), Some("pkg.store.New"));
    assert_eq!(resolved(&result, "s.Put").as_deref(), Some("pkg.store.Store.Put"));
    assert_eq!(resolved(&result, "s.flush").as_deref(), Some("pkg.store.Store.flush"));
    assert_eq!(resolved(&result, "report").as_deref(), Some("cmd.app.report"));
    assert_eq!(resolved(&result, "fmt.Println"), None);

    let main = result.symbol_by_fq("cmd.app.main").unwrap();
    assert_eq!(result.entrypoints, vec![main.id.clone()]);
}

#[test]
fn main_outside_package_main_is_not_an_entrypoint() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "tools/gen.go", "package tools\n\nfunc main() {}\n");

    let result = analyze_project(dir.path(), Config::default()).unwrap().result;
    assert!(result.symbol_by_fq("tools.main").is_some());
    assert!(result.entrypoints.is_empty());
}
