use astrograph::analysis::{analyze_project, assemble};
use astrograph::config::Config;
use astrograph::model::{AnalysisResult, Severity};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn assert_consistent(result: &AnalysisResult) {
    assemble::validate(result).unwrap();
    assert_eq!(result.stats.file_count, result.files.len());
    assert_eq!(result.stats.symbol_count, result.symbols.len());
    assert_eq!(result.stats.call_count, result.calls.len());
    assert_eq!(
        result.stats.reused_cache_files + result.stats.reanalyzed_files,
        result.stats.file_count
    );

    let ids: HashSet<&str> = result.symbols.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids.len(), result.symbols.len());
    let keys: HashSet<_> = result
        .symbols
        .iter()
        .map(|s| (s.file.as_str(), s.fq_name.as_str(), s.kind))
        .collect();
    assert_eq!(keys.len(), result.symbols.len());
    for call in &result.calls {
        assert!(ids.contains(call.caller_id.as_str()));
        if let Some(callee) = &call.callee_id {
            assert!(ids.contains(callee.as_str()));
        }
    }
}

#[test]
fn main_calling_helper_in_another_file() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "main.py",
        "from helper import helper\n\n\ndef main():\n    helper()\n",
    );
    write(dir.path(), "helper.py", "def helper():\n    return 42\n");

    let output = analyze_project(dir.path(), Config::default()).unwrap();
    let result = &output.result;
    assert_consistent(result);
    assert!(output.diagnostics.is_empty());

    let main = result.symbol_by_fq("main.main").unwrap();
    let helper = result.symbol_by_fq("helper.helper").unwrap();
    assert_eq!(result.calls.len(), 1);
    let call = &result.calls[0];
    assert_eq!(call.caller_id, main.id);
    assert_eq!(call.callee_id.as_deref(), Some(helper.id.as_str()));
    assert_eq!(call.file, "main.py");
    assert_eq!(result.entrypoints, vec![main.id.clone()]);
    assert_eq!(result.stats.entrypoint_count, 1);
}

#[test]
fn external_call_stays_unresolved() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "app.js",
        "function run() {\n  fetchRemote(\"https://example.com\");\n}\n",
    );

    let result = analyze_project(dir.path(), Config::default()).unwrap().result;
    assert_consistent(&result);
    assert_eq!(result.calls.len(), 1);
    assert_eq!(result.calls[0].callee_name, "fetchRemote");
    assert_eq!(result.calls[0].callee_id, None);

    let json = result.to_json(false).unwrap();
    assert!(json.contains("\"callee_id\":null"));
}

#[test]
fn one_broken_file_does_not_abort_the_run() {
    let dir = tempfile::tempdir().unwrap();
    for n in 0..9 {
        write(
            dir.path(),
            &format!("src/ok_{n}.rs"),
            &format!("pub fn valid_{n}() {{}}\n"),
        );
    }
    write(dir.path(), "src/broken.rs", "pub fn broken( {\n    let = ;\n");

    let output = analyze_project(dir.path(), Config::default()).unwrap();
    let result = &output.result;
    assert_consistent(result);
    assert_eq!(result.stats.file_count, 10);
    for n in 0..9 {
        assert!(
            result
                .symbol_by_fq(&format!("src::ok_{n}::valid_{n}"))
                .is_some(),
            "missing symbol for ok_{n}"
        );
    }
    let broken: Vec<_> = output
        .diagnostics
        .iter()
        .filter(|d| d.path == "src/broken.rs")
        .collect();
    assert!(!broken.is_empty());
    assert!(broken.iter().any(|d| d.severity == Severity::Error));
    assert!(output.diagnostics.iter().all(|d| d.path == "src/broken.rs"));
}

#[test]
fn repeated_runs_are_identical_apart_from_the_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "src/lib.rs",
        "pub fn a() { b(); c(); }\nfn b() { c(); }\nfn c() {}\n",
    );
    write(dir.path(), "web/app.ts", "export function go() { start(); }\n");

    let mut config = Config::default();
    config.cache = false;
    let first = analyze_project(dir.path(), config.clone()).unwrap().result;
    let second = analyze_project(dir.path(), config).unwrap().result;
    assert_eq!(first.symbols, second.symbols);
    assert_eq!(first.calls, second.calls);
    assert_eq!(first.files, second.files);
    assert_eq!(first.stats, second.stats);
    assert_eq!(first.entrypoints, second.entrypoints);
    assert_consistent(&first);
}

#[test]
fn manual_entrypoints_match_name_or_fq_name() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "svc/server.py",
        "def serve():\n    pass\n\n\ndef handler():\n    pass\n",
    );
    write(dir.path(), "svc/jobs.py", "def nightly():\n    pass\n");

    let mut config = Config::default();
    config.entrypoints = vec!["serve".to_string(), "svc.jobs.nightly".to_string()];
    let result = analyze_project(dir.path(), config).unwrap().result;
    let flagged: Vec<_> = result
        .entrypoints
        .iter()
        .map(|id| result.symbol(id).unwrap().fq_name.as_str())
        .collect();
    assert_eq!(flagged, vec!["svc.jobs.nightly", "svc.server.serve"]);
    assert!(!result.symbol_by_fq("svc.server.handler").unwrap().is_entrypoint);
}

#[test]
fn cross_file_collisions_keep_distinct_ids() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a/util.go", "package util\n\nfunc Shared() {}\n");
    write(dir.path(), "a/util_extra.go", "package util\n\nfunc Shared() {}\n");

    let output = analyze_project(dir.path(), Config::default()).unwrap();
    assert_consistent(&output.result);
    let mut shared: Vec<_> = output
        .result
        .symbols
        .iter()
        .filter(|s| s.name == "Shared")
        .map(|s| s.fq_name.as_str())
        .collect();
    shared.sort();
    assert_eq!(shared, vec!["a.Shared", "a.Shared@a/util_extra.go"]);
}

#[test]
fn missing_root_is_a_collection_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = analyze_project(dir.path().join("absent"), Config::default()).unwrap_err();
    assert!(err.is_collection());
}
