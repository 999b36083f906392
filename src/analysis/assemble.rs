use crate::error::AnalysisError;
use crate::model::{
    AnalysisResult, AnalysisStats, CallEdge, FileRecord, SCHEMA_VERSION, Symbol,
};
use chrono::{SecondsFormat, Utc};
use std::collections::HashSet;

pub struct AssemblyInput {
    pub root: String,
    pub files: Vec<FileRecord>,
    pub symbols: Vec<Symbol>,
    pub calls: Vec<CallEdge>,
    pub reused: usize,
    pub reanalyzed: usize,
}

/// Sorts every collection by a stable key, derives stats, stamps version and
/// time, and refuses to return a document that fails [`validate`].
pub fn assemble(input: AssemblyInput) -> Result<AnalysisResult, AnalysisError> {
    let AssemblyInput {
        root,
        mut files,
        mut symbols,
        mut calls,
        reused,
        reanalyzed,
    } = input;

    files.sort_by(|a, b| a.path.cmp(&b.path));
    symbols.sort_by(|a, b| {
        a.file
            .cmp(&b.file)
            .then(a.span.start().cmp(&b.span.start()))
            .then((a.span.end_line, a.span.end_col).cmp(&(b.span.end_line, b.span.end_col)))
            .then(a.fq_name.cmp(&b.fq_name))
    });
    calls.sort_by(|a, b| {
        a.file
            .cmp(&b.file)
            .then(a.span.start().cmp(&b.span.start()))
            .then(a.id.cmp(&b.id))
    });
    let entrypoints: Vec<String> = symbols
        .iter()
        .filter(|symbol| symbol.is_entrypoint)
        .map(|symbol| symbol.id.clone())
        .collect();

    let stats = AnalysisStats {
        file_count: files.len(),
        symbol_count: symbols.len(),
        call_count: calls.len(),
        entrypoint_count: entrypoints.len(),
        reused_cache_files: reused,
        reanalyzed_files: reanalyzed,
    };

    let result = AnalysisResult {
        schema_version: SCHEMA_VERSION.to_string(),
        root,
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        stats,
        files,
        symbols,
        calls,
        entrypoints,
    };
    validate(&result)?;
    Ok(result)
}

/// Checks the invariants every document must hold. Exposed for consumers
/// that load a document from disk.
pub fn validate(result: &AnalysisResult) -> Result<(), AnalysisError> {
    let files: HashSet<&str> = result.files.iter().map(|f| f.path.as_str()).collect();
    if files.len() != result.files.len() {
        return Err(integrity("duplicate file path"));
    }

    let mut ids: HashSet<&str> = HashSet::with_capacity(result.symbols.len());
    let mut fq_names: HashSet<&str> = HashSet::with_capacity(result.symbols.len());
    for symbol in &result.symbols {
        if !ids.insert(symbol.id.as_str()) {
            return Err(integrity(format!("duplicate symbol id {}", symbol.id)));
        }
        if !fq_names.insert(symbol.fq_name.as_str()) {
            return Err(integrity(format!("duplicate fq_name {}", symbol.fq_name)));
        }
        if !files.contains(symbol.file.as_str()) {
            return Err(integrity(format!(
                "symbol {} names unlisted file {}",
                symbol.id, symbol.file
            )));
        }
    }
    for symbol in &result.symbols {
        if let Some(container) = &symbol.container {
            if !ids.contains(container.as_str()) {
                return Err(integrity(format!(
                    "symbol {} has dangling container {container}",
                    symbol.id
                )));
            }
        }
    }

    let mut call_ids: HashSet<&str> = HashSet::with_capacity(result.calls.len());
    for call in &result.calls {
        if !call_ids.insert(call.id.as_str()) {
            return Err(integrity(format!("duplicate call id {}", call.id)));
        }
        if !ids.contains(call.caller_id.as_str()) {
            return Err(integrity(format!(
                "call {} has dangling caller {}",
                call.id, call.caller_id
            )));
        }
        if let Some(callee) = &call.callee_id {
            if !ids.contains(callee.as_str()) {
                return Err(integrity(format!(
                    "call {} has dangling callee {callee}",
                    call.id
                )));
            }
        }
    }

    for entry in &result.entrypoints {
        if !ids.contains(entry.as_str()) {
            return Err(integrity(format!("entrypoint {entry} is not a symbol")));
        }
    }

    let stats = &result.stats;
    let consistent = stats.file_count == result.files.len()
        && stats.symbol_count == result.symbols.len()
        && stats.call_count == result.calls.len()
        && stats.entrypoint_count == result.entrypoints.len()
        && stats.reused_cache_files + stats.reanalyzed_files == stats.file_count;
    if !consistent {
        return Err(integrity(format!("stats do not match collections: {stats:?}")));
    }
    Ok(())
}

fn integrity(message: impl Into<String>) -> AnalysisError {
    AnalysisError::Integrity(message.into())
}
