use crate::cache::ContentCache;
use crate::config::Config;
use crate::error::AnalysisError;
use crate::model::{AnalysisResult, Diagnostic};
use crate::progress::{CancellationToken, NoProgress, Phase, ProgressEvent, ProgressSink};
use crate::util;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

pub mod assemble;
pub mod extract;
pub mod go;
pub mod javascript;
pub mod link;
pub mod python;
pub mod resolve;
pub mod rust;
pub mod scan;
pub mod stable_id;

use extract::{Fragment, ParserSet};
use resolve::ParsedFile;
use scan::ScannedFile;

/// The document plus the per-file problems met while building it.
#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub result: AnalysisResult,
    pub diagnostics: Vec<Diagnostic>,
}

struct FileOutcome {
    parsed: ParsedFile,
    diagnostics: Vec<Diagnostic>,
}

pub struct Analyzer {
    root: PathBuf,
    config: Config,
    cache: Option<ContentCache>,
    pool: rayon::ThreadPool,
}

impl Analyzer {
    pub fn new(root: impl AsRef<Path>, config: Config) -> Result<Self, AnalysisError> {
        let root = scan::canonical_root(root.as_ref())?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|index| format!("astrograph-parse-{index}"))
            .build()
            .map_err(|err| AnalysisError::WorkerPool(err.to_string()))?;
        Ok(Self {
            root,
            config,
            cache: None,
            pool,
        })
    }

    pub fn with_cache(mut self, cache: ContentCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> Option<&ContentCache> {
        self.cache.as_ref()
    }

    pub fn analyze(&self) -> Result<AnalysisOutput, AnalysisError> {
        self.analyze_with(&NoProgress, &CancellationToken::new())
    }

    pub fn analyze_with(
        &self,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<AnalysisOutput, AnalysisError> {
        let started = Instant::now();
        progress.report(event(Phase::Collecting, None, 0, 0));
        let scanned = scan::collect_files(&self.root, &self.config.scan_options())?;
        let total = scanned.files.len();
        tracing::debug!("collected {total} files under {}", self.root.display());
        progress.report(event(Phase::Collecting, None, total, total));

        if let Some(cache) = &self.cache {
            match cache.bind_root(&self.root) {
                Ok(0) => {}
                Ok(removed) => tracing::debug!("dropped {removed} cache entries from another root"),
                Err(err) => tracing::warn!("cache root check failed: {err:#}"),
            }
        }

        let mut diagnostics = scanned.warnings;
        let processed = AtomicUsize::new(0);
        let outcomes: Vec<Option<FileOutcome>> = self.pool.install(|| {
            scanned
                .files
                .par_iter()
                .map_init(ParserSet::new, |parsers, file| {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    let outcome = self.process_file(file, parsers, cancel);
                    let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
                    progress.report(event(
                        Phase::Parsing,
                        Some(file.record.path.clone()),
                        done,
                        total,
                    ));
                    Some(outcome)
                })
                .collect()
        });
        if cancel.is_cancelled() {
            tracing::info!("analysis cancelled after {} of {total} files", processed.into_inner());
            return Err(AnalysisError::Cancelled);
        }

        let mut parsed = Vec::with_capacity(outcomes.len());
        for outcome in outcomes.into_iter().flatten() {
            diagnostics.extend(outcome.diagnostics);
            parsed.push(outcome.parsed);
        }

        if let Some(cache) = &self.cache {
            let keep: Vec<&str> = scanned.files.iter().map(|f| f.record.path.as_str()).collect();
            match cache.retain_paths(&keep) {
                Ok(0) => {}
                Ok(removed) => tracing::debug!("purged {removed} stale cache entries"),
                Err(err) => tracing::warn!("cache purge failed: {err:#}"),
            }
        }

        progress.report(event(Phase::Resolving, None, 0, total));
        let resolution = resolve::resolve(parsed, &self.config.entrypoints);
        progress.report(event(Phase::Resolving, None, total, total));

        progress.report(event(Phase::Linking, None, 0, total));
        let calls = link::link(&resolution, &self.config.link_policy());
        progress.report(event(Phase::Linking, None, total, total));

        progress.report(event(Phase::Assembling, None, 0, total));
        let resolve::Resolution {
            files,
            symbols,
            reused,
            reanalyzed,
            ..
        } = resolution;
        let result = assemble::assemble(assemble::AssemblyInput {
            root: self.root.to_string_lossy().to_string(),
            files,
            symbols,
            calls,
            reused,
            reanalyzed,
        })?;
        progress.report(event(Phase::Assembling, None, total, total));

        diagnostics.sort_by(|a, b| {
            a.path
                .cmp(&b.path)
                .then(a.span.map(|s| s.start()).cmp(&b.span.map(|s| s.start())))
        });
        tracing::info!(
            "analyzed {} files ({} reused, {} parsed): {} symbols, {} calls in {:?}",
            result.stats.file_count,
            result.stats.reused_cache_files,
            result.stats.reanalyzed_files,
            result.stats.symbol_count,
            result.stats.call_count,
            started.elapsed()
        );
        Ok(AnalysisOutput {
            result,
            diagnostics,
        })
    }

    fn process_file(
        &self,
        file: &ScannedFile,
        parsers: &mut ParserSet,
        cancel: &CancellationToken,
    ) -> FileOutcome {
        let record = &file.record;
        if let Some(fragment) = self.cached_fragment(file) {
            let diagnostics = fragment.diagnostics.clone();
            return FileOutcome {
                parsed: ParsedFile {
                    record: record.clone(),
                    fragment,
                    reused: true,
                },
                diagnostics,
            };
        }

        let mut extra = Vec::new();
        let (fragment, storable) = match fs::read(&file.abs_path) {
            Ok(bytes) => {
                let fragment = parsers.parse(record, &bytes);
                let unchanged = util::hash_bytes(&bytes) == record.content_hash;
                if !unchanged {
                    extra.push(Diagnostic::warning(
                        record.path.clone(),
                        "file changed during analysis; result not cached",
                    ));
                }
                (fragment, unchanged)
            }
            Err(err) => (
                Fragment::fallback(record, b"", format!("unreadable at parse time: {err}")),
                false,
            ),
        };

        if storable && !cancel.is_cancelled() {
            if let Some(cache) = &self.cache {
                if let Err(err) = cache.store(&record.path, &record.content_hash, &fragment) {
                    tracing::warn!("cache store failed for {}: {err:#}", record.path);
                }
            }
        }

        let mut diagnostics = fragment.diagnostics.clone();
        diagnostics.extend(extra);
        for diagnostic in &diagnostics {
            tracing::debug!("{diagnostic}");
        }
        FileOutcome {
            parsed: ParsedFile {
                record: record.clone(),
                fragment,
                reused: false,
            },
            diagnostics,
        }
    }

    fn cached_fragment(&self, file: &ScannedFile) -> Option<Fragment> {
        let cache = self.cache.as_ref()?;
        let record = &file.record;
        match cache.lookup(&record.path, &record.content_hash) {
            Ok(Some(fragment)) if fragment.language == record.language => Some(fragment),
            Ok(_) => None,
            Err(err) => {
                tracing::warn!("cache lookup failed for {}: {err:#}", record.path);
                None
            }
        }
    }
}

fn event(phase: Phase, current_file: Option<String>, processed: usize, total: usize) -> ProgressEvent {
    ProgressEvent {
        phase,
        current_file,
        processed,
        total,
    }
}

/// One-shot analysis without a cache.
pub fn analyze_project(root: impl AsRef<Path>, config: Config) -> Result<AnalysisOutput, AnalysisError> {
    Analyzer::new(root, config)?.analyze()
}
