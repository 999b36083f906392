use anyhow::{Context, Result, bail};
use astrograph::analysis::{Analyzer, assemble};
use astrograph::cache::ContentCache;
use astrograph::cli::{self, CacheAction};
use astrograph::config::Config;
use astrograph::model::{AnalysisResult, Severity};
use astrograph::{source, util};
use clap::Parser;
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: bool, quiet: bool) {
    let default = if verbose {
        "astrograph=debug"
    } else if quiet {
        "warn"
    } else {
        "astrograph=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn cache_path(root: &Path, explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| ContentCache::default_path(root))
}

fn main() -> Result<()> {
    let args = cli::Args::parse();
    init_logging(args.verbose, args.quiet);

    match args.command {
        cli::Command::Analyze {
            root,
            out,
            cache,
            no_cache,
            entrypoints,
            follow_symlinks,
            no_ignore,
            threads,
            config,
            pretty,
        } => {
            let mut settings = Config::load(&root, config.as_deref())?;
            settings.entrypoints.extend(entrypoints);
            settings.follow_symlinks |= follow_symlinks;
            settings.no_ignore |= no_ignore;
            if let Some(threads) = threads {
                settings.threads = threads;
            }
            if no_cache {
                settings.cache = false;
            }

            let use_cache = settings.cache;
            let mut analyzer = Analyzer::new(&root, settings)?;
            if use_cache {
                let path = cache_path(analyzer.root(), cache);
                match ContentCache::open(&path) {
                    Ok(cache) => analyzer = analyzer.with_cache(cache),
                    Err(err) => tracing::warn!("cache unavailable, parsing every file: {err:#}"),
                }
            }

            let output = analyzer.analyze()?;
            for diagnostic in &output.diagnostics {
                match diagnostic.severity {
                    Severity::Error => tracing::error!("{diagnostic}"),
                    Severity::Warning => tracing::warn!("{diagnostic}"),
                }
            }
            let document = output.result.to_json(pretty)?;
            match out {
                Some(path) => {
                    util::ensure_parent_dir(&path)?;
                    std::fs::write(&path, document)
                        .with_context(|| format!("write {}", path.display()))?;
                    let stats = &output.result.stats;
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&json!({
                            "out": path.to_string_lossy(),
                            "stats": stats,
                            "diagnostics": output.diagnostics.len(),
                        }))?
                    );
                }
                None => {
                    let mut stdout = std::io::stdout().lock();
                    stdout.write_all(document.as_bytes())?;
                    stdout.write_all(b"\n")?;
                }
            }
            Ok(())
        }
        cli::Command::Validate { input } => {
            let raw = std::fs::read_to_string(&input)
                .with_context(|| format!("read {}", input.display()))?;
            let result = AnalysisResult::from_json(&raw)?;
            assemble::validate(&result)?;
            println!("{}", serde_json::to_string_pretty(&result.stats)?);
            Ok(())
        }
        cli::Command::Show {
            root,
            path,
            start_line,
            end_line,
        } => {
            let text = match (start_line, end_line) {
                (Some(start), Some(end)) => source::read_source_lines(&root, &path, start, end)?,
                _ => String::from_utf8_lossy(&source::read_source(&root, &path)?).into_owned(),
            };
            println!("{text}");
            Ok(())
        }
        cli::Command::Cache {
            action,
            root,
            cache,
        } => {
            let root = std::fs::canonicalize(&root)
                .with_context(|| format!("resolve root {}", root.display()))?;
            let path = cache_path(&root, cache);
            if !path.exists() {
                if action == CacheAction::Stats {
                    println!("{}", json!({ "path": path.to_string_lossy(), "entries": 0 }));
                    return Ok(());
                }
                bail!("no cache at {}", path.display());
            }
            let cache = ContentCache::open(&path)?;
            match action {
                CacheAction::Clear => {
                    let removed = cache.clear()?;
                    println!("{}", json!({ "path": path.to_string_lossy(), "removed": removed }));
                }
                CacheAction::Stats => {
                    let stats = cache.stats()?;
                    let bound_root = cache.bound_root()?;
                    println!(
                        "{}",
                        json!({
                            "path": path.to_string_lossy(),
                            "root": bound_root.map(|root| root.to_string_lossy().into_owned()),
                            "entries": stats.entries,
                            "payload_bytes": stats.payload_bytes,
                        })
                    );
                }
            }
            Ok(())
        }
    }
}
