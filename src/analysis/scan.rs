use crate::error::AnalysisError;
use crate::model::{Diagnostic, FileRecord, Language};
use crate::util;
use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;
use std::fs;
use std::path::{Path, PathBuf};

pub const IGNORE_FILE_NAME: &str = ".astrographignore";
pub const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Directories never descended into, whatever the ignore files say.
pub const ALWAYS_SKIPPED_DIRS: &[&str] = &[
    ".git",
    ".astrograph",
    "target",
    "node_modules",
    "dist",
    "build",
    ".turbo",
    ".idea",
    ".vscode",
    ".cargo",
    "__pycache__",
    ".venv",
    "venv",
];

const VISIBLE_HIDDEN_DIRS: &[&str] = &[".github"];

#[derive(Debug, Clone)]
pub struct LanguageSpec {
    pub language: Language,
    pub extensions: &'static [&'static str],
}

static LANGUAGE_SPECS: &[LanguageSpec] = &[
    LanguageSpec {
        language: Language::Rust,
        extensions: &["rs"],
    },
    LanguageSpec {
        language: Language::JavaScript,
        extensions: &["js", "jsx", "mjs", "cjs"],
    },
    LanguageSpec {
        language: Language::TypeScript,
        extensions: &["ts", "mts", "cts"],
    },
    LanguageSpec {
        language: Language::Tsx,
        extensions: &["tsx"],
    },
    LanguageSpec {
        language: Language::Python,
        extensions: &["py", "pyi"],
    },
    LanguageSpec {
        language: Language::Go,
        extensions: &["go"],
    },
];

pub fn language_specs() -> &'static [LanguageSpec] {
    LANGUAGE_SPECS
}

pub fn language_for_path(path: &Path) -> Option<Language> {
    let ext = path.extension().and_then(|ext| ext.to_str())?;
    LANGUAGE_SPECS
        .iter()
        .find(|spec| spec.extensions.contains(&ext))
        .map(|spec| spec.language)
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub no_ignore: bool,
    pub follow_symlinks: bool,
    pub max_file_bytes: u64,
    /// Extra gitignore-style globs, relative to the root.
    pub exclude: Vec<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            no_ignore: false,
            follow_symlinks: false,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub record: FileRecord,
    pub abs_path: PathBuf,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Sorted by relative path.
    pub files: Vec<ScannedFile>,
    pub warnings: Vec<Diagnostic>,
}

/// Canonicalizes `root`, failing when it is missing or not a directory.
pub fn canonical_root(root: &Path) -> Result<PathBuf, AnalysisError> {
    let canonical = fs::canonicalize(root).map_err(|source| AnalysisError::Collection {
        root: root.to_path_buf(),
        source,
    })?;
    let metadata = fs::metadata(&canonical).map_err(|source| AnalysisError::Collection {
        root: root.to_path_buf(),
        source,
    })?;
    if !metadata.is_dir() {
        return Err(AnalysisError::NotADirectory {
            root: root.to_path_buf(),
        });
    }
    Ok(canonical)
}

pub fn collect_files(root: &Path, options: &ScanOptions) -> Result<ScanOutcome, AnalysisError> {
    let root = canonical_root(root)?;
    // Surface an unreadable root as a collection failure instead of an empty walk.
    fs::read_dir(&root).map_err(|source| AnalysisError::Collection {
        root: root.clone(),
        source,
    })?;

    let mut builder = WalkBuilder::new(&root);
    if options.no_ignore {
        builder
            .ignore(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .parents(false);
    } else {
        builder
            .ignore(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .parents(true)
            .require_git(false);
        builder.add_custom_ignore_filename(IGNORE_FILE_NAME);
    }
    if !options.exclude.is_empty() {
        let mut overrides = OverrideBuilder::new(&root);
        for glob in &options.exclude {
            overrides
                .add(&format!("!{glob}"))
                .map_err(|err| AnalysisError::Config(format!("exclude glob {glob:?}: {err}")))?;
        }
        let overrides = overrides
            .build()
            .map_err(|err| AnalysisError::Config(format!("exclude globs: {err}")))?;
        builder.overrides(overrides);
    }
    let walker = builder
        .hidden(false)
        .follow_links(options.follow_symlinks)
        .filter_entry(|entry| !is_skipped_dir(entry))
        .build();

    let mut outcome = ScanOutcome::default();
    for entry in walker {
        let entry = match entry {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("walk error: {err}");
                outcome
                    .warnings
                    .push(Diagnostic::warning(walk_error_path(&err, &root), err.to_string()));
                continue;
            }
        };
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        let Some(language) = language_for_path(path) else {
            continue;
        };
        let rel_path = match util::normalize_rel_path(&root, path) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("skip {}: {err:#}", path.display());
                continue;
            }
        };
        match read_file(path, options.max_file_bytes) {
            Ok((content_hash, byte_size)) => outcome.files.push(ScannedFile {
                record: FileRecord {
                    path: rel_path,
                    language,
                    content_hash,
                    byte_size,
                },
                abs_path: path.to_path_buf(),
            }),
            Err(reason) => {
                tracing::warn!("skip {rel_path}: {reason}");
                outcome.warnings.push(Diagnostic::warning(rel_path, reason));
            }
        }
    }
    outcome
        .files
        .sort_by(|a, b| a.record.path.cmp(&b.record.path));
    Ok(outcome)
}

fn read_file(path: &Path, max_file_bytes: u64) -> Result<(String, u64), String> {
    let metadata = fs::metadata(path).map_err(|err| format!("unreadable: {err}"))?;
    if metadata.len() > max_file_bytes {
        return Err(format!(
            "file is {} bytes, above the {max_file_bytes} byte limit",
            metadata.len()
        ));
    }
    let data = fs::read(path).map_err(|err| format!("unreadable: {err}"))?;
    Ok((util::hash_bytes(&data), data.len() as u64))
}

fn is_skipped_dir(entry: &ignore::DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false) {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    if ALWAYS_SKIPPED_DIRS.contains(&name.as_ref()) {
        return true;
    }
    name.starts_with('.') && !VISIBLE_HIDDEN_DIRS.contains(&name.as_ref())
}

fn walk_error_path(err: &ignore::Error, root: &Path) -> String {
    let path = match err {
        ignore::Error::WithPath { path, .. } => Some(path.as_path()),
        ignore::Error::Loop { child, .. } => Some(child.as_path()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            return walk_error_path(err, root);
        }
        _ => None,
    };
    path.and_then(|path| util::normalize_rel_path(root, path).ok())
        .unwrap_or_else(|| ".".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_table_covers_extensions() {
        assert_eq!(language_for_path(Path::new("a/b.rs")), Some(Language::Rust));
        assert_eq!(language_for_path(Path::new("x.mjs")), Some(Language::JavaScript));
        assert_eq!(language_for_path(Path::new("x.cts")), Some(Language::TypeScript));
        assert_eq!(language_for_path(Path::new("x.tsx")), Some(Language::Tsx));
        assert_eq!(language_for_path(Path::new("x.pyi")), Some(Language::Python));
        assert_eq!(language_for_path(Path::new("x.go")), Some(Language::Go));
        assert_eq!(language_for_path(Path::new("README.md")), None);
        assert_eq!(language_for_path(Path::new("Makefile")), None);
    }

    #[test]
    fn missing_root_is_a_collection_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = collect_files(&dir.path().join("absent"), &ScanOptions::default()).unwrap_err();
        assert!(err.is_collection());
    }

    #[test]
    fn file_root_is_not_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("lib.rs");
        fs::write(&file, "fn a() {}").unwrap();
        let err = collect_files(&file, &ScanOptions::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::NotADirectory { .. }));
    }

    #[test]
    fn oversized_files_are_skipped_with_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("small.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("big.py"), "y = 2\n".repeat(100)).unwrap();
        let options = ScanOptions {
            max_file_bytes: 64,
            ..ScanOptions::default()
        };
        let outcome = collect_files(dir.path(), &options).unwrap();
        let paths: Vec<_> = outcome.files.iter().map(|f| f.record.path.as_str()).collect();
        assert_eq!(paths, vec!["small.py"]);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].path, "big.py");
    }

    #[test]
    fn records_hash_and_size() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "pub fn a() {}\n").unwrap();
        let outcome = collect_files(dir.path(), &ScanOptions::default()).unwrap();
        let record = &outcome.files[0].record;
        assert_eq!(record.path, "src/lib.rs");
        assert_eq!(record.byte_size, 14);
        assert_eq!(record.content_hash, util::hash_bytes(b"pub fn a() {}\n"));
    }
}
