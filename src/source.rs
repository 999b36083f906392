use crate::error::SourceError;
use crate::util;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Reads a project file for source preview. Absolute paths, `..` components
/// and symlinks that lead outside `root` are refused.
pub fn read_source(root: &Path, rel_path: &str) -> Result<Vec<u8>, SourceError> {
    let path = contained_path(root, rel_path)?;
    fs::read(&path).map_err(|source| io_error(rel_path, source))
}

/// Lines `start_line..=end_line` (1-indexed, clamped) of a project file.
pub fn read_source_lines(
    root: &Path,
    rel_path: &str,
    start_line: usize,
    end_line: usize,
) -> Result<String, SourceError> {
    let bytes = read_source(root, rel_path)?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(util::slice_lines(&text, start_line, end_line))
}

fn contained_path(root: &Path, rel_path: &str) -> Result<PathBuf, SourceError> {
    let rel = Path::new(rel_path);
    let lexically_safe = !rel_path.is_empty()
        && rel
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
    if !lexically_safe {
        return Err(SourceError::Escape(rel_path.to_string()));
    }

    let root = fs::canonicalize(root).map_err(|source| io_error(rel_path, source))?;
    let resolved = match fs::canonicalize(root.join(rel)) {
        Ok(path) => path,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(SourceError::NotFound(rel_path.to_string()));
        }
        Err(err) => return Err(io_error(rel_path, err)),
    };
    if !resolved.starts_with(&root) {
        return Err(SourceError::Escape(rel_path.to_string()));
    }
    if !resolved.is_file() {
        return Err(SourceError::NotFound(rel_path.to_string()));
    }
    Ok(resolved)
}

fn io_error(rel_path: &str, source: io::Error) -> SourceError {
    SourceError::Io {
        path: rel_path.to_string(),
        source,
    }
}
