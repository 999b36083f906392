use crate::model::{Span, SymbolKind};
use blake3::Hasher;

/// Compute a stable symbol id from `(file, fq_name, kind)`.
///
/// Positions are not part of the key, so moving a function keeps its id.
/// Renaming the file changes it.
///
/// Returns `sym_{16 hex chars}`, the first 64 bits of the blake3 digest.
pub fn symbol_id(file: &str, fq_name: &str, kind: SymbolKind) -> String {
    let mut hasher = Hasher::new();
    hasher.update(file.as_bytes());
    hasher.update(b"\x00");
    hasher.update(fq_name.as_bytes());
    hasher.update(b"\x00");
    hasher.update(kind.as_str().as_bytes());
    let hash = hasher.finalize();
    format!("sym_{}", &hash.to_hex()[..16])
}

/// Compute a call-site id from the caller's id and the call span.
pub fn call_id(caller_id: &str, span: &Span) -> String {
    let mut hasher = Hasher::new();
    hasher.update(caller_id.as_bytes());
    hasher.update(b"\x00");
    hasher.update(
        format!(
            "{}:{}:{}:{}",
            span.start_line, span.start_col, span.end_line, span.end_col
        )
        .as_bytes(),
    );
    let hash = hasher.finalize();
    format!("call_{}", &hash.to_hex()[..16])
}
