pub mod function_store;
pub mod similarity;

pub use function_store::{FunctionStore, ReplaceReport, StoredFunction};
pub use similarity::{cosine_distance, cosine_similarity, SearchHit, SimilarityIndex};

use std::path::{Path, PathBuf};

/// Write `bytes` to a sibling temp file, then rename it over `path`.
///
/// A crash mid-write leaves the previous document intact.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}
