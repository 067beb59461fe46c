//! Content fingerprints: SHA-256 over path lists, files, and config.
//!
//! All skip and delta decisions reduce to comparing these fingerprints.
//! A doc-files hash is the SHA-256 of the sorted, newline-joined list of
//! relative documentation file paths; identical file sets hash identically
//! regardless of scan order.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hex-encoded SHA-256 of a file's contents.
pub fn file_sha256(path: &Path) -> Result<String> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read {} for checksum", path.display()))?;
    Ok(sha256_hex(&bytes))
}

/// Hash a list of relative paths: sorted, deduplicated, newline-joined.
pub fn doc_files_hash<I, S>(paths: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut paths: Vec<String> = paths.into_iter().map(|p| p.as_ref().to_string()).collect();
    paths.sort();
    paths.dedup();
    sha256_hex(paths.join("\n").as_bytes())
}

/// Collect relative markdown paths under a repo's docs directories.
///
/// Paths are relative to `repo_dir`, use `/` separators, and come back
/// sorted. Docs paths that do not exist on disk are skipped.
pub fn collect_markdown_files(repo_dir: &Path, docs_paths: &[String]) -> Result<Vec<String>> {
    let mut found = Vec::new();
    for docs_path in docs_paths {
        let root = repo_dir.join(docs_path);
        if !root.is_dir() {
            continue;
        }
        walk_markdown(&root, &mut found)?;
    }

    let mut relative: Vec<String> = found
        .iter()
        .filter_map(|p| p.strip_prefix(repo_dir).ok())
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .collect();
    relative.sort();
    relative.dedup();
    Ok(relative)
}

fn walk_markdown(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read docs dir {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk_markdown(&path, out)?;
        } else if file_type.is_file() && is_markdown(&path) {
            out.push(path);
        }
    }
    Ok(())
}

fn is_markdown(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("md") | Some("markdown")
    )
}

/// Quick content fingerprint of a repo's docs tree: the doc-files hash of
/// its current markdown paths.
pub fn repo_quick_hash(repo_dir: &Path, docs_paths: &[String]) -> Result<String> {
    let files = collect_markdown_files(repo_dir, docs_paths)?;
    Ok(doc_files_hash(files))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).expect("mkdir");
        fs::write(path, content).expect("write");
    }

    #[test]
    fn sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn doc_files_hash_ignores_order_and_dupes() {
        let a = doc_files_hash(["docs/a.md", "docs/b.md"]);
        let b = doc_files_hash(["docs/b.md", "docs/a.md", "docs/a.md"]);
        assert_eq!(a, b);
    }

    #[test]
    fn doc_files_hash_differs_on_content() {
        let a = doc_files_hash(["docs/a.md"]);
        let b = doc_files_hash(["docs/b.md"]);
        assert_ne!(a, b);
    }

    #[test]
    fn file_sha256_matches_bytes() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("report.json");
        fs::write(&path, b"{}").expect("write");
        assert_eq!(file_sha256(&path).expect("checksum"), sha256_hex(b"{}"));
    }

    #[test]
    fn file_sha256_missing_file_errors() {
        let td = tempdir().expect("tempdir");
        assert!(file_sha256(&td.path().join("absent")).is_err());
    }

    #[test]
    fn collect_markdown_walks_nested_dirs() {
        let td = tempdir().expect("tempdir");
        write(td.path(), "docs/index.md", "# hi");
        write(td.path(), "docs/guide/setup.md", "# setup");
        write(td.path(), "docs/guide/diagram.png", "binary");
        write(td.path(), "src/main.rs", "fn main() {}");

        let files =
            collect_markdown_files(td.path(), &["docs".to_string()]).expect("collect");
        assert_eq!(files, vec!["docs/guide/setup.md", "docs/index.md"]);
    }

    #[test]
    fn collect_markdown_skips_missing_docs_path() {
        let td = tempdir().expect("tempdir");
        let files =
            collect_markdown_files(td.path(), &["docs".to_string()]).expect("collect");
        assert!(files.is_empty());
    }

    #[test]
    fn collect_markdown_multiple_docs_paths() {
        let td = tempdir().expect("tempdir");
        write(td.path(), "docs/a.md", "a");
        write(td.path(), "manual/b.markdown", "b");

        let files = collect_markdown_files(
            td.path(),
            &["docs".to_string(), "manual".to_string()],
        )
        .expect("collect");
        assert_eq!(files, vec!["docs/a.md", "manual/b.markdown"]);
    }

    #[test]
    fn quick_hash_stable_across_scans() {
        let td = tempdir().expect("tempdir");
        write(td.path(), "docs/a.md", "a");
        write(td.path(), "docs/b.md", "b");

        let h1 = repo_quick_hash(td.path(), &["docs".to_string()]).expect("hash");
        let h2 = repo_quick_hash(td.path(), &["docs".to_string()]).expect("hash");
        assert_eq!(h1, h2);

        write(td.path(), "docs/c.md", "c");
        let h3 = repo_quick_hash(td.path(), &["docs".to_string()]).expect("hash");
        assert_ne!(h1, h3);
    }
}
