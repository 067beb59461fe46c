//! Delta analysis: classify a pending build as full or partial and list
//! the changed repositories.
//!
//! The analyzer compares each repo's persisted doc-files hash with a
//! quick hash of its on-disk docs tree. All repos unchanged or all
//! changed/unknown means a full build; a mix prunes the build to the
//! changed subset. For unchanged repos in a partial build, deletion
//! detection reconciles the persisted path lists with the tree so removed
//! pages disappear from the site.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use crate::fingerprint::{collect_markdown_files, doc_files_hash};
use crate::state::{RepoStateAccess, SkipStateAccess, StateAccess};
use crate::types::{DeltaDecision, DeltaPlan, DeltaReason, Repository};

/// A repository paired with its on-disk checkout location.
#[derive(Debug, Clone)]
pub struct RepoCheckout {
    pub repo: Repository,
    pub dir: PathBuf,
}

enum RepoDelta {
    Unchanged,
    Changed,
    Unknown,
}

/// Full/partial classifier over persisted fingerprints.
pub struct DeltaAnalyzer {
    state: Arc<dyn StateAccess>,
    detect_deletions: bool,
}

impl DeltaAnalyzer {
    pub fn new(state: Arc<dyn StateAccess>, detect_deletions: bool) -> Self {
        Self {
            state,
            detect_deletions,
        }
    }

    /// Classify the pending build. On a partial decision with deletion
    /// detection enabled, unchanged repos get their persisted path lists
    /// reconciled as a side effect.
    pub fn analyze(&self, checkouts: &[RepoCheckout]) -> Result<DeltaPlan> {
        if checkouts.is_empty() {
            return Ok(DeltaPlan::full(DeltaReason::AllReposUnknownState));
        }

        let mut plan = DeltaPlan::full(DeltaReason::NoDetectedRepoChange);
        let mut unchanged: Vec<&RepoCheckout> = Vec::new();
        let mut any_known_change = false;

        for checkout in checkouts {
            let url = &checkout.repo.url;
            match self.classify(checkout)? {
                RepoDelta::Unchanged => {
                    unchanged.push(checkout);
                }
                RepoDelta::Changed => {
                    any_known_change = true;
                    plan.changed_repos.insert(url.clone());
                    plan.repo_reasons
                        .insert(url.clone(), "docs tree hash differs from last build".to_string());
                }
                RepoDelta::Unknown => {
                    plan.changed_repos.insert(url.clone());
                    plan.repo_reasons
                        .insert(url.clone(), "no persisted state for repo".to_string());
                }
            }
        }

        if plan.changed_repos.is_empty() {
            // Nothing moved; a full build is still the safe answer when the
            // skip evaluator let us get this far.
            plan.reason = DeltaReason::NoDetectedRepoChange;
            return Ok(plan);
        }

        if unchanged.is_empty() {
            plan.changed_repos.clear();
            plan.repo_reasons.clear();
            plan.reason = if any_known_change {
                DeltaReason::AllReposChanged
            } else {
                DeltaReason::AllReposUnknownState
            };
            return Ok(plan);
        }

        plan.decision = DeltaDecision::Partial;
        plan.reason = DeltaReason::QuickHashDiff;

        if self.detect_deletions {
            for checkout in unchanged {
                self.reconcile_deletions(checkout)?;
            }
        }

        tracing::debug!(
            changed = plan.changed_repos.len(),
            total = checkouts.len(),
            "partial build planned"
        );
        Ok(plan)
    }

    fn classify(&self, checkout: &RepoCheckout) -> Result<RepoDelta> {
        let Some(stored) = self.state.repo_doc_files_hash(&checkout.repo.url) else {
            return Ok(RepoDelta::Unknown);
        };

        if !checkout.dir.is_dir() {
            return Ok(RepoDelta::Unknown);
        }

        let current_paths =
            collect_markdown_files(&checkout.dir, &checkout.repo.effective_docs_paths())?;
        if doc_files_hash(&current_paths) == stored {
            Ok(RepoDelta::Unchanged)
        } else {
            Ok(RepoDelta::Changed)
        }
    }

    /// Compare the persisted path list of an unchanged repo with its docs
    /// tree. Disappeared files update the persisted list and hash, and the
    /// global hash is recomputed from the union of all persisted lists.
    fn reconcile_deletions(&self, checkout: &RepoCheckout) -> Result<()> {
        let url = &checkout.repo.url;
        let Some(persisted) = self.state.repo_doc_file_paths(url) else {
            return Ok(());
        };

        let current =
            collect_markdown_files(&checkout.dir, &checkout.repo.effective_docs_paths())?;
        let deleted: Vec<&String> = persisted.iter().filter(|p| !current.contains(p)).collect();
        if deleted.is_empty() {
            return Ok(());
        }

        tracing::info!(repo = %url, deleted = deleted.len(), "doc files deleted since last build");
        self.state.set_repo_doc_file_paths(url, current.clone());
        self.state.set_repo_doc_files_hash(url, &doc_files_hash(&current));
        self.recompute_global_hash();
        Ok(())
    }

    fn recompute_global_hash(&self) {
        let mut all_paths: Vec<String> = Vec::new();
        for url in self.state.repo_urls() {
            if let Some(paths) = self.state.repo_doc_file_paths(&url) {
                all_paths.extend(paths);
            }
        }
        self.state.set_last_global_doc_files_hash(&doc_files_hash(all_paths));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{FileStateStore, RepoStateAccess, SkipStateAccess, StateLifecycle};
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).expect("mkdir");
        fs::write(path, content).expect("write");
    }

    struct World {
        td: tempfile::TempDir,
        state: Arc<FileStateStore>,
    }

    impl World {
        fn new() -> Self {
            let td = tempdir().expect("tempdir");
            let state = Arc::new(FileStateStore::new(td.path()));
            state.load().expect("load");
            Self { td, state }
        }

        /// Create a repo checkout with the given docs files, and persist
        /// its current quick hash so it reads as unchanged.
        fn repo_in_sync(&self, name: &str, files: &[&str]) -> RepoCheckout {
            let checkout = self.repo_dirty(name, files);
            let paths: Vec<String> = files.iter().map(|f| format!("docs/{f}")).collect();
            self.state
                .set_repo_doc_files_hash(&checkout.repo.url, &doc_files_hash(&paths));
            self.state.set_repo_doc_file_paths(&checkout.repo.url, paths);
            checkout
        }

        /// Create a repo checkout whose persisted hash differs from disk.
        fn repo_dirty(&self, name: &str, files: &[&str]) -> RepoCheckout {
            let dir = self.td.path().join(name);
            for file in files {
                write(&dir, &format!("docs/{file}"), "content");
            }
            RepoCheckout {
                repo: Repository::new(format!("https://h/org/{name}.git"), name),
                dir,
            }
        }

        fn analyzer(&self) -> DeltaAnalyzer {
            DeltaAnalyzer::new(self.state.clone(), true)
        }
    }

    #[test]
    fn empty_repo_set_is_full() {
        let w = World::new();
        let plan = w.analyzer().analyze(&[]).expect("analyze");
        assert_eq!(plan.decision, DeltaDecision::Full);
    }

    #[test]
    fn all_unchanged_is_full_no_change() {
        let w = World::new();
        let a = w.repo_in_sync("a", &["x.md"]);
        let b = w.repo_in_sync("b", &["y.md"]);

        let plan = w.analyzer().analyze(&[a, b]).expect("analyze");
        assert_eq!(plan.decision, DeltaDecision::Full);
        assert_eq!(plan.reason, DeltaReason::NoDetectedRepoChange);
        assert!(plan.changed_repos.is_empty());
    }

    #[test]
    fn all_changed_is_full() {
        let w = World::new();
        let a = w.repo_in_sync("a", &["x.md"]);
        let b = w.repo_in_sync("b", &["y.md"]);
        write(&a.dir, "docs/new.md", "new");
        write(&b.dir, "docs/new.md", "new");

        let plan = w.analyzer().analyze(&[a, b]).expect("analyze");
        assert_eq!(plan.decision, DeltaDecision::Full);
        assert_eq!(plan.reason, DeltaReason::AllReposChanged);
        assert!(plan.changed_repos.is_empty());
    }

    #[test]
    fn all_unknown_is_full() {
        let w = World::new();
        let a = w.repo_dirty("a", &["x.md"]);
        let b = w.repo_dirty("b", &["y.md"]);

        let plan = w.analyzer().analyze(&[a, b]).expect("analyze");
        assert_eq!(plan.decision, DeltaDecision::Full);
        assert_eq!(plan.reason, DeltaReason::AllReposUnknownState);
    }

    #[test]
    fn mixed_changes_are_partial() {
        let w = World::new();
        let unchanged = w.repo_in_sync("a", &["x.md"]);
        let changed = w.repo_in_sync("b", &["y.md"]);
        write(&changed.dir, "docs/extra.md", "extra");

        let plan = w
            .analyzer()
            .analyze(&[unchanged, changed.clone()])
            .expect("analyze");
        assert_eq!(plan.decision, DeltaDecision::Partial);
        assert_eq!(plan.reason, DeltaReason::QuickHashDiff);
        assert_eq!(
            plan.changed_repos.iter().collect::<Vec<_>>(),
            vec![&changed.repo.url]
        );
        assert!(plan.repo_reasons.contains_key(&changed.repo.url));
    }

    #[test]
    fn unknown_repo_joins_partial_changed_set() {
        let w = World::new();
        let unchanged = w.repo_in_sync("a", &["x.md"]);
        let unknown = w.repo_dirty("b", &["y.md"]);

        let plan = w
            .analyzer()
            .analyze(&[unchanged, unknown.clone()])
            .expect("analyze");
        assert_eq!(plan.decision, DeltaDecision::Partial);
        assert!(plan.changed_repos.contains(&unknown.repo.url));
    }

    #[test]
    fn missing_checkout_dir_reads_as_unknown() {
        let w = World::new();
        let mut ghost = w.repo_in_sync("a", &["x.md"]);
        fs::remove_dir_all(&ghost.dir).expect("rm");
        ghost.dir = w.td.path().join("nowhere");

        let plan = w.analyzer().analyze(std::slice::from_ref(&ghost)).expect("analyze");
        assert_eq!(plan.decision, DeltaDecision::Full);
        assert_eq!(plan.reason, DeltaReason::AllReposUnknownState);
    }

    #[test]
    fn deletion_detection_updates_unchanged_repo() {
        let w = World::new();
        // Persisted list claims two files, the tree has one, and the
        // stored hash matches the current tree.
        let checkout = w.repo_dirty("a", &["x.md"]);
        let current = vec!["docs/x.md".to_string()];
        w.state
            .set_repo_doc_files_hash(&checkout.repo.url, &doc_files_hash(&current));
        w.state.set_repo_doc_file_paths(
            &checkout.repo.url,
            vec!["docs/x.md".to_string(), "docs/gone.md".to_string()],
        );

        let changed = w.repo_in_sync("b", &["y.md"]);
        write(&changed.dir, "docs/new.md", "new");

        let plan = w
            .analyzer()
            .analyze(&[checkout.clone(), changed])
            .expect("analyze");
        assert_eq!(plan.decision, DeltaDecision::Partial);

        // The unchanged repo's persisted list lost the deleted file and
        // the global hash was recomputed from the union.
        assert_eq!(
            w.state.repo_doc_file_paths(&checkout.repo.url),
            Some(current)
        );
        assert!(w.state.last_global_doc_files_hash().is_some());
    }

    #[test]
    fn no_deletions_leaves_state_untouched() {
        let w = World::new();
        let unchanged = w.repo_in_sync("a", &["x.md"]);
        let changed = w.repo_in_sync("b", &["y.md"]);
        write(&changed.dir, "docs/new.md", "new");

        let before = w.state.repo_doc_file_paths(&unchanged.repo.url);
        let plan = w.analyzer().analyze(&[unchanged.clone(), changed]).expect("analyze");
        assert_eq!(plan.decision, DeltaDecision::Partial);
        assert_eq!(w.state.repo_doc_file_paths(&unchanged.repo.url), before);
        assert!(w.state.last_global_doc_files_hash().is_none());
    }
}
