use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Typed git failure (§4.5): the stage that failed, the process exit code if
/// one was involved, and the underlying message. The arbiter maps this to a
/// worker transition; this driver never touches worker state itself.
#[derive(Debug, Error, Serialize, Deserialize)]
#[error("git error during {stage}: {message}")]
pub struct GitError {
    pub stage: String,
    pub exit_code: Option<i32>,
    pub message: String,
}

impl GitError {
    fn from_git2(stage: &str, err: git2::Error) -> Self {
        Self {
            stage: stage.to_string(),
            exit_code: None,
            message: err.message().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictKind {
    ModifyModify,
    AddAdd,
    DeleteModify,
    ModifyDelete,
    Rename,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConflict {
    pub file: String,
    pub kind: ConflictKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DryRunMerge {
    pub clean: bool,
    pub conflicts: Vec<MergeConflict>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    Clean,
    Ours,
    Theirs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeStats {
    pub files_changed: i64,
    pub insertions: i64,
    pub deletions: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedWorktree {
    pub worktree_path: String,
    pub branch_name: String,
}

/// The only capability that shells out to git (§4.5). Methods are plain
/// blocking calls, as `git2` itself is synchronous; callers on the async
/// side run them via `spawn_blocking`.
pub trait WorktreeDriver: Send + Sync {
    fn create_worktree(
        &self,
        repo_path: &Path,
        default_branch: &str,
        username: &str,
        display_id: &str,
        title: &str,
    ) -> Result<CreatedWorktree, GitError>;

    fn remove_worktree(&self, path: &Path, force: bool) -> Result<(), GitError>;

    fn dry_run_merge(&self, repo_path: &Path, branch: &str, into: &str) -> Result<DryRunMerge, GitError>;

    fn apply_merge(
        &self,
        repo_path: &Path,
        branch: &str,
        into: &str,
        strategy: MergeStrategy,
    ) -> Result<(), GitError>;

    fn abort_merge(&self, repo_path: &Path) -> Result<(), GitError>;

    fn stats(&self, repo_path: &Path, branch: &str, into: &str) -> Result<MergeStats, GitError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GitWorktreeDriver;

impl GitWorktreeDriver {
    fn unused_worktree_path(repo_path: &Path, username: &str) -> PathBuf {
        let parent = repo_path.parent().unwrap_or_else(|| Path::new("."));
        let repo_name = repo_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "repo".to_string());

        let mut n = 1;
        loop {
            let candidate = parent.join(format!("{repo_name}-{username}-{n}"));
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }

    fn classify_conflict(entry: &git2::IndexEntry, index: &git2::Index) -> MergeConflict {
        let path = String::from_utf8_lossy(&entry.path).to_string();
        let conflict = index
            .conflict_get(&entry.path)
            .ok()
            .flatten();
        let kind = match conflict {
            Some(c) => match (c.ancestor.is_some(), c.our.is_some(), c.their.is_some()) {
                (false, true, true) => ConflictKind::AddAdd,
                (true, false, true) => ConflictKind::DeleteModify,
                (true, true, false) => ConflictKind::ModifyDelete,
                (true, true, true) => ConflictKind::ModifyModify,
                _ => ConflictKind::Unknown,
            },
            None => ConflictKind::Unknown,
        };
        MergeConflict { file: path, kind }
    }
}

impl WorktreeDriver for GitWorktreeDriver {
    fn create_worktree(
        &self,
        repo_path: &Path,
        default_branch: &str,
        username: &str,
        display_id: &str,
        title: &str,
    ) -> Result<CreatedWorktree, GitError> {
        let repo =
            git2::Repository::open(repo_path).map_err(|e| GitError::from_git2("open", e))?;

        let branch_name = chkd_utils::ids::branch_name(username, display_id, title);
        let base = repo
            .find_branch(default_branch, git2::BranchType::Local)
            .map_err(|e| GitError::from_git2("find-default-branch", e))?;
        let base_commit = base
            .get()
            .peel_to_commit()
            .map_err(|e| GitError::from_git2("peel-default-branch", e))?;

        repo.branch(&branch_name, &base_commit, false)
            .map_err(|e| GitError::from_git2("create-branch", e))?;

        let worktree_path = Self::unused_worktree_path(repo_path, username);
        let opts = git2::WorktreeAddOptions::new();
        repo.worktree(&branch_name, &worktree_path, Some(&opts))
            .map_err(|e| GitError::from_git2("add-worktree", e))?;

        Ok(CreatedWorktree {
            worktree_path: worktree_path.to_string_lossy().to_string(),
            branch_name,
        })
    }

    fn remove_worktree(&self, path: &Path, force: bool) -> Result<(), GitError> {
        if !path.exists() {
            return Ok(());
        }
        if force {
            std::fs::remove_dir_all(path).map_err(|e| GitError {
                stage: "remove-worktree".into(),
                exit_code: None,
                message: e.to_string(),
            })?;
        } else {
            std::fs::remove_dir(path).map_err(|e| GitError {
                stage: "remove-worktree".into(),
                exit_code: None,
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn dry_run_merge(&self, repo_path: &Path, branch: &str, into: &str) -> Result<DryRunMerge, GitError> {
        let repo =
            git2::Repository::open(repo_path).map_err(|e| GitError::from_git2("open", e))?;

        let their_branch = repo
            .find_branch(branch, git2::BranchType::Local)
            .map_err(|e| GitError::from_git2("find-branch", e))?;
        let our_branch = repo
            .find_branch(into, git2::BranchType::Local)
            .map_err(|e| GitError::from_git2("find-target-branch", e))?;

        let their_commit = their_branch
            .get()
            .peel_to_commit()
            .map_err(|e| GitError::from_git2("peel-branch", e))?;
        let our_commit = our_branch
            .get()
            .peel_to_commit()
            .map_err(|e| GitError::from_git2("peel-target-branch", e))?;

        let mut index = repo
            .merge_commits(&our_commit, &their_commit, None)
            .map_err(|e| GitError::from_git2("merge-commits", e))?;

        if !index.has_conflicts() {
            return Ok(DryRunMerge {
                clean: true,
                conflicts: Vec::new(),
            });
        }

        let conflicts = index
            .conflicts()
            .map_err(|e| GitError::from_git2("read-conflicts", e))?
            .filter_map(|c| c.ok())
            .filter_map(|c| c.our.or(c.their).or(c.ancestor))
            .map(|entry| Self::classify_conflict(&entry, &index))
            .collect();

        Ok(DryRunMerge {
            clean: false,
            conflicts,
        })
    }

    fn apply_merge(
        &self,
        repo_path: &Path,
        branch: &str,
        into: &str,
        strategy: MergeStrategy,
    ) -> Result<(), GitError> {
        let repo =
            git2::Repository::open(repo_path).map_err(|e| GitError::from_git2("open", e))?;

        let their_branch = repo
            .find_branch(branch, git2::BranchType::Local)
            .map_err(|e| GitError::from_git2("find-branch", e))?;
        let our_branch = repo
            .find_branch(into, git2::BranchType::Local)
            .map_err(|e| GitError::from_git2("find-target-branch", e))?;

        let their_commit = their_branch
            .get()
            .peel_to_commit()
            .map_err(|e| GitError::from_git2("peel-branch", e))?;
        let our_commit = our_branch
            .get()
            .peel_to_commit()
            .map_err(|e| GitError::from_git2("peel-target-branch", e))?;

        let mut index = repo
            .merge_commits(&our_commit, &their_commit, None)
            .map_err(|e| GitError::from_git2("merge-commits", e))?;

        if index.has_conflicts() {
            match strategy {
                MergeStrategy::Clean => {
                    return Err(GitError {
                        stage: "apply-merge".into(),
                        exit_code: None,
                        message: "conflicts present, cannot apply a clean merge".into(),
                    });
                }
                MergeStrategy::Ours => {
                    resolve_conflicts_to_one_side(&mut index, Side::Ours)
                        .map_err(|e| GitError::from_git2("resolve-ours", e))?;
                }
                MergeStrategy::Theirs => {
                    resolve_conflicts_to_one_side(&mut index, Side::Theirs)
                        .map_err(|e| GitError::from_git2("resolve-theirs", e))?;
                }
            }
        }

        let tree_oid = index
            .write_tree_to(&repo)
            .map_err(|e| GitError::from_git2("write-tree", e))?;
        let tree = repo
            .find_tree(tree_oid)
            .map_err(|e| GitError::from_git2("find-tree", e))?;

        let signature = repo
            .signature()
            .map_err(|e| GitError::from_git2("signature", e))?;
        let message = format!("Merge branch '{branch}' into {into}");

        repo.commit(
            Some(&format!("refs/heads/{into}")),
            &signature,
            &signature,
            &message,
            &tree,
            &[&our_commit, &their_commit],
        )
        .map_err(|e| GitError::from_git2("commit-merge", e))?;

        repo.cleanup_state()
            .map_err(|e| GitError::from_git2("cleanup-state", e))?;

        Ok(())
    }

    fn abort_merge(&self, repo_path: &Path) -> Result<(), GitError> {
        let repo =
            git2::Repository::open(repo_path).map_err(|e| GitError::from_git2("open", e))?;
        repo.cleanup_state()
            .map_err(|e| GitError::from_git2("cleanup-state", e))?;
        let mut checkout = git2::build::CheckoutBuilder::new();
        checkout.force();
        repo.checkout_head(Some(&mut checkout))
            .map_err(|e| GitError::from_git2("checkout-head", e))?;
        Ok(())
    }

    fn stats(&self, repo_path: &Path, branch: &str, into: &str) -> Result<MergeStats, GitError> {
        let repo =
            git2::Repository::open(repo_path).map_err(|e| GitError::from_git2("open", e))?;

        let their_branch = repo
            .find_branch(branch, git2::BranchType::Local)
            .map_err(|e| GitError::from_git2("find-branch", e))?;
        let our_branch = repo
            .find_branch(into, git2::BranchType::Local)
            .map_err(|e| GitError::from_git2("find-target-branch", e))?;

        let their_tree = their_branch
            .get()
            .peel_to_tree()
            .map_err(|e| GitError::from_git2("peel-branch-tree", e))?;
        let our_tree = our_branch
            .get()
            .peel_to_tree()
            .map_err(|e| GitError::from_git2("peel-target-tree", e))?;

        let diff = repo
            .diff_tree_to_tree(Some(&our_tree), Some(&their_tree), None)
            .map_err(|e| GitError::from_git2("diff", e))?;
        let stats = diff.stats().map_err(|e| GitError::from_git2("diff-stats", e))?;

        Ok(MergeStats {
            files_changed: stats.files_changed() as i64,
            insertions: stats.insertions() as i64,
            deletions: stats.deletions() as i64,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Ours,
    Theirs,
}

/// Promotes the winning side of every conflicted path to stage 0 before
/// `conflict_cleanup`, instead of letting `conflict_cleanup` alone drop the
/// path from the tree. Without this, `ours`/`theirs` are indistinguishable:
/// both just delete the conflicting entry.
fn resolve_conflicts_to_one_side(index: &mut git2::Index, side: Side) -> Result<(), git2::Error> {
    let conflicts: Vec<git2::IndexConflict> = index.conflicts()?.filter_map(|c| c.ok()).collect();

    for conflict in conflicts {
        let git2::IndexConflict { ancestor, our, their } = conflict;
        let winner = match side {
            Side::Ours => our.clone(),
            Side::Theirs => their.clone(),
        };
        match winner {
            Some(entry) => index.add(&entry)?,
            None => {
                let path = ancestor.or(our).or(their).map(|entry| entry.path);
                if let Some(path) = path {
                    index.remove_path(Path::new(&String::from_utf8_lossy(&path).into_owned()))?;
                }
            }
        }
    }

    index.conflict_cleanup()
}
