use anyhow::{Context, Result};
use git2::{BranchType, Cred, PushOptions, RemoteCallbacks, Repository, Signature};
use std::path::Path;

/// Core git operations the overlay (C5) is built on, replacing shell-outs to
/// `git` with libgit2 bindings.
pub trait GitOperations: Send + Sync {
    /// Checkout a branch (replaces `git checkout`).
    fn checkout_branch(&self, branch: &str) -> Result<()>;

    /// Create a new branch from `from` (replaces `git branch -b`).
    fn create_branch(&self, name: &str, from: &str) -> Result<()>;

    /// Stage all tracked changes and commit. Returns `false` (no-op) if the
    /// working tree is clean.
    fn commit_all(&self, message: &str) -> Result<bool>;

    /// Push a branch to a remote (replaces `git push`).
    fn push(&self, remote: &str, branch: &str) -> Result<()>;

    /// Check if a branch exists locally (replaces `git branch --list`).
    fn branch_exists(&self, branch: &str) -> Result<bool>;

    /// Check if a branch exists on a remote (replaces `git ls-remote`).
    fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool>;

    /// Delete a local branch (replaces `git branch -D`).
    fn delete_branch(&self, branch: &str, force: bool) -> Result<()>;

    /// Current branch name, if HEAD points at one.
    fn current_branch(&self) -> Result<Option<String>>;
}

/// `git2`-backed implementation of [`GitOperations`] against a repository
/// checked out on disk.
pub struct Git2Operations {
    repo: Repository,
}

impl Git2Operations {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let repo = Repository::open(path).context("failed to open git repository")?;
        Ok(Self { repo })
    }

    fn get_signature(&self) -> Result<Signature> {
        match self.repo.signature() {
            Ok(sig) => Ok(sig),
            Err(_) => Signature::now("forgequeue", "forgequeue@localhost")
                .context("failed to create default signature"),
        }
    }

    fn credentials_callback<'a>() -> RemoteCallbacks<'a> {
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(|_url, username_from_url, _allowed_types| {
            Cred::ssh_key(
                username_from_url.unwrap_or("git"),
                None,
                Path::new(&format!(
                    "{}/.ssh/id_rsa",
                    std::env::var("HOME").unwrap_or_default()
                )),
                None,
            )
        });
        callbacks
    }
}

impl GitOperations for Git2Operations {
    fn checkout_branch(&self, branch: &str) -> Result<()> {
        let branch_ref = self
            .repo
            .find_branch(branch, BranchType::Local)
            .or_else(|_| self.repo.find_branch(branch, BranchType::Remote))
            .with_context(|| format!("branch '{branch}' not found"))?;

        let reference = branch_ref.get();
        let target = reference.target().context("branch has no target commit")?;
        let commit = self.repo.find_commit(target)?;
        let tree = commit.tree()?;

        self.repo.set_head(reference.name().unwrap())?;
        self.repo.checkout_tree(tree.as_object(), None)?;
        Ok(())
    }

    fn create_branch(&self, name: &str, from: &str) -> Result<()> {
        let from_commit = if from == "HEAD" {
            self.repo.head()?.peel_to_commit()?
        } else if let Ok(branch) = self
            .repo
            .find_branch(from, BranchType::Local)
            .or_else(|_| self.repo.find_branch(from, BranchType::Remote))
        {
            branch.get().peel_to_commit()?
        } else {
            let oid = git2::Oid::from_str(from)
                .map_err(|e| anyhow::anyhow!("invalid commit or branch '{from}': {e}"))?;
            self.repo.find_commit(oid)?
        };

        self.repo
            .branch(name, &from_commit, false)
            .with_context(|| format!("failed to create branch '{name}'"))?;
        Ok(())
    }

    fn commit_all(&self, message: &str) -> Result<bool> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;

        let head = self.repo.head()?.peel_to_commit()?;
        if head.tree_id() == tree_id {
            // Nothing staged — tree is unchanged from HEAD.
            return Ok(false);
        }

        let signature = self.get_signature()?;
        self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &[&head],
        )?;
        Ok(true)
    }

    fn push(&self, remote_name: &str, branch: &str) -> Result<()> {
        let mut remote = self
            .repo
            .find_remote(remote_name)
            .with_context(|| format!("remote '{remote_name}' not found"))?;

        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        let mut push_options = PushOptions::new();
        push_options.remote_callbacks(Self::credentials_callback());

        remote
            .push(&[&refspec], Some(&mut push_options))
            .context("failed to push to remote")?;
        Ok(())
    }

    fn branch_exists(&self, branch: &str) -> Result<bool> {
        Ok(self.repo.find_branch(branch, BranchType::Local).is_ok())
    }

    fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool> {
        let remote_branch = format!("{remote}/{branch}");
        Ok(self
            .repo
            .find_branch(&remote_branch, BranchType::Remote)
            .is_ok())
    }

    fn delete_branch(&self, branch: &str, force: bool) -> Result<()> {
        let mut branch_ref = self
            .repo
            .find_branch(branch, BranchType::Local)
            .with_context(|| format!("branch '{branch}' not found"))?;

        if !force {
            let branch_commit = branch_ref.get().peel_to_commit()?;
            let head_commit = self.repo.head()?.peel_to_commit()?;
            if branch_commit.id() != head_commit.id() {
                anyhow::bail!("branch is not merged and force=false");
            }
        }

        let name = branch_ref
            .name()
            .map(|n| n.unwrap_or("unknown").to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        branch_ref
            .delete()
            .with_context(|| format!("failed to delete branch '{name}'"))
    }

    fn current_branch(&self) -> Result<Option<String>> {
        let head = self.repo.head()?;
        if head.is_branch() {
            Ok(head.shorthand().map(|s| s.to_string()))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_repo() -> (TempDir, Git2Operations) {
        let temp_dir = TempDir::new().unwrap();
        let repo = Repository::init(temp_dir.path()).unwrap();

        let signature = Signature::now("Test", "test@example.com").unwrap();
        fs::write(temp_dir.path().join("README.md"), "hello\n").unwrap();
        {
            let mut index = repo.index().unwrap();
            index.add_path(Path::new("README.md")).unwrap();
            index.write().unwrap();
            let tree_id = index.write_tree().unwrap();
            let tree = repo.find_tree(tree_id).unwrap();
            repo.commit(Some("HEAD"), &signature, &signature, "initial", &tree, &[])
                .unwrap();
        }

        let ops = Git2Operations::new(temp_dir.path()).unwrap();
        (temp_dir, ops)
    }

    #[test]
    fn create_and_check_branch() {
        let (_dir, ops) = create_test_repo();
        ops.create_branch("feature/test", "HEAD").unwrap();
        assert!(ops.branch_exists("feature/test").unwrap());
        assert!(!ops.branch_exists("does-not-exist").unwrap());
    }

    #[test]
    fn commit_all_is_noop_on_clean_tree() {
        let (_dir, ops) = create_test_repo();
        let committed = ops.commit_all("no changes").unwrap();
        assert!(!committed);
    }

    #[test]
    fn commit_all_commits_tracked_changes() {
        let (dir, ops) = create_test_repo();
        fs::write(dir.path().join("README.md"), "hello again\n").unwrap();
        let committed = ops.commit_all("update readme").unwrap();
        assert!(committed);

        let committed_again = ops.commit_all("no-op").unwrap();
        assert!(!committed_again);
    }

    #[test]
    fn delete_branch_requires_merge_unless_forced() {
        let (_dir, ops) = create_test_repo();
        ops.create_branch("feature/unmerged", "HEAD").unwrap();
        // Branch points at the same commit as HEAD in this fixture, so a
        // non-forced delete succeeds.
        ops.delete_branch("feature/unmerged", false).unwrap();
        assert!(!ops.branch_exists("feature/unmerged").unwrap());
    }
}
