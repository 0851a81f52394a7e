//! Version-control capability.
//!
//! [`Vcs`] is the seam between the orchestration engine and git; [`GitVcs`]
//! implements it with libgit2. Every call is blocking and opens the
//! repository afresh, so callers run them on a blocking thread.

use std::path::Path;

use dibs_core::GitConfig;
use git2::build::CheckoutBuilder;
use git2::{Commit, ErrorCode, IndexAddOption, PushOptions, RemoteCallbacks, Repository, Signature};

use crate::error::SyncError;

/// Commit identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl From<&GitConfig> for Author {
    fn from(git: &GitConfig) -> Self {
        Self {
            name: git.author_name.clone(),
            email: git.author_email.clone(),
        }
    }
}

pub trait Vcs: Send + Sync {
    /// Initialise an empty bare repository at `path` (which must exist).
    fn init_bare(&self, path: &Path) -> Result<(), SyncError>;

    /// Open the working repository at `path`, initialising one when the
    /// directory is not a repository yet. Returns `true` if it was created.
    fn open_or_init(&self, path: &Path) -> Result<bool, SyncError>;

    /// Make remote `name` exist and point at `url`.
    fn ensure_remote(&self, repo: &Path, name: &str, url: &str) -> Result<(), SyncError>;

    /// Stage additions, modifications and deletions and commit them on HEAD.
    /// Returns the new commit id.
    fn commit_all(&self, repo: &Path, message: &str, author: &Author) -> Result<String, SyncError>;

    /// Push `refspec` to `remote`; `None` force-pushes the current branch
    /// onto the same name.
    fn push(&self, repo: &Path, remote: &str, refspec: Option<&str>) -> Result<(), SyncError>;

    /// Fetch every branch of `remote` and force-check-out the most recently
    /// committed one, discarding local changes. Returns the checked-out
    /// commit id, or `None` while the remote has no branches.
    fn pull(&self, repo: &Path, remote: &str) -> Result<Option<String>, SyncError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GitVcs;

impl Vcs for GitVcs {
    fn init_bare(&self, path: &Path) -> Result<(), SyncError> {
        Repository::init_bare(path)?;
        tracing::debug!("initialised bare repository at {}", path.display());
        Ok(())
    }

    fn open_or_init(&self, path: &Path) -> Result<bool, SyncError> {
        match Repository::open(path) {
            Ok(_) => Ok(false),
            Err(err) if err.code() == ErrorCode::NotFound => {
                Repository::init(path)?;
                tracing::info!("initialised repository at {}", path.display());
                Ok(true)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn ensure_remote(&self, repo: &Path, name: &str, url: &str) -> Result<(), SyncError> {
        let repo = Repository::open(repo)?;
        let current = match repo.find_remote(name) {
            Ok(remote) => Some(remote.url().map(str::to_owned)),
            Err(err) if err.code() == ErrorCode::NotFound => None,
            Err(err) => return Err(err.into()),
        };

        match current {
            Some(Some(existing)) if existing == url => {}
            Some(_) => repo.remote_set_url(name, url)?,
            None => {
                repo.remote(name, url)?;
            }
        }
        Ok(())
    }

    fn commit_all(&self, repo: &Path, message: &str, author: &Author) -> Result<String, SyncError> {
        let repo = Repository::open(repo)?;

        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let signature = Signature::now(&author.name, &author.email)?;

        // Unborn branch: first commit has no parent.
        let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

        let oid = repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &parents,
        )?;
        Ok(oid.to_string())
    }

    fn push(&self, repo_path: &Path, remote: &str, refspec: Option<&str>) -> Result<(), SyncError> {
        let repo = Repository::open(repo_path)?;

        let refspec = match refspec {
            Some(spec) => spec.to_owned(),
            None => {
                let head = repo.head()?;
                let branch = head
                    .is_branch()
                    .then(|| head.name())
                    .flatten()
                    .ok_or_else(|| SyncError::DetachedHead {
                        path: repo_path.to_path_buf(),
                    })?;
                format!("+{branch}:{branch}")
            }
        };

        let mut handle = repo.find_remote(remote)?;
        let mut rejected: Vec<String> = Vec::new();
        {
            let mut callbacks = RemoteCallbacks::new();
            callbacks.push_update_reference(|refname, status| {
                if let Some(message) = status {
                    rejected.push(format!("{refname}: {message}"));
                }
                Ok(())
            });
            let mut options = PushOptions::new();
            options.remote_callbacks(callbacks);
            handle.push(&[refspec.as_str()], Some(&mut options))?;
        }

        if !rejected.is_empty() {
            return Err(SyncError::PushRejected {
                remote: remote.to_owned(),
                reason: rejected.join("; "),
            });
        }
        tracing::debug!("pushed {refspec} to {remote}");
        Ok(())
    }

    fn pull(&self, repo_path: &Path, remote: &str) -> Result<Option<String>, SyncError> {
        let repo = Repository::open(repo_path)?;
        let refspec = format!("+refs/heads/*:refs/remotes/{remote}/*");
        repo.find_remote(remote)?
            .fetch(&[refspec.as_str()], None, None)?;

        let prefix = format!("refs/remotes/{remote}/");
        let mut newest: Option<(String, Commit<'_>)> = None;
        for reference in repo.references_glob(&format!("{prefix}*"))? {
            let reference = reference?;
            let Some(branch) = reference.name().and_then(|n| n.strip_prefix(prefix.as_str())) else {
                continue;
            };
            if branch == "HEAD" {
                continue;
            }
            let branch = branch.to_owned();
            let commit = reference.peel_to_commit()?;
            let is_newer = newest
                .as_ref()
                .map_or(true, |(_, best)| commit.time().seconds() > best.time().seconds());
            if is_newer {
                newest = Some((branch, commit));
            }
        }
        let Some((branch, commit)) = newest else {
            tracing::debug!("{remote} has no branches yet");
            return Ok(None);
        };

        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        repo.checkout_tree(commit.as_object(), Some(&mut checkout))?;
        let local = format!("refs/heads/{branch}");
        repo.reference(&local, commit.id(), true, "dibs pull")?;
        repo.set_head(&local)?;

        tracing::debug!("checked out {remote}/{branch} at {}", commit.id());
        Ok(Some(commit.id().to_string()))
    }
}
