//! # dibs-sync
//!
//! Staging-directory preparation and the version-control capability.
//!
//! Call [`sync_tree`] to wipe the push directory and copy the watched source
//! tree into it, then drive a [`Vcs`] implementation ([`GitVcs`]) to commit
//! and push that copy.

pub mod error;
pub mod ignore;
pub mod staging;
pub mod vcs;

pub use error::SyncError;
pub use ignore::IgnoreFilter;
pub use staging::{sync_tree, StagingReport};
pub use vcs::{Author, GitVcs, Vcs};
