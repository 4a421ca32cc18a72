//! Git operations module
//!
//! This module provides a trait-based interface for git operations,
//! replacing shell-based git commands with proper libgit2 bindings, plus the
//! overlay that turns those operations into a job's branch/commit/PR
//! workflow.

pub mod operations;
pub mod overlay;
pub mod pr;

pub use operations::{Git2Operations, GitOperations};
pub use overlay::{branch_name, DryRunOverlay, Git2Overlay, GitOverlay, GitOverlayError};
pub use pr::{NullPrClient, OctocrabPrClient, PrClient, PrError, PrRequest};
