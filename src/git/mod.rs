//! Git operations: repository access, commit metadata, per-parent file pairs.

pub mod commit;
pub mod repository;

pub use commit::{ChangeKind, CommitMeta, FileChange};
pub use repository::SvcsRepository;
