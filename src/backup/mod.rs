//! Backup coverage rules
//!
//! Decides, from Velero annotations, which volumes and claims have neither a
//! backup nor an exclusion configured, and how pods are grouped by owner.

pub mod annotations;
pub mod coverage;
pub mod owner;

pub use annotations::{
    AnnotationKeys, DEFAULT_BACKUP_ANNOTATION, DEFAULT_EXCLUDE_ANNOTATION, PVC_EXCLUDED_ANNOTATION,
};
pub use coverage::{missing_claims, missing_volumes, MissingClaim};
pub use owner::OwnerIdentity;
