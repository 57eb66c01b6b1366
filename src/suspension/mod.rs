//! Durable approval and suspension markers.

pub mod metadata;
pub mod record;

pub use metadata::SuspensionMetadata;
pub(crate) use metadata::is_sub_run_tool;
pub use record::{
    ApprovalDecision, ResumeRequest, SuspensionKind, SuspensionRecord, approval_decision,
    approval_resume_schema, is_approval_envelope,
};
