// Workflow template core
//
// DB-agnostic pieces shared by the storage adapters and the control plane:
// - Domain entities (WorkflowTemplate, WorkflowTemplateVersion, statistics)
// - Error taxonomy surfaced to callers
// - Label codec: identity/version metadata <-> cluster object labels
// - Manifest wrapper: template body <-> cluster resource envelope
// - Version numbering and read-repair between the two stores

pub mod error;
pub mod labels;
pub mod manifest;
pub mod template;
pub mod version;

pub use error::{ErrorCode, Result, TemplateError};
pub use labels::{
    filter_by_prefix, is_slug, object_name, slugify, LabelCodec, LabelError, LabelKeys,
    LabelSelector, DEFAULT_LABEL_KEYS,
};
pub use manifest::{ManifestError, ManifestValidator, StructuralValidator};
pub use template::{
    NewTemplate, NewTemplateVersion, Pagination, WorkflowExecutionStatisticReport,
    WorkflowTemplate, WorkflowTemplateVersion,
};
pub use version::{
    reconcile_version, ManualClock, SystemClock, VersionAgreement, VersionClock, VersionPolicy,
    VersionSelector,
};
