//! Domain model (ids, content items, platforms, job payloads, events).

pub mod content;
pub mod events;
pub mod ids;
pub mod job;
pub mod platform;

pub use content::{
    ContentItem, DueTarget, OverallStatus, PlatformTarget, TargetError, TargetPatch,
    TargetStatus, TransitionError,
};
pub use events::PipelineEvent;
pub use ids::{ContentId, JobId, LeaseId, OrganizationId, UserId};
pub use job::{JobType, PublishPayload, QueueName};
pub use platform::{Platform, PlatformPostId};
