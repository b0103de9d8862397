//! Domain model (IDs, records, state machine, decisions, errors).
//!
//! I/O を一切持たない層。ストアやワーカーはここの型とメソッドで状態を動かします。

pub mod attempt;
pub mod decision;
pub mod errors;
pub mod ids;
pub mod job;
pub mod media;
pub mod retry;
pub mod spec;
pub mod task;

pub use attempt::{AttemptOutcome, AttemptRecord, DecisionRecord};
pub use decision::{Decider, Decision, DefaultDecider};
pub use errors::{ErrorKind, PorterError};
pub use ids::{AttemptId, JobId, TaskId, WorkerId};
pub use job::{JobRecord, JobStatus, ProfileMetadata, SigningMaterial};
pub use media::{MediaKind, MediaRef, UploadedMedia};
pub use retry::RetryPolicy;
pub use spec::{JobSpec, SpecError, TaskSpec};
pub use task::{PostKind, TaskRecord, TaskState, TransitionError};
