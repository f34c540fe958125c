//! Observability stores for workflow runs.
//!
//! Two channels per the runtime contract: *events* hold current values
//! (last write wins), *streams* are append-only logs paginated by offset.
//! The step-event log carries per-run contiguous ids, which is what makes
//! `id > cursor` pagination exactly-once for readers.

pub mod memory;
pub mod pg;
pub mod sink;
pub mod types;

pub use memory::MemoryEventSink;
pub use pg::PgEventSink;
pub use sink::EventSink;
pub use types::{AppendStepEvent, StepEvent, StepEventStatus, StreamEntry};
