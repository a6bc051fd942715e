//! Job Store & Queue Driver (spec §4.1).
//!
//! `JobStore` is the durable interface; `MongoJobStore` is the concrete
//! adapter wired at startup, and `MemoryJobStore` is an in-process fake
//! used by tests and by the orchestrator's own unit tests. `QueueDriver`
//! owns the worker loop, dispatch table, and retry/backoff algorithm,
//! and is generic over any `JobStore` implementation.

mod driver;
mod memory;
mod mongo;
mod store;

pub use driver::{HandlerFn, JobContext, QueueDriver};
pub use memory::MemoryJobStore;
pub use mongo::MongoJobStore;
pub use store::{JobCounts, JobStore};
