//! Thread-affinity execution contexts.
//!
//! # Purpose
//!
//! An [`AffinityContext`] is a serial execution context bound to exactly one owner thread. Any
//! thread may [`post`](AffinityContext::post) work to it; only the owner runs that work. The owner
//! can wait on a condition with [`pump_until`](AffinityContext::pump_until), which keeps draining
//! the queue while it waits so the owner never starves itself of work it is waiting on.
//!
//! # Mental Model
//!
//! 1. **Creation:** An adapter ([`Dispatcher`] for a caller-driven message pump, or
//!    [`DispatcherThread`] for a dedicated loop thread) creates a context and binds it to its owner
//!    thread in the process-wide registry.
//! 2. **Lookup:** Code that may block calls [`current`] to find out whether it is running on an
//!    affinity thread and, if so, waits cooperatively instead of parking the thread.
//! 3. **Teardown:** Dropping the owner handle closes the queue and removes the registry binding.
//!
//! # Invariants
//!
//! - At most one live context is bound to a thread.
//!   - Enforced in: [`Dispatcher::attach`].
//! - `pump_until` off the owner thread fails with [`AffinityError::InvalidContext`] and never blocks.
//!   - Enforced in: [`AffinityContext::pump_until`] implementations.
//! - Posted tasks run in FIFO order on the owner thread.
//!   - Enforced in: the dispatcher task queue.

mod config;
mod context;
mod dispatcher;
mod error;
mod panic;
mod queue;
mod registry;

pub use config::DispatcherConfig;
pub use context::{AffinityContext, ContextId, Task};
pub use dispatcher::{Dispatcher, DispatcherThread};
pub use error::AffinityError;
pub use panic::panic_message;
pub use registry::{current, register, registered_count, unregister};
