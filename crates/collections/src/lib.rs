//! Observable containers that can be mutated from any thread.
//!
//! # Purpose
//!
//! This crate provides an ordered list ([`ObservableSequence`]) and copy-on-write maps
//! ([`ObservableHashMap`], [`ObservableOrderedMap`]) that publish a [`ChangeDescriptor`] for
//! every committed mutation. Subscribers may ask to be called on an affinity thread (see
//! `tether_affinity`); such calls are posted, never run by the mutating thread.
//!
//! # Key Types
//!
//! | Type | Role |
//! |------|------|
//! | [`MutationGuard`] | Spin or blocking mutual exclusion; pumps instead of parking on affinity threads. |
//! | [`ChangeNotifier`] | Subscriber list, ordered delivery, bulk coalescing. |
//! | [`ObservableSequence`] | List guarded in place; reads and writes take the guard. |
//! | [`ObservableAssociativeSnapshot`] | Map swapped wholesale on commit; reads never lock. |
//!
//! # Concurrency
//!
//! - **Sequence:** every operation is serialized by one guard per instance.
//! - **Maps:** writers are serialized by a commit guard; readers load the current [`Snapshot`]
//!   atomically and may observe a slightly stale but always complete map.
//! - **Delivery:** no callback runs under a container guard.

mod change;
mod config;
mod error;
mod guard;
mod notifier;
mod sequence;
mod snapshot;

pub use change::{ChangeAction, ChangeDescriptor};
pub use config::{GuardConfig, GuardStrategy};
pub use error::{CollectionError, GuardError, Result};
pub use guard::{Guarded, GuardedMut, MutationGuard};
pub use notifier::{BulkScope, Callback, ChangeNotifier, SubscriptionId};
pub use sequence::ObservableSequence;
pub use snapshot::{MapBackend, ObservableAssociativeSnapshot, ObservableHashMap, ObservableOrderedMap, Snapshot};
