//! Process-wide binding of owner threads to their affinity contexts.
//!
//! Adapters register a context when they create it and remove it on teardown; nothing else
//! writes here. Blocking primitives consult [`current`] to decide between parking the thread and
//! pumping its queue.

use std::sync::{Arc, LazyLock};
use std::thread::ThreadId;

use parking_lot::RwLock;
use rustc_hash::FxHashMap as HashMap;

use crate::{AffinityContext, ContextId};

static CONTEXTS: LazyLock<RwLock<HashMap<ThreadId, Arc<dyn AffinityContext>>>> = LazyLock::new(|| RwLock::new(HashMap::default()));

/// Binds `context` to its owner thread, returning any binding it displaced.
pub fn register(context: Arc<dyn AffinityContext>) -> Option<Arc<dyn AffinityContext>> {
	let owner = context.owner();
	let id = context.id();
	let previous = CONTEXTS.write().insert(owner, context);
	match &previous {
		Some(prev) => tracing::warn!(context = %id, displaced = %prev.id(), ?owner, "affinity.register.displaced"),
		None => tracing::debug!(context = %id, ?owner, "affinity.register"),
	}
	previous
}

/// Returns the context bound to the calling thread, if any.
pub fn current() -> Option<Arc<dyn AffinityContext>> {
	let thread = std::thread::current().id();
	CONTEXTS.read().get(&thread).cloned()
}

/// Removes whatever context is bound to `thread`.
pub fn unregister(thread: ThreadId) -> Option<Arc<dyn AffinityContext>> {
	let removed = CONTEXTS.write().remove(&thread);
	if let Some(ctx) = &removed {
		tracing::debug!(context = %ctx.id(), owner = ?thread, "affinity.unregister");
	}
	removed
}

/// Removes the binding for `thread` only if it still points at context `id`.
pub(crate) fn unregister_if(thread: ThreadId, id: ContextId) -> bool {
	let mut contexts = CONTEXTS.write();
	if contexts.get(&thread).is_some_and(|ctx| ctx.id() == id) {
		contexts.remove(&thread);
		drop(contexts);
		tracing::debug!(context = %id, owner = ?thread, "affinity.unregister");
		return true;
	}
	false
}

/// Returns the number of live bindings.
pub fn registered_count() -> usize {
	CONTEXTS.read().len()
}

/// Returns true when a live (not closed) context is bound to `thread`.
pub(crate) fn has_live(thread: ThreadId) -> bool {
	CONTEXTS.read().get(&thread).is_some_and(|ctx| !ctx.is_closed())
}
