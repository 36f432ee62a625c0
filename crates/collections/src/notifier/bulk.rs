use crate::{ChangeAction, ChangeDescriptor};

/// Coalescing window for one action between `begin_bulk` and `end_bulk`.
pub(crate) struct BulkSession<T> {
	action: ChangeAction,
	merged: Option<ChangeDescriptor<T>>,
	count: usize,
}

impl<T> BulkSession<T> {
	pub fn new(action: ChangeAction) -> Self {
		Self {
			action,
			merged: None,
			count: 0,
		}
	}

	pub fn action(&self) -> ChangeAction {
		self.action
	}

	/// Folds a same-action descriptor into the session.
	pub fn merge(&mut self, descriptor: ChangeDescriptor<T>) {
		debug_assert_eq!(descriptor.action(), self.action);
		self.count += 1;
		match &mut self.merged {
			Some(merged) => merged.absorb(descriptor),
			None => self.merged = Some(descriptor),
		}
	}

	pub fn merged_count(&self) -> usize {
		self.count
	}

	/// Closes the session, yielding the synthesized descriptor if anything was merged.
	pub fn finish(self) -> Option<ChangeDescriptor<T>> {
		self.merged
	}
}
