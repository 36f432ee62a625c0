/// Kind of structural change carried by a [`ChangeDescriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeAction {
	Add,
	Remove,
	Replace,
	/// The contents changed too much to describe; observers should re-read the container.
	Reset,
}

impl ChangeAction {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Add => "add",
			Self::Remove => "remove",
			Self::Replace => "replace",
			Self::Reset => "reset",
		}
	}
}

/// One committed mutation, as delivered to subscribers.
///
/// For sequences `start_index` is the position of the first affected element. Map containers
/// leave it unset and carry `(key, value)` pairs as items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeDescriptor<T> {
	action: ChangeAction,
	items: Vec<T>,
	start_index: Option<usize>,
	old_items: Vec<T>,
}

impl<T> ChangeDescriptor<T> {
	/// `items` were inserted starting at `start_index`.
	pub fn added(items: Vec<T>, start_index: Option<usize>) -> Self {
		Self {
			action: ChangeAction::Add,
			items,
			start_index,
			old_items: Vec::new(),
		}
	}

	/// `items` were removed starting at `start_index`.
	pub fn removed(items: Vec<T>, start_index: Option<usize>) -> Self {
		Self {
			action: ChangeAction::Remove,
			items,
			start_index,
			old_items: Vec::new(),
		}
	}

	/// `old_items` were overwritten by `items` starting at `start_index`.
	pub fn replaced(items: Vec<T>, old_items: Vec<T>, start_index: Option<usize>) -> Self {
		Self {
			action: ChangeAction::Replace,
			items,
			start_index,
			old_items,
		}
	}

	pub fn reset() -> Self {
		Self {
			action: ChangeAction::Reset,
			items: Vec::new(),
			start_index: None,
			old_items: Vec::new(),
		}
	}

	pub fn action(&self) -> ChangeAction {
		self.action
	}

	pub fn items(&self) -> &[T] {
		&self.items
	}

	pub fn start_index(&self) -> Option<usize> {
		self.start_index
	}

	pub fn old_items(&self) -> &[T] {
		&self.old_items
	}

	/// Folds a later same-action descriptor into this one, keeping the first start index.
	pub(crate) fn absorb(&mut self, later: Self) {
		debug_assert_eq!(self.action, later.action);
		self.items.extend(later.items);
		self.old_items.extend(later.old_items);
		if self.start_index.is_none() {
			self.start_index = later.start_index;
		}
	}
}

impl<T: Clone> ChangeDescriptor<T> {
	/// Replays this change onto `target`.
	///
	/// Returns `false` for [`ChangeAction::Reset`] and for descriptors without a start index,
	/// which cannot be replayed positionally.
	pub fn apply_to(&self, target: &mut Vec<T>) -> bool {
		let Some(start) = self.start_index else {
			return false;
		};
		let fits = start.checked_add(self.items.len()).is_some_and(|end| end <= target.len());
		match self.action {
			ChangeAction::Add if start <= target.len() => {
				target.splice(start..start, self.items.iter().cloned());
				true
			}
			ChangeAction::Remove if fits => {
				target.drain(start..start + self.items.len());
				true
			}
			ChangeAction::Replace if fits => {
				for (offset, item) in self.items.iter().enumerate() {
					target[start + offset] = item.clone();
				}
				true
			}
			_ => false,
		}
	}
}
