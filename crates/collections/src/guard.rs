//! Mutual exclusion over one container instance.
//!
//! # Role
//!
//! [`MutationGuard`] is a held/free flag with a selectable waiting strategy. It is not tied to a
//! thread: the thread that acquired it need not be the one that releases it. [`Guarded`] pairs a
//! guard with the state it protects and hands out RAII access.
//!
//! # Invariants
//!
//! - An affinity thread never parks inside [`MutationGuard::acquire`]; it pumps its own queue until
//!   the guard frees up.
//! - Releasing a free guard changes nothing (logged, reported as `false`).
//! - A [`GuardedMut`] is the only path to the protected value while it lives.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::{GuardConfig, GuardError, GuardStrategy};

/// Held/free mutual-exclusion flag with spin or blocking waits.
pub struct MutationGuard {
	config: GuardConfig,
	held: AtomicBool,
	park: Mutex<()>,
	released: Condvar,
}

impl MutationGuard {
	pub fn new(config: GuardConfig) -> Self {
		Self {
			config,
			held: AtomicBool::new(false),
			park: Mutex::new(()),
			released: Condvar::new(),
		}
	}

	pub fn strategy(&self) -> GuardStrategy {
		self.config.strategy
	}

	pub fn config(&self) -> &GuardConfig {
		&self.config
	}

	/// Returns true while some caller holds the guard.
	pub fn is_held(&self) -> bool {
		self.held.load(Ordering::Acquire)
	}

	/// Takes the guard if it is free. Never waits.
	#[inline]
	pub fn try_acquire(&self) -> bool {
		!self.held.load(Ordering::Relaxed) && self.held.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed).is_ok()
	}

	/// Waits for the guard using the configured strategy and deadline.
	pub fn acquire(&self) -> Result<(), GuardError> {
		self.acquire_for(self.config.acquire_timeout())
	}

	/// Waits for the guard, giving up after `timeout` when one is set.
	///
	/// On a thread that owns an affinity context this pumps that context's queue instead of
	/// spinning or parking.
	pub fn acquire_for(&self, timeout: Option<Duration>) -> Result<(), GuardError> {
		if self.try_acquire() {
			return Ok(());
		}

		let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
		if let Some(ctx) = tether_affinity::current()
			&& !ctx.is_closed()
		{
			tracing::trace!(context = %ctx.id(), strategy = self.config.strategy.as_str(), "guard.acquire.pump");
			ctx.pump_until(&mut || self.try_acquire(), deadline)?;
			return Ok(());
		}

		match self.config.strategy {
			GuardStrategy::Spin => self.spin_until(deadline),
			GuardStrategy::Blocking => self.park_until(deadline),
		}
	}

	fn spin_until(&self, deadline: Option<Instant>) -> Result<(), GuardError> {
		let start = Instant::now();
		let mut spins = 0u32;
		loop {
			if self.try_acquire() {
				return Ok(());
			}
			if let Some(deadline) = deadline
				&& Instant::now() >= deadline
			{
				return Err(self.timed_out(start));
			}
			if spins < self.config.spin_limit {
				spins += 1;
				std::hint::spin_loop();
			} else {
				std::thread::yield_now();
			}
		}
	}

	fn park_until(&self, deadline: Option<Instant>) -> Result<(), GuardError> {
		let start = Instant::now();
		let mut park = self.park.lock();
		loop {
			if self.try_acquire() {
				return Ok(());
			}
			// `release` takes `park` before notifying, so the flag cannot flip between the check
			// above and the wait below without us seeing the wakeup.
			match deadline {
				Some(deadline) => {
					if self.released.wait_until(&mut park, deadline).timed_out() {
						if self.try_acquire() {
							return Ok(());
						}
						return Err(self.timed_out(start));
					}
				}
				None => self.released.wait(&mut park),
			}
		}
	}

	fn timed_out(&self, start: Instant) -> GuardError {
		let waited = start.elapsed();
		tracing::warn!(strategy = self.config.strategy.as_str(), ?waited, "guard.acquire.timeout");
		GuardError::Timeout { waited }
	}

	/// Frees the guard. Releasing a free guard is a logged no-op returning `false`.
	pub fn release(&self) -> bool {
		match self.release_checked() {
			Ok(()) => true,
			Err(_) => {
				tracing::warn!(strategy = self.config.strategy.as_str(), "guard.release_not_held");
				false
			}
		}
	}

	/// Frees the guard, reporting [`GuardError::NotHeld`] instead of logging.
	pub fn release_checked(&self) -> Result<(), GuardError> {
		if self.held.compare_exchange(true, false, Ordering::Release, Ordering::Relaxed).is_err() {
			return Err(GuardError::NotHeld);
		}
		if self.config.strategy == GuardStrategy::Blocking {
			let _park = self.park.lock();
			self.released.notify_one();
		}
		Ok(())
	}
}

impl Default for MutationGuard {
	fn default() -> Self {
		Self::new(GuardConfig::default())
	}
}

impl std::fmt::Debug for MutationGuard {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MutationGuard")
			.field("strategy", &self.config.strategy)
			.field("held", &self.is_held())
			.finish()
	}
}

/// State protected by a [`MutationGuard`].
pub struct Guarded<T> {
	guard: MutationGuard,
	value: UnsafeCell<T>,
}

// SAFETY: the value is only reachable through `GuardedMut`, and at most one `GuardedMut` exists
// at a time because creating one requires winning the guard.
unsafe impl<T: Send> Send for Guarded<T> {}
unsafe impl<T: Send> Sync for Guarded<T> {}

impl<T> Guarded<T> {
	pub fn new(value: T, config: GuardConfig) -> Self {
		Self {
			guard: MutationGuard::new(config),
			value: UnsafeCell::new(value),
		}
	}

	/// Acquires the guard and returns exclusive access.
	pub fn lock(&self) -> Result<GuardedMut<'_, T>, GuardError> {
		self.guard.acquire()?;
		Ok(GuardedMut {
			owner: self,
			_marker: PhantomData,
		})
	}

	/// Returns exclusive access only if the guard is free right now.
	pub fn try_lock(&self) -> Option<GuardedMut<'_, T>> {
		self.guard.try_acquire().then(|| GuardedMut {
			owner: self,
			_marker: PhantomData,
		})
	}

	pub fn is_locked(&self) -> bool {
		self.guard.is_held()
	}

	pub fn config(&self) -> &GuardConfig {
		self.guard.config()
	}

	pub fn get_mut(&mut self) -> &mut T {
		self.value.get_mut()
	}

	pub fn into_inner(self) -> T {
		self.value.into_inner()
	}
}

/// Exclusive access to a [`Guarded`] value; releases the guard on drop.
pub struct GuardedMut<'a, T> {
	owner: &'a Guarded<T>,
	_marker: PhantomData<&'a mut T>,
}

impl<T> Deref for GuardedMut<'_, T> {
	type Target = T;

	fn deref(&self) -> &T {
		// SAFETY: this handle holds the guard, so no other reference to the value exists.
		unsafe { &*self.owner.value.get() }
	}
}

impl<T> DerefMut for GuardedMut<'_, T> {
	fn deref_mut(&mut self) -> &mut T {
		// SAFETY: as in `deref`; `&mut self` rules out aliasing through this handle.
		unsafe { &mut *self.owner.value.get() }
	}
}

impl<T> Drop for GuardedMut<'_, T> {
	fn drop(&mut self) {
		self.owner.guard.release();
	}
}
