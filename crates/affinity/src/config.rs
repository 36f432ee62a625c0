use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for queue-based affinity contexts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
	/// Name given to threads spawned by [`crate::DispatcherThread`].
	pub thread_name: String,
	/// Longest park while pumping an empty queue, in microseconds.
	///
	/// Bounds how late a pump notices a predicate flipped by another thread without posting.
	pub idle_wait_us: u64,
	/// Upper bound on tasks run by one [`crate::Dispatcher::run_pending`] call.
	pub max_tasks_per_pump: usize,
}

impl DispatcherConfig {
	/// Returns the idle park interval.
	pub fn idle_wait(&self) -> Duration {
		Duration::from_micros(self.idle_wait_us.max(1))
	}

	/// Returns a config with a different thread name.
	pub fn named(mut self, name: impl Into<String>) -> Self {
		self.thread_name = name.into();
		self
	}
}

impl Default for DispatcherConfig {
	fn default() -> Self {
		Self {
			thread_name: "tether-dispatcher".to_string(),
			idle_wait_us: 500,
			max_tasks_per_pump: 256,
		}
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn missing_fields_take_defaults() {
		let cfg: DispatcherConfig = serde_json::from_str(r#"{ "thread_name": "ui" }"#).unwrap();
		assert_eq!(
			cfg,
			DispatcherConfig {
				thread_name: "ui".to_string(),
				..DispatcherConfig::default()
			}
		);
	}

	#[test]
	fn zero_idle_wait_is_clamped() {
		let cfg = DispatcherConfig {
			idle_wait_us: 0,
			..DispatcherConfig::default()
		};
		assert_eq!(cfg.idle_wait(), Duration::from_micros(1));
	}
}
