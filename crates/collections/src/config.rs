use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a [`crate::MutationGuard`] waits for a busy guard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardStrategy {
	/// CAS loop with a spin hint, yielding the thread after `spin_limit` failed attempts.
	Spin,
	/// Park on an OS mutex/condvar pair until released.
	#[default]
	Blocking,
}

impl GuardStrategy {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Spin => "spin",
			Self::Blocking => "blocking",
		}
	}
}

/// Guard settings shared by every container type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
	pub strategy: GuardStrategy,
	/// Deadline for a single acquire, in milliseconds. `None` waits forever.
	pub acquire_timeout_ms: Option<u64>,
	/// Spin iterations before a [`GuardStrategy::Spin`] guard starts yielding.
	pub spin_limit: u32,
}

impl GuardConfig {
	/// Blocking guard without a deadline.
	pub fn blocking() -> Self {
		Self::default()
	}

	/// Spin guard without a deadline.
	pub fn spin() -> Self {
		Self {
			strategy: GuardStrategy::Spin,
			..Self::default()
		}
	}

	/// Returns a copy with an acquire deadline.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.acquire_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
		self
	}

	pub fn acquire_timeout(&self) -> Option<Duration> {
		self.acquire_timeout_ms.map(Duration::from_millis)
	}
}

impl Default for GuardConfig {
	fn default() -> Self {
		Self {
			strategy: GuardStrategy::Blocking,
			acquire_timeout_ms: None,
			spin_limit: 64,
		}
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn deserializes_partial_config() {
		let cfg: GuardConfig = serde_json::from_str(r#"{ "strategy": "spin", "acquire_timeout_ms": 250 }"#).unwrap();
		assert_eq!(
			cfg,
			GuardConfig {
				strategy: GuardStrategy::Spin,
				acquire_timeout_ms: Some(250),
				spin_limit: 64,
			}
		);
		assert_eq!(cfg.acquire_timeout(), Some(Duration::from_millis(250)));
	}

	#[test]
	fn empty_config_is_blocking_without_deadline() {
		let cfg: GuardConfig = serde_json::from_str("{}").unwrap();
		assert_eq!(cfg, GuardConfig::blocking());
		assert_eq!(cfg.acquire_timeout(), None);
	}
}
