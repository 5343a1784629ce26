//! Pool scaling policies.
//!
//! A policy is a pure function from an [`Observation`] of a pool's load to a
//! target instance count. Cooldown handling is part of the decision: while the
//! previous decision is younger than the cooldown the current target is kept.

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// Snapshot of a pool's load at decision time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Observation {
	pub idle: usize,
	pub busy: usize,
	/// Callers waiting for a worker, including the one asking.
	pub pending: usize,
	/// Target in effect before this decision.
	pub current_target: usize,
	/// Time since the target last changed; `None` before the first decision.
	pub since_last_decision: Option<Duration>,
}

/// Decides how many workers a pool should run.
pub trait ScalingPolicy: Send + Sync + fmt::Debug {
	fn minimum(&self) -> usize;

	fn maximum(&self) -> usize;

	/// Minimum spacing between two target changes.
	fn cooldown(&self) -> Duration {
		Duration::ZERO
	}

	/// Target size for the observed load, within `[minimum, maximum]`.
	fn decide(&self, observation: &Observation) -> usize;
}

/// Sizes the pool to in-flight work plus queued demand.
///
/// `target = busy + ceil(pending / target_utilization)`, clamped to
/// `[minimum, maximum]`.
#[derive(Debug, Clone, PartialEq)]
pub struct UtilizationPolicy {
	minimum: usize,
	maximum: usize,
	target_utilization: f64,
	cooldown: Duration,
}

impl UtilizationPolicy {
	pub fn new(minimum: usize, maximum: usize, target_utilization: f64, cooldown: Duration) -> Result<Self> {
		if maximum == 0 {
			return Err(Error::InvalidConfig("maximum instances must be at least 1".to_string()));
		}
		if minimum > maximum {
			return Err(Error::InvalidConfig(format!(
				"minimum instances ({minimum}) exceeds maximum ({maximum})"
			)));
		}
		if !(target_utilization > 0.0 && target_utilization <= 1.0) {
			return Err(Error::InvalidConfig(format!(
				"target utilization must be in (0, 1], got {target_utilization}"
			)));
		}
		Ok(Self {
			minimum,
			maximum,
			target_utilization,
			cooldown,
		})
	}

	pub fn target_utilization(&self) -> f64 {
		self.target_utilization
	}
}

impl Default for UtilizationPolicy {
	fn default() -> Self {
		let maximum = std::thread::available_parallelism()
			.map(|n| n.get())
			.unwrap_or(4);
		Self {
			minimum: 1,
			maximum,
			target_utilization: 1.0,
			cooldown: Duration::from_secs(1),
		}
	}
}

impl ScalingPolicy for UtilizationPolicy {
	fn minimum(&self) -> usize {
		self.minimum
	}

	fn maximum(&self) -> usize {
		self.maximum
	}

	fn cooldown(&self) -> Duration {
		self.cooldown
	}

	fn decide(&self, observation: &Observation) -> usize {
		if let Some(elapsed) = observation.since_last_decision {
			if elapsed < self.cooldown {
				return observation.current_target;
			}
		}

		let demand = (observation.pending as f64 / self.target_utilization).ceil() as usize;
		(observation.busy + demand).clamp(self.minimum, self.maximum)
	}
}

/// Keeps the pool at a constant size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPolicy {
	size: usize,
}

impl FixedPolicy {
	pub fn new(size: usize) -> Result<Self> {
		if size == 0 {
			return Err(Error::InvalidConfig("fixed pool size must be at least 1".to_string()));
		}
		Ok(Self { size })
	}
}

impl ScalingPolicy for FixedPolicy {
	fn minimum(&self) -> usize {
		self.size
	}

	fn maximum(&self) -> usize {
		self.size
	}

	fn decide(&self, _observation: &Observation) -> usize {
		self.size
	}
}
