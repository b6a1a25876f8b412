//! Restart policy engine: what happens to a service after its process exits.
//!
//! The decision is a pure function of the policy, the exit outcome and the
//! restart budget, so the supervisor only has to apply it.

use std::time::Duration;

use crate::types::RestartPolicy;

/// Exponential backoff between restarts: `min(base × 2^(attempt−1), cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
	pub base: Duration,
	pub cap: Duration,
}

impl Default for Backoff {
	fn default() -> Self {
		Self {
			base: Duration::from_secs(1),
			cap: Duration::from_secs(30),
		}
	}
}

impl Backoff {
	/// Delay before restart number `attempt` (1-based).
	pub fn delay(&self, attempt: u32) -> Duration {
		let exp = attempt.saturating_sub(1).min(31);
		self.base
			.checked_mul(1u32 << exp)
			.map_or(self.cap, |d| d.min(self.cap))
	}
}

#[derive(Debug, Clone, Copy)]
pub struct ExitContext {
	pub policy: RestartPolicy,
	pub success: bool,
	pub shutting_down: bool,
	/// Restarts already spent since the last explicit start.
	pub restarts_used: u32,
	pub max_restarts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
	/// Settle in `stopped`; no restart.
	Stop,
	/// Count a restart and respawn after `delay`.
	Restart { delay: Duration },
	/// Count a restart and settle in `crashed` for good.
	Crash,
}

impl ExitDecision {
	/// Whether the decision bumps the restart counter.
	pub fn counts_restart(&self) -> bool {
		!matches!(self, ExitDecision::Stop)
	}
}

pub fn decide(ctx: ExitContext, backoff: &Backoff) -> ExitDecision {
	if ctx.shutting_down {
		return ExitDecision::Stop;
	}
	if ctx.policy == RestartPolicy::Never {
		return ExitDecision::Stop;
	}
	if ctx.success && ctx.policy != RestartPolicy::Always {
		return ExitDecision::Stop;
	}

	let attempt = ctx.restarts_used.saturating_add(1);
	if attempt > ctx.max_restarts {
		return ExitDecision::Crash;
	}
	ExitDecision::Restart {
		delay: backoff.delay(attempt),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ctx(policy: RestartPolicy, success: bool, restarts_used: u32) -> ExitContext {
		ExitContext {
			policy,
			success,
			shutting_down: false,
			restarts_used,
			max_restarts: 3,
		}
	}

	#[test]
	fn backoff_doubles_then_caps() {
		let backoff = Backoff::default();
		assert_eq!(backoff.delay(1), Duration::from_secs(1));
		assert_eq!(backoff.delay(2), Duration::from_secs(2));
		assert_eq!(backoff.delay(3), Duration::from_secs(4));
		assert_eq!(backoff.delay(5), Duration::from_secs(16));
		assert_eq!(backoff.delay(6), Duration::from_secs(30));
		assert_eq!(backoff.delay(200), Duration::from_secs(30));
	}

	#[test]
	fn shutdown_always_stops() {
		let mut c = ctx(RestartPolicy::Always, false, 0);
		c.shutting_down = true;
		assert_eq!(decide(c, &Backoff::default()), ExitDecision::Stop);
	}

	#[test]
	fn never_policy_stops_even_on_failure() {
		assert_eq!(decide(ctx(RestartPolicy::Never, false, 0), &Backoff::default()), ExitDecision::Stop);
	}

	#[test]
	fn clean_exit_only_restarts_under_always() {
		let backoff = Backoff::default();
		assert_eq!(decide(ctx(RestartPolicy::OnFailure, true, 0), &backoff), ExitDecision::Stop);
		assert_eq!(
			decide(ctx(RestartPolicy::Always, true, 0), &backoff),
			ExitDecision::Restart { delay: Duration::from_secs(1) }
		);
	}

	#[test]
	fn failure_restarts_until_budget_is_spent() {
		let backoff = Backoff::default();
		assert_eq!(
			decide(ctx(RestartPolicy::OnFailure, false, 2), &backoff),
			ExitDecision::Restart { delay: Duration::from_secs(4) }
		);
		assert_eq!(decide(ctx(RestartPolicy::OnFailure, false, 3), &backoff), ExitDecision::Crash);
	}

	#[test]
	fn zero_budget_crashes_on_first_failure() {
		let mut c = ctx(RestartPolicy::OnFailure, false, 0);
		c.max_restarts = 0;
		assert_eq!(decide(c, &Backoff::default()), ExitDecision::Crash);
	}
}
