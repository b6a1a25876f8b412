//! Per-entity lifecycle transitions.
//!
//! Every mutation of a [`ServiceState`] or [`TaskState`] goes through
//! `apply` with one of a small, fixed set of events, so the supervisor never
//! pokes fields directly.

use chrono::{DateTime, Utc};

use crate::restart::ExitDecision;
use crate::types::{ServiceState, ServiceStatus, TaskState, TaskStatus};

#[derive(Debug, Clone)]
pub enum ServiceEvent {
	/// An explicit start claimed the service; dependencies are being awaited.
	Starting,
	/// A process is up. `healthy` is set for services without a probe.
	Spawned { pid: u32, at: DateTime<Utc>, healthy: bool },
	/// The process is gone (or never came up); `failure` describes why when
	/// the exit was not clean.
	Exited { decision: ExitDecision, failure: Option<String> },
	/// A health probe finished against the current process.
	Probe { healthy: bool },
	/// A backoff timer fired and the service is about to respawn.
	RestartFired,
	/// Startup was abandoned before a process existed.
	Aborted { error: String },
	/// Explicit stop, or the process exited after one was requested.
	Stopped,
}

impl ServiceState {
	pub fn apply(&mut self, event: ServiceEvent) {
		match event {
			ServiceEvent::Starting | ServiceEvent::RestartFired => {
				self.status = ServiceStatus::Starting;
			}
			ServiceEvent::Spawned { pid, at, healthy } => {
				self.pid = Some(pid);
				self.started_at = Some(at);
				self.status = if healthy {
					ServiceStatus::Healthy
				} else {
					ServiceStatus::Starting
				};
			}
			ServiceEvent::Exited { decision, failure } => {
				self.pid = None;
				if decision.counts_restart() {
					self.restarts += 1;
				}
				if failure.is_some() {
					self.last_error = failure;
				}
				self.status = match decision {
					ExitDecision::Stop => ServiceStatus::Stopped,
					ExitDecision::Restart { .. } => ServiceStatus::Unhealthy,
					ExitDecision::Crash => ServiceStatus::Crashed,
				};
			}
			ServiceEvent::Probe { healthy } => {
				let probing = matches!(
					self.status,
					ServiceStatus::Starting | ServiceStatus::Healthy | ServiceStatus::Unhealthy
				);
				if self.pid.is_some() && probing {
					self.status = if healthy {
						ServiceStatus::Healthy
					} else {
						ServiceStatus::Unhealthy
					};
				}
			}
			ServiceEvent::Aborted { error } => {
				self.pid = None;
				self.last_error = Some(error);
				self.status = ServiceStatus::Stopped;
			}
			ServiceEvent::Stopped => {
				self.pid = None;
				self.status = ServiceStatus::Stopped;
			}
		}
	}
}

#[derive(Debug, Clone)]
pub enum TaskEvent {
	Spawned { pid: u32, at: DateTime<Utc> },
	Finished { exit_code: Option<i32>, failure: Option<String>, at: DateTime<Utc> },
	/// Never got a process (bad cwd, spawn error) or a dependency gave out.
	Failed { error: String, at: DateTime<Utc> },
}

impl TaskState {
	pub fn apply(&mut self, event: TaskEvent) {
		match event {
			TaskEvent::Spawned { pid, at } => {
				self.pid = Some(pid);
				self.started_at = Some(at);
				self.status = TaskStatus::Running;
			}
			TaskEvent::Finished { exit_code, failure, at } => {
				self.pid = None;
				self.exit_code = exit_code;
				self.completed_at = Some(at);
				self.status = if failure.is_none() {
					TaskStatus::Completed
				} else {
					TaskStatus::Failed
				};
				self.last_error = failure;
			}
			TaskEvent::Failed { error, at } => {
				self.pid = None;
				self.completed_at = Some(at);
				self.last_error = Some(error);
				self.status = TaskStatus::Failed;
			}
		}
	}
}
