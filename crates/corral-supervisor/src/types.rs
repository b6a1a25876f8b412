use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

// --- Specs (immutable, built once from config) ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HealthCheck {
	#[default]
	None,
	Port {
		port: u16,
		#[serde(default = "default_host")]
		host: String,
	},
	Http {
		url: String,
	},
}

fn default_host() -> String {
	"127.0.0.1".into()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
	Always,
	#[default]
	OnFailure,
	Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
	pub name: String,
	pub command: String,
	#[serde(default)]
	pub cwd: Option<PathBuf>,
	#[serde(default)]
	pub env: BTreeMap<String, String>,
	#[serde(default)]
	pub health_check: HealthCheck,
	#[serde(default)]
	pub depends_on: Vec<String>,
	#[serde(default)]
	pub restart_policy: RestartPolicy,
	#[serde(default = "default_max_restarts")]
	pub max_restarts: u32,
}

fn default_max_restarts() -> u32 {
	5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
	pub name: String,
	pub command: String,
	#[serde(default)]
	pub cwd: Option<PathBuf>,
	#[serde(default)]
	pub env: BTreeMap<String, String>,
	#[serde(default)]
	pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
	Task,
	Service,
}

// --- Live state (mutable) ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
	#[default]
	Pending,
	Starting,
	Healthy,
	Unhealthy,
	Stopped,
	Crashed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
	#[default]
	Pending,
	Running,
	Completed,
	Failed,
}

impl TaskStatus {
	pub fn is_terminal(&self) -> bool {
		matches!(self, TaskStatus::Completed | TaskStatus::Failed)
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceState {
	pub status: ServiceStatus,
	pub pid: Option<u32>,
	pub restarts: u32,
	pub last_error: Option<String>,
	pub started_at: Option<DateTime<Utc>>,
}

impl ServiceState {
	pub fn is_running(&self) -> bool {
		self.pid.is_some()
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskState {
	pub status: TaskStatus,
	pub pid: Option<u32>,
	pub exit_code: Option<i32>,
	pub last_error: Option<String>,
	pub started_at: Option<DateTime<Utc>>,
	pub completed_at: Option<DateTime<Utc>>,
}

// --- Snapshot ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonInfo {
	pub pid: u32,
	pub started_at: DateTime<Utc>,
	pub endpoint: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
	pub updated_at: DateTime<Utc>,
	pub daemon: Option<DaemonInfo>,
	pub services: BTreeMap<String, ServiceState>,
	pub tasks: BTreeMap<String, TaskState>,
}

impl Snapshot {
	/// Every pid recorded anywhere in the snapshot, for out-of-band cleanup.
	pub fn live_pids(&self) -> Vec<(String, u32)> {
		let services = self.services.iter().filter_map(|(n, s)| s.pid.map(|p| (n.clone(), p)));
		let tasks = self.tasks.iter().filter_map(|(n, t)| t.pid.map(|p| (n.clone(), p)));
		services.chain(tasks).collect()
	}
}
