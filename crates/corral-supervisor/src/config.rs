use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::restart::Backoff;
use crate::types::{ServiceSpec, TaskSpec};

pub const DEFAULT_CONFIG_FILE: &str = "corral.toml";

/// A parsed `corral.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProjectConfig {
	#[serde(default)]
	pub daemon: DaemonSettings,
	#[serde(default)]
	pub tasks: Vec<TaskSpec>,
	#[serde(default)]
	pub services: Vec<ServiceSpec>,
}

/// Timing knobs, all in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonSettings {
	#[serde(default = "default_health_interval")]
	pub health_interval_ms: u64,
	#[serde(default = "default_snapshot_interval")]
	pub snapshot_interval_ms: u64,
	#[serde(default = "default_dependency_poll")]
	pub dependency_poll_ms: u64,
	#[serde(default = "default_dependency_timeout")]
	pub dependency_timeout_ms: u64,
	#[serde(default = "default_stop_grace")]
	pub stop_grace_ms: u64,
	#[serde(default = "default_backoff_base")]
	pub backoff_base_ms: u64,
	#[serde(default = "default_backoff_cap")]
	pub backoff_cap_ms: u64,
	#[serde(default = "default_http_timeout")]
	pub http_timeout_ms: u64,
}

impl Default for DaemonSettings {
	fn default() -> Self {
		Self {
			health_interval_ms: default_health_interval(),
			snapshot_interval_ms: default_snapshot_interval(),
			dependency_poll_ms: default_dependency_poll(),
			dependency_timeout_ms: default_dependency_timeout(),
			stop_grace_ms: default_stop_grace(),
			backoff_base_ms: default_backoff_base(),
			backoff_cap_ms: default_backoff_cap(),
			http_timeout_ms: default_http_timeout(),
		}
	}
}

fn default_health_interval() -> u64 {
	2000
}
fn default_snapshot_interval() -> u64 {
	2000
}
fn default_dependency_poll() -> u64 {
	500
}
fn default_dependency_timeout() -> u64 {
	30_000
}
fn default_stop_grace() -> u64 {
	5000
}
fn default_backoff_base() -> u64 {
	1000
}
fn default_backoff_cap() -> u64 {
	30_000
}
fn default_http_timeout() -> u64 {
	2000
}

impl DaemonSettings {
	pub fn health_interval(&self) -> Duration {
		Duration::from_millis(self.health_interval_ms)
	}
	pub fn snapshot_interval(&self) -> Duration {
		Duration::from_millis(self.snapshot_interval_ms)
	}
	pub fn dependency_poll(&self) -> Duration {
		Duration::from_millis(self.dependency_poll_ms)
	}
	pub fn dependency_timeout(&self) -> Duration {
		Duration::from_millis(self.dependency_timeout_ms)
	}
	pub fn stop_grace(&self) -> Duration {
		Duration::from_millis(self.stop_grace_ms)
	}
	pub fn http_timeout(&self) -> Duration {
		Duration::from_millis(self.http_timeout_ms)
	}
	/// Intervals that drive timers cannot be zero.
	pub fn validate(&self) -> Result<(), ConfigError> {
		let intervals = [
			("health_interval_ms", self.health_interval_ms),
			("snapshot_interval_ms", self.snapshot_interval_ms),
			("dependency_poll_ms", self.dependency_poll_ms),
		];
		match intervals.into_iter().find(|(_, ms)| *ms == 0) {
			Some((field, _)) => Err(ConfigError::ZeroInterval(field)),
			None => Ok(()),
		}
	}

	pub fn backoff(&self) -> Backoff {
		Backoff {
			base: Duration::from_millis(self.backoff_base_ms),
			cap: Duration::from_millis(self.backoff_cap_ms),
		}
	}
}

impl ProjectConfig {
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		Self::parse(&content)
	}

	pub fn parse(content: &str) -> Result<Self, ConfigError> {
		let config: ProjectConfig = toml::from_str(content)?;
		config.validate()?;
		Ok(config)
	}

	/// Name-level and timing checks. Dependency edges and cycles are the
	/// resolver's job.
	pub fn validate(&self) -> Result<(), ConfigError> {
		self.daemon.validate()?;

		let mut tasks = HashSet::new();
		for task in &self.tasks {
			if !tasks.insert(task.name.as_str()) {
				return Err(ConfigError::DuplicateName { kind: "task", name: task.name.clone() });
			}
			if task.command.trim().is_empty() {
				return Err(ConfigError::EmptyCommand(task.name.clone()));
			}
		}

		let mut services = HashSet::new();
		for service in &self.services {
			if !services.insert(service.name.as_str()) {
				return Err(ConfigError::DuplicateName { kind: "service", name: service.name.clone() });
			}
			if tasks.contains(service.name.as_str()) {
				return Err(ConfigError::NameCollision(service.name.clone()));
			}
			if service.command.trim().is_empty() {
				return Err(ConfigError::EmptyCommand(service.name.clone()));
			}
		}
		Ok(())
	}
}

/// Resolve an entity's working directory: `~` expands to `$HOME`, relative
/// paths hang off the project root, nothing means the root itself.
pub fn resolve_cwd(root: &Path, cwd: Option<&Path>) -> PathBuf {
	let Some(cwd) = cwd else {
		return root.to_path_buf();
	};

	if let Ok(rest) = cwd.strip_prefix("~") {
		if let Some(home) = home_dir() {
			return home.join(rest);
		}
	}

	if cwd.is_absolute() {
		cwd.to_path_buf()
	} else {
		root.join(cwd)
	}
}

fn home_dir() -> Option<PathBuf> {
	std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{HealthCheck, RestartPolicy};

	const SAMPLE: &str = r#"
[daemon]
health_interval_ms = 250

[[tasks]]
name = "migrate"
command = "echo migrating"

[[services]]
name = "web"
command = "python3 -m http.server 8000"
cwd = "frontend"
depends_on = ["migrate"]
health_check = { type = "port", port = 8000 }
env = { PORT = "8000" }

[[services]]
name = "api"
command = "./api"
health_check = { type = "http", url = "http://localhost:9000/health" }
restart_policy = "always"
max_restarts = 2
"#;

	#[test]
	fn parses_sample() {
		let config = ProjectConfig::parse(SAMPLE).unwrap();
		assert_eq!(config.daemon.health_interval(), Duration::from_millis(250));
		assert_eq!(config.daemon.stop_grace(), Duration::from_secs(5));
		assert_eq!(config.tasks.len(), 1);
		assert_eq!(config.services.len(), 2);

		let web = &config.services[0];
		assert_eq!(web.depends_on, vec!["migrate".to_string()]);
		assert_eq!(web.health_check, HealthCheck::Port { port: 8000, host: "127.0.0.1".into() });
		assert_eq!(web.restart_policy, RestartPolicy::OnFailure);
		assert_eq!(web.max_restarts, 5);
		assert_eq!(web.env.get("PORT").map(String::as_str), Some("8000"));

		let api = &config.services[1];
		assert_eq!(api.restart_policy, RestartPolicy::Always);
		assert_eq!(api.max_restarts, 2);
		assert!(matches!(api.health_check, HealthCheck::Http { .. }));
	}

	#[test]
	fn health_check_defaults_to_none() {
		let config = ProjectConfig::parse("[[services]]\nname = \"a\"\ncommand = \"sleep 1\"\n").unwrap();
		assert_eq!(config.services[0].health_check, HealthCheck::None);
	}

	#[test]
	fn rejects_duplicate_names() {
		let err = ProjectConfig::parse(
			"[[services]]\nname = \"a\"\ncommand = \"x\"\n[[services]]\nname = \"a\"\ncommand = \"y\"\n",
		)
		.unwrap_err();
		assert!(matches!(err, ConfigError::DuplicateName { kind: "service", .. }), "{err}");
	}

	#[test]
	fn rejects_task_service_collision() {
		let err = ProjectConfig::parse(
			"[[tasks]]\nname = \"a\"\ncommand = \"x\"\n[[services]]\nname = \"a\"\ncommand = \"y\"\n",
		)
		.unwrap_err();
		assert!(matches!(err, ConfigError::NameCollision(ref n) if n == "a"));
	}

	#[test]
	fn rejects_zero_intervals() {
		for field in ["health_interval_ms", "snapshot_interval_ms", "dependency_poll_ms"] {
			let toml = format!("[daemon]\n{} = 0\n\n[[services]]\nname = \"a\"\ncommand = \"x\"\n", field);
			let err = ProjectConfig::parse(&toml).unwrap_err();
			assert!(matches!(err, ConfigError::ZeroInterval(f) if f == field), "{err}");
		}
		assert!(ProjectConfig::parse("[daemon]\nhealth_interval_ms = 1\n").is_ok());
	}

	#[test]
	fn rejects_unknown_restart_policy() {
		let err = ProjectConfig::parse(
			"[[services]]\nname = \"a\"\ncommand = \"x\"\nrestart_policy = \"sometimes\"\n",
		)
		.unwrap_err();
		assert!(matches!(err, ConfigError::Parse(_)));
	}

	#[test]
	fn cwd_resolution() {
		let root = Path::new("/work/app");
		assert_eq!(resolve_cwd(root, None), PathBuf::from("/work/app"));
		assert_eq!(resolve_cwd(root, Some(Path::new("web"))), PathBuf::from("/work/app/web"));
		assert_eq!(resolve_cwd(root, Some(Path::new("/srv"))), PathBuf::from("/srv"));
		if let Some(home) = home_dir() {
			assert_eq!(resolve_cwd(root, Some(Path::new("~/code"))), home.join("code"));
		}
	}
}
