use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Problems with the configuration itself. Fatal before anything spawns.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read {path}: {source}")]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("failed to parse config: {0}")]
	Parse(#[from] toml::de::Error),
	#[error("duplicate {kind} name: {name}")]
	DuplicateName { kind: &'static str, name: String },
	#[error("name {0} is used by both a task and a service")]
	NameCollision(String),
	#[error("{0}: command is empty")]
	EmptyCommand(String),
	#[error("daemon.{0} must be greater than zero")]
	ZeroInterval(&'static str),
	#[error(transparent)]
	Resolve(#[from] ResolveError),
}

/// Dependency graph failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
	#[error("unknown task or service: {0}")]
	UnknownEntity(String),
	#[error("{entity} depends on unknown {dependency}")]
	UnknownDependency { entity: String, dependency: String },
	#[error("circular dependency involving {0}")]
	Cycle(String),
}

/// Reasons a daemon refuses to come up. Fatal before the endpoint is bound.
#[derive(Debug, Error)]
pub enum StartupError {
	#[error(transparent)]
	Config(#[from] ConfigError),
	#[error("daemon already running (socket {0})")]
	AlreadyRunning(PathBuf),
	#[error("port {port} for service {service} is already in use")]
	PortInUse { service: String, port: u16 },
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
}

impl From<ResolveError> for StartupError {
	fn from(e: ResolveError) -> Self {
		StartupError::Config(ConfigError::Resolve(e))
	}
}

impl From<corral_ipc::EndpointError> for StartupError {
	fn from(e: corral_ipc::EndpointError) -> Self {
		match e {
			corral_ipc::EndpointError::AlreadyRunning(path) => StartupError::AlreadyRunning(path),
			corral_ipc::EndpointError::Io(e) => StartupError::Io(e),
			other => StartupError::Io(std::io::Error::other(other.to_string())),
		}
	}
}

/// Runtime failures scoped to one entity and the branch depending on it.
#[derive(Debug, Error)]
pub enum EntityError {
	#[error(transparent)]
	Resolve(#[from] ResolveError),
	#[error("{name}: failed to spawn: {reason}")]
	Spawn { name: String, reason: String },
	#[error("task {name} failed: {reason}")]
	TaskFailed { name: String, reason: String },
	#[error("{entity}: dependency {dependency} failed: {reason}")]
	DependencyFailed { entity: String, dependency: String, reason: String },
	#[error("{entity}: timed out after {timeout:?} waiting for {dependency}")]
	DependencyTimeout { entity: String, dependency: String, timeout: Duration },
	#[error("{0}: supervisor is shutting down")]
	ShuttingDown(String),
}
