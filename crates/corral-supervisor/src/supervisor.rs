use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use crate::config::{self, DaemonSettings, ProjectConfig};
use crate::error::{ConfigError, EntityError, ResolveError};
use crate::health::HealthProbe;
use crate::logs;
use crate::output::LogSink;
use crate::resolver::DependencyGraph;
use crate::restart::{self, Backoff, ExitContext, ExitDecision};
use crate::runner::{self, ExitWatch};
use crate::state::{ServiceEvent, TaskEvent};
use crate::types::*;

pub struct SupervisorConfig {
	/// Project root; relative `cwd`s resolve against it.
	pub root: PathBuf,
	pub log_dir: PathBuf,
	/// When set, a bare `start` only covers this entity and its dependencies.
	pub branch: Option<String>,
}

/// Owns every spec and every piece of live state for one project.
///
/// Specs are fixed at construction. State only changes through
/// [`ServiceEvent`]/[`TaskEvent`] transitions applied under the registry lock,
/// and the lock is never held across a wait on a process, probe or timer.
pub struct Supervisor {
	graph: DependencyGraph,
	order: Vec<String>,
	services: HashMap<String, ServiceSpec>,
	tasks: HashMap<String, TaskSpec>,
	settings: DaemonSettings,
	backoff: Backoff,
	root: PathBuf,
	log_dir: PathBuf,
	branch: Option<String>,
	registry: RwLock<Registry>,
	pids: PidTable,
	probe: HealthProbe,
	daemon: OnceLock<DaemonInfo>,
	stopping: watch::Sender<bool>,
	shutdown_request: watch::Sender<bool>,
}

struct Registry {
	services: BTreeMap<String, ServiceEntry>,
	tasks: BTreeMap<String, TaskEntry>,
}

#[derive(Default)]
struct ServiceEntry {
	state: ServiceState,
	exit: Option<ExitWatch>,
	/// Bumped by every explicit start/stop; stale timers and exits compare
	/// against it.
	generation: u64,
	/// `restarts` at the last explicit start.
	restart_baseline: u32,
	stop_requested: bool,
	/// Why the last start gave up before spawning (failed dependency).
	aborted: Option<String>,
}

#[derive(Default)]
struct TaskEntry {
	state: TaskState,
	exit: Option<ExitWatch>,
	/// A start has claimed the run; others wait on it.
	claimed: bool,
	aborted: Option<String>,
}

/// Pids of every live child, readable without the async registry lock so a
/// panic hook can still reach them.
#[derive(Clone, Default)]
pub struct PidTable(Arc<std::sync::Mutex<BTreeMap<String, u32>>>);

impl PidTable {
	fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, u32>> {
		self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	fn insert(&self, name: &str, pid: u32) {
		self.lock().insert(name.to_string(), pid);
	}

	fn remove(&self, name: &str, pid: u32) {
		let mut pids = self.lock();
		if pids.get(name) == Some(&pid) {
			pids.remove(name);
		}
	}

	pub fn pids(&self) -> Vec<u32> {
		self.lock().values().copied().collect()
	}

	/// SIGKILL every tracked process group.
	pub fn kill_all(&self) {
		for pid in self.pids() {
			runner::force_kill(pid);
		}
	}
}

#[derive(Debug, Default)]
pub struct StartReport {
	pub messages: Vec<String>,
	pub errors: Vec<EntityError>,
}

enum Readiness {
	Ready,
	Waiting,
	Failed(String),
}

impl Supervisor {
	pub fn new(project: ProjectConfig, config: SupervisorConfig) -> Result<Arc<Self>, ConfigError> {
		project.validate()?;
		let graph = DependencyGraph::new(&project)?;
		let order = graph.resolve_order(None)?;
		if let Some(branch) = &config.branch {
			graph.resolve_order(Some(branch))?;
		}

		let registry = Registry {
			services: project
				.services
				.iter()
				.map(|s| (s.name.clone(), ServiceEntry::default()))
				.collect(),
			tasks: project
				.tasks
				.iter()
				.map(|t| (t.name.clone(), TaskEntry::default()))
				.collect(),
		};

		let (stopping, _) = watch::channel(false);
		let (shutdown_request, _) = watch::channel(false);

		Ok(Arc::new(Self {
			graph,
			order,
			services: project.services.into_iter().map(|s| (s.name.clone(), s)).collect(),
			tasks: project.tasks.into_iter().map(|t| (t.name.clone(), t)).collect(),
			backoff: project.daemon.backoff(),
			probe: HealthProbe::new(project.daemon.http_timeout()),
			settings: project.daemon,
			root: config.root,
			log_dir: config.log_dir,
			branch: config.branch,
			registry: RwLock::new(registry),
			pids: PidTable::default(),
			daemon: OnceLock::new(),
			stopping,
			shutdown_request,
		}))
	}

	// --- Introspection ---

	/// Full start order; reversed, it is the shutdown order.
	pub fn order(&self) -> &[String] {
		&self.order
	}

	pub fn settings(&self) -> &DaemonSettings {
		&self.settings
	}

	pub fn pid_table(&self) -> PidTable {
		self.pids.clone()
	}

	/// `port` health-check targets, checked for conflicts before startup.
	pub fn port_targets(&self) -> Vec<(String, String, u16)> {
		self.order
			.iter()
			.filter_map(|name| self.services.get(name))
			.filter_map(|spec| match &spec.health_check {
				HealthCheck::Port { port, host } => Some((spec.name.clone(), host.clone(), *port)),
				_ => None,
			})
			.collect()
	}

	pub fn set_daemon_info(&self, info: DaemonInfo) {
		let _ = self.daemon.set(info);
	}

	pub async fn service_state(&self, name: &str) -> Option<ServiceState> {
		self.registry.read().await.services.get(name).map(|e| e.state.clone())
	}

	pub async fn task_state(&self, name: &str) -> Option<TaskState> {
		self.registry.read().await.tasks.get(name).map(|e| e.state.clone())
	}

	pub async fn snapshot(&self) -> Snapshot {
		let registry = self.registry.read().await;
		Snapshot {
			updated_at: Utc::now(),
			daemon: self.daemon.get().cloned(),
			services: registry
				.services
				.iter()
				.map(|(n, e)| (n.clone(), e.state.clone()))
				.collect(),
			tasks: registry
				.tasks
				.iter()
				.map(|(n, e)| (n.clone(), e.state.clone()))
				.collect(),
		}
	}

	pub fn logs(&self, name: &str, lines: Option<usize>) -> Result<Vec<String>, String> {
		if !self.graph.contains(name) {
			return Err(ResolveError::UnknownEntity(name.to_string()).to_string());
		}
		let path = logs::log_path(&self.log_dir, name);
		if !path.exists() {
			return Err(format!("no logs for {}", name));
		}
		logs::tail(&path, lines.unwrap_or(logs::DEFAULT_TAIL_LINES))
			.map_err(|e| format!("failed to read {}: {}", path.display(), e))
	}

	// --- Shutdown flags ---

	pub fn is_shutting_down(&self) -> bool {
		*self.stopping.borrow()
	}

	/// Ask whoever runs the daemon to shut down. Returns immediately.
	pub fn request_shutdown(&self) {
		self.shutdown_request.send_replace(true);
	}

	pub fn shutdown_requested(&self) -> watch::Receiver<bool> {
		self.shutdown_request.subscribe()
	}

	pub fn stopping(&self) -> watch::Receiver<bool> {
		self.stopping.subscribe()
	}

	/// Flip into shutdown mode. Only the first caller gets `true`.
	fn begin_shutdown(&self) -> bool {
		self.stopping.send_if_modified(|stopping| {
			if *stopping {
				false
			} else {
				*stopping = true;
				true
			}
		})
	}

	/// Stop everything in reverse dependency order. Runs at most once; later
	/// calls return `false` without doing anything.
	pub async fn shutdown(self: &Arc<Self>) -> bool {
		if !self.begin_shutdown() {
			return false;
		}
		tracing::info!("stopping all entities");
		for name in self.order.iter().rev() {
			if let Err(e) = self.stop_entity(name).await {
				tracing::warn!("{}", e);
			}
		}
		true
	}

	// --- Start ---

	/// Start `target` and its dependency closure, or everything (limited to
	/// the construction branch, if any). Entities start concurrently, each
	/// gated on its own dependencies, so one failing branch leaves the others
	/// alone.
	pub async fn start(self: &Arc<Self>, target: Option<&str>) -> Result<StartReport, EntityError> {
		let target = target.or(self.branch.as_deref());
		if self.is_shutting_down() {
			return Err(EntityError::ShuttingDown(target.unwrap_or("all").to_string()));
		}
		let order = self.graph.resolve_order(target)?;

		let mut set = JoinSet::new();
		for (i, name) in order.iter().cloned().enumerate() {
			let sup = Arc::clone(self);
			set.spawn(async move {
				let result = sup.start_entity(&name).await;
				(i, result)
			});
		}

		let mut results: Vec<Option<Result<String, EntityError>>> = order.iter().map(|_| None).collect();
		while let Some(joined) = set.join_next().await {
			match joined {
				Ok((i, result)) => results[i] = Some(result),
				Err(e) => tracing::error!("start task failed: {}", e),
			}
		}

		let mut report = StartReport::default();
		for result in results.into_iter().flatten() {
			match result {
				Ok(msg) => report.messages.push(msg),
				Err(e) => {
					tracing::warn!("{}", e);
					report.errors.push(e);
				}
			}
		}
		Ok(report)
	}

	pub async fn start_entity(self: &Arc<Self>, name: &str) -> Result<String, EntityError> {
		match self.graph.kind(name) {
			Some(EntityKind::Task) => self.run_task(name).await,
			Some(EntityKind::Service) => self.start_service(name).await,
			None => Err(ResolveError::UnknownEntity(name.to_string()).into()),
		}
	}

	async fn run_task(self: &Arc<Self>, name: &str) -> Result<String, EntityError> {
		let claimed_elsewhere = {
			let mut registry = self.registry.write().await;
			let entry = registry
				.tasks
				.get_mut(name)
				.ok_or_else(|| ResolveError::UnknownEntity(name.to_string()))?;
			match entry.state.status {
				TaskStatus::Completed => return Ok(format!("{}: already completed", name)),
				TaskStatus::Failed => return Ok(format!("{}: already failed", name)),
				_ => {}
			}
			if entry.claimed {
				true
			} else {
				entry.claimed = true;
				entry.aborted = None;
				false
			}
		};
		if claimed_elsewhere {
			return self.wait_task(name).await;
		}

		if let Err(e) = self.await_dependencies(name).await {
			let mut registry = self.registry.write().await;
			if let Some(entry) = registry.tasks.get_mut(name) {
				entry.claimed = false;
				entry.aborted = Some(e.to_string());
				entry.state.last_error = Some(e.to_string());
			}
			return Err(e);
		}

		if self.is_shutting_down() {
			self.release_task(name).await;
			return Err(EntityError::ShuttingDown(name.to_string()));
		}

		let spec = &self.tasks[name];
		let cwd = config::resolve_cwd(&self.root, spec.cwd.as_deref());
		let sink = LogSink::open(&self.log_dir, name);
		sink.note(&format!("running: {}", spec.command)).await;

		let handle = match runner::spawn(&spec.command, &cwd, &spec.env, sink.clone()) {
			Ok(h) => h,
			Err(e) => {
				let reason = e.to_string();
				sink.note(&format!("failed to spawn: {}", reason)).await;
				let mut registry = self.registry.write().await;
				if let Some(entry) = registry.tasks.get_mut(name) {
					entry.claimed = false;
					entry.state.apply(TaskEvent::Failed { error: reason.clone(), at: Utc::now() });
				}
				return Err(EntityError::Spawn { name: name.to_string(), reason });
			}
		};

		let pid = handle.pid;
		let registered = {
			let mut registry = self.registry.write().await;
			match registry.tasks.get_mut(name) {
				Some(entry) if !self.is_shutting_down() => {
					entry.exit = Some(handle.watcher());
					entry.state.apply(TaskEvent::Spawned { pid, at: Utc::now() });
					self.pids.insert(name, pid);
					true
				}
				_ => false,
			}
		};
		if !registered {
			// shutdown began while the process was coming up
			runner::force_kill(pid);
			let _ = handle.wait().await;
			self.release_task(name).await;
			return Err(EntityError::ShuttingDown(name.to_string()));
		}
		tracing::info!(task = name, pid, "task started");

		let info = handle.wait().await;
		let failure = (!info.success()).then(|| info.describe());
		{
			let mut registry = self.registry.write().await;
			if let Some(entry) = registry.tasks.get_mut(name) {
				entry.exit = None;
				entry.claimed = false;
				entry.state.apply(TaskEvent::Finished {
					exit_code: info.code,
					failure: failure.clone(),
					at: Utc::now(),
				});
			}
			self.pids.remove(name, pid);
		}
		sink.note(&info.describe()).await;

		match failure {
			None => {
				tracing::info!(task = name, "task completed");
				Ok(format!("{}: completed", name))
			}
			Some(reason) => {
				tracing::warn!(task = name, "task failed: {}", reason);
				Err(EntityError::TaskFailed { name: name.to_string(), reason })
			}
		}
	}

	/// Give up a claim without recording an outcome.
	async fn release_task(&self, name: &str) {
		let mut registry = self.registry.write().await;
		if let Some(entry) = registry.tasks.get_mut(name) {
			entry.claimed = false;
			entry.aborted = Some("supervisor is shutting down".to_string());
		}
	}

	/// Another start already owns the run; follow it to the end.
	async fn wait_task(&self, name: &str) -> Result<String, EntityError> {
		let mut poll = tokio::time::interval(self.settings.dependency_poll());
		loop {
			poll.tick().await;
			let Some(state) = self.task_state(name).await else {
				return Err(ResolveError::UnknownEntity(name.to_string()).into());
			};
			match state.status {
				TaskStatus::Completed => return Ok(format!("{}: completed", name)),
				TaskStatus::Failed => {
					return Err(EntityError::TaskFailed {
						name: name.to_string(),
						reason: state.last_error.unwrap_or_default(),
					})
				}
				_ => {}
			}
			let registry = self.registry.read().await;
			let entry = &registry.tasks[name];
			if !entry.claimed {
				if let Some(reason) = &entry.aborted {
					return Err(EntityError::TaskFailed { name: name.to_string(), reason: reason.clone() });
				}
			}
		}
	}

	async fn start_service(self: &Arc<Self>, name: &str) -> Result<String, EntityError> {
		let generation = {
			let mut registry = self.registry.write().await;
			let entry = registry
				.services
				.get_mut(name)
				.ok_or_else(|| ResolveError::UnknownEntity(name.to_string()))?;
			if entry.state.is_running() || entry.state.status == ServiceStatus::Starting {
				return Ok(format!("{}: already running", name));
			}
			entry.generation += 1;
			entry.stop_requested = false;
			entry.aborted = None;
			entry.restart_baseline = entry.state.restarts;
			entry.state.apply(ServiceEvent::Starting);
			entry.generation
		};

		if let Err(e) = self.await_dependencies(name).await {
			let mut registry = self.registry.write().await;
			if let Some(entry) = registry.services.get_mut(name) {
				if entry.generation == generation {
					entry.aborted = Some(e.to_string());
					entry.state.apply(ServiceEvent::Aborted { error: e.to_string() });
				}
			}
			return Err(e);
		}

		{
			let registry = self.registry.read().await;
			if registry.services[name].generation != generation {
				return Ok(format!("{}: start cancelled", name));
			}
		}

		self.spawn_service(name, generation).await
	}

	async fn spawn_service(self: &Arc<Self>, name: &str, generation: u64) -> Result<String, EntityError> {
		let spec = &self.services[name];
		let cwd = config::resolve_cwd(&self.root, spec.cwd.as_deref());
		let sink = LogSink::open(&self.log_dir, name);
		sink.note(&format!("starting: {}", spec.command)).await;

		let handle = match runner::spawn(&spec.command, &cwd, &spec.env, sink.clone()) {
			Ok(h) => h,
			Err(e) => {
				let reason = e.to_string();
				sink.note(&format!("failed to spawn: {}", reason)).await;
				tracing::warn!(service = name, "spawn failed: {}", reason);
				let decision = {
					let mut registry = self.registry.write().await;
					let entry = registry.services.get_mut(name);
					match entry {
						Some(entry) if entry.generation == generation => {
							Some(self.settle_exit(spec, entry, false, reason.clone()))
						}
						_ => None,
					}
				};
				if let Some(ExitDecision::Restart { delay }) = decision {
					self.schedule_restart(name, generation, delay);
				}
				return Err(EntityError::Spawn { name: name.to_string(), reason });
			}
		};

		let pid = handle.pid;
		let registered = {
			let mut registry = self.registry.write().await;
			match registry.services.get_mut(name) {
				Some(entry) if entry.generation == generation && !self.is_shutting_down() => {
					entry.exit = Some(handle.watcher());
					entry.state.apply(ServiceEvent::Spawned {
						pid,
						at: Utc::now(),
						healthy: spec.health_check == HealthCheck::None,
					});
					self.pids.insert(name, pid);
					true
				}
				_ => false,
			}
		};
		if !registered {
			// a stop raced the spawn
			runner::force_kill(pid);
			return Ok(format!("{}: start cancelled", name));
		}
		tracing::info!(service = name, pid, "service started");

		let sup = Arc::clone(self);
		let service = name.to_string();
		tokio::spawn(async move {
			let info = handle.wait().await;
			sink.note(&info.describe()).await;
			sup.on_service_exit(&service, pid, generation, info.success(), info.describe())
				.await;
		});

		Ok(format!("{}: started (pid {})", name, pid))
	}

	async fn on_service_exit(self: &Arc<Self>, name: &str, pid: u32, generation: u64, success: bool, reason: String) {
		let spec = &self.services[name];
		let decision = {
			let mut registry = self.registry.write().await;
			let Some(entry) = registry.services.get_mut(name) else {
				return;
			};
			if entry.state.pid != Some(pid) {
				return;
			}
			entry.exit = None;
			self.pids.remove(name, pid);

			if entry.stop_requested || entry.generation != generation {
				entry.state.apply(ServiceEvent::Stopped);
				return;
			}
			self.settle_exit(spec, entry, success, reason.clone())
		};

		match decision {
			ExitDecision::Stop => tracing::info!(service = name, "service stopped: {}", reason),
			ExitDecision::Restart { delay } => {
				tracing::warn!(service = name, "service {}, restarting in {:?}", reason, delay);
				self.schedule_restart(name, generation, delay);
			}
			ExitDecision::Crash => {
				tracing::error!(service = name, "service {}, restart limit reached", reason)
			}
		}
	}

	/// Run the restart policy engine and apply its decision.
	fn settle_exit(&self, spec: &ServiceSpec, entry: &mut ServiceEntry, success: bool, reason: String) -> ExitDecision {
		let decision = restart::decide(
			ExitContext {
				policy: spec.restart_policy,
				success,
				shutting_down: self.is_shutting_down(),
				restarts_used: entry.state.restarts.saturating_sub(entry.restart_baseline),
				max_restarts: spec.max_restarts,
			},
			&self.backoff,
		);
		let failure = match decision {
			ExitDecision::Crash => Some(format!("{}; restart limit reached", reason)),
			_ => (!success).then_some(reason),
		};
		entry.state.apply(ServiceEvent::Exited { decision, failure });
		decision
	}

	fn schedule_restart(self: &Arc<Self>, name: &str, generation: u64, delay: Duration) {
		let sup = Arc::clone(self);
		let name = name.to_string();
		tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			if sup.is_shutting_down() {
				return;
			}
			{
				let mut registry = sup.registry.write().await;
				let Some(entry) = registry.services.get_mut(&name) else {
					return;
				};
				if entry.generation != generation || entry.stop_requested || entry.state.is_running() {
					return;
				}
				entry.state.apply(ServiceEvent::RestartFired);
			}
			if let Err(e) = sup.spawn_service(&name, generation).await {
				tracing::warn!("{}", e);
			}
		});
	}

	// --- Dependencies ---

	async fn await_dependencies(&self, name: &str) -> Result<(), EntityError> {
		for dep in self.graph.dependencies(name) {
			self.wait_ready(name, dep).await?;
		}
		Ok(())
	}

	/// Poll until `dependency` is ready (healthy service, completed task),
	/// has failed for good, or the timeout expires.
	async fn wait_ready(&self, entity: &str, dependency: &str) -> Result<(), EntityError> {
		let timeout = self.settings.dependency_timeout();
		let deadline = Instant::now() + timeout;

		loop {
			match self.readiness(dependency).await {
				Readiness::Ready => return Ok(()),
				Readiness::Failed(reason) => {
					return Err(EntityError::DependencyFailed {
						entity: entity.to_string(),
						dependency: dependency.to_string(),
						reason,
					})
				}
				Readiness::Waiting => {}
			}
			if self.is_shutting_down() {
				return Err(EntityError::ShuttingDown(entity.to_string()));
			}
			if Instant::now() >= deadline {
				return Err(EntityError::DependencyTimeout {
					entity: entity.to_string(),
					dependency: dependency.to_string(),
					timeout,
				});
			}
			tokio::time::sleep(self.settings.dependency_poll()).await;
		}
	}

	async fn readiness(&self, name: &str) -> Readiness {
		let registry = self.registry.read().await;
		if let Some(entry) = registry.tasks.get(name) {
			return match entry.state.status {
				TaskStatus::Completed => Readiness::Ready,
				TaskStatus::Failed => Readiness::Failed(entry.state.last_error.clone().unwrap_or_default()),
				_ => match (&entry.aborted, entry.claimed) {
					(Some(reason), false) => Readiness::Failed(reason.clone()),
					_ => Readiness::Waiting,
				},
			};
		}
		if let Some(entry) = registry.services.get(name) {
			return match entry.state.status {
				ServiceStatus::Healthy => Readiness::Ready,
				ServiceStatus::Crashed => Readiness::Failed(format!(
					"crashed ({})",
					entry.state.last_error.as_deref().unwrap_or("no exit information")
				)),
				_ => match &entry.aborted {
					Some(reason) => Readiness::Failed(reason.clone()),
					None => Readiness::Waiting,
				},
			};
		}
		Readiness::Failed("unknown".to_string())
	}

	// --- Stop / restart ---

	/// Stop `target`, or everything in reverse dependency order.
	pub async fn stop(self: &Arc<Self>, target: Option<&str>) -> Result<Vec<String>, EntityError> {
		match target {
			Some(name) => {
				if !self.graph.contains(name) {
					return Err(ResolveError::UnknownEntity(name.to_string()).into());
				}
				Ok(vec![self.stop_entity(name).await?])
			}
			None => {
				let mut messages = Vec::new();
				for name in self.order.iter().rev() {
					messages.push(self.stop_entity(name).await?);
				}
				Ok(messages)
			}
		}
	}

	pub async fn restart(self: &Arc<Self>, target: Option<&str>) -> Result<StartReport, EntityError> {
		let stopped = self.stop(target).await?;
		let mut report = self.start(target).await?;
		report.messages.splice(0..0, stopped);
		Ok(report)
	}

	/// Graceful stop: SIGTERM, wait for the grace period, then SIGKILL.
	pub async fn stop_entity(&self, name: &str) -> Result<String, EntityError> {
		match self.graph.kind(name) {
			Some(EntityKind::Service) => self.stop_service(name).await,
			Some(EntityKind::Task) => self.stop_task(name).await,
			None => Err(ResolveError::UnknownEntity(name.to_string()).into()),
		}
	}

	async fn stop_service(&self, name: &str) -> Result<String, EntityError> {
		let (pid, mut exit) = {
			let mut registry = self.registry.write().await;
			let entry = registry
				.services
				.get_mut(name)
				.ok_or_else(|| ResolveError::UnknownEntity(name.to_string()))?;
			entry.generation += 1;
			entry.stop_requested = true;
			entry.aborted = None;

			match (entry.state.pid, entry.exit.clone()) {
				(Some(pid), Some(exit)) => (pid, exit),
				_ => {
					if entry.state.status != ServiceStatus::Pending {
						entry.state.apply(ServiceEvent::Stopped);
					}
					return Ok(format!("{}: not running", name));
				}
			}
		};

		tracing::info!(service = name, pid, "stopping");
		let info = runner::stop_gracefully(pid, &mut exit, self.settings.stop_grace()).await;

		let mut registry = self.registry.write().await;
		if let Some(entry) = registry.services.get_mut(name) {
			if entry.state.pid == Some(pid) {
				entry.exit = None;
				entry.state.apply(ServiceEvent::Stopped);
			}
		}
		self.pids.remove(name, pid);
		Ok(format!("{}: stopped ({})", name, info.describe()))
	}

	async fn stop_task(&self, name: &str) -> Result<String, EntityError> {
		let running = {
			let registry = self.registry.read().await;
			let entry = registry
				.tasks
				.get(name)
				.ok_or_else(|| ResolveError::UnknownEntity(name.to_string()))?;
			entry.state.pid.zip(entry.exit.clone())
		};

		let Some((pid, mut exit)) = running else {
			return Ok(format!("{}: not running", name));
		};

		tracing::info!(task = name, pid, "stopping");
		let info = runner::stop_gracefully(pid, &mut exit, self.settings.stop_grace()).await;
		// run_task records the outcome; make sure it has before reporting
		let mut poll = tokio::time::interval(Duration::from_millis(20));
		for _ in 0..50 {
			poll.tick().await;
			if self.task_state(name).await.is_some_and(|s| s.pid != Some(pid)) {
				break;
			}
		}
		Ok(format!("{}: stopped ({})", name, info.describe()))
	}

	// --- Health ---

	/// Probe every service with a live process once, concurrently.
	pub async fn check_health(&self) {
		let targets: Vec<(String, u32, HealthCheck)> = {
			let registry = self.registry.read().await;
			registry
				.services
				.iter()
				.filter_map(|(name, entry)| {
					let pid = entry.state.pid?;
					Some((name.clone(), pid, self.services[name].health_check.clone()))
				})
				.collect()
		};
		if targets.is_empty() {
			return;
		}

		let mut probes = JoinSet::new();
		for (name, pid, check) in targets {
			let probe = self.probe.clone();
			probes.spawn(async move {
				let healthy = probe.check(&check).await;
				(name, pid, healthy)
			});
		}

		let mut results = Vec::new();
		while let Some(joined) = probes.join_next().await {
			if let Ok(result) = joined {
				results.push(result);
			}
		}

		let mut registry = self.registry.write().await;
		for (name, pid, healthy) in results {
			let Some(entry) = registry.services.get_mut(&name) else {
				continue;
			};
			if entry.state.pid != Some(pid) {
				continue;
			}
			let before = entry.state.status;
			entry.state.apply(ServiceEvent::Probe { healthy });
			if entry.state.status != before {
				tracing::info!(service = %name, "{:?} -> {:?}", before, entry.state.status);
			}
		}
	}

	/// Run [`check_health`](Self::check_health) on the configured interval
	/// until shutdown begins.
	pub fn spawn_health_monitor(self: &Arc<Self>) -> JoinHandle<()> {
		let sup = Arc::clone(self);
		let mut stopping = self.stopping();
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(sup.settings.health_interval());
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				tokio::select! {
					_ = ticker.tick() => sup.check_health().await,
					_ = until_stopping(&mut stopping) => break,
				}
			}
			tracing::debug!("health monitor stopped");
		})
	}
}

/// Resolves once shutdown has begun. Holds no watch guard on return, so it
/// can sit in a `select!` inside a spawned task.
pub(crate) async fn until_stopping(stopping: &mut watch::Receiver<bool>) {
	let _ = stopping.wait_for(|s| *s).await;
}
