use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use corral_ipc::{DaemonPaths, Endpoint, EndpointState};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ProjectConfig;
use crate::control;
use crate::error::StartupError;
use crate::health;
use crate::snapshot;
use crate::supervisor::{until_stopping, PidTable, Supervisor, SupervisorConfig};
use crate::types::DaemonInfo;

pub struct DaemonOptions {
	pub root: PathBuf,
	pub paths: DaemonPaths,
	/// Restrict the initial startup (and bare `start`s) to this entity and
	/// its dependencies.
	pub branch: Option<String>,
	/// Turn SIGTERM/SIGINT into a shutdown request.
	pub handle_signals: bool,
	/// Install [`install_fault_hook`] before any entity starts. Process-wide,
	/// so only the daemon binary wants it.
	pub fault_hook: bool,
}

impl DaemonOptions {
	pub fn new(root: impl Into<PathBuf>, branch: Option<String>) -> Self {
		let root = root.into();
		Self {
			paths: DaemonPaths::for_project(&root),
			root,
			branch,
			handle_signals: true,
			fault_hook: true,
		}
	}
}

/// A running daemon: supervisor, control endpoint and background timers.
pub struct Daemon {
	supervisor: Arc<Supervisor>,
	endpoint: Endpoint,
	running: Mutex<Option<Running>>,
}

struct Running {
	timers: Vec<JoinHandle<()>>,
	server: JoinHandle<()>,
	server_stop: watch::Sender<bool>,
}

impl Daemon {
	/// Bring the daemon up. Everything that can fail does so before the
	/// endpoint is bound; entity startup then runs in the background.
	pub async fn launch(project: ProjectConfig, options: DaemonOptions) -> Result<Self, StartupError> {
		let paths = options.paths;
		let supervisor = Supervisor::new(
			project,
			SupervisorConfig {
				root: options.root,
				log_dir: paths.log_dir(),
				branch: options.branch,
			},
		)?;

		let endpoint = Endpoint::new(paths.clone());
		if endpoint.probe() == EndpointState::Live {
			return Err(StartupError::AlreadyRunning(paths.socket_path()));
		}
		check_ports(&supervisor).await?;

		let listener = endpoint.claim()?;
		endpoint.write_pid()?;
		supervisor.set_daemon_info(DaemonInfo {
			pid: std::process::id(),
			started_at: Utc::now(),
			endpoint: paths.socket_path(),
		});

		if options.fault_hook {
			install_fault_hook(supervisor.pid_table(), paths.clone());
		}

		let mut timers = vec![
			supervisor.spawn_health_monitor(),
			spawn_snapshot_writer(&supervisor, paths.snapshot_path()),
		];
		if options.handle_signals {
			timers.push(spawn_signal_listener(&supervisor)?);
		}

		let (server_stop, server_rx) = watch::channel(false);
		let sup = Arc::clone(&supervisor);
		let server = tokio::spawn(corral_ipc::server::run_socket_server(
			listener,
			move |command| {
				let sup = Arc::clone(&sup);
				async move { control::dispatch(&sup, command).await }
			},
			control::malformed,
			server_rx,
		));

		tracing::info!(pid = std::process::id(), "daemon started");

		let sup = Arc::clone(&supervisor);
		tokio::spawn(async move {
			match sup.start(None).await {
				Ok(report) => {
					for msg in &report.messages {
						tracing::info!("{}", msg);
					}
					if !report.errors.is_empty() {
						tracing::warn!("{} entities failed to start", report.errors.len());
					}
				}
				Err(e) => tracing::error!("startup failed: {}", e),
			}
		});

		Ok(Self {
			supervisor,
			endpoint,
			running: Mutex::new(Some(Running { timers, server, server_stop })),
		})
	}

	pub fn supervisor(&self) -> &Arc<Supervisor> {
		&self.supervisor
	}

	pub fn paths(&self) -> &DaemonPaths {
		&self.endpoint.paths
	}

	/// Block until a client sends `down` or a signal arrives, then shut down.
	pub async fn wait(&self) {
		let mut requested = self.supervisor.shutdown_requested();
		let _ = requested.wait_for(|r| *r).await;
		self.shutdown().await;
	}

	/// Stop timers, stop every entity in reverse order, release the endpoint
	/// and write the final snapshot. Only the first call does anything.
	pub async fn shutdown(&self) {
		let running = match self.running.lock() {
			Ok(mut guard) => guard.take(),
			Err(poisoned) => poisoned.into_inner().take(),
		};
		let Some(running) = running else {
			return;
		};

		tracing::info!("shutting down");
		for timer in &running.timers {
			timer.abort();
		}
		self.supervisor.shutdown().await;

		running.server_stop.send_replace(true);
		running.server.abort();
		let _ = running.server.await;
		self.endpoint.cleanup();

		let mut last = self.supervisor.snapshot().await;
		last.daemon = None;
		if let Err(e) = snapshot::persist(&self.endpoint.paths.snapshot_path(), &last) {
			tracing::warn!("failed to write final snapshot: {}", e);
		}
		tracing::info!("daemon stopped");
	}
}

/// Refuse to start when a `port` health-check target is already bound by
/// someone else.
async fn check_ports(supervisor: &Supervisor) -> Result<(), StartupError> {
	for (service, host, port) in supervisor.port_targets() {
		if health::port_open(&host, port).await {
			return Err(StartupError::PortInUse { service, port });
		}
	}
	Ok(())
}

fn spawn_snapshot_writer(supervisor: &Arc<Supervisor>, path: PathBuf) -> JoinHandle<()> {
	let sup = Arc::clone(supervisor);
	let mut stopping = supervisor.stopping();
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(sup.settings().snapshot_interval());
		loop {
			tokio::select! {
				_ = ticker.tick() => {
					let current = sup.snapshot().await;
					if let Err(e) = snapshot::persist(&path, &current) {
						tracing::warn!("failed to write snapshot: {}", e);
					}
				}
				_ = until_stopping(&mut stopping) => break,
			}
		}
	})
}

fn spawn_signal_listener(supervisor: &Arc<Supervisor>) -> std::io::Result<JoinHandle<()>> {
	let mut term = signal(SignalKind::terminate())?;
	let mut int = signal(SignalKind::interrupt())?;
	let sup = Arc::clone(supervisor);
	Ok(tokio::spawn(async move {
		tokio::select! {
			_ = term.recv() => tracing::info!("received SIGTERM"),
			_ = int.recv() => tracing::info!("received SIGINT"),
		}
		sup.request_shutdown();
	}))
}

/// Panic hook for the daemon binary: SIGKILL every tracked process group,
/// drop the socket, then exit.
pub fn install_fault_hook(pids: PidTable, paths: DaemonPaths) {
	let previous = std::panic::take_hook();
	std::panic::set_hook(Box::new(move |info| {
		pids.kill_all();
		let _ = std::fs::remove_file(paths.socket_path());
		let _ = std::fs::remove_file(paths.pid_path());
		previous(info);
		std::process::exit(101);
	}));
}
