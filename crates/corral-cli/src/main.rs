mod render;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use corral_ipc::{endpoint, ClientError, DaemonClient, DaemonPaths, Endpoint};
use corral_supervisor::daemon::{Daemon, DaemonOptions};
use corral_supervisor::{runner, snapshot};
use corral_supervisor::{Command, ProjectConfig, Response, Snapshot, DEFAULT_CONFIG_FILE};
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "corral", version, about = "Run a project's dev services and setup tasks")]
struct Cli {
	/// Path to corral.toml (default: ./corral.toml)
	#[arg(long, global = true)]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
	/// Start the daemon and everything it manages
	Up {
		/// Only start this entity and its dependencies
		name: Option<String>,
		/// Stay attached instead of detaching the daemon
		#[arg(long, short)]
		foreground: bool,
	},
	/// Stop everything and shut the daemon down
	Down,
	/// Show tasks and services
	#[command(alias = "st")]
	Status {
		#[arg(long)]
		json: bool,
	},
	/// Start an entity (and its dependencies), or everything
	Start { name: Option<String> },
	/// Stop an entity, or everything in reverse dependency order
	Stop { name: Option<String> },
	/// Stop then start
	Restart { name: Option<String> },
	/// Print the last lines of an entity's log
	Logs {
		name: String,
		#[arg(short = 'n', long, default_value_t = 50)]
		lines: usize,
	},
	/// Shut the daemon down, or kill whatever the last snapshot recorded
	Kill,
	/// Run the daemon in this process
	#[command(hide = true)]
	Daemon {
		#[arg(long)]
		only: Option<String>,
	},
}

/// Where the config lives and where its state goes.
struct Project {
	root: PathBuf,
	config_path: PathBuf,
	paths: DaemonPaths,
}

impl Project {
	fn locate(config: Option<PathBuf>) -> Self {
		let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
		let config_path = match config {
			Some(p) if p.is_absolute() => p,
			Some(p) => cwd.join(p),
			None => cwd.join(DEFAULT_CONFIG_FILE),
		};
		let root = config_path
			.parent()
			.filter(|p| !p.as_os_str().is_empty())
			.map(Path::to_path_buf)
			.unwrap_or(cwd);
		let paths = DaemonPaths::for_project(&root);
		Self { root, config_path, paths }
	}

	fn load(&self) -> ProjectConfig {
		match ProjectConfig::load(&self.config_path) {
			Ok(c) => c,
			Err(e) => fail(&e.to_string()),
		}
	}
}

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	let project = Project::locate(cli.config);

	let runs_daemon = matches!(cli.command, Cmd::Daemon { .. } | Cmd::Up { foreground: true, .. });
	init_tracing(if runs_daemon { "info" } else { "warn" });

	match cli.command {
		Cmd::Up { name, foreground } => cmd_up(&project, name, foreground).await,
		Cmd::Daemon { only } => run_daemon(&project, only).await,
		Cmd::Down => cmd_down(&project),
		Cmd::Status { json } => cmd_status(&project, json),
		Cmd::Start { name } => print_messages(request(&project, &Command::Start { service: name })),
		Cmd::Stop { name } => print_messages(request(&project, &Command::Stop { service: name })),
		Cmd::Restart { name } => print_messages(request(&project, &Command::Restart { service: name })),
		Cmd::Logs { name, lines } => cmd_logs(&project, name, lines),
		Cmd::Kill => cmd_kill(&project),
	}
}

fn init_tracing(default: &str) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.init();
}

fn fail(message: &str) -> ! {
	eprintln!("{} {}", "error:".red(), message);
	std::process::exit(1);
}

// --- Daemon ---

async fn run_daemon(project: &Project, only: Option<String>) {
	let config = project.load();
	let daemon = match Daemon::launch(config, DaemonOptions::new(&project.root, only)).await {
		Ok(d) => d,
		Err(e) => fail(&e.to_string()),
	};
	daemon.wait().await;
}

async fn cmd_up(project: &Project, name: Option<String>, foreground: bool) {
	if foreground {
		return run_daemon(project, name).await;
	}

	let ep = Endpoint::new(project.paths.clone());
	if corral_ipc::client::is_running(&project.paths) {
		// already up; just make sure the requested branch is started
		print_messages(request(project, &Command::Start { service: name }));
		return;
	}

	// validate before detaching so config errors show up here
	project.load();

	let mut args = vec![
		"--config".to_string(),
		project.config_path.display().to_string(),
		"daemon".to_string(),
	];
	if let Some(name) = name {
		args.push("--only".to_string());
		args.push(name);
	}

	eprintln!("starting daemon...");
	if let Err(e) = ep.launch_background(&endpoint::current_binary(), &args) {
		eprintln!("see {}", project.paths.daemon_log_path().display());
		fail(&e.to_string());
	}
	println!("{} daemon running ({})", "●".green(), project.paths.socket_path().display());
}

// --- Client commands ---

fn connect(project: &Project) -> Result<DaemonClient<Command, Response>, ClientError> {
	let client = DaemonClient::connect(&project.paths)?;
	client.set_timeout(Some(Duration::from_secs(120)))?;
	Ok(client)
}

fn request(project: &Project, command: &Command) -> Response {
	let result = connect(project).and_then(|mut client| client.send(command));
	match result {
		Ok(resp) => resp,
		Err(ClientError::NotRunning) => fail("daemon not running (try `corral up`)"),
		Err(e) => fail(&e.to_string()),
	}
}

fn print_messages(resp: Response) {
	if !resp.ok {
		fail(resp.error.as_deref().unwrap_or("request failed"));
	}
	for msg in resp.strings("messages") {
		println!("{}", msg);
	}
}

fn cmd_down(project: &Project) {
	print_messages(request(project, &Command::Down));

	let socket = project.paths.socket_path();
	for _ in 0..600 {
		if !socket.exists() {
			println!("{} stopped", "○".dimmed());
			return;
		}
		std::thread::sleep(Duration::from_millis(100));
	}
	fail("daemon did not stop in time");
}

fn cmd_status(project: &Project, json: bool) {
	let current = match connect(project).and_then(|mut c| c.send(&Command::Status)) {
		Ok(resp) if resp.ok => match resp.data.map(serde_json::from_value::<Snapshot>) {
			Some(Ok(s)) => s,
			Some(Err(e)) => fail(&format!("bad status response: {}", e)),
			None => fail("empty status response"),
		},
		Ok(resp) => fail(resp.error.as_deref().unwrap_or("status failed")),
		Err(_) => match snapshot::read(&project.paths.snapshot_path()) {
			Some(s) => {
				if !json {
					eprintln!(
						"{} daemon not running; last snapshot from {}",
						"○".dimmed(),
						s.updated_at.format("%Y-%m-%d %H:%M:%S")
					);
				}
				s
			}
			None => fail("daemon not running and no snapshot found"),
		},
	};

	if json {
		match serde_json::to_string_pretty(&current) {
			Ok(out) => println!("{}", out),
			Err(e) => fail(&e.to_string()),
		}
	} else {
		render::print_snapshot(&current);
	}
}

fn cmd_logs(project: &Project, name: String, lines: usize) {
	let resp = request(project, &Command::Logs { service: name, lines: Some(lines) });
	if !resp.ok {
		fail(resp.error.as_deref().unwrap_or("logs failed"));
	}
	for line in resp.strings("lines") {
		println!("{}", line);
	}
}

fn cmd_kill(project: &Project) {
	if corral_ipc::client::is_running(&project.paths) {
		return cmd_down(project);
	}

	let ep = Endpoint::new(project.paths.clone());
	match snapshot::read(&project.paths.snapshot_path()) {
		Some(last) => {
			let pids = last.live_pids();
			for (name, pid) in &pids {
				runner::force_kill(*pid);
				println!("{} killed {} (pid {})", "●".red(), name, pid);
			}
			if pids.is_empty() {
				println!("nothing to kill");
			}
		}
		None => println!("no snapshot found"),
	}
	ep.cleanup();
}
