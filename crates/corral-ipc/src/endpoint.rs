use std::fs::OpenOptions;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use tokio::net::UnixListener;

use crate::paths::DaemonPaths;

/// What a probe of the control socket found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
	/// No socket file.
	Absent,
	/// A socket file that accepts connections: a live daemon owns it.
	Live,
	/// A socket file nobody answers on, left behind by a dead daemon.
	Stale,
}

#[derive(Debug)]
pub enum EndpointError {
	/// Another daemon already serves this state directory.
	AlreadyRunning(PathBuf),
	/// Creating the state dir, removing a stale socket or binding failed.
	Io(std::io::Error),
	/// The background daemon never started answering.
	LaunchTimeout,
}

impl std::fmt::Display for EndpointError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			EndpointError::AlreadyRunning(path) => {
				write!(f, "daemon already running (socket {})", path.display())
			}
			EndpointError::Io(e) => write!(f, "io error: {}", e),
			EndpointError::LaunchTimeout => write!(f, "daemon did not come up in time"),
		}
	}
}

impl std::error::Error for EndpointError {}

impl From<std::io::Error> for EndpointError {
	fn from(e: std::io::Error) -> Self {
		EndpointError::Io(e)
	}
}

/// Ownership of the control endpoint artifacts of one state directory.
#[derive(Debug, Clone)]
pub struct Endpoint {
	pub paths: DaemonPaths,
}

impl Endpoint {
	pub fn new(paths: DaemonPaths) -> Self {
		Self { paths }
	}

	pub fn probe(&self) -> EndpointState {
		let socket_path = self.paths.socket_path();
		if !socket_path.exists() {
			return EndpointState::Absent;
		}
		match UnixStream::connect(&socket_path) {
			Ok(_) => EndpointState::Live,
			Err(_) => EndpointState::Stale,
		}
	}

	/// Bind the control socket. A live predecessor is an error; a stale
	/// socket file is removed first. Must be called inside a tokio runtime.
	pub fn claim(&self) -> Result<UnixListener, EndpointError> {
		self.paths.ensure_state_dir()?;

		let socket_path = self.paths.socket_path();
		match self.probe() {
			EndpointState::Live => return Err(EndpointError::AlreadyRunning(socket_path)),
			EndpointState::Stale => {
				tracing::warn!("removing stale socket {}", socket_path.display());
				std::fs::remove_file(&socket_path)?;
			}
			EndpointState::Absent => {}
		}

		Ok(UnixListener::bind(&socket_path)?)
	}

	pub fn write_pid(&self) -> std::io::Result<()> {
		std::fs::write(self.paths.pid_path(), std::process::id().to_string())
	}

	pub fn cleanup(&self) {
		let _ = std::fs::remove_file(self.paths.socket_path());
		let _ = std::fs::remove_file(self.paths.pid_path());
	}

	/// Start `binary args...` detached, with stderr appended to the daemon
	/// log, then wait until the socket answers.
	pub fn launch_background(&self, binary: &std::path::Path, args: &[String]) -> Result<(), EndpointError> {
		if self.probe() == EndpointState::Live {
			return Err(EndpointError::AlreadyRunning(self.paths.socket_path()));
		}
		self.paths.ensure_state_dir()?;

		let log = OpenOptions::new()
			.create(true)
			.append(true)
			.open(self.paths.daemon_log_path())?;

		let mut cmd = Command::new(binary);
		cmd.args(args)
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::from(log));

		#[cfg(unix)]
		{
			use std::os::unix::process::CommandExt;
			cmd.process_group(0);
		}

		cmd.spawn()?;

		for _ in 0..100 {
			std::thread::sleep(Duration::from_millis(100));
			if self.probe() == EndpointState::Live {
				return Ok(());
			}
		}

		Err(EndpointError::LaunchTimeout)
	}
}

pub fn current_binary() -> PathBuf {
	std::env::current_exe().unwrap_or_else(|_| PathBuf::from("corral"))
}
