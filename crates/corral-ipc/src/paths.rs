use std::path::{Path, PathBuf};

pub const STATE_DIR_NAME: &str = ".corral";

/// Locations of every artifact a daemon owns, all under one project-local
/// state directory.
#[derive(Debug, Clone)]
pub struct DaemonPaths {
	state_dir: PathBuf,
}

impl DaemonPaths {
	/// Paths for the project rooted at `root` (`<root>/.corral`).
	pub fn for_project(root: impl AsRef<Path>) -> Self {
		Self::new(root.as_ref().join(STATE_DIR_NAME))
	}

	/// Paths rooted directly at `state_dir`.
	pub fn new(state_dir: impl Into<PathBuf>) -> Self {
		Self {
			state_dir: state_dir.into(),
		}
	}

	pub fn state_dir(&self) -> &Path {
		&self.state_dir
	}

	pub fn socket_path(&self) -> PathBuf {
		self.state_dir.join("daemon.sock")
	}

	pub fn pid_path(&self) -> PathBuf {
		self.state_dir.join("daemon.pid")
	}

	pub fn snapshot_path(&self) -> PathBuf {
		self.state_dir.join("state.json")
	}

	pub fn log_dir(&self) -> PathBuf {
		self.state_dir.join("logs")
	}

	/// Where the daemon's own stderr goes when launched in the background.
	pub fn daemon_log_path(&self) -> PathBuf {
		self.state_dir.join("daemon.log")
	}

	pub fn ensure_state_dir(&self) -> std::io::Result<()> {
		std::fs::create_dir_all(&self.state_dir)
	}
}
