use std::collections::BTreeMap;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;

use crate::output::{LogSink, Stream};

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
	pub code: Option<i32>,
	pub signal: Option<i32>,
}

impl ExitInfo {
	pub fn success(&self) -> bool {
		self.code == Some(0)
	}

	pub fn describe(&self) -> String {
		match (self.code, self.signal) {
			(Some(code), _) => format!("exited with code {}", code),
			(None, Some(signal)) => format!("killed by signal {}", signal),
			(None, None) => "exited with unknown status".to_string(),
		}
	}
}

pub type ExitWatch = watch::Receiver<Option<ExitInfo>>;

/// A spawned process. The `Child` itself lives in a background waiter task;
/// this handle only carries the pid and a view of the exit.
#[derive(Debug)]
pub struct ProcessHandle {
	pub pid: u32,
	exit: ExitWatch,
}

impl ProcessHandle {
	/// Another receiver for the same exit, e.g. for a stop path.
	pub fn watcher(&self) -> ExitWatch {
		self.exit.clone()
	}

	pub async fn wait(mut self) -> ExitInfo {
		wait_exit(&mut self.exit).await
	}
}

pub async fn wait_exit(exit: &mut ExitWatch) -> ExitInfo {
	match exit.wait_for(Option::is_some).await {
		Ok(info) => (*info).unwrap_or(ExitInfo { code: None, signal: None }),
		// waiter task vanished without reporting
		Err(_) => ExitInfo { code: None, signal: None },
	}
}

#[derive(Debug)]
pub enum SpawnError {
	MissingCwd(String),
	Io(std::io::Error),
}

impl std::fmt::Display for SpawnError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			SpawnError::MissingCwd(dir) => write!(f, "working directory {} does not exist", dir),
			SpawnError::Io(e) => write!(f, "{}", e),
		}
	}
}

/// Launch `sh -c command` in its own process group, piping output into
/// `sink`. Returns once the pid is known.
pub fn spawn(
	command: &str,
	cwd: &Path,
	env: &BTreeMap<String, String>,
	sink: LogSink,
) -> Result<ProcessHandle, SpawnError> {
	if !cwd.is_dir() {
		return Err(SpawnError::MissingCwd(cwd.display().to_string()));
	}

	let mut cmd = Command::new("sh");
	cmd.args(["-c", command])
		.current_dir(cwd)
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		// own process group so the whole tree can be signalled
		.process_group(0);

	for (key, val) in env {
		cmd.env(key, val);
	}

	let mut child = cmd.spawn().map_err(SpawnError::Io)?;
	let pid = child.id().unwrap_or(0);

	let stdout = child.stdout.take().map(|out| {
		let sink = sink.clone();
		tokio::spawn(async move { pipe_lines(out, Stream::Stdout, sink).await })
	});
	let stderr = child.stderr.take().map(|err| {
		let sink = sink.clone();
		tokio::spawn(async move { pipe_lines(err, Stream::Stderr, sink).await })
	});

	let (tx, rx) = watch::channel(None);
	tokio::spawn(async move {
		let info = match child.wait().await {
			Ok(status) => ExitInfo {
				code: status.code(),
				signal: status.signal(),
			},
			Err(e) => {
				tracing::warn!(pid, "wait failed: {}", e);
				ExitInfo { code: None, signal: None }
			}
		};

		// drain output before reporting; a grandchild holding the pipe
		// open must not stall the exit forever
		for reader in [stdout, stderr].into_iter().flatten() {
			let _ = tokio::time::timeout(Duration::from_secs(1), reader).await;
		}

		let _ = tx.send(Some(info));
	});

	Ok(ProcessHandle { pid, exit: rx })
}

async fn pipe_lines<R: AsyncRead + Unpin>(reader: R, stream: Stream, sink: LogSink) {
	let mut reader = BufReader::new(reader);
	let mut buf = Vec::with_capacity(256);
	loop {
		buf.clear();
		match reader.read_until(b'\n', &mut buf).await {
			Ok(0) => break,
			Ok(_) => {
				let line = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
				let line = line.strip_suffix(b"\r").unwrap_or(line);
				sink.line(stream, &String::from_utf8_lossy(line)).await;
			}
			Err(e) => {
				tracing::debug!("output read error: {}", e);
				break;
			}
		}
	}
}

pub fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
	use nix::sys::signal::killpg;
	use nix::unistd::Pid;
	if pid == 0 {
		return;
	}
	if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
		tracing::debug!(pid, "killpg {:?} failed: {}", signal, e);
	}
}

/// SIGTERM the process group, give it `grace` to exit, then SIGKILL.
pub async fn stop_gracefully(pid: u32, exit: &mut ExitWatch, grace: Duration) -> ExitInfo {
	use nix::sys::signal::Signal;

	signal_group(pid, Signal::SIGTERM);
	if let Ok(info) = tokio::time::timeout(grace, wait_exit(exit)).await {
		return info;
	}

	tracing::warn!(pid, "still alive after {:?}, sending SIGKILL", grace);
	signal_group(pid, Signal::SIGKILL);
	wait_exit(exit).await
}

/// Immediate SIGKILL of a process group, usable from a panic hook.
pub fn force_kill(pid: u32) {
	signal_group(pid, nix::sys::signal::Signal::SIGKILL);
}
