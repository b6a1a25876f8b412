use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::logs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
	Stdout,
	Stderr,
}

/// Append-only, timestamped log file for one task or service.
///
/// Cloned into every reader task of a process; writes are serialized by the
/// inner mutex so lines from stdout and stderr never interleave mid-line.
#[derive(Clone)]
pub struct LogSink {
	writer: Arc<Mutex<LogWriter>>,
}

struct LogWriter {
	file: Option<File>,
	path: PathBuf,
}

impl LogSink {
	pub fn open(log_dir: &Path, name: &str) -> Self {
		if let Err(e) = fs::create_dir_all(log_dir) {
			tracing::warn!("failed to create log dir {}: {}", log_dir.display(), e);
		}

		let path = logs::log_path(log_dir, name);
		let file = match OpenOptions::new().create(true).append(true).open(&path) {
			Ok(f) => Some(f),
			Err(e) => {
				tracing::warn!("failed to open log {}: {}", path.display(), e);
				None
			}
		};

		Self {
			writer: Arc::new(Mutex::new(LogWriter { file, path })),
		}
	}

	/// One line of process output.
	pub async fn line(&self, stream: Stream, text: &str) {
		let tag = match stream {
			Stream::Stdout => "",
			Stream::Stderr => "[stderr] ",
		};
		let entry = format!("{} {}{}\n", logs::timestamp(), tag, text);
		self.writer.lock().await.write(entry.as_bytes());
	}

	/// A lifecycle note from the supervisor itself.
	pub async fn note(&self, message: &str) {
		let entry = format!("{} [corral] {}\n", logs::timestamp(), message);
		self.writer.lock().await.write(entry.as_bytes());
	}
}

impl LogWriter {
	fn write(&mut self, data: &[u8]) {
		if let Some(ref mut file) = self.file {
			if let Err(e) = file.write_all(data) {
				tracing::warn!("log write to {} failed: {}", self.path.display(), e);
			}
		}
	}
}
