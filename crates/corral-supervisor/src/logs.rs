use chrono::{SecondsFormat, Utc};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

pub const DEFAULT_TAIL_LINES: usize = 50;

pub fn log_path(log_dir: &Path, name: &str) -> PathBuf {
	log_dir.join(format!("{}.log", name))
}

/// ISO-8601 UTC timestamp with millisecond precision.
pub fn timestamp() -> String {
	Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Last `lines` lines of a log file. Missing files are an error.
pub fn tail(path: &Path, lines: usize) -> std::io::Result<Vec<String>> {
	let file = std::fs::File::open(path)?;
	let mut window = VecDeque::with_capacity(lines.min(4096));

	for line in BufReader::new(file).lines() {
		let line = match line {
			Ok(l) => l,
			// a writer may be mid-line; keep what we have
			Err(e) if e.kind() == std::io::ErrorKind::InvalidData => continue,
			Err(e) => return Err(e),
		};
		if lines == 0 {
			continue;
		}
		if window.len() == lines {
			window.pop_front();
		}
		window.push_back(line);
	}

	Ok(window.into())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn log_path_per_entity() {
		assert_eq!(log_path(Path::new("/p/.corral/logs"), "web"), PathBuf::from("/p/.corral/logs/web.log"));
	}

	#[test]
	fn timestamp_is_rfc3339() {
		let ts = timestamp();
		assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok(), "{ts}");
		assert!(ts.ends_with('Z'));
	}

	#[test]
	fn tail_returns_last_lines() {
		let dir = std::env::temp_dir().join(format!("corral-tail-{}", std::process::id()));
		std::fs::create_dir_all(&dir).unwrap();
		let path = dir.join("x.log");
		let body: String = (1..=10).map(|i| format!("line {}\n", i)).collect();
		std::fs::write(&path, body).unwrap();

		assert_eq!(tail(&path, 3).unwrap(), vec!["line 8", "line 9", "line 10"]);
		assert_eq!(tail(&path, 50).unwrap().len(), 10);
		assert!(tail(&path, 0).unwrap().is_empty());
		assert!(tail(&dir.join("missing.log"), 5).is_err());

		let _ = std::fs::remove_dir_all(&dir);
	}
}
