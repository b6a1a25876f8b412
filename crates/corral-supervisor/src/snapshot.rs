use std::path::Path;
use std::time::Duration;

use crate::types::Snapshot;

const READ_ATTEMPTS: u32 = 5;
const READ_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Write `snapshot` as pretty JSON via a temp file renamed into place, so a
/// reader never sees a half-written file.
pub fn persist(path: &Path, snapshot: &Snapshot) -> std::io::Result<()> {
	if let Some(dir) = path.parent() {
		std::fs::create_dir_all(dir)?;
	}
	let json = serde_json::to_vec_pretty(snapshot).map_err(std::io::Error::other)?;
	let tmp = path.with_extension("json.tmp");
	std::fs::write(&tmp, json)?;
	std::fs::rename(&tmp, path)
}

/// Read the last persisted snapshot. Retries briefly on parse or read
/// failures; `None` once it gives up or if no snapshot exists.
pub fn read(path: &Path) -> Option<Snapshot> {
	for attempt in 1..=READ_ATTEMPTS {
		match std::fs::read(path) {
			Ok(bytes) => match serde_json::from_slice(&bytes) {
				Ok(snapshot) => return Some(snapshot),
				Err(e) => tracing::debug!(attempt, "snapshot parse failed: {}", e),
			},
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
			Err(e) => tracing::debug!(attempt, "snapshot read failed: {}", e),
		}
		std::thread::sleep(READ_RETRY_DELAY);
	}
	None
}
