use chrono::{DateTime, Utc};
use corral_supervisor::{ServiceState, ServiceStatus, Snapshot, TaskState, TaskStatus};
use owo_colors::OwoColorize;

pub fn print_snapshot(snapshot: &Snapshot) {
	let width = snapshot
		.services
		.keys()
		.chain(snapshot.tasks.keys())
		.map(|n| n.len())
		.max()
		.unwrap_or(0);

	if snapshot.services.is_empty() && snapshot.tasks.is_empty() {
		println!("{}", "nothing configured".dimmed());
		return;
	}

	for (name, state) in &snapshot.tasks {
		print_task_line(name, state, width);
	}
	for (name, state) in &snapshot.services {
		print_service_line(name, state, width);
	}
}

fn print_service_line(name: &str, state: &ServiceState, width: usize) {
	let (circle, label) = match state.status {
		ServiceStatus::Healthy => ("●".green().to_string(), "healthy".green().to_string()),
		ServiceStatus::Starting => ("●".cyan().to_string(), "starting".cyan().to_string()),
		ServiceStatus::Unhealthy => ("●".yellow().to_string(), "unhealthy".yellow().to_string()),
		ServiceStatus::Crashed => ("●".red().to_string(), "crashed".red().to_string()),
		ServiceStatus::Stopped => ("○".dimmed().to_string(), "stopped".dimmed().to_string()),
		ServiceStatus::Pending => ("○".dimmed().to_string(), "pending".dimmed().to_string()),
	};
	let pid = state.pid.map_or("-".to_string(), |p| p.to_string());
	let uptime = match (state.pid, state.started_at) {
		(Some(_), Some(at)) => format_uptime(at),
		_ => "-".to_string(),
	};
	let restarts = if state.restarts > 0 {
		format!("↻{}", state.restarts)
	} else {
		String::new()
	};
	println!(
		" {} {:<width$} {:<20} {:<8} {:<8} {}",
		circle,
		name,
		label,
		pid,
		uptime,
		restarts,
		width = width
	);
	if let Some(err) = &state.last_error {
		if state.status != ServiceStatus::Healthy {
			println!("   └ {}", err.dimmed());
		}
	}
}

fn print_task_line(name: &str, state: &TaskState, width: usize) {
	let (circle, label) = match state.status {
		TaskStatus::Completed => ("✓".green().to_string(), "completed".green().to_string()),
		TaskStatus::Running => ("●".cyan().to_string(), "running".cyan().to_string()),
		TaskStatus::Failed => ("✗".red().to_string(), "failed".red().to_string()),
		TaskStatus::Pending => ("○".dimmed().to_string(), "pending".dimmed().to_string()),
	};
	let pid = state.pid.map_or("-".to_string(), |p| p.to_string());
	let exit = state.exit_code.map_or(String::new(), |c| format!("exit {}", c));
	println!(" {} {:<width$} {:<20} {:<8} {}", circle, name, label, pid, exit, width = width);
	if state.status == TaskStatus::Failed {
		if let Some(err) = &state.last_error {
			println!("   └ {}", err.dimmed());
		}
	}
}

fn format_uptime(since: DateTime<Utc>) -> String {
	let secs = (Utc::now() - since).num_seconds().max(0);
	if secs < 60 {
		format!("{}s", secs)
	} else if secs < 3600 {
		format!("{}m{}s", secs / 60, secs % 60)
	} else if secs < 86400 {
		format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
	} else {
		format!("{}d{}h", secs / 86400, (secs % 86400) / 3600)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Duration;

	#[test]
	fn uptime_units() {
		assert_eq!(format_uptime(Utc::now() - Duration::seconds(5)), "5s");
		assert_eq!(format_uptime(Utc::now() - Duration::seconds(125)), "2m5s");
		assert_eq!(format_uptime(Utc::now() - Duration::seconds(7260)), "2h1m");
		assert_eq!(format_uptime(Utc::now() - Duration::seconds(90000)), "1d1h");
		assert_eq!(format_uptime(Utc::now() + Duration::seconds(30)), "0s");
	}
}
