use std::sync::Arc;

use crate::protocol::{Command, Response};
use crate::supervisor::{StartReport, Supervisor};

/// Answer one control command.
pub async fn dispatch(supervisor: &Arc<Supervisor>, command: Command) -> Response {
	tracing::debug!(?command, "request");
	match command {
		Command::Status => match serde_json::to_value(supervisor.snapshot().await) {
			Ok(data) => Response::success(Some(data)),
			Err(e) => Response::failure(format!("failed to encode status: {}", e)),
		},
		Command::Start { service } => match supervisor.start(service.as_deref()).await {
			Ok(report) => report_response(report),
			Err(e) => Response::failure(e.to_string()),
		},
		Command::Stop { service } => match supervisor.stop(service.as_deref()).await {
			Ok(messages) => Response::messages(messages),
			Err(e) => Response::failure(e.to_string()),
		},
		Command::Restart { service } => match supervisor.restart(service.as_deref()).await {
			Ok(report) => report_response(report),
			Err(e) => Response::failure(e.to_string()),
		},
		Command::Logs { service, lines } => match supervisor.logs(&service, lines) {
			Ok(lines) => Response::success(Some(serde_json::json!({ "lines": lines }))),
			Err(e) => Response::failure(e),
		},
		Command::Down => {
			tracing::info!("shutdown requested by client");
			supervisor.request_shutdown();
			Response::messages(vec!["shutting down".to_string()])
		}
	}
}

/// Any failed branch fails the whole response; the error lists each one.
fn report_response(report: StartReport) -> Response {
	if report.errors.is_empty() {
		return Response::messages(report.messages);
	}
	let errors: Vec<String> = report.errors.iter().map(ToString::to_string).collect();
	Response::failure(errors.join("; "))
}

pub fn malformed(message: String) -> Response {
	Response::failure(message)
}
