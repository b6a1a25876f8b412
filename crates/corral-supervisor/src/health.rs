use std::time::Duration;
use tokio::net::TcpStream;

use crate::types::HealthCheck;

const PORT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Evaluates health predicates. Holds one pooled HTTP client for all probes.
#[derive(Clone)]
pub struct HealthProbe {
	http: reqwest::Client,
	http_timeout: Duration,
}

impl HealthProbe {
	pub fn new(http_timeout: Duration) -> Self {
		let http = reqwest::Client::builder()
			.timeout(http_timeout)
			.build()
			.unwrap_or_else(|e| {
				tracing::warn!("falling back to default HTTP client: {}", e);
				reqwest::Client::new()
			});
		Self { http, http_timeout }
	}

	pub async fn check(&self, check: &HealthCheck) -> bool {
		match check {
			HealthCheck::None => true,
			HealthCheck::Port { port, host } => port_open(host, *port).await,
			HealthCheck::Http { url } => self.http_ok(url).await,
		}
	}

	async fn http_ok(&self, url: &str) -> bool {
		match self.http.get(url).timeout(self.http_timeout).send().await {
			Ok(resp) => resp.status().is_success(),
			Err(e) => {
				tracing::trace!(url, "http probe failed: {}", e);
				false
			}
		}
	}
}

/// True if something accepts TCP connections on `host:port`.
pub async fn port_open(host: &str, port: u16) -> bool {
	matches!(
		tokio::time::timeout(PORT_PROBE_TIMEOUT, TcpStream::connect((host, port))).await,
		Ok(Ok(_))
	)
}
