use std::future::Future;
use std::sync::Arc;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

/// Serve newline-delimited JSON requests on `listener` until `shutdown`
/// flips to `true`. A line that is not valid UTF-8 or fails to decode is
/// answered with `on_error(message)` and the connection stays open.
pub async fn run_socket_server<Req, Resp, F, Fut, E>(
	listener: UnixListener,
	handler: F,
	on_error: E,
	mut shutdown: watch::Receiver<bool>,
) where
	Req: DeserializeOwned + Send + 'static,
	Resp: Serialize + Send + 'static,
	F: Fn(Req) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Resp> + Send,
	E: Fn(String) -> Resp + Send + Sync + 'static,
{
	if let Ok(addr) = listener.local_addr() {
		if let Some(path) = addr.as_pathname() {
			tracing::info!("listening on {}", path.display());
		}
	}

	let handler = Arc::new(handler);
	let on_error = Arc::new(on_error);

	loop {
		if *shutdown.borrow() {
			break;
		}

		let stream = tokio::select! {
			accepted = listener.accept() => match accepted {
				Ok((stream, _)) => stream,
				Err(e) => {
					tracing::error!("accept error: {}", e);
					continue;
				}
			},
			changed = shutdown.changed() => {
				if changed.is_err() {
					break;
				}
				continue;
			}
		};

		let handler = Arc::clone(&handler);
		let on_error = Arc::clone(&on_error);
		tokio::spawn(async move {
			handle_connection(stream, handler, on_error).await;
		});
	}

	tracing::debug!("socket server stopped accepting");
}

async fn handle_connection<Req, Resp, F, Fut, E>(
	stream: UnixStream,
	handler: Arc<F>,
	on_error: Arc<E>,
) where
	Req: DeserializeOwned + Send + 'static,
	Resp: Serialize + Send + 'static,
	F: Fn(Req) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Resp> + Send,
	E: Fn(String) -> Resp + Send + Sync + 'static,
{
	let (reader, mut writer) = stream.into_split();
	let mut reader = BufReader::new(reader);
	let mut buf = Vec::with_capacity(512);

	loop {
		buf.clear();
		match reader.read_until(b'\n', &mut buf).await {
			Ok(0) => break,
			Ok(_) => {}
			Err(e) => {
				tracing::debug!("connection read error: {}", e);
				break;
			}
		}

		let response = match std::str::from_utf8(&buf) {
			Ok(line) if line.trim().is_empty() => continue,
			Ok(line) => match serde_json::from_str::<Req>(line) {
				Ok(request) => handler(request).await,
				Err(e) => {
					tracing::warn!("invalid request: {}", e);
					on_error(format!("invalid request: {}", e))
				}
			},
			Err(e) => {
				tracing::warn!("request is not utf-8: {}", e);
				on_error(format!("invalid request: {}", e))
			}
		};

		let mut data = match serde_json::to_vec(&response) {
			Ok(d) => d,
			Err(e) => {
				tracing::error!("failed to serialize response: {}", e);
				continue;
			}
		};
		data.push(b'\n');

		if writer.write_all(&data).await.is_err() {
			break;
		}
	}
}
