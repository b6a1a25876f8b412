use std::io::{self, BufRead, BufReader, Write};
use std::marker::PhantomData;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};

use crate::paths::DaemonPaths;

#[derive(Debug)]
pub enum ClientError {
	/// Nothing accepts on the socket, or the socket file is gone.
	NotRunning,
	Io(io::Error),
	/// EOF before a response line arrived.
	Closed,
	Serialize(String),
	Deserialize(String),
}

impl std::fmt::Display for ClientError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ClientError::NotRunning => write!(f, "daemon not running"),
			ClientError::Io(e) => write!(f, "io error: {}", e),
			ClientError::Closed => write!(f, "connection closed by daemon"),
			ClientError::Serialize(e) => write!(f, "serialize error: {}", e),
			ClientError::Deserialize(e) => write!(f, "deserialize error: {}", e),
		}
	}
}

impl std::error::Error for ClientError {}

impl From<io::Error> for ClientError {
	fn from(e: io::Error) -> Self {
		ClientError::Io(e)
	}
}

/// Blocking request/response connection to a project's control socket.
///
/// The reader half is kept for the life of the connection so bytes of a
/// later response are never lost in a dropped buffer.
pub struct DaemonClient<Req, Resp> {
	writer: UnixStream,
	reader: BufReader<UnixStream>,
	_phantom: PhantomData<(Req, Resp)>,
}

impl<Req, Resp> DaemonClient<Req, Resp>
where
	Req: Serialize,
	Resp: DeserializeOwned,
{
	pub fn connect(paths: &DaemonPaths) -> Result<Self, ClientError> {
		let writer = UnixStream::connect(paths.socket_path()).map_err(|_| ClientError::NotRunning)?;
		let reader = BufReader::new(writer.try_clone()?);
		Ok(Self { writer, reader, _phantom: PhantomData })
	}

	/// Bound how long [`send`](Self::send) waits for a response.
	pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
		self.writer.set_read_timeout(timeout)?;
		Ok(())
	}

	/// Write one request line, read one response line.
	pub fn send(&mut self, request: &Req) -> Result<Resp, ClientError> {
		let mut line = serde_json::to_vec(request).map_err(|e| ClientError::Serialize(e.to_string()))?;
		line.push(b'\n');
		self.writer.write_all(&line)?;

		let mut reply = String::new();
		if self.reader.read_line(&mut reply)? == 0 {
			return Err(ClientError::Closed);
		}
		serde_json::from_str(&reply).map_err(|e| ClientError::Deserialize(e.to_string()))
	}
}

/// Whether something accepts connections on the project's socket.
pub fn is_running(paths: &DaemonPaths) -> bool {
	UnixStream::connect(paths.socket_path()).is_ok()
}
