use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use corral_ipc::client::{self, ClientError, DaemonClient};
use corral_ipc::endpoint::{Endpoint, EndpointError, EndpointState};
use corral_ipc::paths::DaemonPaths;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
enum Req {
	Ping,
	Echo(String),
	Add(i32, i32),
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
enum Resp {
	Pong,
	Echo(String),
	Sum(i32),
	Error(String),
}

use std::sync::atomic::{AtomicU32, Ordering};
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

fn temp_paths(name: &str) -> DaemonPaths {
	let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
	// Stay directly under /tmp so socket paths fit in sun_path
	let dir = std::path::PathBuf::from("/tmp").join(format!("cit{}{}-{}", n, name, std::process::id()));
	let paths = DaemonPaths::new(dir);
	paths.ensure_state_dir().unwrap();
	paths
}

fn cleanup_paths(paths: &DaemonPaths) {
	let _ = std::fs::remove_dir_all(paths.state_dir());
}

async fn handle(req: Req) -> Resp {
	match req {
		Req::Ping => Resp::Pong,
		Req::Echo(s) => Resp::Echo(s),
		Req::Add(a, b) => Resp::Sum(a + b),
	}
}

// --- Paths ---

#[test]
fn paths_are_project_local() {
	let paths = DaemonPaths::for_project("/work/app");
	assert_eq!(paths.state_dir(), std::path::Path::new("/work/app/.corral"));
	assert_eq!(paths.socket_path(), std::path::PathBuf::from("/work/app/.corral/daemon.sock"));
	assert_eq!(paths.pid_path(), std::path::PathBuf::from("/work/app/.corral/daemon.pid"));
	assert_eq!(paths.snapshot_path(), std::path::PathBuf::from("/work/app/.corral/state.json"));
	assert_eq!(paths.log_dir(), std::path::PathBuf::from("/work/app/.corral/logs"));
}

// --- Client helpers ---

#[test]
fn is_running_false_when_no_socket() {
	let paths = temp_paths("nosock");
	assert!(!client::is_running(&paths));
	cleanup_paths(&paths);
}

#[test]
fn client_connect_returns_not_running() {
	let paths = temp_paths("nosrv");
	match DaemonClient::<Req, Resp>::connect(&paths) {
		Err(ClientError::NotRunning) => {}
		Err(other) => panic!("expected NotRunning, got {:?}", other),
		Ok(_) => panic!("expected error, got Ok"),
	}
	cleanup_paths(&paths);
}

#[test]
fn client_error_display() {
	assert_eq!(format!("{}", ClientError::NotRunning), "daemon not running");
	assert_eq!(format!("{}", ClientError::Deserialize("bad".into())), "deserialize error: bad");
}

// --- Server roundtrip ---

#[tokio::test]
async fn server_client_roundtrip_in_order() {
	let paths = temp_paths("rt");
	let listener = Endpoint::new(paths.clone()).claim().unwrap();
	let (_stop_tx, stop_rx) = watch::channel(false);
	let server = tokio::spawn(corral_ipc::server::run_socket_server(listener, handle, Resp::Error, stop_rx));

	let client_paths = paths.clone();
	tokio::task::spawn_blocking(move || {
		let mut client = DaemonClient::<Req, Resp>::connect(&client_paths).unwrap();
		assert_eq!(client.send(&Req::Ping).unwrap(), Resp::Pong);
		assert_eq!(client.send(&Req::Echo("hello".into())).unwrap(), Resp::Echo("hello".into()));
		assert_eq!(client.send(&Req::Add(3, 7)).unwrap(), Resp::Sum(10));
	})
	.await
	.unwrap();

	server.abort();
	cleanup_paths(&paths);
}

#[tokio::test]
async fn server_handles_concurrent_clients() {
	let paths = temp_paths("multi");
	let listener = Endpoint::new(paths.clone()).claim().unwrap();
	let (_stop_tx, stop_rx) = watch::channel(false);
	let server = tokio::spawn(corral_ipc::server::run_socket_server(listener, handle, Resp::Error, stop_rx));

	let mut handles = vec![];
	for i in 0..5 {
		let cp = paths.clone();
		handles.push(tokio::task::spawn_blocking(move || {
			let mut client = DaemonClient::<Req, Resp>::connect(&cp).unwrap();
			assert_eq!(client.send(&Req::Add(i, 100)).unwrap(), Resp::Sum(i + 100));
		}));
	}
	for h in handles {
		h.await.unwrap();
	}

	server.abort();
	cleanup_paths(&paths);
}

#[tokio::test]
async fn malformed_line_gets_error_and_connection_survives() {
	let paths = temp_paths("perr");
	let listener = Endpoint::new(paths.clone()).claim().unwrap();
	let (_stop_tx, stop_rx) = watch::channel(false);
	let server = tokio::spawn(corral_ipc::server::run_socket_server(
		listener,
		handle,
		Resp::Error,
		stop_rx,
	));

	let socket = paths.socket_path();
	tokio::task::spawn_blocking(move || {
		let mut stream = UnixStream::connect(&socket).unwrap();
		stream.write_all(b"this is not json\n").unwrap();
		let ping = serde_json::to_string(&Req::Ping).unwrap();
		stream.write_all(format!("{}\n", ping).as_bytes()).unwrap();

		let mut reader = BufReader::new(&stream);
		let mut line = String::new();
		reader.read_line(&mut line).unwrap();
		match serde_json::from_str::<Resp>(&line).unwrap() {
			Resp::Error(msg) => assert!(msg.contains("invalid request"), "got: {}", msg),
			other => panic!("expected Error, got {:?}", other),
		}

		line.clear();
		reader.read_line(&mut line).unwrap();
		assert_eq!(serde_json::from_str::<Resp>(&line).unwrap(), Resp::Pong);
	})
	.await
	.unwrap();

	server.abort();
	cleanup_paths(&paths);
}

#[tokio::test]
async fn non_utf8_line_gets_error_and_connection_survives() {
	let paths = temp_paths("utf");
	let listener = Endpoint::new(paths.clone()).claim().unwrap();
	let (_stop_tx, stop_rx) = watch::channel(false);
	let server = tokio::spawn(corral_ipc::server::run_socket_server(listener, handle, Resp::Error, stop_rx));

	let socket = paths.socket_path();
	tokio::task::spawn_blocking(move || {
		let mut stream = UnixStream::connect(&socket).unwrap();
		stream.write_all(b"{\"Echo\":\"\xff\"}\n").unwrap();
		let add = serde_json::to_string(&Req::Add(1, 1)).unwrap();
		stream.write_all(format!("{}\n", add).as_bytes()).unwrap();

		let mut reader = BufReader::new(&stream);
		let mut line = String::new();
		reader.read_line(&mut line).unwrap();
		assert!(matches!(serde_json::from_str::<Resp>(&line).unwrap(), Resp::Error(_)), "got: {}", line);

		line.clear();
		reader.read_line(&mut line).unwrap();
		assert_eq!(serde_json::from_str::<Resp>(&line).unwrap(), Resp::Sum(2));
	})
	.await
	.unwrap();

	server.abort();
	cleanup_paths(&paths);
}

#[tokio::test]
async fn server_stops_accepting_on_shutdown() {
	let paths = temp_paths("stop");
	let listener = Endpoint::new(paths.clone()).claim().unwrap();
	let (stop_tx, stop_rx) = watch::channel(false);
	let server = tokio::spawn(corral_ipc::server::run_socket_server(listener, handle, Resp::Error, stop_rx));

	stop_tx.send(true).unwrap();
	tokio::time::timeout(std::time::Duration::from_secs(2), server)
		.await
		.expect("server should return after shutdown")
		.unwrap();

	cleanup_paths(&paths);
}

// --- Endpoint claim ---

#[tokio::test]
async fn claim_refuses_live_predecessor() {
	let paths = temp_paths("live");
	let endpoint = Endpoint::new(paths.clone());
	let _listener = endpoint.claim().unwrap();
	assert_eq!(endpoint.probe(), EndpointState::Live);

	match endpoint.claim() {
		Err(EndpointError::AlreadyRunning(path)) => assert_eq!(path, paths.socket_path()),
		other => panic!("expected AlreadyRunning, got {:?}", other.map(|_| ())),
	}
	cleanup_paths(&paths);
}

#[tokio::test]
async fn claim_replaces_stale_socket() {
	let paths = temp_paths("stale");
	let endpoint = Endpoint::new(paths.clone());
	{
		let listener = std::os::unix::net::UnixListener::bind(paths.socket_path()).unwrap();
		drop(listener);
	}
	assert!(paths.socket_path().exists());
	assert_eq!(endpoint.probe(), EndpointState::Stale);

	let _listener = endpoint.claim().unwrap();
	assert_eq!(endpoint.probe(), EndpointState::Live);
	cleanup_paths(&paths);
}

#[test]
fn cleanup_removes_artifacts() {
	let paths = temp_paths("clean");
	std::fs::write(paths.socket_path(), "fake").unwrap();
	let endpoint = Endpoint::new(paths.clone());
	endpoint.write_pid().unwrap();
	assert!(paths.pid_path().exists());

	endpoint.cleanup();
	assert!(!paths.socket_path().exists());
	assert!(!paths.pid_path().exists());
	cleanup_paths(&paths);
}
