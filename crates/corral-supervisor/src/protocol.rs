use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
	Status,
	Start {
		#[serde(default, skip_serializing_if = "Option::is_none")]
		service: Option<String>,
	},
	Stop {
		#[serde(default, skip_serializing_if = "Option::is_none")]
		service: Option<String>,
	},
	Restart {
		#[serde(default, skip_serializing_if = "Option::is_none")]
		service: Option<String>,
	},
	Logs {
		service: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		lines: Option<usize>,
	},
	Down,
}

/// One line back: `{"ok":true,"data":...}` or `{"ok":false,"error":...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
	pub ok: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl Response {
	pub fn success(data: Option<Value>) -> Self {
		Self { ok: true, data, error: None }
	}

	pub fn failure(error: impl Into<String>) -> Self {
		Self { ok: false, data: None, error: Some(error.into()) }
	}

	pub fn messages(messages: Vec<String>) -> Self {
		Self::success(Some(serde_json::json!({ "messages": messages })))
	}

	/// `data.messages` / `data.lines` as plain strings.
	pub fn strings(&self, key: &str) -> Vec<String> {
		self.data
			.as_ref()
			.and_then(|d| d.get(key))
			.and_then(Value::as_array)
			.map(|items| items.iter().filter_map(|v| v.as_str().map(String::from)).collect())
			.unwrap_or_default()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn commands_use_cmd_tag() {
		let cmd: Command = serde_json::from_str(r#"{"cmd":"start","service":"web"}"#).unwrap();
		assert_eq!(cmd, Command::Start { service: Some("web".into()) });

		let cmd: Command = serde_json::from_str(r#"{"cmd":"stop"}"#).unwrap();
		assert_eq!(cmd, Command::Stop { service: None });

		let cmd: Command = serde_json::from_str(r#"{"cmd":"logs","service":"api","lines":5}"#).unwrap();
		assert_eq!(cmd, Command::Logs { service: "api".into(), lines: Some(5) });

		assert_eq!(serde_json::to_string(&Command::Down).unwrap(), r#"{"cmd":"down"}"#);
	}

	#[test]
	fn unknown_tag_is_rejected() {
		assert!(serde_json::from_str::<Command>(r#"{"cmd":"explode"}"#).is_err());
		assert!(serde_json::from_str::<Command>(r#"{"cmd":"logs"}"#).is_err());
	}

	#[test]
	fn response_shape() {
		let ok = serde_json::to_value(Response::messages(vec!["web: started".into()])).unwrap();
		assert_eq!(ok, serde_json::json!({"ok": true, "data": {"messages": ["web: started"]}}));

		let err = serde_json::to_value(Response::failure("boom")).unwrap();
		assert_eq!(err, serde_json::json!({"ok": false, "error": "boom"}));
	}

	#[test]
	fn strings_reads_data_arrays() {
		let resp = Response::success(Some(serde_json::json!({"lines": ["a", "b"]})));
		assert_eq!(resp.strings("lines"), vec!["a", "b"]);
		assert!(resp.strings("messages").is_empty());
	}
}
