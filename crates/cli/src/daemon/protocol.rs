use polyparse_protocol::{DriverInfo, ParseRequest, ParseResponse};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonRequest {
	Ping,
	Parse {
		#[serde(flatten)]
		request: ParseRequest,
	},
	/// Install a driver image for a language.
	AddDriver {
		language: String,
		image: String,
	},
	RemoveDriver {
		language: String,
	},
	ListDrivers,
	Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonResponse {
	Pong,
	Parsed {
		#[serde(flatten)]
		response: ParseResponse,
	},
	Drivers {
		list: Vec<DriverInfo>,
	},
	Ok,
	Error {
		code: String,
		message: String,
	},
}
