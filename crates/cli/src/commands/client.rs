use std::io::Write;
use std::path::Path;

use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use polyparse_protocol::{DriverInfo, Encoding, ParseRequest, Status};
use tracing::info;

use crate::cli::{DriversArgs, InstallArgs, ParseArgs, RemoveArgs};
use crate::daemon::DaemonClient;
use crate::error::{CliError, Result};

pub async fn parse(client: &DaemonClient, args: ParseArgs) -> Result<()> {
	let request = build_request(&args.file, args.language, args.timeout_ms)?;
	let response = client.parse(request).await?;

	let stdout = std::io::stdout();
	let mut out = stdout.lock();
	serde_json::to_writer_pretty(&mut out, &response)?;
	writeln!(out)?;

	if response.status == Status::Fatal {
		return Err(CliError::ParseFailed(response.errors.join("; ")));
	}
	Ok(())
}

pub async fn install(client: &DaemonClient, args: InstallArgs) -> Result<()> {
	client.add_driver(&args.language, &args.image).await?;
	info!(target = "polyparse", language = %args.language, image = %args.image, "driver installed");
	println!("installed {} ({})", args.language, args.image);
	Ok(())
}

pub async fn remove(client: &DaemonClient, args: RemoveArgs) -> Result<()> {
	client.remove_driver(&args.language).await?;
	println!("removed {}", args.language);
	Ok(())
}

pub async fn drivers(client: &DaemonClient, args: DriversArgs) -> Result<()> {
	let list = client.drivers().await?;
	if args.json {
		println!("{}", serde_json::to_string_pretty(&list)?);
	} else {
		print!("{}", render_table(&list));
	}
	Ok(())
}

pub async fn stop(client: &DaemonClient) -> Result<()> {
	client.shutdown().await?;
	println!("daemon stopping");
	Ok(())
}

pub async fn ping(client: &DaemonClient) -> Result<()> {
	client.ping().await?;
	println!("pong ({})", client.endpoint());
	Ok(())
}

/// Reads `path` into a request, base64-encoding content that is not UTF-8.
fn build_request(path: &Path, language: Option<String>, timeout_ms: Option<u64>) -> Result<ParseRequest> {
	let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
	let filename = path.to_string_lossy().into_owned();

	let mut request = match String::from_utf8(bytes) {
		Ok(text) => ParseRequest::new(filename, text),
		Err(err) => ParseRequest {
			encoding: Encoding::Base64,
			..ParseRequest::new(filename, STANDARD.encode(err.into_bytes()))
		},
	};
	if let Some(language) = language {
		request = request.with_language(language);
	}
	if let Some(timeout_ms) = timeout_ms {
		request = request.with_timeout_ms(timeout_ms);
	}
	Ok(request)
}

fn render_table(drivers: &[DriverInfo]) -> String {
	if drivers.is_empty() {
		return "no drivers\n".to_string();
	}

	let lang_width = drivers
		.iter()
		.map(|d| d.language.len())
		.chain(["LANGUAGE".len()])
		.max()
		.unwrap_or(0);
	let image_width = drivers
		.iter()
		.map(|d| d.image.len())
		.chain(["IMAGE".len()])
		.max()
		.unwrap_or(0);

	let mut out = format!(
		"{:<lang_width$}  {:<image_width$}  {:>9}  {:>4}  {:>4}\n",
		"LANGUAGE", "IMAGE", "INSTANCES", "IDLE", "BUSY"
	);
	for d in drivers {
		out.push_str(&format!(
			"{:<lang_width$}  {:<image_width$}  {:>9}  {:>4}  {:>4}\n",
			d.language, d.image, d.instances, d.idle, d.busy
		));
	}
	out
}

#[cfg(test)]
mod tests {
	use std::fs;

	use tempfile::TempDir;

	use super::*;

	#[test]
	fn text_files_are_sent_verbatim() {
		let temp = TempDir::new().unwrap();
		let path = temp.path().join("main.go");
		fs::write(&path, "package main\n").unwrap();

		let request = build_request(&path, Some("go".into()), Some(250)).unwrap();
		assert_eq!(request.content, "package main\n");
		assert_eq!(request.encoding, Encoding::Utf8);
		assert_eq!(request.language, "go");
		assert_eq!(request.timeout_ms, Some(250));
		assert!(request.filename.ends_with("main.go"));
	}

	#[test]
	fn binary_files_are_base64_encoded() {
		let temp = TempDir::new().unwrap();
		let path = temp.path().join("blob.bin");
		fs::write(&path, [0xff, 0xfe, 0x00, 0x41]).unwrap();

		let request = build_request(&path, None, None).unwrap();
		assert_eq!(request.encoding, Encoding::Base64);
		assert_eq!(request.language, "");
		assert_eq!(request.decoded_content().unwrap(), vec![0xff, 0xfe, 0x00, 0x41]);
	}

	#[test]
	fn missing_file_is_an_error() {
		let temp = TempDir::new().unwrap();
		assert!(build_request(&temp.path().join("absent.go"), None, None).is_err());
	}

	#[test]
	fn table_lists_each_driver() {
		let drivers = vec![
			DriverInfo {
				language: "go".into(),
				image: "exec://go-driver".into(),
				instances: 2,
				idle: 1,
				busy: 1,
			},
			DriverInfo {
				language: "python".into(),
				image: "exec://python-driver".into(),
				instances: 1,
				idle: 1,
				busy: 0,
			},
		];

		let table = render_table(&drivers);
		let lines: Vec<&str> = table.lines().collect();
		assert_eq!(lines.len(), 3);
		assert!(lines[0].starts_with("LANGUAGE"));
		assert!(lines[1].starts_with("go "));
		assert!(lines[2].contains("exec://python-driver"));
		assert_eq!(render_table(&[]), "no drivers\n");
	}
}
