use std::path::PathBuf;

use clap::Parser;

use super::*;

#[test]
fn parse_serve_command() {
	let args = vec![
		"polyparse",
		"serve",
		"--search-path",
		"/opt/drivers",
		"--search-path",
		"/usr/local/drivers",
		"--max-instances",
		"8",
	];
	let cli = Cli::try_parse_from(args).unwrap();

	match cli.command {
		Commands::Serve(args) => {
			assert_eq!(
				args.search_paths,
				vec![PathBuf::from("/opt/drivers"), PathBuf::from("/usr/local/drivers")]
			);
			assert_eq!(args.max_instances, Some(8));
			assert_eq!(args.min_instances, None);
		}
		_ => panic!("Expected Serve command"),
	}
}

#[test]
fn parse_parse_command() {
	let args = vec!["polyparse", "parse", "src/main.go", "-l", "go", "--timeout-ms", "1500"];
	let cli = Cli::try_parse_from(args).unwrap();

	match cli.command {
		Commands::Parse(args) => {
			assert_eq!(args.file, PathBuf::from("src/main.go"));
			assert_eq!(args.language.as_deref(), Some("go"));
			assert_eq!(args.timeout_ms, Some(1500));
		}
		_ => panic!("Expected Parse command"),
	}
}

#[test]
fn parse_without_language_leaves_detection_to_daemon() {
	let cli = Cli::try_parse_from(["polyparse", "parse", "a.py"]).unwrap();

	match cli.command {
		Commands::Parse(args) => assert_eq!(args.language, None),
		_ => panic!("Expected Parse command"),
	}
}

#[test]
fn parse_install_command() {
	let cli = Cli::try_parse_from(["polyparse", "install", "go", "file:///opt/drivers/go"]).unwrap();

	match cli.command {
		Commands::Install(args) => {
			assert_eq!(args.language, "go");
			assert_eq!(args.image, "file:///opt/drivers/go");
		}
		_ => panic!("Expected Install command"),
	}
}

#[test]
fn install_requires_image() {
	assert!(Cli::try_parse_from(["polyparse", "install", "go"]).is_err());
}

#[test]
fn parse_drivers_json_flag() {
	let cli = Cli::try_parse_from(["polyparse", "drivers", "--json"]).unwrap();
	assert!(matches!(cli.command, Commands::Drivers(DriversArgs { json: true })));
}

#[test]
fn global_flags_after_subcommand() {
	let cli = Cli::try_parse_from(["polyparse", "ping", "-vv", "--socket", "/run/p.sock"]).unwrap();

	assert!(matches!(cli.command, Commands::Ping));
	assert_eq!(cli.verbose, 2);
	assert_eq!(cli.socket, Some(PathBuf::from("/run/p.sock")));
}

#[test]
fn socket_conflicts_with_listen() {
	let result = Cli::try_parse_from(["polyparse", "stop", "--socket", "/run/p.sock", "--listen", "127.0.0.1:7000"]);
	assert!(result.is_err());
}

#[test]
fn parse_remove_command() {
	let cli = Cli::try_parse_from(["polyparse", "remove", "python"]).unwrap();

	match cli.command {
		Commands::Remove(args) => assert_eq!(args.language, "python"),
		_ => panic!("Expected Remove command"),
	}
}
