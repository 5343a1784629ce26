use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use polyparse::{Error, FixedPolicy, ParseRequest, ParseResponse, PoolConfig, Registry, Status};
use polyparse_runtime::{ImageInstaller, ImageRef, Worker, WorkerId, WorkerLauncher, next_worker_id};
use serde_json::json;

#[derive(Default)]
struct Counters {
	installs: AtomicUsize,
	started: AtomicUsize,
	stopped: AtomicUsize,
}

impl Counters {
	fn get(counter: &AtomicUsize) -> usize {
		counter.load(Ordering::SeqCst)
	}
}

/// Installs anything except images whose location starts with `missing`.
#[derive(Default)]
struct FakeInstaller {
	counters: Arc<Counters>,
	installed: DashSet<String>,
}

#[async_trait]
impl ImageInstaller for FakeInstaller {
	async fn install(&self, image: &ImageRef, _force: bool) -> polyparse_runtime::Result<()> {
		self.counters.installs.fetch_add(1, Ordering::SeqCst);
		tokio::time::sleep(Duration::from_millis(20)).await;
		if image.location().starts_with("missing") {
			return Err(polyparse_runtime::Error::ImageNotFound {
				reference: image.to_string(),
				reason: "no such driver".to_string(),
			});
		}
		self.installed.insert(image.to_string());
		Ok(())
	}

	fn is_installed(&self, image: &ImageRef) -> bool {
		self.installed.contains(&image.to_string())
	}
}

/// Answers with the request's language; content `crash` kills the worker.
/// Workers from images whose location starts with `stuck` fail to close.
struct EchoWorker {
	id: WorkerId,
	fail_close: bool,
	counters: Arc<Counters>,
}

#[async_trait]
impl Worker for EchoWorker {
	fn id(&self) -> WorkerId {
		self.id
	}

	async fn parse(&mut self, request: &ParseRequest) -> polyparse_runtime::Result<ParseResponse> {
		if request.content == "crash" {
			return Err(polyparse_runtime::Error::WorkerExited("driver crashed".to_string()));
		}
		let ast = json!({ "file": request.filename, "bytes": request.content.len() });
		Ok(ParseResponse::ok(ast).with_language(request.language.clone()))
	}

	async fn close(&mut self) -> polyparse_runtime::Result<()> {
		self.counters.stopped.fetch_add(1, Ordering::SeqCst);
		if self.fail_close {
			return Err(polyparse_runtime::Error::Transport("close handshake failed".to_string()));
		}
		Ok(())
	}
}

struct EchoLauncher {
	counters: Arc<Counters>,
}

#[async_trait]
impl WorkerLauncher for EchoLauncher {
	async fn start(&self, image: &ImageRef) -> polyparse_runtime::Result<Box<dyn Worker>> {
		self.counters.started.fetch_add(1, Ordering::SeqCst);
		Ok(Box::new(EchoWorker {
			id: next_worker_id(),
			fail_close: image.location().starts_with("stuck"),
			counters: Arc::clone(&self.counters),
		}))
	}
}

fn registry() -> (Registry, Arc<Counters>) {
	let counters = Arc::new(Counters::default());
	let installer = Arc::new(FakeInstaller {
		counters: Arc::clone(&counters),
		..Default::default()
	});
	let launcher = Arc::new(EchoLauncher {
		counters: Arc::clone(&counters),
	});
	let registry = Registry::builder(installer, launcher)
		.policy(Arc::new(FixedPolicy::new(1).unwrap()))
		.pool_config(PoolConfig {
			acquire_timeout: Duration::from_secs(2),
			..Default::default()
		})
		.build();
	(registry, counters)
}

#[tokio::test]
async fn dispatch_parses_go_file() {
	let (registry, _) = registry();

	let request = ParseRequest::new("a.go", "package main").with_language("go");
	let response = registry.dispatch(request).await;

	assert_eq!(response.status, Status::Ok);
	assert_eq!(response.language, "go");
	assert!(response.errors.is_empty());
	assert_eq!(response.ast, Some(json!({ "file": "a.go", "bytes": 12 })));
}

#[tokio::test]
async fn concurrent_first_requests_create_one_pool() {
	let (registry, counters) = registry();
	let registry = Arc::new(registry);

	let tasks: Vec<_> = (0..16)
		.map(|i| {
			let registry = Arc::clone(&registry);
			tokio::spawn(async move {
				let request = ParseRequest::new(format!("f{i}.go"), "package main").with_language("go");
				registry.dispatch(request).await
			})
		})
		.collect();
	for task in tasks {
		assert_eq!(task.await.unwrap().status, Status::Ok);
	}

	assert_eq!(Counters::get(&counters.installs), 1);
	assert_eq!(Counters::get(&counters.started), 1);
	assert_eq!(registry.drivers().len(), 1);
}

#[tokio::test]
async fn language_is_detected_when_absent() {
	let (registry, _) = registry();

	let response = registry
		.dispatch(ParseRequest::new("src/app.py", "print('hi')"))
		.await;

	assert_eq!(response.status, Status::Ok);
	let drivers = registry.drivers();
	assert_eq!(drivers.len(), 1);
	assert_eq!(drivers[0].language, "python");
	assert_eq!(drivers[0].image, "exec://python-driver");
}

#[tokio::test]
async fn detected_language_uses_installed_driver() {
	let (registry, counters) = registry();
	registry.add_driver("go", "exec://go-driver").await.unwrap();

	let response = registry.dispatch(ParseRequest::new("a.go", "package main")).await;

	assert_eq!(response.status, Status::Ok);
	assert_eq!(response.language, "go");
	assert_eq!(response.ast, Some(json!({ "file": "a.go", "bytes": 12 })));
	assert_eq!(Counters::get(&counters.installs), 1);
	assert_eq!(Counters::get(&counters.started), 1);
	let drivers = registry.drivers();
	assert_eq!(drivers.len(), 1);
	assert_eq!(drivers[0].language, "go");
	assert_eq!(drivers[0].image, "exec://go-driver");
}

#[tokio::test]
async fn undetectable_language_is_fatal() {
	let (registry, counters) = registry();

	let response = registry.dispatch(ParseRequest::new("notes", "hello")).await;

	assert!(response.is_fatal());
	assert!(response.errors[0].starts_with("error getting driver: "));
	assert!(response.errors[0].contains("language could not be determined"));
	assert_eq!(Counters::get(&counters.installs), 0);
}

#[tokio::test]
async fn failed_install_leaves_no_pool() {
	let (registry, _) = registry();

	let err = registry.add_driver("fortran", "exec://missing-fortran").await.unwrap_err();

	assert!(matches!(err, Error::Runtime { ref language, .. } if language == "fortran"));
	assert!(registry.pool("fortran").is_none());
	assert!(registry.drivers().is_empty());
}

#[tokio::test]
async fn lazy_install_failure_is_missing_driver() {
	let (registry, counters) = registry();
	let installer_failures = ParseRequest::new("x.lang", "").with_language("missing");

	let response = registry.dispatch(installer_failures).await;

	assert!(response.is_fatal());
	assert!(response.errors[0].starts_with("error getting driver: missing driver for language \"missing\""));
	assert_eq!(Counters::get(&counters.installs), 1);
	assert!(registry.drivers().is_empty());
}

#[tokio::test]
async fn failed_languages_leave_no_entries() {
	let (registry, counters) = registry();

	for i in 0..10 {
		let request = ParseRequest::new("x.lang", "").with_language(format!("missing{i}"));
		assert!(registry.dispatch(request).await.is_fatal());
	}

	assert_eq!(Counters::get(&counters.installs), 10);
	assert!(format!("{registry:?}").contains("languages: []"));
	let err = registry.remove_driver("missing0").await.unwrap_err();
	assert!(matches!(err, Error::NotInstalled { .. }));
}

#[tokio::test]
async fn concurrent_failing_first_requests_all_fail() {
	let (registry, counters) = registry();
	let registry = Arc::new(registry);

	let tasks: Vec<_> = (0..8)
		.map(|i| {
			let registry = Arc::clone(&registry);
			tokio::spawn(async move {
				let request = ParseRequest::new(format!("f{i}.lang"), "").with_language("missing");
				registry.dispatch(request).await
			})
		})
		.collect();
	for task in tasks {
		let response = task.await.unwrap();
		assert!(response.is_fatal());
		assert!(response.errors[0].starts_with("error getting driver: missing driver for language \"missing\""));
	}

	// Failures are not shared: each caller makes its own attempt, one at a time.
	assert_eq!(Counters::get(&counters.installs), 8);
	assert_eq!(Counters::get(&counters.started), 0);
	assert!(registry.pool("missing").is_none());
	assert!(format!("{registry:?}").contains("languages: []"));
	assert!(matches!(
		registry.remove_driver("missing").await,
		Err(Error::NotInstalled { .. })
	));
}

#[tokio::test]
async fn failed_first_request_does_not_block_later_install() {
	let (registry, _) = registry();

	let failed = registry
		.dispatch(ParseRequest::new("x.lang", "").with_language("missing"))
		.await;
	assert!(failed.is_fatal());

	registry.add_driver("missing", "exec://lang-driver").await.unwrap();
	let response = registry
		.dispatch(ParseRequest::new("x.lang", "ok").with_language("missing"))
		.await;
	assert_eq!(response.status, Status::Ok);
}

#[tokio::test]
async fn add_driver_twice_is_already_installed() {
	let (registry, _) = registry();

	registry.add_driver("go", "exec://go-driver").await.unwrap();
	let err = registry
		.add_driver("go", "file:///opt/drivers/go")
		.await
		.unwrap_err();

	assert!(matches!(err, Error::AlreadyInstalled { ref language, .. } if language == "go"));
	assert_eq!(registry.drivers()[0].image, "exec://go-driver");
}

#[tokio::test]
async fn add_driver_rejects_bad_reference() {
	let (registry, counters) = registry();

	let err = registry.add_driver("go", "go-driver").await.unwrap_err();

	assert!(matches!(err, Error::Runtime { .. }));
	assert_eq!(Counters::get(&counters.installs), 0);
	assert!(registry.pool("go").is_none());
}

#[tokio::test]
async fn explicit_driver_serves_later_requests() {
	let (registry, counters) = registry();
	registry.add_driver("go", "exec://custom-go").await.unwrap();

	let response = registry
		.dispatch(ParseRequest::new("a.go", "package main").with_language("go"))
		.await;

	assert_eq!(response.status, Status::Ok);
	assert_eq!(Counters::get(&counters.installs), 1);
	assert_eq!(registry.pool("go").unwrap().image().to_string(), "exec://custom-go");
}

#[tokio::test]
async fn crashed_worker_is_fatal_and_recovers() {
	let (registry, counters) = registry();

	let crashed = registry
		.dispatch(ParseRequest::new("a.go", "crash").with_language("go"))
		.await;
	assert!(crashed.is_fatal());
	assert!(crashed.errors[0].starts_with("error parsing with driver: "));

	let response = registry
		.dispatch(ParseRequest::new("a.go", "package main").with_language("go"))
		.await;
	assert_eq!(response.status, Status::Ok);
	assert_eq!(Counters::get(&counters.started), 2);
}

#[tokio::test]
async fn remove_driver_closes_pool() {
	let (registry, counters) = registry();
	registry.add_driver("go", "exec://go-driver").await.unwrap();

	registry.remove_driver("go").await.unwrap();
	assert!(registry.drivers().is_empty());
	assert_eq!(Counters::get(&counters.stopped), 1);

	let err = registry.remove_driver("go").await.unwrap_err();
	assert!(matches!(err, Error::NotInstalled { .. }));
}

#[tokio::test]
async fn shutdown_rejects_new_work() {
	let (registry, counters) = registry();
	registry
		.dispatch(ParseRequest::new("a.go", "package main").with_language("go"))
		.await;

	registry.shutdown().await.unwrap();
	assert!(registry.is_closed());
	assert_eq!(Counters::get(&counters.stopped), Counters::get(&counters.started));

	let response = registry
		.dispatch(ParseRequest::new("a.go", "package main").with_language("go"))
		.await;
	assert!(response.is_fatal());
	assert!(response.errors[0].contains("closed"));

	let err = registry.add_driver("rust", "exec://rust-driver").await.unwrap_err();
	assert!(err.is_closed());

	registry.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_closes_all_pools_and_reports_first_failure() {
	let (registry, counters) = registry();
	registry.add_driver("alpha", "exec://stuck-alpha").await.unwrap();
	registry.add_driver("beta", "exec://beta-driver").await.unwrap();
	registry.add_driver("gamma", "exec://stuck-gamma").await.unwrap();

	let err = registry.shutdown().await.unwrap_err();

	match err {
		Error::Runtime { language, .. } => assert_eq!(language, "alpha"),
		other => panic!("unexpected error: {other}"),
	}
	assert_eq!(Counters::get(&counters.stopped), 3);
	assert!(registry.pool("beta").unwrap().is_closed());
}
