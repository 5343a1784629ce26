//! Per-language driver pool.
//!
//! A pool owns every worker for one language. Idle workers sit on a stack
//! (most recently used on top) and are moved out of the pool for the length
//! of a parse, so a worker can never serve two requests at once. Bookkeeping
//! lives behind a single mutex that is never held across an await point;
//! callers waiting for capacity park on a [`Notify`].
//!
//! Growth happens inline on acquisition when the scaling policy asks for
//! more workers than are live. Shrinking and idle eviction run on a
//! background maintenance task every `eviction_interval`.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use parking_lot::Mutex;
use polyparse_protocol::{DriverInfo, ParseRequest, ParseResponse};
use polyparse_runtime::{ImageRef, Worker, WorkerLauncher};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::scaling::{Observation, ScalingPolicy};


/// Timing knobs for a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
	/// How long a request may wait for a worker.
	pub acquire_timeout: Duration,
	/// Idle time after which a worker above the minimum is stopped.
	pub idle_timeout: Duration,
	/// Period of the maintenance task.
	pub eviction_interval: Duration,
	/// Parse deadline when the request carries none.
	pub parse_timeout: Duration,
	/// Upper bound on stopping one worker, and on draining busy workers at close.
	pub close_timeout: Duration,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			acquire_timeout: Duration::from_secs(5),
			idle_timeout: Duration::from_secs(5 * 60),
			eviction_interval: Duration::from_secs(30),
			parse_timeout: Duration::from_secs(60),
			close_timeout: Duration::from_secs(5),
		}
	}
}

/// Point-in-time counts for a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatus {
	pub language: String,
	pub image: String,
	pub idle: usize,
	pub busy: usize,
	pub starting: usize,
	pub pending: usize,
	pub target: usize,
	pub closed: bool,
}

impl PoolStatus {
	/// Workers that exist or are being started.
	pub fn instances(&self) -> usize {
		self.idle + self.busy + self.starting
	}
}

struct IdleWorker {
	worker: Box<dyn Worker>,
	since: Instant,
}

impl IdleWorker {
	fn new(worker: Box<dyn Worker>) -> Self {
		Self {
			worker,
			since: Instant::now(),
		}
	}
}

#[derive(Default)]
struct PoolState {
	idle: Vec<IdleWorker>,
	busy: usize,
	starting: usize,
	pending: usize,
	target: usize,
	last_decision: Option<Instant>,
	closed: bool,
}

impl PoolState {
	fn live(&self) -> usize {
		self.idle.len() + self.busy + self.starting
	}
}

struct PoolInner {
	language: String,
	image: ImageRef,
	policy: Arc<dyn ScalingPolicy>,
	launcher: Arc<dyn WorkerLauncher>,
	config: PoolConfig,
	state: Mutex<PoolState>,
	available: Notify,
	closed_tx: watch::Sender<bool>,
	maintenance: Mutex<Option<JoinHandle<()>>>,
}

/// Bounded, auto-scaling set of workers for one language.
///
/// Cloning is cheap; clones share the same workers.
#[derive(Clone)]
pub struct DriverPool {
	inner: Arc<PoolInner>,
}

impl fmt::Debug for DriverPool {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DriverPool")
			.field("language", &self.inner.language)
			.field("image", &self.inner.image)
			.field("policy", &self.inner.policy)
			.finish_non_exhaustive()
	}
}

impl DriverPool {
	/// Creates a pool and eagerly launches the policy's minimum.
	///
	/// If any of the initial workers fails to launch, the ones that did start
	/// are stopped and the launch error is returned.
	pub async fn start(
		language: impl Into<String>,
		image: ImageRef,
		policy: Arc<dyn ScalingPolicy>,
		config: PoolConfig,
		launcher: Arc<dyn WorkerLauncher>,
	) -> Result<Self> {
		let minimum = policy.minimum();
		let (closed_tx, _) = watch::channel(false);
		let inner = Arc::new(PoolInner {
			language: language.into(),
			image,
			policy,
			launcher,
			config,
			state: Mutex::new(PoolState {
				target: minimum,
				..Default::default()
			}),
			available: Notify::new(),
			closed_tx,
			maintenance: Mutex::new(None),
		});

		let results = join_all((0..minimum).map(|_| inner.launch())).await;
		let mut workers = Vec::with_capacity(minimum);
		let mut failure = None;
		for result in results {
			match result {
				Ok(worker) => workers.push(worker),
				Err(err) => {
					failure.get_or_insert(err);
				}
			}
		}
		if let Some(err) = failure {
			join_all(workers.into_iter().map(|w| inner.stop_worker(w))).await;
			return Err(err);
		}

		inner
			.state
			.lock()
			.idle
			.extend(workers.into_iter().map(IdleWorker::new));

		let pool = Self { inner };
		pool.spawn_maintenance();

		info!(
			target = "polyparse.pool",
			language = %pool.inner.language,
			image = %pool.inner.image,
			minimum,
			maximum = pool.inner.policy.maximum(),
			"driver pool started"
		);
		Ok(pool)
	}

	pub fn language(&self) -> &str {
		&self.inner.language
	}

	pub fn image(&self) -> &ImageRef {
		&self.inner.image
	}

	/// Runs one parse on an exclusively held worker.
	///
	/// The worker is returned to the pool on success. A worker that fails,
	/// times out or is interrupted by close is stopped and discarded.
	pub async fn parse(&self, request: ParseRequest) -> Result<ParseResponse> {
		let worker = self.acquire().await?;
		let inner = Arc::clone(&self.inner);
		// Detached so an abandoned caller cannot strand the worker mid-request.
		let task = tokio::spawn(async move { inner.run(worker, request).await });
		match task.await {
			Ok(result) => result,
			Err(err) => Err(self.inner.runtime_error(polyparse_runtime::Error::WorkerExited(format!(
				"parse task failed: {err}"
			)))),
		}
	}

	/// Applies the policy's current decision: launches missing workers and
	/// stops excess idle ones. Returns the target in effect.
	///
	/// Only workers idle for at least the policy cooldown are stopped, and
	/// never below the policy minimum.
	pub async fn resize(&self) -> usize {
		let inner = &self.inner;
		let (target, to_start, to_stop) = {
			let mut state = inner.state.lock();
			if state.closed {
				return 0;
			}
			let target = inner.decide(&mut state);
			let live = state.live();

			let to_start = target.saturating_sub(live);
			state.starting += to_start;

			let mut to_stop = Vec::new();
			let mut excess = live.saturating_sub(target.max(inner.policy.minimum()));
			let cooldown = inner.policy.cooldown();
			let mut i = 0;
			while excess > 0 && i < state.idle.len() {
				if state.idle[i].since.elapsed() >= cooldown {
					to_stop.push(state.idle.remove(i).worker);
					excess -= 1;
				} else {
					i += 1;
				}
			}
			(target, to_start, to_stop)
		};

		if to_start > 0 || !to_stop.is_empty() {
			debug!(
				target = "polyparse.pool",
				language = %inner.language,
				target_size = target,
				starting = to_start,
				stopping = to_stop.len(),
				"resizing pool"
			);
		}

		join_all(to_stop.into_iter().map(|w| inner.stop_worker(w))).await;
		join_all((0..to_start).map(|_| inner.start_idle())).await;

		target
	}

	/// Stops idle workers unused for longer than `timeout`, keeping at least
	/// the policy minimum alive. Returns how many were stopped.
	pub async fn evict_idle(&self, timeout: Duration) -> usize {
		let inner = &self.inner;
		let evicted: Vec<Box<dyn Worker>> = {
			let mut state = inner.state.lock();
			if state.closed {
				return 0;
			}
			let minimum = inner.policy.minimum();
			let mut live = state.live();
			let mut evicted = Vec::new();
			let mut i = 0;
			while live > minimum && i < state.idle.len() {
				if state.idle[i].since.elapsed() > timeout {
					evicted.push(state.idle.remove(i).worker);
					live -= 1;
				} else {
					i += 1;
				}
			}
			evicted
		};

		let count = evicted.len();
		if count > 0 {
			info!(
				target = "polyparse.pool",
				language = %inner.language,
				evicted = count,
				"evicting idle drivers"
			);
			join_all(evicted.into_iter().map(|w| inner.stop_worker(w))).await;
		}
		count
	}

	/// Stops every worker and refuses further work.
	///
	/// In-flight parses are interrupted and their callers receive
	/// [`Error::ClosedPool`]. Idempotent: later calls return `Ok(())`.
	pub async fn close(&self) -> Result<()> {
		let inner = &self.inner;
		let idle = {
			let mut state = inner.state.lock();
			if state.closed {
				return Ok(());
			}
			state.closed = true;
			std::mem::take(&mut state.idle)
		};

		inner.closed_tx.send_replace(true);
		inner.available.notify_waiters();
		if let Some(handle) = inner.maintenance.lock().take() {
			handle.abort();
		}

		debug!(
			target = "polyparse.pool",
			language = %inner.language,
			idle = idle.len(),
			"closing driver pool"
		);

		let results = join_all(idle.into_iter().map(|w| inner.stop_worker(w.worker))).await;
		inner.drain().await;

		info!(target = "polyparse.pool", language = %inner.language, "driver pool closed");
		results.into_iter().collect::<Result<Vec<()>>>().map(|_| ())
	}

	pub fn status(&self) -> PoolStatus {
		let inner = &self.inner;
		let state = inner.state.lock();
		PoolStatus {
			language: inner.language.clone(),
			image: inner.image.to_string(),
			idle: state.idle.len(),
			busy: state.busy,
			starting: state.starting,
			pending: state.pending,
			target: state.target,
			closed: state.closed,
		}
	}

	pub fn info(&self) -> DriverInfo {
		let status = self.status();
		DriverInfo {
			instances: status.instances(),
			language: status.language,
			image: status.image,
			idle: status.idle,
			busy: status.busy,
		}
	}

	pub fn is_closed(&self) -> bool {
		self.inner.state.lock().closed
	}

	async fn acquire(&self) -> Result<Box<dyn Worker>> {
		let inner = &self.inner;
		let timeout = inner.config.acquire_timeout;
		let deadline = tokio::time::Instant::now() + timeout;
		let _pending = PendingGuard::new(inner);

		loop {
			let notified = inner.available.notified();

			let (grow, cooldown_ends) = {
				let mut state = inner.state.lock();
				if state.closed {
					return Err(Error::closed(&inner.language));
				}
				if let Some(idle) = state.idle.pop() {
					state.busy += 1;
					return Ok(idle.worker);
				}
				let target = inner.decide(&mut state).min(inner.policy.maximum());
				if state.live() < target {
					state.starting += 1;
					(true, None)
				} else {
					(false, inner.cooldown_ends(&state))
				}
			};

			if grow {
				return inner.start_for_caller().await;
			}

			// A target held back by the cooldown is re-decided once it lapses,
			// even if no worker frees up in the meantime.
			let recheck = cooldown_ends.filter(|at| *at < deadline);

			tokio::select! {
				_ = notified => {}
				_ = tokio::time::sleep_until(recheck.unwrap_or(deadline)), if recheck.is_some() => {}
				_ = tokio::time::sleep_until(deadline) => {
					let waited_ms = millis(timeout);
					debug!(
						target = "polyparse.pool",
						language = %inner.language,
						waited_ms,
						"no driver became available"
					);
					return Err(Error::PoolTimeout {
						language: inner.language.clone(),
						waited_ms,
					});
				}
			}
		}
	}

	fn spawn_maintenance(&self) {
		let weak: Weak<PoolInner> = Arc::downgrade(&self.inner);
		let interval = self.inner.config.eviction_interval;
		let mut closed_rx = self.inner.closed_tx.subscribe();

		let handle = tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			ticker.tick().await;

			loop {
				tokio::select! {
					_ = closed_rx.wait_for(|closed| *closed) => break,
					_ = ticker.tick() => {}
				}
				let Some(inner) = weak.upgrade() else { break };
				let pool = DriverPool { inner };
				pool.evict_idle(pool.inner.config.idle_timeout).await;
				pool.resize().await;
			}
		});

		*self.inner.maintenance.lock() = Some(handle);
	}
}

impl PoolInner {
	fn runtime_error(&self, source: polyparse_runtime::Error) -> Error {
		Error::Runtime {
			language: self.language.clone(),
			image: self.image.to_string(),
			source,
		}
	}

	async fn launch(&self) -> Result<Box<dyn Worker>> {
		self.launcher
			.start(&self.image)
			.await
			.map_err(|source| self.runtime_error(source))
	}

	/// Consults the policy and records a changed target.
	fn decide(&self, state: &mut PoolState) -> usize {
		let observation = Observation {
			idle: state.idle.len(),
			busy: state.busy,
			pending: state.pending,
			current_target: state.target,
			since_last_decision: state.last_decision.map(|at| at.elapsed()),
		};
		let target = self.policy.decide(&observation);
		if target != state.target {
			debug!(
				target = "polyparse.scaling",
				language = %self.language,
				from = state.target,
				to = target,
				busy = state.busy,
				pending = state.pending,
				"scaling decision"
			);
			state.target = target;
			state.last_decision = Some(Instant::now());
		}
		target
	}

	/// When the current target stops being pinned by the policy cooldown,
	/// if that is still ahead and the pool has room to grow.
	fn cooldown_ends(&self, state: &PoolState) -> Option<tokio::time::Instant> {
		if state.live() >= self.policy.maximum() {
			return None;
		}
		let ends = tokio::time::Instant::from_std(state.last_decision? + self.policy.cooldown());
		(ends > tokio::time::Instant::now()).then_some(ends)
	}

	/// Launches a worker reserved by `acquire` and hands it straight to the caller.
	async fn start_for_caller(&self) -> Result<Box<dyn Worker>> {
		let mut reservation = StartReservation::new(self);
		let worker = self.launch().await?;
		{
			let mut state = self.state.lock();
			if !state.closed {
				state.starting -= 1;
				state.busy += 1;
				reservation.disarm();
				return Ok(worker);
			}
		}
		let _ = self.stop_worker(worker).await;
		Err(Error::closed(&self.language))
	}

	/// Launches a worker reserved by `resize` into the idle set.
	async fn start_idle(&self) {
		let mut reservation = StartReservation::new(self);
		let worker = match self.launch().await {
			Ok(worker) => worker,
			Err(err) => {
				warn!(
					target = "polyparse.pool",
					language = %self.language,
					error = %err,
					"failed to start driver"
				);
				return;
			}
		};
		let rejected = {
			let mut state = self.state.lock();
			if state.closed {
				Some(worker)
			} else {
				state.starting -= 1;
				state.idle.push(IdleWorker::new(worker));
				reservation.disarm();
				None
			}
		};
		if let Some(worker) = rejected {
			let _ = self.stop_worker(worker).await;
		}
		self.available.notify_waiters();
	}

	async fn run(self: Arc<Self>, mut worker: Box<dyn Worker>, request: ParseRequest) -> Result<ParseResponse> {
		let mut slot = BusySlot::new(&self);
		let timeout = request
			.timeout_ms
			.map(Duration::from_millis)
			.unwrap_or(self.config.parse_timeout);
		let mut closed_rx = self.closed_tx.subscribe();

		let outcome = tokio::select! {
			biased;
			_ = closed_rx.wait_for(|closed| *closed) => None,
			result = tokio::time::timeout(timeout, worker.parse(&request)) => Some(result),
		};

		let id = worker.id();
		match outcome {
			Some(Ok(Ok(response))) => {
				slot.check_in(worker).await;
				Ok(response)
			}
			Some(Ok(Err(source))) => {
				warn!(
					target = "polyparse.pool",
					language = %self.language,
					worker = id,
					error = %source,
					"driver failed; discarding"
				);
				slot.discard(worker).await;
				Err(self.runtime_error(source))
			}
			Some(Err(_)) => {
				warn!(
					target = "polyparse.pool",
					language = %self.language,
					worker = id,
					timeout_ms = millis(timeout),
					"parse timed out; discarding driver"
				);
				slot.discard(worker).await;
				Err(self.runtime_error(polyparse_runtime::Error::Timeout(format!(
					"parse exceeded {}ms",
					millis(timeout)
				))))
			}
			None => {
				slot.discard(worker).await;
				Err(Error::closed(&self.language))
			}
		}
	}

	/// Stops a worker that is no longer counted anywhere.
	async fn stop_worker(&self, mut worker: Box<dyn Worker>) -> Result<()> {
		let id = worker.id();
		match tokio::time::timeout(self.config.close_timeout, worker.close()).await {
			Ok(Ok(())) => {
				debug!(target = "polyparse.pool", language = %self.language, worker = id, "driver stopped");
				Ok(())
			}
			Ok(Err(source)) => {
				warn!(
					target = "polyparse.pool",
					language = %self.language,
					worker = id,
					error = %source,
					"driver stop failed"
				);
				Err(self.runtime_error(source))
			}
			Err(_) => {
				warn!(
					target = "polyparse.pool",
					language = %self.language,
					worker = id,
					"driver stop timed out"
				);
				Err(self.runtime_error(polyparse_runtime::Error::Timeout(format!(
					"worker {id} did not stop within {}ms",
					millis(self.config.close_timeout)
				))))
			}
		}
	}

	/// Waits for busy and starting workers to wind down after close.
	async fn drain(&self) {
		let deadline = tokio::time::Instant::now() + self.config.close_timeout;
		loop {
			let notified = self.available.notified();
			{
				let state = self.state.lock();
				if state.busy == 0 && state.starting == 0 {
					return;
				}
			}
			tokio::select! {
				_ = notified => {}
				_ = tokio::time::sleep_until(deadline) => {
					let (busy, starting) = {
						let state = self.state.lock();
						(state.busy, state.starting)
					};
					warn!(
						target = "polyparse.pool",
						language = %self.language,
						busy,
						starting,
						"drivers still running after close timeout"
					);
					return;
				}
			}
		}
	}
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
	u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Counts a caller in `pending` for the lifetime of an acquisition.
struct PendingGuard<'a> {
	inner: &'a PoolInner,
}

impl<'a> PendingGuard<'a> {
	fn new(inner: &'a PoolInner) -> Self {
		inner.state.lock().pending += 1;
		Self { inner }
	}
}

impl Drop for PendingGuard<'_> {
	fn drop(&mut self) {
		self.inner.state.lock().pending -= 1;
	}
}

/// Keeps a checked-out worker counted as busy until it is returned or
/// discarded, including when the parse task unwinds.
struct BusySlot<'a> {
	inner: &'a PoolInner,
	armed: bool,
}

impl<'a> BusySlot<'a> {
	fn new(inner: &'a PoolInner) -> Self {
		Self { inner, armed: true }
	}

	async fn check_in(&mut self, worker: Box<dyn Worker>) {
		let rejected = {
			let mut state = self.inner.state.lock();
			if state.closed {
				Some(worker)
			} else {
				state.busy -= 1;
				state.idle.push(IdleWorker::new(worker));
				self.armed = false;
				None
			}
		};
		if let Some(worker) = rejected {
			let _ = self.inner.stop_worker(worker).await;
		}
		self.release();
		self.inner.available.notify_waiters();
	}

	async fn discard(&mut self, worker: Box<dyn Worker>) {
		let _ = self.inner.stop_worker(worker).await;
		self.release();
	}

	fn release(&mut self) {
		if self.armed {
			self.armed = false;
			self.inner.state.lock().busy -= 1;
			self.inner.available.notify_waiters();
		}
	}
}

impl Drop for BusySlot<'_> {
	fn drop(&mut self) {
		self.release();
	}
}

/// Counts a launch in `starting` until the worker is placed.
struct StartReservation<'a> {
	inner: &'a PoolInner,
	armed: bool,
}

impl<'a> StartReservation<'a> {
	fn new(inner: &'a PoolInner) -> Self {
		Self { inner, armed: true }
	}

	fn disarm(&mut self) {
		self.armed = false;
	}
}

impl Drop for StartReservation<'_> {
	fn drop(&mut self) {
		if self.armed {
			self.inner.state.lock().starting -= 1;
			self.inner.available.notify_waiters();
		}
	}
}
