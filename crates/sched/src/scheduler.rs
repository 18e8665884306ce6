//! The scheduling loop and job dispatch.
//!
//! Per-account lifecycle: `Idle → Due → Enqueued → Running → {Idle |
//! RiskPaused}`. A fixed-cadence poll evaluates every active account
//! against its jittered due threshold and enqueues a time-bucketed job;
//! the queue's single worker executes it against whichever surface the
//! account is bound to - its assigned agent, the owning user's preferred
//! agent, or the local session manager. Risk signals disable the account,
//! alert the operator, and pause the whole loop with exponential
//! back-off; ordinary failures count toward a per-account cooldown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::NaiveTime;
use cw_protocol::{CartCollectParams, CartSnapshot, ScrapeReport, error_kind};
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::due::is_due;
use crate::error::Result;
use crate::queue::{JobFailure, JobLog, JobQueue, JobResult, JobSpec, Processor, RetryPolicy, bucket_job_id};
use crate::quiet::QuietHours;
use crate::risk::RiskState;
use crate::store::{AccountRecord, AccountStore, ResultSink, ScrapeOutcome};

/// Job kind for scheduled cart re-scrapes.
pub const JOB_CART_SCRAPE: &str = "cart_scrape";

/// Where a job executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecTarget {
	/// This process's own session manager.
	Local,
	/// A remote agent reachable through the hub.
	Agent(String),
}

/// Execution failure with the wire's stable error kind.
#[derive(Debug, Clone)]
pub struct ExecError {
	pub kind: String,
	pub message: String,
}

impl ExecError {
	pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			kind: kind.into(),
			message: message.into(),
		}
	}

	pub fn is_risk_signal(&self) -> bool {
		self.kind == error_kind::NEEDS_LOGIN || self.kind == error_kind::NEEDS_CAPTCHA
	}
}

/// Executes scrape operations on a chosen target. Implemented over the
/// local session manager and the hub by the binary crate.
#[async_trait]
pub trait JobExecutor: Send + Sync {
	/// Whether the named agent is reachable right now.
	fn agent_available(&self, agent_id: &str) -> bool;

	async fn collect_cart(
		&self,
		target: &ExecTarget,
		params: CartCollectParams,
	) -> std::result::Result<CartSnapshot, ExecError>;
}

/// Tunables for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
	/// Base re-scrape interval; actual spacing jitters in
	/// `[0.5×base, 1.5×base]`.
	pub base_interval: Duration,
	/// Poll loop cadence.
	pub poll_cadence: Duration,
	pub quiet_hours: Option<QuietHours>,
	/// Consecutive ordinary failures before an account cools down.
	pub cooldown_threshold: u32,
	/// Cooldown length once the threshold trips.
	pub cooldown: Duration,
	pub job_retry: RetryPolicy,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			base_interval: Duration::from_secs(30 * 60),
			poll_cadence: Duration::from_secs(10),
			quiet_hours: None,
			cooldown_threshold: 5,
			cooldown: Duration::from_secs(30 * 60),
			job_retry: RetryPolicy::default(),
		}
	}
}

#[derive(Debug, Default, Clone, Copy)]
struct ScheduleState {
	last_run_at: u64,
	is_running: bool,
	cooldown_until: u64,
}

/// Decides when each account re-scrapes and drives job execution.
pub struct Scheduler {
	store: Arc<dyn AccountStore>,
	queue: Arc<dyn JobQueue>,
	executor: Arc<dyn JobExecutor>,
	sink: Arc<dyn ResultSink>,
	config: SchedulerConfig,
	schedule: Mutex<HashMap<String, ScheduleState>>,
	risk: Mutex<RiskState>,
	error_counts: Mutex<HashMap<String, u32>>,
}

impl Scheduler {
	pub fn new(
		store: Arc<dyn AccountStore>,
		queue: Arc<dyn JobQueue>,
		executor: Arc<dyn JobExecutor>,
		sink: Arc<dyn ResultSink>,
		config: SchedulerConfig,
	) -> Arc<Self> {
		Arc::new(Self {
			store,
			queue,
			executor,
			sink,
			config,
			schedule: Mutex::new(HashMap::new()),
			risk: Mutex::new(RiskState::new()),
			error_counts: Mutex::new(HashMap::new()),
		})
	}

	/// Runs the poll loop until the scheduler is dropped.
	pub async fn run(self: Arc<Self>) {
		let mut ticker = tokio::time::interval(self.config.poll_cadence);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		loop {
			ticker.tick().await;
			if let Err(err) = self.evaluate_once(now_ts()).await {
				warn!(target = "cw.sched", error = %err, "evaluation tick failed");
			}
		}
	}

	/// One evaluation pass: enqueues a job for every account that is due.
	/// Returns the accounts enqueued this pass.
	pub async fn evaluate_once(&self, now: u64) -> Result<Vec<String>> {
		self.evaluate_at(now, local_time_of_day()).await
	}

	/// Evaluation with an explicit wall-clock time, for tests.
	pub async fn evaluate_at(&self, now: u64, local: NaiveTime) -> Result<Vec<String>> {
		if self.risk.lock().is_paused(now) {
			debug!(target = "cw.sched", "risk pause active, scheduling nothing");
			return Ok(Vec::new());
		}
		if let Some(quiet) = &self.config.quiet_hours {
			if quiet.contains(local) {
				debug!(target = "cw.sched", "quiet hours, scheduling nothing");
				return Ok(Vec::new());
			}
		}

		let mut enqueued = Vec::new();
		for account_id in self.store.list_active().await? {
			let state = {
				let schedule = self.schedule.lock();
				schedule.get(&account_id).copied().unwrap_or_default()
			};
			if state.is_running || now < state.cooldown_until {
				continue;
			}
			if !is_due(&account_id, state.last_run_at, self.config.base_interval, now) {
				continue;
			}

			let spec = JobSpec {
				kind: JOB_CART_SCRAPE.into(),
				payload: json!({ "accountId": account_id }),
				job_id: bucket_job_id(JOB_CART_SCRAPE, &account_id, now, self.config.base_interval),
				priority: 0,
				retry: self.config.job_retry,
			};
			if self.queue.enqueue(spec).await? {
				debug!(target = "cw.sched", account = %account_id, "job enqueued");
				enqueued.push(account_id);
			}
		}
		Ok(enqueued)
	}

	/// Builds the queue processor callback bound to this scheduler.
	pub fn processor(self: &Arc<Self>) -> Processor {
		let scheduler = Arc::clone(self);
		Arc::new(move |spec, log| {
			let scheduler = Arc::clone(&scheduler);
			Box::pin(async move { scheduler.process_job(spec, log).await })
		})
	}

	/// Executes one job. Called by the queue worker, one job at a time.
	pub async fn process_job(&self, spec: JobSpec, log: JobLog) -> JobResult {
		self.process_job_at(spec, log, now_ts(), local_time_of_day()).await
	}

	/// Job execution with explicit clocks, for tests.
	pub async fn process_job_at(
		&self,
		spec: JobSpec,
		log: JobLog,
		now: u64,
		local: NaiveTime,
	) -> JobResult {
		let account_id = spec
			.payload
			.get("accountId")
			.and_then(|v| v.as_str())
			.ok_or_else(|| JobFailure::fatal("job payload missing accountId"))?
			.to_string();

		// The worker re-checks suppression before any network work: the
		// job may have sat queued across a window boundary.
		if let Some(quiet) = &self.config.quiet_hours {
			if quiet.contains(local) {
				log.append("skipped: quiet hours");
				return Ok(());
			}
		}
		if self.risk.lock().is_paused(now) {
			log.append("skipped: risk pause");
			return Ok(());
		}

		let Some(record) = self.store.find_active(&account_id).await.map_err(store_failure)? else {
			return Err(JobFailure::fatal(format!("account {account_id} not active")));
		};

		self.set_running(&account_id, true);
		let target = self.route(&record).await;
		info!(target = "cw.sched", account = %account_id, ?target, "running cart scrape");
		log.append(format!("target: {target:?}"));

		let params = CartCollectParams {
			account_id: account_id.clone(),
			expected_listing_ids: Vec::new(),
		};
		let outcome = self.executor.collect_cart(&target, params).await;

		{
			let mut schedule = self.schedule.lock();
			let state = schedule.entry(account_id.clone()).or_default();
			state.is_running = false;
			state.last_run_at = now;
		}

		match outcome {
			Ok(snapshot) => {
				self.risk.lock().record_success();
				self.error_counts.lock().remove(&account_id);
				let report = ScrapeReport {
					updated: snapshot.items.len() as u32,
					missing: 0,
					failed: 0,
				};
				log.append(format!("collected {} items", snapshot.items.len()));
				self.sink
					.cart_snapshot(&account_id, snapshot, report)
					.await
					.map_err(store_failure)?;
				self.store
					.record_outcome(&account_id, ScrapeOutcome::Success)
					.await
					.map_err(store_failure)?;
				Ok(())
			}
			Err(err) if err.is_risk_signal() => {
				let pause = self.risk.lock().record_risk(now);
				let outcome = if err.kind == error_kind::NEEDS_LOGIN {
					ScrapeOutcome::NeedsLogin
				} else {
					ScrapeOutcome::NeedsCaptcha
				};
				log.append(format!("risk signal: {}", err.kind));
				// Deliberately not retried: hammering a challenged session
				// invites account-level penalties.
				let _ = self.store.record_outcome(&account_id, outcome).await;
				let _ = self.store.disable(&account_id, &err.kind).await;
				let _ = self
					.store
					.raise_alert(
						&account_id,
						&format!(
							"{} on {account_id}; account disabled, scheduling paused {}s",
							err.kind,
							pause.as_secs()
						),
					)
					.await;
				Err(JobFailure::fatal(err.message))
			}
			Err(err) => {
				let errors = {
					let mut counts = self.error_counts.lock();
					let n = counts.entry(account_id.clone()).or_insert(0);
					*n += 1;
					*n
				};
				log.append(format!("error ({errors} consecutive): {}", err.message));
				let _ = self
					.store
					.record_outcome(&account_id, ScrapeOutcome::Error(err.message.clone()))
					.await;
				if errors >= self.config.cooldown_threshold {
					warn!(
						target = "cw.sched",
						account = %account_id,
						errors,
						"error threshold reached, cooling account down"
					);
					let mut schedule = self.schedule.lock();
					let state = schedule.entry(account_id.clone()).or_default();
					state.cooldown_until = now + self.config.cooldown.as_secs();
					self.error_counts.lock().remove(&account_id);
				}
				Err(JobFailure::retryable(err.message))
			}
		}
	}

	/// Routing: assigned agent, then the owning user's preferred agent,
	/// then local execution. Unreachable agents fall through.
	async fn route(&self, record: &AccountRecord) -> ExecTarget {
		if let Some(agent_id) = &record.assigned_agent {
			if self.executor.agent_available(agent_id) {
				return ExecTarget::Agent(agent_id.clone());
			}
			debug!(target = "cw.sched", agent = %agent_id, "assigned agent unreachable");
		}
		if let Some(owner) = &record.owner_user {
			if let Ok(Some(agent_id)) = self.store.preferred_agent(owner).await {
				if self.executor.agent_available(&agent_id) {
					return ExecTarget::Agent(agent_id);
				}
			}
		}
		ExecTarget::Local
	}

	fn set_running(&self, account_id: &str, running: bool) {
		let mut schedule = self.schedule.lock();
		schedule.entry(account_id.to_string()).or_default().is_running = running;
	}

	/// Whether the risk pause is active, for status output.
	pub fn risk_paused(&self, now: u64) -> bool {
		self.risk.lock().is_paused(now)
	}
}

fn store_failure(err: crate::error::SchedError) -> JobFailure {
	JobFailure::retryable(err.to_string())
}

fn now_ts() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs()
}

fn local_time_of_day() -> NaiveTime {
	chrono::Local::now().time()
}
