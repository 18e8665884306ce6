//! Durable job-queue contract and the in-memory reference queue.
//!
//! The production deployment points this contract at a persistent queue;
//! the in-memory implementation here carries the same semantics for
//! wiring and tests: idempotent enqueue by job id, exactly one job in
//! flight per worker, bounded retries with exponential back-off, and
//! structured per-job log lines queryable by id.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::Result;

/// One enqueued unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
	/// Job kind, e.g. `"cart_scrape"`.
	pub kind: String,
	pub payload: Value,
	/// Idempotency key; enqueues sharing it collapse into one job.
	pub job_id: String,
	/// Higher runs first among pending jobs.
	pub priority: i32,
	pub retry: RetryPolicy,
}

/// Queue-level retry policy for one job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
	/// Total attempts including the first.
	pub max_attempts: u32,
	/// First retry delay; doubles per subsequent attempt.
	#[serde(with = "duration_secs")]
	pub backoff_base: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			backoff_base: Duration::from_secs(30),
		}
	}
}

mod duration_secs {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
		s.serialize_u64(d.as_secs())
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
		Ok(Duration::from_secs(u64::deserialize(d)?))
	}
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
	Pending,
	Active,
	Completed,
	Failed,
}

/// Worker-side failure classification. Non-retryable failures (risk
/// signals) fail the job on the spot regardless of remaining attempts.
#[derive(Debug)]
pub struct JobFailure {
	pub message: String,
	pub retryable: bool,
}

impl JobFailure {
	pub fn retryable(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			retryable: true,
		}
	}

	pub fn fatal(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			retryable: false,
		}
	}
}

pub type JobResult = std::result::Result<(), JobFailure>;

/// Processor callback: executes one job, appending log lines as it goes.
pub type Processor =
	Arc<dyn Fn(JobSpec, JobLog) -> Pin<Box<dyn Future<Output = JobResult> + Send>> + Send + Sync>;

/// Append-only log handle for one job.
#[derive(Clone)]
pub struct JobLog {
	job_id: String,
	records: Arc<Mutex<HashMap<String, JobRecord>>>,
}

impl JobLog {
	/// A log handle not backed by any queue record; lines are dropped.
	/// Useful when invoking a processor outside a queue (tests, one-off
	/// CLI runs).
	pub fn detached() -> Self {
		Self {
			job_id: String::new(),
			records: Arc::new(Mutex::new(HashMap::new())),
		}
	}

	pub fn append(&self, line: impl Into<String>) {
		if let Some(record) = self.records.lock().get_mut(&self.job_id) {
			record.logs.push(line.into());
		}
	}
}

/// The external durable queue as the scheduler sees it.
#[async_trait]
pub trait JobQueue: Send + Sync {
	/// Enqueues a job. Returns `false` when the job id is already known
	/// and the enqueue collapsed into the existing job.
	async fn enqueue(&self, spec: JobSpec) -> Result<bool>;

	async fn state(&self, job_id: &str) -> Option<JobState>;

	async fn logs(&self, job_id: &str) -> Vec<String>;
}

struct JobRecord {
	state: JobState,
	logs: Vec<String>,
}

/// In-memory queue with the contract's semantics. One worker, one job at
/// a time.
pub struct MemoryQueue {
	records: Arc<Mutex<HashMap<String, JobRecord>>>,
	fifo: Mutex<VecDeque<JobSpec>>,
	wake: Notify,
}

impl Default for MemoryQueue {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryQueue {
	pub fn new() -> Self {
		Self {
			records: Arc::new(Mutex::new(HashMap::new())),
			fifo: Mutex::new(VecDeque::new()),
			wake: Notify::new(),
		}
	}

	fn take_next(&self) -> Option<JobSpec> {
		let mut fifo = self.fifo.lock();
		// Highest priority first, FIFO within a priority.
		let best = fifo
			.iter()
			.enumerate()
			.max_by(|(ia, a), (ib, b)| a.priority.cmp(&b.priority).then(ib.cmp(ia)))
			.map(|(i, _)| i)?;
		fifo.remove(best)
	}

	/// Runs the single worker until the queue is dropped. Concurrency is
	/// 1 by construction: simultaneous automation on one account family
	/// is exactly what gets sessions flagged.
	pub async fn run_worker(&self, processor: Processor) {
		loop {
			let Some(spec) = self.take_next() else {
				self.wake.notified().await;
				continue;
			};
			self.run_one(&processor, spec).await;
		}
	}

	/// Drains currently queued jobs and returns. Test/shutdown helper.
	pub async fn drain(&self, processor: Processor) {
		while let Some(spec) = self.take_next() {
			self.run_one(&processor, spec).await;
		}
	}

	async fn run_one(&self, processor: &Processor, spec: JobSpec) {
		let job_id = spec.job_id.clone();
		self.set_state(&job_id, JobState::Active);
		let log = JobLog {
			job_id: job_id.clone(),
			records: Arc::clone(&self.records),
		};

		let max_attempts = spec.retry.max_attempts.max(1);
		for attempt in 1..=max_attempts {
			match processor(spec.clone(), log.clone()).await {
				Ok(()) => {
					debug!(target = "cw.sched", job = %job_id, attempt, "job completed");
					self.set_state(&job_id, JobState::Completed);
					return;
				}
				Err(failure) if failure.retryable && attempt < max_attempts => {
					let backoff = spec.retry.backoff_base * 2u32.saturating_pow(attempt - 1);
					warn!(
						target = "cw.sched",
						job = %job_id,
						attempt,
						backoff_secs = backoff.as_secs(),
						error = %failure.message,
						"job attempt failed, backing off"
					);
					log.append(format!("attempt {attempt} failed: {}", failure.message));
					tokio::time::sleep(backoff).await;
				}
				Err(failure) => {
					warn!(target = "cw.sched", job = %job_id, attempt, error = %failure.message, "job failed");
					log.append(format!("failed: {}", failure.message));
					self.set_state(&job_id, JobState::Failed);
					return;
				}
			}
		}
	}

	fn set_state(&self, job_id: &str, state: JobState) {
		if let Some(record) = self.records.lock().get_mut(job_id) {
			record.state = state;
		}
	}
}

#[async_trait]
impl JobQueue for MemoryQueue {
	async fn enqueue(&self, spec: JobSpec) -> Result<bool> {
		{
			let mut records = self.records.lock();
			if records.contains_key(&spec.job_id) {
				debug!(target = "cw.sched", job = %spec.job_id, "duplicate enqueue collapsed");
				return Ok(false);
			}
			records.insert(
				spec.job_id.clone(),
				JobRecord {
					state: JobState::Pending,
					logs: Vec::new(),
				},
			);
		}
		self.fifo.lock().push_back(spec);
		self.wake.notify_one();
		Ok(true)
	}

	async fn state(&self, job_id: &str) -> Option<JobState> {
		self.records.lock().get(job_id).map(|r| r.state)
	}

	async fn logs(&self, job_id: &str) -> Vec<String> {
		self.records
			.lock()
			.get(job_id)
			.map(|r| r.logs.clone())
			.unwrap_or_default()
	}
}

/// Job id derived from a time bucket: re-submitting within the same
/// bucket is a no-op at the queue layer, not a duplicate scrape.
pub fn bucket_job_id(kind: &str, account_id: &str, now: u64, interval: Duration) -> String {
	let bucket = now / interval.as_secs().max(1);
	format!("{kind}:{account_id}:{bucket}")
}
