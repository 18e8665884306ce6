//! Scheduler + queue wired together the way the coordinator runs them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cw_core::Credential;
use cw_protocol::{CartCollectParams, CartLineItem, CartSnapshot, error_kind};
use cw_sched::{
	AccountRecord, AccountStore, ExecError, ExecTarget, JobExecutor, JobQueue, MemoryAccountStore,
	MemoryQueue, MemoryResultSink, ResultSink, RetryPolicy, Scheduler, SchedulerConfig,
};
use parking_lot::Mutex;

const NOW: u64 = 1_700_000_000;

struct ScriptedExecutor {
	/// Error kinds to emit per account, consumed in order; empty = succeed.
	script: Mutex<HashMap<String, Vec<&'static str>>>,
}

impl ScriptedExecutor {
	fn succeed_always() -> Self {
		Self {
			script: Mutex::new(HashMap::new()),
		}
	}

	fn with_script(account: &str, kinds: Vec<&'static str>) -> Self {
		let mut map = HashMap::new();
		map.insert(account.to_string(), kinds);
		Self {
			script: Mutex::new(map),
		}
	}
}

#[async_trait]
impl JobExecutor for ScriptedExecutor {
	fn agent_available(&self, _agent_id: &str) -> bool {
		false
	}

	async fn collect_cart(
		&self,
		_target: &ExecTarget,
		params: CartCollectParams,
	) -> Result<CartSnapshot, ExecError> {
		let kind = {
			let mut script = self.script.lock();
			script
				.get_mut(&params.account_id)
				.and_then(|kinds| if kinds.is_empty() { None } else { Some(kinds.remove(0)) })
		};
		match kind {
			Some(kind) => Err(ExecError::new(kind, "scripted failure")),
			None => Ok(CartSnapshot {
				items: vec![CartLineItem {
					listing_id: "l1".into(),
					sku_signature: "s1".into(),
					title: Some("widget".into()),
					image_url: None,
					price_cents: Some(499),
					original_price_cents: None,
					quantity: 2,
				}],
				total_hint: Some(2),
			}),
		}
	}
}

struct Rig {
	store: Arc<MemoryAccountStore>,
	queue: Arc<MemoryQueue>,
	sink: Arc<MemoryResultSink>,
	scheduler: Arc<Scheduler>,
}

fn rig(executor: ScriptedExecutor) -> Rig {
	let store = Arc::new(MemoryAccountStore::new());
	let queue = Arc::new(MemoryQueue::new());
	let sink = Arc::new(MemoryResultSink::new());
	let config = SchedulerConfig {
		job_retry: RetryPolicy {
			max_attempts: 2,
			backoff_base: Duration::from_millis(1),
		},
		..Default::default()
	};
	let scheduler = Scheduler::new(
		Arc::clone(&store) as Arc<dyn AccountStore>,
		Arc::clone(&queue) as Arc<dyn JobQueue>,
		Arc::new(executor),
		Arc::clone(&sink) as Arc<dyn ResultSink>,
		config,
	);
	Rig {
		store,
		queue,
		sink,
		scheduler,
	}
}

fn account(id: &str) -> AccountRecord {
	AccountRecord {
		account_id: id.into(),
		credential: Credential {
			cookies_json: "[]".into(),
		},
		assigned_agent: None,
		owner_user: None,
	}
}

#[tokio::test]
async fn evaluate_enqueue_drain_reports_to_sink() {
	let rig = rig(ScriptedExecutor::succeed_always());
	rig.store.add_account(account("acct-1"));
	rig.store.add_account(account("acct-2"));

	let enqueued = rig.scheduler.evaluate_once(NOW).await.unwrap();
	assert_eq!(enqueued.len(), 2);

	rig.queue.drain(rig.scheduler.processor()).await;

	assert_eq!(rig.sink.snapshot_count(), 2);
	let report = rig.sink.last_report().unwrap();
	assert_eq!(report.updated, 1);
	assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn transient_failure_retries_at_queue_layer_then_succeeds() {
	let rig = rig(ScriptedExecutor::with_script("acct", vec![error_kind::PAGE]));
	rig.store.add_account(account("acct"));

	rig.scheduler.evaluate_once(NOW).await.unwrap();
	rig.queue.drain(rig.scheduler.processor()).await;

	// First attempt failed with a retryable error; the second attempt of
	// the same job succeeded.
	assert_eq!(rig.sink.snapshot_count(), 1);
	let outcomes = rig.store.outcomes();
	assert_eq!(outcomes.len(), 2);
}

#[tokio::test]
async fn captcha_stops_everything_and_leaves_a_trail() {
	let rig = rig(ScriptedExecutor::with_script(
		"acct",
		vec![error_kind::NEEDS_CAPTCHA],
	));
	rig.store.add_account(account("acct"));

	let enqueued = rig.scheduler.evaluate_once(NOW).await.unwrap();
	assert_eq!(enqueued.len(), 1);
	let job_id = format!(
		"cart_scrape:acct:{}",
		NOW / Duration::from_secs(30 * 60).as_secs()
	);

	rig.queue.drain(rig.scheduler.processor()).await;

	assert_eq!(rig.queue.state(&job_id).await, Some(cw_sched::JobState::Failed));
	assert!(rig.store.is_disabled("acct"));
	assert_eq!(rig.store.alerts().len(), 1);
	assert!(rig.scheduler.risk_paused(NOW + 1));
	// Job log explains the stop.
	let logs = rig.queue.logs(&job_id).await;
	assert!(logs.iter().any(|l| l.contains("needs_captcha")));
}
