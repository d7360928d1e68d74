//! Retry scheduler. Drives the fan-out pipeline's delivery attempts,
//! subscription resync, and trust handshake retries (spec.md §4.6, §5.2):
//! anything that must run again later with exponential backoff after a
//! failure, without blocking the request that triggered it.

use async_trait::async_trait;
use std::{
	collections::BTreeMap,
	fmt::Debug,
	sync::Arc,
};

use actingweb_types::prelude::*;
use parking_lot::Mutex;

pub type TaskId = u64;

/// A unit of retryable work. `S` is the shared application state passed into
/// `run` - typically the engine's `App` handle - so a task can reach storage,
/// the HTTP client, or other adapters without capturing them itself.
#[async_trait]
pub trait Task<S: Clone>: Send + Sync + Debug {
	/// Stable name used to route a task back to its handler after a restart.
	fn kind(&self) -> &'static str;
	async fn run(&self, state: &S) -> ClResult<()>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
	wait_min_max: (u64, u64),
	times: u16,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self { wait_min_max: (1, 3600), times: 10 }
	}
}

impl RetryPolicy {
	pub fn new(wait_min_max: (u64, u64), times: u16) -> Self {
		Self { wait_min_max, times }
	}

	/// Exponential backoff in seconds: `min * 2^attempt`, capped at `max`.
	pub fn calculate_backoff(&self, attempt_count: u16) -> u64 {
		let (min, max) = self.wait_min_max;
		let backoff = min.saturating_mul(1u64 << u64::from(attempt_count.min(63)));
		backoff.min(max)
	}

	pub fn should_retry(&self, attempt_count: u16) -> bool {
		attempt_count < self.times
	}
}

struct TaskMeta<S: Clone> {
	task: Arc<dyn Task<S>>,
	retry: Option<RetryPolicy>,
	retry_count: u16,
}

impl<S: Clone> Clone for TaskMeta<S> {
	fn clone(&self) -> Self {
		Self { task: self.task.clone(), retry: self.retry.clone(), retry_count: self.retry_count }
	}
}

/// Fluent API for scheduling a task, mirroring the settings/trust builders
/// used elsewhere in the engine.
pub struct TaskSchedulerBuilder<'a, S: Clone> {
	scheduler: &'a Scheduler<S>,
	task: Arc<dyn Task<S>>,
	next_at: Option<Timestamp>,
	retry: Option<RetryPolicy>,
}

impl<'a, S: Clone + Send + Sync + 'static> TaskSchedulerBuilder<'a, S> {
	fn new(scheduler: &'a Scheduler<S>, task: Arc<dyn Task<S>>) -> Self {
		Self { scheduler, task, next_at: None, retry: None }
	}

	pub fn schedule_at(mut self, timestamp: Timestamp) -> Self {
		self.next_at = Some(timestamp);
		self
	}

	pub fn schedule_after(mut self, seconds: i64) -> Self {
		self.next_at = Some(Timestamp::from_now(seconds));
		self
	}

	pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
		self.retry = Some(policy);
		self
	}

	pub fn with_automatic_retry(mut self) -> Self {
		self.retry = Some(RetryPolicy::default());
		self
	}

	pub async fn now(self) -> TaskId {
		self.scheduler.schedule_impl(self.task, self.next_at, self.retry)
	}

	pub async fn after(mut self, seconds: i64) -> TaskId {
		self.next_at = Some(Timestamp::from_now(seconds));
		self.scheduler.schedule_impl(self.task, self.next_at, self.retry)
	}
}

type ScheduledTaskMap<S> = BTreeMap<(Timestamp, TaskId), TaskMeta<S>>;

/// Runs scheduled tasks on their due timestamp and re-enqueues failures with
/// backoff until their retry policy is exhausted. One instance is shared for
/// the whole process; call [`Scheduler::start`] once after construction.
pub struct Scheduler<S: Clone> {
	next_id: Mutex<TaskId>,
	scheduled: Arc<Mutex<ScheduledTaskMap<S>>>,
	notify: Arc<tokio::sync::Notify>,
}

impl<S: Clone + Send + Sync + 'static> Scheduler<S> {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			next_id: Mutex::new(0),
			scheduled: Arc::new(Mutex::new(BTreeMap::new())),
			notify: Arc::new(tokio::sync::Notify::new()),
		})
	}

	pub fn task(&self, task: Arc<dyn Task<S>>) -> TaskSchedulerBuilder<'_, S> {
		TaskSchedulerBuilder::new(self, task)
	}

	fn schedule_impl(&self, task: Arc<dyn Task<S>>, next_at: Option<Timestamp>, retry: Option<RetryPolicy>) -> TaskId {
		let id = {
			let mut next_id = self.next_id.lock();
			*next_id += 1;
			*next_id
		};
		let due = next_at.unwrap_or_else(Timestamp::now);
		self.scheduled.lock().insert((due, id), TaskMeta { task, retry, retry_count: 0 });
		self.notify.notify_one();
		id
	}

	/// Spawns the background loop that pops due tasks and runs them,
	/// re-scheduling a failed task at `now + backoff(attempt)` if its
	/// `RetryPolicy` allows another attempt.
	pub fn start(&self, state: S)
	where
		S: 'static,
	{
		let scheduled = self.scheduled.clone();
		let notify = self.notify.clone();

		tokio::spawn(async move {
			loop {
				let next_due = { scheduled.lock().keys().next().map(|(ts, _)| *ts) };

				match next_due {
					None => notify.notified().await,
					Some(due) => {
						let now = Timestamp::now();
						if due > now {
							let wait = (due.0 - now.0).max(0) as u64;
							tokio::select! {
								() = tokio::time::sleep(std::time::Duration::from_secs(wait)) => {}
								() = notify.notified() => {}
							}
							continue;
						}

						let due_id = { scheduled.lock().keys().next().copied() };
						let Some(key) = due_id else { continue };
						let Some(meta) = scheduled.lock().remove(&key) else { continue };

						let state = state.clone();
						let scheduled = scheduled.clone();
						let notify = notify.clone();
						tokio::spawn(async move {
							if let Err(err) = meta.task.run(&state).await {
								tracing::warn!(kind = meta.task.kind(), error = %err, "task failed");
								if let Some(policy) = &meta.retry {
									if policy.should_retry(meta.retry_count) {
										let backoff = policy.calculate_backoff(meta.retry_count);
										let due = Timestamp::from_now(backoff as i64);
										scheduled.lock().insert(
											(due, key.1),
											TaskMeta {
												task: meta.task.clone(),
												retry: meta.retry.clone(),
												retry_count: meta.retry_count + 1,
											},
										);
										notify.notify_one();
									}
								}
							}
						});
					}
				}
			}
		});
	}
}

impl<S: Clone> Default for Scheduler<S> {
	fn default() -> Self {
		Self { next_id: Mutex::new(0), scheduled: Arc::new(Mutex::new(BTreeMap::new())), notify: Arc::new(tokio::sync::Notify::new()) }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn backoff_doubles_and_caps() {
		let policy = RetryPolicy::new((1, 10), 5);
		assert_eq!(policy.calculate_backoff(0), 1);
		assert_eq!(policy.calculate_backoff(1), 2);
		assert_eq!(policy.calculate_backoff(2), 4);
		assert_eq!(policy.calculate_backoff(10), 10);
	}

	#[test]
	fn should_retry_respects_limit() {
		let policy = RetryPolicy::new((1, 10), 3);
		assert!(policy.should_retry(0));
		assert!(policy.should_retry(2));
		assert!(!policy.should_retry(3));
	}

	#[derive(Debug, Clone)]
	struct Noop;

	#[async_trait]
	impl Task<()> for Noop {
		fn kind(&self) -> &'static str {
			"noop"
		}
		async fn run(&self, _state: &()) -> ClResult<()> {
			Ok(())
		}
	}

	#[tokio::test]
	async fn schedule_now_assigns_increasing_ids() {
		let scheduler: Arc<Scheduler<()>> = Scheduler::new();
		let a = scheduler.task(Arc::new(Noop)).now().await;
		let b = scheduler.task(Arc::new(Noop)).now().await;
		assert!(b > a);
	}
}

// vim: ts=4
