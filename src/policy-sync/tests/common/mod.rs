//! Shared fakes for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use iam_policy_sync::{Policy, ResourceUpdater, Sleeper, UpdaterError, UpdaterResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant};

static TRACING: Once = Once::new();

/// Install a `RUST_LOG` controlled subscriber once per test binary
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Scripted outcome of one `fetch_policy` call
#[derive(Debug, Clone)]
pub enum FetchStep {
    /// Return the stored policy
    Current,
    /// Return an outdated copy, as an eventually consistent read would
    Stale(Policy),
    /// Report that the policy does not exist yet
    Missing,
    Fail(UpdaterError),
}

/// Scripted outcome of one `replace_policy` call
#[derive(Debug, Clone)]
pub enum WriteStep {
    /// Apply the write with the usual version token check
    Accept,
    Fail(UpdaterError),
    /// Another writer lands first, then the write fails with the error
    FailAfterConcurrentWrite(UpdaterError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Fetch,
    Write,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub caller: String,
    pub call: Call,
    pub at: Instant,
}

/// Span between the fetch a write was based on and the write itself
#[derive(Debug, Clone)]
pub struct ModifyingWindow {
    pub caller: String,
    pub enter: usize,
    pub exit: usize,
}

struct Remote {
    policy: Mutex<Policy>,
    generation: AtomicU64,
    fetch_script: Mutex<VecDeque<FetchStep>>,
    write_script: Mutex<VecDeque<WriteStep>>,
    events: Mutex<Vec<Event>>,
    written: Mutex<Vec<Policy>>,
}

/// Remote policy store whose responses can be scripted call by call
///
/// Handles created with [`ScriptedUpdater::handle`] share the store and the
/// event log but tag their calls with their own caller name.
#[derive(Clone)]
pub struct ScriptedUpdater {
    remote: Arc<Remote>,
    key: String,
    description: String,
    caller: String,
}

impl ScriptedUpdater {
    pub fn new(key: &str, description: &str, policy: Policy) -> Self {
        Self {
            remote: Arc::new(Remote {
                policy: Mutex::new(policy),
                generation: AtomicU64::new(1),
                fetch_script: Mutex::new(VecDeque::new()),
                write_script: Mutex::new(VecDeque::new()),
                events: Mutex::new(Vec::new()),
                written: Mutex::new(Vec::new()),
            }),
            key: key.to_string(),
            description: description.to_string(),
            caller: "main".to_string(),
        }
    }

    pub fn handle(&self, caller: &str) -> Self {
        Self {
            caller: caller.to_string(),
            ..self.clone()
        }
    }

    pub fn script_fetches(&self, steps: impl IntoIterator<Item = FetchStep>) {
        self.remote.fetch_script.lock().unwrap().extend(steps);
    }

    pub fn script_writes(&self, steps: impl IntoIterator<Item = WriteStep>) {
        self.remote.write_script.lock().unwrap().extend(steps);
    }

    pub fn current(&self) -> Policy {
        self.remote.policy.lock().unwrap().clone()
    }

    /// Policies accepted so far, in order
    pub fn written(&self) -> Vec<Policy> {
        self.remote.written.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.remote.events.lock().unwrap().clone()
    }

    pub fn count(&self, call: Call) -> usize {
        self.events().iter().filter(|e| e.call == call).count()
    }

    /// One window per write: from the caller's preceding fetch to the write
    pub fn modifying_windows(&self) -> Vec<ModifyingWindow> {
        let events = self.events();
        let mut windows = Vec::new();
        for (exit, event) in events.iter().enumerate() {
            if event.call != Call::Write {
                continue;
            }
            let enter = events[..exit]
                .iter()
                .rposition(|e| e.call == Call::Fetch && e.caller == event.caller)
                .unwrap_or(exit);
            windows.push(ModifyingWindow {
                caller: event.caller.clone(),
                enter,
                exit,
            });
        }
        windows
    }

    fn record(&self, call: Call) {
        self.remote.events.lock().unwrap().push(Event {
            caller: self.caller.clone(),
            call,
            at: Instant::now(),
        });
    }

    fn bump_etag(&self, policy: &mut Policy) {
        let generation = self.remote.generation.fetch_add(1, Ordering::SeqCst) + 1;
        policy.etag = format!("v{generation}");
    }
}

#[async_trait]
impl ResourceUpdater for ScriptedUpdater {
    async fn fetch_policy(&self) -> UpdaterResult<Option<Policy>> {
        self.record(Call::Fetch);
        tokio::task::yield_now().await;

        let step = self.remote.fetch_script.lock().unwrap().pop_front();
        match step.unwrap_or(FetchStep::Current) {
            FetchStep::Current => Ok(Some(self.current())),
            FetchStep::Stale(policy) => Ok(Some(policy)),
            FetchStep::Missing => Ok(None),
            FetchStep::Fail(err) => Err(err),
        }
    }

    async fn replace_policy(&self, policy: &Policy) -> UpdaterResult<()> {
        self.record(Call::Write);
        tokio::task::yield_now().await;

        let step = self.remote.write_script.lock().unwrap().pop_front();
        let mut stored = self.remote.policy.lock().unwrap();
        match step.unwrap_or(WriteStep::Accept) {
            WriteStep::Accept => {
                if stored.etag != policy.etag {
                    return Err(UpdaterError::Conflict(format!(
                        "etag {} is stale, current is {}",
                        policy.etag, stored.etag
                    )));
                }
                let mut next = policy.clone();
                self.bump_etag(&mut next);
                *stored = next.clone();
                self.remote.written.lock().unwrap().push(next);
                Ok(())
            }
            WriteStep::Fail(err) => Err(err),
            WriteStep::FailAfterConcurrentWrite(err) => {
                self.bump_etag(&mut stored);
                Err(err)
            }
        }
    }

    fn resource_key(&self) -> String {
        self.key.clone()
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

/// Records requested delays and returns without waiting
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }

    pub fn total(&self) -> Duration {
        self.delays().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}

pub fn secs(values: &[u64]) -> Vec<Duration> {
    values.iter().copied().map(Duration::from_secs).collect()
}
