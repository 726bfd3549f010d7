//! Timer-driven job runner with a single-flight guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::scheduler::Cadence;

pub type Job = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// At most one holder at a time; the holder's guard clears the flag on drop.
#[derive(Clone, Default)]
pub struct SingleFlight {
    running: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn try_acquire(&self) -> Option<FlightGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                running: Arc::clone(&self.running),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

pub struct FlightGuard {
    running: Arc<AtomicBool>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Completed,
    Failed,
    /// A previous run was still in flight.
    Skipped,
}

struct TimerTask {
    handle: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

pub struct PeriodicTrigger {
    name: String,
    cadence: Cadence,
    job: Job,
    flight: SingleFlight,
    timer: Mutex<Option<TimerTask>>,
}

impl PeriodicTrigger {
    pub fn new(name: impl Into<String>, cadence: Cadence, job: Job) -> Self {
        Self {
            name: name.into(),
            cadence,
            job,
            flight: SingleFlight::default(),
            timer: Mutex::new(None),
        }
    }

    pub fn state(&self) -> TriggerState {
        if self.flight.is_running() {
            TriggerState::Running
        } else {
            TriggerState::Idle
        }
    }

    pub async fn is_started(&self) -> bool {
        self.timer.lock().await.is_some()
    }

    /// Run the job once now, under the same guard as timer firings.
    pub async fn fire_now(&self) -> FireOutcome {
        run_guarded(&self.name, &self.flight, &self.job).await
    }

    /// Start the timer loop. Returns false if it is already running.
    pub async fn start(&self) -> bool {
        let mut timer = self.timer.lock().await;
        if timer.is_some() {
            return false;
        }

        let (stop, mut stop_rx) = watch::channel(false);
        let name = self.name.clone();
        let cadence = self.cadence;
        let job = Arc::clone(&self.job);
        let flight = self.flight.clone();

        let handle = tokio::spawn(async move {
            loop {
                let now = chrono::Local::now();
                let Some(next) = cadence.next_after(&now) else {
                    error!(trigger = %name, "cadence has no future firing, stopping timer");
                    break;
                };
                let wait = (next.clone() - now).to_std().unwrap_or(Duration::ZERO);
                info!(trigger = %name, next_run = %next.to_rfc3339(), "scheduled next run");

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {
                        let (name, job, flight) = (name.clone(), Arc::clone(&job), flight.clone());
                        // Not awaited: a firing during a long run must observe the guard.
                        tokio::spawn(async move {
                            run_guarded(&name, &flight, &job).await;
                        });
                    }
                    _ = stop_rx.changed() => {
                        debug!(trigger = %name, "timer loop stopping");
                        break;
                    }
                }
            }
        });

        info!(trigger = %self.name, cadence = %self.cadence, "trigger started");
        *timer = Some(TimerTask { handle, stop });
        true
    }

    /// Stop the timer loop. A run already in flight finishes on its own.
    pub async fn stop(&self) {
        let Some(task) = self.timer.lock().await.take() else {
            return;
        };
        let _ = task.stop.send(true);
        if let Err(e) = task.handle.await {
            warn!(trigger = %self.name, error = %e, "timer task ended abnormally");
        }
        info!(trigger = %self.name, "trigger stopped");
    }
}

async fn run_guarded(name: &str, flight: &SingleFlight, job: &Job) -> FireOutcome {
    let Some(guard) = flight.try_acquire() else {
        warn!(trigger = %name, "previous run still in progress, skipping this firing");
        return FireOutcome::Skipped;
    };

    let run = job();
    // The guard lives in the spawned task so a panicking job still releases it.
    let result = tokio::spawn(async move {
        let _guard = guard;
        run.await
    })
    .await;

    match result {
        Ok(Ok(())) => FireOutcome::Completed,
        Ok(Err(e)) => {
            error!(trigger = %name, error = %e, "scheduled run failed");
            FireOutcome::Failed
        }
        Err(e) => {
            error!(trigger = %name, error = %e, "scheduled run panicked");
            FireOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn counting_job(counter: Arc<AtomicUsize>, release: Arc<Notify>) -> Job {
        Arc::new(move || {
            let counter = Arc::clone(&counter);
            let release = Arc::clone(&release);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                release.notified().await;
                Ok::<(), ChatError>(())
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn overlapping_fire_is_skipped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());
        let trigger = Arc::new(PeriodicTrigger::new(
            "test",
            Cadence::default(),
            counting_job(Arc::clone(&counter), Arc::clone(&release)),
        ));

        let first = tokio::spawn({
            let trigger = Arc::clone(&trigger);
            async move { trigger.fire_now().await }
        });
        while trigger.state() != TriggerState::Running {
            tokio::task::yield_now().await;
        }

        assert_eq!(trigger.fire_now().await, FireOutcome::Skipped);
        release.notify_one();
        assert_eq!(first.await.unwrap(), FireOutcome::Completed);
        assert_eq!(trigger.state(), TriggerState::Idle);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_and_panics_return_to_idle() {
        let failing: Job = Arc::new(|| async { Err::<(), ChatError>(ChatError::Storage("down".into())) }.boxed());
        let trigger = PeriodicTrigger::new("failing", Cadence::default(), failing);
        assert_eq!(trigger.fire_now().await, FireOutcome::Failed);
        assert_eq!(trigger.state(), TriggerState::Idle);

        let panicking: Job = Arc::new(|| {
            async {
                if true {
                    panic!("boom");
                }
                Ok::<(), ChatError>(())
            }
            .boxed()
        });
        let trigger = PeriodicTrigger::new("panicking", Cadence::default(), panicking);
        assert_eq!(trigger.fire_now().await, FireOutcome::Failed);
        assert_eq!(trigger.state(), TriggerState::Idle);
        assert_eq!(trigger.fire_now().await, FireOutcome::Failed);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_ends_the_loop() {
        let job: Job = Arc::new(|| async { Ok::<(), ChatError>(()) }.boxed());
        let trigger = PeriodicTrigger::new("lifecycle", Cadence::default(), job);

        assert!(trigger.start().await);
        assert!(!trigger.start().await);
        assert!(trigger.is_started().await);

        trigger.stop().await;
        assert!(!trigger.is_started().await);
        trigger.stop().await;
        assert!(trigger.start().await);
        trigger.stop().await;
    }

    #[test]
    fn guard_release_on_drop() {
        let flight = SingleFlight::default();
        let guard = flight.try_acquire().unwrap();
        assert!(flight.try_acquire().is_none());
        drop(guard);
        assert!(flight.try_acquire().is_some());
    }
}
