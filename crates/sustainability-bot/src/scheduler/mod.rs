//! Recurring trait-mining: when to run ([`Cadence`]), how to avoid overlap
//! ([`PeriodicTrigger`]) and what a pass does ([`TraitMiner`]).

pub mod cadence;
pub mod periodic_trigger;
pub mod trait_miner;

use std::sync::Arc;

use futures::FutureExt;
use tracing::info;

pub use cadence::Cadence;
pub use periodic_trigger::{FireOutcome, Job, PeriodicTrigger, SingleFlight, TriggerState};
pub use trait_miner::{BatchReport, TraitMiner, TraitMinerConfig};

use crate::metrics;

/// Owns the trait-mining trigger. Constructed explicitly and started/stopped
/// by the server lifecycle.
pub struct TraitMiningService {
    trigger: PeriodicTrigger,
}

impl TraitMiningService {
    pub fn new(miner: TraitMiner, cadence: Cadence) -> Self {
        let miner = Arc::new(miner);
        let job: Job = Arc::new(move || {
            let miner = Arc::clone(&miner);
            async move {
                match miner.run_batch_pass().await {
                    Ok(report) => {
                        metrics::inc_batch_pass("completed");
                        info!(traits_added = report.traits_added, "scheduled trait mining done");
                        Ok(())
                    }
                    Err(e) => {
                        metrics::inc_batch_pass("failed");
                        Err(e)
                    }
                }
            }
            .boxed()
        });
        Self {
            trigger: PeriodicTrigger::new("trait-mining", cadence, job),
        }
    }

    pub async fn start(&self) -> bool {
        self.trigger.start().await
    }

    pub async fn stop(&self) {
        self.trigger.stop().await
    }

    /// One pass now, skipped if a scheduled pass is still running.
    pub async fn run_now(&self) -> FireOutcome {
        let outcome = self.trigger.fire_now().await;
        if outcome == FireOutcome::Skipped {
            metrics::inc_batch_pass("skipped");
        }
        outcome
    }

    pub fn state(&self) -> TriggerState {
        self.trigger.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::ChatDatabase;
    use crate::model_runtime::{ScriptedRuntime, TokenUsage};
    use std::time::Duration;

    #[tokio::test]
    async fn run_now_completes_on_empty_database() {
        let db = Arc::new(ChatDatabase::new_in_memory().unwrap());
        let runtime = Arc::new(ScriptedRuntime::new(Vec::<String>::new(), TokenUsage::default()));
        let config = TraitMinerConfig { pacing: Duration::ZERO, ..TraitMinerConfig::default() };
        let service = TraitMiningService::new(TraitMiner::new(db, runtime, config), Cadence::default());

        assert_eq!(service.run_now().await, FireOutcome::Completed);
        assert_eq!(service.state(), TriggerState::Idle);
        assert!(service.start().await);
        service.stop().await;
    }
}
