use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use crate::{orchestrator::Orchestrator, registry::TaskId};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub reaped: usize,
    pub stalled: Vec<TaskId>,
}

impl Orchestrator {
    /// One pass of both background sweeps.
    ///
    /// Stalled tasks are failed in the registry and their workers are told to
    /// stop; finished tasks past the retention window are dropped.
    pub fn sweep(&self) -> SweepReport {
        let config = self.config();
        let stalled = self.registry().fail_stalled(config.stall_window());
        {
            let live = self.live();
            for task_id in &stalled {
                if let Some(task) = live.get(task_id) {
                    task.cancel.cancel();
                }
            }
        }
        let reaped = self.registry().reap(config.retention());

        SweepReport { reaped, stalled }
    }

    /// Run [`Orchestrator::sweep`] every `sweep_interval` until `shutdown` fires.
    pub fn spawn_supervisor(&self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(this.config().sweep_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!(interval = ?this.config().sweep_interval(), "supervisor started");

            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        let report = this.sweep();
                        if report.reaped > 0 || !report.stalled.is_empty() {
                            tracing::debug!(reaped = report.reaped, stalled = report.stalled.len(), "sweep");
                        }
                    }
                }
            }

            tracing::debug!("supervisor stopped");
        })
    }
}
