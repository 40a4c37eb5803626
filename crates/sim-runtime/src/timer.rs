//! Cancellable auto-advance timer.

use std::sync::Weak;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::session::{AdvanceOrigin, SessionInner};
use sim_core::ErrorKind;

/// A running timer task. Dropping it also stops the task, but only
/// [`TimerTask::stop`] waits for an in-flight boundary to finish.
#[derive(Debug)]
pub(crate) struct TimerTask {
    stop: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl TimerTask {
    /// Fire every `cadence`, first one full cadence from now.
    pub(crate) fn spawn(session: Weak<SessionInner>, cadence: Duration) -> Self {
        let (stop, mut stop_rx) = oneshot::channel::<()>();
        let join = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + cadence, cadence);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = ticks.tick() => {
                        let Some(inner) = session.upgrade() else { break };
                        match inner.advance(AdvanceOrigin::Timer).await {
                            Ok(report) => debug!(turn = report.to_turn, "timer advanced turn"),
                            Err(e) if matches!(e.kind(), ErrorKind::Conflict | ErrorKind::InvalidState) => {
                                debug!(error = %e, "timer tick skipped");
                            }
                            Err(e) => warn!(error = %e, "timer tick failed"),
                        }
                    }
                }
            }
            debug!("turn timer stopped");
        });
        debug!(cadence_secs = cadence.as_secs(), "turn timer started");
        Self { stop, join }
    }

    /// Signal the task and wait until it has exited.
    pub(crate) async fn stop(self) {
        // Send fails only if the task already exited.
        let _ = self.stop.send(());
        if let Err(e) = self.join.await {
            warn!(error = %e, "turn timer task ended abnormally");
        }
    }
}
