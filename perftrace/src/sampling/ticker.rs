use std::sync::Weak;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SamplerError {
    #[error("periodic task requires a running tokio runtime")]
    NoRuntime,
    #[error("periodic task interval must be non-zero")]
    ZeroInterval,
}

/// Handle of a spawned periodic loop. Dropping it also ends the loop.
pub(crate) struct PeriodicTask {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.handle.abort();
    }
}

/// Calls `tick` every `interval` for as long as `target` is alive and the
/// returned handle has not been stopped or dropped. The loop never holds a
/// strong reference between ticks.
pub(crate) fn spawn_periodic<T: Send + Sync + 'static>(
    target: Weak<T>,
    interval: Duration,
    tick: fn(&T),
) -> Result<PeriodicTask, SamplerError> {
    if interval.is_zero() {
        return Err(SamplerError::ZeroInterval)
    }
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| SamplerError::NoRuntime)?;
    let (shutdown, shutdown_receiver) = oneshot::channel();
    let handle = runtime.spawn(run_periodic(target, interval, tick, shutdown_receiver));
    Ok(PeriodicTask{ shutdown: Some(shutdown), handle })
}

async fn run_periodic<T: Send + Sync + 'static>(
    target: Weak<T>,
    interval: Duration,
    tick: fn(&T),
    mut shutdown: oneshot::Receiver<()>,
){
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick of a tokio interval completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(target) = target.upgrade() else {
                    #[cfg(feature = "log")]
                    log::debug!("periodic task target dropped, exiting");
                    return
                };
                tick(&target);
            }
            _ = &mut shutdown => {
                #[cfg(feature = "log")]
                log::debug!("periodic task received shutdown");
                return // also reached when the handle was dropped
            }
        };
    }
}
