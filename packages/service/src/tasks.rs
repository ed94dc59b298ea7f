//! Background loops.
//!
//! Each loop stops when the shared `stop` signal flips. A tick that is
//! already running finishes before the loop exits, so awaiting the handle
//! waits for in-flight mutations.

use std::sync::Arc;
use std::time::Duration;

use safe_return_case::CaseEngine;
use safe_return_geofence::LocationTracker;
use safe_return_geofence_models::TransitionEvent;
use safe_return_time::Clock;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Runs the case sweep every `period`.
pub(crate) fn spawn_sweeper(
    engine: Arc<CaseEngine>,
    period: Duration,
    stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    spawn_periodic("case sweep", period, stop, move || {
        let engine = Arc::clone(&engine);
        async move {
            match tokio::task::spawn_blocking(move || engine.run_sweep()).await {
                Ok(report) if !report.failures.is_empty() => {
                    log::warn!("Sweep finished with {} failure(s)", report.failures.len());
                }
                Ok(_) => {}
                Err(e) => log::error!("Sweep task failed: {e}"),
            }
        }
    })
}

/// Drops retained location samples older than `horizon` every `period`.
pub(crate) fn spawn_reaper(
    tracker: Arc<LocationTracker>,
    clock: Arc<dyn Clock>,
    horizon: chrono::Duration,
    period: Duration,
    stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    spawn_periodic("stale location reaper", period, stop, move || {
        let reaped = tracker.sweep_stale(clock.now(), horizon);
        if reaped > 0 {
            log::info!("Reaped {reaped} stale location sample(s)");
        }
        std::future::ready(())
    })
}

/// Feeds geofence transitions into the case engine. The channel is
/// unbounded so a busy engine delays transitions but never drops them.
pub(crate) fn spawn_transition_listener(
    engine: Arc<CaseEngine>,
    mut events: mpsc::UnboundedReceiver<TransitionEvent>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => {
                        engine.handle_transition(&event);
                    }
                    None => break,
                },
                _ = stop.changed() => {
                    while let Ok(event) = events.try_recv() {
                        engine.handle_transition(&event);
                    }
                    break;
                }
            }
        }
        log::debug!("Transition listener stopped");
    })
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut stop: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;
        log::debug!("Started {name} every {period:?}");

        loop {
            tokio::select! {
                _ = interval.tick() => tick().await,
                _ = stop.changed() => break,
            }
        }
        log::debug!("Stopped {name}");
    })
}
