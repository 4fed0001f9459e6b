//! Awaiting actor snapshots from async code.

use super::error::ActorError;
use super::logic::{ActorLogic, ActorSnapshot};
use super::observer::ObserverFns;
use super::runtime::Actor;
use super::signal::CancellationSignal;
use crate::core::SnapshotStatus;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Why [`wait_for`] gave up.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WaitError {
    #[error("wait aborted by signal")]
    Aborted,

    #[error("timed out waiting for a matching snapshot")]
    Timeout,

    #[error("actor terminated without satisfying the predicate")]
    Completed,

    #[error("actor failed: {0}")]
    Failed(ActorError),
}

/// Options for [`wait_for`].
#[derive(Clone, Default)]
pub struct WaitOptions {
    pub timeout: Option<Duration>,
    pub signal: Option<Arc<dyn CancellationSignal>>,
}

impl WaitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_signal(mut self, signal: impl CancellationSignal + 'static) -> Self {
        self.signal = Some(Arc::new(signal));
        self
    }
}

type Settle<T> = Arc<Mutex<Option<oneshot::Sender<T>>>>;

fn settle<T>(slot: &Settle<T>, value: T) {
    if let Some(sender) = slot.lock().take() {
        let _ = sender.send(value);
    }
}

/// Resolve with the first snapshot satisfying `predicate`.
///
/// The current snapshot is checked first. The wait fails if the actor
/// finishes or errors without a match, the timeout elapses, or the signal
/// aborts. A signal that is already aborted fails immediately.
pub async fn wait_for<L, P>(
    actor: &Actor<L>,
    predicate: P,
    options: WaitOptions,
) -> Result<L::Snapshot, WaitError>
where
    L: ActorLogic,
    P: Fn(&L::Snapshot) -> bool + Send + Sync + 'static,
{
    if options
        .signal
        .as_ref()
        .is_some_and(|signal| signal.is_aborted())
    {
        return Err(WaitError::Aborted);
    }
    let current = actor.snapshot();
    if predicate(&current) {
        return Ok(current);
    }

    let (tx, rx) = oneshot::channel::<Result<L::Snapshot, WaitError>>();
    let slot: Settle<Result<L::Snapshot, WaitError>> = Arc::new(Mutex::new(Some(tx)));
    let (on_next, on_error, on_complete) = (Arc::clone(&slot), Arc::clone(&slot), Arc::clone(&slot));
    let subscription = actor.subscribe(
        ObserverFns::new()
            .on_next(move |snapshot: &L::Snapshot| {
                if predicate(snapshot) {
                    settle(&on_next, Ok(snapshot.clone()));
                }
            })
            .on_error(move |error| settle(&on_error, Err(WaitError::Failed(error.clone()))))
            .on_complete(move || settle(&on_complete, Err(WaitError::Completed))),
    );
    let listener = options.signal.as_ref().map(|signal| {
        let slot = Arc::clone(&slot);
        let id = signal.on_abort(Box::new(move || settle(&slot, Err(WaitError::Aborted))));
        (Arc::clone(signal), id)
    });

    let result = match options.timeout {
        Some(timeout) => match tokio::time::timeout(timeout, rx).await {
            Ok(received) => received.unwrap_or(Err(WaitError::Completed)),
            Err(_) => Err(WaitError::Timeout),
        },
        None => rx.await.unwrap_or(Err(WaitError::Completed)),
    };

    subscription.unsubscribe();
    if let Some((signal, id)) = listener {
        signal.off_abort(id);
    }
    result
}

/// Resolve with the actor's output once it is done.
pub async fn to_promise<L: ActorLogic>(actor: &Actor<L>) -> Result<Option<Value>, ActorError> {
    let current = actor.snapshot();
    match current.status() {
        SnapshotStatus::Done => return Ok(current.output().cloned()),
        SnapshotStatus::Error => {
            return Err(current
                .error()
                .cloned()
                .unwrap_or_else(|| ActorError::new("actor failed")))
        }
        _ => {}
    }

    let (tx, rx) = oneshot::channel::<Result<Option<Value>, ActorError>>();
    let slot = Arc::new(Mutex::new(Some(tx)));
    let output = Arc::new(Mutex::new(None));
    let (on_error, on_complete) = (Arc::clone(&slot), Arc::clone(&slot));
    let (record, read) = (Arc::clone(&output), Arc::clone(&output));
    let subscription = actor.subscribe(
        ObserverFns::new()
            .on_next(move |snapshot: &L::Snapshot| {
                *record.lock() = snapshot.output().cloned();
            })
            .on_error(move |error| settle(&on_error, Err(error.clone())))
            .on_complete(move || settle(&on_complete, Ok(read.lock().clone()))),
    );

    let result = rx
        .await
        .unwrap_or_else(|_| Err(ActorError::new("actor dropped before completing")));
    subscription.unsubscribe();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{AbortController, ActorOptions, SimulatedClock};
    use crate::core::Event;
    use crate::logic::{from_transition, TransitionLogic};

    fn counter() -> Actor<TransitionLogic<i64>> {
        let logic = from_transition(
            |count: &i64, event: &Event| match event.event_type.as_str() {
                "INC" => count + 1,
                _ => *count,
            },
            0,
        );
        let actor = Actor::new(
            logic,
            ActorOptions::new().with_clock(Arc::new(SimulatedClock::new())),
        );
        actor.start();
        actor
    }

    #[tokio::test]
    async fn resolves_when_predicate_matches() {
        let actor = counter();
        let sender = actor.clone();
        tokio::spawn(async move {
            sender.send("INC");
            sender.send("INC");
        });

        let snapshot = wait_for(&actor, |s| s.context >= 2, WaitOptions::new())
            .await
            .unwrap();

        assert_eq!(snapshot.context, 2);
    }

    #[tokio::test]
    async fn current_snapshot_counts() {
        let actor = counter();

        let snapshot = wait_for(&actor, |s| s.context == 0, WaitOptions::new()).await;

        assert!(snapshot.is_ok());
    }

    #[tokio::test]
    async fn aborted_signal_fails_without_listening() {
        let actor = counter();
        let controller = AbortController::new();
        controller.abort();
        let signal = controller.signal();

        let result = wait_for(
            &actor,
            |s| s.context > 10,
            WaitOptions::new().with_signal(signal.clone()),
        )
        .await;

        assert_eq!(result.unwrap_err(), WaitError::Aborted);
        assert_eq!(signal.listener_count(), 0);
    }

    #[tokio::test]
    async fn abort_during_the_first_check_is_seen() {
        let actor = counter();
        let controller = AbortController::new();
        let signal = controller.signal();
        let aborter = controller.clone();

        let result = wait_for(
            &actor,
            move |s| {
                aborter.abort();
                s.context > 10
            },
            WaitOptions::new().with_signal(signal.clone()),
        )
        .await;

        assert_eq!(result.unwrap_err(), WaitError::Aborted);
        assert_eq!(signal.listener_count(), 0);
    }

    #[tokio::test]
    async fn abort_releases_listener() {
        let actor = counter();
        let controller = AbortController::new();
        let signal = controller.signal();
        let aborter = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            aborter.abort();
        });

        let result = wait_for(
            &actor,
            |s| s.context > 10,
            WaitOptions::new().with_signal(signal.clone()),
        )
        .await;

        assert_eq!(result.unwrap_err(), WaitError::Aborted);
        assert_eq!(signal.listener_count(), 0);
    }

    #[tokio::test]
    async fn times_out() {
        let actor = counter();

        let result = wait_for(
            &actor,
            |s| s.context > 10,
            WaitOptions::new().with_timeout(Duration::from_millis(10)),
        )
        .await;

        assert_eq!(result.unwrap_err(), WaitError::Timeout);
    }

    #[tokio::test]
    async fn stopping_without_match_completes() {
        let actor = counter();
        let stopper = actor.clone();
        tokio::spawn(async move {
            stopper.stop();
        });

        let result = wait_for(&actor, |s| s.context > 10, WaitOptions::new()).await;

        assert_eq!(result.unwrap_err(), WaitError::Completed);
    }
}
