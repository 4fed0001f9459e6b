//! Snapshot observers and subscriptions.

use super::error::ActorError;

/// Receives snapshots from an actor.
///
/// Closures taking `&T` are next-only observers.
pub trait Observer<T>: Send + Sync {
    fn next(&self, value: &T);

    fn error(&self, _error: &ActorError) {}

    fn complete(&self) {}

    /// Whether `error` does anything. Errors nobody handles are reported to
    /// the system as unhandled.
    fn handles_error(&self) -> bool {
        false
    }
}

impl<T, F> Observer<T> for F
where
    F: Fn(&T) + Send + Sync,
{
    fn next(&self, value: &T) {
        self(value)
    }
}

type NextFn<T> = Box<dyn Fn(&T) + Send + Sync>;
type ErrorFn = Box<dyn Fn(&ActorError) + Send + Sync>;
type CompleteFn = Box<dyn Fn() + Send + Sync>;

/// Observer assembled from optional callbacks.
///
/// # Example
///
/// ```rust
/// use statecraft::actor::{Observer, ObserverFns};
///
/// let observer = ObserverFns::<u32>::new()
///     .on_next(|n| println!("got {n}"))
///     .on_complete(|| println!("done"));
///
/// observer.next(&1);
/// observer.complete();
/// ```
pub struct ObserverFns<T> {
    next: Option<NextFn<T>>,
    error: Option<ErrorFn>,
    complete: Option<CompleteFn>,
}

impl<T> ObserverFns<T> {
    pub fn new() -> Self {
        Self {
            next: None,
            error: None,
            complete: None,
        }
    }

    pub fn on_next(mut self, f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.next = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&ActorError) + Send + Sync + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.complete = Some(Box::new(f));
        self
    }
}

impl<T> Default for ObserverFns<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Observer<T> for ObserverFns<T> {
    fn next(&self, value: &T) {
        if let Some(next) = &self.next {
            next(value);
        }
    }

    fn error(&self, error: &ActorError) {
        if let Some(on_error) = &self.error {
            on_error(error);
        }
    }

    fn complete(&self) {
        if let Some(complete) = &self.complete {
            complete();
        }
    }

    fn handles_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Handle returned by `subscribe` and `on`.
#[must_use = "dropping a subscription keeps it active; call unsubscribe to remove it"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub(crate) fn empty() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn closures_observe_next_only() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer = move |value: &i32| sink.lock().push(*value);

        observer.next(&3);
        Observer::<i32>::complete(&observer);

        assert_eq!(*seen.lock(), vec![3]);
    }

    #[test]
    fn observer_fns_route_each_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c) = (Arc::clone(&seen), Arc::clone(&seen), Arc::clone(&seen));
        let observer = ObserverFns::<i32>::new()
            .on_next(move |v| a.lock().push(format!("next {v}")))
            .on_error(move |e| b.lock().push(format!("error {e}")))
            .on_complete(move || c.lock().push("complete".to_string()));

        observer.next(&1);
        observer.error(&ActorError::new("x"));
        observer.complete();

        assert_eq!(*seen.lock(), vec!["next 1", "error x", "complete"]);
    }

    #[test]
    fn only_error_callbacks_handle_errors() {
        let next_only = |_: &i32| {};

        assert!(!Observer::<i32>::handles_error(&next_only));
        assert!(!ObserverFns::<i32>::new().on_next(|_| {}).handles_error());
        assert!(ObserverFns::<i32>::new().on_error(|_| {}).handles_error());
    }

    #[test]
    fn unsubscribe_runs_cancel_once() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let subscription = Subscription::new(move || *counter.lock() += 1);

        subscription.unsubscribe();
        Subscription::empty().unsubscribe();

        assert_eq!(*calls.lock(), 1);
    }
}
