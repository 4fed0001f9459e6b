//! Logger sink used by the `log` action.

use serde_json::Value;

/// Destination for values produced by `log` actions.
pub trait Logger: Send + Sync {
    fn log(&self, label: Option<&str>, value: &Value);
}

/// Default logger: forwards to `tracing` at info level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, label: Option<&str>, value: &Value) {
        match label {
            Some(label) => tracing::info!(label, %value, "machine log"),
            None => tracing::info!(%value, "machine log"),
        }
    }
}

impl<F> Logger for F
where
    F: Fn(Option<&str>, &Value) + Send + Sync,
{
    fn log(&self, label: Option<&str>, value: &Value) {
        self(label, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn closures_are_loggers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let logger = move |label: Option<&str>, value: &Value| {
            sink.lock().push((label.map(str::to_string), value.clone()));
        };

        logger.log(Some("count"), &json!(3));

        assert_eq!(*seen.lock(), vec![(Some("count".to_string()), json!(3))]);
    }

    #[test]
    fn tracing_logger_accepts_any_value() {
        TracingLogger.log(None, &json!({"nested": [1, 2]}));
    }
}
