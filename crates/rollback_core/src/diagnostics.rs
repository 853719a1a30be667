//! Diagnostic host imports exposed to the guest: `external_log` and
//! `external_error`, forwarded to informational / error severity sinks.

use std::sync::Arc;

/// Forwards guest-originated diagnostic messages to the host.
///
/// Implementations should be cheap and non-blocking — they run
/// synchronously inside the guest's call.
pub trait DiagnosticSink: Send + Sync {
    fn log(&self, message: &str);
    fn error(&self, message: &str);
}

/// Default sink: forwards to the `tracing` crate.
#[derive(Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn log(&self, message: &str) {
        tracing::info!(target: "rollback_core::guest", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "rollback_core::guest", "{message}");
    }
}

pub fn default_sink() -> Arc<dyn DiagnosticSink> {
    Arc::new(TracingSink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        logs: Mutex<Vec<String>>,
        errors: Mutex<Vec<String>>,
    }

    impl DiagnosticSink for RecordingSink {
        fn log(&self, message: &str) {
            self.logs.lock().unwrap().push(message.to_string());
        }

        fn error(&self, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn sink_separates_severities() {
        let sink = RecordingSink::default();
        sink.log("hello");
        sink.error("boom");
        assert_eq!(sink.logs.lock().unwrap().as_slice(), ["hello"]);
        assert_eq!(sink.errors.lock().unwrap().as_slice(), ["boom"]);
    }
}
