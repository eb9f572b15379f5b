//! Error reporting for the dispatch loop.

use crate::error::PitchscopeError;
use std::sync::Mutex;

/// Trait for reporting non-fatal dispatch errors.
///
/// Called from the dispatch thread for processor faults and source read
/// failures. The error is also collected in the run's `DispatchReport`.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error raised by `component` (a processor or source name).
    fn report(&self, component: &str, error: &PitchscopeError);
}

/// Reporter that logs through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, component: &str, error: &PitchscopeError) {
        tracing::warn!(component, "{}", error);
    }
}

/// Reporter that keeps every message, for assertions in tests.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    reports: Mutex<Vec<(String, String)>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(component, message)` pairs in reporting order.
    pub fn reports(&self) -> Vec<(String, String)> {
        match self.reports.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, component: &str, error: &PitchscopeError) {
        let mut guard = match self.reports.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push((component.to_string(), error.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_reporter() {
        let reporter = LogReporter;
        let error = PitchscopeError::Other("test error".to_string());
        // Just ensure it doesn't panic
        reporter.report("TestProcessor", &error);
    }

    #[test]
    fn test_collecting_reporter_keeps_order() {
        let reporter = CollectingReporter::new();
        reporter.report("a", &PitchscopeError::Other("first".to_string()));
        reporter.report("b", &PitchscopeError::Other("second".to_string()));
        assert_eq!(
            reporter.reports(),
            vec![
                ("a".to_string(), "first".to_string()),
                ("b".to_string(), "second".to_string())
            ]
        );
    }
}
