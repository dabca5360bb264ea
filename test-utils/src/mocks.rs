//! Recording state handlers for provider verification tests.

use pact_engine::StateHandlers;
use parking_lot::Mutex;
use std::sync::Arc;

/// Builds [`StateHandlers`] that record every invocation.
#[derive(Debug, Clone, Default)]
pub struct StateRecorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl StateRecorder {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handlers that succeed for each of `states` and record the call.
    #[must_use]
    pub fn handlers(&self, states: &[&str]) -> StateHandlers {
        states.iter().fold(StateHandlers::new(), |handlers, state| {
            let calls = Arc::clone(&self.calls);
            let name = (*state).to_string();
            handlers.with_handler(*state, move || {
                calls.lock().push(name.clone());
                async { Ok(()) }
            })
        })
    }

    /// Add a handler for `state` that records the call, then fails.
    #[must_use]
    pub fn failing(&self, handlers: StateHandlers, state: &str, message: &str) -> StateHandlers {
        let calls = Arc::clone(&self.calls);
        let name = state.to_string();
        let message = message.to_string();
        handlers.with_handler(state, move || {
            calls.lock().push(name.clone());
            let message = message.clone();
            async move { Err(anyhow::anyhow!(message)) }
        })
    }

    /// States invoked so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recorder_tracks_calls() {
        let recorder = StateRecorder::new();
        let handlers = recorder.handlers(&["a", "b"]);
        let handlers = recorder.failing(handlers, "c", "boom");

        assert!(handlers.get("b").unwrap()().await.is_ok());
        assert!(handlers.get("c").unwrap()().await.is_err());
        assert_eq!(recorder.calls(), vec!["b", "c"]);
    }
}
