//! Hooks fired on breaker state transitions

use crate::breaker::BreakerState;
use std::sync::Arc;

type Hook = Arc<dyn Fn(&str) + Send + Sync>;

/// Optional observers for each state a breaker can enter
///
/// Each hook receives the dependency name. Hooks run after the transition
/// is committed and outside the breaker's lock, so a hook may query the
/// breaker it belongs to.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_open: Option<Hook>,
    pub on_close: Option<Hook>,
    pub on_half_open: Option<Hook>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the hook registered for `entered`, if any
    pub fn trigger(&self, entered: BreakerState, dependency: &str) {
        let hook = match entered {
            BreakerState::Open => &self.on_open,
            BreakerState::HalfOpen => &self.on_half_open,
            BreakerState::Closed => &self.on_close,
        };
        if let Some(callback) = hook {
            callback(dependency);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .finish()
    }
}
