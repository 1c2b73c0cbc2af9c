//! Step-completed notifications.
//!
//! The coordinator publishes one [`StepEvent`] per recorded iteration to every
//! registered [`StepListener`]; it knows nothing about what listeners do.

use async_trait::async_trait;

use crate::session::{EvolutionStep, SessionId};

/// A recorded iteration together with the buffer it produced.
#[derive(Debug, Clone)]
pub struct StepEvent {
    pub session_id: SessionId,
    pub step: EvolutionStep,
    /// Code buffer after this step
    pub code: String,
}

/// Observer of recorded steps.
///
/// Listener failures are the listener's own concern; `on_step` cannot fail
/// the session.
#[async_trait]
pub trait StepListener: Send + Sync {
    async fn on_step(&self, event: &StepEvent);
}
