//! Engine configuration.

use crate::game::turn::TurnSchedule;

/// Configuration shared by every engine of a deployment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Phase cut-offs.
    pub schedule: TurnSchedule,
    /// Mirror engine-generated events into the log for auditing.
    pub store_automatic_events: bool,
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            schedule: TurnSchedule::from_env(),
            store_automatic_events: std::env::var("LUPUS_STORE_AUTOMATIC_EVENTS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }
}
