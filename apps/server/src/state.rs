//! Shared server state

use stemdrop_core::Stemdrop;

/// State handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub core: Stemdrop,
}

impl AppState {
    pub fn new(core: Stemdrop) -> Self {
        Self { core }
    }
}
