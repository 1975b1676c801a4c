// =============================================================================
// Control plane — HTTP surface over the store, the control token, and the
// exchange adapter
// =============================================================================

pub mod rest;
pub mod uploads;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::control::ControlChannel;
use crate::exchange::ExchangeAdapter;
use crate::llm::client::LlmClient;
use crate::settings::Settings;
use crate::store::Store;

/// Shared state for every handler. Handlers mutate the system only through
/// the store and the control channel — never by reaching into the engine.
pub struct ApiState {
    pub store: Arc<Store>,
    pub settings: Arc<Settings>,
    pub control: Arc<ControlChannel>,
    pub adapter: Arc<dyn ExchangeAdapter>,
    pub llm: Arc<LlmClient>,
    /// True once the engine task is running in this process.
    pub engine_alive: Arc<AtomicBool>,
}
