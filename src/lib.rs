pub mod api;
pub mod completion;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod invalidation;
pub mod lintai_client;
pub mod models;
pub mod poller;
pub mod reconciler;
pub mod retry;
pub mod store;
#[cfg(test)]
mod testing;
pub mod transport;

use engine::JobEngine;
use events::EventBroadcaster;

#[derive(Clone)]
pub struct AppState {
    pub engine: JobEngine,
    pub events: EventBroadcaster,
}
