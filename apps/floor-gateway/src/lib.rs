pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod gateway;
pub mod realtime;
pub mod routes;

use std::sync::Arc;

use auth::CredentialVerifier;
use config::Config;
use data::DataSource;
use realtime::RealtimeHub;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: Arc<RealtimeHub>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub data: Arc<dyn DataSource>,
}
