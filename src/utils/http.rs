//! Shared HTTP client construction

use crate::utils::config::Settings;
use crate::utils::error::{Result, TubeloaderError};
use reqwest::Client;

/// Build the one client shared by resolvers and the transfer engine.
///
/// No whole-request timeout is set here: metadata calls wrap themselves in
/// `read_timeout`, and transfers time out per body chunk instead.
pub fn build_client(settings: &Settings) -> Result<Client> {
    Client::builder()
        .user_agent(settings.user_agent.as_str())
        .connect_timeout(settings.connect_timeout())
        .build()
        .map_err(|e| TubeloaderError::Configuration(format!("failed to create HTTP client: {}", e)))
}
