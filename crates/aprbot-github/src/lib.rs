//! GitHub adapters for the APRBOT pipeline.
//!
//! - [`GitHubAppTokenProvider`] exchanges a signed App JWT for an
//!   installation token ([`aprbot_core::TokenSource`]).
//! - [`GitHubClient`] speaks the REST endpoints the materializer needs
//!   ([`aprbot_core::RepositoryHost`]); [`GitHubConnector`] builds one per
//!   token ([`aprbot_core::HostConnector`]).

pub mod client;
pub mod token;

pub use client::{GitHubClient, GitHubConnector};
pub use token::GitHubAppTokenProvider;

/// Sent on every request; GitHub rejects requests without a user agent.
pub const USER_AGENT: &str = concat!("aprbot/", env!("CARGO_PKG_VERSION"));

/// REST API version pinned through `X-GitHub-Api-Version`.
pub const API_VERSION: &str = "2022-11-28";

const ACCEPT: &str = "application/vnd.github+json";

/// Pull `message` out of a GitHub error body, falling back to the raw text.
pub(crate) fn error_message(body: &str) -> String {
    #[derive(serde::Deserialize)]
    struct ApiError {
        message: Option<String>,
    }

    match serde_json::from_str::<ApiError>(body) {
        Ok(ApiError {
            message: Some(message),
        }) => message,
        _ => {
            let trimmed = body.trim();
            if trimmed.len() > 200 {
                let mut end = 200;
                while !trimmed.is_char_boundary(end) {
                    end -= 1;
                }
                format!("{}...", &trimmed[..end])
            } else {
                trimmed.to_string()
            }
        }
    }
}
