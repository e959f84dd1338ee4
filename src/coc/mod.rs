// Clash of Clans API collaborator: the narrow contract the war snapshot
// pipeline depends on, plus the HTTP implementation of it.

pub mod client;
pub mod keys;
pub mod models;

use async_trait::async_trait;
use thiserror::Error;

pub use client::{CocClient, CocConnector};
pub use models::{Attack, LeagueGroup, LeagueRound, War, WarClan, WarMember, WarState};

/// Errors raised while talking to the upstream API.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned {status} ({reason}): {message}")]
    Status {
        status: u16,
        reason: String,
        message: String,
    },

    #[error("resource not found")]
    NotFound,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("failed to decode upstream response: {0}")]
    Decode(String),
}

/// One authenticated upstream session.
///
/// A session is opened per request through a [`Connector`], used for a
/// handful of sequential fetches and then closed.
#[async_trait]
pub trait WarApi: Send + Sync {
    /// Establish credentials for the session. Must be called before any fetch.
    async fn authenticate(&mut self) -> Result<(), UpstreamError>;

    /// The league group the clan currently belongs to, or `None` when the
    /// clan is not part of one.
    async fn league_group(&self, clan_tag: &str) -> Result<Option<LeagueGroup>, UpstreamError>;

    async fn league_war(&self, war_tag: &str) -> Result<War, UpstreamError>;

    /// Release the session. Failures here are reported but never change the
    /// outcome of the request that used the session.
    async fn close(&mut self) -> Result<(), UpstreamError>;
}

/// Opens fresh upstream sessions.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> Box<dyn WarApi>;
}
