// HTTP implementation of the upstream contract.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::keys::PortalSession;
use super::models::{LeagueGroup, War};
use super::{Connector, UpstreamError, WarApi};
use crate::config::{Credentials, UpstreamConfig};
use crate::metrics;

/// Error body returned by the game API on non-2xx responses.
#[derive(Debug, Default, Deserialize)]
struct ClientError {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

/// Opens [`CocClient`] sessions that share one connection pool.
#[derive(Clone)]
pub struct CocConnector {
    http: reqwest::Client,
    config: UpstreamConfig,
}

impl CocConnector {
    pub fn new(config: UpstreamConfig) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }
}

impl Connector for CocConnector {
    fn connect(&self) -> Box<dyn WarApi> {
        Box::new(CocClient::new(self.http.clone(), self.config.clone()))
    }
}

/// One upstream session against the game API.
pub struct CocClient {
    http: reqwest::Client,
    config: UpstreamConfig,
    keys: Vec<String>,
    next_key: AtomicUsize,
    portal: Option<PortalSession>,
}

/// Percent-encode a clan or war tag for use as a path segment.
pub fn encode_tag(tag: &str) -> String {
    utf8_percent_encode(tag, NON_ALPHANUMERIC).to_string()
}

impl CocClient {
    pub fn new(http: reqwest::Client, config: UpstreamConfig) -> Self {
        Self {
            http,
            config,
            keys: Vec::new(),
            next_key: AtomicUsize::new(0),
            portal: None,
        }
    }

    /// Round-robin over the session's keys.
    fn key(&self) -> Result<&str, UpstreamError> {
        if self.keys.is_empty() {
            return Err(UpstreamError::Auth("session is not authenticated".into()));
        }
        let i = self.next_key.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        Ok(&self.keys[i])
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str, path: &str) -> Result<T, UpstreamError> {
        let url = format!("{}{path}", self.config.api_url);
        let key = self.key()?;

        tracing::debug!("GET {url}");
        let started = Instant::now();
        let result = self.http.get(&url).bearer_auth(key).send().await;
        metrics::UPSTREAM_REQUEST_DURATION_SECONDS
            .with_label_values(&[endpoint])
            .observe(started.elapsed().as_secs_f64());

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                metrics::UPSTREAM_REQUESTS_TOTAL
                    .with_label_values(&[endpoint, "transport_error"])
                    .inc();
                return Err(e.into());
            }
        };

        let status = response.status();
        metrics::UPSTREAM_REQUESTS_TOTAL
            .with_label_values(&[endpoint, status.as_str()])
            .inc();

        if status == StatusCode::NOT_FOUND {
            return Err(UpstreamError::NotFound);
        }
        if !status.is_success() {
            let body: ClientError = response.json().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                reason: body.reason,
                message: body.message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

#[async_trait]
impl WarApi for CocClient {
    async fn authenticate(&mut self) -> Result<(), UpstreamError> {
        match self.config.credentials.clone() {
            None => Err(UpstreamError::Auth(
                "no upstream credentials configured (set COC_API_TOKEN or COC_EMAIL and COC_PASSWORD)"
                    .into(),
            )),
            Some(Credentials::Token(token)) => {
                self.keys = vec![token];
                Ok(())
            }
            Some(Credentials::Portal { email, password }) => {
                // The portal session needs its own cookie jar.
                let portal_http = reqwest::Client::builder()
                    .cookie_store(true)
                    .timeout(self.config.timeout)
                    .build()?;
                let (portal, ip) = PortalSession::login(
                    portal_http,
                    &self.config.developer_url,
                    &email,
                    &password,
                )
                .await?;
                tracing::debug!("Logged in to developer portal from {ip}");

                // Keep the session even if provisioning fails so close() logs out.
                self.portal = Some(portal);
                if let Some(portal) = &self.portal {
                    self.keys = portal
                        .provision(&self.config.key_name, &ip, self.config.key_count)
                        .await?;
                }
                Ok(())
            }
        }
    }

    /// A 404 here means the clan is not in a league group and becomes
    /// `Ok(None)`, so callers report no rounds rather than an upstream error.
    async fn league_group(&self, clan_tag: &str) -> Result<Option<LeagueGroup>, UpstreamError> {
        let path = format!("/clans/{}/currentwar/leaguegroup", encode_tag(clan_tag));
        match self.get("leaguegroup", &path).await {
            Ok(group) => Ok(Some(group)),
            Err(UpstreamError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn league_war(&self, war_tag: &str) -> Result<War, UpstreamError> {
        let path = format!("/clanwarleagues/wars/{}", encode_tag(war_tag));
        self.get("leaguewar", &path).await
    }

    async fn close(&mut self) -> Result<(), UpstreamError> {
        self.keys.clear();
        match self.portal.take() {
            Some(portal) => portal.logout().await,
            None => Ok(()),
        }
    }
}
