//! Trust registry clients and blink url helpers.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use blink_common::{
    models::{
        error::ClientError,
        trust::{LookupKind, Origin, OriginKind, TrustState},
    },
    traits::TrustRegistry,
};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tokio::{
    select,
    sync::{oneshot, RwLock},
    task::JoinHandle,
    time::interval,
};
use tracing::{debug, info, instrument, warn};

use crate::config::RetryConfiguration;

pub const DEFAULT_REGISTRY_REFRESH_INTERVAL: Duration = Duration::from_secs(600);

const SOLANA_ACTION_PREFIX: &str = "solana-action:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Host, optionally with a port (`example.com:8080`).
    pub host: String,
    pub state: TrustState,
}

/// Labels published by the registry, one list per lookup kind.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(default)]
    pub actions: Vec<RegistryEntry>,
    #[serde(default)]
    pub websites: Vec<RegistryEntry>,
    #[serde(default)]
    pub interstitials: Vec<RegistryEntry>,
}

impl RegistryDocument {
    fn entries(&self, kind: LookupKind) -> &[RegistryEntry] {
        match kind {
            LookupKind::Action => &self.actions,
            LookupKind::Website => &self.websites,
            LookupKind::Interstitial => &self.interstitials,
        }
    }

    pub fn state_of(&self, url: &Url, kind: LookupKind) -> TrustState {
        let Some(host) = url.host_str() else {
            return TrustState::Unknown;
        };
        let with_port = url
            .port()
            .map(|port| format!("{host}:{port}"));
        self.entries(kind)
            .iter()
            .find(|entry| {
                entry.host.eq_ignore_ascii_case(host) ||
                    with_port
                        .as_deref()
                        .is_some_and(|h| entry.host.eq_ignore_ascii_case(h))
            })
            .map(|entry| entry.state)
            .unwrap_or_default()
    }
}

#[async_trait]
impl TrustRegistry for RegistryDocument {
    async fn lookup(&self, url: &Url, kind: LookupKind) -> TrustState {
        self.state_of(url, kind)
    }
}

/// Registry document fetched over HTTP and kept in memory.
///
/// Lookups before the first successful [`HttpTrustRegistry::refresh`] report `unknown`.
#[derive(Debug)]
pub struct HttpTrustRegistry {
    url: Url,
    http_client: Client,
    backoff_policy: ExponentialBackoff,
    document: RwLock<RegistryDocument>,
}

impl HttpTrustRegistry {
    pub fn new(url: &str, retry: RetryConfiguration) -> Result<Self, ClientError> {
        let url = url
            .parse::<Url>()
            .map_err(|e| ClientError::UrlParsing(url.to_string(), e.to_string()))?;
        let http_client = Client::builder()
            .build()
            .map_err(|e| ClientError::HttpClient(e.to_string()))?;
        Ok(Self {
            url,
            http_client,
            backoff_policy: retry.backoff_policy(),
            document: RwLock::new(RegistryDocument::default()),
        })
    }

    /// Fetches the registry document and replaces the cached one.
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn refresh(&self) -> Result<(), ClientError> {
        let document = backoff::future::retry(self.backoff_policy.clone(), || async {
            let response = self
                .http_client
                .get(self.url.clone())
                .send()
                .await
                .map_err(|e| backoff::Error::transient(ClientError::HttpClient(e.to_string())))?;
            let status = response.status();
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                return Err(backoff::Error::transient(ClientError::UnexpectedStatus(
                    status.as_u16(),
                    status.to_string(),
                )));
            }
            let body = response
                .text()
                .await
                .map_err(|e| ClientError::ParseResponse(e.to_string()))?;
            if !status.is_success() {
                return Err(backoff::Error::permanent(ClientError::UnexpectedStatus(
                    status.as_u16(),
                    body,
                )));
            }
            serde_json::from_str::<RegistryDocument>(&body).map_err(|err| {
                backoff::Error::permanent(ClientError::ParseResponse(format!(
                    "Error: {err}, Body: {body}"
                )))
            })
        })
        .await?;

        info!(
            actions = document.actions.len(),
            websites = document.websites.len(),
            interstitials = document.interstitials.len(),
            "Trust registry refreshed"
        );
        *self.document.write().await = document;
        Ok(())
    }

    /// Refreshes the document every `period` until the returned handle is stopped or dropped.
    /// The first refresh happens immediately.
    pub fn spawn_refresh(self: &Arc<Self>, period: Duration) -> RegistryRefreshHandle {
        let (end_tx, mut end_rx) = oneshot::channel::<()>();
        let this = self.clone();
        let jh = tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                select! {
                    _ = ticker.tick() => {
                        if let Err(err) = this.refresh().await {
                            warn!(%err, "Failed to refresh trust registry");
                        }
                    }
                    _ = &mut end_rx => {
                        debug!("Trust registry refresh received close signal. Stopping");
                        return;
                    }
                }
            }
        });
        RegistryRefreshHandle { end_tx: Some(end_tx), jh }
    }
}

#[async_trait]
impl TrustRegistry for HttpTrustRegistry {
    async fn lookup(&self, url: &Url, kind: LookupKind) -> TrustState {
        self.document
            .read()
            .await
            .state_of(url, kind)
    }
}

/// Owner of a periodic registry refresh task.
#[derive(Debug)]
pub struct RegistryRefreshHandle {
    end_tx: Option<oneshot::Sender<()>>,
    jh: JoinHandle<()>,
}

impl RegistryRefreshHandle {
    pub async fn stop(mut self) {
        if let Some(tx) = self.end_tx.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.jh).await;
    }
}

impl Drop for RegistryRefreshHandle {
    fn drop(&mut self) {
        self.jh.abort();
    }
}

/// An action url together with the surface it was found on, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlinkUrl {
    pub action: Url,
    pub origin: Option<Origin>,
}

/// Unwraps interstitial urls that carry the action url in their `action` query parameter.
///
/// Both the parameter and a bare input may use the `solana-action:` scheme prefix.
pub fn parse_blink_url(raw: &str) -> Result<BlinkUrl, ClientError> {
    let parse = |value: &str| {
        let value = value
            .strip_prefix(SOLANA_ACTION_PREFIX)
            .unwrap_or(value);
        value
            .parse::<Url>()
            .map_err(|e| ClientError::UrlParsing(value.to_string(), e.to_string()))
    };

    let url = parse(raw.trim())?;
    let wrapped = url
        .query_pairs()
        .find(|(key, _)| key == "action")
        .map(|(_, value)| value.into_owned());

    match wrapped {
        Some(action) => Ok(BlinkUrl {
            action: parse(&action)?,
            origin: Some(Origin { url, kind: OriginKind::Interstitial }),
        }),
        None => Ok(BlinkUrl { action: url, origin: None }),
    }
}
