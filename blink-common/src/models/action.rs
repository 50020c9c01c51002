//! Resolved actions.
//!
//! An [`Action`] is never updated in place by refresh or chaining: both produce a new value with a
//! new [`ActionKey`], which is what the session keys trust and supportability checks on.
use std::{fmt, sync::Arc, time::Duration};

use serde::Serialize;
use tracing::{debug, instrument};
use url::Url;

use crate::{
    dto::{
        ActionError, ActionGetResponse, ActionType, LinkedAction, LiveDataConfig, NextActionLink,
        NextActionPostRequest,
    },
    models::{
        component::{absolute_href, ActionKey, Component, ComponentId},
        error::{ClientError, ParseError},
        support::BlockchainSupportStrategy,
        Account, Signature,
    },
    traits::{ActionAdapter, ActionClient, ResolvedAction, SupportStrategy},
};

/// Refresh interval used when a live-data action does not declare one.
pub const DEFAULT_LIVE_DATA_DELAY: Duration = Duration::from_millis(1000);

/// Protocol headers captured when the descriptor was fetched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ActionMetadata {
    /// CAIP-2 ids from `x-blockchain-ids`.
    pub blockchain_ids: Vec<String>,
    /// `x-action-version`.
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Supportability {
    pub is_supported: bool,
    pub message: Option<String>,
}

impl Supportability {
    pub fn supported() -> Self {
        Self { is_supported: true, message: None }
    }

    pub fn unsupported(message: String) -> Self {
        Self { is_supported: false, message: Some(message) }
    }
}

/// Capabilities shared by an action and everything resolved from it.
pub struct ActionServices {
    pub client: Arc<dyn ActionClient>,
    pub adapter: Arc<dyn ActionAdapter>,
    pub support: Arc<dyn SupportStrategy>,
}

impl ActionServices {
    pub fn new(client: Arc<dyn ActionClient>, adapter: Arc<dyn ActionAdapter>) -> Self {
        Self { client, adapter, support: Arc::new(BlockchainSupportStrategy::default()) }
    }

    pub fn with_support_strategy(mut self, support: Arc<dyn SupportStrategy>) -> Self {
        self.support = support;
        self
    }
}

impl fmt::Debug for ActionServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionServices")
            .finish_non_exhaustive()
    }
}

/// Inputs needed to follow a continuation link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainData {
    pub signature: Signature,
    pub account: Account,
}

#[derive(Debug, Clone)]
pub struct Action {
    key: ActionKey,
    kind: ActionType,
    title: String,
    description: String,
    icon: String,
    label: String,
    disabled: bool,
    error: Option<ActionError>,
    components: Vec<Component>,
    is_chained: bool,
    live_data: Option<LiveDataConfig>,
    metadata: ActionMetadata,
    services: Arc<ActionServices>,
}

impl Action {
    /// Fetches and parses the descriptor behind `url`.
    #[instrument(skip(services))]
    pub async fn resolve(url: Url, services: Arc<ActionServices>) -> Result<Self, ClientError> {
        let resolved = services.client.get_action(&url).await?;
        Ok(Self::from_response(url, resolved, services, false)?)
    }

    pub fn from_response(
        url: Url,
        resolved: ResolvedAction,
        services: Arc<ActionServices>,
        is_chained: bool,
    ) -> Result<Self, ParseError> {
        let ResolvedAction { response, metadata } = resolved;
        let ActionGetResponse {
            kind,
            icon,
            title,
            description,
            label,
            disabled,
            error,
            links,
            live_data,
        } = response;

        let key = ActionKey::new(url);
        let linked = links
            .map(|links| links.actions)
            .filter(|actions| !actions.is_empty())
            .unwrap_or_else(|| {
                vec![LinkedAction {
                    href: key.url.to_string(),
                    label: label.clone(),
                    parameters: vec![],
                }]
            });
        let components = linked
            .into_iter()
            .enumerate()
            .map(|(index, linked)| Component::from_linked(&key, ComponentId(index), linked))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(%key, components = components.len(), is_chained, "Parsed action");
        Ok(Self {
            key,
            kind,
            title,
            description,
            icon,
            label,
            disabled,
            error,
            components,
            is_chained,
            live_data,
            metadata,
            services,
        })
    }

    pub fn key(&self) -> &ActionKey {
        &self.key
    }

    pub fn url(&self) -> &Url {
        &self.key.url
    }

    pub fn kind(&self) -> ActionType {
        self.kind
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn icon(&self) -> &str {
        &self.icon
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn disabled(&self) -> bool {
        self.disabled
    }

    pub fn error(&self) -> Option<&ActionError> {
        self.error.as_ref()
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn component(&self, id: ComponentId) -> Option<&Component> {
        self.components.get(id.0)
    }

    pub fn component_mut(&mut self, id: ComponentId) -> Option<&mut Component> {
        self.components.get_mut(id.0)
    }

    pub fn is_chained(&self) -> bool {
        self.is_chained
    }

    pub fn live_data(&self) -> Option<&LiveDataConfig> {
        self.live_data.as_ref()
    }

    /// Refresh interval, or `None` when the action must not be polled.
    pub fn live_data_delay(&self) -> Option<Duration> {
        self.live_data_delay_or(DEFAULT_LIVE_DATA_DELAY)
    }

    /// Like [`Action::live_data_delay`], with `default` for actions that declare no delay.
    pub fn live_data_delay_or(&self, default: Duration) -> Option<Duration> {
        self.live_data
            .as_ref()
            .filter(|config| config.enabled && !self.is_chained)
            .map(|config| {
                config
                    .delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(default)
            })
    }

    pub fn metadata(&self) -> &ActionMetadata {
        &self.metadata
    }

    pub fn adapter(&self) -> &Arc<dyn ActionAdapter> {
        &self.services.adapter
    }

    pub fn client(&self) -> &Arc<dyn ActionClient> {
        &self.services.client
    }

    /// Probes whether the active wallet can execute this action.
    pub async fn is_supported(&self) -> Supportability {
        self.services
            .support
            .is_supported(self)
            .await
    }

    /// Resolves the same url again. Chained actions are never refreshed.
    pub async fn refresh(&self) -> Result<Action, ClientError> {
        if self.is_chained {
            return Err(ClientError::NotRefreshable(self.key.url.to_string()));
        }
        Action::resolve(self.key.url.clone(), self.services.clone()).await
    }

    /// Resolves the continuation announced after a confirmed transaction.
    #[instrument(skip(self, data), fields(key = %self.key))]
    pub async fn chain(&self, next: &NextActionLink, data: &ChainData) -> Result<Action, ClientError> {
        let (url, resolved) = match next {
            NextActionLink::Inline { action } => (
                self.key.url.clone(),
                ResolvedAction { response: action.as_ref().clone(), metadata: self.metadata.clone() },
            ),
            NextActionLink::Post { href } => {
                let href = absolute_href(&self.key.url, href)?;
                let url = Url::parse(&href)
                    .map_err(|e| ClientError::UrlParsing(href.clone(), e.to_string()))?;
                let body = NextActionPostRequest {
                    account: data.account.clone(),
                    signature: data.signature.clone(),
                };
                let resolved = self
                    .services
                    .client
                    .post_next_action(&href, &body)
                    .await?;
                (url, resolved)
            }
        };
        Ok(Action::from_response(url, resolved, self.services.clone(), true)?)
    }
}
