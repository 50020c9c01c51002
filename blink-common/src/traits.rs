//! Collaborator interfaces consumed by the engine.
use async_trait::async_trait;
use url::Url;

use crate::{
    dto::{
        ActionGetResponse, ActionPostRequest, ActionPostResponse, NextActionPostRequest,
    },
    models::{
        action::{Action, ActionMetadata, Supportability},
        error::{AdapterError, ClientError},
        trust::{LookupKind, TrustState},
        Account, Signature,
    },
};

/// A descriptor as fetched from an action url, together with the protocol headers.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAction {
    pub response: ActionGetResponse,
    pub metadata: ActionMetadata,
}

/// Resolver and network proxy for action endpoints.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait ActionClient: Send + Sync {
    /// Fetches the descriptor behind an action url.
    async fn get_action(&self, url: &Url) -> Result<ResolvedAction, ClientError>;

    /// POSTs a component body. A non-success status is returned as
    /// [`ClientError::Action`] when the body carries an error message.
    async fn post_action(
        &self,
        href: &str,
        body: &ActionPostRequest,
    ) -> Result<ActionPostResponse, ClientError>;

    /// POSTs `{account, signature}` to a chain link and returns the next descriptor.
    async fn post_next_action(
        &self,
        href: &str,
        body: &NextActionPostRequest,
    ) -> Result<ResolvedAction, ClientError>;
}

/// Context handed to the wallet on every call.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterContext {
    pub action_url: String,
    pub origin_url: Option<String>,
    pub trust: TrustState,
    pub triggered_label: String,
}

/// Wallet capabilities. Key custody and signing stay on the other side of this trait.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait ActionAdapter: Send + Sync {
    /// Connects the wallet. `None` means the user cancelled.
    async fn connect(&self, context: &AdapterContext) -> Result<Option<Account>, AdapterError>;

    /// Signs the base64 encoded transaction and returns its signature.
    async fn sign_transaction(
        &self,
        transaction: &str,
        context: &AdapterContext,
    ) -> Result<Signature, AdapterError>;

    /// Waits until the signed transaction is confirmed.
    async fn confirm_transaction(
        &self,
        signature: &str,
        context: &AdapterContext,
    ) -> Result<(), AdapterError>;

    /// CAIP-2 ids of the blockchains the wallet can sign for.
    fn supported_blockchains(&self) -> Vec<String>;
}

/// Label source for action, website and interstitial urls.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait TrustRegistry: Send + Sync {
    /// Missing entries are reported as [`TrustState::Unknown`].
    async fn lookup(&self, url: &Url, kind: LookupKind) -> TrustState;
}

/// Decides whether the active wallet can execute an action.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait SupportStrategy: Send + Sync {
    async fn is_supported(&self, action: &Action) -> Supportability;
}
