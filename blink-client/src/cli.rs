use std::{collections::BTreeMap, sync::Arc};

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use blink_common::{
    dto::ParameterValue,
    models::{
        action::ActionServices,
        component::{ComponentId, ComponentKind, ComponentValues},
        error::AdapterError,
        trust::{Origin, OriginKind, SecurityLevel},
        Account, Signature,
    },
    traits::{ActionAdapter, AdapterContext, TrustRegistry},
    Action, Component,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{debug, info, warn};
use tracing_appender::rolling;
use url::Url;

use crate::{
    config::{RetryConfiguration, SessionConfig},
    registry::{parse_blink_url, HttpTrustRegistry, RegistryDocument},
    rpc::{HttpActionClient, HttpActionClientOptions},
    session::ActionSession,
};

const SOLANA_MAINNET: &str = "solana:5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp";
const SOLANA_DEVNET: &str = "solana:EtWTRABZaYq6iMfeYKouRu166VU2xqa1";

/// Blink Client CLI - A tool for inspecting and building blockchain actions
///
/// Resolves action urls, classifies them against a trust registry and requests transactions
/// from action endpoints. Transactions are never signed.
#[derive(Parser, Debug, Clone, PartialEq)]
#[clap(version = env!("CARGO_PKG_VERSION"))]
struct CliArgs {
    /// Proxy all action requests through `<proxy>?url=<target>`.
    #[clap(long, env = "BLINK_PROXY_URL")]
    proxy_url: Option<String>,

    /// Trust registry document url. Without it every url is classified as unknown.
    #[clap(long, env = "BLINK_REGISTRY_URL")]
    registry_url: Option<String>,

    /// Which trust verdicts may execute without an override: only-trusted, non-malicious or
    /// all.
    #[clap(long, default_value = "only-trusted")]
    security_level: SecurityLevel,

    /// CAIP-2 ids of the blockchains the wallet supports.
    #[clap(long = "blockchain", default_values = [SOLANA_MAINNET, SOLANA_DEVNET])]
    blockchains: Vec<String>,

    /// Logging folder path.
    #[clap(long, default_value = "logs")]
    log_folder: String,

    /// Enable verbose logging.
    #[clap(long)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Command {
    /// Resolve an action and print its trust classification and components.
    Inspect {
        /// Action url, `solana-action:` url or interstitial url.
        url: String,

        /// Page the action was found on.
        #[clap(long)]
        origin: Option<String>,

        /// Classify `--origin` as an interstitial instead of a website.
        #[clap(long)]
        interstitial: bool,
    },
    /// Request a transaction from one component of an action.
    Post {
        url: String,

        /// Account the transaction is built for.
        #[clap(long)]
        account: String,

        /// Index of the component to post.
        #[clap(long)]
        component: usize,

        /// Parameter value as `name=value`. Repeat for several parameters or checkbox options.
        #[clap(long = "value", value_parser = parse_key_value)]
        values: Vec<(String, String)>,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("Expected `name=value`, got `{raw}`"))
}

/// Wallet stand-in: connects as a fixed account and refuses to sign.
struct ReadOnlyAdapter {
    account: Option<Account>,
    blockchains: Vec<String>,
}

#[async_trait]
impl ActionAdapter for ReadOnlyAdapter {
    async fn connect(&self, _context: &AdapterContext) -> Result<Option<Account>, AdapterError> {
        Ok(self.account.clone())
    }

    async fn sign_transaction(
        &self,
        _transaction: &str,
        _context: &AdapterContext,
    ) -> Result<Signature, AdapterError> {
        Err(AdapterError::Wallet("the CLI does not sign transactions".to_string()))
    }

    async fn confirm_transaction(
        &self,
        _signature: &str,
        _context: &AdapterContext,
    ) -> Result<(), AdapterError> {
        Err(AdapterError::Wallet("the CLI does not sign transactions".to_string()))
    }

    fn supported_blockchains(&self) -> Vec<String> {
        self.blockchains.clone()
    }
}

pub async fn run_cli() -> anyhow::Result<()> {
    // Parse CLI Args
    let args: CliArgs = CliArgs::parse();

    // Setup Logging
    let log_level = if args.verbose { "debug" } else { "info" };
    let (non_blocking, _guard) =
        tracing_appender::non_blocking(rolling::never(&args.log_folder, "blink_client.log"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(non_blocking)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow!("Failed to set up logging subscriber: {e}"))?;

    let client = HttpActionClient::new(
        HttpActionClientOptions::new().with_proxy_url(args.proxy_url.clone()),
    )?;

    match args.command.clone() {
        Command::Inspect { url, origin, interstitial } => {
            let adapter = ReadOnlyAdapter { account: None, blockchains: args.blockchains.clone() };
            let services = Arc::new(ActionServices::new(Arc::new(client), Arc::new(adapter)));
            inspect(&args, services, &url, origin.as_deref(), interstitial).await
        }
        Command::Post { url, account, component, values } => {
            let adapter = ReadOnlyAdapter {
                account: Some(account.clone()),
                blockchains: args.blockchains.clone(),
            };
            let services = Arc::new(ActionServices::new(Arc::new(client), Arc::new(adapter)));
            post(services, &url, &account, ComponentId(component), values).await
        }
    }
}

async fn trust_registry(args: &CliArgs) -> anyhow::Result<Arc<dyn TrustRegistry>> {
    let Some(url) = args.registry_url.as_deref() else {
        info!("No trust registry configured, every url is unknown");
        return Ok(Arc::new(RegistryDocument::default()));
    };
    let registry = HttpTrustRegistry::new(url, RetryConfiguration::default())?;
    if let Err(err) = registry.refresh().await {
        warn!(%err, "Failed to load trust registry, every url is unknown");
    }
    Ok(Arc::new(registry))
}

async fn inspect(
    args: &CliArgs,
    services: Arc<ActionServices>,
    raw_url: &str,
    origin: Option<&str>,
    interstitial: bool,
) -> anyhow::Result<()> {
    let blink = parse_blink_url(raw_url)?;
    let origin = match origin {
        Some(origin) => Some(Origin {
            url: Url::parse(origin).with_context(|| format!("Invalid origin url `{origin}`"))?,
            kind: if interstitial { OriginKind::Interstitial } else { OriginKind::Website },
        }),
        None => blink.origin,
    };
    debug!(action = %blink.action, ?origin, "Inspecting action");

    let registry = trust_registry(args).await?;
    let action = Action::resolve(blink.action, services).await?;
    let session = ActionSession::start(
        action,
        registry,
        origin,
        SessionConfig::new().security_level(args.security_level),
    )
    .await;

    let action = session.action();
    let output = json!({
        "url": action.url().as_str(),
        "type": action.kind(),
        "title": action.title(),
        "description": action.description(),
        "icon": action.icon(),
        "label": action.label(),
        "disabled": action.disabled(),
        "error": action.error().map(|e| e.message.clone()),
        "metadata": action.metadata(),
        "live_data_delay_ms": action
            .live_data_delay()
            .map(|d| d.as_millis() as u64),
        "supportability": session.supportability(),
        "trust": session.assessment(),
        "disclaimer": session.disclaimer(),
        "state": session.state(),
        "components": session.descriptors(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Groups `name=value` pairs into the shape the component expects.
fn component_values(
    component: &Component,
    values: Vec<(String, String)>,
) -> anyhow::Result<Option<ComponentValues>> {
    if values.is_empty() {
        return Ok(None);
    }
    let values = match component.kind() {
        ComponentKind::Button => bail!("Component {} takes no values", component.id()),
        ComponentKind::SingleValue => {
            let [(_, value)]: [(String, String); 1] = values
                .try_into()
                .map_err(|_| anyhow!("Component {} takes a single value", component.id()))?;
            ComponentValues::Single(value)
        }
        ComponentKind::MultiValue => {
            ComponentValues::Multi(values.into_iter().map(|(_, v)| v).collect())
        }
        ComponentKind::Form => {
            let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for (name, value) in values {
                grouped.entry(name).or_default().push(value);
            }
            ComponentValues::Form(
                grouped
                    .into_iter()
                    .map(|(name, mut values)| {
                        let value = if values.len() == 1 {
                            ParameterValue::Text(values.remove(0))
                        } else {
                            ParameterValue::List(values)
                        };
                        (name, value)
                    })
                    .collect(),
            )
        }
    };
    Ok(Some(values))
}

async fn post(
    services: Arc<ActionServices>,
    raw_url: &str,
    account: &str,
    id: ComponentId,
    values: Vec<(String, String)>,
) -> anyhow::Result<()> {
    let blink = parse_blink_url(raw_url)?;
    let mut action = Action::resolve(blink.action, services).await?;
    let client = action.client().clone();
    let component = action
        .component_mut(id)
        .ok_or_else(|| anyhow!("Action has no component {id}"))?;

    if let Some(values) = component_values(component, values)? {
        component.apply_values(values)?;
    }
    component.validate()?;

    info!(href = %component.href(), "Posting component");
    let response = component
        .post(client.as_ref(), account)
        .await?;
    let transaction_size = response
        .transaction_bytes()
        .transpose()
        .context("Transaction is not valid base64")?
        .map(|bytes| bytes.len());

    let output = json!({
        "href": component.href(),
        "transaction": response.transaction,
        "transaction_size": transaction_size,
        "message": response.message,
        "links": response.links,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
