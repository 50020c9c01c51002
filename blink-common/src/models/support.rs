use async_trait::async_trait;
use tracing::debug;

use crate::{
    models::action::{Action, Supportability},
    traits::SupportStrategy,
};

/// Highest action protocol version this client understands.
pub const MAX_SUPPORTED_ACTION_VERSION: &str = "2.4";

/// Compares the blockchains and protocol version an action declares against what the wallet
/// and this client support. Actions declaring neither are considered supported.
#[derive(Debug, Clone)]
pub struct BlockchainSupportStrategy {
    max_version: String,
}

impl Default for BlockchainSupportStrategy {
    fn default() -> Self {
        Self { max_version: MAX_SUPPORTED_ACTION_VERSION.to_string() }
    }
}

impl BlockchainSupportStrategy {
    pub fn with_max_version(max_version: &str) -> Self {
        Self { max_version: max_version.to_string() }
    }
}

fn parse_version(version: &str) -> Option<Vec<u32>> {
    version
        .trim()
        .split('.')
        .map(|part| part.parse().ok())
        .collect()
}

/// `a <= b` on dotted numeric versions, missing components counting as zero.
fn version_at_most(a: &str, b: &str) -> Option<bool> {
    let (mut a, mut b) = (parse_version(a)?, parse_version(b)?);
    let len = a.len().max(b.len());
    a.resize(len, 0);
    b.resize(len, 0);
    Some(a <= b)
}

#[async_trait]
impl SupportStrategy for BlockchainSupportStrategy {
    async fn is_supported(&self, action: &Action) -> Supportability {
        let metadata = action.metadata();

        if let Some(version) = metadata.version.as_deref() {
            match version_at_most(version, &self.max_version) {
                Some(true) => {}
                Some(false) => {
                    return Supportability::unsupported(format!(
                        "Action version {version} is not supported, the maximum supported version is {}",
                        self.max_version
                    ))
                }
                None => {
                    return Supportability::unsupported(format!(
                        "Action declares an invalid version `{version}`"
                    ))
                }
            }
        }

        if !metadata.blockchain_ids.is_empty() {
            let supported = action.adapter().supported_blockchains();
            let missing: Vec<&String> = metadata
                .blockchain_ids
                .iter()
                .filter(|id| !supported.contains(id))
                .collect();
            if !missing.is_empty() {
                debug!(?missing, ?supported, "Wallet lacks blockchains required by action");
                return Supportability::unsupported(format!(
                    "Action requires blockchains the wallet does not support: {}",
                    missing
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
            }
        }

        Supportability::supported()
    }
}
