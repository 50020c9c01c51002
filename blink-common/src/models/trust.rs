//! Trust classification of actions and the surfaces they are launched from.
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tracing::debug;
use url::Url;

use crate::traits::TrustRegistry;

/// Label assigned by the trust registry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TrustState {
    Trusted,
    #[default]
    Unknown,
    Malicious,
}

impl TrustState {
    fn severity(self) -> u8 {
        match self {
            TrustState::Trusted => 0,
            TrustState::Unknown => 1,
            TrustState::Malicious => 2,
        }
    }
}

/// Most severe label wins: `malicious > unknown > trusted`.
pub fn merge(a: TrustState, b: TrustState) -> TrustState {
    if a.severity() >= b.severity() {
        a
    } else {
        b
    }
}

/// Registry section a url is looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LookupKind {
    Action,
    Website,
    Interstitial,
}

/// Surface an action was launched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub url: Url,
    pub kind: OriginKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginKind {
    Website,
    Interstitial,
}

impl From<OriginKind> for LookupKind {
    fn from(value: OriginKind) -> Self {
        match value {
            OriginKind::Website => LookupKind::Website,
            OriginKind::Interstitial => LookupKind::Interstitial,
        }
    }
}

/// Which verdicts the hosting UI lets through without a user override.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SecurityLevel {
    #[default]
    OnlyTrusted,
    NonMalicious,
    All,
}

impl SecurityLevel {
    pub fn passes(self, verdict: TrustState) -> bool {
        match self {
            SecurityLevel::OnlyTrusted => verdict == TrustState::Trusted,
            SecurityLevel::NonMalicious => verdict != TrustState::Malicious,
            SecurityLevel::All => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DisclaimerKind {
    Blocked,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Disclaimer {
    pub kind: DisclaimerKind,
    /// Whether a user override may dismiss the disclaimer and unblock execution.
    pub ignorable: bool,
}

/// Result of classifying one action against its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrustAssessment {
    pub action_state: TrustState,
    pub origin_state: Option<TrustState>,
    pub verdict: TrustState,
}

impl Default for TrustAssessment {
    fn default() -> Self {
        TrustAssessment::from_states(TrustState::Unknown, None)
    }
}

impl TrustAssessment {
    pub fn from_states(action_state: TrustState, origin_state: Option<TrustState>) -> Self {
        let verdict = origin_state
            .map(|origin| merge(action_state, origin))
            .unwrap_or(action_state);
        Self { action_state, origin_state, verdict }
    }

    /// True iff at least one side carries a label other than `unknown`.
    pub fn has_explicit_signal(&self) -> bool {
        self.action_state != TrustState::Unknown ||
            self.origin_state
                .is_some_and(|s| s != TrustState::Unknown)
    }

    /// Whether execution has to start out blocked under `level`.
    pub fn must_block(&self, level: SecurityLevel) -> bool {
        self.verdict == TrustState::Malicious || !level.passes(self.verdict)
    }

    pub fn disclaimer(&self, level: SecurityLevel) -> Option<Disclaimer> {
        match self.verdict {
            TrustState::Malicious => Some(Disclaimer {
                kind: DisclaimerKind::Blocked,
                ignorable: self.has_explicit_signal() && level.passes(self.verdict),
            }),
            TrustState::Unknown => Some(Disclaimer { kind: DisclaimerKind::Unknown, ignorable: true }),
            TrustState::Trusted => None,
        }
    }
}

/// Looks up the action url and, when it differs from the action url, the origin.
pub async fn classify(
    registry: &dyn TrustRegistry,
    action_url: &Url,
    origin: Option<&Origin>,
) -> TrustAssessment {
    let action_state = registry
        .lookup(action_url, LookupKind::Action)
        .await;
    let origin_state = match origin.filter(|o| &o.url != action_url) {
        Some(origin) => Some(
            registry
                .lookup(&origin.url, origin.kind.into())
                .await,
        ),
        None => None,
    };
    let assessment = TrustAssessment::from_states(action_state, origin_state);
    debug!(%action_url, ?assessment, "Classified action trust");
    assessment
}

#[cfg(test)]
mod tests {
    use mockall::predicate::{always, eq};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::traits::MockTrustRegistry;

    #[rstest]
    #[case(TrustState::Malicious, TrustState::Trusted, TrustState::Malicious)]
    #[case(TrustState::Trusted, TrustState::Unknown, TrustState::Unknown)]
    #[case(TrustState::Trusted, TrustState::Trusted, TrustState::Trusted)]
    #[case(TrustState::Unknown, TrustState::Malicious, TrustState::Malicious)]
    #[case(TrustState::Unknown, TrustState::Unknown, TrustState::Unknown)]
    fn test_merge_precedence(
        #[case] a: TrustState,
        #[case] b: TrustState,
        #[case] expected: TrustState,
    ) {
        assert_eq!(merge(a, b), expected);
        assert_eq!(merge(b, a), expected);
    }

    #[rstest]
    #[case(SecurityLevel::OnlyTrusted, TrustState::Trusted, true)]
    #[case(SecurityLevel::OnlyTrusted, TrustState::Unknown, false)]
    #[case(SecurityLevel::NonMalicious, TrustState::Unknown, true)]
    #[case(SecurityLevel::NonMalicious, TrustState::Malicious, false)]
    #[case(SecurityLevel::All, TrustState::Malicious, true)]
    fn test_security_level(
        #[case] level: SecurityLevel,
        #[case] verdict: TrustState,
        #[case] expected: bool,
    ) {
        assert_eq!(level.passes(verdict), expected);
    }

    #[test]
    fn test_disclaimers() {
        let trusted = TrustAssessment::from_states(TrustState::Trusted, None);
        assert_eq!(trusted.disclaimer(SecurityLevel::OnlyTrusted), None);
        assert!(!trusted.must_block(SecurityLevel::OnlyTrusted));

        let unknown = TrustAssessment::from_states(TrustState::Unknown, Some(TrustState::Unknown));
        assert!(!unknown.has_explicit_signal());
        assert_eq!(
            unknown.disclaimer(SecurityLevel::OnlyTrusted),
            Some(Disclaimer { kind: DisclaimerKind::Unknown, ignorable: true })
        );
        assert!(unknown.must_block(SecurityLevel::OnlyTrusted));
        assert!(!unknown.must_block(SecurityLevel::NonMalicious));

        let malicious =
            TrustAssessment::from_states(TrustState::Malicious, Some(TrustState::Unknown));
        assert_eq!(malicious.verdict, TrustState::Malicious);
        assert!(malicious.must_block(SecurityLevel::All));
        assert_eq!(
            malicious.disclaimer(SecurityLevel::OnlyTrusted),
            Some(Disclaimer { kind: DisclaimerKind::Blocked, ignorable: false })
        );
        assert_eq!(
            malicious.disclaimer(SecurityLevel::All),
            Some(Disclaimer { kind: DisclaimerKind::Blocked, ignorable: true })
        );
    }

    #[tokio::test]
    async fn test_classify_looks_up_origin_kind() {
        let action_url = Url::parse("https://actions.example/api/buy").unwrap();
        let origin = Origin {
            url: Url::parse("https://dial.example/?action=solana-action:x").unwrap(),
            kind: OriginKind::Interstitial,
        };
        let mut registry = MockTrustRegistry::new();
        registry
            .expect_lookup()
            .with(eq(action_url.clone()), eq(LookupKind::Action))
            .return_const(TrustState::Trusted);
        registry
            .expect_lookup()
            .with(eq(origin.url.clone()), eq(LookupKind::Interstitial))
            .return_const(TrustState::Malicious);

        let assessment = classify(&registry, &action_url, Some(&origin)).await;

        assert_eq!(
            assessment,
            TrustAssessment {
                action_state: TrustState::Trusted,
                origin_state: Some(TrustState::Malicious),
                verdict: TrustState::Malicious,
            }
        );
    }

    #[tokio::test]
    async fn test_classify_skips_origin_equal_to_action() {
        let action_url = Url::parse("https://actions.example/api/buy").unwrap();
        let origin = Origin { url: action_url.clone(), kind: OriginKind::Website };
        let mut registry = MockTrustRegistry::new();
        registry
            .expect_lookup()
            .with(always(), eq(LookupKind::Action))
            .times(1)
            .return_const(TrustState::Trusted);

        let assessment = classify(&registry, &action_url, Some(&origin)).await;

        assert_eq!(assessment.origin_state, None);
        assert_eq!(assessment.verdict, TrustState::Trusted);
    }
}
