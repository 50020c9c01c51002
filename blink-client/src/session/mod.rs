//! # Action Session
//!
//! An [`ActionSession`] owns the current [`Action`], its single authoritative
//! [`ExecutionState`] and the trust assessment computed for it. All state transitions go through
//! [`ActionSession::dispatch`], which runs the pure reducer and publishes a
//! [`SessionSnapshot`] for observers such as the live-data refresh task.
//!
//! Checks are keyed on the action identity: replacing the action (a new resolution, or a chain
//! result) re-runs trust classification, and a supportability probe for unchained actions.
use std::sync::Arc;

use blink_common::{
    dto::ActionType,
    models::{
        action::{Action, Supportability},
        component::{ActionKey, Component, ComponentId, ComponentKind, ComponentValues},
        error::ValidationError,
        parameter::Parameter,
        trust::{classify, Disclaimer, Origin, TrustAssessment},
    },
    reduce,
    traits::{AdapterContext, TrustRegistry},
    ExecutionEvent, ExecutionState, ExecutionStatus,
};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;

mod executor;
pub mod live;

pub use executor::ExecutionError;
pub use live::{LiveDataHandle, RefreshedAction};

/// What observers of a session see: which action lineage is current and its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Bumped whenever the current action is superseded by a chain step or a new resolution.
    pub lineage: u64,
    pub status: ExecutionStatus,
}

/// Render description of one component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentDescriptor {
    pub id: ComponentId,
    pub kind: ComponentKind,
    pub label: String,
    pub href: String,
    pub disabled: bool,
    pub parameters: Vec<Parameter>,
}

pub struct ActionSession {
    action: Action,
    state: ExecutionState,
    origin: Option<Origin>,
    registry: Arc<dyn TrustRegistry>,
    config: SessionConfig,
    assessment: TrustAssessment,
    supportability: Option<Supportability>,
    checked: Option<ActionKey>,
    /// User accepted the disclaimer of the current lineage and origin.
    overridden: bool,
    lineage: u64,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl ActionSession {
    /// Creates a session and runs the initial trust and supportability checks.
    pub async fn start(
        action: Action,
        registry: Arc<dyn TrustRegistry>,
        origin: Option<Origin>,
        config: SessionConfig,
    ) -> Self {
        let state = ExecutionState::default();
        let (snapshot_tx, _) = watch::channel(SessionSnapshot { lineage: 0, status: state.status });
        let mut session = Self {
            action,
            state,
            origin,
            registry,
            config,
            assessment: TrustAssessment::default(),
            supportability: None,
            checked: None,
            overridden: false,
            lineage: 0,
            snapshot_tx,
        };
        session.reclassify().await;
        session.check_supportability().await;
        session
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    pub fn assessment(&self) -> &TrustAssessment {
        &self.assessment
    }

    /// Result of the supportability probe of the current action, if one ran.
    pub fn supportability(&self) -> Option<&Supportability> {
        self.supportability.as_ref()
    }

    pub fn disclaimer(&self) -> Option<Disclaimer> {
        self.assessment
            .disclaimer(self.config.get_security_level())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot { lineage: self.lineage, status: self.state.status }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Runs the reducer and publishes the resulting snapshot.
    pub(crate) fn dispatch(&mut self, event: ExecutionEvent) -> &ExecutionState {
        let next = reduce(&self.state, event.clone());
        if next != self.state {
            debug!(?event, from = %self.state.status, to = %next.status, "Execution state transition");
        } else {
            debug!(?event, status = %self.state.status, "Ignored execution event");
        }
        self.state = next;
        self.snapshot_tx
            .send_replace(self.snapshot());
        &self.state
    }

    /// Probes supportability once per action identity and leaves the gating state.
    ///
    /// Chained actions skip the probe; only the trust gate applies to them.
    async fn check_supportability(&mut self) {
        if self.checked.as_ref() == Some(self.action.key()) {
            return;
        }
        self.checked = Some(self.action.key().clone());
        self.dispatch(ExecutionEvent::CheckSupportability);

        if self.action.is_chained() {
            self.supportability = None;
        } else {
            let supportability = self.action.is_supported().await;
            if !supportability.is_supported {
                warn!(
                    key = %self.action.key(),
                    message = ?supportability.message,
                    "Action is not supported"
                );
            }
            self.supportability = Some(supportability);
        }
        self.apply_gate();
    }

    fn is_unsupported(&self) -> bool {
        self.supportability
            .as_ref()
            .is_some_and(|s| !s.is_supported)
    }

    /// Leaves `checking-supportability` for `idle` or `blocked`.
    fn apply_gate(&mut self) {
        let blocked =
            self.is_unsupported() || self.assessment.must_block(self.config.get_security_level());
        if blocked {
            self.dispatch(ExecutionEvent::Block);
        } else {
            self.dispatch(ExecutionEvent::Reset);
        }
    }

    /// Recomputes the trust assessment and blocks when the verdict demands it, unless the user
    /// already accepted the disclaimer. A trust block is lifted once the verdict passes.
    ///
    /// While checking supportability the gate is applied by the probe's completion instead.
    pub async fn reclassify(&mut self) -> &TrustAssessment {
        self.assessment =
            classify(self.registry.as_ref(), self.action.url(), self.origin.as_ref()).await;
        let must_block = self
            .assessment
            .must_block(self.config.get_security_level());
        match self.state.status {
            ExecutionStatus::CheckingSupportability => {}
            ExecutionStatus::Blocked if !must_block && !self.is_unsupported() => {
                info!(verdict = %self.assessment.verdict, "Lifting trust block");
                self.dispatch(ExecutionEvent::Unblock);
            }
            _ if must_block && !self.overridden => {
                info!(verdict = %self.assessment.verdict, "Blocking execution after trust check");
                self.dispatch(ExecutionEvent::Block);
            }
            _ => {}
        }
        &self.assessment
    }

    /// Changes the surface the action is launched from.
    pub async fn set_origin(&mut self, origin: Option<Origin>) -> &TrustAssessment {
        if self.origin == origin {
            return &self.assessment;
        }
        self.origin = origin;
        self.overridden = false;
        self.reclassify().await
    }

    /// Replaces the current action with a freshly resolved one and re-runs every check.
    pub async fn set_action(&mut self, action: Action) -> &ExecutionState {
        self.replace_action(action);
        self.reclassify().await;
        self.check_supportability().await;
        &self.state
    }

    fn replace_action(&mut self, action: Action) {
        debug!(from = %self.action.key(), to = %action.key(), "Replacing current action");
        self.action = action;
        self.overridden = false;
        self.lineage += 1;
        self.snapshot_tx
            .send_replace(self.snapshot());
    }

    /// Applies a user override of the current disclaimer.
    ///
    /// Unsupported actions and disclaimers that are not ignorable stay blocked.
    pub fn unblock(&mut self) -> &ExecutionState {
        let ignorable = self
            .disclaimer()
            .is_some_and(|d| d.ignorable);
        if self.state.status == ExecutionStatus::Blocked && ignorable && !self.is_unsupported() {
            info!(key = %self.action.key(), "Execution unblocked by user override");
            self.overridden = true;
            self.dispatch(ExecutionEvent::Unblock);
        } else {
            debug!(status = %self.state.status, ignorable, "Refusing to unblock");
        }
        &self.state
    }

    /// Leaves a finished attempt (`success` or `error`) for a fresh one.
    ///
    /// The gate is applied again: an unsupported action, or a trust verdict the user has not
    /// overridden, lands in `blocked` instead of `idle`.
    pub fn reset(&mut self) -> &ExecutionState {
        if !matches!(self.state.status, ExecutionStatus::Success | ExecutionStatus::Error) {
            debug!(status = %self.state.status, "Nothing to reset");
            return &self.state;
        }
        self.dispatch(ExecutionEvent::Reset);
        let must_block = self
            .assessment
            .must_block(self.config.get_security_level());
        if self.is_unsupported() || (must_block && !self.overridden) {
            self.dispatch(ExecutionEvent::Block);
        }
        &self.state
    }

    /// Render descriptors. While a component executes, only that component is listed.
    pub fn descriptors(&self) -> Vec<ComponentDescriptor> {
        let status = self.state.status;
        let completed = self.action.kind() == ActionType::Completed;
        self.action
            .components()
            .iter()
            .filter(|c| {
                status != ExecutionStatus::Executing ||
                    self.state.executing_action == Some(c.id())
            })
            .map(|c| ComponentDescriptor {
                id: c.id(),
                kind: c.kind(),
                label: self.component_label(c),
                href: c.href(),
                disabled: self.action.disabled() || completed || status != ExecutionStatus::Idle,
                parameters: c
                    .parameters()
                    .into_iter()
                    .cloned()
                    .collect(),
            })
            .collect()
    }

    fn component_label(&self, component: &Component) -> String {
        match self.state.status {
            ExecutionStatus::Executing => "Executing".to_string(),
            ExecutionStatus::Success => "Completed".to_string(),
            ExecutionStatus::Error => "Failed".to_string(),
            ExecutionStatus::CheckingSupportability => "Loading".to_string(),
            ExecutionStatus::Idle | ExecutionStatus::Blocked => component.label().to_string(),
        }
    }

    /// Checks `values` against the component's parameters without touching the action.
    pub fn validate_values(
        &self,
        id: ComponentId,
        values: Option<ComponentValues>,
    ) -> Result<(), ValidationError> {
        let mut component = self
            .action
            .component(id)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownParameter(format!("component {id}")))?;
        if let Some(values) = values {
            component.apply_values(values)?;
        }
        component.validate()
    }

    /// Starts polling the current action, or returns `None` when it must not be polled.
    pub fn start_live_data(&self) -> Option<LiveDataHandle> {
        if !self.state.is_idle() {
            return None;
        }
        let default_delay = self.config.get_live_data_delay();
        let delay = self
            .action
            .live_data_delay_or(default_delay)?;
        Some(live::spawn(
            self.action.clone(),
            delay,
            default_delay,
            self.lineage,
            self.subscribe(),
        ))
    }

    /// Applies a refreshed action. Results from a superseded lineage or arriving while the
    /// session is not idle are discarded.
    pub async fn apply_refresh(&mut self, refreshed: RefreshedAction) -> bool {
        if refreshed.lineage != self.lineage || !self.state.is_idle() {
            debug!(
                lineage = refreshed.lineage,
                current = self.lineage,
                status = %self.state.status,
                "Discarding stale refresh"
            );
            return false;
        }
        debug!(from = %self.action.key(), to = %refreshed.action.key(), "Applying refreshed action");
        self.action = refreshed.action;
        self.checked = Some(self.action.key().clone());
        self.reclassify().await;
        true
    }

    fn context(&self, label: &str) -> AdapterContext {
        AdapterContext {
            action_url: self.action.url().to_string(),
            origin_url: self
                .origin
                .as_ref()
                .map(|o| o.url.to_string()),
            trust: self.assessment.verdict,
            triggered_label: label.to_string(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use blink_common::{
        dto::{ActionGetResponse, ActionLinks, Bound, LinkedAction, ParameterType, WireParameter},
        models::{
            action::{ActionMetadata, ActionServices},
            trust::{DisclaimerKind, LookupKind, OriginKind, SecurityLevel, TrustState},
        },
        traits::{
            MockActionAdapter, MockActionClient, MockSupportStrategy, MockTrustRegistry,
            ResolvedAction,
        },
    };
    use mockall::predicate::{always, eq};
    use pretty_assertions::assert_eq;
    use url::Url;

    use super::*;

    pub(crate) fn action_url() -> Url {
        Url::parse("https://actions.example/api/donate").unwrap()
    }

    pub(crate) fn get_response(actions: Vec<LinkedAction>) -> ActionGetResponse {
        ActionGetResponse {
            kind: ActionType::Action,
            icon: "https://actions.example/icon.png".to_string(),
            title: "Donate".to_string(),
            description: "Donate to the project".to_string(),
            label: "Donate".to_string(),
            disabled: false,
            error: None,
            links: Some(ActionLinks { actions }),
            live_data: None,
        }
    }

    pub(crate) fn button(href: &str, label: &str) -> LinkedAction {
        LinkedAction { href: href.to_string(), label: label.to_string(), parameters: vec![] }
    }

    pub(crate) fn amount_input() -> LinkedAction {
        LinkedAction {
            href: "/api/donate?amount={amount}".to_string(),
            label: "Donate".to_string(),
            parameters: vec![WireParameter {
                name: "amount".to_string(),
                label: Some("Amount".to_string()),
                kind: ParameterType::Number,
                required: true,
                min: Some(Bound::Number(1.0)),
                max: None,
                pattern: None,
                pattern_description: None,
                options: None,
            }],
        }
    }

    pub(crate) fn registry(action: TrustState) -> MockTrustRegistry {
        let mut registry = MockTrustRegistry::new();
        registry
            .expect_lookup()
            .with(always(), eq(LookupKind::Action))
            .return_const(action);
        registry
    }

    pub(crate) fn supported() -> MockSupportStrategy {
        let mut support = MockSupportStrategy::new();
        support
            .expect_is_supported()
            .returning(|_| Supportability::supported());
        support
    }

    pub(crate) fn action_with(
        response: ActionGetResponse,
        client: MockActionClient,
        adapter: MockActionAdapter,
        support: MockSupportStrategy,
    ) -> Action {
        let services = Arc::new(
            ActionServices::new(Arc::new(client), Arc::new(adapter))
                .with_support_strategy(Arc::new(support)),
        );
        Action::from_response(
            action_url(),
            ResolvedAction { response, metadata: ActionMetadata::default() },
            services,
            false,
        )
        .unwrap()
    }

    pub(crate) async fn session_with(
        action: Action,
        registry: MockTrustRegistry,
        config: SessionConfig,
    ) -> ActionSession {
        ActionSession::start(action, Arc::new(registry), None, config).await
    }

    #[tokio::test]
    async fn test_start_trusted_supported_is_idle() {
        let action = action_with(
            get_response(vec![button("/api/donate", "Donate")]),
            MockActionClient::new(),
            MockActionAdapter::new(),
            supported(),
        );

        let session =
            session_with(action, registry(TrustState::Trusted), SessionConfig::default()).await;

        assert_eq!(session.state().status, ExecutionStatus::Idle);
        assert_eq!(session.disclaimer(), None);
        assert_eq!(session.supportability(), Some(&Supportability::supported()));
    }

    #[tokio::test]
    async fn test_unknown_blocks_under_only_trusted_and_can_be_unblocked() {
        let action = action_with(
            get_response(vec![button("/api/donate", "Donate")]),
            MockActionClient::new(),
            MockActionAdapter::new(),
            supported(),
        );

        let mut session =
            session_with(action, registry(TrustState::Unknown), SessionConfig::default()).await;

        assert_eq!(session.state().status, ExecutionStatus::Blocked);
        assert!(session.disclaimer().unwrap().ignorable);
        assert_eq!(session.unblock().status, ExecutionStatus::Idle);
    }

    #[tokio::test]
    async fn test_unknown_passes_under_non_malicious() {
        let action = action_with(
            get_response(vec![button("/api/donate", "Donate")]),
            MockActionClient::new(),
            MockActionAdapter::new(),
            supported(),
        );

        let session = session_with(
            action,
            registry(TrustState::Unknown),
            SessionConfig::new().security_level(SecurityLevel::NonMalicious),
        )
        .await;

        assert_eq!(session.state().status, ExecutionStatus::Idle);
        assert_eq!(
            session.disclaimer().map(|d| d.kind),
            Some(DisclaimerKind::Unknown)
        );
    }

    #[tokio::test]
    async fn test_unsupported_action_stays_blocked() {
        let mut support = MockSupportStrategy::new();
        support
            .expect_is_supported()
            .times(1)
            .returning(|_| Supportability::unsupported("wallet lacks devnet".to_string()));
        let action = action_with(
            get_response(vec![button("/api/donate", "Donate")]),
            MockActionClient::new(),
            MockActionAdapter::new(),
            support,
        );

        let mut session =
            session_with(action, registry(TrustState::Trusted), SessionConfig::default()).await;

        assert_eq!(session.state().status, ExecutionStatus::Blocked);
        assert_eq!(
            session
                .supportability()
                .and_then(|s| s.message.as_deref()),
            Some("wallet lacks devnet")
        );
        assert_eq!(session.unblock().status, ExecutionStatus::Blocked);
    }

    #[tokio::test]
    async fn test_scenario_d_malicious_action_unknown_origin() {
        let mut registry = MockTrustRegistry::new();
        registry
            .expect_lookup()
            .with(always(), eq(LookupKind::Action))
            .return_const(TrustState::Malicious);
        registry
            .expect_lookup()
            .with(always(), eq(LookupKind::Website))
            .return_const(TrustState::Unknown);
        let registry = Arc::new(registry);
        let origin = Origin {
            url: Url::parse("https://feed.example/post/1").unwrap(),
            kind: OriginKind::Website,
        };
        let new_action = || {
            action_with(
                get_response(vec![button("/api/donate", "Donate")]),
                MockActionClient::new(),
                MockActionAdapter::new(),
                supported(),
            )
        };

        let mut strict = ActionSession::start(
            new_action(),
            registry.clone(),
            Some(origin.clone()),
            SessionConfig::default(),
        )
        .await;
        assert_eq!(strict.assessment().verdict, TrustState::Malicious);
        assert_eq!(strict.state().status, ExecutionStatus::Blocked);
        assert!(!strict.disclaimer().unwrap().ignorable);
        assert_eq!(strict.unblock().status, ExecutionStatus::Blocked);

        let mut permissive = ActionSession::start(
            new_action(),
            registry,
            Some(origin),
            SessionConfig::new().security_level(SecurityLevel::All),
        )
        .await;
        assert_eq!(permissive.state().status, ExecutionStatus::Blocked);
        assert!(permissive.disclaimer().unwrap().ignorable);
        assert_eq!(permissive.unblock().status, ExecutionStatus::Idle);
    }

    #[tokio::test]
    async fn test_origin_change_reclassifies_and_blocks() {
        let mut registry = MockTrustRegistry::new();
        registry
            .expect_lookup()
            .with(always(), eq(LookupKind::Action))
            .return_const(TrustState::Trusted);
        registry
            .expect_lookup()
            .with(always(), eq(LookupKind::Interstitial))
            .times(1)
            .return_const(TrustState::Malicious);
        let action = action_with(
            get_response(vec![button("/api/donate", "Donate")]),
            MockActionClient::new(),
            MockActionAdapter::new(),
            supported(),
        );
        let mut session = session_with(action, registry, SessionConfig::default()).await;
        assert_eq!(session.state().status, ExecutionStatus::Idle);

        let origin = Origin {
            url: Url::parse("https://dial.example/?action=x").unwrap(),
            kind: OriginKind::Interstitial,
        };
        let assessment = *session.set_origin(Some(origin.clone())).await;
        // same origin again is a no-op
        session.set_origin(Some(origin)).await;

        assert_eq!(assessment.verdict, TrustState::Malicious);
        assert_eq!(session.state().status, ExecutionStatus::Blocked);
    }

    #[tokio::test]
    async fn test_supportability_checked_once_per_identity() {
        let mut support = MockSupportStrategy::new();
        support
            .expect_is_supported()
            .times(2)
            .returning(|_| Supportability::supported());
        let services = Arc::new(
            ActionServices::new(
                Arc::new(MockActionClient::new()),
                Arc::new(MockActionAdapter::new()),
            )
            .with_support_strategy(Arc::new(support)),
        );
        let resolve = || {
            Action::from_response(
                action_url(),
                ResolvedAction {
                    response: get_response(vec![button("/api/donate", "Donate")]),
                    metadata: ActionMetadata::default(),
                },
                services.clone(),
                false,
            )
            .unwrap()
        };
        let mut session =
            session_with(resolve(), registry(TrustState::Trusted), SessionConfig::default()).await;

        session.check_supportability().await;
        session.set_action(resolve()).await;

        assert_eq!(session.state().status, ExecutionStatus::Idle);
        assert_eq!(session.snapshot().lineage, 1);
    }

    #[tokio::test]
    async fn test_descriptors_follow_status() {
        let action = action_with(
            get_response(vec![button("/api/donate?amount=1", "Donate 1"), amount_input()]),
            MockActionClient::new(),
            MockActionAdapter::new(),
            supported(),
        );
        let mut session =
            session_with(action, registry(TrustState::Trusted), SessionConfig::default()).await;

        let idle = session.descriptors();
        assert_eq!(idle.len(), 2);
        assert_eq!(idle[0].label, "Donate 1");
        assert!(!idle[0].disabled);
        assert_eq!(idle[1].kind, ComponentKind::SingleValue);
        assert_eq!(idle[1].parameters[0].name, "amount");

        session.dispatch(ExecutionEvent::Initiate(ComponentId(1)));
        let executing = session.descriptors();
        assert_eq!(executing.len(), 1);
        assert_eq!(executing[0].id, ComponentId(1));
        assert_eq!(executing[0].label, "Executing");
        assert!(executing[0].disabled);
    }

    #[tokio::test]
    async fn test_validate_values() {
        let action = action_with(
            get_response(vec![amount_input()]),
            MockActionClient::new(),
            MockActionAdapter::new(),
            supported(),
        );
        let session =
            session_with(action, registry(TrustState::Trusted), SessionConfig::default()).await;

        assert!(session
            .validate_values(ComponentId(0), Some(ComponentValues::Single("5".to_string())))
            .is_ok());
        assert!(matches!(
            session.validate_values(ComponentId(0), Some(ComponentValues::Single("0".to_string()))),
            Err(ValidationError::BelowMinimum { .. })
        ));
        assert!(matches!(
            session.validate_values(ComponentId(0), None),
            Err(ValidationError::Required(_))
        ));
    }

    #[tokio::test]
    async fn test_reset_reapplies_gate() {
        let new_action = || {
            action_with(
                get_response(vec![button("/api/donate", "Donate")]),
                MockActionClient::new(),
                MockActionAdapter::new(),
                supported(),
            )
        };

        let mut overridden = session_with(
            new_action(),
            registry(TrustState::Unknown),
            SessionConfig::default(),
        )
        .await;
        assert_eq!(overridden.unblock().status, ExecutionStatus::Idle);
        overridden.dispatch(ExecutionEvent::Initiate(ComponentId(0)));
        overridden.dispatch(ExecutionEvent::Finish(Some("Done".to_string())));
        assert_eq!(overridden.reset(), &ExecutionState::default());

        let mut malicious = session_with(
            new_action(),
            registry(TrustState::Malicious),
            SessionConfig::default(),
        )
        .await;
        malicious.dispatch(ExecutionEvent::Fail("boom".to_string()));
        assert_eq!(malicious.state().status, ExecutionStatus::Error);
        assert_eq!(malicious.reset().status, ExecutionStatus::Blocked);
        // blocked is left through unblock only
        assert_eq!(malicious.reset().status, ExecutionStatus::Blocked);
        assert_eq!(malicious.unblock().status, ExecutionStatus::Blocked);
    }
}
