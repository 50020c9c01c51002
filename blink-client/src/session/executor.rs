use blink_common::{
    dto::ActionPostResponse,
    models::{
        action::ChainData,
        component::{ButtonComponent, ComponentId, ComponentValues},
        error::{AdapterError, ClientError, ValidationError},
    },
    ExecutionEvent, ExecutionState, UNKNOWN_ERROR_MESSAGE,
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::ActionSession;

/// Failures of an execution request. Only the variants raised before `INITIATE` reach the
/// caller; the others are turned into execution states.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Component {0} does not exist on the current action")]
    UnknownComponent(ComponentId),

    #[error("Component {0} belongs to a superseded action")]
    SupersededComponent(ComponentId),

    #[error(transparent)]
    InvalidValues(#[from] ValidationError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// How an attempt that got past `INITIATE` ended.
enum Outcome {
    /// Connect was cancelled or signing declined.
    Declined,
    /// The endpoint refused to build a transaction.
    Rejected(String),
    Confirmed { response: ActionPostResponse, chain: ChainData },
}

impl ActionSession {
    /// Runs one execution attempt of a component and returns the resulting state.
    ///
    /// Requests that cannot start an attempt (unknown component, values the component
    /// rejects) return an error and leave the state untouched. Once `INITIATE` went through,
    /// every failure ends in one of the execution states. Calls made while the session is not
    /// idle return the state unchanged.
    #[instrument(skip(self, values), fields(key = %self.action.key()))]
    pub async fn execute(
        &mut self,
        id: ComponentId,
        values: Option<ComponentValues>,
    ) -> Result<ExecutionState, ExecutionError> {
        if !self.state.is_idle() {
            debug!(status = %self.state.status, "Ignoring execution request");
            return Ok(self.state.clone());
        }
        let component = self
            .action
            .component_mut(id)
            .ok_or(ExecutionError::UnknownComponent(id))?;
        if let Some(values) = values {
            let mut updated = component.clone();
            if let Err(err) = updated.apply_values(values) {
                warn!(%err, "Rejected component values");
                return Err(err.into());
            }
            *component = updated;
        }
        let label = component.label().to_string();

        self.dispatch(ExecutionEvent::Initiate(id));

        match self.run(id, &label).await {
            Ok(Outcome::Declined) => {
                self.dispatch(ExecutionEvent::Reset);
            }
            Ok(Outcome::Rejected(message)) => {
                self.dispatch(ExecutionEvent::SoftReset(Some(message)));
            }
            Ok(Outcome::Confirmed { response, chain }) => self.complete(response, chain).await,
            Err(err) => {
                warn!(%err, "Execution failed");
                let message = Some(err.to_string())
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| UNKNOWN_ERROR_MESSAGE.to_string());
                self.dispatch(ExecutionEvent::SoftReset(Some(message)));
            }
        }
        Ok(self.state.clone())
    }

    /// Executes a detached button. Buttons derived from an input execute their source.
    ///
    /// Buttons of a superseded action are refused with
    /// [`ExecutionError::SupersededComponent`].
    pub async fn execute_button(
        &mut self,
        button: &ButtonComponent,
        values: Option<ComponentValues>,
    ) -> Result<ExecutionState, ExecutionError> {
        if !self.state.is_idle() {
            debug!(status = %self.state.status, "Ignoring button execution request");
            return Ok(self.state.clone());
        }
        if &button.base.parent != self.action.key() {
            warn!(parent = %button.base.parent, "Button belongs to a superseded action");
            return Err(ExecutionError::SupersededComponent(button.base.id));
        }
        self.execute(button.source.unwrap_or(button.base.id), values)
            .await
    }

    /// Connect, post, sign and confirm.
    async fn run(&self, id: ComponentId, label: &str) -> Result<Outcome, ExecutionError> {
        let context = self.context(label);
        let component = self
            .action
            .component(id)
            .ok_or(ExecutionError::UnknownComponent(id))?;
        let adapter = self.action.adapter();

        let Some(account) = adapter.connect(&context).await? else {
            info!("Wallet connection cancelled");
            return Ok(Outcome::Declined);
        };

        let response = match component
            .post(self.action.client().as_ref(), &account)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(%err, "Action endpoint rejected the request");
                return Ok(Outcome::Rejected(err.to_string()));
            }
        };
        let Some(transaction) = response.transaction.as_deref() else {
            warn!("Action response carries no transaction");
            return Ok(Outcome::Rejected(
                response
                    .message
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_ERROR_MESSAGE.to_string()),
            ));
        };

        let signature = match adapter
            .sign_transaction(transaction, &context)
            .await
        {
            Ok(signature) => signature,
            Err(err) => {
                info!(%err, "Transaction was not signed");
                return Ok(Outcome::Declined);
            }
        };
        adapter
            .confirm_transaction(&signature, &context)
            .await?;
        info!(%signature, "Transaction confirmed");

        Ok(Outcome::Confirmed { response, chain: ChainData { signature, account } })
    }

    /// Follows the continuation link, if any, or finishes with the response's message.
    async fn complete(&mut self, response: ActionPostResponse, chain: ChainData) {
        let Some(next) = response.next().cloned() else {
            self.dispatch(ExecutionEvent::Finish(response.message));
            return;
        };
        match self.action.chain(&next, &chain).await {
            Ok(action) => {
                info!(next = %action.key(), "Continuing with chained action");
                self.replace_action(action);
                self.checked = Some(self.action.key().clone());
                self.supportability = None;
                self.dispatch(ExecutionEvent::Reset);
                self.reclassify().await;
            }
            Err(err) => {
                warn!(%err, "Failed to resolve chained action");
                self.dispatch(ExecutionEvent::Finish(response.message));
            }
        }
    }
}
