//! Wire format of action endpoints.
//!
//! Descriptors returned by `GET`, the bodies sent and received by `POST` and the continuation
//! links of chained actions. Nothing here is validated; [`crate::models`] builds the checked
//! domain types from these.
use std::{collections::BTreeMap, fmt};

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Whether the descriptor can still be acted upon.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ActionType {
    #[default]
    Action,
    Completed,
}

/// Body of a successful `GET` against an action URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionGetResponse {
    #[serde(default, rename = "type")]
    pub kind: ActionType,
    pub icon: String,
    pub title: String,
    pub description: String,
    pub label: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub error: Option<ActionError>,
    #[serde(default)]
    pub links: Option<ActionLinks>,
    #[serde(default, alias = "liveData_experimental")]
    pub live_data: Option<LiveDataConfig>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionLinks {
    #[serde(default)]
    pub actions: Vec<LinkedAction>,
}

/// One triggerable entry of a descriptor, before it is turned into a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedAction {
    pub href: String,
    pub label: String,
    #[serde(default)]
    pub parameters: Vec<WireParameter>,
}

/// Parameter as declared by the endpoint. Converted into
/// [`crate::models::parameter::Parameter`], which enforces the input/selectable partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireParameter {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: ParameterType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub min: Option<Bound>,
    #[serde(default)]
    pub max: Option<Bound>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub pattern_description: Option<String>,
    #[serde(default)]
    pub options: Option<Vec<ParameterOption>>,
}

/// Declared input type of a parameter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ParameterType {
    #[default]
    Text,
    Email,
    Url,
    Number,
    Date,
    DatetimeLocal,
    Textarea,
    Select,
    Radio,
    Checkbox,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterOption {
    pub label: String,
    pub value: String,
    #[serde(default)]
    pub selected: bool,
}

/// `min`/`max` are numbers for numeric inputs and ISO strings for dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bound {
    Number(f64),
    Text(String),
}

impl Bound {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Bound::Number(n) => Some(*n),
            Bound::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Number(n) => write!(f, "{n}"),
            Bound::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveDataConfig {
    pub enabled: bool,
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

/// Error reported by an action endpoint, either in a descriptor or as a failed POST body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionError {
    pub message: String,
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ActionError {}

/// The shapes an error body is seen in: `{"message": ..}`, `{"error": ".."}` or
/// `{"error": {"message": ..}}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ErrorBody {
    Message(ActionError),
    Nested { error: ActionError },
    Plain { error: String },
}

impl From<ErrorBody> for ActionError {
    fn from(value: ErrorBody) -> Self {
        match value {
            ErrorBody::Message(err) | ErrorBody::Nested { error: err } => err,
            ErrorBody::Plain { error } => ActionError { message: error },
        }
    }
}

/// Value submitted for one parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Text(String),
    List(Vec<String>),
}

impl ParameterValue {
    /// True if nothing meaningful was entered.
    pub fn is_blank(&self) -> bool {
        match self {
            ParameterValue::Text(s) => s.trim().is_empty(),
            ParameterValue::List(values) => values.is_empty(),
        }
    }

    /// Form used when the value is substituted into an href.
    pub fn to_href_segment(&self) -> String {
        match self {
            ParameterValue::Text(s) => s.trim().to_string(),
            ParameterValue::List(values) => values
                .iter()
                .map(|v| v.trim())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::Text(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        ParameterValue::Text(value)
    }
}

impl From<Vec<String>> for ParameterValue {
    fn from(value: Vec<String>) -> Self {
        ParameterValue::List(value)
    }
}

/// JSON body POSTed to a component's href.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPostRequest {
    pub account: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<BTreeMap<String, ParameterValue>>,
}

/// Successful reply to a component POST.
///
/// `transaction` is optional on the wire so a reply lacking it can be told apart from a
/// transport failure.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionPostResponse {
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub links: Option<PostResponseLinks>,
}

impl ActionPostResponse {
    /// Decodes the base64 transaction, if any.
    pub fn transaction_bytes(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        self.transaction
            .as_deref()
            .map(|tx| STANDARD.decode(tx))
    }

    pub fn next(&self) -> Option<&NextActionLink> {
        self.links
            .as_ref()
            .and_then(|links| links.next.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PostResponseLinks {
    #[serde(default)]
    pub next: Option<NextActionLink>,
}

/// Continuation announced by a successful POST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NextActionLink {
    /// POST `{signature, account}` to `href` to receive the next descriptor.
    Post { href: String },
    /// The next descriptor is embedded.
    Inline { action: Box<ActionGetResponse> },
}

/// Body POSTed to a `post` continuation link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextActionPostRequest {
    pub account: String,
    pub signature: String,
}
