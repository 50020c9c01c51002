use std::time::SystemTime;

use thiserror::Error;

use crate::dto::ActionError;

/// Failures talking to an action endpoint.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// The passed url failed to parse.
    #[error("Failed to parse URL: {0}. Error: {1}")]
    UrlParsing(String, String),

    /// The request data is not correctly formed.
    #[error("Failed to format request: {0}")]
    FormatRequest(String),

    /// Errors forwarded from the HTTP protocol.
    #[error("Unexpected HTTP client error: {0}")]
    HttpClient(String),

    /// The response from the server could not be parsed correctly.
    #[error("Failed to parse response: {0}")]
    ParseResponse(String),

    /// The endpoint explicitly rejected the request. Displays as the endpoint's message.
    #[error("{0}")]
    Action(ActionError),

    #[error("Unexpected status {0}: {1}")]
    UnexpectedStatus(u16, String),

    #[error("Rate limited until {0:?}")]
    RateLimited(Option<SystemTime>),

    #[error("Server unreachable: {0}")]
    ServerUnreachable(String),

    /// Chained actions are never polled on their own.
    #[error("Action {0} is chained and cannot be refreshed")]
    NotRefreshable(String),

    /// The response could not be turned into an action.
    #[error("Invalid action: {0}")]
    InvalidAction(#[from] ParseError),
}

/// A descriptor that deserialised fine but violates the model's invariants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Parameter `{0}` of type {1} declares no options")]
    MissingOptions(String, String),

    #[error("Parameter `{0}` of type {1} cannot declare options")]
    UnexpectedOptions(String, String),

    #[error("Duplicate parameter name `{0}`")]
    DuplicateParameter(String),

    #[error("Invalid href `{0}`: {1}")]
    InvalidHref(String, String),
}

/// Failures reported by the wallet adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// The user refused the request in the wallet.
    #[error("Declined by user: {0}")]
    Declined(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Transaction confirmation failed: {0}")]
    Confirmation(String),
}

/// Input rejected by a parameter's constraints.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("`{0}` is required")]
    Required(String),

    #[error("`{name}` does not match the expected format{}", .description.as_ref().map(|d| format!(": {d}")).unwrap_or_default())]
    PatternMismatch { name: String, description: Option<String> },

    #[error("`{0}` declares an invalid pattern: {1}")]
    InvalidPattern(String, String),

    #[error("`{0}` must be a number")]
    NotANumber(String),

    #[error("`{0}` must be a valid {1}")]
    InvalidFormat(String, String),

    #[error("`{name}` must be at least {min}")]
    BelowMinimum { name: String, min: String },

    #[error("`{name}` must be at most {max}")]
    AboveMaximum { name: String, max: String },

    #[error("`{0}` is not one of the available options")]
    UnknownOption(String),

    #[error("`{0}` accepts a single value")]
    UnexpectedList(String),

    #[error("Unknown parameter `{0}`")]
    UnknownParameter(String),
}
