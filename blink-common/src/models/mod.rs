pub mod action;
pub mod component;
pub mod error;
pub mod execution;
pub mod parameter;
pub mod support;
pub mod trust;

/// Base58 public key of the connected wallet account.
pub type Account = String;

/// Signature returned by the wallet once a transaction is signed.
pub type Signature = String;
