//! The key broker capability consumed by the engine.
//!
//! Implementations own transport, authentication, and retry policy. The engine
//! treats every outcome as final for the call in progress.

use async_trait::async_trait;
use common::protocol::{CreateKeysRequest, FetchKeysRequest, KeysResponse};
use common::TransportError;

#[cfg(test)]
pub(crate) mod memory;

/// Mints keys and serves them back by id.
///
/// Must be safe to call concurrently; the engine shares one instance across
/// all calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyBroker: Send + Sync {
    /// Mint the keys described by `request`.
    ///
    /// A policy refusal is an `Ok` response with no keys (and usually an
    /// error condition); `Err` is reserved for transport failure.
    async fn create_keys(&self, request: CreateKeysRequest) -> Result<KeysResponse, TransportError>;

    /// Fetch previously minted keys by id or by external id.
    ///
    /// Keys that cannot be served are reported in `key_errors`.
    async fn fetch_keys(&self, request: FetchKeysRequest) -> Result<KeysResponse, TransportError>;
}
