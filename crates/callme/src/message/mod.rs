//! Durable message records keyed by idempotency key.
//!
//! A send claims its key by inserting a [`Pending`](crate::types::MessageStatus::Pending)
//! placeholder. Only the caller whose insert actually happened goes on to
//! deliver; everyone else sees the key as already used.

mod memory;
#[cfg(feature = "postgres")]
mod sql;

pub use memory::*;
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
#[cfg(feature = "postgres")]
pub use sql::*;

use crate::{
    Result,
    types::{IdempotencyKey, MessageRecord, ValidSms},
};
use async_trait::async_trait;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Inserts a placeholder for `key` if no record exists.
    ///
    /// Returns `true` when this call created the placeholder and `false` when
    /// a record was already there.
    async fn claim(&self, key: &IdempotencyKey) -> Result<bool>;

    /// Fills the placeholder with the message and marks it sent.
    async fn complete(&self, sms: &ValidSms) -> Result<()>;

    /// Deletes the placeholder for `key`. Sent records are left alone.
    async fn discard(&self, key: &IdempotencyKey) -> Result<()>;

    async fn get(&self, key: &IdempotencyKey) -> Result<Option<MessageRecord>>;
}
