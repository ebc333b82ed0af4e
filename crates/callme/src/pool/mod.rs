//! Resource pool capabilities and their backends.
//!
//! The [`Allocator`](crate::Allocator) never touches a store directly. It
//! speaks to three capabilities:
//!
//! - [`ResourcePool`] - where AVAILABLE and RESERVED numbers live and how a
//!   reservation is created, inspected, released and consumed.
//! - [`Phonebook`] - the durable user → number ownership table.
//! - [`ExistenceCache`] - an optional fast path for "is this number assigned".
//!
//! Two pool strategies are provided:
//!
//! - [`CachePool`] keeps each scope as a set in a key-value store and relies on
//!   the store's atomic set pop/add ([`SetStore`]). Short reservations are
//!   fully rolled back.
//! - `SqlPool` (feature `postgres`) tags rows with conditional updates inside
//!   transactions. Short reservations are rolled back with the transaction.
//!
//! Neither strategy takes an application-level lock. Mutual exclusion comes
//! from the atomic primitives of the backing store.

mod cache;
mod memory;
#[cfg(feature = "redis")]
mod redis_cache;
#[cfg(feature = "postgres")]
mod sql;
#[cfg(test)]
mod tests;

pub use cache::*;
pub use memory::*;
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
#[cfg(feature = "redis")]
pub use redis_cache::*;
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
#[cfg(feature = "postgres")]
pub use sql::*;

use crate::{
    Result,
    types::{AreaCode, PhoneNumber, RefId, Reservation, UserId},
};
use async_trait::async_trait;

/// Storage of allocatable numbers and the reservations drawn from them.
#[async_trait]
pub trait ResourcePool: Send + Sync {
    /// Atomically moves exactly `count` AVAILABLE numbers of `area_code` to
    /// RESERVED under `ref_id`.
    ///
    /// Fails with [`Error::PoolExhausted`](crate::Error::PoolExhausted) when
    /// fewer than `count` are available, leaving the pool unchanged.
    async fn reserve(&self, area_code: AreaCode, ref_id: &RefId, count: usize)
    -> Result<Reservation>;

    /// Looks up a live reservation.
    async fn reservation(&self, ref_id: &RefId) -> Result<Option<Reservation>>;

    /// Returns `skipped` to AVAILABLE in the reservation's area code and drops
    /// them from the reservation.
    async fn release(&self, reservation: &Reservation, skipped: &[PhoneNumber]) -> Result<()>;

    /// Consumes the reservation and records `chosen` as owned by `user`.
    ///
    /// Both effects commit together or not at all. A reservation that was
    /// consumed concurrently yields
    /// [`Error::InvalidReservation`](crate::Error::InvalidReservation).
    async fn finalize(
        &self,
        reservation: &Reservation,
        chosen: &PhoneNumber,
        user: UserId,
    ) -> Result<()>;

    /// Adds numbers to an area code out-of-band. Numbers already present are
    /// ignored. Returns how many were newly added.
    async fn seed(&self, area_code: AreaCode, numbers: &[PhoneNumber]) -> Result<usize>;

    /// Number of AVAILABLE numbers in an area code.
    async fn available(&self, area_code: AreaCode) -> Result<usize>;
}

/// Durable ownership of phone numbers.
#[async_trait]
pub trait Phonebook: Send + Sync {
    async fn owner_of(&self, number: &PhoneNumber) -> Result<Option<UserId>>;

    /// Writes `user` → `number` inside an open transaction without
    /// committing it.
    async fn stage(&self, number: &PhoneNumber, user: UserId) -> Result<Box<dyn StagedAssignment>>;
}

/// A phonebook write waiting for a commit/rollback decision.
#[async_trait]
pub trait StagedAssignment: Send {
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Write-once cache of assigned numbers.
///
/// Entries are never removed because numbers never leave the ASSIGNED state,
/// so a stale positive read cannot happen.
#[async_trait]
pub trait ExistenceCache: Send + Sync {
    async fn contains(&self, number: &PhoneNumber) -> Result<bool>;
    async fn warm(&self, number: &PhoneNumber) -> Result<()>;
}

/// The atomic set primitives [`CachePool`] is built on.
#[async_trait]
pub trait SetStore: Send + Sync {
    /// Removes and returns up to `count` random members.
    async fn pop(&self, key: &str, count: usize) -> Result<Vec<String>>;

    async fn add(&self, key: &str, members: &[String]) -> Result<()>;

    async fn members(&self, key: &str) -> Result<Vec<String>>;

    /// Removes `member` from `key` and deletes what is left of the set, as
    /// one atomic step. Nothing changes when `member` is absent. Returns
    /// whether `member` was removed.
    async fn consume(&self, key: &str, member: &str) -> Result<bool>;

    async fn cardinality(&self, key: &str) -> Result<usize>;

    /// Moves those of `members` still in `from` to `to` as one atomic step.
    /// Members missing from `from` are not added to `to`. Returns how many
    /// moved.
    async fn move_members(&self, from: &str, to: &str, members: &[String]) -> Result<usize>;
}
