//! The reserve → assign state machine.

use crate::{
    Error, Result,
    pool::{ExistenceCache, Phonebook, ResourcePool},
    sender::NumberLookup,
    types::{AreaCode, DEFAULT_BATCH_SIZE, PhoneNumber, RefId, Reservation, UserId},
};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Numbers handed out per [`Allocator::reserve`].
    pub batch_size: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Hands out phone numbers in two phases.
///
/// [`reserve`](Self::reserve) holds a batch of numbers under a fresh
/// [`RefId`]. [`assign`](Self::assign) later gives one of them to a user and
/// returns the rest to the pool. The allocator is backend-agnostic; all
/// atomicity comes from the [`ResourcePool`] it is built on.
#[derive(Clone)]
pub struct Allocator {
    pool: Arc<dyn ResourcePool>,
    phonebook: Arc<dyn Phonebook>,
    cache: Option<Arc<dyn ExistenceCache>>,
    config: AllocatorConfig,
}

impl Allocator {
    pub fn new(
        pool: Arc<dyn ResourcePool>,
        phonebook: Arc<dyn Phonebook>,
        config: AllocatorConfig,
    ) -> Self {
        Self {
            pool,
            phonebook,
            cache: None,
            config,
        }
    }

    /// Consults `cache` before the phonebook in [`exists`](Self::exists).
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn ExistenceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub const fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<dyn ResourcePool> {
        &self.pool
    }

    /// Whether `number` is assigned to some user.
    #[tracing::instrument(level = "debug", skip(self), fields(number = %number))]
    pub async fn exists(&self, number: &PhoneNumber) -> Result<bool> {
        if let Some(cache) = &self.cache {
            if cache.contains(number).await? {
                tracing::debug!("existence cache hit");
                return Ok(true);
            }
        }

        let owned = self.phonebook.owner_of(number).await?.is_some();
        if owned {
            self.warm(number).await;
        }
        Ok(owned)
    }

    /// Holds a batch of numbers from `area_code` under a fresh reference id.
    #[tracing::instrument(level = "debug", skip(self), fields(area_code = %area_code))]
    pub async fn reserve(&self, area_code: AreaCode) -> Result<Reservation> {
        let ref_id = RefId::generate();
        let reservation = self
            .pool
            .reserve(area_code, &ref_id, self.config.batch_size)
            .await?;
        tracing::debug!(%ref_id, numbers = ?reservation.numbers, "reserved");
        Ok(reservation)
    }

    /// Assigns `chosen` from the reservation `ref_id` to `user` and releases
    /// every other number of the reservation.
    ///
    /// A wrong reference id and a number outside the reservation are both
    /// [`Error::InvalidReservation`] and change nothing.
    #[tracing::instrument(level = "debug", skip(self), fields(ref_id = %ref_id, number = %chosen, user = %user))]
    pub async fn assign(&self, ref_id: &RefId, chosen: &PhoneNumber, user: UserId) -> Result<bool> {
        let reservation = match self.pool.reservation(ref_id).await? {
            Some(reservation) if reservation.holds(chosen) => reservation,
            _ => return Err(Error::InvalidReservation),
        };

        let skipped = reservation.skipped(chosen);
        if let Err(e) = self.pool.release(&reservation, &skipped).await {
            tracing::error!(
                %ref_id,
                numbers = ?skipped,
                error = %e,
                "failed to release skipped numbers, they are stuck reserved"
            );
            return Err(Error::StuckReservation {
                ref_id: ref_id.clone(),
                context: e.to_string(),
            });
        }

        self.pool.finalize(&reservation, chosen, user).await?;
        tracing::debug!(released = skipped.len(), "assigned");

        self.warm(chosen).await;
        Ok(true)
    }

    async fn warm(&self, number: &PhoneNumber) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(e) = cache.warm(number).await {
            tracing::warn!(%number, error = %e, "failed to warm existence cache");
        }
    }
}

#[async_trait]
impl NumberLookup for Allocator {
    async fn exists(&self, number: &PhoneNumber) -> Result<bool> {
        Allocator::exists(self, number).await
    }
}
