use super::{Phonebook, ResourcePool, SetStore};
use crate::{
    Error, Result,
    types::{AreaCode, PhoneNumber, RefId, Reservation, UserId},
};
use async_trait::async_trait;
use std::sync::Arc;

/// Prefix of the cache set recording a reservation.
pub const REF_ID_KEY_PREFIX: &str = "refid-";

/// Cache set holding the numbers of a reservation plus its area code marker.
pub fn reservation_key(ref_id: &RefId) -> String {
    format!("{REF_ID_KEY_PREFIX}{ref_id}")
}

/// [`ResourcePool`] over atomic set operations.
///
/// Layout:
///
/// - `areacode-<code>`: AVAILABLE numbers of an area code.
/// - `refid-<ref_id>`: RESERVED numbers of a reservation, plus the
///   `areacode-<code>` key they were popped from so a later assign knows
///   where to return the skipped ones.
///
/// Assigned numbers live in neither set; ownership is recorded in the
/// [`Phonebook`]. Numbers only ever move out of a `refid-` set through atomic
/// store steps that check membership first, so two assigns racing on one
/// reservation can not both hand out the same number or put a chosen number
/// back in the pool.
pub struct CachePool<S> {
    sets: S,
    phonebook: Arc<dyn Phonebook>,
}

impl<S> CachePool<S>
where
    S: SetStore,
{
    pub fn new(sets: S, phonebook: Arc<dyn Phonebook>) -> Self {
        Self { sets, phonebook }
    }

    pub fn sets(&self) -> &S {
        &self.sets
    }

    /// Puts popped numbers back into their scope set. If that fails the
    /// numbers are in no set at all.
    async fn give_back(&self, ref_id: &RefId, scope_key: &str, popped: &[String]) -> Result<()> {
        self.sets.add(scope_key, popped).await.map_err(|e| {
            tracing::error!(
                %ref_id,
                scope = scope_key,
                numbers = ?popped,
                error = %e,
                "failed to return popped numbers to the pool, they are stuck reserved"
            );
            Error::StuckReservation {
                ref_id: ref_id.clone(),
                context: e.to_string(),
            }
        })
    }

    /// Re-creates a consumed reservation set so the reference id stays usable.
    async fn restore(&self, reservation: &Reservation, chosen: &PhoneNumber) {
        let members = [
            chosen.as_str().to_owned(),
            reservation.area_code.cache_key(),
        ];
        if let Err(e) = self
            .sets
            .add(&reservation_key(&reservation.ref_id), &members)
            .await
        {
            tracing::error!(
                ref_id = %reservation.ref_id,
                number = %chosen,
                error = %e,
                "failed to restore reservation after an aborted assign, number is stuck reserved"
            );
        }
    }
}

fn decode_number(member: String) -> Result<PhoneNumber> {
    PhoneNumber::parse(member).map_err(|e| Error::store("decode member", e))
}

#[async_trait]
impl<S> ResourcePool for CachePool<S>
where
    S: SetStore,
{
    async fn reserve(
        &self,
        area_code: AreaCode,
        ref_id: &RefId,
        count: usize,
    ) -> Result<Reservation> {
        let scope_key = area_code.cache_key();
        let popped = self.sets.pop(&scope_key, count).await?;

        if popped.len() < count {
            if !popped.is_empty() {
                self.give_back(ref_id, &scope_key, &popped).await?;
            }
            tracing::warn!(
                %area_code,
                available = popped.len(),
                wanted = count,
                "running out of available phone numbers"
            );
            return Err(Error::PoolExhausted { area_code });
        }

        let mut members = popped.clone();
        members.push(scope_key.clone());
        if let Err(e) = self.sets.add(&reservation_key(ref_id), &members).await {
            self.give_back(ref_id, &scope_key, &popped).await?;
            return Err(e);
        }

        let numbers = popped
            .into_iter()
            .map(decode_number)
            .collect::<Result<Vec<_>>>()?;

        Ok(Reservation {
            ref_id: ref_id.clone(),
            area_code,
            numbers,
        })
    }

    async fn reservation(&self, ref_id: &RefId) -> Result<Option<Reservation>> {
        let members = self.sets.members(&reservation_key(ref_id)).await?;
        if members.is_empty() {
            return Ok(None);
        }

        let mut area_code = None;
        let mut numbers = Vec::with_capacity(members.len());
        for member in members {
            match AreaCode::from_cache_key(&member) {
                Some(code) => area_code = Some(code),
                None => numbers.push(decode_number(member)?),
            }
        }
        numbers.sort();

        let area_code = area_code.ok_or_else(|| Error::Store {
            context: format!("reservation {ref_id} has no area code marker"),
        })?;

        Ok(Some(Reservation {
            ref_id: ref_id.clone(),
            area_code,
            numbers,
        }))
    }

    async fn release(&self, reservation: &Reservation, skipped: &[PhoneNumber]) -> Result<()> {
        if skipped.is_empty() {
            return Ok(());
        }
        let members: Vec<String> = skipped.iter().map(|n| n.as_str().to_owned()).collect();
        let moved = self
            .sets
            .move_members(
                &reservation_key(&reservation.ref_id),
                &reservation.area_code.cache_key(),
                &members,
            )
            .await?;
        if moved < members.len() {
            tracing::debug!(
                ref_id = %reservation.ref_id,
                moved,
                wanted = members.len(),
                "some skipped numbers already left the reservation"
            );
        }
        Ok(())
    }

    async fn finalize(
        &self,
        reservation: &Reservation,
        chosen: &PhoneNumber,
        user: UserId,
    ) -> Result<()> {
        let key = reservation_key(&reservation.ref_id);

        // Disjoint stores, so both legs run at once. Neither is abandoned: the
        // join waits for both before deciding to commit. The reservation only
        // counts as consumed if `chosen` was still in it.
        let (consumed, staged) = tokio::join!(
            self.sets.consume(&key, chosen.as_str()),
            self.phonebook.stage(chosen, user)
        );

        match (consumed, staged) {
            (Ok(true), Ok(staged)) => {
                if let Err(e) = staged.commit().await {
                    self.restore(reservation, chosen).await;
                    return Err(e);
                }
                Ok(())
            }
            (Ok(false), Ok(staged)) => {
                if let Err(e) = staged.rollback().await {
                    tracing::warn!(error = %e, "failed to roll back phonebook write");
                }
                Err(Error::InvalidReservation)
            }
            (Ok(true), Err(e)) => {
                self.restore(reservation, chosen).await;
                Err(e)
            }
            (Ok(false), Err(e)) => Err(e),
            (Err(e), Ok(staged)) => {
                if let Err(rollback) = staged.rollback().await {
                    tracing::warn!(error = %rollback, "failed to roll back phonebook write");
                }
                Err(e)
            }
            (Err(e), Err(_)) => Err(e),
        }
    }

    async fn seed(&self, area_code: AreaCode, numbers: &[PhoneNumber]) -> Result<usize> {
        if numbers.is_empty() {
            return Ok(0);
        }
        let scope_key = area_code.cache_key();
        let before = self.sets.cardinality(&scope_key).await?;
        let members: Vec<String> = numbers.iter().map(|n| n.as_str().to_owned()).collect();
        self.sets.add(&scope_key, &members).await?;
        let after = self.sets.cardinality(&scope_key).await?;
        Ok(after.saturating_sub(before))
    }

    async fn available(&self, area_code: AreaCode) -> Result<usize> {
        self.sets.cardinality(&area_code.cache_key()).await
    }
}
