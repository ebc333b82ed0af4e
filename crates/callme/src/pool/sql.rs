use super::{Phonebook, ResourcePool, StagedAssignment};
use crate::{
    Error, Result,
    postgres::PgPool,
    types::{AreaCode, PhoneNumber, RefId, Reservation, UserId},
};
use async_trait::async_trait;
use sqlx::{Postgres, Transaction};

const STATUS_AVAILABLE: &str = "AVAILABLE";
const STATUS_IN_USE: &str = "INUSE";

// PostgreSQL has no `UPDATE ... LIMIT`; the locking subselect is the
// equivalent. `SKIP LOCKED` lets concurrent reservations tag disjoint rows
// instead of queueing behind each other.
const RESERVE: &str = r#"
UPDATE un_assigned_numbers
SET status = $1, ref_id = $2
WHERE phone_number IN (
    SELECT phone_number FROM un_assigned_numbers
    WHERE area_code = $3 AND status = $4
    LIMIT $5
    FOR UPDATE SKIP LOCKED
)
RETURNING phone_number
"#;

const RESERVATION: &str = r#"
SELECT phone_number, area_code FROM un_assigned_numbers
WHERE ref_id = $1 AND status = $2
ORDER BY phone_number
"#;

const RELEASE: &str = r#"
UPDATE un_assigned_numbers
SET status = $1, ref_id = NULL
WHERE ref_id = $2 AND phone_number = ANY($3)
"#;

// Data-modifying CTEs run concurrently with the main statement and commit
// with it, so consuming the reservation and recording ownership are one
// all-or-nothing step.
const FINALIZE: &str = r#"
WITH consumed AS (
    DELETE FROM un_assigned_numbers
    WHERE ref_id = $1 AND phone_number = $2 AND status = $3
    RETURNING phone_number
)
INSERT INTO phonebook (user_id, phone_number)
SELECT $4, phone_number FROM consumed
ON CONFLICT (user_id) DO UPDATE SET phone_number = EXCLUDED.phone_number
"#;

const SEED: &str = r#"
INSERT INTO un_assigned_numbers (phone_number, area_code)
SELECT UNNEST($1::text[]), $2
ON CONFLICT (phone_number) DO NOTHING
"#;

const AVAILABLE: &str = r#"
SELECT COUNT(*) FROM un_assigned_numbers WHERE area_code = $1 AND status = $2
"#;

const OWNER_OF: &str = "SELECT user_id FROM phonebook WHERE phone_number = $1";

const ASSIGN: &str = r#"
INSERT INTO phonebook (user_id, phone_number) VALUES ($1, $2)
ON CONFLICT (user_id) DO UPDATE SET phone_number = EXCLUDED.phone_number
"#;

/// Transactional [`ResourcePool`] over the `un_assigned_numbers` table.
#[derive(Clone)]
pub struct SqlPool {
    db: PgPool,
}

impl SqlPool {
    pub const fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ResourcePool for SqlPool {
    /// Tags up to `count` rows in one statement. A short batch rolls the
    /// transaction back, so no row stays INUSE after a failed reserve.
    async fn reserve(
        &self,
        area_code: AreaCode,
        ref_id: &RefId,
        count: usize,
    ) -> Result<Reservation> {
        let limit = i64::try_from(count).map_err(|e| Error::invalid(e.to_string()))?;
        let mut tx = self
            .db
            .begin()
            .await
            .map_err(|e| Error::store("reserve: begin", e))?;

        let mut tagged: Vec<String> = sqlx::query_scalar(RESERVE)
            .bind(STATUS_IN_USE)
            .bind(ref_id.as_str())
            .bind(i64::from(area_code.get()))
            .bind(STATUS_AVAILABLE)
            .bind(limit)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| Error::store("reserve: tag rows", e))?;

        if tagged.len() < count {
            tx.rollback()
                .await
                .map_err(|e| Error::store("reserve: rollback", e))?;
            tracing::warn!(
                %area_code,
                available = tagged.len(),
                wanted = count,
                "running out of available phone numbers"
            );
            return Err(Error::PoolExhausted { area_code });
        }

        tx.commit()
            .await
            .map_err(|e| Error::store("reserve: commit", e))?;

        tagged.sort();
        let numbers = tagged
            .into_iter()
            .map(|n| PhoneNumber::parse(n).map_err(|e| Error::store("decode row", e)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Reservation {
            ref_id: ref_id.clone(),
            area_code,
            numbers,
        })
    }

    async fn reservation(&self, ref_id: &RefId) -> Result<Option<Reservation>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(RESERVATION)
            .bind(ref_id.as_str())
            .bind(STATUS_IN_USE)
            .fetch_all(&self.db)
            .await
            .map_err(|e| Error::store("reservation lookup", e))?;

        let Some((_, raw_code)) = rows.first() else {
            return Ok(None);
        };
        let area_code = u32::try_from(*raw_code)
            .map_err(|e| Error::store("decode area code", e))
            .and_then(AreaCode::new)?;

        let numbers = rows
            .into_iter()
            .map(|(n, _)| PhoneNumber::parse(n).map_err(|e| Error::store("decode row", e)))
            .collect::<Result<Vec<_>>>()?;

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
        let numbers: Vec<String> = skipped.iter().map(|n| n.as_str().to_owned()).collect();
        let released = sqlx::query(RELEASE)
            .bind(STATUS_AVAILABLE)
            .bind(reservation.ref_id.as_str())
            .bind(&numbers)
            .execute(&self.db)
            .await
            .map_err(|e| Error::store("release", e))?
            .rows_affected();

        tracing::debug!(ref_id = %reservation.ref_id, released, "released skipped numbers");
        Ok(())
    }

    async fn finalize(
        &self,
        reservation: &Reservation,
        chosen: &PhoneNumber,
        user: UserId,
    ) -> Result<()> {
        let consumed = sqlx::query(FINALIZE)
            .bind(reservation.ref_id.as_str())
            .bind(chosen.as_str())
            .bind(STATUS_IN_USE)
            .bind(user.0)
            .execute(&self.db)
            .await
            .map_err(|e| Error::store("finalize", e))?
            .rows_affected();

        if consumed == 0 {
            return Err(Error::InvalidReservation);
        }
        Ok(())
    }

    async fn seed(&self, area_code: AreaCode, numbers: &[PhoneNumber]) -> Result<usize> {
        let numbers: Vec<String> = numbers.iter().map(|n| n.as_str().to_owned()).collect();
        let inserted = sqlx::query(SEED)
            .bind(&numbers)
            .bind(i64::from(area_code.get()))
            .execute(&self.db)
            .await
            .map_err(|e| Error::store("seed", e))?
            .rows_affected();
        usize::try_from(inserted).map_err(|e| Error::store("seed", e))
    }

    async fn available(&self, area_code: AreaCode) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(AVAILABLE)
            .bind(i64::from(area_code.get()))
            .bind(STATUS_AVAILABLE)
            .fetch_one(&self.db)
            .await
            .map_err(|e| Error::store("count available", e))?;
        usize::try_from(count).map_err(|e| Error::store("count available", e))
    }
}

/// [`Phonebook`] over the `phonebook` table.
#[derive(Clone)]
pub struct PgPhonebook {
    db: PgPool,
}

impl PgPhonebook {
    pub const fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Phonebook for PgPhonebook {
    async fn owner_of(&self, number: &PhoneNumber) -> Result<Option<UserId>> {
        let owner: Option<i64> = sqlx::query_scalar(OWNER_OF)
            .bind(number.as_str())
            .fetch_optional(&self.db)
            .await
            .map_err(|e| Error::store("owner lookup", e))?;
        Ok(owner.map(UserId))
    }

    async fn stage(&self, number: &PhoneNumber, user: UserId) -> Result<Box<dyn StagedAssignment>> {
        let mut tx = self
            .db
            .begin()
            .await
            .map_err(|e| Error::store("assign: begin", e))?;
        sqlx::query(ASSIGN)
            .bind(user.0)
            .bind(number.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::store("assign", e))?;
        Ok(Box::new(PgStagedAssignment { tx }))
    }
}

struct PgStagedAssignment {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StagedAssignment for PgStagedAssignment {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| Error::store("assign: commit", e))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| Error::store("assign: rollback", e))
    }
}
