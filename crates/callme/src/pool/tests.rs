use super::*;
use crate::{Error, types::RefId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

fn numbers(count: u32) -> Vec<PhoneNumber> {
    (0..count)
        .map(|i| PhoneNumber::parse(format!("+1613555{i:04}")).unwrap())
        .collect()
}

fn area() -> AreaCode {
    AreaCode::new(613).unwrap()
}

/// Phonebook whose transactions can be made to fail at commit time.
#[derive(Clone, Default)]
struct FlakyPhonebook {
    inner: MemoryPhonebook,
    fail_stage: Arc<AtomicBool>,
    fail_commit: Arc<AtomicBool>,
}

struct FlakyStaged {
    inner: Box<dyn StagedAssignment>,
    fail_commit: bool,
}

#[async_trait]
impl StagedAssignment for FlakyStaged {
    async fn commit(self: Box<Self>) -> Result<()> {
        if self.fail_commit {
            self.inner.rollback().await?;
            return Err(Error::store("commit", "serialization failure"));
        }
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.rollback().await
    }
}

#[async_trait]
impl Phonebook for FlakyPhonebook {
    async fn owner_of(&self, number: &PhoneNumber) -> Result<Option<UserId>> {
        self.inner.owner_of(number).await
    }

    async fn stage(&self, number: &PhoneNumber, user: UserId) -> Result<Box<dyn StagedAssignment>> {
        if self.fail_stage.load(Ordering::SeqCst) {
            return Err(Error::store("begin", "too many connections"));
        }
        Ok(Box::new(FlakyStaged {
            inner: self.inner.stage(number, user).await?,
            fail_commit: self.fail_commit.load(Ordering::SeqCst),
        }))
    }
}

async fn seeded(phonebook: Arc<dyn Phonebook>) -> CachePool<MemoryCache> {
    let pool = CachePool::new(MemoryCache::new(), phonebook);
    assert_eq!(pool.seed(area(), &numbers(5)).await.unwrap(), 5);
    pool
}

#[tokio::test]
async fn seeding_is_idempotent() {
    let pool = seeded(Arc::new(MemoryPhonebook::new())).await;
    assert_eq!(pool.seed(area(), &numbers(7)).await.unwrap(), 2);
    assert_eq!(pool.seed(area(), &[]).await.unwrap(), 0);
    assert_eq!(pool.available(area()).await.unwrap(), 7);
}

#[tokio::test]
async fn reservation_records_its_area_code() {
    let pool = seeded(Arc::new(MemoryPhonebook::new())).await;
    let ref_id = RefId::generate();
    pool.reserve(area(), &ref_id, 3).await.unwrap();

    let members = pool.sets().members(&reservation_key(&ref_id)).await.unwrap();
    assert_eq!(members.len(), 4);
    assert!(members.contains(&area().cache_key()));

    let reservation = pool.reservation(&ref_id).await.unwrap().unwrap();
    assert_eq!(reservation.area_code, area());
    assert_eq!(reservation.numbers.len(), 3);
}

#[tokio::test]
async fn competing_releases_never_return_a_chosen_number() {
    let phonebook = MemoryPhonebook::new();
    let pool = seeded(Arc::new(phonebook.clone())).await;
    let ref_id = RefId::generate();
    let reservation = pool.reserve(area(), &ref_id, 5).await.unwrap();
    let first = reservation.numbers[0].clone();
    let second = reservation.numbers[1].clone();

    pool.release(&reservation, &reservation.skipped(&first))
        .await
        .unwrap();
    assert_eq!(pool.available(area()).await.unwrap(), 4);

    // The rival release only finds `first` left, and everything goes back
    // exactly once.
    pool.release(&reservation, &reservation.skipped(&second))
        .await
        .unwrap();
    assert_eq!(pool.available(area()).await.unwrap(), 5);
    assert!(pool.reservation(&ref_id).await.unwrap().unwrap().numbers.is_empty());

    // Neither caller can finish with a number that is back in the pool.
    for (chosen, user) in [(&first, UserId(1)), (&second, UserId(2))] {
        assert_eq!(
            pool.finalize(&reservation, chosen, user).await,
            Err(Error::InvalidReservation)
        );
        assert_eq!(phonebook.number_of(user), None);
    }
    assert_eq!(pool.available(area()).await.unwrap(), 5);
}

#[tokio::test]
async fn release_after_a_finished_assign_moves_nothing() {
    let phonebook = MemoryPhonebook::new();
    let pool = seeded(Arc::new(phonebook.clone())).await;
    let ref_id = RefId::generate();
    let reservation = pool.reserve(area(), &ref_id, 5).await.unwrap();
    let chosen = reservation.numbers[0].clone();

    pool.release(&reservation, &reservation.skipped(&chosen))
        .await
        .unwrap();
    pool.finalize(&reservation, &chosen, UserId(1)).await.unwrap();

    pool.release(&reservation, &reservation.skipped(&reservation.numbers[1]))
        .await
        .unwrap();
    assert_eq!(pool.available(area()).await.unwrap(), 4);
    let available = pool.sets().members(&area().cache_key()).await.unwrap();
    assert!(!available.contains(&chosen.as_str().to_owned()));
    assert_eq!(phonebook.number_of(UserId(1)), Some(chosen));
}

#[tokio::test]
async fn finalize_after_concurrent_consume_is_invalid() {
    let phonebook = MemoryPhonebook::new();
    let pool = seeded(Arc::new(phonebook.clone())).await;
    let ref_id = RefId::generate();
    let reservation = pool.reserve(area(), &ref_id, 5).await.unwrap();
    let chosen = reservation.numbers[0].clone();

    assert!(
        pool.sets()
            .consume(&reservation_key(&ref_id), reservation.numbers[1].as_str())
            .await
            .unwrap()
    );

    assert_eq!(
        pool.finalize(&reservation, &chosen, UserId(1)).await,
        Err(Error::InvalidReservation)
    );
    assert_eq!(phonebook.number_of(UserId(1)), None);
}

#[tokio::test]
async fn failed_stage_restores_the_reservation() {
    let phonebook = FlakyPhonebook::default();
    let pool = seeded(Arc::new(phonebook.clone())).await;
    let ref_id = RefId::generate();
    let reservation = pool.reserve(area(), &ref_id, 5).await.unwrap();
    let chosen = reservation.numbers[0].clone();
    pool.release(&reservation, &reservation.skipped(&chosen))
        .await
        .unwrap();

    phonebook.fail_stage.store(true, Ordering::SeqCst);
    let err = pool.finalize(&reservation, &chosen, UserId(1)).await.unwrap_err();
    assert!(matches!(err, Error::Store { .. }));

    let restored = pool.reservation(&ref_id).await.unwrap().unwrap();
    assert_eq!(restored.numbers, vec![chosen.clone()]);
    assert_eq!(phonebook.inner.number_of(UserId(1)), None);

    phonebook.fail_stage.store(false, Ordering::SeqCst);
    pool.finalize(&reservation, &chosen, UserId(1)).await.unwrap();
    assert_eq!(phonebook.inner.number_of(UserId(1)), Some(chosen));
}

#[tokio::test]
async fn failed_commit_restores_the_reservation() {
    let phonebook = FlakyPhonebook::default();
    let pool = seeded(Arc::new(phonebook.clone())).await;
    let ref_id = RefId::generate();
    let reservation = pool.reserve(area(), &ref_id, 5).await.unwrap();
    let chosen = reservation.numbers[1].clone();
    pool.release(&reservation, &reservation.skipped(&chosen))
        .await
        .unwrap();

    phonebook.fail_commit.store(true, Ordering::SeqCst);
    assert!(pool.finalize(&reservation, &chosen, UserId(2)).await.is_err());
    let restored = pool.reservation(&ref_id).await.unwrap().unwrap();
    assert_eq!(restored.numbers, vec![chosen]);
    assert_eq!(pool.available(area()).await.unwrap(), 4);
    assert_eq!(phonebook.inner.number_of(UserId(2)), None);
}

#[tokio::test]
async fn a_number_is_never_owned_twice() {
    let phonebook = MemoryPhonebook::new();
    let number = numbers(1).remove(0);
    phonebook.insert(UserId(1), number.clone()).unwrap();

    assert!(phonebook.insert(UserId(2), number.clone()).is_err());
    assert_eq!(phonebook.owner_of(&number).await.unwrap(), Some(UserId(1)));
}
