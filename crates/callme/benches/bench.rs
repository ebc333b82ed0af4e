use callme::{
    Allocator, AllocatorConfig, AreaCode, PhoneNumber, Sender, SenderConfig, Sms, UserId,
    message::MemoryMessageStore,
    pool::{CachePool, MemoryCache, MemoryPhonebook, ResourcePool},
};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::{
    hint::black_box,
    sync::Arc,
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

const AREA: u32 = 613;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn number(i: u64) -> PhoneNumber {
    PhoneNumber::parse(format!("+1{AREA}{i:08}")).unwrap()
}

async fn allocator(seeded: u64, phonebook: MemoryPhonebook) -> Allocator {
    let cache = MemoryCache::new();
    let pool = CachePool::new(cache.clone(), Arc::new(phonebook.clone()));
    let numbers: Vec<_> = (0..seeded).map(number).collect();
    pool.seed(AreaCode::new(AREA).unwrap(), &numbers)
        .await
        .unwrap();

    Allocator::new(
        Arc::new(pool),
        Arc::new(phonebook),
        AllocatorConfig::default(),
    )
    .with_cache(Arc::new(cache))
}

fn bench_allocator(c: &mut Criterion) {
    let rt = runtime();
    let area = AreaCode::new(AREA).unwrap();
    let mut group = c.benchmark_group("allocator");
    group.throughput(Throughput::Elements(1));

    // Every iteration permanently consumes one number, so each sample gets a
    // freshly seeded pool.
    group.bench_function("reserve_assign/memory", |b| {
        b.to_async(&rt).iter_custom(|iters| async move {
            let alloc = allocator(iters + 5, MemoryPhonebook::new()).await;
            let start = Instant::now();
            for user in 0..iters {
                let reservation = alloc.reserve(area).await.unwrap();
                let assigned = alloc
                    .assign(
                        &reservation.ref_id,
                        &reservation.numbers[0],
                        UserId(user as i64),
                    )
                    .await
                    .unwrap();
                black_box(assigned);
            }
            start.elapsed()
        });
    });

    let phonebook = MemoryPhonebook::new();
    phonebook.insert(UserId(1), number(0)).unwrap();
    let alloc = rt.block_on(allocator(0, phonebook));
    let owned = number(0);
    group.bench_function("exists/memory", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(alloc.exists(&owned).await.unwrap()) });
    });
    group.finish();
}

fn bench_sender(c: &mut Criterion) {
    let rt = runtime();
    let phonebook = MemoryPhonebook::new();
    phonebook.insert(UserId(1), number(0)).unwrap();
    phonebook.insert(UserId(2), number(1)).unwrap();
    let alloc = rt.block_on(allocator(0, phonebook));

    let sender = Sender::new(
        Arc::new(MemoryMessageStore::new()),
        Arc::new(alloc),
        SenderConfig::default(),
    );
    let cancel = CancellationToken::new();
    let next_key = AtomicU64::new(0);

    let mut group = c.benchmark_group("sender");
    group.throughput(Throughput::Elements(1));
    group.bench_function("send_one/memory", |b| {
        b.to_async(&rt).iter(|| async {
            let sms = Sms {
                idempotency_key: format!("bench-{}", next_key.fetch_add(1, Ordering::Relaxed)),
                from: number(0).into_string(),
                to: number(1).into_string(),
                content: "ping".into(),
            };
            black_box(sender.send_one(sms, &cancel).await.unwrap())
        });
    });
    group.finish();
}

criterion_group!(benches, bench_allocator, bench_sender);
criterion_main!(benches);
