use super::*;
use crate::{
    message::MemoryMessageStore,
    types::{MessageStatus, PhoneNumber},
};
use futures::stream;
use parking_lot::Mutex;
use std::collections::HashSet;

const ALICE: &str = "+16135550100";
const BOB: &str = "+16135550101";
const NOBODY: &str = "+16135550199";
const FLAKY: &str = "+16135550666";

/// Lookup that knows a fixed set of numbers and fails on [`FLAKY`].
#[derive(Default)]
struct Directory {
    known: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl Directory {
    fn with(numbers: &[&str]) -> Self {
        Self {
            known: numbers.iter().map(|n| (*n).to_owned()).collect(),
            calls: Mutex::default(),
        }
    }
}

#[async_trait]
impl NumberLookup for Directory {
    async fn exists(&self, number: &PhoneNumber) -> Result<bool> {
        self.calls.lock().push(number.as_str().to_owned());
        if number.as_str() == FLAKY {
            return Err(Error::store("exists", "connection refused"));
        }
        Ok(self.known.contains(number.as_str()))
    }
}

fn sms(key: &str, from: &str, to: &str) -> Sms {
    Sms {
        idempotency_key: key.into(),
        from: from.into(),
        to: to.into(),
        content: "see you at 6".into(),
    }
}

fn sender(store: &MemoryMessageStore, lookup: Directory) -> Sender {
    Sender::new(
        Arc::new(store.clone()),
        Arc::new(lookup),
        SenderConfig {
            send_many_delay: Duration::ZERO,
        },
    )
}

fn key(raw: &str) -> IdempotencyKey {
    IdempotencyKey::parse(raw).unwrap()
}

#[tokio::test]
async fn send_one_completes_the_record() {
    let store = MemoryMessageStore::new();
    let sender = sender(&store, Directory::with(&[ALICE, BOB]));

    let outcome = sender
        .send_one(sms("k1", ALICE, BOB), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SendOutcome {
            sent: true,
            message: None
        }
    );

    let record = store.get(&key("k1")).await.unwrap().unwrap();
    assert_eq!(record.status, MessageStatus::Sent);
    assert_eq!(record.from.unwrap().as_str(), ALICE);
    assert_eq!(record.to.unwrap().as_str(), BOB);
    assert_eq!(record.content.as_deref(), Some("see you at 6"));
}

#[tokio::test]
async fn duplicate_send_is_a_no_op() {
    let store = MemoryMessageStore::new();
    let directory = Arc::new(Directory::with(&[ALICE, BOB]));
    let sender = Sender::new(
        Arc::new(store.clone()),
        directory.clone(),
        SenderConfig::default(),
    );
    let cancel = CancellationToken::new();

    sender.send_one(sms("k2", ALICE, BOB), &cancel).await.unwrap();
    let second = sender
        .send_one(sms("k2", ALICE, BOB), &cancel)
        .await
        .unwrap();

    assert!(second.sent);
    assert_eq!(second.message.as_deref(), Some(ALREADY_SENT));
    assert_eq!(store.len(), 1);
    // The duplicate never reached validation.
    assert_eq!(directory.calls.lock().len(), 2);
}

#[tokio::test]
async fn unknown_number_is_not_found_and_leaves_no_record() {
    let store = MemoryMessageStore::new();
    let sender = sender(&store, Directory::with(&[ALICE]));

    let err = sender
        .send_one(sms("k3", ALICE, NOBODY), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NumberNotFound { ref number } if number.as_str() == NOBODY));
    assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    assert!(store.is_empty());
}

#[tokio::test]
async fn failed_send_can_be_retried_with_the_same_key() {
    let store = MemoryMessageStore::new();
    let failing = sender(&store, Directory::with(&[ALICE]));
    let cancel = CancellationToken::new();
    assert!(failing.send_one(sms("k4", ALICE, BOB), &cancel).await.is_err());

    let working = sender(&store, Directory::with(&[ALICE, BOB]));
    let outcome = working
        .send_one(sms("k4", ALICE, BOB), &cancel)
        .await
        .unwrap();
    assert_eq!(outcome.message, None);
}

#[tokio::test]
async fn lookup_failure_is_internal_and_cleans_up() {
    let store = MemoryMessageStore::new();
    let directory = Arc::new(Directory::with(&[ALICE]));
    let sender = Sender::new(
        Arc::new(store.clone()),
        directory.clone(),
        SenderConfig::default(),
    );

    let err = sender
        .send_one(sms("k5", FLAKY, ALICE), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Lookup { .. }));
    assert_eq!(err.kind(), crate::ErrorKind::Internal);
    assert!(store.is_empty());
    // Both checks ran even though the first one failed.
    assert_eq!(directory.calls.lock().len(), 2);
}

#[tokio::test]
async fn invalid_input_never_touches_the_store() {
    let store = MemoryMessageStore::new();
    let sender = sender(&store, Directory::with(&[ALICE, BOB]));
    let cancel = CancellationToken::new();

    let mut empty = sms("k6", ALICE, BOB);
    empty.content.clear();
    for bad in [sms("", ALICE, BOB), sms("k6", "not-a-number", BOB), empty] {
        let err = sender.send_one(bad, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }
    assert!(store.is_empty());
}

#[tokio::test]
async fn cancelled_send_releases_its_key() {
    let store = MemoryMessageStore::new();
    let sender = sender(&store, Directory::with(&[ALICE, BOB]));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = sender
        .send_one(sms("k7", ALICE, BOB), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err, Error::Cancelled);
    assert!(store.is_empty());
}

#[tokio::test]
async fn send_many_reports_each_failure() {
    let store = MemoryMessageStore::new();
    let sender = sender(&store, Directory::with(&[ALICE, BOB]));

    let requests = stream::iter(vec![
        Ok::<_, String>(sms("m1", ALICE, BOB)),
        Ok(sms("m2", ALICE, NOBODY)),
        Ok(sms("m3", BOB, ALICE)),
        Ok(sms("m4", NOBODY, BOB)),
        Ok(sms("m1", ALICE, BOB)),
    ]);

    let report = sender
        .send_many(requests, &CancellationToken::new())
        .await
        .unwrap();

    let errors = &report.errors;
    assert_eq!(errors.len(), 2);
    assert!(errors[0].starts_with("Couldn't send sms m2:"));
    assert!(errors[1].starts_with("Couldn't send sms m4:"));
    assert!(errors.iter().all(|e| e.contains("doesn't exist")));
    assert_eq!((report.sent, report.duplicates), (2, 1));
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn send_many_stream_error_is_fatal_after_started_items_finish() {
    let store = MemoryMessageStore::new();
    let sender = sender(&store, Directory::with(&[ALICE, BOB]));

    let requests = stream::iter(vec![
        Ok(sms("r1", ALICE, BOB)),
        Err("connection reset by peer".to_owned()),
        Ok(sms("r2", ALICE, BOB)),
    ]);

    let err = sender
        .send_many(requests, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, "connection reset by peer");

    // The item read before the failure still completed; nothing after it ran.
    let first = store.get(&key("r1")).await.unwrap().unwrap();
    assert_eq!(first.status, MessageStatus::Sent);
    assert!(store.get(&key("r2")).await.unwrap().is_none());
}

#[tokio::test]
async fn send_many_after_shutdown_sends_nothing() {
    let store = MemoryMessageStore::new();
    let sender = sender(&store, Directory::with(&[ALICE, BOB]));
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let requests = stream::iter(vec![Ok::<_, String>(sms("s1", ALICE, BOB))]);
    let report = sender.send_many(requests, &shutdown).await.unwrap();
    assert_eq!(report, BatchReport::default());
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn send_many_paces_items() {
    let store = MemoryMessageStore::new();
    let sender = Sender::new(
        Arc::new(store.clone()),
        Arc::new(Directory::with(&[ALICE, BOB])),
        SenderConfig::default(),
    );
    let requests = stream::iter(
        ["p1", "p2", "p3"]
            .into_iter()
            .map(|k| Ok::<_, String>(sms(k, ALICE, BOB)))
            .collect::<Vec<_>>(),
    );

    let start = tokio::time::Instant::now();
    let report = sender
        .send_many(requests, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.errors.is_empty());
    assert_eq!(report.sent, 3);
    assert_eq!(store.len(), 3);
    assert!(start.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn send_many_keeps_submission_order_for_failures() {
    let store = MemoryMessageStore::new();
    let sender = sender(&store, Directory::with(&[ALICE, BOB]));

    // Failures finish in whatever order their tasks complete.
    let requests = stream::iter(
        (0..20)
            .map(|i| {
                let to = if i % 2 == 0 { NOBODY } else { BOB };
                Ok::<_, String>(sms(&format!("o{i:02}"), ALICE, to))
            })
            .collect::<Vec<_>>(),
    );

    let report = sender
        .send_many(requests, &CancellationToken::new())
        .await
        .unwrap();

    let keys: Vec<&str> = report
        .errors
        .iter()
        .map(|e| &e["Couldn't send sms ".len().."Couldn't send sms o00".len()])
        .collect();
    let expected: Vec<String> = (0..20).step_by(2).map(|i| format!("o{i:02}")).collect();
    assert_eq!(keys, expected);
    assert_eq!(report.sent, 10);
    assert_eq!(report.duplicates, 0);
}
