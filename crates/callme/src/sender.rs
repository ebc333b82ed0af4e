//! Idempotent SMS delivery.
//!
//! A send first claims its idempotency key with a placeholder record. Only the
//! claimant validates both endpoints and completes the record; a duplicate
//! submission short-circuits with [`ALREADY_SENT`]. Every failure after the
//! claim deletes the placeholder so the same key can be retried.

use crate::{
    Error, Result,
    message::MessageStore,
    types::{IdempotencyKey, PhoneNumber, Sms, ValidSms},
};
use async_trait::async_trait;
use core::fmt;
use futures::{
    FutureExt, Stream, StreamExt,
    future::BoxFuture,
    stream::FuturesUnordered,
};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

/// Informational message returned for a duplicate submission.
pub const ALREADY_SENT: &str = "Message has been sent already";

/// Answers whether a phone number is assigned. Implemented by the local
/// [`Allocator`](crate::Allocator) and by remote clients of it.
#[async_trait]
pub trait NumberLookup: Send + Sync {
    async fn exists(&self, number: &PhoneNumber) -> Result<bool>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SenderConfig {
    /// Pause between two items of a [`Sender::send_many`] batch.
    pub send_many_delay: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            send_many_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendOutcome {
    pub sent: bool,
    pub message: Option<String>,
}

impl SendOutcome {
    const fn delivered() -> Self {
        Self {
            sent: true,
            message: None,
        }
    }

    fn duplicate() -> Self {
        Self {
            sent: true,
            message: Some(ALREADY_SENT.to_owned()),
        }
    }
}

/// What a [`Sender::send_many`] batch did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Messages delivered by this batch.
    pub sent: u64,
    /// Messages whose idempotency key had already been used.
    pub duplicates: u64,
    /// One readable line per failed message, in submission order.
    pub errors: Vec<String>,
}

/// A finished batch item: submission index, idempotency key and outcome.
type Finished = (usize, String, core::result::Result<Result<SendOutcome>, JoinError>);

/// Outcomes of finished batch items, keyed by submission index until the
/// batch is over.
#[derive(Default)]
struct Tally {
    sent: u64,
    duplicates: u64,
    failures: Vec<(usize, String)>,
}

impl Tally {
    fn record(&mut self, (index, key, joined): Finished) {
        match joined {
            Ok(Ok(outcome)) if outcome.message.is_some() => self.duplicates += 1,
            Ok(Ok(_)) => self.sent += 1,
            Ok(Err(e)) => self.failures.push((index, format!("Couldn't send sms {key}: {e}"))),
            Err(e) => self.failures.push((index, format!("Couldn't send sms {key}: {e}"))),
        }
    }

    fn into_report(mut self) -> BatchReport {
        self.failures.sort_unstable_by_key(|(index, _)| *index);
        BatchReport {
            sent: self.sent,
            duplicates: self.duplicates,
            errors: self.failures.into_iter().map(|(_, line)| line).collect(),
        }
    }
}

#[derive(Clone)]
pub struct Sender {
    store: Arc<dyn MessageStore>,
    lookup: Arc<dyn NumberLookup>,
    config: SenderConfig,
}

impl Sender {
    pub fn new(
        store: Arc<dyn MessageStore>,
        lookup: Arc<dyn NumberLookup>,
        config: SenderConfig,
    ) -> Self {
        Self {
            store,
            lookup,
            config,
        }
    }

    pub const fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Sends one message at most once per idempotency key.
    ///
    /// Input is validated before any record is written. Once the key is
    /// claimed, cancelling `cancel` aborts validation and removes the
    /// placeholder; a record that already reached SENT is kept.
    #[tracing::instrument(level = "debug", skip_all, fields(key = %sms.idempotency_key))]
    pub async fn send_one(&self, sms: Sms, cancel: &CancellationToken) -> Result<SendOutcome> {
        let sms = ValidSms::try_from(sms)?;

        if !self.store.claim(&sms.idempotency_key).await? {
            tracing::debug!("duplicate submission");
            return Ok(SendOutcome::duplicate());
        }

        let delivered = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            delivered = self.deliver(&sms) => delivered,
        };

        match delivered {
            Ok(()) => {
                tracing::debug!(from = %sms.from, to = %sms.to, "sent");
                Ok(SendOutcome::delivered())
            }
            Err(e) => {
                self.discard(&sms.idempotency_key).await;
                Err(e)
            }
        }
    }

    /// Sends every message of `requests`, pausing between items.
    ///
    /// Item failures are collected as readable strings in submission order
    /// and never stop the batch. A read error on `requests` stops reading,
    /// waits for the items already started, then is returned as the error of
    /// the whole call. Cancelling `shutdown`, or dropping the returned future,
    /// cancels the items still in flight.
    ///
    /// Finished items are folded into the report as they complete, so memory
    /// grows with the items in flight and the failures, not with the length
    /// of the stream.
    pub async fn send_many<S, E>(
        &self,
        mut requests: S,
        shutdown: &CancellationToken,
    ) -> core::result::Result<BatchReport, E>
    where
        S: Stream<Item = core::result::Result<Sms, E>> + Unpin + Send,
        E: fmt::Display,
    {
        let batch = shutdown.child_token();
        let _guard = batch.clone().drop_guard();

        let mut in_flight: FuturesUnordered<BoxFuture<'static, Finished>> =
            FuturesUnordered::new();
        let mut tally = Tally::default();
        let mut started = 0_usize;
        let mut read_error = None;

        loop {
            let next = tokio::select! {
                biased;
                () = batch.cancelled() => break,
                Some(finished) = in_flight.next(), if !in_flight.is_empty() => {
                    tally.record(finished);
                    continue;
                }
                next = requests.next() => next,
            };
            let sms = match next {
                Some(Ok(sms)) => sms,
                Some(Err(e)) => {
                    tracing::error!(error = %e, "failed to read SendMany stream");
                    read_error = Some(e);
                    break;
                }
                None => break,
            };

            if started > 0 && !self.config.send_many_delay.is_zero() {
                tokio::select! {
                    biased;
                    () = batch.cancelled() => break,
                    () = tokio::time::sleep(self.config.send_many_delay) => {}
                }
            }

            let index = started;
            started += 1;
            let key = sms.idempotency_key.clone();
            let sender = self.clone();
            let token = batch.child_token();
            let handle = tokio::spawn(async move { sender.send_one(sms, &token).await });
            in_flight.push(async move { (index, key, handle.await) }.boxed());
        }

        while let Some(finished) = in_flight.next().await {
            tally.record(finished);
        }

        if let Some(e) = read_error {
            return Err(e);
        }
        let report = tally.into_report();
        if !report.errors.is_empty() {
            tracing::warn!(failed = report.errors.len(), "SendMany finished with failures");
        }
        Ok(report)
    }

    /// Checks both endpoints, then completes the claimed record.
    async fn deliver(&self, sms: &ValidSms) -> Result<()> {
        // Both checks always run to completion before either result is used.
        let (from, to) = tokio::join!(self.check(&sms.from), self.check(&sms.to));
        from?;
        to?;
        self.store.complete(sms).await
    }

    async fn check(&self, number: &PhoneNumber) -> Result<()> {
        match self.lookup.exists(number).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::NumberNotFound {
                number: number.clone(),
            }),
            Err(e @ (Error::Lookup { .. } | Error::Cancelled)) => Err(e),
            Err(e) => Err(Error::lookup(e)),
        }
    }

    async fn discard(&self, key: &IdempotencyKey) {
        if let Err(e) = self.store.discard(key).await {
            tracing::error!(
                %key,
                error = %e,
                "failed to delete placeholder, the idempotency key stays claimed"
            );
        }
    }
}

#[cfg(test)]
mod tests;
