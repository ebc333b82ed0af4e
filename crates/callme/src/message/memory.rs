use super::MessageStore;
use crate::{
    Error, Result,
    types::{IdempotencyKey, MessageRecord, MessageStatus, ValidSms},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// In-memory [`MessageStore`]. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryMessageStore {
    records: Arc<Mutex<HashMap<IdempotencyKey, MessageRecord>>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn claim(&self, key: &IdempotencyKey) -> Result<bool> {
        let mut records = self.records.lock();
        if records.contains_key(key) {
            return Ok(false);
        }
        records.insert(key.clone(), MessageRecord::placeholder(key.clone()));
        Ok(true)
    }

    async fn complete(&self, sms: &ValidSms) -> Result<()> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(&sms.idempotency_key)
            .ok_or_else(|| Error::Store {
                context: format!("no placeholder for {}", sms.idempotency_key),
            })?;
        record.from = Some(sms.from.clone());
        record.to = Some(sms.to.clone());
        record.content = Some(sms.content.clone());
        record.status = MessageStatus::Sent;
        Ok(())
    }

    async fn discard(&self, key: &IdempotencyKey) -> Result<()> {
        let mut records = self.records.lock();
        if records
            .get(key)
            .is_some_and(|r| r.status == MessageStatus::Pending)
        {
            records.remove(key);
        }
        Ok(())
    }

    async fn get(&self, key: &IdempotencyKey) -> Result<Option<MessageRecord>> {
        Ok(self.records.lock().get(key).cloned())
    }
}
