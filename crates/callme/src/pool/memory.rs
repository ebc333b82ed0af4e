//! In-process stores for tests and local runs.
//!
//! Each store guards its state with a single mutex so every trait method is
//! atomic, mirroring what the real backends guarantee per command.

use super::{ExistenceCache, Phonebook, SetStore, StagedAssignment};
use crate::{
    Error, Result,
    types::{PhoneNumber, UserId},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Default)]
struct CacheState {
    sets: HashMap<String, HashSet<String>>,
    assigned: HashSet<String>,
}

/// In-memory [`SetStore`] and [`ExistenceCache`]. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryCache {
    state: Arc<Mutex<CacheState>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SetStore for MemoryCache {
    async fn pop(&self, key: &str, count: usize) -> Result<Vec<String>> {
        let mut state = self.state.lock();
        let Some(set) = state.sets.get_mut(key) else {
            return Ok(Vec::new());
        };
        let popped: Vec<String> = set.iter().take(count).cloned().collect();
        for member in &popped {
            set.remove(member);
        }
        if set.is_empty() {
            state.sets.remove(key);
        }
        Ok(popped)
    }

    async fn add(&self, key: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        self.state
            .lock()
            .sets
            .entry(key.to_owned())
            .or_default()
            .extend(members.iter().cloned());
        Ok(())
    }

    async fn members(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn consume(&self, key: &str, member: &str) -> Result<bool> {
        let mut state = self.state.lock();
        if !state.sets.get(key).is_some_and(|set| set.contains(member)) {
            return Ok(false);
        }
        state.sets.remove(key);
        Ok(true)
    }

    async fn cardinality(&self, key: &str) -> Result<usize> {
        Ok(self.state.lock().sets.get(key).map_or(0, HashSet::len))
    }

    async fn move_members(&self, from: &str, to: &str, members: &[String]) -> Result<usize> {
        let mut state = self.state.lock();
        let Some(set) = state.sets.get_mut(from) else {
            return Ok(0);
        };
        let moved: Vec<String> = members
            .iter()
            .filter(|member| set.remove(member.as_str()))
            .cloned()
            .collect();
        if set.is_empty() {
            state.sets.remove(from);
        }
        if !moved.is_empty() {
            state.sets.entry(to.to_owned()).or_default().extend(moved.iter().cloned());
        }
        Ok(moved.len())
    }
}

#[async_trait]
impl ExistenceCache for MemoryCache {
    async fn contains(&self, number: &PhoneNumber) -> Result<bool> {
        Ok(self.state.lock().assigned.contains(number.as_str()))
    }

    async fn warm(&self, number: &PhoneNumber) -> Result<()> {
        self.state
            .lock()
            .assigned
            .insert(number.as_str().to_owned());
        Ok(())
    }
}

/// In-memory [`Phonebook`]. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryPhonebook {
    entries: Arc<Mutex<HashMap<UserId, PhoneNumber>>>,
}

impl MemoryPhonebook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current number of `user`, if any.
    pub fn number_of(&self, user: UserId) -> Option<PhoneNumber> {
        self.entries.lock().get(&user).cloned()
    }

    /// Records an assignment directly, bypassing any reservation.
    pub fn insert(&self, user: UserId, number: PhoneNumber) -> Result<()> {
        apply(&mut self.entries.lock(), user, number)
    }
}

fn apply(
    entries: &mut HashMap<UserId, PhoneNumber>,
    user: UserId,
    number: PhoneNumber,
) -> Result<()> {
    if let Some((owner, _)) = entries
        .iter()
        .find(|(owner, owned)| **owned == number && **owner != user)
    {
        return Err(Error::Store {
            context: format!("phone number {number} is already assigned to user {owner}"),
        });
    }
    entries.insert(user, number);
    Ok(())
}

#[async_trait]
impl Phonebook for MemoryPhonebook {
    async fn owner_of(&self, number: &PhoneNumber) -> Result<Option<UserId>> {
        Ok(self
            .entries
            .lock()
            .iter()
            .find_map(|(user, owned)| (owned == number).then_some(*user)))
    }

    async fn stage(&self, number: &PhoneNumber, user: UserId) -> Result<Box<dyn StagedAssignment>> {
        Ok(Box::new(MemoryStagedAssignment {
            entries: Arc::clone(&self.entries),
            user,
            number: number.clone(),
        }))
    }
}

struct MemoryStagedAssignment {
    entries: Arc<Mutex<HashMap<UserId, PhoneNumber>>>,
    user: UserId,
    number: PhoneNumber,
}

#[async_trait]
impl StagedAssignment for MemoryStagedAssignment {
    async fn commit(self: Box<Self>) -> Result<()> {
        let Self {
            entries,
            user,
            number,
        } = *self;
        apply(&mut entries.lock(), user, number)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
