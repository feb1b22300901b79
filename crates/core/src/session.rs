use crate::error::QueryError;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Tracks one in-flight-query flag per client identity.
///
/// The lock is held only for the instant of a flag check/set/clear, never
/// across retrieval or generation. Entry hands out an [`ActiveQuery`] permit
/// whose `Drop` clears the flag, so the flag releases on every exit path:
/// success, mid-stream failure, or a dropped connection.
#[derive(Debug, Clone, Default)]
pub struct QueryGate {
    active: Arc<Mutex<HashSet<String>>>,
}

impl QueryGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_enter(&self, client_id: &str) -> Result<ActiveQuery, QueryError> {
        let mut active = lock_unpoisoned(&self.active);
        if !active.insert(client_id.to_string()) {
            return Err(QueryError::AlreadyActive(client_id.to_string()));
        }

        Ok(ActiveQuery {
            active: Arc::clone(&self.active),
            client_id: client_id.to_string(),
        })
    }

    pub fn is_active(&self, client_id: &str) -> bool {
        lock_unpoisoned(&self.active).contains(client_id)
    }
}

/// Permit for one client's in-flight query. Dropping it releases the flag;
/// release is idempotent.
#[derive(Debug)]
pub struct ActiveQuery {
    active: Arc<Mutex<HashSet<String>>>,
    client_id: String,
}

impl ActiveQuery {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl Drop for ActiveQuery {
    fn drop(&mut self) {
        lock_unpoisoned(&self.active).remove(&self.client_id);
    }
}

fn lock_unpoisoned<'a>(lock: &'a Arc<Mutex<HashSet<String>>>) -> MutexGuard<'a, HashSet<String>> {
    // A panicked holder can't leave the set inconsistent: every operation on
    // it is a single insert/remove/contains.
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
