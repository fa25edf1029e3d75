// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use rowcache::{CacheConfig, Database, DbConn, Error, Result, SharedCalls, Transaction};
use serde::{Deserialize, Serialize};
use tick::Clock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub email: String,
    pub name: String,
}

impl User {
    pub fn new(id: u64, email: &str, name: &str) -> Self {
        Self {
            id,
            email: email.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    users: Mutex<HashMap<u64, User>>,
    by_id: AtomicUsize,
    by_email: AtomicUsize,
    writes: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    fail_commit: Mutex<bool>,
    delay: Mutex<Option<Duration>>,
}

/// An in-memory user table that counts every query it serves.
#[derive(Debug, Clone, Default)]
pub struct UserDb {
    state: Arc<State>,
}

impl UserDb {
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let db = Self::default();
        db.state.users.lock().extend(users.into_iter().map(|user| (user.id, user)));
        db
    }

    /// Makes every query sleep on the tokio timer before answering.
    pub fn delay_queries(&self, delay: Duration) {
        *self.state.delay.lock() = Some(delay);
    }

    pub fn fail_commits(&self) {
        *self.state.fail_commit.lock() = true;
    }

    pub async fn user_by_id(&self, id: u64) -> Result<Option<User>> {
        self.pause().await;
        self.state.by_id.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.users.lock().get(&id).cloned())
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Option<(u64, User)>> {
        self.pause().await;
        self.state.by_email.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .state
            .users
            .lock()
            .values()
            .find(|user| user.email == email)
            .map(|user| (user.id, user.clone())))
    }

    pub async fn rename(&self, id: u64, name: &str) -> Result<()> {
        self.state.writes.fetch_add(1, Ordering::SeqCst);
        match self.state.users.lock().get_mut(&id) {
            Some(user) => {
                user.name = name.to_string();
                Ok(())
            }
            None => Err(Error::database(format!("no user {id}"))),
        }
    }

    pub fn by_id_count(&self) -> usize {
        self.state.by_id.load(Ordering::SeqCst)
    }

    pub fn by_email_count(&self) -> usize {
        self.state.by_email.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.state.writes.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> usize {
        self.state.commits.load(Ordering::SeqCst)
    }

    pub fn rollback_count(&self) -> usize {
        self.state.rollbacks.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = *self.state.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Database for UserDb {
    type Transaction = UserTx;

    async fn begin(&self) -> Result<UserTx> {
        Ok(UserTx { db: self.clone() })
    }
}

/// A transaction over [`UserDb`]; writes apply immediately and only the outcome is recorded.
#[derive(Debug, Clone)]
pub struct UserTx {
    pub db: UserDb,
}

impl Transaction for UserTx {
    async fn commit(&self) -> Result<()> {
        if *self.db.state.fail_commit.lock() {
            return Err(Error::database("commit rejected"));
        }
        self.db.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.db.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn ada() -> User {
    User::new(42, "a@x.com", "Ada")
}

pub fn grace() -> User {
    User::new(7, "g@x.com", "Grace")
}

pub fn user_key(id: &u64) -> String {
    format!("user:{id}")
}

/// A single-node configuration with jitter turned off so TTLs are exact.
pub fn exact_config() -> CacheConfig {
    CacheConfig::single("test").expiry_deviation(0.0)
}

pub fn memory_conn(db: UserDb, clock: Clock) -> DbConn<UserDb, rowcache::MemoryStore> {
    DbConn::with_memory(db, &exact_config(), SharedCalls::new(), clock)
}
