// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Looks users up by email through a cached index entry.
//!
//! The first lookup runs the email query and caches both the `email -> id` pointer and
//! the row. Concurrent lookups share that query, later lookups are served from memory,
//! and an update invalidates both entries.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures_util::future::join_all;
use rowcache::{CacheConfig, DbConn, Error, MemoryStore, Result, SharedCalls};
use serde::{Deserialize, Serialize};
use tick::Clock;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct User {
    id: u64,
    email: String,
    name: String,
}

/// A pretend database with a little latency and a query counter.
#[derive(Debug, Clone, Default)]
struct Users {
    rows: Arc<parking_lot::Mutex<HashMap<u64, User>>>,
    queries: Arc<AtomicUsize>,
}

impl Users {
    async fn by_email(&self, email: &str) -> Result<Option<(u64, User)>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let rows = self.rows.lock();
        Ok(rows.values().find(|user| user.email == email).map(|user| (user.id, user.clone())))
    }

    async fn by_id(&self, id: u64) -> Result<Option<User>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(self.rows.lock().get(&id).cloned())
    }

    fn rename(&self, id: u64, name: &str) -> Result<()> {
        let mut rows = self.rows.lock();
        let user = rows.get_mut(&id).ok_or_else(Error::not_found)?;
        user.name = name.to_string();
        Ok(())
    }
}

async fn find_by_email(conn: &DbConn<Users, MemoryStore>, email: &'static str) -> Result<User> {
    conn.query_row_index(
        &format!("user:email:{email}"),
        |id: &u64| format!("user:{id}"),
        move |db: Users| async move { db.by_email(email).await },
        |db: Users, id: u64| async move { db.by_id(id).await },
    )
    .await
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let users = Users::default();
    users.rows.lock().insert(
        42,
        User {
            id: 42,
            email: "ada@example.com".into(),
            name: "Ada".into(),
        },
    );

    let config = CacheConfig::single("local").name("users");
    let conn = DbConn::with_memory(users.clone(), &config, SharedCalls::new(), Clock::new_tokio())
        .with_timeout(Duration::from_secs(1));

    println!("Five concurrent lookups of ada@example.com...");
    let found = join_all((0..5).map(|_| find_by_email(&conn, "ada@example.com"))).await;
    for user in found {
        println!("  got {:?}", user?);
    }
    println!("Database queries so far: {}", users.queries.load(Ordering::SeqCst));

    let user = find_by_email(&conn, "ada@example.com").await?;
    println!("Cached lookup: {user:?} (queries: {})", users.queries.load(Ordering::SeqCst));

    conn.exec(
        |db: Users| async move { db.rename(42, "Ada Lovelace") },
        ["user:42", "user:email:ada@example.com"],
    )
    .await?;

    let user = find_by_email(&conn, "ada@example.com").await?;
    println!("After update: {user:?} (queries: {})", users.queries.load(Ordering::SeqCst));

    match find_by_email(&conn, "nobody@example.com").await {
        Err(error) if error.is_not_found() => println!("nobody@example.com is not a user"),
        other => println!("unexpected: {other:?}"),
    }

    if let Some(cache) = conn.cache() {
        let stats = cache.stats().report(cache.name());
        println!("Hit ratio: {:.0}%", stats.hit_ratio() * 100.0);
    }

    Ok(())
}
