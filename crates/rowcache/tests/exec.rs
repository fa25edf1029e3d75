// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for mutations, invalidation and transactions.

mod util;

use ohno::ErrorExt as _;
use rowcache::{DbConn, Error, ErrorKind, SharedCalls};
use rowcache_tier::testing::{MockStore, StoreOp};
use tick::Clock;
use util::{User, UserDb, UserTx, ada, exact_config, memory_conn, user_key};

async fn cached_user(conn: &DbConn<UserDb, rowcache::MemoryStore>) -> User {
    conn.query_row("user:42", |db: UserDb| async move { db.user_by_id(42).await })
        .await
        .unwrap()
}

#[tokio::test]
async fn exec_invalidates_after_mutation() {
    let db = UserDb::with_users([ada()]);
    let conn = memory_conn(db.clone(), Clock::new_frozen());
    assert_eq!(cached_user(&conn).await.name, "Ada");

    conn.exec(|db: UserDb| async move { db.rename(42, "Lovelace").await }, ["user:42"])
        .await
        .unwrap();

    assert!(conn.get_cache::<User>("user:42").await.unwrap_err().is_not_found());
    assert_eq!(cached_user(&conn).await.name, "Lovelace");
    assert_eq!(db.by_id_count(), 2);
}

#[tokio::test]
async fn exec_returns_mutation_result() {
    let conn = memory_conn(UserDb::default(), Clock::new_frozen());

    let affected = conn
        .exec(|_db: UserDb| async { Ok(3_u64) }, Vec::<String>::new())
        .await
        .unwrap();

    assert_eq!(affected, 3);
}

#[tokio::test]
async fn failed_mutation_keeps_cache() {
    let db = UserDb::with_users([ada()]);
    let conn = memory_conn(db.clone(), Clock::new_frozen());
    cached_user(&conn).await;

    let error = conn
        .exec(|db: UserDb| async move { db.rename(1, "Nobody").await }, ["user:42"])
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Database);
    assert_eq!(conn.get_cache::<User>("user:42").await.unwrap(), ada());
}

#[tokio::test]
async fn invalidation_failure_is_reported_after_mutation() {
    let store = MockStore::new();
    store.fail_when(|op| matches!(op, StoreOp::Delete(_)));
    let db = UserDb::with_users([ada()]);
    let conn = DbConn::new(db.clone(), &exact_config(), SharedCalls::new(), Clock::new_frozen(), |_| store.clone());

    let error = conn
        .exec(|db: UserDb| async move { db.rename(42, "Lovelace").await }, ["user:42"])
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Cache);
    assert!(error.find_source::<rowcache_tier::Error>().is_some());
    assert_eq!(db.write_count(), 1, "the mutation was applied");
}

#[tokio::test]
async fn exec_invalidates_every_listed_key() {
    let store = MockStore::new();
    let conn = DbConn::new(UserDb::with_users([ada()]), &exact_config(), SharedCalls::new(), Clock::new_frozen(), |_| {
        store.clone()
    });
    conn.set_cache("user:42", &ada()).await.unwrap();
    conn.set_cache("user:email:a@x.com", &42_u64).await.unwrap();

    conn.exec(
        |db: UserDb| async move { db.rename(42, "Lovelace").await },
        [user_key(&42), "user:email:a@x.com".to_string()],
    )
    .await
    .unwrap();

    assert_eq!(store.entry_count(), 0);
    assert!(
        store
            .operations()
            .contains(&StoreOp::Delete(vec!["user:42".to_string(), "user:email:a@x.com".to_string()]))
    );
}

#[tokio::test]
async fn exec_no_cache_leaves_entries() {
    let db = UserDb::with_users([ada()]);
    let conn = memory_conn(db.clone(), Clock::new_frozen());
    cached_user(&conn).await;

    conn.exec_no_cache(|db: UserDb| async move { db.rename(42, "Lovelace").await })
        .await
        .unwrap();

    assert_eq!(cached_user(&conn).await.name, "Ada", "stale until invalidated");
    let fresh: User = conn
        .query_row_no_cache(|db: UserDb| async move { db.user_by_id(42).await })
        .await
        .unwrap();
    assert_eq!(fresh.name, "Lovelace");
}

#[tokio::test]
async fn transact_commits_on_success() {
    let db = UserDb::with_users([ada()]);
    let conn = memory_conn(db.clone(), Clock::new_frozen());
    cached_user(&conn).await;

    let renamed = conn
        .transact(|tx: DbConn<UserTx, _>| async move {
            tx.exec(|tx: UserTx| async move { tx.db.rename(42, "Lovelace").await }, ["user:42"])
                .await?;
            Ok::<_, Error>("Lovelace")
        })
        .await
        .unwrap();

    assert_eq!(renamed, "Lovelace");
    assert_eq!(db.commit_count(), 1);
    assert_eq!(db.rollback_count(), 0);
    assert!(conn.get_cache::<User>("user:42").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn transact_shares_cache_with_parent() {
    let db = UserDb::with_users([ada()]);
    let conn = memory_conn(db.clone(), Clock::new_frozen());

    conn.transact(|tx: DbConn<UserTx, _>| async move {
        let user: User = tx
            .query_row("user:42", |tx: UserTx| async move { tx.db.user_by_id(42).await })
            .await?;
        assert_eq!(user, ada());
        Ok::<_, Error>(())
    })
    .await
    .unwrap();

    assert_eq!(cached_user(&conn).await, ada());
    assert_eq!(db.by_id_count(), 1, "the read inside the transaction populated the cache");
}

#[tokio::test]
async fn transact_rolls_back_on_error() {
    let db = UserDb::with_users([ada()]);
    let conn = memory_conn(db.clone(), Clock::new_frozen());

    let error = conn
        .transact(|_tx: DbConn<UserTx, _>| async { Err::<(), _>(Error::database("constraint violated")) })
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Database);
    assert!(error.to_string().contains("transaction failed"));
    assert_eq!(db.commit_count(), 0);
    assert_eq!(db.rollback_count(), 1);
}

#[tokio::test]
async fn transact_rolls_back_when_commit_fails() {
    let db = UserDb::with_users([ada()]);
    db.fail_commits();
    let conn = memory_conn(db.clone(), Clock::new_frozen());

    let error = conn
        .transact(|_tx: DbConn<UserTx, _>| async { Ok(()) })
        .await
        .unwrap_err();

    assert!(error.to_string().contains("commit rejected"));
    assert_eq!(db.rollback_count(), 1);
}
