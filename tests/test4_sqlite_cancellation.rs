#![cfg(feature = "sqlite")]

use std::time::{Duration, Instant};

use sql_stmt_cache::prelude::*;
use tempfile::TempDir;

const INSERT: &str = "INSERT INTO abc (id, x) VALUES (:id, :x)";
const COUNT: &str = "SELECT COUNT(*) FROM abc";
const SLOW: &str = "WITH RECURSIVE c(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM c WHERE n < 50000000) \
                    SELECT COUNT(*) FROM c";
const SLOW_INSERT: &str = "INSERT INTO abc (id, x) \
                           WITH RECURSIVE c(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM c WHERE n < 50000000) \
                           SELECT n + 1000, n FROM c";

async fn setup() -> Result<(TempDir, Database<SqliteDriver>), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("cancel.db");
    let driver = SqliteOptionsBuilder::new(path.to_string_lossy().into_owned())
        .pool_size(2)
        .build()
        .await?;
    driver
        .execute_batch("CREATE TABLE abc (id INTEGER PRIMARY KEY, x INTEGER NOT NULL);")
        .await?;
    Ok((dir, Database::new(driver)))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test4_cancelled_context_runs_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, db) = setup().await?;
    let (ctx, token) = Context::background().with_cancel();
    token.cancel();

    let err = db
        .exec(&ctx, INSERT, Some(&named_params! { "id" => 1, "x" => 1 }))
        .await
        .unwrap_err();
    assert!(err.is_cancelled(), "{err}");

    let err = db
        .transact(&ctx, TxOptions::serializable(), |_tx| async move {
            Err::<(), _>(SqlStmtError::Other("unit of work ran".into()))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SqlStmtError::TxBegin { depth: 1, .. }), "{err}");
    assert!(err.is_cancelled());

    let n: i64 = db.get(&Context::background(), COUNT, None).await?;
    assert_eq!(n, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test4_deadline_interrupts_running_query() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, db) = setup().await?;
    let ctx = Context::background().with_timeout(Duration::from_millis(50));

    let started = Instant::now();
    let err = db.get::<i64>(&ctx, SLOW, None).await.unwrap_err();
    assert!(err.is_cancelled(), "{err}");
    assert!(err.to_string().contains("deadline exceeded"), "{err}");
    assert!(started.elapsed() < Duration::from_secs(5));

    // both connections are usable again once the interrupted call unwinds
    let bg = Context::background();
    for id in 1..=4 {
        db.exec(&bg, INSERT, Some(&named_params! { "id" => id, "x" => id }))
            .await?;
    }
    let n: i64 = db.get(&bg, COUNT, None).await?;
    assert_eq!(n, 4);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test4_cancel_inside_unit_of_work_still_discards_writes(
) -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, db) = setup().await?;
    let (ctx, token) = Context::background().with_cancel();

    let err = db
        .transact(&ctx, TxOptions::serializable(), |tx| {
            let ctx = ctx.clone();
            async move {
                tx.exec(&ctx, INSERT, Some(&named_params! { "id" => 1, "x" => 1 }))
                    .await?;
                token.cancel();
                tx.exec(&ctx, INSERT, Some(&named_params! { "id" => 2, "x" => 2 }))
                    .await?;
                Ok::<_, SqlStmtError>(())
            }
        })
        .await
        .unwrap_err();

    // the rollback observes the same fired context; the driver still rolls back
    // when the transaction is dropped
    match &err {
        SqlStmtError::TxRollback { source, cause, .. } => {
            assert!(matches!(**source, SqlStmtError::Cancelled(_)));
            assert!(cause.is_cancelled());
        }
        other => panic!("unexpected error: {other}"),
    }

    let bg = Context::background();
    db.exec(&bg, INSERT, Some(&named_params! { "id" => 1, "x" => 10 }))
        .await?;
    let rows: Vec<(i64, i64)> = db.select(&bg, "SELECT id, x FROM abc", None).await?;
    assert_eq!(rows, vec![(1, 10)]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test4_interrupted_write_rolls_back_cleanly() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, db) = setup().await?;
    let bg = Context::background();

    let err = db
        .transact(&bg, TxOptions::serializable(), |tx| async move {
            let bg = Context::background();
            tx.exec(&bg, INSERT, Some(&named_params! { "id" => 1, "x" => 1 }))
                .await?;
            let short = bg.with_timeout(Duration::from_millis(50));
            tx.exec(&short, SLOW_INSERT, None).await?;
            Ok::<_, SqlStmtError>(())
        })
        .await
        .unwrap_err();

    // SQLite rolls an interrupted write back by itself; that is not a failed rollback
    assert!(matches!(err, SqlStmtError::TxAborted { depth: 1, .. }), "{err}");
    assert!(err.is_cancelled());

    let n: i64 = db.get(&bg, COUNT, None).await?;
    assert_eq!(n, 0);
    db.exec(&bg, INSERT, Some(&named_params! { "id" => 1, "x" => 10 }))
        .await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test4_cancel_before_commit_discards_writes() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, db) = setup().await?;
    let (ctx, token) = Context::background().with_cancel();

    let err = db
        .transact(&ctx, TxOptions::serializable(), |tx| async move {
            tx.exec(
                &Context::background(),
                INSERT,
                Some(&named_params! { "id" => 1, "x" => 1 }),
            )
            .await?;
            token.cancel();
            Ok::<_, SqlStmtError>(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, SqlStmtError::TxCommit { depth: 1, .. }), "{err}");
    assert!(err.is_cancelled());

    let bg = Context::background();
    let n: i64 = db.get(&bg, COUNT, None).await?;
    assert_eq!(n, 0);
    // waits on the busy timeout until the dropped transaction has rolled back
    db.exec(&bg, INSERT, Some(&named_params! { "id" => 1, "x" => 10 }))
        .await?;
    Ok(())
}
