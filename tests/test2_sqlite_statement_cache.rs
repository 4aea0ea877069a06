#![cfg(feature = "sqlite")]

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sql_stmt_cache::prelude::*;
use sql_stmt_cache::deserialize_row;
use tempfile::TempDir;

const INSERT: &str = "INSERT INTO abc (id, x) VALUES (:id, :x)";
const COUNT: &str = "SELECT COUNT(*) FROM abc";

async fn setup(pool_size: u32) -> Result<(TempDir, Database<SqliteDriver>), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("stmts.db");
    let driver = SqliteOptionsBuilder::new(path.to_string_lossy().into_owned())
        .pool_size(pool_size)
        .build()
        .await?;
    driver
        .execute_batch("CREATE TABLE abc (id INTEGER PRIMARY KEY, x INTEGER NOT NULL);")
        .await?;
    Ok((dir, Database::new(driver)))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test2_statement_is_shared_with_transactions() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, db) = setup(4).await?;
    let ctx = Context::background();

    let warmed = db.stmt(INSERT).await?;
    assert_eq!(warmed.placeholders(), ["id", "x"]);

    let seen = db
        .transact(&ctx, TxOptions::serializable(), |tx| async move {
            tx.exec(
                &Context::background(),
                INSERT,
                Some(&named_params! { "id" => 1, "x" => 1 }),
            )
            .await?;
            tx.stmt(INSERT).await
        })
        .await?;

    assert!(Arc::ptr_eq(&warmed, &seen));
    assert!(Arc::ptr_eq(&warmed, &db.clone().stmt(INSERT).await?));
    assert_eq!(db.statement_cache().len().await, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test2_first_use_inside_transaction_with_single_connection(
) -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, db) = setup(1).await?;
    let ctx = Context::background();

    let n: i64 = db
        .transact(&ctx, TxOptions::serializable(), |tx| async move {
            let ctx = Context::background();
            tx.exec(&ctx, INSERT, Some(&named_params! { "id" => 1, "x" => 1 }))
                .await?;
            tx.get(&ctx, COUNT, None).await
        })
        .await?;
    assert_eq!(n, 1);
    assert_eq!(db.statement_cache().len().await, 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test2_absent_params_behave_like_empty_params() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, db) = setup(2).await?;
    let ctx = Context::background();
    db.exec(&ctx, "INSERT INTO abc (id, x) VALUES (1, 2)", None)
        .await?;

    let empty = NamedParams::new();
    let a: Vec<(i64, i64)> = db.select(&ctx, "SELECT id, x FROM abc", None).await?;
    let b: Vec<(i64, i64)> = db
        .select(&ctx, "SELECT id, x FROM abc", Some(&empty))
        .await?;
    assert_eq!(a, b);
    assert_eq!(a, vec![(1, 2)]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test2_missing_and_extra_params() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, db) = setup(2).await?;
    let ctx = Context::background();

    let err = db
        .exec(&ctx, INSERT, Some(&named_params! { "id" => 5 }))
        .await
        .unwrap_err();
    assert!(matches!(err, SqlStmtError::Query { .. }));
    assert!(
        matches!(err.root_cause(), SqlStmtError::MissingParameter(name) if name == "x"),
        "{err}"
    );

    // unused entries are ignored, sigils are optional
    let res = db
        .exec(
            &ctx,
            INSERT,
            Some(&named_params! { ":id" => 5, "x" => 50, "unused" => "y" }),
        )
        .await?;
    assert_eq!(res.rows_affected, 1);
    assert_eq!(res.last_insert_id, Some(5));

    let res = db
        .exec(
            &ctx,
            "UPDATE abc SET x = :x WHERE id = :id",
            Some(&named_params! { "id" => 404, "x" => 1 }),
        )
        .await?;
    assert_eq!(res.rows_affected, 0);
    assert_eq!(res.last_insert_id, None);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test2_get_requires_exactly_one_row() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, db) = setup(2).await?;
    let ctx = Context::background();
    let by_x = "SELECT id FROM abc WHERE x = :x";

    let err = db
        .get::<i64>(&ctx, by_x, Some(&named_params! { "x" => 1 }))
        .await
        .unwrap_err();
    assert!(matches!(err.root_cause(), SqlStmtError::RowNotFound));

    db.exec(&ctx, INSERT, Some(&named_params! { "id" => 1, "x" => 1 }))
        .await?;
    db.exec(&ctx, INSERT, Some(&named_params! { "id" => 2, "x" => 1 }))
        .await?;
    let err = db
        .get::<i64>(&ctx, by_x, Some(&named_params! { "x" => 1 }))
        .await
        .unwrap_err();
    assert!(matches!(err.root_cause(), SqlStmtError::TooManyRows(2)));

    let ids: Vec<i64> = db.select(&ctx, by_x, Some(&named_params! { "x" => 1 })).await?;
    assert_eq!(ids, vec![1, 2]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test2_bad_sql_is_a_prepare_error_and_not_cached() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, db) = setup(2).await?;
    let ctx = Context::background();

    let err = db
        .exec(&ctx, "INSERT INTO missing_table (id) VALUES (:id)", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SqlStmtError::Prepare { .. }), "{err}");
    assert!(err.to_string().contains("no such table"), "{err}");

    let err = db
        .exec(&ctx, "DELETE FROM abc WHERE id = ?", None)
        .await
        .unwrap_err();
    assert!(matches!(err.root_cause(), SqlStmtError::ParameterError(_)), "{err}");

    assert!(db.statement_cache().is_empty().await);
    Ok(())
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Abc {
    id: i64,
    x: i64,
}

impl FromRow for Abc {
    fn from_row(row: &CustomDbRow) -> Result<Self, SqlStmtError> {
        deserialize_row(row)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test2_struct_params_and_rows() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, db) = setup(2).await?;
    let ctx = Context::background();

    for row in [Abc { id: 1, x: 10 }, Abc { id: 2, x: 20 }] {
        db.exec(&ctx, INSERT, Some(&NamedParams::from_serialize(&row)?))
            .await?;
    }
    let rows: Vec<Abc> = db
        .select(&ctx, "SELECT id, x FROM abc ORDER BY id", None)
        .await?;
    assert_eq!(rows, vec![Abc { id: 1, x: 10 }, Abc { id: 2, x: 20 }]);

    let rs = db
        .query_rows(&ctx, "SELECT id, x FROM abc WHERE id = :id", Some(&named_params! { "id" => 2 }))
        .await?;
    assert_eq!(rs.results.len(), 1);
    assert_eq!(rs.results[0].get("x"), Some(&RowValues::Int(20)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test2_close_releases_statements_but_keeps_connection() -> Result<(), Box<dyn std::error::Error>>
{
    let (_dir, db) = setup(2).await?;
    let ctx = Context::background();

    let insert = db.stmt(INSERT).await?;
    let count = db.stmt(COUNT).await?;
    db.close().await?;

    assert!(insert.is_released());
    assert!(count.is_released());
    assert!(db.statement_cache().is_closed().await);
    assert!(db.statement_cache().is_empty().await);

    let err = db.get::<i64>(&ctx, COUNT, None).await.unwrap_err();
    assert!(matches!(err.root_cause(), SqlStmtError::CacheClosed), "{err}");

    // second close is a no-op
    db.close().await?;

    // the connection itself is still usable
    db.driver()
        .execute_batch("INSERT INTO abc (id, x) VALUES (9, 9);")
        .await?;
    let fresh = Database::new(
        SqliteOptionsBuilder::new(db.driver().db_path().to_owned())
            .build()
            .await?,
    );
    let n: i64 = fresh.get(&ctx, COUNT, None).await?;
    assert_eq!(n, 1);
    Ok(())
}
