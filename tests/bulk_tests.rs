//! Integration tests for the bulk loader.

mod common;

use std::sync::Arc;

use common::{FakeDb, FakeError, events_for};
use pretty_assertions::assert_eq;
use sproc::prelude::*;
use sproc::{ColumnInfo, SqlValue};

fn orders_db() -> FakeDb {
    let db = FakeDb::new();
    db.create_table(
        "dbo.Orders",
        vec![
            ColumnInfo::new("Id").with_type(SqlType::Int).identity(),
            ColumnInfo::new("Customer").with_type(SqlType::NVarChar(Some(50))),
            ColumnInfo::new("Amount").with_type(SqlType::Int),
            ColumnInfo::new("Note").with_type(SqlType::NVarChar(None)),
        ],
    );
    db
}

fn order_rows(ids: impl Iterator<Item = i32>) -> Vec<Vec<SqlValue>> {
    ids.map(|id| {
        vec![
            SqlValue::I32(id),
            SqlValue::String(format!("customer {}", id)),
            SqlValue::I32(id % 100),
        ]
    })
    .collect()
}

#[tokio::test]
async fn test_bulk_copy_keeps_identity_values() {
    let db = orders_db();
    let ctx = Context::new(db.driver());

    let mut source = IterRowSource::new(
        ["Id", "Customer", "Amount"],
        order_rows(1001..=11_000).into_iter(),
    );
    let written = ctx
        .execute_bulk_copy("dbo.Orders", &mut source, true, None)
        .await
        .unwrap();

    assert_eq!(written, 10_000);
    let rows = db.rows("dbo.Orders");
    assert_eq!(rows.len(), 10_000);
    for (row, expected) in rows.iter().zip(1001..) {
        assert_eq!(row[0], SqlValue::I32(expected));
    }

    // Default batch size is 5 000 rows.
    let batches: Vec<String> = db
        .events()
        .into_iter()
        .filter(|e| e.starts_with("bulk"))
        .collect();
    assert_eq!(batches, vec!["bulk#1 5000 rows", "bulk#1 5000 rows"]);
}

#[tokio::test]
async fn test_bulk_copy_generates_identity() {
    let db = orders_db();
    let ctx = Context::new(db.driver());

    let mut source = RowBuffer::new(["Id", "Customer", "Amount"]);
    for row in order_rows([500, 600, 700].into_iter()) {
        source.push(row).unwrap();
    }
    let written = ctx
        .execute_bulk_copy("dbo.Orders", &mut source, false, None)
        .await
        .unwrap();

    assert_eq!(written, 3);
    let ids: Vec<SqlValue> = db.rows("dbo.Orders").into_iter().map(|r| r[0].clone()).collect();
    assert_eq!(ids, vec![SqlValue::I64(1), SqlValue::I64(2), SqlValue::I64(3)]);
    assert!(source.is_empty());
}

#[tokio::test]
async fn test_bulk_copy_maps_columns_by_name() {
    let db = orders_db();
    let ctx = Context::new(db.driver());

    let mut source = RowBuffer::new(["amount", "CUSTOMER"]);
    source.push(vec![SqlValue::I32(42), "acme".into()]).unwrap();
    ctx.execute_bulk_copy("dbo.Orders", &mut source, false, None)
        .await
        .unwrap();

    assert_eq!(
        db.rows("dbo.Orders"),
        vec![vec![SqlValue::I64(1), "acme".into(), SqlValue::I32(42), SqlValue::Null]]
    );
}

#[tokio::test]
async fn test_bulk_copy_rejects_unknown_column() {
    let db = orders_db();
    let ctx = Context::new(db.driver());

    let mut source = RowBuffer::new(["Customer", "Discount"]);
    source.push(vec!["acme".into(), SqlValue::I32(5)]).unwrap();
    let err = ctx
        .execute_bulk_copy("dbo.Orders", &mut source, false, None)
        .await
        .unwrap_err();

    assert!(matches!(err, SprocError::Binding(_)));
    assert!(db.rows("dbo.Orders").is_empty());
}

#[tokio::test]
async fn test_bulk_copy_missing_table() {
    let db = FakeDb::new();
    let ctx = Context::new(db.driver());

    let mut source = RowBuffer::new(["Id"]);
    let err = ctx
        .execute_bulk_copy("dbo.Nowhere", &mut source, false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SprocError::Binding(_)));
}

#[tokio::test]
async fn test_bulk_copy_rejects_ragged_rows() {
    let db = orders_db();
    let ctx = Context::new(db.driver());

    let rows = vec![
        vec!["a".into(), SqlValue::I32(1)],
        vec!["b".into()],
    ];
    let mut source = IterRowSource::new(["Customer", "Amount"], rows.into_iter());
    let err = ctx
        .execute_bulk_copy("dbo.Orders", &mut source, false, None)
        .await
        .unwrap_err();

    assert!(matches!(err, SprocError::Binding(_)));
    assert!(db.rows("dbo.Orders").is_empty());
}

#[tokio::test]
async fn test_failed_batch_keeps_earlier_batches() {
    let db = orders_db();
    db.reject_rows("dbo.Orders", |row| row[0] == SqlValue::I32(250));
    let ctx = Context::new(db.driver());

    let mut source = IterRowSource::new(
        ["Id", "Customer", "Amount"],
        order_rows(1..=400).into_iter(),
    );
    let err = ctx
        .execute_bulk_copy("dbo.Orders", &mut source, true, Some(100))
        .await
        .unwrap_err();

    assert_eq!(err.driver_error::<FakeError>().unwrap().code, 547);
    // Batches 1 and 2 committed; batch 3 failed as a unit; batch 4 never sent.
    assert_eq!(db.rows("dbo.Orders").len(), 200);
    assert_eq!(
        events_for(&db.events(), 1),
        vec!["connect", "bulk 100 rows", "bulk 100 rows", "bulk 100 rows", "close"]
    );
}

#[tokio::test]
async fn test_bulk_copy_inside_transaction_rolls_back() {
    let db = orders_db();
    db.procedure("dbo.StartImport", |_| Ok(()));
    let ctx = Context::new(db.driver());

    let err = ctx
        .execute_transaction(&mut Command::new("dbo.StartImport"), |cmd| {
            Box::pin(async move {
                let mut source = IterRowSource::new(
                    ["Customer", "Amount"],
                    (0..50).map(|n| vec![SqlValue::String(format!("c{}", n)), SqlValue::I32(n)]),
                );
                let options = BulkCopyOptions::new("dbo.Orders").batch_size(20);
                let written = cmd.bulk_copy(&options, &mut source).await?;
                assert_eq!(written, 50);
                Err::<(), _>(SprocError::binding("import validation failed"))
            })
        })
        .await
        .unwrap_err();

    assert!(matches!(err, SprocError::Binding(_)));
    assert!(db.rows("dbo.Orders").is_empty());
}

#[tokio::test]
async fn test_bulk_copy_inside_transaction_commits() {
    let db = orders_db();
    db.procedure("dbo.StartImport", |_| Ok(()));
    let ctx = Context::new(db.driver());

    let written = ctx
        .execute_transaction(&mut Command::new("dbo.StartImport"), |cmd| {
            Box::pin(async move {
                let mut source = RowBuffer::new(["Customer"]);
                source.push(vec!["solo".into()])?;
                cmd.bulk_copy(&BulkCopyOptions::new("dbo.Orders"), &mut source)
                    .await
            })
        })
        .await
        .unwrap();

    assert_eq!(written, 1);
    assert_eq!(db.rows("dbo.Orders").len(), 1);
}

#[tokio::test]
async fn test_bulk_copy_uses_context_batch_size() {
    let db = orders_db();
    let options = ContextOptions::new().bulk_batch_size(3);
    let ctx = Context::with_options(Arc::new(db.driver()), options);

    let mut source = IterRowSource::new(
        ["Customer"],
        (0..7).map(|n| vec![SqlValue::String(format!("c{}", n))]),
    );
    let written = ctx
        .execute_bulk_copy("dbo.Orders", &mut source, false, None)
        .await
        .unwrap();

    assert_eq!(written, 7);
    let batches = db.events().iter().filter(|e| e.starts_with("bulk")).count();
    assert_eq!(batches, 3);
}

#[tokio::test]
async fn test_bulk_copy_cancelled_before_start() {
    let db = orders_db();
    let ctx = Context::new(db.driver());
    let token = CancellationToken::new();
    token.cancel();

    let options = BulkCopyOptions::new("dbo.Orders").cancellation(token);
    let mut source = IterRowSource::new(
        ["Customer"],
        (0..10).map(|n| vec![SqlValue::String(format!("c{}", n))]),
    );
    let err = ctx.execute_bulk_copy_with(&options, &mut source).await.unwrap_err();

    assert!(matches!(err, SprocError::Cancelled));
    assert!(db.rows("dbo.Orders").is_empty());
    assert!(db.events().is_empty());
    assert_eq!(ctx.state(), ContextState::Unopened);
}
