//! Integration tests for the blocking facade.

mod common;

use std::time::Duration;

use common::{FakeDb, events_for};
use pretty_assertions::assert_eq;
use sproc::blocking;
use sproc::prelude::*;
use sproc::{ColumnInfo, SqlValue};

fn setup() -> FakeDb {
    let db = FakeDb::new();
    db.create_table("dbo.Log", vec![ColumnInfo::new("Message")]);
    db.procedure("dbo.AddLog", |call| {
        let message = call.input("Message");
        call.insert("dbo.Log", vec![message])?;
        let total = call.rows("dbo.Log").len() as i32;
        call.set_output("Total", total);
        call.set_return(1);
        Ok(())
    });
    db
}

#[test]
fn test_blocking_round_trip() {
    let db = setup();
    let ctx = blocking::Context::new(db.driver()).unwrap();

    let mut cmd = Command::new("dbo.AddLog")
        .input("Message", SqlType::NVarChar(None), "hello")
        .output("Total", SqlType::Int);
    let status: i32 = ctx.execute_with_return_value(&mut cmd).unwrap();

    assert_eq!(status, 1);
    assert_eq!(cmd.parameter_named("Total").unwrap().value_as::<i32>().unwrap(), 1);
    assert_eq!(db.rows("dbo.Log"), vec![vec![SqlValue::from("hello")]]);
    assert_eq!(
        events_for(&db.events(), 1),
        vec!["connect", "begin READ COMMITTED", "call dbo.addlog", "commit", "close"]
    );
}

#[test]
fn test_blocking_projection_failure_rolls_back() {
    let db = setup();
    let ctx = blocking::Context::new(db.driver()).unwrap();

    let mut cmd = Command::new("dbo.AddLog").input("Message", SqlType::NVarChar(None), "lost");
    let err = ctx
        .execute_transaction(&mut cmd, |_cmd| {
            Box::pin(async move { Err::<(), _>(SprocError::type_conversion("boom")) })
        })
        .unwrap_err();

    assert!(matches!(err, SprocError::TypeConversion(_)));
    assert!(db.rows("dbo.Log").is_empty());
}

#[test]
fn test_blocking_timeout() {
    let db = FakeDb::new();
    db.slow_procedure("dbo.Slow", Duration::from_secs(10), |_| Ok(()));
    let ctx = blocking::Context::new(db.driver()).unwrap();

    let mut cmd = Command::new("dbo.Slow").timeout(Duration::from_millis(30));
    let err = ctx.execute_non_query(&mut cmd).unwrap_err();

    assert!(matches!(err, SprocError::Timeout(30)));
    assert_eq!(db.open_connections(), 0);
}

#[test]
fn test_blocking_bulk_copy_and_dispose() {
    let db = setup();
    let ctx = blocking::Context::adopt(Box::new(db.connect())).unwrap();
    assert_eq!(ctx.state(), ContextState::Open);

    let mut rows = RowBuffer::new(["Message"]);
    rows.push(vec!["one".into()]).unwrap();
    rows.push(vec!["two".into()]).unwrap();
    let written = ctx.execute_bulk_copy("dbo.Log", &mut rows, false, None).unwrap();
    assert_eq!(written, 2);

    ctx.dispose();
    ctx.dispose();
    assert_eq!(ctx.state(), ContextState::Disposed);
    assert_eq!(db.open_connections(), 0);

    let err = ctx
        .execute_non_query(&mut Command::new("dbo.AddLog").input(
            "Message",
            SqlType::NVarChar(None),
            "late",
        ))
        .unwrap_err();
    assert!(matches!(err, SprocError::Disposed));
}
