//! Stored procedure call batches.
//!
//! A call is sent as one parameterised batch:
//!
//! ```sql
//! DECLARE @__rv INT, @__rc INT;
//! DECLARE @__o1 DECIMAL(18, 2);
//! DECLARE @__o2 BIGINT = @P2;
//! EXEC @__rv = [dbo].[CalculateTotals] @OrderId = @P1, @Total = @__o1 OUTPUT, @Counter = @__o2 OUTPUT;
//! SET @__rc = @@ROWCOUNT;
//! SELECT @__rv AS [__return_value], @__rc AS [__rows_affected], @__o1 AS [Total], @__o2 AS [Counter];
//! ```
//!
//! The trailing `SELECT` is always the last result set of the batch; it carries
//! the return status, rows affected and output values, and is stripped before
//! result sets reach the caller.

use sproc_core::{CallRequest, Direction};

/// Column carrying the procedure's return status in the trailer.
pub const RETURN_VALUE_COLUMN: &str = "__return_value";
/// Column carrying `@@ROWCOUNT` in the trailer.
pub const ROWS_AFFECTED_COLUMN: &str = "__rows_affected";

/// A generated call batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallBatch {
    /// Batch text.
    pub sql: String,
    /// Indexes into the request parameters, in `@P1..@Pn` order.
    pub binds: Vec<usize>,
    /// Indexes of the parameters whose values appear in the trailer, in column order.
    pub outputs: Vec<usize>,
}

/// Quote a possibly schema-qualified identifier: `dbo.Proc` becomes `[dbo].[Proc]`.
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| {
            let part = part.trim();
            let part = part
                .strip_prefix('[')
                .and_then(|p| p.strip_suffix(']'))
                .unwrap_or(part);
            format!("[{}]", part.replace(']', "]]"))
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Quote a single name as one identifier, without splitting on `.`.
pub fn quote_alias(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Build the batch for a procedure call.
///
/// Parameter names are spliced into the batch text; callers validate them
/// with [`sproc_core::validate_parameters`] first.
pub fn build_call(request: &CallRequest<'_>) -> CallBatch {
    let mut binds = Vec::new();
    let mut outputs = Vec::new();
    let mut declarations = Vec::new();
    let mut arguments = Vec::new();

    for (index, param) in request.parameters.iter().enumerate() {
        let var = format!("@__o{}", index);
        match param.direction() {
            Direction::In => {
                binds.push(index);
                arguments.push(format!("@{} = @P{}", param.name(), binds.len()));
            }
            Direction::Out => {
                declarations.push(format!("DECLARE {} {};", var, param.sql_type().declaration()));
                arguments.push(format!("@{} = {} OUTPUT", param.name(), var));
                outputs.push(index);
            }
            Direction::InOut => {
                binds.push(index);
                declarations.push(format!(
                    "DECLARE {} {} = @P{};",
                    var,
                    param.sql_type().declaration(),
                    binds.len()
                ));
                arguments.push(format!("@{} = {} OUTPUT", param.name(), var));
                outputs.push(index);
            }
            Direction::ReturnValue => {}
        }
    }

    let mut sql = String::from("DECLARE @__rv INT, @__rc INT;\n");
    for declaration in &declarations {
        sql.push_str(declaration);
        sql.push('\n');
    }

    sql.push_str(&format!("EXEC @__rv = {}", quote_ident(request.procedure)));
    if !arguments.is_empty() {
        sql.push(' ');
        sql.push_str(&arguments.join(", "));
    }
    sql.push_str(";\nSET @__rc = @@ROWCOUNT;\n");

    let mut select = vec![
        format!("@__rv AS [{}]", RETURN_VALUE_COLUMN),
        format!("@__rc AS [{}]", ROWS_AFFECTED_COLUMN),
    ];
    for &index in &outputs {
        let param = &request.parameters[index];
        select.push(format!("@__o{} AS {}", index, quote_alias(param.name())));
    }
    sql.push_str(&format!("SELECT {};", select.join(", ")));

    CallBatch {
        sql,
        binds,
        outputs,
    }
}
