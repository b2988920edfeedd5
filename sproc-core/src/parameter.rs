//! Stored-procedure parameter descriptors.
//!
//! A [`Parameter`] describes one parameter of a stored procedure: its name, its
//! semantic [`SqlType`], its [`Direction`] and an optional value.
//!
//! Descriptors are immutable from the caller's point of view with one exception:
//! after a call commits, the runner writes the post-execution value of every
//! `Out`, `InOut` and `ReturnValue` descriptor back into it. That write happens
//! only once the call has completed successfully, so a descriptor is never
//! observed mid-call and a failed call leaves it untouched.
//!
//! ```rust
//! use sproc_core::{Direction, Parameter, SqlType};
//!
//! let id = Parameter::input("@UserId", SqlType::Int, 42);
//! assert_eq!(id.name(), "UserId");
//! assert_eq!(id.direction(), Direction::In);
//!
//! let active = Parameter::output("IsActive", SqlType::Bit);
//! assert!(active.value().is_none());
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{SprocError, SprocResult};
use crate::value::{FromSqlValue, SqlType, SqlValue};

/// Parameter direction for stored procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    /// Caller to database only.
    #[default]
    In,
    /// Database to caller only.
    Out,
    /// Both directions.
    InOut,
    /// The procedure's scalar return status.
    ReturnValue,
}

impl Direction {
    /// Check if the caller supplies a value in this direction.
    pub fn carries_input(&self) -> bool {
        matches!(self, Self::In | Self::InOut)
    }

    /// Check if the database hands a value back in this direction.
    pub fn is_output(&self) -> bool {
        matches!(self, Self::Out | Self::InOut | Self::ReturnValue)
    }
}

/// A parameter of a stored procedure call.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    name: String,
    sql_type: SqlType,
    direction: Direction,
    value: Option<SqlValue>,
}

impl Parameter {
    fn new(
        name: impl Into<String>,
        sql_type: SqlType,
        direction: Direction,
        value: Option<SqlValue>,
    ) -> Self {
        let name = name.into();
        let name = name.strip_prefix('@').map(str::to_string).unwrap_or(name);
        Self {
            name,
            sql_type,
            direction,
            value,
        }
    }

    /// Create an input parameter.
    pub fn input(name: impl Into<String>, sql_type: SqlType, value: impl Into<SqlValue>) -> Self {
        Self::new(name, sql_type, Direction::In, Some(value.into()))
    }

    /// Create an output parameter.
    pub fn output(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self::new(name, sql_type, Direction::Out, None)
    }

    /// Create an input/output parameter.
    pub fn input_output(
        name: impl Into<String>,
        sql_type: SqlType,
        value: impl Into<SqlValue>,
    ) -> Self {
        Self::new(name, sql_type, Direction::InOut, Some(value.into()))
    }

    /// Create a return-value parameter. Return statuses are always `INT`.
    pub fn return_value(name: impl Into<String>) -> Self {
        Self::new(name, SqlType::Int, Direction::ReturnValue, None)
    }

    /// Parameter name without the leading `@`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared semantic type.
    pub fn sql_type(&self) -> SqlType {
        self.sql_type
    }

    /// Parameter direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Current value.
    ///
    /// For output directions this is `None` until a call completes.
    pub fn value(&self) -> Option<&SqlValue> {
        self.value.as_ref()
    }

    /// Current value converted to `T`.
    pub fn value_as<T: FromSqlValue>(&self) -> SprocResult<T> {
        match &self.value {
            Some(value) => T::from_sql_value(value),
            None => T::from_sql_value(&SqlValue::Null),
        }
    }

    /// Check the descriptor against the binding rules.
    pub fn validate(&self) -> SprocResult<()> {
        if self.name.trim().is_empty() {
            return Err(SprocError::binding("parameter name must not be empty"));
        }
        if !is_identifier(&self.name) {
            return Err(SprocError::binding(format!(
                "parameter name {:?} is not a valid identifier",
                self.name
            )));
        }

        match (self.direction, &self.value) {
            (Direction::In, None) => Err(SprocError::binding(format!(
                "input parameter @{} requires a value",
                self.name
            ))),
            (Direction::ReturnValue, Some(_)) => Err(SprocError::binding(format!(
                "return value parameter @{} must not carry a value",
                self.name
            ))),
            (Direction::ReturnValue, None) if self.sql_type != SqlType::Int => {
                Err(SprocError::binding(format!(
                    "return value parameter @{} must be INT, found {}",
                    self.name, self.sql_type
                )))
            }
            (_, Some(value)) if !value.is_compatible_with(self.sql_type) => {
                Err(SprocError::binding(format!(
                    "parameter @{} declared {} cannot bind a {} value",
                    self.name,
                    self.sql_type,
                    value.kind()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Store the post-execution value. Only the runner calls this, after commit.
    pub(crate) fn set_output(&mut self, value: SqlValue) {
        self.value = Some(value);
    }
}

/// Validate a full parameter list for one call.
pub fn validate_parameters(params: &[Parameter]) -> SprocResult<()> {
    let mut returns = 0;
    for (i, param) in params.iter().enumerate() {
        param.validate()?;

        if params[..i]
            .iter()
            .any(|p| p.name.eq_ignore_ascii_case(&param.name))
        {
            return Err(SprocError::binding(format!(
                "parameter @{} is bound more than once",
                param.name
            )));
        }

        if param.direction == Direction::ReturnValue {
            returns += 1;
        }
    }

    if returns > 1 {
        return Err(SprocError::binding(
            "at most one return value parameter may be bound",
        ));
    }

    Ok(())
}

/// Longest parameter name SQL Server accepts, excluding the `@`.
const MAX_NAME_LEN: usize = 127;

/// Names are spliced into call batches, so only plain identifiers are allowed.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_well = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');

    starts_well
        && name.len() <= MAX_NAME_LEN
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '@' | '#' | '$'))
}
