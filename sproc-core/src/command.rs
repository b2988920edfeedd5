//! Command descriptors.
//!
//! A [`Command`] names the stored procedure to run and carries its ordered
//! parameters, plus optional call controls (timeout, cancellation). It is created
//! per call and read back afterwards for output values.
//!
//! ```rust
//! use sproc_core::{Command, SqlType};
//!
//! let command = Command::new("dbo.CalculateTotals")
//!     .input("OrderId", SqlType::Int, 123)
//!     .output("TotalAmount", SqlType::Decimal { precision: 18, scale: 2 })
//!     .output("ItemCount", SqlType::Int);
//!
//! assert_eq!(command.parameters().len(), 3);
//! assert!(command.has_outputs());
//! ```

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::parameter::{Direction, Parameter};
use crate::value::{SqlType, SqlValue};

/// A stored procedure call: procedure name plus ordered parameters.
#[derive(Debug, Clone)]
pub struct Command {
    procedure: String,
    parameters: Vec<Parameter>,
    timeout: Option<Duration>,
    cancellation: Option<CancellationToken>,
}

impl Command {
    /// Create a command for a procedure.
    pub fn new(procedure: impl Into<String>) -> Self {
        Self {
            procedure: procedure.into(),
            parameters: Vec::new(),
            timeout: None,
            cancellation: None,
        }
    }

    /// Add an input parameter.
    pub fn input(mut self, name: impl Into<String>, ty: SqlType, value: impl Into<SqlValue>) -> Self {
        self.parameters.push(Parameter::input(name, ty, value));
        self
    }

    /// Add an output parameter.
    pub fn output(mut self, name: impl Into<String>, ty: SqlType) -> Self {
        self.parameters.push(Parameter::output(name, ty));
        self
    }

    /// Add an input/output parameter.
    pub fn input_output(
        mut self,
        name: impl Into<String>,
        ty: SqlType,
        value: impl Into<SqlValue>,
    ) -> Self {
        self.parameters.push(Parameter::input_output(name, ty, value));
        self
    }

    /// Add a return-value parameter.
    pub fn return_value(mut self, name: impl Into<String>) -> Self {
        self.parameters.push(Parameter::return_value(name));
        self
    }

    /// Add a prebuilt parameter.
    pub fn parameter(mut self, param: Parameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// Override the context's command timeout for this call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Cancel the call when `token` is triggered.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Procedure name.
    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    /// Parameters in binding order.
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Look up a parameter by name (case-insensitive, leading `@` optional).
    pub fn parameter_named(&self, name: &str) -> Option<&Parameter> {
        let name = name.strip_prefix('@').unwrap_or(name);
        self.parameters
            .iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
    }

    /// Check if any parameter receives a value from the database.
    pub fn has_outputs(&self) -> bool {
        self.parameters.iter().any(|p| p.direction().is_output())
    }

    /// The return-value descriptor, if one is bound.
    pub fn return_parameter(&self) -> Option<&Parameter> {
        self.parameters
            .iter()
            .find(|p| p.direction() == Direction::ReturnValue)
    }

    pub(crate) fn split(&mut self) -> (&str, &mut [Parameter], CallControls) {
        let controls = CallControls {
            timeout: self.timeout,
            cancellation: self.cancellation.clone(),
        };
        (&self.procedure, self.parameters.as_mut_slice(), controls)
    }
}

/// Per-call timeout and cancellation.
#[derive(Debug, Clone, Default)]
pub(crate) struct CallControls {
    pub(crate) timeout: Option<Duration>,
    pub(crate) cancellation: Option<CancellationToken>,
}
