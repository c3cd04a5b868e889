use std::fmt;

use compiler::chunk::value::DataType;
use thiserror::Error;

/// What went wrong during execution, independent of where.
#[derive(Debug, Error)]
pub enum RuntimeErrorKind {
    #[error("operand must be a number, got {0}")]
    OperandMustBeNumber(DataType),

    #[error("operands must be numbers, got {0} and {1}")]
    OperandsMustBeNumbers(DataType, DataType),

    #[error("operands to '+' must be two numbers or two strings, got {0} and {1}")]
    OperandsNotAddable(DataType, DataType),

    #[error("cannot compare {0} and {1}")]
    ComparingDifferentTypes(DataType, DataType),

    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),

    #[error("'{0}' is not callable")]
    NotCallable(DataType),

    #[error("expected {expected} argument(s) but got {got}")]
    ArityMismatch { expected: u8, got: u8 },

    #[error("stack overflow")]
    StackOverflow,

    #[error("{0}")]
    Native(String),
}

/// A [`RuntimeErrorKind`] tagged with the source line active when it fired,
/// so the CLI can render an excerpt the same way it does for compile errors.
#[derive(Debug)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub line: usize,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for RuntimeError {}
