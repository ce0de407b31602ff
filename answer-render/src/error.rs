//! Error kinds raised while rendering templates and combining results

use thiserror::Error;

/// A failure while evaluating a directive or combining values.
///
/// Every kind is terminal for the render call that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// Unbalanced braces or quotes, or an expression that does not parse
    #[error("malformed template: {0}")]
    MalformedTemplate(String),

    /// A column referenced by a directive is not in the dataset
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    /// Reduced-grammar function outside sum/average/count/unique
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    /// Arithmetic operator the combiner does not recognize
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    /// Named operand missing from the combiner's operand map
    #[error("unknown operand '{0}'")]
    UnknownOperand(String),

    /// Token rejected by the sandbox allow-list
    #[error("operation '{0}' is not allowed")]
    DisallowedOperation(String),

    /// Division by zero, or an aggregate with no defined value over no data
    #[error("arithmetic error: {0}")]
    ArithmeticError(String),

    /// Operation applied to a value of the wrong type
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
}

impl EvalError {
    pub fn malformed(message: impl Into<String>) -> Self {
        EvalError::MalformedTemplate(message.into())
    }

    pub fn disallowed(token: impl Into<String>) -> Self {
        EvalError::DisallowedOperation(token.into())
    }

    pub fn arithmetic(message: impl Into<String>) -> Self {
        EvalError::ArithmeticError(message.into())
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        EvalError::TypeMismatch(message.into())
    }
}

/// A directive failure located in its template
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("directive at byte {position} (`{directive}`): {kind}")]
pub struct RenderError {
    /// Byte offset of the directive's opening brace
    pub position: usize,
    /// Directive text between the braces
    pub directive: String,
    #[source]
    pub kind: EvalError,
}

impl RenderError {
    pub fn new(position: usize, directive: impl Into<String>, kind: EvalError) -> Self {
        Self {
            position,
            directive: directive.into(),
            kind,
        }
    }
}
