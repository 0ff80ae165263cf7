use thiserror::Error;

/// Errors from compiling or evaluating a partition expression.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    #[error("expression parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("expression evaluation error: {0}")]
    Eval(String),
}

impl ExprError {
    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn eval(message: impl Into<String>) -> Self {
        Self::Eval(message.into())
    }
}
