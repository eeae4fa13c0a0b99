use std::fmt;

use forgemq_codec::frame::ErrorCondition;

/// The own result type where the error part is an async friendly error.
pub type Result<T> = std::result::Result<T, Error>;

/// Shorthand of a boxed Send, Sync error.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// Broker level failure carrying the protocol error condition it stopped
/// with, for example the condition passed to a container stop.
#[derive(Debug)]
pub struct RuntimeError {
    pub condition: ErrorCondition,
}

impl From<ErrorCondition> for RuntimeError {
    fn from(condition: ErrorCondition) -> Self {
        RuntimeError { condition }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.condition.what())
    }
}

impl std::error::Error for RuntimeError {}

/// Helper to fail with a runtime error built from a condition.
pub fn runtime_error<T>(condition: ErrorCondition) -> Result<T> {
    Err(Box::new(RuntimeError::from(condition)))
}
