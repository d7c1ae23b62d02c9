//! Validation error type.

/// A statement (or part of one) failed schema validation.
///
/// The message carries the path to the offending field as a chain of
/// `in <field>:` prefixes, outermost first, e.g.
/// `in context: registration must be a valid UUID`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    /// Create an error with a plain message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Wrap this error with the name of the field it occurred in.
    pub fn within(self, field: &str) -> Self {
        Self {
            message: format!("in {}: {}", field, self.message),
        }
    }

    /// The full message chain.
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_context() {
        let err = ValidationError::new("registration must be a valid UUID").within("context");
        assert_eq!(err.message(), "in context: registration must be a valid UUID");

        let err = err.within("object");
        assert_eq!(
            err.to_string(),
            "in object: in context: registration must be a valid UUID"
        );
    }
}
