//! Domain rule violations.
//!
//! These errors come from pure domain logic (tree maintenance, survey answer
//! checks, enum parsing). Persistence errors live in the infrastructure crate,
//! which wraps these as validation failures.

use crate::identifiers::{CategoryId, OptionId, QuestionId};

/// Errors raised by domain rules
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// A stored or supplied enum value is not recognised
    #[error("Unknown {kind} value: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    /// A single field failed validation
    #[error("Field validation failed: {field} - {message}")]
    InvalidField { field: String, message: String },

    /// Moving a category would make it its own ancestor
    #[error("Category {0} cannot be moved under itself or one of its descendants")]
    CategoryCycle(CategoryId),

    /// The survey does not accept responses right now
    #[error("Survey is not open for responses")]
    SurveyClosed,

    /// Anonymous response to a survey that requires a respondent
    #[error("Survey does not accept anonymous responses")]
    AnonymousNotAllowed,

    /// A required question was left unanswered
    #[error("Required question {0} was not answered")]
    MissingAnswer(QuestionId),

    /// Answer refers to a question from another survey
    #[error("Question {0} does not belong to this survey")]
    ForeignQuestion(QuestionId),

    /// The same question was answered twice in one response
    #[error("Question {0} was answered more than once")]
    DuplicateAnswer(QuestionId),

    /// Option does not belong to the answered question
    #[error("Option {option} does not belong to question {question}")]
    ForeignOption { question: QuestionId, option: OptionId },

    /// Answer shape does not match the question kind
    #[error("Invalid answer for question {question}: {message}")]
    InvalidAnswer { question: QuestionId, message: String },
}

impl DomainError {
    /// Shorthand for a single-field validation failure
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type for domain rules
pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_error_message() {
        let err = DomainError::field("ends_at", "must be after starts_at");
        assert_eq!(
            err.to_string(),
            "Field validation failed: ends_at - must be after starts_at"
        );
    }

    #[test]
    fn test_unknown_variant_message() {
        let err = DomainError::UnknownVariant {
            kind: "ArticleStatus",
            value: "bogus".to_string(),
        };
        assert!(err.to_string().contains("ArticleStatus"));
        assert!(err.to_string().contains("bogus"));
    }
}
