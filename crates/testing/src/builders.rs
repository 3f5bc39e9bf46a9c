//! Fluent builder pattern for constructing test inputs.
//!
//! Builders start from a valid fixture and let a test override only the
//! fields it cares about.

use chrono::{DateTime, Duration, Utc};
use cms_domain::{
    article::{ArticleStatus, NewArticle},
    event::{EventStatus, NewEvent},
    identifiers::*,
    survey::{Answer, NewQuestion, NewResponse, NewSurvey, QuestionKind, Respondent},
    user::{NewUser, UserRole},
};

use crate::fixtures::{new_test_article, new_test_event, new_test_user};

/// Builder for account inputs
#[derive(Clone)]
pub struct UserBuilder {
    input: NewUser,
}

impl UserBuilder {
    pub fn new() -> Self {
        Self {
            input: new_test_user(),
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.input.username = username.into();
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.input.email = email.into();
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.input.phone = Some(phone.into());
        self
    }

    pub fn with_role(mut self, role: UserRole) -> Self {
        self.input.role = role;
        self
    }

    pub fn build(self) -> NewUser {
        self.input
    }
}

impl Default for UserBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for article inputs
#[derive(Clone)]
pub struct ArticleBuilder {
    input: NewArticle,
}

impl ArticleBuilder {
    pub fn new() -> Self {
        let mut input = new_test_article(None, None);
        input.tags.clear();
        Self { input }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.input.title = title.into();
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.input.summary = summary.into();
        self
    }

    pub fn with_category(mut self, category_id: CategoryId) -> Self {
        self.input.category_id = Some(category_id);
        self
    }

    pub fn with_author(mut self, author_id: UserId) -> Self {
        self.input.author_id = Some(author_id);
        self
    }

    pub fn with_status(mut self, status: ArticleStatus) -> Self {
        self.input.status = status;
        self
    }

    pub fn published(self) -> Self {
        self.with_status(ArticleStatus::Published)
    }

    pub fn recommended(mut self) -> Self {
        self.input.is_recommended = true;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> NewArticle {
        self.input
    }
}

impl Default for ArticleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for event inputs
#[derive(Clone)]
pub struct EventBuilder {
    input: NewEvent,
}

impl EventBuilder {
    pub fn new() -> Self {
        Self {
            input: new_test_event(None),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.input.title = title.into();
        self
    }

    pub fn with_capacity(mut self, capacity: i32) -> Self {
        self.input.capacity = Some(capacity);
        self
    }

    pub fn with_status(mut self, status: EventStatus) -> Self {
        self.input.status = status;
        self
    }

    /// Move the event so it starts at `starts_at`, keeping its length and
    /// closing registration an hour before the start.
    pub fn starting_at(mut self, starts_at: DateTime<Utc>) -> Self {
        let length = self.input.ends_at - self.input.starts_at;
        self.input.starts_at = starts_at;
        self.input.ends_at = starts_at + length;
        self.input.registration_deadline = Some(starts_at - Duration::hours(1));
        self
    }

    pub fn with_deadline(mut self, deadline: Option<DateTime<Utc>>) -> Self {
        self.input.registration_deadline = deadline;
        self
    }

    pub fn build(self) -> NewEvent {
        self.input
    }
}

impl Default for EventBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for surveys; starts with no questions
#[derive(Clone)]
pub struct SurveyBuilder {
    input: NewSurvey,
}

impl SurveyBuilder {
    pub fn new() -> Self {
        Self {
            input: NewSurvey {
                title: "Reader survey".to_string(),
                description: String::new(),
                starts_at: None,
                ends_at: None,
                allow_anonymous: true,
                questions: Vec::new(),
            },
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.input.title = title.into();
        self
    }

    pub fn with_window(mut self, starts_at: Option<DateTime<Utc>>, ends_at: Option<DateTime<Utc>>) -> Self {
        self.input.starts_at = starts_at;
        self.input.ends_at = ends_at;
        self
    }

    pub fn anonymous(mut self, allow: bool) -> Self {
        self.input.allow_anonymous = allow;
        self
    }

    pub fn single_choice(self, title: &str, options: &[&str]) -> Self {
        self.question(title, QuestionKind::SingleChoice, true, options)
    }

    pub fn multiple_choice(self, title: &str, options: &[&str]) -> Self {
        self.question(title, QuestionKind::MultipleChoice, false, options)
    }

    pub fn text(self, title: &str, required: bool) -> Self {
        self.question(title, QuestionKind::Text, required, &[])
    }

    pub fn question(mut self, title: &str, kind: QuestionKind, required: bool, options: &[&str]) -> Self {
        self.input.questions.push(NewQuestion {
            title: title.to_string(),
            kind,
            required,
            options: options.iter().map(|label| label.to_string()).collect(),
        });
        self
    }

    pub fn build(self) -> NewSurvey {
        self.input
    }
}

impl Default for SurveyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for survey responses
#[derive(Clone)]
pub struct ResponseBuilder {
    input: NewResponse,
}

impl ResponseBuilder {
    pub fn new(survey_id: SurveyId) -> Self {
        Self {
            input: NewResponse {
                survey_id,
                respondent: Respondent::Anonymous,
                answers: Vec::new(),
            },
        }
    }

    pub fn by(mut self, respondent: Respondent) -> Self {
        self.input.respondent = respondent;
        self
    }

    pub fn choose(mut self, question_id: QuestionId, option_ids: impl IntoIterator<Item = OptionId>) -> Self {
        self.input.answers.push(Answer {
            question_id,
            option_ids: option_ids.into_iter().collect(),
            text: None,
        });
        self
    }

    pub fn write(mut self, question_id: QuestionId, text: impl Into<String>) -> Self {
        self.input.answers.push(Answer {
            question_id,
            option_ids: Vec::new(),
            text: Some(text.into()),
        });
        self
    }

    pub fn build(self) -> NewResponse {
        self.input
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_article_builder() {
        let article = ArticleBuilder::new()
            .with_title("Orientation week")
            .published()
            .recommended()
            .with_tags(vec!["campus".to_string()])
            .build();

        assert_eq!(article.title, "Orientation week");
        assert_eq!(article.status, ArticleStatus::Published);
        assert!(article.is_recommended);
        assert_eq!(article.tags, vec!["campus"]);
    }

    #[test]
    fn test_event_builder_keeps_length() {
        let start = Utc::now() + Duration::days(3);
        let event = EventBuilder::new().with_capacity(2).starting_at(start).build();

        assert_eq!(event.starts_at, start);
        assert_eq!(event.ends_at - event.starts_at, Duration::hours(3));
        assert_eq!(event.capacity, Some(2));
        assert!(event.check_schedule().is_ok());
    }

    #[test]
    fn test_survey_builder() {
        let survey = SurveyBuilder::new()
            .single_choice("Favourite section", &["News", "Events"])
            .text("Comments", false)
            .build();

        assert_eq!(survey.questions.len(), 2);
        assert!(survey.questions[0].required);
        assert!(survey.check_structure().is_ok());
    }

    #[test]
    fn test_response_builder() {
        let question = QuestionId::new();
        let option = OptionId::new();
        let response = ResponseBuilder::new(SurveyId::new())
            .by(Respondent::WeChat("o-abc".to_string()))
            .choose(question, [option])
            .build();

        assert_eq!(response.answers.len(), 1);
        assert_eq!(response.answers[0].option_ids, vec![option]);
        assert!(!response.respondent.is_anonymous());
    }

    #[test]
    fn test_user_builder() {
        let user = UserBuilder::new().with_role(UserRole::Admin).build();
        assert_eq!(user.role, UserRole::Admin);
    }
}
