//! Surveys, their questions, responses and result statistics.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::audit::Audit;
use crate::errors::{DomainError, DomainResult};
use crate::identifiers::{OptionId, QuestionId, SurveyId, UserId};
use crate::stats::percentage;

/// Survey with its questions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Survey {
    pub id: SurveyId,
    pub title: String,
    pub description: String,
    pub status: SurveyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    pub allow_anonymous: bool,
    /// Empty unless loaded through `get_by_id`
    pub questions: Vec<Question>,
    pub audit: Audit,
}

impl Survey {
    /// Published and inside the optional `[starts_at, ends_at]` window
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SurveyStatus::Published
            && self.starts_at.map_or(true, |start| now >= start)
            && self.ends_at.map_or(true, |end| now <= end)
    }

    pub fn question(&self, id: QuestionId) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub survey_id: SurveyId,
    pub title: String,
    pub kind: QuestionKind,
    pub required: bool,
    pub sort_order: i32,
    pub options: Vec<QuestionOption>,
}

impl Question {
    pub fn has_option(&self, id: OptionId) -> bool {
        self.options.iter().any(|o| o.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: OptionId,
    pub question_id: QuestionId,
    pub label: String,
    pub sort_order: i32,
}

define_str_enum! {
    SurveyStatus {
        Draft => "draft",
        Published => "published",
        Closed => "closed",
    }
}

define_str_enum! {
    QuestionKind {
        SingleChoice => "single_choice",
        MultipleChoice => "multiple_choice",
        Text => "text",
    }
}

impl QuestionKind {
    pub fn is_choice(&self) -> bool {
        !matches!(self, Self::Text)
    }
}

/// Input for creating a survey together with its questions
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct NewSurvey {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub allow_anonymous: bool,
    pub questions: Vec<NewQuestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQuestion {
    pub title: String,
    pub kind: QuestionKind,
    #[serde(default)]
    pub required: bool,
    /// Option labels in display order; empty for text questions
    #[serde(default)]
    pub options: Vec<String>,
}

impl NewSurvey {
    /// Structural rules the derive cannot express
    pub fn check_structure(&self) -> DomainResult<()> {
        check_window(self.starts_at, self.ends_at)?;
        for (index, question) in self.questions.iter().enumerate() {
            let field = format!("questions[{}]", index);
            if question.title.trim().is_empty() {
                return Err(DomainError::field(field, "title must not be empty"));
            }
            if question.kind.is_choice() {
                if question.options.len() < 2 {
                    return Err(DomainError::field(field, "choice questions need at least two options"));
                }
                if question.options.iter().any(|label| label.trim().is_empty()) {
                    return Err(DomainError::field(field, "option labels must not be empty"));
                }
            } else if !question.options.is_empty() {
                return Err(DomainError::field(field, "text questions take no options"));
            }
        }
        Ok(())
    }
}

/// Partial update of the survey header; questions are immutable once created.
#[derive(Debug, Clone, Default, Validate, Serialize, Deserialize)]
pub struct SurveyUpdate {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    pub description: Option<String>,
    pub starts_at: Option<Option<DateTime<Utc>>>,
    pub ends_at: Option<Option<DateTime<Utc>>>,
    pub allow_anonymous: Option<bool>,
}

/// `ends_at` must not precede `starts_at` when both are set
pub fn check_window(starts_at: Option<DateTime<Utc>>, ends_at: Option<DateTime<Utc>>) -> DomainResult<()> {
    match (starts_at, ends_at) {
        (Some(start), Some(end)) if end < start => {
            Err(DomainError::field("ends_at", "must not be before starts_at"))
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Default)]
pub struct SurveyFilter {
    pub status: Option<SurveyStatus>,
    pub keyword: Option<String>,
    /// Only surveys accepting responses at this instant
    pub open_at: Option<DateTime<Utc>>,
}

/// Who submitted a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Respondent {
    User(UserId),
    WeChat(String),
    Anonymous,
}

impl Respondent {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }
}

/// One answered question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: QuestionId,
    #[serde(default)]
    pub option_ids: Vec<OptionId>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Input for submitting a response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewResponse {
    pub survey_id: SurveyId,
    pub respondent: Respondent,
    pub answers: Vec<Answer>,
}

/// Check a response against a survey loaded with its questions.
pub fn validate_answers(survey: &Survey, response: &NewResponse, now: DateTime<Utc>) -> DomainResult<()> {
    if !survey.is_open_at(now) {
        return Err(DomainError::SurveyClosed);
    }
    if response.respondent.is_anonymous() && !survey.allow_anonymous {
        return Err(DomainError::AnonymousNotAllowed);
    }

    let mut answered = HashSet::new();
    for answer in &response.answers {
        let question = survey
            .question(answer.question_id)
            .ok_or(DomainError::ForeignQuestion(answer.question_id))?;
        if !answered.insert(question.id) {
            return Err(DomainError::DuplicateAnswer(question.id));
        }

        match question.kind {
            QuestionKind::Text => {
                if !answer.option_ids.is_empty() {
                    return Err(DomainError::InvalidAnswer {
                        question: question.id,
                        message: "text questions take no options".to_string(),
                    });
                }
                if answer.text.as_deref().map_or(true, |t| t.trim().is_empty()) {
                    return Err(DomainError::InvalidAnswer {
                        question: question.id,
                        message: "text answer must not be empty".to_string(),
                    });
                }
            }
            QuestionKind::SingleChoice | QuestionKind::MultipleChoice => {
                if let Some(option) = answer.option_ids.iter().find(|o| !question.has_option(**o)) {
                    return Err(DomainError::ForeignOption {
                        question: question.id,
                        option: *option,
                    });
                }
                let distinct: HashSet<_> = answer.option_ids.iter().collect();
                if distinct.len() != answer.option_ids.len() {
                    return Err(DomainError::InvalidAnswer {
                        question: question.id,
                        message: "options must not repeat".to_string(),
                    });
                }
                let valid_count = match question.kind {
                    QuestionKind::SingleChoice => answer.option_ids.len() == 1,
                    _ => !answer.option_ids.is_empty(),
                };
                if !valid_count {
                    return Err(DomainError::InvalidAnswer {
                        question: question.id,
                        message: format!("{} question received {} options", question.kind, answer.option_ids.len()),
                    });
                }
            }
        }
    }

    if let Some(missing) = survey
        .questions
        .iter()
        .find(|q| q.required && !answered.contains(&q.id))
    {
        return Err(DomainError::MissingAnswer(missing.id));
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionStatistics {
    pub option_id: OptionId,
    pub label: String,
    pub count: u64,
    /// Share of respondents who answered the question, 0–100
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionStatistics {
    pub question_id: QuestionId,
    pub title: String,
    pub kind: QuestionKind,
    /// Responses that answered this question
    pub answered: u64,
    pub options: Vec<OptionStatistics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyStatistics {
    pub survey_id: SurveyId,
    pub responses: u64,
    pub questions: Vec<QuestionStatistics>,
}

/// Shape grouped vote counts into per-question statistics.
///
/// Options absent from `option_counts` are reported with zero votes.
pub fn build_statistics(
    survey: &Survey,
    responses: u64,
    answered_counts: &[(QuestionId, u64)],
    option_counts: &[(OptionId, u64)],
) -> SurveyStatistics {
    let answered: HashMap<_, _> = answered_counts.iter().copied().collect();
    let votes: HashMap<_, _> = option_counts.iter().copied().collect();

    let questions = survey
        .questions
        .iter()
        .map(|question| {
            let answered = answered.get(&question.id).copied().unwrap_or(0);
            let options = question
                .options
                .iter()
                .map(|option| {
                    let count = votes.get(&option.id).copied().unwrap_or(0);
                    OptionStatistics {
                        option_id: option.id,
                        label: option.label.clone(),
                        count,
                        percentage: percentage(count, answered),
                    }
                })
                .collect();
            QuestionStatistics {
                question_id: question.id,
                title: question.title.clone(),
                kind: question.kind,
                answered,
                options,
            }
        })
        .collect();

    SurveyStatistics {
        survey_id: survey.id,
        responses,
        questions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn option(question_id: QuestionId, label: &str, sort_order: i32) -> QuestionOption {
        QuestionOption {
            id: OptionId::new(),
            question_id,
            label: label.to_string(),
            sort_order,
        }
    }

    fn survey() -> Survey {
        let id = SurveyId::new();
        let single = QuestionId::new();
        let multi = QuestionId::new();
        let text = QuestionId::new();
        Survey {
            id,
            title: "Reader satisfaction".to_string(),
            description: String::new(),
            status: SurveyStatus::Published,
            starts_at: None,
            ends_at: None,
            allow_anonymous: false,
            questions: vec![
                Question {
                    id: single,
                    survey_id: id,
                    title: "Overall rating".to_string(),
                    kind: QuestionKind::SingleChoice,
                    required: true,
                    sort_order: 0,
                    options: vec![option(single, "Good", 0), option(single, "Bad", 1)],
                },
                Question {
                    id: multi,
                    survey_id: id,
                    title: "Sections you read".to_string(),
                    kind: QuestionKind::MultipleChoice,
                    required: false,
                    sort_order: 1,
                    options: vec![
                        option(multi, "News", 0),
                        option(multi, "Events", 1),
                        option(multi, "Videos", 2),
                    ],
                },
                Question {
                    id: text,
                    survey_id: id,
                    title: "Comments".to_string(),
                    kind: QuestionKind::Text,
                    required: false,
                    sort_order: 2,
                    options: vec![],
                },
            ],
            audit: Audit::default(),
        }
    }

    fn response(survey: &Survey, answers: Vec<Answer>) -> NewResponse {
        NewResponse {
            survey_id: survey.id,
            respondent: Respondent::User(UserId::new()),
            answers,
        }
    }

    fn choose(question: &Question, picks: &[usize]) -> Answer {
        Answer {
            question_id: question.id,
            option_ids: picks.iter().map(|i| question.options[*i].id).collect(),
            text: None,
        }
    }

    #[test]
    fn test_is_open_at_window() {
        let now = Utc::now();
        let mut s = survey();
        assert!(s.is_open_at(now));

        s.starts_at = Some(now + Duration::hours(1));
        assert!(!s.is_open_at(now));

        s.starts_at = Some(now - Duration::hours(2));
        s.ends_at = Some(now - Duration::hours(1));
        assert!(!s.is_open_at(now));

        s.ends_at = None;
        s.status = SurveyStatus::Closed;
        assert!(!s.is_open_at(now));
    }

    #[test]
    fn test_valid_response() {
        let s = survey();
        let r = response(
            &s,
            vec![
                choose(&s.questions[0], &[0]),
                choose(&s.questions[1], &[0, 2]),
                Answer {
                    question_id: s.questions[2].id,
                    option_ids: vec![],
                    text: Some("More local coverage".to_string()),
                },
            ],
        );
        assert_eq!(validate_answers(&s, &r, Utc::now()), Ok(()));
    }

    #[test]
    fn test_missing_required_answer() {
        let s = survey();
        let r = response(&s, vec![choose(&s.questions[1], &[1])]);
        assert_eq!(
            validate_answers(&s, &r, Utc::now()),
            Err(DomainError::MissingAnswer(s.questions[0].id))
        );
    }

    #[test]
    fn test_single_choice_requires_exactly_one() {
        let s = survey();
        let r = response(&s, vec![choose(&s.questions[0], &[0, 1])]);
        assert!(matches!(
            validate_answers(&s, &r, Utc::now()),
            Err(DomainError::InvalidAnswer { .. })
        ));
    }

    #[test]
    fn test_foreign_question_and_option() {
        let s = survey();
        let stranger = QuestionId::new();
        let r = response(
            &s,
            vec![Answer {
                question_id: stranger,
                option_ids: vec![],
                text: None,
            }],
        );
        assert_eq!(
            validate_answers(&s, &r, Utc::now()),
            Err(DomainError::ForeignQuestion(stranger))
        );

        let wrong_option = s.questions[1].options[0].id;
        let r = response(
            &s,
            vec![Answer {
                question_id: s.questions[0].id,
                option_ids: vec![wrong_option],
                text: None,
            }],
        );
        assert!(matches!(
            validate_answers(&s, &r, Utc::now()),
            Err(DomainError::ForeignOption { .. })
        ));
    }

    #[test]
    fn test_duplicate_answer_rejected() {
        let s = survey();
        let r = response(
            &s,
            vec![choose(&s.questions[0], &[0]), choose(&s.questions[0], &[1])],
        );
        assert_eq!(
            validate_answers(&s, &r, Utc::now()),
            Err(DomainError::DuplicateAnswer(s.questions[0].id))
        );
    }

    #[test]
    fn test_anonymous_and_closed() {
        let mut s = survey();
        let mut r = response(&s, vec![choose(&s.questions[0], &[0])]);
        r.respondent = Respondent::Anonymous;
        assert_eq!(
            validate_answers(&s, &r, Utc::now()),
            Err(DomainError::AnonymousNotAllowed)
        );

        s.allow_anonymous = true;
        assert!(validate_answers(&s, &r, Utc::now()).is_ok());

        s.status = SurveyStatus::Draft;
        assert_eq!(validate_answers(&s, &r, Utc::now()), Err(DomainError::SurveyClosed));
    }

    #[test]
    fn test_empty_text_answer_rejected() {
        let s = survey();
        let r = response(
            &s,
            vec![
                choose(&s.questions[0], &[0]),
                Answer {
                    question_id: s.questions[2].id,
                    option_ids: vec![],
                    text: Some("   ".to_string()),
                },
            ],
        );
        assert!(validate_answers(&s, &r, Utc::now()).is_err());
    }

    #[test]
    fn test_build_statistics() {
        let s = survey();
        let q0 = &s.questions[0];
        let q1 = &s.questions[1];
        let stats = build_statistics(
            &s,
            4,
            &[(q0.id, 4), (q1.id, 2)],
            &[(q0.options[0].id, 3), (q0.options[1].id, 1), (q1.options[2].id, 2)],
        );

        assert_eq!(stats.responses, 4);
        assert_eq!(stats.questions.len(), 3);

        let rating = &stats.questions[0];
        assert_eq!(rating.answered, 4);
        assert_eq!(rating.options[0].count, 3);
        assert_eq!(rating.options[0].percentage, 75.0);
        assert_eq!(rating.options[1].percentage, 25.0);

        let sections = &stats.questions[1];
        assert_eq!(sections.options[0].count, 0);
        assert_eq!(sections.options[2].percentage, 100.0);

        let comments = &stats.questions[2];
        assert_eq!(comments.answered, 0);
        assert!(comments.options.is_empty());
    }

    #[test]
    fn test_check_structure() {
        let mut input = NewSurvey {
            title: "Poll".to_string(),
            description: String::new(),
            starts_at: None,
            ends_at: None,
            allow_anonymous: true,
            questions: vec![NewQuestion {
                title: "Pick one".to_string(),
                kind: QuestionKind::SingleChoice,
                required: true,
                options: vec!["Yes".to_string()],
            }],
        };
        assert!(input.check_structure().is_err());

        input.questions[0].options.push("No".to_string());
        assert!(input.check_structure().is_ok());

        input.questions.push(NewQuestion {
            title: "Why?".to_string(),
            kind: QuestionKind::Text,
            required: false,
            options: vec!["nope".to_string()],
        });
        assert!(input.check_structure().is_err());

        input.questions.pop();
        let now = Utc::now();
        input.starts_at = Some(now);
        input.ends_at = Some(now - Duration::days(1));
        assert!(input.check_structure().is_err());
    }
}
