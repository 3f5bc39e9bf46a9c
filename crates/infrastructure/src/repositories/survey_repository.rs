//! Survey repository.
//!
//! A survey is stored across `surveys`, `survey_questions` and
//! `survey_options`; responses go to `survey_responses` with one
//! `survey_answers` row per chosen option (or one row holding the text).
//! Answer validation and result shaping are pure domain functions; this
//! module only loads and stores.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};
use uuid::Uuid;
use validator::Validate;

use cms_common::pagination::{PaginatedResult, PaginationParams, SortParams};
use cms_domain::{
    survey::{
        build_statistics, check_window, validate_answers, NewResponse, NewSurvey, Question,
        QuestionOption, Respondent, Survey, SurveyFilter, SurveyStatistics, SurveyStatus,
        SurveyUpdate,
    },
    Audit, OptionId, QuestionId, ResponseId, SurveyId,
};

use super::query::{self, non_blank, parse_enum, push_keyword, read_audit, AUDIT_COLUMNS};
use crate::database::TransactionExt;
use crate::{Error, Result};

const SORT_FIELDS: [&str; 4] = ["created_at", "starts_at", "ends_at", "title"];

const SURVEY_COLUMNS: &str = "id, title, description, status, starts_at, ends_at, allow_anonymous";

#[derive(Debug, Clone, Default)]
pub struct SurveyQuery {
    pub filter: SurveyFilter,
    pub pagination: PaginationParams,
    pub sort: SortParams,
}

#[async_trait]
pub trait SurveyRepository: Send + Sync {
    /// Insert the survey with its questions and options.
    async fn create(&self, input: NewSurvey) -> Result<Survey>;

    /// Survey with questions and options, in display order.
    async fn get_by_id(&self, id: SurveyId) -> Result<Survey>;

    async fn update(&self, id: SurveyId, update: SurveyUpdate) -> Result<Survey>;

    async fn delete(&self, id: SurveyId) -> Result<bool>;

    /// Survey headers only; `questions` is left empty.
    async fn list(&self, query: SurveyQuery) -> Result<PaginatedResult<Survey>>;

    async fn count(&self, filter: &SurveyFilter) -> Result<u64>;

    async fn set_status(&self, id: SurveyId, status: SurveyStatus) -> Result<()>;

    async fn submit_response(&self, response: NewResponse) -> Result<ResponseId>;

    async fn response_count(&self, id: SurveyId) -> Result<u64>;

    async fn statistics(&self, id: SurveyId) -> Result<SurveyStatistics>;
}

pub struct PgSurveyRepository {
    pool: PgPool,
}

impl PgSurveyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_header(&self, id: SurveyId) -> Result<Survey> {
        let row = sqlx::query(&format!(
            "SELECT {SURVEY_COLUMNS}, {AUDIT_COLUMNS} FROM surveys WHERE id = $1 AND is_deleted = FALSE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => row_to_survey(&row),
            None => Err(Error::not_found("survey", id)),
        }
    }

    async fn load_questions(&self, survey_id: SurveyId) -> Result<Vec<Question>> {
        let rows = sqlx::query(
            "SELECT id, survey_id, title, kind, required, sort_order FROM survey_questions \
             WHERE survey_id = $1 ORDER BY sort_order, id",
        )
        .bind(survey_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut questions = rows
            .iter()
            .map(|row| {
                Ok(Question {
                    id: QuestionId::from(row.get::<Uuid, _>("id")),
                    survey_id: SurveyId::from(row.get::<Uuid, _>("survey_id")),
                    title: row.get("title"),
                    kind: parse_enum(row.get::<String, _>("kind").as_str())?,
                    required: row.get("required"),
                    sort_order: row.get("sort_order"),
                    options: Vec::new(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if questions.is_empty() {
            return Ok(questions);
        }

        let question_ids: Vec<Uuid> = questions.iter().map(|q| q.id.into_uuid()).collect();
        let rows = sqlx::query(
            "SELECT id, question_id, label, sort_order FROM survey_options \
             WHERE question_id = ANY($1) ORDER BY sort_order, id",
        )
        .bind(&question_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut options: HashMap<QuestionId, Vec<QuestionOption>> = HashMap::new();
        for row in rows {
            let option = QuestionOption {
                id: OptionId::from(row.get::<Uuid, _>("id")),
                question_id: QuestionId::from(row.get::<Uuid, _>("question_id")),
                label: row.get("label"),
                sort_order: row.get("sort_order"),
            };
            options.entry(option.question_id).or_default().push(option);
        }
        for question in &mut questions {
            question.options = options.remove(&question.id).unwrap_or_default();
        }
        Ok(questions)
    }
}

fn row_to_survey(row: &PgRow) -> Result<Survey> {
    Ok(Survey {
        id: SurveyId::from(row.get::<Uuid, _>("id")),
        title: row.get("title"),
        description: row.get("description"),
        status: parse_enum(row.get::<String, _>("status").as_str())?,
        starts_at: row.get("starts_at"),
        ends_at: row.get("ends_at"),
        allow_anonymous: row.get("allow_anonymous"),
        questions: Vec::new(),
        audit: read_audit(row, ""),
    })
}

/// `(respondent_kind, user_id, openid)` columns for a respondent.
fn respondent_columns(respondent: &Respondent) -> (&'static str, Option<Uuid>, Option<&str>) {
    match respondent {
        Respondent::User(user_id) => ("user", Some(user_id.into_uuid()), None),
        Respondent::WeChat(openid) => ("wechat", None, Some(openid.as_str())),
        Respondent::Anonymous => ("anonymous", None, None),
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &SurveyFilter) {
    builder.push(" WHERE is_deleted = FALSE");
    if let Some(status) = filter.status {
        builder.push(" AND status = ");
        builder.push_bind(status.as_str());
    }
    if let Some(keyword) = non_blank(&filter.keyword) {
        push_keyword(builder, &["title", "description"], keyword);
    }
    if let Some(at) = filter.open_at {
        builder.push(" AND status = ");
        builder.push_bind(SurveyStatus::Published.as_str());
        builder.push(" AND (starts_at IS NULL OR starts_at <= ");
        builder.push_bind(at);
        builder.push(") AND (ends_at IS NULL OR ends_at >= ");
        builder.push_bind(at);
        builder.push(")");
    }
}

#[async_trait]
impl SurveyRepository for PgSurveyRepository {
    #[instrument(skip(self, input), fields(title = %input.title, questions = input.questions.len()))]
    async fn create(&self, input: NewSurvey) -> Result<Survey> {
        input.validate()?;
        input.check_structure()?;

        let id = SurveyId::new();
        let now = Utc::now();
        let mut questions = Vec::with_capacity(input.questions.len());

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let result: Result<()> = async {
            sqlx::query(
                r#"
                INSERT INTO surveys (
                    id, title, description, status, starts_at, ends_at, allow_anonymous,
                    created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
                "#,
            )
            .bind(id.as_uuid())
            .bind(&input.title)
            .bind(&input.description)
            .bind(SurveyStatus::Draft.as_str())
            .bind(input.starts_at)
            .bind(input.ends_at)
            .bind(input.allow_anonymous)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            for (position, new_question) in input.questions.iter().enumerate() {
                let question_id = QuestionId::new();
                sqlx::query(
                    "INSERT INTO survey_questions (id, survey_id, title, kind, required, sort_order) \
                     VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(question_id.as_uuid())
                .bind(id.as_uuid())
                .bind(new_question.title.trim())
                .bind(new_question.kind.as_str())
                .bind(new_question.required)
                .bind(position as i32)
                .execute(&mut *tx)
                .await?;

                let mut options = Vec::with_capacity(new_question.options.len());
                for (order, label) in new_question.options.iter().enumerate() {
                    let option_id = OptionId::new();
                    sqlx::query(
                        "INSERT INTO survey_options (id, question_id, label, sort_order) \
                         VALUES ($1, $2, $3, $4)",
                    )
                    .bind(option_id.as_uuid())
                    .bind(question_id.as_uuid())
                    .bind(label.trim())
                    .bind(order as i32)
                    .execute(&mut *tx)
                    .await?;

                    options.push(QuestionOption {
                        id: option_id,
                        question_id,
                        label: label.trim().to_string(),
                        sort_order: order as i32,
                    });
                }

                questions.push(Question {
                    id: question_id,
                    survey_id: id,
                    title: new_question.title.trim().to_string(),
                    kind: new_question.kind,
                    required: new_question.required,
                    sort_order: position as i32,
                    options,
                });
            }
            Ok(())
        }
        .await;

        tx.commit_or_rollback(result).await?;

        debug!(survey_id = %id, "Survey created");
        Ok(Survey {
            id,
            title: input.title,
            description: input.description,
            status: SurveyStatus::Draft,
            starts_at: input.starts_at,
            ends_at: input.ends_at,
            allow_anonymous: input.allow_anonymous,
            questions,
            audit: Audit::new(now),
        })
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: SurveyId) -> Result<Survey> {
        let mut survey = self.fetch_header(id).await?;
        survey.questions = self.load_questions(id).await?;
        Ok(survey)
    }

    #[instrument(skip(self, update))]
    async fn update(&self, id: SurveyId, update: SurveyUpdate) -> Result<Survey> {
        update.validate()?;

        let current = self.fetch_header(id).await?;
        let starts_at = update.starts_at.unwrap_or(current.starts_at);
        let ends_at = update.ends_at.unwrap_or(current.ends_at);
        check_window(starts_at, ends_at)?;

        let mut builder = QueryBuilder::<Postgres>::new("UPDATE surveys SET updated_at = ");
        builder.push_bind(Utc::now());
        if let Some(title) = &update.title {
            builder.push(", title = ");
            builder.push_bind(title.clone());
        }
        if let Some(description) = &update.description {
            builder.push(", description = ");
            builder.push_bind(description.clone());
        }
        if update.starts_at.is_some() {
            builder.push(", starts_at = ");
            builder.push_bind(starts_at);
        }
        if update.ends_at.is_some() {
            builder.push(", ends_at = ");
            builder.push_bind(ends_at);
        }
        if let Some(allow_anonymous) = update.allow_anonymous {
            builder.push(", allow_anonymous = ");
            builder.push_bind(allow_anonymous);
        }
        builder.push(" WHERE id = ");
        builder.push_bind(id.into_uuid());
        builder.push(" AND is_deleted = FALSE");

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("survey", id));
        }

        debug!(survey_id = %id, "Survey updated");
        self.get_by_id(id).await
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: SurveyId) -> Result<bool> {
        query::soft_delete(&self.pool, "surveys", id.into_uuid()).await
    }

    #[instrument(skip(self, query))]
    async fn list(&self, query: SurveyQuery) -> Result<PaginatedResult<Survey>> {
        let pagination = query.pagination.normalized();

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM surveys");
        push_filter(&mut count, &query.filter);
        let total = query::fetch_count(&self.pool, count).await?;

        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {SURVEY_COLUMNS}, {AUDIT_COLUMNS} FROM surveys"
        ));
        push_filter(&mut builder, &query.filter);
        query::push_order(&mut builder, &query.sort, &SORT_FIELDS, "created_at");
        query::push_page(&mut builder, &pagination);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let surveys = rows.iter().map(row_to_survey).collect::<Result<Vec<_>>>()?;
        Ok(PaginatedResult::from_params(surveys, &pagination, total))
    }

    #[instrument(skip(self, filter))]
    async fn count(&self, filter: &SurveyFilter) -> Result<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM surveys");
        push_filter(&mut builder, filter);
        query::fetch_count(&self.pool, builder).await
    }

    #[instrument(skip(self))]
    async fn set_status(&self, id: SurveyId, status: SurveyStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE surveys SET status = $2, updated_at = $3 WHERE id = $1 AND is_deleted = FALSE",
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("survey", id));
        }
        debug!(survey_id = %id, %status, "Survey status changed");
        Ok(())
    }

    #[instrument(skip(self, response), fields(survey_id = %response.survey_id, answers = response.answers.len()))]
    async fn submit_response(&self, response: NewResponse) -> Result<ResponseId> {
        let survey = self.get_by_id(response.survey_id).await?;
        let now = Utc::now();
        validate_answers(&survey, &response, now)?;

        let response_id = ResponseId::new();
        let (kind, user_id, openid) = respondent_columns(&response.respondent);

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let result: Result<()> = async {
            sqlx::query(
                "INSERT INTO survey_responses (id, survey_id, respondent_kind, user_id, openid, submitted_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(response_id.as_uuid())
            .bind(survey.id.as_uuid())
            .bind(kind)
            .bind(user_id)
            .bind(openid)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            for answer in &response.answers {
                if answer.option_ids.is_empty() {
                    sqlx::query(
                        "INSERT INTO survey_answers (response_id, question_id, text_value) VALUES ($1, $2, $3)",
                    )
                    .bind(response_id.as_uuid())
                    .bind(answer.question_id.as_uuid())
                    .bind(answer.text.as_deref().map(str::trim))
                    .execute(&mut *tx)
                    .await?;
                    continue;
                }
                for option_id in &answer.option_ids {
                    sqlx::query(
                        "INSERT INTO survey_answers (response_id, question_id, option_id) VALUES ($1, $2, $3)",
                    )
                    .bind(response_id.as_uuid())
                    .bind(answer.question_id.as_uuid())
                    .bind(option_id.as_uuid())
                    .execute(&mut *tx)
                    .await?;
                }
            }
            Ok(())
        }
        .await;

        tx.commit_or_rollback(result).await?;

        debug!(response_id = %response_id, respondent = kind, "Survey response stored");
        Ok(response_id)
    }

    #[instrument(skip(self))]
    async fn response_count(&self, id: SurveyId) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM survey_responses WHERE survey_id = $1")
                .bind(id.as_uuid())
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;

        Ok(count as u64)
    }

    #[instrument(skip(self))]
    async fn statistics(&self, id: SurveyId) -> Result<SurveyStatistics> {
        let survey = self.get_by_id(id).await?;
        let responses = self.response_count(id).await?;

        let answered = sqlx::query(
            r#"
            SELECT a.question_id, COUNT(DISTINCT a.response_id) AS count
            FROM survey_answers a
            JOIN survey_responses r ON r.id = a.response_id
            WHERE r.survey_id = $1
            GROUP BY a.question_id
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?
        .iter()
        .map(|row| {
            (
                QuestionId::from(row.get::<Uuid, _>("question_id")),
                row.get::<i64, _>("count") as u64,
            )
        })
        .collect::<Vec<_>>();

        let votes = sqlx::query(
            r#"
            SELECT a.option_id, COUNT(*) AS count
            FROM survey_answers a
            JOIN survey_responses r ON r.id = a.response_id
            WHERE r.survey_id = $1 AND a.option_id IS NOT NULL
            GROUP BY a.option_id
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?
        .iter()
        .map(|row| {
            (
                OptionId::from(row.get::<Uuid, _>("option_id")),
                row.get::<i64, _>("count") as u64,
            )
        })
        .collect::<Vec<_>>();

        Ok(build_statistics(&survey, responses, &answered, &votes))
    }
}
