// src/store/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, types::Json};

use crate::{
    engine::store::{
        AnswerStore, AttemptStore, Catalog, ScorePublisher, ViolationEvent, ViolationSink,
    },
    error::AppError,
    models::{
        answer::{AutoGrade, StudentAnswer},
        attempt::{ExamAttempt, NewAttempt, SubmissionMark, SubmitReason},
        exam::{Exam, FALSE_ANSWER, Question, QuestionKind, QuestionType, TRUE_ANSWER},
        score::ScoreRecord,
    },
};

const ATTEMPT_COLUMNS: &str = "id, exam_id, student_id, status, started_at, submitted_at, \
    time_spent_seconds, violation_count, total_score, submit_reason";

const ANSWER_COLUMNS: &str =
    "id, attempt_id, question_id, answer_value, score, is_correct, feedback, status, updated_at";

/// Postgres-backed collaborators. Every state transition is a single
/// conditional statement, so concurrent callers cannot both win.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ExamRow {
    id: i64,
    title: String,
    duration_minutes: Option<i32>,
    max_score: f64,
    published: bool,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct QuestionRow {
    id: i64,
    exam_id: i64,
    position: i32,
    #[sqlx(rename = "type")]
    question_type: String,
    content: String,
    points: f64,
    options: Json<Vec<String>>,
    correct_answer: Option<String>,
}

impl TryFrom<QuestionRow> for Question {
    type Error = AppError;

    fn try_from(row: QuestionRow) -> Result<Self, Self::Error> {
        let question_type: QuestionType = row.question_type.parse().map_err(corrupt)?;
        let missing_key = || corrupt(format!("question {} has no answer key", row.id));

        let kind = match question_type {
            QuestionType::MultipleChoice => QuestionKind::MultipleChoice {
                options: row.options.0,
                correct_answer: row.correct_answer.clone().ok_or_else(missing_key)?,
            },
            QuestionType::TrueFalse => match row.correct_answer.as_deref() {
                Some(TRUE_ANSWER) => QuestionKind::TrueFalse { correct_answer: true },
                Some(FALSE_ANSWER) => QuestionKind::TrueFalse { correct_answer: false },
                _ => return Err(missing_key()),
            },
            QuestionType::ShortAnswer => QuestionKind::ShortAnswer,
            QuestionType::Essay => QuestionKind::Essay,
        };

        Ok(Question {
            id: row.id,
            exam_id: row.exam_id,
            position: row.position,
            content: row.content,
            points: row.points,
            kind,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AttemptRow {
    id: i64,
    exam_id: i64,
    student_id: i64,
    status: String,
    started_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    time_spent_seconds: i64,
    violation_count: i64,
    total_score: Option<f64>,
    submit_reason: Option<String>,
}

impl TryFrom<AttemptRow> for ExamAttempt {
    type Error = AppError;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        Ok(ExamAttempt {
            id: row.id,
            exam_id: row.exam_id,
            student_id: row.student_id,
            status: row.status.parse().map_err(corrupt)?,
            started_at: row.started_at,
            submitted_at: row.submitted_at,
            time_spent_seconds: row.time_spent_seconds,
            violation_count: row.violation_count,
            total_score: row.total_score,
            submit_reason: row
                .submit_reason
                .map(|r| r.parse::<SubmitReason>())
                .transpose()
                .map_err(corrupt)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AnswerRow {
    id: i64,
    attempt_id: i64,
    question_id: i64,
    answer_value: Option<String>,
    score: Option<f64>,
    is_correct: Option<bool>,
    feedback: Option<String>,
    status: String,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AnswerRow> for StudentAnswer {
    type Error = AppError;

    fn try_from(row: AnswerRow) -> Result<Self, Self::Error> {
        Ok(StudentAnswer {
            id: row.id,
            attempt_id: row.attempt_id,
            question_id: row.question_id,
            answer_value: row.answer_value,
            score: row.score,
            is_correct: row.is_correct,
            feedback: row.feedback,
            status: row.status.parse().map_err(corrupt)?,
            updated_at: row.updated_at,
        })
    }
}

fn corrupt(msg: String) -> AppError {
    tracing::error!("Corrupt row: {}", msg);
    AppError::InternalServerError(msg)
}

fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| {
        tracing::error!("{}: {:?}", context, e);
        AppError::InternalServerError(e.to_string())
    }
}

fn attempt_from(row: Option<AttemptRow>) -> Result<Option<ExamAttempt>, AppError> {
    row.map(ExamAttempt::try_from).transpose()
}

#[async_trait]
impl Catalog for PgStore {
    async fn get_exam(&self, exam_id: i64) -> Result<Option<Exam>, AppError> {
        let Some(exam) = sqlx::query_as::<_, ExamRow>(
            r#"
            SELECT id, title, duration_minutes, max_score, published, starts_at, ends_at
            FROM exams
            WHERE id = $1
            "#,
        )
        .bind(exam_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to fetch exam"))?
        else {
            return Ok(None);
        };

        let questions = sqlx::query_as::<_, QuestionRow>(
            r#"
            SELECT id, exam_id, position, type, content, points, options, correct_answer
            FROM questions
            WHERE exam_id = $1
            ORDER BY position, id
            "#,
        )
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to fetch questions"))?
        .into_iter()
        .map(Question::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Exam {
            id: exam.id,
            title: exam.title,
            duration_minutes: exam.duration_minutes,
            max_score: exam.max_score,
            published: exam.published,
            starts_at: exam.starts_at,
            ends_at: exam.ends_at,
            questions,
        }))
    }
}

#[async_trait]
impl AttemptStore for PgStore {
    async fn get(&self, attempt_id: i64) -> Result<Option<ExamAttempt>, AppError> {
        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM exam_attempts WHERE id = $1"
        ))
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to fetch attempt"))?;

        attempt_from(row)
    }

    async fn find(&self, exam_id: i64, student_id: i64) -> Result<Option<ExamAttempt>, AppError> {
        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM exam_attempts WHERE exam_id = $1 AND student_id = $2"
        ))
        .bind(exam_id)
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to find attempt"))?;

        attempt_from(row)
    }

    async fn create_or_get(&self, new: NewAttempt) -> Result<(ExamAttempt, bool), AppError> {
        // ON CONFLICT DO NOTHING returns no row when another request won the insert.
        let inserted = sqlx::query_as::<_, AttemptRow>(&format!(
            r#"
            INSERT INTO exam_attempts (exam_id, student_id, status, started_at)
            VALUES ($1, $2, 'in_progress', $3)
            ON CONFLICT (exam_id, student_id) DO NOTHING
            RETURNING {ATTEMPT_COLUMNS}
            "#
        ))
        .bind(new.exam_id)
        .bind(new.student_id)
        .bind(new.started_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to create attempt"))?;

        if let Some(attempt) = attempt_from(inserted)? {
            return Ok((attempt, true));
        }

        let existing = self
            .find(new.exam_id, new.student_id)
            .await?
            .ok_or_else(|| AppError::InternalServerError("attempt vanished after conflict".to_string()))?;
        Ok((existing, false))
    }

    async fn increment_violations(&self, attempt_id: i64) -> Result<Option<i64>, AppError> {
        sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE exam_attempts
            SET violation_count = violation_count + 1
            WHERE id = $1 AND status = 'in_progress'
            RETURNING violation_count
            "#,
        )
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to record violation"))
    }

    async fn mark_submitted(
        &self,
        attempt_id: i64,
        mark: SubmissionMark,
    ) -> Result<Option<ExamAttempt>, AppError> {
        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            r#"
            UPDATE exam_attempts
            SET status = 'submitted',
                submitted_at = $2,
                time_spent_seconds = GREATEST(time_spent_seconds, $3),
                submit_reason = $4
            WHERE id = $1 AND status = 'in_progress'
            RETURNING {ATTEMPT_COLUMNS}
            "#
        ))
        .bind(attempt_id)
        .bind(mark.submitted_at)
        .bind(mark.time_spent_seconds)
        .bind(mark.reason.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to submit attempt"))?;

        attempt_from(row)
    }

    async fn list_by_exam(&self, exam_id: i64) -> Result<Vec<ExamAttempt>, AppError> {
        sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM exam_attempts WHERE exam_id = $1 ORDER BY id"
        ))
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list attempts"))?
        .into_iter()
        .map(ExamAttempt::try_from)
        .collect()
    }
}

#[async_trait]
impl AnswerStore for PgStore {
    async fn list(&self, attempt_id: i64) -> Result<Vec<StudentAnswer>, AppError> {
        sqlx::query_as::<_, AnswerRow>(&format!(
            "SELECT {ANSWER_COLUMNS} FROM student_answers WHERE attempt_id = $1 ORDER BY question_id"
        ))
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list answers"))?
        .into_iter()
        .map(StudentAnswer::try_from)
        .collect()
    }

    async fn get(
        &self,
        attempt_id: i64,
        question_id: i64,
    ) -> Result<Option<StudentAnswer>, AppError> {
        sqlx::query_as::<_, AnswerRow>(&format!(
            "SELECT {ANSWER_COLUMNS} FROM student_answers WHERE attempt_id = $1 AND question_id = $2"
        ))
        .bind(attempt_id)
        .bind(question_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to fetch answer"))?
        .map(StudentAnswer::try_from)
        .transpose()
    }

    async fn ensure(
        &self,
        attempt_id: i64,
        question_ids: &[i64],
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO student_answers (attempt_id, question_id, updated_at)
            SELECT $1, UNNEST($2::BIGINT[]), $3
            ON CONFLICT (attempt_id, question_id) DO NOTHING
            "#,
        )
        .bind(attempt_id)
        .bind(question_ids.to_vec())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to create answer rows"))?;
        Ok(())
    }

    async fn upsert_value(
        &self,
        attempt_id: i64,
        question_id: i64,
        value: &str,
        grade: Option<AutoGrade>,
        at: DateTime<Utc>,
    ) -> Result<StudentAnswer, AppError> {
        sqlx::query_as::<_, AnswerRow>(&format!(
            r#"
            INSERT INTO student_answers
                (attempt_id, question_id, answer_value, is_correct, score, status, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'ungraded', $6)
            ON CONFLICT (attempt_id, question_id) DO UPDATE SET
                answer_value = EXCLUDED.answer_value,
                is_correct = EXCLUDED.is_correct,
                score = EXCLUDED.score,
                status = 'ungraded',
                updated_at = EXCLUDED.updated_at
            RETURNING {ANSWER_COLUMNS}
            "#
        ))
        .bind(attempt_id)
        .bind(question_id)
        .bind(value)
        .bind(grade.map(|g| g.is_correct))
        .bind(grade.map(|g| g.score))
        .bind(at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to save answer"))?
        .try_into()
    }

    async fn record_auto_grade(
        &self,
        attempt_id: i64,
        question_id: i64,
        grade: AutoGrade,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO student_answers
                (attempt_id, question_id, is_correct, score, status, updated_at)
            VALUES ($1, $2, $3, $4, 'graded', $5)
            ON CONFLICT (attempt_id, question_id) DO UPDATE SET
                is_correct = EXCLUDED.is_correct,
                score = EXCLUDED.score,
                status = 'graded',
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(attempt_id)
        .bind(question_id)
        .bind(grade.is_correct)
        .bind(grade.score)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to store automatic grade"))?;
        Ok(())
    }

    async fn record_manual_grade(
        &self,
        attempt_id: i64,
        question_id: i64,
        score: f64,
        feedback: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<StudentAnswer, AppError> {
        sqlx::query_as::<_, AnswerRow>(&format!(
            r#"
            INSERT INTO student_answers
                (attempt_id, question_id, score, feedback, status, updated_at)
            VALUES ($1, $2, $3, $4, 'graded', $5)
            ON CONFLICT (attempt_id, question_id) DO UPDATE SET
                score = EXCLUDED.score,
                feedback = EXCLUDED.feedback,
                status = 'graded',
                updated_at = EXCLUDED.updated_at
            RETURNING {ANSWER_COLUMNS}
            "#
        ))
        .bind(attempt_id)
        .bind(question_id)
        .bind(score)
        .bind(feedback)
        .bind(at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to store manual grade"))?
        .try_into()
    }
}

#[async_trait]
impl ScorePublisher for PgStore {
    async fn publish(&self, record: &ScoreRecord) -> Result<Option<ExamAttempt>, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to open finalize transaction"))?;

        // The status flip decides the winner; a loser rolls back on drop.
        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            r#"
            UPDATE exam_attempts
            SET status = 'graded', total_score = $2
            WHERE id = $1 AND status = 'submitted'
            RETURNING {ATTEMPT_COLUMNS}
            "#
        ))
        .bind(record.attempt_id)
        .bind(record.total_score)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to finalize attempt"))?;

        let Some(row) = row else {
            return Ok(None);
        };

        sqlx::query(
            r#"
            INSERT INTO score_records
                (attempt_id, exam_id, student_id, total_score, max_score, per_question, published_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.attempt_id)
        .bind(record.exam_id)
        .bind(record.student_id)
        .bind(record.total_score)
        .bind(record.max_score)
        .bind(Json(&record.per_question))
        .bind(record.published_at)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to publish score record"))?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit finalize transaction"))?;

        ExamAttempt::try_from(row).map(Some)
    }
}

#[async_trait]
impl ViolationSink for PgStore {
    async fn report(&self, event: &ViolationEvent) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO violation_events (attempt_id, student_id, violation_count, occurred_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(event.attempt_id)
        .bind(event.student_id)
        .bind(event.violation_count)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to store violation event"))?;
        Ok(())
    }
}
