use rocket::form::Form;
use rocket::response::content::RawHtml;
use rocket::{FromForm, State};
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use validator::{Validate, ValidationError};

use crate::auth::{Permission, RequestContext};
use crate::error::AppError;
use crate::grid::{
    self, EntityFilter, GridColumn, GridParams, GridResult, GridSource, GridSpec, SortDirection,
    SqlParam, present,
};
use crate::mutation::{self, Audit, Entity, Mutation, MutationAction, Rejections};
use crate::pages::{AdminPage, render_grid_page};
use crate::validation::{clean, require_one_of, validate_date};

pub const ACHIEVEMENT_LEVELS: &[&str] = &["met", "partially_met", "not_met", "pending"];

fn validate_level(value: &str) -> Result<(), ValidationError> {
    require_one_of(value, ACHIEVEMENT_LEVELS)
}

pub struct Assessments;

#[derive(Debug, sqlx::FromRow)]
pub struct AssessmentRow {
    pub id: i64,
    pub enrollment_fk: i64,
    pub student_learning_outcome_fk: i64,
    pub student_id: String,
    pub student_name: String,
    pub course_code: String,
    pub slo_code: String,
    pub score_value: Option<f64>,
    pub achievement_level: String,
    pub notes: String,
    pub assessed_date: Option<String>,
    pub is_active: bool,
}

#[derive(Serialize)]
struct AssessmentPayload<'a> {
    id: i64,
    enrollment_fk: i64,
    student_learning_outcome_fk: i64,
    score_value: Option<f64>,
    achievement_level: &'a str,
    notes: &'a str,
    assessed_date: Option<&'a str>,
}

fn format_score(score: Option<f64>) -> String {
    score.map(|s| format!("{:.1}", s)).unwrap_or_default()
}

impl GridSource for Assessments {
    type Row = AssessmentRow;

    const GRID: GridSpec = GridSpec {
        name: "assessments",
        from: "assessments a \
               JOIN enrollments e ON e.id = a.enrollment_fk \
               JOIN students s ON s.id = e.student_fk \
               JOIN course_sections cs ON cs.id = e.course_section_fk \
               JOIN courses c ON c.id = cs.course_fk \
               JOIN student_learning_outcomes slo ON slo.id = a.student_learning_outcome_fk",
        select: "a.id, a.enrollment_fk, a.student_learning_outcome_fk, s.student_id, \
                 s.last_name || ', ' || s.first_name AS student_name, c.course_code, slo.slo_code, \
                 a.score_value, a.achievement_level, a.notes, a.assessed_date, a.is_active",
        key: "a.id",
        columns: &[
            GridColumn::integer("ID", "a.id"),
            GridColumn::text("Student ID", "s.student_id"),
            GridColumn::text("Student", "s.last_name || ', ' || s.first_name"),
            GridColumn::text("Course", "c.course_code"),
            GridColumn::text("SLO", "slo.slo_code"),
            GridColumn::integer("Score", "a.score_value"),
            GridColumn::status("Level", "a.achievement_level"),
            GridColumn::text("Notes", "a.notes"),
            GridColumn::text("Assessed On", "a.assessed_date"),
            GridColumn::boolean("Status", "a.is_active"),
            GridColumn::actions(),
        ],
        filters: &[
            EntityFilter::integer("enrollment_fk", "a.enrollment_fk"),
            EntityFilter::integer("slo_fk", "a.student_learning_outcome_fk"),
            EntityFilter::integer("course_fk", "cs.course_fk"),
            EntityFilter::integer("term_fk", "cs.term_fk"),
            EntityFilter::status("level", "a.achievement_level"),
            EntityFilter::boolean("active", "a.is_active"),
        ],
        default_sort: 0,
        default_dir: SortDirection::Desc,
    };

    fn present(row: &AssessmentRow) -> Vec<String> {
        vec![
            row.id.to_string(),
            present::text(&row.student_id),
            present::truncate(&row.student_name, present::TRUNCATE_AT),
            present::text(&row.course_code),
            present::text(&row.slo_code),
            format_score(row.score_value),
            present::status_badge(&row.achievement_level),
            present::truncate(&row.notes, present::TRUNCATE_AT),
            present::optional(row.assessed_date.as_deref()),
            present::badge(row.is_active),
            present::actions(
                PAGE.path,
                row.id,
                &AssessmentPayload {
                    id: row.id,
                    enrollment_fk: row.enrollment_fk,
                    student_learning_outcome_fk: row.student_learning_outcome_fk,
                    score_value: row.score_value,
                    achievement_level: &row.achievement_level,
                    notes: &row.notes,
                    assessed_date: row.assessed_date.as_deref(),
                },
                row.is_active,
            ),
        ]
    }
}

#[derive(Debug, FromForm)]
pub struct AssessmentForm {
    csrf_token: Option<String>,
    action: Option<MutationAction>,
    id: Option<i64>,
    enrollment_fk: Option<i64>,
    student_learning_outcome_fk: Option<i64>,
    score_value: Option<f64>,
    achievement_level: Option<String>,
    notes: Option<String>,
    assessed_date: Option<String>,
}

#[derive(Debug, Validate)]
pub struct AssessmentDraft {
    #[validate(required(message = "Enrollment is required."))]
    pub enrollment_fk: Option<i64>,
    #[validate(required(message = "Student learning outcome is required."))]
    pub student_learning_outcome_fk: Option<i64>,
    #[validate(range(min = 0.0, max = 100.0, message = "Score must be between 0 and 100."))]
    pub score_value: Option<f64>,
    #[validate(custom(function = "validate_level"))]
    pub achievement_level: String,
    #[validate(length(max = 2000, message = "Notes must be at most 2000 characters."))]
    pub notes: String,
    #[validate(custom(function = "validate_date"))]
    pub assessed_date: Option<String>,
}

impl AssessmentForm {
    fn draft(&self) -> AssessmentDraft {
        AssessmentDraft {
            enrollment_fk: self.enrollment_fk,
            student_learning_outcome_fk: self.student_learning_outcome_fk,
            score_value: self.score_value,
            achievement_level: clean(&self.achievement_level)
                .map(|level| level.to_lowercase())
                .unwrap_or_else(|| "pending".to_string()),
            notes: clean(&self.notes).unwrap_or_default(),
            assessed_date: clean(&self.assessed_date),
        }
    }

    fn to_mutation(&self) -> Result<Mutation<AssessmentDraft>, AppError> {
        Mutation::from_action(self.action, self.id, || self.draft())
    }
}

/// An outcome can only be assessed for students enrolled in its course.
async fn outcome_matches_enrollment(
    pool: &Pool<Sqlite>,
    enrollment_fk: i64,
    slo_fk: i64,
) -> Result<bool, AppError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM enrollments e
         JOIN course_sections cs ON cs.id = e.course_section_fk
         JOIN student_learning_outcomes slo ON slo.course_fk = cs.course_fk
         WHERE e.id = ? AND slo.id = ?",
    )
    .bind(enrollment_fk)
    .bind(slo_fk)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

#[rocket::async_trait]
impl Entity for Assessments {
    const TABLE: &'static str = "assessments";
    const LABEL: &'static str = "Assessment";
    const DEPENDENTS: &'static [mutation::Dependent] = &[];

    type Draft = AssessmentDraft;

    async fn check(
        pool: &Pool<Sqlite>,
        draft: &AssessmentDraft,
        current_id: Option<i64>,
        rejections: &mut Rejections,
    ) -> Result<(), AppError> {
        mutation::ensure_exists(pool, "enrollments", draft.enrollment_fk, "enrollment", rejections)
            .await?;
        mutation::ensure_exists(
            pool,
            "student_learning_outcomes",
            draft.student_learning_outcome_fk,
            "student learning outcome",
            rejections,
        )
        .await?;

        let (Some(enrollment_fk), Some(slo_fk)) =
            (draft.enrollment_fk, draft.student_learning_outcome_fk)
        else {
            return Ok(());
        };

        if mutation::row_exists(pool, "enrollments", enrollment_fk).await?
            && mutation::row_exists(pool, "student_learning_outcomes", slo_fk).await?
            && !outcome_matches_enrollment(pool, enrollment_fk, slo_fk).await?
        {
            rejections.invalid("The learning outcome does not belong to the enrolled course.");
        }

        mutation::ensure_unique(
            pool,
            Self::TABLE,
            &[
                ("enrollment_fk", SqlParam::Integer(enrollment_fk)),
                ("student_learning_outcome_fk", SqlParam::Integer(slo_fk)),
            ],
            current_id,
            "This outcome has already been assessed for the enrollment.".to_string(),
            rejections,
        )
        .await
    }

    async fn insert(
        pool: &Pool<Sqlite>,
        draft: &AssessmentDraft,
        audit: &Audit,
    ) -> Result<i64, AppError> {
        let res = sqlx::query(
            "INSERT INTO assessments
             (enrollment_fk, student_learning_outcome_fk, score_value, achievement_level, notes,
              assessed_date, is_active, created_at, updated_at, created_by_fk, updated_by_fk)
             VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)",
        )
        .bind(draft.enrollment_fk)
        .bind(draft.student_learning_outcome_fk)
        .bind(draft.score_value)
        .bind(&draft.achievement_level)
        .bind(&draft.notes)
        .bind(&draft.assessed_date)
        .bind(audit.at)
        .bind(audit.at)
        .bind(audit.user_id)
        .bind(audit.user_id)
        .execute(pool)
        .await?;

        Ok(res.last_insert_rowid())
    }

    async fn update(
        pool: &Pool<Sqlite>,
        id: i64,
        draft: &AssessmentDraft,
        audit: &Audit,
    ) -> Result<u64, AppError> {
        let res = sqlx::query(
            "UPDATE assessments
             SET enrollment_fk = ?, student_learning_outcome_fk = ?, score_value = ?,
                 achievement_level = ?, notes = ?, assessed_date = ?, updated_at = ?, updated_by_fk = ?
             WHERE id = ?",
        )
        .bind(draft.enrollment_fk)
        .bind(draft.student_learning_outcome_fk)
        .bind(draft.score_value)
        .bind(&draft.achievement_level)
        .bind(&draft.notes)
        .bind(&draft.assessed_date)
        .bind(audit.at)
        .bind(audit.user_id)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(res.rows_affected())
    }
}

pub const PAGE: AdminPage = AdminPage {
    title: "Assessments",
    path: "assessments",
    upload: None,
    fields: &[
        "enrollment_fk",
        "student_learning_outcome_fk",
        "score_value",
        "achievement_level",
        "notes",
        "assessed_date",
    ],
};

#[get("/assessments")]
pub async fn assessment_grid(
    ctx: RequestContext,
    params: GridParams,
    db: &State<Pool<Sqlite>>,
) -> GridResult {
    grid::serve::<Assessments>(&ctx, db, params).await
}

#[get("/assessments")]
pub async fn assessment_page(ctx: RequestContext) -> Result<RawHtml<String>, AppError> {
    ctx.require(Permission::ViewRecords)?;
    Ok(render_grid_page(&ctx, &PAGE, &Assessments::GRID, None))
}

#[post("/assessments", data = "<form>")]
pub async fn assessment_mutate(
    ctx: RequestContext,
    form: Form<AssessmentForm>,
    db: &State<Pool<Sqlite>>,
) -> Result<RawHtml<String>, AppError> {
    let banner = mutation::handle::<Assessments>(
        db,
        &ctx,
        form.csrf_token.as_deref(),
        form.to_mutation(),
    )
    .await?;
    Ok(render_grid_page(
        &ctx,
        &PAGE,
        &Assessments::GRID,
        Some(&banner),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_render_with_one_decimal() {
        assert_eq!(format_score(Some(87.26)), "87.3");
        assert_eq!(format_score(Some(100.0)), "100.0");
        assert_eq!(format_score(None), "");
    }

    #[test]
    fn out_of_range_score_and_unknown_level_are_both_reported() {
        let draft = AssessmentDraft {
            enrollment_fk: Some(1),
            student_learning_outcome_fk: Some(1),
            score_value: Some(140.0),
            achievement_level: "exceeded".to_string(),
            notes: String::new(),
            assessed_date: None,
        };
        let errors = draft.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("score_value"));
        assert!(fields.contains_key("achievement_level"));
    }
}
