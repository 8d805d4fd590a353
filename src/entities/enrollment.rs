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
use crate::mutation::{self, Audit, Dependent, Entity, Mutation, MutationAction, Rejections};
use crate::pages::{AdminPage, render_grid_page};
use crate::validation::{clean, require_one_of, validate_date};

pub const ENROLLMENT_STATUSES: &[&str] = &["enrolled", "completed", "dropped", "withdrawn"];

fn validate_status(value: &str) -> Result<(), ValidationError> {
    require_one_of(value, ENROLLMENT_STATUSES)
}

pub struct Enrollments;

#[derive(Debug, sqlx::FromRow)]
pub struct EnrollmentRow {
    pub id: i64,
    pub student_fk: i64,
    pub student_id: String,
    pub student_name: String,
    pub course_section_fk: i64,
    pub course_code: String,
    pub section_number: String,
    pub term_code: String,
    pub enrollment_status: String,
    pub enrollment_date: Option<String>,
    pub is_active: bool,
}

#[derive(Serialize)]
struct EnrollmentPayload<'a> {
    id: i64,
    student_fk: i64,
    course_section_fk: i64,
    enrollment_status: &'a str,
    enrollment_date: Option<&'a str>,
}

impl GridSource for Enrollments {
    type Row = EnrollmentRow;

    const GRID: GridSpec = GridSpec {
        name: "enrollments",
        from: "enrollments e \
               JOIN students s ON s.id = e.student_fk \
               JOIN course_sections cs ON cs.id = e.course_section_fk \
               JOIN courses c ON c.id = cs.course_fk \
               JOIN terms t ON t.id = cs.term_fk",
        select: "e.id, e.student_fk, s.student_id, s.last_name || ', ' || s.first_name AS student_name, \
                 e.course_section_fk, c.course_code, cs.section_number, t.term_code, \
                 e.enrollment_status, e.enrollment_date, e.is_active",
        key: "e.id",
        columns: &[
            GridColumn::integer("ID", "e.id"),
            GridColumn::text("Student ID", "s.student_id"),
            GridColumn::text("Student", "s.last_name || ', ' || s.first_name"),
            GridColumn::text("Course", "c.course_code"),
            GridColumn::text("Section", "cs.section_number"),
            GridColumn::text("Term", "t.term_code"),
            GridColumn::status("Enrollment Status", "e.enrollment_status"),
            GridColumn::text("Enrolled On", "e.enrollment_date"),
            GridColumn::boolean("Status", "e.is_active"),
            GridColumn::actions(),
        ],
        filters: &[
            EntityFilter::integer("term_fk", "cs.term_fk"),
            EntityFilter::integer("course_fk", "cs.course_fk"),
            EntityFilter::integer("section_fk", "e.course_section_fk"),
            EntityFilter::integer("student_fk", "e.student_fk"),
            EntityFilter::status("status", "e.enrollment_status"),
            EntityFilter::boolean("active", "e.is_active"),
        ],
        default_sort: 2,
        default_dir: SortDirection::Asc,
    };

    fn present(row: &EnrollmentRow) -> Vec<String> {
        vec![
            row.id.to_string(),
            present::text(&row.student_id),
            present::truncate(&row.student_name, present::TRUNCATE_AT),
            present::text(&row.course_code),
            present::text(&row.section_number),
            present::text(&row.term_code),
            present::status_badge(&row.enrollment_status),
            present::optional(row.enrollment_date.as_deref()),
            present::badge(row.is_active),
            present::actions(
                PAGE.path,
                row.id,
                &EnrollmentPayload {
                    id: row.id,
                    student_fk: row.student_fk,
                    course_section_fk: row.course_section_fk,
                    enrollment_status: &row.enrollment_status,
                    enrollment_date: row.enrollment_date.as_deref(),
                },
                row.is_active,
            ),
        ]
    }
}

#[derive(Debug, FromForm)]
pub struct EnrollmentForm {
    csrf_token: Option<String>,
    action: Option<MutationAction>,
    id: Option<i64>,
    student_fk: Option<i64>,
    course_section_fk: Option<i64>,
    enrollment_status: Option<String>,
    enrollment_date: Option<String>,
}

#[derive(Debug, Validate)]
pub struct EnrollmentDraft {
    #[validate(required(message = "Student is required."))]
    pub student_fk: Option<i64>,
    #[validate(required(message = "Section is required."))]
    pub course_section_fk: Option<i64>,
    #[validate(custom(function = "validate_status"))]
    pub enrollment_status: String,
    #[validate(custom(function = "validate_date"))]
    pub enrollment_date: Option<String>,
}

impl EnrollmentForm {
    fn draft(&self) -> EnrollmentDraft {
        EnrollmentDraft {
            student_fk: self.student_fk,
            course_section_fk: self.course_section_fk,
            enrollment_status: clean(&self.enrollment_status)
                .map(|status| status.to_lowercase())
                .unwrap_or_else(|| ENROLLMENT_STATUSES[0].to_string()),
            enrollment_date: clean(&self.enrollment_date),
        }
    }

    fn to_mutation(&self) -> Result<Mutation<EnrollmentDraft>, AppError> {
        Mutation::from_action(self.action, self.id, || self.draft())
    }
}

/// Seats taken in a section, not counting the enrollment being edited.
async fn seats_taken(
    pool: &Pool<Sqlite>,
    section_fk: i64,
    exclude_id: Option<i64>,
) -> Result<(i64, i64), AppError> {
    let (taken, capacity): (i64, i64) = sqlx::query_as(
        "SELECT
            (SELECT COUNT(*) FROM enrollments WHERE course_section_fk = cs.id AND id != ?),
            cs.max_enrollment
         FROM course_sections cs WHERE cs.id = ?",
    )
    .bind(exclude_id.unwrap_or(-1))
    .bind(section_fk)
    .fetch_one(pool)
    .await?;

    Ok((taken, capacity))
}

#[rocket::async_trait]
impl Entity for Enrollments {
    const TABLE: &'static str = "enrollments";
    const LABEL: &'static str = "Enrollment";
    const DEPENDENTS: &'static [Dependent] = &[Dependent::new(
        "assessment",
        "SELECT COUNT(*) FROM assessments WHERE enrollment_fk = ?",
    )];

    type Draft = EnrollmentDraft;

    async fn check(
        pool: &Pool<Sqlite>,
        draft: &EnrollmentDraft,
        current_id: Option<i64>,
        rejections: &mut Rejections,
    ) -> Result<(), AppError> {
        mutation::ensure_exists(pool, "students", draft.student_fk, "student", rejections).await?;
        mutation::ensure_exists(
            pool,
            "course_sections",
            draft.course_section_fk,
            "section",
            rejections,
        )
        .await?;

        let (Some(student_fk), Some(section_fk)) = (draft.student_fk, draft.course_section_fk)
        else {
            return Ok(());
        };

        mutation::ensure_unique(
            pool,
            Self::TABLE,
            &[
                ("student_fk", SqlParam::Integer(student_fk)),
                ("course_section_fk", SqlParam::Integer(section_fk)),
            ],
            current_id,
            "This student is already enrolled in the selected section.".to_string(),
            rejections,
        )
        .await?;

        if mutation::row_exists(pool, "course_sections", section_fk).await? {
            let (taken, capacity) = seats_taken(pool, section_fk, current_id).await?;
            if taken >= capacity {
                rejections.conflict(format!(
                    "The selected section is full ({} of {} seats taken).",
                    taken, capacity
                ));
            }
        }

        Ok(())
    }

    async fn insert(
        pool: &Pool<Sqlite>,
        draft: &EnrollmentDraft,
        audit: &Audit,
    ) -> Result<i64, AppError> {
        let res = sqlx::query(
            "INSERT INTO enrollments
             (student_fk, course_section_fk, enrollment_status, enrollment_date, is_active,
              created_at, updated_at, created_by_fk, updated_by_fk)
             VALUES (?, ?, ?, ?, 1, ?, ?, ?, ?)",
        )
        .bind(draft.student_fk)
        .bind(draft.course_section_fk)
        .bind(&draft.enrollment_status)
        .bind(&draft.enrollment_date)
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
        draft: &EnrollmentDraft,
        audit: &Audit,
    ) -> Result<u64, AppError> {
        let res = sqlx::query(
            "UPDATE enrollments
             SET student_fk = ?, course_section_fk = ?, enrollment_status = ?, enrollment_date = ?,
                 updated_at = ?, updated_by_fk = ?
             WHERE id = ?",
        )
        .bind(draft.student_fk)
        .bind(draft.course_section_fk)
        .bind(&draft.enrollment_status)
        .bind(&draft.enrollment_date)
        .bind(audit.at)
        .bind(audit.user_id)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(res.rows_affected())
    }
}

pub const PAGE: AdminPage = AdminPage {
    title: "Enrollments",
    path: "enrollments",
    upload: None,
    fields: &[
        "student_fk",
        "course_section_fk",
        "enrollment_status",
        "enrollment_date",
    ],
};

#[get("/enrollments")]
pub async fn enrollment_grid(
    ctx: RequestContext,
    params: GridParams,
    db: &State<Pool<Sqlite>>,
) -> GridResult {
    grid::serve::<Enrollments>(&ctx, db, params).await
}

#[get("/enrollments")]
pub async fn enrollment_page(ctx: RequestContext) -> Result<RawHtml<String>, AppError> {
    ctx.require(Permission::ViewRecords)?;
    Ok(render_grid_page(&ctx, &PAGE, &Enrollments::GRID, None))
}

#[post("/enrollments", data = "<form>")]
pub async fn enrollment_mutate(
    ctx: RequestContext,
    form: Form<EnrollmentForm>,
    db: &State<Pool<Sqlite>>,
) -> Result<RawHtml<String>, AppError> {
    let banner = mutation::handle::<Enrollments>(
        db,
        &ctx,
        form.csrf_token.as_deref(),
        form.to_mutation(),
    )
    .await?;
    Ok(render_grid_page(
        &ctx,
        &PAGE,
        &Enrollments::GRID,
        Some(&banner),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_must_be_known() {
        assert!(validate_status("completed").is_ok());
        assert!(validate_status("graduated").is_err());
    }

    #[test]
    fn blank_status_defaults_to_enrolled() {
        let form = EnrollmentForm {
            csrf_token: None,
            action: Some(MutationAction::Add),
            id: None,
            student_fk: Some(1),
            course_section_fk: Some(2),
            enrollment_status: Some("  ".to_string()),
            enrollment_date: Some(String::new()),
        };
        let draft = form.draft();
        assert_eq!(draft.enrollment_status, "enrolled");
        assert_eq!(draft.enrollment_date, None);
        assert!(draft.validate().is_ok());
    }
}
