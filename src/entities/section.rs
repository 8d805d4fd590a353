use rocket::form::Form;
use rocket::response::content::RawHtml;
use rocket::{FromForm, State};
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::auth::{Permission, RequestContext};
use crate::error::AppError;
use crate::grid::{
    self, EntityFilter, GridColumn, GridParams, GridResult, GridSource, GridSpec, SortDirection,
    SqlParam, present,
};
use crate::mutation::{self, Audit, Dependent, Entity, Mutation, MutationAction, Rejections};
use crate::pages::{AdminPage, render_grid_page};
use crate::validation::{CODE_RE, clean};

pub const DEFAULT_MAX_ENROLLMENT: i64 = 30;

pub struct Sections;

#[derive(Debug, sqlx::FromRow)]
pub struct SectionRow {
    pub id: i64,
    pub course_fk: i64,
    pub course_code: String,
    pub term_fk: i64,
    pub term_code: String,
    pub section_number: String,
    pub instructor_name: String,
    pub enrolled: i64,
    pub max_enrollment: i64,
    pub is_active: bool,
}

#[derive(Serialize)]
struct SectionPayload<'a> {
    id: i64,
    course_fk: i64,
    term_fk: i64,
    section_number: &'a str,
    instructor_name: &'a str,
    max_enrollment: i64,
}

impl GridSource for Sections {
    type Row = SectionRow;

    const GRID: GridSpec = GridSpec {
        name: "sections",
        from: "course_sections cs \
               JOIN courses c ON c.id = cs.course_fk \
               JOIN terms t ON t.id = cs.term_fk",
        select: "cs.id, cs.course_fk, c.course_code, cs.term_fk, t.term_code, cs.section_number, \
                 cs.instructor_name, \
                 (SELECT COUNT(*) FROM enrollments e WHERE e.course_section_fk = cs.id) AS enrolled, \
                 cs.max_enrollment, cs.is_active",
        key: "cs.id",
        columns: &[
            GridColumn::integer("ID", "cs.id"),
            GridColumn::text("Course", "c.course_code"),
            GridColumn::text("Term", "t.term_code"),
            GridColumn::text("Section", "cs.section_number"),
            GridColumn::text("Instructor", "cs.instructor_name"),
            GridColumn::integer(
                "Enrolled",
                "(SELECT COUNT(*) FROM enrollments e WHERE e.course_section_fk = cs.id)",
            )
            .unsearchable(),
            GridColumn::integer("Capacity", "cs.max_enrollment").unsearchable(),
            GridColumn::boolean("Status", "cs.is_active"),
            GridColumn::actions(),
        ],
        filters: &[
            EntityFilter::integer("term_fk", "cs.term_fk"),
            EntityFilter::integer("course_fk", "cs.course_fk"),
            EntityFilter::boolean("active", "cs.is_active"),
        ],
        default_sort: 1,
        default_dir: SortDirection::Asc,
    };

    fn present(row: &SectionRow) -> Vec<String> {
        vec![
            row.id.to_string(),
            present::text(&row.course_code),
            present::text(&row.term_code),
            present::text(&row.section_number),
            present::text(&row.instructor_name),
            row.enrolled.to_string(),
            row.max_enrollment.to_string(),
            present::badge(row.is_active),
            present::actions(
                PAGE.path,
                row.id,
                &SectionPayload {
                    id: row.id,
                    course_fk: row.course_fk,
                    term_fk: row.term_fk,
                    section_number: &row.section_number,
                    instructor_name: &row.instructor_name,
                    max_enrollment: row.max_enrollment,
                },
                row.is_active,
            ),
        ]
    }
}

#[derive(Debug, FromForm)]
pub struct SectionForm {
    csrf_token: Option<String>,
    action: Option<MutationAction>,
    id: Option<i64>,
    course_fk: Option<i64>,
    term_fk: Option<i64>,
    section_number: Option<String>,
    instructor_name: Option<String>,
    max_enrollment: Option<i64>,
}

#[derive(Debug, Validate)]
pub struct SectionDraft {
    #[validate(required(message = "Course is required."))]
    pub course_fk: Option<i64>,
    #[validate(required(message = "Term is required."))]
    pub term_fk: Option<i64>,
    #[validate(
        length(min = 1, max = 10, message = "Section number is required (max 10 characters)."),
        regex(path = *CODE_RE, message = "Section number may only contain letters, digits, '.', '-' and '_'.")
    )]
    pub section_number: String,
    #[validate(length(max = 100, message = "Instructor name must be at most 100 characters."))]
    pub instructor_name: String,
    #[validate(range(min = 1, max = 1000, message = "Capacity must be between 1 and 1000."))]
    pub max_enrollment: i64,
}

impl SectionForm {
    fn draft(&self) -> SectionDraft {
        SectionDraft {
            course_fk: self.course_fk,
            term_fk: self.term_fk,
            section_number: clean(&self.section_number).unwrap_or_default(),
            instructor_name: clean(&self.instructor_name).unwrap_or_default(),
            max_enrollment: self.max_enrollment.unwrap_or(DEFAULT_MAX_ENROLLMENT),
        }
    }

    fn to_mutation(&self) -> Result<Mutation<SectionDraft>, AppError> {
        Mutation::from_action(self.action, self.id, || self.draft())
    }
}

#[rocket::async_trait]
impl Entity for Sections {
    const TABLE: &'static str = "course_sections";
    const LABEL: &'static str = "Section";
    const DEPENDENTS: &'static [Dependent] = &[Dependent::new(
        "enrollment",
        "SELECT COUNT(*) FROM enrollments WHERE course_section_fk = ?",
    )];

    type Draft = SectionDraft;

    async fn check(
        pool: &Pool<Sqlite>,
        draft: &SectionDraft,
        current_id: Option<i64>,
        rejections: &mut Rejections,
    ) -> Result<(), AppError> {
        mutation::ensure_exists(pool, "courses", draft.course_fk, "course", rejections).await?;
        mutation::ensure_exists(pool, "terms", draft.term_fk, "term", rejections).await?;

        let (Some(course_fk), Some(term_fk)) = (draft.course_fk, draft.term_fk) else {
            return Ok(());
        };

        mutation::ensure_unique(
            pool,
            Self::TABLE,
            &[
                ("course_fk", SqlParam::Integer(course_fk)),
                ("term_fk", SqlParam::Integer(term_fk)),
                ("section_number", SqlParam::Text(draft.section_number.clone())),
            ],
            current_id,
            format!(
                "Section '{}' already exists for this course and term.",
                draft.section_number
            ),
            rejections,
        )
        .await?;

        if let Some(id) = current_id {
            let enrolled: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM enrollments WHERE course_section_fk = ?")
                    .bind(id)
                    .fetch_one(pool)
                    .await?;
            if enrolled > draft.max_enrollment {
                rejections.invalid(format!(
                    "Capacity cannot be lower than the {} students already enrolled.",
                    enrolled
                ));
            }
        }

        Ok(())
    }

    async fn insert(pool: &Pool<Sqlite>, draft: &SectionDraft, audit: &Audit) -> Result<i64, AppError> {
        let res = sqlx::query(
            "INSERT INTO course_sections
             (course_fk, term_fk, section_number, instructor_name, max_enrollment, is_active,
              created_at, updated_at, created_by_fk, updated_by_fk)
             VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?, ?)",
        )
        .bind(draft.course_fk)
        .bind(draft.term_fk)
        .bind(&draft.section_number)
        .bind(&draft.instructor_name)
        .bind(draft.max_enrollment)
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
        draft: &SectionDraft,
        audit: &Audit,
    ) -> Result<u64, AppError> {
        let res = sqlx::query(
            "UPDATE course_sections
             SET course_fk = ?, term_fk = ?, section_number = ?, instructor_name = ?, max_enrollment = ?,
                 updated_at = ?, updated_by_fk = ?
             WHERE id = ?",
        )
        .bind(draft.course_fk)
        .bind(draft.term_fk)
        .bind(&draft.section_number)
        .bind(&draft.instructor_name)
        .bind(draft.max_enrollment)
        .bind(audit.at)
        .bind(audit.user_id)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(res.rows_affected())
    }
}

pub const PAGE: AdminPage = AdminPage {
    title: "Course Sections",
    path: "sections",
    upload: None,
    fields: &[
        "course_fk",
        "term_fk",
        "section_number",
        "instructor_name",
        "max_enrollment",
    ],
};

#[get("/sections")]
pub async fn section_grid(
    ctx: RequestContext,
    params: GridParams,
    db: &State<Pool<Sqlite>>,
) -> GridResult {
    grid::serve::<Sections>(&ctx, db, params).await
}

#[get("/sections")]
pub async fn section_page(ctx: RequestContext) -> Result<RawHtml<String>, AppError> {
    ctx.require(Permission::ViewRecords)?;
    Ok(render_grid_page(&ctx, &PAGE, &Sections::GRID, None))
}

#[post("/sections", data = "<form>")]
pub async fn section_mutate(
    ctx: RequestContext,
    form: Form<SectionForm>,
    db: &State<Pool<Sqlite>>,
) -> Result<RawHtml<String>, AppError> {
    let banner =
        mutation::handle::<Sections>(db, &ctx, form.csrf_token.as_deref(), form.to_mutation())
            .await?;
    Ok(render_grid_page(&ctx, &PAGE, &Sections::GRID, Some(&banner)))
}
