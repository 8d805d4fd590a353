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

pub const DEFAULT_CREDIT_HOURS: i64 = 3;

pub struct Courses;

#[derive(Debug, sqlx::FromRow)]
pub struct CourseRow {
    pub id: i64,
    pub course_code: String,
    pub course_title: String,
    pub program_fk: i64,
    pub program_code: String,
    pub credit_hours: i64,
    pub section_count: i64,
    pub is_active: bool,
}

#[derive(Serialize)]
struct CoursePayload<'a> {
    id: i64,
    course_code: &'a str,
    course_title: &'a str,
    program_fk: i64,
    credit_hours: i64,
}

impl GridSource for Courses {
    type Row = CourseRow;

    const GRID: GridSpec = GridSpec {
        name: "courses",
        from: "courses c JOIN programs p ON p.id = c.program_fk",
        select: "c.id, c.course_code, c.course_title, c.program_fk, p.program_code, c.credit_hours, \
                 (SELECT COUNT(*) FROM course_sections cs WHERE cs.course_fk = c.id) AS section_count, \
                 c.is_active",
        key: "c.id",
        columns: &[
            GridColumn::integer("ID", "c.id"),
            GridColumn::text("Code", "c.course_code"),
            GridColumn::text("Title", "c.course_title"),
            GridColumn::text("Program", "p.program_code"),
            GridColumn::integer("Credits", "c.credit_hours"),
            GridColumn::integer(
                "Sections",
                "(SELECT COUNT(*) FROM course_sections cs WHERE cs.course_fk = c.id)",
            )
            .unsearchable(),
            GridColumn::boolean("Status", "c.is_active"),
            GridColumn::actions(),
        ],
        filters: &[
            EntityFilter::integer("program_fk", "c.program_fk"),
            EntityFilter::boolean("active", "c.is_active"),
        ],
        default_sort: 1,
        default_dir: SortDirection::Asc,
    };

    fn present(row: &CourseRow) -> Vec<String> {
        vec![
            row.id.to_string(),
            present::text(&row.course_code),
            present::truncate(&row.course_title, present::TRUNCATE_AT),
            present::text(&row.program_code),
            row.credit_hours.to_string(),
            row.section_count.to_string(),
            present::badge(row.is_active),
            present::actions(
                PAGE.path,
                row.id,
                &CoursePayload {
                    id: row.id,
                    course_code: &row.course_code,
                    course_title: &row.course_title,
                    program_fk: row.program_fk,
                    credit_hours: row.credit_hours,
                },
                row.is_active,
            ),
        ]
    }
}

#[derive(Debug, FromForm)]
pub struct CourseForm {
    csrf_token: Option<String>,
    action: Option<MutationAction>,
    id: Option<i64>,
    program_fk: Option<i64>,
    course_code: Option<String>,
    course_title: Option<String>,
    credit_hours: Option<i64>,
}

#[derive(Debug, Validate)]
pub struct CourseDraft {
    #[validate(required(message = "Program is required."))]
    pub program_fk: Option<i64>,
    #[validate(
        length(min = 1, max = 20, message = "Course code is required (max 20 characters)."),
        regex(path = *CODE_RE, message = "Course code may only contain letters, digits, '.', '-' and '_'.")
    )]
    pub course_code: String,
    #[validate(length(min = 1, max = 200, message = "Course title is required (max 200 characters)."))]
    pub course_title: String,
    #[validate(range(min = 0, max = 12, message = "Credit hours must be between 0 and 12."))]
    pub credit_hours: i64,
}

impl CourseForm {
    fn draft(&self) -> CourseDraft {
        CourseDraft {
            program_fk: self.program_fk,
            course_code: clean(&self.course_code).unwrap_or_default().to_uppercase(),
            course_title: clean(&self.course_title).unwrap_or_default(),
            credit_hours: self.credit_hours.unwrap_or(DEFAULT_CREDIT_HOURS),
        }
    }

    fn to_mutation(&self) -> Result<Mutation<CourseDraft>, AppError> {
        Mutation::from_action(self.action, self.id, || self.draft())
    }
}

#[rocket::async_trait]
impl Entity for Courses {
    const TABLE: &'static str = "courses";
    const LABEL: &'static str = "Course";
    const DEPENDENTS: &'static [Dependent] = &[
        Dependent::new(
            "section",
            "SELECT COUNT(*) FROM course_sections WHERE course_fk = ?",
        ),
        Dependent::new(
            "student learning outcome",
            "SELECT COUNT(*) FROM student_learning_outcomes WHERE course_fk = ?",
        ),
    ];

    type Draft = CourseDraft;

    async fn check(
        pool: &Pool<Sqlite>,
        draft: &CourseDraft,
        current_id: Option<i64>,
        rejections: &mut Rejections,
    ) -> Result<(), AppError> {
        mutation::ensure_exists(pool, "programs", draft.program_fk, "program", rejections).await?;
        mutation::ensure_unique(
            pool,
            Self::TABLE,
            &[("course_code", SqlParam::Text(draft.course_code.clone()))],
            current_id,
            format!("Course code '{}' already exists.", draft.course_code),
            rejections,
        )
        .await
    }

    async fn insert(pool: &Pool<Sqlite>, draft: &CourseDraft, audit: &Audit) -> Result<i64, AppError> {
        let res = sqlx::query(
            "INSERT INTO courses
             (program_fk, course_code, course_title, credit_hours, is_active,
              created_at, updated_at, created_by_fk, updated_by_fk)
             VALUES (?, ?, ?, ?, 1, ?, ?, ?, ?)",
        )
        .bind(draft.program_fk)
        .bind(&draft.course_code)
        .bind(&draft.course_title)
        .bind(draft.credit_hours)
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
        draft: &CourseDraft,
        audit: &Audit,
    ) -> Result<u64, AppError> {
        let res = sqlx::query(
            "UPDATE courses
             SET program_fk = ?, course_code = ?, course_title = ?, credit_hours = ?,
                 updated_at = ?, updated_by_fk = ?
             WHERE id = ?",
        )
        .bind(draft.program_fk)
        .bind(&draft.course_code)
        .bind(&draft.course_title)
        .bind(draft.credit_hours)
        .bind(audit.at)
        .bind(audit.user_id)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(res.rows_affected())
    }
}

pub const PAGE: AdminPage = AdminPage {
    title: "Courses",
    path: "courses",
    upload: None,
    fields: &["program_fk", "course_code", "course_title", "credit_hours"],
};

#[get("/courses")]
pub async fn course_grid(
    ctx: RequestContext,
    params: GridParams,
    db: &State<Pool<Sqlite>>,
) -> GridResult {
    grid::serve::<Courses>(&ctx, db, params).await
}

#[get("/courses")]
pub async fn course_page(ctx: RequestContext) -> Result<RawHtml<String>, AppError> {
    ctx.require(Permission::ViewRecords)?;
    Ok(render_grid_page(&ctx, &PAGE, &Courses::GRID, None))
}

#[post("/courses", data = "<form>")]
pub async fn course_mutate(
    ctx: RequestContext,
    form: Form<CourseForm>,
    db: &State<Pool<Sqlite>>,
) -> Result<RawHtml<String>, AppError> {
    let banner =
        mutation::handle::<Courses>(db, &ctx, form.csrf_token.as_deref(), form.to_mutation())
            .await?;
    Ok(render_grid_page(&ctx, &PAGE, &Courses::GRID, Some(&banner)))
}
