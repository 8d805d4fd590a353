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

pub struct Students;

#[derive(Debug, sqlx::FromRow)]
pub struct StudentRow {
    pub id: i64,
    pub student_id: String,
    pub last_name: String,
    pub first_name: String,
    pub email: Option<String>,
    pub enrollment_count: i64,
    pub is_active: bool,
}

#[derive(Serialize)]
struct StudentPayload<'a> {
    id: i64,
    student_id: &'a str,
    first_name: &'a str,
    last_name: &'a str,
    email: Option<&'a str>,
}

impl GridSource for Students {
    type Row = StudentRow;

    const GRID: GridSpec = GridSpec {
        name: "students",
        from: "students s",
        select: "s.id, s.student_id, s.last_name, s.first_name, s.email, \
                 (SELECT COUNT(*) FROM enrollments e WHERE e.student_fk = s.id) AS enrollment_count, \
                 s.is_active",
        key: "s.id",
        columns: &[
            GridColumn::integer("ID", "s.id"),
            GridColumn::text("Student ID", "s.student_id"),
            GridColumn::text("Last Name", "s.last_name"),
            GridColumn::text("First Name", "s.first_name"),
            GridColumn::text("Email", "s.email"),
            GridColumn::integer(
                "Enrollments",
                "(SELECT COUNT(*) FROM enrollments e WHERE e.student_fk = s.id)",
            )
            .unsearchable(),
            GridColumn::boolean("Status", "s.is_active"),
            GridColumn::actions(),
        ],
        filters: &[
            EntityFilter::boolean("status", "s.is_active"),
            EntityFilter::boolean("active", "s.is_active"),
        ],
        default_sort: 2,
        default_dir: SortDirection::Asc,
    };

    fn present(row: &StudentRow) -> Vec<String> {
        vec![
            row.id.to_string(),
            present::text(&row.student_id),
            present::text(&row.last_name),
            present::text(&row.first_name),
            present::optional(row.email.as_deref()),
            row.enrollment_count.to_string(),
            present::badge(row.is_active),
            present::actions(
                PAGE.path,
                row.id,
                &StudentPayload {
                    id: row.id,
                    student_id: &row.student_id,
                    first_name: &row.first_name,
                    last_name: &row.last_name,
                    email: row.email.as_deref(),
                },
                row.is_active,
            ),
        ]
    }
}

#[derive(Debug, FromForm)]
pub struct StudentForm {
    csrf_token: Option<String>,
    action: Option<MutationAction>,
    id: Option<i64>,
    student_id: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Validate)]
pub struct StudentDraft {
    #[validate(
        length(min = 1, max = 20, message = "Student ID is required (max 20 characters)."),
        regex(path = *CODE_RE, message = "Student ID may only contain letters, digits, '.', '-' and '_'.")
    )]
    pub student_id: String,
    #[validate(length(min = 1, max = 100, message = "First name is required (max 100 characters)."))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100, message = "Last name is required (max 100 characters)."))]
    pub last_name: String,
    #[validate(email(message = "Email address is not valid."))]
    pub email: Option<String>,
}

impl StudentForm {
    fn draft(&self) -> StudentDraft {
        StudentDraft {
            student_id: clean(&self.student_id).unwrap_or_default(),
            first_name: clean(&self.first_name).unwrap_or_default(),
            last_name: clean(&self.last_name).unwrap_or_default(),
            email: clean(&self.email).map(|email| email.to_lowercase()),
        }
    }

    fn to_mutation(&self) -> Result<Mutation<StudentDraft>, AppError> {
        Mutation::from_action(self.action, self.id, || self.draft())
    }
}

#[rocket::async_trait]
impl Entity for Students {
    const TABLE: &'static str = "students";
    const LABEL: &'static str = "Student";
    const DEPENDENTS: &'static [Dependent] = &[
        Dependent::new(
            "enrollment",
            "SELECT COUNT(*) FROM enrollments WHERE student_fk = ?",
        ),
        Dependent::new(
            "assessment",
            "SELECT COUNT(*) FROM assessments a
             JOIN enrollments e ON e.id = a.enrollment_fk
             WHERE e.student_fk = ?",
        ),
    ];

    type Draft = StudentDraft;

    async fn check(
        pool: &Pool<Sqlite>,
        draft: &StudentDraft,
        current_id: Option<i64>,
        rejections: &mut Rejections,
    ) -> Result<(), AppError> {
        mutation::ensure_unique(
            pool,
            Self::TABLE,
            &[("student_id", SqlParam::Text(draft.student_id.clone()))],
            current_id,
            format!("Student ID '{}' already exists.", draft.student_id),
            rejections,
        )
        .await?;

        if let Some(email) = &draft.email {
            mutation::ensure_unique(
                pool,
                Self::TABLE,
                &[("email", SqlParam::Text(email.clone()))],
                current_id,
                format!("Email '{}' is already used by another student.", email),
                rejections,
            )
            .await?;
        }

        Ok(())
    }

    async fn insert(pool: &Pool<Sqlite>, draft: &StudentDraft, audit: &Audit) -> Result<i64, AppError> {
        let res = sqlx::query(
            "INSERT INTO students
             (student_id, first_name, last_name, email, is_active, created_at, updated_at, created_by_fk, updated_by_fk)
             VALUES (?, ?, ?, ?, 1, ?, ?, ?, ?)",
        )
        .bind(&draft.student_id)
        .bind(&draft.first_name)
        .bind(&draft.last_name)
        .bind(&draft.email)
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
        draft: &StudentDraft,
        audit: &Audit,
    ) -> Result<u64, AppError> {
        let res = sqlx::query(
            "UPDATE students
             SET student_id = ?, first_name = ?, last_name = ?, email = ?, updated_at = ?, updated_by_fk = ?
             WHERE id = ?",
        )
        .bind(&draft.student_id)
        .bind(&draft.first_name)
        .bind(&draft.last_name)
        .bind(&draft.email)
        .bind(audit.at)
        .bind(audit.user_id)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(res.rows_affected())
    }
}

pub const PAGE: AdminPage = AdminPage {
    title: "Students",
    path: "students",
    upload: None,
    fields: &["student_id", "first_name", "last_name", "email"],
};

#[get("/students")]
pub async fn student_grid(
    ctx: RequestContext,
    params: GridParams,
    db: &State<Pool<Sqlite>>,
) -> GridResult {
    grid::serve::<Students>(&ctx, db, params).await
}

#[get("/students")]
pub async fn student_page(ctx: RequestContext) -> Result<RawHtml<String>, AppError> {
    ctx.require(Permission::ViewRecords)?;
    Ok(render_grid_page(&ctx, &PAGE, &Students::GRID, None))
}

#[post("/students", data = "<form>")]
pub async fn student_mutate(
    ctx: RequestContext,
    form: Form<StudentForm>,
    db: &State<Pool<Sqlite>>,
) -> Result<RawHtml<String>, AppError> {
    let banner =
        mutation::handle::<Students>(db, &ctx, form.csrf_token.as_deref(), form.to_mutation())
            .await?;
    Ok(render_grid_page(&ctx, &PAGE, &Students::GRID, Some(&banner)))
}
