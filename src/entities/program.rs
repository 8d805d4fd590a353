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

pub struct Programs;

#[derive(Debug, sqlx::FromRow)]
pub struct ProgramRow {
    pub id: i64,
    pub program_code: String,
    pub program_name: String,
    pub institution_fk: i64,
    pub institution_name: String,
    pub course_count: i64,
    pub is_active: bool,
}

#[derive(Serialize)]
struct ProgramPayload<'a> {
    id: i64,
    program_code: &'a str,
    program_name: &'a str,
    institution_fk: i64,
}

impl GridSource for Programs {
    type Row = ProgramRow;

    const GRID: GridSpec = GridSpec {
        name: "programs",
        from: "programs p JOIN institutions i ON i.id = p.institution_fk",
        select: "p.id, p.program_code, p.program_name, p.institution_fk, i.institution_name, \
                 (SELECT COUNT(*) FROM courses c WHERE c.program_fk = p.id) AS course_count, \
                 p.is_active",
        key: "p.id",
        columns: &[
            GridColumn::integer("ID", "p.id"),
            GridColumn::text("Code", "p.program_code"),
            GridColumn::text("Name", "p.program_name"),
            GridColumn::text("Institution", "i.institution_name"),
            GridColumn::integer(
                "Courses",
                "(SELECT COUNT(*) FROM courses c WHERE c.program_fk = p.id)",
            )
            .unsearchable(),
            GridColumn::boolean("Status", "p.is_active"),
            GridColumn::actions(),
        ],
        filters: &[
            EntityFilter::integer("institution_fk", "p.institution_fk"),
            EntityFilter::boolean("active", "p.is_active"),
        ],
        default_sort: 1,
        default_dir: SortDirection::Asc,
    };

    fn present(row: &ProgramRow) -> Vec<String> {
        vec![
            row.id.to_string(),
            present::text(&row.program_code),
            present::truncate(&row.program_name, present::TRUNCATE_AT),
            present::text(&row.institution_name),
            row.course_count.to_string(),
            present::badge(row.is_active),
            present::actions(
                PAGE.path,
                row.id,
                &ProgramPayload {
                    id: row.id,
                    program_code: &row.program_code,
                    program_name: &row.program_name,
                    institution_fk: row.institution_fk,
                },
                row.is_active,
            ),
        ]
    }
}

#[derive(Debug, FromForm)]
pub struct ProgramForm {
    csrf_token: Option<String>,
    action: Option<MutationAction>,
    id: Option<i64>,
    institution_fk: Option<i64>,
    program_code: Option<String>,
    program_name: Option<String>,
}

#[derive(Debug, Validate)]
pub struct ProgramDraft {
    #[validate(required(message = "Institution is required."))]
    pub institution_fk: Option<i64>,
    #[validate(
        length(min = 1, max = 20, message = "Program code is required (max 20 characters)."),
        regex(path = *CODE_RE, message = "Program code may only contain letters, digits, '.', '-' and '_'.")
    )]
    pub program_code: String,
    #[validate(length(min = 1, max = 200, message = "Program name is required (max 200 characters)."))]
    pub program_name: String,
}

impl ProgramForm {
    fn draft(&self) -> ProgramDraft {
        ProgramDraft {
            institution_fk: self.institution_fk,
            program_code: clean(&self.program_code).unwrap_or_default().to_uppercase(),
            program_name: clean(&self.program_name).unwrap_or_default(),
        }
    }

    fn to_mutation(&self) -> Result<Mutation<ProgramDraft>, AppError> {
        Mutation::from_action(self.action, self.id, || self.draft())
    }
}

#[rocket::async_trait]
impl Entity for Programs {
    const TABLE: &'static str = "programs";
    const LABEL: &'static str = "Program";
    const DEPENDENTS: &'static [Dependent] = &[
        Dependent::new("course", "SELECT COUNT(*) FROM courses WHERE program_fk = ?"),
        Dependent::new(
            "program outcome",
            "SELECT COUNT(*) FROM program_outcomes WHERE program_fk = ?",
        ),
    ];

    type Draft = ProgramDraft;

    async fn check(
        pool: &Pool<Sqlite>,
        draft: &ProgramDraft,
        current_id: Option<i64>,
        rejections: &mut Rejections,
    ) -> Result<(), AppError> {
        mutation::ensure_exists(
            pool,
            "institutions",
            draft.institution_fk,
            "institution",
            rejections,
        )
        .await?;

        mutation::ensure_unique(
            pool,
            Self::TABLE,
            &[("program_code", SqlParam::Text(draft.program_code.clone()))],
            current_id,
            format!("Program code '{}' already exists.", draft.program_code),
            rejections,
        )
        .await
    }

    async fn insert(
        pool: &Pool<Sqlite>,
        draft: &ProgramDraft,
        audit: &Audit,
    ) -> Result<i64, AppError> {
        let res = sqlx::query(
            "INSERT INTO programs
             (institution_fk, program_code, program_name, is_active, created_at, updated_at, created_by_fk, updated_by_fk)
             VALUES (?, ?, ?, 1, ?, ?, ?, ?)",
        )
        .bind(draft.institution_fk)
        .bind(&draft.program_code)
        .bind(&draft.program_name)
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
        draft: &ProgramDraft,
        audit: &Audit,
    ) -> Result<u64, AppError> {
        let res = sqlx::query(
            "UPDATE programs
             SET institution_fk = ?, program_code = ?, program_name = ?, updated_at = ?, updated_by_fk = ?
             WHERE id = ?",
        )
        .bind(draft.institution_fk)
        .bind(&draft.program_code)
        .bind(&draft.program_name)
        .bind(audit.at)
        .bind(audit.user_id)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(res.rows_affected())
    }
}

pub const PAGE: AdminPage = AdminPage {
    title: "Programs",
    path: "programs",
    upload: None,
    fields: &["institution_fk", "program_code", "program_name"],
};

#[get("/programs")]
pub async fn program_grid(
    ctx: RequestContext,
    params: GridParams,
    db: &State<Pool<Sqlite>>,
) -> GridResult {
    grid::serve::<Programs>(&ctx, db, params).await
}

#[get("/programs")]
pub async fn program_page(ctx: RequestContext) -> Result<RawHtml<String>, AppError> {
    ctx.require(Permission::ViewRecords)?;
    Ok(render_grid_page(&ctx, &PAGE, &Programs::GRID, None))
}

#[post("/programs", data = "<form>")]
pub async fn program_mutate(
    ctx: RequestContext,
    form: Form<ProgramForm>,
    db: &State<Pool<Sqlite>>,
) -> Result<RawHtml<String>, AppError> {
    let banner =
        mutation::handle::<Programs>(db, &ctx, form.csrf_token.as_deref(), form.to_mutation())
            .await?;
    Ok(render_grid_page(&ctx, &PAGE, &Programs::GRID, Some(&banner)))
}
