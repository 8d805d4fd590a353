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

pub struct ProgramOutcomes;

#[derive(Debug, sqlx::FromRow)]
pub struct ProgramOutcomeRow {
    pub id: i64,
    pub program_fk: i64,
    pub program_code: String,
    pub institutional_outcome_fk: Option<i64>,
    pub institutional_outcome_code: Option<String>,
    pub code: String,
    pub description: String,
    pub sequence_num: i64,
    pub is_active: bool,
}

#[derive(Serialize)]
struct ProgramOutcomePayload<'a> {
    id: i64,
    program_fk: i64,
    institutional_outcome_fk: Option<i64>,
    code: &'a str,
    description: &'a str,
    sequence_num: i64,
}

impl GridSource for ProgramOutcomes {
    type Row = ProgramOutcomeRow;

    const GRID: GridSpec = GridSpec {
        name: "program_outcomes",
        from: "program_outcomes po \
               JOIN programs p ON p.id = po.program_fk \
               LEFT JOIN institutional_outcomes io ON io.id = po.institutional_outcome_fk",
        select: "po.id, po.program_fk, p.program_code, po.institutional_outcome_fk, \
                 io.code AS institutional_outcome_code, po.code, po.description, \
                 po.sequence_num, po.is_active",
        key: "po.id",
        columns: &[
            GridColumn::integer("ID", "po.id"),
            GridColumn::text("Program", "p.program_code"),
            GridColumn::text("Code", "po.code"),
            GridColumn::text("Description", "po.description"),
            GridColumn::text("Institutional Outcome", "io.code"),
            GridColumn::integer("Sequence", "po.sequence_num").unsearchable(),
            GridColumn::boolean("Status", "po.is_active"),
            GridColumn::actions(),
        ],
        filters: &[
            EntityFilter::integer("program_fk", "po.program_fk"),
            EntityFilter::boolean("active", "po.is_active"),
        ],
        default_sort: 1,
        default_dir: SortDirection::Asc,
    };

    fn present(row: &ProgramOutcomeRow) -> Vec<String> {
        vec![
            row.id.to_string(),
            present::text(&row.program_code),
            present::text(&row.code),
            present::truncate(&row.description, present::TRUNCATE_AT),
            present::optional(row.institutional_outcome_code.as_deref()),
            row.sequence_num.to_string(),
            present::badge(row.is_active),
            present::actions(
                PAGE.path,
                row.id,
                &ProgramOutcomePayload {
                    id: row.id,
                    program_fk: row.program_fk,
                    institutional_outcome_fk: row.institutional_outcome_fk,
                    code: &row.code,
                    description: &row.description,
                    sequence_num: row.sequence_num,
                },
                row.is_active,
            ),
        ]
    }
}

#[derive(Debug, FromForm)]
pub struct ProgramOutcomeForm {
    csrf_token: Option<String>,
    action: Option<MutationAction>,
    id: Option<i64>,
    program_fk: Option<i64>,
    institutional_outcome_fk: Option<i64>,
    code: Option<String>,
    description: Option<String>,
    sequence_num: Option<i64>,
}

#[derive(Debug, Validate)]
pub struct ProgramOutcomeDraft {
    #[validate(required(message = "Program is required."))]
    pub program_fk: Option<i64>,
    pub institutional_outcome_fk: Option<i64>,
    #[validate(
        length(min = 1, max = 20, message = "Outcome code is required (max 20 characters)."),
        regex(path = *CODE_RE, message = "Outcome code may only contain letters, digits, '.', '-' and '_'.")
    )]
    pub code: String,
    #[validate(length(min = 1, max = 2000, message = "Description is required (max 2000 characters)."))]
    pub description: String,
    #[validate(range(min = 0, max = 999, message = "Sequence must be between 0 and 999."))]
    pub sequence_num: i64,
}

impl ProgramOutcomeForm {
    fn draft(&self) -> ProgramOutcomeDraft {
        ProgramOutcomeDraft {
            program_fk: self.program_fk,
            institutional_outcome_fk: self.institutional_outcome_fk,
            code: clean(&self.code).unwrap_or_default().to_uppercase(),
            description: clean(&self.description).unwrap_or_default(),
            sequence_num: self.sequence_num.unwrap_or(0),
        }
    }

    fn to_mutation(&self) -> Result<Mutation<ProgramOutcomeDraft>, AppError> {
        Mutation::from_action(self.action, self.id, || self.draft())
    }
}

/// A program outcome may only map to an outcome of its own institution.
async fn same_institution(
    pool: &Pool<Sqlite>,
    program_fk: i64,
    institutional_outcome_fk: i64,
) -> Result<bool, AppError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM programs p
         JOIN institutional_outcomes io ON io.institution_fk = p.institution_fk
         WHERE p.id = ? AND io.id = ?",
    )
    .bind(program_fk)
    .bind(institutional_outcome_fk)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

#[rocket::async_trait]
impl Entity for ProgramOutcomes {
    const TABLE: &'static str = "program_outcomes";
    const LABEL: &'static str = "Program outcome";
    const DEPENDENTS: &'static [Dependent] = &[Dependent::new(
        "student learning outcome",
        "SELECT COUNT(*) FROM student_learning_outcomes WHERE program_outcome_fk = ?",
    )];

    type Draft = ProgramOutcomeDraft;

    async fn check(
        pool: &Pool<Sqlite>,
        draft: &ProgramOutcomeDraft,
        current_id: Option<i64>,
        rejections: &mut Rejections,
    ) -> Result<(), AppError> {
        mutation::ensure_exists(pool, "programs", draft.program_fk, "program", rejections).await?;
        mutation::ensure_exists(
            pool,
            "institutional_outcomes",
            draft.institutional_outcome_fk,
            "institutional outcome",
            rejections,
        )
        .await?;

        let Some(program_fk) = draft.program_fk else {
            return Ok(());
        };

        if let Some(outcome_fk) = draft.institutional_outcome_fk {
            if mutation::row_exists(pool, "institutional_outcomes", outcome_fk).await?
                && !same_institution(pool, program_fk, outcome_fk).await?
            {
                rejections.invalid(
                    "The institutional outcome must belong to the program's institution.",
                );
            }
        }

        mutation::ensure_unique(
            pool,
            Self::TABLE,
            &[
                ("program_fk", SqlParam::Integer(program_fk)),
                ("code", SqlParam::Text(draft.code.clone())),
            ],
            current_id,
            format!("Outcome code '{}' already exists for this program.", draft.code),
            rejections,
        )
        .await
    }

    async fn insert(
        pool: &Pool<Sqlite>,
        draft: &ProgramOutcomeDraft,
        audit: &Audit,
    ) -> Result<i64, AppError> {
        let res = sqlx::query(
            "INSERT INTO program_outcomes
             (program_fk, institutional_outcome_fk, code, description, sequence_num, is_active,
              created_at, updated_at, created_by_fk, updated_by_fk)
             VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?, ?)",
        )
        .bind(draft.program_fk)
        .bind(draft.institutional_outcome_fk)
        .bind(&draft.code)
        .bind(&draft.description)
        .bind(draft.sequence_num)
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
        draft: &ProgramOutcomeDraft,
        audit: &Audit,
    ) -> Result<u64, AppError> {
        let res = sqlx::query(
            "UPDATE program_outcomes
             SET program_fk = ?, institutional_outcome_fk = ?, code = ?, description = ?,
                 sequence_num = ?, updated_at = ?, updated_by_fk = ?
             WHERE id = ?",
        )
        .bind(draft.program_fk)
        .bind(draft.institutional_outcome_fk)
        .bind(&draft.code)
        .bind(&draft.description)
        .bind(draft.sequence_num)
        .bind(audit.at)
        .bind(audit.user_id)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(res.rows_affected())
    }
}

pub const PAGE: AdminPage = AdminPage {
    title: "Program Outcomes",
    path: "program-outcomes",
    upload: None,
    fields: &[
        "program_fk",
        "institutional_outcome_fk",
        "code",
        "description",
        "sequence_num",
    ],
};

#[get("/program-outcomes")]
pub async fn program_outcome_grid(
    ctx: RequestContext,
    params: GridParams,
    db: &State<Pool<Sqlite>>,
) -> GridResult {
    grid::serve::<ProgramOutcomes>(&ctx, db, params).await
}

#[get("/program-outcomes")]
pub async fn program_outcome_page(ctx: RequestContext) -> Result<RawHtml<String>, AppError> {
    ctx.require(Permission::ViewRecords)?;
    Ok(render_grid_page(&ctx, &PAGE, &ProgramOutcomes::GRID, None))
}

#[post("/program-outcomes", data = "<form>")]
pub async fn program_outcome_mutate(
    ctx: RequestContext,
    form: Form<ProgramOutcomeForm>,
    db: &State<Pool<Sqlite>>,
) -> Result<RawHtml<String>, AppError> {
    let banner = mutation::handle::<ProgramOutcomes>(
        db,
        &ctx,
        form.csrf_token.as_deref(),
        form.to_mutation(),
    )
    .await?;
    Ok(render_grid_page(
        &ctx,
        &PAGE,
        &ProgramOutcomes::GRID,
        Some(&banner),
    ))
}
