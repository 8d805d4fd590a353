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

pub struct InstitutionalOutcomes;

#[derive(Debug, sqlx::FromRow)]
pub struct InstitutionalOutcomeRow {
    pub id: i64,
    pub institution_fk: i64,
    pub institution_code: String,
    pub code: String,
    pub description: String,
    pub sequence_num: i64,
    pub is_active: bool,
}

#[derive(Serialize)]
struct InstitutionalOutcomePayload<'a> {
    id: i64,
    institution_fk: i64,
    code: &'a str,
    description: &'a str,
    sequence_num: i64,
}

impl GridSource for InstitutionalOutcomes {
    type Row = InstitutionalOutcomeRow;

    const GRID: GridSpec = GridSpec {
        name: "institutional_outcomes",
        from: "institutional_outcomes io JOIN institutions i ON i.id = io.institution_fk",
        select: "io.id, io.institution_fk, i.institution_code, io.code, io.description, \
                 io.sequence_num, io.is_active",
        key: "io.id",
        columns: &[
            GridColumn::integer("ID", "io.id"),
            GridColumn::text("Institution", "i.institution_code"),
            GridColumn::text("Code", "io.code"),
            GridColumn::text("Description", "io.description"),
            GridColumn::integer("Sequence", "io.sequence_num").unsearchable(),
            GridColumn::boolean("Status", "io.is_active"),
            GridColumn::actions(),
        ],
        filters: &[
            EntityFilter::integer("institution_fk", "io.institution_fk"),
            EntityFilter::boolean("active", "io.is_active"),
        ],
        default_sort: 4,
        default_dir: SortDirection::Asc,
    };

    fn present(row: &InstitutionalOutcomeRow) -> Vec<String> {
        vec![
            row.id.to_string(),
            present::text(&row.institution_code),
            present::text(&row.code),
            present::truncate(&row.description, present::TRUNCATE_AT),
            row.sequence_num.to_string(),
            present::badge(row.is_active),
            present::actions(
                PAGE.path,
                row.id,
                &InstitutionalOutcomePayload {
                    id: row.id,
                    institution_fk: row.institution_fk,
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
pub struct InstitutionalOutcomeForm {
    csrf_token: Option<String>,
    action: Option<MutationAction>,
    id: Option<i64>,
    institution_fk: Option<i64>,
    code: Option<String>,
    description: Option<String>,
    sequence_num: Option<i64>,
}

#[derive(Debug, Validate)]
pub struct InstitutionalOutcomeDraft {
    #[validate(required(message = "Institution is required."))]
    pub institution_fk: Option<i64>,
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

impl InstitutionalOutcomeForm {
    fn draft(&self) -> InstitutionalOutcomeDraft {
        InstitutionalOutcomeDraft {
            institution_fk: self.institution_fk,
            code: clean(&self.code).unwrap_or_default().to_uppercase(),
            description: clean(&self.description).unwrap_or_default(),
            sequence_num: self.sequence_num.unwrap_or(0),
        }
    }

    fn to_mutation(&self) -> Result<Mutation<InstitutionalOutcomeDraft>, AppError> {
        Mutation::from_action(self.action, self.id, || self.draft())
    }
}

#[rocket::async_trait]
impl Entity for InstitutionalOutcomes {
    const TABLE: &'static str = "institutional_outcomes";
    const LABEL: &'static str = "Institutional outcome";
    const DEPENDENTS: &'static [Dependent] = &[Dependent::new(
        "program outcome",
        "SELECT COUNT(*) FROM program_outcomes WHERE institutional_outcome_fk = ?",
    )];

    type Draft = InstitutionalOutcomeDraft;

    async fn check(
        pool: &Pool<Sqlite>,
        draft: &InstitutionalOutcomeDraft,
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

        if let Some(institution_fk) = draft.institution_fk {
            mutation::ensure_unique(
                pool,
                Self::TABLE,
                &[
                    ("institution_fk", SqlParam::Integer(institution_fk)),
                    ("code", SqlParam::Text(draft.code.clone())),
                ],
                current_id,
                format!(
                    "Outcome code '{}' already exists for this institution.",
                    draft.code
                ),
                rejections,
            )
            .await?;
        }

        Ok(())
    }

    async fn insert(
        pool: &Pool<Sqlite>,
        draft: &InstitutionalOutcomeDraft,
        audit: &Audit,
    ) -> Result<i64, AppError> {
        let res = sqlx::query(
            "INSERT INTO institutional_outcomes
             (institution_fk, code, description, sequence_num, is_active, created_at, updated_at, created_by_fk, updated_by_fk)
             VALUES (?, ?, ?, ?, 1, ?, ?, ?, ?)",
        )
        .bind(draft.institution_fk)
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
        draft: &InstitutionalOutcomeDraft,
        audit: &Audit,
    ) -> Result<u64, AppError> {
        let res = sqlx::query(
            "UPDATE institutional_outcomes
             SET institution_fk = ?, code = ?, description = ?, sequence_num = ?, updated_at = ?, updated_by_fk = ?
             WHERE id = ?",
        )
        .bind(draft.institution_fk)
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
    title: "Institutional Outcomes",
    path: "institutional-outcomes",
    upload: None,
    fields: &["institution_fk", "code", "description", "sequence_num"],
};

#[get("/institutional-outcomes")]
pub async fn institutional_outcome_grid(
    ctx: RequestContext,
    params: GridParams,
    db: &State<Pool<Sqlite>>,
) -> GridResult {
    grid::serve::<InstitutionalOutcomes>(&ctx, db, params).await
}

#[get("/institutional-outcomes")]
pub async fn institutional_outcome_page(ctx: RequestContext) -> Result<RawHtml<String>, AppError> {
    ctx.require(Permission::ViewRecords)?;
    Ok(render_grid_page(&ctx, &PAGE, &InstitutionalOutcomes::GRID, None))
}

#[post("/institutional-outcomes", data = "<form>")]
pub async fn institutional_outcome_mutate(
    ctx: RequestContext,
    form: Form<InstitutionalOutcomeForm>,
    db: &State<Pool<Sqlite>>,
) -> Result<RawHtml<String>, AppError> {
    let banner = mutation::handle::<InstitutionalOutcomes>(
        db,
        &ctx,
        form.csrf_token.as_deref(),
        form.to_mutation(),
    )
    .await?;
    Ok(render_grid_page(
        &ctx,
        &PAGE,
        &InstitutionalOutcomes::GRID,
        Some(&banner),
    ))
}
