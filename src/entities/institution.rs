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

pub struct Institutions;

#[derive(Debug, sqlx::FromRow)]
pub struct InstitutionRow {
    pub id: i64,
    pub institution_code: String,
    pub institution_name: String,
    pub program_count: i64,
    pub is_active: bool,
}

#[derive(Serialize)]
struct InstitutionPayload<'a> {
    id: i64,
    institution_code: &'a str,
    institution_name: &'a str,
    is_active: bool,
}

impl GridSource for Institutions {
    type Row = InstitutionRow;

    const GRID: GridSpec = GridSpec {
        name: "institutions",
        from: "institutions i",
        select: "i.id, i.institution_code, i.institution_name, \
                 (SELECT COUNT(*) FROM programs p WHERE p.institution_fk = i.id) AS program_count, \
                 i.is_active",
        key: "i.id",
        columns: &[
            GridColumn::integer("ID", "i.id"),
            GridColumn::text("Code", "i.institution_code"),
            GridColumn::text("Name", "i.institution_name"),
            GridColumn::integer(
                "Programs",
                "(SELECT COUNT(*) FROM programs p WHERE p.institution_fk = i.id)",
            )
            .unsearchable(),
            GridColumn::boolean("Status", "i.is_active"),
            GridColumn::actions(),
        ],
        filters: &[EntityFilter::boolean("active", "i.is_active")],
        default_sort: 2,
        default_dir: SortDirection::Asc,
    };

    fn present(row: &InstitutionRow) -> Vec<String> {
        vec![
            row.id.to_string(),
            present::text(&row.institution_code),
            present::truncate(&row.institution_name, present::TRUNCATE_AT),
            row.program_count.to_string(),
            present::badge(row.is_active),
            present::actions(
                PAGE.path,
                row.id,
                &InstitutionPayload {
                    id: row.id,
                    institution_code: &row.institution_code,
                    institution_name: &row.institution_name,
                    is_active: row.is_active,
                },
                row.is_active,
            ),
        ]
    }
}

#[derive(Debug, FromForm)]
pub struct InstitutionForm {
    csrf_token: Option<String>,
    action: Option<MutationAction>,
    id: Option<i64>,
    institution_code: Option<String>,
    institution_name: Option<String>,
}

#[derive(Debug, Validate)]
pub struct InstitutionDraft {
    #[validate(
        length(min = 1, max = 20, message = "Institution code is required (max 20 characters)."),
        regex(path = *CODE_RE, message = "Institution code may only contain letters, digits, '.', '-' and '_'.")
    )]
    pub institution_code: String,
    #[validate(length(min = 1, max = 200, message = "Institution name is required (max 200 characters)."))]
    pub institution_name: String,
}

impl InstitutionForm {
    fn draft(&self) -> InstitutionDraft {
        InstitutionDraft {
            institution_code: clean(&self.institution_code)
                .unwrap_or_default()
                .to_uppercase(),
            institution_name: clean(&self.institution_name).unwrap_or_default(),
        }
    }

    fn to_mutation(&self) -> Result<Mutation<InstitutionDraft>, AppError> {
        Mutation::from_action(self.action, self.id, || self.draft())
    }
}

#[rocket::async_trait]
impl Entity for Institutions {
    const TABLE: &'static str = "institutions";
    const LABEL: &'static str = "Institution";
    const DEPENDENTS: &'static [Dependent] = &[
        Dependent::new(
            "program",
            "SELECT COUNT(*) FROM programs WHERE institution_fk = ?",
        ),
        Dependent::new(
            "institutional outcome",
            "SELECT COUNT(*) FROM institutional_outcomes WHERE institution_fk = ?",
        ),
    ];

    type Draft = InstitutionDraft;

    async fn check(
        pool: &Pool<Sqlite>,
        draft: &InstitutionDraft,
        current_id: Option<i64>,
        rejections: &mut Rejections,
    ) -> Result<(), AppError> {
        mutation::ensure_unique(
            pool,
            Self::TABLE,
            &[(
                "institution_code",
                SqlParam::Text(draft.institution_code.clone()),
            )],
            current_id,
            format!(
                "Institution code '{}' already exists.",
                draft.institution_code
            ),
            rejections,
        )
        .await
    }

    async fn insert(
        pool: &Pool<Sqlite>,
        draft: &InstitutionDraft,
        audit: &Audit,
    ) -> Result<i64, AppError> {
        let res = sqlx::query(
            "INSERT INTO institutions
             (institution_code, institution_name, is_active, created_at, updated_at, created_by_fk, updated_by_fk)
             VALUES (?, ?, 1, ?, ?, ?, ?)",
        )
        .bind(&draft.institution_code)
        .bind(&draft.institution_name)
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
        draft: &InstitutionDraft,
        audit: &Audit,
    ) -> Result<u64, AppError> {
        let res = sqlx::query(
            "UPDATE institutions
             SET institution_code = ?, institution_name = ?, updated_at = ?, updated_by_fk = ?
             WHERE id = ?",
        )
        .bind(&draft.institution_code)
        .bind(&draft.institution_name)
        .bind(audit.at)
        .bind(audit.user_id)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(res.rows_affected())
    }
}

pub const PAGE: AdminPage = AdminPage {
    title: "Institutions",
    path: "institutions",
    upload: None,
    fields: &["institution_code", "institution_name"],
};

#[get("/institutions")]
pub async fn institution_grid(
    ctx: RequestContext,
    params: GridParams,
    db: &State<Pool<Sqlite>>,
) -> GridResult {
    grid::serve::<Institutions>(&ctx, db, params).await
}

#[get("/institutions")]
pub async fn institution_page(ctx: RequestContext) -> Result<RawHtml<String>, AppError> {
    ctx.require(Permission::ViewRecords)?;
    Ok(render_grid_page(&ctx, &PAGE, &Institutions::GRID, None))
}

#[post("/institutions", data = "<form>")]
pub async fn institution_mutate(
    ctx: RequestContext,
    form: Form<InstitutionForm>,
    db: &State<Pool<Sqlite>>,
) -> Result<RawHtml<String>, AppError> {
    let banner = mutation::handle::<Institutions>(
        db,
        &ctx,
        form.csrf_token.as_deref(),
        form.to_mutation(),
    )
    .await?;
    Ok(render_grid_page(
        &ctx,
        &PAGE,
        &Institutions::GRID,
        Some(&banner),
    ))
}
