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
use crate::validation::{CODE_RE, clean, parse_date, validate_date};

pub struct Terms;

#[derive(Debug, sqlx::FromRow)]
pub struct TermRow {
    pub id: i64,
    pub term_code: String,
    pub term_name: String,
    pub start_date: String,
    pub end_date: String,
    pub section_count: i64,
    pub is_active: bool,
}

#[derive(Serialize)]
struct TermPayload<'a> {
    id: i64,
    term_code: &'a str,
    term_name: &'a str,
    start_date: &'a str,
    end_date: &'a str,
}

impl GridSource for Terms {
    type Row = TermRow;

    const GRID: GridSpec = GridSpec {
        name: "terms",
        from: "terms t",
        select: "t.id, t.term_code, t.term_name, t.start_date, t.end_date, \
                 (SELECT COUNT(*) FROM course_sections cs WHERE cs.term_fk = t.id) AS section_count, \
                 t.is_active",
        key: "t.id",
        columns: &[
            GridColumn::integer("ID", "t.id"),
            GridColumn::text("Code", "t.term_code"),
            GridColumn::text("Name", "t.term_name"),
            GridColumn::text("Start", "t.start_date"),
            GridColumn::text("End", "t.end_date"),
            GridColumn::integer(
                "Sections",
                "(SELECT COUNT(*) FROM course_sections cs WHERE cs.term_fk = t.id)",
            )
            .unsearchable(),
            GridColumn::boolean("Status", "t.is_active"),
            GridColumn::actions(),
        ],
        filters: &[EntityFilter::boolean("active", "t.is_active")],
        default_sort: 3,
        default_dir: SortDirection::Desc,
    };

    fn present(row: &TermRow) -> Vec<String> {
        vec![
            row.id.to_string(),
            present::text(&row.term_code),
            present::truncate(&row.term_name, present::TRUNCATE_AT),
            present::text(&row.start_date),
            present::text(&row.end_date),
            row.section_count.to_string(),
            present::badge(row.is_active),
            present::actions(
                PAGE.path,
                row.id,
                &TermPayload {
                    id: row.id,
                    term_code: &row.term_code,
                    term_name: &row.term_name,
                    start_date: &row.start_date,
                    end_date: &row.end_date,
                },
                row.is_active,
            ),
        ]
    }
}

#[derive(Debug, FromForm)]
pub struct TermForm {
    csrf_token: Option<String>,
    action: Option<MutationAction>,
    id: Option<i64>,
    term_code: Option<String>,
    term_name: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

#[derive(Debug, Clone, Validate)]
pub struct TermDraft {
    #[validate(
        length(min = 1, max = 20, message = "Term code is required (max 20 characters)."),
        regex(path = *CODE_RE, message = "Term code may only contain letters, digits, '.', '-' and '_'.")
    )]
    pub term_code: String,
    #[validate(length(min = 1, max = 100, message = "Term name is required (max 100 characters)."))]
    pub term_name: String,
    #[validate(custom(function = "validate_date"))]
    pub start_date: String,
    #[validate(custom(function = "validate_date"))]
    pub end_date: String,
}

impl TermDraft {
    pub fn new(term_code: &str, term_name: &str, start_date: &str, end_date: &str) -> Self {
        Self {
            term_code: term_code.trim().to_uppercase(),
            term_name: term_name.trim().to_string(),
            start_date: start_date.trim().to_string(),
            end_date: end_date.trim().to_string(),
        }
    }

    /// `None` when either date is unparseable; that is reported by field
    /// validation instead.
    pub fn range_error(&self) -> Option<&'static str> {
        let start = parse_date(&self.start_date)?;
        let end = parse_date(&self.end_date)?;
        (end < start).then_some("End date must be on or after the start date.")
    }
}

impl TermForm {
    fn draft(&self) -> TermDraft {
        TermDraft::new(
            &clean(&self.term_code).unwrap_or_default(),
            &clean(&self.term_name).unwrap_or_default(),
            &clean(&self.start_date).unwrap_or_default(),
            &clean(&self.end_date).unwrap_or_default(),
        )
    }

    fn to_mutation(&self) -> Result<Mutation<TermDraft>, AppError> {
        Mutation::from_action(self.action, self.id, || self.draft())
    }
}

#[rocket::async_trait]
impl Entity for Terms {
    const TABLE: &'static str = "terms";
    const LABEL: &'static str = "Term";
    const DEPENDENTS: &'static [Dependent] = &[Dependent::new(
        "section",
        "SELECT COUNT(*) FROM course_sections WHERE term_fk = ?",
    )];

    type Draft = TermDraft;

    async fn check(
        pool: &Pool<Sqlite>,
        draft: &TermDraft,
        current_id: Option<i64>,
        rejections: &mut Rejections,
    ) -> Result<(), AppError> {
        if let Some(message) = draft.range_error() {
            rejections.invalid(message);
        }

        mutation::ensure_unique(
            pool,
            Self::TABLE,
            &[("term_code", SqlParam::Text(draft.term_code.clone()))],
            current_id,
            format!("Term code '{}' already exists.", draft.term_code),
            rejections,
        )
        .await
    }

    async fn insert(pool: &Pool<Sqlite>, draft: &TermDraft, audit: &Audit) -> Result<i64, AppError> {
        insert_term(pool, draft, true, audit).await
    }

    async fn update(
        pool: &Pool<Sqlite>,
        id: i64,
        draft: &TermDraft,
        audit: &Audit,
    ) -> Result<u64, AppError> {
        let res = sqlx::query(
            "UPDATE terms
             SET term_code = ?, term_name = ?, start_date = ?, end_date = ?, updated_at = ?, updated_by_fk = ?
             WHERE id = ?",
        )
        .bind(&draft.term_code)
        .bind(&draft.term_name)
        .bind(&draft.start_date)
        .bind(&draft.end_date)
        .bind(audit.at)
        .bind(audit.user_id)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(res.rows_affected())
    }
}

pub async fn insert_term(
    pool: &Pool<Sqlite>,
    draft: &TermDraft,
    is_active: bool,
    audit: &Audit,
) -> Result<i64, AppError> {
    let res = sqlx::query(
        "INSERT INTO terms
         (term_code, term_name, start_date, end_date, is_active, created_at, updated_at, created_by_fk, updated_by_fk)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&draft.term_code)
    .bind(&draft.term_name)
    .bind(&draft.start_date)
    .bind(&draft.end_date)
    .bind(is_active)
    .bind(audit.at)
    .bind(audit.at)
    .bind(audit.user_id)
    .bind(audit.user_id)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

pub const PAGE: AdminPage = AdminPage {
    title: "Terms",
    path: "terms",
    upload: Some("terms/import"),
    fields: &["term_code", "term_name", "start_date", "end_date"],
};

#[get("/terms")]
pub async fn term_grid(
    ctx: RequestContext,
    params: GridParams,
    db: &State<Pool<Sqlite>>,
) -> GridResult {
    grid::serve::<Terms>(&ctx, db, params).await
}

#[get("/terms")]
pub async fn term_page(ctx: RequestContext) -> Result<RawHtml<String>, AppError> {
    ctx.require(Permission::ViewRecords)?;
    Ok(render_grid_page(&ctx, &PAGE, &Terms::GRID, None))
}

#[post("/terms", data = "<form>")]
pub async fn term_mutate(
    ctx: RequestContext,
    form: Form<TermForm>,
    db: &State<Pool<Sqlite>>,
) -> Result<RawHtml<String>, AppError> {
    let banner =
        mutation::handle::<Terms>(db, &ctx, form.csrf_token.as_deref(), form.to_mutation()).await?;
    Ok(render_grid_page(&ctx, &PAGE, &Terms::GRID, Some(&banner)))
}
