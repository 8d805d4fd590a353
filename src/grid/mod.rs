//! Grid data endpoints: request parsing, parameterized query assembly,
//! execution, and the response envelope a client-side data grid expects.

pub mod columns;
pub mod params;
pub mod predicate;
pub mod present;
pub mod query;

pub use columns::{ColumnKind, EntityFilter, FilterKind, GridColumn, GridSpec};
pub use params::{GridParams, OrderRequest, SortDirection};
pub use predicate::{Predicate, SqlParam};

use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Pool, Sqlite};
use tracing::{debug, info, instrument};

use crate::auth::{Permission, RequestContext};
use crate::error::AppError;

use query::{assemble, bind_rows, bind_scalar};

/// One grid endpoint: its static query shape, the row it decodes, and how a
/// row becomes display cells.
pub trait GridSource {
    type Row: for<'r> FromRow<'r, SqliteRow> + Send + Unpin;

    const GRID: GridSpec;
    const PERMISSION: Permission = Permission::ViewRecords;

    /// Must return exactly one cell per entry in `GRID.columns`.
    fn present(row: &Self::Row) -> Vec<String>;
}

#[derive(Debug)]
pub struct GridPage<R> {
    pub records_total: i64,
    pub records_filtered: i64,
    pub rows: Vec<R>,
}

#[instrument(skip(pool, params), fields(grid = G::GRID.name))]
pub async fn fetch_page<G: GridSource>(
    pool: &Pool<Sqlite>,
    params: &GridParams,
) -> Result<GridPage<G::Row>, AppError> {
    let query = assemble(&G::GRID, params);
    // Bind types only; values may be user search text.
    debug!(
        sql = %query.select_sql,
        binds = ?query.select_params.iter().map(SqlParam::type_tag).collect::<Vec<_>>(),
        "Grid query assembled"
    );

    let records_total: i64 = sqlx::query_scalar(&query.total_sql)
        .fetch_one(pool)
        .await?;

    let records_filtered: i64 =
        bind_scalar(sqlx::query_scalar(&query.filtered_sql), &query.filter_params)
            .fetch_one(pool)
            .await?;

    let rows = bind_rows(
        sqlx::query_as::<_, G::Row>(&query.select_sql),
        &query.select_params,
    )
    .fetch_all(pool)
    .await?;

    info!(
        records_total,
        records_filtered,
        returned = rows.len(),
        "Grid page fetched"
    );

    Ok(GridPage {
        records_total,
        records_filtered,
        rows,
    })
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridResponse {
    pub draw: i64,
    pub records_total: i64,
    pub records_filtered: i64,
    pub data: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GridResponse {
    pub fn from_page<R>(draw: i64, page: GridPage<R>, present: impl Fn(&R) -> Vec<String>) -> Self {
        Self {
            draw,
            records_total: page.records_total,
            records_filtered: page.records_filtered,
            data: page.rows.iter().map(present).collect(),
            error: None,
        }
    }

    pub fn failure(draw: i64, message: String) -> Self {
        Self {
            draw,
            records_total: 0,
            records_filtered: 0,
            data: Vec::new(),
            error: Some(message),
        }
    }
}

pub type GridResult = Result<Json<GridResponse>, Custom<Json<GridResponse>>>;

/// Shared body of every `/data/<entity>` handler. Failures become a JSON
/// envelope carrying `error` instead of propagating.
pub async fn serve<G: GridSource>(
    ctx: &RequestContext,
    pool: &Pool<Sqlite>,
    params: GridParams,
) -> GridResult {
    let result = match ctx.require(G::PERMISSION) {
        Ok(()) => fetch_page::<G>(pool, &params).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(page) => Ok(Json(GridResponse::from_page(params.draw, page, G::present))),
        Err(err) => {
            err.log_and_record(&format!("Grid endpoint {}", G::GRID.name));
            Err(Custom(
                err.status_code(),
                Json(GridResponse::failure(
                    params.draw,
                    err.public_message(ctx.config.debug),
                )),
            ))
        }
    }
}
