//! Create / update / toggle / delete over any table that implements
//! [`Entity`]. Validation, uniqueness, referential and dependent-row failures
//! are collected and reported together as one message.

use chrono::{NaiveDateTime, Utc};
use rocket::FromFormField;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};
use validator::{Validate, ValidationErrors};

use crate::auth::{Permission, RequestContext};
use crate::error::AppError;
use crate::grid::SqlParam;
use crate::grid::query::bind_scalar;
use crate::pages::Banner;
use crate::validation::validation_messages;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromFormField)]
pub enum MutationAction {
    #[field(value = "add")]
    Add,
    #[field(value = "edit")]
    Edit,
    #[field(value = "toggle_status")]
    ToggleStatus,
    #[field(value = "delete")]
    Delete,
}

#[derive(Debug)]
pub enum Mutation<D> {
    Create(D),
    Update(i64, D),
    ToggleActive(i64),
    Delete(i64),
}

impl<D> Mutation<D> {
    /// Maps a posted action onto a mutation. Everything but `add` needs the
    /// row id; the draft is only built for `add` and `edit`. A missing or
    /// unknown action arrives here as `None` so it is reported after the
    /// CSRF check instead of failing form parsing.
    pub fn from_action(
        action: Option<MutationAction>,
        id: Option<i64>,
        draft: impl FnOnce() -> D,
    ) -> Result<Self, AppError> {
        let action = action.ok_or_else(|| {
            AppError::Validation(
                "Unknown action; expected add, edit, toggle_status or delete.".to_string(),
            )
        })?;
        let require_id =
            || id.ok_or_else(|| AppError::Validation("A record id is required.".to_string()));

        Ok(match action {
            MutationAction::Add => Mutation::Create(draft()),
            MutationAction::Edit => Mutation::Update(require_id()?, draft()),
            MutationAction::ToggleStatus => Mutation::ToggleActive(require_id()?),
            MutationAction::Delete => Mutation::Delete(require_id()?),
        })
    }

    fn action_name(&self) -> &'static str {
        match self {
            Mutation::Create(_) => "create",
            Mutation::Update(..) => "update",
            Mutation::ToggleActive(_) => "toggle_status",
            Mutation::Delete(_) => "delete",
        }
    }
}

/// Who is writing and when; stamped into the audit columns.
#[derive(Debug, Clone, Copy)]
pub struct Audit {
    pub user_id: i64,
    pub at: NaiveDateTime,
}

impl Audit {
    pub fn now(user_id: i64) -> Self {
        Self {
            user_id,
            at: Utc::now().naive_utc(),
        }
    }
}

impl From<&RequestContext> for Audit {
    fn from(ctx: &RequestContext) -> Self {
        Audit::now(ctx.user.id)
    }
}

/// A child table whose rows block deleting the parent. `count_sql` takes the
/// parent id as its only parameter.
#[derive(Debug, Clone, Copy)]
pub struct Dependent {
    pub label: &'static str,
    pub count_sql: &'static str,
}

impl Dependent {
    pub const fn new(label: &'static str, count_sql: &'static str) -> Self {
        Self { label, count_sql }
    }
}

#[derive(Debug, Default)]
pub struct Rejections {
    invalid: Vec<String>,
    conflicts: Vec<String>,
}

impl Rejections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_validation(result: Result<(), ValidationErrors>) -> Self {
        let mut rejections = Self::new();
        if let Err(errors) = result {
            rejections.invalid.extend(validation_messages(&errors));
        }
        rejections
    }

    pub fn invalid(&mut self, message: impl Into<String>) {
        self.invalid.push(message.into());
    }

    pub fn conflict(&mut self, message: impl Into<String>) {
        self.conflicts.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.invalid.is_empty() && self.conflicts.is_empty()
    }

    /// One combined message; reported as a validation error if any field was
    /// invalid, otherwise as a conflict.
    pub fn into_result(self) -> Result<(), AppError> {
        if self.is_empty() {
            return Ok(());
        }

        let only_conflicts = self.invalid.is_empty();
        let message = self
            .invalid
            .into_iter()
            .chain(self.conflicts)
            .collect::<Vec<_>>()
            .join(" ");

        if only_conflicts {
            Err(AppError::Conflict(message))
        } else {
            Err(AppError::Validation(message))
        }
    }
}

#[rocket::async_trait]
pub trait Entity: Send + Sync + 'static {
    const TABLE: &'static str;
    const LABEL: &'static str;
    const DEPENDENTS: &'static [Dependent];
    const PERMISSION: Permission = Permission::ManageRecords;

    type Draft: Validate + Send + Sync;

    /// Checks that need the database: parents exist, natural keys are free.
    /// `current_id` is the row being edited, if any.
    async fn check(
        pool: &Pool<Sqlite>,
        draft: &Self::Draft,
        current_id: Option<i64>,
        rejections: &mut Rejections,
    ) -> Result<(), AppError>;

    async fn insert(pool: &Pool<Sqlite>, draft: &Self::Draft, audit: &Audit)
    -> Result<i64, AppError>;

    /// Returns the number of rows written.
    async fn update(
        pool: &Pool<Sqlite>,
        id: i64,
        draft: &Self::Draft,
        audit: &Audit,
    ) -> Result<u64, AppError>;

    async fn guard_toggle(
        _pool: &Pool<Sqlite>,
        _ctx: &RequestContext,
        _id: i64,
        _rejections: &mut Rejections,
    ) -> Result<(), AppError> {
        Ok(())
    }

    async fn guard_delete(
        _pool: &Pool<Sqlite>,
        _ctx: &RequestContext,
        _id: i64,
        _rejections: &mut Rejections,
    ) -> Result<(), AppError> {
        Ok(())
    }
}

fn not_found<E: Entity>(id: i64) -> AppError {
    AppError::NotFound(format!("{} with id {} does not exist.", E::LABEL, id))
}

/// Runs one mutation and returns the success message.
#[instrument(skip_all, fields(entity = E::TABLE, action = mutation.action_name(), user_id = ctx.user.id))]
pub async fn apply<E: Entity>(
    pool: &Pool<Sqlite>,
    ctx: &RequestContext,
    mutation: Mutation<E::Draft>,
) -> Result<String, AppError> {
    ctx.require(E::PERMISSION)?;
    let audit = Audit::from(ctx);

    match mutation {
        Mutation::Create(draft) => {
            let mut rejections = Rejections::from_validation(draft.validate());
            E::check(pool, &draft, None, &mut rejections).await?;
            rejections.into_result()?;

            let id = E::insert(pool, &draft, &audit).await?;
            info!(id, "Record created");
            Ok(format!("{} created successfully.", E::LABEL))
        }
        Mutation::Update(id, draft) => {
            if !row_exists(pool, E::TABLE, id).await? {
                return Err(not_found::<E>(id));
            }

            let mut rejections = Rejections::from_validation(draft.validate());
            E::check(pool, &draft, Some(id), &mut rejections).await?;
            rejections.into_result()?;

            if E::update(pool, id, &draft, &audit).await? == 0 {
                return Err(not_found::<E>(id));
            }
            info!(id, "Record updated");
            Ok(format!("{} updated successfully.", E::LABEL))
        }
        Mutation::ToggleActive(id) => {
            let mut rejections = Rejections::new();
            E::guard_toggle(pool, ctx, id, &mut rejections).await?;
            rejections.into_result()?;

            match toggle_active(pool, E::TABLE, id, &audit).await? {
                Some(true) => Ok(format!("{} activated.", E::LABEL)),
                Some(false) => Ok(format!("{} deactivated.", E::LABEL)),
                None => Err(not_found::<E>(id)),
            }
        }
        Mutation::Delete(id) => {
            if !row_exists(pool, E::TABLE, id).await? {
                return Err(not_found::<E>(id));
            }

            let mut rejections = Rejections::new();
            E::guard_delete(pool, ctx, id, &mut rejections).await?;
            rejections.into_result()?;

            let blocking = dependent_counts(pool, E::DEPENDENTS, id).await?;
            if !blocking.is_empty() {
                return Err(AppError::Dependency(format!(
                    "Cannot delete this {}: it still has {}.",
                    E::LABEL.to_lowercase(),
                    blocking.join(", ")
                )));
            }

            if delete_row(pool, E::TABLE, id).await? == 0 {
                return Err(not_found::<E>(id));
            }
            info!(id, "Record deleted");
            Ok(format!("{} deleted successfully.", E::LABEL))
        }
    }
}

/// Page-boundary wrapper: CSRF and permission failures abort the request,
/// everything else becomes a banner.
pub async fn handle<E: Entity>(
    pool: &Pool<Sqlite>,
    ctx: &RequestContext,
    csrf_token: Option<&str>,
    mutation: Result<Mutation<E::Draft>, AppError>,
) -> Result<Banner, AppError> {
    ctx.verify_csrf(csrf_token)?;
    ctx.require(E::PERMISSION)?;

    let outcome = match mutation {
        Ok(mutation) => apply::<E>(pool, ctx, mutation).await,
        Err(err) => Err(err),
    };

    Ok(Banner::from_outcome(
        outcome,
        &format!("Mutation on {}", E::TABLE),
        ctx.config.debug,
    ))
}

pub async fn row_exists(pool: &Pool<Sqlite>, table: &'static str, id: i64) -> Result<bool, AppError> {
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE id = ?"))
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

/// Records a rejection when a referenced parent row is missing. `None` is
/// left to field validation.
pub async fn ensure_exists(
    pool: &Pool<Sqlite>,
    table: &'static str,
    id: Option<i64>,
    label: &str,
    rejections: &mut Rejections,
) -> Result<(), AppError> {
    if let Some(id) = id {
        if !row_exists(pool, table, id).await? {
            rejections.invalid(format!("Selected {} does not exist.", label));
        }
    }
    Ok(())
}

/// Records a conflict when another row already holds the natural key made up
/// of `columns`. The row being edited is excluded.
pub async fn ensure_unique(
    pool: &Pool<Sqlite>,
    table: &'static str,
    columns: &[(&'static str, SqlParam)],
    exclude_id: Option<i64>,
    message: String,
    rejections: &mut Rejections,
) -> Result<(), AppError> {
    let clause = columns
        .iter()
        .map(|(column, _)| format!("{column} = ?"))
        .collect::<Vec<_>>()
        .join(" AND ");
    let sql = format!("SELECT COUNT(*) FROM {table} WHERE {clause} AND id != ?");

    let mut params: Vec<SqlParam> = columns.iter().map(|(_, value)| value.clone()).collect();
    params.push(SqlParam::Integer(exclude_id.unwrap_or(-1)));

    let count: i64 = bind_scalar(sqlx::query_scalar(&sql), &params)
        .fetch_one(pool)
        .await?;

    if count > 0 {
        rejections.conflict(message);
    }
    Ok(())
}

/// Flips `is_active` and returns the new value, or `None` if no such row.
pub async fn toggle_active(
    pool: &Pool<Sqlite>,
    table: &'static str,
    id: i64,
    audit: &Audit,
) -> Result<Option<bool>, AppError> {
    let flag: Option<bool> = sqlx::query_scalar(&format!(
        "UPDATE {table} SET is_active = NOT is_active, updated_at = ?, updated_by_fk = ?
         WHERE id = ? RETURNING is_active"
    ))
    .bind(audit.at)
    .bind(audit.user_id)
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(flag)
}

pub async fn delete_row(pool: &Pool<Sqlite>, table: &'static str, id: i64) -> Result<u64, AppError> {
    let result = sqlx::query(&format!("DELETE FROM {table} WHERE id = ?"))
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Human-readable list of dependents that still reference `id`,
/// e.g. `["2 enrollment(s)"]`.
pub async fn dependent_counts(
    pool: &Pool<Sqlite>,
    dependents: &[Dependent],
    id: i64,
) -> Result<Vec<String>, AppError> {
    let mut blocking = Vec::new();
    for dependent in dependents {
        let count: i64 = sqlx::query_scalar(dependent.count_sql)
            .bind(id)
            .fetch_one(pool)
            .await?;
        if count > 0 {
            blocking.push(format!("{} {}(s)", count, dependent.label));
        }
    }
    Ok(blocking)
}
