use rocket::form::Form;
use rocket::response::content::RawHtml;
use rocket::{FromForm, State};
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use validator::{Validate, ValidationError};

use crate::auth::{Permission, RequestContext, Role};
use crate::error::AppError;
use crate::grid::{
    self, EntityFilter, GridColumn, GridParams, GridResult, GridSource, GridSpec, SortDirection,
    SqlParam, present,
};
use crate::mutation::{self, Audit, Dependent, Entity, Mutation, MutationAction, Rejections};
use crate::pages::{AdminPage, render_grid_page};
use crate::validation::{USERNAME_RE, clean};

fn validate_role(value: &str) -> Result<(), ValidationError> {
    Role::from_str(value).map(|_| ()).map_err(|_| {
        ValidationError::new("role").with_message(
            format!(
                "'{}' is not a valid role (admin, coordinator or viewer).",
                value
            )
            .into(),
        )
    })
}

pub struct Users;

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub role: String,
    pub is_active: bool,
}

#[derive(Serialize)]
struct UserPayload<'a> {
    id: i64,
    username: &'a str,
    display_name: &'a str,
    email: &'a str,
    role: &'a str,
}

impl GridSource for Users {
    type Row = UserRow;

    const GRID: GridSpec = GridSpec {
        name: "users",
        from: "users u",
        select: "u.id, u.username, u.display_name, u.email, u.role, u.is_active",
        key: "u.id",
        columns: &[
            GridColumn::integer("ID", "u.id"),
            GridColumn::text("Username", "u.username"),
            GridColumn::text("Display Name", "u.display_name"),
            GridColumn::text("Email", "u.email"),
            GridColumn::status("Role", "u.role"),
            GridColumn::boolean("Status", "u.is_active"),
            GridColumn::actions(),
        ],
        filters: &[
            EntityFilter::status("role", "u.role"),
            EntityFilter::boolean("active", "u.is_active"),
        ],
        default_sort: 1,
        default_dir: SortDirection::Asc,
    };
    const PERMISSION: Permission = Permission::ManageUsers;

    fn present(row: &UserRow) -> Vec<String> {
        vec![
            row.id.to_string(),
            present::text(&row.username),
            present::text(&row.display_name),
            present::text(&row.email),
            present::status_badge(&row.role),
            present::badge(row.is_active),
            present::actions(
                PAGE.path,
                row.id,
                &UserPayload {
                    id: row.id,
                    username: &row.username,
                    display_name: &row.display_name,
                    email: &row.email,
                    role: &row.role,
                },
                row.is_active,
            ),
        ]
    }
}

#[derive(Debug, FromForm)]
pub struct UserForm {
    csrf_token: Option<String>,
    action: Option<MutationAction>,
    id: Option<i64>,
    username: Option<String>,
    display_name: Option<String>,
    email: Option<String>,
    role: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Validate)]
pub struct UserDraft {
    #[validate(
        length(min = 3, max = 50, message = "Username must be 3 to 50 characters."),
        regex(path = *USERNAME_RE, message = "Username may only contain lowercase letters, digits, '.' and '_'.")
    )]
    pub username: String,
    #[validate(length(max = 100, message = "Display name must be at most 100 characters."))]
    pub display_name: String,
    #[validate(email(message = "Email address is not valid."))]
    pub email: String,
    #[validate(custom(function = "validate_role"))]
    pub role: String,
    /// Blank on edit keeps the current password.
    #[validate(length(min = 8, max = 128, message = "Password must be 8 to 128 characters."))]
    pub password: Option<String>,
}

impl UserForm {
    fn draft(&self) -> UserDraft {
        let username = clean(&self.username).unwrap_or_default().to_lowercase();
        UserDraft {
            display_name: clean(&self.display_name).unwrap_or_else(|| username.clone()),
            username,
            email: clean(&self.email).unwrap_or_default().to_lowercase(),
            role: clean(&self.role)
                .map(|role| role.to_lowercase())
                .unwrap_or_else(|| Role::Viewer.as_str().to_string()),
            password: self.password.clone().filter(|p| !p.is_empty()),
        }
    }

    fn to_mutation(&self) -> Result<Mutation<UserDraft>, AppError> {
        Mutation::from_action(self.action, self.id, || self.draft())
    }
}

fn refuse_self(ctx: &RequestContext, id: i64, message: &str, rejections: &mut Rejections) {
    if ctx.user.id == id {
        rejections.invalid(message);
    }
}

#[rocket::async_trait]
impl Entity for Users {
    const TABLE: &'static str = "users";
    const LABEL: &'static str = "User";
    const DEPENDENTS: &'static [Dependent] = &[];
    const PERMISSION: Permission = Permission::ManageUsers;

    type Draft = UserDraft;

    async fn check(
        pool: &Pool<Sqlite>,
        draft: &UserDraft,
        current_id: Option<i64>,
        rejections: &mut Rejections,
    ) -> Result<(), AppError> {
        if current_id.is_none() && draft.password.is_none() {
            rejections.invalid("A password is required for new users.");
        }

        mutation::ensure_unique(
            pool,
            Self::TABLE,
            &[("username", SqlParam::Text(draft.username.clone()))],
            current_id,
            format!("Username '{}' is already taken.", draft.username),
            rejections,
        )
        .await?;

        mutation::ensure_unique(
            pool,
            Self::TABLE,
            &[("email", SqlParam::Text(draft.email.clone()))],
            current_id,
            format!("Email '{}' is already used by another user.", draft.email),
            rejections,
        )
        .await
    }

    async fn insert(pool: &Pool<Sqlite>, draft: &UserDraft, audit: &Audit) -> Result<i64, AppError> {
        let password = draft
            .password
            .as_deref()
            .ok_or_else(|| AppError::Validation("A password is required for new users.".to_string()))?;
        let hashed_password = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;

        let res = sqlx::query(
            "INSERT INTO users
             (username, email, password, display_name, role, is_active, created_at, updated_at, created_by_fk, updated_by_fk)
             VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?, ?)",
        )
        .bind(&draft.username)
        .bind(&draft.email)
        .bind(hashed_password)
        .bind(&draft.display_name)
        .bind(&draft.role)
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
        draft: &UserDraft,
        audit: &Audit,
    ) -> Result<u64, AppError> {
        let res = sqlx::query(
            "UPDATE users
             SET username = ?, email = ?, display_name = ?, role = ?, updated_at = ?, updated_by_fk = ?
             WHERE id = ?",
        )
        .bind(&draft.username)
        .bind(&draft.email)
        .bind(&draft.display_name)
        .bind(&draft.role)
        .bind(audit.at)
        .bind(audit.user_id)
        .bind(id)
        .execute(pool)
        .await?;

        if let Some(password) = draft.password.as_deref() {
            let hashed_password = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;
            sqlx::query("UPDATE users SET password = ? WHERE id = ?")
                .bind(hashed_password)
                .bind(id)
                .execute(pool)
                .await?;
        }

        Ok(res.rows_affected())
    }

    async fn guard_toggle(
        _pool: &Pool<Sqlite>,
        ctx: &RequestContext,
        id: i64,
        rejections: &mut Rejections,
    ) -> Result<(), AppError> {
        refuse_self(ctx, id, "You cannot deactivate your own account.", rejections);
        Ok(())
    }

    async fn guard_delete(
        _pool: &Pool<Sqlite>,
        ctx: &RequestContext,
        id: i64,
        rejections: &mut Rejections,
    ) -> Result<(), AppError> {
        refuse_self(ctx, id, "You cannot delete your own account.", rejections);
        Ok(())
    }
}

pub const PAGE: AdminPage = AdminPage {
    title: "Users",
    path: "users",
    upload: None,
    fields: &["username", "display_name", "email", "role", "password"],
};

#[get("/users")]
pub async fn user_grid(
    ctx: RequestContext,
    params: GridParams,
    db: &State<Pool<Sqlite>>,
) -> GridResult {
    grid::serve::<Users>(&ctx, db, params).await
}

#[get("/users")]
pub async fn user_page(ctx: RequestContext) -> Result<RawHtml<String>, AppError> {
    ctx.require(Permission::ManageUsers)?;
    Ok(render_grid_page(&ctx, &PAGE, &Users::GRID, None))
}

#[post("/users", data = "<form>")]
pub async fn user_mutate(
    ctx: RequestContext,
    form: Form<UserForm>,
    db: &State<Pool<Sqlite>>,
) -> Result<RawHtml<String>, AppError> {
    let banner =
        mutation::handle::<Users>(db, &ctx, form.csrf_token.as_deref(), form.to_mutation()).await?;
    Ok(render_grid_page(&ctx, &PAGE, &Users::GRID, Some(&banner)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_are_checked_by_name() {
        assert!(validate_role("coordinator").is_ok());
        assert!(validate_role("superuser").is_err());
    }

    #[test]
    fn blank_password_means_unchanged() {
        let form = UserForm {
            csrf_token: None,
            action: Some(MutationAction::Edit),
            id: Some(3),
            username: Some(" JDoe ".to_string()),
            display_name: None,
            email: Some("JDoe@Example.edu".to_string()),
            role: None,
            password: Some(String::new()),
        };
        let draft = form.draft();
        assert_eq!(draft.username, "jdoe");
        assert_eq!(draft.display_name, "jdoe");
        assert_eq!(draft.email, "jdoe@example.edu");
        assert_eq!(draft.role, "viewer");
        assert_eq!(draft.password, None);
        assert!(draft.validate().is_ok());
    }
}
