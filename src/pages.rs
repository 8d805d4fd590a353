//! Minimal server-rendered shells. The grid itself is filled in by the
//! browser from `/data/<entity>`; the page only carries the column headers,
//! the form token and an optional banner.

use rocket::response::content::RawHtml;

use crate::auth::RequestContext;
use crate::error::AppError;
use crate::grid::GridSpec;
use crate::grid::present::escape_html;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub kind: BannerKind,
    pub message: String,
}

impl Banner {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: BannerKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: BannerKind::Error,
            message: message.into(),
        }
    }

    pub fn from_outcome(outcome: Result<String, AppError>, context: &str, debug: bool) -> Self {
        match outcome {
            Ok(message) => Banner::success(message),
            Err(err) => {
                err.log_and_record(context);
                Banner::error(err.public_message(debug))
            }
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == BannerKind::Success
    }

    fn render(&self) -> String {
        let class = match self.kind {
            BannerKind::Success => "alert-success",
            BannerKind::Error => "alert-danger",
        };
        format!(
            r#"<div class="alert {}" role="alert">{}</div>"#,
            class,
            escape_html(&self.message)
        )
    }
}

/// Static description of one admin page.
#[derive(Debug, Clone, Copy)]
pub struct AdminPage {
    pub title: &'static str,
    /// Path segment under `/admin` and `/data`.
    pub path: &'static str,
    /// Names of the form fields the edit dialog posts.
    pub fields: &'static [&'static str],
    /// Path under `/admin` accepting a CSV upload, if the page has one.
    pub upload: Option<&'static str>,
}

fn render_upload_form(path: &str, csrf: &str) -> String {
    format!(
        r#"<form id="import-form" method="post" action="/admin/{path}" enctype="multipart/form-data">
<input type="hidden" name="csrf_token" value="{csrf}">
<label>CSV file<input type="file" name="file" accept=".csv,text/csv"></label>
<button type="submit">Import</button>
</form>"#,
        path = escape_html(path),
        csrf = csrf,
    )
}

pub fn render_grid_page(
    ctx: &RequestContext,
    page: &AdminPage,
    grid: &GridSpec,
    banner: Option<&Banner>,
) -> RawHtml<String> {
    let headers: String = grid
        .titles()
        .iter()
        .map(|title| format!("<th>{}</th>", escape_html(title)))
        .collect();

    let inputs: String = page
        .fields
        .iter()
        .map(|field| {
            format!(
                r#"<label>{0}<input name="{0}" id="field-{0}"></label>"#,
                escape_html(field)
            )
        })
        .collect();

    let banner = banner.map(Banner::render).unwrap_or_default();
    let csrf = escape_html(&ctx.csrf_token);
    let upload = page
        .upload
        .map(|path| render_upload_form(path, &csrf))
        .unwrap_or_default();

    RawHtml(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="csrf-token" content="{csrf}">
<title>{title}</title>
</head>
<body>
<header><span class="user">{user}</span></header>
<main>
<h1>{title}</h1>
{banner}
<table id="grid" class="table" data-source="/data/{path}" data-default-sort="{default_sort}">
<thead><tr>{headers}</tr></thead>
<tbody></tbody>
</table>
<form id="entity-form" method="post" action="/admin/{path}">
<input type="hidden" name="csrf_token" value="{csrf}">
<input type="hidden" name="action" value="add">
<input type="hidden" name="id" value="">
{inputs}
<button type="submit">Save</button>
</form>
{upload}
</main>
</body>
</html>"#,
        csrf = csrf,
        title = escape_html(page.title),
        user = escape_html(&ctx.user.display_name),
        banner = banner,
        path = page.path,
        default_sort = grid.default_sort,
        headers = headers,
        inputs = inputs,
        upload = upload,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_escapes_message() {
        let rendered = Banner::error("<b>bad</b>").render();
        assert!(rendered.contains("alert-danger"));
        assert!(rendered.contains("&lt;b&gt;bad&lt;/b&gt;"));
    }

    #[test]
    fn outcome_hides_database_detail_unless_debugging() {
        let outcome: Result<String, AppError> = Err(AppError::Internal("disk on fire".to_string()));
        let banner = Banner::from_outcome(outcome, "test", false);
        assert!(!banner.is_success());
        assert!(!banner.message.contains("disk on fire"));

        let outcome: Result<String, AppError> = Err(AppError::Internal("disk on fire".to_string()));
        let banner = Banner::from_outcome(outcome, "test", true);
        assert!(banner.message.contains("disk on fire"));
    }

    #[test]
    fn user_facing_errors_are_shown_verbatim() {
        let outcome: Result<String, AppError> =
            Err(AppError::Conflict("Student ID 'S1' already exists.".to_string()));
        let banner = Banner::from_outcome(outcome, "test", false);
        assert_eq!(banner.message, "Student ID 'S1' already exists.");
    }
}
