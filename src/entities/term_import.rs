//! Bulk term upsert from an uploaded CSV file. Each row is validated on its
//! own; good rows are written even when others are rejected.

use csv::{ReaderBuilder, Trim};
use rocket::data::{Capped, Limits};
use rocket::form::Form;
use rocket::fs::TempFile;
use rocket::response::content::RawHtml;
use rocket::tokio::io::AsyncReadExt;
use rocket::{FromForm, State};
use serde::Deserialize;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument, warn};
use validator::Validate;

use super::term::{PAGE, TermDraft, Terms, insert_term};
use crate::auth::{Permission, RequestContext};
use crate::error::AppError;
use crate::grid::GridSource;
use crate::mutation::Audit;
use crate::pages::{Banner, render_grid_page};
use crate::validation::validation_messages;

pub const EXPECTED_HEADER: [&str; 5] = ["term_code", "term_name", "start_date", "end_date", "is_active"];

#[derive(Debug, Deserialize)]
struct TermRecord {
    term_code: String,
    term_name: String,
    start_date: String,
    end_date: String,
    #[serde(default)]
    is_active: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    /// 1-based line in the file; the header is line 1.
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ParsedTerm {
    pub row: usize,
    pub draft: TermDraft,
    pub is_active: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub inserted: usize,
    pub updated: usize,
    pub errors: Vec<RowError>,
}

impl ImportReport {
    pub fn summary(&self) -> String {
        let mut message = format!(
            "Import complete: {} inserted, {} updated.",
            self.inserted, self.updated
        );
        if !self.errors.is_empty() {
            message.push_str(&format!(" {} row(s) rejected:", self.errors.len()));
            for error in &self.errors {
                message.push_str(&format!(" Row {}: {}", error.row, error.message));
            }
        }
        message
    }

    pub fn into_banner(self) -> Banner {
        if self.errors.is_empty() {
            Banner::success(self.summary())
        } else {
            Banner::error(self.summary())
        }
    }
}

pub fn parse_active(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "" | "1" | "true" | "yes" | "active" => Some(true),
        "0" | "false" | "no" | "inactive" => Some(false),
        _ => None,
    }
}

/// Splits the file into valid drafts and per-row errors. Only a missing or
/// wrong header fails the whole file.
pub fn parse_terms(data: &str) -> Result<(Vec<ParsedTerm>, Vec<RowError>), AppError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(data.as_bytes());

    let headers = reader.headers()?.clone();
    let matches = headers.len() == EXPECTED_HEADER.len()
        && headers
            .iter()
            .zip(EXPECTED_HEADER)
            .all(|(found, expected)| found.eq_ignore_ascii_case(expected));
    if !matches {
        return Err(AppError::Validation(format!(
            "The CSV header must be: {}.",
            EXPECTED_HEADER.join(",")
        )));
    }

    let mut parsed = Vec::new();
    let mut errors = Vec::new();

    for (idx, result) in reader.deserialize::<TermRecord>().enumerate() {
        let row = idx + 2;
        let record = match result {
            Ok(record) => record,
            Err(err) => {
                errors.push(RowError {
                    row,
                    message: format!("Unreadable row ({}).", err),
                });
                continue;
            }
        };

        let draft = TermDraft::new(
            &record.term_code,
            &record.term_name,
            &record.start_date,
            &record.end_date,
        );

        let mut problems = match draft.validate() {
            Ok(()) => Vec::new(),
            Err(errs) => validation_messages(&errs),
        };
        if let Some(message) = draft.range_error() {
            problems.push(message.to_string());
        }
        let is_active = parse_active(&record.is_active);
        if is_active.is_none() {
            problems.push(format!(
                "'{}' is not a valid is_active value.",
                record.is_active
            ));
        }

        match is_active {
            Some(is_active) if problems.is_empty() => parsed.push(ParsedTerm {
                row,
                draft,
                is_active,
            }),
            _ => errors.push(RowError {
                row,
                message: problems.join(" "),
            }),
        }
    }

    Ok((parsed, errors))
}

async fn upsert_term(pool: &Pool<Sqlite>, term: &ParsedTerm, audit: &Audit) -> Result<bool, AppError> {
    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM terms WHERE term_code = ?")
        .bind(&term.draft.term_code)
        .fetch_optional(pool)
        .await?;

    match existing {
        Some(id) => {
            sqlx::query(
                "UPDATE terms
                 SET term_name = ?, start_date = ?, end_date = ?, is_active = ?, updated_at = ?, updated_by_fk = ?
                 WHERE id = ?",
            )
            .bind(&term.draft.term_name)
            .bind(&term.draft.start_date)
            .bind(&term.draft.end_date)
            .bind(term.is_active)
            .bind(audit.at)
            .bind(audit.user_id)
            .bind(id)
            .execute(pool)
            .await?;
            Ok(false)
        }
        None => {
            insert_term(pool, &term.draft, term.is_active, audit).await?;
            Ok(true)
        }
    }
}

#[instrument(skip(pool, data), fields(user_id = audit.user_id, bytes = data.len()))]
pub async fn import_terms(
    pool: &Pool<Sqlite>,
    data: &str,
    audit: &Audit,
) -> Result<ImportReport, AppError> {
    let (terms, errors) = parse_terms(data)?;
    let mut report = ImportReport {
        errors,
        ..ImportReport::default()
    };

    for term in &terms {
        match upsert_term(pool, term, audit).await {
            Ok(true) => report.inserted += 1,
            Ok(false) => report.updated += 1,
            Err(err) => {
                err.log_and_record("Term import row");
                report.errors.push(RowError {
                    row: term.row,
                    message: err.public_message(false),
                });
            }
        }
    }
    report.errors.sort_by_key(|error| error.row);

    if report.errors.is_empty() {
        info!(report.inserted, report.updated, "Terms imported");
    } else {
        warn!(
            report.inserted,
            report.updated,
            rejected = report.errors.len(),
            "Terms imported with rejected rows"
        );
    }

    Ok(report)
}

#[derive(Debug, FromForm)]
pub struct TermImportForm<'r> {
    csrf_token: Option<String>,
    file: Option<Capped<TempFile<'r>>>,
}

/// Reads the uploaded file as UTF-8 text. A stream cut off at the `file`
/// limit is refused rather than parsed as a shorter file.
async fn read_upload(upload: &Capped<TempFile<'_>>, limits: &Limits) -> Result<String, AppError> {
    if !upload.is_complete() {
        let limit = limits
            .find(["file", "csv"])
            .map(|limit| limit.to_string())
            .unwrap_or_else(|| "upload".to_string());
        return Err(AppError::Validation(format!(
            "The CSV file is larger than the {} limit and was not imported.",
            limit
        )));
    }

    let reader = upload
        .open()
        .await
        .map_err(|err| AppError::Internal(format!("Failed to open uploaded file: {}", err)))?;
    rocket::tokio::pin!(reader);

    let mut data = String::new();
    reader
        .read_to_string(&mut data)
        .await
        .map_err(|_| AppError::Validation("The CSV file must be UTF-8 text.".to_string()))?;

    Ok(data)
}

#[post("/terms/import", data = "<form>")]
pub async fn term_import(
    ctx: RequestContext,
    form: Form<TermImportForm<'_>>,
    limits: &Limits,
    db: &State<Pool<Sqlite>>,
) -> Result<RawHtml<String>, AppError> {
    ctx.verify_csrf(form.csrf_token.as_deref())?;
    ctx.require(Permission::ImportTerms)?;

    let data = match &form.file {
        Some(upload) => read_upload(upload, limits).await,
        None => Ok(String::new()),
    };

    let outcome = match data {
        Ok(data) if data.trim().is_empty() => {
            Err(AppError::Validation("Choose a CSV file to import.".to_string()))
        }
        Ok(data) => import_terms(db, data.trim(), &Audit::from(&ctx)).await,
        Err(err) => Err(err),
    };

    let banner = match outcome {
        Ok(report) => report.into_banner(),
        Err(err) => Banner::from_outcome(Err(err), "Term import", ctx.config.debug),
    };

    Ok(render_grid_page(&ctx, &PAGE, &Terms::GRID, Some(&banner)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_flag_keywords() {
        for value in ["1", "true", "YES", "Active", ""] {
            assert_eq!(parse_active(value), Some(true), "{value}");
        }
        for value in ["0", "false", "no", "INACTIVE"] {
            assert_eq!(parse_active(value), Some(false), "{value}");
        }
        assert_eq!(parse_active("maybe"), None);
    }

    #[test]
    fn wrong_header_rejects_whole_file() {
        let result = parse_terms("code,name,start,end,active\nFA25,Fall,2025-08-25,2025-12-15,1\n");
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn bad_rows_are_reported_with_line_numbers() {
        let data = "term_code,term_name,start_date,end_date,is_active\n\
                    fa25,Fall 2025,2025-08-25,2025-12-15,yes\n\
                    SP26,Spring 2026,2026-05-08,2026-01-12,1\n\
                    SU26,,2026-06-01,2026-08-01,sometimes\n\
                    WI26,Winter 2026,2026-01-02,2026-01-20,inactive\n";

        let (parsed, errors) = parse_terms(data).unwrap();

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].draft.term_code, "FA25");
        assert!(parsed[0].is_active);
        assert_eq!(parsed[1].row, 5);
        assert!(!parsed[1].is_active);

        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].row, 3);
        assert!(errors[0].message.contains("End date must be on or after"));
        assert_eq!(errors[1].row, 4);
        assert!(errors[1].message.contains("Term name is required"));
        assert!(errors[1].message.contains("'sometimes'"));
    }

    #[test]
    fn summary_lists_rejected_rows() {
        let report = ImportReport {
            inserted: 2,
            updated: 1,
            errors: vec![RowError {
                row: 4,
                message: "Term name is required (max 100 characters).".to_string(),
            }],
        };
        assert_eq!(
            report.summary(),
            "Import complete: 2 inserted, 1 updated. 1 row(s) rejected: Row 4: Term name is required (max 100 characters)."
        );
        assert!(!report.into_banner().is_success());
    }
}
