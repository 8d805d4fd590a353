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

pub struct LearningOutcomes;

#[derive(Debug, sqlx::FromRow)]
pub struct LearningOutcomeRow {
    pub id: i64,
    pub course_fk: i64,
    pub course_code: String,
    pub program_outcome_fk: Option<i64>,
    pub program_outcome_code: Option<String>,
    pub slo_code: String,
    pub description: String,
    pub assessment_method: String,
    pub sequence_num: i64,
    pub is_active: bool,
}

#[derive(Serialize)]
struct LearningOutcomePayload<'a> {
    id: i64,
    course_fk: i64,
    program_outcome_fk: Option<i64>,
    slo_code: &'a str,
    description: &'a str,
    assessment_method: &'a str,
    sequence_num: i64,
}

impl GridSource for LearningOutcomes {
    type Row = LearningOutcomeRow;

    const GRID: GridSpec = GridSpec {
        name: "slos",
        from: "student_learning_outcomes slo \
               JOIN courses c ON c.id = slo.course_fk \
               LEFT JOIN program_outcomes po ON po.id = slo.program_outcome_fk",
        select: "slo.id, slo.course_fk, c.course_code, slo.program_outcome_fk, \
                 po.code AS program_outcome_code, slo.slo_code, slo.description, \
                 slo.assessment_method, slo.sequence_num, slo.is_active",
        key: "slo.id",
        columns: &[
            GridColumn::integer("ID", "slo.id"),
            GridColumn::text("Course", "c.course_code"),
            GridColumn::text("Code", "slo.slo_code"),
            GridColumn::text("Description", "slo.description"),
            GridColumn::text("Program Outcome", "po.code"),
            GridColumn::text("Assessment Method", "slo.assessment_method"),
            GridColumn::integer("Sequence", "slo.sequence_num").unsearchable(),
            GridColumn::boolean("Status", "slo.is_active"),
            GridColumn::actions(),
        ],
        filters: &[
            EntityFilter::integer("course_fk", "slo.course_fk"),
            EntityFilter::boolean("active", "slo.is_active"),
        ],
        default_sort: 1,
        default_dir: SortDirection::Asc,
    };

    fn present(row: &LearningOutcomeRow) -> Vec<String> {
        vec![
            row.id.to_string(),
            present::text(&row.course_code),
            present::text(&row.slo_code),
            present::truncate(&row.description, present::TRUNCATE_AT),
            present::optional(row.program_outcome_code.as_deref()),
            present::truncate(&row.assessment_method, present::TRUNCATE_AT),
            row.sequence_num.to_string(),
            present::badge(row.is_active),
            present::actions(
                PAGE.path,
                row.id,
                &LearningOutcomePayload {
                    id: row.id,
                    course_fk: row.course_fk,
                    program_outcome_fk: row.program_outcome_fk,
                    slo_code: &row.slo_code,
                    description: &row.description,
                    assessment_method: &row.assessment_method,
                    sequence_num: row.sequence_num,
                },
                row.is_active,
            ),
        ]
    }
}

#[derive(Debug, FromForm)]
pub struct LearningOutcomeForm {
    csrf_token: Option<String>,
    action: Option<MutationAction>,
    id: Option<i64>,
    course_fk: Option<i64>,
    program_outcome_fk: Option<i64>,
    slo_code: Option<String>,
    description: Option<String>,
    assessment_method: Option<String>,
    sequence_num: Option<i64>,
}

#[derive(Debug, Validate)]
pub struct LearningOutcomeDraft {
    #[validate(required(message = "Course is required."))]
    pub course_fk: Option<i64>,
    pub program_outcome_fk: Option<i64>,
    #[validate(
        length(min = 1, max = 20, message = "SLO code is required (max 20 characters)."),
        regex(path = *CODE_RE, message = "SLO code may only contain letters, digits, '.', '-' and '_'.")
    )]
    pub slo_code: String,
    #[validate(length(min = 1, max = 2000, message = "Description is required (max 2000 characters)."))]
    pub description: String,
    #[validate(length(max = 500, message = "Assessment method must be at most 500 characters."))]
    pub assessment_method: String,
    #[validate(range(min = 0, max = 999, message = "Sequence must be between 0 and 999."))]
    pub sequence_num: i64,
}

impl LearningOutcomeForm {
    fn draft(&self) -> LearningOutcomeDraft {
        LearningOutcomeDraft {
            course_fk: self.course_fk,
            program_outcome_fk: self.program_outcome_fk,
            slo_code: clean(&self.slo_code).unwrap_or_default().to_uppercase(),
            description: clean(&self.description).unwrap_or_default(),
            assessment_method: clean(&self.assessment_method).unwrap_or_default(),
            sequence_num: self.sequence_num.unwrap_or(0),
        }
    }

    fn to_mutation(&self) -> Result<Mutation<LearningOutcomeDraft>, AppError> {
        Mutation::from_action(self.action, self.id, || self.draft())
    }
}

/// The mapped program outcome has to come from the program offering the course.
async fn outcome_matches_course(
    pool: &Pool<Sqlite>,
    course_fk: i64,
    program_outcome_fk: i64,
) -> Result<bool, AppError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM courses c
         JOIN program_outcomes po ON po.program_fk = c.program_fk
         WHERE c.id = ? AND po.id = ?",
    )
    .bind(course_fk)
    .bind(program_outcome_fk)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

#[rocket::async_trait]
impl Entity for LearningOutcomes {
    const TABLE: &'static str = "student_learning_outcomes";
    const LABEL: &'static str = "Student learning outcome";
    const DEPENDENTS: &'static [Dependent] = &[Dependent::new(
        "assessment",
        "SELECT COUNT(*) FROM assessments WHERE student_learning_outcome_fk = ?",
    )];

    type Draft = LearningOutcomeDraft;

    async fn check(
        pool: &Pool<Sqlite>,
        draft: &LearningOutcomeDraft,
        current_id: Option<i64>,
        rejections: &mut Rejections,
    ) -> Result<(), AppError> {
        mutation::ensure_exists(pool, "courses", draft.course_fk, "course", rejections).await?;
        mutation::ensure_exists(
            pool,
            "program_outcomes",
            draft.program_outcome_fk,
            "program outcome",
            rejections,
        )
        .await?;

        let Some(course_fk) = draft.course_fk else {
            return Ok(());
        };

        if let Some(outcome_fk) = draft.program_outcome_fk {
            if mutation::row_exists(pool, "program_outcomes", outcome_fk).await?
                && !outcome_matches_course(pool, course_fk, outcome_fk).await?
            {
                rejections.invalid("The program outcome must belong to the course's program.");
            }
        }

        mutation::ensure_unique(
            pool,
            Self::TABLE,
            &[
                ("course_fk", SqlParam::Integer(course_fk)),
                ("slo_code", SqlParam::Text(draft.slo_code.clone())),
            ],
            current_id,
            format!("SLO code '{}' already exists for this course.", draft.slo_code),
            rejections,
        )
        .await
    }

    async fn insert(
        pool: &Pool<Sqlite>,
        draft: &LearningOutcomeDraft,
        audit: &Audit,
    ) -> Result<i64, AppError> {
        let res = sqlx::query(
            "INSERT INTO student_learning_outcomes
             (course_fk, program_outcome_fk, slo_code, description, assessment_method, sequence_num,
              is_active, created_at, updated_at, created_by_fk, updated_by_fk)
             VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)",
        )
        .bind(draft.course_fk)
        .bind(draft.program_outcome_fk)
        .bind(&draft.slo_code)
        .bind(&draft.description)
        .bind(&draft.assessment_method)
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
        draft: &LearningOutcomeDraft,
        audit: &Audit,
    ) -> Result<u64, AppError> {
        let res = sqlx::query(
            "UPDATE student_learning_outcomes
             SET course_fk = ?, program_outcome_fk = ?, slo_code = ?, description = ?,
                 assessment_method = ?, sequence_num = ?, updated_at = ?, updated_by_fk = ?
             WHERE id = ?",
        )
        .bind(draft.course_fk)
        .bind(draft.program_outcome_fk)
        .bind(&draft.slo_code)
        .bind(&draft.description)
        .bind(&draft.assessment_method)
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
    title: "Student Learning Outcomes",
    path: "slos",
    upload: None,
    fields: &[
        "course_fk",
        "program_outcome_fk",
        "slo_code",
        "description",
        "assessment_method",
        "sequence_num",
    ],
};

#[get("/slos")]
pub async fn slo_grid(
    ctx: RequestContext,
    params: GridParams,
    db: &State<Pool<Sqlite>>,
) -> GridResult {
    grid::serve::<LearningOutcomes>(&ctx, db, params).await
}

#[get("/slos")]
pub async fn slo_page(ctx: RequestContext) -> Result<RawHtml<String>, AppError> {
    ctx.require(Permission::ViewRecords)?;
    Ok(render_grid_page(&ctx, &PAGE, &LearningOutcomes::GRID, None))
}

#[post("/slos", data = "<form>")]
pub async fn slo_mutate(
    ctx: RequestContext,
    form: Form<LearningOutcomeForm>,
    db: &State<Pool<Sqlite>>,
) -> Result<RawHtml<String>, AppError> {
    let banner = mutation::handle::<LearningOutcomes>(
        db,
        &ctx,
        form.csrf_token.as_deref(),
        form.to_mutation(),
    )
    .await?;
    Ok(render_grid_page(
        &ctx,
        &PAGE,
        &LearningOutcomes::GRID,
        Some(&banner),
    ))
}
