//! One module per managed table: its grid endpoint, its mutation rules and
//! its admin page.

pub mod assessment;
pub mod course;
pub mod enrollment;
pub mod institution;
pub mod institutional_outcome;
pub mod program;
pub mod program_outcome;
pub mod section;
pub mod slo;
pub mod student;
pub mod term;
pub mod term_import;
pub mod user;

use rocket::Route;

/// Mounted under `/data`.
pub fn data_routes() -> Vec<Route> {
    routes![
        institution::institution_grid,
        institutional_outcome::institutional_outcome_grid,
        program::program_grid,
        program_outcome::program_outcome_grid,
        course::course_grid,
        term::term_grid,
        section::section_grid,
        slo::slo_grid,
        student::student_grid,
        enrollment::enrollment_grid,
        assessment::assessment_grid,
        user::user_grid,
    ]
}

/// Mounted under `/admin`.
pub fn admin_routes() -> Vec<Route> {
    routes![
        institution::institution_page,
        institution::institution_mutate,
        institutional_outcome::institutional_outcome_page,
        institutional_outcome::institutional_outcome_mutate,
        program::program_page,
        program::program_mutate,
        program_outcome::program_outcome_page,
        program_outcome::program_outcome_mutate,
        course::course_page,
        course::course_mutate,
        term::term_page,
        term::term_mutate,
        term_import::term_import,
        section::section_page,
        section::section_mutate,
        slo::slo_page,
        slo::slo_mutate,
        student::student_page,
        student::student_mutate,
        enrollment::enrollment_page,
        enrollment::enrollment_mutate,
        assessment::assessment_page,
        assessment::assessment_mutate,
        user::user_page,
        user::user_mutate,
    ]
}
