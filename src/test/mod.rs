pub mod utils;

mod api;
mod config;
mod grid;
mod term_import;

pub use utils::{test_db, test_utils};
