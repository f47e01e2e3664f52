//! CLI command handlers. Each command is in its own file for clarity.

mod check;
mod run;
mod status;

pub use check::run_check;
pub use run::run_engine;
pub use status::run_status;
