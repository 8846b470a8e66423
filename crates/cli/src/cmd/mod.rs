mod check;
mod plan;
mod run;

pub use check::cmd_check;
pub use plan::cmd_plan;
pub use run::cmd_run;
