mod reset;
mod run;
mod status;

pub use reset::run_reset;
pub use run::{run_engine, RunOptions};
pub use status::run_status;
