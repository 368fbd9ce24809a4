mod run;

pub use run::{EXIT_SETUP_ERROR, RunArgs, cmd_run};
