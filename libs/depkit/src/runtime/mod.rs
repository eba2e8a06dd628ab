mod runner;

pub use runner::{run, run_with_config, RunOptions, ShutdownOptions};
