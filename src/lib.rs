pub mod cli;
pub mod commands;
pub mod config;
pub mod console;
pub mod outputs;
pub mod readiness;
pub mod runner;
pub mod setup;
pub mod teardown;

use tracing_subscriber::EnvFilter;

/// Run the command line interface and return an exit code.
pub fn run_cli() -> i32 {
    init_tracing();

    match cli::run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{}", console::failure(&format!("Error: {err:#}")));
            1
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
