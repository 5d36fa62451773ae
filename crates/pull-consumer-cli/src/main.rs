use pull_consumer_cli::run_cli;
use tracing::error;

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        // Logging may not be initialized yet when configuration fails
        error!(error = %e, "CLI error");
        eprintln!("error: {}", e);

        std::process::exit(e.exit_code());
    }
}
