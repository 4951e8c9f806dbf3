use asb_demo_cli::{initialize_logging, report, run, wait_for_termination, Cli};
use clap::Parser;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = initialize_logging(&cli.log_level, cli.json_logs) {
        report(&e.to_string());
        std::process::exit(e.exit_code());
    }

    // Exit with appropriate code based on how the run ended
    let exit_code = tokio::select! {
        result = run(&cli) => match result {
            Ok(outcome) => {
                info!(
                    sent = outcome.sent.len(),
                    received = outcome.received.map_or(0, |r| r.received),
                    "Run complete"
                );
                report("Normal Exit");
                0
            }
            Err(e) => {
                error!(error = %e, exit_code = e.exit_code(), "Run failed");
                report(&e.to_string());
                e.exit_code()
            }
        },
        signal = wait_for_termination() => {
            info!(exit_code = signal.exit_code(), "{}", signal.message());
            report(signal.message());
            signal.exit_code()
        }
    };

    std::process::exit(exit_code);
}
