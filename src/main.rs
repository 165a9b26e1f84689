//! s2i image harness CLI
//!
//! Runs the test matrix against the image named by `IMAGE_NAME`.

use std::sync::Arc;

use s2i_harness::harness::{TestMatrix, TestMatrixDriver, HARNESS_ERROR_EXIT};
use s2i_harness::process::TokioProcessRunner;
use s2i_harness::HarnessConfig;

#[tokio::main]
async fn main() {
    let config = HarnessConfig::load();

    // Initialize tracing
    let level = match &config {
        Ok(c) if c.debug => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map_or("s2i-harness", String::as_str);
    if args.iter().skip(1).any(|a| a == "-h" || a == "--help") {
        print_usage(program);
        return;
    }

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage(program);
            std::process::exit(HARNESS_ERROR_EXIT);
        }
    };

    let matrix = match args.get(1) {
        Some(path) => match TestMatrix::load(path) {
            Ok(matrix) => matrix,
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(HARNESS_ERROR_EXIT);
            }
        },
        None => TestMatrix::builtin(&config),
    };

    tracing::info!(
        image = %config.image_name,
        openshift_only = config.openshift_only,
        "starting test run"
    );

    let runner = Arc::new(TokioProcessRunner::new());
    let driver = match TestMatrixDriver::new(runner, config, matrix) {
        Ok(driver) => driver,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(HARNESS_ERROR_EXIT);
        }
    };

    match driver.run().await {
        Ok(report) => {
            println!("\n{}", "=".repeat(60));
            println!("{}", report);
            println!("{}", "=".repeat(60));
            std::process::exit(report.exit_code());
        }
        Err(e) => {
            eprintln!("Test run aborted: {}", e);
            std::process::exit(HARNESS_ERROR_EXIT);
        }
    }
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} [matrix.yaml]", program);
    eprintln!(
        "\nRuns the s2i image test matrix (built-in unless a YAML file is given)."
    );
    eprintln!("\nEnvironment variables:");
    eprintln!("  IMAGE_NAME          Image under test (required)");
    eprintln!("  TEST_PORT           Host port mapped to the application (default: 8080)");
    eprintln!("  OPENSHIFT_ONLY=1    Only build and test the reference application");
    eprintln!("  ALT_BASE=1          Image uses the alternate base variant");
    eprintln!("  DOTNET_VERSION      Expected runtime version series (default: 8.0)");
    eprintln!("  TEST_UID            Arbitrary user ID for the second web run (default: 12345)");
    eprintln!("  FIXTURES_DIR        Test application directory (default: test)");
    eprintln!("  DEBUG=1             Trace logging");
    eprintln!("  S2I_HARNESS_CONFIG  Optional TOML config file");
}
