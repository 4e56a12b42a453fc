use std::process::ExitCode;

use clap::Parser;

use smartcompose::config::AppConfig;
use smartcompose::server;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Set the server host address
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Set the server port
    #[arg(long, default_value = "8000")]
    port: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // A missing .env file is fine, the environment may be set directly
    dotenvy::dotenv().ok();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server::serve(args.host, args.port, config).await {
        eprintln!("Server error: {:#}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
