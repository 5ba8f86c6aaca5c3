use strongroom::{cli, StrongroomError};

#[tokio::main]
async fn main() {
    // Load .env file if it exists; must happen before any config is read
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        let code = e.downcast_ref::<StrongroomError>().map_or(1, StrongroomError::exit_code);
        std::process::exit(code);
    }
}
