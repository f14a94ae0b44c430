use std::path::PathBuf;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let root = std::env::args().nth(1).map(PathBuf::from);
    match streakgrid::run(root).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("streakgrid: {error}");
            ExitCode::FAILURE
        }
    }
}
