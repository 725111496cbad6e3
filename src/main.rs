use clap::Parser;
use polyarb::cli::{self, Cli};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let code = cli::run(cli).await;
    std::process::exit(code);
}
