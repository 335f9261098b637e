use clap::Parser;
use shoreline::terminal::{app, cli::Cli};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(err) = app::run(cli).await {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}
