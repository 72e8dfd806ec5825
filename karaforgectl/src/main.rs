use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = karaforgectl::Cli::parse();
    if let Err(err) = karaforgectl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
