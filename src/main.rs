use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = batchflow::cli::Cli::parse();

    if let Err(e) = batchflow::cli::run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(batchflow::cli::exit_code(&e));
    }
}
