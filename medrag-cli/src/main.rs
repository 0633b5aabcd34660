use clap::{Parser, Subcommand};
use medrag_cli::commands;
use tracing_subscriber::EnvFilter;

/// Build, query and serve clinical retrieval corpora
#[derive(Parser)]
#[command(name = "medrag", version, about)]
#[command(propagate_version = true)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed a corpus from a JSON-lines file and write its index and metadata
    Build(commands::BuildArgs),
    /// Print the nearest records of a corpus for a query text
    Query(commands::QueryArgs),
    /// Serve elicitation sessions and retrieval queries over HTTP
    Serve(commands::ServeArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Build(args) => commands::build(args).await,
        Commands::Query(args) => commands::query(args).await,
        Commands::Serve(args) => commands::serve(args).await,
    }
}
