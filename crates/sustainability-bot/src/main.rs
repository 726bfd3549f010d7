#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use sustainability_bot::{config::Config, mine_traits_once, run_server};

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "sustainability-bot", version, about = "Chat backend with persona trait mining")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API and the trait-mining schedule (default)
    Serve,
    /// Run one trait-mining pass and exit
    MineTraits,
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = Config::from_env()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(cfg).await,
        Command::MineTraits => {
            let report = mine_traits_once(cfg).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
