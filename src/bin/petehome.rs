//! petehome dev console: PM2 process control, project scripts, Vercel
//! deploys, and supabase migrations behind one prompt.

use anyhow::Result;
use clap::Parser;

use devdeck::commands::{self, Registry};
use devdeck::profile::Profile;
use devdeck::runtime;

#[derive(Debug, Parser)]
#[command(name = "petehome-cli", version, about = "petehome development console")]
struct Cli {
    /// Run one command and exit instead of opening the console.
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let profile = Profile::petehome();

    let mut registry = Registry::new();
    commands::petehome::register(&mut registry);
    commands::git::register(&mut registry);

    if !cli.command.is_empty() {
        return runtime::run_once(profile, registry, &cli.command.join(" ")).await;
    }
    runtime::run(profile, registry).await
}
