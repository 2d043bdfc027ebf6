use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the workspace
    Build,
    /// Run all unit tests
    Test,
    /// Upload a ROM with the loader64 CLI
    Upload {
        /// ROM image to send
        file: String,
        /// Pass --verbose to the loader
        #[arg(short, long)]
        verbose: bool,
    },
}

fn cargo(args: &[&str]) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("cargo {} failed", args.join(" "));
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building project...");
            cargo(&["build", "--workspace"])?;
        }
        Commands::Test => {
            println!("Testing project...");
            cargo(&["test", "--workspace"])?;
        }
        Commands::Upload { file, verbose } => {
            println!("Uploading {file}...");
            let mut args = vec!["run", "-p", "ed64-cli", "--", "--file", file.as_str()];
            if *verbose {
                args.push("--verbose");
            }
            cargo(&args)?;
        }
    }

    Ok(())
}
