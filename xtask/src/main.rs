use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for atelier")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every pre-merge step: fmt, clippy, tests, doc, then the CLI demo
    /// as a smoke test of the asset core
    Check,
    /// Run cargo fmt --check on all crates
    Fmt,
    /// Run clippy on all crates
    Clippy,
    /// Run all tests
    Test,
    /// Build rustdoc for the workspace
    Doc,
    /// Build the entire workspace
    Build,
    /// Run the CLI's in-memory demo project
    Demo {
        /// Show debug logs from the asset core
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => run_check()?,
        Commands::Fmt => run_fmt()?,
        Commands::Clippy => run_clippy()?,
        Commands::Test => run_tests()?,
        Commands::Doc => run_doc()?,
        Commands::Build => cargo("build", &["build", "--workspace"])?,
        Commands::Demo { verbose } => run_demo(verbose)?,
    }

    Ok(())
}

/// Run cargo with `args`, failing if it exits unsuccessfully.
fn cargo(step: &str, args: &[&str]) -> Result<()> {
    println!("==> Running cargo {}", args.join(" "));
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("cargo {step} failed");
    }
    Ok(())
}

fn run_check() -> Result<()> {
    let steps: [(&str, fn() -> Result<()>); 5] = [
        ("fmt", run_fmt),
        ("clippy", run_clippy),
        ("test", run_tests),
        ("doc", run_doc),
        ("demo", || run_demo(false)),
    ];
    for (name, step) in steps {
        step().map_err(|err| err.context(format!("check step `{name}`")))?;
    }
    println!("==> All checks passed");
    Ok(())
}

fn run_fmt() -> Result<()> {
    cargo("fmt", &["fmt", "--all", "--", "--check"])
}

fn run_clippy() -> Result<()> {
    cargo(
        "clippy",
        &[
            "clippy",
            "--workspace",
            "--all-targets",
            "--",
            "-D",
            "warnings",
        ],
    )
}

fn run_tests() -> Result<()> {
    cargo("test", &["test", "--workspace"])
}

fn run_doc() -> Result<()> {
    cargo("doc", &["doc", "--workspace", "--no-deps"])
}

fn run_demo(verbose: bool) -> Result<()> {
    let mut args = vec!["run", "-p", "atelier-cli", "--"];
    if verbose {
        args.push("--verbose");
    }
    args.push("demo");
    cargo("run", &args)
}
