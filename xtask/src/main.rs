use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for quadterra")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every gate: fmt, clippy, tests, doc
    Check,
    /// Run cargo fmt --check on all crates
    Fmt,
    /// Run clippy on all crates, warnings denied
    Clippy,
    /// Run all tests
    Test,
    /// Build rustdoc for the workspace
    Doc,
    /// Run the tile traversal benchmarks in release mode
    Bench,
    /// Short fly-through with the CLI as an end-to-end smoke test
    Smoke,
}

/// One cargo invocation and the label printed before it.
struct Step {
    label: &'static str,
    args: &'static [&'static str],
}

const FMT: Step = Step {
    label: "cargo fmt --check",
    args: &["fmt", "--all", "--", "--check"],
};
const CLIPPY: Step = Step {
    label: "cargo clippy",
    args: &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
};
const TEST: Step = Step {
    label: "cargo test",
    args: &["test", "--workspace"],
};
const DOC: Step = Step {
    label: "cargo doc",
    args: &["doc", "--workspace", "--no-deps"],
};
const BENCH: Step = Step {
    label: "tile traversal benchmarks",
    args: &["bench", "-p", "quadterra-tile", "--bench", "bench_tile_traversal"],
};
const SMOKE: Step = Step {
    label: "fly-through smoke test",
    args: &[
        "run", "-p", "quadterra-cli", "--", "fly", "--frames", "60", "--altitude", "200",
    ],
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let steps: &[Step] = match cli.command {
        Commands::Check => &[FMT, CLIPPY, TEST, DOC],
        Commands::Fmt => &[FMT],
        Commands::Clippy => &[CLIPPY],
        Commands::Test => &[TEST],
        Commands::Doc => &[DOC],
        Commands::Bench => &[BENCH],
        Commands::Smoke => &[SMOKE],
    };
    for step in steps {
        run(step)?;
    }

    Ok(())
}

fn run(step: &Step) -> Result<()> {
    println!("==> Running {}", step.label);
    let status = Command::new("cargo").args(step.args).status()?;
    if !status.success() {
        bail!("{} failed", step.label);
    }
    Ok(())
}
