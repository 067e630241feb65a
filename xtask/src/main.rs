//! Build automation for the wirepool workspace.
//!
//! Run with `cargo xtask <command>`:
//!
//! - `ci`: formatting, clippy, feature matrix, tests and cargo-deny
//! - `fmt`: check or apply formatting
//! - `clippy`: lint every target with warnings denied
//! - `test`: run the test suites, with a property-test profile
//! - `features`: check `wirepool` with and without `otel`
//! - `deny`: cargo-deny checks
//! - `doc`: build the API docs
//! - `harness`: run the load harness against the mock backend

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Build automation for wirepool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every check CI runs
    Ci {
        /// Property-test profile for the test step
        #[arg(long, value_enum, default_value_t = Profile::Standard)]
        profile: Profile,
    },
    /// Check formatting, or apply it with --fix
    Fmt {
        #[arg(long)]
        fix: bool,
    },
    /// Run clippy on all targets and features
    Clippy,
    /// Run the test suites
    Test {
        /// Only test this package
        #[arg(short, long)]
        package: Option<String>,
        /// Property-test profile
        #[arg(long, value_enum, default_value_t = Profile::Standard)]
        profile: Profile,
    },
    /// Check wirepool with and without optional features
    Features,
    /// Run cargo-deny checks
    Deny,
    /// Build the API documentation
    Doc {
        #[arg(long)]
        open: bool,
    },
    /// Run the pool load harness
    Harness {
        /// Concurrent `SELECT 1` tasks
        #[arg(long, default_value_t = 100)]
        tasks: u32,
        /// Insert tasks that hold their connection
        #[arg(long, default_value_t = 50)]
        inserts: u32,
        /// Pool size
        #[arg(long, default_value_t = 20)]
        max_connections: u32,
        /// Log filter passed as RUST_LOG
        #[arg(long, default_value = "wirepool=info")]
        log: String,
    },
}

/// How hard the property suite is pushed.
#[derive(Clone, Copy, ValueEnum)]
enum Profile {
    /// 16 cases per property
    Quick,
    /// The suite's own default
    Standard,
    /// 1024 cases per property
    Thorough,
}

impl Profile {
    fn cases(self) -> Option<u32> {
        match self {
            Self::Quick => Some(16),
            Self::Standard => None,
            Self::Thorough => Some(1024),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    sh.change_dir(workspace_root()?);

    match cli.command {
        Command::Ci { profile } => ci(&sh, profile),
        Command::Fmt { fix } => fmt(&sh, fix),
        Command::Clippy => clippy(&sh),
        Command::Test { package, profile } => test(&sh, package.as_deref(), profile),
        Command::Features => features(&sh),
        Command::Deny => deny(&sh),
        Command::Doc { open } => doc(&sh, open),
        Command::Harness {
            tasks,
            inserts,
            max_connections,
            log,
        } => harness(&sh, tasks, inserts, max_connections, &log),
    }
}

fn workspace_root() -> Result<PathBuf> {
    let output = std::process::Command::new(env!("CARGO"))
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("failed to run cargo locate-project")?;
    let manifest = String::from_utf8(output.stdout).context("cargo printed invalid UTF-8")?;

    PathBuf::from(manifest.trim())
        .parent()
        .map(PathBuf::from)
        .context("workspace manifest has no parent directory")
}

/// Run `f` as a named step and report how long it took.
fn step(name: &str, f: impl FnOnce() -> Result<()>) -> Result<()> {
    println!("==> {name}");
    let started = Instant::now();
    f().with_context(|| format!("step `{name}` failed"))?;
    println!("    {name} ok ({:.1?})", started.elapsed());
    Ok(())
}

fn ci(sh: &Shell, profile: Profile) -> Result<()> {
    fmt(sh, false)?;
    clippy(sh)?;
    features(sh)?;
    test(sh, None, profile)?;
    deny(sh)?;
    println!("\nAll CI checks passed.");
    Ok(())
}

fn fmt(sh: &Shell, fix: bool) -> Result<()> {
    if fix {
        step("fmt", || Ok(cmd!(sh, "cargo fmt --all").run()?))
    } else {
        step("fmt --check", || {
            Ok(cmd!(sh, "cargo fmt --all -- --check").run()?)
        })
    }
}

fn clippy(sh: &Shell) -> Result<()> {
    step("clippy", || {
        Ok(cmd!(
            sh,
            "cargo clippy --workspace --all-features --all-targets -- -D warnings"
        )
        .run()?)
    })
}

fn test(sh: &Shell, package: Option<&str>, profile: Profile) -> Result<()> {
    let scope = match package {
        Some(pkg) => vec!["-p", pkg],
        None => vec!["--workspace"],
    };
    let _cases = profile
        .cases()
        .map(|cases| sh.push_env("PROPTEST_CASES", cases.to_string()));

    step("test", || {
        Ok(cmd!(sh, "cargo test --all-features {scope...}").run()?)
    })
}

fn features(sh: &Shell) -> Result<()> {
    step("wirepool (no default features)", || {
        Ok(cmd!(sh, "cargo check -p wirepool --no-default-features").run()?)
    })?;
    step("wirepool (otel)", || {
        Ok(cmd!(sh, "cargo check -p wirepool --features otel").run()?)
    })
}

fn deny(sh: &Shell) -> Result<()> {
    step("cargo-deny", || Ok(cmd!(sh, "cargo deny check").run()?))
}

fn doc(sh: &Shell, open: bool) -> Result<()> {
    let open = open.then_some("--open");
    step("doc", || {
        Ok(cmd!(sh, "cargo doc --workspace --all-features --no-deps {open...}").run()?)
    })
}

fn harness(sh: &Shell, tasks: u32, inserts: u32, max_connections: u32, log: &str) -> Result<()> {
    let _log = sh.push_env("RUST_LOG", log);
    let _tasks = sh.push_env("HARNESS_TASKS", tasks.to_string());
    let _inserts = sh.push_env("HARNESS_INSERTS", inserts.to_string());
    let _max = sh.push_env("HARNESS_MAX_CONNECTIONS", max_connections.to_string());

    step("harness", || {
        Ok(cmd!(
            sh,
            "cargo run --release -p wirepool-testing --example pool_harness"
        )
        .run()?)
    })
}
