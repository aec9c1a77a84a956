//! Consolebot CLI.
//!
//! Runs a send/expect script against a console program and exits 0 on pass,
//! 1 on any failure.
//!
//! # Usage
//!
//! ```bash
//! # built-in smoke script for the M3 mudlib console
//! consolebot ./neolith -f m3.local.conf -c
//!
//! # custom script
//! consolebot --script smoke.json --step-timeout 2.5 ./neolith -f m3.local.conf -c
//! ```

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use consolebot::{IoStrategy, Report, Script, ScriptBuilder, ScriptFile, SessionBuilder};
use log::LevelFilter;

#[derive(Parser)]
#[command(name = "consolebot", about = "Scripted send/expect harness for console programs")]
#[command(version, long_about = None)]
struct Args {
    /// JSON script to run instead of the built-in console smoke test
    #[arg(long, value_name = "FILE")]
    script: Option<PathBuf>,

    /// Default timeout for each step, in seconds
    #[arg(long, value_name = "SECS", value_parser = parse_secs)]
    step_timeout: Option<Duration>,

    /// Timeout for the whole session, in seconds
    #[arg(long, value_name = "SECS", value_parser = parse_secs)]
    session_timeout: Option<Duration>,

    /// How the child's pipes are serviced
    #[arg(long, value_enum, default_value_t = Strategy::Auto)]
    strategy: Strategy,

    /// Leave stderr on the terminal instead of capturing it
    #[arg(long)]
    no_merge_stderr: bool,

    /// Strip ANSI escape codes before matching
    #[arg(long)]
    strip_ansi: bool,

    /// Working directory for the program
    #[arg(short = 'C', long, value_name = "DIR")]
    cwd: Option<PathBuf>,

    /// Debug logging, and print the full transcript
    #[arg(short, long)]
    verbose: bool,

    /// Program to launch
    program: PathBuf,

    /// Arguments passed to the program verbatim
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<OsString>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Strategy {
    Auto,
    Async,
    Threaded,
}

impl From<Strategy> for IoStrategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Auto => IoStrategy::Auto,
            Strategy::Async => IoStrategy::Async,
            Strategy::Threaded => IoStrategy::Threaded,
        }
    }
}

fn parse_secs(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("`{value}` is not a number of seconds"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

/// Smoke test for the M3 mudlib console.
fn console_smoke_script() -> Script {
    ScriptBuilder::new()
        .expect("Welcome to M3")
        .expect("> ")
        .send("say Hello from consolebot!")
        .expect("You say: Hello from consolebot!")
        .send("help")
        .expect("Available commands:")
        .send("shutdown")
        .expect("Shutting down...")
        .build()
}

fn print_report(report: &Report, verbose: bool) {
    if verbose {
        println!("{}", "-".repeat(60));
        print!("{}", report.transcript());
        if !report.transcript().ends_with('\n') {
            println!();
        }
        println!("{}", "-".repeat(60));
    }
    for step in &report.steps {
        let mark = if step.is_success() { "ok" } else { "FAILED" };
        println!(
            "  {:>2}. {} ... {mark} ({:.2?})",
            step.index + 1,
            step.description,
            step.elapsed
        );
    }
    println!("{report}");
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.as_str()))
        .init();

    let mut builder = SessionBuilder::new(&args.program)
        .args(args.args)
        .strategy(args.strategy.into())
        .merge_stderr(!args.no_merge_stderr)
        .strip_ansi(args.strip_ansi);
    if let Some(cwd) = args.cwd {
        builder = builder.cwd(cwd);
    }

    let script = match &args.script {
        Some(path) => {
            let file = match ScriptFile::load(path) {
                Ok(file) => file,
                Err(e) => {
                    eprintln!("Error: {e}");
                    return ExitCode::FAILURE;
                }
            };
            if let Some(timeout) = file.step_timeout() {
                builder = builder.step_timeout(timeout);
            }
            if let Some(timeout) = file.session_timeout() {
                builder = builder.session_timeout(timeout);
            }
            match file.into_script() {
                Ok(script) => script,
                Err(e) => {
                    eprintln!("Error: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }
        None => console_smoke_script(),
    };

    // Command-line timeouts win over the script file's.
    if let Some(timeout) = args.step_timeout {
        builder = builder.step_timeout(timeout);
    }
    if let Some(timeout) = args.session_timeout {
        builder = builder.session_timeout(timeout);
    }

    println!("=== Consolebot ===");
    println!("Program: {}", args.program.display());
    println!("Steps:");
    for (i, step) in script.iter().enumerate() {
        println!("  {:>2}. {step}", i + 1);
    }
    println!();

    let report = builder.run(&script).await;
    print_report(&report, args.verbose);

    ExitCode::from(report.exit_code())
}
