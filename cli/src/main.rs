//! Thin entry point over [`sachin_cli`]'s command implementations (spec
//! §6.3). Mirrors the teacher's `vasm`/`vex` binaries: a `clap`-driven
//! dispatcher in `main.rs`, all the actual work in the library crate so it
//! stays testable without going through `std::env::args`.

use clap::{App, Arg, SubCommand};
use sachin_cli::{ExitCode, USAGE};
use std::path::Path;
use std::process;

/// Spec §6.3: `help`/`?`/`-?`/`/?` are all spellings of the same request.
/// `clap` already understands `help` and `--help`; the three symbolic
/// aliases are rewritten to `--help` before `clap` ever sees them, since
/// none of them are valid `clap` subcommand or flag syntax on their own.
fn normalize_help_aliases(args: Vec<String>) -> Vec<String> {
    args.into_iter()
        .map(|a| match a.as_str() {
            "?" | "-?" | "/?" => "--help".to_string(),
            _ => a,
        })
        .collect()
}

fn main() {
    let args = normalize_help_aliases(std::env::args().collect());

    if args.len() <= 1 {
        print!("{}", USAGE);
        process::exit(ExitCode::Success.code());
    }

    let matches = App::new("sachin")
        .about("Compiler and interpreter for the sachin source language")
        .subcommand(
            SubCommand::with_name("compile")
                .about("Compile SRC, writing SRC.sachin on success")
                .arg(Arg::with_name("SRC").required(true).index(1)),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("Execute a previously compiled intermediate-code file")
                .arg(Arg::with_name("IC").required(true).index(1))
                .arg(
                    Arg::with_name("seed")
                        .long("seed")
                        .takes_value(true)
                        .help("Fixes the Randomize PRNG's program-wide seed"),
                ),
        )
        .subcommand(
            SubCommand::with_name("execute")
                .about("Compile SRC, then run it if compilation succeeded")
                .arg(Arg::with_name("SRC").required(true).index(1))
                .arg(
                    Arg::with_name("seed")
                        .long("seed")
                        .takes_value(true)
                        .help("Fixes the Randomize PRNG's program-wide seed"),
                ),
        )
        .get_matches_from(args);

    let exit_code = match matches.subcommand() {
        ("compile", Some(sub)) => run_compile(sub.value_of("SRC").unwrap()),
        ("run", Some(sub)) => run_run(sub.value_of("IC").unwrap(), parse_seed(sub.value_of("seed"))),
        ("execute", Some(sub)) => run_execute(sub.value_of("SRC").unwrap(), parse_seed(sub.value_of("seed"))),
        _ => {
            print!("{}", USAGE);
            ExitCode::Success
        }
    };

    process::exit(exit_code.code());
}

fn parse_seed(flag: Option<&str>) -> u64 {
    flag.and_then(|s| s.parse().ok()).unwrap_or_else(sachin_cli::clock_seed)
}

fn run_compile(src: &str) -> ExitCode {
    match sachin_cli::compile(Path::new(src)) {
        Ok((_, true, _)) => ExitCode::Success,
        Ok((_, false, errors)) => {
            sachin_cli::report_compile_errors(&errors);
            ExitCode::CompileFailure
        }
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::CompileFailure
        }
    }
}

fn run_run(ic: &str, seed: u64) -> ExitCode {
    match sachin_cli::run(Path::new(ic), seed) {
        Ok(Ok(())) => ExitCode::Success,
        Ok(Err(node_error)) => {
            eprintln!("{}", node_error);
            ExitCode::RuntimeFailure
        }
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::RuntimeFailure
        }
    }
}

fn run_execute(src: &str, seed: u64) -> ExitCode {
    match sachin_cli::execute(Path::new(src), seed) {
        Ok(sachin_cli::ExecuteOutcome::CompileFailed(errors)) => {
            sachin_cli::report_compile_errors(&errors);
            ExitCode::CompileFailure
        }
        Ok(sachin_cli::ExecuteOutcome::Ran(Ok(()))) => ExitCode::Success,
        Ok(sachin_cli::ExecuteOutcome::Ran(Err(node_error))) => {
            eprintln!("{}", node_error);
            ExitCode::RuntimeFailure
        }
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::CompileFailure
        }
    }
}
