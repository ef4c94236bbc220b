use std::fs;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::Parser as ArgParser;

use crate::error::PosixMode;
use crate::vm::{Outcome, Vm};
use crate::Dialect;

/// Options shared by the `bc` and `dc` binaries.
#[derive(ArgParser, Debug)]
#[command(version, about = "Arbitrary-precision calculator")]
pub struct Args {
    /// Evaluate EXPR before reading any files
    #[arg(short = 'e', long = "expression", value_name = "EXPR")]
    pub expressions: Vec<String>,

    /// Read stdin after processing all other sources
    #[arg(short = 'i', long = "interactive")]
    pub interactive: bool,

    /// Print warnings for non-POSIX constructs
    #[arg(short = 'w', long = "warn")]
    pub warn: bool,

    /// Treat non-POSIX constructs as errors
    #[arg(short = 's', long = "standard")]
    pub standard: bool,

    /// Do not print the startup banner
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Script files, processed left to right
    pub files: Vec<PathBuf>,
}

/// Prepend `BC_ENV_ARGS` / `DC_ENV_ARGS` to the real argument list before
/// parsing, the way the classic tools do.
fn parse_args(dialect: Dialect) -> Args {
    let env_name = format!("{}_ENV_ARGS", dialect.name().to_uppercase());
    let mut argv: Vec<String> = std::env::args().take(1).collect();
    if let Ok(extra) = std::env::var(&env_name) {
        argv.extend(extra.split_whitespace().map(String::from));
    }
    argv.extend(std::env::args().skip(1));
    Args::parse_from(argv)
}

/// Whole-process driver for one dialect. Returns the exit code: 0 on a
/// normal run, 1 on an error in non-interactive use (clap itself exits 2
/// on usage errors).
pub fn run(dialect: Dialect) -> i32 {
    env_logger::init();
    let args = parse_args(dialect);

    let mode = if args.standard {
        PosixMode::Error
    } else if args.warn {
        PosixMode::Warn
    } else {
        PosixMode::Ignore
    };

    let tty = io::stdin().is_terminal();
    let mut vm = Vm::new(
        dialect,
        mode,
        Box::new(io::BufReader::new(io::stdin())),
        Box::new(io::stdout()),
        tty,
    );

    if dialect == Dialect::Bc && tty && !args.quiet {
        println!("bc {}", env!("CARGO_PKG_VERSION"));
    }

    for expr in &args.expressions {
        let mut src = expr.clone();
        if !src.ends_with('\n') {
            src.push('\n');
        }
        match vm.run_text(&src) {
            Ok(Outcome::Quit) => return 0,
            Ok(Outcome::Continue) => {}
            Err(e) => {
                vm.report(&e);
                return 1;
            }
        }
    }

    for path in &args.files {
        let src = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("{}: {}: {}", dialect.name(), path.display(), e);
                return 1;
            }
        };
        match vm.run_text(&src) {
            Ok(Outcome::Quit) => return 0,
            Ok(Outcome::Continue) => {}
            Err(e) => {
                vm.report(&e);
                return 1;
            }
        }
    }

    let no_sources = args.expressions.is_empty() && args.files.is_empty();
    if no_sources || args.interactive || tty {
        match vm.repl() {
            Ok(()) => 0,
            Err(_) => 1,
        }
    } else {
        match vm.finish() {
            Ok(_) => 0,
            Err(e) => {
                vm.report(&e);
                1
            }
        }
    }
}
