//! ayu command-line front end.
//!
//! - `ayu fmt` parses files and prints them back, to stdout or in place
//! - `ayu check` parses files and reports the first error in each
//! - `ayu eval` parses its arguments as a list of terms
//!
//! Logging goes to stderr, filtered by `AYU_LOG` (e.g. `AYU_LOG=ayu_core=trace`).

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use ayu_core::{parse_file, parse_list, print, print_file, PrintOptions};
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ayu")]
#[command(version, about = "Format and check ayu files", long_about = None)]
struct Cli {
    /// Debug logging, unless AYU_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse files and print them back
    Fmt {
        #[command(flatten)]
        layout: Layout,

        /// Rewrite each file instead of printing to stdout
        #[arg(short, long)]
        in_place: bool,

        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
    },
    /// Parse files and report errors
    Check {
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
    },
    /// Parse the arguments as terms and print each on its own line
    Eval {
        #[command(flatten)]
        layout: Layout,

        #[arg(required = true, value_name = "TERM")]
        terms: Vec<String>,
    },
}

#[derive(Args, Debug, Clone, Copy)]
struct Layout {
    /// Indented output
    #[arg(long, conflicts_with = "compact")]
    pretty: bool,

    /// Single-line output
    #[arg(long)]
    compact: bool,

    /// JSON-compatible output
    #[arg(long)]
    json: bool,
}

impl Layout {
    fn options(self, default: PrintOptions) -> PrintOptions {
        let mut options = if self.pretty {
            PrintOptions::PRETTY
        } else if self.compact {
            PrintOptions::COMPACT
        } else {
            default
        };
        if self.json {
            options |= PrintOptions::JSON;
        }
        options
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);

    match run(cli.command, &mut io::stdout().lock()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("ayu: {err}");
            ExitCode::FAILURE
        }
    }
}

fn setup_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("AYU_LOG")
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Returns whether every input was fine.
fn run(command: Command, out: &mut dyn Write) -> Result<bool, Box<dyn Error>> {
    match command {
        Command::Fmt {
            layout,
            in_place,
            files,
        } => {
            let options = layout.options(PrintOptions::PRETTY);
            for path in files {
                let tree = parse_file(&path)?;
                if in_place {
                    print_file(&tree, &path, options)?;
                    tracing::info!(path = %path.display(), "formatted");
                } else {
                    writeln!(out, "{}", print(&tree, options)?)?;
                }
            }
            Ok(true)
        }
        Command::Check { files } => {
            let mut ok = true;
            for path in files {
                match parse_file(&path) {
                    Ok(_) => writeln!(out, "{}: ok", path.display())?,
                    Err(err) => {
                        writeln!(out, "{err}")?;
                        ok = false;
                    }
                }
            }
            Ok(ok)
        }
        Command::Eval { layout, terms } => {
            let options = layout.options(PrintOptions::COMPACT);
            let text = terms.join(" ");
            for tree in parse_list(text.as_bytes(), "<args>")? {
                writeln!(out, "{}", print(&tree, options)?)?;
            }
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn run_to_string(command: Command) -> (bool, String) {
        let mut out = Vec::new();
        let ok = run(command, &mut out).unwrap();
        (ok, String::from_utf8(out).unwrap())
    }

    fn layout() -> Layout {
        Layout {
            pretty: false,
            compact: false,
            json: false,
        }
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_layout_flags() {
        let cli = Cli::try_parse_from(["ayu", "eval", "--json", "--pretty", "[1 2]"]).unwrap();
        let Command::Eval { layout, terms } = cli.command else {
            panic!("expected eval");
        };
        assert_eq!(terms, ["[1 2]"]);
        assert_eq!(
            layout.options(PrintOptions::COMPACT),
            PrintOptions::PRETTY | PrintOptions::JSON
        );
        assert!(Cli::try_parse_from(["ayu", "fmt", "--pretty", "--compact", "x.ayu"]).is_err());
    }

    #[test]
    fn test_eval() {
        let (ok, out) = run_to_string(Command::Eval {
            layout: layout(),
            terms: vec!["{a:1}".into(), "[x".into(), "y]".into()],
        });
        assert!(ok);
        assert_eq!(out, "{a:1}\n[x y]\n");
    }

    #[test]
    fn test_fmt_in_place_and_check() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.ayu");
        let bad = dir.path().join("bad.ayu");
        std::fs::write(&good, "{ a : 1 , b : [ x y ] }").unwrap();
        std::fs::write(&bad, "[1 2").unwrap();

        let (ok, _) = run_to_string(Command::Fmt {
            layout: layout(),
            in_place: true,
            files: vec![good.clone()],
        });
        assert!(ok);
        assert_eq!(std::fs::read_to_string(&good).unwrap(), "{\n    a: 1\n    b: [x y]\n}\n");

        let (ok, out) = run_to_string(Command::Check {
            files: vec![good.clone(), bad],
        });
        assert!(!ok);
        let mut lines = out.lines();
        assert_eq!(lines.next().unwrap(), format!("{}: ok", good.display()));
        assert!(lines.next().unwrap().contains("unclosed array"));
    }
}
