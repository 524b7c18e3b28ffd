//! bitdex CLI entry point
//!
//! Parses arguments, runs the command and prints errors as JSON.
//! All logic is delegated to the CLI module.

use bitdex::cli;

fn main() {
    if let Err(e) = cli::run() {
        let _ = cli::write_error(e.code_str(), &e.to_string());
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
