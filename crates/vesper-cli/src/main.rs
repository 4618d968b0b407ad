//! Command line driver for the vesper interpreter.
//!
//! `vesper <filepath>` reads the named file as UTF-8 text and interprets it.
//! With no argument, prints `No filepath given!` and exits normally — that's
//! the whole external interface the core needs from its host process.

use std::env;
use std::fs;
use std::process::ExitCode;

use vesper::{run_source, StdPrint};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let Some(file_path) = args.get(1) else {
        println!("No filepath given!");
        return ExitCode::SUCCESS;
    };

    let code = match read_file(file_path) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut sink = StdPrint;
    match run_source(&code, &mut sink) {
        Ok(_) => ExitCode::SUCCESS,
        Err(outcome) => {
            println!("{outcome}");
            ExitCode::FAILURE
        }
    }
}

fn read_file(file_path: &str) -> Result<String, String> {
    match fs::metadata(file_path) {
        Ok(metadata) if metadata.is_file() => {}
        Ok(_) => return Err(format!("'{file_path}' is not a file")),
        Err(err) => return Err(format!("reading '{file_path}': {err}")),
    }
    fs::read_to_string(file_path).map_err(|err| format!("reading '{file_path}': {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_file_reports_missing_path() {
        let err = read_file("/nonexistent/path/to/a/vesper/file.vsp").unwrap_err();
        assert!(err.contains("/nonexistent/path/to/a/vesper/file.vsp"));
    }
}
