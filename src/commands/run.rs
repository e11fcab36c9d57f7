// src/commands/run.rs

use std::path::Path;
use std::process::ExitCode;

use crate::vm::{interp, Vm};

/// Load a bytecode blob and run its main closure.
pub fn run_file(file: &Path) -> ExitCode {
    let data = match std::fs::read(file) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("error: could not read '{}': {}", file.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let chunkname = file.display().to_string();
    let mut vm = Vm::new();

    match interp::load_and_run(&mut vm, &chunkname, &data) {
        Ok(results) => {
            for value in results {
                println!("{value}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
