// src/commands/check.rs

use std::process::ExitCode;
use std::rc::Rc;

use crate::analysis::{Frontend, FrontendOptions, NullConfigResolver};
use crate::commands::common::{expand_paths, module_name_for_path, DiskFileResolver};
use crate::errors::render::{render_analysis_errors, RenderedDiagnostic, Severity};

/// Check source files (parse + analyze, no execution).
pub fn check_paths(patterns: &[String], lint: bool, use_color: bool) -> ExitCode {
    let files = expand_paths(patterns);
    if files.is_empty() {
        eprintln!("error: no source files matched");
        return ExitCode::FAILURE;
    }

    let mut frontend = Frontend::new(
        Rc::new(DiskFileResolver::new(".")),
        Rc::new(NullConfigResolver::default()),
        FrontendOptions::default(),
    );

    let mut diagnostics: Vec<RenderedDiagnostic> = Vec::new();
    let mut failed = false;

    for file in &files {
        let module_name = module_name_for_path(file);

        match frontend.check(&module_name, None) {
            Ok(result) => {
                failed |= !result.errors.is_empty();
                for error in &result.errors {
                    diagnostics.push(RenderedDiagnostic {
                        file: error.module.clone(),
                        span: error.location,
                        severity: Severity::Error,
                        message: frontend.render_error(error),
                    });
                }
            }
            Err(ice) => {
                eprintln!("error: {ice}");
                return ExitCode::FAILURE;
            }
        }

        if lint {
            let result = frontend.lint(&module_name, None);
            failed |= !result.errors.is_empty();
            for (warnings, severity) in [
                (&result.errors, Severity::Error),
                (&result.warnings, Severity::Warning),
            ] {
                for warning in warnings {
                    diagnostics.push(RenderedDiagnostic {
                        file: module_name.clone(),
                        span: warning.location,
                        severity,
                        message: warning.message.clone(),
                    });
                }
            }
        }
    }

    let mut stderr = std::io::stderr().lock();
    if render_analysis_errors(&mut stderr, &diagnostics, use_color).is_err() {
        return ExitCode::FAILURE;
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
