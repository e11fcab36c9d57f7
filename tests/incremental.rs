// tests/incremental.rs
//! End-to-end scenarios for the incremental analysis frontend: cycle
//! detection and reporting, incremental rechecking, dirty propagation,
//! the autocomplete budget controller, and diagnostic accumulation.

mod common;

use std::rc::Rc;

use common::{MemoryFileResolver, TestConfigResolver};
use tarn::analysis::{Frontend, FrontendOptions, LintCode, ModuleName};
use tarn::errors::AnalysisErrorKind;

fn frontend_over(files: &[(&str, &str)]) -> (Frontend, Rc<MemoryFileResolver>) {
    let resolver = Rc::new(MemoryFileResolver::new());
    for (name, source) in files {
        resolver.set(name, source);
    }
    let frontend = Frontend::new(
        resolver.clone(),
        Rc::new(TestConfigResolver::new()),
        FrontendOptions::default(),
    );
    (frontend, resolver)
}

fn name(s: &str) -> ModuleName {
    s.to_string()
}

#[test]
fn cycle_detection_reports_one_diagnostic_per_file() {
    let (mut frontend, _files) = frontend_over(&[
        ("game/a", "local b = require(script.Parent.b)\nreturn 1"),
        ("game/b", "local c = require(script.Parent.c)\nreturn 2"),
        ("game/c", "local a = require(script.Parent.a)\nreturn 3"),
    ]);

    let result = frontend.check(&name("game/a"), None).unwrap();

    let cycles: Vec<&Vec<String>> = result
        .errors
        .iter()
        .filter_map(|e| match &e.kind {
            AnalysisErrorKind::ModuleHasCyclicDependency { cycle } => Some(cycle),
            _ => None,
        })
        .collect();

    assert_eq!(cycles.len(), 3, "one cycle diagnostic per file: {result:?}");

    // from the starting module's viewpoint the path is a, b, c, a
    let a_cycle = result
        .errors
        .iter()
        .find_map(|e| match &e.kind {
            AnalysisErrorKind::ModuleHasCyclicDependency { cycle } if e.module == "game/a" => {
                Some(cycle.clone())
            }
            _ => None,
        })
        .expect("module a reports its cycle");
    assert_eq!(a_cycle, vec!["game/a", "game/b", "game/c", "game/a"]);

    // every reported path closes on its own module
    for cycle in cycles {
        assert_eq!(cycle.first(), cycle.last());
        assert!(cycle.len() >= 2);
    }
}

#[test]
fn require_cycle_paths_step_through_direct_requires() {
    let (mut frontend, _files) = frontend_over(&[
        ("game/a", "local b = require(script.Parent.b)\nreturn 1"),
        ("game/b", "local a = require(script.Parent.a)\nreturn 2"),
    ]);

    frontend.check(&name("game/a"), None).unwrap();

    let cycles = frontend.get_require_cycles(&name("game/a"), false);
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].path, vec!["game/a", "game/b", "game/a"]);
}

#[test]
fn a_node_on_two_cycles_through_different_siblings_reports_both() {
    // a -> b -> d -> a and a -> c -> d -> a share the node d; the seen
    // set must be cleared after the first recorded cycle for the second
    // sibling's search to find its path.
    let (mut frontend, _files) = frontend_over(&[
        (
            "game/a",
            "local b = require(script.Parent.b)\nlocal c = require(script.Parent.c)\nreturn 1",
        ),
        ("game/b", "local d = require(script.Parent.d)\nreturn 2"),
        ("game/c", "local d = require(script.Parent.d)\nreturn 3"),
        ("game/d", "local a = require(script.Parent.a)\nreturn 4"),
    ]);

    frontend.check(&name("game/a"), None).unwrap();

    let cycles = frontend.get_require_cycles(&name("game/a"), false);
    let paths: Vec<Vec<String>> = cycles.into_iter().map(|c| c.path).collect();

    assert!(paths.contains(&vec![
        "game/a".to_string(),
        "game/b".to_string(),
        "game/d".to_string(),
        "game/a".to_string()
    ]));
    assert!(paths.contains(&vec![
        "game/a".to_string(),
        "game/c".to_string(),
        "game/d".to_string(),
        "game/a".to_string()
    ]));
    assert_eq!(paths.len(), 2);
}

#[test]
fn stop_at_first_returns_a_single_cycle() {
    let (mut frontend, _files) = frontend_over(&[
        (
            "game/a",
            "local b = require(script.Parent.b)\nlocal c = require(script.Parent.c)\nreturn 1",
        ),
        ("game/b", "local a = require(script.Parent.a)\nreturn 2"),
        ("game/c", "local a = require(script.Parent.a)\nreturn 3"),
    ]);

    frontend.check(&name("game/a"), None).unwrap();

    assert_eq!(frontend.get_require_cycles(&name("game/a"), true).len(), 1);
    assert_eq!(frontend.get_require_cycles(&name("game/a"), false).len(), 2);
}

#[test]
fn incremental_recheck_reparses_exactly_once() {
    let (mut frontend, files) = frontend_over(&[("game/a", "return 1 + '2'")]);
    let a = name("game/a");

    let result = frontend.check(&a, None).unwrap();
    assert_eq!(result.errors.len(), 1);
    assert!(matches!(
        result.errors[0].kind,
        AnalysisErrorKind::TypeMismatch { .. }
    ));

    let files_parsed = frontend.stats().files;

    files.set("game/a", "return 1 + 2");
    frontend.mark_dirty(&a, None);

    let result = frontend.check(&a, None).unwrap();
    assert!(result.errors.is_empty(), "{result:?}");

    assert_eq!(frontend.stats().files, files_parsed + 1);
}

#[test]
fn checking_twice_without_changes_does_no_work() {
    let (mut frontend, _files) = frontend_over(&[
        ("game/a", "local b = require(script.Parent.b)\nreturn b + '1'"),
        ("game/b", "return 2"),
    ]);
    let a = name("game/a");

    let first = frontend.check(&a, None).unwrap();
    let checked = frontend.stats().files_strict + frontend.stats().files_nonstrict;

    let second = frontend.check(&a, None).unwrap();
    let checked_again = frontend.stats().files_strict + frontend.stats().files_nonstrict;

    assert_eq!(checked, checked_again);
    assert_eq!(first.errors, second.errors);
}

#[test]
fn diagnostics_include_every_reachable_dependency() {
    let (mut frontend, _files) = frontend_over(&[
        ("game/a", "local b = require(script.Parent.b)\nreturn 1"),
        ("game/b", "return 1 + 'oops'"),
    ]);
    let a = name("game/a");

    let result = frontend.check(&a, None).unwrap();
    assert!(result
        .errors
        .iter()
        .any(|e| e.module == "game/b" && matches!(e.kind, AnalysisErrorKind::TypeMismatch { .. })));

    // dependency modules are cached and clean after the check
    assert!(frontend.get_module(&name("game/b"), false).is_some());
    assert!(!frontend.is_dirty(&name("game/b"), false));

    // the cached fast path still accumulates dependency errors
    let cached = frontend.check(&a, None).unwrap();
    assert!(cached
        .errors
        .iter()
        .any(|e| e.module == "game/b" && matches!(e.kind, AnalysisErrorKind::TypeMismatch { .. })));
}

#[test]
fn mark_dirty_floods_reverse_dependencies_only() {
    let (mut frontend, _files) = frontend_over(&[
        ("game/a", "local b = require(script.Parent.b)\nreturn 1"),
        ("game/b", "local c = require(script.Parent.c)\nreturn 2"),
        ("game/c", "return 3"),
        ("game/lone", "return 4"),
    ]);

    frontend.check(&name("game/a"), None).unwrap();
    frontend.check(&name("game/lone"), None).unwrap();

    let mut marked = Vec::new();
    frontend.mark_dirty(&name("game/c"), Some(&mut marked));

    marked.sort();
    assert_eq!(marked, vec!["game/a", "game/b", "game/c"]);

    for module in ["game/a", "game/b", "game/c"] {
        assert!(frontend.is_dirty(&name(module), false));
        assert!(frontend.is_dirty(&name(module), true));
    }
    assert!(!frontend.is_dirty(&name("game/lone"), false));
}

#[test]
fn dependencies_are_checked_before_dependents() {
    // the diamond only typechecks cleanly if d's export is seen by b
    // and c before a consumes them
    let (mut frontend, _files) = frontend_over(&[
        (
            "game/a",
            "local b = require(script.Parent.b)\nlocal c = require(script.Parent.c)\nreturn b + c",
        ),
        ("game/b", "local d = require(script.Parent.d)\nreturn d + 1"),
        ("game/c", "local d = require(script.Parent.d)\nreturn d + 2"),
        ("game/d", "return 10"),
    ]);

    let result = frontend.check(&name("game/a"), None).unwrap();
    assert!(result.errors.is_empty(), "{result:?}");
}

#[test]
fn missing_required_file_yields_unknown_require() {
    let (mut frontend, _files) = frontend_over(&[(
        "game/a",
        "local gone = require(script.Parent.gone)\nreturn 1",
    )]);

    let result = frontend.check(&name("game/a"), None).unwrap();
    assert!(result.errors.iter().any(|e| matches!(
        &e.kind,
        AnalysisErrorKind::UnknownRequire { name } if name == "game/gone"
    )));
}

#[test]
fn parse_errors_surface_as_syntax_diagnostics() {
    let (mut frontend, _files) = frontend_over(&[("game/a", "local = 1\nreturn 2")]);

    let result = frontend.check(&name("game/a"), None).unwrap();
    assert!(result
        .errors
        .iter()
        .any(|e| matches!(e.kind, AnalysisErrorKind::SyntaxError { .. })));

    // the module is still produced from the recovered AST
    assert!(frontend.get_module(&name("game/a"), false).is_some());
}

#[test]
fn hot_comment_overrides_the_configured_mode() {
    let (mut frontend, _files) = frontend_over(&[
        ("game/strict", "--!strict\nreturn frobnicate"),
        ("game/default", "return frobnicate"),
    ]);

    let strict = frontend.check(&name("game/strict"), None).unwrap();
    assert!(strict
        .errors
        .iter()
        .any(|e| matches!(e.kind, AnalysisErrorKind::UnknownGlobal { .. })));

    // configured default is nonstrict: unknown globals are permitted
    let default = frontend.check(&name("game/default"), None).unwrap();
    assert!(default.errors.is_empty());
}

#[test]
fn nocheck_mode_skips_type_diagnostics_but_not_syntax() {
    let (mut frontend, _files) = frontend_over(&[(
        "game/a",
        "--!nocheck\nlocal b = require(script.Parent.gone)\nreturn 1 + 'x'",
    )]);

    let result = frontend.check(&name("game/a"), None).unwrap();
    assert!(result.errors.is_empty(), "{result:?}");
}

#[test]
fn autocomplete_budget_contracts_on_timeout_and_recovers() {
    let many_statements = "local a = 1\n".repeat(10) + "return 1";
    let (mut frontend, files) = frontend_over(&[("game/slow", &many_statements)]);
    let slow = name("game/slow");
    let autocomplete = FrontendOptions {
        for_autocomplete: true,
        ..FrontendOptions::default()
    };

    frontend.iteration_limit = Some(4);

    let result = frontend.check(&slow, Some(autocomplete)).unwrap();
    assert_eq!(result.timeout_hits, vec![slow.clone()]);
    assert_eq!(frontend.autocomplete_limits_mult(&slow), Some(0.5));

    let module = frontend.get_module(&slow, true).unwrap();
    assert!(module.borrow().timeout);

    // still over budget at half the limits: contracts again
    frontend.mark_dirty(&slow, None);
    files.set("game/slow", &("local a = 1\n".repeat(10) + "return 1"));
    let result = frontend.check(&slow, Some(autocomplete)).unwrap();
    assert_eq!(result.timeout_hits, vec![slow.clone()]);
    assert_eq!(frontend.autocomplete_limits_mult(&slow), Some(0.25));

    // a fast check re-expands the budget, clamped at 1.0
    files.set("game/slow", "return 1");
    frontend.mark_dirty(&slow, None);
    let result = frontend.check(&slow, Some(autocomplete)).unwrap();
    assert!(result.timeout_hits.is_empty());
    assert_eq!(frontend.autocomplete_limits_mult(&slow), Some(0.5));
}

#[test]
fn autocomplete_and_normal_caches_are_independent() {
    let (mut frontend, _files) = frontend_over(&[("game/a", "return 1")]);
    let a = name("game/a");

    frontend
        .check(
            &a,
            Some(FrontendOptions {
                for_autocomplete: true,
                ..FrontendOptions::default()
            }),
        )
        .unwrap();

    assert!(frontend.get_module(&a, true).is_some());
    assert!(frontend.get_module(&a, false).is_none());
    assert!(!frontend.is_dirty(&a, true));
    assert!(frontend.is_dirty(&a, false));
}

#[test]
fn trimmed_modules_drop_side_tables_but_keep_renderable_errors() {
    let (mut frontend, _files) = frontend_over(&[("game/a", "return 1 + 'x'")]);
    let a = name("game/a");

    let result = frontend.check(&a, None).unwrap();
    assert_eq!(result.errors.len(), 1);

    let module = frontend.get_module(&a, false).unwrap();
    assert!(module.borrow().ast_types.is_empty());
    assert!(module.borrow().trimmed);

    let rendered = frontend.render_error(&result.errors[0]);
    assert!(rendered.contains("number"), "{rendered}");
    assert!(rendered.contains("string"), "{rendered}");
}

#[test]
fn retaining_type_graphs_keeps_ast_side_tables() {
    let (mut frontend, _files) = frontend_over(&[("game/a", "return 1 + 2")]);
    let a = name("game/a");

    frontend
        .check(
            &a,
            Some(FrontendOptions {
                retain_full_type_graphs: true,
                ..FrontendOptions::default()
            }),
        )
        .unwrap();

    let module = frontend.get_module(&a, false).unwrap();
    assert!(!module.borrow().ast_types.is_empty());
    assert!(!module.borrow().trimmed);
}

#[test]
fn lint_results_partition_by_config() {
    let resolver = Rc::new(MemoryFileResolver::new());
    resolver.set("game/a", "local unused = 1\nreturn 1 == 'one'");

    let config_resolver = Rc::new(TestConfigResolver::new());
    config_resolver
        .config
        .borrow_mut()
        .fatal_lint
        .enable_warning(LintCode::UnusedLocal);

    let mut frontend = Frontend::new(
        resolver,
        config_resolver,
        FrontendOptions::default(),
    );

    let result = frontend.lint(&name("game/a"), None);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].code, LintCode::UnusedLocal);
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].code, LintCode::SuspiciousCompare);
}

#[test]
fn nolint_hot_comment_masks_warnings() {
    let (mut frontend, _files) = frontend_over(&[(
        "game/a",
        "--!nolint UnusedLocal\nlocal unused = 1\nreturn 2",
    )]);

    let result = frontend.lint(&name("game/a"), None);
    assert!(result.errors.is_empty());
    assert!(result.warnings.is_empty());
}

#[test]
fn lint_on_an_unreadable_module_is_empty() {
    let (mut frontend, _files) = frontend_over(&[]);
    let result = frontend.lint(&name("game/missing"), None);
    assert!(result.errors.is_empty());
    assert!(result.warnings.is_empty());
}

#[test]
fn definition_files_declare_persistent_globals() {
    let (mut frontend, _files) = frontend_over(&[(
        "game/a",
        "--!strict\nreturn shared_counter + 1",
    )]);

    let loaded = frontend.load_definition_file("shared_counter = 0", "test-env");
    assert!(loaded.success);

    let result = frontend.check(&name("game/a"), None).unwrap();
    assert!(result.errors.is_empty(), "{result:?}");
}

#[test]
fn config_globals_are_bound_to_any() {
    let resolver = Rc::new(MemoryFileResolver::new());
    resolver.set("game/a", "--!strict\nreturn injected");

    let config_resolver = Rc::new(TestConfigResolver::new());
    config_resolver
        .config
        .borrow_mut()
        .globals
        .push("injected".to_string());

    let mut frontend = Frontend::new(
        resolver,
        config_resolver,
        FrontendOptions::default(),
    );

    let result = frontend.check(&name("game/a"), None).unwrap();
    assert!(result.errors.is_empty(), "{result:?}");
}

#[test]
fn clear_forgets_all_caches() {
    let (mut frontend, _files) = frontend_over(&[("game/a", "return 1")]);
    let a = name("game/a");

    frontend.check(&a, None).unwrap();
    assert!(frontend.get_module(&a, false).is_some());

    frontend.clear();
    assert!(frontend.get_module(&a, false).is_none());
    assert!(frontend.get_source_module(&a).is_none());
    assert!(frontend.is_dirty(&a, false));
}

#[test]
fn check_of_a_missing_module_returns_no_diagnostics() {
    let (mut frontend, _files) = frontend_over(&[]);
    let result = frontend.check(&name("game/nowhere"), None).unwrap();
    assert!(result.errors.is_empty());
    assert!(result.timeout_hits.is_empty());
}
