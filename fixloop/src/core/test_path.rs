//! Mapping from reported test names to runner-invocable paths.

/// Directory assumed for test modules named without a package prefix.
pub const DEFAULT_TEST_ROOT: &str = "tests";
/// File suffix appended to module names.
pub const TEST_FILE_SUFFIX: &str = ".py";

/// Convert a report name (`pkg.module::test_fn`) into a runner path
/// (`pkg/module.py::test_fn`).
///
/// Pure string transform: no filesystem lookup. Names without `::` are
/// returned unchanged, as are names whose module part is already a file path.
pub fn to_runner_path(test_name: &str) -> String {
    let Some((module, selector)) = test_name.split_once("::") else {
        return test_name.to_string();
    };

    let module_path = if module.ends_with(TEST_FILE_SUFFIX) {
        module.to_string()
    } else if module.contains('.') {
        format!("{}{TEST_FILE_SUFFIX}", module.replace('.', "/"))
    } else {
        format!("{DEFAULT_TEST_ROOT}/{module}{TEST_FILE_SUFFIX}")
    };

    format!("{module_path}::{selector}")
}
