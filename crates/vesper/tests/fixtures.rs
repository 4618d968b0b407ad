//! Fixture-driven end-to-end runner: every `.vsp` file under `test_cases/`
//! is a vesper program whose last line is a `# Output=...` expectation
//! comment (the language itself has no comment syntax, so that trailing
//! line is stripped before the code ever reaches the tokenizer). `\n`
//! inside the expectation stands for a line break in the program's
//! collected output.

use std::error::Error;
use std::fs;
use std::path::Path;

use vesper::{run_source, CollectStringPrint};

fn parse_fixture(content: &str) -> (String, String) {
    let lines: Vec<&str> = content.lines().collect();
    assert!(!lines.is_empty(), "empty fixture file");
    let last_line = lines.last().expect("checked non-empty above");
    let expected = last_line
        .strip_prefix("# Output=")
        .unwrap_or_else(|| panic!("fixture's last line must be '# Output=...', got: {last_line}"))
        .replace("\\n", "\n");
    let code = lines[..lines.len() - 1].join("\n");
    (code, expected)
}

fn run_fixture_test(path: &Path) -> Result<(), Box<dyn Error>> {
    let content = fs::read_to_string(path)?;
    let (code, expected) = parse_fixture(&content);
    let mut sink = CollectStringPrint::new();
    run_source(&code, &mut sink).unwrap_or_else(|e| panic!("[{}] unexpected parse error: {e}", path.display()));
    assert_eq!(sink.into_string(), expected, "[{}] output mismatch", path.display());
    Ok(())
}

datatest_stable::harness!(run_fixture_test, "test_cases", r"^.*\.vsp$");
