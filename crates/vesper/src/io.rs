//! `print` sinks.
//!
//! `run_source` never writes to stdout directly — it takes a `PrintWriter`
//! so tests and embedders can capture output instead of inheriting the
//! process's stdout.

/// Destination for `print` statement output.
pub trait PrintWriter {
    fn print(&mut self, text: &str);
}

/// Writes each line straight to stdout — what the CLI binary uses.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn print(&mut self, text: &str) {
        println!("{text}");
    }
}

/// Discards everything written to it.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn print(&mut self, _text: &str) {}
}

/// Collects every line into an owned buffer, newline-joined — what the test
/// suite uses to assert on a program's output.
#[derive(Debug, Default)]
pub struct CollectStringPrint {
    lines: Vec<String>,
}

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.lines.join("\n")
    }

    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl PrintWriter for CollectStringPrint {
    fn print(&mut self, text: &str) {
        self.lines.push(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_joins_with_newlines() {
        let mut sink = CollectStringPrint::new();
        sink.print("a");
        sink.print("b");
        assert_eq!(sink.into_string(), "a\nb");
    }

    #[test]
    fn no_print_discards_everything() {
        let mut sink = NoPrint;
        sink.print("whatever");
    }
}
