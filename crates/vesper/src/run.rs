//! Top-level driver: lex → parse → evaluate.
//!
//! Parse errors are fatal to the whole program — `parser::parse` already
//! discards the node sequence if any statement failed to parse. Runtime
//! errors are not: each top-level node is evaluated independently, and an
//! error there aborts only that statement — the message is printed through
//! the same sink `print` uses, and evaluation resumes at the next top-level
//! node.

use crate::env::{EnvRef, Environment};
use crate::error::{Flow, ParseOutcome, VesperError};
use crate::io::PrintWriter;
use crate::lexer::tokenize;
use crate::parser::parse;
use crate::value::Value;

/// Runs `code` to completion against a fresh global scope, sending `print`
/// output to `print`. Returns the parsed program's node count on success (an
/// embedder has little use for the last top-level value, since a runtime
/// error part-way through doesn't abort the whole run); returns the parse
/// failure if the source didn't parse at all.
pub fn run_source<P: PrintWriter>(code: &str, print: &mut P) -> Result<usize, ParseOutcome> {
    let tokens = tokenize(code);
    let nodes = parse(tokens)?;
    let global = Environment::new_global();
    run_nodes(&nodes, &global, print);
    Ok(nodes.len())
}

/// Evaluates already-parsed top-level nodes against `env`, isolating each
/// one's runtime errors to that statement alone.
pub fn run_nodes<P: PrintWriter>(nodes: &[crate::ast::Node], env: &EnvRef, print: &mut P) {
    for node in nodes {
        match crate::evaluator::eval_node(node, env, print) {
            Ok(_) => {}
            Err(Flow::Error(err)) => print.print(&format_runtime_error(&err)),
            Err(Flow::Break | Flow::Continue | Flow::Return(_)) => {
                print.print(&format_runtime_error(&VesperError::Internal(
                    "control-flow signal escaped to top level".into(),
                )));
            }
        }
    }
}

fn format_runtime_error(err: &VesperError) -> String {
    format!("error: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::CollectStringPrint;

    #[test]
    fn runtime_error_isolates_to_one_statement_and_resumes() {
        let mut sink = CollectStringPrint::new();
        run_source("print 1 + true\nprint 2\n", &mut sink).unwrap();
        let lines = sink.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("error:"));
        assert_eq!(lines[1], "2");
    }

    #[test]
    fn parse_error_discards_whole_program_and_runs_nothing() {
        let mut sink = CollectStringPrint::new();
        let outcome = run_source("var x = \nprint 1\n", &mut sink);
        assert!(outcome.is_err());
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn clean_program_prints_only_its_own_output() {
        let mut sink = CollectStringPrint::new();
        run_source("print 1 + 2\n", &mut sink).unwrap();
        assert_eq!(sink.into_string(), "3");
    }
}
