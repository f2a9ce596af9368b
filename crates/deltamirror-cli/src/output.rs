//! Output formatting for CLI commands
//!
//! Human output goes to stdout with status markers; warnings and errors go
//! to stderr. JSON mode prints one document per line so `watch --json` can
//! be piped into line-oriented tools, and drops informational lines.

use serde_json::{json, Value};

/// Output format selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Sink for command results
pub trait OutputFormatter {
    fn success(&self, message: &str);
    fn error(&self, message: &str);
    fn warn(&self, message: &str);
    fn info(&self, message: &str);
    fn print_json(&self, value: &Value);
}

const MARK_OK: char = '\u{2713}';
const MARK_ERR: char = '\u{2717}';
const MARK_WARN: char = '\u{26a0}';

pub struct HumanFormatter;

impl OutputFormatter for HumanFormatter {
    fn success(&self, message: &str) {
        println!("{MARK_OK} {message}");
    }

    fn error(&self, message: &str) {
        eprintln!("{MARK_ERR} Error: {message}");
    }

    fn warn(&self, message: &str) {
        eprintln!("{MARK_WARN} Warning: {message}");
    }

    fn info(&self, message: &str) {
        println!("  {message}");
    }

    fn print_json(&self, _value: &Value) {}
}

pub struct JsonFormatter;

impl JsonFormatter {
    fn line(value: &Value) -> String {
        serde_json::to_string(value).unwrap_or_default()
    }
}

impl OutputFormatter for JsonFormatter {
    fn success(&self, message: &str) {
        println!("{}", Self::line(&json!({"success": true, "message": message})));
    }

    fn error(&self, message: &str) {
        eprintln!("{}", Self::line(&json!({"success": false, "error": message})));
    }

    fn warn(&self, message: &str) {
        eprintln!("{}", Self::line(&json!({"level": "warning", "message": message})));
    }

    fn info(&self, _message: &str) {}

    fn print_json(&self, value: &Value) {
        println!("{}", Self::line(value));
    }
}

pub fn get_formatter(json: bool) -> Box<dyn OutputFormatter> {
    if json {
        Box::new(JsonFormatter)
    } else {
        Box::new(HumanFormatter)
    }
}
