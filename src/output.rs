//! Human and structured rendering.
//!
//! Structured mode writes exactly one JSON document to stdout per command.
//! Human mode writes results to stdout and errors to stderr.

use std::io::{self, Write};

use launchpad_mcp::GatewayError;
use serde_json::{json, Value};

/// What a command produced.
#[derive(Debug, Clone)]
pub struct Report {
    pub data: Value,
    pub human: String,
    /// `call` puts its payload under `result`; everything else under `data`.
    call: bool,
}

impl Report {
    pub fn data(data: Value, human: impl Into<String>) -> Self {
        Self {
            data,
            human: human.into(),
            call: false,
        }
    }

    pub fn call_result(result: Value, human: impl Into<String>) -> Self {
        Self {
            data: result,
            human: human.into(),
            call: true,
        }
    }

    pub fn to_json(&self) -> Value {
        if self.call {
            json!({ "success": true, "result": self.data })
        } else {
            json!({ "success": true, "data": self.data })
        }
    }
}

pub fn error_json(err: &GatewayError) -> Value {
    json!({ "success": false, "error": err.to_json() })
}

/// `Error: <message>` followed by the hint.
pub fn error_text(err: &GatewayError) -> String {
    format!("Error: {}\n\n{}", err, err.help())
}

#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn report(&self, report: &Report) {
        if self.json {
            print_json(&report.to_json());
        } else if !report.human.is_empty() {
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "{}", report.human.trim_end());
        }
    }

    pub fn error(&self, err: &GatewayError) {
        if self.json {
            print_json(&error_json(err));
        } else {
            let _ = writeln!(io::stderr().lock(), "{}", error_text(err));
        }
    }
}

fn print_json(value: &Value) {
    let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    let _ = writeln!(io::stdout().lock(), "{}", text);
}
