use colored::Colorize;
use sapl_core::{AuthorizationDecision, Decision};

use crate::cli::OutputFormat;

pub fn print_decision(decision: &AuthorizationDecision, format: OutputFormat) {
    println!("{}", render_decision(decision, format));
}

pub fn render_decision(decision: &AuthorizationDecision, format: OutputFormat) -> String {
    let json = decision.to_value().to_json();
    match format {
        OutputFormat::Json => json.to_string(),
        OutputFormat::Pretty => serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string()),
        OutputFormat::Text => {
            let label = match decision.decision {
                Decision::Permit => decision.decision.as_str().green(),
                Decision::Deny => decision.decision.as_str().red(),
                Decision::NotApplicable => decision.decision.as_str().yellow(),
                Decision::Indeterminate => decision.decision.as_str().magenta(),
            };
            let mut line = label.bold().to_string();
            if !decision.obligations.is_empty() {
                line.push_str(&format!(" obligations={}", decision.obligations.len()));
            }
            if !decision.advice.is_empty() {
                line.push_str(&format!(" advice={}", decision.advice.len()));
            }
            if decision.has_resource() {
                line.push_str(&format!(" resource={}", decision.resource));
            }
            for error in &decision.errors {
                line.push_str(&format!("\n  {} {error}", "error:".red()));
            }
            line
        }
    }
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}
