//! Output formatting for CLI commands.

use std::str::FromStr;

use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};
use verity_harness::report::{CheckResult, Outcome, RunReport};

use crate::error::CliError;

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON format.
    Json,
}

impl FromStr for OutputFormat {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            other => Err(CliError::UnknownFormat(other.to_string())),
        }
    }
}

/// Print data in the specified format.
pub fn print_output<T: Serialize + Tabled>(data: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if data.is_empty() {
                println!("{}", "No items found.".dimmed());
            } else {
                println!("{}", Table::new(data));
            }
        }
        OutputFormat::Json => println!("{}", format_json(data, "[]")),
    }
}

/// Print a single item as JSON.
pub fn print_single<T: Serialize>(data: &T) {
    println!("{}", format_json(data, "{}"));
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "Success:".green().bold(), message);
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "Info:".blue().bold(), message);
}

fn format_json<T: Serialize + ?Sized>(data: &T, fallback: &str) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| fallback.to_string())
}

/// One row of the results table.
#[derive(Debug, Serialize, Tabled)]
pub struct ResultRow {
    #[tabled(rename = "CHECK")]
    pub check: String,
    #[tabled(rename = "FAMILY")]
    pub family: String,
    #[tabled(rename = "STATUS")]
    pub status: String,
    #[tabled(rename = "TIME")]
    pub duration: String,
    #[tabled(rename = "DETAIL")]
    pub detail: String,
}

impl From<&CheckResult> for ResultRow {
    fn from(result: &CheckResult) -> Self {
        let (status, detail) = match &result.outcome {
            Outcome::Passed => ("passed".green().to_string(), String::new()),
            Outcome::Failed(message) => ("failed".red().bold().to_string(), message.clone()),
            Outcome::Skipped(reason) => ("skipped".yellow().to_string(), reason.clone()),
        };
        Self {
            check: result.name.clone(),
            family: result.family.to_string(),
            status,
            duration: format!("{:.1}s", result.duration.as_secs_f64()),
            detail,
        }
    }
}

/// Print every check result followed by a one-line summary.
pub fn print_report(report: &RunReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_single(report),
        OutputFormat::Table => {
            let rows: Vec<ResultRow> = report.results.iter().map(ResultRow::from).collect();
            print_output(&rows, format);
            let summary = format!(
                "{} passed, {} failed, {} skipped ({} on {})",
                report.passed(),
                report.failed(),
                report.skipped(),
                report.scenario,
                report.release
            );
            if report.failed() == 0 {
                print_success(&summary);
            } else {
                println!("{} {}", "Failed:".red().bold(), summary);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use verity_harness::report::CheckFamily;

    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("table".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_result_row_detail() {
        colored::control::set_override(false);
        let result = CheckResult::failed(
            "ceph config",
            CheckFamily::ConfigFile,
            "[global] fsid:x != expected fsid:y",
            Duration::from_millis(1500),
        );
        let row = ResultRow::from(&result);
        assert_eq!(row.status, "failed");
        assert_eq!(row.family, "config_file");
        assert_eq!(row.duration, "1.5s");
        assert_eq!(row.detail, "[global] fsid:x != expected fsid:y");
    }
}
