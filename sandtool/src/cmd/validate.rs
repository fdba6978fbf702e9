use std::fmt::Write;
use std::path::Path;

use anyhow::{Result, bail};
use sandstone::operations::OperationTable;
use sandstone::sbpl::validate::diagnostics;
use sandstone::sbpl::{Parameters, PolicyError, parse_policy};
use serde::Serialize;
use tracing::{Level, instrument};

use crate::settings::SandtoolSettings;
use crate::style;

#[derive(Debug, Serialize)]
pub struct Report {
    pub file: String,
    pub valid: bool,
    /// Rules parsed; absent when the source did not parse.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<usize>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Serialize)]
pub struct Diagnostic {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

impl From<&PolicyError> for Diagnostic {
    fn from(err: &PolicyError) -> Self {
        Self {
            message: err.to_string(),
            help: err.help(),
        }
    }
}

#[instrument(level = Level::TRACE)]
pub fn run(
    file: &Path,
    json: bool,
    params: &[(String, String)],
    operations: Option<&Path>,
) -> Result<()> {
    let settings = SandtoolSettings::load()?;
    let source = super::read_source(file)?;
    let table = settings.operation_table(operations)?;
    let report = check(file, &source, &settings.parameters(params), &table);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render(&report));
    }
    if !report.valid {
        bail!(
            "{} has {} problem(s)",
            report.file,
            report.diagnostics.len()
        );
    }
    Ok(())
}

/// Parse and validate `source`, collecting every problem.
pub fn check(file: &Path, source: &str, params: &Parameters, table: &OperationTable) -> Report {
    let (rules, errors) = match parse_policy(source, params) {
        Ok(policy) => (
            Some(policy.rules.len()),
            diagnostics(&policy, source, table),
        ),
        Err(err) => (None, vec![err]),
    };
    Report {
        file: file.display().to_string(),
        valid: errors.is_empty(),
        rules,
        diagnostics: errors.iter().map(Diagnostic::from).collect(),
    }
}

fn render(report: &Report) -> String {
    let mut out = String::new();
    if report.valid {
        let _ = writeln!(
            out,
            "{} {} ({} rules)",
            style::green("ok"),
            report.file,
            report.rules.unwrap_or_default()
        );
        return out;
    }
    for diagnostic in &report.diagnostics {
        let _ = writeln!(out, "{}:{}", report.file, diagnostic.message);
        if let Some(help) = &diagnostic.help {
            let _ = writeln!(out, "  {}: {}", style::cyan("help"), help);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(source: &str) -> Report {
        check(
            Path::new("app.sb"),
            source,
            &Parameters::new(),
            &OperationTable::default(),
        )
    }

    #[test]
    fn valid_profile() {
        let report = report("(version 1)\n(deny default)\n(allow file-read* (subpath \"/usr\"))");
        assert!(report.valid);
        assert_eq!(report.rules, Some(2));
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn collects_every_problem() {
        let report = report(
            "(version 1)\n(allow file-raed* (subpath \"/usr\"))\n(allow file-read* (regex #\"[\"))",
        );
        assert!(!report.valid);
        assert_eq!(report.diagnostics.len(), 2);
        assert!(report.diagnostics[0].message.contains("file-raed*"));
        assert!(report.diagnostics[0].help.is_some());
        assert!(report.diagnostics[1].message.contains("invalid regex"));
    }

    #[test]
    fn syntax_error_has_no_rule_count() {
        let report = report("(version 1)\n(allow default");
        assert!(!report.valid);
        assert_eq!(report.rules, None);
        assert_eq!(report.diagnostics.len(), 1);
    }

    #[test]
    fn json_shape() {
        let report = report("(version 7)");
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["valid"], false);
        assert_eq!(value["file"], "app.sb");
        assert!(value["diagnostics"][0]["help"].is_string());
    }
}
