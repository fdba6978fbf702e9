use std::fmt::Write;
use std::path::Path;

use anyhow::{Context, Result};
use sandstone::compile::Backend;
use sandstone::eval::{Decision, Evaluator, Request};
use sandstone::sbpl::Parameters;
use serde_json::json;
use tracing::{Level, info, instrument};

use crate::settings::SandtoolSettings;
use crate::style;

/// Options for `sandtool check`.
#[derive(Debug)]
pub struct CheckArgs<'a> {
    pub file: &'a Path,
    pub operation: &'a str,
    pub argument: Option<&'a str>,
    pub entitlements: &'a [String],
    /// Profile index or name.
    pub profile: &'a str,
    pub params: &'a [(String, String)],
    pub json: bool,
    pub operations: Option<&'a Path>,
}

#[instrument(level = Level::TRACE)]
pub fn run(args: CheckArgs<'_>, verbose: bool) -> Result<()> {
    let settings = SandtoolSettings::load()?;
    let bytes = super::read_bytes(args.file)?;
    let out = execute(&settings, &bytes, &args, verbose)?;
    print!("{out}");
    Ok(())
}

/// Evaluate the request against `bytes`, compiling them first when they hold
/// SBPL source. Returns the rendered decision.
pub fn execute(
    settings: &SandtoolSettings,
    bytes: &[u8],
    args: &CheckArgs<'_>,
    verbose: bool,
) -> Result<String> {
    let params = settings.parameters(args.params);
    let evaluator = evaluator(settings, bytes, args, &params)?;

    let profile = select_profile(&evaluator, args.profile)?;
    let mut request = Request::new(args.operation);
    if let Some(argument) = args.argument {
        request = request.with_argument(argument);
    }
    for key in args.entitlements {
        request = request.with_entitlement(key.as_str());
    }

    let decision = evaluator
        .evaluate(profile, &request)
        .with_context(|| format!("failed to evaluate {}", args.operation))?;
    info!(operation = args.operation, action = %decision.action, "checked request");

    if args.json {
        return Ok(format!(
            "{}\n",
            serde_json::to_string_pretty(&json!({
                "profile": profile,
                "request": {
                    "operation": request.operation,
                    "argument": request.argument,
                    "entitlements": request.entitlements,
                },
                "decision": decision,
            }))?
        ));
    }
    Ok(render(&evaluator, &request, &decision, verbose))
}

fn evaluator(
    settings: &SandtoolSettings,
    bytes: &[u8],
    args: &CheckArgs<'_>,
    params: &Parameters,
) -> Result<Evaluator> {
    let table = settings.operation_table(args.operations)?;
    let compiled;
    let bytecode = if super::is_source(bytes) {
        let source = std::str::from_utf8(bytes).context("profile source is not UTF-8")?;
        compiled = super::compile::compile(source, params, Backend::Builtin, table.clone())
            .with_context(|| format!("failed to compile {}", args.file.display()))?;
        compiled.bytecode()
    } else {
        bytes
    };

    let evaluator = Evaluator::new(bytecode, table)
        .with_context(|| format!("failed to load {}", args.file.display()))?;
    Ok(params
        .iter()
        .fold(evaluator, |evaluator, (name, value)| evaluator.with_variable(name, value)))
}

fn select_profile(evaluator: &Evaluator, selector: &str) -> Result<usize> {
    if let Ok(index) = selector.parse::<usize>() {
        return Ok(index);
    }
    evaluator
        .wrapper()
        .profile_index(selector)
        .with_context(|| format!("no profile named '{selector}'"))
}

fn render(evaluator: &Evaluator, request: &Request, decision: &Decision, verbose: bool) -> String {
    let mut verdict = decision.action.to_string();
    if !decision.modifiers.is_empty() {
        verdict = format!("{verdict} (with {})", decision.modifiers);
    }

    let mut out = String::new();
    let _ = write!(out, "{} {}", style::action(&verdict), style::cyan(&request.operation));
    if let Some(argument) = &request.argument {
        let _ = write!(out, " {argument}");
    }
    out.push('\n');

    if verbose {
        for index in &decision.trace {
            if let Some(node) = evaluator.wrapper().nodes.get(usize::from(*index)) {
                let _ = writeln!(out, "  {} {}", style::dim(&format!("node {index}:")), node);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"
        (version 1)
        (deny default)
        (allow file-read* (subpath "/usr/lib"))
        (allow file-write* (subpath "${HOME}/Library"))
        (allow mach-lookup (entitlement-is-present "com.apple.security.network.client"))
    "#;

    fn args<'a>(
        operation: &'a str,
        argument: Option<&'a str>,
        entitlements: &'a [String],
        params: &'a [(String, String)],
    ) -> CheckArgs<'a> {
        CheckArgs {
            file: Path::new("app.sb"),
            operation,
            argument,
            entitlements,
            profile: "0",
            params,
            json: false,
            operations: None,
        }
    }

    fn check(args: &CheckArgs<'_>) -> String {
        let out = execute(&SandtoolSettings::default(), PROFILE.as_bytes(), args, false).unwrap();
        console::strip_ansi_codes(&out).into_owned()
    }

    #[test]
    fn allows_matching_path() {
        let out = check(&args("file-read-data", Some("/usr/lib/dyld"), &[], &[]));
        assert_eq!(out, "allow file-read-data /usr/lib/dyld\n");
    }

    #[test]
    fn denies_everything_else() {
        let out = check(&args("file-read-data", Some("/etc/passwd"), &[], &[]));
        assert!(out.starts_with("deny "));
    }

    #[test]
    fn params_expand_pattern_variables() {
        let params = [("HOME".to_string(), "/Users/me".to_string())];
        let out = check(&args(
            "file-write-data",
            Some("/Users/me/Library/Prefs"),
            &[],
            &params,
        ));
        assert!(out.starts_with("allow "));
    }

    #[test]
    fn entitlements_are_matched() {
        let held = ["com.apple.security.network.client".to_string()];
        assert!(check(&args("mach-lookup", None, &held, &[])).starts_with("allow "));
        assert!(check(&args("mach-lookup", None, &[], &[])).starts_with("deny "));
    }

    #[test]
    fn checks_compiled_bytecode() {
        let profile = sandstone::compile_string(PROFILE, &Parameters::new()).unwrap();
        let out = execute(
            &SandtoolSettings::default(),
            profile.bytecode(),
            &args("file-read-metadata", Some("/usr/lib"), &[], &[]),
            false,
        )
        .unwrap();
        assert!(console::strip_ansi_codes(&out).starts_with("allow "));
    }

    #[test]
    fn json_output() {
        let mut check_args = args("file-read-data", Some("/usr/lib/dyld"), &[], &[]);
        check_args.json = true;
        let out = execute(&SandtoolSettings::default(), PROFILE.as_bytes(), &check_args, false).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["decision"]["action"], "allow");
        assert!(value["decision"]["trace"].as_array().is_some_and(|t| !t.is_empty()));
    }

    #[test]
    fn unknown_profile_name() {
        let mut check_args = args("file-read-data", None, &[], &[]);
        check_args.profile = "browser";
        let err = execute(&SandtoolSettings::default(), PROFILE.as_bytes(), &check_args, false).unwrap_err();
        assert!(err.to_string().contains("no profile named 'browser'"));
    }
}
