//! `murmur doctor`: config validation plus a look at the paths and external
//! tools the daemon will use.

use std::path::PathBuf;

use murmur_config::{Diagnostic, MurmurConfig, Severity};

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Print the report. Returns `false` when any error diagnostic exists.
pub fn run(config: &MurmurConfig) -> bool {
    let result = murmur_config::validate(config);

    eprintln!("{BOLD}Diagnostics{RESET}");
    if result.diagnostics.is_empty() {
        eprintln!("  No issues found.");
    }
    for d in &result.diagnostics {
        eprintln!("  {}", format_diagnostic(d));
    }

    eprintln!("\n{BOLD}Paths{RESET}");
    for (label, path) in path_rows(config) {
        let marker = if path.exists() {
            format!("{GREEN}ok{RESET}")
        } else {
            format!("{YELLOW}missing{RESET}")
        };
        eprintln!("  [{marker}] {label:<10} {}", path.display());
    }

    eprintln!("\n{BOLD}Tools{RESET}");
    let tools = [
        ("claude", Some(config.agent.resolved_binary())),
        ("ffmpeg", config.voice.ffmpeg_path.clone()),
        ("whisper", config.voice.whisper_path.clone()),
        ("node", None),
    ];
    for (name, explicit) in tools {
        let found = explicit
            .filter(|p| p.is_absolute() && p.exists())
            .or_else(|| which::which(name).ok());
        match found {
            Some(path) => eprintln!("  [{GREEN}ok{RESET}] {name:<10} {}", path.display()),
            None => eprintln!("  [{YELLOW}missing{RESET}] {name}"),
        }
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    eprintln!("\n{errors} error(s), {warnings} warning(s)");
    !result.has_errors()
}

fn format_diagnostic(d: &Diagnostic) -> String {
    let (color, label) = match d.severity {
        Severity::Error => (RED, "error"),
        Severity::Warning => (YELLOW, "warning"),
        Severity::Info => (CYAN, "info"),
    };
    if d.path.is_empty() {
        format!("{BOLD}{color}{label}{RESET} {}", d.message)
    } else {
        format!("{BOLD}{color}{label}{RESET} {}: {}", d.path, d.message)
    }
}

fn path_rows(config: &MurmurConfig) -> Vec<(&'static str, PathBuf)> {
    vec![
        ("data", config.data_dir.clone()),
        ("history", config.history_dir()),
        ("auth", config.auth_dir()),
        ("media", config.media_tmp_dir()),
        ("files", config.files_dir.clone()),
        ("project", config.agent.project_dir.clone()),
        ("log", config.log_file()),
    ]
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_diagnostic_with_path() {
        let d = Diagnostic {
            severity: Severity::Warning,
            category: "access",
            path: "allowlist".into(),
            message: "empty allowlist: nobody can use the assistant".into(),
        };
        let line = format_diagnostic(&d);
        assert!(line.contains("warning"));
        assert!(line.ends_with("allowlist: empty allowlist: nobody can use the assistant"));
    }

    #[test]
    fn test_path_rows_follow_data_dir() {
        let config = MurmurConfig {
            data_dir: PathBuf::from("/srv/murmur"),
            ..Default::default()
        };
        let rows = path_rows(&config);
        let get = |label: &str| rows.iter().find(|(l, _)| *l == label).unwrap().1.clone();
        assert_eq!(get("history"), PathBuf::from("/srv/murmur/history"));
        assert_eq!(get("auth"), PathBuf::from("/srv/murmur/auth_info"));
        assert_eq!(get("media"), PathBuf::from("/srv/murmur/media_tmp"));
    }

    #[test]
    fn test_run_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let config = MurmurConfig {
            data_dir: dir.path().to_path_buf(),
            log_dir: dir.path().join("logs"),
            files_dir: dir.path().join("files"),
            ..Default::default()
        };
        let expected = !murmur_config::validate(&config).has_errors();
        assert_eq!(run(&config), expected);
    }
}
