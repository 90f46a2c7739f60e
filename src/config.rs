use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use directories::ProjectDirs;
use jsonschema::{Draft, JSONSchema};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use serde_json::Value;

pub const DEFAULT_PAGE_SIZE: usize = 10;
const CONFIG_FILE_NAME: &str = "gemini-usage.json";
const DATA_DIR_ENV: &str = "GEMINI_CONFIG_DIR";

static CONFIG_SCHEMA: OnceCell<JSONSchema> = OnceCell::new();
static CONFIG_SCHEMA_JSON: OnceCell<Value> = OnceCell::new();

#[derive(Debug, Default, Deserialize)]
pub struct DefaultsConfig {
    pub json: Option<bool>,
    pub models: Option<bool>,
    pub filter: Option<String>,
    pub timezone: Option<String>,
    pub locale: Option<String>,
    pub pricing_file: Option<PathBuf>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CommandConfigs {
    pub report: Option<DefaultsConfig>,
    pub dashboard: Option<DefaultsConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub defaults: Option<DefaultsConfig>,
    pub commands: Option<CommandConfigs>,
}

impl FileConfig {
    pub fn defaults(&self) -> Option<&DefaultsConfig> {
        self.defaults.as_ref()
    }

    pub fn report(&self) -> Option<&DefaultsConfig> {
        self.commands.as_ref().and_then(|c| c.report.as_ref())
    }

    pub fn dashboard(&self) -> Option<&DefaultsConfig> {
        self.commands.as_ref().and_then(|c| c.dashboard.as_ref())
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "gemini-usage", "gemini-usage")
}

/// Looks for `--config`, then `./gemini-usage.json`, then the per-user config dir.
pub fn load_config(path: Option<&PathBuf>) -> Result<FileConfig> {
    let candidate = if let Some(p) = path {
        Some(p.clone())
    } else {
        let cwd = PathBuf::from(CONFIG_FILE_NAME);
        if cwd.exists() {
            Some(cwd)
        } else {
            project_dirs()
                .map(|dirs| dirs.config_dir().join("config.json"))
                .filter(|p| p.exists())
        }
    };

    let Some(path) = candidate else {
        return Ok(FileConfig::default());
    };
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    validate_config(&value)?;
    let cfg: FileConfig = serde_json::from_value(value)
        .with_context(|| format!("Failed to deserialize config file {}", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(cfg)
}

fn validate_config(value: &Value) -> Result<()> {
    let schema = config_schema()?;
    let violations: Vec<String> = match schema.validate(value) {
        Ok(()) => return Ok(()),
        Err(errors) => errors
            .map(|err| format!(" - {} at {}", err, err.instance_path))
            .collect(),
    };
    anyhow::bail!("Config validation failed:\n{}", violations.join("\n"))
}

fn config_schema() -> Result<&'static JSONSchema> {
    let schema_value = CONFIG_SCHEMA_JSON.get_or_try_init(|| {
        serde_json::from_str(include_str!("../config-schema.json")).context("parsing config schema")
    })?;
    CONFIG_SCHEMA.get_or_try_init(|| {
        JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(schema_value)
            .map_err(|e| anyhow!("compiling config schema: {e}"))
    })
}

/// First value set among the CLI flag, the command section and the `defaults` section.
pub fn layered<T: Clone>(cli: Option<&T>, cmd: Option<&T>, defaults: Option<&T>) -> Option<T> {
    cli.or(cmd).or(defaults).cloned()
}

/// Defaults to UTC. Only decides which calendar day is "today".
pub fn parse_timezone(raw: Option<&str>) -> Result<Tz> {
    let name = raw.unwrap_or("UTC");
    name.parse::<Tz>()
        .map_err(|e| anyhow!("Invalid timezone '{name}': {e}. Use an IANA name such as 'Europe/Berlin'"))
}

/// The reference date for named ranges: `--today` if given, else the clock in `tz`.
pub fn reference_date(explicit: Option<&str>, tz: &Tz) -> Result<NaiveDate> {
    match explicit {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .with_context(|| format!("Could not parse --today '{raw}', expected YYYY-MM-DD")),
        None => Ok(Utc::now().with_timezone(tz).date_naive()),
    }
}

/// Gemini homes: `--data-dir` flags, else the comma-separated `GEMINI_CONFIG_DIR`, else `~/.gemini`.
pub fn resolve_data_dirs(cli_dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if !cli_dirs.is_empty() {
        return Ok(cli_dirs.iter().map(|d| expand_tilde(d)).collect());
    }
    let from_env: Vec<PathBuf> = std::env::var(DATA_DIR_ENV)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| expand_tilde(Path::new(p)))
                .collect()
        })
        .unwrap_or_default();
    if !from_env.is_empty() {
        return Ok(from_env);
    }
    let home = home_dir()
        .with_context(|| format!("no home directory; pass --data-dir or set {DATA_DIR_ENV}"))?;
    Ok(vec![home.join(".gemini")])
}

pub fn expand_tilde(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

/// Where the dashboard appends its log output.
pub fn dashboard_log_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_local_dir().join("dashboard.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_command_and_defaults() {
        assert_eq!(layered(Some(&true), Some(&false), Some(&false)), Some(true));
        assert_eq!(layered(None, Some(&false), Some(&true)), Some(false));
        assert_eq!(layered(None, None, Some(&true)), Some(true));
        assert_eq!(layered::<usize>(None, None, None), None);
        let cmd = "today".to_string();
        let def = "all".to_string();
        assert_eq!(layered(None, Some(&cmd), Some(&def)).as_deref(), Some("today"));
    }

    #[test]
    fn tilde_paths_expand_to_home() {
        let Some(home) = home_dir() else { return };
        assert_eq!(expand_tilde(Path::new("~/.gemini")), home.join(".gemini"));
        assert_eq!(expand_tilde(Path::new("/tmp/x")), PathBuf::from("/tmp/x"));
        let dirs = resolve_data_dirs(&[PathBuf::from("~/a"), PathBuf::from("b")]).unwrap();
        assert_eq!(dirs, vec![home.join("a"), PathBuf::from("b")]);
    }

    #[test]
    fn config_file_is_schema_checked() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.json");
        std::fs::write(
            &good,
            r#"{"defaults": {"models": true}, "commands": {"dashboard": {"page_size": 5}}}"#,
        )
        .unwrap();
        let cfg = load_config(Some(&good)).unwrap();
        assert_eq!(cfg.defaults().and_then(|d| d.models), Some(true));
        assert_eq!(cfg.dashboard().and_then(|d| d.page_size), Some(5));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"{"defaults": {"page_size": "ten"}}"#).unwrap();
        let err = load_config(Some(&bad)).unwrap_err().to_string();
        assert!(err.contains("Config validation failed"), "{err}");
    }

    #[test]
    fn explicit_reference_date_wins() {
        let tz = parse_timezone(None).unwrap();
        let date = reference_date(Some("2026-02-05"), &tz).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2026, 2, 5).unwrap());
        assert!(reference_date(Some("05/02/2026"), &tz).is_err());
        assert!(parse_timezone(Some("Mars/Olympus")).is_err());
    }
}
