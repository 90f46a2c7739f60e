use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

use anyhow::Context;
use jsonschema::{Draft, JSONSchema};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::UsageError;

/// Input-token count above which long-context families switch tiers.
pub const LONG_CONTEXT_THRESHOLD: u64 = 200_000;

const TOKENS_PER_MILLION: f64 = 1_000_000.0;

static OVERRIDE_SCHEMA: OnceCell<JSONSchema> = OnceCell::new();
static OVERRIDE_SCHEMA_JSON: OnceCell<Value> = OnceCell::new();

/// Dollar rates per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rates {
    pub input: f64,
    pub cached: f64,
    pub output: f64,
}

/// One pricing tier. `token_threshold` is the largest input count the tier covers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingRule {
    #[serde(flatten)]
    pub rates: Rates,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_threshold: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelPricing {
    tiers: Vec<PricingRule>,
}

impl ModelPricing {
    pub fn flat(rates: Rates) -> Self {
        ModelPricing {
            tiers: vec![PricingRule {
                rates,
                token_threshold: None,
            }],
        }
    }

    pub fn tiered(small: Rates, threshold: u64, large: Rates) -> Self {
        ModelPricing {
            tiers: vec![
                PricingRule {
                    rates: small,
                    token_threshold: Some(threshold),
                },
                PricingRule {
                    rates: large,
                    token_threshold: None,
                },
            ],
        }
    }

    pub fn tiers(&self) -> &[PricingRule] {
        &self.tiers
    }

    /// Picks the tier governing a whole call; calls are never split across tiers.
    pub fn tier_for(&self, input: u64) -> &Rates {
        let tier = self
            .tiers
            .iter()
            .find(|t| t.token_threshold.is_none_or(|limit| input <= limit))
            .or_else(|| self.tiers.last());
        match tier {
            Some(t) => &t.rates,
            None => &PRO_SMALL,
        }
    }

    pub fn cost(&self, input: u64, cached: u64, output: u64) -> f64 {
        let rates = self.tier_for(input);
        (input as f64 * rates.input + cached as f64 * rates.cached + output as f64 * rates.output)
            / TOKENS_PER_MILLION
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    FlashLite,
    Flash,
    Pro,
}

impl Family {
    pub fn name(self) -> &'static str {
        match self {
            Family::FlashLite => "flash-lite",
            Family::Flash => "flash",
            Family::Pro => "pro",
        }
    }

    pub fn pricing(self) -> ModelPricing {
        match self {
            Family::FlashLite => ModelPricing::flat(FLASH_LITE),
            Family::Flash => ModelPricing::flat(FLASH),
            Family::Pro => ModelPricing::tiered(PRO_SMALL, LONG_CONTEXT_THRESHOLD, PRO_LARGE),
        }
    }
}

const FLASH_LITE: Rates = Rates {
    input: 0.10,
    cached: 0.025,
    output: 0.40,
};
const FLASH: Rates = Rates {
    input: 0.30,
    cached: 0.075,
    output: 2.50,
};
const PRO_SMALL: Rates = Rates {
    input: 1.25,
    cached: 0.31,
    output: 10.0,
};
const PRO_LARGE: Rates = Rates {
    input: 2.50,
    cached: 0.625,
    output: 15.0,
};

/// Which rule priced a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    Override,
    Family(Family),
    /// No family matched; pro tiers are charged so unknown models are overestimated
    /// rather than reported as free.
    Fallback,
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceSource::Override => write!(f, "override"),
            PriceSource::Family(family) => write!(f, "{}", family.name()),
            PriceSource::Fallback => write!(f, "fallback (pro)"),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct OverrideFile {
    #[serde(default)]
    pub flash_patterns: Vec<String>,
    #[serde(default)]
    pub pro_patterns: Vec<String>,
    #[serde(default)]
    pub models: HashMap<String, ModelOverride>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ModelOverride {
    Tiered { tiers: Vec<PricingRule> },
    Flat(Rates),
}

impl From<ModelOverride> for ModelPricing {
    fn from(value: ModelOverride) -> Self {
        match value {
            ModelOverride::Flat(rates) => ModelPricing::flat(rates),
            ModelOverride::Tiered { tiers } => ModelPricing { tiers },
        }
    }
}

/// The currently loaded pricing: user overrides layered over the built-in families.
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    overrides: HashMap<String, ModelPricing>,
    flash_patterns: Vec<String>,
    pro_patterns: Vec<String>,
    warning: Option<String>,
}

impl PricingTable {
    pub fn builtin() -> Self {
        PricingTable::default()
    }

    pub fn from_overrides(file: OverrideFile) -> Self {
        PricingTable {
            overrides: file
                .models
                .into_iter()
                .map(|(model, o)| (model, ModelPricing::from(o)))
                .collect(),
            flash_patterns: lowercase_all(file.flash_patterns),
            pro_patterns: lowercase_all(file.pro_patterns),
            warning: None,
        }
    }

    /// Loads the override file at `path`. Never fails: a malformed file is
    /// logged, remembered as a warning and replaced by built-in pricing.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return PricingTable::builtin();
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no pricing override file");
            return PricingTable::builtin();
        }
        match read_override_file(path) {
            Ok(file) => {
                tracing::debug!(
                    path = %path.display(),
                    models = file.models.len(),
                    "loaded pricing overrides"
                );
                PricingTable::from_overrides(file)
            }
            Err(err) => {
                tracing::warn!(error = %err, "using built-in pricing");
                PricingTable {
                    warning: Some(err.to_string()),
                    ..PricingTable::builtin()
                }
            }
        }
    }

    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }

    pub fn source(&self, model: &str) -> PriceSource {
        if self.overrides.contains_key(model) {
            return PriceSource::Override;
        }
        let lower = model.to_lowercase();
        if lower.contains("flash-lite") {
            PriceSource::Family(Family::FlashLite)
        } else if lower.contains("flash") || matches_any(&lower, &self.flash_patterns) {
            PriceSource::Family(Family::Flash)
        } else if lower.contains("pro") || matches_any(&lower, &self.pro_patterns) {
            PriceSource::Family(Family::Pro)
        } else {
            PriceSource::Fallback
        }
    }

    pub fn pricing_for(&self, model: &str) -> ModelPricing {
        match self.source(model) {
            PriceSource::Override => match self.overrides.get(model) {
                Some(p) => p.clone(),
                None => Family::Pro.pricing(),
            },
            PriceSource::Family(family) => family.pricing(),
            PriceSource::Fallback => Family::Pro.pricing(),
        }
    }

    pub fn cost(&self, model: &str, input: u64, cached: u64, output: u64) -> f64 {
        self.pricing_for(model).cost(input, cached, output)
    }

    pub fn override_models(&self) -> Vec<&str> {
        let mut models: Vec<&str> = self.overrides.keys().map(String::as_str).collect();
        models.sort_unstable();
        models
    }
}

fn lowercase_all(patterns: Vec<String>) -> Vec<String> {
    patterns
        .into_iter()
        .map(|p| p.to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}

fn matches_any(model: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| model.contains(p.as_str()))
}

fn read_override_file(path: &Path) -> Result<OverrideFile, UsageError> {
    let malformed = |reason: String| UsageError::MalformedPricingOverride {
        path: path.to_path_buf(),
        reason,
    };
    let content = std::fs::read_to_string(path).map_err(|e| malformed(e.to_string()))?;
    let value: Value = serde_json::from_str(&content).map_err(|e| malformed(e.to_string()))?;
    validate_override(&value).map_err(malformed)?;
    serde_json::from_value(value).map_err(|e| malformed(e.to_string()))
}

fn validate_override(value: &Value) -> Result<(), String> {
    let schema = override_schema().map_err(|e| e.to_string())?;
    if let Err(errors) = schema.validate(value) {
        let msgs: Vec<String> = errors
            .map(|err| format!("{} at {}", err, err.instance_path))
            .collect();
        return Err(msgs.join("; "));
    }
    Ok(())
}

fn override_schema() -> anyhow::Result<&'static JSONSchema> {
    let schema_value = OVERRIDE_SCHEMA_JSON.get_or_try_init(|| {
        let schema_str = include_str!("../pricing-schema.json");
        serde_json::from_str(schema_str).context("parsing pricing schema")
    })?;
    OVERRIDE_SCHEMA.get_or_try_init(|| {
        JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(schema_value)
            .map_err(|e| anyhow::anyhow!("compiling pricing schema: {e}"))
    })
}

/// Writes the empty override structure if nothing exists at `path` yet.
pub fn ensure_override_file(path: &Path) -> Result<(), UsageError> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string_pretty(&OverrideFile::default())
        .map_err(|e| UsageError::Io(std::io::Error::other(e)))?;
    std::fs::write(path, contents + "\n")?;
    tracing::info!(path = %path.display(), "created pricing override file");
    Ok(())
}

pub fn default_override_path(data_dirs: &[PathBuf]) -> Option<PathBuf> {
    data_dirs.first().map(|dir| dir.join("pricing.json"))
}
