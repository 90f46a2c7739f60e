use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::{error::UsageError, pricing::PricingTable, session::SessionRecord};

/// Key used for sessions whose start timestamp has no parseable date.
pub const UNKNOWN_DATE: &str = "unknown";
const UNKNOWN_MODEL: &str = "unknown";

/// Aggregate for one (date, model) pair. `cost` is derived from the token
/// sums when the table is finalized and never edited afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageCell {
    pub sessions: BTreeSet<String>,
    pub input: u64,
    pub cached: u64,
    pub output: u64,
    pub cost: f64,
}

impl UsageCell {
    pub fn total_tokens(&self) -> u64 {
        self.input + self.cached + self.output
    }
}

/// Date (`YYYY-MM-DD` or `unknown`) → model → cell. Rebuilt wholesale by
/// [`aggregate`]; iteration is always in sorted key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageTable {
    days: BTreeMap<String, BTreeMap<String, UsageCell>>,
}

impl UsageTable {
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, date: &str, model: &str) -> Option<&UsageCell> {
        self.days.get(date).and_then(|models| models.get(model))
    }

    #[cfg(test)]
    pub fn dates(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.days.keys().map(String::as_str)
    }

    #[cfg(test)]
    pub fn day(&self, date: &str) -> Option<&BTreeMap<String, UsageCell>> {
        self.days.get(date)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&str, &BTreeMap<String, UsageCell>)> {
        self.days.iter().map(|(d, m)| (d.as_str(), m))
    }

    /// Copies the days accepted by `keep` into a new table.
    pub fn retain_dates(&self, mut keep: impl FnMut(&str) -> bool) -> UsageTable {
        UsageTable {
            days: self
                .days
                .iter()
                .filter(|(date, _)| keep(date))
                .map(|(date, models)| (date.clone(), models.clone()))
                .collect(),
        }
    }
}

#[derive(Default)]
struct CellAccumulator {
    sessions: BTreeSet<String>,
    input: u64,
    cached: u64,
    output: u64,
}

impl CellAccumulator {
    fn finish(self, model: &str, pricing: &PricingTable) -> UsageCell {
        UsageCell {
            cost: pricing.cost(model, self.input, self.cached, self.output),
            sessions: self.sessions,
            input: self.input,
            cached: self.cached,
            output: self.output,
        }
    }
}

/// Folds session records into a [`UsageTable`], pricing every cell once after
/// all records have been summed. Thought tokens count as output.
pub fn aggregate(records: &[SessionRecord], pricing: &PricingTable) -> UsageTable {
    let mut acc: BTreeMap<String, BTreeMap<String, CellAccumulator>> = BTreeMap::new();
    let mut incomplete = 0usize;

    for record in records {
        let date = session_date(&record.start_time);
        for message in record.messages.iter().filter(|m| m.is_model_response()) {
            let tokens = message.tokens.unwrap_or_default();
            let missing = tokens.missing_fields();
            if !missing.is_empty() {
                incomplete += 1;
                let err = UsageError::MissingTokenFields {
                    session: record.session_id.clone(),
                    fields: missing.join(", "),
                };
                tracing::debug!(error = %err, "counting missing token fields as zero");
            }
            let model = message.model.as_deref().unwrap_or(UNKNOWN_MODEL);
            let cell = acc
                .entry(date.clone())
                .or_default()
                .entry(model.to_string())
                .or_default();
            cell.sessions.insert(record.session_id.clone());
            cell.input += tokens.input.unwrap_or(0);
            cell.cached += tokens.cached.unwrap_or(0);
            cell.output += tokens.output.unwrap_or(0) + tokens.thoughts.unwrap_or(0);
        }
    }

    if incomplete > 0 {
        tracing::warn!(
            messages = incomplete,
            "model responses without full token counts were counted as zero"
        );
    }

    UsageTable {
        days: acc
            .into_iter()
            .map(|(date, models)| {
                let cells = models
                    .into_iter()
                    .map(|(model, cell)| {
                        let finished = cell.finish(&model, pricing);
                        (model, finished)
                    })
                    .collect();
                (date, cells)
            })
            .collect(),
    }
}

fn session_date(start_time: &str) -> String {
    let date_part = start_time.split('T').next().unwrap_or_default().trim();
    match NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
        Ok(date) => date.format("%Y-%m-%d").to_string(),
        Err(_) => UNKNOWN_DATE.to_string(),
    }
}
