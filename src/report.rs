use std::collections::BTreeSet;

use anyhow::Result;
use chrono::NaiveDate;
use colored::Colorize;
use num_format::Locale;
use serde::Serialize;

use crate::{
    aggregate::{UsageTable, aggregate},
    pricing::{PriceSource, PricingTable},
    range::{self, DateRange},
    session::SessionRecord,
    view::{ModelTotals, Totals, UsageRow, UsageView},
};

#[derive(Debug, Serialize)]
pub struct JsonReport {
    pub filter: String,
    pub since: Option<String>,
    pub until: Option<String>,
    pub grouped: bool,
    pub rows: Vec<UsageRow>,
    pub model_totals: Vec<ModelTotals>,
    pub totals: Totals,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing_warning: Option<String>,
}

/// A batch report: the filtered view plus what the printer needs to describe it.
pub struct Report {
    pub filter: String,
    pub range: Option<DateRange>,
    pub view: UsageView,
    pub fallback_models: Vec<String>,
    pub pricing_warning: Option<String>,
}

/// Aggregates, filters and lays out one report. Fails only on a bad filter.
pub fn build_report(
    records: &[SessionRecord],
    pricing: &PricingTable,
    filter: &str,
    reference: NaiveDate,
    grouped: bool,
    locale: &Locale,
) -> Result<Report> {
    let range = range::resolve_filter(filter, reference)?;
    let table = aggregate(records, pricing);
    let filtered = range::apply(&table, range.as_ref());
    Ok(Report {
        filter: filter.to_string(),
        range,
        fallback_models: fallback_models(&filtered, pricing),
        view: UsageView::build(&filtered, grouped, locale),
        pricing_warning: pricing.warning().map(str::to_string),
    })
}

fn fallback_models(table: &UsageTable, pricing: &PricingTable) -> Vec<String> {
    let models: BTreeSet<&str> = table
        .iter()
        .flat_map(|(_, models)| models.keys().map(String::as_str))
        .filter(|model| pricing.source(model) == PriceSource::Fallback)
        .collect();
    models.into_iter().map(str::to_string).collect()
}

impl Report {
    pub fn to_json(&self) -> JsonReport {
        JsonReport {
            filter: self.filter.clone(),
            since: self.range.map(|r| r.start.format("%Y-%m-%d").to_string()),
            until: self.range.map(|r| r.end.format("%Y-%m-%d").to_string()),
            grouped: self.view.grouped,
            rows: self.view.rows.clone(),
            model_totals: self.view.model_totals.clone(),
            totals: self.view.totals.clone(),
            pricing_warning: self.pricing_warning.clone(),
        }
    }

    /// Plain lines of the table section, without color.
    pub fn table_lines(&self) -> Vec<String> {
        let view = &self.view;
        let mut lines = vec![view.table.header.clone()];
        lines.extend(view.table.rows.iter().map(|r| r.line.clone()));
        lines.push("-".repeat(view.table.width()));
        lines.extend(view.subtotal_lines.iter().cloned());
        lines.push(view.grand_total_line.clone());
        lines
    }

    fn title(&self) -> String {
        match &self.range {
            Some(r) => format!(
                "Gemini token usage ({}: {} to {})",
                self.filter,
                r.start.format("%Y-%m-%d"),
                r.end.format("%Y-%m-%d")
            ),
            None => format!("Gemini token usage ({})", self.filter),
        }
    }
}

pub fn output_report(report: &Report, json: bool) -> Result<()> {
    if let Some(warning) = &report.pricing_warning {
        eprintln!("{} {warning}; using built-in pricing", "warning:".yellow().bold());
    }
    if !report.fallback_models.is_empty() {
        eprintln!(
            "{} no pricing family matched {}; charged at pro rates",
            "note:".yellow(),
            report.fallback_models.join(", ")
        );
    }

    if json {
        serde_json::to_writer_pretty(std::io::stdout(), &report.to_json())?;
        println!();
        return Ok(());
    }

    if report.view.row_count() == 0 {
        println!("No usage found for filter {}.", report.filter);
        return Ok(());
    }

    println!("{}", report.title().bold());
    let lines = report.table_lines();
    let last = lines.len() - 1;
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            println!("{}", line.cyan().bold());
        } else if i == last {
            println!("{}", line.yellow().bold());
        } else {
            println!("{line}");
        }
    }
    Ok(())
}
