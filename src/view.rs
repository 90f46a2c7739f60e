use std::collections::{BTreeMap, BTreeSet};

use num_format::Locale;
use serde::Serialize;

use crate::{
    aggregate::{UNKNOWN_DATE, UsageCell, UsageTable},
    layout::{RowCells, TableLayout, format_cost, format_tokens, layout},
};

pub const DAILY_HEADER: [&str; 7] = ["DATE", "SESS", "INPUT", "CACHED", "OUTPUT", "TOTAL", "COST"];
pub const MODEL_HEADER: [&str; 8] = [
    "DATE", "MODEL", "SESS", "INPUT", "CACHED", "OUTPUT", "TOTAL", "COST",
];
pub const GRAND_TOTAL_LABEL: &str = "GRAND TOTAL";

/// Numeric form of one table row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageRow {
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub sessions: usize,
    pub input: u64,
    pub cached: u64,
    pub output: u64,
    pub total: u64,
    pub cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Totals {
    pub sessions: usize,
    pub input: u64,
    pub cached: u64,
    pub output: u64,
    pub total: u64,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelTotals {
    pub model: String,
    #[serde(flatten)]
    pub totals: Totals,
}

#[derive(Default)]
struct TotalsAccumulator {
    sessions: BTreeSet<String>,
    input: u64,
    cached: u64,
    output: u64,
    cost: f64,
}

impl TotalsAccumulator {
    fn add(&mut self, cell: &UsageCell) {
        self.sessions.extend(cell.sessions.iter().cloned());
        self.input += cell.input;
        self.cached += cell.cached;
        self.output += cell.output;
        self.cost += cell.cost;
    }

    fn finish(&self) -> Totals {
        Totals {
            sessions: self.sessions.len(),
            input: self.input,
            cached: self.cached,
            output: self.output,
            total: self.input + self.cached + self.output,
            cost: self.cost,
        }
    }
}

/// Everything the report printer and the dashboard draw for one table:
/// laid-out data rows plus subtotal and grand-total lines sharing their widths.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageView {
    pub grouped: bool,
    pub table: TableLayout,
    pub subtotal_lines: Vec<String>,
    pub grand_total_line: String,
    pub rows: Vec<UsageRow>,
    pub model_totals: Vec<ModelTotals>,
    pub totals: Totals,
}

impl UsageView {
    /// Rows run newest date first; within a date models are sorted by name.
    pub fn build(table: &UsageTable, grouped: bool, locale: &Locale) -> UsageView {
        let mut rows = Vec::new();
        let mut grand = TotalsAccumulator::default();
        let mut per_model: BTreeMap<String, TotalsAccumulator> = BTreeMap::new();

        for (date, models) in table.iter().rev() {
            if date == UNKNOWN_DATE {
                continue;
            }
            let mut day = TotalsAccumulator::default();
            for (model, cell) in models {
                grand.add(cell);
                day.add(cell);
                per_model.entry(model.clone()).or_default().add(cell);
                if grouped {
                    rows.push(usage_row(date, Some(model), &day_cell_totals(cell)));
                }
            }
            if !grouped {
                rows.push(usage_row(date, None, &day.finish()));
            }
        }

        let totals = grand.finish();
        let model_totals: Vec<ModelTotals> = per_model
            .into_iter()
            .map(|(model, acc)| ModelTotals {
                model,
                totals: acc.finish(),
            })
            .collect();

        let row_cells: Vec<RowCells> = rows
            .iter()
            .map(|r| RowCells {
                cells: row_cells(r, grouped, locale),
                date: r.date.clone(),
            })
            .collect();

        let subtotal_cells: Vec<Vec<String>> = if grouped {
            model_totals
                .iter()
                .map(|m| total_cells(&format!("TOTAL ({})", m.model), &m.totals, grouped, locale))
                .collect()
        } else {
            Vec::new()
        };
        let grand_cells = total_cells(GRAND_TOTAL_LABEL, &totals, grouped, locale);

        let mut extra = subtotal_cells.clone();
        extra.push(grand_cells.clone());
        let (header, left_aligned) = if grouped {
            (&MODEL_HEADER[..], 2)
        } else {
            (&DAILY_HEADER[..], 1)
        };
        let table = layout(row_cells, header, &extra, left_aligned);

        UsageView {
            grouped,
            subtotal_lines: subtotal_cells.iter().map(|c| table.format_line(c)).collect(),
            grand_total_line: table.format_line(&grand_cells),
            table,
            rows,
            model_totals,
            totals,
        }
    }

    pub fn row_count(&self) -> usize {
        self.table.rows.len()
    }
}

fn day_cell_totals(cell: &UsageCell) -> Totals {
    Totals {
        sessions: cell.sessions.len(),
        input: cell.input,
        cached: cell.cached,
        output: cell.output,
        total: cell.total_tokens(),
        cost: cell.cost,
    }
}

fn usage_row(date: &str, model: Option<&String>, totals: &Totals) -> UsageRow {
    UsageRow {
        date: date.to_string(),
        model: model.cloned(),
        sessions: totals.sessions,
        input: totals.input,
        cached: totals.cached,
        output: totals.output,
        total: totals.total,
        cost: totals.cost,
    }
}

fn numeric_cells(
    sessions: usize,
    input: u64,
    cached: u64,
    output: u64,
    total: u64,
    cost: f64,
    locale: &Locale,
) -> Vec<String> {
    vec![
        sessions.to_string(),
        format_tokens(input, locale),
        format_tokens(cached, locale),
        format_tokens(output, locale),
        format_tokens(total, locale),
        format_cost(cost),
    ]
}

fn row_cells(row: &UsageRow, grouped: bool, locale: &Locale) -> Vec<String> {
    let mut cells = vec![row.date.clone()];
    if grouped {
        cells.push(row.model.clone().unwrap_or_default());
    }
    cells.extend(numeric_cells(
        row.sessions,
        row.input,
        row.cached,
        row.output,
        row.total,
        row.cost,
        locale,
    ));
    cells
}

fn total_cells(label: &str, totals: &Totals, grouped: bool, locale: &Locale) -> Vec<String> {
    let mut cells = if grouped {
        vec![String::new(), label.to_string()]
    } else {
        vec![label.to_string()]
    };
    cells.extend(numeric_cells(
        totals.sessions,
        totals.input,
        totals.cached,
        totals.output,
        totals.total,
        totals.cost,
        locale,
    ));
    cells
}
