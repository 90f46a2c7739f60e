use num_format::{Locale, ToFormattedString};

const COLUMN_GAP: &str = "  ";

/// Cells of one row before layout, plus the date it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct RowCells {
    pub cells: Vec<String>,
    pub date: String,
}

/// A laid-out row: the padded line and the date it refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRow {
    pub cells: Vec<String>,
    pub line: String,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableLayout {
    pub header: String,
    pub rows: Vec<ViewRow>,
    pub col_widths: Vec<usize>,
    left_aligned: usize,
}

impl TableLayout {
    /// Formats any row (including total rows) with this layout's widths.
    pub fn format_line(&self, cells: &[String]) -> String {
        format_cells(cells, &self.col_widths, self.left_aligned)
    }

    pub fn width(&self) -> usize {
        if self.col_widths.is_empty() {
            return 0;
        }
        self.col_widths.iter().sum::<usize>() + COLUMN_GAP.len() * (self.col_widths.len() - 1)
    }
}

/// Lays out `rows` under `header`. Widths are taken over the header, the rows
/// and `extra_rows` together, so total lines formatted later with
/// [`TableLayout::format_line`] line up with the data and are never cut.
/// The first `left_aligned` columns are left-aligned, the rest right-aligned.
pub fn layout(
    rows: Vec<RowCells>,
    header: &[&str],
    extra_rows: &[Vec<String>],
    left_aligned: usize,
) -> TableLayout {
    let mut col_widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    let all_cells = rows
        .iter()
        .map(|r| r.cells.as_slice())
        .chain(extra_rows.iter().map(Vec::as_slice));
    for cells in all_cells {
        for (i, cell) in cells.iter().enumerate().take(col_widths.len()) {
            col_widths[i] = col_widths[i].max(cell.chars().count());
        }
    }

    let header_cells: Vec<String> = header.iter().map(|h| h.to_string()).collect();
    let header = format_cells(&header_cells, &col_widths, left_aligned);
    let rows = rows
        .into_iter()
        .map(|row| ViewRow {
            line: format_cells(&row.cells, &col_widths, left_aligned),
            cells: row.cells,
            date: row.date,
        })
        .collect();

    TableLayout {
        header,
        rows,
        col_widths,
        left_aligned,
    }
}

fn format_cells(cells: &[String], widths: &[usize], left_aligned: usize) -> String {
    let parts: Vec<String> = cells
        .iter()
        .zip(widths)
        .enumerate()
        .map(|(i, (cell, &width))| {
            if i < left_aligned {
                format!("{cell:<width$}")
            } else {
                format!("{cell:>width$}")
            }
        })
        .collect();
    parts.join(COLUMN_GAP).trim_end().to_string()
}

pub fn format_tokens(value: u64, locale: &Locale) -> String {
    value.to_formatted_string(locale)
}

/// `$1,234.57`: cents are rounded first so the carry reaches the dollars.
pub fn format_cost(value: f64) -> String {
    let cents = (value.max(0.0) * 100.0).round() as u64;
    format!(
        "${}.{:02}",
        (cents / 100).to_formatted_string(&Locale::en),
        cents % 100
    )
}

pub fn resolve_locale(raw: Option<&str>) -> Locale {
    match raw {
        Some("en") | Some("en-US") | Some("en-GB") | None => Locale::en,
        Some("fr") | Some("fr-FR") => Locale::fr,
        Some("de") | Some("de-DE") => Locale::de,
        Some("es") | Some("es-ES") => Locale::es,
        Some("it") | Some("it-IT") => Locale::it,
        Some("ja") | Some("ja-JP") => Locale::ja,
        _ => Locale::en,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn widths_cover_header_rows_and_extra_rows() {
        let rows = vec![RowCells {
            cells: cells(&["2026-01-01", "5", "$1.00"]),
            date: "2026-01-01".into(),
        }];
        let extra = vec![cells(&["GRAND TOTAL (ALL)", "12345", "$10,000.00"])];
        let table = layout(rows, &["DATE", "SESS", "COST"], &extra, 1);
        assert_eq!(table.col_widths, vec![17, 5, 10]);
        assert_eq!(table.rows[0].line, "2026-01-01             5       $1.00");
        assert_eq!(table.header, "DATE                SESS        COST");
    }

    #[test]
    fn long_model_name_is_not_truncated_in_totals() {
        let model = "m".repeat(45);
        let label = format!("TOTAL ({model})");
        let rows = vec![RowCells {
            cells: cells(&["2026-01-01", &model, "1"]),
            date: "2026-01-01".into(),
        }];
        let extra = vec![vec![String::new(), label.clone(), "1".into()]];
        let table = layout(rows, &["DATE", "MODEL", "SESS"], &extra, 2);
        assert!(table.col_widths[1] >= label.len());
        let total_line = table.format_line(&extra[0]);
        assert!(total_line.contains(&label));
        let data_end = table.rows[0].line.len();
        assert_eq!(total_line.len(), data_end);
    }

    #[test]
    fn numeric_columns_right_align() {
        let rows = vec![
            RowCells {
                cells: cells(&["a", "1"]),
                date: "a".into(),
            },
            RowCells {
                cells: cells(&["b", "1,000"]),
                date: "b".into(),
            },
        ];
        let table = layout(rows, &["K", "N"], &[], 1);
        assert_eq!(table.rows[0].line, "a      1");
        assert_eq!(table.rows[1].line, "b  1,000");
        assert_eq!(table.width(), 8);
    }

    #[test]
    fn cost_and_token_formats() {
        assert_eq!(format_cost(0.0), "$0.00");
        assert_eq!(format_cost(0.004), "$0.00");
        assert_eq!(format_cost(0.996), "$1.00");
        assert_eq!(format_cost(1234.567), "$1,234.57");
        assert_eq!(format_tokens(1_234_567, &Locale::en), "1,234,567");
    }
}
