use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use crossterm::event::KeyCode;
use num_format::Locale;

use crate::{
    aggregate::{UsageTable, aggregate},
    pricing::PricingTable,
    range::{self, ALL, NAMED_FILTERS},
    session::SessionSource,
    view::UsageView,
};

const LEGEND: &str =
    " [Q] Quit | [R] Refresh | [M] Models | [F] Filter | [P] Pricing | [UP/DOWN/PGUP/PGDN] Select ";
/// Header, column header and footer lines.
const CHROME_LINES: usize = 3;
const BORDER_LINES: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardState {
    pub active_filter: &'static str,
    pub group_by_model: bool,
    pub selected_row: usize,
    pub scroll_offset: usize,
    pub filter_menu_open: bool,
    pub menu_selection: usize,
}

impl Default for DashboardState {
    fn default() -> Self {
        DashboardState {
            active_filter: ALL,
            group_by_model: false,
            selected_row: 0,
            scroll_offset: 0,
            filter_menu_open: false,
            menu_selection: 0,
        }
    }
}

impl DashboardState {
    fn reset_position(&mut self) {
        self.selected_row = 0;
        self.scroll_offset = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    Refresh,
    ToggleGrouping,
    OpenFilterMenu,
    EditPricing,
    Up,
    Down,
    PageUp,
    PageDown,
    Home,
    End,
    Confirm,
    Cancel,
}

impl Action {
    /// Maps a key to an action for the current mode.
    pub fn from_key(code: KeyCode, menu_open: bool) -> Option<Action> {
        if menu_open {
            return match code {
                KeyCode::Up | KeyCode::Char('k') => Some(Action::Up),
                KeyCode::Down | KeyCode::Char('j') => Some(Action::Down),
                KeyCode::Enter => Some(Action::Confirm),
                KeyCode::Esc | KeyCode::Char('f') | KeyCode::Char('F') => Some(Action::Cancel),
                _ => None,
            };
        }
        match code {
            KeyCode::Char('q') | KeyCode::Char('Q') => Some(Action::Quit),
            KeyCode::Char('r') | KeyCode::Char('R') => Some(Action::Refresh),
            KeyCode::Char('m') | KeyCode::Char('M') => Some(Action::ToggleGrouping),
            KeyCode::Char('f') | KeyCode::Char('F') => Some(Action::OpenFilterMenu),
            KeyCode::Char('p') | KeyCode::Char('P') => Some(Action::EditPricing),
            KeyCode::Up | KeyCode::Char('k') => Some(Action::Up),
            KeyCode::Down | KeyCode::Char('j') => Some(Action::Down),
            KeyCode::PageUp => Some(Action::PageUp),
            KeyCode::PageDown => Some(Action::PageDown),
            KeyCode::Home => Some(Action::Home),
            KeyCode::End => Some(Action::End),
            _ => None,
        }
    }
}

/// What the event loop must do after an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Quit,
    /// Suspend rendering, run the editor on [`Dashboard::pricing_path`], then
    /// call [`Dashboard::pricing_edited`].
    EditPricing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRow {
    pub text: String,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TotalsLine {
    Subtotal(String),
    Separator,
    Grand(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterMenu {
    pub options: Vec<&'static str>,
    pub selected: usize,
}

/// A terminal-independent description of one dashboard frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardFrame {
    pub title: String,
    pub column_header: String,
    pub rows: Vec<FrameRow>,
    pub table_height: usize,
    pub totals_title: String,
    pub totals: Vec<TotalsLine>,
    pub totals_height: usize,
    pub footer: String,
    pub footer_is_status: bool,
    pub menu: Option<FilterMenu>,
}

/// Dashboard controller: owns the usage table, the derived view and the UI state.
pub struct Dashboard<S: SessionSource> {
    source: S,
    pricing_path: PathBuf,
    pricing: PricingTable,
    table: UsageTable,
    view: UsageView,
    state: DashboardState,
    page_size: usize,
    locale: Locale,
    today: Box<dyn Fn() -> NaiveDate>,
    status: Option<String>,
}

impl<S: SessionSource> Dashboard<S> {
    pub fn new(
        source: S,
        pricing_path: PathBuf,
        locale: Locale,
        page_size: usize,
        today: Box<dyn Fn() -> NaiveDate>,
    ) -> Self {
        let pricing = PricingTable::load(Some(&pricing_path));
        let status = pricing_status(&pricing);
        let mut dashboard = Dashboard {
            source,
            pricing_path,
            pricing,
            table: UsageTable::default(),
            view: UsageView::build(&UsageTable::default(), false, &locale),
            state: DashboardState::default(),
            page_size: page_size.max(1),
            locale,
            today,
            status,
        };
        dashboard.reload();
        dashboard
    }

    pub fn state(&self) -> &DashboardState {
        &self.state
    }

    #[cfg(test)]
    pub fn view(&self) -> &UsageView {
        &self.view
    }

    pub fn pricing_path(&self) -> &Path {
        &self.pricing_path
    }

    #[cfg(test)]
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status = Some(message.into());
    }

    pub fn handle(&mut self, action: Action) -> Outcome {
        if self.state.filter_menu_open {
            self.handle_menu(action);
            return Outcome::Continue;
        }
        if action != Action::EditPricing {
            self.status = pricing_status(&self.pricing);
        }
        match action {
            Action::Quit => return Outcome::Quit,
            Action::Refresh => self.reload(),
            Action::ToggleGrouping => {
                self.state.group_by_model = !self.state.group_by_model;
                self.state.reset_position();
                self.rebuild();
            }
            Action::OpenFilterMenu => {
                self.state.filter_menu_open = true;
                self.state.menu_selection = NAMED_FILTERS
                    .iter()
                    .position(|f| *f == self.state.active_filter)
                    .unwrap_or(0);
            }
            Action::EditPricing => return Outcome::EditPricing,
            Action::Up => self.move_selection(-1),
            Action::Down => self.move_selection(1),
            Action::PageUp => self.move_selection(-(self.page_size as isize)),
            Action::PageDown => self.move_selection(self.page_size as isize),
            Action::Home => self.state.selected_row = 0,
            Action::End => self.state.selected_row = self.view.row_count().saturating_sub(1),
            Action::Confirm | Action::Cancel => {}
        }
        Outcome::Continue
    }

    fn handle_menu(&mut self, action: Action) {
        let count = NAMED_FILTERS.len();
        match action {
            Action::Up => self.state.menu_selection = (self.state.menu_selection + count - 1) % count,
            Action::Down => self.state.menu_selection = (self.state.menu_selection + 1) % count,
            Action::Confirm => {
                self.state.active_filter = NAMED_FILTERS[self.state.menu_selection % count];
                self.state.filter_menu_open = false;
                self.state.reset_position();
                self.rebuild();
            }
            Action::Cancel => self.state.filter_menu_open = false,
            _ => {}
        }
    }

    fn move_selection(&mut self, delta: isize) {
        let rows = self.view.row_count();
        if rows == 0 {
            self.state.selected_row = 0;
            return;
        }
        let target = self.state.selected_row.saturating_add_signed(delta);
        self.state.selected_row = target.min(rows - 1);
    }

    /// Re-reads sessions and re-aggregates with the current pricing.
    pub fn reload(&mut self) {
        match self.source.load() {
            Ok(records) => {
                self.table = aggregate(&records, &self.pricing);
                tracing::debug!(sessions = records.len(), "dashboard reloaded sessions");
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to load sessions");
                self.status = Some(format!("Load failed: {err:#}"));
            }
        }
        self.rebuild();
    }

    /// Called once the external editor has exited.
    pub fn pricing_edited(&mut self) {
        self.pricing = PricingTable::load(Some(&self.pricing_path));
        self.status = pricing_status(&self.pricing);
        self.reload();
    }

    fn rebuild(&mut self) {
        let filtered = match range::resolve_filter(self.state.active_filter, (self.today)()) {
            Ok(range) => range::apply(&self.table, range.as_ref()),
            Err(err) => {
                self.status = Some(err.to_string());
                UsageTable::default()
            }
        };
        self.view = UsageView::build(&filtered, self.state.group_by_model, &self.locale);
        let rows = self.view.row_count();
        if rows == 0 {
            self.state.reset_position();
        } else if self.state.selected_row >= rows {
            self.state.selected_row = rows - 1;
        }
    }

    fn totals_height(&self, height: usize) -> usize {
        if self.state.group_by_model {
            (self.view.model_totals.len() + 4).min(height / 3).max(3)
        } else {
            3
        }
    }

    /// Moves `scroll_offset` the least amount that shows the selected row,
    /// without scrolling past the last row.
    fn scroll_into_view(&mut self, visible: usize) {
        let rows = self.view.row_count();
        let state = &mut self.state;
        if rows == 0 {
            state.reset_position();
            return;
        }
        if visible == 0 {
            state.scroll_offset = state.selected_row;
            return;
        }
        if state.selected_row < state.scroll_offset {
            state.scroll_offset = state.selected_row;
        } else if state.selected_row >= state.scroll_offset + visible {
            state.scroll_offset = state.selected_row + 1 - visible;
        }
        state.scroll_offset = state.scroll_offset.min(rows.saturating_sub(visible));
    }

    /// Describes the frame for a screen `height` lines tall.
    pub fn frame(&mut self, height: usize, now: &str) -> DashboardFrame {
        let totals_height = self.totals_height(height);
        let table_height = height.saturating_sub(CHROME_LINES + totals_height);
        self.scroll_into_view(table_height);

        let state = &self.state;
        let rows = self
            .view
            .table
            .rows
            .iter()
            .enumerate()
            .skip(state.scroll_offset)
            .take(table_height)
            .map(|(i, row)| FrameRow {
                text: row.line.clone(),
                selected: i == state.selected_row,
            })
            .collect();

        let content = totals_height.saturating_sub(BORDER_LINES);
        let mut totals = Vec::new();
        if self.state.group_by_model && content >= 2 {
            totals.extend(
                self.view
                    .subtotal_lines
                    .iter()
                    .take(content - 2)
                    .map(|l| TotalsLine::Subtotal(l.clone())),
            );
            totals.push(TotalsLine::Separator);
        }
        if content >= 1 {
            totals.push(TotalsLine::Grand(self.view.grand_total_line.clone()));
        }

        let (footer, footer_is_status) = match &self.status {
            Some(status) => (format!(" {status} "), true),
            None => (LEGEND.to_string(), false),
        };

        DashboardFrame {
            title: format!(
                " Gemini Token Usage | Filter: [{}] | Models: {} | {} ",
                state.active_filter,
                if state.group_by_model { "ON" } else { "OFF" },
                now
            ),
            column_header: self.view.table.header.clone(),
            rows,
            table_height,
            totals_title: format!(" TOTALS ({}) ", state.active_filter),
            totals,
            totals_height,
            footer,
            footer_is_status,
            menu: state.filter_menu_open.then(|| FilterMenu {
                options: NAMED_FILTERS.to_vec(),
                selected: state.menu_selection,
            }),
        }
    }
}

/// A pricing warning stays on the status line for as long as built-in rates stand in.
fn pricing_status(pricing: &PricingTable) -> Option<String> {
    pricing
        .warning()
        .map(|w| format!("Pricing: {w}; using built-in rates"))
}
