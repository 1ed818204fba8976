// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::{execute, terminal};
use masterdata_app::{
    AppCommand, AppMode, AppState, ColumnLayout, CommandError, ConfirmPrompt, Dispatcher,
    EntityBinding, ExportKind, FieldValue, FilterCondition, FilterField, PropertyDescriptor,
    RowData, RowId, TableAction, TableKind, build_data_csv, build_header_only_csv,
    build_selection_json, default_properties, export_file_name, filter_field, selection_file_name,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, Tabs};
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;
use time::{Date, OffsetDateTime};
use tracing::{debug, warn};

const HALF_PAGE_ROWS: isize = 10;
const SELECTED_MARK: &str = "*";
const EDITING_MARK: &str = "~";
const NEW_MARK: &str = "+";

/// What the terminal shell needs from its host.
pub trait AppRuntime {
    fn binding(&mut self) -> &mut dyn EntityBinding;
    fn load_properties(&mut self, table: TableKind) -> Result<Vec<PropertyDescriptor>>;
    fn load_column_layout(&mut self, table: TableKind) -> Result<Option<Vec<String>>>;
    /// `None` forgets the saved layout.
    fn save_column_layout(&mut self, table: TableKind, keys: Option<&[String]>) -> Result<()>;
    fn write_export(&mut self, file_name: &str, contents: &str) -> Result<PathBuf>;
    fn today(&self) -> Date {
        OffsetDateTime::now_utc().date()
    }
}

pub enum InternalEvent {
    ClearStatus { token: u64 },
}

#[derive(Debug, Clone, PartialEq)]
struct ActiveFilter {
    field: FilterField,
    condition: FilterCondition,
    raw: String,
}

#[derive(Debug, Clone, PartialEq)]
struct TableView {
    properties: Vec<PropertyDescriptor>,
    layout: ColumnLayout,
    filter: Option<ActiveFilter>,
    selected_row: usize,
    selected_col: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
struct TableSnapshot {
    rows: Vec<(RowId, RowData)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CellEditState {
    row: RowId,
    field: String,
    label: String,
    buffer: String,
}

#[derive(Debug, Default)]
struct ViewData {
    dispatcher: Dispatcher,
    tables: BTreeMap<TableKind, TableView>,
    snapshot: TableSnapshot,
    confirm: Option<ConfirmPrompt>,
    cell_edit: Option<CellEditState>,
    filter_input: Option<String>,
    help_visible: bool,
    status_token: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableCommand {
    MoveRow(isize),
    MoveColumn(isize),
    JumpFirstRow,
    JumpLastRow,
    ToggleSelection,
    ClearSelection,
    HideCurrentColumn,
    ResetColumns,
    ShiftColumn(isize),
}

pub fn run_app<R: AppRuntime>(state: &mut AppState, runtime: &mut R) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, terminal::EnterAlternateScreen).context("enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let mut view_data = ViewData::default();
    let (internal_tx, internal_rx) = mpsc::channel();

    if let Err(error) = refresh_view_data(state, runtime, &mut view_data) {
        state.dispatch(AppCommand::SetStatus(format!("load failed: {error:#}")));
    }

    let mut result = Ok(());
    loop {
        process_internal_events(state, &view_data, &internal_rx);

        if let Err(error) = terminal.draw(|frame| render(frame, state, &view_data)) {
            result = Err(error).context("draw frame");
            break;
        }

        let has_event = event::poll(Duration::from_millis(120)).context("poll event")?;
        if has_event
            && let Event::Key(key) = event::read().context("read event")?
            && handle_key_event(state, runtime, &mut view_data, &internal_tx, key)
        {
            break;
        }
    }

    disable_raw_mode().context("disable raw mode")?;
    execute!(io::stdout(), terminal::LeaveAlternateScreen).context("leave alternate screen")?;
    result
}

fn process_internal_events(
    state: &mut AppState,
    view_data: &ViewData,
    rx: &Receiver<InternalEvent>,
) {
    while let Ok(event) = rx.try_recv() {
        match event {
            InternalEvent::ClearStatus { token } if token == view_data.status_token => {
                state.dispatch(AppCommand::ClearStatus);
            }
            InternalEvent::ClearStatus { .. } => {}
        }
    }
}

fn schedule_status_clear(internal_tx: &Sender<InternalEvent>, token: u64) {
    let sender = internal_tx.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_secs(4));
        let _ = sender.send(InternalEvent::ClearStatus { token });
    });
}

fn emit_status(
    state: &mut AppState,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    message: impl Into<String>,
) {
    state.dispatch(AppCommand::SetStatus(message.into()));
    view_data.status_token = view_data.status_token.saturating_add(1);
    schedule_status_clear(internal_tx, view_data.status_token);
}

/// Loads properties and the saved layout the first time a table is shown.
fn ensure_table_view<R: AppRuntime>(
    runtime: &mut R,
    view_data: &mut ViewData,
    table: TableKind,
) -> Result<()> {
    if view_data.tables.contains_key(&table) {
        return Ok(());
    }
    let properties = match runtime.load_properties(table) {
        Ok(properties) => properties,
        Err(error) => {
            warn!(%table, error = %format!("{error:#}"), "using built-in properties");
            default_properties(table)
        }
    };
    let layout = match runtime.load_column_layout(table)? {
        Some(keys) => ColumnLayout::from_keys(table, &keys, &properties),
        None => ColumnLayout::from_properties(table, &properties),
    };
    view_data
        .dispatcher
        .set_properties(table, properties.clone());
    view_data.tables.insert(
        table,
        TableView {
            properties,
            layout,
            filter: None,
            selected_row: 0,
            selected_col: 0,
        },
    );
    Ok(())
}

fn refresh_view_data<R: AppRuntime>(
    state: &AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
) -> Result<()> {
    let table = state.active_table;
    ensure_table_view(runtime, view_data, table)?;
    let binding: &dyn EntityBinding = runtime.binding();
    let filter = view_data
        .tables
        .get(&table)
        .and_then(|view| view.filter.clone());
    let rows = binding
        .rows(table)
        .into_iter()
        .filter_map(|row| {
            let data = view_data
                .dispatcher
                .current_value(table, binding, &row)
                .or_else(|| binding.object(&row))?;
            Some((row, data))
        })
        .filter(|(_, data)| {
            filter.as_ref().is_none_or(|filter| {
                filter
                    .condition
                    .matches(data.value(&filter.field.property_key))
            })
        })
        .collect();
    view_data.snapshot = TableSnapshot { rows };
    clamp_table_cursor(state, view_data);
    Ok(())
}

fn refresh_or_report<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    if let Err(error) = refresh_view_data(state, runtime, view_data) {
        emit_status(state, view_data, internal_tx, format!("load failed: {error:#}"));
    }
}

fn handle_key_event<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) -> bool {
    if key.code == KeyCode::Char('q') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return true;
    }

    if view_data.help_visible {
        if key.code == KeyCode::Esc || key.code == KeyCode::Char('?') {
            view_data.help_visible = false;
        }
        return false;
    }

    match state.mode {
        AppMode::Confirm => {
            handle_confirm_key(state, runtime, view_data, internal_tx, key);
            return false;
        }
        AppMode::CellEdit => {
            handle_cell_edit_key(state, runtime, view_data, internal_tx, key);
            return false;
        }
        AppMode::Filter => {
            handle_filter_key(state, runtime, view_data, internal_tx, key);
            return false;
        }
        AppMode::Nav => {}
    }

    if let Some(command) = table_command_for_key(key) {
        let status = apply_table_command(state, runtime, view_data, command);
        if let Some(status) = status {
            emit_status(state, view_data, internal_tx, status);
        }
        return false;
    }

    let table = state.active_table;
    match (key.code, key.modifiers) {
        (KeyCode::Char('q'), KeyModifiers::NONE) => {
            if view_data.dispatcher.has_open_sessions() {
                emit_status(
                    state,
                    view_data,
                    internal_tx,
                    "unsaved edits -- save or cancel them, or press ctrl+q to discard",
                );
                return false;
            }
            return true;
        }
        (KeyCode::Char('?'), _) => view_data.help_visible = true,
        (KeyCode::Char('f'), KeyModifiers::NONE) | (KeyCode::Tab, _) => {
            state.dispatch(AppCommand::NextTable);
            refresh_or_report(state, runtime, view_data, internal_tx);
        }
        (KeyCode::Char('b'), KeyModifiers::NONE) | (KeyCode::BackTab, _) => {
            state.dispatch(AppCommand::PrevTable);
            refresh_or_report(state, runtime, view_data, internal_tx);
        }
        (KeyCode::Char(digit @ '1'..='5'), KeyModifiers::NONE) => {
            let index = digit as usize - '1' as usize;
            state.dispatch(AppCommand::SelectTable(TableKind::ALL[index]));
            refresh_or_report(state, runtime, view_data, internal_tx);
        }
        (KeyCode::Char('a'), KeyModifiers::NONE) => {
            run_action(state, runtime, view_data, internal_tx, TableAction::Add);
        }
        (KeyCode::Char('e'), KeyModifiers::NONE) => {
            run_action(state, runtime, view_data, internal_tx, TableAction::Edit);
        }
        (KeyCode::Char('d'), KeyModifiers::NONE) => {
            run_action(state, runtime, view_data, internal_tx, TableAction::Delete);
        }
        (KeyCode::Char('s'), KeyModifiers::NONE) => {
            run_action(state, runtime, view_data, internal_tx, TableAction::Save);
        }
        (KeyCode::Esc, _) => {
            if view_data.dispatcher.controller(table).tracker().is_idle() {
                clear_selection(view_data, table);
            } else {
                run_action(state, runtime, view_data, internal_tx, TableAction::Cancel);
            }
        }
        (KeyCode::Char('i'), KeyModifiers::NONE) | (KeyCode::Enter, _) => {
            open_cell_edit(state, view_data, internal_tx);
        }
        (KeyCode::Char('/'), _) => {
            let existing = view_data
                .tables
                .get(&table)
                .and_then(|view| view.filter.as_ref())
                .map(|filter| filter.raw.clone())
                .unwrap_or_default();
            view_data.filter_input = Some(existing);
            state.dispatch(AppCommand::OpenFilter);
        }
        (KeyCode::Char('x'), KeyModifiers::NONE) => {
            let status = export_table(runtime, view_data, table, ExportKind::Export);
            emit_status(state, view_data, internal_tx, status);
        }
        (KeyCode::Char('t'), KeyModifiers::NONE) => {
            let status = export_table(runtime, view_data, table, ExportKind::Template);
            emit_status(state, view_data, internal_tx, status);
        }
        (KeyCode::Char('y'), KeyModifiers::NONE) => {
            let status = copy_selection(runtime, view_data, table);
            emit_status(state, view_data, internal_tx, status);
        }
        (KeyCode::Char('r'), KeyModifiers::NONE) => {
            let status = match runtime.binding().refresh(table) {
                Ok(()) => format!("{} reloaded", table.label()),
                Err(error) => format!("reload failed: {error:#}"),
            };
            refresh_or_report(state, runtime, view_data, internal_tx);
            emit_status(state, view_data, internal_tx, status);
        }
        _ => {}
    }
    false
}

/// Runs a table action. Actions that need confirmation are first run with a
/// prompt that records the question and declines, so the dispatcher can
/// reject them early; the confirm overlay then re-runs them.
fn run_action<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    action: TableAction,
) {
    let table = state.active_table;
    let mut asked = None;
    let mut ask = |prompt: &ConfirmPrompt| {
        asked = Some(*prompt);
        false
    };
    let result = view_data
        .dispatcher
        .dispatch(table, action, runtime.binding(), &mut ask);

    match result {
        Err(CommandError::Declined { .. }) if asked.is_some() => {
            view_data.confirm = asked;
            state.dispatch(AppCommand::OpenConfirm);
        }
        Ok(outcome) => {
            refresh_or_report(state, runtime, view_data, internal_tx);
            if action == TableAction::Add {
                view_data.tables.entry(table).and_modify(|view| view.selected_row = 0);
            }
            emit_status(state, view_data, internal_tx, outcome.status(table));
        }
        Err(error) => {
            refresh_or_report(state, runtime, view_data, internal_tx);
            emit_status(state, view_data, internal_tx, error.to_string());
        }
    }
}

fn handle_confirm_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    let Some(prompt) = view_data.confirm else {
        state.dispatch(AppCommand::ExitToNav);
        return;
    };
    let accepted = match key.code {
        KeyCode::Char('y') | KeyCode::Enter => true,
        KeyCode::Char('n') | KeyCode::Esc => false,
        _ => return,
    };
    view_data.confirm = None;
    state.dispatch(AppCommand::ExitToNav);
    if !accepted {
        emit_status(
            state,
            view_data,
            internal_tx,
            format!("{} kept", prompt.table.label()),
        );
        return;
    }

    let result = view_data.dispatcher.dispatch(
        prompt.table,
        prompt.action,
        runtime.binding(),
        &mut |_: &ConfirmPrompt| true,
    );
    refresh_or_report(state, runtime, view_data, internal_tx);
    let status = match result {
        Ok(outcome) => outcome.status(prompt.table),
        Err(error) => error.to_string(),
    };
    emit_status(state, view_data, internal_tx, status);
}

fn open_cell_edit(
    state: &mut AppState,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    let table = state.active_table;
    let Some(view) = view_data.tables.get(&table) else {
        return;
    };
    let Some((row, data)) = view_data.snapshot.rows.get(view.selected_row) else {
        return;
    };
    if !view_data.dispatcher.is_row_editable(table, row) {
        emit_status(
            state,
            view_data,
            internal_tx,
            "row is not being edited -- press e to edit or a to add",
        );
        return;
    }
    let Some(column) = view.layout.columns().get(view.selected_col) else {
        return;
    };
    let is_key = view
        .properties
        .iter()
        .any(|property| property.key && property.name == column.property_key);
    if is_key && !row.is_transient() {
        let message = format!("{} cannot change once saved", column.label);
        emit_status(state, view_data, internal_tx, message);
        return;
    }
    view_data.cell_edit = Some(CellEditState {
        row: row.clone(),
        field: column.property_key.clone(),
        label: column.label.clone(),
        buffer: data.value(&column.property_key).display(),
    });
    state.dispatch(AppCommand::EnterCellEdit);
}

fn handle_cell_edit_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    let Some(edit) = view_data.cell_edit.as_mut() else {
        state.dispatch(AppCommand::ExitToNav);
        return;
    };
    match key.code {
        KeyCode::Char(ch) => edit.buffer.push(ch),
        KeyCode::Backspace => {
            edit.buffer.pop();
        }
        KeyCode::Esc => {
            view_data.cell_edit = None;
            state.dispatch(AppCommand::ExitToNav);
        }
        KeyCode::Enter => {
            let table = state.active_table;
            let Some(edit) = view_data.cell_edit.take() else {
                return;
            };
            state.dispatch(AppCommand::ExitToNav);
            let edm_type = view_data
                .tables
                .get(&table)
                .and_then(|view| {
                    view.properties
                        .iter()
                        .find(|property| property.name == edit.field)
                })
                .map(|property| property.edm_type);
            let parsed = match edm_type {
                Some(edm_type) => edm_type.parse_value(&edit.buffer),
                None => Ok(FieldValue::text(edit.buffer.clone())),
            };
            let status = match parsed {
                Ok(value) => match view_data
                    .dispatcher
                    .edit_field(table, &edit.row, &edit.field, value)
                {
                    Ok(()) => format!("{} updated", edit.label),
                    Err(error) => error.to_string(),
                },
                Err(error) => format!("{}: {error:#}", edit.label),
            };
            refresh_or_report(state, runtime, view_data, internal_tx);
            emit_status(state, view_data, internal_tx, status);
        }
        _ => {}
    }
}

fn handle_filter_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    let Some(input) = view_data.filter_input.as_mut() else {
        state.dispatch(AppCommand::ExitToNav);
        return;
    };
    match key.code {
        KeyCode::Char(ch) => input.push(ch),
        KeyCode::Backspace => {
            input.pop();
        }
        KeyCode::Esc => {
            view_data.filter_input = None;
            state.dispatch(AppCommand::ExitToNav);
        }
        KeyCode::Enter => {
            let raw = view_data.filter_input.take().unwrap_or_default();
            state.dispatch(AppCommand::ExitToNav);
            let status = apply_filter(state.active_table, view_data, &raw);
            refresh_or_report(state, runtime, view_data, internal_tx);
            emit_status(state, view_data, internal_tx, status);
        }
        _ => {}
    }
}

fn apply_filter(table: TableKind, view_data: &mut ViewData, raw: &str) -> String {
    let Some(view) = view_data.tables.get_mut(&table) else {
        return "nothing to filter".to_owned();
    };
    if raw.trim().is_empty() {
        view.filter = None;
        return "filter cleared".to_owned();
    }
    let Some(column) = view.layout.columns().get(view.selected_col) else {
        return "no column to filter".to_owned();
    };
    let Some(field) = filter_field(&view.properties, &column.property_key) else {
        return format!("{} cannot be filtered", column.label);
    };
    match FilterCondition::parse(&field, raw) {
        Ok(condition) => {
            let status = format!("filtering {} by {raw:?}", field.label);
            view.filter = Some(ActiveFilter {
                field,
                condition,
                raw: raw.to_owned(),
            });
            view.selected_row = 0;
            status
        }
        Err(error) => format!("{error:#}"),
    }
}

fn export_table<R: AppRuntime>(
    runtime: &mut R,
    view_data: &ViewData,
    table: TableKind,
    kind: ExportKind,
) -> String {
    let Some(view) = view_data.tables.get(&table) else {
        return "nothing to export".to_owned();
    };
    let columns = view.layout.columns();
    let contents = match kind {
        ExportKind::Template => build_header_only_csv(columns),
        ExportKind::Export => {
            let rows: Vec<RowData> = view_data
                .snapshot
                .rows
                .iter()
                .map(|(_, data)| data.clone())
                .collect();
            build_data_csv(columns, &rows)
        }
    };
    let file_name = export_file_name(table, kind, runtime.today());
    let written = contents.and_then(|contents| runtime.write_export(&file_name, &contents));
    match written {
        Ok(path) => {
            debug!(%table, path = %path.display(), "exported");
            match kind {
                ExportKind::Export => format!(
                    "exported {} rows to {}",
                    view_data.snapshot.rows.len(),
                    path.display()
                ),
                ExportKind::Template => format!("template written to {}", path.display()),
            }
        }
        Err(error) => format!("{} failed: {error:#}", kind.as_str()),
    }
}

/// Writes the selected rows, with any unsaved edits, as a JSON file.
fn copy_selection<R: AppRuntime>(runtime: &mut R, view_data: &ViewData, table: TableKind) -> String {
    let selection = view_data.dispatcher.controller(table).selection();
    if selection.is_empty() {
        return "nothing selected".to_owned();
    }
    let binding: &dyn EntityBinding = runtime.binding();
    let rows: Vec<RowData> = selection
        .iter()
        .filter_map(|row| {
            view_data
                .dispatcher
                .current_value(table, binding, row)
                .or_else(|| binding.object(row))
        })
        .collect();
    let file_name = selection_file_name(table, runtime.today());
    let written = build_selection_json(&rows)
        .and_then(|contents| runtime.write_export(&file_name, &contents));
    match written {
        Ok(path) => {
            debug!(%table, rows = rows.len(), path = %path.display(), "selection copied");
            format!("copied {} rows to {}", rows.len(), path.display())
        }
        Err(error) => format!("copy failed: {error:#}"),
    }
}

fn table_command_for_key(key: KeyEvent) -> Option<TableCommand> {
    match (key.code, key.modifiers) {
        (KeyCode::Char('j'), _) | (KeyCode::Down, _) => Some(TableCommand::MoveRow(1)),
        (KeyCode::Char('k'), _) | (KeyCode::Up, _) => Some(TableCommand::MoveRow(-1)),
        (KeyCode::Char('h'), _) | (KeyCode::Left, _) => Some(TableCommand::MoveColumn(-1)),
        (KeyCode::Char('l'), _) | (KeyCode::Right, _) => Some(TableCommand::MoveColumn(1)),
        (KeyCode::Char('d'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
            Some(TableCommand::MoveRow(HALF_PAGE_ROWS))
        }
        (KeyCode::Char('u'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
            Some(TableCommand::MoveRow(-HALF_PAGE_ROWS))
        }
        (KeyCode::Char('g'), _) => Some(TableCommand::JumpFirstRow),
        (KeyCode::Char('G'), _) => Some(TableCommand::JumpLastRow),
        (KeyCode::Char(' '), _) => Some(TableCommand::ToggleSelection),
        (KeyCode::Char('u'), KeyModifiers::NONE) => Some(TableCommand::ClearSelection),
        (KeyCode::Char('c'), KeyModifiers::NONE) => Some(TableCommand::HideCurrentColumn),
        (KeyCode::Char('C'), _) => Some(TableCommand::ResetColumns),
        (KeyCode::Char('<'), _) => Some(TableCommand::ShiftColumn(-1)),
        (KeyCode::Char('>'), _) => Some(TableCommand::ShiftColumn(1)),
        _ => None,
    }
}

fn apply_table_command<R: AppRuntime>(
    state: &AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    command: TableCommand,
) -> Option<String> {
    let table = state.active_table;
    let row_count = view_data.snapshot.rows.len();
    let view = view_data.tables.get_mut(&table)?;
    match command {
        TableCommand::MoveRow(delta) => {
            view.selected_row = shift_index(view.selected_row, delta, row_count);
            None
        }
        TableCommand::MoveColumn(delta) => {
            view.selected_col = shift_index(view.selected_col, delta, view.layout.columns().len());
            None
        }
        TableCommand::JumpFirstRow => {
            view.selected_row = 0;
            None
        }
        TableCommand::JumpLastRow => {
            view.selected_row = row_count.saturating_sub(1);
            None
        }
        TableCommand::ToggleSelection => {
            let (row, _) = view_data.snapshot.rows.get(view.selected_row)?;
            let mut selection = view_data.dispatcher.controller(table).selection().to_vec();
            if let Some(index) = selection.iter().position(|selected| selected == row) {
                selection.remove(index);
            } else {
                selection.push(row.clone());
            }
            let count = selection.len();
            view_data.dispatcher.select(table, selection);
            Some(format!("{count} selected"))
        }
        TableCommand::ClearSelection => {
            view_data.dispatcher.select(table, Vec::new());
            Some("selection cleared".to_owned())
        }
        TableCommand::HideCurrentColumn => {
            let key = view.layout.columns().get(view.selected_col)?.property_key.clone();
            let status = match view.layout.remove_item(&key) {
                Ok(column) => format!("{} hidden", column.label),
                Err(error) => return Some(format!("{error:#}")),
            };
            view.selected_col = view.selected_col.min(view.layout.columns().len() - 1);
            let keys = view.layout.keys();
            Some(persist_layout(runtime, table, Some(keys.as_slice())).unwrap_or(status))
        }
        TableCommand::ResetColumns => {
            view.layout = ColumnLayout::from_properties(table, &view.properties);
            view.selected_col = 0;
            Some(persist_layout(runtime, table, None).unwrap_or_else(|| "columns reset".to_owned()))
        }
        TableCommand::ShiftColumn(delta) => {
            let key = view.layout.columns().get(view.selected_col)?.property_key.clone();
            match view.layout.move_item(&key, delta) {
                Ok(position) => view.selected_col = position,
                Err(error) => return Some(format!("{error:#}")),
            }
            let keys = view.layout.keys();
            persist_layout(runtime, table, Some(keys.as_slice()))
        }
    }
}

/// Returns a status only when saving failed.
fn persist_layout<R: AppRuntime>(
    runtime: &mut R,
    table: TableKind,
    keys: Option<&[String]>,
) -> Option<String> {
    runtime
        .save_column_layout(table, keys)
        .err()
        .map(|error| format!("layout not saved: {error:#}"))
}

fn clear_selection(view_data: &mut ViewData, table: TableKind) {
    view_data.dispatcher.select(table, Vec::new());
}

fn shift_index(current: usize, delta: isize, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let next = if delta.is_negative() {
        current.saturating_sub(delta.unsigned_abs())
    } else {
        current.saturating_add(delta as usize)
    };
    next.min(len - 1)
}

fn clamp_table_cursor(state: &AppState, view_data: &mut ViewData) {
    let row_count = view_data.snapshot.rows.len();
    if let Some(view) = view_data.tables.get_mut(&state.active_table) {
        view.selected_row = view.selected_row.min(row_count.saturating_sub(1));
        view.selected_col = view
            .selected_col
            .min(view.layout.columns().len().saturating_sub(1));
    }
}

fn tab_title(table: TableKind, view_data: &ViewData) -> String {
    let mode = view_data.dispatcher.controller(table).tracker().mode();
    if mode.is_adding() || mode.is_editing() {
        format!(" {} * ", table.label())
    } else {
        format!(" {} ", table.label())
    }
}

fn render(frame: &mut ratatui::Frame<'_>, state: &AppState, view_data: &ViewData) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(1),
            Constraint::Length(3),
        ])
        .split(frame.area());

    let selected = TableKind::ALL
        .iter()
        .position(|table| *table == state.active_table)
        .unwrap_or(0);
    let titles = TableKind::ALL
        .iter()
        .map(|table| tab_title(*table, view_data))
        .collect::<Vec<String>>();
    let tabs = Tabs::new(titles)
        .block(Block::default().title("masterdata").borders(Borders::ALL))
        .style(Style::default().fg(Color::White))
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .select(selected);
    frame.render_widget(tabs, layout[0]);

    render_table(frame, layout[1], state, view_data);

    let status_widget = Paragraph::new(status_text(state, view_data))
        .style(Style::default().fg(Color::Yellow))
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(status_widget, layout[2]);

    if let Some(prompt) = &view_data.confirm {
        let area = centered_rect(50, 20, frame.area());
        frame.render_widget(Clear, area);
        let confirm = Paragraph::new(format!("{}\n\ny confirm | n keep", prompt.message()))
            .block(Block::default().title("confirm").borders(Borders::ALL));
        frame.render_widget(confirm, area);
    }

    if let Some(input) = &view_data.filter_input {
        let area = centered_rect(50, 20, frame.area());
        frame.render_widget(Clear, area);
        let label = view_data
            .tables
            .get(&state.active_table)
            .and_then(|view| view.layout.columns().get(view.selected_col))
            .map_or("column", |column| column.label.as_str());
        let filter = Paragraph::new(format!("{label}: {input}_\n\nenter apply | esc close"))
            .block(Block::default().title("filter").borders(Borders::ALL));
        frame.render_widget(filter, area);
    }

    if view_data.help_visible {
        let area = centered_rect(80, 60, frame.area());
        frame.render_widget(Clear, area);
        let help = Paragraph::new(help_overlay_text())
            .block(Block::default().title("help").borders(Borders::ALL));
        frame.render_widget(help, area);
    }
}

fn render_table(
    frame: &mut ratatui::Frame<'_>,
    area: Rect,
    state: &AppState,
    view_data: &ViewData,
) {
    let table = state.active_table;
    let Some(view) = view_data.tables.get(&table) else {
        let empty = Paragraph::new(String::new())
            .block(Block::default().borders(Borders::ALL).title(table.label()));
        frame.render_widget(empty, area);
        return;
    };

    let columns = view.layout.columns();
    let mut widths = vec![Constraint::Length(2)];
    widths.extend(columns.iter().map(|_| Constraint::Min(8)));

    let header_cells = std::iter::once(Cell::from(String::new())).chain(columns.iter().map(
        |column| {
            Cell::from(column.label.clone()).style(
                Style::default()
                    .fg(Color::White)
                    .add_modifier(Modifier::BOLD),
            )
        },
    ));
    let header = Row::new(header_cells);

    let controller = view_data.dispatcher.controller(table);
    let editing_cell = view_data
        .cell_edit
        .as_ref()
        .map(|edit| (&edit.row, edit.field.as_str(), edit.buffer.as_str()));
    let rows = view_data
        .snapshot
        .rows
        .iter()
        .enumerate()
        .map(|(row_index, (row, data))| {
            let selected_row = row_index == view.selected_row;
            let editable = controller.tracker().is_row_editable(row);
            let marker = row_marker(
                controller.selection().contains(row),
                editable,
                row.is_transient(),
            );
            let cells = columns.iter().enumerate().map(|(column_index, column)| {
                let text = match editing_cell {
                    Some((edit_row, field, buffer))
                        if edit_row == row && field == column.property_key =>
                    {
                        format!("{buffer}_")
                    }
                    _ => data.value(&column.property_key).display(),
                };
                let mut style = Style::default();
                if editable {
                    style = style.fg(Color::Yellow);
                }
                if selected_row {
                    style = style.bg(Color::DarkGray);
                }
                if selected_row && column_index == view.selected_col {
                    style = Style::default()
                        .fg(Color::Black)
                        .bg(Color::Cyan)
                        .add_modifier(Modifier::BOLD);
                }
                Cell::from(text).style(style)
            });
            Row::new(std::iter::once(Cell::from(marker)).chain(cells))
        });

    let widget = Table::new(rows, widths)
        .header(header)
        .column_spacing(1)
        .block(
            Block::default()
                .title(table_title(table, view_data))
                .borders(Borders::ALL),
        );
    frame.render_widget(widget, area);
}

fn row_marker(selected: bool, editable: bool, transient: bool) -> String {
    let mut marker = String::new();
    if selected {
        marker.push_str(SELECTED_MARK);
    }
    if transient {
        marker.push_str(NEW_MARK);
    } else if editable {
        marker.push_str(EDITING_MARK);
    }
    marker
}

fn table_title(table: TableKind, view_data: &ViewData) -> String {
    let rows = view_data.snapshot.rows.len();
    let filter = view_data
        .tables
        .get(&table)
        .and_then(|view| view.filter.as_ref())
        .map(|filter| format!(" | {} ~ {}", filter.field.label, filter.raw))
        .unwrap_or_default();
    format!("{} ({rows}){filter}", table.entity_set())
}

fn status_text(state: &AppState, view_data: &ViewData) -> String {
    let badge = match state.mode {
        AppMode::Nav => "NAV",
        AppMode::CellEdit => "EDIT",
        AppMode::Confirm => "CONFIRM",
        AppMode::Filter => "FILTER",
    };
    let controller = view_data.dispatcher.controller(state.active_table);
    let mode = controller.tracker().mode();
    let buttons = controller.buttons();
    let hints = [
        (TableAction::Add, "a add"),
        (TableAction::Edit, "e edit"),
        (TableAction::Delete, "d del"),
        (TableAction::Save, "s save"),
        (TableAction::Cancel, "esc cancel"),
    ]
    .into_iter()
    .filter(|(action, _)| buttons.is_enabled(*action))
    .map(|(_, hint)| hint)
    .collect::<Vec<_>>()
    .join(" ");
    let default = format!("{hints} | space sel | i cell | x/t csv | ? help");
    let session = if mode.is_adding() || mode.is_editing() {
        format!(" {}", mode.label())
    } else {
        String::new()
    };
    match &state.status_line {
        Some(status) => format!("{badge}{session} | {status} | {default}"),
        None => format!("{badge}{session} | {default}"),
    }
}

fn help_overlay_text() -> &'static str {
    "global: ctrl+q quit without saving | q quit | ? help\n\
nav: j/k/h/l g/G ctrl+d/u | f/b or tab tables | 1-5 jump to table | r reload\n\
rows: space select | u clear selection | a add | e edit | d delete | s save | esc cancel\n\
cells: i or enter edit cell | enter apply | esc discard\n\
columns: c hide | C reset | </> move | / filter current column\n\
files: x export rows | t header template | y copy selection as json\n\
confirm: y or enter yes | n or esc no"
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
