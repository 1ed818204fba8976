// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::TableKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Nav,
    CellEdit,
    Confirm,
    Filter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppState {
    pub mode: AppMode,
    pub active_table: TableKind,
    pub status_line: Option<String>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            mode: AppMode::Nav,
            active_table: TableKind::Customers,
            status_line: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    NextTable,
    PrevTable,
    SelectTable(TableKind),
    EnterCellEdit,
    OpenConfirm,
    OpenFilter,
    ExitToNav,
    SetStatus(String),
    ClearStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    ModeChanged(AppMode),
    TableChanged(TableKind),
    StatusUpdated(String),
    StatusCleared,
}

impl AppState {
    pub fn dispatch(&mut self, command: AppCommand) -> Vec<AppEvent> {
        match command {
            AppCommand::NextTable => self.rotate_table(1),
            AppCommand::PrevTable => self.rotate_table(-1),
            AppCommand::SelectTable(table) => {
                if self.active_table == table {
                    return Vec::new();
                }
                self.active_table = table;
                vec![AppEvent::TableChanged(table)]
            }
            AppCommand::EnterCellEdit => self.set_mode(AppMode::CellEdit),
            AppCommand::OpenConfirm => self.set_mode(AppMode::Confirm),
            AppCommand::OpenFilter => self.set_mode(AppMode::Filter),
            AppCommand::ExitToNav => self.set_mode(AppMode::Nav),
            AppCommand::SetStatus(message) => vec![self.set_status(&message)],
            AppCommand::ClearStatus => {
                self.status_line = None;
                vec![AppEvent::StatusCleared]
            }
        }
    }

    fn rotate_table(&mut self, delta: isize) -> Vec<AppEvent> {
        let tables = TableKind::ALL;
        let current = tables
            .iter()
            .position(|table| *table == self.active_table)
            .unwrap_or(0) as isize;
        let len = tables.len() as isize;
        let next = (current + delta).rem_euclid(len) as usize;
        self.active_table = tables[next];
        vec![AppEvent::TableChanged(self.active_table)]
    }

    fn set_mode(&mut self, mode: AppMode) -> Vec<AppEvent> {
        if self.mode == mode {
            return Vec::new();
        }
        self.mode = mode;
        vec![AppEvent::ModeChanged(mode)]
    }

    fn set_status(&mut self, message: &str) -> AppEvent {
        self.status_line = Some(message.to_owned());
        AppEvent::StatusUpdated(message.to_owned())
    }
}
