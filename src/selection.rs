//! Row selection of one admin table.

use std::collections::HashSet;

use crate::api::RowId;

/// State of the select-all checkbox in a table header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderState {
    Unchecked,
    Indeterminate,
    Checked,
}

impl HeaderState {
    pub fn marker(self) -> &'static str {
        match self {
            HeaderState::Unchecked => "[ ]",
            HeaderState::Indeterminate => "[-]",
            HeaderState::Checked => "[x]",
        }
    }
}

/// Typed selection changes, applied through `SelectionTracker::apply`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionEvent {
    /// A single row checkbox changed
    Toggled { id: RowId, checked: bool },
    /// The select-all checkbox changed
    ToggledAll { checked: bool },
    /// The table was re-rendered with these rows
    RowsReplaced { ids: Vec<RowId> },
    Cleared,
}

/// Tracks which rendered rows are checked.
///
/// The selection is always a subset of the rendered rows: toggling an id that
/// is not rendered is a no-op and replacing the rows prunes stale ids.
#[derive(Debug, Clone, Default)]
pub struct SelectionTracker {
    rows: Vec<RowId>,
    selected: HashSet<RowId>,
}

impl SelectionTracker {
    pub fn apply(&mut self, event: SelectionEvent) {
        match event {
            SelectionEvent::Toggled { id, checked } => {
                self.toggle_item(&id, checked);
            }
            SelectionEvent::ToggledAll { checked } => self.toggle_all(checked),
            SelectionEvent::RowsReplaced { ids } => self.set_rows(ids),
            SelectionEvent::Cleared => self.clear(),
        }
    }

    pub fn toggle_all(&mut self, checked: bool) {
        if checked {
            self.selected = self.rows.iter().cloned().collect();
        } else {
            self.selected.clear();
        }
    }

    /// Returns true when the selection changed
    pub fn toggle_item(&mut self, id: &RowId, checked: bool) -> bool {
        if !self.rows.contains(id) {
            return false;
        }
        if checked {
            self.selected.insert(id.clone())
        } else {
            self.selected.remove(id)
        }
    }

    pub fn set_rows(&mut self, rows: Vec<RowId>) {
        self.selected.retain(|id| rows.contains(id));
        self.rows = rows;
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    pub fn is_selected(&self, id: &RowId) -> bool {
        self.selected.contains(id)
    }

    pub fn selection_count(&self) -> usize {
        self.selected.len()
    }

    pub fn header_state(&self) -> HeaderState {
        let count = self.selection_count();
        if count == 0 {
            HeaderState::Unchecked
        } else if count == self.rows.len() {
            HeaderState::Checked
        } else {
            HeaderState::Indeterminate
        }
    }

    /// Selected ids in the order the rows are rendered
    pub fn selected_ids(&self) -> Vec<RowId> {
        self.rows
            .iter()
            .filter(|id| self.selected.contains(*id))
            .cloned()
            .collect()
    }
}
