//! Copy mode - vim-like scrollback navigation and text selection
//!
//! Lines are addressed by their distance from the live bottom row: line 0 is
//! the last row of live output, larger numbers are older. That keeps cursor
//! and match positions stable while the view scrolls.

use std::collections::BTreeMap;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use unicode_width::UnicodeWidthChar;

use crate::core::term::VtEmulator;

/// Copy mode sub-state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyState {
    Normal,
    /// Typing a search query
    Search { query: String, forward: bool },
    /// Character-wise selection anchored at (col, line)
    VisualChar { anchor: (u16, usize) },
    /// Line-wise selection anchored at a line
    VisualLine { anchor: usize },
}

/// Result of a key handled in copy mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    Continue,
    Exit,
    Yank(String),
}

/// Copy mode state
#[derive(Debug, Clone)]
pub struct CopyMode {
    pub state: CopyState,
    /// Cursor column in cells
    pub cursor_col: u16,
    /// Cursor line, counted from the live bottom row
    pub cursor_line: usize,
    /// View offset into scrollback
    pub offset: usize,
    pub last_query: String,
    pub search_forward: bool,
    /// Search matches (line, col_start, col_end) in reading order
    pub matches: Vec<(usize, u16, u16)>,
    pub current_match: usize,
}

impl CopyMode {
    /// Enter copy mode on the live view with the cursor mid-screen.
    pub fn enter(emu: &dyn VtEmulator) -> Self {
        let offset = emu.set_scrollback_offset(0);
        let (_, rows) = emu.size();
        let rows = rows.max(1) as usize;
        Self {
            state: CopyState::Normal,
            cursor_col: 0,
            cursor_line: rows - 1 - rows / 2,
            offset,
            last_query: String::new(),
            search_forward: true,
            matches: Vec::new(),
            current_match: 0,
        }
    }

    pub fn handle_key(&mut self, key: &KeyEvent, emu: &dyn VtEmulator) -> CopyOutcome {
        if let CopyState::Search { .. } = self.state {
            return self.search_key(key, emu);
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => {
                if self.state == CopyState::Normal {
                    return CopyOutcome::Exit;
                }
                self.state = CopyState::Normal;
            }
            KeyCode::Char('q') if !ctrl => return CopyOutcome::Exit,
            KeyCode::Char('y') | KeyCode::Enter if !ctrl => {
                return match self.selected_text(emu) {
                    Some(text) => CopyOutcome::Yank(text),
                    None if key.code == KeyCode::Enter => CopyOutcome::Exit,
                    None => CopyOutcome::Continue,
                };
            }

            KeyCode::Char('u') if ctrl => self.move_lines(emu, half_page(emu) as isize),
            KeyCode::Char('d') if ctrl => self.move_lines(emu, -(half_page(emu) as isize)),
            KeyCode::Char('b') if ctrl => self.move_lines(emu, page(emu) as isize),
            KeyCode::Char('f') if ctrl => self.move_lines(emu, -(page(emu) as isize)),
            KeyCode::PageUp => self.move_lines(emu, page(emu) as isize),
            KeyCode::PageDown => self.move_lines(emu, -(page(emu) as isize)),

            KeyCode::Char('k') | KeyCode::Up => self.move_lines(emu, 1),
            KeyCode::Char('j') | KeyCode::Down => self.move_lines(emu, -1),
            KeyCode::Char('h') | KeyCode::Left => self.cursor_col = self.cursor_col.saturating_sub(1),
            KeyCode::Char('l') | KeyCode::Right => {
                let cols = emu.size().0;
                if self.cursor_col + 1 < cols {
                    self.cursor_col += 1;
                }
            }
            KeyCode::Char('0') | KeyCode::Home => self.cursor_col = 0,
            KeyCode::Char('$') | KeyCode::End => {
                let line = self.line_text(emu, self.cursor_line);
                self.cursor_col = cell_width(line.trim_end()).saturating_sub(1);
            }
            KeyCode::Char('g') => {
                let top = history_top(emu);
                self.cursor_col = 0;
                self.move_lines(emu, top as isize - self.cursor_line as isize);
            }
            KeyCode::Char('G') => {
                self.cursor_col = 0;
                self.move_lines(emu, -(self.cursor_line as isize));
            }

            KeyCode::Char('v') => {
                self.state = match self.state {
                    CopyState::VisualChar { .. } => CopyState::Normal,
                    _ => CopyState::VisualChar {
                        anchor: (self.cursor_col, self.cursor_line),
                    },
                };
            }
            KeyCode::Char('V') => {
                self.state = match self.state {
                    CopyState::VisualLine { .. } => CopyState::Normal,
                    _ => CopyState::VisualLine {
                        anchor: self.cursor_line,
                    },
                };
            }

            KeyCode::Char('/') => {
                self.state = CopyState::Search {
                    query: String::new(),
                    forward: true,
                };
            }
            KeyCode::Char('?') => {
                self.state = CopyState::Search {
                    query: String::new(),
                    forward: false,
                };
            }
            KeyCode::Char('n') => self.next_match(emu, self.search_forward),
            KeyCode::Char('N') => self.next_match(emu, !self.search_forward),
            _ => {}
        }
        CopyOutcome::Continue
    }

    fn search_key(&mut self, key: &KeyEvent, emu: &dyn VtEmulator) -> CopyOutcome {
        let CopyState::Search { ref mut query, forward } = self.state else {
            return CopyOutcome::Continue;
        };
        match key.code {
            KeyCode::Esc => self.state = CopyState::Normal,
            KeyCode::Backspace => {
                query.pop();
            }
            KeyCode::Enter => {
                let query = std::mem::take(query);
                self.state = CopyState::Normal;
                self.search(emu, &query, forward);
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => query.push(c),
            _ => {}
        }
        CopyOutcome::Continue
    }

    /// Move the cursor by `delta` lines (positive is up, towards history)
    /// and scroll to keep it visible.
    fn move_lines(&mut self, emu: &dyn VtEmulator, delta: isize) {
        let target = (self.cursor_line as isize + delta).max(0) as usize;
        self.cursor_line = target.min(history_top(emu));
        self.scroll_to_cursor(emu);
    }

    fn scroll_to_cursor(&mut self, emu: &dyn VtEmulator) {
        let rows = page(emu);
        let wanted = if self.cursor_line < self.offset {
            self.cursor_line
        } else if self.cursor_line >= self.offset + rows {
            self.cursor_line + 1 - rows
        } else {
            self.offset
        };
        self.offset = emu.set_scrollback_offset(wanted);
        // Clamp the cursor if the emulator could not scroll that far
        let top = self.offset + rows - 1;
        if self.cursor_line > top {
            self.cursor_line = top;
        }
    }

    /// Viewport row of a line under the current offset
    pub fn visible_row(&self, line: usize, rows: u16) -> Option<u16> {
        let rows = rows as usize;
        if line < self.offset || line >= self.offset + rows {
            return None;
        }
        Some((rows - 1 - (line - self.offset)) as u16)
    }

    /// Cursor position on screen as (col, row)
    pub fn cursor_on_screen(&self, rows: u16) -> Option<(u16, u16)> {
        self.visible_row(self.cursor_line, rows).map(|row| (self.cursor_col, row))
    }

    /// Read one line, scrolling temporarily if it is off-screen.
    fn line_text(&self, emu: &dyn VtEmulator, line: usize) -> String {
        let rows = page(emu);
        if let Some(row) = self.visible_row(line, rows as u16) {
            return emu.line_text(row);
        }
        let applied = emu.set_scrollback_offset(line.saturating_sub(rows - 1));
        let text = if line >= applied && line < applied + rows {
            emu.line_text((rows - 1 - (line - applied)) as u16)
        } else {
            String::new()
        };
        emu.set_scrollback_offset(self.offset);
        text
    }

    /// Selected range as ((col, line), (col, line)) in reading order
    pub fn selection(&self) -> Option<((u16, usize), (u16, usize))> {
        let cursor = (self.cursor_col, self.cursor_line);
        let (a, b) = match self.state {
            CopyState::VisualChar { anchor } => (anchor, cursor),
            CopyState::VisualLine { anchor } => {
                let (top, bottom) = if anchor >= self.cursor_line {
                    (anchor, self.cursor_line)
                } else {
                    (self.cursor_line, anchor)
                };
                return Some(((0, top), (u16::MAX, bottom)));
            }
            _ => return None,
        };
        // Reading order: older (larger) lines first, then columns
        if (a.1 > b.1) || (a.1 == b.1 && a.0 <= b.0) {
            Some((a, b))
        } else {
            Some((b, a))
        }
    }

    fn selected_text(&self, emu: &dyn VtEmulator) -> Option<String> {
        let ((from_col, from_line), (to_col, to_line)) = self.selection()?;
        let mut lines = Vec::new();
        for line in (to_line..=from_line).rev() {
            let text = self.line_text(emu, line);
            let start = if line == from_line { from_col } else { 0 };
            let end = if line == to_line { Some(to_col) } else { None };
            lines.push(slice_cells(&text, start, end).trim_end().to_string());
        }
        Some(lines.join("\n"))
    }

    fn search(&mut self, emu: &dyn VtEmulator, query: &str, forward: bool) {
        self.last_query = query.to_string();
        self.search_forward = forward;
        self.matches.clear();
        self.current_match = 0;
        if query.is_empty() {
            return;
        }

        let needle = query.to_lowercase();
        for (line, text) in collect_history(emu).into_iter().rev() {
            let hay = text.to_lowercase();
            let mut start = 0;
            while let Some(pos) = hay[start..].find(&needle) {
                let byte = start + pos;
                let col = cell_width(&hay[..byte]);
                let end = col + cell_width(&needle);
                self.matches.push((line, col, end));
                start = byte + needle.len().max(1);
            }
        }
        emu.set_scrollback_offset(self.offset);

        if self.matches.is_empty() {
            return;
        }
        let cursor = (self.cursor_line, self.cursor_col);
        let after = |&(line, col, _): &(usize, u16, u16)| line < cursor.0 || (line == cursor.0 && col > cursor.1);
        let before = |&(line, col, _): &(usize, u16, u16)| line > cursor.0 || (line == cursor.0 && col < cursor.1);
        self.current_match = if forward {
            self.matches.iter().position(after).unwrap_or(0)
        } else {
            self.matches
                .iter()
                .rposition(before)
                .unwrap_or(self.matches.len() - 1)
        };
        self.jump_to_match(emu);
    }

    fn next_match(&mut self, emu: &dyn VtEmulator, forward: bool) {
        if self.matches.is_empty() {
            return;
        }
        let len = self.matches.len();
        self.current_match = if forward {
            (self.current_match + 1) % len
        } else {
            (self.current_match + len - 1) % len
        };
        self.jump_to_match(emu);
    }

    fn jump_to_match(&mut self, emu: &dyn VtEmulator) {
        if let Some(&(line, col, _)) = self.matches.get(self.current_match) {
            self.cursor_col = col;
            self.cursor_line = line;
            self.scroll_to_cursor(emu);
        }
    }

    /// Get search status text
    pub fn search_status(&self) -> String {
        match self.state {
            CopyState::Search { ref query, forward } => {
                format!("{}{}", if forward { '/' } else { '?' }, query)
            }
            _ if !self.matches.is_empty() => format!(
                "[{}/{}] {}",
                self.current_match + 1,
                self.matches.len(),
                self.last_query
            ),
            _ if !self.last_query.is_empty() => format!("Pattern not found: {}", self.last_query),
            _ => String::new(),
        }
    }
}

fn page(emu: &dyn VtEmulator) -> usize {
    emu.size().1.max(1) as usize
}

fn half_page(emu: &dyn VtEmulator) -> usize {
    (page(emu) / 2).max(1)
}

/// Oldest addressable line
fn history_top(emu: &dyn VtEmulator) -> usize {
    let current = emu.scrollback_offset();
    let max = emu.set_scrollback_offset(usize::MAX);
    emu.set_scrollback_offset(current);
    max + page(emu) - 1
}

/// Every line of history and screen, keyed by line number
fn collect_history(emu: &dyn VtEmulator) -> BTreeMap<usize, String> {
    let rows = page(emu);
    let mut lines = BTreeMap::new();
    let mut requested = 0;
    loop {
        let applied = emu.set_scrollback_offset(requested);
        for row in 0..rows {
            lines
                .entry(applied + rows - 1 - row)
                .or_insert_with(|| emu.line_text(row as u16));
        }
        if applied < requested || requested > usize::MAX - rows {
            break;
        }
        requested = applied + rows;
    }
    lines
}

/// Display width of a string in cells
pub fn cell_width(s: &str) -> u16 {
    s.chars()
        .map(|c| c.width().unwrap_or(0) as u16)
        .fold(0u16, u16::saturating_add)
}

/// Characters covering cells `from..=to` (to end of line when `to` is None)
pub fn slice_cells(line: &str, from: u16, to: Option<u16>) -> String {
    let mut out = String::new();
    let mut cell = 0u16;
    for c in line.chars() {
        let w = c.width().unwrap_or(0) as u16;
        let last = cell + w.max(1) - 1;
        if last >= from && to.map_or(true, |to| cell <= to) {
            out.push(c);
        }
        cell = cell.saturating_add(w);
        if to.map_or(false, |to| cell > to) {
            break;
        }
    }
    out
}

/// Word-constituent characters for double-click selection
pub fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Cell bounds (start, end inclusive) of the word under `col`. A click on a
/// non-word character selects just that cell.
pub fn word_bounds(line: &str, col: u16) -> (u16, u16) {
    let mut cells: Vec<(u16, char)> = Vec::new();
    let mut cell = 0u16;
    for c in line.chars() {
        cells.push((cell, c));
        cell = cell.saturating_add((c.width().unwrap_or(0) as u16).max(1));
    }
    let Some(idx) = cells.iter().rposition(|&(start, _)| start <= col) else {
        return (col, col);
    };
    if !is_word_char(cells[idx].1) || col >= cell {
        return (col, col);
    }

    let mut first = idx;
    while first > 0 && is_word_char(cells[first - 1].1) {
        first -= 1;
    }
    let mut last = idx;
    while last + 1 < cells.len() && is_word_char(cells[last + 1].1) {
        last += 1;
    }
    let end_cell = cells[last].0 + (cells[last].1.width().unwrap_or(0) as u16).max(1) - 1;
    (cells[first].0, end_cell)
}
