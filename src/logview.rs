//! Viewport projection over a service's scrollback.
//!
//! The view is anchored at the bottom: `current_line` names the scrollback
//! line whose wrapped sub-row sits on the bottom viewport row, and
//! `offset` (always ≤ 0) moves that anchor up inside the line. Rendering
//! walks backward from the anchor and fills the viewport upward, so content
//! growth keeps the tail pinned while the offset percentage keeps the
//! position visually stable across width changes.
//!
//! The view also owns the search/filter interaction modes and the input
//! field they share.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

use crate::ansi;
use crate::scrollback::{MatchMode, ScrollbackBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    Normal,
    SearchInput,
    SearchNavigation,
    FilterInput,
    Filtered,
}

const RESULT_STYLE: Style = Style::new().fg(Color::Black).bg(Color::Yellow);
const CURRENT_RESULT_STYLE: Style = Style::new().fg(Color::Black).bg(Color::LightCyan);

#[derive(Debug, Default)]
pub struct LogView {
    buffer: ScrollbackBuffer,
    width: usize,
    height: usize,
    current_line: usize,
    offset: i32,
    offset_pct: f32,
    mode: ViewMode,
    input: String,
    search_mode: MatchMode,
    filter_mode: MatchMode,
    result_index: usize,
    updated: bool,
    cached: Vec<Line<'static>>,
}

impl LogView {
    pub fn new(max_log_bytes: usize) -> Self {
        Self {
            buffer: ScrollbackBuffer::new(max_log_bytes),
            updated: true,
            ..Self::default()
        }
    }

    pub fn buffer(&self) -> &ScrollbackBuffer {
        &self.buffer
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Appends output while keeping the anchor stable: pinned to the tail if
    /// it was at the bottom, on the same content otherwise (shifted down by
    /// the eviction count).
    pub fn append(&mut self, text: &str, end_line: bool) {
        let was_at_bottom = self.at_bottom();
        let result = self.buffer.append(text, end_line);
        if was_at_bottom {
            self.snap_to_bottom();
        } else {
            self.current_line = self.current_line.saturating_sub(result.evicted);
            self.clamp_current_line();
        }
        self.updated = true;
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.current_line = 0;
        self.offset = 0;
        self.offset_pct = 0.0;
        self.result_index = 0;
        self.updated = true;
    }

    /// Stores new dimensions and restores the anchor position inside the
    /// current line from the saved offset percentage, so a width change does
    /// not visually jump.
    pub fn set_size(&mut self, width: usize, height: usize) {
        if (width, height) == (self.width, self.height) {
            return;
        }
        self.width = width;
        self.height = height;
        if self.active_line_count() > 0 {
            let line_height = self.wrapped_height(self.current_line);
            if line_height > 0 {
                self.offset = (self.offset_pct * (line_height as f32 - 1.0)) as i32;
                self.recalc_pct_with(line_height);
            }
        }
        self.clamp_current_line();
        self.updated = true;
    }

    pub fn at_bottom(&self) -> bool {
        let count = self.active_line_count();
        count == 0 || (self.current_line == count - 1 && self.offset == 0)
    }

    pub fn scroll(&mut self, amount: i32) {
        if amount == 0 || self.active_line_count() == 0 {
            return;
        }
        let up = amount < 0;
        for _ in 0..amount.unsigned_abs() {
            if self.scroll_step(up) {
                break;
            }
        }
        self.clamp_current_line();
        self.updated = true;
    }

    pub fn goto_top(&mut self) {
        if self.active_line_count() == 0 {
            return;
        }
        self.current_line = 0;
        let line_height = self.wrapped_height(0);
        self.offset = -(line_height as i32) + 1;
        self.recalc_pct_with(line_height);
        self.clamp_current_line();
        self.updated = true;
    }

    pub fn goto_bottom(&mut self) {
        if self.active_line_count() == 0 {
            return;
        }
        self.snap_to_bottom();
        self.updated = true;
    }

    pub fn current_position(&self) -> (usize, i32) {
        (self.current_line, self.offset)
    }

    /// Handles a key in the view's current mode. Returns false when the key
    /// is not a view key and should fall through to the global bindings.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        match self.mode {
            ViewMode::Normal => match key.code {
                KeyCode::Char('/') => self.enter_search_input(),
                KeyCode::Char('f') => self.enter_filter_input(),
                _ => return self.handle_scroll_key(key),
            },
            ViewMode::SearchInput => match key.code {
                KeyCode::Esc => self.leave_search(),
                KeyCode::Enter => {
                    self.mode = ViewMode::SearchNavigation;
                    self.updated = true;
                }
                KeyCode::Tab => {
                    self.search_mode = self.search_mode.next();
                    self.apply_search();
                }
                KeyCode::BackTab => {
                    self.search_mode = self.search_mode.prev();
                    self.apply_search();
                }
                KeyCode::Backspace => {
                    self.input.pop();
                    self.apply_search();
                }
                KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                    self.input.push(c);
                    self.apply_search();
                }
                _ => {}
            },
            ViewMode::SearchNavigation => match key.code {
                KeyCode::Esc | KeyCode::Char('q') => self.leave_search(),
                KeyCode::Char('/') => self.enter_search_input(),
                KeyCode::Char('f') => self.enter_filter_input(),
                KeyCode::Char('n') => self.next_result(1),
                KeyCode::Char('N') => self.next_result(-1),
                KeyCode::Enter => {}
                KeyCode::Tab => {
                    self.search_mode = self.search_mode.next();
                    self.apply_search();
                }
                KeyCode::BackTab => {
                    self.search_mode = self.search_mode.prev();
                    self.apply_search();
                }
                _ => return self.handle_scroll_key(key),
            },
            ViewMode::FilterInput => match key.code {
                KeyCode::Esc => self.leave_filter(),
                KeyCode::Enter => {
                    self.mode = ViewMode::Filtered;
                    self.updated = true;
                }
                KeyCode::Tab => {
                    self.filter_mode = self.filter_mode.next();
                    self.apply_filter();
                }
                KeyCode::BackTab => {
                    self.filter_mode = self.filter_mode.prev();
                    self.apply_filter();
                }
                KeyCode::Backspace => {
                    self.input.pop();
                    self.apply_filter();
                }
                KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                    self.input.push(c);
                    self.apply_filter();
                }
                _ => {}
            },
            ViewMode::Filtered => match key.code {
                KeyCode::Esc | KeyCode::Char('q') => self.leave_filter(),
                KeyCode::Char('/') => self.enter_search_input(),
                KeyCode::Char('f') => self.enter_filter_input(),
                KeyCode::Enter => {}
                _ => return self.handle_scroll_key(key),
            },
        }
        true
    }

    /// The viewport content: exactly `height` rows, content bottom-aligned,
    /// the input row on top while a search or filter tool is open. Cached
    /// between mutations so the refresh tick stays cheap.
    pub fn visible_lines(&mut self) -> &[Line<'static>] {
        if self.updated {
            self.cached = self.build_visible_lines();
            self.updated = false;
        }
        &self.cached
    }

    pub fn debug_lines(&self) -> Vec<String> {
        vec![
            format!("mode: {:?}", self.mode),
            format!("currentLine: {}", self.current_line),
            format!("offset: {}", self.offset),
            format!(
                "lineHeight: {}",
                if self.active_line_count() == 0 {
                    0
                } else {
                    self.wrapped_height(self.current_line)
                }
            ),
            format!("offsetPct: {:.2}", self.offset_pct),
        ]
    }

    fn handle_scroll_key(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => self.scroll(-1),
            KeyCode::Down | KeyCode::Char('j') => self.scroll(1),
            KeyCode::PageUp => self.scroll(-(self.height as i32)),
            KeyCode::PageDown => self.scroll(self.height as i32),
            KeyCode::Char('t') => self.goto_top(),
            KeyCode::Char('b') => self.goto_bottom(),
            _ => return false,
        }
        true
    }

    fn enter_search_input(&mut self) {
        self.mode = ViewMode::SearchInput;
        self.input = self.buffer.search_pattern().to_string();
        self.updated = true;
    }

    fn enter_filter_input(&mut self) {
        self.mode = ViewMode::FilterInput;
        self.input = self.buffer.filter_pattern().to_string();
        self.updated = true;
    }

    fn apply_search(&mut self) {
        self.buffer.set_search(&self.input, self.search_mode);
        self.result_index = 0;
        self.updated = true;
    }

    fn apply_filter(&mut self) {
        self.buffer.set_filter(&self.input, self.filter_mode);
        self.snap_to_bottom();
        self.updated = true;
    }

    fn leave_search(&mut self) {
        self.mode = ViewMode::Normal;
        self.input.clear();
        self.buffer.set_search("", self.search_mode);
        self.result_index = 0;
        self.updated = true;
    }

    // Leaving the filter returns the anchor to the tail of the unfiltered
    // buffer.
    fn leave_filter(&mut self) {
        self.mode = ViewMode::Normal;
        self.input.clear();
        self.buffer.set_filter("", self.filter_mode);
        self.snap_to_bottom();
        self.updated = true;
    }

    fn next_result(&mut self, direction: i32) {
        let len = self.buffer.results().len();
        if len == 0 {
            return;
        }
        self.result_index = if direction > 0 {
            (self.result_index + 1) % len
        } else {
            (self.result_index + len - 1) % len
        };
        // Anchor the match line at the bottom, then scroll half a viewport
        // so the match lands near the middle.
        let line = self.buffer.results()[self.result_index].line;
        self.current_line = line;
        self.offset = 0;
        self.offset_pct = 0.0;
        self.clamp_current_line();
        self.scroll((self.height / 2) as i32);
        self.updated = true;
    }

    fn filter_applies(&self) -> bool {
        matches!(self.mode, ViewMode::FilterInput | ViewMode::Filtered)
            && self.buffer.filter_active()
    }

    fn active_line_count(&self) -> usize {
        if self.filter_applies() {
            self.buffer.filtered().len()
        } else {
            self.buffer.len()
        }
    }

    fn buffer_index(&self, active_index: usize) -> usize {
        if self.filter_applies() {
            self.buffer.filtered()[active_index]
        } else {
            active_index
        }
    }

    fn wrapped_height(&self, active_index: usize) -> usize {
        let chars = self
            .buffer
            .plain_line(self.buffer_index(active_index))
            .chars()
            .count();
        ansi::wrapped_rows(chars, self.width)
    }

    // One anchor step. Returns true when the step hit a boundary and was a
    // no-op.
    fn scroll_step(&mut self, up: bool) -> bool {
        if up {
            let line_height = self.wrapped_height(self.current_line);
            if self.offset.unsigned_abs() as usize + 1 >= line_height {
                if self.current_line == 0 {
                    return true;
                }
                self.current_line -= 1;
                self.offset = 0;
                self.offset_pct = 0.0;
            } else {
                self.offset -= 1;
                self.recalc_pct_with(line_height);
            }
        } else if self.offset >= 0 {
            if self.current_line + 1 >= self.active_line_count() {
                return true;
            }
            self.current_line += 1;
            let line_height = self.wrapped_height(self.current_line);
            self.offset = -(line_height as i32) + 1;
            self.recalc_pct_with(line_height);
        } else {
            self.offset += 1;
            self.recalc_pct();
        }
        false
    }

    fn snap_to_bottom(&mut self) {
        let count = self.active_line_count();
        self.current_line = count.saturating_sub(1);
        self.offset = 0;
        self.offset_pct = 0.0;
    }

    // Re-establishes the anchor invariants after any mutation: a valid
    // current line, an offset within the line, and a viewport that is full
    // whenever enough content exists below the anchor.
    fn clamp_current_line(&mut self) {
        let count = self.active_line_count();
        if count == 0 {
            self.current_line = 0;
            self.offset = 0;
            self.offset_pct = 0.0;
            return;
        }
        if self.current_line >= count {
            self.current_line = count - 1;
            self.offset = 0;
        }
        let line_height = self.wrapped_height(self.current_line) as i32;
        self.offset = self.offset.clamp(-(line_height - 1).max(0), 0);
        if self.height == 0 || self.current_line + 1 >= self.height {
            return;
        }
        let missing = self.height.saturating_sub(self.visible_row_count());
        for _ in 0..missing {
            if self.scroll_step(false) {
                break;
            }
        }
    }

    fn recalc_pct(&mut self) {
        let line_height = self.wrapped_height(self.current_line);
        self.recalc_pct_with(line_height);
    }

    fn recalc_pct_with(&mut self, line_height: usize) {
        if line_height < 2 {
            self.offset_pct = 0.0;
        } else {
            self.offset_pct = self.offset as f32 / (line_height as f32 - 1.0);
        }
    }

    fn visible_row_count(&self) -> usize {
        let mut rows = 0usize;
        let mut index = self.current_line as i64;
        while index >= 0 && rows < self.height {
            let line_height = self.wrapped_height(index as usize) as i64;
            let available = if index as usize == self.current_line {
                line_height + self.offset as i64
            } else {
                line_height
            };
            rows += available.max(0) as usize;
            index -= 1;
        }
        rows.min(self.height)
    }

    fn build_visible_lines(&self) -> Vec<Line<'static>> {
        let mut rows = vec![Line::default(); self.height];
        let count = self.active_line_count();
        if count > 0 && self.height > 0 {
            let mut screen = self.height as i64 - 1;
            let mut index = self.current_line.min(count - 1) as i64;
            'outer: while index >= 0 {
                let wrapped = self.wrapped_line(index as usize);
                let mut sub = wrapped.len() as i64 - 1;
                if index as usize == self.current_line {
                    sub += self.offset as i64;
                }
                while sub >= 0 {
                    if screen < 0 {
                        break 'outer;
                    }
                    rows[screen as usize] = wrapped[sub as usize].clone();
                    screen -= 1;
                    sub -= 1;
                }
                index -= 1;
            }
        }
        if self.mode != ViewMode::Normal && !rows.is_empty() {
            rows[0] = self.input_row();
        }
        rows
    }

    fn wrapped_line(&self, active_index: usize) -> Vec<Line<'static>> {
        let buffer_index = self.buffer_index(active_index);
        let ranges: Vec<(usize, usize, Style)> = self
            .buffer
            .hits_on_line(buffer_index)
            .iter()
            .map(|&i| {
                let hit = self.buffer.results()[i];
                let style = if i == self.result_index {
                    CURRENT_RESULT_STYLE
                } else {
                    RESULT_STYLE
                };
                (hit.start, hit.end, style)
            })
            .collect();
        let spans = ansi::styled_spans(self.buffer.line(buffer_index), &ranges);
        ansi::hard_wrap(&spans, self.width)
    }

    fn input_row(&self) -> Line<'static> {
        let (label, mode, pattern, error) = match self.mode {
            ViewMode::SearchInput | ViewMode::SearchNavigation => (
                "search",
                self.search_mode,
                self.buffer.search_pattern(),
                self.buffer.search_error(),
            ),
            _ => (
                "filter",
                self.filter_mode,
                self.buffer.filter_pattern(),
                self.buffer.filter_error(),
            ),
        };
        let editing = matches!(self.mode, ViewMode::SearchInput | ViewMode::FilterInput);
        let mut spans = vec![
            Span::styled(
                format!(" {label} [{}] ", mode.label()),
                Style::default().fg(Color::Black).bg(Color::Blue),
            ),
            Span::raw(format!(" {pattern}")),
        ];
        if editing {
            spans.push(Span::styled("█", Style::default().fg(Color::Blue)));
        }
        if let Some(message) = error {
            spans.push(Span::styled(
                format!("  {message}"),
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            ));
        }
        Line::from(spans)
    }
}
