//! Bounded per-service scrollback.
//!
//! A `ScrollbackBuffer` stores the captured output of one service as a list
//! of lines with a byte budget: once the sum of line lengths exceeds the
//! budget, whole lines are evicted from the front. The last line may be
//! "open" — not yet terminated by a newline — in which case subsequent
//! fragments are concatenated onto it. The buffer also maintains the filter
//! index and the search index that the log view projects.

use std::collections::HashMap;

use regex::Regex;

use crate::ansi;

/// How a search or filter pattern is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    #[default]
    CaseInsensitive,
    CaseSensitive,
    Regex,
}

impl MatchMode {
    pub fn next(self) -> Self {
        match self {
            MatchMode::CaseInsensitive => MatchMode::CaseSensitive,
            MatchMode::CaseSensitive => MatchMode::Regex,
            MatchMode::Regex => MatchMode::CaseInsensitive,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            MatchMode::CaseInsensitive => MatchMode::Regex,
            MatchMode::CaseSensitive => MatchMode::CaseInsensitive,
            MatchMode::Regex => MatchMode::CaseSensitive,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MatchMode::CaseInsensitive => "abc",
            MatchMode::CaseSensitive => "aBc",
            MatchMode::Regex => ".*",
        }
    }
}

/// One search match: byte offsets into the plain-text projection of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchHit {
    pub line: usize,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Default)]
struct Matcher {
    pattern: String,
    mode: MatchMode,
    regex: Option<Regex>,
    error: Option<String>,
}

impl Matcher {
    fn set(&mut self, pattern: &str, mode: MatchMode) {
        self.pattern = pattern.to_string();
        self.mode = mode;
        self.regex = None;
        self.error = None;
        if mode == MatchMode::Regex && !pattern.is_empty() {
            match Regex::new(pattern) {
                Ok(regex) => self.regex = Some(regex),
                Err(_) => self.error = Some("Invalid regex".to_string()),
            }
        }
    }

    fn is_active(&self) -> bool {
        !self.pattern.is_empty()
    }

    fn matches(&self, plain: &str) -> bool {
        if self.pattern.is_empty() || self.error.is_some() {
            return false;
        }
        match self.mode {
            MatchMode::CaseInsensitive => plain
                .to_lowercase()
                .contains(&self.pattern.to_lowercase()),
            MatchMode::CaseSensitive => plain.contains(&self.pattern),
            MatchMode::Regex => self.regex.as_ref().is_some_and(|r| r.is_match(plain)),
        }
    }

    /// All non-overlapping matches as byte ranges into `plain`.
    fn find_all(&self, plain: &str) -> Vec<(usize, usize)> {
        if self.pattern.is_empty() || self.error.is_some() {
            return Vec::new();
        }
        match self.mode {
            MatchMode::CaseInsensitive => {
                let hay = plain.to_lowercase();
                let needle = self.pattern.to_lowercase();
                hay.match_indices(&needle)
                    .map(|(start, m)| (start, start + m.len()))
                    // Lowercasing can shift byte offsets for non-ASCII text;
                    // keep only ranges that are still valid in the original.
                    .filter(|&(start, end)| {
                        end <= plain.len()
                            && plain.is_char_boundary(start)
                            && plain.is_char_boundary(end)
                    })
                    .collect()
            }
            MatchMode::CaseSensitive => plain
                .match_indices(&self.pattern)
                .map(|(start, m)| (start, start + m.len()))
                .collect(),
            MatchMode::Regex => match &self.regex {
                Some(regex) => regex
                    .find_iter(plain)
                    .map(|m| (m.start(), m.end()))
                    .collect(),
                None => Vec::new(),
            },
        }
    }
}

/// Outcome of an append, used by the view to keep its anchor stable.
#[derive(Debug, Clone, Copy)]
pub struct AppendResult {
    /// A new line was stored (as opposed to extending the open line).
    pub new_line: bool,
    /// Number of lines evicted from the front to stay within budget.
    pub evicted: usize,
}

#[derive(Debug, Default)]
pub struct ScrollbackBuffer {
    lines: Vec<String>,
    plain: Vec<String>,
    last_line_open: bool,
    total_bytes: usize,
    max_bytes: usize,
    filtered: Vec<usize>,
    filter: Matcher,
    search: Matcher,
    results: Vec<SearchHit>,
    by_line: HashMap<usize, Vec<usize>>,
}

impl ScrollbackBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            ..Self::default()
        }
    }

    /// Appends `text` to the buffer. With the last line open the text is a
    /// continuation of it; otherwise a new line is stored. `end_line` marks
    /// the line complete, clearing (or never setting) the open flag.
    pub fn append(&mut self, text: &str, end_line: bool) -> AppendResult {
        let new_line = if self.last_line_open && !self.lines.is_empty() {
            let idx = self.lines.len() - 1;
            self.total_bytes += text.len();
            self.lines[idx].push_str(text);
            if end_line {
                self.last_line_open = false;
            }
            self.plain[idx] = ansi::plain_text(&self.lines[idx]);
            false
        } else {
            self.lines.push(text.to_string());
            self.plain.push(ansi::plain_text(text));
            self.total_bytes += text.len();
            self.last_line_open = !end_line;
            true
        };

        let idx = self.lines.len() - 1;
        if self.filter.is_active()
            && self.filter.matches(&self.plain[idx])
            && self.filtered.last() != Some(&idx)
        {
            self.filtered.push(idx);
        }
        self.research_line(idx);

        let evicted = self.evict();
        AppendResult { new_line, evicted }
    }

    /// Drops everything: lines, indices, results, and the open-line flag.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.plain.clear();
        self.last_line_open = false;
        self.total_bytes = 0;
        self.filtered.clear();
        self.results.clear();
        self.by_line.clear();
    }

    pub fn set_filter(&mut self, pattern: &str, mode: MatchMode) {
        self.filter.set(pattern, mode);
        self.filtered = if self.filter.is_active() {
            self.plain
                .iter()
                .enumerate()
                .filter(|(_, plain)| self.filter.matches(plain))
                .map(|(i, _)| i)
                .collect()
        } else {
            Vec::new()
        };
    }

    pub fn set_search(&mut self, pattern: &str, mode: MatchMode) {
        self.search.set(pattern, mode);
        self.results.clear();
        self.by_line.clear();
        if !self.search.is_active() {
            return;
        }
        for (line, plain) in self.plain.iter().enumerate() {
            for (start, end) in self.search.find_all(plain) {
                self.results.push(SearchHit { line, start, end });
            }
        }
        self.rebuild_by_line();
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, index: usize) -> &str {
        &self.lines[index]
    }

    pub fn plain_line(&self, index: usize) -> &str {
        &self.plain[index]
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn filtered(&self) -> &[usize] {
        &self.filtered
    }

    pub fn filter_active(&self) -> bool {
        self.filter.is_active()
    }

    pub fn filter_pattern(&self) -> &str {
        &self.filter.pattern
    }

    pub fn filter_error(&self) -> Option<&str> {
        self.filter.error.as_deref()
    }

    pub fn search_pattern(&self) -> &str {
        &self.search.pattern
    }

    pub fn search_error(&self) -> Option<&str> {
        self.search.error.as_deref()
    }

    pub fn results(&self) -> &[SearchHit] {
        &self.results
    }

    /// Indices into `results()` for the hits on `line`.
    pub fn hits_on_line(&self, line: usize) -> &[usize] {
        self.by_line.get(&line).map(Vec::as_slice).unwrap_or(&[])
    }

    // Re-match the search pattern against one line, replacing its previous
    // hits. Appends only ever touch the tail line, so the results stay
    // sorted by (line, start).
    fn research_line(&mut self, line: usize) {
        if !self.search.is_active() {
            return;
        }
        let had_hits = self.by_line.contains_key(&line);
        if had_hits {
            self.results.retain(|hit| hit.line != line);
        }
        let hits = self.search.find_all(&self.plain[line]);
        let changed = had_hits || !hits.is_empty();
        for (start, end) in hits {
            self.results.push(SearchHit { line, start, end });
        }
        if changed {
            self.rebuild_by_line();
        }
    }

    fn rebuild_by_line(&mut self) {
        self.by_line.clear();
        for (index, hit) in self.results.iter().enumerate() {
            self.by_line.entry(hit.line).or_default().push(index);
        }
    }

    // Evicts whole lines from the front until the byte budget holds, then
    // shifts every surviving index down by the eviction count.
    fn evict(&mut self) -> usize {
        if self.max_bytes == 0 || self.total_bytes <= self.max_bytes {
            return 0;
        }
        let mut count = 0;
        let mut total = self.total_bytes;
        while total > self.max_bytes && count < self.lines.len() {
            total -= self.lines[count].len();
            count += 1;
        }
        self.lines.drain(..count);
        self.plain.drain(..count);
        self.total_bytes = total;
        if self.lines.is_empty() {
            self.last_line_open = false;
        }
        self.filtered = self
            .filtered
            .iter()
            .filter_map(|&i| i.checked_sub(count))
            .collect();
        if !self.results.is_empty() {
            self.results = self
                .results
                .iter()
                .filter_map(|hit| {
                    hit.line.checked_sub(count).map(|line| SearchHit {
                        line,
                        start: hit.start,
                        end: hit.end,
                    })
                })
                .collect();
            self.rebuild_by_line();
        }
        count
    }
}
