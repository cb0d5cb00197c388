//! ANSI escape sequence handling for the log viewport.
//!
//! Child processes emit SGR-colored output. This module turns such text into
//! ratatui spans in a single pass: a position-tracking builder collects
//! visible characters, applies search-highlight byte ranges as it reaches
//! them, and lets carriage returns overwrite the row the way a terminal
//! would. Because escape sequences are consumed during parsing, the
//! hard-wrap below only ever deals with visible characters and can never
//! split a sequence.

use std::iter::Peekable;
use std::str::Chars;

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

/// Parses SGR-styled text into spans, splitting them at the boundaries of
/// `highlights` and painting those ranges with the given styles.
///
/// Highlight offsets are byte offsets into the plain-text projection (see
/// [`plain_text`]); they must be sorted and non-overlapping. A highlight
/// style replaces the SGR style for the covered characters. Non-SGR CSI
/// sequences and OSC sequences are dropped.
pub fn styled_spans(text: &str, highlights: &[(usize, usize, Style)]) -> Vec<Span<'static>> {
    let mut builder = SpanBuilder::new(highlights);
    let mut style = Style::new();
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\x1b' => match chars.peek() {
                Some('[') => {
                    chars.next();
                    if let Some(params) = consume_csi(&mut chars) {
                        apply_sgr(&mut style, &params);
                    }
                }
                Some(']') => {
                    chars.next();
                    skip_osc(&mut chars);
                }
                // Bare or unsupported escape: drop the ESC byte so it cannot
                // corrupt the terminal.
                _ => {}
            },
            '\r' => builder.restart(),
            _ => builder.push(ch, style),
        }
    }
    builder.finish()
}

/// The visible text of a line: the concatenated span contents.
///
/// Search and filter offsets are byte offsets into this projection, which by
/// construction always lines up with the spans of [`styled_spans`].
pub fn plain_text(text: &str) -> String {
    styled_spans(text, &[])
        .iter()
        .map(|span| span.content.as_ref())
        .collect()
}

/// Breaks styled spans into rows of at most `width` columns. A line always
/// occupies at least one row, so an empty input yields one empty row.
pub fn hard_wrap(spans: &[Span<'static>], width: usize) -> Vec<Line<'static>> {
    let width = width.max(1);
    let mut rows: Vec<Line<'static>> = Vec::new();
    let mut row: Vec<Span<'static>> = Vec::new();
    let mut used = 0usize;

    for span in spans {
        let mut rest = span.content.as_ref();
        while !rest.is_empty() {
            if used == width {
                rows.push(Line::from(std::mem::take(&mut row)));
                used = 0;
            }
            let take = width - used;
            let split = rest
                .char_indices()
                .nth(take)
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            let (chunk, tail) = rest.split_at(split);
            used += chunk.chars().count();
            row.push(Span::styled(chunk.to_string(), span.style));
            rest = tail;
        }
    }
    if !row.is_empty() || rows.is_empty() {
        rows.push(Line::from(row));
    }
    rows
}

/// The number of rows [`hard_wrap`] produces for a line of `chars` visible
/// characters.
pub fn wrapped_rows(chars: usize, width: usize) -> usize {
    let width = width.max(1);
    if chars == 0 {
        1
    } else {
        chars.div_ceil(width)
    }
}

// Accumulates visible characters into spans. A new span starts whenever the
// effective style changes, either because an SGR sequence changed the base
// style or because the position entered or left a highlight range.
struct SpanBuilder<'a> {
    highlights: &'a [(usize, usize, Style)],
    next_highlight: usize,
    pos: usize,
    buffer: String,
    current: Style,
    spans: Vec<Span<'static>>,
}

impl<'a> SpanBuilder<'a> {
    fn new(highlights: &'a [(usize, usize, Style)]) -> Self {
        Self {
            highlights,
            next_highlight: 0,
            pos: 0,
            buffer: String::new(),
            current: Style::new(),
            spans: Vec::new(),
        }
    }

    fn push(&mut self, ch: char, base: Style) {
        let style = self.effective_style(base);
        if style != self.current {
            self.flush();
            self.current = style;
        }
        self.buffer.push(ch);
        self.pos += ch.len_utf8();
    }

    // Style for the character at the current position: the covering
    // highlight wins over the SGR state.
    fn effective_style(&mut self, base: Style) -> Style {
        while let Some(&(_, end, _)) = self.highlights.get(self.next_highlight) {
            if end <= self.pos {
                self.next_highlight += 1;
            } else {
                break;
            }
        }
        match self.highlights.get(self.next_highlight) {
            Some(&(start, _, style)) if self.pos >= start => style,
            _ => base,
        }
    }

    // Carriage return: the terminal would overwrite the row from column 0,
    // so only what follows survives. Positions restart with it, keeping the
    // highlight offsets aligned with the surviving projection.
    fn restart(&mut self) {
        self.spans.clear();
        self.buffer.clear();
        self.pos = 0;
        self.next_highlight = 0;
    }

    fn flush(&mut self) {
        if !self.buffer.is_empty() {
            self.spans
                .push(Span::styled(std::mem::take(&mut self.buffer), self.current));
        }
    }

    fn finish(mut self) -> Vec<Span<'static>> {
        self.flush();
        self.spans
    }
}

// Consumes a CSI sequence after ESC[. Returns the parameter bytes only for
// SGR sequences (final byte `m`); everything else is discarded.
fn consume_csi(chars: &mut impl Iterator<Item = char>) -> Option<String> {
    let mut params = String::new();
    for ch in chars.by_ref() {
        if ('@'..='~').contains(&ch) {
            return (ch == 'm').then_some(params);
        }
        params.push(ch);
    }
    None
}

// Skips an OSC sequence after ESC], terminated by BEL or ESC\.
fn skip_osc(chars: &mut Peekable<Chars<'_>>) {
    while let Some(ch) = chars.next() {
        if ch == '\x07' {
            return;
        }
        if ch == '\x1b' && chars.peek() == Some(&'\\') {
            chars.next();
            return;
        }
    }
}

fn apply_sgr(style: &mut Style, params: &str) {
    let codes = sgr_codes(params);
    let mut codes = codes.as_slice();
    while let Some((&code, rest)) = codes.split_first() {
        codes = rest;
        match code {
            0 => *style = Style::new(),
            1..=9 => {
                if let Some(modifier) = set_modifier(code) {
                    *style = style.add_modifier(modifier);
                }
            }
            21..=29 => {
                if let Some(modifier) = reset_modifier(code) {
                    *style = style.remove_modifier(modifier);
                }
            }
            30..=37 => style.fg = palette_color(code - 30, false),
            90..=97 => style.fg = palette_color(code - 90, true),
            40..=47 => style.bg = palette_color(code - 40, false),
            100..=107 => style.bg = palette_color(code - 100, true),
            39 => style.fg = None,
            49 => style.bg = None,
            38 | 48 => {
                if let Some((consumed, color)) = extended_color(codes) {
                    if code == 38 {
                        style.fg = Some(color);
                    } else {
                        style.bg = Some(color);
                    }
                    codes = &codes[consumed..];
                }
            }
            _ => {}
        }
    }
}

fn sgr_codes(params: &str) -> Vec<i32> {
    if params.is_empty() {
        return vec![0];
    }
    let mut codes: Vec<i32> = params
        .split(';')
        .filter_map(|part| {
            if part.is_empty() {
                Some(0)
            } else {
                part.parse().ok()
            }
        })
        .collect();
    if codes.is_empty() {
        codes.push(0);
    }
    codes
}

fn set_modifier(code: i32) -> Option<Modifier> {
    Some(match code {
        1 => Modifier::BOLD,
        2 => Modifier::DIM,
        3 => Modifier::ITALIC,
        4 => Modifier::UNDERLINED,
        5 => Modifier::SLOW_BLINK,
        6 => Modifier::RAPID_BLINK,
        7 => Modifier::REVERSED,
        8 => Modifier::HIDDEN,
        9 => Modifier::CROSSED_OUT,
        _ => return None,
    })
}

fn reset_modifier(code: i32) -> Option<Modifier> {
    Some(match code {
        22 => Modifier::BOLD | Modifier::DIM,
        23 => Modifier::ITALIC,
        24 => Modifier::UNDERLINED,
        25 => Modifier::SLOW_BLINK | Modifier::RAPID_BLINK,
        27 => Modifier::REVERSED,
        28 => Modifier::HIDDEN,
        29 => Modifier::CROSSED_OUT,
        _ => return None,
    })
}

// 256-color and truecolor parameters following codes 38/48. Returns how many
// parameter values were consumed.
fn extended_color(values: &[i32]) -> Option<(usize, Color)> {
    match values {
        [5, index, ..] => Some((2, Color::Indexed(u8::try_from(*index).ok()?))),
        [2, r, g, b, ..] => {
            let r = u8::try_from(*r).ok()?;
            let g = u8::try_from(*g).ok()?;
            let b = u8::try_from(*b).ok()?;
            Some((4, Color::Rgb(r, g, b)))
        }
        _ => None,
    }
}

const NORMAL_PALETTE: [Color; 8] = [
    Color::Black,
    Color::Red,
    Color::Green,
    Color::Yellow,
    Color::Blue,
    Color::Magenta,
    Color::Cyan,
    Color::Gray,
];

const BRIGHT_PALETTE: [Color; 8] = [
    Color::DarkGray,
    Color::LightRed,
    Color::LightGreen,
    Color::LightYellow,
    Color::LightBlue,
    Color::LightMagenta,
    Color::LightCyan,
    Color::White,
];

fn palette_color(index: i32, bright: bool) -> Option<Color> {
    let palette = if bright {
        &BRIGHT_PALETTE
    } else {
        &NORMAL_PALETTE
    };
    usize::try_from(index).ok().and_then(|i| palette.get(i)).copied()
}
