//! Overlapping line windows.

use std::ops::Range;

/// Cursor producing byte ranges of `window` lines, advancing `window - overlap`
/// lines per step, over a byte range of some text. No window holds more than
/// `max_chars` characters; a window cut short by that cap ends mid-line and
/// the next one starts where it stopped.
///
/// The cursor holds offsets only; the text is passed to each `next_in` call
/// so the owner can keep the string alongside it.
#[derive(Debug, Clone)]
pub struct LineWindows {
    cursor: usize,
    end: usize,
    window: usize,
    step: usize,
    max_chars: usize,
    finished: bool,
}

impl LineWindows {
    pub fn new(
        range: Range<usize>,
        window_lines: usize,
        overlap_lines: usize,
        max_chars: usize,
    ) -> Self {
        let window = window_lines.max(1);
        let step = window.saturating_sub(overlap_lines).max(1);
        Self {
            cursor: range.start,
            end: range.end,
            window,
            step,
            max_chars: max_chars.max(1),
            finished: range.start >= range.end,
        }
    }

    /// Next window, skipping windows with only whitespace.
    pub fn next_in(&mut self, text: &str) -> Option<Range<usize>> {
        while !self.finished {
            let start = self.cursor;
            let by_lines = advance_lines(text, start, self.end, self.window);
            let window_end = cap_chars(text, start, by_lines, self.max_chars);
            let mut next_start = advance_lines(text, start, self.end, self.step);
            if window_end < by_lines {
                next_start = next_start.min(window_end);
            }

            if window_end >= self.end || next_start >= self.end {
                self.finished = true;
            }
            self.cursor = next_start;

            if !text[start..window_end].trim().is_empty() {
                return Some(start..window_end);
            }
        }
        None
    }
}

/// Offset of the `max_chars`-th character after `from`, or `end` if the
/// range is shorter.
fn cap_chars(text: &str, from: usize, end: usize, max_chars: usize) -> usize {
    text[from..end]
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| from + i)
        .unwrap_or(end)
}

/// Offset just past the `lines`-th newline after `from`, capped at `end`.
fn advance_lines(text: &str, from: usize, end: usize, lines: usize) -> usize {
    text.as_bytes()[from..end]
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == b'\n')
        .nth(lines - 1)
        .map(|(i, _)| from + i + 1)
        .unwrap_or(end)
}
