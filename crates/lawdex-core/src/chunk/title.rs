//! Look-behind window and sub-document title inference.

use std::collections::VecDeque;

use super::anchor::Anchor;

const MAX_TITLE_CHARS: usize = 40;
const TOC_MARKERS: &[&str] = &["目录", "目次"];
const SENTENCE_ENDINGS: &[char] = &[
    '。', '；', ';', '，', ',', '：', ':', '.', '、', '！', '!', '？', '?',
];

/// A non-blank line remembered by the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowLine {
    pub line_no: usize,
    /// Line text with Markdown markers stripped.
    pub text: String,
    pub anchor: Anchor,
    /// The raw line was a Markdown heading.
    pub heading: bool,
}

/// Bounded ring buffer of the most recent non-blank lines.
#[derive(Debug, Clone)]
pub struct LineWindow {
    capacity: usize,
    lines: VecDeque<WindowLine>,
}

impl LineWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            lines: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, line: WindowLine) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &WindowLine> {
        self.lines.iter()
    }
}

/// A title found in the window, with the line it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleLine {
    pub line_no: usize,
    pub title: String,
}

/// Find the title of a document that starts right after the window.
///
/// Only lines newer than the last article or special anchor are candidates;
/// chapter and list lines are skipped. The newest Markdown heading wins.
/// Without one, the newest short standalone line is used. Table of contents
/// markers such as `目录` are never titles.
pub fn infer_title(window: &LineWindow) -> Option<TitleLine> {
    let candidates: Vec<&WindowLine> = window
        .iter()
        .rev()
        .take_while(|l| !matches!(l.anchor, Anchor::Article { .. } | Anchor::Special))
        .filter(|l| l.anchor == Anchor::Plain && !l.text.is_empty() && !is_toc_marker(&l.text))
        .collect();

    candidates
        .iter()
        .find(|l| l.heading)
        .or_else(|| candidates.iter().find(|l| is_standalone(&l.text)))
        .map(|l| TitleLine {
            line_no: l.line_no,
            title: l.text.clone(),
        })
}

fn is_standalone(text: &str) -> bool {
    text.chars().count() <= MAX_TITLE_CHARS && !text.ends_with(SENTENCE_ENDINGS)
}

fn is_toc_marker(text: &str) -> bool {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    TOC_MARKERS.contains(&compact.as_str())
}
