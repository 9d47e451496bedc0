//! Cascade splitting of oversize units.
//!
//! Levels are tried strictly in order: article anchors, list anchors, then
//! plain line boundaries. A segment still over the limit after one level is
//! handed to the next. Adjacent segments are packed greedily so pieces stay
//! close to the limit; a single line is never cut.

use std::ops::Range;

use super::anchor::Anchor;
use super::Line;

#[derive(Debug, Clone, Copy)]
enum Level {
    Article,
    List,
    Lines,
}

impl Level {
    fn next(self) -> Level {
        match self {
            Level::Article => Level::List,
            Level::List | Level::Lines => Level::Lines,
        }
    }

    fn cuts_at(self, anchor: Anchor) -> bool {
        match self {
            Level::Article => matches!(anchor, Anchor::Article { .. }),
            Level::List => anchor == Anchor::List,
            Level::Lines => true,
        }
    }
}

/// Split `lines` into pieces of at most `max_chars` (a lone longer line is
/// kept whole).
pub(crate) fn cascade_split(lines: &[Line], max_chars: usize) -> Vec<String> {
    split_range(lines, 0..lines.len(), Level::Article, max_chars)
        .into_iter()
        .map(|r| join(&lines[r]))
        .collect()
}

fn split_range(lines: &[Line], range: Range<usize>, level: Level, max: usize) -> Vec<Range<usize>> {
    if range.len() <= 1 {
        return vec![range];
    }
    let cuts: Vec<usize> = (range.start + 1..range.end)
        .filter(|&i| level.cuts_at(lines[i].anchor))
        .collect();
    if cuts.is_empty() {
        return split_range(lines, range, level.next(), max);
    }

    let mut bounds = Vec::with_capacity(cuts.len() + 2);
    bounds.push(range.start);
    bounds.extend(cuts);
    bounds.push(range.end);

    let mut segments = Vec::new();
    for pair in bounds.windows(2) {
        let segment = pair[0]..pair[1];
        if char_len(lines, &segment) > max {
            segments.extend(split_range(lines, segment, level.next(), max));
        } else {
            segments.push(segment);
        }
    }
    pack(lines, segments, max)
}

fn pack(lines: &[Line], segments: Vec<Range<usize>>, max: usize) -> Vec<Range<usize>> {
    let mut packed: Vec<Range<usize>> = Vec::new();
    for segment in segments {
        if let Some(last) = packed.last_mut() {
            let merged = last.start..segment.end;
            if char_len(lines, &merged) <= max {
                *last = merged;
                continue;
            }
        }
        packed.push(segment);
    }
    packed
}

fn char_len(lines: &[Line], range: &Range<usize>) -> usize {
    let text: usize = lines[range.clone()]
        .iter()
        .map(|l| l.text.chars().count())
        .sum();
    text + range.len().saturating_sub(1)
}

pub(crate) fn join(lines: &[Line]) -> String {
    lines
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::anchor::{classify, clean_line};

    fn lines(text: &str) -> Vec<Line> {
        text.lines()
            .enumerate()
            .map(|(i, t)| Line {
                line_no: i,
                text: t.to_string(),
                anchor: classify(clean_line(t)),
            })
            .collect()
    }

    #[test]
    fn prefers_article_boundaries() {
        let body = "甲".repeat(300);
        let text = format!(
            "第一条 {body}\n（一）{body}\n第二条 {body}\n（一）{body}"
        );
        let pieces = cascade_split(&lines(&text), 700);
        assert_eq!(pieces.len(), 2);
        assert!(pieces[0].starts_with("第一条"));
        assert!(pieces[1].starts_with("第二条"));
    }

    #[test]
    fn falls_back_to_list_items() {
        let body = "乙".repeat(300);
        let text = format!("第三条 总则\n（一）{body}\n（二）{body}\n（三）{body}");
        let pieces = cascade_split(&lines(&text), 650);
        assert_eq!(pieces.len(), 2);
        assert!(pieces[0].starts_with("第三条"));
        assert!(pieces[0].contains("（二）"));
        assert!(pieces[1].starts_with("（三）"));
        assert!(pieces.iter().all(|p| p.chars().count() <= 650));
    }

    #[test]
    fn line_fallback_never_cuts_a_line() {
        let line = "丙".repeat(400);
        let text = format!("{line}\n{line}\n{line}");
        let pieces = cascade_split(&lines(&text), 500);
        assert_eq!(pieces, vec![line.clone(), line.clone(), line]);
    }

    #[test]
    fn single_long_line_is_kept_whole() {
        let text = "丁".repeat(2000);
        let pieces = cascade_split(&lines(&text), 800);
        assert_eq!(pieces, vec![text]);
    }

    #[test]
    fn pieces_cover_every_line_once() {
        let body = "戊".repeat(120);
        let text = (0..20)
            .map(|i| format!("{}. {body}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        let pieces = cascade_split(&lines(&text), 800);
        assert_eq!(pieces.join("\n"), text);
    }
}
