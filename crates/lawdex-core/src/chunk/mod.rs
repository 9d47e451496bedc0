//! Legal Markdown chunker.
//!
//! A single synchronous pass over the lines of one file that produces one
//! or more [`ParsedDocument`]s, each an ordered list of [`ChunkDraft`]s.
//!
//! # Algorithm
//!
//! 1. Every line is classified into an [`Anchor`].
//! 2. Lines before the first article, chapter, or special anchor are the
//!    preamble and become chunk 0 verbatim, with an empty path.
//! 3. Chapter headings are staged as pending; they reach the committed
//!    path only when an article or special anchor follows
//!    (see [`PathStaging`]). A table of contents therefore never shows up
//!    in a chunk path.
//! 4. Article, special and list spans are logical units. Units are merged
//!    greedily up to `target_chars`; a change of committed path or the end
//!    of a document flushes the buffer unconditionally.
//! 5. A unit that alone exceeds `target_chars` is cascade split at article
//!    anchors, then list anchors, then line boundaries.
//! 6. Article number one seen after articles have started ends the current
//!    document. The new document's title comes from [`infer_title`].
//!
//! Every chunk's `text` is its content behind a provenance header:
//!
//! ```text
//! <<Source: 中华人民共和国民法典 | Path: 第一编 总则 > 第一章 基本规定>>
//! 第一条 为了保护民事主体的合法权益……
//! ```
//!
//! # Example
//!
//! ```rust
//! use lawdex_core::chunk::{parse, ChunkerConfig};
//!
//! let text = "第一章 总则\n第一条 为了规范合同。\n第二条 本法所称合同。\n";
//! let parsed = parse("合同法", text, &ChunkerConfig::default());
//! let chunks = &parsed.documents[0].chunks;
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].path, vec!["第一章 总则"]);
//! assert!(chunks[0].text.starts_with("<<Source: 合同法 | Path: 第一章 总则>>\n第一条"));
//! ```

mod anchor;
mod merge;
mod path;
mod split;
mod title;

pub use anchor::{classify, clean_line, is_heading, Anchor};
pub use path::{PathSegment, PathStaging};
pub use title::{infer_title, LineWindow, TitleLine, WindowLine};

use crate::models::{content_hash, ChunkDraft, ParsedDocument, ParsedFile, PATH_SEPARATOR};
use merge::MergeBuffer;

/// Chunker tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Soft limit for merged chunks; units above it are split.
    pub target_chars: usize,
    /// Upper bound for pieces produced by cascade splitting.
    pub split_chars: usize,
    /// Look-behind lines kept for title inference.
    pub window_lines: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_chars: 1200,
            split_chars: 800,
            window_lines: 20,
        }
    }
}

/// The `<<Source: … | Path: …>>` line prepended to every chunk.
pub fn provenance_header(title: &str, path: &str) -> String {
    format!("<<Source: {} | Path: {}>>", title, path)
}

/// Header plus content, as stored and indexed.
pub fn stamp(title: &str, path: &str, content: &str) -> String {
    format!("{}\n{}", provenance_header(title, path), content)
}

/// Parse one file's text. `title` is used for the first document and as
/// the base of fallback titles for later ones.
pub fn parse(title: &str, text: &str, config: &ChunkerConfig) -> ParsedFile {
    let mut state = ParserState::new(title, config);
    for (line_no, raw) in text.lines().enumerate() {
        state.feed(line_no, raw);
    }
    state.finish()
}

#[derive(Debug, Clone)]
pub(crate) struct Line {
    pub line_no: usize,
    pub text: String,
    pub anchor: Anchor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitKind {
    Article,
    Special,
    List,
}

#[derive(Debug)]
struct Unit {
    kind: UnitKind,
    lines: Vec<Line>,
    /// A heading followed the unit; later lines belong to what comes next.
    sealed: bool,
}

impl Unit {
    fn accepts(&self, anchor: Anchor) -> bool {
        if self.sealed {
            return false;
        }
        match anchor {
            Anchor::Plain => true,
            Anchor::List => matches!(self.kind, UnitKind::Article | UnitKind::Special),
            _ => false,
        }
    }
}

#[derive(Debug)]
struct DocumentBuilder {
    ordinal: i64,
    title: String,
    chunks: Vec<ChunkDraft>,
}

impl DocumentBuilder {
    fn new(ordinal: i64, title: String) -> Self {
        Self {
            ordinal,
            title,
            chunks: Vec::new(),
        }
    }

    fn emit(&mut self, content: String, path: &[String]) {
        let path_string = path.join(PATH_SEPARATOR);
        let text = stamp(&self.title, &path_string, &content);
        let hash = content_hash(text.as_bytes());
        self.chunks.push(ChunkDraft {
            index: self.chunks.len() as i64,
            path: path.to_vec(),
            content,
            text,
            hash,
        });
    }

    fn into_parsed(self) -> ParsedDocument {
        ParsedDocument {
            ordinal: self.ordinal,
            title: self.title,
            chunks: self.chunks,
        }
    }
}

/// Per-file parse state. Nothing here outlives one call to [`parse`].
struct ParserState<'a> {
    config: &'a ChunkerConfig,
    file_title: &'a str,
    finished: Vec<ParsedDocument>,
    doc: DocumentBuilder,
    in_preamble: bool,
    preamble: Vec<String>,
    staging: PathStaging,
    buffer: MergeBuffer,
    unit: Option<Unit>,
    /// Plain lines with no open unit to join; prefixed to the next unit.
    held: Vec<Line>,
    has_started_articles: bool,
    window: LineWindow,
}

impl<'a> ParserState<'a> {
    fn new(file_title: &'a str, config: &'a ChunkerConfig) -> Self {
        Self {
            config,
            file_title,
            finished: Vec::new(),
            doc: DocumentBuilder::new(0, file_title.to_string()),
            in_preamble: true,
            preamble: Vec::new(),
            staging: PathStaging::default(),
            buffer: MergeBuffer::default(),
            unit: None,
            held: Vec::new(),
            has_started_articles: false,
            window: LineWindow::new(config.window_lines),
        }
    }

    fn feed(&mut self, line_no: usize, raw: &str) {
        let trimmed = raw.trim();
        let cleaned = clean_line(trimmed);
        let anchor = if cleaned.is_empty() {
            Anchor::Plain
        } else {
            classify(cleaned)
        };

        if self.in_preamble {
            if !anchor.is_structural() {
                self.preamble.push(raw.trim_end().to_string());
                self.remember(line_no, trimmed, cleaned, anchor);
                return;
            }
            self.in_preamble = false;
            let lines = std::mem::take(&mut self.preamble);
            self.emit_preamble(lines);
        }

        if trimmed.is_empty() {
            return;
        }

        let line = Line {
            line_no,
            text: trimmed.to_string(),
            anchor,
        };
        match anchor {
            Anchor::Article { first } => {
                if first && self.has_started_articles {
                    self.hard_reset();
                }
                self.has_started_articles = true;
                self.open_content_unit(UnitKind::Article, line);
            }
            Anchor::Special => self.open_content_unit(UnitKind::Special, line),
            Anchor::Chapter { level } => {
                self.staging.stage(cleaned, level, line_no);
                if let Some(unit) = self.unit.as_mut() {
                    unit.sealed = true;
                }
            }
            Anchor::List | Anchor::Plain => {
                let open = self.unit.as_mut().filter(|u| u.accepts(anchor));
                if let Some(unit) = open {
                    unit.lines.push(line);
                } else if anchor == Anchor::List {
                    self.close_unit();
                    self.open_unit(UnitKind::List, line);
                } else {
                    self.held.push(line);
                }
            }
        }
        self.remember(line_no, trimmed, cleaned, anchor);
    }

    fn remember(&mut self, line_no: usize, trimmed: &str, cleaned: &str, anchor: Anchor) {
        if trimmed.is_empty() {
            return;
        }
        self.window.push(WindowLine {
            line_no,
            text: cleaned.to_string(),
            anchor,
            heading: is_heading(trimmed),
        });
    }

    /// Article and special anchors confirm pending headings. The buffer is
    /// flushed under the old path first so no chunk spans two paths.
    fn open_content_unit(&mut self, kind: UnitKind, line: Line) {
        self.close_unit();
        let previous = self.staging.labels();
        if self.staging.commit() {
            self.flush(&previous);
        }
        self.open_unit(kind, line);
    }

    fn open_unit(&mut self, kind: UnitKind, line: Line) {
        let mut lines = std::mem::take(&mut self.held);
        lines.push(line);
        self.unit = Some(Unit {
            kind,
            lines,
            sealed: false,
        });
    }

    fn close_unit(&mut self) {
        if let Some(unit) = self.unit.take() {
            self.absorb(unit.lines);
        }
    }

    fn absorb(&mut self, lines: Vec<Line>) {
        if lines.is_empty() {
            return;
        }
        let content = split::join(&lines);
        let len = content.chars().count();
        if len > self.config.target_chars {
            self.flush_current();
            let path = self.staging.labels();
            for piece in split::cascade_split(&lines, self.config.split_chars) {
                self.doc.emit(piece, &path);
            }
            return;
        }
        if !self.buffer.fits(len, self.config.target_chars) {
            self.flush_current();
        }
        self.buffer.push(lines);
    }

    fn flush_current(&mut self) {
        let path = self.staging.labels();
        self.flush(&path);
    }

    fn flush(&mut self, path: &[String]) {
        if let Some(content) = self.buffer.take() {
            self.doc.emit(content, path);
        }
    }

    fn emit_preamble(&mut self, mut lines: Vec<String>) {
        while lines.last().is_some_and(|l| l.trim().is_empty()) {
            lines.pop();
        }
        let start = lines
            .iter()
            .position(|l| !l.trim().is_empty())
            .unwrap_or(lines.len());
        if start == lines.len() {
            return;
        }
        self.doc.emit(lines[start..].join("\n"), &[]);
    }

    /// Everything still open belongs to the current document.
    fn close_document(&mut self) {
        if self.in_preamble {
            self.in_preamble = false;
            let lines = std::mem::take(&mut self.preamble);
            self.emit_preamble(lines);
        }
        self.close_unit();
        let held = std::mem::take(&mut self.held);
        self.absorb(held);
        self.flush_current();
    }

    /// A second article number one starts a new document.
    ///
    /// Lines from the inferred title onward are retracted from the merge
    /// buffer, the open unit and the held lines, and become the new
    /// document's preamble. Pending headings read after the title belong to
    /// the new document; the rest are dropped with the old one.
    fn hard_reset(&mut self) {
        let found = infer_title(&self.window);
        let mut carried = Vec::new();
        if let Some(title) = &found {
            carried.extend(self.buffer.retract_from(title.line_no));
            if let Some(unit) = self.unit.as_mut() {
                let at = unit
                    .lines
                    .iter()
                    .position(|l| l.line_no >= title.line_no)
                    .unwrap_or(unit.lines.len());
                carried.extend(unit.lines.drain(at..));
            }
            if self.unit.as_ref().is_some_and(|u| u.lines.is_empty()) {
                self.unit = None;
            }
            let at = self
                .held
                .iter()
                .position(|l| l.line_no >= title.line_no)
                .unwrap_or(self.held.len());
            carried.extend(self.held.drain(at..));
        }

        carried.sort_by_key(|l| l.line_no);
        let pending = match &found {
            Some(title) => self.staging.take_pending_after(title.line_no),
            None => {
                self.staging.take_pending();
                Vec::new()
            }
        };
        self.close_document();

        let title = self.next_title(found.map(|t| t.title));
        let ordinal = self.doc.ordinal + 1;
        let done = std::mem::replace(&mut self.doc, DocumentBuilder::new(ordinal, title));
        self.finished.push(done.into_parsed());

        self.staging = PathStaging::with_pending(pending);
        self.has_started_articles = false;
        self.window.clear();
        self.emit_preamble(carried.into_iter().map(|l| l.text).collect());
    }

    fn next_title(&self, candidate: Option<String>) -> String {
        let number = self.doc.ordinal + 2;
        match candidate {
            Some(title) if !self.title_taken(&title) => title,
            Some(title) => format!("{} ({})", title, number),
            None => format!("{} ({})", self.file_title, number),
        }
    }

    fn title_taken(&self, title: &str) -> bool {
        self.doc.title == title || self.finished.iter().any(|d| d.title == title)
    }

    fn finish(mut self) -> ParsedFile {
        self.close_document();
        let mut documents = self.finished;
        documents.push(self.doc.into_parsed());
        ParsedFile { documents }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_default(text: &str) -> ParsedFile {
        parse("测试法", text, &ChunkerConfig::default())
    }

    #[test]
    fn preamble_then_merged_articles() {
        let text = "中华人民共和国测试法\n（2020年通过）\n\n第一章 总则\n第一条 本法为规范测试而制定。\n第二条 本法适用于全国。\n";
        let parsed = parse_default(text);
        assert_eq!(parsed.documents.len(), 1);
        let chunks = &parsed.documents[0].chunks;
        assert_eq!(chunks.len(), 2);

        assert_eq!(chunks[0].index, 0);
        assert!(chunks[0].path.is_empty());
        assert_eq!(chunks[0].content, "中华人民共和国测试法\n（2020年通过）");

        assert_eq!(chunks[1].index, 1);
        assert_eq!(chunks[1].path, vec!["第一章 总则"]);
        assert_eq!(
            chunks[1].content,
            "第一条 本法为规范测试而制定。\n第二条 本法适用于全国。"
        );
    }

    #[test]
    fn articles_over_threshold_stay_separate_under_same_path() {
        let body = "规".repeat(700);
        let text = format!("前言\n第一章\n第一条 {body}\n第二条 {body}\n");
        let chunks = &parse_default(&text).documents[0].chunks;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].path, vec!["第一章"]);
        assert_eq!(chunks[2].path, vec!["第一章"]);
        assert!(chunks[1].content.starts_with("第一条"));
        assert!(chunks[2].content.starts_with("第二条"));
    }

    #[test]
    fn provenance_header_is_stamped() {
        let chunks = &parse_default("第一章 总则\n第一条 内容。").documents[0].chunks;
        assert_eq!(
            chunks[0].text,
            "<<Source: 测试法 | Path: 第一章 总则>>\n第一条 内容。"
        );
        assert_eq!(chunks[0].hash, content_hash(chunks[0].text.as_bytes()));
    }

    #[test]
    fn table_of_contents_does_not_leak() {
        let text = "目录\n第一章 总则\n第二章 附则\n第一章 总则\n第一条 总则内容。\n第二章 附则\n第二条 附则内容。\n";
        let chunks = &parse_default(text).documents[0].chunks;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content, "目录");
        assert_eq!(chunks[1].path, vec!["第一章 总则"]);
        assert_eq!(chunks[1].content, "第一条 总则内容。");
        assert_eq!(chunks[2].path, vec!["第二章 附则"]);
    }

    #[test]
    fn consecutive_chapters_commit_only_at_content() {
        let text = "第一章 总则\n第二章 定义\n第一条 本法所称……\n";
        let chunks = &parse_default(text).documents[0].chunks;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].path, vec!["第二章 定义"]);
    }

    #[test]
    fn hierarchy_nests_and_path_change_flushes() {
        let text = "第一编 总则\n第一章 基本规定\n第一条 甲。\n第二章 自然人\n第一节 能力\n第二条 乙。\n";
        let chunks = &parse_default(text).documents[0].chunks;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].path, vec!["第一编 总则", "第一章 基本规定"]);
        assert_eq!(
            chunks[1].path,
            vec!["第一编 总则", "第二章 自然人", "第一节 能力"]
        );
        assert_eq!(
            chunks[1].text.lines().next(),
            Some("<<Source: 测试法 | Path: 第一编 总则 > 第二章 自然人 > 第一节 能力>>")
        );
    }

    #[test]
    fn lists_attach_to_articles_and_stand_alone_otherwise() {
        let text = "第一条 下列情形：\n（一）甲；\n（二）乙。\n说明文字\n一、附加事项\n补充说明\n";
        let chunks = &parse_default(text).documents[0].chunks;
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].content,
            "第一条 下列情形：\n（一）甲；\n（二）乙。\n说明文字\n一、附加事项\n补充说明"
        );
    }

    #[test]
    fn hard_reset_splits_concatenated_statutes() {
        let text = "\
# 中华人民共和国甲法
第一章 总则
第一条 甲法第一条。
第二条 甲法第二条。
# 中华人民共和国乙法
第一章 总则
第一条 乙法第一条。
第二章 附则
第二条 乙法第二条。
";
        let parsed = parse("合订本", text, &ChunkerConfig::default());
        assert_eq!(parsed.documents.len(), 2);

        let first = &parsed.documents[0];
        assert_eq!(first.ordinal, 0);
        assert_eq!(first.title, "合订本");
        assert_eq!(first.chunks.len(), 2);
        assert_eq!(first.chunks[1].content, "第一条 甲法第一条。\n第二条 甲法第二条。");
        assert_eq!(first.chunks[1].path, vec!["第一章 总则"]);

        let second = &parsed.documents[1];
        assert_eq!(second.ordinal, 1);
        assert_eq!(second.title, "中华人民共和国乙法");
        assert_ne!(second.title, first.title);
        assert_eq!(second.chunks[0].index, 0);
        assert_eq!(second.chunks[0].content, "# 中华人民共和国乙法");
        assert!(second.chunks[0].path.is_empty());
        assert_eq!(second.chunks[1].path, vec!["第一章 总则"]);
        assert!(second.chunks[1]
            .text
            .starts_with("<<Source: 中华人民共和国乙法 | Path: 第一章 总则>>"));
        assert_eq!(second.chunks[2].path, vec!["第二章 附则"]);
    }

    #[test]
    fn hard_reset_without_title_line_uses_fallback() {
        let text = "第一条 甲。\n第二条 乙。\n第一条 丙。\n";
        let parsed = parse_default(text);
        assert_eq!(parsed.documents.len(), 2);
        assert_eq!(parsed.documents[1].title, "测试法 (2)");
        assert_eq!(parsed.documents[0].chunks[0].content, "第一条 甲。\n第二条 乙。");
        assert_eq!(parsed.documents[1].chunks[0].content, "第一条 丙。");
    }

    #[test]
    fn hard_reset_drops_headings_staged_before_the_title() {
        let text = "第一编 甲编\n第一章 总则\n第一条 甲一。\n第二条 甲二。\n第二编 附编\n# 乙法\n第一章 总则\n第一条 乙一。\n";
        let parsed = parse_default(text);
        assert_eq!(parsed.documents.len(), 2);

        let first = &parsed.documents[0];
        assert_eq!(first.chunks.len(), 1);
        assert_eq!(first.chunks[0].content, "第一条 甲一。\n第二条 甲二。");
        assert_eq!(first.chunks[0].path, vec!["第一编 甲编", "第一章 总则"]);

        let second = &parsed.documents[1];
        assert_eq!(second.title, "乙法");
        assert_eq!(second.chunks[0].content, "# 乙法");
        assert_eq!(second.chunks[1].content, "第一条 乙一。");
        assert_eq!(second.chunks[1].path, vec!["第一章 总则"]);
    }

    #[test]
    fn hard_reset_takes_title_lines_back_from_the_merge_buffer() {
        let text = "# 甲法\n第一章 总则\n第一条 甲一。\n第二条 甲二。\n第九章 附则\n# 乙法\n一、说明甲\n二、说明乙\n第一条 乙一。\n";
        let parsed = parse_default(text);
        assert_eq!(parsed.documents.len(), 2);

        let first = &parsed.documents[0];
        let last = first.chunks.last().map(|c| c.content.as_str());
        assert_eq!(last, Some("第一条 甲一。\n第二条 甲二。"));
        assert!(first.chunks.iter().all(|c| !c.content.contains("乙")));

        let second = &parsed.documents[1];
        assert_eq!(second.title, "乙法");
        assert_eq!(second.chunks[0].content, "# 乙法\n一、说明甲\n二、说明乙");
        assert_eq!(second.chunks[1].content, "第一条 乙一。");
        assert!(second.chunks[1].path.is_empty());
    }

    #[test]
    fn hard_reset_skips_table_of_contents_after_the_title() {
        let text = "# 甲法\n第一章 总则\n第一条 甲一。\n第二条 甲二。\n# 中华人民共和国乙法\n目录\n第一章 总则\n第二章 附则\n第一章 总则\n第一条 乙一。\n";
        let parsed = parse_default(text);
        assert_eq!(parsed.documents.len(), 2);

        let first = &parsed.documents[0];
        let last = first.chunks.last().map(|c| c.content.as_str());
        assert_eq!(last, Some("第一条 甲一。\n第二条 甲二。"));

        let second = &parsed.documents[1];
        assert_eq!(second.title, "中华人民共和国乙法");
        assert_eq!(second.chunks[0].content, "# 中华人民共和国乙法\n目录");
        assert_eq!(second.chunks[1].content, "第一条 乙一。");
        assert_eq!(second.chunks[1].path, vec!["第一章 总则"]);
    }

    #[test]
    fn suffixed_article_one_is_not_a_reset() {
        let text = "第一条 甲。\n第一条之一 乙。\n";
        assert_eq!(parse_default(text).documents.len(), 1);
    }

    #[test]
    fn oversize_article_is_cascade_split() {
        let item = "款".repeat(300);
        let items: Vec<String> = (1..=6).map(|i| format!("（{i}）{item}")).collect();
        let text = format!("第一章\n第一条 下列情形：\n{}\n第二条 短。\n", items.join("\n"));
        let config = ChunkerConfig::default();
        let chunks = &parse("测试法", &text, &config).documents[0].chunks;
        assert!(chunks.len() >= 3);
        assert!(chunks[0].content.starts_with("第一条"));
        let last = chunks.last().map(|c| c.content.as_str());
        assert_eq!(last, Some("第二条 短。"));
        for c in &chunks[..chunks.len() - 1] {
            assert!(c.content.chars().count() <= config.split_chars);
            assert_eq!(c.path, vec!["第一章"]);
        }
    }

    #[test]
    fn every_unit_line_is_emitted_exactly_once() {
        let long = "文".repeat(450);
        let text = format!(
            "序言\n第一章 总则\n第一条 {long}\n（一）{long}\n第二条 {long}\n附录 说明\n一、{long}\n二、短\n第二章 其他\n第三条 {long}\n"
        );
        let parsed = parse_default(&text);
        let emitted: Vec<String> = parsed
            .documents
            .iter()
            .flat_map(|d| d.chunks.iter())
            .flat_map(|c| c.content.lines().map(str::to_string).collect::<Vec<_>>())
            .collect();
        let expected: Vec<String> = text
            .lines()
            .filter(|l| !matches!(classify(clean_line(l)), Anchor::Chapter { .. }))
            .map(str::to_string)
            .collect();
        assert_eq!(emitted, expected);
    }

    #[test]
    fn parse_is_deterministic() {
        let text = "前言\n第一章\n第一条 甲。\n第二章\n第二条 乙。\n第一条 丙。\n";
        let config = ChunkerConfig::default();
        assert_eq!(parse("法", text, &config), parse("法", text, &config));
    }

    #[test]
    fn text_without_structure_is_one_preamble_chunk() {
        let parsed = parse_default("一段说明。\n\n另一段说明。");
        let chunks = &parsed.documents[0].chunks;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "一段说明。\n\n另一段说明。");
        assert!(parse_default("").documents[0].chunks.is_empty());
    }
}
