//! Line classification for legal Markdown.
//!
//! Every line maps to exactly one [`Anchor`], tested in priority order
//! Article → Chapter → Special → List, with [`Anchor::Plain`] as the default.

use regex::Regex;
use std::sync::OnceLock;

/// Chinese or Arabic (ASCII / full-width) numeral run.
const NUM: &str = "[零〇一二三四五六七八九十百千0-9０-９]+";

/// Structural role of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// A numbered clause, e.g. `第一条`. `first` is set for article number
    /// one without an `之` suffix.
    Article { first: bool },
    /// A numbered heading above article level, ranked 编 = 0, 章 = 1, 节 = 2.
    Chapter { level: u8 },
    /// An appendix marker or a bracketed case-annotation heading.
    Special,
    /// A numbered or lettered list item.
    List,
    Plain,
}

impl Anchor {
    /// Article, Chapter, and Special lines end the preamble.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Anchor::Article { .. } | Anchor::Chapter { .. } | Anchor::Special
        )
    }

    /// Article and Special lines confirm the pending path.
    pub fn is_content(&self) -> bool {
        matches!(self, Anchor::Article { .. } | Anchor::Special)
    }
}

struct Patterns {
    article: Regex,
    chapter: Regex,
    special: Regex,
    list: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        article: Regex::new(&format!(
            r"^第({NUM})条(之{NUM})?(?:[\s：:]|$)"
        ))
        .expect("article pattern"),
        chapter: Regex::new(&format!(r"^第{NUM}([编章节])(?:[\s：:]|$)")).expect("chapter pattern"),
        special: Regex::new(r"^(?:【[^】]+】|附[录件])").expect("special pattern"),
        list: Regex::new(
            r"^(?:[一二三四五六七八九十]+、|\d+[.．、]|[（(][一二三四五六七八九十]+[）)]|[（(]\d+[）)])",
        )
        .expect("list pattern"),
    })
}

/// Strip Markdown heading markers and surrounding bold emphasis.
pub fn clean_line(line: &str) -> &str {
    let mut s = line.trim();
    s = s.trim_start_matches('#').trim_start();
    if let Some(inner) = s.strip_prefix("**") {
        s = inner.strip_suffix("**").unwrap_or(inner).trim();
    }
    s
}

/// Whether the raw line is a Markdown heading.
pub fn is_heading(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

/// Classify an already-cleaned line.
pub fn classify(cleaned: &str) -> Anchor {
    let p = patterns();
    if let Some(caps) = p.article.captures(cleaned) {
        let number = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let first = caps.get(2).is_none() && matches!(number, "一" | "1" | "１");
        return Anchor::Article { first };
    }
    if let Some(caps) = p.chapter.captures(cleaned) {
        let level = match caps.get(1).map(|m| m.as_str()) {
            Some("编") => 0,
            Some("章") => 1,
            _ => 2,
        };
        return Anchor::Chapter { level };
    }
    if p.special.is_match(cleaned) {
        return Anchor::Special;
    }
    if p.list.is_match(cleaned) {
        return Anchor::List;
    }
    Anchor::Plain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn articles() {
        assert_eq!(classify("第一条 为了规范"), Anchor::Article { first: true });
        assert_eq!(classify("第1条：定义"), Anchor::Article { first: true });
        assert_eq!(classify("第一条"), Anchor::Article { first: true });
        assert_eq!(classify("第十二条 合同"), Anchor::Article { first: false });
        assert_eq!(
            classify("第一条之一 补充"),
            Anchor::Article { first: false }
        );
    }

    #[test]
    fn article_requires_separator() {
        assert_eq!(classify("第一条规定的情形"), Anchor::Plain);
    }

    #[test]
    fn chapters_by_level() {
        assert_eq!(classify("第一编 总则"), Anchor::Chapter { level: 0 });
        assert_eq!(classify("第三章 合同的订立"), Anchor::Chapter { level: 1 });
        assert_eq!(classify("第二节"), Anchor::Chapter { level: 2 });
    }

    #[test]
    fn specials_and_lists() {
        assert_eq!(classify("【裁判要旨】"), Anchor::Special);
        assert_eq!(classify("附录 术语"), Anchor::Special);
        assert_eq!(classify("附件一"), Anchor::Special);
        assert_eq!(classify("一、总体要求"), Anchor::List);
        assert_eq!(classify("（二）违约责任"), Anchor::List);
        assert_eq!(classify("(3) 其他"), Anchor::List);
        assert_eq!(classify("2. 期限"), Anchor::List);
        assert_eq!(classify("本法所称合同"), Anchor::Plain);
    }

    #[test]
    fn markdown_is_stripped_before_classification() {
        assert_eq!(clean_line("## 第一章 总则"), "第一章 总则");
        assert_eq!(clean_line("**第五条 原则**"), "第五条 原则");
        assert_eq!(
            classify(clean_line("### 第二节 要约")),
            Anchor::Chapter { level: 2 }
        );
        assert!(is_heading("# 中华人民共和国民法典"));
    }
}
