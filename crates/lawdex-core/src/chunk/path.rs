//! Two-phase hierarchical path: headings are staged as pending and only
//! become part of the committed path once content follows them.

/// One heading in a hierarchical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub label: String,
    /// 编 = 0, 章 = 1, 节 = 2. Lower is broader.
    pub level: u8,
    /// Source line the heading was read from.
    pub line_no: usize,
}

/// Pending and committed path segments.
///
/// [`stage`](Self::stage) never touches the committed path. [`commit`](Self::commit)
/// applies every pending heading in encounter order: each one truncates the
/// committed path to strictly broader segments and is appended, so a run
/// of headings with no content between them collapses to the last heading
/// at each level.
#[derive(Debug, Clone, Default)]
pub struct PathStaging {
    pending: Vec<PathSegment>,
    committed: Vec<PathSegment>,
}

impl PathStaging {
    /// Start with headings carried over from a previous document.
    pub fn with_pending(pending: Vec<PathSegment>) -> Self {
        Self {
            pending,
            committed: Vec::new(),
        }
    }

    pub fn stage(&mut self, label: impl Into<String>, level: u8, line_no: usize) {
        self.pending.push(PathSegment {
            label: label.into(),
            level,
            line_no,
        });
    }

    /// Promote pending headings. Returns true when the committed labels
    /// changed; restating the current heading is not a change.
    pub fn commit(&mut self) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        let before = self.labels();
        for segment in self.pending.drain(..) {
            self.committed.retain(|s| s.level < segment.level);
            self.committed.push(segment);
        }
        self.labels() != before
    }

    pub fn pending(&self) -> &[PathSegment] {
        &self.pending
    }

    pub fn committed(&self) -> &[PathSegment] {
        &self.committed
    }

    pub fn take_pending(&mut self) -> Vec<PathSegment> {
        std::mem::take(&mut self.pending)
    }

    /// Remove all pending headings, returning those read after `line_no`.
    pub fn take_pending_after(&mut self, line_no: usize) -> Vec<PathSegment> {
        let mut pending = self.take_pending();
        pending.retain(|s| s.line_no > line_no);
        pending
    }

    /// Committed labels, broadest first.
    pub fn labels(&self) -> Vec<String> {
        self.committed.iter().map(|s| s.label.clone()).collect()
    }
}
