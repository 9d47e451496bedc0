use super::Line;

/// Accumulates logical units until a soft character limit would be crossed.
///
/// Lengths are counted in chars, including the `\n` joining two lines.
/// Lines keep their source numbers so a hard reset can take back the ones
/// that belong to the next document.
#[derive(Debug, Default)]
pub(crate) struct MergeBuffer {
    lines: Vec<Line>,
    chars: usize,
}

impl MergeBuffer {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Whether a unit of `len` chars can be appended without passing `limit`.
    /// An empty buffer accepts anything.
    pub fn fits(&self, len: usize, limit: usize) -> bool {
        self.is_empty() || self.chars + 1 + len <= limit
    }

    pub fn push(&mut self, unit: Vec<Line>) {
        for line in unit {
            if !self.lines.is_empty() {
                self.chars += 1;
            }
            self.chars += line.text.chars().count();
            self.lines.push(line);
        }
    }

    /// Remove and return the lines read at or after `line_no`.
    pub fn retract_from(&mut self, line_no: usize) -> Vec<Line> {
        let at = self
            .lines
            .iter()
            .position(|l| l.line_no >= line_no)
            .unwrap_or(self.lines.len());
        let tail = self.lines.split_off(at);
        self.chars = super::split::join(&self.lines).chars().count();
        tail
    }

    pub fn take(&mut self) -> Option<String> {
        if self.lines.is_empty() {
            return None;
        }
        self.chars = 0;
        Some(super::split::join(&std::mem::take(&mut self.lines)))
    }
}
