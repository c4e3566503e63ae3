use std::collections::VecDeque;

/// How a window joins its lines when rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStyle {
    /// Lines separated by `\n`, nothing after the last one.
    Joined,
    /// Every line, including the last, followed by `\n`.
    Terminated,
}

/// Rolling buffer of the most recent caption lines, oldest first.
///
/// Capacity changes are lazy: `set_capacity` only records the new bound and
/// the next `push` trims down to it.
#[derive(Debug, Clone)]
pub struct CaptionWindow {
    lines: VecDeque<String>,
    capacity: usize,
    style: RenderStyle,
}

impl CaptionWindow {
    pub fn new(capacity: usize, style: RenderStyle) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity + 1),
            capacity: capacity.max(1),
            style,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push_back(line.into());
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
    }

    /// Append text to the newest line.  Returns false when the window is empty.
    pub fn extend_last(&mut self, fragment: &str) -> bool {
        match self.lines.back_mut() {
            Some(last) => {
                last.push_str(fragment);
                true
            }
            None => false,
        }
    }

    pub fn last(&self) -> Option<&str> {
        self.lines.back().map(String::as_str)
    }

    pub fn pop_last(&mut self) -> Option<String> {
        self.lines.pop_back()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn render(&self) -> String {
        match self.style {
            RenderStyle::Joined => {
                let mut out = String::new();
                for (i, line) in self.lines.iter().enumerate() {
                    if i > 0 {
                        out.push('\n');
                    }
                    out.push_str(line);
                }
                out
            }
            RenderStyle::Terminated => self.lines.iter().fold(String::new(), |mut out, line| {
                out.push_str(line);
                out.push('\n');
                out
            }),
        }
    }
}
