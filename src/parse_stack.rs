//! Location breadcrumb used to build diagnostic messages.

use std::fmt;

/// Ordered list of location descriptors for the construct currently being
/// encoded or decoded. Frames are pushed on entry to a nested construct and
/// popped on exit; only error messages read it.
#[derive(Debug, Clone, Default)]
pub struct ParseStack {
    root: &'static str,
    frames: Vec<String>,
}

impl ParseStack {
    pub fn new(root: &'static str) -> Self {
        ParseStack {
            root,
            frames: Vec::new(),
        }
    }

    pub fn request() -> Self {
        Self::new("request")
    }

    pub fn response() -> Self {
        Self::new("response")
    }

    /// Kind of document being processed: `request`, `response` or `value`.
    pub fn root(&self) -> &'static str {
        self.root
    }

    pub fn push(&mut self, frame: impl Into<String>) {
        self.frames.push(frame.into());
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Render the breadcrumb as `[request : parameter 2 : member foo]`.
    pub fn dump(&self) -> String {
        self.to_string()
    }

    /// Append the breadcrumb to `message`.
    pub fn locate(&self, message: impl fmt::Display) -> String {
        format!("{} {}", message, self)
    }
}

impl fmt::Display for ParseStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", self.root)?;
        for frame in &self.frames {
            write!(f, " : {}", frame)?;
        }
        write!(f, "]")
    }
}
