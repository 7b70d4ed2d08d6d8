//! The script as an ordered, spliceable sequence of numbered lines.
//!
//! Lines spliced in by INCLUDE keep the number of the including line and get
//! a sub-index, so an error deep inside an included file is still reported
//! against the line the user wrote in the top-level script.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Position of a line: its number in the top-level script plus one
/// sub-index per level of inclusion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LineNumber {
    line: usize,
    included: Vec<usize>,
}

impl LineNumber {
    /// A top-level line (1-based).
    pub fn new(line: usize) -> Self {
        Self {
            line,
            included: Vec::new(),
        }
    }

    /// Line `sub` (1-based) of a file included at this position.
    pub fn included(&self, sub: usize) -> Self {
        let mut included = self.included.clone();
        included.push(sub);
        Self {
            line: self.line,
            included,
        }
    }

    /// Line number in the top-level script.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Sub-indices, outermost include first.
    pub fn included_path(&self) -> &[usize] {
        &self.included
    }

    /// True when the line came from an included file.
    pub fn is_included(&self) -> bool {
        !self.included.is_empty()
    }
}

impl fmt::Display for LineNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}", self.line)?;
        if !self.included.is_empty() {
            let path: Vec<String> = self.included.iter().map(|n| n.to_string()).collect();
            write!(f, " (included line {})", path.join(" > "))?;
        }
        Ok(())
    }
}

/// One line of script text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLine {
    /// Where the line came from.
    pub number: LineNumber,
    /// The raw text.
    pub text: String,
    /// Files this line was spliced from, outermost first. Empty for
    /// top-level lines.
    pub sources: Arc<[PathBuf]>,
}

impl ScriptLine {
    /// True when `file` is on the chain of includes that produced this line.
    pub fn comes_from(&self, file: &Path) -> bool {
        self.sources.iter().any(|source| source == file)
    }
}

/// Working copy of a script for one pass.
#[derive(Debug, Clone, Default)]
pub struct ScriptBuffer {
    lines: Vec<ScriptLine>,
}

impl ScriptBuffer {
    /// Number the lines of a top-level script starting at 1.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines = lines
            .into_iter()
            .enumerate()
            .map(|(i, text)| ScriptLine {
                number: LineNumber::new(i + 1),
                text: text.into(),
                sources: Arc::from(Vec::new()),
            })
            .collect();
        Self { lines }
    }

    /// Number of lines, including spliced ones.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// True when the buffer holds no lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Line at `index`.
    pub fn get(&self, index: usize) -> Option<&ScriptLine> {
        self.lines.get(index)
    }

    /// Insert the lines of `source` right after `index`, numbered as
    /// included lines of it. Returns the number of inserted lines.
    pub fn splice_after<I, S>(&mut self, index: usize, source: &Path, texts: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let Some(parent) = self.lines.get(index) else {
            return 0;
        };
        let number = parent.number.clone();
        let sources: Arc<[PathBuf]> = parent
            .sources
            .iter()
            .cloned()
            .chain(std::iter::once(source.to_path_buf()))
            .collect();
        let spliced: Vec<ScriptLine> = texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| ScriptLine {
                number: number.included(i + 1),
                text: text.into(),
                sources: sources.clone(),
            })
            .collect();
        let count = spliced.len();
        let at = index + 1;
        self.lines.splice(at..at, spliced);
        count
    }
}
