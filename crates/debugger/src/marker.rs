//! Breakpoint markers
//!
//! A marker is an opaque handle created by the user interface when a breakpoint is placed on
//! a source line. The adapter only ever reads a single attribute from it: the line number.

use std::{collections::HashMap, fmt};

use crate::events::Line;

/// Attribute key holding the 1-based line number of a marker
pub const LINE_NUMBER: &str = "lineNumber";

/// Attribute value meaning "line not known"
pub const UNKNOWN_LINE: i64 = -1;

pub trait Marker: fmt::Debug + Send + Sync {
    /// Look up an integer attribute, returning `default` if it is not set
    fn attribute(&self, key: &str, default: i64) -> i64;

    /// The source line this marker points at, if known
    fn line(&self) -> Option<Line> {
        match self.attribute(LINE_NUMBER, UNKNOWN_LINE) {
            line if line >= 1 => Line::try_from(line).ok(),
            _ => None,
        }
    }
}

/// Marker backed by a plain attribute map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMarker {
    attributes: HashMap<String, i64>,
}

impl SourceMarker {
    pub fn at_line(line: Line) -> Self {
        let mut marker = Self::default();
        marker.set_attribute(LINE_NUMBER, i64::try_from(line).unwrap_or(UNKNOWN_LINE));
        marker
    }

    /// A marker without a line number
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: i64) {
        self.attributes.insert(key.into(), value);
    }
}

impl Marker for SourceMarker {
    fn attribute(&self, key: &str, default: i64) -> i64 {
        self.attributes.get(key).copied().unwrap_or(default)
    }
}
