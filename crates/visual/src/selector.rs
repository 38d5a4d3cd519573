//! Logical region names and their DOM selectors

use std::fmt;
use std::str::FromStr;

use crate::error::{VisualError, VisualResult};

/// Attribute the documentation templates put on testable elements
pub const TEST_ATTRIBUTE: &str = "data-test";

/// A UI region addressable by a `data-test` attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    MicroFormatContent,
    TabListWrapper,
    Tab,
    CollapseElement,
    Footer,
    CodeBlock,
    CodeCollapse,
    SynopsisEnding,
    CollapseButton,
}

impl Region {
    pub const ALL: [Region; 9] = [
        Region::MicroFormatContent,
        Region::TabListWrapper,
        Region::Tab,
        Region::CollapseElement,
        Region::Footer,
        Region::CodeBlock,
        Region::CodeCollapse,
        Region::SynopsisEnding,
        Region::CollapseButton,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::MicroFormatContent => "micro-format-content",
            Region::TabListWrapper => "tab-list-wrapper",
            Region::Tab => "tab",
            Region::CollapseElement => "collapse-element",
            Region::Footer => "footer",
            Region::CodeBlock => "code-block",
            Region::CodeCollapse => "code-collapse",
            Region::SynopsisEnding => "synopsis-ending",
            Region::CollapseButton => "collapse-button",
        }
    }

    pub fn selector(&self) -> String {
        format!(r#"[{}="{}"]"#, TEST_ATTRIBUTE, self.as_str())
    }
}

impl FromStr for Region {
    type Err = VisualError;

    fn from_str(name: &str) -> VisualResult<Self> {
        Region::ALL
            .into_iter()
            .find(|region| region.as_str() == name)
            .ok_or_else(|| VisualError::UnknownSelector(name.to_string()))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve a region name to its selector
pub fn test_selector(name: &str) -> VisualResult<String> {
    name.parse::<Region>().map(|region| region.selector())
}
