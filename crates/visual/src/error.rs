//! Error types for the visual suite

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisualError {
    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Unknown selector: '{0}' is not a documented region")]
    UnknownSelector(String),

    #[error("Element not visible: {0}")]
    ElementNotVisible(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("{action} on {target} failed: {reason}")]
    Interaction {
        action: String,
        target: String,
        reason: String,
    },

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Screenshot mismatch: {snapshot} differs by {diff_percent:.2}% (threshold: {threshold:.2}%)")]
    ComparisonMismatch {
        snapshot: String,
        diff_percent: f64,
        threshold: f64,
        artifacts: DiffArtifacts,
    },

    #[error("Baseline not found: {0}")]
    BaselineMissing(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Resolution matrix is empty")]
    EmptyResolutionMatrix,

    #[error("Duplicate resolution name: {0}")]
    DuplicateResolution(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Playwright not found. Install with: npm install playwright && npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright bridge error: {0}")]
    Bridge(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl VisualError {
    /// Stable identifier used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            VisualError::Navigation { .. } => "navigation",
            VisualError::UnknownSelector(_) => "unknown_selector",
            VisualError::ElementNotVisible(_) => "element_not_visible",
            VisualError::ElementNotFound(_) => "element_not_found",
            VisualError::Interaction { .. } => "interaction",
            VisualError::Capture(_) => "capture",
            VisualError::ComparisonMismatch { .. } => "comparison_mismatch",
            VisualError::BaselineMissing(_) => "baseline_missing",
            VisualError::InvalidStateTransition { .. } => "invalid_state_transition",
            VisualError::EmptyResolutionMatrix => "empty_resolution_matrix",
            VisualError::DuplicateResolution(_) => "duplicate_resolution",
            VisualError::Config(_) => "config",
            VisualError::PlaywrightNotFound => "playwright_not_found",
            VisualError::Bridge(_) => "bridge",
            VisualError::Timeout(_) => "timeout",
            VisualError::Io(_) => "io",
            VisualError::Json(_) => "json",
            VisualError::Yaml(_) => "yaml",
            VisualError::Http(_) => "http",
            VisualError::Image(_) => "image",
        }
    }

    /// Diff artifacts attached to a comparison failure
    pub fn artifacts(&self) -> Option<&DiffArtifacts> {
        match self {
            VisualError::ComparisonMismatch { artifacts, .. } => Some(artifacts),
            _ => None,
        }
    }
}

/// Files written when a capture does not match its baseline
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DiffArtifacts {
    pub actual: Option<PathBuf>,
    pub expected: Option<PathBuf>,
    pub diff: Option<PathBuf>,
}

pub type VisualResult<T> = Result<T, VisualError>;
