//! Suite configuration: the resolution matrix, settle windows and run options

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{VisualError, VisualResult};

/// Extra pixels captured around a padded region
pub const ELEMENT_PADDING_OFFSET: u32 = 8;

/// Settle time after a micro-interaction (tab switch, hover, toggle)
pub const MICRO_ANIMATION_TIMEOUT: u64 = 300;

/// Settle time after a structural transition (code block expand/collapse,
/// playground initialization)
pub const MICRO_ANIMATION_TIMEOUT_LONG: u64 = 1000;

/// Time the embedded playground needs to run a snippet and print its output
pub const PLAYGROUND_RUN_TIMEOUT: u64 = 3000;

/// Default viewport matrix as `(name, width, height)`
pub const RESOLUTIONS: &[(&str, u32, u32)] = &[
    ("desktop", 1280, 800),
    ("tablet", 768, 1024),
    ("mobile", 375, 812),
];

/// Path of the documentation page under test
pub const TEST_PAGE_PATH: &str = "/docs/test-page.html";

/// A named viewport size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> VisualResult<Self> {
        let resolution = Self {
            name: name.into(),
            width,
            height,
        };
        resolution.validate()?;
        Ok(resolution)
    }

    fn validate(&self) -> VisualResult<()> {
        if self.name.trim().is_empty() {
            return Err(VisualError::Config("resolution name must not be empty".to_string()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(VisualError::Config(format!(
                "resolution '{}' must have a positive size, got {}x{}",
                self.name, self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Ordered, non-empty list of resolutions with unique names.
///
/// Every scenario runs once per entry, in list order. Names end up in
/// baseline filenames, so a duplicate would make two cases write the same
/// file; construction rejects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Resolution>", into = "Vec<Resolution>")]
pub struct ResolutionMatrix {
    entries: Vec<Resolution>,
}

impl ResolutionMatrix {
    pub fn new(entries: Vec<Resolution>) -> VisualResult<Self> {
        if entries.is_empty() {
            return Err(VisualError::EmptyResolutionMatrix);
        }

        let mut seen = HashSet::new();
        for resolution in &entries {
            resolution.validate()?;
            if !seen.insert(resolution.name.as_str()) {
                return Err(VisualError::DuplicateResolution(resolution.name.clone()));
            }
        }

        Ok(Self { entries })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resolution> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ResolutionMatrix {
    fn default() -> Self {
        Self {
            entries: RESOLUTIONS
                .iter()
                .map(|(name, width, height)| Resolution {
                    name: (*name).to_string(),
                    width: *width,
                    height: *height,
                })
                .collect(),
        }
    }
}

impl TryFrom<Vec<Resolution>> for ResolutionMatrix {
    type Error = VisualError;

    fn try_from(entries: Vec<Resolution>) -> VisualResult<Self> {
        Self::new(entries)
    }
}

impl From<ResolutionMatrix> for Vec<Resolution> {
    fn from(matrix: ResolutionMatrix) -> Self {
        matrix.entries
    }
}

impl<'a> IntoIterator for &'a ResolutionMatrix {
    type Item = &'a Resolution;
    type IntoIter = std::slice::Iter<'a, Resolution>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// How long to wait for animations before capturing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettleWindow {
    Short,
    Long,
    /// Playground snippet execution
    Run,
}

/// Durations behind each settle window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub short_ms: u64,
    pub long_ms: u64,
    pub run_ms: u64,
}

impl Timings {
    pub fn duration(&self, window: SettleWindow) -> Duration {
        let ms = match window {
            SettleWindow::Short => self.short_ms,
            SettleWindow::Long => self.long_ms,
            SettleWindow::Run => self.run_ms,
        };
        Duration::from_millis(ms)
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            short_ms: MICRO_ANIMATION_TIMEOUT,
            long_ms: MICRO_ANIMATION_TIMEOUT_LONG,
            run_ms: PLAYGROUND_RUN_TIMEOUT,
        }
    }
}

/// What to do when a capture has no stored baseline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineMode {
    /// Write the capture as the new baseline and pass (local development)
    #[default]
    Create,
    /// Fail the case (CI)
    Strict,
    /// Overwrite every baseline with the fresh capture
    Update,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl FromStr for Browser {
    type Err = VisualError;

    fn from_str(s: &str) -> VisualResult<Self> {
        match s {
            "chromium" | "chrome" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" | "safari" => Ok(Browser::Webkit),
            other => Err(VisualError::Config(format!("unknown browser: {}", other))),
        }
    }
}

/// Full configuration of a suite run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    /// Origin serving the documentation
    pub base_url: String,

    /// Page path appended to `base_url`
    pub page_path: String,

    pub resolutions: ResolutionMatrix,

    /// Padding for padded captures, in CSS pixels
    pub padding: u32,

    pub settle: Timings,

    pub action_timeout_ms: u64,
    pub navigation_timeout_ms: u64,

    /// Hard limit for a single case, after which it is reported as failed
    pub case_timeout_ms: u64,

    /// Allowed share of differing pixels (0.0 - 100.0 percent)
    pub threshold: f64,

    pub baseline_mode: BaselineMode,
    pub baseline_dir: PathBuf,
    pub output_dir: PathBuf,

    pub browser: Browser,
    pub headless: bool,

    /// Number of cases running at once, each in its own browser
    pub concurrency: usize,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            page_path: TEST_PAGE_PATH.to_string(),
            resolutions: ResolutionMatrix::default(),
            padding: ELEMENT_PADDING_OFFSET,
            settle: Timings::default(),
            action_timeout_ms: 5000,
            navigation_timeout_ms: 30_000,
            case_timeout_ms: 60_000,
            threshold: 0.2,
            baseline_mode: BaselineMode::Create,
            baseline_dir: PathBuf::from("tests/visual/baselines"),
            output_dir: PathBuf::from("test-results/visual"),
            browser: Browser::Chromium,
            headless: true,
            concurrency: 2,
        }
    }
}

impl SuiteConfig {
    /// Parse a configuration from YAML; missing keys keep their defaults
    pub fn from_yaml(yaml: &str) -> VisualResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> VisualResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> VisualResult<()> {
        if self.concurrency == 0 {
            return Err(VisualError::Config("concurrency must be at least 1".to_string()));
        }
        if !(0.0..=100.0).contains(&self.threshold) {
            return Err(VisualError::Config(format!(
                "threshold must be within 0-100, got {}",
                self.threshold
            )));
        }
        if !self.page_path.starts_with('/') {
            return Err(VisualError::Config(format!(
                "page path must be absolute, got '{}'",
                self.page_path
            )));
        }
        Ok(())
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn case_timeout(&self) -> Duration {
        Duration::from_millis(self.case_timeout_ms)
    }
}
