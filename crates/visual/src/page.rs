//! Page control abstraction and the WebHelp page harness

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{VisualError, VisualResult};
use crate::selector::Region;

/// Description of a DOM query, resolved by the driver every time it is used.
///
/// Matches are taken in document order, so `first()` is stable across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nth: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub within: Option<Box<Locator>>,
}

impl Locator {
    pub fn region(region: Region) -> Self {
        Self::css(region.selector())
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            has_text: None,
            nth: None,
            within: None,
        }
    }

    /// Keep only matches containing `text`
    pub fn has_text(mut self, text: impl Into<String>) -> Self {
        self.has_text = Some(text.into());
        self
    }

    pub fn nth(mut self, index: usize) -> Self {
        self.nth = Some(index);
        self
    }

    pub fn first(self) -> Self {
        self.nth(0)
    }

    /// Scope `child` to the matches of this locator
    pub fn locator(&self, child: Locator) -> Locator {
        let mut child = child;
        child.within = Some(Box::new(match child.within.take() {
            Some(inner) => self.locator(*inner),
            None => self.clone(),
        }));
        child
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = &self.within {
            write!(f, "{} >> ", parent)?;
        }
        f.write_str(&self.selector)?;
        if let Some(text) = &self.has_text {
            write!(f, " >> has-text(\"{}\")", text)?;
        }
        if let Some(n) = self.nth {
            write!(f, " >> nth={}", n)?;
        }
        Ok(())
    }
}

/// Rectangle in CSS pixels, relative to the viewport origin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

/// Readiness signal awaited after navigation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    Load,
    DomContentLoaded,
    #[default]
    NetworkIdle,
}

/// What to render into an image
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScreenshotRequest {
    FullPage,
    /// Exact bounds of the element
    Element { locator: Locator },
    /// Viewport region
    Clip { rect: Rect },
}

/// Remote control over a single browser page
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn goto(&self, url: &str, wait_until: LoadState, timeout: Duration) -> VisualResult<()>;

    /// Resize the viewport; returns once the page has been resized
    async fn set_viewport_size(&self, size: ViewportSize) -> VisualResult<()>;

    async fn viewport_size(&self) -> VisualResult<ViewportSize>;

    async fn count(&self, locator: &Locator) -> VisualResult<usize>;

    async fn click(&self, locator: &Locator) -> VisualResult<()>;

    async fn hover(&self, locator: &Locator) -> VisualResult<()>;

    async fn scroll_into_view(&self, locator: &Locator) -> VisualResult<()>;

    /// Bounding box of the first match, `None` when detached or hidden
    async fn bounding_box(&self, locator: &Locator) -> VisualResult<Option<Rect>>;

    /// PNG bytes as produced by the browser
    async fn screenshot(&self, request: &ScreenshotRequest) -> VisualResult<Vec<u8>>;

    async fn close(&self) -> VisualResult<()>;
}

/// Opens one isolated page per case
#[async_trait]
pub trait PageFactory: Send + Sync {
    async fn open(&self) -> VisualResult<Box<dyn PageDriver>>;
}

/// The documentation page under test
pub struct WebHelpPage<'a> {
    page: &'a dyn PageDriver,
    base_url: String,
    path: String,
    timeout: Duration,
}

impl<'a> WebHelpPage<'a> {
    pub fn new(page: &'a dyn PageDriver, base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            page,
            base_url: base_url.into(),
            path: path.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Absolute URL of the page
    pub fn url(&self) -> VisualResult<String> {
        page_url(&self.base_url, &self.path)
    }

    /// Navigate to the page and wait for the network to go idle.
    ///
    /// Safe to call repeatedly; every call reloads the page.
    pub async fn init(&self) -> VisualResult<()> {
        let url = self.url()?;
        debug!("Opening {}", url);

        self.page
            .goto(&url, LoadState::NetworkIdle, self.timeout)
            .await
            .map_err(|e| match e {
                VisualError::Navigation { .. } => e,
                other => VisualError::Navigation {
                    url: url.clone(),
                    reason: other.to_string(),
                },
            })?;

        info!("Loaded {}", url);
        Ok(())
    }
}

/// Join `path` onto `base_url`
pub fn page_url(base_url: &str, path: &str) -> VisualResult<String> {
    let invalid = |reason: String| VisualError::Navigation {
        url: format!("{}{}", base_url, path),
        reason,
    };
    let base = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
    let url = base.join(path).map_err(|e| invalid(e.to_string()))?;
    Ok(url.to_string())
}
