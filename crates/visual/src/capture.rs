//! Region screenshots, with optional padding around the element

use serde::Serialize;
use tracing::debug;

use crate::error::{VisualError, VisualResult};
use crate::page::{Locator, PageDriver, Rect, ScreenshotRequest, ViewportSize};

/// What a capture covers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CaptureTarget {
    FullPage,
    Region(Locator),
}

/// A single screenshot to take
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureRequest {
    pub target: CaptureTarget,

    /// Margin around the element; `None` captures its exact bounds
    pub padding: Option<u32>,
}

impl CaptureRequest {
    pub fn full_page() -> Self {
        Self {
            target: CaptureTarget::FullPage,
            padding: None,
        }
    }

    pub fn region(locator: Locator) -> Self {
        Self {
            target: CaptureTarget::Region(locator),
            padding: None,
        }
    }

    pub fn padded(locator: Locator, padding: u32) -> Self {
        Self {
            target: CaptureTarget::Region(locator),
            padding: Some(padding),
        }
    }
}

/// Grow `element` by `padding` on every side and clamp it to the viewport.
///
/// Fails when the element has no area or lies entirely outside the viewport.
pub fn padded_clip(element: Rect, padding: u32, viewport: ViewportSize) -> VisualResult<Rect> {
    if !(element.width > 0.0 && element.height > 0.0) {
        return Err(VisualError::ElementNotVisible(format!(
            "element has zero area ({}x{})",
            element.width, element.height
        )));
    }

    let padding = f64::from(padding);
    let left = (element.x - padding).max(0.0);
    let top = (element.y - padding).max(0.0);
    let right = (element.right() + padding).min(f64::from(viewport.width));
    let bottom = (element.bottom() + padding).min(f64::from(viewport.height));

    if right <= left || bottom <= top {
        return Err(VisualError::ElementNotVisible(format!(
            "element at ({}, {}) is outside the {}x{} viewport",
            element.x, element.y, viewport.width, viewport.height
        )));
    }

    Ok(Rect::new(left, top, right - left, bottom - top))
}

/// Bounding box of the first match, or `ElementNotVisible` when it is
/// absent, hidden or has no area
async fn visible_box(page: &dyn PageDriver, locator: &Locator) -> VisualResult<Rect> {
    let element = page
        .bounding_box(locator)
        .await?
        .ok_or_else(|| VisualError::ElementNotVisible(format!("{} is detached or hidden", locator)))?;

    if !(element.width > 0.0 && element.height > 0.0) {
        return Err(VisualError::ElementNotVisible(format!(
            "{} has zero area ({}x{})",
            locator, element.width, element.height
        )));
    }
    Ok(element)
}

/// Take the screenshot described by `request` and return the PNG untouched
pub async fn capture(page: &dyn PageDriver, request: &CaptureRequest) -> VisualResult<Vec<u8>> {
    let screenshot = match (&request.target, request.padding) {
        (CaptureTarget::FullPage, _) => ScreenshotRequest::FullPage,
        (CaptureTarget::Region(locator), None) => {
            visible_box(page, locator).await?;
            ScreenshotRequest::Element {
                locator: locator.clone(),
            }
        }
        (CaptureTarget::Region(locator), Some(padding)) => {
            visible_box(page, locator).await?;
            page.scroll_into_view(locator).await?;

            // Scrolling moves the element, so measure again
            let element = visible_box(page, locator).await?;
            let viewport = page.viewport_size().await?;
            let rect = padded_clip(element, padding, viewport)?;

            debug!(
                "Padded capture of {}: {:?} -> {:?} (padding {})",
                locator, element, rect, padding
            );
            ScreenshotRequest::Clip { rect }
        }
    };

    let bytes = page.screenshot(&screenshot).await?;
    if bytes.is_empty() {
        return Err(VisualError::Capture("browser returned an empty image".to_string()));
    }
    Ok(bytes)
}
