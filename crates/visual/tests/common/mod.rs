//! In-memory page used by the integration tests
//!
//! Elements live at fixed document coordinates. Clicks toggle state, and every
//! screenshot is a solid PNG whose color is derived from that state, so two
//! captures match exactly when the page looks the same.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageOutputFormat, Rgba, RgbaImage};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use webhelp_visual::config::{BaselineMode, Timings};
use webhelp_visual::page::{LoadState, Rect, ScreenshotRequest, ViewportSize};
use webhelp_visual::suite::{PLAYGROUND_FOLD_BUTTON, PLAYGROUND_RUN_BUTTON, PLAYGROUND_WRAPPER};
use webhelp_visual::{
    BaselineStore, Locator, PageDriver, PageFactory, Region, VisualError, VisualResult,
};

/// Fake renders are this many times smaller than the page
const RENDER_SCALE: f64 = 8.0;

const PAGE_HEIGHT: u32 = 2400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Expand(usize),
    Collapse(usize),
    Toggle(usize),
    ActivateTab(usize),
}

#[derive(Debug, Clone)]
pub struct FakeElement {
    pub selector: String,
    pub text: String,
    pub rect: Rect,
    pub parent: Option<usize>,
    pub on_click: Option<Effect>,
}

/// Static structure of a fake document
#[derive(Debug, Clone, Default)]
pub struct FakeDom {
    pub elements: Vec<FakeElement>,

    /// Mixed into every render; change it to simulate a UI regression
    pub theme: u8,

    pub unreachable: bool,
}

impl FakeDom {
    pub fn push(
        &mut self,
        selector: impl Into<String>,
        text: &str,
        rect: Rect,
        parent: Option<usize>,
        on_click: Option<Effect>,
    ) -> usize {
        self.elements.push(FakeElement {
            selector: selector.into(),
            text: text.to_string(),
            rect,
            parent,
            on_click,
        });
        self.elements.len() - 1
    }

    /// The WebHelp test page with `wrappers` synchronized tab lists
    pub fn webhelp(wrappers: usize) -> Self {
        let mut dom = FakeDom::default();
        let region = |r: Region| r.selector();

        dom.push(region(Region::MicroFormatContent), "Micro format", Rect::new(40.0, 80.0, 600.0, 120.0), None, None);

        let mut y = 240.0;
        for _ in 0..wrappers {
            let wrapper = dom.push(region(Region::TabListWrapper), "Kotlin Java", Rect::new(40.0, y, 600.0, 160.0), None, None);
            dom.push(region(Region::Tab), "Kotlin", Rect::new(40.0, y, 80.0, 30.0), Some(wrapper), Some(Effect::ActivateTab(0)));
            dom.push(region(Region::Tab), "Java", Rect::new(120.0, y, 80.0, 30.0), Some(wrapper), Some(Effect::ActivateTab(1)));
            y += 180.0;
        }

        let collapse = dom.elements.len();
        dom.push(region(Region::CollapseElement), "Details", Rect::new(40.0, y, 600.0, 40.0), None, Some(Effect::Toggle(collapse)));
        y += 60.0;

        dom.push(region(Region::CodeBlock), "fun main() {}", Rect::new(40.0, y, 600.0, 100.0), None, None);
        y += 120.0;
        dom.push(region(Region::CodeBlock), "class MessageService", Rect::new(40.0, y, 600.0, 100.0), None, None);
        y += 120.0;

        let block = dom.push(region(Region::CodeCollapse), "package org.example", Rect::new(0.0, y, 700.0, 140.0), None, None);
        dom.push(region(Region::SynopsisEnding), "...", Rect::new(20.0, y + 100.0, 40.0, 20.0), Some(block), Some(Effect::Expand(block)));
        dom.push(region(Region::CollapseButton), "collapse", Rect::new(660.0, y, 30.0, 30.0), Some(block), Some(Effect::Collapse(block)));
        y += 320.0;

        let playground = dom.push(PLAYGROUND_WRAPPER, "fun main()", Rect::new(40.0, y, 600.0, 200.0), None, None);
        dom.push(PLAYGROUND_FOLD_BUTTON, "", Rect::new(600.0, y, 30.0, 30.0), Some(playground), Some(Effect::Toggle(playground)));
        let run = dom.elements.len();
        dom.push(PLAYGROUND_RUN_BUTTON, "", Rect::new(600.0, y + 40.0, 30.0, 30.0), Some(playground), Some(Effect::Toggle(run)));

        dom.push(region(Region::Footer), "Footer", Rect::new(0.0, f64::from(PAGE_HEIGHT) - 100.0, 1200.0, 100.0), None, None);
        dom
    }
}

/// A call observed by a fake page
#[derive(Debug, Clone)]
pub struct Call {
    pub at: Instant,
    pub op: String,
    pub clip: Option<Rect>,
    pub viewport: ViewportSize,
}

#[derive(Debug)]
struct PageState {
    viewport: ViewportSize,
    scroll_y: f64,
    expanded: BTreeSet<usize>,
    active_tab: usize,
    hovered: Option<usize>,
    loaded: bool,
}

pub struct FakePage {
    dom: FakeDom,
    state: Mutex<PageState>,
    log: Arc<Mutex<Vec<Call>>>,
}

impl FakePage {
    pub fn new(dom: FakeDom) -> Self {
        Self::with_log(dom, Arc::new(Mutex::new(Vec::new())))
    }

    fn with_log(dom: FakeDom, log: Arc<Mutex<Vec<Call>>>) -> Self {
        Self {
            dom,
            state: Mutex::new(PageState {
                viewport: ViewportSize { width: 1280, height: 720 },
                scroll_y: 0.0,
                expanded: BTreeSet::new(),
                active_tab: 0,
                hovered: None,
                loaded: false,
            }),
            log,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.lock().clone()
    }

    fn record(&self, op: impl Into<String>, clip: Option<Rect>) {
        let viewport = self.state.lock().viewport;
        self.log.lock().push(Call {
            at: Instant::now(),
            op: op.into(),
            clip,
            viewport,
        });
    }

    fn resolve(&self, locator: &Locator) -> Vec<usize> {
        let scopes = locator.within.as_deref().map(|parent| self.resolve(parent));

        let mut matches: Vec<usize> = self
            .dom
            .elements
            .iter()
            .enumerate()
            .filter(|(_, el)| el.selector == locator.selector)
            .filter(|(_, el)| {
                locator
                    .has_text
                    .as_ref()
                    .map(|t| el.text.contains(t.as_str()))
                    .unwrap_or(true)
            })
            .filter(|(index, _)| match &scopes {
                Some(scopes) => self.ancestors(*index).any(|a| scopes.contains(&a)),
                None => true,
            })
            .map(|(index, _)| index)
            .collect();

        if let Some(n) = locator.nth {
            matches = matches.into_iter().nth(n).into_iter().collect();
        }
        matches
    }

    fn ancestors(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.dom.elements[index].parent, move |i| self.dom.elements[*i].parent)
    }

    fn first(&self, locator: &Locator) -> VisualResult<usize> {
        self.resolve(locator)
            .first()
            .copied()
            .ok_or_else(|| VisualError::ElementNotFound(locator.to_string()))
    }

    /// Document rectangle, grown while expanded
    fn document_rect(&self, state: &PageState, index: usize) -> Rect {
        let rect = self.dom.elements[index].rect;
        if state.expanded.contains(&index) {
            Rect::new(rect.x, rect.y, rect.width, rect.height * 2.0)
        } else {
            rect
        }
    }

    fn render(&self, state: &PageState, width: f64, height: f64) -> VisualResult<Vec<u8>> {
        let mut hasher = Sha256::new();
        hasher.update([self.dom.theme, state.active_tab as u8]);
        for index in &state.expanded {
            hasher.update((*index as u32).to_le_bytes());
        }
        hasher.update(state.hovered.map(|h| h as i64).unwrap_or(-1).to_le_bytes());
        let digest = hasher.finalize();

        let w = ((width / RENDER_SCALE).ceil() as u32).max(1);
        let h = ((height / RENDER_SCALE).ceil() as u32).max(1);
        let img = RgbaImage::from_pixel(w, h, Rgba([digest[0], digest[1], digest[2], 255]));

        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(img).write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)?;
        Ok(bytes)
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn goto(&self, url: &str, _wait_until: LoadState, _timeout: Duration) -> VisualResult<()> {
        self.record(format!("goto {}", url), None);
        if self.dom.unreachable {
            return Err(VisualError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_CONNECTION_REFUSED".to_string(),
            });
        }

        let mut state = self.state.lock();
        state.loaded = true;
        state.scroll_y = 0.0;
        state.expanded.clear();
        state.active_tab = 0;
        state.hovered = None;
        Ok(())
    }

    async fn set_viewport_size(&self, size: ViewportSize) -> VisualResult<()> {
        self.state.lock().viewport = size;
        self.record(format!("viewport {}x{}", size.width, size.height), None);
        Ok(())
    }

    async fn viewport_size(&self) -> VisualResult<ViewportSize> {
        Ok(self.state.lock().viewport)
    }

    async fn count(&self, locator: &Locator) -> VisualResult<usize> {
        Ok(self.resolve(locator).len())
    }

    async fn click(&self, locator: &Locator) -> VisualResult<()> {
        let index = self.first(locator)?;
        self.record(format!("click {}", locator), None);

        let mut state = self.state.lock();
        match self.dom.elements[index].on_click {
            Some(Effect::Expand(target)) => {
                state.expanded.insert(target);
            }
            Some(Effect::Collapse(target)) => {
                state.expanded.remove(&target);
            }
            Some(Effect::Toggle(target)) => {
                if !state.expanded.remove(&target) {
                    state.expanded.insert(target);
                }
            }
            Some(Effect::ActivateTab(tab)) => state.active_tab = tab,
            None => {}
        }
        Ok(())
    }

    async fn hover(&self, locator: &Locator) -> VisualResult<()> {
        let index = self.first(locator)?;
        self.record(format!("hover {}", locator), None);
        self.state.lock().hovered = Some(index);
        Ok(())
    }

    async fn scroll_into_view(&self, locator: &Locator) -> VisualResult<()> {
        let index = self.first(locator)?;
        let mut state = self.state.lock();
        let rect = self.document_rect(&state, index);

        let top = state.scroll_y;
        let bottom = top + f64::from(state.viewport.height);
        if rect.y < top || rect.bottom() > bottom {
            state.scroll_y = (rect.y - 10.0).max(0.0);
        }
        Ok(())
    }

    async fn bounding_box(&self, locator: &Locator) -> VisualResult<Option<Rect>> {
        let Some(index) = self.resolve(locator).first().copied() else {
            return Ok(None);
        };
        let state = self.state.lock();
        let rect = self.document_rect(&state, index);
        Ok(Some(Rect::new(rect.x, rect.y - state.scroll_y, rect.width, rect.height)))
    }

    async fn screenshot(&self, request: &ScreenshotRequest) -> VisualResult<Vec<u8>> {
        let (width, height, clip) = {
            let state = self.state.lock();
            match request {
                ScreenshotRequest::FullPage => (f64::from(state.viewport.width), f64::from(PAGE_HEIGHT), None),
                ScreenshotRequest::Element { locator } => {
                    let index = self
                        .resolve(locator)
                        .first()
                        .copied()
                        .ok_or_else(|| VisualError::Capture(format!("no element for {}", locator)))?;
                    let rect = self.document_rect(&state, index);
                    (rect.width, rect.height, None)
                }
                ScreenshotRequest::Clip { rect } => (rect.width, rect.height, Some(*rect)),
            }
        };

        self.record("screenshot", clip);
        let state = self.state.lock();
        self.render(&state, width, height)
    }

    async fn close(&self) -> VisualResult<()> {
        self.record("close", None);
        Ok(())
    }
}

/// Opens a fresh fake page per case, all writing to one log
pub struct FakeFactory {
    pub dom: FakeDom,
    pub log: Arc<Mutex<Vec<Call>>>,
}

impl FakeFactory {
    pub fn new(dom: FakeDom) -> Self {
        Self {
            dom,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn opened(&self) -> usize {
        self.log.lock().iter().filter(|c| c.op.starts_with("goto")).count()
    }
}

#[async_trait]
impl PageFactory for FakeFactory {
    async fn open(&self) -> VisualResult<Box<dyn PageDriver>> {
        Ok(Box::new(FakePage::with_log(self.dom.clone(), Arc::clone(&self.log))))
    }
}

pub fn store(dir: &std::path::Path, mode: BaselineMode) -> BaselineStore {
    BaselineStore::new(dir.join("baselines"), dir.join("artifacts"), 0.0, mode).unwrap()
}

pub fn fast_timings() -> Timings {
    Timings {
        short_ms: 300,
        long_ms: 1000,
        run_ms: 3000,
    }
}
