//! Scenario definitions and the per-scenario state machine

use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::capture::{capture, CaptureRequest, CaptureTarget};
use crate::config::{Resolution, SettleWindow, Timings};
use crate::error::{VisualError, VisualResult};
use crate::page::{Locator, PageDriver, ViewportSize};
use crate::store::{BaselineStore, ComparisonOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Interaction {
    Click,
    Hover,
}

impl fmt::Display for Interaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interaction::Click => f.write_str("click"),
            Interaction::Hover => f.write_str("hover"),
        }
    }
}

/// Baseline name without the resolution suffix, e.g. `code-block` + `hovered`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotName {
    pub region: String,
    pub variant: Option<String>,
}

impl SnapshotName {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            variant: None,
        }
    }

    pub fn variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// Name of the `index`-th element of a multi-element capture
    pub fn indexed(&self, index: usize) -> Self {
        Self {
            region: format!("{}-{}", self.region, index),
            variant: self.variant.clone(),
        }
    }

    /// `<region>[_<variant>]_<resolution>.png`
    pub fn file_name(&self, resolution: &Resolution) -> String {
        match &self.variant {
            Some(variant) => format!("{}_{}_{}.png", self.region, variant, resolution.name),
            None => format!("{}_{}.png", self.region, resolution.name),
        }
    }
}

impl From<&str> for SnapshotName {
    fn from(region: &str) -> Self {
        Self::new(region)
    }
}

/// One step of a scenario
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Step {
    /// Interact with an element, then wait for the resulting animation
    Interact {
        action: Interaction,
        target: Locator,
        settle: SettleWindow,
    },

    /// Wait without interacting (e.g. for an embedded widget to boot)
    Settle(SettleWindow),

    /// Capture one region and compare it with its baseline
    Capture {
        request: CaptureRequest,
        snapshot: SnapshotName,
    },

    /// Capture every element matching `target`, numbered in document order
    CaptureEach {
        target: Locator,
        padding: Option<u32>,
        snapshot: SnapshotName,
    },
}

/// A named sequence of steps, run once per resolution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scenario {
    pub title: String,
    pub tags: Vec<String>,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            tags: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn click(self, target: Locator, settle: SettleWindow) -> Self {
        self.step(Step::Interact {
            action: Interaction::Click,
            target,
            settle,
        })
    }

    pub fn hover(self, target: Locator, settle: SettleWindow) -> Self {
        self.step(Step::Interact {
            action: Interaction::Hover,
            target,
            settle,
        })
    }

    pub fn settle(self, window: SettleWindow) -> Self {
        self.step(Step::Settle(window))
    }

    pub fn capture(self, request: CaptureRequest, snapshot: impl Into<SnapshotName>) -> Self {
        self.step(Step::Capture {
            request,
            snapshot: snapshot.into(),
        })
    }

    pub fn capture_each(
        self,
        target: Locator,
        padding: Option<u32>,
        snapshot: impl Into<SnapshotName>,
    ) -> Self {
        self.step(Step::CaptureEach {
            target,
            padding,
            snapshot: snapshot.into(),
        })
    }

    fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Test title for one resolution
    pub fn case_title(&self, resolution: &Resolution) -> String {
        format!("{} on {}", self.title, resolution.name)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// A scenario must end with a capture, otherwise its last interaction
    /// would never be compared
    pub fn validate(&self) -> VisualResult<()> {
        match self.steps.last() {
            Some(Step::Capture { .. } | Step::CaptureEach { .. }) => Ok(()),
            Some(_) => Err(VisualError::Config(format!(
                "scenario '{}' must end with a capture",
                self.title
            ))),
            None => Err(VisualError::Config(format!(
                "scenario '{}' never captures anything",
                self.title
            ))),
        }
    }
}

/// Where a scenario is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    ViewportSet,
    Interacted,
    Settled,
    Captured,
    Compared,
    Pass,
    Fail,
}

impl Phase {
    pub fn can_advance(self, next: Phase) -> bool {
        use Phase::*;

        match (self, next) {
            (Pass | Fail, _) => false,
            (_, Fail) => true,
            (Init, ViewportSet) => true,
            (ViewportSet | Settled | Compared, Interacted) => true,
            (ViewportSet | Interacted | Settled | Compared, Settled) => true,
            // Never capture straight after an interaction
            (ViewportSet | Settled | Compared, Captured) => true,
            (Captured, Compared) => true,
            (Compared, Pass) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A baseline checked during a scenario
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotRecord {
    pub name: String,
    pub outcome: &'static str,
    pub diff_percent: f64,
}

/// Final state of one scenario run
#[derive(Debug)]
pub struct ScenarioOutcome {
    pub phase: Phase,
    pub snapshots: Vec<SnapshotRecord>,
    pub error: Option<VisualError>,

    /// Snapshot being produced when the scenario failed
    pub failed_snapshot: Option<String>,
}

impl ScenarioOutcome {
    pub fn passed(&self) -> bool {
        self.phase == Phase::Pass
    }
}

/// Runs one scenario at one resolution against an initialized page
pub struct ScenarioRunner<'a> {
    page: &'a dyn PageDriver,
    store: &'a BaselineStore,
    suite: &'a str,
    timings: &'a Timings,

    phase: Phase,
    snapshots: Vec<SnapshotRecord>,
    current_snapshot: Option<String>,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(
        page: &'a dyn PageDriver,
        store: &'a BaselineStore,
        suite: &'a str,
        timings: &'a Timings,
    ) -> Self {
        Self {
            page,
            store,
            suite,
            timings,
            phase: Phase::Init,
            snapshots: Vec::new(),
            current_snapshot: None,
        }
    }

    /// Run every step; the first failure ends the scenario
    pub async fn run(mut self, scenario: &Scenario, resolution: &Resolution) -> ScenarioOutcome {
        let error = match self.run_steps(scenario, resolution).await {
            Ok(()) => None,
            Err(e) => {
                self.phase = Phase::Fail;
                Some(e)
            }
        };

        ScenarioOutcome {
            phase: self.phase,
            snapshots: self.snapshots,
            failed_snapshot: error.as_ref().and(self.current_snapshot),
            error,
        }
    }

    async fn run_steps(&mut self, scenario: &Scenario, resolution: &Resolution) -> VisualResult<()> {
        self.page
            .set_viewport_size(ViewportSize {
                width: resolution.width,
                height: resolution.height,
            })
            .await?;
        self.advance(Phase::ViewportSet)?;

        for step in &scenario.steps {
            match step {
                Step::Interact {
                    action,
                    target,
                    settle,
                } => {
                    self.interact(*action, target).await?;
                    self.settle(*settle).await?;
                }
                Step::Settle(window) => self.settle(*window).await?,
                Step::Capture { request, snapshot } => {
                    self.capture_and_compare(request, &snapshot.file_name(resolution))
                        .await?;
                }
                Step::CaptureEach {
                    target,
                    padding,
                    snapshot,
                } => {
                    let count = self.page.count(target).await?;
                    if count == 0 {
                        return Err(VisualError::ElementNotFound(target.to_string()));
                    }
                    for index in 0..count {
                        let request = CaptureRequest {
                            target: CaptureTarget::Region(target.clone().nth(index)),
                            padding: *padding,
                        };
                        let name = snapshot.indexed(index).file_name(resolution);
                        self.capture_and_compare(&request, &name).await?;
                    }
                }
            }
        }

        self.advance(Phase::Pass)
    }

    async fn interact(&mut self, action: Interaction, target: &Locator) -> VisualResult<()> {
        self.advance(Phase::Interacted)?;

        if self.page.count(target).await? == 0 {
            return Err(VisualError::ElementNotFound(target.to_string()));
        }

        debug!("{} {}", action, target);
        match action {
            Interaction::Click => self.page.click(target).await,
            Interaction::Hover => self.page.hover(target).await,
        }
    }

    async fn settle(&mut self, window: SettleWindow) -> VisualResult<()> {
        let duration = self.timings.duration(window);
        debug!("Settling ({:?}) for {:?}", window, duration);
        tokio::time::sleep(duration).await;
        self.advance(Phase::Settled)
    }

    async fn capture_and_compare(&mut self, request: &CaptureRequest, name: &str) -> VisualResult<()> {
        self.current_snapshot = Some(name.to_string());

        self.advance(Phase::Captured)?;
        let bytes = capture(self.page, request).await?;

        let outcome = self.store.check(self.suite, name, &bytes)?;
        self.advance(Phase::Compared)?;

        let record = match outcome {
            ComparisonOutcome::Matched(diff) => SnapshotRecord {
                name: name.to_string(),
                outcome: "matched",
                diff_percent: diff.diff_percent,
            },
            ComparisonOutcome::Created(_) => {
                info!("No baseline for '{}' - created from this run", name);
                SnapshotRecord {
                    name: name.to_string(),
                    outcome: "created",
                    diff_percent: 0.0,
                }
            }
            ComparisonOutcome::Updated(_) => SnapshotRecord {
                name: name.to_string(),
                outcome: "updated",
                diff_percent: 0.0,
            },
        };
        self.snapshots.push(record);
        self.current_snapshot = None;
        Ok(())
    }

    fn advance(&mut self, next: Phase) -> VisualResult<()> {
        if !self.phase.can_advance(next) {
            return Err(VisualError::InvalidStateTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        self.phase = next;
        Ok(())
    }
}
