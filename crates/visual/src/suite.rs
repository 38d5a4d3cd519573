//! The WebHelp scenario catalog and suite execution

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::capture::CaptureRequest;
use crate::config::{Resolution, SettleWindow, SuiteConfig};
use crate::error::{DiffArtifacts, VisualError, VisualResult};
use crate::page::{page_url, Locator, PageFactory, WebHelpPage};
use crate::scenario::{Scenario, ScenarioRunner, SnapshotName, SnapshotRecord};
use crate::selector::Region;
use crate::store::BaselineStore;

pub const WEBHELP_SUITE: &str = "WebHelp page appearance";

/// Embedded Kotlin playground
pub const PLAYGROUND_WRAPPER: &str = ".kotlin-playground__wrapper";
pub const PLAYGROUND_FOLD_BUTTON: &str = ".fold-button";
pub const PLAYGROUND_RUN_BUTTON: &str = ".run-button";

static NON_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid slug pattern"));

/// Lowercase, dash-separated form of `name`
pub fn slugify(name: &str) -> String {
    NON_SLUG
        .replace_all(&name.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// The scenarios of the WebHelp page, in execution order
pub fn webhelp_scenarios(padding: u32) -> Vec<Scenario> {
    let code_block = Locator::region(Region::CodeBlock)
        .has_text("MessageService")
        .first();
    let code_collapse = Locator::region(Region::CodeCollapse)
        .has_text("package")
        .first();
    let synopsis_ending = code_collapse.locator(Locator::region(Region::SynopsisEnding));
    let collapse_button = code_collapse.locator(Locator::region(Region::CollapseButton).first());
    let collapse_element = Locator::region(Region::CollapseElement).first();
    let playground = Locator::css(PLAYGROUND_WRAPPER).first();

    vec![
        Scenario::new("Should render layout of the article properly")
            .tag("layout")
            .capture(CaptureRequest::full_page(), "layout"),
        Scenario::new("Should render micro format properly")
            .tag("micro-format")
            .capture(
                CaptureRequest::region(Locator::region(Region::MicroFormatContent)),
                "micro-format",
            ),
        Scenario::new("Should render tabs properly")
            .tag("tabs")
            .capture_each(Locator::region(Region::TabListWrapper), None, "tab-list-wrapper"),
        Scenario::new("Should switch tabs synchronously")
            .tag("tabs")
            .click(Locator::region(Region::Tab).nth(1), SettleWindow::Short)
            .capture_each(
                Locator::region(Region::TabListWrapper),
                None,
                SnapshotName::new("tab-list-wrapper").variant("switched"),
            ),
        Scenario::new("Should render collapse section properly")
            .tag("collapse")
            .capture(
                CaptureRequest::padded(collapse_element.clone(), padding),
                "collapse-element",
            ),
        Scenario::new("Should render collapse section when expanded properly")
            .tag("collapse")
            .click(collapse_element.clone(), SettleWindow::Short)
            .capture(
                CaptureRequest::padded(collapse_element, padding),
                SnapshotName::new("collapse-element").variant("expanded"),
            ),
        Scenario::new("Should render footer properly")
            .tag("footer")
            .capture(CaptureRequest::region(Locator::region(Region::Footer)), "footer"),
        Scenario::new("Should render just a codeblock properly")
            .tag("code-block")
            .capture(CaptureRequest::region(code_block.clone()), "code-block"),
        Scenario::new("Should render hovered codeblock properly")
            .tag("code-block")
            .hover(code_block.clone(), SettleWindow::Short)
            .capture(
                CaptureRequest::region(code_block),
                SnapshotName::new("code-block").variant("hovered"),
            ),
        Scenario::new("Should render expandable codeblock properly")
            .tag("code-block")
            .capture(
                CaptureRequest::padded(code_collapse.clone(), padding),
                SnapshotName::new("code-block").variant("expandable"),
            ),
        Scenario::new("Should render expandable codeblock when expanded properly")
            .tag("code-block")
            .click(synopsis_ending.clone(), SettleWindow::Long)
            .capture(
                CaptureRequest::padded(code_collapse.clone(), padding),
                SnapshotName::new("code-block").variant("expandable_expanded"),
            ),
        // Expanding and collapsing again must look exactly like the untouched block
        Scenario::new("Should render collapsed codeblock properly")
            .tag("code-block")
            .click(synopsis_ending, SettleWindow::Long)
            .capture(
                CaptureRequest::padded(code_collapse.clone(), padding),
                SnapshotName::new("code-block").variant("expandable_expanded"),
            )
            .click(collapse_button, SettleWindow::Long)
            .capture(
                CaptureRequest::padded(code_collapse, padding),
                SnapshotName::new("code-block").variant("expandable"),
            ),
        Scenario::new("Should render playground properly")
            .tag("playground")
            .settle(SettleWindow::Long)
            .capture(CaptureRequest::padded(playground.clone(), padding), "playground"),
        Scenario::new("Should render expanded playground properly")
            .tag("playground")
            .click(Locator::css(PLAYGROUND_FOLD_BUTTON).first(), SettleWindow::Long)
            .capture(
                CaptureRequest::padded(playground.clone(), padding),
                SnapshotName::new("playground").variant("expanded"),
            ),
        Scenario::new("Should render playground after run properly")
            .tag("playground")
            .click(Locator::css(PLAYGROUND_RUN_BUTTON).first(), SettleWindow::Run)
            .capture(
                CaptureRequest::padded(playground, padding),
                SnapshotName::new("playground").variant("run"),
            ),
    ]
}

/// One scenario at one resolution
#[derive(Debug, Clone)]
pub struct Case {
    pub index: usize,
    pub title: String,
    pub scenario: usize,
    pub resolution: Resolution,
}

/// Error details of a failed case
#[derive(Debug, Clone, Serialize)]
pub struct CaseError {
    pub kind: &'static str,
    pub message: String,
    pub snapshot: Option<String>,
    pub artifacts: Option<DiffArtifacts>,
}

impl CaseError {
    fn from_error(error: &VisualError, snapshot: Option<String>) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            snapshot,
            artifacts: error.artifacts().cloned(),
        }
    }
}

/// Result of running a single case
#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub title: String,
    pub scenario: String,
    pub resolution: String,
    pub success: bool,
    pub duration_ms: u64,
    pub snapshots: Vec<SnapshotRecord>,
    pub error: Option<CaseError>,
}

/// Result of running all cases
#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub suite: String,
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<CaseReport>,
}

impl SuiteReport {
    pub fn success(&self) -> bool {
        self.failed == 0
    }

    /// Write the report as `visual-results.json` under `dir`
    pub fn write(&self, dir: &std::path::Path) -> VisualResult<PathBuf> {
        std::fs::create_dir_all(dir)?;

        let path = dir.join("visual-results.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

/// A set of scenarios crossed with the resolution matrix
pub struct Suite {
    name: String,
    slug: String,
    config: SuiteConfig,
    scenarios: Vec<Scenario>,
}

impl Suite {
    pub fn new(name: impl Into<String>, config: SuiteConfig, scenarios: Vec<Scenario>) -> VisualResult<Self> {
        config.validate()?;

        let mut titles = std::collections::HashSet::new();
        for scenario in &scenarios {
            scenario.validate()?;
            if !titles.insert(scenario.title.as_str()) {
                return Err(VisualError::Config(format!(
                    "duplicate scenario title: '{}'",
                    scenario.title
                )));
            }
        }

        let name = name.into();
        Ok(Self {
            slug: slugify(&name),
            name,
            config,
            scenarios,
        })
    }

    /// The WebHelp page suite
    pub fn webhelp(config: SuiteConfig) -> VisualResult<Self> {
        let scenarios = webhelp_scenarios(config.padding);
        Self::new(WEBHELP_SUITE, config, scenarios)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory name of this suite's baselines
    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    pub fn scenarios(&self) -> &[Scenario] {
        &self.scenarios
    }

    /// Keep scenarios whose title contains `pattern` (case-insensitive)
    pub fn grep(mut self, pattern: &str) -> Self {
        let pattern = pattern.to_lowercase();
        self.scenarios
            .retain(|s| s.title.to_lowercase().contains(&pattern));
        self
    }

    /// Keep scenarios carrying `tag`
    pub fn tagged(mut self, tag: &str) -> Self {
        self.scenarios.retain(|s| s.has_tag(tag));
        self
    }

    /// Every (resolution, scenario) pair, resolution-major
    pub fn cases(&self) -> Vec<Case> {
        let mut cases = Vec::with_capacity(self.config.resolutions.len() * self.scenarios.len());
        for resolution in &self.config.resolutions {
            for (scenario_index, scenario) in self.scenarios.iter().enumerate() {
                cases.push(Case {
                    index: cases.len(),
                    title: scenario.case_title(resolution),
                    scenario: scenario_index,
                    resolution: resolution.clone(),
                });
            }
        }
        cases
    }

    /// Check that the documentation page is being served
    pub async fn probe(&self) -> VisualResult<()> {
        let url = page_url(&self.config.base_url, &self.config.page_path)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        let navigation_error = |reason: String| VisualError::Navigation {
            url: url.clone(),
            reason,
        };

        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!("{} is reachable", url);
                Ok(())
            }
            Ok(resp) => Err(navigation_error(format!("server answered {}", resp.status()))),
            Err(e) => Err(navigation_error(e.to_string())),
        }
    }

    /// Run every case, `concurrency` at a time, each in its own page
    pub async fn run(&self, factory: &dyn PageFactory, store: &BaselineStore) -> SuiteReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let cases = self.cases();

        info!(
            "Running {} case(s) ({} scenario(s) x {} resolution(s))...",
            cases.len(),
            self.scenarios.len(),
            self.config.resolutions.len()
        );

        let mut results: Vec<(usize, CaseReport)> = stream::iter(cases)
            .map(|case| async move {
                let report = self.run_case(factory, store, &case).await;
                if report.success {
                    info!("✓ {} ({} ms)", report.title, report.duration_ms);
                } else {
                    error!(
                        "✗ {} - {}",
                        report.title,
                        report
                            .error
                            .as_ref()
                            .map(|e| e.message.as_str())
                            .unwrap_or("unknown error")
                    );
                }
                (case.index, report)
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        results.sort_by_key(|(index, _)| *index);
        let results: Vec<CaseReport> = results.into_iter().map(|(_, r)| r).collect();

        let passed = results.iter().filter(|r| r.success).count();
        let failed = results.len() - passed;
        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Test Results: {} passed, {} failed ({} ms)",
            passed, failed, duration_ms
        );

        SuiteReport {
            suite: self.name.clone(),
            started_at,
            total: results.len(),
            passed,
            failed,
            duration_ms,
            results,
        }
    }

    async fn run_case(&self, factory: &dyn PageFactory, store: &BaselineStore, case: &Case) -> CaseReport {
        let start = Instant::now();
        let scenario = &self.scenarios[case.scenario];
        debug!("Running case: {}", case.title);

        let outcome = tokio::time::timeout(self.config.case_timeout(), async {
            let page = factory.open().await?;

            let webhelp = WebHelpPage::new(page.as_ref(), &self.config.base_url, &self.config.page_path)
                .with_timeout(self.config.navigation_timeout());

            let result = match webhelp.init().await {
                Ok(()) => {
                    let runner = ScenarioRunner::new(page.as_ref(), store, &self.slug, &self.config.settle);
                    Ok(runner.run(scenario, &case.resolution).await)
                }
                Err(e) => Err(e),
            };

            if let Err(e) = page.close().await {
                warn!("Failed to close page for '{}': {}", case.title, e);
            }
            result
        })
        .await;

        let (success, snapshots, error) = match outcome {
            Ok(Ok(outcome)) => {
                let error = outcome
                    .error
                    .as_ref()
                    .map(|e| CaseError::from_error(e, outcome.failed_snapshot.clone()));
                (outcome.passed(), outcome.snapshots, error)
            }
            Ok(Err(e)) => (false, Vec::new(), Some(CaseError::from_error(&e, None))),
            Err(_) => {
                let e = VisualError::Timeout(format!(
                    "case '{}' after {:?}",
                    case.title,
                    self.config.case_timeout()
                ));
                (false, Vec::new(), Some(CaseError::from_error(&e, None)))
            }
        };

        CaseReport {
            title: case.title.clone(),
            scenario: scenario.title.clone(),
            resolution: case.resolution.name.clone(),
            success,
            duration_ms: start.elapsed().as_millis() as u64,
            snapshots,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolutionMatrix;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify(WEBHELP_SUITE), "webhelp-page-appearance");
        assert_eq!(slugify("  Tabs & Code!! "), "tabs-code");
    }

    #[test]
    fn test_catalog_is_valid() {
        let suite = Suite::webhelp(SuiteConfig::default()).unwrap();
        assert_eq!(suite.scenarios().len(), 15);
        assert_eq!(suite.slug(), "webhelp-page-appearance");
    }

    #[test]
    fn test_cases_are_resolution_major() {
        let config = SuiteConfig {
            resolutions: ResolutionMatrix::new(vec![
                Resolution::new("a", 100, 100).unwrap(),
                Resolution::new("b", 200, 200).unwrap(),
            ])
            .unwrap(),
            ..Default::default()
        };
        let suite = Suite::webhelp(config).unwrap().tagged("footer");
        let titles: Vec<_> = suite.cases().into_iter().map(|c| c.title).collect();
        assert_eq!(
            titles,
            vec![
                "Should render footer properly on a",
                "Should render footer properly on b",
            ]
        );
    }

    #[test]
    fn test_grep_filters_by_title() {
        let suite = Suite::webhelp(SuiteConfig::default()).unwrap().grep("PLAYGROUND");
        assert_eq!(suite.scenarios().len(), 3);
        assert!(suite.scenarios().iter().all(|s| s.has_tag("playground")));
    }

    #[test]
    fn test_duplicate_titles_rejected() {
        let scenario = Scenario::new("Same").capture(CaptureRequest::full_page(), "layout");
        let result = Suite::new("dup", SuiteConfig::default(), vec![scenario.clone(), scenario]);
        assert!(matches!(result, Err(VisualError::Config(_))));
    }

    #[test]
    fn test_report_serializes() {
        let report = SuiteReport {
            suite: WEBHELP_SUITE.to_string(),
            started_at: Utc::now(),
            total: 1,
            passed: 0,
            failed: 1,
            duration_ms: 12,
            results: vec![CaseReport {
                title: "Should render footer properly on desktop".to_string(),
                scenario: "Should render footer properly".to_string(),
                resolution: "desktop".to_string(),
                success: false,
                duration_ms: 12,
                snapshots: Vec::new(),
                error: Some(CaseError::from_error(
                    &VisualError::ElementNotVisible("footer".to_string()),
                    Some("footer_desktop.png".to_string()),
                )),
            }],
        };

        let tmp = tempfile::tempdir().unwrap();
        let path = report.write(tmp.path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["results"][0]["error"]["kind"], "element_not_visible");
        assert_eq!(json["results"][0]["error"]["snapshot"], "footer_desktop.png");
        assert!(!report.success());
    }
}
