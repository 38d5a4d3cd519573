//! WebHelp visual regression suite
//!
//! Renders the WebHelp test page in a real browser and compares screenshots
//! of individual UI regions against stored baselines, once per entry of a
//! resolution matrix.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Visual Test Runner (Rust)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Suite                                                      │
//! │    ├── cases() -> [(Resolution, Scenario)]                  │
//! │    ├── probe() -> is the docs page served?                  │
//! │    └── run(factory, store) -> SuiteReport                   │
//! │  ScenarioRunner (one per case)                              │
//! │    Init → ViewportSet → [Interacted → Settled]* →           │
//! │      Captured → Compared → … → Pass | Fail                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  PageDriver (trait)        BaselineStore                    │
//! │    └── PlaywrightBridge      ├── check(snapshot, png)       │
//! │          node + playwright   └── diff artifacts             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod bridge;
pub mod capture;
pub mod config;
pub mod error;
pub mod page;
pub mod scenario;
pub mod selector;
pub mod store;
pub mod suite;

pub use capture::{capture, padded_clip, CaptureRequest, CaptureTarget};
pub use config::{BaselineMode, Resolution, ResolutionMatrix, SettleWindow, SuiteConfig};
pub use error::{VisualError, VisualResult};
pub use page::{Locator, PageDriver, PageFactory, WebHelpPage};
pub use scenario::{Scenario, ScenarioRunner};
pub use selector::{test_selector, Region};
pub use store::BaselineStore;
pub use suite::{Suite, SuiteReport};
