//! Playwright browser automation through a long-lived node process
//!
//! The bridge script below is written to a temporary directory and started
//! with `node`. It opens one browser page and then answers newline-delimited
//! JSON requests on stdin:
//!
//! ```text
//! -> {"id":1,"command":"goto","args":{"url":"...","wait_until":"networkidle","timeout_ms":30000}}
//! <- {"id":1,"result":null}
//! -> {"id":2,"command":"bounding_box","args":{"locator":{"selector":"footer"}}}
//! <- {"id":2,"error":{"name":"TimeoutError","message":"..."}}
//! ```

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::config::{Browser, SuiteConfig};
use crate::error::{VisualError, VisualResult};
use crate::page::{
    LoadState, Locator, PageDriver, PageFactory, Rect, ScreenshotRequest, ViewportSize,
};

const BRIDGE_SCRIPT: &str = r#"
const playwright = require('playwright');
const readline = require('readline');

const config = JSON.parse(process.env.WEBHELP_BRIDGE_CONFIG);

const reply = (message) => process.stdout.write(JSON.stringify(message) + '\n');

(async () => {
  const browser = await playwright[config.browser].launch({ headless: config.headless });
  const context = await browser.newContext({
    viewport: { width: config.width, height: config.height },
    deviceScaleFactor: 1,
  });
  const page = await context.newPage();
  page.setDefaultTimeout(config.action_timeout_ms);

  const resolve = (loc) => {
    let scope = loc.within ? resolve(loc.within) : page;
    let locator = scope.locator(loc.selector);
    if (loc.has_text) locator = locator.filter({ hasText: loc.has_text });
    if (loc.nth !== undefined && loc.nth !== null) locator = locator.nth(loc.nth);
    return locator;
  };

  const single = (loc) => {
    const locator = resolve(loc);
    return loc.nth === undefined || loc.nth === null ? locator.first() : locator;
  };

  const handlers = {
    goto: async (a) => {
      await page.goto(a.url, { waitUntil: a.wait_until, timeout: a.timeout_ms });
      return null;
    },
    set_viewport: async (a) => {
      await page.setViewportSize({ width: a.width, height: a.height });
      return page.viewportSize();
    },
    viewport: async () => page.viewportSize(),
    count: async (a) => resolve(a.locator).count(),
    click: async (a) => {
      await single(a.locator).click();
      return null;
    },
    hover: async (a) => {
      await single(a.locator).hover();
      return null;
    },
    scroll_into_view: async (a) => {
      await single(a.locator).scrollIntoViewIfNeeded();
      return null;
    },
    bounding_box: async (a) => {
      const locator = single(a.locator);
      if ((await locator.count()) === 0) return null;
      return locator.boundingBox();
    },
    screenshot: async (a) => {
      let buffer;
      if (a.kind === 'element') {
        buffer = await single(a.locator).screenshot();
      } else if (a.kind === 'clip') {
        buffer = await page.screenshot({ clip: a.rect });
      } else {
        buffer = await page.screenshot({ fullPage: true });
      }
      return buffer.toString('base64');
    },
    close: async () => null,
  };

  reply({ ready: true });

  const input = readline.createInterface({ input: process.stdin });
  for await (const line of input) {
    if (!line.trim()) continue;
    const request = JSON.parse(line);
    try {
      const handler = handlers[request.command];
      if (!handler) throw new Error('unknown command: ' + request.command);
      const result = await handler(request.args || {});
      reply({ id: request.id, result: result === undefined ? null : result });
    } catch (error) {
      reply({ id: request.id, error: { name: error.name, message: error.message } });
    }
    if (request.command === 'close') break;
  }

  await browser.close();
  process.exit(0);
})().catch((error) => {
  reply({ fatal: { name: error.name, message: error.message } });
  process.exit(1);
});
"#;

/// Configuration for launching a bridge
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub node_binary: PathBuf,

    /// Directory whose `node_modules` provides `playwright`
    pub node_path: Option<PathBuf>,

    pub browser: Browser,
    pub headless: bool,
    pub viewport: ViewportSize,
    pub action_timeout: Duration,

    /// Time allowed for the browser to come up
    pub startup_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            node_binary: PathBuf::from("node"),
            node_path: None,
            browser: Browser::Chromium,
            headless: true,
            viewport: ViewportSize {
                width: 1280,
                height: 720,
            },
            action_timeout: Duration::from_secs(5),
            startup_timeout: Duration::from_secs(30),
        }
    }
}

impl BridgeConfig {
    pub fn from_suite(config: &SuiteConfig) -> Self {
        let viewport = config
            .resolutions
            .iter()
            .next()
            .map(|r| ViewportSize {
                width: r.width,
                height: r.height,
            })
            .unwrap_or(ViewportSize {
                width: 1280,
                height: 720,
            });

        Self {
            browser: config.browser,
            headless: config.headless,
            viewport,
            action_timeout: config.action_timeout(),
            ..Default::default()
        }
    }
}

#[derive(Serialize)]
struct BridgeRequest<'a> {
    id: u64,
    command: &'a str,
    args: Value,
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<BridgeFailure>,
    #[serde(default)]
    ready: Option<bool>,
    #[serde(default)]
    fatal: Option<BridgeFailure>,
}

/// Error thrown inside the page by Playwright
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeFailure {
    #[serde(default)]
    pub name: String,
    pub message: String,
}

impl std::fmt::Display for BridgeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

struct BridgeIo {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// One browser page driven through the bridge process
pub struct PlaywrightBridge {
    child: Mutex<Child>,
    io: Mutex<Option<BridgeIo>>,
    next_id: AtomicU64,
    action_timeout: Duration,

    // Holds the bridge script until the process is gone
    _script_dir: tempfile::TempDir,
}

impl PlaywrightBridge {
    /// Spawn node with the bridge script and wait until the page is open
    pub async fn launch(config: BridgeConfig) -> VisualResult<Self> {
        check_playwright_installed(&config).await?;

        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("webhelp-bridge.js");
        std::fs::write(&script_path, BRIDGE_SCRIPT)?;

        let bridge_config = json!({
            "browser": config.browser.as_str(),
            "headless": config.headless,
            "width": config.viewport.width,
            "height": config.viewport.height,
            "action_timeout_ms": config.action_timeout.as_millis() as u64,
        });

        let mut cmd = TokioCommand::new(&config.node_binary);
        cmd.arg(&script_path)
            .env("WEBHELP_BRIDGE_CONFIG", bridge_config.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(node_path) = &config.node_path {
            cmd.env("NODE_PATH", node_path.join("node_modules"));
        }

        let mut child = cmd.spawn().map_err(|e| {
            VisualError::Bridge(format!(
                "Failed to spawn {}: {}",
                config.node_binary.display(),
                e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| VisualError::Bridge("bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VisualError::Bridge("bridge stdout unavailable".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[bridge] {}", line);
                }
            });
        }

        let mut stdout = BufReader::new(stdout);
        timeout(config.startup_timeout, wait_ready(&mut stdout))
            .await
            .map_err(|_| VisualError::Timeout("browser startup".to_string()))??;

        info!(
            "Playwright bridge ready ({}, pid {:?})",
            config.browser.as_str(),
            child.id()
        );

        Ok(Self {
            child: Mutex::new(child),
            io: Mutex::new(Some(BridgeIo { stdin, stdout })),
            next_id: AtomicU64::new(1),
            action_timeout: config.action_timeout,
            _script_dir: script_dir,
        })
    }

    /// Send one request and wait for its reply.
    ///
    /// The outer error is a transport failure; the inner one was thrown by
    /// Playwright and is mapped by the caller.
    async fn call(
        &self,
        command: &str,
        args: Value,
        deadline: Duration,
    ) -> VisualResult<Result<Value, BridgeFailure>> {
        let mut guard = self.io.lock().await;
        let io = guard
            .as_mut()
            .ok_or_else(|| VisualError::Bridge("bridge is closed".to_string()))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = serde_json::to_string(&BridgeRequest { id, command, args })?;
        trace!("bridge <- {}", request);

        io.stdin.write_all(request.as_bytes()).await?;
        io.stdin.write_all(b"\n").await?;
        io.stdin.flush().await?;

        timeout(deadline, read_reply(&mut io.stdout, id))
            .await
            .map_err(|_| VisualError::Timeout(format!("bridge command '{}'", command)))?
    }

    async fn call_as<R: DeserializeOwned>(
        &self,
        command: &str,
        args: Value,
    ) -> VisualResult<R> {
        let value = self
            .call(command, args, self.deadline(self.action_timeout))
            .await?
            .map_err(|f| VisualError::Bridge(format!("{}: {}", command, f)))?;
        Ok(serde_json::from_value(value)?)
    }

    async fn interact(&self, action: &str, locator: &Locator) -> VisualResult<()> {
        debug!("{} {}", action, locator);
        self.call(action, json!({ "locator": locator }), self.deadline(self.action_timeout))
            .await?
            .map(|_| ())
            .map_err(|f| VisualError::Interaction {
                action: action.to_string(),
                target: locator.to_string(),
                reason: f.to_string(),
            })
    }

    // Playwright enforces its own timeout; give it room to report first
    fn deadline(&self, inner: Duration) -> Duration {
        inner + Duration::from_secs(5)
    }

    async fn terminate(&self) {
        let mut child = self.child.lock().await;

        if let Ok(Ok(status)) = timeout(Duration::from_secs(5), child.wait()).await {
            debug!("Bridge exited with {}", status);
            return;
        }

        // Try graceful shutdown first
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                    && timeout(Duration::from_millis(500), child.wait()).await.is_ok()
                {
                    return;
                }
            }
        }

        warn!("Bridge did not exit, killing it");
        if let Err(e) = child.kill().await {
            warn!("Failed to kill bridge: {}", e);
        }
    }
}

#[async_trait]
impl PageDriver for PlaywrightBridge {
    async fn goto(&self, url: &str, wait_until: LoadState, nav_timeout: Duration) -> VisualResult<()> {
        let args = json!({
            "url": url,
            "wait_until": wait_until,
            "timeout_ms": nav_timeout.as_millis() as u64,
        });

        match self.call("goto", args, self.deadline(nav_timeout)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(failure)) => Err(VisualError::Navigation {
                url: url.to_string(),
                reason: failure.to_string(),
            }),
            Err(VisualError::Timeout(_)) => Err(VisualError::Navigation {
                url: url.to_string(),
                reason: format!("page did not settle within {:?}", nav_timeout),
            }),
            Err(e) => Err(e),
        }
    }

    async fn set_viewport_size(&self, size: ViewportSize) -> VisualResult<()> {
        let applied: ViewportSize = self.call_as("set_viewport", json!(size)).await?;
        if applied != size {
            return Err(VisualError::Bridge(format!(
                "viewport is {}x{} after requesting {}x{}",
                applied.width, applied.height, size.width, size.height
            )));
        }
        Ok(())
    }

    async fn viewport_size(&self) -> VisualResult<ViewportSize> {
        self.call_as("viewport", Value::Null).await
    }

    async fn count(&self, locator: &Locator) -> VisualResult<usize> {
        self.call_as("count", json!({ "locator": locator })).await
    }

    async fn click(&self, locator: &Locator) -> VisualResult<()> {
        self.interact("click", locator).await
    }

    async fn hover(&self, locator: &Locator) -> VisualResult<()> {
        self.interact("hover", locator).await
    }

    async fn scroll_into_view(&self, locator: &Locator) -> VisualResult<()> {
        self.interact("scroll_into_view", locator).await
    }

    async fn bounding_box(&self, locator: &Locator) -> VisualResult<Option<Rect>> {
        self.call_as("bounding_box", json!({ "locator": locator })).await
    }

    async fn screenshot(&self, request: &ScreenshotRequest) -> VisualResult<Vec<u8>> {
        let encoded = self
            .call("screenshot", json!(request), self.deadline(self.action_timeout))
            .await?
            .map_err(|f| VisualError::Capture(f.to_string()))?;

        let encoded = encoded
            .as_str()
            .ok_or_else(|| VisualError::Capture("bridge returned no image data".to_string()))?;
        STANDARD
            .decode(encoded)
            .map_err(|e| VisualError::Capture(format!("invalid image payload: {}", e)))
    }

    async fn close(&self) -> VisualResult<()> {
        let already_closed = self.io.lock().await.is_none();
        if already_closed {
            return Ok(());
        }

        let result = self.call("close", Value::Null, Duration::from_secs(5)).await;
        self.io.lock().await.take();
        self.terminate().await;

        result.map(|_| ())
    }
}

/// Read lines until the reply to request `id` arrives
async fn read_reply(
    stdout: &mut BufReader<ChildStdout>,
    id: u64,
) -> VisualResult<Result<Value, BridgeFailure>> {
    loop {
        let mut line = String::new();
        if stdout.read_line(&mut line).await? == 0 {
            return Err(VisualError::Bridge("bridge exited unexpectedly".to_string()));
        }
        trace!("bridge -> {}", line.trim_end());

        // Anything that is not a reply (library warnings) is skipped
        let Ok(response) = serde_json::from_str::<BridgeResponse>(&line) else {
            continue;
        };
        if let Some(fatal) = response.fatal {
            return Err(VisualError::Bridge(fatal.to_string()));
        }
        if response.id != Some(id) {
            continue;
        }

        return Ok(match response.error {
            Some(failure) => Err(failure),
            None => Ok(response.result.unwrap_or(Value::Null)),
        });
    }
}

async fn wait_ready(stdout: &mut BufReader<ChildStdout>) -> VisualResult<()> {
    loop {
        let mut line = String::new();
        if stdout.read_line(&mut line).await? == 0 {
            return Err(VisualError::Bridge(
                "bridge exited before the browser was ready".to_string(),
            ));
        }

        let Ok(response) = serde_json::from_str::<BridgeResponse>(&line) else {
            continue;
        };
        if let Some(fatal) = response.fatal {
            return Err(VisualError::Bridge(format!("browser launch failed: {}", fatal)));
        }
        if response.ready == Some(true) {
            return Ok(());
        }
    }
}

/// Check that node can load the `playwright` package
async fn check_playwright_installed(config: &BridgeConfig) -> VisualResult<()> {
    let mut cmd = TokioCommand::new(&config.node_binary);
    cmd.args(["-e", "require.resolve('playwright')"])
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(node_path) = &config.node_path {
        cmd.env("NODE_PATH", node_path.join("node_modules"));
    }

    match cmd.status().await {
        Ok(status) if status.success() => Ok(()),
        _ => Err(VisualError::PlaywrightNotFound),
    }
}

/// Launches a fresh browser for every case
pub struct PlaywrightLauncher {
    config: BridgeConfig,
}

impl PlaywrightLauncher {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PageFactory for PlaywrightLauncher {
    async fn open(&self) -> VisualResult<Box<dyn PageDriver>> {
        let bridge = PlaywrightBridge::launch(self.config.clone()).await?;
        Ok(Box::new(bridge))
    }
}
