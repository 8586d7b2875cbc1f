use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, NavigateParams};
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::{Page, ScreenshotParams};
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ChromiumSection;

use super::error::{BrowserError, BrowserResult};
use super::session::{
    DrivenSession, ElementHandle, Locator, Probe, SessionFactory, SessionSnapshot,
};

const INTERACTABLE_CHECK: &str = r#"function() {
    if (!this.isConnected || this.disabled) { return false; }
    const style = window.getComputedStyle(this);
    if (style.visibility === 'hidden' || style.display === 'none') { return false; }
    const rect = this.getBoundingClientRect();
    return rect.width > 0 && rect.height > 0;
}"#;

const CLEAR_INPUT: &str = r#"function() {
    this.value = '';
    this.dispatchEvent(new Event('input', { bubbles: true }));
}"#;

#[derive(Debug, Clone, Default)]
pub struct LaunchOverrides {
    pub headless: Option<bool>,
}

/// Launches Chromium with downloads routed into one directory.
#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    chromium: ChromiumSection,
    download_dir: PathBuf,
    overrides: LaunchOverrides,
}

impl BrowserLauncher {
    pub fn new(chromium: ChromiumSection, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            chromium,
            download_dir: download_dir.into(),
            overrides: LaunchOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: LaunchOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub async fn launch(&self) -> BrowserResult<ChromiumSession> {
        tokio::fs::create_dir_all(&self.download_dir).await?;
        let download_dir = tokio::fs::canonicalize(&self.download_dir).await?;
        let headless = self.overrides.headless.unwrap_or(self.chromium.headless);
        let chromium_config = self.build_chromium_config(headless)?;
        info!(
            headless,
            download_dir = %download_dir.display(),
            width = self.chromium.window_width,
            height = self.chromium.window_height,
            "Launching Chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(download_dir.to_string_lossy().into_owned())
            .build()
            .map_err(BrowserError::Configuration)?;
        browser.execute(params).await?;
        let page = browser.new_page("about:blank").await?;

        Ok(ChromiumSession {
            browser: AsyncMutex::new(Some(browser)),
            handler_task: AsyncMutex::new(Some(handler_task)),
            page,
            elements: AsyncMutex::new(HashMap::new()),
            next_handle: AtomicU64::new(0),
        })
    }

    fn build_chromium_config(&self, headless: bool) -> BrowserResult<ChromiumConfig> {
        let width = self.chromium.window_width;
        let height = self.chromium.window_height;
        let mut builder = ChromiumConfig::builder().viewport(ChromiumViewport {
            width,
            height,
            device_scale_factor: None,
            emulating_mobile: false,
            is_landscape: width >= height,
            has_touch: false,
        });

        if let Some(path) = &self.chromium.executable_path {
            builder = builder.chrome_executable(path);
        }
        if !headless {
            builder = builder.with_head();
        }
        if !self.chromium.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = self.chromium.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }

        let mut args = vec![format!("--window-size={width},{height}")];
        if self.chromium.disable_gpu {
            args.push("--disable-gpu".into());
        }
        args.push("--no-first-run".into());
        args.push("--password-store=basic".into());
        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

#[async_trait(?Send)]
impl SessionFactory for BrowserLauncher {
    async fn create(&self) -> BrowserResult<Box<dyn DrivenSession>> {
        Ok(Box::new(self.launch().await?))
    }
}

/// One Chromium tab driven over CDP.
///
/// Element handles are only valid until the next probe; older handles report a
/// stale reference.
#[derive(Debug)]
pub struct ChromiumSession {
    browser: AsyncMutex<Option<Browser>>,
    handler_task: AsyncMutex<Option<JoinHandle<()>>>,
    page: Page,
    elements: AsyncMutex<HashMap<u64, Element>>,
    next_handle: AtomicU64,
}

impl ChromiumSession {
    async fn find(&self, locator: &Locator) -> BrowserResult<Option<Element>> {
        let found = match locator {
            Locator::Css(selector) => self.page.find_element(selector.as_str()).await,
            Locator::Xpath(expression) => self.page.find_xpath(expression.as_str()).await,
        };
        match found {
            Ok(element) => Ok(Some(element)),
            Err(err) => missing_as_absent(err),
        }
    }
}

fn registered<'a>(
    elements: &'a HashMap<u64, Element>,
    handle: &ElementHandle,
) -> BrowserResult<&'a Element> {
    elements
        .get(&handle.id())
        .ok_or_else(|| BrowserError::StaleReference(format!("handle {}", handle.id())))
}

/// Lookup misses are `None`; anything else, a dropped connection included,
/// stays an error.
fn missing_as_absent<T>(err: CdpError) -> BrowserResult<Option<T>> {
    if matches!(err, CdpError::NotFound) {
        return Ok(None);
    }
    let lower = err.to_string().to_lowercase();
    if lower.contains("could not find node") || lower.contains("no node with given id") {
        return Ok(None);
    }
    Err(classify(err, "find"))
}

fn classify(err: CdpError, action: &str) -> BrowserError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("detached")
        || lower.contains("could not find node")
        || lower.contains("no node with given id")
        || lower.contains("cannot find context")
    {
        BrowserError::StaleReference(format!("{action}: {message}"))
    } else {
        BrowserError::Cdp(err)
    }
}

#[async_trait(?Send)]
impl DrivenSession for ChromiumSession {
    async fn goto(&self, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        self.page.goto(params).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    async fn probe(&self, locator: &Locator) -> BrowserResult<Probe> {
        let mut elements = self.elements.lock().await;
        elements.clear();
        let Some(element) = self.find(locator).await? else {
            return Ok(Probe::Absent);
        };
        let interactable = match element.call_js_fn(INTERACTABLE_CHECK, false).await {
            Ok(returns) => returns
                .result
                .value
                .and_then(|value| value.as_bool())
                .unwrap_or(false),
            Err(err) => return Err(classify(err, "probe")),
        };
        if !interactable {
            return Ok(Probe::Present);
        }
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        elements.insert(id, element);
        Ok(Probe::Interactable(ElementHandle::new(id)))
    }

    async fn activate(&self, element: &ElementHandle) -> BrowserResult<()> {
        let elements = self.elements.lock().await;
        registered(&elements, element)?
            .click()
            .await
            .map_err(|err| classify(err, "click"))?;
        Ok(())
    }

    async fn fill(&self, element: &ElementHandle, text: &str) -> BrowserResult<()> {
        let elements = self.elements.lock().await;
        let element = registered(&elements, element)?;
        element.click().await.map_err(|err| classify(err, "focus"))?;
        element
            .call_js_fn(CLEAR_INPUT, false)
            .await
            .map_err(|err| classify(err, "clear"))?;
        element
            .type_str(text)
            .await
            .map_err(|err| classify(err, "type"))?;
        Ok(())
    }

    async fn current_state(&self) -> BrowserResult<SessionSnapshot> {
        Ok(SessionSnapshot {
            url: self.page.url().await?,
            title: self.page.get_title().await?,
            captured_at: Utc::now(),
        })
    }

    async fn screenshot(&self) -> BrowserResult<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        Ok(self.page.screenshot(params).await?)
    }

    async fn close(&self) -> BrowserResult<()> {
        self.elements.lock().await.clear();
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };
        info!("Shutting down Chromium instance");
        if let Err(err) = browser.close().await {
            warn!(error = %err, "Failed to close browser gracefully");
        }
        if let Err(err) = browser.wait().await {
            debug!(error = %err, "Chromium process wait failed");
        }
        if let Some(handle) = self.handler_task.lock().await.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Browser handler join error");
            }
        }
        Ok(())
    }
}

/// Without `close`, the dropped `Browser` kills the Chromium child process and
/// the handler task is aborted here.
impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if let Some(handle) = self.handler_task.get_mut().take() {
            if !handle.is_finished() {
                warn!("ChromiumSession dropped without explicit close");
                handle.abort();
            }
        }
    }
}
