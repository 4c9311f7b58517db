//! Headless browser rendering for JavaScript-heavy sources
//!
//! Rendered sources have no feed, so their pages must be materialized by a
//! real browser before extraction. Uses the Chrome DevTools Protocol via
//! chromiumoxide behind the `js-rendering` feature; without the feature the
//! renderer is a stub that fails cleanly.

use crate::error::{Error, Result};

/// Configuration for the headless renderer
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Per-page render timeout (seconds)
    pub timeout_secs: u64,
    /// Extra wait after load for dynamic content (milliseconds)
    pub settle_ms: u64,
    /// Disable the Chromium sandbox (needed in some containers)
    pub no_sandbox: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            settle_ms: 1500,
            no_sandbox: false,
        }
    }
}

/// A rendered page
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// Final URL after redirects
    pub url: String,
    /// Fully materialized HTML
    pub html: String,
    /// Document title when the page sets one
    pub title: Option<String>,
}

#[cfg(feature = "js-rendering")]
mod browser_impl {
    use super::*;
    use chromiumoxide::browser::{Browser, BrowserConfig};
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tokio::time::timeout;
    use tracing::{debug, info, warn};

    struct BrowserState {
        browser: Browser,
        handler: tokio::task::JoinHandle<()>,
    }

    /// Headless page renderer backed by a lazily launched browser
    pub struct PageRenderer {
        config: RendererConfig,
        state: Mutex<Option<BrowserState>>,
    }

    impl PageRenderer {
        pub fn new(config: RendererConfig) -> Self {
            Self {
                config,
                state: Mutex::new(None),
            }
        }

        async fn launch(&self) -> Result<()> {
            let mut state = self.state.lock().await;
            if state.is_some() {
                return Ok(());
            }

            info!("Launching headless browser");

            let mut builder = BrowserConfig::builder()
                .arg("--disable-gpu")
                .arg("--disable-dev-shm-usage")
                .arg("--no-first-run")
                .arg("--disable-extensions");
            if self.config.no_sandbox {
                builder = builder.no_sandbox();
            }

            let browser_config = builder
                .build()
                .map_err(|e| Error::Render(format!("browser config: {}", e)))?;

            let (browser, mut handler) = Browser::launch(browser_config)
                .await
                .map_err(|e| Error::Render(format!("browser launch: {}", e)))?;

            let handle = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });

            *state = Some(BrowserState {
                browser,
                handler: handle,
            });
            Ok(())
        }

        /// Render a page and return its materialized HTML
        pub async fn render(&self, url: &str) -> Result<RenderedPage> {
            self.launch().await?;

            debug!("Rendering {}", url);
            let deadline = Duration::from_secs(self.config.timeout_secs);

            let state = self.state.lock().await;
            let browser = &state
                .as_ref()
                .ok_or_else(|| Error::Render("browser not running".to_string()))?
                .browser;

            let page = browser
                .new_page(url)
                .await
                .map_err(|e| Error::Render(format!("new page: {}", e)))?;

            let result = timeout(deadline, async {
                page.wait_for_navigation()
                    .await
                    .map_err(|e| Error::Render(format!("navigation: {}", e)))?;

                if self.config.settle_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;
                }

                let final_url = page
                    .url()
                    .await
                    .map_err(|e| Error::Render(format!("url: {}", e)))?
                    .unwrap_or_else(|| url.to_string());

                let html = page
                    .content()
                    .await
                    .map_err(|e| Error::Render(format!("content: {}", e)))?;

                let title = page
                    .get_title()
                    .await
                    .ok()
                    .flatten()
                    .filter(|t| !t.is_empty());

                Ok(RenderedPage {
                    url: final_url,
                    html,
                    title,
                })
            })
            .await
            .map_err(|_| Error::Render(format!("render timeout after {:?}: {}", deadline, url)))?;

            if let Err(e) = page.close().await {
                warn!("Failed to close page for {}: {}", url, e);
            }

            result
        }

        /// Shut the browser down
        pub async fn close(&self) -> Result<()> {
            let mut state = self.state.lock().await;
            if let Some(mut s) = state.take() {
                s.browser
                    .close()
                    .await
                    .map_err(|e| Error::Render(format!("browser close: {}", e)))?;
                s.handler.abort();
            }
            Ok(())
        }
    }
}

#[cfg(feature = "js-rendering")]
pub use browser_impl::PageRenderer;

/// Stub renderer when the js-rendering feature is disabled
#[cfg(not(feature = "js-rendering"))]
pub struct PageRenderer {
    _config: RendererConfig,
}

#[cfg(not(feature = "js-rendering"))]
impl PageRenderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { _config: config }
    }

    pub async fn render(&self, url: &str) -> Result<RenderedPage> {
        Err(Error::Render(format!(
            "headless rendering not available for {}; \
             compile with --features js-rendering",
            url
        )))
    }

    pub async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Whether this build can render JavaScript pages
pub fn rendering_available() -> bool {
    cfg!(feature = "js-rendering")
}
