//! Headless Chrome rendering engine

use super::{RenderEngine, RenderSession};
use crate::error::ScrapeError;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::sync::Arc;
use std::time::Duration;

/// Page load timeout for navigation
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Launches a local Chrome/Chromium per session
#[derive(Debug, Clone)]
pub struct ChromeEngine {
    headless: bool,
}

impl ChromeEngine {
    pub fn new() -> Self {
        Self { headless: true }
    }

    /// Show the browser window, for debugging selectors
    pub fn headful(mut self) -> Self {
        self.headless = false;
        self
    }

    /// Whether a browser can be launched on this machine
    pub fn is_available(&self) -> bool {
        match self.open_session() {
            Ok(session) => {
                session.quit();
                true
            }
            Err(_) => false,
        }
    }
}

impl Default for ChromeEngine {
    fn default() -> Self {
        Self::new()
    }
}

struct ChromeSession {
    // Dropping the browser kills the process, so it lives as long as the tab.
    _browser: Browser,
    tab: Arc<Tab>,
}

impl RenderEngine for ChromeEngine {
    fn name(&self) -> &'static str {
        "chrome"
    }

    fn open_session(&self) -> Result<Box<dyn RenderSession>, ScrapeError> {
        let options = LaunchOptions::default_builder()
            .headless(self.headless)
            .build()
            .map_err(|e| ScrapeError::Render(e.to_string()))?;
        let browser = Browser::new(options).map_err(|e| ScrapeError::Render(e.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| ScrapeError::Render(e.to_string()))?;
        tab.set_default_timeout(NAVIGATION_TIMEOUT);
        Ok(Box::new(ChromeSession {
            _browser: browser,
            tab,
        }))
    }
}

impl RenderSession for ChromeSession {
    fn navigate(&mut self, url: &str) -> Result<(), ScrapeError> {
        self.tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated())
            .map(|_| ())
            .map_err(|e| ScrapeError::Render(e.to_string()))
    }

    fn wait_for_element(&mut self, selector: &str, timeout: Duration) -> bool {
        self.tab
            .wait_for_element_with_custom_timeout(selector, timeout)
            .is_ok()
    }

    fn page_source(&mut self) -> Result<String, ScrapeError> {
        self.tab
            .get_content()
            .map_err(|e| ScrapeError::Render(e.to_string()))
    }

    fn quit(self: Box<Self>) {
        let _ = self.tab.close(true);
    }
}
