//! Rendering engine seam
//!
//! A [`RenderEngine`] opens [`RenderSession`]s on a headless browser.
//! Sessions are blocking and not shared between concurrent callers: async
//! code moves a session into `spawn_blocking`, uses it, and hands it back
//! or quits it there.

#[cfg(feature = "chrome")]
mod chrome;

#[cfg(feature = "chrome")]
pub use chrome::ChromeEngine;

use crate::error::ScrapeError;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Wait for `<body>` after navigation
pub const BODY_WAIT: Duration = Duration::from_secs(10);

/// Wait for the content selector, then for any link
pub const ELEMENT_WAIT: Duration = Duration::from_secs(5);

/// One browser tab
pub trait RenderSession: Send {
    fn navigate(&mut self, url: &str) -> Result<(), ScrapeError>;

    /// True if the selector appeared within `timeout`
    fn wait_for_element(&mut self, selector: &str, timeout: Duration) -> bool;

    fn page_source(&mut self) -> Result<String, ScrapeError>;

    fn quit(self: Box<Self>);
}

/// Factory for render sessions
pub trait RenderEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn open_session(&self) -> Result<Box<dyn RenderSession>, ScrapeError>;
}

/// Rendered fetch of one URL.
///
/// Navigates, waits for the body, then for `content_selector` (or any link
/// if that never shows up), and returns the page source. All waits are
/// bounded; a page that never settles still returns whatever rendered.
pub fn render_page(
    session: &mut dyn RenderSession,
    url: &str,
    content_selector: Option<&str>,
) -> Result<String, ScrapeError> {
    session.navigate(url)?;
    if !session.wait_for_element("body", BODY_WAIT) {
        debug!(url, "Body did not appear before timeout");
    }
    let content_ready = content_selector
        .map(|selector| session.wait_for_element(selector, ELEMENT_WAIT))
        .unwrap_or(false);
    if !content_ready && !session.wait_for_element("a[href]", ELEMENT_WAIT) {
        debug!(url, "No links rendered before timeout");
    }
    session.page_source()
}

/// Open a session, render one page, and quit, off the async runtime
pub async fn render_once(
    engine: Arc<dyn RenderEngine>,
    url: String,
    content_selector: Option<String>,
) -> Result<String, ScrapeError> {
    tokio::task::spawn_blocking(move || {
        let mut session = engine.open_session()?;
        let html = render_page(session.as_mut(), &url, content_selector.as_deref());
        session.quit();
        html
    })
    .await
    .map_err(|e| ScrapeError::Render(e.to_string()))?
}
