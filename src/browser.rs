//! Capability interface over a browser driver.
//!
//! Everything the crawl does to a page goes through [`Browser`]: the session manager,
//! the pagination controller and the profile enricher never see a concrete driver.
//! Implementors provide the primitives; the bounded waits are built on top of them
//! by polling.

use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};

pub type BrowserResult<T> = core::result::Result<T, BrowserError>;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum BrowserError {
    /// The session is gone (browser crashed or was closed). Every later call on the
    /// same session fails the same way.
    #[error("invalid session: {0}")]
    InvalidSession(String),
    #[error("session not created: {0}")]
    SessionNotCreated(String),
    #[error("no such element: {0}")]
    NoSuchElement(String),
    #[error("stale element reference")]
    StaleElement,
    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(Duration, String),
    #[error("webdriver error `{code}`: {message}")]
    Driver { code: String, message: String },
    #[error("webdriver transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl BrowserError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BrowserError::Timeout(..))
    }

    /// The element or page state we were looking for just isn't there. The caller
    /// decides whether that degrades to a sentinel or ends something.
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            BrowserError::Timeout(..) | BrowserError::NoSuchElement(_) | BrowserError::StaleElement
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Css(String),
    XPath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn xpath(expression: impl Into<String>) -> Self {
        Locator::XPath(expression.into())
    }

    /// WebDriver "using" strategy name and the raw selector.
    pub fn strategy(&self) -> (&'static str, &str) {
        match self {
            Locator::Css(selector) => ("css selector", selector),
            Locator::XPath(expression) => ("xpath", expression),
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Css(selector) => write!(f, "css `{selector}`"),
            Locator::XPath(expression) => write!(f, "xpath `{expression}`"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Present,
    Clickable,
}

#[allow(async_fn_in_trait)]
pub trait Browser {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()>;
    async fn current_url(&mut self) -> BrowserResult<String>;
    /// All elements currently matching `locator`. Empty when nothing matches.
    async fn find_all(&mut self, locator: &Locator) -> BrowserResult<Vec<ElementId>>;
    async fn is_interactable(&mut self, element: &ElementId) -> BrowserResult<bool>;
    /// `true` once the element has been detached from the document.
    async fn is_stale(&mut self, element: &ElementId) -> BrowserResult<bool>;
    async fn click(&mut self, element: &ElementId) -> BrowserResult<()>;
    async fn send_keys(&mut self, element: &ElementId, text: &str) -> BrowserResult<()>;
    async fn read_text(&mut self, element: &ElementId) -> BrowserResult<String>;
    async fn page_source(&mut self) -> BrowserResult<String>;
    async fn current_window(&mut self) -> BrowserResult<WindowHandle>;
    /// Opens a new tab and returns its handle without switching to it.
    async fn new_window(&mut self) -> BrowserResult<WindowHandle>;
    async fn switch_to_window(&mut self, handle: &WindowHandle) -> BrowserResult<()>;
    /// Closes the current window.
    async fn close_window(&mut self) -> BrowserResult<()>;
    async fn quit(&mut self) -> BrowserResult<()>;

    /// Polls until at least one element matching `locator` satisfies `condition`,
    /// or fails with [`BrowserError::Timeout`].
    async fn wait_for(
        &mut self,
        locator: &Locator,
        condition: Condition,
        timeout: Duration,
    ) -> BrowserResult<Vec<ElementId>> {
        let deadline = Instant::now() + timeout;
        loop {
            let found = self.find_all(locator).await?;
            let ready = match condition {
                Condition::Present => found,
                Condition::Clickable => {
                    let mut clickable = Vec::with_capacity(found.len());
                    for element in found {
                        match self.is_interactable(&element).await {
                            Ok(true) => clickable.push(element),
                            Ok(false) | Err(BrowserError::StaleElement) => {}
                            Err(err) => return Err(err),
                        }
                    }
                    clickable
                }
            };
            if !ready.is_empty() {
                return Ok(ready);
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout(timeout, locator.to_string()));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Polls until `element` is detached from the document.
    async fn wait_until_stale(
        &mut self,
        element: &ElementId,
        timeout: Duration,
    ) -> BrowserResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_stale(element).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout(
                    timeout,
                    format!("element {} to go stale", element.0),
                ));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Liveness probe: any answer at all means the session still exists.
    async fn is_alive(&mut self) -> bool {
        self.current_url().await.is_ok()
    }
}
