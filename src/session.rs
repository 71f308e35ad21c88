//! Browser session lifecycle: launch, login, liveness, teardown and relaunch.
//!
//! A [`CrawlSession`] is never repaired in place. Crash recovery and the scheduled
//! recycle both tear the old one down and build a fresh one through the same
//! [`SessionManager::relaunch`] path.

use std::path::Path;

use log::{error, info, warn};
use tempfile::TempDir;

use crate::browser::{Browser, BrowserError, BrowserResult, Condition, WindowHandle};
use crate::config::CrawlConfig;
use crate::pacing::pause;
use crate::{Error, Result, LAUNCH_ATTEMPTS};

/// Starts a browser whose profile lives in `profile_dir`.
#[allow(async_fn_in_trait)]
pub trait Launcher {
    type Browser: Browser;

    async fn launch(&self, profile_dir: &Path) -> BrowserResult<Self::Browser>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Crashed,
    Closed,
}

/// Why a session is being replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaunchCause {
    /// The page budget of the session is spent.
    Scheduled,
    /// The browser stopped answering.
    Crash,
}

/// One live browser plus the resources it owns.
pub struct CrawlSession<B> {
    browser: B,
    profile_dir: Option<TempDir>,
    pages_served: u32,
    state: SessionState,
    listing_window: WindowHandle,
    profile_window: Option<WindowHandle>,
    listing_page: Option<u32>,
}

impl<B: Browser> CrawlSession<B> {
    fn new(browser: B, profile_dir: TempDir, listing_window: WindowHandle) -> Self {
        Self {
            browser,
            profile_dir: Some(profile_dir),
            pages_served: 0,
            state: SessionState::Active,
            listing_window,
            profile_window: None,
            listing_page: None,
        }
    }

    pub fn browser_mut(&mut self) -> &mut B {
        &mut self.browser
    }

    pub fn pages_served(&self) -> u32 {
        self.pages_served
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn profile_dir(&self) -> Option<&Path> {
        self.profile_dir.as_ref().map(TempDir::path)
    }

    pub fn listing_window(&self) -> &WindowHandle {
        &self.listing_window
    }

    /// Listing page the primary window currently shows, if known.
    pub fn listing_page(&self) -> Option<u32> {
        self.listing_page
    }

    pub(crate) fn set_listing_page(&mut self, page: Option<u32>) {
        self.listing_page = page;
    }

    pub(crate) fn page_turned(&mut self, page: u32) {
        self.pages_served += 1;
        self.listing_page = Some(page);
    }

    pub(crate) fn mark_crashed(&mut self) {
        self.state = SessionState::Crashed;
    }

    /// The secondary tab used for member profiles. Opened on first use and reused
    /// for the rest of the session.
    pub async fn profile_window(&mut self) -> BrowserResult<WindowHandle> {
        if let Some(handle) = &self.profile_window {
            return Ok(handle.clone());
        }
        let handle = self.browser.new_window().await?;
        self.profile_window = Some(handle.clone());
        Ok(handle)
    }

    /// Closes the profile tab, if one was opened, and returns to the listing.
    pub async fn close_profile_window(&mut self) -> BrowserResult<()> {
        let Some(handle) = self.profile_window.take() else {
            return Ok(());
        };
        self.browser.switch_to_window(&handle).await?;
        let closed = self.browser.close_window().await;
        self.browser.switch_to_window(&self.listing_window).await?;
        closed
    }
}

pub struct SessionManager<'c, L> {
    launcher: L,
    config: &'c CrawlConfig,
}

impl<'c, L: Launcher> SessionManager<'c, L> {
    pub fn new(launcher: L, config: &'c CrawlConfig) -> Self {
        Self { launcher, config }
    }

    /// Launches a browser on a fresh private profile directory. Retries with a linear
    /// backoff only when the driver reports "session not created".
    pub async fn start(&self) -> Result<CrawlSession<L::Browser>> {
        let mut attempt = 1;
        loop {
            let profile_dir = tempfile::Builder::new().prefix("chrome_").tempdir()?;
            info!("Starting browser (attempt {attempt}/{LAUNCH_ATTEMPTS})...");

            match self.launcher.launch(profile_dir.path()).await {
                Ok(mut browser) => match browser.current_window().await {
                    Ok(listing_window) => {
                        info!("Browser started.");
                        return Ok(CrawlSession::new(browser, profile_dir, listing_window));
                    }
                    Err(err) => {
                        if let Err(quit_err) = browser.quit().await {
                            warn!("Couldn't quit the half-started browser: {quit_err}");
                        }
                        discard_profile(profile_dir);
                        return Err(Error::Launch(err));
                    }
                },
                Err(BrowserError::SessionNotCreated(msg)) if attempt < LAUNCH_ATTEMPTS => {
                    let backoff = self.config.pacing.launch_backoff * attempt;
                    warn!(
                        "Attempt {attempt}/{LAUNCH_ATTEMPTS} failed ({msg}). Waiting {backoff:?}..."
                    );
                    discard_profile(profile_dir);
                    pause(backoff).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!("Couldn't start the browser after {attempt} attempt(s): {err}");
                    discard_profile(profile_dir);
                    return Err(Error::Launch(err));
                }
            }
        }
    }

    /// Submits the credentials and waits for a marker that only exists after a
    /// successful login.
    pub async fn authenticate(&self, session: &mut CrawlSession<L::Browser>) -> Result<()> {
        let config = self.config;
        let selectors = &config.selectors;
        let timeout = config.timeouts.login;
        let browser = &mut session.browser;
        info!("Logging in...");

        let attempt: BrowserResult<()> = async {
            browser.navigate(config.urls.login.as_str()).await?;
            let email = browser
                .wait_for(&selectors.email_input, Condition::Present, timeout)
                .await?;
            browser.send_keys(&email[0], &config.credentials.email).await?;
            let password = browser
                .wait_for(&selectors.password_input, Condition::Present, timeout)
                .await?;
            browser
                .send_keys(&password[0], &config.credentials.password)
                .await?;
            let submit = browser
                .wait_for(&selectors.submit_button, Condition::Clickable, timeout)
                .await?;
            browser.click(&submit[0]).await?;
            info!("...waiting for login confirmation");
            browser
                .wait_for(&selectors.login_marker, Condition::Present, timeout)
                .await?;
            Ok(())
        }
        .await;

        match attempt {
            Ok(()) => {
                info!("Login succeeded.");
                session.listing_page = None;
                pause(config.pacing.after_login).await;
                Ok(())
            }
            Err(err @ BrowserError::InvalidSession(_)) => {
                session.mark_crashed();
                Err(err.into())
            }
            Err(err) if err.is_timeout() => Err(Error::Auth(format!(
                "page didn't load in time or the credentials were rejected ({err})"
            ))),
            Err(err) => Err(Error::Auth(err.to_string())),
        }
    }

    pub async fn start_authenticated(&self) -> Result<CrawlSession<L::Browser>> {
        let mut session = self.start().await?;
        if let Err(err) = self.authenticate(&mut session).await {
            self.teardown(session).await;
            return Err(err);
        }
        Ok(session)
    }

    pub async fn is_alive(&self, session: &mut CrawlSession<L::Browser>) -> bool {
        session.browser.is_alive().await
    }

    /// Best effort: quit the browser and delete its profile directory. Errors are
    /// logged and swallowed.
    pub async fn teardown(&self, mut session: CrawlSession<L::Browser>) {
        // A crashed session may still hold a live Chrome process on the driver side.
        if let Err(err) = session.browser.quit().await {
            match session.state {
                SessionState::Crashed => warn!("Couldn't quit the crashed browser: {err}"),
                _ => warn!("Couldn't quit the browser cleanly: {err}"),
            }
        }
        session.state = SessionState::Closed;
        if let Some(profile_dir) = session.profile_dir.take() {
            discard_profile(profile_dir);
        }
        info!("Browser closed.");
    }

    /// Tears `session` down and builds a logged-in replacement. Both crash recovery
    /// and the scheduled recycle end up here.
    pub async fn relaunch(
        &self,
        session: CrawlSession<L::Browser>,
        cause: RelaunchCause,
    ) -> Result<CrawlSession<L::Browser>> {
        match cause {
            RelaunchCause::Scheduled => info!(
                "Session served {} pages. Restarting the browser...",
                session.pages_served
            ),
            RelaunchCause::Crash => error!("Browser crash detected. Trying to recover..."),
        }
        self.teardown(session).await;
        pause(self.config.pacing.recovery).await;

        self.start_authenticated()
            .await
            .map_err(|err| Error::Recovery(Box::new(err)))
    }

    pub async fn recover(
        &self,
        session: CrawlSession<L::Browser>,
    ) -> Result<CrawlSession<L::Browser>> {
        self.relaunch(session, RelaunchCause::Crash).await
    }

    pub async fn recycle(
        &self,
        session: CrawlSession<L::Browser>,
    ) -> Result<CrawlSession<L::Browser>> {
        self.relaunch(session, RelaunchCause::Scheduled).await
    }
}

fn discard_profile(profile_dir: TempDir) {
    let path = profile_dir.path().to_path_buf();
    if let Err(err) = profile_dir.close() {
        warn!("Couldn't remove browser profile {}: {err}", path.display());
    }
}
