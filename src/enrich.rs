//! Per-member profile lookup in the session's secondary window.

use log::{debug, warn};

use crate::browser::{Browser, BrowserError, BrowserResult, Condition, Locator};
use crate::config::CrawlConfig;
use crate::pacing::pause;
use crate::parse::parse_courses;
use crate::record::ProfileData;
use crate::session::CrawlSession;
use crate::{Result, NOT_AVAILABLE};

pub struct ProfileEnricher<'c> {
    config: &'c CrawlConfig,
}

impl<'c> ProfileEnricher<'c> {
    pub fn new(config: &'c CrawlConfig) -> Self {
        Self { config }
    }

    /// Opens the member's profile in the profile window and pulls email,
    /// contribution and courses. Every step falls back to [`NOT_AVAILABLE`] on its
    /// own; only a dead session is an error. The listing window is active again
    /// when this returns.
    pub async fn enrich<B: Browser>(
        &self,
        session: &mut CrawlSession<B>,
        handle: &str,
    ) -> Result<ProfileData> {
        if handle.is_empty() || handle == NOT_AVAILABLE {
            debug!("No handle, skipping the profile lookup.");
            return Ok(ProfileData::unavailable());
        }
        let url = self.config.urls.profile(handle);

        let profile_window = match session.profile_window().await {
            Ok(handle) => handle,
            Err(err @ BrowserError::InvalidSession(_)) => return Err(err.into()),
            Err(err) => {
                warn!("Couldn't open the profile window: {err}");
                return Ok(ProfileData::unavailable());
            }
        };
        let listing_window = session.listing_window().clone();
        let browser = session.browser_mut();

        let extracted = match browser.switch_to_window(&profile_window).await {
            Ok(()) => self.extract(browser, &url).await,
            Err(err) => Err(err),
        };
        let restored = browser.switch_to_window(&listing_window).await;

        let profile = match extracted {
            Ok(profile) => profile,
            Err(err @ BrowserError::InvalidSession(_)) => return Err(err.into()),
            Err(err) => {
                warn!("Couldn't read profile {url}: {err}");
                ProfileData::unavailable()
            }
        };
        restored?;
        Ok(profile)
    }

    async fn extract<B: Browser>(&self, browser: &mut B, url: &str) -> BrowserResult<ProfileData> {
        let selectors = &self.config.selectors;
        let timeouts = &self.config.timeouts;
        let pacing = &self.config.pacing;
        let mut profile = ProfileData::unavailable();

        let loaded: BrowserResult<()> = async {
            browser.navigate(url).await?;
            browser
                .wait_for(&selectors.profile_body, Condition::Present, timeouts.profile)
                .await?;
            Ok(())
        }
        .await;
        if degrade("profile page", loaded)?.is_none() {
            warn!("Profile didn't load: {url}");
            return Ok(profile);
        }

        let contribution: BrowserResult<String> = async {
            let found = browser
                .wait_for(&selectors.contribution, Condition::Present, timeouts.contribution)
                .await?;
            browser.read_text(&found[0]).await
        }
        .await;
        if let Some(text) = degrade("contribution", contribution)? {
            profile.contribution = text.trim().to_string();
        }

        // The email only shows up in the membership settings panel.
        let email: BrowserResult<Option<String>> = async {
            let buttons = browser
                .wait_for(&selectors.dropdown_button, Condition::Present, timeouts.dropdown)
                .await?;
            if let Some(last) = buttons.last() {
                browser.click(last).await?;
            }
            pause(pacing.dropdown).await;

            let settings = browser
                .wait_for(
                    &selectors.membership_settings,
                    Condition::Clickable,
                    timeouts.settings,
                )
                .await?;
            browser.click(&settings[0]).await?;
            pause(pacing.settings).await;

            match browser.find_all(&selectors.member_email).await?.first() {
                Some(element) => browser.read_text(element).await.map(Some),
                None => Ok(None),
            }
        }
        .await;
        if let Some(Some(text)) = degrade("email", email)? {
            profile.email = text.trim().to_string();
        }

        let course_page: BrowserResult<String> = async {
            let tabs = browser
                .wait_for(&selectors.course_tab, Condition::Present, timeouts.course_tab)
                .await?;
            browser.click(&tabs[0]).await?;
            pause(pacing.course_tab).await;
            browser
                .wait_for(
                    &Locator::css(selectors.course_title.clone()),
                    Condition::Present,
                    timeouts.course_list,
                )
                .await?;
            browser.page_source().await
        }
        .await;
        if let Some(source) = degrade("courses", course_page)? {
            match parse_courses(
                source,
                selectors.course_title.clone(),
                selectors.course_progress.clone(),
            )
            .await
            {
                Ok(courses) => profile.courses = courses,
                Err(err) => warn!("Couldn't parse the course list: {err}"),
            }
        }

        Ok(profile)
    }
}

/// A failed step becomes `None`, except a dead session which is passed on.
fn degrade<T>(step: &str, result: BrowserResult<T>) -> BrowserResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err @ BrowserError::InvalidSession(_)) => Err(err),
        Err(err) if err.is_missing() => {
            debug!("Profile {step} not available: {err}");
            Ok(None)
        }
        Err(err) => {
            warn!("Profile {step} failed: {err}");
            Ok(None)
        }
    }
}
