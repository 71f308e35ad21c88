//! Page-by-page walk over the member listing.
//!
//! ```text
//! Init -> Listing -> PageReady -> Advancing -> Listing | Done
//!                        |                       ^
//!                        +--> Failed             |
//!  any state --crash--> Recovering --------------+  (same page)
//! ```
//!
//! The [`PageCursor`] lives here and not in the session, so it survives every
//! relaunch. A page only moves the cursor once its rows are flushed.

use std::fmt;

use log::{debug, info, warn};

use crate::browser::{Browser, BrowserError, BrowserResult, Condition, ElementId};
use crate::config::CrawlConfig;
use crate::pacing::pause;
use crate::resolve::RawMemberBlock;
use crate::session::{CrawlSession, RelaunchCause};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    page_number: u32,
    sweep_global_count: u64,
    target_count: u64,
}

impl PageCursor {
    /// Starts on page 1. `target_count` 0 means no cap.
    pub fn new(target_count: u64) -> Self {
        Self {
            page_number: 1,
            sweep_global_count: 0,
            target_count,
        }
    }

    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    /// Members flushed so far in the whole run.
    pub fn sweep_global_count(&self) -> u64 {
        self.sweep_global_count
    }

    pub fn target_count(&self) -> u64 {
        self.target_count
    }

    pub fn target_reached(&self) -> bool {
        self.cap_hit(0)
    }

    /// Whether the cap is reached counting `pending` rows of the current page that
    /// aren't flushed yet.
    pub fn cap_hit(&self, pending: usize) -> bool {
        self.target_count > 0 && self.sweep_global_count + pending as u64 >= self.target_count
    }

    /// Global sequence number of the next member, given `pending` unflushed rows.
    pub fn next_global_seq(&self, pending: usize) -> u64 {
        self.sweep_global_count + pending as u64 + 1
    }

    /// The current page is flushed: count its members and point at the next page.
    pub(crate) fn commit_page(&mut self, members: usize) {
        self.sweep_global_count += members as u64;
        self.page_number += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneReason {
    TargetReached,
    EmptyPage,
    NoNextPage,
}

impl fmt::Display for DoneReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DoneReason::TargetReached => write!(f, "member target reached"),
            DoneReason::EmptyPage => write!(f, "page without members"),
            DoneReason::NoNextPage => write!(f, "no next page"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationState {
    Init,
    Listing,
    PageReady,
    Advancing,
    Recovering(RelaunchCause),
    Done(DoneReason),
    Failed,
}

pub struct PaginationController<'c> {
    config: &'c CrawlConfig,
    cursor: PageCursor,
    state: PaginationState,
}

impl<'c> PaginationController<'c> {
    pub fn new(config: &'c CrawlConfig) -> Self {
        Self {
            config,
            cursor: PageCursor::new(config.target_count),
            state: PaginationState::Init,
        }
    }

    pub fn cursor(&self) -> &PageCursor {
        &self.cursor
    }

    pub fn state(&self) -> PaginationState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, PaginationState::Done(_) | PaginationState::Failed)
    }

    pub(crate) fn finish(&mut self, reason: DoneReason) {
        info!("Pagination finished: {reason}.");
        self.state = PaginationState::Done(reason);
    }

    pub(crate) fn fail(&mut self) {
        self.state = PaginationState::Failed;
    }

    pub(crate) fn recovering(&mut self, cause: RelaunchCause) {
        self.state = PaginationState::Recovering(cause);
    }

    /// Checked before every page.
    pub fn check_target(&mut self) -> bool {
        if self.cursor.target_reached() {
            info!(
                "Target reached ({} members).",
                self.cursor.target_count()
            );
            self.finish(DoneReason::TargetReached);
            return true;
        }
        false
    }

    /// Brings the current page up and returns its member entries. The page is loaded
    /// by URL unless the session already shows it. An empty result means the
    /// listing has no more members.
    pub async fn load_listing<B: Browser>(
        &mut self,
        session: &mut CrawlSession<B>,
    ) -> Result<Vec<ElementId>> {
        let page = self.cursor.page_number;
        self.state = PaginationState::Listing;

        let by_url = session.listing_page() != Some(page);
        if by_url {
            let url = self.config.urls.listing(page);
            info!("Loading page {page} ({url})...");
            session.browser_mut().navigate(&url).await?;
            session.set_listing_page(Some(page));
        } else {
            info!("Page {page}: processing members...");
        }
        pause(self.config.pacing.page_load).await;

        self.state = PaginationState::PageReady;
        let waited = session
            .browser_mut()
            .wait_for(
                &self.config.selectors.member_item,
                Condition::Present,
                self.config.timeouts.listing,
            )
            .await;

        match waited {
            Ok(members) => {
                debug!("Page {page}: {} member entries.", members.len());
                Ok(members)
            }
            Err(err) if err.is_timeout() && by_url => {
                self.fail();
                Err(Error::ListingNeverLoaded(page))
            }
            Err(err) if err.is_timeout() => {
                warn!("Timed out waiting for members on page {page}.");
                Ok(Vec::new())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Reads one member entry. An entry that can't be read becomes an empty block,
    /// which resolves to a record of sentinels.
    pub async fn read_block<B: Browser>(
        &self,
        session: &mut CrawlSession<B>,
        element: &ElementId,
    ) -> Result<RawMemberBlock> {
        match session.browser_mut().read_text(element).await {
            Ok(text) => Ok(RawMemberBlock::from_text(&text)),
            Err(err @ BrowserError::InvalidSession(_)) => Err(err.into()),
            Err(err) => {
                warn!(
                    "Couldn't read a member entry on page {}: {err}",
                    self.cursor.page_number
                );
                Ok(RawMemberBlock::default())
            }
        }
    }

    /// Records a flushed page.
    pub(crate) fn page_flushed(&mut self, members: usize) {
        self.cursor.commit_page(members);
    }

    /// Clicks "next" and waits for the old listing to go away. Without a next control,
    /// or when the click doesn't replace the page in time, the walk is done.
    pub async fn advance<B: Browser>(&mut self, session: &mut CrawlSession<B>) -> Result<()> {
        self.state = PaginationState::Advancing;
        let browser = session.browser_mut();

        let turned: BrowserResult<()> = async {
            let buttons = browser.find_all(&self.config.selectors.next_button).await?;
            let Some(next) = buttons.into_iter().next() else {
                return Err(BrowserError::NoSuchElement(
                    self.config.selectors.next_button.to_string(),
                ));
            };
            browser.click(&next).await?;
            browser
                .wait_until_stale(&next, self.config.timeouts.next_page)
                .await
        }
        .await;

        match turned {
            Ok(()) => {
                pause(self.config.pacing.page_turn).await;
                session.page_turned(self.cursor.page_number);
                self.state = PaginationState::Listing;
                Ok(())
            }
            Err(err @ BrowserError::InvalidSession(_)) => Err(err.into()),
            Err(err) if err.is_missing() => {
                debug!("Next page unavailable: {err}");
                self.finish(DoneReason::NoNextPage);
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_cursor_never_hits_cap() {
        let mut cursor = PageCursor::new(0);
        cursor.commit_page(10_000);
        assert!(!cursor.target_reached());
        assert!(!cursor.cap_hit(500));
    }

    #[test]
    fn cap_counts_pending_rows() {
        let mut cursor = PageCursor::new(25);
        cursor.commit_page(20);
        assert!(!cursor.target_reached());
        assert!(!cursor.cap_hit(4));
        assert!(cursor.cap_hit(5));
        assert_eq!(cursor.next_global_seq(4), 25);
    }

    #[test]
    fn commit_moves_to_next_page() {
        let mut cursor = PageCursor::new(0);
        assert_eq!(cursor.page_number(), 1);
        cursor.commit_page(30);
        assert_eq!(cursor.page_number(), 2);
        assert_eq!(cursor.sweep_global_count(), 30);
    }
}
