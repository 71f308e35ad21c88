use chrono::Local;
use log::{debug, error, info, warn};

use crate::browser::ElementId;
use crate::config::CrawlConfig;
use crate::enrich::ProfileEnricher;
use crate::pacing::pause;
use crate::pagination::{DoneReason, PaginationController, PaginationState};
use crate::record::PersistedRow;
use crate::resolve::{resolve, Resolution};
use crate::session::{CrawlSession, Launcher, RelaunchCause, SessionManager};
use crate::sink::{PersistenceSink, RowStore};
use crate::trace::MemberTrace;
use crate::{info_time, Error, Result, MEMBERS_PER_PAUSE};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed(DoneReason),
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub outcome: Outcome,
    pub pages_flushed: u32,
    pub members: u64,
    pub recoveries: u32,
    pub recycles: u32,
}

/// What happened to the page that was just processed.
enum PageStep {
    Next,
    Done,
}

/// Drives one crawl: session, pagination, resolution, enrichment and persistence.
pub struct CrawlOrchestrator<'c, L, S> {
    config: &'c CrawlConfig,
    sessions: SessionManager<'c, L>,
    pagination: PaginationController<'c>,
    enricher: ProfileEnricher<'c>,
    sink: PersistenceSink<S>,
    trace: Option<MemberTrace>,
    pages_flushed: u32,
    recoveries: u32,
    recycles: u32,
}

impl<'c, L: Launcher, S: RowStore> CrawlOrchestrator<'c, L, S> {
    pub fn new(config: &'c CrawlConfig, launcher: L, sink: PersistenceSink<S>) -> Self {
        Self {
            config,
            sessions: SessionManager::new(launcher, config),
            pagination: PaginationController::new(config),
            enricher: ProfileEnricher::new(config),
            sink,
            trace: MemberTrace::new(config.trace.members.clone(), &config.trace.path),
            pages_flushed: 0,
            recoveries: 0,
            recycles: 0,
        }
    }

    pub fn sink(&self) -> &PersistenceSink<S> {
        &self.sink
    }

    pub fn pagination(&self) -> &PaginationController<'c> {
        &self.pagination
    }

    /// Pages written to the sinks so far, whatever the outcome of the run.
    pub fn pages_flushed(&self) -> u32 {
        self.pages_flushed
    }

    /// Runs until the listing ends, the member cap is hit or something fatal
    /// happens. Pages flushed before a fatal error stay flushed.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let start_time = Local::now();
        info_time!("Started the member sweep");
        if self.config.target_count > 0 {
            info!("Target: {} members", self.config.target_count);
        } else {
            info!("Processing every member available");
        }

        let session = self.sessions.start_authenticated().await?;
        let (session, result) = self.sweep(session).await;

        if let Some(mut session) = session {
            if let Err(err) = session.close_profile_window().await {
                warn!("Couldn't close the profile window: {err}");
            }
            self.sessions.teardown(session).await;
        }

        let cursor = *self.pagination.cursor();
        let summary = RunSummary {
            outcome: match self.pagination.state() {
                PaginationState::Done(reason) => Outcome::Completed(reason),
                _ => Outcome::Failed,
            },
            pages_flushed: self.pages_flushed,
            members: cursor.sweep_global_count(),
            recoveries: self.recoveries,
            recycles: self.recycles,
        };
        info_time!(
            start_time,
            "Sweep ended after {} pages and {} members.",
            summary.pages_flushed,
            summary.members
        );
        result.map(|()| summary)
    }

    /// The page loop. Hands the live session back for teardown; there is none when
    /// a relaunch failed.
    async fn sweep(
        &mut self,
        mut session: CrawlSession<L::Browser>,
    ) -> (Option<CrawlSession<L::Browser>>, Result<()>) {
        // Consecutive crashes on the current page.
        let mut crashes = 0;

        loop {
            if self.pagination.check_target() {
                return (Some(session), Ok(()));
            }

            if session.pages_served() >= self.config.max_pages_per_session {
                self.pagination.recovering(RelaunchCause::Scheduled);
                session = match self.sessions.recycle(session).await {
                    Ok(fresh) => fresh,
                    Err(err) => return (None, Err(err)),
                };
                self.recycles += 1;
                info!(
                    "Resuming from page {}...",
                    self.pagination.cursor().page_number()
                );
                continue;
            }

            let page = self.pagination.cursor().page_number();
            let flushed = self.pages_flushed;
            match self.crawl_page(&mut session).await {
                Ok(PageStep::Next) => crashes = 0,
                Ok(PageStep::Done) => return (Some(session), Ok(())),
                Err(err) if err.is_crash() => {
                    session.mark_crashed();
                    if self.pages_flushed > flushed {
                        crashes = 0;
                    }
                    crashes += 1;
                    error!("Browser crash detected on page {page}: {err}");
                    if crashes > self.config.max_recoveries {
                        self.pagination.fail();
                        let err = Error::RecoveryExhausted { page, crashes };
                        error!("{err} Data up to the last completed page is saved.");
                        return (Some(session), Err(err));
                    }

                    self.pagination.recovering(RelaunchCause::Crash);
                    session = match self.sessions.recover(session).await {
                        Ok(fresh) => fresh,
                        Err(err) => return (None, Err(err)),
                    };
                    self.recoveries += 1;
                    info!("Recovered. Retrying page {page}.");
                }
                Err(err) => {
                    self.pagination.fail();
                    error!("Unexpected error in the main loop (page {page}): {err}");
                    return (Some(session), Err(err));
                }
            }
        }
    }

    async fn crawl_page(&mut self, session: &mut CrawlSession<L::Browser>) -> Result<PageStep> {
        let page = self.pagination.cursor().page_number();
        let members = self.pagination.load_listing(session).await?;
        if members.is_empty() {
            self.pagination.finish(DoneReason::EmptyPage);
            return Ok(PageStep::Done);
        }

        let rows = self.scrape_members(session, page, &members).await?;

        let report = self.sink.flush_page(page, &rows).await;
        debug!("Page {page} flushed: {report:?}");
        self.pagination.page_flushed(rows.len());
        self.pages_flushed += 1;
        self.log_progress();

        if self.pagination.check_target() {
            return Ok(PageStep::Done);
        }
        self.pagination.advance(session).await?;
        if self.pagination.is_finished() {
            return Ok(PageStep::Done);
        }
        Ok(PageStep::Next)
    }

    async fn scrape_members(
        &mut self,
        session: &mut CrawlSession<L::Browser>,
        page: u32,
        members: &[ElementId],
    ) -> Result<Vec<PersistedRow>> {
        info!("Page {page}: processing {} members...", members.len());
        let today = Local::now().date_naive();
        let mut rows = Vec::with_capacity(members.len());

        for (i, element) in members.iter().enumerate() {
            let cursor = self.pagination.cursor();
            if cursor.cap_hit(rows.len()) {
                info!("Member cap reached on page {page}, skipping the rest of it.");
                break;
            }
            let global_seq = cursor.next_global_seq(rows.len());
            if i % MEMBERS_PER_PAUSE == 0 {
                pause(self.config.pacing.member_batch).await;
            }

            let block = self.pagination.read_block(session, element).await?;
            if let Some(trace) = &self.trace {
                trace.observe(&block);
            }

            let mut record = match resolve(&block, today) {
                Resolution::Resolved(record) => record,
                Resolution::PartiallyResolved(record, missing) => {
                    warn!(
                        "Member {} on page {page} only partly resolved, missing {missing:?}",
                        i + 1
                    );
                    record
                }
            };
            let profile = self.enricher.enrich(session, &record.handle).await?;
            record.apply_profile(profile);

            rows.push(PersistedRow {
                page,
                page_seq: i + 1,
                global_seq,
                record,
            });
        }

        info!("Processed {} members on page {page}.", rows.len());
        Ok(rows)
    }

    fn log_progress(&self) {
        let cursor = self.pagination.cursor();
        let target = cursor.target_count();
        if target == 0 {
            info!("Progress: {} members", cursor.sweep_global_count());
            return;
        }
        let percent = (cursor.sweep_global_count() * 100 / target).min(100);
        info!(
            "Progress: {}/{target} members ({percent}%)",
            cursor.sweep_global_count()
        );
    }
}
