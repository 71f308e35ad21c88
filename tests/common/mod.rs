#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use clap::Parser;
use member_sweep::browser::{
    Browser, BrowserError, BrowserResult, ElementId, Locator, WindowHandle,
};
use member_sweep::config::{Cli, CrawlConfig, Pacing, Selectors};
use member_sweep::session::Launcher;
use member_sweep::sink::{Cell, RowStore};
use member_sweep::StoreError;

pub const LISTING: &str = "listing";
pub const PROFILE: &str = "profile";

/// Everything the fake site knows and records, shared by every browser it hands out.
#[derive(Default)]
pub struct SiteState {
    /// Member entry texts, one list per listing page.
    pub pages: Vec<Vec<String>>,
    /// Launches that fail with "session not created" before one succeeds.
    pub launch_failures: u32,
    /// Every launch fails with a non-retryable driver error.
    pub launch_broken: bool,
    pub reject_login: bool,
    /// Reading this `(page, index)` entry kills the browser, once.
    pub crash_once_at: Option<(u32, usize)>,
    /// Reading any entry of this page kills the browser, every time.
    pub crash_always_on: Option<u32>,
    /// Reading the first window handle after launch fails.
    pub broken_window_lookup: bool,
    /// Profiles have no dropdown, so the email panel can't be reached.
    pub missing_dropdown: bool,
    /// Profiles have no course tab.
    pub missing_course_tab: bool,
    /// Loading a profile URL fails with a driver error.
    pub broken_profile_page: bool,
    /// Switching to the profile window fails with a driver error.
    pub broken_profile_switch: bool,

    pub launches: u32,
    /// Successful quits.
    pub quits: u32,
    /// Every quit call, including ones on a dead browser.
    pub quit_attempts: u32,
    pub listing_navigations: Vec<String>,
    pub reads: Vec<(u32, usize)>,
    pub profile_dirs: Vec<PathBuf>,
    pub profiles_visited: Vec<String>,
    pub windows_opened: u32,
    pub next_clicks: u32,
}

#[derive(Clone, Default)]
pub struct FakeSite(Arc<Mutex<SiteState>>);

impl FakeSite {
    pub fn with_pages(pages: Vec<Vec<String>>) -> Self {
        let site = FakeSite::default();
        site.state().pages = pages;
        site
    }

    pub fn state(&self) -> MutexGuard<'_, SiteState> {
        self.0.lock().unwrap()
    }

    pub fn launcher(&self) -> FakeLauncher {
        FakeLauncher { site: self.clone() }
    }

    pub fn reads_on(&self, page: u32) -> usize {
        self.state().reads.iter().filter(|(p, _)| *p == page).count()
    }
}

pub struct FakeLauncher {
    site: FakeSite,
}

impl Launcher for FakeLauncher {
    type Browser = FakeBrowser;

    async fn launch(&self, profile_dir: &Path) -> BrowserResult<FakeBrowser> {
        let mut state = self.site.state();
        state.launches += 1;
        state.profile_dirs.push(profile_dir.to_path_buf());
        if state.launch_failures > 0 {
            state.launch_failures -= 1;
            return Err(BrowserError::SessionNotCreated(
                "Chrome failed to start: exited abnormally".into(),
            ));
        }
        if state.launch_broken {
            return Err(BrowserError::Driver {
                code: "unknown error".into(),
                message: "cannot find Chrome binary".into(),
            });
        }
        Ok(FakeBrowser::new(self.site.clone()))
    }
}

/// A scripted browser: listing pages, a next button, a login form and a profile
/// page with one course. Element ids name what they stand for.
pub struct FakeBrowser {
    site: FakeSite,
    selectors: Selectors,
    dead: bool,
    logged_in: bool,
    window: String,
    listing_page: Option<u32>,
    profile_handle: Option<String>,
    stale: Vec<String>,
}

impl FakeBrowser {
    fn new(site: FakeSite) -> Self {
        Self {
            site,
            selectors: Selectors::default(),
            dead: false,
            logged_in: false,
            window: LISTING.into(),
            listing_page: None,
            profile_handle: None,
            stale: Vec::new(),
        }
    }

    fn check(&self) -> BrowserResult<()> {
        if self.dead {
            return Err(BrowserError::InvalidSession("session deleted".into()));
        }
        Ok(())
    }

    pub fn window(&self) -> &str {
        &self.window
    }

    fn on_profile(&self) -> bool {
        self.window == PROFILE && self.profile_handle.is_some()
    }

    fn matching(&self, locator: &Locator) -> Vec<String> {
        let s = &self.selectors;
        let state = self.site.state();
        let one = |id: &str| vec![id.to_string()];

        if *locator == s.email_input {
            one("email")
        } else if *locator == s.password_input {
            one("password")
        } else if *locator == s.submit_button {
            one("submit")
        } else if *locator == s.login_marker {
            if self.logged_in {
                one("marker")
            } else {
                Vec::new()
            }
        } else if *locator == s.member_item {
            match (self.window.as_str(), self.listing_page) {
                (LISTING, Some(page)) => state
                    .pages
                    .get(page as usize - 1)
                    .map(|members| {
                        (0..members.len())
                            .map(|i| format!("member:{page}:{i}"))
                            .collect()
                    })
                    .unwrap_or_default(),
                _ => Vec::new(),
            }
        } else if *locator == s.next_button {
            match (self.window.as_str(), self.listing_page) {
                (LISTING, Some(page)) if (page as usize) < state.pages.len() => {
                    vec![format!("next:{page}")]
                }
                _ => Vec::new(),
            }
        } else if !self.on_profile() {
            Vec::new()
        } else if *locator == s.profile_body {
            one("body")
        } else if *locator == s.contribution {
            one("contribution")
        } else if *locator == s.dropdown_button {
            if state.missing_dropdown {
                Vec::new()
            } else {
                vec!["dropdown:0".into(), "dropdown:1".into()]
            }
        } else if *locator == s.membership_settings {
            one("settings")
        } else if *locator == s.member_email {
            one("member_email")
        } else if *locator == s.course_tab {
            if state.missing_course_tab {
                Vec::new()
            } else {
                one("course_tab")
            }
        } else if *locator == Locator::css(s.course_title.clone()) {
            one("course_title")
        } else {
            Vec::new()
        }
    }
}

impl Browser for FakeBrowser {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        self.check()?;
        if url.contains("/-/members") {
            let page = url
                .split("?p=")
                .nth(1)
                .and_then(|p| p.parse().ok())
                .unwrap_or(1);
            self.site.state().listing_navigations.push(url.to_string());
            self.listing_page = Some(page);
        } else if url.contains("?g=") {
            if self.site.state().broken_profile_page {
                return Err(BrowserError::Driver {
                    code: "unknown error".into(),
                    message: "net::ERR_CONNECTION_RESET".into(),
                });
            }
            let handle = url
                .trim_start_matches("https://www.skool.com/")
                .split('?')
                .next()
                .unwrap_or_default()
                .to_string();
            self.site.state().profiles_visited.push(handle.clone());
            self.profile_handle = Some(handle);
        }
        Ok(())
    }

    async fn current_url(&mut self) -> BrowserResult<String> {
        self.check()?;
        Ok("https://www.skool.com/".into())
    }

    async fn find_all(&mut self, locator: &Locator) -> BrowserResult<Vec<ElementId>> {
        self.check()?;
        Ok(self.matching(locator).into_iter().map(ElementId).collect())
    }

    async fn is_interactable(&mut self, _element: &ElementId) -> BrowserResult<bool> {
        self.check()?;
        Ok(true)
    }

    async fn is_stale(&mut self, element: &ElementId) -> BrowserResult<bool> {
        self.check()?;
        Ok(self.stale.contains(&element.0))
    }

    async fn click(&mut self, element: &ElementId) -> BrowserResult<()> {
        self.check()?;
        if element.0 == "submit" {
            self.logged_in = !self.site.state().reject_login;
        } else if let Some(page) = element.0.strip_prefix("next:") {
            let page: u32 = page.parse().unwrap();
            self.site.state().next_clicks += 1;
            self.stale.push(element.0.clone());
            self.listing_page = Some(page + 1);
        }
        Ok(())
    }

    async fn send_keys(&mut self, _element: &ElementId, _text: &str) -> BrowserResult<()> {
        self.check()
    }

    async fn read_text(&mut self, element: &ElementId) -> BrowserResult<String> {
        self.check()?;
        if let Some(rest) = element.0.strip_prefix("member:") {
            let (page, index) = rest.split_once(':').unwrap();
            let (page, index): (u32, usize) = (page.parse().unwrap(), index.parse().unwrap());

            let mut state = self.site.state();
            state.reads.push((page, index));
            let crash_once = state.crash_once_at == Some((page, index));
            if crash_once {
                state.crash_once_at = None;
            }
            if crash_once || state.crash_always_on == Some(page) {
                self.dead = true;
                return Err(BrowserError::InvalidSession("chrome not reachable".into()));
            }
            return Ok(state.pages[page as usize - 1][index].clone());
        }

        let handle = self.profile_handle.clone().unwrap_or_default();
        match element.0.as_str() {
            "contribution" => Ok("$150".into()),
            "member_email" => Ok(format!("{}@mail.test", handle.trim_start_matches('@'))),
            other => Err(BrowserError::NoSuchElement(other.into())),
        }
    }

    async fn page_source(&mut self) -> BrowserResult<String> {
        self.check()?;
        Ok(r#"<html><body>
            <div class="styled__CourseTitle-sc-1">Store setup</div>
            <div class="styled__CourseProgress-sc-2">(40% progress)</div>
        </body></html>"#
            .into())
    }

    async fn current_window(&mut self) -> BrowserResult<WindowHandle> {
        self.check()?;
        if self.site.state().broken_window_lookup {
            return Err(BrowserError::Driver {
                code: "no such window".into(),
                message: "target window already closed".into(),
            });
        }
        Ok(WindowHandle(LISTING.into()))
    }

    async fn new_window(&mut self) -> BrowserResult<WindowHandle> {
        self.check()?;
        self.site.state().windows_opened += 1;
        Ok(WindowHandle(PROFILE.into()))
    }

    async fn switch_to_window(&mut self, handle: &WindowHandle) -> BrowserResult<()> {
        self.check()?;
        if handle.0 == PROFILE && self.site.state().broken_profile_switch {
            return Err(BrowserError::Driver {
                code: "no such window".into(),
                message: "web view not found".into(),
            });
        }
        self.window = handle.0.clone();
        Ok(())
    }

    async fn close_window(&mut self) -> BrowserResult<()> {
        self.check()?;
        if self.window == PROFILE {
            self.profile_handle = None;
        }
        Ok(())
    }

    async fn quit(&mut self) -> BrowserResult<()> {
        self.site.state().quit_attempts += 1;
        self.check()?;
        self.site.state().quits += 1;
        self.dead = true;
        Ok(())
    }
}

/// Fails the first `connection_failures` inserts with a connection error.
#[derive(Default)]
pub struct FakeStore {
    pub connection_failures: u32,
    pub query_failure: bool,
    pub calls: u32,
    pub inserts: Vec<Vec<Vec<Cell>>>,
}

impl FakeStore {
    pub fn inserted_rows(&self) -> usize {
        self.inserts.iter().map(Vec::len).sum()
    }
}

impl RowStore for FakeStore {
    async fn insert_rows(
        &mut self,
        _table: &str,
        _columns: &[String],
        rows: &[Vec<Cell>],
    ) -> Result<u64, StoreError> {
        self.calls += 1;
        if self.connection_failures > 0 {
            self.connection_failures -= 1;
            return Err(StoreError::Connection("connection refused".into()));
        }
        if self.query_failure {
            return Err(StoreError::Query("column \"email\" does not exist".into()));
        }
        self.inserts.push(rows.to_vec());
        Ok(rows.len() as u64)
    }
}

/// Default configuration with no pauses and the CSV inside `dir`.
pub fn test_config(dir: &Path) -> CrawlConfig {
    let cli = Cli::try_parse_from([
        "member-sweep",
        "--email",
        "bot@example.com",
        "--password",
        "hunter2",
        "--database-url",
        "postgres://localhost/sweep",
        "--skip-upload",
    ])
    .unwrap();
    let mut config = cli.into_config().unwrap();
    config.pacing = Pacing::none();
    config.output_path = dir.join("members.csv");
    config.trace.members.clear();
    config
}

pub fn member_text(name: &str, handle: &str) -> String {
    [
        "7",
        name,
        handle,
        "Chat",
        "Membership",
        "Building my first store",
        "Active 2h ago",
        "Joined Jan 5, 2024",
        "$49/month",
        "Renews in 12 days",
        "Bogotá, Colombia",
    ]
    .join("\n")
}

/// Listing pages with `counts[p]` members on page `p + 1`, each uniquely named.
pub fn listing(counts: &[usize]) -> Vec<Vec<String>> {
    counts
        .iter()
        .enumerate()
        .map(|(p, &count)| {
            (0..count)
                .map(|i| member_text(&format!("Member {}-{i}", p + 1), &format!("@member-{}-{i}", p + 1)))
                .collect()
        })
        .collect()
}

/// Header and data records of a CSV written by the file sink.
pub fn read_csv(path: &Path) -> (Vec<String>, Vec<csv::StringRecord>) {
    let content = std::fs::read_to_string(path).unwrap();
    let content = content
        .strip_prefix('\u{FEFF}')
        .expect("file starts with a BOM");
    let mut reader = csv::Reader::from_reader(content.as_bytes());
    let header = reader.headers().unwrap().iter().map(String::from).collect();
    let records = reader.records().map(Result::unwrap).collect();
    (header, records)
}
