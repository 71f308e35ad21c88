//! Command line / environment configuration, validated once into an immutable
//! [`CrawlConfig`].

use std::path::PathBuf;
use std::time::Duration;

use chrono::Local;
use clap::Parser;
use log::warn;
use url::Url;

use crate::browser::Locator;
use crate::{Error, Result};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "member-sweep",
    about = "Sweep a paginated member directory into CSV and Postgres"
)]
pub struct Cli {
    /// Site account email
    #[arg(long, env = "SKOOL_EMAIL")]
    pub email: String,

    /// Site account password
    #[arg(long, env = "SKOOL_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Stop after this many members (0 = all of them)
    #[arg(long, env = "NUM_MEMBERS", default_value = "0")]
    pub num_members: String,

    /// Postgres connection string (postgres://...)
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: String,

    /// Table receiving one row per member
    #[arg(long, env = "DB_TABLE", default_value = "member_sweep_rows")]
    pub db_table: String,

    /// Create the table automatically if missing
    #[arg(long, env = "PREPARE_TABLE")]
    pub prepare_table: bool,

    #[arg(long, env = "DROPBOX_APP_KEY", hide_env_values = true)]
    pub dropbox_app_key: Option<String>,

    #[arg(long, env = "DROPBOX_APP_SECRET", hide_env_values = true)]
    pub dropbox_app_secret: Option<String>,

    #[arg(long, env = "DROPBOX_REFRESH_TOKEN", hide_env_values = true)]
    pub dropbox_refresh_token: Option<String>,

    /// Don't upload the CSV after the sweep
    #[arg(long)]
    pub skip_upload: bool,

    /// chromedriver endpoint
    #[arg(long, env = "WEBDRIVER_URL", default_value = "http://localhost:9515")]
    pub webdriver_url: String,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    #[arg(long, env = "LOGIN_URL", default_value = "https://www.skool.com/login")]
    pub login_url: String,

    /// First page of the member listing
    #[arg(
        long,
        env = "MEMBERS_URL",
        default_value = "https://www.skool.com/mentoriavipantoecom/-/members"
    )]
    pub members_url: String,

    /// Profiles live at `<profile-base-url>/<handle>?g=<group-slug>`
    #[arg(long, env = "PROFILE_BASE_URL", default_value = "https://www.skool.com")]
    pub profile_base_url: String,

    #[arg(long, env = "GROUP_SLUG", default_value = "mentoriavipantoecom")]
    pub group_slug: String,

    /// Directory receiving the CSV
    #[arg(long, env = "OUTPUT_DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Restart the browser after this many pages
    #[arg(long, env = "MAX_PAGES_PER_SESSION", default_value_t = 10)]
    pub max_pages_per_session: u32,

    /// Consecutive crashes tolerated on one page
    #[arg(long, env = "MAX_RECOVERIES", default_value_t = 3)]
    pub max_recoveries: u32,

    /// Log and record the raw listing text of this member (repeatable)
    #[arg(long = "trace-member")]
    pub trace_members: Vec<String>,

    #[arg(long, env = "TRACE_FILE", default_value = "member_structure_log.jsonl")]
    pub trace_file: PathBuf,
}

impl Cli {
    pub fn into_config(self) -> Result<CrawlConfig> {
        require("SKOOL_EMAIL", &self.email)?;
        require("SKOOL_PASSWORD", &self.password)?;
        require("DATABASE_URL", &self.database_url)?;
        validate_table_name(&self.db_table)?;
        if self.max_pages_per_session == 0 {
            return Err(Error::Config("MAX_PAGES_PER_SESSION must be at least 1".into()));
        }

        let target_count = match self.num_members.trim().parse::<u64>() {
            Ok(count) => count,
            Err(_) => {
                warn!(
                    "NUM_MEMBERS `{}` isn't a number. Processing every member.",
                    self.num_members
                );
                0
            }
        };

        let dropbox = match (
            self.dropbox_app_key,
            self.dropbox_app_secret,
            self.dropbox_refresh_token,
        ) {
            _ if self.skip_upload => None,
            (Some(app_key), Some(app_secret), Some(refresh_token)) => Some(DropboxCredentials {
                app_key,
                app_secret,
                refresh_token,
            }),
            _ => {
                warn!("Dropbox credentials incomplete. The CSV won't be uploaded.");
                None
            }
        };

        let output_dir = std::path::absolute(&self.output_dir)?;
        let output_path = output_dir.join(format!(
            "skool_members_{}.csv",
            Local::now().format("%Y%m%d_%H%M%S")
        ));

        let script_name = std::env::args()
            .next()
            .as_deref()
            .and_then(|arg0| {
                std::path::Path::new(arg0)
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());

        Ok(CrawlConfig {
            credentials: Credentials {
                email: self.email,
                password: self.password,
            },
            urls: SiteUrls {
                login: parse_url("LOGIN_URL", &self.login_url)?,
                members: parse_url("MEMBERS_URL", &self.members_url)?,
                profile_base: parse_url("PROFILE_BASE_URL", &self.profile_base_url)?,
                group_slug: self.group_slug,
            },
            selectors: Selectors::default(),
            target_count,
            max_pages_per_session: self.max_pages_per_session,
            max_recoveries: self.max_recoveries,
            timeouts: Timeouts::default(),
            pacing: Pacing::default(),
            output_path,
            script_name,
            store: StoreConfig {
                database_url: self.database_url,
                table: self.db_table,
                prepare_table: self.prepare_table,
            },
            dropbox,
            webdriver_url: self.webdriver_url,
            headless: !self.headed,
            trace: TraceConfig {
                members: self.trace_members,
                path: self.trace_file,
            },
        })
    }
}

/// Everything a run needs, fixed for its whole duration.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub credentials: Credentials,
    pub urls: SiteUrls,
    pub selectors: Selectors,
    /// Member cap, 0 = unbounded.
    pub target_count: u64,
    pub max_pages_per_session: u32,
    pub max_recoveries: u32,
    pub timeouts: Timeouts,
    pub pacing: Pacing,
    pub output_path: PathBuf,
    pub script_name: String,
    pub store: StoreConfig,
    pub dropbox: Option<DropboxCredentials>,
    pub webdriver_url: String,
    pub headless: bool,
    pub trace: TraceConfig,
}

#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SiteUrls {
    pub login: Url,
    pub members: Url,
    pub profile_base: Url,
    pub group_slug: String,
}

impl SiteUrls {
    /// Listing URL for a 1-based page. Page 1 is the bare URL, later pages carry
    /// `?p=N`. Resuming after a relaunch depends on this exact shape.
    pub fn listing(&self, page: u32) -> String {
        if page <= 1 {
            return self.members.to_string();
        }
        let mut url = self.members.clone();
        url.query_pairs_mut().append_pair("p", &page.to_string());
        url.to_string()
    }

    pub fn profile(&self, handle: &str) -> String {
        let mut url = self.profile_base.clone();
        url.set_path(handle.trim_start_matches('/'));
        url.query_pairs_mut().append_pair("g", &self.group_slug);
        url.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct Selectors {
    pub email_input: Locator,
    pub password_input: Locator,
    pub submit_button: Locator,
    pub login_marker: Locator,
    pub member_item: Locator,
    pub next_button: Locator,
    pub profile_body: Locator,
    pub contribution: Locator,
    pub dropdown_button: Locator,
    pub membership_settings: Locator,
    pub member_email: Locator,
    pub course_tab: Locator,
    /// Plain CSS; matched against the profile page source.
    pub course_title: String,
    /// Plain CSS; matched against the profile page source.
    pub course_progress: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            email_input: Locator::css("#email"),
            password_input: Locator::css("#password"),
            submit_button: Locator::xpath(r#"//button[@type="submit"]"#),
            login_marker: Locator::css(r#"[class*="styled__GroupLogoWrapper"]"#),
            member_item: Locator::css(r#"[class*="styled__MemberItemWrapper-"]"#),
            next_button: Locator::xpath(r#"//button[.//span[contains(text(), "Next")]]"#),
            profile_body: Locator::css("body"),
            contribution: Locator::css(r#"[class*="styled__TypographyWrapper-sc-70zmwu-0 fFYLQx"]"#),
            dropdown_button: Locator::css("button.styled__DropdownButton-sc-13jov82-9"),
            membership_settings: Locator::xpath("//div[contains(text(),'Membership settings')]"),
            member_email: Locator::css(r#"[class*="styled__MembershipInfo-sc-gmyn28-1 etpmnD"] span"#),
            course_tab: Locator::css(".styled__DesktopNavItem-sc-1p35nnr-3.fQvukM"),
            course_title: r#"[class*="styled__CourseTitle"]"#.into(),
            course_progress: r#"[class*="styled__CourseProgress"]"#.into(),
        }
    }
}

/// Bounded waits, one per UI condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub login: Duration,
    pub listing: Duration,
    pub next_page: Duration,
    pub profile: Duration,
    pub contribution: Duration,
    pub dropdown: Duration,
    pub settings: Duration,
    pub course_tab: Duration,
    pub course_list: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            login: Duration::from_secs(20),
            listing: Duration::from_secs(15),
            next_page: Duration::from_secs(10),
            profile: Duration::from_secs(10),
            contribution: Duration::from_secs(5),
            dropdown: Duration::from_secs(5),
            settings: Duration::from_secs(3),
            course_tab: Duration::from_secs(5),
            course_list: Duration::from_secs(5),
        }
    }
}

/// Fixed pauses. Not adaptive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub after_login: Duration,
    pub page_load: Duration,
    pub page_turn: Duration,
    pub member_batch: Duration,
    pub dropdown: Duration,
    pub settings: Duration,
    pub course_tab: Duration,
    pub recovery: Duration,
    pub store_retry: Duration,
    /// Multiplied by the attempt number.
    pub launch_backoff: Duration,
}

impl Pacing {
    pub fn none() -> Self {
        Self {
            after_login: Duration::ZERO,
            page_load: Duration::ZERO,
            page_turn: Duration::ZERO,
            member_batch: Duration::ZERO,
            dropdown: Duration::ZERO,
            settings: Duration::ZERO,
            course_tab: Duration::ZERO,
            recovery: Duration::ZERO,
            store_retry: Duration::ZERO,
            launch_backoff: Duration::ZERO,
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            after_login: Duration::from_secs(2),
            page_load: Duration::from_secs(1),
            page_turn: Duration::from_secs(1),
            member_batch: Duration::from_millis(500),
            dropdown: Duration::from_millis(500),
            settings: Duration::from_secs(1),
            course_tab: Duration::from_secs(2),
            recovery: Duration::from_secs(2),
            store_retry: Duration::from_secs(5),
            launch_backoff: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub table: String,
    pub prepare_table: bool,
}

#[derive(Clone)]
pub struct DropboxCredentials {
    pub app_key: String,
    pub app_secret: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for DropboxCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropboxCredentials")
            .field("app_key", &self.app_key)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub members: Vec<String>,
    pub path: PathBuf,
}

fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Config(format!("{name} is missing")));
    }
    Ok(())
}

fn parse_url(name: &str, value: &str) -> Result<Url> {
    Url::parse(value).map_err(|err| Error::Config(format!("{name} `{value}` is invalid: {err}")))
}

/// `table` or `schema.table`, identifiers only. The name is spliced into SQL.
fn validate_table_name(name: &str) -> Result<()> {
    let valid_ident = |ident: &str| {
        !ident.is_empty()
            && !ident.starts_with(|c: char| c.is_ascii_digit())
            && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    };
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 || !parts.iter().all(|part| valid_ident(part)) {
        return Err(Error::Config(format!("DB_TABLE `{name}` isn't a valid table name")));
    }
    Ok(())
}
