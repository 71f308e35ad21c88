//! Normalized member records and the rows built from them.

use chrono::NaiveDate;
use serde::Serialize;

use crate::{COURSE_CATALOG_SIZE, NOT_AVAILABLE};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseEntry {
    /// 1-based position in the member's course list.
    pub index: usize,
    pub title: String,
    /// Label as shown, e.g. `(45% progress)`.
    pub progress_label: String,
    /// Parsed from the label, 0 when it has no percentage.
    pub progress_percent: u32,
    /// Running sum of `progress_percent` up to and including this course.
    pub cumulative_percent: u32,
    /// `cumulative_percent` over the assumed catalog size, not over the member's own
    /// course count. Exceeds 100 when the sum does; kept as observed.
    pub catalog_percent: f64,
}

impl CourseEntry {
    /// Numbers and accumulates `(title, progress label)` pairs in list order.
    pub fn from_pairs<I>(pairs: I) -> Vec<CourseEntry>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut cumulative = 0;
        pairs
            .into_iter()
            .enumerate()
            .map(|(i, (title, progress_label))| {
                let progress_percent = parse_progress_percent(&progress_label);
                cumulative += progress_percent;
                CourseEntry {
                    index: i + 1,
                    title,
                    progress_label,
                    progress_percent,
                    cumulative_percent: cumulative,
                    catalog_percent: f64::from(cumulative) * 100.0
                        / f64::from(COURSE_CATALOG_SIZE),
                }
            })
            .collect()
    }
}

/// `"(45% progress)"` -> 45. Anything without a `%` is 0.
pub fn parse_progress_percent(label: &str) -> u32 {
    let clean = label.replace(['(', ')'], "").replace(" progress", "");
    let clean = clean.trim();
    if !clean.contains('%') {
        return 0;
    }
    clean.trim_matches('%').trim().parse().unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tenure {
    pub days: i64,
    pub months: i64,
}

impl Tenure {
    pub fn from_days(days: i64) -> Self {
        Self {
            days,
            months: days.div_euclid(30),
        }
    }

    /// Tenure from a `Jan 5, 2024` style join date (an optional `Joined` prefix is
    /// ignored) up to `today`.
    pub fn since(joined_on: &str, today: NaiveDate) -> Option<Self> {
        let date = joined_on.trim().trim_start_matches("Joined").trim();
        let joined = NaiveDate::parse_from_str(date, "%b %d, %Y").ok()?;
        Some(Self::from_days((today - joined).num_days()))
    }
}

/// Course totals carried alongside the per-course columns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CourseSummary {
    pub total_courses: usize,
    pub progress_total: u64,
    pub progress_average: f64,
}

/// One member, realigned and enriched. Fields that couldn't be resolved hold
/// [`NOT_AVAILABLE`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberRecord {
    pub level: String,
    pub display_name: String,
    pub handle: String,
    pub phrase: String,
    pub active_since: String,
    pub joined_on: String,
    pub membership_value: String,
    pub renews_on: String,
    pub location_or_inviter: String,
    pub invited_by: String,
    pub invitation: String,
    pub contribution: String,
    pub email: String,
    pub tenure: Option<Tenure>,
    pub courses: Vec<CourseEntry>,
}

impl Default for MemberRecord {
    fn default() -> Self {
        let na = || NOT_AVAILABLE.to_string();
        Self {
            level: na(),
            display_name: na(),
            handle: na(),
            phrase: na(),
            active_since: na(),
            joined_on: na(),
            membership_value: na(),
            renews_on: na(),
            location_or_inviter: na(),
            invited_by: na(),
            invitation: na(),
            contribution: na(),
            email: na(),
            tenure: None,
            courses: Vec::new(),
        }
    }
}

impl MemberRecord {
    pub fn tenure_days(&self) -> Option<i64> {
        self.tenure.map(|tenure| tenure.days)
    }

    pub fn tenure_months(&self) -> Option<i64> {
        self.tenure.map(|tenure| tenure.months)
    }

    pub fn course_summary(&self) -> CourseSummary {
        let total_courses = self.courses.len();
        let progress_total: u64 = self
            .courses
            .iter()
            .map(|course| u64::from(course.progress_percent))
            .sum();
        let progress_average = if total_courses == 0 {
            0.0
        } else {
            progress_total as f64 / total_courses as f64
        };
        CourseSummary {
            total_courses,
            progress_total,
            progress_average,
        }
    }

    pub fn apply_profile(&mut self, profile: ProfileData) {
        self.email = profile.email;
        self.contribution = profile.contribution;
        self.courses = profile.courses;
    }
}

/// What the profile page yielded for one member.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileData {
    pub email: String,
    pub contribution: String,
    pub courses: Vec<CourseEntry>,
}

impl ProfileData {
    pub fn unavailable() -> Self {
        Self {
            email: NOT_AVAILABLE.to_string(),
            contribution: NOT_AVAILABLE.to_string(),
            courses: Vec::new(),
        }
    }
}

/// Identifies the run on every stored row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMetadata {
    pub script: String,
    pub output_file: String,
}

/// A member ready for the sinks. Written once, never updated.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedRow {
    pub page: u32,
    /// 1-based position on its page.
    pub page_seq: usize,
    /// 1-based position in the whole sweep.
    pub global_seq: u64,
    pub record: MemberRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenure_months_floor_days_over_thirty() {
        for (days, months) in [(0, 0), (29, 0), (30, 1), (59, 1), (60, 2)] {
            assert_eq!(Tenure::from_days(days).months, months, "days = {days}");
        }
    }

    #[test]
    fn tenure_since_join_date() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let tenure = Tenure::since("Jan 5, 2024", today).unwrap();
        assert_eq!(tenure, Tenure { days: 60, months: 2 });
        assert_eq!(Tenure::since("Joined Mar 4, 2024", today).unwrap().days, 1);
        assert_eq!(Tenure::since(NOT_AVAILABLE, today), None);
    }

    #[test]
    fn progress_labels() {
        assert_eq!(parse_progress_percent("(45% progress)"), 45);
        assert_eq!(parse_progress_percent("100%"), 100);
        assert_eq!(parse_progress_percent("Not started"), 0);
        assert_eq!(parse_progress_percent("(abc% progress)"), 0);
    }

    #[test]
    fn courses_accumulate_against_catalog_size() {
        let courses = CourseEntry::from_pairs([
            ("Intro".to_string(), "(100% progress)".to_string()),
            ("Ads".to_string(), "(45% progress)".to_string()),
            ("Ops".to_string(), "Locked".to_string()),
        ]);
        let cumulative: Vec<u32> = courses.iter().map(|c| c.cumulative_percent).collect();
        assert_eq!(cumulative, vec![100, 145, 145]);
        assert_eq!(courses[2].index, 3);
        let expected = 145.0 * 100.0 / f64::from(COURSE_CATALOG_SIZE);
        assert!((courses[1].catalog_percent - expected).abs() < 1e-9);
    }

    #[test]
    fn summary_of_no_courses_is_zero() {
        let record = MemberRecord::default();
        let summary = record.course_summary();
        assert_eq!(summary.total_courses, 0);
        assert_eq!(summary.progress_total, 0);
        assert_eq!(summary.progress_average, 0.0);
    }
}
