use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::record::PersistedRow;
use crate::{Result, COURSE_SLOTS, NOT_AVAILABLE};

const BASE_COLUMNS: [&str; 20] = [
    "page",
    "page_seq",
    "global_seq",
    "member",
    "level",
    "email",
    "last_active",
    "joined",
    "value",
    "contribution",
    "renews",
    "handle",
    "phrase",
    "location",
    "invited_by",
    "tenure_days",
    "tenure_months",
    "total_courses",
    "progress_total",
    "progress_average",
];

/// The local CSV artifact. Header once at creation, then one append per page.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    /// Truncates `path` and writes the BOM and header.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&path)?;
        file.write_all("\u{FEFF}".as_bytes())?;

        let mut writer = csv::WriterBuilder::new().from_writer(file);
        writer.write_record(csv_header())?;
        writer.flush()?;

        info!("CSV file created: {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `rows` and flushes. Returns the number of rows written.
    pub fn append(&self, rows: &[PersistedRow]) -> Result<usize> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        for row in rows {
            writer.write_record(csv_row(row))?;
        }
        writer.flush()?;

        info!("Added {} rows to the CSV.", rows.len());
        Ok(rows.len())
    }
}

pub fn csv_header() -> Vec<String> {
    let mut header: Vec<String> = BASE_COLUMNS.iter().map(|col| col.to_string()).collect();
    for i in 1..=COURSE_SLOTS {
        header.push(format!("course_{i}_title"));
        header.push(format!("course_{i}_label"));
        header.push(format!("course_{i}_progress"));
    }
    header
}

pub fn csv_row(row: &PersistedRow) -> Vec<String> {
    let record = &row.record;
    let summary = record.course_summary();
    let optional = |value: Option<i64>| {
        value.map_or_else(|| NOT_AVAILABLE.to_string(), |v| v.to_string())
    };

    let mut fields = vec![
        row.page.to_string(),
        row.page_seq.to_string(),
        row.global_seq.to_string(),
        record.display_name.clone(),
        record.level.clone(),
        record.email.clone(),
        record.active_since.clone(),
        record.joined_on.clone(),
        record.membership_value.clone(),
        record.contribution.clone(),
        record.renews_on.clone(),
        record.handle.clone(),
        record.phrase.clone(),
        record.location_or_inviter.clone(),
        record.invited_by.clone(),
        optional(record.tenure_days()),
        optional(record.tenure_months()),
        summary.total_courses.to_string(),
        summary.progress_total.to_string(),
        summary.progress_average.to_string(),
    ];

    if record.courses.len() > COURSE_SLOTS {
        warn!(
            "{} has {} courses, only the first {COURSE_SLOTS} fit in the file.",
            record.display_name,
            record.courses.len()
        );
    }
    for slot in 0..COURSE_SLOTS {
        match record.courses.get(slot) {
            Some(course) => {
                fields.push(course.title.clone());
                fields.push(course.progress_label.clone());
                fields.push(course.progress_percent.to_string());
            }
            None => fields.extend([String::new(), String::new(), String::new()]),
        }
    }
    fields
}
