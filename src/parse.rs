use scraper::{ElementRef, Html, Selector};
use tokio::task::spawn_blocking;

use crate::record::CourseEntry;
use crate::{Error, Result};

/// Attempts to parse a member's course list out of the profile page source.
/// Titles and progress labels are paired in document order; a title without a
/// progress label (or the other way round) is dropped.
pub(crate) async fn parse_courses(
    page_source: String,
    title_selector: String,
    progress_selector: String,
) -> Result<Vec<CourseEntry>> {
    let pairs = spawn_blocking(move || -> Result<Vec<(String, String)>> {
        let doc = Html::parse_document(&page_source);

        let title_selector = create_selector(&title_selector)?;
        let progress_selector = create_selector(&progress_selector)?;

        let titles = doc.select(&title_selector).map(element_text);
        let progresses = doc.select(&progress_selector).map(element_text);
        Ok(titles.zip(progresses).collect())
    })
    .await??;

    Ok(CourseEntry::from_pairs(pairs))
}

#[inline]
fn create_selector(sel_str: &str) -> Result<Selector> {
    Selector::parse(sel_str).map_err(|_| Error::ParseInvalidSelector(sel_str.into()))
}

/// Visible text of an element, whitespace runs collapsed.
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const TITLE: &str = r#"[class*="styled__CourseTitle"]"#;
    const PROGRESS: &str = r#"[class*="styled__CourseProgress"]"#;

    #[tokio::test]
    async fn pairs_titles_with_progress_in_order() {
        let html = r#"
            <html><body>
              <div class="styled__CourseCard-abc">
                <div class="styled__CourseTitle-sc-1 x">Store   setup</div>
                <div class="styled__CourseProgress-sc-2 y">(100% progress)</div>
              </div>
              <div class="unrelated">noise</div>
              <div class="styled__CourseCard-abc">
                <div class="styled__CourseTitle-sc-1 x"><span>Paid</span> ads</div>
                <div class="styled__CourseProgress-sc-2 y">(45% progress)</div>
              </div>
              <div class="styled__CourseTitle-sc-1 x">Orphan title</div>
            </body></html>"#;

        let courses = parse_courses(html.into(), TITLE.into(), PROGRESS.into())
            .await
            .unwrap();

        assert_eq!(courses.len(), 2);
        assert_eq!(courses[0].title, "Store setup");
        assert_eq!(courses[1].title, "Paid ads");
        assert_eq!(courses[1].progress_label, "(45% progress)");
        assert_eq!(courses[1].cumulative_percent, 145);
    }

    #[tokio::test]
    async fn page_without_courses_is_empty() {
        let courses = parse_courses("<html></html>".into(), TITLE.into(), PROGRESS.into())
            .await
            .unwrap();
        assert!(courses.is_empty());
    }

    #[tokio::test]
    async fn bad_selector_is_reported() {
        let err = parse_courses("<html></html>".into(), "[[".into(), PROGRESS.into())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ParseInvalidSelector(sel) if sel == "[["));
    }
}
