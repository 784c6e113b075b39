//! Metadata scraping: pull `label → value` pairs out of the metadata table.
//!
//! Each property is rendered as one table row:
//!
//! ```html
//! <tr>
//!   <td><div align="center"><strong><font>Author1</font></strong></div></td>
//!   <td><div align="center"><font>Tagore, Rabindranath</font></div></td>
//! </tr>
//! ```
//!
//! Labels are the emphasised `font` nodes. From each label we climb to the
//! enclosing `tr` and take the first non-empty `td > div > font` in that row.
//! A label whose value cannot be found is skipped.
//!
//! Structural parsing is a capability: [`HtmlTableScraper`] needs the `html`
//! feature, and [`NoopScraper`] stands in when it is unavailable or disabled.
//! Callers pick one once via [`select_scraper`].

use crate::output::BookMetadata;
use std::sync::Arc;

/// Extracts book properties from a metadata page.
pub trait MetadataScraper: Send + Sync {
    /// Scrape `html`; an empty map is a valid result.
    fn scrape(&self, html: &str) -> BookMetadata;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Returns no metadata. Lookups fall back to the reader URL's page count.
pub struct NoopScraper;

impl MetadataScraper for NoopScraper {
    fn scrape(&self, _html: &str) -> BookMetadata {
        BookMetadata::new()
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Pick the scraper for this run.
pub fn select_scraper(enabled: bool) -> Arc<dyn MetadataScraper> {
    if !enabled {
        return Arc::new(NoopScraper);
    }
    #[cfg(feature = "html")]
    {
        Arc::new(HtmlTableScraper)
    }
    #[cfg(not(feature = "html"))]
    {
        tracing::warn!("Built without the `html` feature: book titles and page counts will not be scraped");
        Arc::new(NoopScraper)
    }
}

#[cfg(feature = "html")]
pub use table::HtmlTableScraper;

#[cfg(feature = "html")]
mod table {
    use super::MetadataScraper;
    use crate::output::BookMetadata;
    use once_cell::sync::Lazy;
    use scraper::{ElementRef, Html, Selector};
    use tracing::debug;

    static LABELS: Lazy<Selector> =
        Lazy::new(|| Selector::parse("tr > td > div > strong > font").unwrap());

    /// Structural scraper built on the `scraper` crate.
    pub struct HtmlTableScraper;

    impl MetadataScraper for HtmlTableScraper {
        fn scrape(&self, html: &str) -> BookMetadata {
            let document = Html::parse_document(html);
            let mut metadata = BookMetadata::new();

            for label in document.select(&LABELS) {
                let key: String = label.text().collect();
                match row_value(label) {
                    Some(value) => metadata.insert(&key, &value),
                    None => debug!("No value for book property {:?}", key.trim()),
                }
            }

            metadata
        }

        fn name(&self) -> &'static str {
            "html-table"
        }
    }

    /// Climb font → strong → div → td → tr, then descend to the value cell.
    fn row_value(label: ElementRef<'_>) -> Option<String> {
        let row = label.ancestors().filter_map(ElementRef::wrap).nth(3)?;
        if row.value().name() != "tr" {
            return None;
        }

        children_named(row, "td")
            .flat_map(|td| children_named(td, "div"))
            .flat_map(|div| children_named(div, "font"))
            .map(|font| font.text().collect::<String>())
            .find(|text| !text.trim().is_empty())
    }

    fn children_named<'a>(
        parent: ElementRef<'a>,
        name: &'static str,
    ) -> impl Iterator<Item = ElementRef<'a>> {
        parent
            .children()
            .filter_map(ElementRef::wrap)
            .filter(move |el| el.value().name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "html")]
    const METADATA_PAGE: &str = r##"
<html><body>
<table>
  <tr>
    <td bgcolor="#DDDDDD"><div align="center"><strong><font face="Arial size="2", Helvetica, sans-serif">Title</font></strong></div></td>
    <td bgcolor="#E8EEF7"><div align="center"><font face="Arial  size="2", Helvetica, sans-serif">  The Gardener </font></div></td>
  </tr>
  <tr>
    <td><div align="center"><strong><font>Author1</font></strong></div></td>
    <td><div align="center"><font>Tagore, Rabindranath</font></div></td>
  </tr>
  <tr>
    <td><div align="center"><strong><font>Subject</font></strong></div></td>
    <td><div align="center"><font>   </font></div></td>
  </tr>
  <tr>
    <td><div align="center"><strong><font>Publisher</font></strong></div></td>
    <td>no wrapper</td>
  </tr>
  <tr>
    <td><div align="center"><strong><font>TotalPages</font></strong></div></td>
    <td><div align="center"><font>120</font></div></td>
  </tr>
</table>
<p>Read Online <a href="/scripts/FullindexDefault.htm?path1=/data/1&last=118">here</a></p>
</body></html>"##;

    #[cfg(feature = "html")]
    #[test]
    fn scrapes_label_value_rows() {
        let meta = HtmlTableScraper.scrape(METADATA_PAGE);
        assert_eq!(meta.title(), Some("The Gardener"));
        assert_eq!(meta.author(), Some("Tagore, Rabindranath"));
        assert_eq!(meta.total_pages(), crate::output::PageCount::Known(120));
    }

    #[cfg(feature = "html")]
    #[test]
    fn missing_or_blank_values_are_absent() {
        let meta = HtmlTableScraper.scrape(METADATA_PAGE);
        assert_eq!(meta.get("Subject"), None);
        assert_eq!(meta.get("Publisher"), None);
        assert_eq!(meta.len(), 3);
    }

    #[cfg(feature = "html")]
    #[test]
    fn page_without_table_yields_empty_map() {
        let meta = HtmlTableScraper.scrape("<html><body><p>Server busy</p></body></html>");
        assert!(meta.is_empty());
    }

    #[test]
    fn noop_scraper_is_always_empty() {
        let meta = NoopScraper.scrape("<table><tr><td>anything</td></tr></table>");
        assert!(meta.is_empty());
    }

    #[test]
    fn disabled_selection_is_noop() {
        assert_eq!(select_scraper(false).name(), "noop");
    }

    #[cfg(feature = "html")]
    #[test]
    fn enabled_selection_is_structural() {
        assert_eq!(select_scraper(true).name(), "html-table");
    }
}
