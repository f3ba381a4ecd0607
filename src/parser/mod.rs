pub mod events;
pub mod films;

use serde::{Deserialize, Serialize};

/// One film scraped from the venue's listing page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Film {
    pub title: String,
    pub image_url: String,
    pub directors: Vec<String>,
    pub synopsis: String,
    pub year: i32,
}

/// One entry scraped from the venue's events page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub title: String,
    pub directors: String,
    pub description: String,
    pub time_date: String,
}

/// Concatenate an element's text nodes, one space between non-empty segments.
pub(crate) fn text_of(el: &scraper::ElementRef) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
