use anyhow::Result;
use scraper::{Html, Selector};

use super::{text_of, Event};

/// Parse the events page into event entries.
///
/// Every field is optional on the source markup; missing pieces become
/// empty strings so the merge step can still key on whatever titles exist.
pub fn parse(html: &str) -> Result<Vec<Event>> {
    let doc = Html::parse_document(html);
    let card_sel = Selector::parse("div.homepage-in-theater-movie").unwrap();
    let title_sel = Selector::parse("h4 a.title").unwrap();
    let metadata_sel = Selector::parse("div.film-metadata").unwrap();
    let description_sel = Selector::parse("div.film-description").unwrap();
    let showtime_sel = Selector::parse("div.showtimes a").unwrap();

    let mut events = Vec::new();

    for card in doc.select(&card_sel) {
        let title = card
            .select(&title_sel)
            .next()
            .map(|el| text_of(&el))
            .unwrap_or_default();

        // Metadata line reads "Director Name / Year / Duration / Format";
        // the first segment is the director.
        let directors = card
            .select(&metadata_sel)
            .next()
            .map(|el| text_of(&el))
            .and_then(|t| t.split('/').next().map(|d| d.trim().to_string()))
            .unwrap_or_default();

        let description = card
            .select(&description_sel)
            .next()
            .map(|el| text_of(&el))
            .unwrap_or_default();

        let time_date = card
            .select(&showtime_sel)
            .next()
            .map(|el| text_of(&el))
            .unwrap_or_default();

        events.push(Event {
            title,
            directors,
            description,
            time_date,
        });
    }

    Ok(events)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> String {
        std::fs::read_to_string("tests/fixtures/events_page.html").unwrap()
    }

    #[test]
    fn parses_all_events() {
        let events = parse(&fixture()).unwrap();
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn full_event_fields() {
        let events = parse(&fixture()).unwrap();
        let e = &events[0];
        assert_eq!(e.title, "Chinatown");
        assert_eq!(e.directors, "Roman Polanski");
        assert!(e.description.contains("Q&A"));
        assert_eq!(e.time_date, "Friday June 13, 7:00pm");
    }

    #[test]
    fn director_is_first_metadata_segment() {
        let events = parse(&fixture()).unwrap();
        assert_eq!(events[1].directors, "Agnès Varda");
    }

    #[test]
    fn bare_card_degrades_to_empty() {
        let events = parse(&fixture()).unwrap();
        let e = &events[2];
        assert_eq!(e.title, "");
        assert_eq!(e.directors, "");
        assert_eq!(e.description, "");
        assert_eq!(e.time_date, "");
    }
}
