use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::parser::{self, Event, Film};

const FILMS_URL: &str = "https://metrograph.com/film/";
const EVENTS_URL: &str = "https://metrograph.com/events/";

const FILMS_HTML: &str = "metrograph.html";
const EVENTS_HTML: &str = "metrograph_events.html";
pub const RAW_FILMS: &str = "raw_films.json";
pub const RAW_EVENTS: &str = "raw_events.json";

const FETCH_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

/// Fetch (or re-read) the listing page and write `raw_films.json`.
pub async fn fetch_films(dir: &Path, cached: bool) -> Result<Vec<Film>> {
    let html = page_html(dir, FILMS_HTML, FILMS_URL, cached).await?;
    let films = parser::films::parse(&html)?;
    write_json(&dir.join(RAW_FILMS), &films)?;
    info!("Wrote {} films to {}", films.len(), RAW_FILMS);
    Ok(films)
}

/// Fetch (or re-read) the events page and write `raw_events.json`.
pub async fn fetch_events(dir: &Path, cached: bool) -> Result<Vec<Event>> {
    let html = page_html(dir, EVENTS_HTML, EVENTS_URL, cached).await?;
    let events = parser::events::parse(&html)?;
    write_json(&dir.join(RAW_EVENTS), &events)?;
    info!("Wrote {} events to {}", events.len(), RAW_EVENTS);
    Ok(events)
}

/// Load the raw films file produced by `fetch`.
pub fn load_films(dir: &Path) -> Result<Vec<Film>> {
    let path = dir.join(RAW_FILMS);
    let json = fs::read_to_string(&path)
        .with_context(|| format!("{} not found - run 'fetch' first", path.display()))?;
    Ok(serde_json::from_str(&json)?)
}

/// Load the raw events file produced by `fetch`.
pub fn load_events(dir: &Path) -> Result<Vec<Event>> {
    let path = dir.join(RAW_EVENTS);
    let json = fs::read_to_string(&path)
        .with_context(|| format!("{} not found - run 'fetch' first", path.display()))?;
    Ok(serde_json::from_str(&json)?)
}

/// Live fetch with cache-busting headers, writing the HTML back as the local
/// cache; `cached` skips the network and reads the previous copy instead.
async fn page_html(dir: &Path, cache_name: &str, url: &str, cached: bool) -> Result<String> {
    let cache_path = dir.join(cache_name);

    if cached {
        info!("Reading cached page {}", cache_path.display());
        return fs::read_to_string(&cache_path)
            .with_context(|| format!("no cached copy at {}", cache_path.display()));
    }

    info!("Fetching {}", url);
    let client = reqwest::Client::new();
    let html = client
        .get(url)
        .header("Cache-Control", "no-cache, no-store, must-revalidate")
        .header("Pragma", "no-cache")
        .header("Expires", "0")
        .header("User-Agent", FETCH_USER_AGENT)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
        .with_context(|| format!("failed to fetch {}", url))?;

    fs::create_dir_all(dir)?;
    fs::write(&cache_path, &html)?;
    Ok(html)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn films_round_trip_through_raw_file() {
        let dir = tempfile::tempdir().unwrap();
        let films = vec![Film {
            title: "Chinatown".into(),
            image_url: "/images/chinatown.jpg".into(),
            directors: vec!["Roman Polanski".into()],
            synopsis: "A private detective.".into(),
            year: 1974,
        }];
        write_json(&dir.path().join(RAW_FILMS), &films).unwrap();

        let loaded = load_films(dir.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].title, "Chinatown");
        assert_eq!(loaded[0].year, 1974);
    }

    #[test]
    fn load_without_fetch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_films(dir.path()).unwrap_err();
        assert!(err.to_string().contains("run 'fetch' first"));
    }
}
