use std::fmt;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use fantoccini::error::CmdError;
use fantoccini::{Client, Locator};
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use regex::Regex;
use tracing::info;

use crate::capture;
use crate::challenge;
use crate::parser::Film;
use crate::progress::{ProgressTracker, ResolvedFilm, SkippedFilm};
use crate::session::{self, Session};

const SEARCH_URL: &str = "https://letterboxd.com/search/";
const RESULT_LINK_SELECTOR: &str = "h2.headline-2 span.film-title-wrapper a";
const RATING_SELECTOR: &str = "span.average-rating > a";

const ELEMENT_WAIT: Duration = Duration::from_secs(20);

// Politeness delays, uniform seconds: short ones inside a film's steps,
// longer ones between films.
const STEP_DELAY_SECS: (f64, f64) = (0.0, 15.0);
const FILM_DELAY_SECS: (f64, f64) = (3.0, 30.0);

const SAVE_EVERY_N_FILMS: usize = 10;
const RECYCLE_EVERY_N_FILMS: usize = 50;

// Listing phrases that mark promotional/non-film entries.
const SKIP_PHRASES: &[&str] = &[
    "ace presents",
    "afternoon cartoon",
    "best of nyc",
    "private event today",
    "preceded by",
    "presents",
    "short film program",
    "shorts program",
    "commissary closed",
    "part 1",
    "part 2",
    "for tots",
    "dcp",
];

// Marker the listing site uses in the director line for omnibus programs.
const MULTI_DIRECTOR_MARKER: &str = "multiple dirs";

static QUERY_SANITIZE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]").unwrap());

/// Why a film landed on the skipped stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    MissingData,
    TitleDenylist,
    MultipleDirectors,
    WaitTimeout,
    SessionFault,
    Other(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingData => write!(f, "missing film data"),
            SkipReason::TitleDenylist => write!(f, "skip phrase in title"),
            SkipReason::MultipleDirectors => write!(f, "multiple directors"),
            SkipReason::WaitTimeout => write!(f, "timeout"),
            SkipReason::SessionFault => write!(f, "webdriver error"),
            SkipReason::Other(msg) => write!(f, "error: {}", msg),
        }
    }
}

/// Outcome of one film's resolution. A skip after the search step carries
/// the detail URL that was already found.
pub enum Resolution {
    Resolved(ResolvedFilm),
    Skipped {
        reason: SkipReason,
        detail_url: String,
    },
}

pub struct ResolveStats {
    pub total: usize,
    pub resolved: usize,
    pub skipped: usize,
}

/// The crawl loop: filter out already-processed titles, then resolve the
/// rest one at a time, checkpointing every few films and recycling the
/// browser session on a fixed cadence.
pub async fn resolve_ratings(
    webdriver_url: &str,
    data_dir: &Path,
    films: Vec<Film>,
    limit: Option<usize>,
) -> Result<ResolveStats> {
    let mut tracker = ProgressTracker::load(data_dir)?;

    let mut todo: Vec<Film> = films
        .iter()
        .filter(|f| !tracker.is_processed(&f.title))
        .cloned()
        .collect();
    if let Some(n) = limit {
        todo.truncate(n);
    }

    println!(
        "Total: {}, done: {}, remaining: {}",
        films.len(),
        tracker.processed_count(),
        todo.len()
    );
    if todo.is_empty() {
        println!("All films already processed.");
        return Ok(ResolveStats {
            total: 0,
            resolved: 0,
            skipped: 0,
        });
    }

    let headless = session::is_ci();
    info!(
        "Running in {} mode",
        if headless { "CI/headless" } else { "local/visible" }
    );

    let mut browser = Session::connect(webdriver_url, headless).await?;

    let mut done: Vec<ResolvedFilm> = Vec::new();
    let mut skipped: Vec<SkippedFilm> = Vec::new();
    let mut films_since_recycle = 0usize;

    let pb = ProgressBar::new(todo.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    for (idx, film) in todo.iter().enumerate() {
        let query_title = sanitize_title(&film.title);

        let outcome = match policy_skip(film) {
            Some(reason) => Resolution::Skipped {
                reason,
                detail_url: String::new(),
            },
            None => resolve_film(browser.client(), film, &query_title, headless, data_dir).await,
        };

        match outcome {
            Resolution::Resolved(record) => {
                info!("Resolved {} -> {}", query_title, record.rating);
                done.push(record);
            }
            Resolution::Skipped { reason, detail_url } => {
                info!("Skipped {} ({})", query_title, reason);
                skipped.push(SkippedFilm {
                    film: film.clone(),
                    detail_url,
                });
            }
        }

        rate_limit_delay(FILM_DELAY_SECS).await;

        if (idx + 1) % SAVE_EVERY_N_FILMS == 0 {
            tracker.save(&done, &skipped)?;
        }

        films_since_recycle += 1;
        if films_since_recycle >= RECYCLE_EVERY_N_FILMS && idx + 1 < todo.len() {
            info!("Recycling browser after {} films", films_since_recycle);
            tracker.save(&done, &skipped)?;
            browser = browser.recycle().await?;
            films_since_recycle = 0;
        }

        pb.inc(1);
    }

    pb.finish_and_clear();
    browser.close().await;

    tracker.save(&done, &skipped)?;

    Ok(ResolveStats {
        total: todo.len(),
        resolved: done.len(),
        skipped: skipped.len(),
    })
}

/// Pre-network skip policy. `None` means the film goes to the wire.
fn policy_skip(film: &Film) -> Option<SkipReason> {
    if film.title.is_empty() || film.directors.is_empty() || film.year == 0 {
        return Some(SkipReason::MissingData);
    }

    let lower = film.title.to_lowercase();
    if SKIP_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        return Some(SkipReason::TitleDenylist);
    }

    if film
        .directors
        .iter()
        .any(|d| d.to_lowercase().contains(MULTI_DIRECTOR_MARKER))
    {
        return Some(SkipReason::MultipleDirectors);
    }

    None
}

/// Strip punctuation from a title before it goes into the search query.
fn sanitize_title(title: &str) -> String {
    QUERY_SANITIZE_RE.replace_all(title, "").to_string()
}

/// Search the review site, follow the first result, read its rating. All
/// faults collapse into a Skipped outcome with diagnostics captured; nothing
/// here aborts the run.
async fn resolve_film(
    client: &Client,
    film: &Film,
    query_title: &str,
    headless: bool,
    data_dir: &Path,
) -> Resolution {
    info!("Start resolving {}", query_title);

    let detail_url = match search_step(client, film, query_title, headless, data_dir).await {
        Ok(url) => url,
        Err(e) => {
            return skip_with_diagnostics(client, data_dir, query_title, e, String::new()).await
        }
    };
    info!("Found detail url: {}", detail_url);

    match rating_step(client, &detail_url, headless).await {
        Ok(rating) => Resolution::Resolved(ResolvedFilm {
            film: film.clone(),
            rating,
            detail_url,
        }),
        Err(e) => skip_with_diagnostics(client, data_dir, query_title, e, detail_url).await,
    }
}

/// Navigate to the search page and pull the first result's detail link.
async fn search_step(
    client: &Client,
    film: &Film,
    query_title: &str,
    headless: bool,
    data_dir: &Path,
) -> Result<String> {
    let query = format!("{} {}", query_title, film.year);
    let search_url = format!("{}{}", SEARCH_URL, urlencoding::encode(&query));
    client.goto(&search_url).await?;

    capture::save_screenshot(client, data_dir, query_title, "").await;

    rate_limit_delay(STEP_DELAY_SECS).await;
    challenge::ensure_content(client, headless).await;

    let link = client
        .wait()
        .at_most(ELEMENT_WAIT)
        .for_element(Locator::Css(RESULT_LINK_SELECTOR))
        .await?;
    // prop() resolves relative hrefs against the page.
    link.prop("href")
        .await?
        .context("first search result has no href")
}

/// Navigate to the detail page and read the rating element's text.
async fn rating_step(client: &Client, detail_url: &str, headless: bool) -> Result<String> {
    client.goto(detail_url).await?;

    rate_limit_delay(STEP_DELAY_SECS).await;
    challenge::ensure_content(client, headless).await;

    let rating_el = client
        .wait()
        .at_most(ELEMENT_WAIT)
        .for_element(Locator::Css(RATING_SELECTOR))
        .await?;
    Ok(rating_el.text().await?.trim().to_string())
}

async fn skip_with_diagnostics(
    client: &Client,
    data_dir: &Path,
    query_title: &str,
    e: anyhow::Error,
    detail_url: String,
) -> Resolution {
    capture::save_debug_info(client, data_dir, query_title).await;
    let reason = match e.downcast_ref::<CmdError>() {
        Some(CmdError::WaitTimeout) => SkipReason::WaitTimeout,
        Some(_) => SkipReason::SessionFault,
        None => SkipReason::Other(e.to_string()),
    };
    Resolution::Skipped { reason, detail_url }
}

/// Sleep for a uniformly random duration within the given bounds.
async fn rate_limit_delay((min, max): (f64, f64)) {
    let secs = rand::thread_rng().gen_range(min..=max);
    tracing::debug!("Waiting {:.1}s", secs);
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn film(title: &str, directors: &[&str], year: i32) -> Film {
        Film {
            title: title.to_string(),
            image_url: String::new(),
            directors: directors.iter().map(|d| d.to_string()).collect(),
            synopsis: String::new(),
            year,
        }
    }

    #[test]
    fn missing_fields_skip_by_policy() {
        assert_eq!(
            policy_skip(&film("", &["X"], 1990)),
            Some(SkipReason::MissingData)
        );
        assert_eq!(
            policy_skip(&film("Chinatown", &[], 1974)),
            Some(SkipReason::MissingData)
        );
        assert_eq!(
            policy_skip(&film("Chinatown", &["Roman Polanski"], 0)),
            Some(SkipReason::MissingData)
        );
    }

    #[test]
    fn denylist_phrases_skip_by_policy() {
        assert_eq!(
            policy_skip(&film("Shorts Program: Spring", &["Various"], 2024)),
            Some(SkipReason::TitleDenylist)
        );
        assert_eq!(
            policy_skip(&film("Chinatown preceded by a short", &["X"], 1974)),
            Some(SkipReason::TitleDenylist)
        );
    }

    #[test]
    fn multi_director_marker_skips() {
        assert_eq!(
            policy_skip(&film("Anthology", &["multiple dirs"], 2001)),
            Some(SkipReason::MultipleDirectors)
        );
    }

    #[test]
    fn ordinary_films_pass_policy() {
        assert_eq!(policy_skip(&film("Chinatown", &["Roman Polanski"], 1974)), None);
        // Two named directors are fine; only the marker string skips.
        assert_eq!(
            policy_skip(&film("Fargo", &["Joel Coen", "Ethan Coen"], 1996)),
            None
        );
    }

    #[test]
    fn sanitize_strips_punctuation_keeps_words() {
        assert_eq!(sanitize_title("What's Up, Doc?"), "Whats Up Doc");
        assert_eq!(sanitize_title("8 1/2"), "8 12");
        assert_eq!(sanitize_title("Chinatown"), "Chinatown");
    }

    #[test]
    fn search_query_is_url_encoded() {
        let q = format!("{} {}", sanitize_title("Cléo from 5 to 7"), 1962);
        let url = format!("{}{}", SEARCH_URL, urlencoding::encode(&q));
        assert!(url.starts_with("https://letterboxd.com/search/Cl%C3%A9o%20from"));
    }

    // The end-to-end partition the pipeline guarantees: policy skips never
    // reach the network, and after one pass a fresh tracker sees every title.
    #[test]
    fn one_pass_marks_every_title_processed() {
        let catalog = vec![
            film("Chinatown", &["Roman Polanski"], 1974),
            film("Shorts Program: Spring", &["Various"], 2024),
            film("Orphan Print", &[], 1931),
        ];

        let mut done: Vec<ResolvedFilm> = Vec::new();
        let mut skipped: Vec<SkippedFilm> = Vec::new();
        for f in &catalog {
            match policy_skip(f) {
                Some(_) => skipped.push(SkippedFilm {
                    film: f.clone(),
                    detail_url: String::new(),
                }),
                // Stand-in for a successful wire resolution.
                None => done.push(ResolvedFilm {
                    film: f.clone(),
                    rating: "4.4".to_string(),
                    detail_url: "https://letterboxd.com/film/chinatown/".to_string(),
                }),
            }
        }

        assert!(done.len() <= 1);
        assert!(skipped.len() >= 2);

        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ProgressTracker::load(dir.path()).unwrap();
        tracker.save(&done, &skipped).unwrap();

        let reloaded = ProgressTracker::load(dir.path()).unwrap();
        assert_eq!(reloaded.processed_count(), 3);
        for f in &catalog {
            assert!(reloaded.is_processed(&f.title));
        }
    }
}
