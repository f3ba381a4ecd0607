use std::sync::LazyLock;

use anyhow::{bail, Result};
use regex::Regex;
use scraper::{Html, Selector};

use super::{text_of, Film};

// The year line reads "1974 / 112min" with an optional trailing "/ format" part.
static YEAR_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(\d{3,4})\s*/\s*\d+\s*min(?:\s*/.*)?$").unwrap());

/// Parse the listing page into film entries.
///
/// A card without a title element fails the whole pass; every other field
/// degrades to an empty/default value.
pub fn parse(html: &str) -> Result<Vec<Film>> {
    let doc = Html::parse_document(html);
    let card_sel = Selector::parse("div.homepage-in-theater-movie").unwrap();
    let title_sel = Selector::parse("h3.movie_title").unwrap();
    let line_sel = Selector::parse("h5").unwrap();
    let synopsis_sel = Selector::parse("p.synopsis").unwrap();
    let img_sel = Selector::parse("img").unwrap();

    let mut films = Vec::new();

    for card in doc.select(&card_sel) {
        let title = match card.select(&title_sel).next() {
            Some(el) => text_of(&el),
            None => bail!("film card #{} has no title element", films.len() + 1),
        };

        let directors = card
            .select(&line_sel)
            .map(|el| text_of(&el))
            .find(|t| t.starts_with("Director"))
            .map(|t| {
                let names = t.splitn(2, ':').nth(1).unwrap_or("").trim().to_string();
                names
                    .split(',')
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let year = card
            .select(&line_sel)
            .map(|el| text_of(&el))
            .find_map(|t| {
                YEAR_LINE_RE
                    .captures(&t)
                    .and_then(|c| c[1].parse::<i32>().ok())
            })
            .unwrap_or(0);

        let synopsis = card
            .select(&synopsis_sel)
            .next()
            .map(|el| text_of(&el))
            .unwrap_or_default();

        let image_url = card
            .select(&img_sel)
            .next()
            .and_then(|el| el.value().attr("src"))
            .unwrap_or_default()
            .to_string();

        films.push(Film {
            title,
            image_url,
            directors,
            synopsis,
            year,
        });
    }

    Ok(films)
}

// ── Tests ──
