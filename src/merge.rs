use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::listing;
use crate::parser::{Event, Film};
use crate::progress::{ResolvedFilm, DONE_FINAL_FILE};

pub const MERGED_FILE: &str = "films.csv";

const MERGED_HEADER: [&str; 9] = [
    "title",
    "image_url",
    "directors",
    "synopsis",
    "year",
    "rating",
    "detail_url",
    "event_description",
    "event_time_date",
];

/// One row of the final combined table.
#[derive(Debug, Clone)]
pub struct MergedFilm {
    pub film: ResolvedFilm,
    pub event_description: String,
    pub event_time_date: String,
}

impl MergedFilm {
    fn to_record(&self) -> [String; 9] {
        [
            self.film.film.title.clone(),
            self.film.film.image_url.clone(),
            self.film.film.directors.join(", "),
            self.film.film.synopsis.clone(),
            self.film.film.year.to_string(),
            self.film.rating.clone(),
            self.film.detail_url.clone(),
            self.event_description.clone(),
            self.event_time_date.clone(),
        ]
    }
}

/// Join the resolved-ratings table with the raw events file on exact title
/// and write the final combined table. Returns the number of rows written.
pub fn run(data_dir: &Path) -> Result<usize> {
    let films = read_resolved(&data_dir.join(DONE_FINAL_FILE))?;
    let events = listing::load_events(data_dir)?;

    let merged = join(films, &events);

    let out_path = data_dir.join(MERGED_FILE);
    let mut writer = csv::Writer::from_writer(
        File::create(&out_path).with_context(|| format!("could not write {}", out_path.display()))?,
    );
    writer.write_record(MERGED_HEADER)?;
    for row in &merged {
        writer.write_record(row.to_record())?;
    }
    writer.flush()?;

    info!("Wrote {} merged films to {}", merged.len(), MERGED_FILE);
    Ok(merged.len())
}

/// Catalog-driven join: every resolved film appears once (a duplicate title
/// collapses onto its first slot); events that match no film are dropped;
/// duplicate event titles - last one wins.
pub fn join(films: Vec<ResolvedFilm>, events: &[Event]) -> Vec<MergedFilm> {
    let mut rows: Vec<MergedFilm> = Vec::new();
    let mut index_by_title: HashMap<String, usize> = HashMap::new();

    for film in films {
        match index_by_title.get(&film.film.title) {
            Some(&i) => rows[i].film = film,
            None => {
                index_by_title.insert(film.film.title.clone(), rows.len());
                rows.push(MergedFilm {
                    film,
                    event_description: String::new(),
                    event_time_date: String::new(),
                });
            }
        }
    }

    for event in events {
        if let Some(&i) = index_by_title.get(&event.title) {
            rows[i].event_description = event.description.clone();
            rows[i].event_time_date = event.time_date.clone();
        }
    }

    rows
}

/// Read the resolved-ratings table back from disk.
fn read_resolved(path: &Path) -> Result<Vec<ResolvedFilm>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("{} not found - run 'resolve' first", path.display()))?;

    let mut films = Vec::new();
    for record in reader.records() {
        let r = record?;
        let get = |i: usize| r.get(i).unwrap_or("").to_string();
        let directors: Vec<String> = match r.get(2).unwrap_or("") {
            "" => Vec::new(),
            joined => joined.split(", ").map(String::from).collect(),
        };
        films.push(ResolvedFilm {
            film: Film {
                title: get(0),
                image_url: get(1),
                directors,
                synopsis: get(3),
                year: r.get(4).and_then(|y| y.parse().ok()).unwrap_or(0),
            },
            rating: get(5),
            detail_url: get(6),
        });
    }
    Ok(films)
}

// ── Tests ──
