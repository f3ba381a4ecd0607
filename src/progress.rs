use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::parser::Film;

pub const DONE_PROGRESS_FILE: &str = "parsed_films_progress.csv";
pub const DONE_FINAL_FILE: &str = "parsed_films.csv";
pub const SKIPPED_PROGRESS_FILE: &str = "skipped_films_progress.csv";
pub const SKIPPED_FINAL_FILE: &str = "skipped_films.csv";

pub const DONE_HEADER: [&str; 7] = [
    "title",
    "image_url",
    "directors",
    "synopsis",
    "year",
    "rating",
    "detail_url",
];

pub const SKIPPED_HEADER: [&str; 6] = [
    "title",
    "image_url",
    "directors",
    "year",
    "synopsis",
    "detail_url",
];

/// A film whose rating was resolved.
#[derive(Debug, Clone)]
pub struct ResolvedFilm {
    pub film: Film,
    pub rating: String,
    pub detail_url: String,
}

/// A film that was skipped, by policy or by fault. When the search step had
/// already found a detail link before the fault, it is carried along.
#[derive(Debug, Clone)]
pub struct SkippedFilm {
    pub film: Film,
    pub detail_url: String,
}

impl ResolvedFilm {
    fn to_record(&self) -> [String; 7] {
        [
            self.film.title.clone(),
            self.film.image_url.clone(),
            self.film.directors.join(", "),
            self.film.synopsis.clone(),
            self.film.year.to_string(),
            self.rating.clone(),
            self.detail_url.clone(),
        ]
    }
}

impl SkippedFilm {
    fn to_record(&self) -> [String; 6] {
        [
            self.film.title.clone(),
            self.film.image_url.clone(),
            self.film.directors.join(", "),
            self.film.year.to_string(),
            self.film.synopsis.clone(),
            self.detail_url.clone(),
        ]
    }
}

/// Resumable checkpoint state over the done/skipped streams.
///
/// Each stream is written to a file pair - a `_progress` file read back on
/// restart, and a final file kept identical so an interrupted run still
/// leaves valid partial output. Saves append only the rows produced since
/// the previous save.
pub struct ProgressTracker {
    dir: PathBuf,
    already_processed: HashSet<String>,
    first_save: bool,
    flushed_done: usize,
    flushed_skipped: usize,
}

impl ProgressTracker {
    /// Read both progress files (absence is a fresh start); the union of
    /// their title columns becomes the already-processed set.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut already_processed: HashSet<String> =
            read_titles(&dir.join(DONE_PROGRESS_FILE))?.into_iter().collect();
        if already_processed.is_empty() {
            info!("No existing progress found, starting fresh");
        } else {
            info!(
                "Found existing progress: {} films already processed",
                already_processed.len()
            );
        }

        let skipped = read_titles(&dir.join(SKIPPED_PROGRESS_FILE))?;
        if !skipped.is_empty() {
            info!("Found {} previously skipped films", skipped.len());
        }
        already_processed.extend(skipped);

        let first_save = already_processed.is_empty();
        Ok(Self {
            dir: dir.to_path_buf(),
            already_processed,
            first_save,
            flushed_done: 0,
            flushed_skipped: 0,
        })
    }

    pub fn is_processed(&self, title: &str) -> bool {
        self.already_processed.contains(title)
    }

    pub fn processed_count(&self) -> usize {
        self.already_processed.len()
    }

    /// Flush everything beyond the previous save to both file pairs. The
    /// first save of a fresh run truncates and writes headers; every later
    /// save appends rows only. I/O faults here are fatal.
    pub fn save(&mut self, done: &[ResolvedFilm], skipped: &[SkippedFilm]) -> Result<()> {
        let truncate = self.first_save;
        self.first_save = false;

        std::fs::create_dir_all(&self.dir)?;

        let new_done: Vec<[String; 7]> = done[self.flushed_done..]
            .iter()
            .map(ResolvedFilm::to_record)
            .collect();
        if !new_done.is_empty() || truncate {
            for name in [DONE_PROGRESS_FILE, DONE_FINAL_FILE] {
                write_rows(&self.dir.join(name), &DONE_HEADER, &new_done, truncate)?;
            }
        }

        let new_skipped: Vec<[String; 6]> = skipped[self.flushed_skipped..]
            .iter()
            .map(SkippedFilm::to_record)
            .collect();
        if !new_skipped.is_empty() || truncate {
            for name in [SKIPPED_PROGRESS_FILE, SKIPPED_FINAL_FILE] {
                write_rows(&self.dir.join(name), &SKIPPED_HEADER, &new_skipped, truncate)?;
            }
        }

        self.flushed_done = done.len();
        self.flushed_skipped = skipped.len();

        info!(
            "Progress saved: {} done, {} skipped",
            done.len(),
            skipped.len()
        );
        Ok(())
    }
}

/// Row counts (done, skipped) from the progress files, for `stats`.
pub fn stream_counts(dir: &Path) -> Result<(usize, usize)> {
    let done = read_titles(&dir.join(DONE_PROGRESS_FILE))?.len();
    let skipped = read_titles(&dir.join(SKIPPED_PROGRESS_FILE))?.len();
    Ok((done, skipped))
}

fn read_titles(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("could not open {}", path.display()))?;
    let title_idx = reader
        .headers()?
        .iter()
        .position(|h| h == "title")
        .with_context(|| format!("{} has no title column", path.display()))?;

    let mut titles = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(title) = record.get(title_idx) {
            titles.push(title.to_string());
        }
    }
    Ok(titles)
}

fn write_rows<const N: usize>(
    path: &Path,
    header: &[&str; N],
    rows: &[[String; N]],
    truncate: bool,
) -> Result<()> {
    let file = if truncate {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
    } else {
        OpenOptions::new().create(true).append(true).open(path)
    }
    .with_context(|| format!("could not open {}", path.display()))?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if truncate {
        writer.write_record(header)?;
    }
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn film(title: &str) -> Film {
        Film {
            title: title.to_string(),
            image_url: format!("/img/{}.jpg", title),
            directors: vec!["Some Director".to_string()],
            synopsis: "A film.".to_string(),
            year: 1990,
        }
    }

    fn resolved(title: &str) -> ResolvedFilm {
        ResolvedFilm {
            film: film(title),
            rating: "4.2".to_string(),
            detail_url: format!("https://example.com/film/{}/", title),
        }
    }

    fn skipped(title: &str) -> SkippedFilm {
        SkippedFilm {
            film: film(title),
            detail_url: String::new(),
        }
    }

    fn lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(String::from)
            .collect()
    }

    #[test]
    fn fresh_start_writes_headers_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ProgressTracker::load(dir.path()).unwrap();

        tracker.save(&[resolved("A")], &[skipped("B")]).unwrap();
        tracker
            .save(&[resolved("A"), resolved("C")], &[skipped("B")])
            .unwrap();

        let done = lines(&dir.path().join(DONE_PROGRESS_FILE));
        assert_eq!(done.len(), 3); // header + A + C
        assert!(done[0].starts_with("title,"));
        assert!(done[1].starts_with("A,"));
        assert!(done[2].starts_with("C,"));
    }

    #[test]
    fn save_twice_without_new_records_adds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ProgressTracker::load(dir.path()).unwrap();

        let done = vec![resolved("A")];
        let skip = vec![skipped("B")];
        tracker.save(&done, &skip).unwrap();
        tracker.save(&done, &skip).unwrap();

        assert_eq!(lines(&dir.path().join(DONE_FINAL_FILE)).len(), 2);
        assert_eq!(lines(&dir.path().join(SKIPPED_FINAL_FILE)).len(), 2);
    }

    #[test]
    fn progress_and_final_files_stay_identical() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ProgressTracker::load(dir.path()).unwrap();

        tracker.save(&[resolved("A")], &[]).unwrap();
        tracker.save(&[resolved("A"), resolved("B")], &[]).unwrap();

        let progress = std::fs::read_to_string(dir.path().join(DONE_PROGRESS_FILE)).unwrap();
        let fin = std::fs::read_to_string(dir.path().join(DONE_FINAL_FILE)).unwrap();
        assert_eq!(progress, fin);
    }

    #[test]
    fn reload_unions_done_and_skipped_titles() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ProgressTracker::load(dir.path()).unwrap();
        tracker
            .save(&[resolved("A")], &[skipped("B"), skipped("C")])
            .unwrap();

        let reloaded = ProgressTracker::load(dir.path()).unwrap();
        assert_eq!(reloaded.processed_count(), 3);
        assert!(reloaded.is_processed("A"));
        assert!(reloaded.is_processed("B"));
        assert!(reloaded.is_processed("C"));
        assert!(!reloaded.is_processed("D"));
    }

    #[test]
    fn resumed_run_appends_without_second_header() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut tracker = ProgressTracker::load(dir.path()).unwrap();
            tracker.save(&[resolved("A")], &[]).unwrap();
        }
        {
            let mut tracker = ProgressTracker::load(dir.path()).unwrap();
            tracker.save(&[resolved("B")], &[]).unwrap();
        }

        let done = lines(&dir.path().join(DONE_PROGRESS_FILE));
        assert_eq!(done.len(), 3);
        assert_eq!(done.iter().filter(|l| l.starts_with("title,")).count(), 1);
    }

    #[test]
    fn titles_with_commas_survive_the_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ProgressTracker::load(dir.path()).unwrap();
        tracker
            .save(&[resolved("New York, New York")], &[])
            .unwrap();

        let reloaded = ProgressTracker::load(dir.path()).unwrap();
        assert!(reloaded.is_processed("New York, New York"));
    }

    #[test]
    fn empty_fresh_save_still_writes_headers() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ProgressTracker::load(dir.path()).unwrap();
        tracker.save(&[], &[]).unwrap();

        assert_eq!(lines(&dir.path().join(DONE_FINAL_FILE)).len(), 1);
        assert_eq!(lines(&dir.path().join(SKIPPED_FINAL_FILE)).len(), 1);
    }
}
