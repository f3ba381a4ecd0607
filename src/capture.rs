use std::fs;
use std::path::Path;

use fantoccini::Client;
use tracing::{debug, warn};

const SCREENSHOT_DIR: &str = "screenshots";
const PAGE_HTML_DIR: &str = "page_html";
const MAX_NAME_LEN: usize = 50;

/// Screenshot the current browser state into `data/screenshots/`.
/// Best-effort: a capture failure is logged and never affects the caller.
pub async fn save_screenshot(client: &Client, data_dir: &Path, title: &str, prefix: &str) -> bool {
    let dir = data_dir.join(SCREENSHOT_DIR);
    let path = dir.join(format!("{}{}.png", prefix, sanitize_filename(title)));

    let result = async {
        fs::create_dir_all(&dir)?;
        let png = client.screenshot().await?;
        fs::write(&path, png)?;
        anyhow::Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            debug!("Screenshot saved: {}", path.display());
            true
        }
        Err(e) => {
            warn!("Could not save screenshot: {}", e);
            false
        }
    }
}

/// Dump the current page source into `data/page_html/`. Best-effort.
pub async fn save_page_html(client: &Client, data_dir: &Path, title: &str, prefix: &str) -> bool {
    let dir = data_dir.join(PAGE_HTML_DIR);
    let path = dir.join(format!("{}{}.html", prefix, sanitize_filename(title)));

    let result = async {
        fs::create_dir_all(&dir)?;
        let html = client.source().await?;
        fs::write(&path, html)?;
        anyhow::Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            debug!("Page HTML saved: {}", path.display());
            true
        }
        Err(e) => {
            warn!("Could not save page HTML: {}", e);
            false
        }
    }
}

/// Screenshot + page source with an `ERROR_` prefix, for failed films.
pub async fn save_debug_info(client: &Client, data_dir: &Path, title: &str) {
    save_screenshot(client, data_dir, title, "ERROR_").await;
    save_page_html(client, data_dir, title, "ERROR_").await;
}

/// Filesystem-safe name: keep alphanumerics, spaces, dashes, underscores.
pub fn sanitize_filename(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == ' ' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_LEN)
        .collect()
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_special_characters() {
        assert_eq!(sanitize_filename("Cléo from 5 to 7"), "Cl_o from 5 to 7");
        assert_eq!(sanitize_filename("What's Up, Doc?"), "What_s Up_ Doc_");
    }

    #[test]
    fn sanitize_truncates_long_titles() {
        let long = "a".repeat(80);
        assert_eq!(sanitize_filename(&long).len(), MAX_NAME_LEN);
    }

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(sanitize_filename("Part_1 - Redux"), "Part_1 - Redux");
    }
}
