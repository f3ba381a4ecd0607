use std::time::Duration;

use anyhow::{Context, Result};
use fantoccini::wd::TimeoutConfiguration;
use fantoccini::{Client, ClientBuilder};
use serde_json::json;
use tracing::{info, warn};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// The one live browser session. Recycled periodically by the resolver to
/// bound browser memory growth.
pub struct Session {
    client: Client,
    endpoint: String,
    headless: bool,
}

impl Session {
    /// Connect to the WebDriver endpoint, retrying a few times while the
    /// driver process comes up. Failure here is fatal to the batch.
    pub async fn connect(endpoint: &str, headless: bool) -> Result<Self> {
        info!(
            "Starting new browser session ({})",
            if headless { "headless" } else { "visible" }
        );
        let client = connect_with_retry(endpoint, headless).await?;

        let timeouts = TimeoutConfiguration::new(None, Some(PAGE_LOAD_TIMEOUT), None);
        client
            .update_timeouts(timeouts)
            .await
            .context("failed to set page load timeout")?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            headless,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Tear down and reconnect. Quit faults on the old session are logged
    /// and swallowed; only the fresh connect can fail.
    pub async fn recycle(self) -> Result<Self> {
        let endpoint = self.endpoint.clone();
        let headless = self.headless;
        if let Err(e) = self.client.close().await {
            warn!("Error quitting browser session: {}", e);
        }
        Session::connect(&endpoint, headless).await
    }

    /// Final teardown at the end of a run; never fails.
    pub async fn close(self) {
        if let Err(e) = self.client.close().await {
            warn!("Error quitting browser session: {}", e);
        }
    }
}

async fn connect_with_retry(endpoint: &str, headless: bool) -> Result<Client> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match ClientBuilder::native()
            .capabilities(chrome_capabilities(headless))
            .connect(endpoint)
            .await
        {
            Ok(client) => return Ok(client),
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                warn!(
                    "WebDriver connect attempt {}/{} failed: {}",
                    attempt, CONNECT_ATTEMPTS, e
                );
                tokio::time::sleep(CONNECT_BACKOFF).await;
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("could not reach WebDriver at {}", endpoint))
            }
        }
    }
}

fn chrome_capabilities(headless: bool) -> serde_json::Map<String, serde_json::Value> {
    let mut args = vec![
        "--incognito".to_string(),
        "--disable-blink-features=AutomationControlled".to_string(),
        format!("--user-agent={}", USER_AGENT),
    ];
    if headless {
        args.push("--headless=new".to_string());
        args.push("--window-size=1920,1080".to_string());
    }

    let mut caps = serde_json::Map::new();
    caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));
    caps
}

/// Headless/CI mode: set when GitHub Actions (or any CI) is driving the run.
pub fn is_ci() -> bool {
    let truthy = |var: &str| {
        std::env::var(var)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    };
    truthy("CI") || truthy("GITHUB_ACTIONS")
}

// ── Tests ──
