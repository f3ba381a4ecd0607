use std::time::Duration;

use fantoccini::actions::{InputSource, MouseActions, PointerAction, MOUSE_BUTTON_LEFT};
use fantoccini::error::CmdError;
use fantoccini::{Client, Locator};
use tracing::{debug, info, warn};

// Either the search-results heading or the not-found page counts as content.
const CONTENT_SELECTOR: &str = "h2.headline-2, body.not-found";

const CHALLENGE_IFRAME_SELECTOR: &str = "iframe[src*='turnstile'], iframe[src*='challenge']";

// Page-source keywords that indicate the interstitial is up.
const CHALLENGE_KEYWORDS: &[&str] = &["verify you are human", "turnstile"];

const CONTENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Solving strategies, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Strategy {
    /// Pointer-driven click on the challenge widget. Needs a display, so it
    /// is skipped entirely in headless mode.
    PointerClick,
    /// Direct click on the challenge iframe element.
    IframeClick,
    /// Enter each challenge iframe and fire a synthetic click on whatever
    /// checkbox-like element is inside.
    FrameTraversal,
}

const STRATEGIES: [Strategy; 3] = [
    Strategy::PointerClick,
    Strategy::IframeClick,
    Strategy::FrameTraversal,
];

/// Detect and best-effort resolve an anti-automation interstitial, then wait
/// for page content. Returns whether the content marker appeared; a `false`
/// is non-fatal - the caller's own element wait will fail if the page truly
/// never loaded. Never returns an error.
pub async fn ensure_content(client: &Client, headless: bool) -> bool {
    debug!("Checking for anti-bot challenge");

    if content_present(client).await {
        debug!("No challenge, page already loaded");
        return true;
    }

    if !challenge_present(client).await {
        debug!("No challenge detected, waiting for content");
        return wait_for_content(client).await;
    }

    info!("Challenge detected, attempting to solve");
    for strategy in STRATEGIES {
        if strategy == Strategy::PointerClick && headless {
            debug!("Skipping pointer click (headless mode)");
            continue;
        }
        if attempt(client, strategy).await {
            info!("Challenge strategy {:?} reported success", strategy);
            break;
        }
        debug!("Challenge strategy {:?} failed", strategy);
    }

    debug!("Waiting for page to load after challenge attempt");
    let loaded = wait_for_content(client).await;
    if !loaded {
        warn!("Challenge did not resolve within timeout");
    }
    loaded
}

async fn content_present(client: &Client) -> bool {
    client.find(Locator::Css(CONTENT_SELECTOR)).await.is_ok()
}

async fn challenge_present(client: &Client) -> bool {
    match client.source().await {
        Ok(source) => {
            let lower = source.to_lowercase();
            CHALLENGE_KEYWORDS.iter().any(|kw| lower.contains(kw))
        }
        Err(e) => {
            warn!("Could not read page source: {}", e);
            false
        }
    }
}

async fn wait_for_content(client: &Client) -> bool {
    match client
        .wait()
        .at_most(CONTENT_TIMEOUT)
        .for_element(Locator::Css(CONTENT_SELECTOR))
        .await
    {
        Ok(_) => true,
        Err(CmdError::WaitTimeout) => false,
        Err(e) => {
            warn!("Content wait failed: {}", e);
            false
        }
    }
}

async fn attempt(client: &Client, strategy: Strategy) -> bool {
    match strategy {
        Strategy::PointerClick => pointer_click(client).await,
        Strategy::IframeClick => iframe_click(client).await,
        Strategy::FrameTraversal => frame_traversal_click(client).await,
    }
}

/// Move the pointer to the middle of the challenge widget and click, the way
/// a person would.
async fn pointer_click(client: &Client) -> bool {
    let frame = match client.find(Locator::Css(CHALLENGE_IFRAME_SELECTOR)).await {
        Ok(el) => el,
        Err(e) => {
            debug!("Pointer click: no challenge iframe: {}", e);
            return false;
        }
    };

    let (x, y, w, h) = match frame.rectangle().await {
        Ok(rect) => rect,
        Err(e) => {
            debug!("Pointer click: no widget rectangle: {}", e);
            return false;
        }
    };

    let mouse = MouseActions::new("mouse".to_string())
        .then(PointerAction::MoveTo {
            duration: Some(Duration::from_millis(300)),
            x: (x + w / 2.0) as i64,
            y: (y + h / 2.0) as i64,
        })
        .then(PointerAction::Down {
            button: MOUSE_BUTTON_LEFT,
        })
        .then(PointerAction::Up {
            button: MOUSE_BUTTON_LEFT,
        });

    match client.perform_actions(mouse).await {
        Ok(()) => true,
        Err(e) => {
            debug!("Pointer click failed: {}", e);
            false
        }
    }
}

async fn iframe_click(client: &Client) -> bool {
    let frame = match client.find(Locator::Css(CHALLENGE_IFRAME_SELECTOR)).await {
        Ok(el) => el,
        Err(e) => {
            debug!("Iframe click: no challenge iframe: {}", e);
            return false;
        }
    };
    match frame.click().await {
        Ok(()) => true,
        Err(e) => {
            debug!("Iframe click failed: {}", e);
            false
        }
    }
}

async fn frame_traversal_click(client: &Client) -> bool {
    let frames = match client.find_all(Locator::Css("iframe")).await {
        Ok(frames) => frames,
        Err(e) => {
            debug!("Frame traversal: could not list iframes: {}", e);
            return false;
        }
    };

    for frame in frames {
        let src = frame
            .attr("src")
            .await
            .ok()
            .flatten()
            .unwrap_or_default()
            .to_lowercase();
        if !src.contains("turnstile") && !src.contains("challenge") {
            continue;
        }

        if let Err(e) = frame.enter_frame().await {
            debug!("Frame traversal: could not enter iframe: {}", e);
            continue;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        let clicked = synthetic_checkbox_click(client).await;

        if let Err(e) = client.enter_parent_frame().await {
            warn!("Frame traversal: could not leave iframe: {}", e);
        }
        if clicked {
            return true;
        }
    }
    false
}

async fn synthetic_checkbox_click(client: &Client) -> bool {
    let target = match client
        .find(Locator::Css("input[type='checkbox'], .checkbox, body"))
        .await
    {
        Ok(el) => el,
        Err(e) => {
            debug!("Frame traversal: no clickable element inside iframe: {}", e);
            return false;
        }
    };

    let arg = match serde_json::to_value(&target) {
        Ok(v) => v,
        Err(_) => return false,
    };
    match client.execute("arguments[0].click();", vec![arg]).await {
        Ok(_) => true,
        Err(e) => {
            debug!("Frame traversal: synthetic click failed: {}", e);
            false
        }
    }
}
