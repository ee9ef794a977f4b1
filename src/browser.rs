use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use fantoccini::cookies::Cookie;
use fantoccini::{Client, ClientBuilder, Locator};
use rand::seq::IndexedRandom;
use serde_json::json;
use tracing::{info, warn};

use crate::store::StoredCookie;

/// Simulates human reading: scroll to the bottom before grabbing the source.
pub const SCROLL_TO_BOTTOM: &str = "window.scrollTo(0, document.body.scrollHeight);";

const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
];

/// Automation visibility. `Discreet` runs headless for bulk scraping;
/// `Interactive` shows a window the operator can act in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Posture {
    Discreet,
    Interactive,
}

/// The rendering-engine collaborator: load a URL, run script, hand back the
/// rendered source. Switching posture is a full session teardown and
/// reacquire, not an in-place toggle.
#[async_trait]
pub trait PageEngine: Send {
    async fn open(&mut self, url: &str) -> Result<()>;
    async fn content(&mut self) -> Result<String>;
    async fn execute_script(&mut self, script: &str) -> Result<()>;
    /// Best-effort wait for an element. `false` on timeout; callers proceed
    /// with whatever has rendered.
    async fn wait_for(&mut self, css: &str, timeout: Duration) -> bool;
    async fn set_posture(&mut self, posture: Posture) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// WebDriver-backed session (chromedriver). Each (re)launch picks a fresh
/// user agent.
pub struct Session {
    webdriver_url: String,
    posture: Posture,
    client: Option<Client>,
}

impl Session {
    pub async fn launch(webdriver_url: &str, posture: Posture) -> Result<Self> {
        let client = connect(webdriver_url, posture).await?;
        Ok(Self {
            webdriver_url: webdriver_url.to_string(),
            posture,
            client: Some(client),
        })
    }

    fn client(&mut self) -> Result<&mut Client> {
        self.client
            .as_mut()
            .ok_or_else(|| anyhow!("browser session is closed"))
    }

    /// Restore cookies into the live session. The browser must already be on
    /// the cookie domain for the WebDriver to accept them.
    pub async fn import_cookies(&mut self, cookies: &[StoredCookie]) -> Result<()> {
        let client = self.client()?;
        let mut loaded = 0usize;
        for stored in cookies {
            let mut cookie = Cookie::new(stored.name.clone(), stored.value.clone());
            if let Some(domain) = &stored.domain {
                cookie.set_domain(domain.clone());
            }
            if let Some(path) = &stored.path {
                cookie.set_path(path.clone());
            }
            cookie.set_secure(stored.secure);
            match client.add_cookie(cookie).await {
                Ok(()) => loaded += 1,
                Err(e) => warn!("could not restore cookie {}: {e}", stored.name),
            }
        }
        info!("restored {loaded}/{} cookies", cookies.len());
        Ok(())
    }

    pub async fn export_cookies(&mut self) -> Result<Vec<StoredCookie>> {
        let cookies = self.client()?.get_all_cookies().await?;
        Ok(cookies
            .iter()
            .map(|c| StoredCookie {
                name: c.name().to_string(),
                value: c.value().to_string(),
                domain: c.domain().map(|d| d.to_string()),
                path: c.path().map(|p| p.to_string()),
                secure: c.secure().unwrap_or(false),
            })
            .collect())
    }
}

#[async_trait]
impl PageEngine for Session {
    async fn open(&mut self, url: &str) -> Result<()> {
        self.client()?
            .goto(url)
            .await
            .with_context(|| format!("navigating to {url}"))?;
        Ok(())
    }

    async fn content(&mut self) -> Result<String> {
        Ok(self.client()?.source().await?)
    }

    async fn execute_script(&mut self, script: &str) -> Result<()> {
        self.client()?.execute(script, vec![]).await?;
        Ok(())
    }

    async fn wait_for(&mut self, css: &str, timeout: Duration) -> bool {
        let Ok(client) = self.client() else {
            return false;
        };
        match client
            .wait()
            .at_most(timeout)
            .for_element(Locator::Css(css))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!("element {css} not seen within {timeout:?}: {e}");
                false
            }
        }
    }

    async fn set_posture(&mut self, posture: Posture) -> Result<()> {
        if posture == self.posture && self.client.is_some() {
            return Ok(());
        }
        if let Some(client) = self.client.take() {
            client.close().await?;
        }
        info!("relaunching browser in {posture:?} posture");
        self.client = Some(connect(&self.webdriver_url, posture).await?);
        self.posture = posture;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            client.close().await?;
        }
        Ok(())
    }
}

async fn connect(webdriver_url: &str, posture: Posture) -> Result<Client> {
    let user_agent = *USER_AGENTS
        .choose(&mut rand::rng())
        .expect("user agent pool is non-empty");

    let mut args = vec![
        format!("--user-agent={user_agent}"),
        "--disable-blink-features=AutomationControlled".to_string(),
        "--window-size=1280,1696".to_string(),
    ];
    if posture == Posture::Discreet {
        args.push("--headless=new".to_string());
    }

    let mut caps = serde_json::map::Map::new();
    caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));

    ClientBuilder::native()
        .capabilities(caps)
        .connect(webdriver_url)
        .await
        .with_context(|| format!("connecting to webdriver at {webdriver_url}"))
}
