use std::ffi::OsStr;
use std::sync::Arc;

use headless_chrome::protocol::cdp::Network::CookieParam;
use headless_chrome::{Browser, LaunchOptions, Tab};

use super::{BrowserSession, LaunchConfig, Platform, StoredCookie};
use crate::error::{QuatiError, Result};
use crate::logging::messages;

const WINDOW_SIZE: (u32, u32) = (1920, 1080);

const CHROME_FLAGS: &[&str] = &[
    "--allow-insecure-localhost",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-gpu",
    "--disable-infobars",
    "--disable-setuid-sandbox",
    "--disable-web-security",
    "--start-maximized",
];

/// A Chrome process with one open tab. Dropping it closes the browser.
pub struct ChromeSession {
    _browser: Browser,
    tab: Arc<Tab>,
}

impl std::fmt::Debug for ChromeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromeSession")
            .field("url", &self.tab.get_url())
            .finish()
    }
}

impl ChromeSession {
    pub fn tab(&self) -> &Arc<Tab> {
        &self.tab
    }
}

fn browser_err(e: impl Into<anyhow::Error>) -> QuatiError {
    QuatiError::Browser(e.into())
}

fn launch_options(platform: Platform, config: &LaunchConfig) -> Result<LaunchOptions<'static>> {
    let path = match (platform.requires_binary(), &config.binary) {
        (true, None) => {
            return Err(QuatiError::Config(format!(
                "{} (required on {platform:?})",
                messages::BROWSER_DRIVER_MISSING
            )));
        }
        (_, binary) => binary.clone(),
    };

    let mut args: Vec<&'static OsStr> = CHROME_FLAGS.iter().map(|f| OsStr::new(*f)).collect();
    if config.muted {
        args.push(OsStr::new("--mute-audio"));
    }

    LaunchOptions::default_builder()
        .headless(config.headless)
        .sandbox(false)
        .ignore_certificate_errors(true)
        .window_size(Some(WINDOW_SIZE))
        .path(path)
        .args(args)
        .build()
        .map_err(|e| QuatiError::Browser(anyhow::anyhow!(e.to_string())))
}

/// Start Chrome and open `target_url`.
///
/// Platform and configuration problems are returned as errors. A browser
/// that fails to start or load the page is logged and yields `Ok(None)`.
pub fn launch(target_url: &str, config: &LaunchConfig) -> Result<Option<ChromeSession>> {
    let platform = Platform::current()?;
    let options = launch_options(platform, config)?;

    tracing::info!(?platform, headless = config.headless, "{}", messages::BROWSER_OPEN);
    let started = Browser::new(options).and_then(|browser| {
        let tab = browser.new_tab()?;
        tab.navigate_to(target_url)?.wait_until_navigated()?;
        Ok(ChromeSession {
            _browser: browser,
            tab,
        })
    });

    match started {
        Ok(session) => {
            tracing::info!(url = target_url, "{}", messages::BROWSER_GO_TO_PAGE);
            Ok(Some(session))
        }
        Err(e) => {
            tracing::error!(error = %e, url = target_url, "{}", messages::BROWSER_ERROR);
            Ok(None)
        }
    }
}

impl BrowserSession for ChromeSession {
    fn navigate(&self, url: &str) -> Result<()> {
        tracing::info!(url, "{}", messages::BROWSER_GO_TO_PAGE);
        self.tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated())
            .map_err(browser_err)?;
        Ok(())
    }

    fn find_element(&self, xpath: &str) -> Result<()> {
        self.tab.find_element_by_xpath(xpath).map_err(browser_err)?;
        Ok(())
    }

    fn click(&self, xpath: &str) -> Result<()> {
        let element = self.tab.find_element_by_xpath(xpath).map_err(browser_err)?;
        element.click().map_err(browser_err)?;
        Ok(())
    }

    fn press_escape(&self) -> Result<()> {
        self.tab.press_key("Escape").map_err(browser_err)?;
        Ok(())
    }

    fn cookies(&self) -> Result<Vec<StoredCookie>> {
        let cookies = self.tab.get_cookies().map_err(browser_err)?;
        cookies
            .iter()
            .map(|c| StoredCookie::from_cdp(&serde_json::to_value(c)?))
            .collect()
    }

    fn add_cookie(&self, cookie: StoredCookie) -> Result<()> {
        let param: CookieParam = serde_json::from_value(cookie.to_cdp())?;
        self.tab.set_cookies(vec![param]).map_err(browser_err)
    }
}
