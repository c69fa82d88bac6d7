//! Browser automation for scraping jobs.
//!
//! Every helper takes the session explicitly. The Chrome driver underneath
//! is synchronous, so these calls block the current thread.

pub mod chrome;
pub mod cookies;

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QuatiError, Result};

#[cfg(test)]
use mockall::automock;

pub use chrome::{ChromeSession, launch};
pub use cookies::{StoredCookie, load_cookies, save_cookies};

const POPUP_PAUSE: Duration = Duration::from_secs(5);
const POPUP_MAX_TRIES: usize = 3;

/// Operating systems the launcher knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Linux,
    MacOs,
}

impl Platform {
    pub fn current() -> Result<Self> {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Result<Self> {
        match os {
            "windows" => Ok(Platform::Windows),
            "linux" => Ok(Platform::Linux),
            "macos" => Ok(Platform::MacOs),
            other => Err(QuatiError::UnsupportedPlatform(other.to_string())),
        }
    }

    /// Windows finds the browser on its own; elsewhere the binary is required.
    pub fn requires_binary(&self) -> bool {
        !matches!(self, Platform::Windows)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub headless: bool,
    pub muted: bool,
    /// Browser executable; mandatory on Linux and macOS.
    pub binary: Option<PathBuf>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            headless: false,
            muted: true,
            binary: None,
        }
    }
}

impl From<&crate::config::BrowserConfig> for LaunchConfig {
    fn from(cfg: &crate::config::BrowserConfig) -> Self {
        Self {
            headless: cfg.headless,
            muted: cfg.muted,
            binary: cfg.binary.clone(),
        }
    }
}

/// What a scraping job needs from an open browser tab.
#[cfg_attr(test, automock)]
pub trait BrowserSession {
    fn navigate(&self, url: &str) -> Result<()>;
    fn find_element(&self, xpath: &str) -> Result<()>;
    fn click(&self, xpath: &str) -> Result<()>;
    fn press_escape(&self) -> Result<()>;
    fn cookies(&self) -> Result<Vec<StoredCookie>>;
    fn add_cookie(&self, cookie: StoredCookie) -> Result<()>;
}

pub fn is_node_present<S: BrowserSession + ?Sized>(session: &S, xpath: &str) -> bool {
    session.find_element(xpath).is_ok()
}

/// How to get rid of an overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dismissal {
    Escape,
    /// Click the first element whose class attribute contains this value.
    ClickClass(String),
}

/// Try up to three times to close the overlay located by `xpath`.
///
/// Returns how many dismissal attempts were made.
pub fn dismiss_popup<S: BrowserSession + ?Sized>(
    session: &S,
    xpath: &str,
    dismissal: &Dismissal,
) -> Result<usize> {
    dismiss_popup_every(session, xpath, dismissal, POPUP_PAUSE)
}

fn dismiss_popup_every<S: BrowserSession + ?Sized>(
    session: &S,
    xpath: &str,
    dismissal: &Dismissal,
    pause: Duration,
) -> Result<usize> {
    let mut attempts = 0;
    while attempts < POPUP_MAX_TRIES && is_node_present(session, xpath) {
        match dismissal {
            Dismissal::Escape => session.press_escape()?,
            Dismissal::ClickClass(class) => {
                session.click(&format!("//*[contains(@class, '{class}')]"))?
            }
        }
        tracing::debug!(xpath, attempt = attempts + 1, "Popup dismissal sent");
        thread::sleep(pause);
        attempts += 1;
    }
    Ok(attempts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    fn missing() -> QuatiError {
        QuatiError::Browser(anyhow::anyhow!("no such element"))
    }

    #[test]
    fn test_platform_dispatch() {
        assert_eq!(Platform::from_os("linux").expect("known"), Platform::Linux);
        assert!(!Platform::from_os("windows").expect("known").requires_binary());
        assert!(Platform::from_os("macos").expect("known").requires_binary());
        assert!(matches!(
            Platform::from_os("freebsd"),
            Err(QuatiError::UnsupportedPlatform(os)) if os == "freebsd"
        ));
    }

    #[test]
    fn test_is_node_present() {
        let mut session = MockBrowserSession::new();
        session
            .expect_find_element()
            .with(eq("//div[@role='dialog']"))
            .returning(|_| Ok(()));
        session
            .expect_find_element()
            .returning(|_| Err(missing()));

        assert!(is_node_present(&session, "//div[@role='dialog']"));
        assert!(!is_node_present(&session, "//span"));
    }

    #[test]
    fn test_dismiss_popup_stops_when_gone() {
        let mut session = MockBrowserSession::new();
        let mut seq = mockall::Sequence::new();
        session
            .expect_find_element()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        session
            .expect_press_escape()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        session
            .expect_find_element()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(missing()));

        let attempts =
            dismiss_popup_every(&session, "//dialog", &Dismissal::Escape, Duration::ZERO)
                .expect("ok");
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_dismiss_popup_gives_up_after_three() {
        let mut session = MockBrowserSession::new();
        session.expect_find_element().returning(|_| Ok(()));
        session
            .expect_click()
            .with(eq("//*[contains(@class, 'close-btn')]"))
            .times(3)
            .returning(|_| Ok(()));

        let attempts = dismiss_popup_every(
            &session,
            "//dialog",
            &Dismissal::ClickClass("close-btn".to_string()),
            Duration::ZERO,
        )
        .expect("ok");
        assert_eq!(attempts, 3);
    }
}
