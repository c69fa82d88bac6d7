use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::BrowserSession;
use crate::error::Result;
use crate::logging::messages;

/// The parts of a browser cookie worth persisting between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Seconds since the epoch; `None` for session cookies.
    pub expires: Option<f64>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<String>,
}

impl StoredCookie {
    /// Build from a DevTools `Network.Cookie` object.
    pub fn from_cdp(raw: &Value) -> Result<Self> {
        let text = |key: &str| raw.get(key).and_then(Value::as_str).unwrap_or("").to_string();
        let flag = |key: &str| raw.get(key).and_then(Value::as_bool).unwrap_or(false);

        let session = flag("session");
        let expires = raw
            .get("expires")
            .and_then(Value::as_f64)
            .filter(|secs| !session && *secs >= 0.0);

        Ok(Self {
            name: text("name"),
            value: text("value"),
            domain: text("domain"),
            path: text("path"),
            expires,
            http_only: flag("httpOnly"),
            secure: flag("secure"),
            same_site: raw
                .get("sameSite")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    /// Shape accepted by `Network.setCookies`.
    pub fn to_cdp(&self) -> Value {
        let mut param = json!({
            "name": self.name,
            "value": self.value,
            "domain": self.domain,
            "path": self.path,
            "httpOnly": self.http_only,
            "secure": self.secure,
        });
        if let Some(expires) = self.expires {
            param["expires"] = json!(expires);
        }
        if let Some(same_site) = &self.same_site {
            param["sameSite"] = json!(same_site);
        }
        param
    }
}

/// Serialize every cookie of the session to `path`.
///
/// Returns whether the file was written; failures are logged.
pub fn save_cookies<S: BrowserSession + ?Sized>(session: &S, path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    let written = session.cookies().and_then(|cookies| {
        let bytes = bincode::serialize(&cookies)?;
        fs::write(path, bytes)?;
        Ok(cookies.len())
    });

    match written {
        Ok(count) => {
            tracing::info!(path = %path.display(), count, "{}", messages::FILE_WRITE_OK);
            true
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "{}", messages::FILE_WRITE);
            false
        }
    }
}

/// Load the first cookie file matching `{dir}*{term}*` into the session.
///
/// `Ok(false)` when nothing matches. A matching file that cannot be read
/// or decoded is an error.
pub fn load_cookies<S: BrowserSession + ?Sized>(session: &S, dir: &str, term: &str) -> Result<bool> {
    let pattern = format!("{dir}*{term}*");
    let found = match glob::glob(&pattern) {
        Ok(paths) => paths.filter_map(|p| p.ok()).find(|p| p.is_file()),
        Err(e) => {
            tracing::warn!(pattern = %pattern, error = %e, "Invalid cookie file pattern");
            None
        }
    };
    let Some(file) = found else {
        tracing::warn!(pattern = %pattern, "{}", messages::FILE_NOT_FOUND);
        return Ok(false);
    };

    tracing::info!(path = %file.display(), "{}", messages::BROWSER_IMPORT_COOKIES);
    let cookies: Vec<StoredCookie> = bincode::deserialize(&fs::read(&file)?)?;
    for cookie in cookies {
        session.add_cookie(cookie)?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::MockBrowserSession;
    use crate::error::QuatiError;
    use tempfile::TempDir;

    fn sid() -> StoredCookie {
        StoredCookie {
            name: "sid".to_string(),
            value: "abc123".to_string(),
            domain: ".example.com".to_string(),
            path: "/".to_string(),
            expires: Some(1_767_225_600.0),
            http_only: true,
            secure: true,
            same_site: Some("Lax".to_string()),
        }
    }

    #[test]
    fn test_from_cdp_drops_session_expiry() {
        let raw = json!({
            "name": "tmp", "value": "1", "domain": "example.com", "path": "/",
            "expires": -1.0, "size": 4, "httpOnly": false, "secure": false,
            "session": true, "priority": "Medium"
        });
        let cookie = StoredCookie::from_cdp(&raw).expect("parses");
        assert_eq!(cookie.expires, None);
        assert_eq!(cookie.same_site, None);
        assert_eq!(cookie.name, "tmp");
    }

    #[test]
    fn test_to_cdp_omits_missing_fields() {
        let mut cookie = sid();
        cookie.expires = None;
        cookie.same_site = None;
        let param = cookie.to_cdp();
        assert!(param.get("expires").is_none());
        assert!(param.get("sameSite").is_none());
        assert_eq!(param["httpOnly"], json!(true));
    }

    #[test]
    fn test_save_then_load_by_term() {
        let dir = TempDir::new().expect("tempdir");
        let file = dir.path().join("shop_cookies.bin");

        let mut source = MockBrowserSession::new();
        source.expect_cookies().returning(|| Ok(vec![sid()]));
        assert!(save_cookies(&source, &file));

        let mut target = MockBrowserSession::new();
        target
            .expect_add_cookie()
            .withf(|c| *c == sid())
            .times(1)
            .returning(|_| Ok(()));

        let prefix = format!("{}/", dir.path().display());
        assert!(load_cookies(&target, &prefix, "cookies").expect("loads"));
    }

    #[test]
    fn test_load_without_match_reports_false() {
        let dir = TempDir::new().expect("tempdir");
        let target = MockBrowserSession::new();
        let prefix = format!("{}/", dir.path().display());
        assert!(!load_cookies(&target, &prefix, "cookies").expect("no error"));
    }

    #[test]
    fn test_save_failure_reports_false() {
        let mut source = MockBrowserSession::new();
        source
            .expect_cookies()
            .returning(|| Err(QuatiError::Browser(anyhow::anyhow!("tab crashed"))));
        let dir = TempDir::new().expect("tempdir");
        assert!(!save_cookies(&source, dir.path().join("c.bin")));
    }
}
