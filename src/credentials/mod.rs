//! Credential resolution for privileged caption requests
//!
//! A token is looked up through an ordered chain of providers: an explicit
//! value, then the `BILIBILI_SESSDATA` environment variable, then the cookie
//! stores of installed browsers. The first provider that yields a token wins.
//! Token values are never logged; only their [`CredentialSource`] is.

use serde::Serialize;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

pub mod browser;
pub mod cipher;

pub use browser::{system_store, ChromiumCookieStore, CookieStore, FirefoxCookieStore};
pub use cipher::CookieCipher;

use crate::{CaptionError, Result};

/// Environment variable consulted after the explicit value
pub const SESSDATA_ENV: &str = "BILIBILI_SESSDATA";

/// Cookie domain holding the Bilibili session
pub const BILIBILI_COOKIE_DOMAIN: &str = ".bilibili.com";

/// Name of the Bilibili session cookie
pub const SESSDATA_COOKIE: &str = "SESSDATA";

/// Browsers whose cookie stores can be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    Chrome,
    Edge,
    Brave,
    Firefox,
    Opera,
}

impl Browser {
    /// Order in which browsers are tried in `auto` mode
    pub const AUTO_ORDER: [Browser; 5] = [
        Browser::Chrome,
        Browser::Edge,
        Browser::Brave,
        Browser::Firefox,
        Browser::Opera,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chrome => "chrome",
            Browser::Edge => "edge",
            Browser::Brave => "brave",
            Browser::Firefox => "firefox",
            Browser::Opera => "opera",
        }
    }
}

impl std::fmt::Display for Browser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Browser {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chrome" | "chromium" => Ok(Browser::Chrome),
            "edge" => Ok(Browser::Edge),
            "brave" => Ok(Browser::Brave),
            "firefox" => Ok(Browser::Firefox),
            "opera" => Ok(Browser::Opera),
            other => Err(CaptionError::InvalidReference(format!(
                "unknown browser '{}' (expected auto, chrome, edge, brave, firefox, opera or none)",
                other
            ))
            .into()),
        }
    }
}

/// Which browser cookie stores may be consulted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrowserPreference {
    /// Try every supported browser in [`Browser::AUTO_ORDER`]
    #[default]
    Auto,
    /// Try one browser only
    Only(Browser),
    /// Never read browser cookies
    Disabled,
}

impl BrowserPreference {
    pub fn candidates(&self) -> Vec<Browser> {
        match self {
            BrowserPreference::Auto => Browser::AUTO_ORDER.to_vec(),
            BrowserPreference::Only(browser) => vec![*browser],
            BrowserPreference::Disabled => Vec::new(),
        }
    }

    /// The explicitly named browser, if any
    pub fn named(&self) -> Option<Browser> {
        match self {
            BrowserPreference::Only(browser) => Some(*browser),
            _ => None,
        }
    }
}

impl std::fmt::Display for BrowserPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrowserPreference::Auto => f.write_str("auto"),
            BrowserPreference::Only(browser) => f.write_str(browser.as_str()),
            BrowserPreference::Disabled => f.write_str("none"),
        }
    }
}

impl std::str::FromStr for BrowserPreference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "auto" => Ok(BrowserPreference::Auto),
            "none" | "off" | "disabled" | "false" => Ok(BrowserPreference::Disabled),
            other => Ok(BrowserPreference::Only(other.parse()?)),
        }
    }
}

/// Where a resolved token came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    Explicit,
    EnvironmentVariable,
    Browser(Browser),
}

impl std::fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialSource::Explicit => f.write_str("explicit"),
            CredentialSource::EnvironmentVariable => write!(f, "env:{}", SESSDATA_ENV),
            CredentialSource::Browser(browser) => write!(f, "browser:{}", browser),
        }
    }
}

/// A resolved token together with its provenance
#[derive(Clone)]
pub struct Credential {
    pub token: String,
    pub source: CredentialSource,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &redact(&self.token))
            .field("source", &self.source)
            .finish()
    }
}

/// Redacted preview of a secret for display
pub fn redact(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() < 12 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

/// Last browser that yielded a cookie.
///
/// Shared across requests as a diagnostic hint only; concurrent writers may
/// race and a stale value is harmless.
#[derive(Debug, Clone, Default)]
pub struct BrowserHint(Arc<RwLock<Option<Browser>>>);

impl BrowserHint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, browser: Browser) {
        if let Ok(mut slot) = self.0.write() {
            *slot = Some(browser);
        }
    }

    pub fn last(&self) -> Option<Browser> {
        self.0.read().ok().and_then(|slot| *slot)
    }
}

/// One link in the resolution chain
pub trait CredentialProvider: Send + Sync {
    fn describe(&self) -> String;

    fn lookup(&self) -> Option<Credential>;
}

/// Value handed in by the caller
pub struct ExplicitValue(Option<String>);

impl ExplicitValue {
    pub fn new(value: Option<String>) -> Self {
        Self(value)
    }
}

impl CredentialProvider for ExplicitValue {
    fn describe(&self) -> String {
        "explicit value".to_string()
    }

    fn lookup(&self) -> Option<Credential> {
        self.0
            .as_ref()
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(|token| Credential {
                token: token.to_string(),
                source: CredentialSource::Explicit,
            })
    }
}

/// Token read from an environment variable
pub struct EnvironmentVariable {
    var: String,
}

impl EnvironmentVariable {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialProvider for EnvironmentVariable {
    fn describe(&self) -> String {
        format!("environment variable {}", self.var)
    }

    fn lookup(&self) -> Option<Credential> {
        std::env::var(&self.var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(|token| Credential {
                token,
                source: CredentialSource::EnvironmentVariable,
            })
    }
}

/// Cookie read from browser stores in preference order
pub struct BrowserCookies {
    preference: BrowserPreference,
    stores: Vec<Arc<dyn CookieStore>>,
    domain: String,
    cookie_name: String,
    hint: BrowserHint,
}

impl BrowserCookies {
    /// Bilibili SESSDATA from the system's browser profiles
    pub fn bilibili(preference: BrowserPreference, hint: BrowserHint) -> Self {
        let stores: Vec<Arc<dyn CookieStore>> = preference
            .candidates()
            .into_iter()
            .map(|browser| Arc::from(system_store(browser)))
            .collect();
        Self::with_stores(preference, stores, hint)
    }

    pub fn with_stores(
        preference: BrowserPreference,
        stores: Vec<Arc<dyn CookieStore>>,
        hint: BrowserHint,
    ) -> Self {
        Self {
            preference,
            stores,
            domain: BILIBILI_COOKIE_DOMAIN.to_string(),
            cookie_name: SESSDATA_COOKIE.to_string(),
            hint,
        }
    }
}

impl CredentialProvider for BrowserCookies {
    fn describe(&self) -> String {
        format!("browser cookies ({})", self.preference)
    }

    fn lookup(&self) -> Option<Credential> {
        for browser in self.preference.candidates() {
            let Some(store) = self.stores.iter().find(|s| s.browser() == browser) else {
                continue;
            };

            match store.read_cookie(&self.domain, &self.cookie_name) {
                Ok(Some(token)) if !token.is_empty() => {
                    self.hint.record(browser);
                    return Some(Credential {
                        token,
                        source: CredentialSource::Browser(browser),
                    });
                }
                Ok(_) => debug!("{} has no {} cookie", browser, self.cookie_name),
                Err(e) => debug!("Could not read {} cookies: {:#}", browser, e),
            }
        }

        None
    }
}

/// Ordered provider chain; the first hit wins
#[derive(Clone)]
pub struct CredentialResolver {
    providers: Vec<Arc<dyn CredentialProvider>>,
    hint: BrowserHint,
}

impl CredentialResolver {
    /// Standard chain: explicit value, `BILIBILI_SESSDATA`, browser cookies
    pub fn new(explicit: Option<String>, browser: BrowserPreference, hint: BrowserHint) -> Self {
        let mut providers: Vec<Arc<dyn CredentialProvider>> = vec![
            Arc::new(ExplicitValue::new(explicit)),
            Arc::new(EnvironmentVariable::new(SESSDATA_ENV)),
        ];
        if browser != BrowserPreference::Disabled {
            providers.push(Arc::new(BrowserCookies::bilibili(browser, hint.clone())));
        }

        Self { providers, hint }
    }

    pub fn from_providers(providers: Vec<Arc<dyn CredentialProvider>>, hint: BrowserHint) -> Self {
        Self { providers, hint }
    }

    pub fn resolve_credential(&self) -> Option<Credential> {
        for provider in &self.providers {
            if let Some(credential) = provider.lookup() {
                info!("Using credential from {}", credential.source);
                return Some(credential);
            }
            debug!("No credential from {}", provider.describe());
        }
        None
    }

    /// Token and its source, or `(None, None)`
    pub fn resolve(&self) -> (Option<String>, Option<CredentialSource>) {
        match self.resolve_credential() {
            Some(c) => (Some(c.token), Some(c.source)),
            None => (None, None),
        }
    }

    /// Like [`resolve_credential`](Self::resolve_credential) but fails with
    /// instructions when nothing is found
    pub fn require(&self) -> Result<Credential> {
        if let Some(credential) = self.resolve_credential() {
            return Ok(credential);
        }

        let mut message = format!(
            "no Bilibili SESSDATA found. Provide it in one of these ways:\n  \
             1. pass it explicitly (--sessdata, or bilibili.sessdata in config.yaml)\n  \
             2. set the {} environment variable\n  \
             3. log in to bilibili.com in Chrome, Edge, Brave or Firefox (read automatically)",
            SESSDATA_ENV
        );
        if let Some(browser) = self.hint.last() {
            message.push_str(&format!("\n(cookies were last found in {})", browser));
        }

        Err(CaptionError::NoCredential(message).into())
    }
}

/// Resolve a Bilibili token with the standard chain
pub fn resolve_credential(
    explicit: Option<String>,
    browser: BrowserPreference,
) -> (Option<String>, Option<CredentialSource>) {
    CredentialResolver::new(explicit, browser, BrowserHint::new()).resolve()
}

/// Resolve a Bilibili token or fail with a configuration error
pub fn require_credential(explicit: Option<String>, browser: BrowserPreference) -> Result<Credential> {
    CredentialResolver::new(explicit, browser, BrowserHint::new()).require()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    struct FixedStore {
        browser: Browser,
        value: Option<&'static str>,
    }

    impl CookieStore for FixedStore {
        fn browser(&self) -> Browser {
            self.browser
        }

        fn read_cookie(&self, _domain: &str, _name: &str) -> Result<Option<String>> {
            Ok(self.value.map(|v| v.to_string()))
        }
    }

    struct BrokenStore(Browser);

    impl CookieStore for BrokenStore {
        fn browser(&self) -> Browser {
            self.0
        }

        fn read_cookie(&self, _domain: &str, _name: &str) -> Result<Option<String>> {
            anyhow::bail!("database is locked")
        }
    }

    fn chain(
        explicit: Option<&str>,
        env_var: &str,
        preference: BrowserPreference,
        stores: Vec<Arc<dyn CookieStore>>,
        hint: BrowserHint,
    ) -> CredentialResolver {
        CredentialResolver::from_providers(
            vec![
                Arc::new(ExplicitValue::new(explicit.map(String::from))),
                Arc::new(EnvironmentVariable::new(env_var)),
                Arc::new(BrowserCookies::with_stores(preference, stores, hint.clone())),
            ],
            hint,
        )
    }

    fn chrome_with(value: &'static str) -> Arc<dyn CookieStore> {
        Arc::new(FixedStore {
            browser: Browser::Chrome,
            value: Some(value),
        })
    }

    #[test]
    fn test_explicit_wins_over_env_and_browser() {
        let var = "VIDEO_CAPTIONS_TEST_SESSDATA_PRECEDENCE";
        std::env::set_var(var, "from-env");

        let resolver = chain(
            Some("from-caller"),
            var,
            BrowserPreference::Auto,
            vec![chrome_with("from-browser")],
            BrowserHint::new(),
        );

        let (token, source) = resolver.resolve();
        assert_eq!(token.as_deref(), Some("from-caller"));
        assert_eq!(source, Some(CredentialSource::Explicit));

        std::env::remove_var(var);
    }

    #[test]
    fn test_env_wins_over_browser() {
        let var = "VIDEO_CAPTIONS_TEST_SESSDATA_ENV";
        std::env::set_var(var, "from-env");

        let resolver = chain(
            None,
            var,
            BrowserPreference::Auto,
            vec![chrome_with("from-browser")],
            BrowserHint::new(),
        );

        let (token, source) = resolver.resolve();
        assert_eq!(token.as_deref(), Some("from-env"));
        assert_eq!(source, Some(CredentialSource::EnvironmentVariable));

        std::env::remove_var(var);
    }

    #[test]
    fn test_browser_fallback_records_hint() {
        let hint = BrowserHint::new();
        let stores: Vec<Arc<dyn CookieStore>> = vec![
            Arc::new(BrokenStore(Browser::Chrome)),
            Arc::new(FixedStore {
                browser: Browser::Edge,
                value: None,
            }),
            Arc::new(FixedStore {
                browser: Browser::Firefox,
                value: Some("from-firefox"),
            }),
        ];

        let resolver = chain(
            None,
            "VIDEO_CAPTIONS_TEST_SESSDATA_UNSET_1",
            BrowserPreference::Auto,
            stores,
            hint.clone(),
        );

        let (token, source) = resolver.resolve();
        assert_eq!(token.as_deref(), Some("from-firefox"));
        assert_eq!(source, Some(CredentialSource::Browser(Browser::Firefox)));
        assert_eq!(hint.last(), Some(Browser::Firefox));
    }

    #[test]
    fn test_named_browser_reads_only_that_browser() {
        let resolver = chain(
            None,
            "VIDEO_CAPTIONS_TEST_SESSDATA_UNSET_2",
            BrowserPreference::Only(Browser::Edge),
            vec![chrome_with("from-chrome")],
            BrowserHint::new(),
        );

        assert_eq!(resolver.resolve(), (None, None));
    }

    #[test]
    fn test_disabled_skips_browsers() {
        let resolver = chain(
            None,
            "VIDEO_CAPTIONS_TEST_SESSDATA_UNSET_3",
            BrowserPreference::Disabled,
            vec![chrome_with("from-chrome")],
            BrowserHint::new(),
        );

        assert_eq!(resolver.resolve(), (None, None));
    }

    #[test]
    fn test_require_lists_every_option() {
        let hint = BrowserHint::new();
        hint.record(Browser::Brave);
        let resolver = chain(
            Some("   "),
            "VIDEO_CAPTIONS_TEST_SESSDATA_UNSET_4",
            BrowserPreference::Disabled,
            Vec::new(),
            hint,
        );

        let err = resolver.require().unwrap_err();
        assert_eq!(ErrorKind::classify(&err), ErrorKind::NoCredential);

        let message = err.to_string();
        assert!(message.contains("--sessdata"));
        assert!(message.contains(SESSDATA_ENV));
        assert!(message.contains("Firefox"));
        assert!(message.contains("last found in brave"));
    }

    #[test]
    fn test_browser_preference_parse() {
        assert_eq!("auto".parse::<BrowserPreference>().unwrap(), BrowserPreference::Auto);
        assert_eq!("off".parse::<BrowserPreference>().unwrap(), BrowserPreference::Disabled);
        assert_eq!(
            "Firefox".parse::<BrowserPreference>().unwrap(),
            BrowserPreference::Only(Browser::Firefox)
        );
        assert!("opera-gx".parse::<BrowserPreference>().is_err());
    }

    #[test]
    fn test_credential_debug_hides_token() {
        let credential = Credential {
            token: "abcdef1234567890".to_string(),
            source: CredentialSource::Explicit,
        };
        let printed = format!("{:?}", credential);
        assert!(!printed.contains("abcdef1234567890"));
        assert!(printed.contains("abcd...7890"));
    }
}
