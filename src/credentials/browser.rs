//! Read-only access to browser cookie databases.
//!
//! Browsers keep their cookie databases locked while running, so each
//! database is copied into a scratch directory before it is opened. Chromium
//! browsers usually store values encrypted; those are decrypted with
//! [`CookieCipher`], and values that cannot be decrypted are reported as
//! absent.

use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

use super::cipher::CookieCipher;
use super::Browser;
use crate::Result;

/// A browser's cookie database
pub trait CookieStore: Send + Sync {
    fn browser(&self) -> Browser;

    /// Value of cookie `name` set for `domain`, if present and readable
    fn read_cookie(&self, domain: &str, name: &str) -> Result<Option<String>>;
}

/// Cookie store for the given browser at its usual profile location
pub fn system_store(browser: Browser) -> Box<dyn CookieStore> {
    match browser {
        Browser::Firefox => Box::new(FirefoxCookieStore::new(firefox_profiles_root())),
        chromium => Box::new(ChromiumCookieStore::new(
            chromium,
            chromium_user_data_dir(chromium),
        )),
    }
}

fn chromium_user_data_dir(browser: Browser) -> Option<PathBuf> {
    if browser == Browser::Opera {
        return opera_user_data_dir();
    }

    let vendor_path: &[&str] = match browser {
        Browser::Chrome if cfg!(target_os = "linux") => &["google-chrome"],
        Browser::Chrome => &["Google", "Chrome"],
        Browser::Edge if cfg!(target_os = "linux") => &["microsoft-edge"],
        Browser::Edge if cfg!(target_os = "windows") => &["Microsoft", "Edge"],
        Browser::Edge => &["Microsoft Edge"],
        Browser::Brave => &["BraveSoftware", "Brave-Browser"],
        Browser::Opera | Browser::Firefox => return None,
    };

    let mut dir = if cfg!(target_os = "windows") {
        dirs::data_local_dir()?
    } else {
        dirs::config_dir()?
    };
    for part in vendor_path {
        dir.push(part);
    }
    if cfg!(target_os = "windows") {
        dir.push("User Data");
    }
    Some(dir)
}

/// Opera keeps its single profile directly in the user data directory
fn opera_user_data_dir() -> Option<PathBuf> {
    let config = dirs::config_dir()?;
    Some(if cfg!(target_os = "linux") {
        config.join("opera")
    } else if cfg!(target_os = "windows") {
        config.join("Opera Software").join("Opera Stable")
    } else {
        config.join("com.operasoftware.Opera")
    })
}

fn firefox_profiles_root() -> Option<PathBuf> {
    if cfg!(target_os = "linux") {
        dirs::home_dir().map(|home| home.join(".mozilla").join("firefox"))
    } else if cfg!(target_os = "windows") {
        dirs::config_dir().map(|dir| dir.join("Mozilla").join("Firefox").join("Profiles"))
    } else {
        dirs::config_dir().map(|dir| dir.join("Firefox").join("Profiles"))
    }
}

/// Chrome, Edge, Brave and Opera
pub struct ChromiumCookieStore {
    browser: Browser,
    user_data_dir: Option<PathBuf>,
    cipher: OnceLock<CookieCipher>,
}

impl ChromiumCookieStore {
    /// The empty entry is Opera's profile-less layout
    const PROFILES: [&'static str; 5] = ["Default", "Profile 1", "Profile 2", "Profile 3", ""];

    pub fn new(browser: Browser, user_data_dir: Option<PathBuf>) -> Self {
        Self {
            browser,
            user_data_dir,
            cipher: OnceLock::new(),
        }
    }

    /// Use `cipher` instead of the keys found on this machine
    pub fn with_cipher(mut self, cipher: CookieCipher) -> Self {
        self.cipher = OnceLock::from(cipher);
        self
    }

    // Keyring lookups can prompt, so only once a value actually needs it
    fn cipher(&self) -> &CookieCipher {
        self.cipher.get_or_init(|| CookieCipher::for_browser(self.browser))
    }

    fn cookie_files(&self) -> Vec<PathBuf> {
        let Some(root) = &self.user_data_dir else {
            return Vec::new();
        };

        Self::PROFILES
            .iter()
            .flat_map(|profile| {
                let dir = root.join(profile);
                [dir.join("Network").join("Cookies"), dir.join("Cookies")]
            })
            .filter(|path| path.is_file())
            .collect()
    }
}

impl CookieStore for ChromiumCookieStore {
    fn browser(&self) -> Browser {
        self.browser
    }

    fn read_cookie(&self, domain: &str, name: &str) -> Result<Option<String>> {
        for file in self.cookie_files() {
            let rows = match query_chromium(&file, domain, name) {
                Ok(rows) => rows,
                Err(e) => {
                    debug!("Skipping {}: {:#}", file.display(), e);
                    continue;
                }
            };

            for row in rows {
                if !row.value.is_empty() {
                    return Ok(Some(row.value));
                }
                if row.encrypted_value.is_empty() {
                    continue;
                }
                match self.cipher().decrypt(&row.host_key, &row.encrypted_value) {
                    Ok(value) if !value.is_empty() => return Ok(Some(value)),
                    Ok(_) => {}
                    Err(e) => debug!("{} cookie in {} not decrypted: {:#}", name, file.display(), e),
                }
            }
        }
        Ok(None)
    }
}

struct ChromiumRow {
    host_key: String,
    value: String,
    encrypted_value: Vec<u8>,
}

fn query_chromium(file: &Path, domain: &str, name: &str) -> Result<Vec<ChromiumRow>> {
    let snapshot = Snapshot::take(file)?;
    let conn = Connection::open(snapshot.path())?;

    let mut stmt = conn.prepare(
        "SELECT host_key, value, encrypted_value FROM cookies \
         WHERE host_key LIKE ?1 AND name = ?2 ORDER BY expires_utc DESC",
    )?;
    let rows = stmt
        .query_map(params![format!("%{}", domain), name], |row| {
            Ok(ChromiumRow {
                host_key: row.get(0)?,
                value: row.get(1)?,
                encrypted_value: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
}

/// Firefox profiles, values are stored in plaintext
pub struct FirefoxCookieStore {
    profiles_root: Option<PathBuf>,
}

impl FirefoxCookieStore {
    pub fn new(profiles_root: Option<PathBuf>) -> Self {
        Self { profiles_root }
    }

    fn cookie_files(&self) -> Vec<PathBuf> {
        let Some(root) = &self.profiles_root else {
            return Vec::new();
        };
        let Ok(entries) = fs_err::read_dir(root) else {
            return Vec::new();
        };

        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path().join("cookies.sqlite"))
            .filter(|path| path.is_file())
            .collect();
        files.sort();
        files
    }
}

impl CookieStore for FirefoxCookieStore {
    fn browser(&self) -> Browser {
        Browser::Firefox
    }

    fn read_cookie(&self, domain: &str, name: &str) -> Result<Option<String>> {
        for file in self.cookie_files() {
            match query_firefox(&file, domain, name) {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => {}
                Err(e) => debug!("Skipping {}: {:#}", file.display(), e),
            }
        }
        Ok(None)
    }
}

fn query_firefox(file: &Path, domain: &str, name: &str) -> Result<Option<String>> {
    let snapshot = Snapshot::take(file)?;
    let conn = Connection::open(snapshot.path())?;

    let value = conn
        .query_row(
            "SELECT value FROM moz_cookies WHERE host LIKE ?1 AND name = ?2 ORDER BY expiry DESC LIMIT 1",
            params![format!("%{}", domain), name],
            |row| row.get::<_, String>(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    Ok(value.filter(|v| !v.is_empty()))
}

/// Private copy of a cookie database and its write-ahead log
struct Snapshot {
    dir: tempfile::TempDir,
}

impl Snapshot {
    const FILE_NAME: &'static str = "cookies.sqlite";

    fn take(file: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("video-captions-cookies-").tempdir()?;
        let target = dir.path().join(Self::FILE_NAME);
        fs_err::copy(file, &target)?;

        let wal = PathBuf::from(format!("{}-wal", file.display()));
        if wal.is_file() {
            fs_err::copy(&wal, dir.path().join(format!("{}-wal", Self::FILE_NAME)))?;
        }

        Ok(Self { dir })
    }

    fn path(&self) -> PathBuf {
        self.dir.path().join(Self::FILE_NAME)
    }
}
