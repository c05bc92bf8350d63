//! Chromium cookie value decryption.
//!
//! Encrypted values start with a `v10` or `v11` tag followed by AES-128-CBC
//! ciphertext. The key is PBKDF2-SHA1 over a password: a fixed one for Linux
//! `v10`, the keyring entry for Linux `v11`, the Keychain entry on macOS.
//! Windows keys are DPAPI protected and not supported; such values stay
//! unreadable.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use anyhow::{anyhow, bail, Context};
use sha2::{Digest, Sha256};
use std::process::Command;
use tracing::debug;

use super::Browser;
use crate::Result;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const SALT: &[u8] = b"saltysalt";
const IV: [u8; 16] = [b' '; 16];

pub const LINUX_V10_PASSWORD: &[u8] = b"peanuts";
pub const LINUX_ITERATIONS: u32 = 1;
pub const MACOS_ITERATIONS: u32 = 1003;

/// AES keys for the value versions a browser may have written
#[derive(Clone, Default)]
pub struct CookieCipher {
    v10: Option<[u8; 16]>,
    v11: Option<[u8; 16]>,
}

impl CookieCipher {
    pub fn new(v10_password: Option<&[u8]>, v11_password: Option<&[u8]>, iterations: u32) -> Self {
        Self {
            v10: v10_password.map(|p| derive_key(p, iterations)),
            v11: v11_password.map(|p| derive_key(p, iterations)),
        }
    }

    /// Keys for `browser` on this machine; consults the OS keyring
    pub fn for_browser(browser: Browser) -> Self {
        if cfg!(target_os = "macos") {
            let password = keychain_password(browser);
            Self::new(password.as_deref().map(str::as_bytes), None, MACOS_ITERATIONS)
        } else if cfg!(target_os = "linux") {
            let password = secret_tool_password(browser);
            Self::new(Some(LINUX_V10_PASSWORD), password.as_deref().map(str::as_bytes), LINUX_ITERATIONS)
        } else {
            Self::default()
        }
    }

    /// Plaintext of an `encrypted_value` stored for `host_key`
    pub fn decrypt(&self, host_key: &str, encrypted: &[u8]) -> Result<String> {
        if encrypted.len() < 3 {
            bail!("encrypted value is too short");
        }
        let (version, ciphertext) = encrypted.split_at(3);

        let key = match version {
            b"v10" => self.v10,
            b"v11" => self.v11,
            _ => None,
        }
        .ok_or_else(|| anyhow!("no key for '{}' values", String::from_utf8_lossy(version)))?;

        let plain = Aes128CbcDec::new(&key.into(), &IV.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| anyhow!("value does not decrypt with the {} key", String::from_utf8_lossy(version)))?;

        // Newer databases prefix the value with a digest of the host
        let digest = Sha256::digest(host_key.as_bytes());
        let value = plain.strip_prefix(digest.as_slice()).unwrap_or(plain.as_slice());

        String::from_utf8(value.to_vec()).context("decrypted value is not UTF-8")
    }
}

fn derive_key(password: &[u8], iterations: u32) -> [u8; 16] {
    let mut key = [0u8; 16];
    pbkdf2::pbkdf2_hmac::<sha1::Sha1>(password, SALT, iterations, &mut key);
    key
}

fn keychain_password(browser: Browser) -> Option<String> {
    let service = match browser {
        Browser::Chrome => "Chrome Safe Storage",
        Browser::Edge => "Microsoft Edge Safe Storage",
        Browser::Brave => "Brave Safe Storage",
        Browser::Opera => "Opera Safe Storage",
        Browser::Firefox => return None,
    };
    command_output("security", &["find-generic-password", "-w", "-s", service])
}

fn secret_tool_password(browser: Browser) -> Option<String> {
    let application = match browser {
        Browser::Chrome => "chrome",
        Browser::Edge => "microsoft-edge",
        Browser::Brave => "brave",
        Browser::Opera => "chromium",
        Browser::Firefox => return None,
    };
    command_output("secret-tool", &["lookup", "application", application])
}

fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let output = match Command::new(program).args(args).output() {
        Ok(output) => output,
        Err(e) => {
            debug!("Could not run {}: {}", program, e);
            return None;
        }
    };
    if !output.status.success() {
        debug!("{} found no cookie key", program);
        return None;
    }

    let password = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!password.is_empty()).then_some(password)
}

/// Encrypts like a Chromium browser does, for building cookie fixtures
#[cfg(test)]
pub(crate) fn encrypt(password: &[u8], iterations: u32, version: &str, plaintext: &[u8]) -> Vec<u8> {
    use aes::cipher::BlockEncryptMut;

    let key = derive_key(password, iterations);
    let ciphertext = cbc::Encryptor::<aes::Aes128>::new(&key.into(), &IV.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut value = version.as_bytes().to_vec();
    value.extend_from_slice(&ciphertext);
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux_cipher() -> CookieCipher {
        CookieCipher::new(Some(LINUX_V10_PASSWORD), Some(b"keyring-secret"), LINUX_ITERATIONS)
    }

    #[test]
    fn test_decrypts_v10_and_v11_values() {
        let v10 = encrypt(LINUX_V10_PASSWORD, LINUX_ITERATIONS, "v10", b"token-from-v10");
        let v11 = encrypt(b"keyring-secret", LINUX_ITERATIONS, "v11", b"token-from-v11");

        let cipher = linux_cipher();
        assert_eq!(cipher.decrypt(".bilibili.com", &v10).unwrap(), "token-from-v10");
        assert_eq!(cipher.decrypt(".bilibili.com", &v11).unwrap(), "token-from-v11");
    }

    #[test]
    fn test_host_digest_prefix_is_stripped() {
        let mut plaintext = Sha256::digest(b".bilibili.com").to_vec();
        plaintext.extend_from_slice(b"abc%2C123");
        let value = encrypt(LINUX_V10_PASSWORD, LINUX_ITERATIONS, "v10", &plaintext);

        assert_eq!(linux_cipher().decrypt(".bilibili.com", &value).unwrap(), "abc%2C123");
    }

    #[test]
    fn test_macos_iterations_differ() {
        let value = encrypt(b"keychain", MACOS_ITERATIONS, "v10", b"mac-token");

        let mac = CookieCipher::new(Some(b"keychain"), None, MACOS_ITERATIONS);
        assert_eq!(mac.decrypt("bilibili.com", &value).unwrap(), "mac-token");

        let wrong = CookieCipher::new(Some(b"keychain"), None, LINUX_ITERATIONS);
        assert!(wrong.decrypt("bilibili.com", &value).map_or(true, |v| v != "mac-token"));
    }

    #[test]
    fn test_undecodable_values_are_errors() {
        let cipher = CookieCipher::new(Some(LINUX_V10_PASSWORD), None, LINUX_ITERATIONS);
        let v11 = encrypt(b"keyring-secret", LINUX_ITERATIONS, "v11", b"token");

        assert!(cipher.decrypt(".bilibili.com", &v11).is_err());
        assert!(cipher.decrypt(".bilibili.com", b"v10\x01\x02\x03").is_err());
        assert!(cipher.decrypt(".bilibili.com", b"v2").is_err());
        assert!(CookieCipher::default().decrypt(".bilibili.com", &v11).is_err());
    }
}
