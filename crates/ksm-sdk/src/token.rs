//! One-time access tokens: `REGION:secret` or `hostname:secret`.

use std::fmt;
use std::str::FromStr;

use ksm_core::{KsmError, KsmResult};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Us,
    Eu,
    Au,
    Gov,
    Jp,
    Ca,
}

impl Region {
    pub fn hostname(self) -> &'static str {
        match self {
            Region::Us => "keepersecurity.com",
            Region::Eu => "keepersecurity.eu",
            Region::Au => "keepersecurity.com.au",
            Region::Gov => "govcloud.keepersecurity.us",
            Region::Jp => "keepersecurity.jp",
            Region::Ca => "keepersecurity.ca",
        }
    }
}

impl FromStr for Region {
    type Err = KsmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "US" => Ok(Region::Us),
            "EU" => Ok(Region::Eu),
            "AU" => Ok(Region::Au),
            "GOV" => Ok(Region::Gov),
            "JP" => Ok(Region::Jp),
            "CA" => Ok(Region::Ca),
            _ => Err(KsmError::Configuration(format!("unknown region: {s}"))),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Region::Us => "US",
            Region::Eu => "EU",
            Region::Au => "AU",
            Region::Gov => "GOV",
            Region::Jp => "JP",
            Region::Ca => "CA",
        };
        f.write_str(code)
    }
}

/// A parsed one-time token. The secret is the client key used once during
/// binding.
pub struct OneTimeToken {
    hostname: Option<String>,
    client_key: SecretString,
}

impl OneTimeToken {
    /// Parse `US:abc...`, `keepersecurity.eu:abc...` or a bare secret.
    pub fn parse(token: &str) -> KsmResult<Self> {
        let token = token.trim();
        let (hostname, secret) = match token.split_once(':') {
            Some((prefix, secret)) => {
                let hostname = match prefix.parse::<Region>() {
                    Ok(region) => region.hostname().to_string(),
                    Err(_) => prefix.to_string(),
                };
                (Some(hostname), secret)
            }
            None => (None, token),
        };
        if secret.is_empty() {
            return Err(KsmError::Configuration("one-time token has no secret".into()));
        }
        if hostname.as_deref().is_some_and(str::is_empty) {
            return Err(KsmError::Configuration("one-time token has an empty host".into()));
        }
        Ok(Self {
            hostname,
            client_key: SecretString::from(secret.to_string()),
        })
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// The secret as stored under `clientKey`.
    pub fn client_key(&self) -> &str {
        self.client_key.expose_secret()
    }

    pub fn client_key_bytes(&self) -> KsmResult<Zeroizing<Vec<u8>>> {
        ksm_crypto::encoding::decode(self.client_key())
            .map(Zeroizing::new)
            .map_err(|_| KsmError::Configuration("one-time token secret is not base64".into()))
    }
}

impl fmt::Debug for OneTimeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneTimeToken")
            .field("hostname", &self.hostname)
            .field("client_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_prefix_maps_to_host() {
        let token = OneTimeToken::parse("EU:c2VjcmV0LWtleQ").unwrap();
        assert_eq!(token.hostname(), Some("keepersecurity.eu"));
        assert_eq!(token.client_key(), "c2VjcmV0LWtleQ");
        assert_eq!(&token.client_key_bytes().unwrap()[..], b"secret-key");

        let gov = OneTimeToken::parse("gov:abc").unwrap();
        assert_eq!(gov.hostname(), Some("govcloud.keepersecurity.us"));
    }

    #[test]
    fn unknown_prefix_is_a_hostname() {
        let token = OneTimeToken::parse("vault.example.internal:abc").unwrap();
        assert_eq!(token.hostname(), Some("vault.example.internal"));
    }

    #[test]
    fn bare_secret_has_no_host() {
        let token = OneTimeToken::parse("abc").unwrap();
        assert_eq!(token.hostname(), None);
    }

    #[test]
    fn empty_parts_rejected() {
        assert!(OneTimeToken::parse("US:").is_err());
        assert!(OneTimeToken::parse(":abc").is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let token = OneTimeToken::parse("US:topsecret").unwrap();
        assert!(!format!("{token:?}").contains("topsecret"));
    }
}
