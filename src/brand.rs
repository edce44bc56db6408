use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{error::AppError, utils::normalize_host};

/// White-labeled deployment sharing this backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Brand {
    Green,
    Arcade,
    Codex,
    Connect,
}

impl Brand {
    pub fn all() -> [Brand; 4] {
        [Brand::Green, Brand::Arcade, Brand::Codex, Brand::Connect]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Brand::Green => "green",
            Brand::Arcade => "arcade",
            Brand::Codex => "codex",
            Brand::Connect => "connect",
        }
    }

    /// Resolves the brand serving a request from its hostname.
    ///
    /// A keyword matches a whole hostname label or one of its `-` separated words,
    /// so `gala-wallet.example.com` is arcade and `mygalaxy.io` is not.
    /// Unknown hosts (including localhost) fall back to green.
    pub fn from_host(host: &str) -> Brand {
        let host = normalize_host(host);
        let words: Vec<&str> = host.split(['.', '-']).collect();
        let has = |needle: &str| words.iter().any(|word| *word == needle);

        if has("arcade") || has("gala") {
            Brand::Arcade
        } else if has("codex") {
            Brand::Codex
        } else if has("connect") {
            Brand::Connect
        } else {
            Brand::Green
        }
    }

    /// ERC20 symbols the brand exposes besides BTC and ETH.
    pub fn token_symbols(&self) -> &'static [&'static str] {
        match self {
            Brand::Green => &["GREEN"],
            Brand::Arcade => &["GALA"],
            Brand::Codex => &[],
            Brand::Connect => &["GREEN"],
        }
    }
}

impl fmt::Display for Brand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Brand {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Brand::all()
            .into_iter()
            .find(|brand| brand.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::BadRequest(format!("Unknown brand: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_host_matches_brand_keywords() {
        assert_eq!(Brand::from_host("wallet.arcade.example.com"), Brand::Arcade);
        assert_eq!(Brand::from_host("gala-wallet.example.com:443"), Brand::Arcade);
        assert_eq!(Brand::from_host("CODEX.example.com"), Brand::Codex);
        assert_eq!(Brand::from_host("connect.example.com"), Brand::Connect);
    }

    #[test]
    fn from_host_ignores_keywords_inside_words() {
        assert_eq!(Brand::from_host("mygalaxy.io"), Brand::Green);
        assert_eq!(Brand::from_host("reconnect.app"), Brand::Green);
        assert_eq!(Brand::from_host("codexify.dev"), Brand::Green);
        assert_eq!(Brand::from_host("wallet-connect.example.com"), Brand::Connect);
    }

    #[test]
    fn from_host_defaults_to_green() {
        assert_eq!(Brand::from_host("localhost:3000"), Brand::Green);
        assert_eq!(Brand::from_host("wallet.example.com"), Brand::Green);
        assert_eq!(Brand::from_host(""), Brand::Green);
    }

    #[test]
    fn brand_round_trips_through_str() {
        for brand in Brand::all() {
            assert_eq!(brand.as_str().parse::<Brand>().unwrap(), brand);
        }
        assert!("unknown".parse::<Brand>().is_err());
    }
}
