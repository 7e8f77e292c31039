//! Chain identifiers and per-chain media keyword tables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chains the pipeline can index.
///
/// Stored as lowercase text in the database and used to key contract and
/// token uniqueness together with the on-chain address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Polygon,
    Optimism,
    Arbitrum,
    Base,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Polygon => "polygon",
            Chain::Optimism => "optimism",
            Chain::Arbitrum => "arbitrum",
            Chain::Base => "base",
        }
    }

    /// Keyword priority lists used to pick media candidates out of token
    /// metadata. The first matching key wins.
    ///
    /// Returns `(image_keywords, animation_keywords)`. Some communities use
    /// their own field names (`artifactUri`, `displayUri`), so the table is
    /// per-chain even though the EVM chains currently share one entry.
    pub fn media_keywords(&self) -> (&'static [&'static str], &'static [&'static str]) {
        // All currently supported chains are EVM and share the base table.
        (
            &["image", "image_url", "artifactUri", "displayUri"],
            &["animation_url", "animation", "video"],
        )
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ethereum" | "eth" | "mainnet" => Ok(Chain::Ethereum),
            "polygon" | "matic" => Ok(Chain::Polygon),
            "optimism" => Ok(Chain::Optimism),
            "arbitrum" => Ok(Chain::Arbitrum),
            "base" => Ok(Chain::Base),
            other => Err(anyhow::anyhow!("unknown chain: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_round_trip() {
        for chain in [
            Chain::Ethereum,
            Chain::Polygon,
            Chain::Optimism,
            Chain::Arbitrum,
            Chain::Base,
        ] {
            assert_eq!(chain.as_str().parse::<Chain>().unwrap(), chain);
        }
    }

    #[test]
    fn test_chain_aliases() {
        assert_eq!("eth".parse::<Chain>().unwrap(), Chain::Ethereum);
        assert_eq!("mainnet".parse::<Chain>().unwrap(), Chain::Ethereum);
        assert!("tezos".parse::<Chain>().is_err());
    }

    #[test]
    fn test_image_keyword_priority() {
        let (image, _) = Chain::Ethereum.media_keywords();
        assert_eq!(image[0], "image");
    }
}
