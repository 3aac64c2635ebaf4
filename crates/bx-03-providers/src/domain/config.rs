//! Provider store and reprovider settings.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// CIDs whose provider sets are kept in memory.
    pub lru_size: usize,
    /// How long a provider record stays valid.
    pub provide_validity: Duration,
    /// Interval between expiry sweeps.
    pub cleanup_interval: Duration,
    /// Writes buffered before the batching wrapper flushes.
    pub batch_size: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            lru_size: 256,
            provide_validity: Duration::from_secs(24 * 60 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
            batch_size: 256,
        }
    }
}

/// Which CIDs the reprovider announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReproviderStrategy {
    /// Every block in the blockstore.
    #[default]
    All,
    /// Direct pins and recursive pins with all their descendants.
    Pinned,
    /// Direct pins and recursive roots only.
    Roots,
}

impl FromStr for ReproviderStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" | "" => Ok(Self::All),
            "pinned" => Ok(Self::Pinned),
            "roots" => Ok(Self::Roots),
            other => Err(format!("unknown reprovider strategy: {other}")),
        }
    }
}

impl fmt::Display for ReproviderStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::All => "all",
            Self::Pinned => "pinned",
            Self::Roots => "roots",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReproviderConfig {
    /// Time between cycles; zero disables the periodic loop.
    pub interval: Duration,
    pub strategy: ReproviderStrategy,
}

impl Default for ReproviderConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(12 * 60 * 60),
            strategy: ReproviderStrategy::All,
        }
    }
}
