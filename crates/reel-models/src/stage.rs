//! Pipeline stage stores.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A storage collection representing one pipeline phase.
///
/// The set of stores an item currently lives in is the item's pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Fetched, not yet normalized
    Quarantine,
    /// Transcoded to the canonical profile, waiting for a batch
    Normalized,
    /// Concatenated compilations waiting to be published
    Compilations,
    /// Published compilations kept for reference
    Archive,
}

impl StageName {
    pub const ALL: [StageName; 4] = [
        StageName::Quarantine,
        StageName::Normalized,
        StageName::Compilations,
        StageName::Archive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Quarantine => "quarantine",
            StageName::Normalized => "normalized",
            StageName::Compilations => "compilations",
            StageName::Archive => "archive",
        }
    }

    /// The store an item moves to once this stage's consumer succeeds.
    pub fn next(&self) -> Option<StageName> {
        match self {
            StageName::Quarantine => Some(StageName::Normalized),
            StageName::Normalized => Some(StageName::Compilations),
            StageName::Compilations => Some(StageName::Archive),
            StageName::Archive => None,
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StageName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "quarantine" => Ok(StageName::Quarantine),
            "normalized" => Ok(StageName::Normalized),
            "compilations" => Ok(StageName::Compilations),
            "archive" => Ok(StageName::Archive),
            other => Err(format!("unknown stage '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_round_trips_through_str() {
        for stage in StageName::ALL {
            assert_eq!(stage.as_str().parse::<StageName>().unwrap(), stage);
        }
        assert!("published".parse::<StageName>().is_err());
    }

    #[test]
    fn test_stage_order() {
        assert_eq!(StageName::Quarantine.next(), Some(StageName::Normalized));
        assert_eq!(StageName::Archive.next(), None);
    }

    #[test]
    fn test_stage_serde_is_snake_case() {
        let json = serde_json::to_string(&StageName::Compilations).unwrap();
        assert_eq!(json, "\"compilations\"");
    }
}
