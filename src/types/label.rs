use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordinal investment class assigned to a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum InvestmentLabel {
    HighPotential,
    Stable,
    LowPotential,
}

impl InvestmentLabel {
    pub const COUNT: usize = 3;

    pub fn as_str(&self) -> &'static str {
        match self {
            InvestmentLabel::HighPotential => "HighPotential",
            InvestmentLabel::Stable => "Stable",
            InvestmentLabel::LowPotential => "LowPotential",
        }
    }

    /// Sort rank in the result table (lower comes first)
    pub fn rank(&self) -> usize {
        match self {
            InvestmentLabel::HighPotential => 0,
            InvestmentLabel::Stable => 1,
            InvestmentLabel::LowPotential => 2,
        }
    }

    pub fn from_rank(rank: usize) -> Option<Self> {
        match rank {
            0 => Some(InvestmentLabel::HighPotential),
            1 => Some(InvestmentLabel::Stable),
            2 => Some(InvestmentLabel::LowPotential),
            _ => None,
        }
    }

    pub fn all() -> [InvestmentLabel; Self::COUNT] {
        [
            InvestmentLabel::HighPotential,
            InvestmentLabel::Stable,
            InvestmentLabel::LowPotential,
        ]
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim() {
            "HighPotential" => Some(InvestmentLabel::HighPotential),
            "Stable" => Some(InvestmentLabel::Stable),
            "LowPotential" => Some(InvestmentLabel::LowPotential),
            _ => None,
        }
    }
}

impl fmt::Display for InvestmentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
