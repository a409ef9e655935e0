use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Verbosity level for AI-generated explanations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Concise,
    #[default]
    Balanced,
    Detailed,
}

impl FromStr for Verbosity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "concise" => Ok(Verbosity::Concise),
            "balanced" => Ok(Verbosity::Balanced),
            "detailed" => Ok(Verbosity::Detailed),
            _ => Err(format!(
                "Invalid verbosity: '{}'. Valid options: concise, balanced, detailed",
                s
            )),
        }
    }
}

impl Verbosity {
    /// Returns the prompt suffix for this verbosity level
    pub fn suffix(self) -> &'static str {
        match self {
            Verbosity::Concise => {
                "Keep your explanation extremely brief - 1-2 sentences maximum, covering only the essential purpose."
            }
            Verbosity::Balanced => {
                "Provide a standard explanation with 3-4 sentences covering purpose and key details."
            }
            Verbosity::Detailed => {
                "Provide a comprehensive explanation with 6-8 sentences, including purpose, usage patterns, edge cases, and examples where relevant."
            }
        }
    }
}
