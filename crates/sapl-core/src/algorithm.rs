//! Combining-algorithm descriptors.
//!
//! An algorithm is the triple of voting mode, default decision and error
//! handling. The classic algorithm names are constants of this triple.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VotingMode {
    /// Document order decides; the first applicable vote wins.
    First,
    PriorityDeny,
    PriorityPermit,
    Unanimous,
    UnanimousStrict,
    Unique,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefaultDecision {
    Deny,
    Permit,
    /// Leave NOT_APPLICABLE as it is.
    Abstain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorHandling {
    /// INDETERMINATE is treated as NOT_APPLICABLE during finalisation.
    Abstain,
    Propagate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlgorithmTriple {
    voting_mode: VotingMode,
    default_decision: DefaultDecision,
    error_handling: ErrorHandling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CombiningAlgorithm {
    pub voting_mode: VotingMode,
    pub default_decision: DefaultDecision,
    pub error_handling: ErrorHandling,
}

impl CombiningAlgorithm {
    pub const DENY_OVERRIDES: Self = Self::new(
        VotingMode::PriorityDeny,
        DefaultDecision::Deny,
        ErrorHandling::Propagate,
    );
    pub const PERMIT_OVERRIDES: Self = Self::new(
        VotingMode::PriorityPermit,
        DefaultDecision::Permit,
        ErrorHandling::Propagate,
    );
    pub const DENY_UNLESS_PERMIT: Self = Self::new(
        VotingMode::PriorityPermit,
        DefaultDecision::Deny,
        ErrorHandling::Abstain,
    );
    pub const PERMIT_UNLESS_DENY: Self = Self::new(
        VotingMode::PriorityDeny,
        DefaultDecision::Permit,
        ErrorHandling::Abstain,
    );
    pub const ONLY_ONE_APPLICABLE: Self = Self::new(
        VotingMode::Unique,
        DefaultDecision::Deny,
        ErrorHandling::Propagate,
    );
    pub const FIRST_APPLICABLE: Self = Self::new(
        VotingMode::First,
        DefaultDecision::Deny,
        ErrorHandling::Propagate,
    );
    pub const PRIORITY_DENY: Self = Self::new(
        VotingMode::PriorityDeny,
        DefaultDecision::Abstain,
        ErrorHandling::Propagate,
    );
    pub const PRIORITY_PERMIT: Self = Self::new(
        VotingMode::PriorityPermit,
        DefaultDecision::Abstain,
        ErrorHandling::Propagate,
    );
    pub const UNANIMOUS: Self = Self::new(
        VotingMode::Unanimous,
        DefaultDecision::Abstain,
        ErrorHandling::Propagate,
    );
    pub const UNANIMOUS_STRICT: Self = Self::new(
        VotingMode::UnanimousStrict,
        DefaultDecision::Abstain,
        ErrorHandling::Propagate,
    );
    pub const UNIQUE: Self = Self::new(
        VotingMode::Unique,
        DefaultDecision::Abstain,
        ErrorHandling::Propagate,
    );

    const NAMED: [(&'static str, CombiningAlgorithm); 11] = [
        ("deny-overrides", Self::DENY_OVERRIDES),
        ("permit-overrides", Self::PERMIT_OVERRIDES),
        ("deny-unless-permit", Self::DENY_UNLESS_PERMIT),
        ("permit-unless-deny", Self::PERMIT_UNLESS_DENY),
        ("only-one-applicable", Self::ONLY_ONE_APPLICABLE),
        ("first-applicable", Self::FIRST_APPLICABLE),
        ("priority-deny", Self::PRIORITY_DENY),
        ("priority-permit", Self::PRIORITY_PERMIT),
        ("unanimous", Self::UNANIMOUS),
        ("strict-unanimous", Self::UNANIMOUS_STRICT),
        ("unique", Self::UNIQUE),
    ];

    pub const fn new(
        voting_mode: VotingMode,
        default_decision: DefaultDecision,
        error_handling: ErrorHandling,
    ) -> Self {
        Self {
            voting_mode,
            default_decision,
            error_handling,
        }
    }

    /// The classic name if this triple has one.
    pub fn legacy_name(&self) -> Option<&'static str> {
        Self::NAMED
            .iter()
            .find(|(_, algorithm)| algorithm == self)
            .map(|(name, _)| *name)
    }

    /// Phrase syntax, e.g. `priority deny or permit errors abstain`.
    pub fn to_syntax(&self) -> String {
        let mode = match self.voting_mode {
            VotingMode::First => "first",
            VotingMode::PriorityDeny => "priority deny",
            VotingMode::PriorityPermit => "priority permit",
            VotingMode::Unanimous => "unanimous",
            VotingMode::UnanimousStrict => "unanimous strict",
            VotingMode::Unique => "unique",
        };
        let default = match self.default_decision {
            DefaultDecision::Deny => "deny",
            DefaultDecision::Permit => "permit",
            DefaultDecision::Abstain => "abstain",
        };
        let errors = match self.error_handling {
            ErrorHandling::Abstain => "abstain",
            ErrorHandling::Propagate => "propagate",
        };
        format!("{mode} or {default} errors {errors}")
    }

    fn parse_syntax(text: &str) -> Option<Self> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let or_position = words.iter().position(|w| *w == "or")?;
        let voting_mode = match &words[..or_position] {
            ["first"] => VotingMode::First,
            ["priority", "deny"] => VotingMode::PriorityDeny,
            ["priority", "permit"] => VotingMode::PriorityPermit,
            ["unanimous"] => VotingMode::Unanimous,
            ["unanimous", "strict"] => VotingMode::UnanimousStrict,
            ["unique"] => VotingMode::Unique,
            _ => return None,
        };
        let rest = &words[or_position + 1..];
        let default_decision = match rest.first() {
            Some(&"deny") => DefaultDecision::Deny,
            Some(&"permit") => DefaultDecision::Permit,
            Some(&"abstain") => DefaultDecision::Abstain,
            _ => return None,
        };
        let error_handling = match &rest[1..] {
            [] | ["errors", "abstain"] => ErrorHandling::Abstain,
            ["errors", "propagate"] => ErrorHandling::Propagate,
            _ => return None,
        };
        Some(Self::new(voting_mode, default_decision, error_handling))
    }
}

impl fmt::Display for CombiningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.legacy_name() {
            Some(name) => f.write_str(name),
            None => f.write_str(&self.to_syntax()),
        }
    }
}

impl FromStr for CombiningAlgorithm {
    type Err = CoreError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let normalized = text.trim().to_ascii_lowercase();
        if let Some((_, algorithm)) = Self::NAMED.iter().find(|(name, _)| *name == normalized) {
            return Ok(*algorithm);
        }
        Self::parse_syntax(&normalized)
            .ok_or_else(|| CoreError::invalid_algorithm(format!("'{text}' is not a combining algorithm")))
    }
}

impl Serialize for CombiningAlgorithm {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        AlgorithmTriple {
            voting_mode: self.voting_mode,
            default_decision: self.default_decision,
            error_handling: self.error_handling,
        }
        .serialize(serializer)
    }
}

/// Accepts the object form `{votingMode, defaultDecision, errorHandling}`
/// or any textual form understood by [`FromStr`].
impl<'de> Deserialize<'de> for CombiningAlgorithm {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Triple(AlgorithmTriple),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => text.parse().map_err(serde::de::Error::custom),
            Repr::Triple(t) => Ok(Self::new(t.voting_mode, t.default_decision, t.error_handling)),
        }
    }
}
