//! Decisions with the evaluation trace that produced them.

use std::sync::Arc;

use sapl_core::{
    AuthorizationDecision, AuthorizationSubscription, TargetHit, TimestampedVote, Value, Vote, VoteWithCoverage,
    VoterKind, VoterMetadata,
};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Configuration id reported when no configuration is loaded.
pub const NO_CONFIGURATION: &str = "none";

#[derive(Debug, Clone, PartialEq)]
pub struct TracedDecision {
    pub pdp_id: String,
    pub configuration_id: String,
    pub subscription_id: String,
    pub subscription: AuthorizationSubscription,
    pub timestamp: OffsetDateTime,
    pub vote: Vote,
    pub coverage: Vec<TargetHit>,
    pub total_documents: usize,
}

impl TracedDecision {
    /// INDETERMINATE answer for a pdp id without configuration.
    pub fn no_configuration(
        pdp_id: &str,
        subscription_id: &str,
        subscription: AuthorizationSubscription,
        timestamp: OffsetDateTime,
    ) -> Self {
        let voter = Arc::new(VoterMetadata::new(pdp_id, VoterKind::Pdp).with_origin(pdp_id, NO_CONFIGURATION));
        let error = Value::error(format!("No policy decision point configuration is loaded for '{pdp_id}'."));
        Self {
            pdp_id: pdp_id.to_string(),
            configuration_id: NO_CONFIGURATION.to_string(),
            subscription_id: subscription_id.to_string(),
            subscription,
            timestamp,
            vote: Vote::indeterminate(voter, None, vec![error]),
            coverage: Vec::new(),
            total_documents: 0,
        }
    }

    pub fn authorization_decision(&self) -> AuthorizationDecision {
        self.vote.to_authorization_decision()
    }

    pub fn timestamped_vote(&self) -> TimestampedVote {
        TimestampedVote::new(self.vote.clone(), self.timestamp)
    }

    pub fn vote_with_coverage(&self) -> VoteWithCoverage {
        VoteWithCoverage {
            vote: self.vote.clone(),
            coverage: self.coverage.clone(),
        }
    }

    pub fn timestamp_rfc3339(&self) -> String {
        self.timestamp
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.timestamp.to_string())
    }

    /// Targets that evaluated to an error.
    pub fn retrieval_errors(&self) -> impl Iterator<Item = &TargetHit> {
        self.coverage.iter().filter(|hit| hit.result.is_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sapl_core::Decision;

    #[test]
    fn test_no_configuration_is_indeterminate_with_error() {
        let traced = TracedDecision::no_configuration(
            "tenant-x",
            "sub-1",
            AuthorizationSubscription::new("alice", "read", "doc"),
            OffsetDateTime::UNIX_EPOCH,
        );
        let decision = traced.authorization_decision();
        assert_eq!(decision.decision, Decision::Indeterminate);
        assert_eq!(decision.errors.len(), 1);
        assert_eq!(traced.configuration_id, NO_CONFIGURATION);
        assert_eq!(traced.timestamp_rfc3339(), "1970-01-01T00:00:00Z");
    }
}
