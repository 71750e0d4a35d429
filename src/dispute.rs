//! Disputes raised against an order and their resolution
use std::fmt;

use chrono::Duration;

use crate::error::{StateError, ValidationError};
use crate::order::OrderStatus;
use crate::types::{Money, Role, TimeStamp};

pub fn auto_escalation_reason(after: Duration) -> String {
    format!("Auto-escalated after {} days without resolution.", after.num_days())
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisputeReason {
    #[n(0)]
    QualityIssue,
    #[n(1)]
    QuantityMismatch,
    #[n(2)]
    NotDelivered,
    #[n(3)]
    PaymentNotReceived,
    #[n(4)]
    WrongProduct,
    #[n(5)]
    DamagedGoods,
    #[n(6)]
    Other,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisputeStatus {
    #[n(0)]
    Open,
    #[n(1)]
    UnderReview,
    #[n(2)]
    Escalated,
    #[n(3)]
    ResolvedRefund,
    #[n(4)]
    ResolvedPartialRefund,
    #[n(5)]
    ResolvedReleased,
    #[n(6)]
    ResolvedMutualCancel,
}

impl DisputeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeStatus::Open => "OPEN",
            DisputeStatus::UnderReview => "UNDER_REVIEW",
            DisputeStatus::Escalated => "ESCALATED",
            DisputeStatus::ResolvedRefund => "RESOLVED_REFUND",
            DisputeStatus::ResolvedPartialRefund => "RESOLVED_PARTIAL_REFUND",
            DisputeStatus::ResolvedReleased => "RESOLVED_RELEASED",
            DisputeStatus::ResolvedMutualCancel => "RESOLVED_MUTUAL_CANCEL",
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            DisputeStatus::ResolvedRefund
                | DisputeStatus::ResolvedPartialRefund
                | DisputeStatus::ResolvedReleased
                | DisputeStatus::ResolvedMutualCancel
        )
    }
}

impl fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionType {
    #[n(0)]
    Refund,
    #[n(1)]
    PartialRefund,
    #[n(2)]
    ReleaseToSeller,
    #[n(3)]
    MutualCancel,
}

impl ResolutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionType::Refund => "REFUND",
            ResolutionType::PartialRefund => "PARTIAL_REFUND",
            ResolutionType::ReleaseToSeller => "RELEASE_TO_SELLER",
            ResolutionType::MutualCancel => "MUTUAL_CANCEL",
        }
    }

    pub fn resolved_status(&self) -> DisputeStatus {
        match self {
            ResolutionType::Refund => DisputeStatus::ResolvedRefund,
            ResolutionType::PartialRefund => DisputeStatus::ResolvedPartialRefund,
            ResolutionType::ReleaseToSeller => DisputeStatus::ResolvedReleased,
            ResolutionType::MutualCancel => DisputeStatus::ResolvedMutualCancel,
        }
    }

    /// Mutual cancellation unwinds the order; every other outcome closes it as completed.
    pub fn order_outcome(&self) -> OrderStatus {
        match self {
            ResolutionType::MutualCancel => OrderStatus::Cancelled,
            _ => OrderStatus::Completed,
        }
    }
}

impl fmt::Display for ResolutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complaint as filed by one party.
#[derive(Debug, Clone, PartialEq)]
pub struct DisputeClaim {
    pub reason: DisputeReason,
    pub description: String,
    pub requested_resolution: Option<ResolutionType>,
    pub claimed_amount: Option<Money>,
    pub evidence_ids: Vec<String>,
}

impl DisputeClaim {
    pub fn new(reason: DisputeReason, description: impl Into<String>) -> Self {
        Self {
            reason,
            description: description.into(),
            requested_resolution: None,
            claimed_amount: None,
            evidence_ids: Vec::new(),
        }
    }
    pub fn set_requested_resolution(mut self, resolution: ResolutionType) -> Self {
        self.requested_resolution = Some(resolution);
        self
    }
    pub fn set_claimed_amount(mut self, amount: Money) -> Self {
        self.claimed_amount = Some(amount);
        self
    }
    pub fn add_evidence(mut self, evidence_id: impl Into<String>) -> Self {
        self.evidence_ids.push(evidence_id.into());
        self
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Dispute {
    #[n(0)]
    pub dispute_id: String,
    #[n(1)]
    pub order_id: String,
    #[n(2)]
    pub raised_by: String,
    #[n(3)]
    pub raised_by_role: Role,
    #[n(4)]
    pub against_user_id: String,
    #[n(5)]
    pub reason: DisputeReason,
    #[n(6)]
    pub description: String,
    #[n(7)]
    pub requested_resolution: Option<ResolutionType>,
    #[n(8)]
    pub claimed_amount: Option<Money>,
    #[n(9)]
    pub evidence_ids: Vec<String>,
    #[n(10)]
    pub status: DisputeStatus,
    #[n(11)]
    pub escalation_reason: Option<String>,
    #[n(12)]
    pub resolution: Option<ResolutionType>,
    #[n(13)]
    pub resolution_notes: Option<String>,
    #[n(14)]
    pub resolved_by: Option<String>,
    #[n(15)]
    pub refund_amount: Option<Money>,
    #[n(16)]
    pub created_at: TimeStamp,
    #[n(17)]
    pub updated_at: TimeStamp,
    #[n(18)]
    pub escalated_at: Option<TimeStamp>,
    #[n(19)]
    pub resolved_at: Option<TimeStamp>,
}

impl Dispute {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        dispute_id: String,
        order_id: String,
        raised_by: String,
        raised_by_role: Role,
        against_user_id: String,
        claim: DisputeClaim,
        now: TimeStamp,
    ) -> Result<Self, ValidationError> {
        if claim.claimed_amount.is_some_and(|amount| amount.is_negative()) {
            return Err(ValidationError::NegativeAmount("Claimed amount"));
        }
        Ok(Self {
            dispute_id,
            order_id,
            raised_by,
            raised_by_role,
            against_user_id,
            reason: claim.reason,
            description: claim.description,
            requested_resolution: claim.requested_resolution,
            claimed_amount: claim.claimed_amount,
            evidence_ids: claim.evidence_ids,
            status: DisputeStatus::Open,
            escalation_reason: None,
            resolution: None,
            resolution_notes: None,
            resolved_by: None,
            refund_amount: None,
            created_at: now,
            updated_at: now,
            escalated_at: None,
            resolved_at: None,
        })
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_resolved()
    }

    fn ensure_unresolved(&self) -> Result<(), StateError> {
        if self.status.is_resolved() {
            return Err(StateError::DisputeAlreadyResolved);
        }
        Ok(())
    }

    pub fn review(&mut self, now: TimeStamp) -> Result<(), StateError> {
        self.ensure_unresolved()?;
        if self.status != DisputeStatus::Open {
            return Err(StateError::DisputeNotActionable(self.status.to_string(), "reviewed"));
        }
        self.status = DisputeStatus::UnderReview;
        self.updated_at = now;
        Ok(())
    }

    pub fn escalate(&mut self, reason: String, now: TimeStamp) -> Result<(), StateError> {
        self.ensure_unresolved()?;
        if self.status == DisputeStatus::Escalated {
            return Err(StateError::DisputeNotActionable(self.status.to_string(), "escalated"));
        }
        self.status = DisputeStatus::Escalated;
        self.escalation_reason = Some(reason);
        self.escalated_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Due for automatic escalation once it has sat open for `after`.
    pub fn is_stale_at(&self, now: TimeStamp, after: Duration) -> bool {
        matches!(self.status, DisputeStatus::Open | DisputeStatus::UnderReview)
            && now >= self.created_at.plus(after)
    }

    /// Final. A second call fails with `DisputeAlreadyResolved`.
    pub fn resolve(
        &mut self,
        resolution: ResolutionType,
        resolved_by: String,
        notes: Option<String>,
        refund_amount: Option<Money>,
        now: TimeStamp,
    ) -> anyhow::Result<()> {
        self.ensure_unresolved()?;
        if refund_amount.is_some_and(|amount| amount.is_negative()) {
            return Err(ValidationError::NegativeAmount("Refund amount").into());
        }
        let refund_amount = match (resolution, refund_amount) {
            (ResolutionType::Refund, None) => self.claimed_amount,
            (_, amount) => amount,
        };

        self.status = resolution.resolved_status();
        self.resolution = Some(resolution);
        self.resolution_notes = notes;
        self.resolved_by = Some(resolved_by);
        self.refund_amount = refund_amount;
        self.resolved_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_dispute(now: TimeStamp) -> Dispute {
        let claim = DisputeClaim::new(DisputeReason::DamagedGoods, "half the crates were crushed")
            .set_claimed_amount(Money::from_major(200));
        Dispute::open(
            "dsp_1".into(),
            "order_1".into(),
            "buyer".into(),
            Role::Buyer,
            "seller".into(),
            claim,
            now,
        )
        .unwrap()
    }

    #[test]
    fn refund_defaults_to_claimed_amount() {
        let now = TimeStamp::new();
        let mut dispute = open_dispute(now);
        dispute
            .resolve(ResolutionType::Refund, "admin".into(), None, None, now)
            .unwrap();
        assert_eq!(dispute.status, DisputeStatus::ResolvedRefund);
        assert_eq!(dispute.refund_amount, Some(Money::from_major(200)));
    }

    #[test]
    fn second_resolution_is_rejected() {
        let now = TimeStamp::new();
        let mut dispute = open_dispute(now);
        dispute
            .resolve(ResolutionType::MutualCancel, "admin".into(), None, None, now)
            .unwrap();
        let err = dispute
            .resolve(ResolutionType::Refund, "admin".into(), None, None, now)
            .unwrap_err();
        assert_eq!(err.to_string(), "Dispute is already resolved");
        assert_eq!(dispute.status, DisputeStatus::ResolvedMutualCancel);
    }

    #[test]
    fn outcomes_map_to_terminal_order_states() {
        assert_eq!(ResolutionType::MutualCancel.order_outcome(), OrderStatus::Cancelled);
        for resolution in [
            ResolutionType::Refund,
            ResolutionType::PartialRefund,
            ResolutionType::ReleaseToSeller,
        ] {
            assert_eq!(resolution.order_outcome(), OrderStatus::Completed);
        }
    }

    #[test]
    fn staleness_window() {
        let now = TimeStamp::new();
        let mut dispute = open_dispute(now);
        let window = Duration::days(3);
        assert!(!dispute.is_stale_at(now.plus(Duration::days(2)), window));
        assert!(dispute.is_stale_at(now.plus(window), window));

        dispute.escalate("manual".into(), now).unwrap();
        assert!(!dispute.is_stale_at(now.plus(Duration::days(10)), window));
    }

    #[test]
    fn auto_escalation_wording() {
        assert_eq!(
            auto_escalation_reason(Duration::days(3)),
            "Auto-escalated after 3 days without resolution."
        );
    }

    #[test]
    fn negative_refund_is_rejected() {
        let now = TimeStamp::new();
        let mut dispute = open_dispute(now);
        assert!(
            dispute
                .resolve(ResolutionType::PartialRefund, "admin".into(), None, Some(Money::from_minor(-1)), now)
                .is_err()
        );
        assert!(dispute.is_active());
    }
}
