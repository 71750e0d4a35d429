//! Raising, reviewing, escalating and resolving disputes
use tracing::{info, instrument, warn};

use super::{OrderWorkflowService, Txn, ensure_admin, ensure_evidence_of, ensure_party};
use crate::audit::AuditAction;
use crate::dispute::{Dispute, DisputeClaim, ResolutionType, auto_escalation_reason};
use crate::error::{StateError, ValidationError};
use crate::order::{Order, OrderStatus};
use crate::store::keys;
use crate::types::{Actor, Money, Role, TimeStamp};
use crate::utils::new_uuid_to_bech32;

impl OrderWorkflowService {
    /// Opens a dispute against the other party and moves the order to DISPUTE.
    #[instrument(skip(self, claim, actor), fields(actor = %actor.user_id))]
    pub fn raise_dispute(&self, order_id: &str, claim: DisputeClaim, actor: &Actor) -> anyhow::Result<Dispute> {
        self.locks.with_order(order_id, || {
            let mut order = self.load_order(order_id)?;
            order.ensure_open()?;
            let against = match actor.role {
                Role::Buyer | Role::Seller => order.counterparty_of(&actor.user_id).map(str::to_string),
                _ => None,
            }
            .ok_or_else(|| ValidationError::NotAParty(actor.user_id.clone()))?;
            if self.disputes_for_order(order_id)?.iter().any(Dispute::is_active) {
                return Err(StateError::DisputeAlreadyOpen.into());
            }
            for evidence_id in &claim.evidence_ids {
                ensure_evidence_of(&order, &self.load_evidence(evidence_id)?)?;
            }

            let now = self.now();
            let dispute = Dispute::open(
                new_uuid_to_bech32("dsp_")?,
                order.order_id.clone(),
                actor.user_id.clone(),
                actor.role,
                against,
                claim,
                now,
            )?;

            let mut txn = Txn::new(actor, now);
            self.insert(&mut txn, keys::DISPUTE, order_id, &dispute.dispute_id, &dispute)?;
            self.transition(
                &mut txn,
                &mut order,
                OrderStatus::Dispute,
                AuditAction::DisputeRaised,
                format!(
                    "{} raised a dispute against {}: {}",
                    actor.role, dispute.against_user_id, dispute.description
                ),
            )?;
            self.commit(txn)?;

            Ok(dispute)
        })
    }

    /// An admin picks the dispute up. The order is unchanged.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub fn review_dispute(&self, dispute_id: &str, actor: &Actor) -> anyhow::Result<Dispute> {
        ensure_admin(actor, "review disputes")?;
        let order_id = self.load_dispute(dispute_id)?.order_id;
        self.locks.with_order(&order_id, || {
            let mut dispute = self.load_dispute(dispute_id)?;
            let order = self.load_order(&order_id)?;

            let now = self.now();
            dispute.review(now)?;

            let mut txn = Txn::new(actor, now);
            txn.put(keys::DISPUTE, dispute_id, &dispute)?;
            self.record(
                &mut txn,
                &order,
                AuditAction::DisputeUnderReview,
                format!("Dispute {dispute_id} under review"),
            )?;
            self.commit(txn)?;

            Ok(dispute)
        })
    }

    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub fn escalate_dispute(&self, dispute_id: &str, actor: &Actor, reason: &str) -> anyhow::Result<Dispute> {
        let order_id = self.load_dispute(dispute_id)?.order_id;
        self.locks.with_order(&order_id, || {
            let mut dispute = self.load_dispute(dispute_id)?;
            let mut order = self.load_order(&order_id)?;
            ensure_party(&order, actor)?;
            self.escalate(&mut dispute, &mut order, actor, reason.to_string(), self.now())?;
            Ok(dispute)
        })
    }

    // caller holds the order lock
    fn escalate(
        &self,
        dispute: &mut Dispute,
        order: &mut Order,
        actor: &Actor,
        reason: String,
        now: TimeStamp,
    ) -> anyhow::Result<()> {
        dispute.escalate(reason, now)?;

        let mut txn = Txn::new(actor, now);
        txn.put(keys::DISPUTE, &dispute.dispute_id, &*dispute)?;
        let description = format!(
            "Dispute {} escalated: {}",
            dispute.dispute_id,
            dispute.escalation_reason.as_deref().unwrap_or_default()
        );
        if order.status.can_transition_to(OrderStatus::Escalated) {
            self.transition(&mut txn, order, OrderStatus::Escalated, AuditAction::DisputeEscalated, description)?;
        } else {
            self.record(&mut txn, order, AuditAction::DisputeEscalated, description)?;
        }
        self.commit(txn)
    }

    /// Final. MUTUAL_CANCEL cancels the order, every other resolution completes it.
    #[instrument(skip(self, actor, notes), fields(actor = %actor.user_id))]
    pub fn resolve_dispute(
        &self,
        dispute_id: &str,
        resolution: ResolutionType,
        actor: &Actor,
        notes: Option<String>,
        refund_amount: Option<Money>,
    ) -> anyhow::Result<Dispute> {
        ensure_admin(actor, "resolve disputes")?;
        let order_id = self.load_dispute(dispute_id)?.order_id;
        self.locks.with_order(&order_id, || {
            let mut dispute = self.load_dispute(dispute_id)?;
            let mut order = self.load_order(&order_id)?;

            let now = self.now();
            dispute.resolve(resolution, actor.user_id.clone(), notes, refund_amount, now)?;

            let mut txn = Txn::new(actor, now);
            txn.put(keys::DISPUTE, dispute_id, &dispute)?;
            let description = match dispute.refund_amount {
                Some(refund) => format!("Dispute resolved with {resolution}, refund {refund}"),
                None => format!("Dispute resolved with {resolution}"),
            };
            self.transition(
                &mut txn,
                &mut order,
                resolution.order_outcome(),
                AuditAction::DisputeResolved,
                description,
            )?;
            self.commit(txn)?;

            Ok(dispute)
        })
    }

    /// Escalates every open or under-review dispute older than the configured window.
    #[instrument(skip(self))]
    pub fn auto_escalate_disputes(&self) -> anyhow::Result<usize> {
        let now = self.now();
        let after = self.config.dispute_auto_escalation;
        let stale: Vec<Dispute> = self
            .store
            .scan::<Dispute>(&keys::all(keys::DISPUTE))?
            .into_iter()
            .filter(|dispute| dispute.is_stale_at(now, after))
            .collect();

        let system = Actor::system();
        let mut escalated = 0;
        for candidate in stale {
            let outcome = self.locks.with_order(&candidate.order_id, || {
                let mut dispute = self.load_dispute(&candidate.dispute_id)?;
                if !dispute.is_stale_at(now, after) {
                    return Ok(0);
                }
                let mut order = self.load_order(&dispute.order_id)?;
                self.escalate(&mut dispute, &mut order, &system, auto_escalation_reason(after), now)?;
                Ok(1)
            });
            match outcome {
                Ok(count) => escalated += count,
                Err(err) => {
                    warn!(order_id = %candidate.order_id, dispute_id = %candidate.dispute_id, %err, "dispute escalation skipped")
                }
            }
        }

        if escalated > 0 {
            info!(escalated, "disputes auto-escalated");
        }
        Ok(escalated)
    }
}
