//! Payment requests, proof, verification and expiry
use tracing::{info, instrument, warn};

use super::{OrderWorkflowService, Txn, ensure_evidence_of, ensure_party};
use crate::audit::AuditAction;
use crate::error::{LookupError, StateError, ValidationError};
use crate::order::OrderStatus;
use crate::payment::{Payment, PaymentRequest, PaymentStatus};
use crate::quote::QuoteStatus;
use crate::store::keys;
use crate::types::{Actor, Role};
use crate::utils::new_uuid_to_bech32;

// the receiver settles their own payments; admins may step in
fn ensure_receiver(payment: &Payment, actor: &Actor, action: &'static str) -> Result<(), ValidationError> {
    if actor.role == Role::Admin || actor.user_id == payment.receiver_id {
        Ok(())
    } else {
        Err(ValidationError::RoleNotPermitted("receiver", action))
    }
}

impl OrderWorkflowService {
    /// Raises a payment against the order's locked quote. Advance and full payments move
    /// the order to ADVANCE_PENDING.
    #[instrument(skip(self, request, actor), fields(phase = %request.phase, actor = %actor.user_id))]
    pub fn create_payment_request(
        &self,
        order_id: &str,
        quote_id: &str,
        request: &PaymentRequest,
        actor: &Actor,
    ) -> anyhow::Result<Payment> {
        self.locks.with_order(order_id, || {
            let mut order = self.load_order(order_id)?;
            let now = self.now();
            let payment = Payment::request(
                new_uuid_to_bech32("pay_")?,
                order.order_id.clone(),
                quote_id.to_string(),
                order.buyer_id.clone(),
                order.seller_id.clone(),
                request,
                now,
            )?;
            order.ensure_open()?;
            ensure_party(&order, actor)?;

            let quote = self.load_quote(quote_id)?;
            if quote.order_id != order.order_id {
                return Err(LookupError::Quote(quote_id.to_string()).into());
            }
            if quote.status != QuoteStatus::Locked {
                return Err(StateError::QuoteNotActionable(quote.status.to_string(), "billed").into());
            }

            let mut txn = Txn::new(actor, now);
            self.insert(&mut txn, keys::PAYMENT, order_id, &payment.payment_id, &payment)?;
            let description = format!("{} payment of {} requested", payment.phase, payment.amount);
            if payment.phase.gates_fulfilment() && order.status != OrderStatus::AdvancePending {
                self.transition(
                    &mut txn,
                    &mut order,
                    OrderStatus::AdvancePending,
                    AuditAction::PaymentRequested,
                    description,
                )?;
            } else {
                self.record(&mut txn, &order, AuditAction::PaymentRequested, description)?;
            }
            self.commit(txn)?;

            Ok(payment)
        })
    }

    /// Attaches proof to a pending or rejected payment. Before delivery this moves the order
    /// to PAYMENT_PROOF_SUBMITTED.
    #[instrument(skip(self, transaction_ref, actor), fields(actor = %actor.user_id))]
    pub fn submit_payment_proof(
        &self,
        payment_id: &str,
        evidence_id: &str,
        transaction_ref: Option<String>,
        actor: &Actor,
    ) -> anyhow::Result<Payment> {
        let order_id = self.load_payment(payment_id)?.order_id;
        self.locks.with_order(&order_id, || {
            let mut payment = self.load_payment(payment_id)?;
            let mut order = self.load_order(&order_id)?;
            order.ensure_open()?;
            ensure_party(&order, actor)?;
            let evidence = self.load_evidence(evidence_id)?;
            ensure_evidence_of(&order, &evidence)?;

            let now = self.now();
            payment.submit_proof(evidence_id.to_string(), transaction_ref, now)?;

            let mut txn = Txn::new(actor, now);
            txn.put(keys::PAYMENT, payment_id, &payment)?;
            let description = format!(
                "Proof submitted for {} payment of {}",
                payment.phase, payment.amount
            );
            if order.status.can_transition_to(OrderStatus::PaymentProofSubmitted) {
                self.transition(
                    &mut txn,
                    &mut order,
                    OrderStatus::PaymentProofSubmitted,
                    AuditAction::PaymentProofSubmitted,
                    description,
                )?;
            } else {
                self.record(&mut txn, &order, AuditAction::PaymentProofSubmitted, description)?;
            }
            self.commit(txn)?;

            Ok(payment)
        })
    }

    /// Accepts submitted proof. Verifying any phase while the order waits on proof moves it
    /// to PAYMENT_VERIFIED; a balance settled after delivery leaves the order alone.
    #[instrument(skip(self, actor, notes), fields(actor = %actor.user_id))]
    pub fn verify_payment(&self, payment_id: &str, actor: &Actor, notes: Option<String>) -> anyhow::Result<Payment> {
        let order_id = self.load_payment(payment_id)?.order_id;
        self.locks.with_order(&order_id, || {
            let mut payment = self.load_payment(payment_id)?;
            let mut order = self.load_order(&order_id)?;
            order.ensure_open()?;
            ensure_receiver(&payment, actor, "verify payments")?;

            let now = self.now();
            payment.verify(actor.user_id.clone(), notes, now)?;

            let mut txn = Txn::new(actor, now);
            txn.put(keys::PAYMENT, payment_id, &payment)?;
            let description = format!("{} payment of {} verified", payment.phase, payment.amount);
            if order.status.can_transition_to(OrderStatus::PaymentVerified) {
                self.transition(
                    &mut txn,
                    &mut order,
                    OrderStatus::PaymentVerified,
                    AuditAction::PaymentVerified,
                    description,
                )?;
            } else {
                self.record(&mut txn, &order, AuditAction::PaymentVerified, description)?;
            }
            self.commit(txn)?;

            Ok(payment)
        })
    }

    /// Rejects submitted proof. The order stays where it is and the payer may resubmit.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub fn reject_payment(&self, payment_id: &str, actor: &Actor, reason: &str) -> anyhow::Result<Payment> {
        let order_id = self.load_payment(payment_id)?.order_id;
        self.locks.with_order(&order_id, || {
            let mut payment = self.load_payment(payment_id)?;
            let order = self.load_order(&order_id)?;
            order.ensure_open()?;
            ensure_receiver(&payment, actor, "reject payments")?;

            let now = self.now();
            payment.reject(reason.to_string(), now)?;

            let mut txn = Txn::new(actor, now);
            txn.put(keys::PAYMENT, payment_id, &payment)?;
            self.record(
                &mut txn,
                &order,
                AuditAction::PaymentRejected,
                format!("{} payment rejected: {reason}", payment.phase),
            )?;
            self.commit(txn)?;

            warn!(%order_id, payment_id, reason, "payment proof rejected");
            Ok(payment)
        })
    }

    /// Expires pending payments past their due time. An order waiting in ADVANCE_PENDING
    /// with no open fulfilment payment left expires with them.
    #[instrument(skip(self))]
    pub fn expire_overdue_payments(&self) -> anyhow::Result<usize> {
        let now = self.now();
        let due: Vec<Payment> = self
            .store
            .scan::<Payment>(&keys::all(keys::PAYMENT))?
            .into_iter()
            .filter(|payment| payment.is_overdue_at(now))
            .collect();

        let system = Actor::system();
        let mut expired = 0;
        for candidate in due {
            let outcome = self.locks.with_order(&candidate.order_id, || {
                let mut payment = self.load_payment(&candidate.payment_id)?;
                if !payment.is_overdue_at(now) {
                    return Ok(0);
                }
                let mut order = self.load_order(&payment.order_id)?;
                payment.expire(now);

                let mut txn = Txn::new(&system, now);
                txn.put(keys::PAYMENT, &payment.payment_id, &payment)?;
                self.record(
                    &mut txn,
                    &order,
                    AuditAction::PaymentExpired,
                    format!("{} payment of {} expired unpaid", payment.phase, payment.amount),
                )?;
                let open_remaining = self.list_payments(&order.order_id)?.iter().any(|other| {
                    other.payment_id != payment.payment_id
                        && other.phase.gates_fulfilment()
                        && matches!(other.status, PaymentStatus::Pending | PaymentStatus::ProofSubmitted)
                });
                if order.status == OrderStatus::AdvancePending
                    && payment.phase.gates_fulfilment()
                    && !open_remaining
                {
                    self.transition(
                        &mut txn,
                        &mut order,
                        OrderStatus::Expired,
                        AuditAction::OrderExpired,
                        "Advance payment was never made",
                    )?;
                }
                self.commit(txn)?;

                Ok(1)
            });
            match outcome {
                Ok(count) => expired += count,
                Err(err) => {
                    warn!(order_id = %candidate.order_id, payment_id = %candidate.payment_id, %err, "payment expiry skipped")
                }
            }
        }

        if expired > 0 {
            info!(expired, "payments expired");
        }
        Ok(expired)
    }
}
