//! Delivery confirmation by OTP or photo, then balance collection
use std::iter;

use tracing::{instrument, warn};

use super::{OrderWorkflowService, Txn, ensure_evidence_of, ensure_party};
use crate::audit::AuditAction;
use crate::delivery::{DeliveryConfirmation, check_geofence};
use crate::error::{StateError, ValidationError};
use crate::evidence::EvidenceType;
use crate::order::{self, Order, OrderStatus};
use crate::store::keys;
use crate::types::{Actor, GeoPoint, TimeStamp};
use crate::utils::{new_numeric_code, new_uuid_to_bech32};

impl OrderWorkflowService {
    /// Delivery needs an order that may legally become DELIVERED, and a verified advance
    /// when the locked quote requires one.
    fn ensure_deliverable(&self, order: &Order) -> anyhow::Result<()> {
        order.ensure_open()?;
        match order.status {
            OrderStatus::AdvancePending | OrderStatus::PaymentProofSubmitted => {
                return Err(StateError::AdvanceNotVerified.into());
            }
            OrderStatus::AgreementLocked => {
                let needs_advance = self
                    .locked_quote(&order.order_id)?
                    .is_some_and(|quote| quote.payment_type.requires_advance());
                if needs_advance {
                    return Err(StateError::AdvanceNotVerified.into());
                }
            }
            _ => {}
        }
        order::validate_transition(order.status, OrderStatus::Delivered)?;
        Ok(())
    }

    fn delivery_or_new(&self, order: &Order, now: TimeStamp) -> anyhow::Result<DeliveryConfirmation> {
        match self.delivery(&order.order_id)? {
            Some(delivery) => Ok(delivery),
            None => Ok(DeliveryConfirmation::new(
                new_uuid_to_bech32("dlv_")?,
                order,
                self.config.max_otp_attempts,
                now,
            )),
        }
    }

    /// Issues a fresh delivery OTP, replacing any earlier one.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub fn generate_delivery_otp(&self, order_id: &str, actor: &Actor) -> anyhow::Result<DeliveryConfirmation> {
        self.locks.with_order(order_id, || {
            let order = self.load_order(order_id)?;
            ensure_party(&order, actor)?;
            self.ensure_deliverable(&order)?;

            let now = self.now();
            let mut delivery = self.delivery_or_new(&order, now)?;
            delivery.issue_otp(
                new_numeric_code(self.config.otp_digits),
                self.config.otp_ttl,
                self.config.max_otp_attempts,
                now,
            )?;

            let mut txn = Txn::new(actor, now);
            txn.put(keys::DELIVERY, order_id, &delivery)?;
            let expires = delivery.otp_expires_at.unwrap_or(now);
            self.record(
                &mut txn,
                &order,
                AuditAction::DeliveryOtpGenerated,
                format!("Delivery OTP issued, valid until {expires}"),
            )?;
            self.commit(txn)?;

            Ok(delivery)
        })
    }

    /// Confirms delivery with the OTP. A wrong code consumes an attempt, which is persisted
    /// before the error is returned. When both the delivery point and the verifier's position
    /// are known, the verifier must be inside the geofence.
    #[instrument(skip(self, otp, actor), fields(actor = %actor.user_id))]
    pub fn verify_delivery_otp(
        &self,
        order_id: &str,
        otp: &str,
        actor: &Actor,
        verifier_location: Option<GeoPoint>,
    ) -> anyhow::Result<DeliveryConfirmation> {
        self.locks.with_order(order_id, || {
            let mut order = self.load_order(order_id)?;
            ensure_party(&order, actor)?;
            self.ensure_deliverable(&order)?;
            let mut delivery = self.load_delivery(order_id)?;

            let now = self.now();
            let attempts = delivery.otp_attempts;
            if let Err(err) = delivery.check_otp(otp, now) {
                if delivery.otp_attempts != attempts {
                    let mut txn = Txn::new(actor, now);
                    txn.put(keys::DELIVERY, order_id, &delivery)?;
                    self.record(
                        &mut txn,
                        &order,
                        AuditAction::DeliveryOtpFailed,
                        format!(
                            "Wrong delivery OTP, attempt {} of {}",
                            delivery.otp_attempts, delivery.max_otp_attempts
                        ),
                    )?;
                    self.commit(txn)?;
                }
                warn!(order_id, attempts = delivery.otp_attempts, %err, "delivery OTP rejected");
                return Err(err.into());
            }

            let target = self
                .locked_quote(order_id)?
                .and_then(|quote| quote.delivery_location)
                .or(order.delivery.location);
            let distance_km = check_geofence(target, verifier_location, self.config.geofence_radius_km)
                .inspect_err(|err| warn!(order_id, %err, "delivery outside geofence"))?;
            delivery.confirm_by_otp(actor.user_id.clone(), verifier_location, distance_km, now);

            let mut txn = Txn::new(actor, now);
            txn.put(keys::DELIVERY, order_id, &delivery)?;
            let description = match distance_km {
                Some(distance) => format!("Delivery confirmed by OTP, {distance:.3} km from the delivery point"),
                None => "Delivery confirmed by OTP".to_string(),
            };
            self.transition(
                &mut txn,
                &mut order,
                OrderStatus::Delivered,
                AuditAction::DeliveryConfirmed,
                description,
            )?;
            self.commit(txn)?;

            Ok(delivery)
        })
    }

    /// Confirms delivery from photo evidence instead of an OTP.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub fn confirm_delivery_with_photo(
        &self,
        order_id: &str,
        delivery_photo_id: &str,
        buyer_photo_id: Option<&str>,
        actor: &Actor,
    ) -> anyhow::Result<DeliveryConfirmation> {
        self.locks.with_order(order_id, || {
            let mut order = self.load_order(order_id)?;
            ensure_party(&order, actor)?;
            self.ensure_deliverable(&order)?;
            for photo_id in iter::once(delivery_photo_id).chain(buyer_photo_id) {
                let evidence = self.load_evidence(photo_id)?;
                ensure_evidence_of(&order, &evidence)?;
                if evidence.record.evidence_type != EvidenceType::Photo {
                    return Err(ValidationError::NotAPhoto(photo_id.to_string()).into());
                }
            }

            let now = self.now();
            let mut delivery = self.delivery_or_new(&order, now)?;
            delivery.confirm_by_photo(
                delivery_photo_id.to_string(),
                buyer_photo_id.map(str::to_string),
                actor.user_id.clone(),
                now,
            )?;

            let mut txn = Txn::new(actor, now);
            txn.put(keys::DELIVERY, order_id, &delivery)?;
            self.transition(
                &mut txn,
                &mut order,
                OrderStatus::Delivered,
                AuditAction::DeliveryConfirmed,
                format!("Delivery confirmed by photo {delivery_photo_id}"),
            )?;
            self.commit(txn)?;

            Ok(delivery)
        })
    }

    /// Records the balance as collected and completes the order.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub fn mark_balance_collected(
        &self,
        order_id: &str,
        evidence_id: Option<&str>,
        actor: &Actor,
    ) -> anyhow::Result<Order> {
        self.locks.with_order(order_id, || {
            let mut order = self.load_order(order_id)?;
            order.ensure_open()?;
            ensure_party(&order, actor)?;
            // a disputed order is closed by its resolution, not by collection
            if order.status.is_disputed() {
                return Err(StateError::InvalidTransition {
                    from: order.status,
                    to: OrderStatus::Completed,
                }
                .into());
            }
            if let Some(evidence_id) = evidence_id {
                ensure_evidence_of(&order, &self.load_evidence(evidence_id)?)?;
            }
            let mut delivery = self.load_delivery(order_id)?;

            let now = self.now();
            delivery.collect_balance(evidence_id.map(str::to_string), now)?;

            let mut txn = Txn::new(actor, now);
            txn.put(keys::DELIVERY, order_id, &delivery)?;
            self.transition(
                &mut txn,
                &mut order,
                OrderStatus::Completed,
                AuditAction::BalanceCollected,
                "Balance collected, order completed",
            )?;
            self.commit(txn)?;

            Ok(order)
        })
    }
}
