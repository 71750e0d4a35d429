//! Enquiries, quotes, counter-offers and agreement
use tracing::{info, instrument, warn};

use super::{OrderWorkflowService, Txn, ensure_party};
use crate::audit::AuditAction;
use crate::error::{StateError, ValidationError};
use crate::order::{Enquiry, Order, OrderStatus};
use crate::payment::{Payment, PaymentMethod, PaymentPhase, PaymentRequest};
use crate::quote::{CounterOffer, PaymentType, Quote, QuoteStatus, QuoteTerms};
use crate::store::keys;
use crate::types::{Actor, Role, TimeStamp};
use crate::utils::new_uuid_to_bech32;

/// What one party's agreement produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Agreement {
    pub quote: Quote,
    pub order: Order,
    /// Created when this agreement locked a quote whose payment type needs an advance.
    pub advance_payment: Option<Payment>,
}

impl Agreement {
    pub fn is_locked(&self) -> bool {
        self.quote.status == QuoteStatus::Locked
    }
}

impl OrderWorkflowService {
    /// Opens a new order in ENQUIRY with an empty draft quote.
    #[instrument(skip_all, fields(buyer = %enquiry.buyer_id, seller = %enquiry.seller_id))]
    pub fn create_enquiry(&self, enquiry: Enquiry) -> anyhow::Result<(Order, Quote)> {
        let now = self.now();
        let order = enquiry.validate_and_finalise(new_uuid_to_bech32("order_")?, now)?;
        let quote = Quote::draft(new_uuid_to_bech32("quote_")?, &order, order.notes.clone(), now);

        let actor = Actor::buyer(order.buyer_id.clone());
        let mut txn = Txn::new(&actor, now);
        txn.put(keys::ORDER, &order.order_id, &order)?;
        self.insert(&mut txn, keys::QUOTE, &order.order_id, &quote.quote_id, &quote)?;
        self.audit(
            &mut txn,
            &order,
            AuditAction::EnquiryCreated,
            None,
            format!("Enquiry for {} {} of {}", order.quantity, order.unit, order.product_ref),
        )?;
        self.commit(txn)?;

        info!(order_id = %order.order_id, quote_id = %quote.quote_id, "enquiry created");
        Ok((order, quote))
    }

    /// Prices a draft quote and sends it to the buyer.
    #[instrument(skip(self, terms, actor), fields(actor = %actor.user_id))]
    pub fn send_quote(&self, quote_id: &str, terms: &QuoteTerms, actor: &Actor) -> anyhow::Result<Quote> {
        let order_id = self.load_quote(quote_id)?.order_id;
        self.locks.with_order(&order_id, || {
            let mut quote = self.load_quote(quote_id)?;
            let mut order = self.load_order(&order_id)?;
            order.ensure_open()?;
            ensure_party(&order, actor)?;
            if actor.role == Role::Buyer {
                return Err(ValidationError::RoleNotPermitted("seller", "send quotes").into());
            }

            let now = self.now();
            quote.send(terms, order.payment_preference, now)?;

            let mut txn = Txn::new(actor, now);
            txn.put(keys::QUOTE, quote_id, &quote)?;
            self.transition(
                &mut txn,
                &mut order,
                OrderStatus::QuoteSent,
                AuditAction::QuoteSent,
                format!(
                    "Quote v{} sent: total {} ({})",
                    quote.version, quote.final_total, quote.payment_type
                ),
            )?;
            self.commit(txn)?;

            Ok(quote)
        })
    }

    /// Replaces a live quote with a new version carrying the offered terms.
    #[instrument(skip(self, offer, actor), fields(actor = %actor.user_id))]
    pub fn counter_offer(&self, quote_id: &str, offer: &CounterOffer, actor: &Actor) -> anyhow::Result<Quote> {
        let order_id = self.load_quote(quote_id)?.order_id;
        self.locks.with_order(&order_id, || {
            let mut quote = self.load_quote(quote_id)?;
            let order = self.load_order(&order_id)?;
            order.ensure_open()?;
            ensure_party(&order, actor)?;

            let now = self.now();
            let next = quote.counter(
                new_uuid_to_bech32("quote_")?,
                offer,
                self.config.default_quote_expiry_hours,
                now,
            )?;
            quote.supersede(now);

            let mut txn = Txn::new(actor, now);
            txn.put(keys::QUOTE, &quote.quote_id, &quote)?;
            self.insert(&mut txn, keys::QUOTE, &order_id, &next.quote_id, &next)?;
            self.record(
                &mut txn,
                &order,
                AuditAction::CounterOffered,
                format!(
                    "{} countered with v{}: total {}",
                    actor.role, next.version, next.final_total
                ),
            )?;
            self.commit(txn)?;

            info!(%order_id, quote_id = %next.quote_id, version = next.version, "counter-offer recorded");
            Ok(next)
        })
    }

    pub fn buyer_agree(&self, quote_id: &str, actor: &Actor) -> anyhow::Result<Agreement> {
        self.agree(quote_id, actor, Role::Buyer)
    }

    pub fn seller_agree(&self, quote_id: &str, actor: &Actor) -> anyhow::Result<Agreement> {
        self.agree(quote_id, actor, Role::Seller)
    }

    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    fn agree(&self, quote_id: &str, actor: &Actor, party: Role) -> anyhow::Result<Agreement> {
        let order_id = self.load_quote(quote_id)?.order_id;
        self.locks.with_order(&order_id, || {
            let mut quote = self.load_quote(quote_id)?;
            let mut order = self.load_order(&order_id)?;
            order.ensure_open()?;
            let expected = match party {
                Role::Buyer => order.buyer_id.as_str(),
                _ => order.seller_id.as_str(),
            };
            if actor.role != party || actor.user_id != expected {
                return Err(ValidationError::NotAParty(actor.user_id.clone()).into());
            }

            let now = self.now();
            let locked = quote.agree(party, now)?;

            let mut txn = Txn::new(actor, now);
            txn.put(keys::QUOTE, quote_id, &quote)?;
            let action = match party {
                Role::Buyer => AuditAction::BuyerAgreed,
                _ => AuditAction::SellerAgreed,
            };
            self.record(&mut txn, &order, action, format!("{party} agreed to quote v{}", quote.version))?;

            let mut advance_payment = None;
            if locked {
                let other_locked = self
                    .quotes_for_order(&order_id)?
                    .iter()
                    .any(|other| other.quote_id != quote.quote_id && other.status == QuoteStatus::Locked);
                if other_locked {
                    return Err(StateError::QuoteAlreadyLocked.into());
                }

                self.transition(
                    &mut txn,
                    &mut order,
                    OrderStatus::AgreementLocked,
                    AuditAction::AgreementLocked,
                    format!("Quote v{} locked at {}", quote.version, quote.final_total),
                )?;

                if quote.payment_type.requires_advance() && quote.advance_amount.is_positive() {
                    let payment = self.advance_request(&quote, now)?;
                    self.insert(&mut txn, keys::PAYMENT, &order_id, &payment.payment_id, &payment)?;
                    self.record(
                        &mut txn,
                        &order,
                        AuditAction::PaymentRequested,
                        format!("{} payment of {} requested", payment.phase, payment.amount),
                    )?;
                    advance_payment = Some(payment);
                }
            }
            self.commit(txn)?;

            Ok(Agreement {
                quote,
                order,
                advance_payment,
            })
        })
    }

    // the first payment owed under a freshly locked quote
    fn advance_request(&self, quote: &Quote, now: TimeStamp) -> anyhow::Result<Payment> {
        let phase = match quote.payment_type {
            PaymentType::FullAdvance => PaymentPhase::Full,
            _ => PaymentPhase::Advance,
        };
        let request = PaymentRequest {
            phase,
            amount: quote.advance_amount,
            method: PaymentMethod::Unspecified,
            due_in_hours: self.config.default_payment_due_hours,
        };
        Ok(Payment::request(
            new_uuid_to_bech32("pay_")?,
            quote.order_id.clone(),
            quote.quote_id.clone(),
            quote.buyer_id.clone(),
            quote.seller_id.clone(),
            &request,
            now,
        )?)
    }

    /// Expires every live quote past its expiry. An order left in QUOTE_SENT with no live
    /// quote expires with it. Returns the number of quotes expired.
    #[instrument(skip(self))]
    pub fn expire_old_quotes(&self, now: TimeStamp) -> anyhow::Result<usize> {
        let due: Vec<Quote> = self
            .store
            .scan::<Quote>(&keys::all(keys::QUOTE))?
            .into_iter()
            .filter(|quote| quote.is_expired_at(now))
            .collect();

        let system = Actor::system();
        let mut expired = 0;
        for candidate in due {
            let outcome = self.locks.with_order(&candidate.order_id, || {
                // re-check under the lock, another writer may have got there first
                let mut quote = self.load_quote(&candidate.quote_id)?;
                if !quote.is_expired_at(now) {
                    return Ok(0);
                }
                let mut order = self.load_order(&quote.order_id)?;
                quote.expire(now);

                let mut txn = Txn::new(&system, now);
                txn.put(keys::QUOTE, &quote.quote_id, &quote)?;
                self.record(
                    &mut txn,
                    &order,
                    AuditAction::QuoteExpired,
                    format!("Quote v{} expired", quote.version),
                )?;
                let live_remaining = self
                    .quotes_for_order(&order.order_id)?
                    .iter()
                    .any(|other| other.quote_id != quote.quote_id && other.is_live());
                if order.status == OrderStatus::QuoteSent && !live_remaining {
                    self.transition(
                        &mut txn,
                        &mut order,
                        OrderStatus::Expired,
                        AuditAction::OrderExpired,
                        "No live quote remains",
                    )?;
                }
                self.commit(txn)?;

                Ok(1)
            });
            match outcome {
                Ok(count) => expired += count,
                Err(err) => {
                    warn!(order_id = %candidate.order_id, quote_id = %candidate.quote_id, %err, "quote expiry skipped")
                }
            }
        }

        if expired > 0 {
            info!(expired, "quotes expired");
        }
        Ok(expired)
    }
}
