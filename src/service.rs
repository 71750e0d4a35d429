//! Service layer API for order workflow operations
//!
//! Every operation runs under its order's lock: load current state, validate, stage the new
//! records together with their audit entries in one [`Txn`], then apply it as a single batch.
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::audit::{self, AuditAction, AuditLogEntry};
use crate::clock::{Clock, SystemClock};
use crate::config::WorkflowConfig;
use crate::delivery::DeliveryConfirmation;
use crate::dispute::{Dispute, ResolutionType};
use crate::error::{LookupError, StateError, ValidationError};
use crate::evidence::Evidence;
use crate::lock::OrderLocks;
use crate::order::{Order, OrderStatus, validate_transition};
use crate::payment::Payment;
use crate::quote::{Quote, QuoteStatus};
use crate::store::{Store, WriteSet, keys};
use crate::sweep::SweepReport;
use crate::timeline::{self, TimelineEvent};
use crate::types::{Actor, Role, TimeStamp};
use crate::utils::new_uuid_to_bech32;

mod delivery;
mod disputes;
mod evidence;
mod payments;
mod quotes;

pub use quotes::Agreement;

pub struct OrderWorkflowService {
    store: Store,
    locks: OrderLocks,
    clock: Arc<dyn Clock>,
    config: WorkflowConfig,
}

/// Staged writes of one operation, applied all-or-nothing by [`OrderWorkflowService::commit`].
struct Txn<'a> {
    actor: &'a Actor,
    now: TimeStamp,
    writes: WriteSet,
    transitions: Vec<(String, OrderStatus, OrderStatus)>,
}

impl<'a> Txn<'a> {
    fn new(actor: &'a Actor, now: TimeStamp) -> Self {
        Self {
            actor,
            now,
            writes: WriteSet::new(),
            transitions: Vec::new(),
        }
    }

    fn put<T: minicbor::Encode<()>>(&mut self, kind: &str, id: &str, value: &T) -> anyhow::Result<()> {
        self.writes.put(&keys::record(kind, id), value)
    }
}

/// Buyer and seller act only on their own orders; admins and the system act on any.
fn ensure_party(order: &Order, actor: &Actor) -> Result<(), ValidationError> {
    let permitted = match actor.role {
        Role::Buyer => actor.user_id == order.buyer_id,
        Role::Seller => actor.user_id == order.seller_id,
        Role::Admin | Role::System => true,
    };
    if permitted {
        Ok(())
    } else {
        Err(ValidationError::NotAParty(actor.user_id.clone()))
    }
}

fn ensure_admin(actor: &Actor, action: &'static str) -> Result<(), ValidationError> {
    match actor.role {
        Role::Admin | Role::System => Ok(()),
        _ => Err(ValidationError::RoleNotPermitted("admin", action)),
    }
}

fn ensure_evidence_of(order: &Order, evidence: &Evidence) -> Result<(), ValidationError> {
    if evidence.order_id() != order.order_id {
        return Err(ValidationError::ForeignEvidence {
            evidence_id: evidence.evidence_id().to_string(),
            order_id: order.order_id.clone(),
        });
    }
    Ok(())
}

impl OrderWorkflowService {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self {
            store: Store::new(instance),
            locks: OrderLocks::new(),
            clock: Arc::new(SystemClock),
            config: WorkflowConfig::default(),
        }
    }

    pub fn with_config(
        instance: Arc<sled::Db>,
        config: WorkflowConfig,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            store: Store::new(instance),
            locks: OrderLocks::new(),
            clock,
            config,
        })
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn now(&self) -> TimeStamp {
        self.clock.now()
    }

    fn load<T>(&self, kind: &str, id: &str, missing: fn(String) -> LookupError) -> anyhow::Result<T>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match self.store.get::<T>(&keys::record(kind, id))? {
            Some(record) => Ok(record),
            None => Err(missing(id.to_string()).into()),
        }
    }

    fn load_order(&self, order_id: &str) -> anyhow::Result<Order> {
        self.load(keys::ORDER, order_id, LookupError::Order)
    }

    fn load_quote(&self, quote_id: &str) -> anyhow::Result<Quote> {
        self.load(keys::QUOTE, quote_id, LookupError::Quote)
    }

    fn load_payment(&self, payment_id: &str) -> anyhow::Result<Payment> {
        self.load(keys::PAYMENT, payment_id, LookupError::Payment)
    }

    fn load_evidence(&self, evidence_id: &str) -> anyhow::Result<Evidence> {
        self.load(keys::EVIDENCE, evidence_id, LookupError::Evidence)
    }

    fn load_dispute(&self, dispute_id: &str) -> anyhow::Result<Dispute> {
        self.load(keys::DISPUTE, dispute_id, LookupError::Dispute)
    }

    // one delivery record per order, keyed by the order id
    fn load_delivery(&self, order_id: &str) -> anyhow::Result<DeliveryConfirmation> {
        self.load(keys::DELIVERY, order_id, LookupError::Delivery)
    }

    /// Stages a new record and appends it to its order index.
    fn insert<T: minicbor::Encode<()>>(
        &self,
        txn: &mut Txn<'_>,
        kind: &str,
        order_id: &str,
        id: &str,
        value: &T,
    ) -> anyhow::Result<()> {
        let seq = self.store.next_seq()?;
        txn.put(kind, id, value)?;
        txn.writes.index(kind, order_id, &seq, id);
        Ok(())
    }

    fn audit(
        &self,
        txn: &mut Txn<'_>,
        order: &Order,
        action: AuditAction,
        from_state: Option<OrderStatus>,
        description: String,
    ) -> anyhow::Result<()> {
        let seq = self.store.next_seq()?;
        let entry = AuditLogEntry::new(
            new_uuid_to_bech32("log_")?,
            order.order_id.clone(),
            action,
            from_state,
            order.status,
            txn.actor,
            description,
            txn.now,
        );
        txn.writes.put(&format!("{}{}", keys::audit(&order.order_id), seq), &entry)
    }

    /// Audit entry for an action that leaves the order where it is.
    fn record(
        &self,
        txn: &mut Txn<'_>,
        order: &Order,
        action: AuditAction,
        description: impl Into<String>,
    ) -> anyhow::Result<()> {
        self.audit(txn, order, action, Some(order.status), description.into())
    }

    /// Moves the order along a legal edge and stages it with its audit entry.
    fn transition(
        &self,
        txn: &mut Txn<'_>,
        order: &mut Order,
        to: OrderStatus,
        action: AuditAction,
        description: impl Into<String>,
    ) -> anyhow::Result<()> {
        let from = order
            .apply_transition(to, txn.now)
            .inspect_err(|err| warn!(order_id = %order.order_id, %err, "transition rejected"))?;
        txn.put(keys::ORDER, &order.order_id, &*order)?;
        self.audit(txn, order, action, Some(from), description.into())?;
        txn.transitions.push((order.order_id.clone(), from, to));
        Ok(())
    }

    fn commit(&self, txn: Txn<'_>) -> anyhow::Result<()> {
        let Txn {
            actor,
            writes,
            transitions,
            ..
        } = txn;
        self.store.apply(writes)?;
        for (order_id, from, to) in transitions {
            info!(%order_id, %from, %to, actor = %actor.user_id, "order transitioned");
        }
        Ok(())
    }

    /// Moves an order to `new_status` if the transition table allows it.
    ///
    /// Edges owned by a component operation are refused here: a quote is locked by agreeing to
    /// it, a payment is verified by its receiver, a dispute is raised and resolved through its
    /// own calls. CANCELLED follows the rules of [`Self::cancel_order`] and a manual EXPIRED is
    /// for admins only.
    #[instrument(skip(self, actor, notes), fields(actor = %actor.user_id))]
    pub fn transition_order_state(
        &self,
        order_id: &str,
        new_status: OrderStatus,
        actor: &Actor,
        notes: Option<String>,
    ) -> anyhow::Result<Order> {
        self.locks.with_order(order_id, || {
            let mut order = self.load_order(order_id)?;
            ensure_party(&order, actor)?;
            validate_transition(order.status, new_status)?;

            let mut txn = Txn::new(actor, self.now());
            match new_status.owning_operation() {
                Some(_) if new_status == OrderStatus::Cancelled => {
                    let reason = notes.unwrap_or_else(|| "no reason given".to_string());
                    self.cancel(&mut txn, &mut order, &reason)?;
                }
                Some(operation) => {
                    return Err(StateError::TransitionOwned {
                        to: new_status,
                        operation,
                    }
                    .into());
                }
                None => {
                    ensure_admin(actor, "set an order's status directly")?;
                    let description = notes.unwrap_or_else(|| format!("Status set to {new_status}"));
                    self.transition(&mut txn, &mut order, new_status, AuditAction::StatusChanged, description)?;
                }
            }
            self.commit(txn)?;

            Ok(order)
        })
    }

    /// Cancels an open order. A disputed order is cancelled only by an admin, and its active
    /// dispute is settled as MUTUAL_CANCEL in the same batch.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub fn cancel_order(&self, order_id: &str, actor: &Actor, reason: &str) -> anyhow::Result<Order> {
        self.locks.with_order(order_id, || {
            let mut order = self.load_order(order_id)?;
            order.ensure_open()?;
            ensure_party(&order, actor)?;

            let mut txn = Txn::new(actor, self.now());
            self.cancel(&mut txn, &mut order, reason)?;
            self.commit(txn)?;

            Ok(order)
        })
    }

    // caller holds the order lock
    fn cancel(&self, txn: &mut Txn<'_>, order: &mut Order, reason: &str) -> anyhow::Result<()> {
        if order.status.is_disputed() {
            ensure_admin(txn.actor, "cancel a disputed order")?;
            let active = self
                .disputes_for_order(&order.order_id)?
                .into_iter()
                .filter(Dispute::is_active);
            for mut dispute in active {
                dispute.resolve(
                    ResolutionType::MutualCancel,
                    txn.actor.user_id.clone(),
                    Some(reason.to_string()),
                    None,
                    txn.now,
                )?;
                txn.put(keys::DISPUTE, &dispute.dispute_id, &dispute)?;
                self.record(
                    txn,
                    order,
                    AuditAction::DisputeResolved,
                    format!("Dispute {} closed by cancellation", dispute.dispute_id),
                )?;
            }
        }
        let description = format!("Cancelled by {}: {reason}", txn.actor.role);
        self.transition(txn, order, OrderStatus::Cancelled, AuditAction::OrderCancelled, description)
    }

    /// Runs every periodic sweep once.
    pub fn run_sweeps(&self) -> anyhow::Result<SweepReport> {
        let report = SweepReport {
            quotes_expired: self.expire_old_quotes(self.now())?,
            payments_expired: self.expire_overdue_payments()?,
            disputes_escalated: self.auto_escalate_disputes()?,
        };
        if report.total() > 0 {
            info!(?report, "sweep finished");
        }
        Ok(report)
    }

    pub fn order(&self, order_id: &str) -> anyhow::Result<Order> {
        self.load_order(order_id)
    }

    pub fn quote(&self, quote_id: &str) -> anyhow::Result<Quote> {
        self.load_quote(quote_id)
    }

    /// Every version of every quote on the order, oldest first.
    pub fn quotes_for_order(&self, order_id: &str) -> anyhow::Result<Vec<Quote>> {
        self.store.by_order(keys::QUOTE, order_id)
    }

    pub fn latest_quote(&self, order_id: &str) -> anyhow::Result<Option<Quote>> {
        Ok(self
            .quotes_for_order(order_id)?
            .into_iter()
            .max_by_key(|quote| quote.version))
    }

    pub fn locked_quote(&self, order_id: &str) -> anyhow::Result<Option<Quote>> {
        Ok(self
            .quotes_for_order(order_id)?
            .into_iter()
            .find(|quote| quote.status == QuoteStatus::Locked))
    }

    pub fn payment(&self, payment_id: &str) -> anyhow::Result<Payment> {
        self.load_payment(payment_id)
    }

    pub fn list_payments(&self, order_id: &str) -> anyhow::Result<Vec<Payment>> {
        self.store.by_order(keys::PAYMENT, order_id)
    }

    pub fn evidence(&self, evidence_id: &str) -> anyhow::Result<Evidence> {
        self.load_evidence(evidence_id)
    }

    /// The order's evidence chain in upload order.
    pub fn list_evidence(&self, order_id: &str) -> anyhow::Result<Vec<Evidence>> {
        self.store.by_order(keys::EVIDENCE, order_id)
    }

    pub fn delivery(&self, order_id: &str) -> anyhow::Result<Option<DeliveryConfirmation>> {
        self.store.get(&keys::record(keys::DELIVERY, order_id))
    }

    pub fn dispute(&self, dispute_id: &str) -> anyhow::Result<Dispute> {
        self.load_dispute(dispute_id)
    }

    pub fn disputes_for_order(&self, order_id: &str) -> anyhow::Result<Vec<Dispute>> {
        self.store.by_order(keys::DISPUTE, order_id)
    }

    /// The order's audit trail in append order.
    pub fn audit_log(&self, order_id: &str) -> anyhow::Result<Vec<AuditLogEntry>> {
        self.store.scan(&keys::audit(order_id))
    }

    /// Status reconstructed from the audit trail alone.
    pub fn replay_order_status(&self, order_id: &str) -> anyhow::Result<Option<OrderStatus>> {
        Ok(audit::replay_status(&self.audit_log(order_id)?)?)
    }

    pub fn view_history(&self, order_id: &str) -> anyhow::Result<String> {
        Ok(audit::render_history(&self.audit_log(order_id)?))
    }

    /// Every record attached to the order, merged into one chronological list.
    pub fn order_timeline(&self, order_id: &str) -> anyhow::Result<Vec<TimelineEvent>> {
        self.load_order(order_id)?;

        let mut events = Vec::new();
        events.extend(self.quotes_for_order(order_id)?.into_iter().map(TimelineEvent::Quote));
        events.extend(self.list_payments(order_id)?.into_iter().map(TimelineEvent::Payment));
        events.extend(self.list_evidence(order_id)?.into_iter().map(TimelineEvent::Evidence));
        events.extend(self.delivery(order_id)?.map(TimelineEvent::Delivery));
        events.extend(self.disputes_for_order(order_id)?.into_iter().map(TimelineEvent::Dispute));
        events.extend(self.audit_log(order_id)?.into_iter().map(TimelineEvent::Audit));

        Ok(timeline::merge(events))
    }
}
