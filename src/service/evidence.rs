//! Evidence uploads and the per-order hash chain
use tracing::{debug, instrument};

use super::{OrderWorkflowService, Txn, ensure_party};
use crate::audit::AuditAction;
use crate::error::ValidationError;
use crate::evidence::{self, Evidence, EvidenceRecord, EvidenceUpload};
use crate::store::keys;
use crate::types::Actor;
use crate::utils::new_uuid_to_bech32;

impl OrderWorkflowService {
    /// Appends evidence to the order's chain. Closed orders accept no new evidence.
    #[instrument(skip(self, upload, actor), fields(kind = %upload.evidence_type, actor = %actor.user_id))]
    pub fn upload_evidence(&self, order_id: &str, upload: EvidenceUpload, actor: &Actor) -> anyhow::Result<Evidence> {
        if upload.media_refs.is_empty() && upload.text.is_none() && upload.geo.is_none() {
            return Err(ValidationError::MissingField("Evidence content").into());
        }
        self.locks.with_order(order_id, || {
            let order = self.load_order(order_id)?;
            order.ensure_open()?;
            ensure_party(&order, actor)?;

            let now = self.now();
            let previous_hash = self
                .list_evidence(order_id)?
                .last()
                .map(|previous| previous.content_hash.clone());
            let evidence = Evidence::seal(EvidenceRecord {
                evidence_id: new_uuid_to_bech32("evd_")?,
                order_id: order.order_id.clone(),
                evidence_type: upload.evidence_type,
                uploaded_by: actor.user_id.clone(),
                uploaded_by_role: actor.role,
                media_refs: upload.media_refs,
                text: upload.text,
                geo: upload.geo,
                device_timestamp: upload.device_timestamp,
                uploaded_at: now,
                previous_hash,
            })?;

            let mut txn = Txn::new(actor, now);
            self.insert(&mut txn, keys::EVIDENCE, order_id, evidence.evidence_id(), &evidence)?;
            self.record(
                &mut txn,
                &order,
                AuditAction::EvidenceUploaded,
                format!("{} evidence {} uploaded", evidence.record.evidence_type, evidence.evidence_id()),
            )?;
            self.commit(txn)?;

            debug!(evidence_id = evidence.evidence_id(), hash = %evidence.content_hash, "evidence sealed");
            Ok(evidence)
        })
    }

    /// Stamps verification metadata. The hashed record is untouched.
    #[instrument(skip(self, actor, note), fields(actor = %actor.user_id))]
    pub fn verify_evidence(&self, evidence_id: &str, actor: &Actor, note: Option<String>) -> anyhow::Result<Evidence> {
        let order_id = self.load_evidence(evidence_id)?.record.order_id;
        self.locks.with_order(&order_id, || {
            let mut evidence = self.load_evidence(evidence_id)?;
            let order = self.load_order(&order_id)?;
            ensure_party(&order, actor)?;

            let now = self.now();
            evidence.verify(actor.user_id.clone(), note, now);

            let mut txn = Txn::new(actor, now);
            txn.put(keys::EVIDENCE, evidence_id, &evidence)?;
            self.record(
                &mut txn,
                &order,
                AuditAction::EvidenceVerified,
                format!("Evidence {evidence_id} verified"),
            )?;
            self.commit(txn)?;

            Ok(evidence)
        })
    }

    /// Recomputes every hash and link of the order's evidence chain.
    pub fn verify_evidence_chain(&self, order_id: &str) -> anyhow::Result<()> {
        self.load_order(order_id)?;
        evidence::verify_chain(&self.list_evidence(order_id)?)
    }
}
