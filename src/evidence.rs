//! Append-only, hash-chained proof records
//!
//! Each record hashes its immutable content together with the hash of the order's previous
//! record, so rewriting any earlier record breaks every hash after it. Verification metadata
//! lives outside the hashed content.
use std::fmt;

use crate::error::StateError;
use crate::types::{GeoPoint, Role, TimeStamp};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvidenceType {
    #[n(0)]
    Photo,
    #[n(1)]
    Video,
    #[n(2)]
    Text,
    #[n(3)]
    Document,
    #[n(4)]
    Location,
    #[n(5)]
    Other,
}

impl EvidenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceType::Photo => "PHOTO",
            EvidenceType::Video => "VIDEO",
            EvidenceType::Text => "TEXT",
            EvidenceType::Document => "DOCUMENT",
            EvidenceType::Location => "LOCATION",
            EvidenceType::Other => "OTHER",
        }
    }
}

impl fmt::Display for EvidenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an uploader hands in. Media references are opaque handles.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceUpload {
    pub evidence_type: EvidenceType,
    pub media_refs: Vec<String>,
    pub text: Option<String>,
    pub geo: Option<GeoPoint>,
    pub device_timestamp: Option<TimeStamp>,
}

impl EvidenceUpload {
    pub fn new(evidence_type: EvidenceType) -> Self {
        Self {
            evidence_type,
            media_refs: Vec::new(),
            text: None,
            geo: None,
            device_timestamp: None,
        }
    }
    pub fn photo(media_ref: impl Into<String>) -> Self {
        Self::new(EvidenceType::Photo).add_media(media_ref)
    }
    pub fn add_media(mut self, media_ref: impl Into<String>) -> Self {
        self.media_refs.push(media_ref.into());
        self
    }
    pub fn set_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
    pub fn set_geo(mut self, geo: GeoPoint) -> Self {
        self.geo = Some(geo);
        self
    }
    pub fn set_device_timestamp(mut self, at: TimeStamp) -> Self {
        self.device_timestamp = Some(at);
        self
    }
}

/// The hashed, never-mutated part of an evidence record.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct EvidenceRecord {
    #[n(0)]
    pub evidence_id: String,
    #[n(1)]
    pub order_id: String,
    #[n(2)]
    pub evidence_type: EvidenceType,
    #[n(3)]
    pub uploaded_by: String,
    #[n(4)]
    pub uploaded_by_role: Role,
    #[n(5)]
    pub media_refs: Vec<String>,
    #[n(6)]
    pub text: Option<String>,
    #[n(7)]
    pub geo: Option<GeoPoint>,
    #[n(8)]
    pub device_timestamp: Option<TimeStamp>,
    #[n(9)]
    pub uploaded_at: TimeStamp,
    #[n(10)]
    pub previous_hash: Option<String>, // hash of the order's prior evidence
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct EvidenceVerification {
    #[n(0)]
    pub verified_by: String,
    #[n(1)]
    pub verified_at: TimeStamp,
    #[n(2)]
    pub note: Option<String>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Evidence {
    #[n(0)]
    pub record: EvidenceRecord,
    #[n(1)]
    pub content_hash: String,
    #[n(2)]
    pub verification: Option<EvidenceVerification>,
}

impl EvidenceRecord {
    pub fn digest(&self) -> anyhow::Result<String> {
        let cbor = minicbor::to_vec(self)?;
        Ok(sha256::digest(&cbor))
    }
}

impl Evidence {
    pub fn seal(record: EvidenceRecord) -> anyhow::Result<Self> {
        let content_hash = record.digest()?;
        Ok(Self {
            record,
            content_hash,
            verification: None,
        })
    }

    pub fn evidence_id(&self) -> &str {
        &self.record.evidence_id
    }

    pub fn order_id(&self) -> &str {
        &self.record.order_id
    }

    pub fn is_verified(&self) -> bool {
        self.verification.is_some()
    }

    pub fn verify(&mut self, verified_by: String, note: Option<String>, now: TimeStamp) {
        self.verification = Some(EvidenceVerification {
            verified_by,
            verified_at: now,
            note,
        });
    }
}

/// Recomputes every hash and link of an order's evidence, given in upload order.
pub fn verify_chain(chain: &[Evidence]) -> anyhow::Result<()> {
    let mut previous: Option<&str> = None;
    for evidence in chain {
        if evidence.record.previous_hash.as_deref() != previous {
            return Err(StateError::EvidenceChainBroken(evidence.evidence_id().to_string()).into());
        }
        if evidence.record.digest()? != evidence.content_hash {
            return Err(StateError::EvidenceChainBroken(evidence.evidence_id().to_string()).into());
        }
        previous = Some(&evidence.content_hash);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, previous_hash: Option<String>) -> EvidenceRecord {
        EvidenceRecord {
            evidence_id: id.into(),
            order_id: "order_1".into(),
            evidence_type: EvidenceType::Photo,
            uploaded_by: "seller".into(),
            uploaded_by_role: Role::Seller,
            media_refs: vec![format!("media://{id}")],
            text: None,
            geo: Some(GeoPoint::new(18.52, 73.85)),
            device_timestamp: None,
            uploaded_at: TimeStamp::new(),
            previous_hash,
        }
    }

    fn chain_of(len: usize) -> Vec<Evidence> {
        let mut chain: Vec<Evidence> = Vec::new();
        for i in 0..len {
            let previous = chain.last().map(|e| e.content_hash.clone());
            chain.push(Evidence::seal(record(&format!("evd_{i}"), previous)).unwrap());
        }
        chain
    }

    #[test]
    fn intact_chain_verifies() {
        assert!(verify_chain(&chain_of(4)).is_ok());
    }

    #[test]
    fn verification_metadata_does_not_affect_hash() {
        let mut chain = chain_of(2);
        chain[0].verify("admin".into(), Some("matches invoice".into()), TimeStamp::new());
        assert!(verify_chain(&chain).is_ok());
    }

    #[test]
    fn tampered_record_breaks_chain() {
        let mut chain = chain_of(3);
        chain[1].record.media_refs = vec!["media://swapped".into()];

        let err = verify_chain(&chain).unwrap_err();
        assert_eq!(
            err.downcast_ref::<StateError>(),
            Some(&StateError::EvidenceChainBroken("evd_1".into()))
        );
    }

    #[test]
    fn removed_record_breaks_chain() {
        let mut chain = chain_of(3);
        chain.remove(1);
        assert!(verify_chain(&chain).is_err());
    }
}
