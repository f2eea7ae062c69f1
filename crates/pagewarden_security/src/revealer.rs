//! Audited decrypt-for-display.
//!
//! Every reveal of raw findings to a consumer records exactly one audit row
//! per content-unit's worth of findings. Internal re-processing should use
//! [`FindingsCipher`] directly; that path does not audit.

use crate::cipher::{CryptoError, FindingsCipher, PayloadMeta};
use pagewarden_db::{StoredEvent, WardenDb};
use pagewarden_protocol::EventPayload;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum RevealError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Audit write failed: {0}")]
    Audit(#[from] pagewarden_db::DbError),
}

/// The audited read path for raw findings.
#[derive(Clone)]
pub struct Revealer {
    db: WardenDb,
    cipher: FindingsCipher,
}

impl Revealer {
    pub fn new(db: WardenDb, cipher: FindingsCipher) -> Self {
        Self { db, cipher }
    }

    /// Decrypt the findings payload of one stored event and record the
    /// access. A malformed stored payload is recovered as an empty payload
    /// (and logged) rather than propagated; the audit row is still written
    /// with the count actually revealed.
    pub async fn reveal(
        &self,
        event: &StoredEvent,
        purpose: &str,
    ) -> Result<EventPayload, RevealError> {
        let payload = match event.payload_enc.as_deref() {
            None => EventPayload::default(),
            Some(ciphertext) => {
                let meta = PayloadMeta::new(event.scan_id.clone(), event.partition_key.clone());
                let plaintext = self.cipher.decrypt(ciphertext, &meta)?;
                match serde_json::from_str(&plaintext) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(
                            scan_id = %event.scan_id,
                            seq = event.seq,
                            error = %e,
                            "Malformed stored payload, returning empty findings"
                        );
                        EventPayload::default()
                    }
                }
            }
        };

        self.db
            .record_access(
                &event.scan_id,
                &event.partition_key,
                event.unit_id.as_deref(),
                purpose,
                payload.findings.len() as i64,
            )
            .await?;

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagewarden_protocol::{Finding, ScanEvent, ScanEventKind};

    fn payload() -> EventPayload {
        EventPayload {
            findings: vec![Finding {
                kind: "EMAIL_ADDRESS".to_string(),
                start: 0,
                end: 17,
                score: 0.92,
                source: "detector".to_string(),
                raw: "alice@example.com".to_string(),
                masked: Finding::mask("alice@example.com"),
            }],
            snippet: Some("contact alice@example.com for access".to_string()),
        }
    }

    #[tokio::test]
    async fn reveal_decrypts_and_audits() {
        let db = WardenDb::open_in_memory().await.unwrap();
        let cipher = FindingsCipher::from_passphrase("k");

        let mut event = ScanEvent::new("s1".into(), "SPACE".into(), ScanEventKind::Item);
        event.unit_id = Some("p1".to_string());
        let meta = PayloadMeta::new(event.scan_id.clone(), event.partition_key.clone());
        let enc = cipher
            .encrypt(&serde_json::to_string(&payload()).unwrap(), &meta)
            .unwrap();
        let seq = db.append_event(&event, Some(&enc)).await.unwrap();
        let stored = db.get_event(&"s1".into(), seq).await.unwrap().unwrap();

        let revealer = Revealer::new(db.clone(), cipher);
        let revealed = revealer.reveal(&stored, "review").await.unwrap();
        assert_eq!(revealed.findings.len(), 1);
        assert_eq!(revealed.findings[0].raw, "alice@example.com");

        let audit = db.list_access(&"s1".into(), 10).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].purpose, "review");
        assert_eq!(audit[0].findings_count, 1);
        assert_eq!(audit[0].unit_id.as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn malformed_payload_recovers_empty() {
        let db = WardenDb::open_in_memory().await.unwrap();
        let cipher = FindingsCipher::from_passphrase("k");

        let event = ScanEvent::new("s1".into(), "SPACE".into(), ScanEventKind::Item);
        let meta = PayloadMeta::new(event.scan_id.clone(), event.partition_key.clone());
        let enc = cipher.encrypt("this is not json", &meta).unwrap();
        let seq = db.append_event(&event, Some(&enc)).await.unwrap();
        let stored = db.get_event(&"s1".into(), seq).await.unwrap().unwrap();

        let revealer = Revealer::new(db.clone(), cipher);
        let revealed = revealer.reveal(&stored, "review").await.unwrap();
        assert!(revealed.findings.is_empty());

        // The access is still audited, with zero findings revealed.
        let audit = db.list_access(&"s1".into(), 10).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].findings_count, 0);
    }
}
