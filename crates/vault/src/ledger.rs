//! # Proof Ledger
//!
//! Append-only, hash-chained record of every verification. Each record's
//! `content_hash` is BLAKE3 over its canonical JSON body, which includes the
//! previous record's hash, so editing or dropping any line breaks every hash
//! after it. With a backing file, records are appended as JSON lines.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::theorem::TheoremId;
use crate::verifier::VerificationResult;
use crate::VaultError;

/// `previous_hash` of the first record.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRecord {
    pub id: String,
    pub theorem_id: TheoremId,
    pub transformation_id: String,
    /// File the transformation targeted.
    pub context: String,
    pub verification: VerificationResult,
    pub previous_hash: String,
    pub content_hash: String,
    pub timestamp_ms: u64,
    pub duration_ms: u64,
}

/// Fields covered by `content_hash`.
#[derive(Serialize)]
struct HashedBody<'a> {
    id: &'a str,
    theorem_id: TheoremId,
    transformation_id: &'a str,
    context: &'a str,
    verification: &'a VerificationResult,
    previous_hash: &'a str,
    timestamp_ms: u64,
    duration_ms: u64,
}

impl ProofRecord {
    fn compute_hash(&self) -> Result<String, VaultError> {
        let body = HashedBody {
            id: &self.id,
            theorem_id: self.theorem_id,
            transformation_id: &self.transformation_id,
            context: &self.context,
            verification: &self.verification,
            previous_hash: &self.previous_hash,
            timestamp_ms: self.timestamp_ms,
            duration_ms: self.duration_ms,
        };
        let bytes = serde_json::to_vec(&body)?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub theorems: BTreeSet<TheoremId>,
}

#[derive(Debug, Default)]
pub struct ProofLedger {
    records: Vec<ProofRecord>,
    path: Option<PathBuf>,
}

impl ProofLedger {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens (or starts) a JSON-lines ledger at `path`, loading existing
    /// records. Loading does not check the chain; call [`verify_chain`].
    ///
    /// [`verify_chain`]: ProofLedger::verify_chain
    pub fn open(path: &Path) -> Result<Self, VaultError> {
        let mut records = Vec::new();
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for (n, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record = serde_json::from_str(&line).map_err(|e| VaultError::CorruptLedger {
                    line: n + 1,
                    reason: e.to_string(),
                })?;
                records.push(record);
            }
        }
        Ok(Self {
            records,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn records(&self) -> &[ProofRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ProofRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Appends a record chained to the current head and returns it.
    ///
    /// The record is kept in memory even if the file append fails; the
    /// failure is logged.
    pub fn append(
        &mut self,
        transformation_id: &str,
        context: &str,
        verification: VerificationResult,
        duration_ms: u64,
    ) -> Result<&ProofRecord, VaultError> {
        let previous_hash = self
            .records
            .last()
            .map(|r| r.content_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let mut record = ProofRecord {
            id: uuid::Uuid::new_v4().to_string(),
            theorem_id: verification.theorem,
            transformation_id: transformation_id.to_string(),
            context: context.to_string(),
            verification,
            previous_hash,
            content_hash: String::new(),
            timestamp_ms: common::now_millis(),
            duration_ms,
        };
        record.content_hash = record.compute_hash()?;

        if let Err(e) = self.persist(&record) {
            tracing::warn!(id = %record.id, error = %e, "proof ledger append failed");
        }
        self.records.push(record);
        let idx = self.records.len() - 1;
        Ok(&self.records[idx])
    }

    fn persist(&self, record: &ProofRecord) -> Result<(), VaultError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Recomputes every hash and link. Returns the number of records checked.
    pub fn verify_chain(&self) -> Result<usize, VaultError> {
        let mut expected_prev = GENESIS_HASH.to_string();
        for (index, record) in self.records.iter().enumerate() {
            if record.previous_hash != expected_prev {
                return Err(VaultError::ChainBroken {
                    index,
                    reason: "previous hash does not match".into(),
                });
            }
            if record.compute_hash()? != record.content_hash {
                return Err(VaultError::ChainBroken {
                    index,
                    reason: "content hash mismatch".into(),
                });
            }
            expected_prev = record.content_hash.clone();
        }
        Ok(self.records.len())
    }

    pub fn summary(&self) -> LedgerSummary {
        let total = self.records.len();
        let succeeded = self
            .records
            .iter()
            .filter(|r| r.verification.success)
            .count();
        LedgerSummary {
            total,
            succeeded,
            failed: total - succeeded,
            success_rate: if total == 0 {
                0.0
            } else {
                succeeded as f64 / total as f64
            },
            theorems: self.records.iter().map(|r| r.theorem_id).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(theorem: TheoremId, success: bool) -> VerificationResult {
        VerificationResult {
            theorem,
            success,
            pattern_before: true,
            pattern_after: !success,
            marker_present: success,
            trivially_satisfied: false,
            errors_before: 1,
            errors_after: 0,
            message: String::new(),
        }
    }

    #[test]
    fn test_chain_links() {
        let mut ledger = ProofLedger::in_memory();
        ledger
            .append("stray-text-to-comment", "a.js", result(TheoremId::StrayText, true), 3)
            .unwrap();
        ledger
            .append("ensure-render-import", "b.jsx", result(TheoremId::RenderBinding, false), 1)
            .unwrap();

        let records = ledger.records();
        assert_eq!(records[0].previous_hash, GENESIS_HASH);
        assert_eq!(records[1].previous_hash, records[0].content_hash);
        assert_eq!(ledger.verify_chain().unwrap(), 2);

        let summary = ledger.summary();
        assert_eq!((summary.total, summary.succeeded, summary.failed), (2, 1, 1));
        assert_eq!(summary.success_rate, 0.5);
        assert_eq!(summary.theorems.len(), 2);
    }

    #[test]
    fn test_tampering_detected() {
        let mut ledger = ProofLedger::in_memory();
        ledger
            .append("r", "a.js", result(TheoremId::StrayText, false), 0)
            .unwrap();
        ledger.records[0].verification.success = true;
        assert!(matches!(
            ledger.verify_chain(),
            Err(VaultError::ChainBroken { index: 0, .. })
        ));
    }

    #[test]
    fn test_persisted_ledger_reloads() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("proofs.jsonl");
        {
            let mut ledger = ProofLedger::open(&path).unwrap();
            ledger
                .append("r", "a.js", result(TheoremId::TemplateInterpolation, true), 2)
                .unwrap();
            ledger
                .append("r", "a.js", result(TheoremId::TemplateInterpolation, true), 2)
                .unwrap();
        }
        let reloaded = ProofLedger::open(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.verify_chain().unwrap(), 2);

        // Appending after reload continues the chain.
        let mut reloaded = reloaded;
        reloaded
            .append("r", "b.js", result(TheoremId::StrayText, false), 0)
            .unwrap();
        assert_eq!(ProofLedger::open(&path).unwrap().verify_chain().unwrap(), 3);
    }

    #[test]
    fn test_corrupt_line_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("proofs.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();
        assert!(matches!(
            ProofLedger::open(&path),
            Err(VaultError::CorruptLedger { line: 1, .. })
        ));
    }
}
