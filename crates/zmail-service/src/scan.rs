//! Pull-based scanning of received memos.
//!
//! A [`Scanner`] is created from one `list_received` snapshot and then
//! yields decrypted [`ScannedPart`]s one output at a time. Anything that is
//! not a valid frame, not an envelope, or not decryptable with one of the
//! scanner's keys is skipped. Because the scanner only filters by height, a
//! scan can be restarted from any height after a failure or cancellation.

use std::collections::VecDeque;

use tracing::{debug, trace};
use zmail_core::cancel::CancelToken;
use zmail_core::crypto::{
    self, SecretKey, decode_from_memo, derive_address_keypair, derive_encryption_keypair,
};
use zmail_core::error::ZmailError;
use zmail_core::memo;
use zmail_core::traits::WalletNode;
use zmail_core::types::{ReceivedOutput, SpendingKey};

use crate::assemble::ScannedPart;

/// What to scan.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub address: String,
    /// Also try the key derived from this viewing key.
    pub viewing_key: Option<SpendingKey>,
    /// Lowest height to include.
    pub from_height: u64,
    /// Highest height to include. `None` scans to the tip and includes
    /// unmined outputs.
    pub to_height: Option<u64>,
}

impl ScanRequest {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            viewing_key: None,
            from_height: 0,
            to_height: None,
        }
    }

    fn includes(&self, height: Option<u64>) -> bool {
        match (height, self.to_height) {
            (None, None) => true,
            (None, Some(_)) => false,
            (Some(h), to) => h >= self.from_height && to.is_none_or(|to| h <= to),
        }
    }
}

/// Scan position reported to progress callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    /// Outputs examined so far.
    pub scanned: usize,
    /// Outputs in range.
    pub total: usize,
    /// Height of the last examined output.
    pub height: Option<u64>,
    /// Parts decrypted so far.
    pub found: usize,
}

/// Iterator over the decryptable parts received by one address.
pub struct Scanner {
    pending: VecDeque<ReceivedOutput>,
    keys: Vec<SecretKey>,
    progress: ScanProgress,
}

impl Scanner {
    /// Fetch received outputs for `request.address` and prepare to scan them.
    pub async fn start(node: &dyn WalletNode, request: &ScanRequest) -> Result<Self, ZmailError> {
        let outputs = node
            .list_received(&request.address)
            .await
            .map_err(|e| ZmailError::Sync(format!("listing received outputs: {e}")))?;
        Self::from_outputs(outputs, request)
    }

    /// Scanner over an already fetched snapshot.
    pub fn from_outputs(
        outputs: Vec<ReceivedOutput>,
        request: &ScanRequest,
    ) -> Result<Self, ZmailError> {
        let mut keys = vec![derive_address_keypair(&request.address)?.secret];
        if let Some(viewing_key) = &request.viewing_key {
            keys.push(derive_encryption_keypair(viewing_key)?.secret);
        }

        let mut pending: Vec<ReceivedOutput> =
            outputs.into_iter().filter(|o| request.includes(o.height)).collect();
        // Mined outputs by height, then mempool outputs.
        pending.sort_by_key(|o| (o.height.unwrap_or(u64::MAX), o.txid.clone(), o.output_index));

        let total = pending.len();
        debug!(address = %request.address, total, from = request.from_height, "scan started");
        Ok(Self {
            pending: pending.into(),
            keys,
            progress: ScanProgress {
                scanned: 0,
                total,
                height: None,
                found: 0,
            },
        })
    }

    pub fn progress(&self) -> ScanProgress {
        self.progress
    }

    /// Height of the last examined output. Passing it as `from_height`
    /// re-examines that height, so nothing is missed on restart.
    pub fn resume_height(&self) -> Option<u64> {
        self.progress.height
    }

    /// Drain the scanner, reporting progress after every output and
    /// stopping early if `cancel` fires.
    pub fn scan_all(
        &mut self,
        cancel: &CancelToken,
        mut on_progress: impl FnMut(ScanProgress),
    ) -> Result<Vec<ScannedPart>, ZmailError> {
        let mut parts = Vec::new();
        while !self.pending.is_empty() {
            cancel.check()?;
            if let Some(part) = self.step() {
                parts.push(part);
            }
            on_progress(self.progress);
        }
        Ok(parts)
    }

    /// Examine one output. Returns the part if it decrypted.
    fn step(&mut self) -> Option<ScannedPart> {
        let output = self.pending.pop_front()?;
        self.progress.scanned += 1;
        if output.height.is_some() {
            self.progress.height = output.height;
        }
        let part = self.open(output);
        if part.is_some() {
            self.progress.found += 1;
        }
        part
    }

    fn open(&self, output: ReceivedOutput) -> Option<ScannedPart> {
        if !memo::validate(&output.memo) {
            trace!(txid = %output.txid, "not a zmail frame");
            return None;
        }
        let frame = memo::decode(&output.memo).ok()?;
        let Some(envelope) = decode_from_memo(&frame.payload) else {
            trace!(txid = %output.txid, "frame carries no envelope");
            return None;
        };
        let Some(plaintext) = self
            .keys
            .iter()
            .find_map(|key| crypto::decrypt_message(&envelope, key).ok())
        else {
            debug!(txid = %output.txid, "envelope not addressed to us");
            return None;
        };
        let content = String::from_utf8(plaintext).ok()?;

        Some(ScannedPart {
            txid: output.txid,
            height: output.height,
            output_index: output.output_index,
            message_type: frame.message_type,
            sequence: frame.sequence,
            timestamp: frame.timestamp,
            content,
        })
    }
}

impl Iterator for Scanner {
    type Item = ScannedPart;

    fn next(&mut self) -> Option<ScannedPart> {
        while !self.pending.is_empty() {
            if let Some(part) = self.step() {
                return Some(part);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zmail_core::crypto::{derive_public_key_from_address, encode_to_memo, encrypt_message};
    use zmail_core::types::MessageType;

    const ME: &str = "zs1receiver";

    fn sealed(address: &str, text: &str, ty: MessageType, seq: u16, ts: u32) -> Vec<u8> {
        let key = derive_public_key_from_address(address).unwrap();
        let envelope = encrypt_message(text.as_bytes(), &key).unwrap();
        let payload = encode_to_memo(&envelope).unwrap();
        memo::encode_at(&payload, ty, seq, ts).unwrap().to_vec()
    }

    fn output(txid: &str, height: Option<u64>, memo: Vec<u8>) -> ReceivedOutput {
        ReceivedOutput {
            txid: txid.into(),
            height,
            output_index: 0,
            amount: 10_000,
            memo,
        }
    }

    #[test]
    fn yields_only_decryptable_parts() {
        let plain = memo::encode_at(b"plaintext", MessageType::Text, 0, 1).unwrap().to_vec();
        let outputs = vec![
            output("a", Some(10), sealed(ME, "hello", MessageType::Text, 0, 100)),
            output("b", Some(11), vec![0xF6; 512]),
            output("c", Some(12), plain),
            output("d", Some(13), sealed("zs1someoneelse", "nope", MessageType::Text, 0, 101)),
        ];
        let scanner = Scanner::from_outputs(outputs, &ScanRequest::new(ME)).unwrap();
        let parts: Vec<_> = scanner.collect();

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].txid, "a");
        assert_eq!(parts[0].content, "hello");
        assert_eq!(parts[0].timestamp, 100);
    }

    #[test]
    fn height_range_filters_outputs() {
        let outputs = vec![
            output("early", Some(5), sealed(ME, "1", MessageType::Text, 0, 1)),
            output("inside", Some(15), sealed(ME, "2", MessageType::Text, 0, 2)),
            output("late", Some(25), sealed(ME, "3", MessageType::Text, 0, 3)),
            output("mempool", None, sealed(ME, "4", MessageType::Text, 0, 4)),
        ];
        let request = ScanRequest {
            from_height: 10,
            to_height: Some(20),
            ..ScanRequest::new(ME)
        };
        let txids: Vec<_> =
            Scanner::from_outputs(outputs.clone(), &request).unwrap().map(|p| p.txid).collect();
        assert_eq!(txids, vec!["inside"]);

        let to_tip = ScanRequest {
            from_height: 10,
            ..ScanRequest::new(ME)
        };
        let txids: Vec<_> =
            Scanner::from_outputs(outputs, &to_tip).unwrap().map(|p| p.txid).collect();
        assert_eq!(txids, vec!["inside", "late", "mempool"]);
    }

    #[test]
    fn viewing_key_opens_key_addressed_parts() {
        let viewing_key = SpendingKey::new("secret-extended-key-viewer");
        let public = derive_encryption_keypair(&viewing_key).unwrap().public;
        let envelope = encrypt_message(b"direct", &public).unwrap();
        let payload = encode_to_memo(&envelope).unwrap();
        let frame = memo::encode_at(&payload, MessageType::Text, 0, 7).unwrap().to_vec();

        let outputs = vec![output("k", Some(1), frame)];
        let without_key = Scanner::from_outputs(outputs.clone(), &ScanRequest::new(ME)).unwrap();
        assert_eq!(without_key.count(), 0);

        let request = ScanRequest {
            viewing_key: Some(viewing_key),
            ..ScanRequest::new(ME)
        };
        let parts: Vec<_> = Scanner::from_outputs(outputs, &request).unwrap().collect();
        assert_eq!(parts[0].content, "direct");
    }

    #[test]
    fn scan_all_reports_progress() {
        let outputs = vec![
            output("a", Some(1), sealed(ME, "x", MessageType::Text, 0, 1)),
            output("b", Some(2), vec![0; 512]),
            output("c", Some(3), sealed(ME, "y", MessageType::Text, 0, 2)),
        ];
        let mut scanner = Scanner::from_outputs(outputs, &ScanRequest::new(ME)).unwrap();
        let mut seen = Vec::new();
        let parts = scanner.scan_all(&CancelToken::new(), |p| seen.push(p)).unwrap();

        assert_eq!(parts.len(), 2);
        assert_eq!(seen.len(), 3);
        assert_eq!(
            seen[2],
            ScanProgress {
                scanned: 3,
                total: 3,
                height: Some(3),
                found: 2
            }
        );
        assert_eq!(scanner.resume_height(), Some(3));
    }

    #[test]
    fn cancellation_stops_between_items() {
        let outputs = vec![
            output("a", Some(1), sealed(ME, "x", MessageType::Text, 0, 1)),
            output("b", Some(2), sealed(ME, "y", MessageType::Text, 0, 2)),
        ];
        let mut scanner = Scanner::from_outputs(outputs, &ScanRequest::new(ME)).unwrap();
        let cancel = CancelToken::new();
        let err = scanner
            .scan_all(&cancel, |p| {
                if p.scanned == 1 {
                    cancel.cancel();
                }
            })
            .unwrap_err();

        assert_eq!(err, ZmailError::Cancelled);
        assert_eq!(scanner.progress().scanned, 1);
        // The remaining output is still there for the caller.
        assert_eq!(scanner.next().map(|p| p.content), Some("y".to_string()));
    }

    #[test]
    fn empty_address_rejected() {
        assert!(matches!(
            Scanner::from_outputs(vec![], &ScanRequest::new("")),
            Err(ZmailError::InvalidAddress(_))
        ));
    }
}
