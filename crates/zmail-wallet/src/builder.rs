//! Client-side transaction planning for endpoints without wallet RPC.
//!
//! Building a shielded transaction happens in three steps:
//! 1. Select notes owned by the sender (largest first)
//! 2. Fetch a witness for every selected note at the current anchor
//! 3. Hand the validated [`TransactionPlan`] to a [`TransactionProver`]
//!
//! The plan is fully checked before the prover sees it, so a prover never
//! has to deal with unbalanced or malformed requests.

use std::sync::Arc;

use tracing::debug;
use zmail_core::constants::MEMO_SIZE;
use zmail_core::traits::NoteSource;
use zmail_core::types::{IncrementalWitness, ShieldedNote, ShieldedSend, SpendingKey};

use crate::error::WalletError;
use crate::prover::{ProvenTransaction, TransactionProver};
use crate::selection::NoteSelector;

/// A note being spent together with its Merkle witness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedInput {
    pub note: ShieldedNote,
    pub witness: IncrementalWitness,
}

/// A shielded output to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOutput {
    /// Destination address.
    pub address: String,
    /// Value in zatoshis.
    pub value: u64,
    /// Memo field, exactly 512 bytes.
    pub memo: Vec<u8>,
}

/// Everything a prover needs to produce a raw transaction.
#[derive(Debug, Clone)]
pub struct TransactionPlan {
    pub spending_key: SpendingKey,
    /// Sender address. Change goes back here.
    pub from: String,
    pub inputs: Vec<PlannedInput>,
    /// Primary output first, then change (if any).
    pub outputs: Vec<PlannedOutput>,
    pub fee: u64,
    /// Commitment tree height the witnesses were computed at.
    pub anchor_height: u64,
}

impl TransactionPlan {
    /// Structural checks: key present, at least one input and output, every
    /// memo exactly 512 bytes, and inputs equal to outputs plus fee.
    pub fn validate(&self) -> Result<(), WalletError> {
        if self.spending_key.is_blank() {
            return Err(WalletError::MissingSpendingKey);
        }
        if self.inputs.is_empty() {
            return Err(WalletError::InvalidPlan("no inputs".into()));
        }
        if self.outputs.is_empty() {
            return Err(WalletError::InvalidPlan("no outputs".into()));
        }
        if let Some(bad) = self.outputs.iter().find(|o| o.memo.len() != MEMO_SIZE) {
            return Err(WalletError::InvalidPlan(format!(
                "memo for {} is {} bytes, expected {MEMO_SIZE}",
                bad.address,
                bad.memo.len()
            )));
        }

        let total_in = sum(self.inputs.iter().map(|i| i.note.value))?;
        let total_out = sum(self.outputs.iter().map(|o| o.value).chain([self.fee]))?;
        if total_in != total_out {
            return Err(WalletError::InvalidPlan(format!(
                "inputs {total_in} != outputs plus fee {total_out}"
            )));
        }
        Ok(())
    }

    /// The output carrying the message.
    pub fn primary_output(&self) -> Option<&PlannedOutput> {
        self.outputs.first()
    }
}

fn sum(mut values: impl Iterator<Item = u64>) -> Result<u64, WalletError> {
    values
        .try_fold(0u64, u64::checked_add)
        .ok_or_else(|| WalletError::InvalidAmount("value overflow".into()))
}

/// Plans shielded sends against a [`NoteSource`].
pub struct TransactionBuilder {
    source: Arc<dyn NoteSource>,
}

impl TransactionBuilder {
    pub fn new(source: Arc<dyn NoteSource>) -> Self {
        Self { source }
    }

    /// Select notes, fetch witnesses, and lay out the outputs for `request`.
    pub async fn plan(
        &self,
        request: &ShieldedSend,
        spending_key: &SpendingKey,
    ) -> Result<TransactionPlan, WalletError> {
        if spending_key.is_blank() {
            return Err(WalletError::MissingSpendingKey);
        }

        let notes = self.source.get_utxos(&request.from).await?;
        let selection = NoteSelector::select(&notes, request.amount, request.fee)?;
        let anchor_height = self.source.get_anchor_height().await?;

        let mut inputs = Vec::with_capacity(selection.selected.len());
        for note in selection.selected {
            let witness = self.source.get_witness(&note).await?;
            inputs.push(PlannedInput { note, witness });
        }

        let mut outputs = vec![PlannedOutput {
            address: request.to.clone(),
            value: request.amount,
            memo: request.memo.to_vec(),
        }];
        if selection.change > 0 {
            outputs.push(PlannedOutput {
                address: request.from.clone(),
                value: selection.change,
                memo: vec![0u8; MEMO_SIZE],
            });
        }

        let plan = TransactionPlan {
            spending_key: spending_key.clone(),
            from: request.from.clone(),
            inputs,
            outputs,
            fee: request.fee,
            anchor_height,
        };
        plan.validate()?;

        debug!(
            inputs = plan.inputs.len(),
            outputs = plan.outputs.len(),
            anchor_height,
            change = selection.change,
            "transaction planned"
        );
        Ok(plan)
    }

    /// Plan `request` and hand the plan to `prover`.
    pub async fn build(
        &self,
        prover: &dyn TransactionProver,
        request: &ShieldedSend,
        spending_key: &SpendingKey,
    ) -> Result<ProvenTransaction, WalletError> {
        let plan = self.plan(request, spending_key).await?;
        prover.prove(&plan).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use zmail_core::error::RpcError;

    use crate::prover::UnavailableProver;

    // --- Mock note source ---

    struct MockNoteSource {
        notes: Vec<ShieldedNote>,
        witness_calls: AtomicUsize,
    }

    impl MockNoteSource {
        fn new(values: &[u64]) -> Self {
            let notes = values
                .iter()
                .enumerate()
                .map(|(i, &value)| ShieldedNote {
                    value,
                    nullifier: [i as u8; 32],
                    rho: [i as u8 + 100; 32],
                    recipient: [0xAB; 32],
                })
                .collect();
            Self {
                notes,
                witness_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl NoteSource for MockNoteSource {
        async fn get_utxos(&self, _address: &str) -> Result<Vec<ShieldedNote>, RpcError> {
            Ok(self.notes.clone())
        }

        async fn get_witness(&self, note: &ShieldedNote) -> Result<IncrementalWitness, RpcError> {
            self.witness_calls.fetch_add(1, Ordering::SeqCst);
            Ok(IncrementalWitness {
                position: u64::from(note.nullifier[0]),
                path: vec![[1u8; 32]; 32],
                cursor: None,
            })
        }

        async fn get_anchor_height(&self) -> Result<u64, RpcError> {
            Ok(2_500_000)
        }
    }

    struct FailingNoteSource;

    #[async_trait]
    impl NoteSource for FailingNoteSource {
        async fn get_utxos(&self, _address: &str) -> Result<Vec<ShieldedNote>, RpcError> {
            Err(RpcError::Transport("connection refused".into()))
        }

        async fn get_witness(&self, _note: &ShieldedNote) -> Result<IncrementalWitness, RpcError> {
            unreachable!()
        }

        async fn get_anchor_height(&self) -> Result<u64, RpcError> {
            unreachable!()
        }
    }

    fn request(amount: u64, fee: u64) -> ShieldedSend {
        let mut memo = [0u8; MEMO_SIZE];
        memo[0] = 1;
        ShieldedSend {
            from: "zs1sender".into(),
            to: "zs1recipient".into(),
            amount,
            memo,
            fee,
        }
    }

    fn key() -> SpendingKey {
        SpendingKey::new("secret-extended-key-test")
    }

    #[tokio::test]
    async fn plan_with_change() {
        let source = Arc::new(MockNoteSource::new(&[30_000, 5_000]));
        let builder = TransactionBuilder::new(source.clone());
        let plan = builder.plan(&request(10_000, 10_000), &key()).await.unwrap();

        assert_eq!(plan.inputs.len(), 1);
        assert_eq!(source.witness_calls.load(Ordering::SeqCst), 1);
        assert_eq!(plan.anchor_height, 2_500_000);
        assert_eq!(plan.outputs.len(), 2);

        let primary = plan.primary_output().unwrap();
        assert_eq!(primary.address, "zs1recipient");
        assert_eq!(primary.value, 10_000);
        assert_eq!(primary.memo[0], 1);

        let change = &plan.outputs[1];
        assert_eq!(change.address, "zs1sender");
        assert_eq!(change.value, 10_000);
        assert!(change.memo.iter().all(|&b| b == 0));
        assert_eq!(change.memo.len(), MEMO_SIZE);
    }

    #[tokio::test]
    async fn plan_exact_amount_has_no_change_output() {
        let builder = TransactionBuilder::new(Arc::new(MockNoteSource::new(&[20_000])));
        let plan = builder.plan(&request(10_000, 10_000), &key()).await.unwrap();
        assert_eq!(plan.outputs.len(), 1);
    }

    #[tokio::test]
    async fn plan_insufficient_funds() {
        let builder = TransactionBuilder::new(Arc::new(MockNoteSource::new(&[3_000, 4_000])));
        let err = builder.plan(&request(10_000, 10_000), &key()).await.unwrap_err();
        assert_eq!(
            err,
            WalletError::InsufficientFunds {
                have: 7_000,
                need: 20_000
            }
        );
    }

    #[tokio::test]
    async fn plan_requires_spending_key() {
        let builder = TransactionBuilder::new(Arc::new(MockNoteSource::new(&[50_000])));
        let err = builder
            .plan(&request(10_000, 10_000), &SpendingKey::new(""))
            .await
            .unwrap_err();
        assert_eq!(err, WalletError::MissingSpendingKey);
    }

    #[tokio::test]
    async fn source_failure_propagates() {
        let builder = TransactionBuilder::new(Arc::new(FailingNoteSource));
        let err = builder.plan(&request(1, 0), &key()).await.unwrap_err();
        assert!(matches!(err, WalletError::Source(RpcError::Transport(_))));
    }

    #[tokio::test]
    async fn build_with_unavailable_prover_fails() {
        let builder = TransactionBuilder::new(Arc::new(MockNoteSource::new(&[50_000])));
        let err = builder
            .build(&UnavailableProver, &request(10_000, 10_000), &key())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not implemented without proving parameters"));
    }

    // --- Plan validation ---

    fn valid_plan() -> TransactionPlan {
        TransactionPlan {
            spending_key: key(),
            from: "zs1sender".into(),
            inputs: vec![PlannedInput {
                note: ShieldedNote {
                    value: 30_000,
                    nullifier: [1; 32],
                    rho: [2; 32],
                    recipient: [3; 32],
                },
                witness: IncrementalWitness {
                    position: 7,
                    path: vec![],
                    cursor: None,
                },
            }],
            outputs: vec![
                PlannedOutput {
                    address: "zs1recipient".into(),
                    value: 10_000,
                    memo: vec![0; MEMO_SIZE],
                },
                PlannedOutput {
                    address: "zs1sender".into(),
                    value: 10_000,
                    memo: vec![0; MEMO_SIZE],
                },
            ],
            fee: 10_000,
            anchor_height: 1,
        }
    }

    #[test]
    fn valid_plan_passes() {
        assert!(valid_plan().validate().is_ok());
    }

    #[test]
    fn unbalanced_plan_rejected() {
        let mut plan = valid_plan();
        plan.outputs[1].value += 1;
        assert!(matches!(plan.validate(), Err(WalletError::InvalidPlan(_))));

        let mut plan = valid_plan();
        plan.fee -= 1;
        assert!(matches!(plan.validate(), Err(WalletError::InvalidPlan(_))));
    }

    #[test]
    fn overflowing_values_rejected() {
        let mut plan = valid_plan();
        plan.outputs[0].value = u64::MAX;
        assert!(matches!(plan.validate(), Err(WalletError::InvalidAmount(_))));

        let mut plan = valid_plan();
        let extra = plan.inputs[0].clone();
        plan.inputs[0].note.value = u64::MAX;
        plan.inputs.push(extra);
        assert!(matches!(plan.validate(), Err(WalletError::InvalidAmount(_))));
    }

    #[test]
    fn short_memo_rejected() {
        let mut plan = valid_plan();
        plan.outputs[0].memo.truncate(511);
        assert!(matches!(plan.validate(), Err(WalletError::InvalidPlan(_))));
    }

    #[test]
    fn empty_inputs_or_outputs_rejected() {
        let mut plan = valid_plan();
        plan.inputs.clear();
        assert!(matches!(plan.validate(), Err(WalletError::InvalidPlan(_))));

        let mut plan = valid_plan();
        plan.outputs.clear();
        assert!(matches!(plan.validate(), Err(WalletError::InvalidPlan(_))));
    }

    #[test]
    fn blank_key_rejected() {
        let mut plan = valid_plan();
        plan.spending_key = SpendingKey::new(" ");
        assert_eq!(plan.validate(), Err(WalletError::MissingSpendingKey));
    }
}
