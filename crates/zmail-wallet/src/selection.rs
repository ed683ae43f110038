//! Largest-first note selection.
//!
//! Notes are sorted by value descending and taken greedily until the amount
//! plus fee is covered. Spending the biggest notes first keeps the input
//! count (and therefore proof work) low.

use zmail_core::types::ShieldedNote;

use crate::error::WalletError;

/// Result of note selection: which notes to spend and the change breakdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteSelection {
    /// Selected notes, largest first.
    pub selected: Vec<ShieldedNote>,
    /// Total value of the selected notes.
    pub total: u64,
    /// Amount being sent, excluding the fee.
    pub amount: u64,
    /// Transaction fee.
    pub fee: u64,
    /// Value returned to the sender: `total - (amount + fee)`.
    pub change: u64,
}

/// Greedy largest-first selector.
pub struct NoteSelector;

impl NoteSelector {
    /// Select notes covering `amount + fee`.
    pub fn select(
        notes: &[ShieldedNote],
        amount: u64,
        fee: u64,
    ) -> Result<NoteSelection, WalletError> {
        if amount == 0 {
            return Err(WalletError::InvalidAmount("amount must be non-zero".into()));
        }
        let target = amount
            .checked_add(fee)
            .ok_or_else(|| WalletError::InvalidAmount("amount plus fee overflows".into()))?;

        let mut sorted: Vec<&ShieldedNote> = notes.iter().collect();
        sorted.sort_by(|a, b| b.value.cmp(&a.value));

        let mut selected = Vec::new();
        let mut total: u64 = 0;
        for note in sorted {
            selected.push(note.clone());
            total = total.saturating_add(note.value);
            if total >= target {
                return Ok(NoteSelection {
                    selected,
                    total,
                    amount,
                    fee,
                    change: total - target,
                });
            }
        }

        Err(WalletError::InsufficientFunds {
            have: total,
            need: target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(value: u64, tag: u8) -> ShieldedNote {
        ShieldedNote {
            value,
            nullifier: [tag; 32],
            rho: [tag.wrapping_add(1); 32],
            recipient: [0xAA; 32],
        }
    }

    #[test]
    fn picks_largest_first() {
        let notes = vec![note(5_000, 1), note(50_000, 2), note(20_000, 3)];
        let sel = NoteSelector::select(&notes, 10_000, 10_000).unwrap();
        assert_eq!(sel.selected.len(), 1);
        assert_eq!(sel.selected[0].value, 50_000);
        assert_eq!(sel.total, 50_000);
        assert_eq!(sel.change, 30_000);
    }

    #[test]
    fn accumulates_until_target() {
        let notes = vec![note(6_000, 1), note(8_000, 2), note(7_000, 3)];
        let sel = NoteSelector::select(&notes, 10_000, 1_000).unwrap();
        let values: Vec<u64> = sel.selected.iter().map(|n| n.value).collect();
        assert_eq!(values, vec![8_000, 7_000]);
        assert_eq!(sel.change, 4_000);
    }

    #[test]
    fn exact_match_has_no_change() {
        let notes = vec![note(20_000, 1)];
        let sel = NoteSelector::select(&notes, 10_000, 10_000).unwrap();
        assert_eq!(sel.change, 0);
    }

    #[test]
    fn selection_balances_exactly() {
        let notes = vec![note(3, 1), note(11_111, 2), note(99_999, 3), note(7, 4)];
        let sel = NoteSelector::select(&notes, 100_000, 10_000).unwrap();
        assert_eq!(sel.total, sel.amount + sel.fee + sel.change);
    }

    #[test]
    fn insufficient_funds_reports_totals() {
        let notes = vec![note(4_000, 1), note(5_000, 2)];
        let err = NoteSelector::select(&notes, 10_000, 1_000).unwrap_err();
        assert_eq!(
            err,
            WalletError::InsufficientFunds {
                have: 9_000,
                need: 11_000
            }
        );
    }

    #[test]
    fn no_notes_is_insufficient() {
        let err = NoteSelector::select(&[], 1, 0).unwrap_err();
        assert_eq!(err, WalletError::InsufficientFunds { have: 0, need: 1 });
    }

    #[test]
    fn zero_amount_rejected() {
        let err = NoteSelector::select(&[note(1, 1)], 0, 0).unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));
    }

    #[test]
    fn overflowing_target_rejected() {
        let err = NoteSelector::select(&[note(1, 1)], u64::MAX, 1).unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));
    }
}
