//! Coin selection over confirmed UTXOs.
//!
//! Candidates are ranked by value net of the fee their input costs. A
//! blackjack pass first looks for a set that covers targets plus fee
//! without overshooting by more than the dust threshold, so no change
//! output is needed. If that fails an accumulative pass adds inputs in rank
//! order, skipping those worth less than their own fee, until the targets
//! plus fee are covered.
//!
//! Size model (P2PKH): 10 bytes overhead, 148 per input, 34 per output.
//! Change is added only when what is left after paying for the extra
//! output exceeds the dust threshold.

use brook_core::constants::{INPUT_SIZE, OUTPUT_SIZE, TX_EMPTY_SIZE, dust_threshold};
use brook_core::types::{SelectedOutput, SelectionResult, Target, Utxo};

use crate::error::WalletError;

/// Estimated serialized size of a transaction.
pub fn transaction_bytes(inputs: usize, outputs: usize) -> u64 {
    TX_EMPTY_SIZE
        .saturating_add(INPUT_SIZE.saturating_mul(inputs as u64))
        .saturating_add(OUTPUT_SIZE.saturating_mul(outputs as u64))
}

enum Outcome<'a> {
    Covered(Vec<&'a Utxo>),
    Short { fee: u64 },
}

/// Select inputs from the confirmed entries of `utxos` to pay `targets` at
/// `fee_rate` sat/byte.
///
/// The returned outputs are the targets in order, followed by a change
/// output with no address when one is worth creating.
pub fn select_coins(
    utxos: &[Utxo],
    targets: &[Target],
    fee_rate: u64,
) -> Result<SelectionResult, WalletError> {
    if targets.is_empty() {
        return Err(WalletError::InvalidAmount("no targets".into()));
    }
    if fee_rate == 0 {
        return Err(WalletError::InvalidFeeRate("fee rate must be non-zero".into()));
    }
    let mut out_accum: u64 = 0;
    for t in targets {
        if t.value == 0 {
            return Err(WalletError::InvalidAmount(format!("zero-value output to {}", t.address)));
        }
        out_accum = out_accum
            .checked_add(t.value)
            .ok_or_else(|| WalletError::InvalidAmount("total amount overflow".into()))?;
    }

    let mut candidates: Vec<&Utxo> = utxos.iter().filter(|u| u.confirmed).collect();
    let input_fee = fee_rate.saturating_mul(INPUT_SIZE);
    // Stable sort keeps provider order among equal scores.
    candidates.sort_by_key(|u| std::cmp::Reverse(u.value as i128 - input_fee as i128));

    let base_bytes = transaction_bytes(0, targets.len());

    let fee = match blackjack(&candidates, out_accum, base_bytes, fee_rate) {
        Outcome::Covered(inputs) => return Ok(finalize(inputs, targets, fee_rate)),
        Outcome::Short { .. } => match accumulative(&candidates, out_accum, base_bytes, fee_rate) {
            Outcome::Covered(inputs) => return Ok(finalize(inputs, targets, fee_rate)),
            Outcome::Short { fee } => fee,
        },
    };

    let available = candidates.iter().fold(0u64, |acc, u| acc.saturating_add(u.value));
    Err(WalletError::InsufficientFunds {
        available,
        needed: out_accum.saturating_add(fee),
        fee,
    })
}

fn blackjack<'a>(candidates: &[&'a Utxo], out_accum: u64, base_bytes: u64, fee_rate: u64) -> Outcome<'a> {
    let threshold = dust_threshold(fee_rate);
    let mut bytes_accum = base_bytes;
    let mut in_accum: u64 = 0;
    let mut inputs = Vec::new();

    for utxo in candidates {
        let fee = fee_rate.saturating_mul(bytes_accum.saturating_add(INPUT_SIZE));
        // Would overshoot by more than dust: leave it for the change path.
        if in_accum.saturating_add(utxo.value) > out_accum.saturating_add(fee).saturating_add(threshold) {
            continue;
        }
        bytes_accum = bytes_accum.saturating_add(INPUT_SIZE);
        in_accum = in_accum.saturating_add(utxo.value);
        inputs.push(*utxo);

        if in_accum >= out_accum.saturating_add(fee) {
            return Outcome::Covered(inputs);
        }
    }
    Outcome::Short {
        fee: fee_rate.saturating_mul(bytes_accum),
    }
}

fn accumulative<'a>(
    candidates: &[&'a Utxo],
    out_accum: u64,
    base_bytes: u64,
    fee_rate: u64,
) -> Outcome<'a> {
    let input_fee = fee_rate.saturating_mul(INPUT_SIZE);
    let mut bytes_accum = base_bytes;
    let mut in_accum: u64 = 0;
    let mut inputs = Vec::new();

    for (i, utxo) in candidates.iter().enumerate() {
        if input_fee > utxo.value {
            if i + 1 == candidates.len() {
                return Outcome::Short {
                    fee: fee_rate.saturating_mul(bytes_accum.saturating_add(INPUT_SIZE)),
                };
            }
            continue;
        }
        bytes_accum = bytes_accum.saturating_add(INPUT_SIZE);
        in_accum = in_accum.saturating_add(utxo.value);
        inputs.push(*utxo);

        let fee = fee_rate.saturating_mul(bytes_accum);
        if in_accum >= out_accum.saturating_add(fee) {
            return Outcome::Covered(inputs);
        }
    }
    Outcome::Short {
        fee: fee_rate.saturating_mul(bytes_accum),
    }
}

fn finalize(inputs: Vec<&Utxo>, targets: &[Target], fee_rate: u64) -> SelectionResult {
    let mut outputs: Vec<SelectedOutput> = targets.iter().map(SelectedOutput::from).collect();
    let in_value = inputs.iter().fold(0u64, |acc, u| acc.saturating_add(u.value));
    let out_value = outputs.iter().fold(0u64, |acc, o| acc.saturating_add(o.value));

    let bytes = transaction_bytes(inputs.len(), outputs.len());
    let fee_with_change = fee_rate.saturating_mul(bytes.saturating_add(OUTPUT_SIZE));
    let remainder = in_value as i128 - (out_value as i128 + fee_with_change as i128);
    if remainder > dust_threshold(fee_rate) as i128 {
        outputs.push(SelectedOutput {
            address: None,
            value: remainder as u64,
        });
    }

    let spent = outputs.iter().fold(0u64, |acc, o| acc.saturating_add(o.value));
    SelectionResult {
        inputs: inputs.into_iter().cloned().collect(),
        outputs,
        fee: in_value.saturating_sub(spent),
    }
}
