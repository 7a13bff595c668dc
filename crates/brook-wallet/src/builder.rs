//! Transaction assembly and signing.
//!
//! Provides a builder pattern for constructing transactions:
//! 1. Add recipients (address + amount)
//! 2. Select coins and assemble the unsigned transaction, resolving the
//!    change output to the active change address
//! 3. Sign every input with the key re-derived from its stored path
//!
//! Inputs are legacy P2PKH, signed with `SIGHASH_ALL`.

use std::str::FromStr;

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::{deserialize, serialize_hex};
use bitcoin::ecdsa::Signature as EcdsaSignature;
use bitcoin::hashes::Hash;
use bitcoin::script::{Builder, Instruction, PushBytesBuf};
use bitcoin::secp256k1::Message;
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, OutPoint, PublicKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};

use brook_core::constants::{DEFAULT_FEE_RATE, NETWORK};
use brook_core::types::{SelectionResult, Target, Utxo};

use crate::coin_selection::select_coins;
use crate::error::WalletError;
use crate::keys::{KeyTree, p2pkh_address};

/// Parse a testnet address.
pub fn parse_address(address: &str) -> Result<Address, WalletError> {
    Address::from_str(address)
        .map_err(|e| WalletError::InvalidAddress(format!("{address}: {e}")))?
        .require_network(NETWORK)
        .map_err(|e| WalletError::InvalidAddress(format!("{address}: {e}")))
}

/// A transaction with empty script signatures.
#[derive(Debug, Clone)]
pub struct UnsignedTransaction {
    pub tx: Transaction,
    /// Selection the transaction was assembled from. `inputs[i]` funds
    /// `tx.input[i]`.
    pub selection: SelectionResult,
    /// Address substituted for the change output, if there is one.
    pub change_address: Option<String>,
}

/// A fully signed transaction and its canonical hex serialization.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub tx: Transaction,
    pub hex: String,
    pub fee: u64,
    /// Outputs spent, in input order.
    pub inputs: Vec<Utxo>,
    pub change_address: Option<String>,
}

impl SignedTransaction {
    pub fn txid(&self) -> Txid {
        self.tx.compute_txid()
    }

    pub fn spent_outpoints(&self) -> Vec<OutPoint> {
        self.tx.input.iter().map(|i| i.previous_output).collect()
    }

    /// Check every input's signature against the key at its stored path.
    pub fn verify(&self, keys: &KeyTree) -> Result<(), WalletError> {
        for (i, utxo) in self.inputs.iter().enumerate() {
            verify_input(&self.tx, i, utxo, keys)?;
        }
        Ok(())
    }
}

/// Builder for selecting, assembling and signing a payment.
///
/// # Example
/// ```ignore
/// let unsigned = TransactionBuilder::new()
///     .add_recipient(recipient, 30_000)
///     .set_fee_rate(2)
///     .build(session.utxos(), session.active_change_address())?;
/// let signed = TransactionBuilder::sign(unsigned, session.keys())?;
/// ```
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    recipients: Vec<Target>,
    fee_rate: u64,
    lock_time: LockTime,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self {
            recipients: Vec::new(),
            fee_rate: DEFAULT_FEE_RATE,
            lock_time: LockTime::ZERO,
        }
    }

    pub fn add_recipient(&mut self, address: impl Into<String>, amount: u64) -> &mut Self {
        self.recipients.push(Target {
            address: address.into(),
            value: amount,
        });
        self
    }

    /// Fee rate in sat/byte (default: [`DEFAULT_FEE_RATE`]).
    pub fn set_fee_rate(&mut self, fee_rate: u64) -> &mut Self {
        self.fee_rate = fee_rate;
        self
    }

    pub fn set_lock_time(&mut self, lock_time: LockTime) -> &mut Self {
        self.lock_time = lock_time;
        self
    }

    pub fn recipients(&self) -> &[Target] {
        &self.recipients
    }

    /// Validate recipients and run coin selection.
    pub fn select(&self, utxos: &[Utxo]) -> Result<SelectionResult, WalletError> {
        for r in &self.recipients {
            parse_address(&r.address)?;
        }
        select_coins(utxos, &self.recipients, self.fee_rate)
    }

    /// Select coins and assemble the unsigned transaction.
    pub fn build(
        &self,
        utxos: &[Utxo],
        change_address: Option<&str>,
    ) -> Result<UnsignedTransaction, WalletError> {
        let selection = self.select(utxos)?;
        self.assemble(selection, change_address)
    }

    /// Assemble a transaction from an existing selection.
    ///
    /// Rejects any unconfirmed input, even though selection never picks one,
    /// since the selection may have been made against stale outputs.
    pub fn assemble(
        &self,
        selection: SelectionResult,
        change_address: Option<&str>,
    ) -> Result<UnsignedTransaction, WalletError> {
        if let Some(u) = selection.inputs.iter().find(|u| !u.confirmed) {
            return Err(WalletError::UnconfirmedInput {
                txid: u.txid.to_string(),
                vout: u.vout,
            });
        }
        if selection.inputs.is_empty() || selection.outputs.is_empty() {
            return Err(WalletError::Build("empty inputs or outputs".into()));
        }

        let input = selection
            .inputs
            .iter()
            .map(|u| TxIn {
                previous_output: u.outpoint(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect();

        let mut used_change = None;
        let mut output = Vec::with_capacity(selection.outputs.len());
        for o in &selection.outputs {
            let address = match &o.address {
                Some(a) => a.as_str(),
                None => {
                    let change = change_address.ok_or(WalletError::NoChangeAddress)?;
                    used_change = Some(change.to_string());
                    change
                }
            };
            output.push(TxOut {
                value: Amount::from_sat(o.value),
                script_pubkey: parse_address(address)?.script_pubkey(),
            });
        }

        let tx = Transaction {
            version: Version::TWO,
            lock_time: self.lock_time,
            input,
            output,
        };
        Ok(UnsignedTransaction {
            tx,
            selection,
            change_address: used_change,
        })
    }

    /// Sign every input. Input `i` is signed with the key derived from
    /// `selection.inputs[i].derive_path`, which must own the input's address.
    pub fn sign(unsigned: UnsignedTransaction, keys: &KeyTree) -> Result<SignedTransaction, WalletError> {
        let UnsignedTransaction {
            mut tx,
            selection,
            change_address,
        } = unsigned;
        let secp = keys.secp();

        let mut script_sigs = Vec::with_capacity(selection.inputs.len());
        {
            let cache = SighashCache::new(&tx);
            for (i, utxo) in selection.inputs.iter().enumerate() {
                let node = keys.derive_path(&utxo.derive_path)?;
                let pubkey = node.public_key(secp);
                let owner = p2pkh_address(&pubkey);
                if owner.to_string() != utxo.address {
                    return Err(WalletError::Build(format!(
                        "key at {} does not own {}",
                        utxo.derive_path, utxo.address
                    )));
                }
                let sighash = cache
                    .legacy_signature_hash(i, &owner.script_pubkey(), EcdsaSighashType::All.to_u32())
                    .map_err(|e| WalletError::Build(e.to_string()))?;
                let msg = Message::from_digest(sighash.to_byte_array());
                let signature = EcdsaSignature {
                    signature: secp.sign_ecdsa(&msg, &node.secret_key()),
                    sighash_type: EcdsaSighashType::All,
                };
                let push = PushBytesBuf::try_from(signature.to_vec())
                    .map_err(|e| WalletError::Build(e.to_string()))?;
                script_sigs.push(Builder::new().push_slice(push).push_key(&pubkey).into_script());
            }
        }
        for (input, script_sig) in tx.input.iter_mut().zip(script_sigs) {
            input.script_sig = script_sig;
        }

        let hex = serialize_hex(&tx);
        let reparsed = parse_hex(&hex)?;
        if reparsed != tx {
            return Err(WalletError::Serialization("transaction does not round-trip".into()));
        }

        Ok(SignedTransaction {
            tx,
            hex,
            fee: selection.fee,
            inputs: selection.inputs,
            change_address,
        })
    }
}

impl Default for TransactionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a raw transaction from hex.
pub fn parse_hex(raw: &str) -> Result<Transaction, WalletError> {
    let bytes = hex::decode(raw).map_err(|e| WalletError::Serialization(e.to_string()))?;
    deserialize(&bytes).map_err(|e| WalletError::Serialization(e.to_string()))
}

/// Verify input `index` of `tx` spends `utxo` with a valid signature by the
/// key at `utxo.derive_path`.
pub fn verify_input(
    tx: &Transaction,
    index: usize,
    utxo: &Utxo,
    keys: &KeyTree,
) -> Result<(), WalletError> {
    let input = tx
        .input
        .get(index)
        .ok_or_else(|| WalletError::Build(format!("no input {index}")))?;
    let mut pushes = input.script_sig.instructions().map(|ins| match ins {
        Ok(Instruction::PushBytes(b)) => Ok(b.as_bytes().to_vec()),
        _ => Err(WalletError::Build(format!("input {index}: malformed scriptSig"))),
    });
    let missing = || WalletError::Build(format!("input {index}: incomplete scriptSig"));
    let sig_bytes = pushes.next().ok_or_else(missing)??;
    let key_bytes = pushes.next().ok_or_else(missing)??;

    let signature = EcdsaSignature::from_slice(&sig_bytes).map_err(|e| WalletError::Build(e.to_string()))?;
    let pubkey = PublicKey::from_slice(&key_bytes).map_err(|e| WalletError::Build(e.to_string()))?;
    let secp = keys.secp();
    if pubkey != keys.derive_path(&utxo.derive_path)?.public_key(secp) {
        return Err(WalletError::Build(format!(
            "input {index}: key does not match {}",
            utxo.derive_path
        )));
    }

    let sighash = SighashCache::new(tx)
        .legacy_signature_hash(index, &p2pkh_address(&pubkey).script_pubkey(), signature.sighash_type.to_u32())
        .map_err(|e| WalletError::Build(e.to_string()))?;
    secp.verify_ecdsa(&Message::from_digest(sighash.to_byte_array()), &signature.signature, &pubkey.inner)
        .map_err(|e| WalletError::Build(format!("input {index}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{address_at, test_tree, utxo_at};
    use brook_core::types::{BranchKind, SelectedOutput};

    fn recipient() -> String {
        address_at(&test_tree(), BranchKind::Receiving, 19)
    }

    fn change(tree: &KeyTree) -> String {
        address_at(tree, BranchKind::Change, 0)
    }

    #[test]
    fn build_sign_and_verify_two_inputs() {
        let tree = test_tree();
        let utxos = vec![
            utxo_at(&tree, BranchKind::Receiving, 0, 20_000, true),
            utxo_at(&tree, BranchKind::Receiving, 3, 15_000, true),
        ];
        let unsigned = TransactionBuilder::new()
            .add_recipient(recipient(), 30_000)
            .build(&utxos, Some(&change(&tree)))
            .unwrap();
        assert_eq!(unsigned.tx.input.len(), 2);
        let signed = TransactionBuilder::sign(unsigned, &tree).unwrap();
        signed.verify(&tree).unwrap();
        assert_eq!(signed.inputs[0].derive_path, "m/44'/1'/0'/0/0");
        assert_eq!(signed.inputs[1].derive_path, "m/44'/1'/0'/0/3");
    }

    #[test]
    fn signatures_are_bound_to_their_input() {
        let tree = test_tree();
        let utxos = vec![
            utxo_at(&tree, BranchKind::Receiving, 0, 20_000, true),
            utxo_at(&tree, BranchKind::Receiving, 3, 15_000, true),
        ];
        let unsigned = TransactionBuilder::new()
            .add_recipient(recipient(), 30_000)
            .build(&utxos, Some(&change(&tree)))
            .unwrap();
        let signed = TransactionBuilder::sign(unsigned, &tree).unwrap();
        assert!(verify_input(&signed.tx, 0, &signed.inputs[1], &tree).is_err());
    }

    #[test]
    fn hex_round_trips() {
        let tree = test_tree();
        let utxos = vec![utxo_at(&tree, BranchKind::Receiving, 0, 50_000, true)];
        let unsigned = TransactionBuilder::new()
            .add_recipient(recipient(), 30_000)
            .build(&utxos, Some(&change(&tree)))
            .unwrap();
        let signed = TransactionBuilder::sign(unsigned, &tree).unwrap();

        let parsed = parse_hex(&signed.hex).unwrap();
        assert_eq!(parsed, signed.tx);
        assert_eq!(parsed.input[0].previous_output, utxos[0].outpoint());
        assert_eq!(parsed.output[0].value, Amount::from_sat(30_000));
        assert_eq!(parsed.output[1].value, Amount::from_sat(19_548));
        assert_eq!(parsed.compute_txid(), signed.txid());
    }

    #[test]
    fn change_output_pays_active_change_address() {
        let tree = test_tree();
        let utxos = vec![utxo_at(&tree, BranchKind::Receiving, 0, 50_000, true)];
        let change_addr = change(&tree);
        let unsigned = TransactionBuilder::new()
            .add_recipient(recipient(), 30_000)
            .build(&utxos, Some(&change_addr))
            .unwrap();
        assert_eq!(unsigned.change_address.as_deref(), Some(change_addr.as_str()));
        assert_eq!(
            unsigned.tx.output[1].script_pubkey,
            parse_address(&change_addr).unwrap().script_pubkey()
        );
    }

    #[test]
    fn no_change_output_leaves_change_address_unset() {
        let tree = test_tree();
        let utxos = vec![utxo_at(&tree, BranchKind::Receiving, 0, 30_500, true)];
        let unsigned = TransactionBuilder::new()
            .add_recipient(recipient(), 30_000)
            .build(&utxos, None)
            .unwrap();
        assert_eq!(unsigned.tx.output.len(), 1);
        assert!(unsigned.change_address.is_none());
    }

    #[test]
    fn change_needed_without_address_fails() {
        let tree = test_tree();
        let utxos = vec![utxo_at(&tree, BranchKind::Receiving, 0, 50_000, true)];
        let err = TransactionBuilder::new()
            .add_recipient(recipient(), 30_000)
            .build(&utxos, None)
            .unwrap_err();
        assert_eq!(err, WalletError::NoChangeAddress);
    }

    #[test]
    fn stale_unconfirmed_input_rejected() {
        let tree = test_tree();
        let stale = utxo_at(&tree, BranchKind::Receiving, 2, 50_000, false);
        let selection = SelectionResult {
            inputs: vec![stale.clone()],
            outputs: vec![SelectedOutput {
                address: Some(recipient()),
                value: 30_000,
            }],
            fee: 20_000,
        };
        let err = TransactionBuilder::new().assemble(selection, None).unwrap_err();
        assert_eq!(
            err,
            WalletError::UnconfirmedInput {
                txid: stale.txid.to_string(),
                vout: 0
            }
        );
    }

    #[test]
    fn mainnet_recipient_rejected() {
        let tree = test_tree();
        let utxos = vec![utxo_at(&tree, BranchKind::Receiving, 0, 50_000, true)];
        let err = TransactionBuilder::new()
            .add_recipient("1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2", 30_000)
            .build(&utxos, Some(&change(&tree)))
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidAddress(_)));
    }

    #[test]
    fn garbage_recipient_rejected() {
        assert!(matches!(
            parse_address("not-an-address"),
            Err(WalletError::InvalidAddress(_))
        ));
    }

    #[test]
    fn path_not_owning_address_refused() {
        let tree = test_tree();
        let mut utxo = utxo_at(&tree, BranchKind::Receiving, 0, 50_000, true);
        utxo.derive_path = "m/44'/1'/0'/0/1".into();
        let unsigned = TransactionBuilder::new()
            .add_recipient(recipient(), 30_000)
            .build(&[utxo], Some(&change(&tree)))
            .unwrap();
        let err = TransactionBuilder::sign(unsigned, &tree).unwrap_err();
        assert!(matches!(err, WalletError::Build(_)));
    }

    #[test]
    fn signing_is_deterministic() {
        let tree = test_tree();
        let utxos = vec![utxo_at(&tree, BranchKind::Receiving, 0, 50_000, true)];
        let mut builder = TransactionBuilder::new();
        builder.add_recipient(recipient(), 30_000);
        let a = TransactionBuilder::sign(builder.build(&utxos, Some(&change(&tree))).unwrap(), &tree).unwrap();
        let b = TransactionBuilder::sign(builder.build(&utxos, Some(&change(&tree))).unwrap(), &tree).unwrap();
        assert_eq!(a.hex, b.hex);
    }
}
