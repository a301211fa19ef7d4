use bitcoin::absolute::LockTime;
use bitcoin::address::Address;
use bitcoin::hashes::Hash;
use bitcoin::script::{PushBytesBuf, ScriptBuf};
use bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, CompressedPublicKey, OutPoint, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};

use crate::error::TxError;
use crate::gateway::{SignRequest, Signer};
use crate::network::Network;
use crate::script::ScriptType;
use crate::select::SelectionResult;
use crate::utxo::{OutputTarget, Utxo, UtxoStore};

/// An unsigned transaction plus everything needed to sign and audit it.
#[derive(Debug, Clone)]
pub struct DraftTransaction {
    /// The transaction with empty witnesses/scriptSigs.
    pub tx: Transaction,
    /// The outputs being spent, in input order; needed for sighashes and
    /// for post-build validation.
    pub prevouts: Vec<TxOut>,
    /// The wallet UTXOs behind each input, in input order.
    pub inputs: Vec<Utxo>,
    /// Fee committed to by the selection, in satoshis.
    pub fee: u64,
    /// Whether the transaction opts into replace-by-fee.
    pub rbf: bool,
}

impl DraftTransaction {
    /// True when every input signals replaceability.
    pub fn is_replaceable(&self) -> bool {
        self.tx.input.iter().all(|i| i.sequence.is_rbf())
    }
}

/// A fully signed transaction ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    /// Raw transaction in consensus encoding, hex.
    pub hex: String,
    /// Display-order (reversed) transaction id.
    pub txid: String,
}

/// Assemble the unsigned transaction for a selection.
///
/// Outputs keep the caller's order; a change output to `change_address` is
/// appended when the selection carries change. A target marked `is_max`
/// receives `input total - fixed targets - fee`. Every input's sequence
/// number is set per the `rbf` flag. All arithmetic is checked; an overflow
/// or a value-conservation mismatch is a fatal `Build` error.
pub fn build_draft(
    selection: &SelectionResult,
    targets: &[OutputTarget],
    change_address: &str,
    network: Network,
    rbf: bool,
) -> Result<DraftTransaction, TxError> {
    if selection.inputs.is_empty() {
        return Err(TxError::Build("selection has no inputs".into()));
    }

    let input_total = selection
        .inputs
        .iter()
        .try_fold(0u64, |acc, u| acc.checked_add(u.value))
        .ok_or_else(|| TxError::Build("input value overflow".into()))?;

    let sweep_value = sweep_output_value(selection, targets, input_total)?;

    // Inputs, in selection order.
    let sequence = if rbf {
        Sequence::ENABLE_RBF_NO_LOCKTIME
    } else {
        Sequence::MAX
    };
    let mut tx_inputs = Vec::with_capacity(selection.inputs.len());
    let mut prevouts = Vec::with_capacity(selection.inputs.len());
    for utxo in &selection.inputs {
        let txid: Txid = utxo
            .txid
            .parse()
            .map_err(|e| TxError::Build(format!("invalid txid {}: {e}", utxo.txid)))?;
        tx_inputs.push(TxIn {
            previous_output: OutPoint::new(txid, utxo.vout),
            script_sig: ScriptBuf::new(),
            sequence,
            witness: Witness::default(),
        });
        prevouts.push(TxOut {
            value: Amount::from_sat(utxo.value),
            script_pubkey: ScriptBuf::from(utxo.script_pubkey.clone()),
        });
    }

    // Outputs, in caller order, change appended last.
    let mut tx_outputs = Vec::with_capacity(targets.len() + 1);
    let mut output_total: u64 = 0;
    for target in targets {
        let value = if target.is_max {
            sweep_value.ok_or_else(|| TxError::Build("sweep value not computed".into()))?
        } else {
            target.value
        };
        output_total = output_total
            .checked_add(value)
            .ok_or_else(|| TxError::Build("output value overflow".into()))?;
        tx_outputs.push(TxOut {
            value: Amount::from_sat(value),
            script_pubkey: parse_address(&target.address, network)?.script_pubkey(),
        });
    }
    if selection.change_value > 0 {
        output_total = output_total
            .checked_add(selection.change_value)
            .ok_or_else(|| TxError::Build("output value overflow".into()))?;
        tx_outputs.push(TxOut {
            value: Amount::from_sat(selection.change_value),
            script_pubkey: parse_address(change_address, network)?.script_pubkey(),
        });
    }

    // Conservation must hold exactly before anything is signed.
    let expected = output_total
        .checked_add(selection.fee)
        .ok_or_else(|| TxError::Build("value overflow".into()))?;
    if input_total != expected {
        return Err(TxError::Build(format!(
            "value not conserved: inputs {input_total} sat, outputs {output_total} sat, fee {} sat",
            selection.fee
        )));
    }

    Ok(DraftTransaction {
        tx: Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: tx_inputs,
            output: tx_outputs,
        },
        prevouts,
        inputs: selection.inputs.clone(),
        fee: selection.fee,
        rbf,
    })
}

/// Request a signature for every input and assemble the final transaction.
///
/// One signer call per input, handed the input's derivation path, script
/// type, and sighash. Signer failures propagate as `SigningFailed`.
pub fn sign_draft(
    draft: &DraftTransaction,
    signer: &dyn Signer,
) -> Result<SignedTransaction, TxError> {
    let mut signed_tx = draft.tx.clone();
    let mut cache = SighashCache::new(&draft.tx);

    for (index, utxo) in draft.inputs.iter().enumerate() {
        let prevout = &draft.prevouts[index];
        match utxo.script_type {
            ScriptType::P2wpkh => {
                let sighash = cache
                    .p2wpkh_signature_hash(
                        index,
                        &prevout.script_pubkey,
                        prevout.value,
                        EcdsaSighashType::All,
                    )
                    .map_err(|e| TxError::Build(format!("sighash computation failed: {e}")))?;
                let sig = request_signature(signer, utxo, sighash.to_byte_array())?;
                let mut witness = Witness::new();
                witness.push(&ecdsa_sig_with_hashtype(sig.signature));
                witness.push(&sig.public_key);
                signed_tx.input[index].witness = witness;
            }
            ScriptType::P2sh => {
                // Only P2SH-wrapped P2WPKH is spendable by this wallet; the
                // redeem script comes from the input's own key.
                let pubkey = signer.public_key(&utxo.derivation_path)?;
                let redeem = p2sh_redeem_script(&pubkey, prevout)?;
                let sighash = cache
                    .p2wpkh_signature_hash(index, &redeem, prevout.value, EcdsaSighashType::All)
                    .map_err(|e| TxError::Build(format!("sighash computation failed: {e}")))?;
                let sig = request_signature(signer, utxo, sighash.to_byte_array())?;

                let mut witness = Witness::new();
                witness.push(&ecdsa_sig_with_hashtype(sig.signature));
                witness.push(&sig.public_key);
                signed_tx.input[index].witness = witness;

                let redeem_push = PushBytesBuf::try_from(redeem.into_bytes())
                    .map_err(|e| TxError::Build(format!("redeem script too long: {e}")))?;
                signed_tx.input[index].script_sig =
                    ScriptBuf::builder().push_slice(redeem_push).into_script();
            }
            ScriptType::P2pkh => {
                let sighash = cache
                    .legacy_signature_hash(
                        index,
                        &prevout.script_pubkey,
                        EcdsaSighashType::All.to_u32(),
                    )
                    .map_err(|e| TxError::Build(format!("sighash computation failed: {e}")))?;
                let sig = request_signature(signer, utxo, sighash.to_byte_array())?;

                let sig_push = PushBytesBuf::try_from(ecdsa_sig_with_hashtype(sig.signature))
                    .map_err(|e| TxError::Build(format!("signature too long: {e}")))?;
                let key_push = PushBytesBuf::try_from(sig.public_key)
                    .map_err(|e| TxError::Build(format!("public key too long: {e}")))?;
                signed_tx.input[index].script_sig = ScriptBuf::builder()
                    .push_slice(sig_push)
                    .push_slice(key_push)
                    .into_script();
            }
            ScriptType::P2tr => {
                let sighash = cache
                    .taproot_key_spend_signature_hash(
                        index,
                        &Prevouts::All(&draft.prevouts),
                        TapSighashType::Default,
                    )
                    .map_err(|e| TxError::Build(format!("sighash computation failed: {e}")))?;
                let sig = request_signature(signer, utxo, sighash.to_byte_array())?;
                if sig.signature.len() != 64 {
                    return Err(TxError::SigningFailed(format!(
                        "expected 64-byte schnorr signature, got {} bytes",
                        sig.signature.len()
                    )));
                }
                let mut witness = Witness::new();
                witness.push(&sig.signature);
                signed_tx.input[index].witness = witness;
            }
            ScriptType::P2wsh => {
                return Err(TxError::Build(
                    "P2WSH inputs are not spendable by this wallet".into(),
                ));
            }
        }
    }

    let raw = bitcoin::consensus::serialize(&signed_tx);
    Ok(SignedTransaction {
        hex: hex::encode(raw),
        txid: signed_tx.compute_txid().to_string(),
    })
}

/// Draft, sign, and reserve in one step: the successful transaction's inputs
/// are marked pending in the store so no concurrent build can reuse them.
pub fn build(
    selection: &SelectionResult,
    targets: &[OutputTarget],
    change_address: &str,
    network: Network,
    rbf: bool,
    signer: &dyn Signer,
    store: &UtxoStore,
) -> Result<(DraftTransaction, SignedTransaction), TxError> {
    let draft = build_draft(selection, targets, change_address, network, rbf)?;
    let signed = sign_draft(&draft, signer)?;
    store.mark_pending(&draft.inputs);
    Ok((draft, signed))
}

fn parse_address(address: &str, network: Network) -> Result<Address, TxError> {
    address
        .parse::<Address<bitcoin::address::NetworkUnchecked>>()
        .map_err(|e| TxError::InvalidTarget(format!("invalid address {address}: {e}")))?
        .require_network(network.to_bitcoin_network())
        .map_err(|e| TxError::InvalidTarget(format!("address {address} is for another network: {e}")))
}

fn request_signature(
    signer: &dyn Signer,
    utxo: &Utxo,
    sighash: [u8; 32],
) -> Result<crate::gateway::SignatureData, TxError> {
    signer.sign(&SignRequest {
        derivation_path: utxo.derivation_path.clone(),
        script_type: utxo.script_type,
        sighash,
    })
}

fn ecdsa_sig_with_hashtype(mut signature: Vec<u8>) -> Vec<u8> {
    signature.push(EcdsaSighashType::All as u8);
    signature
}

/// Redeem script for a P2SH-wrapped P2WPKH input, checked against the
/// prevout so a signer returning the wrong key is caught before signing.
fn p2sh_redeem_script(pubkey: &[u8], prevout: &TxOut) -> Result<ScriptBuf, TxError> {
    let compressed = CompressedPublicKey::from_slice(pubkey)
        .map_err(|e| TxError::SigningFailed(format!("signer returned a bad public key: {e}")))?;
    let redeem = ScriptBuf::new_p2wpkh(&compressed.wpubkey_hash());
    let expected = ScriptBuf::new_p2sh(&redeem.script_hash());
    if expected != prevout.script_pubkey {
        return Err(TxError::Build(
            "redeem script does not match the spent output".into(),
        ));
    }
    Ok(redeem)
}

/// Compute the value a sweep output receives, if any target sweeps.
fn sweep_output_value(
    selection: &SelectionResult,
    targets: &[OutputTarget],
    input_total: u64,
) -> Result<Option<u64>, TxError> {
    if !targets.iter().any(|t| t.is_max) {
        return Ok(None);
    }
    if selection.change_value != 0 {
        return Err(TxError::Build("sweep selection must not carry change".into()));
    }
    let fixed_total = targets
        .iter()
        .filter(|t| !t.is_max)
        .try_fold(0u64, |acc, t| acc.checked_add(t.value))
        .ok_or_else(|| TxError::Build("target value overflow".into()))?;
    let spent = fixed_total
        .checked_add(selection.fee)
        .ok_or_else(|| TxError::Build("value overflow".into()))?;
    let value = input_total
        .checked_sub(spent)
        .ok_or_else(|| TxError::Build("sweep output value is negative".into()))?;
    Ok(Some(value))
}
