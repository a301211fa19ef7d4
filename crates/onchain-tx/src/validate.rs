use std::collections::HashSet;

use bitcoin::Transaction;

use crate::builder::{DraftTransaction, SignedTransaction};
use crate::error::ValidationError;
use crate::script::ScriptType;

/// Standard relay weight limit, in weight units.
const MAX_STANDARD_TX_WEIGHT: u64 = bitcoin::policy::MAX_STANDARD_TX_WEIGHT as u64;

/// Last-line pre-broadcast check of a signed transaction against its draft.
///
/// Verifies exact value conservation against the recorded prevouts and fee,
/// per-output dust limits, absence of duplicate inputs, a signature on every
/// input, the standard relay size limit, and that the signed bytes still
/// describe the drafted transaction. Any failure blocks broadcast.
pub fn validate(
    signed: &SignedTransaction,
    draft: &DraftTransaction,
) -> Result<(), ValidationError> {
    let raw = hex::decode(&signed.hex).map_err(|e| ValidationError::Decode(e.to_string()))?;
    let tx: Transaction =
        bitcoin::consensus::deserialize(&raw).map_err(|e| ValidationError::Decode(e.to_string()))?;

    if tx.compute_txid().to_string() != signed.txid {
        return Err(ValidationError::DraftMismatch(
            "transaction id does not match serialized bytes".into(),
        ));
    }

    check_inputs(&tx, draft)?;
    check_outputs(&tx, draft)?;
    check_conservation(&tx, draft)?;

    let weight = tx.weight().to_wu();
    if weight > MAX_STANDARD_TX_WEIGHT {
        return Err(ValidationError::OversizedTransaction {
            weight,
            limit: MAX_STANDARD_TX_WEIGHT,
        });
    }

    Ok(())
}

fn check_inputs(tx: &Transaction, draft: &DraftTransaction) -> Result<(), ValidationError> {
    if tx.input.len() != draft.inputs.len() {
        return Err(ValidationError::DraftMismatch(format!(
            "expected {} inputs, found {}",
            draft.inputs.len(),
            tx.input.len()
        )));
    }

    let mut seen = HashSet::new();
    for (index, input) in tx.input.iter().enumerate() {
        if !seen.insert(input.previous_output) {
            return Err(ValidationError::DuplicateInput {
                outpoint: input.previous_output.to_string(),
            });
        }

        let expected = &draft.inputs[index];
        if input.previous_output.txid.to_string() != expected.txid
            || input.previous_output.vout != expected.vout
        {
            return Err(ValidationError::DraftMismatch(format!(
                "input {index} spends {}, draft expected {}:{}",
                input.previous_output, expected.txid, expected.vout
            )));
        }

        let signed = match expected.script_type {
            ScriptType::P2pkh => !input.script_sig.is_empty(),
            ScriptType::P2sh => !input.script_sig.is_empty() && !input.witness.is_empty(),
            _ => !input.witness.is_empty(),
        };
        if !signed {
            return Err(ValidationError::MissingSignature { index });
        }
    }
    Ok(())
}

fn check_outputs(tx: &Transaction, draft: &DraftTransaction) -> Result<(), ValidationError> {
    if tx.output.len() != draft.tx.output.len() {
        return Err(ValidationError::DraftMismatch(format!(
            "expected {} outputs, found {}",
            draft.tx.output.len(),
            tx.output.len()
        )));
    }

    for (index, output) in tx.output.iter().enumerate() {
        let expected = &draft.tx.output[index];
        if output.value != expected.value || output.script_pubkey != expected.script_pubkey {
            return Err(ValidationError::DraftMismatch(format!(
                "output {index} differs from draft"
            )));
        }

        // Non-standard scripts cannot come out of the builder; only typed
        // outputs carry a dust rule here.
        if let Some(script_type) = ScriptType::from_script(&output.script_pubkey) {
            let threshold = script_type.dust_threshold();
            if output.value.to_sat() <= threshold {
                return Err(ValidationError::DustOutput {
                    index,
                    value: output.value.to_sat(),
                    threshold,
                });
            }
        }
    }
    Ok(())
}

fn check_conservation(tx: &Transaction, draft: &DraftTransaction) -> Result<(), ValidationError> {
    let input_total: u64 = draft.prevouts.iter().map(|p| p.value.to_sat()).sum();
    let output_total: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();

    if output_total.checked_add(draft.fee) != Some(input_total) {
        return Err(ValidationError::ValueMismatch {
            input_total,
            output_total,
            expected_fee: draft.fee,
        });
    }
    Ok(())
}
