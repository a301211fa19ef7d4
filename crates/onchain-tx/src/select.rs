use log::debug;

use crate::error::TxError;
use crate::fee::{estimate_fee, FeeRate};
use crate::script::ScriptType;
use crate::utxo::{OutputTarget, Utxo};

/// Outcome of coin selection.
///
/// Invariant: `sum(inputs.value) == sum(target values) + fee + change_value`,
/// where a sweep target's value is the amount the builder assigns it.
#[derive(Debug, Clone)]
pub struct SelectionResult {
    /// Chosen inputs, in spend order.
    pub inputs: Vec<Utxo>,
    /// Total fee in satoshis.
    pub fee: u64,
    /// Change returned to the wallet; 0 when no change output is created.
    pub change_value: u64,
}

impl SelectionResult {
    pub fn input_total(&self) -> u64 {
        self.inputs.iter().map(|u| u.value).sum()
    }
}

/// How inputs are chosen.
#[derive(Debug, Clone, Default)]
pub enum SelectionPolicy {
    /// Descending by value, stable fetch-order tie-break, accumulating until
    /// targets plus the running fee estimate are covered.
    #[default]
    LargestFirst,
    /// Caller-fixed input set (coin control); only sufficiency is checked
    /// and fee/change computed.
    Manual(Vec<Utxo>),
}

/// Select inputs covering `targets` plus fees at `fee_rate`.
///
/// A target marked `is_max` sweeps: all spendable outputs are consumed, the
/// marked output absorbs whatever remains after fixed targets and the fee,
/// and no change output is created. Otherwise inputs are chosen per `policy`
/// and a change output of type `change_type` is planned unless its value
/// would fall at or below the dust threshold, in which case the remainder is
/// folded into the fee.
pub fn select(
    utxos: &[Utxo],
    targets: &[OutputTarget],
    fee_rate: FeeRate,
    change_type: ScriptType,
    policy: &SelectionPolicy,
) -> Result<SelectionResult, TxError> {
    let target_types = validate_targets(targets)?;
    let fixed_total = targets
        .iter()
        .filter(|t| !t.is_max)
        .try_fold(0u64, |acc, t| acc.checked_add(t.value))
        .ok_or_else(|| TxError::Build("target value overflow".into()))?;

    if targets.iter().any(|t| t.is_max) {
        return select_sweep(utxos, targets, &target_types, fixed_total, fee_rate);
    }

    let result = match policy {
        SelectionPolicy::LargestFirst => select_largest_first(
            utxos,
            &target_types,
            fixed_total,
            fee_rate,
            change_type,
        )?,
        SelectionPolicy::Manual(inputs) => {
            let total = checked_total(inputs)?;
            finish(inputs.clone(), total, fixed_total, &target_types, fee_rate, change_type)
                .ok_or_else(|| {
                    let fee = estimate_fee(&input_types(inputs), &target_types, None, fee_rate);
                    TxError::InsufficientFunds {
                        available: total,
                        required: fixed_total.saturating_add(fee),
                    }
                })?
        }
    };

    debug!(
        "selected {} inputs ({} sat) for {} sat in targets, fee {} sat, change {} sat",
        result.inputs.len(),
        result.input_total(),
        fixed_total,
        result.fee,
        result.change_value,
    );
    Ok(result)
}

/// Target sanity checks; returns each target's output script type.
fn validate_targets(targets: &[OutputTarget]) -> Result<Vec<ScriptType>, TxError> {
    if targets.is_empty() {
        return Err(TxError::InvalidTarget("no outputs specified".into()));
    }
    if targets.iter().filter(|t| t.is_max).count() > 1 {
        return Err(TxError::InvalidTarget(
            "at most one output may sweep the remaining balance".into(),
        ));
    }

    let mut types = Vec::with_capacity(targets.len());
    for target in targets {
        let script_type = ScriptType::from_address_str(&target.address).ok_or_else(|| {
            TxError::InvalidTarget(format!("unparseable address: {}", target.address))
        })?;
        if !target.is_max && target.value <= script_type.dust_threshold() {
            return Err(TxError::InvalidTarget(format!(
                "output of {} sat to {} is below the dust threshold",
                target.value, target.address
            )));
        }
        types.push(script_type);
    }
    Ok(types)
}

fn input_types(inputs: &[Utxo]) -> Vec<ScriptType> {
    inputs.iter().map(|u| u.script_type).collect()
}

fn checked_total(inputs: &[Utxo]) -> Result<u64, TxError> {
    inputs
        .iter()
        .try_fold(0u64, |acc, u| acc.checked_add(u.value))
        .ok_or_else(|| TxError::Build("input value overflow".into()))
}

/// Complete a candidate input set: plan change if it clears the dust
/// threshold, otherwise fold the remainder into the fee. `None` when the
/// inputs cannot cover the targets plus even the changeless fee.
fn finish(
    inputs: Vec<Utxo>,
    total: u64,
    fixed_total: u64,
    target_types: &[ScriptType],
    fee_rate: FeeRate,
    change_type: ScriptType,
) -> Option<SelectionResult> {
    let in_types = input_types(&inputs);

    let fee_with_change = estimate_fee(&in_types, target_types, Some(change_type), fee_rate);
    if let Some(change) = total.checked_sub(fixed_total.checked_add(fee_with_change)?) {
        if change > change_type.dust_threshold() {
            return Some(SelectionResult {
                inputs,
                fee: fee_with_change,
                change_value: change,
            });
        }
    }

    let fee_no_change = estimate_fee(&in_types, target_types, None, fee_rate);
    let remainder = total.checked_sub(fixed_total.checked_add(fee_no_change)?)?;
    Some(SelectionResult {
        inputs,
        // Sub-dust remainder goes to the miner rather than creating an
        // unspendable output.
        fee: fee_no_change + remainder,
        change_value: 0,
    })
}

fn select_largest_first(
    utxos: &[Utxo],
    target_types: &[ScriptType],
    fixed_total: u64,
    fee_rate: FeeRate,
    change_type: ScriptType,
) -> Result<SelectionResult, TxError> {
    // Stable sort: equal-value outputs keep their original fetch order.
    let mut sorted: Vec<&Utxo> = utxos.iter().collect();
    sorted.sort_by(|a, b| b.value.cmp(&a.value));

    let mut selected: Vec<Utxo> = Vec::new();
    let mut accumulated: u64 = 0;

    for utxo in sorted {
        selected.push(utxo.clone());
        accumulated = accumulated
            .checked_add(utxo.value)
            .ok_or_else(|| TxError::Build("input value overflow".into()))?;

        let fee = estimate_fee(
            &input_types(&selected),
            target_types,
            Some(change_type),
            fee_rate,
        );
        if accumulated >= fixed_total.saturating_add(fee) {
            // finish() cannot fail here: the changeless fee is strictly
            // smaller than the fee just covered.
            return finish(selected, accumulated, fixed_total, target_types, fee_rate, change_type)
                .ok_or_else(|| TxError::Build("selection invariant broken".into()));
        }
    }

    // All outputs accumulated without covering the change-bearing fee; a
    // changeless transaction may still fit.
    if let Some(result) = finish(
        selected.clone(),
        accumulated,
        fixed_total,
        target_types,
        fee_rate,
        change_type,
    ) {
        return Ok(result);
    }

    let fee = estimate_fee(&input_types(&selected), target_types, None, fee_rate);
    Err(TxError::InsufficientFunds {
        available: accumulated,
        required: fixed_total.saturating_add(fee),
    })
}

/// Sweep: consume every spendable output; the `is_max` target absorbs
/// `total - fixed targets - fee` and no change output exists.
fn select_sweep(
    utxos: &[Utxo],
    targets: &[OutputTarget],
    target_types: &[ScriptType],
    fixed_total: u64,
    fee_rate: FeeRate,
) -> Result<SelectionResult, TxError> {
    let inputs: Vec<Utxo> = utxos.to_vec();
    let total = checked_total(&inputs)?;

    let fee = estimate_fee(&input_types(&inputs), target_types, None, fee_rate);

    let max_index = targets.iter().position(|t| t.is_max).unwrap_or(0);
    let max_dust = target_types[max_index].dust_threshold();

    let required = fixed_total.saturating_add(fee).saturating_add(max_dust);
    let sweep_value = total
        .checked_sub(fixed_total.saturating_add(fee))
        .filter(|v| *v > max_dust)
        .ok_or(TxError::InsufficientFunds {
            available: total,
            required,
        })?;

    debug!(
        "sweep selected {} inputs ({} sat), fee {} sat, max output {} sat",
        inputs.len(),
        total,
        fee,
        sweep_value,
    );
    Ok(SelectionResult {
        inputs,
        fee,
        change_value: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const WALLET_ADDR: &str = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";

    fn rate(n: u64) -> FeeRate {
        FeeRate::from_sat_per_vbyte(n).unwrap()
    }

    fn make_utxo(tag: &str, vout: u32, value: u64) -> Utxo {
        Utxo {
            txid: tag.repeat(64 / tag.len()),
            vout,
            value,
            script_pubkey: hex::decode(format!("0014{}", "ab".repeat(20))).unwrap(),
            address: WALLET_ADDR.into(),
            derivation_path: "m/84'/0'/0'/0/0".into(),
            script_type: ScriptType::P2wpkh,
            confirmations: 1,
        }
    }

    fn conservation_holds(result: &SelectionResult, fixed_total: u64) {
        assert_eq!(
            result.input_total(),
            fixed_total + result.fee + result.change_value
        );
    }

    #[test]
    fn single_utxo_with_change() {
        let utxos = vec![make_utxo("a", 0, 50_000)];
        let targets = vec![OutputTarget::new(WALLET_ADDR, 10_001)];
        let result = select(
            &utxos,
            &targets,
            rate(1),
            ScriptType::P2wpkh,
            &SelectionPolicy::LargestFirst,
        )
        .unwrap();

        assert_eq!(result.inputs.len(), 1);
        // 1 input, target + change outputs: 11 + 68 + 31 + 31 = 141 vbytes.
        assert_eq!(result.fee, 141);
        assert_eq!(result.change_value, 50_000 - 10_001 - 141);
        conservation_holds(&result, 10_001);
    }

    #[test]
    fn prefers_largest_value() {
        let utxos = vec![
            make_utxo("a", 0, 1_000),
            make_utxo("b", 0, 100_000),
            make_utxo("c", 0, 50_000),
        ];
        let targets = vec![OutputTarget::new(WALLET_ADDR, 10_000)];
        let result = select(
            &utxos,
            &targets,
            rate(1),
            ScriptType::P2wpkh,
            &SelectionPolicy::LargestFirst,
        )
        .unwrap();
        assert_eq!(result.inputs.len(), 1);
        assert_eq!(result.inputs[0].value, 100_000);
    }

    #[test]
    fn equal_values_keep_fetch_order() {
        let utxos = vec![
            make_utxo("a", 7, 20_000),
            make_utxo("b", 3, 20_000),
            make_utxo("c", 1, 20_000),
        ];
        let targets = vec![OutputTarget::new(WALLET_ADDR, 35_000)];
        let result = select(
            &utxos,
            &targets,
            rate(1),
            ScriptType::P2wpkh,
            &SelectionPolicy::LargestFirst,
        )
        .unwrap();
        assert_eq!(result.inputs.len(), 2);
        assert_eq!(result.inputs[0].vout, 7);
        assert_eq!(result.inputs[1].vout, 3);
    }

    #[test]
    fn accumulates_until_fee_is_covered() {
        let utxos = vec![
            make_utxo("a", 0, 30_000),
            make_utxo("b", 0, 30_000),
            make_utxo("c", 0, 30_000),
        ];
        let targets = vec![OutputTarget::new(WALLET_ADDR, 55_000)];
        let result = select(
            &utxos,
            &targets,
            rate(1),
            ScriptType::P2wpkh,
            &SelectionPolicy::LargestFirst,
        )
        .unwrap();
        assert!(result.inputs.len() >= 2);
        conservation_holds(&result, 55_000);
    }

    #[test]
    fn sub_dust_change_folds_into_fee() {
        // Remainder after the change-bearing fee sits below the dust
        // threshold, so no change output is planned.
        let utxos = vec![make_utxo("a", 0, 50_000)];
        let targets = vec![OutputTarget::new(WALLET_ADDR, 49_700)];
        let result = select(
            &utxos,
            &targets,
            rate(1),
            ScriptType::P2wpkh,
            &SelectionPolicy::LargestFirst,
        )
        .unwrap();

        assert_eq!(result.change_value, 0);
        // Entire remainder above the target goes to fee.
        assert_eq!(result.fee, 50_000 - 49_700);
        conservation_holds(&result, 49_700);
    }

    #[test]
    fn insufficient_funds_reports_totals() {
        let utxos = vec![make_utxo("a", 0, 1_000)];
        let targets = vec![OutputTarget::new(WALLET_ADDR, 500_000)];
        let err = select(
            &utxos,
            &targets,
            rate(1),
            ScriptType::P2wpkh,
            &SelectionPolicy::LargestFirst,
        )
        .unwrap_err();
        match err {
            TxError::InsufficientFunds {
                available,
                required,
            } => {
                assert_eq!(available, 1_000);
                assert!(required > 500_000);
            }
            other => panic!("expected InsufficientFunds, got {other:?}"),
        }
    }

    #[test]
    fn insufficient_iff_total_below_target_plus_fee() {
        // Exactly coverable without change: must succeed.
        let fee_no_change = estimate_fee(&[ScriptType::P2wpkh], &[ScriptType::P2wpkh], None, rate(1));
        let target_value = 40_000;
        let utxos = vec![make_utxo("a", 0, target_value + fee_no_change)];
        let targets = vec![OutputTarget::new(WALLET_ADDR, target_value)];

        let result = select(
            &utxos,
            &targets,
            rate(1),
            ScriptType::P2wpkh,
            &SelectionPolicy::LargestFirst,
        )
        .unwrap();
        assert_eq!(result.fee, fee_no_change);
        assert_eq!(result.change_value, 0);

        // One satoshi less: must fail.
        let utxos = vec![make_utxo("a", 0, target_value + fee_no_change - 1)];
        assert!(matches!(
            select(
                &utxos,
                &targets,
                rate(1),
                ScriptType::P2wpkh,
                &SelectionPolicy::LargestFirst,
            ),
            Err(TxError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn sweep_consumes_everything_without_change() {
        let utxos = vec![
            make_utxo("a", 0, 100_000),
            make_utxo("b", 0, 23_456),
        ];
        let targets = vec![OutputTarget::max(WALLET_ADDR)];
        let result = select(
            &utxos,
            &targets,
            rate(1),
            ScriptType::P2wpkh,
            &SelectionPolicy::LargestFirst,
        )
        .unwrap();

        assert_eq!(result.inputs.len(), 2);
        assert_eq!(result.input_total(), 123_456);
        assert_eq!(result.change_value, 0);
        // The swept output receives total minus fee.
        assert_eq!(result.input_total() - result.fee, 123_456 - result.fee);
        assert!(result.fee > 0);
    }

    #[test]
    fn sweep_of_dust_only_wallet_fails() {
        let utxos = vec![make_utxo("a", 0, 150)];
        let targets = vec![OutputTarget::max(WALLET_ADDR)];
        assert!(matches!(
            select(
                &utxos,
                &targets,
                rate(1),
                ScriptType::P2wpkh,
                &SelectionPolicy::LargestFirst,
            ),
            Err(TxError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn two_sweep_targets_rejected() {
        let utxos = vec![make_utxo("a", 0, 100_000)];
        let targets = vec![OutputTarget::max(WALLET_ADDR), OutputTarget::max(WALLET_ADDR)];
        assert!(matches!(
            select(
                &utxos,
                &targets,
                rate(1),
                ScriptType::P2wpkh,
                &SelectionPolicy::LargestFirst,
            ),
            Err(TxError::InvalidTarget(_))
        ));
    }

    #[test]
    fn dust_target_rejected() {
        let utxos = vec![make_utxo("a", 0, 100_000)];
        let targets = vec![OutputTarget::new(WALLET_ADDR, 100)];
        assert!(matches!(
            select(
                &utxos,
                &targets,
                rate(1),
                ScriptType::P2wpkh,
                &SelectionPolicy::LargestFirst,
            ),
            Err(TxError::InvalidTarget(_))
        ));
    }

    #[test]
    fn bad_address_rejected() {
        let utxos = vec![make_utxo("a", 0, 100_000)];
        let targets = vec![OutputTarget::new("not_an_address", 10_000)];
        assert!(matches!(
            select(
                &utxos,
                &targets,
                rate(1),
                ScriptType::P2wpkh,
                &SelectionPolicy::LargestFirst,
            ),
            Err(TxError::InvalidTarget(_))
        ));
    }

    #[test]
    fn manual_policy_uses_exact_inputs() {
        let chosen = vec![make_utxo("a", 0, 30_000), make_utxo("b", 0, 30_000)];
        let targets = vec![OutputTarget::new(WALLET_ADDR, 10_000)];
        let result = select(
            &[],
            &targets,
            rate(2),
            ScriptType::P2wpkh,
            &SelectionPolicy::Manual(chosen.clone()),
        )
        .unwrap();

        assert_eq!(result.inputs.len(), 2);
        assert_eq!(result.inputs[0].txid, chosen[0].txid);
        conservation_holds(&result, 10_000);
    }

    #[test]
    fn manual_policy_insufficient() {
        let chosen = vec![make_utxo("a", 0, 5_000)];
        let targets = vec![OutputTarget::new(WALLET_ADDR, 10_000)];
        assert!(matches!(
            select(
                &[],
                &targets,
                rate(1),
                ScriptType::P2wpkh,
                &SelectionPolicy::Manual(chosen),
            ),
            Err(TxError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn higher_fee_rate_selects_more_inputs() {
        let utxos = vec![
            make_utxo("a", 0, 50_000),
            make_utxo("b", 0, 50_000),
        ];
        let targets = vec![OutputTarget::new(WALLET_ADDR, 49_000)];

        let low = select(
            &utxos,
            &targets,
            rate(1),
            ScriptType::P2wpkh,
            &SelectionPolicy::LargestFirst,
        )
        .unwrap();
        let high = select(
            &utxos,
            &targets,
            rate(20),
            ScriptType::P2wpkh,
            &SelectionPolicy::LargestFirst,
        )
        .unwrap();
        assert!(high.inputs.len() >= low.inputs.len());
        assert!(high.fee > low.fee);
    }
}
