use serde::{Deserialize, Serialize};

use crate::error::TxError;
use crate::script::ScriptType;

/// Fixed transaction overhead in vbytes: version + locktime + segwit
/// marker/flag + varint counts.
pub const TX_OVERHEAD_VBYTES: u64 = 11;

/// A fee rate in satoshis per virtual byte. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeeRate {
    sat_per_vbyte: u64,
}

impl FeeRate {
    pub fn from_sat_per_vbyte(sat_per_vbyte: u64) -> Result<Self, TxError> {
        if sat_per_vbyte == 0 {
            return Err(TxError::InvalidTarget(
                "fee rate must be at least 1 sat/vbyte".into(),
            ));
        }
        Ok(FeeRate { sat_per_vbyte })
    }

    pub fn sat_per_vbyte(self) -> u64 {
        self.sat_per_vbyte
    }
}

impl std::fmt::Display for FeeRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} sat/vB", self.sat_per_vbyte)
    }
}

/// Fee-rate policy presets, mirroring the wallet's transaction-speed setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeePolicy {
    Fast,
    Normal,
    Slow,
    Custom(FeeRate),
}

impl FeePolicy {
    /// Confirmation target in blocks, fed to the peer's fee estimator.
    /// `None` for custom rates, which skip estimation entirely.
    pub fn target_blocks(self) -> Option<u32> {
        match self {
            FeePolicy::Fast => Some(1),
            FeePolicy::Normal => Some(3),
            FeePolicy::Slow => Some(6),
            FeePolicy::Custom(_) => None,
        }
    }
}

/// Estimate the virtual size of a transaction with the given input and
/// output script types, plus an optional change output.
pub fn estimate_vsize(
    input_types: &[ScriptType],
    output_types: &[ScriptType],
    change_type: Option<ScriptType>,
) -> u64 {
    let inputs: u64 = input_types.iter().map(|t| t.input_vbytes()).sum();
    let outputs: u64 = output_types.iter().map(|t| t.output_vbytes()).sum();
    let change = change_type.map_or(0, |t| t.output_vbytes());
    TX_OVERHEAD_VBYTES + inputs + outputs + change
}

/// Estimate the total fee in satoshis: `vsize * rate`.
///
/// Monotonic by construction: every input or output adds a positive number
/// of vbytes, so the estimate never decreases as the shape grows.
pub fn estimate_fee(
    input_types: &[ScriptType],
    output_types: &[ScriptType],
    change_type: Option<ScriptType>,
    fee_rate: FeeRate,
) -> u64 {
    estimate_vsize(input_types, output_types, change_type)
        .saturating_mul(fee_rate.sat_per_vbyte())
}
