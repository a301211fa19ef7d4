use bitcoin::address::Address;
use bitcoin::script::Script;
use bitcoin::AddressType;
use serde::{Deserialize, Serialize};

/// Standard output script kinds this wallet deals with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScriptType {
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
    P2tr,
}

impl ScriptType {
    /// Virtual size contributed by one input spending this script type,
    /// rounded up. Witness bytes are discounted 4x:
    /// `ceil((non_witness * 4 + witness) / 4)`.
    ///
    /// - P2PKH: 148 (outpoint 36 + script_sig ~107 + sequence 4 + len 1)
    /// - P2SH (wrapped P2WPKH): 91 (outpoint 36 + redeem push 23 + sequence 4
    ///   + len 1 + ~108 witness bytes / 4)
    /// - P2WPKH: 68 (41 non-witness + ~108 witness bytes / 4)
    /// - P2WSH: 105 (41 non-witness + witness script estimate / 4)
    /// - P2TR: 58 (41 non-witness + 66 witness bytes / 4, key spend)
    pub fn input_vbytes(self) -> u64 {
        match self {
            ScriptType::P2pkh => 148,
            ScriptType::P2sh => 91,
            ScriptType::P2wpkh => 68,
            ScriptType::P2wsh => 105,
            ScriptType::P2tr => 58,
        }
    }

    /// Virtual size of one output paying to this script type:
    /// value 8 + script length 1 + scriptPubKey bytes.
    pub fn output_vbytes(self) -> u64 {
        match self {
            ScriptType::P2pkh => 34,
            ScriptType::P2sh => 32,
            ScriptType::P2wpkh => 31,
            ScriptType::P2wsh => 43,
            ScriptType::P2tr => 43,
        }
    }

    /// Minimum economical output value in satoshis, per the standard relay
    /// dust rule (3 sat/vbyte over the cost of creating plus spending the
    /// output).
    pub fn dust_threshold(self) -> u64 {
        match self {
            ScriptType::P2pkh => 546,
            ScriptType::P2sh => 540,
            ScriptType::P2wpkh => 294,
            ScriptType::P2wsh => 330,
            ScriptType::P2tr => 330,
        }
    }

    /// Classify a raw scriptPubKey. Returns `None` for non-standard scripts.
    pub fn from_script(script: &Script) -> Option<Self> {
        if script.is_p2pkh() {
            Some(ScriptType::P2pkh)
        } else if script.is_p2sh() {
            Some(ScriptType::P2sh)
        } else if script.is_p2wpkh() {
            Some(ScriptType::P2wpkh)
        } else if script.is_p2wsh() {
            Some(ScriptType::P2wsh)
        } else if script.is_p2tr() {
            Some(ScriptType::P2tr)
        } else {
            None
        }
    }

    /// Classify an address string without checking its network. Network
    /// agreement is enforced separately when the transaction is built.
    pub fn from_address_str(address: &str) -> Option<Self> {
        let parsed = address
            .parse::<Address<bitcoin::address::NetworkUnchecked>>()
            .ok()?;
        Self::from_address(parsed.assume_checked_ref())
    }

    /// Classify a parsed address.
    pub fn from_address(address: &Address) -> Option<Self> {
        match address.address_type()? {
            AddressType::P2pkh => Some(ScriptType::P2pkh),
            AddressType::P2sh => Some(ScriptType::P2sh),
            AddressType::P2wpkh => Some(ScriptType::P2wpkh),
            AddressType::P2wsh => Some(ScriptType::P2wsh),
            AddressType::P2tr => Some(ScriptType::P2tr),
            _ => None,
        }
    }

    /// Whether inputs of this type carry their signature in the witness.
    pub fn is_segwit(self) -> bool {
        // P2SH counts: the wallet only holds P2SH-wrapped P2WPKH.
        !matches!(self, ScriptType::P2pkh)
    }
}
