use std::collections::HashSet;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::script::ScriptType;

/// A single unspent transaction output owned by the wallet.
///
/// Plain data as fetched from the wallet's Electrum peer; parsed into
/// `bitcoin` types only when a transaction is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Transaction ID as a hex string (big-endian / display order).
    pub txid: String,
    /// Output index within the transaction.
    pub vout: u32,
    /// Value in satoshis.
    pub value: u64,
    /// The locking script (scriptPubKey) serialized bytes.
    pub script_pubkey: Vec<u8>,
    /// The address this output pays to.
    pub address: String,
    /// BIP-32 derivation path of the owning key, passed through to the signer.
    pub derivation_path: String,
    /// Kind of locking script.
    pub script_type: ScriptType,
    /// Confirmation depth; 0 for mempool outputs.
    pub confirmations: u32,
}

impl Utxo {
    /// The `txid:vout` pair identifying this output.
    pub fn outpoint(&self) -> (String, u32) {
        (self.txid.clone(), self.vout)
    }
}

/// A desired payment output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTarget {
    pub address: String,
    /// Value in satoshis. Ignored when `is_max` is set.
    pub value: u64,
    /// Sweep marker: this output absorbs the remaining balance after fees.
    /// At most one per transaction.
    pub is_max: bool,
}

impl OutputTarget {
    pub fn new(address: impl Into<String>, value: u64) -> Self {
        OutputTarget {
            address: address.into(),
            value,
            is_max: false,
        }
    }

    /// A sweep output: sends everything left after fixed targets and fees.
    pub fn max(address: impl Into<String>) -> Self {
        OutputTarget {
            address: address.into(),
            value: 0,
            is_max: true,
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    utxos: Vec<Utxo>,
    /// Outpoints consumed by a built-but-unconfirmed transaction.
    pending: HashSet<(String, u32)>,
}

/// The wallet's spendable-output set.
///
/// Shared between the sync process (which replaces the set) and send flows
/// (which read it and tentatively reserve inputs). All access is serialized
/// behind the mutex so two concurrent builds can never pick the same output.
/// Operations never fail; an absent wallet state just reads as empty.
#[derive(Debug, Default)]
pub struct UtxoStore {
    state: Mutex<StoreState>,
}

impl UtxoStore {
    pub fn new() -> Self {
        UtxoStore::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        // A poisoned lock only means another thread panicked mid-read; the
        // state itself is still coherent, so recover rather than propagate.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the whole set from a wallet sync. Reservations survive the
    /// refresh: outputs still marked pending stay unselectable even if the
    /// peer reports them as unspent.
    pub fn replace_all(&self, utxos: Vec<Utxo>) {
        let mut state = self.lock();
        state.utxos = utxos;
        let known: HashSet<(String, u32)> = state.utxos.iter().map(Utxo::outpoint).collect();
        state.pending.retain(|op| known.contains(op));
    }

    /// Outputs available for selection, filtered by confirmation depth.
    /// Pass 0 to allow unconfirmed outputs (RBF bump flows need this).
    pub fn list_spendable(&self, min_confirmations: u32) -> Vec<Utxo> {
        let state = self.lock();
        state
            .utxos
            .iter()
            .filter(|u| u.confirmations >= min_confirmations)
            .filter(|u| !state.pending.contains(&u.outpoint()))
            .cloned()
            .collect()
    }

    /// Reserve inputs consumed by a freshly built transaction so no other
    /// build can double-spend them before the network confirms.
    pub fn mark_pending(&self, inputs: &[Utxo]) {
        let mut state = self.lock();
        for input in inputs {
            state.pending.insert(input.outpoint());
        }
    }

    /// Undo `mark_pending` after a failed build or broadcast.
    pub fn release(&self, inputs: &[Utxo]) {
        let mut state = self.lock();
        for input in inputs {
            state.pending.remove(&input.outpoint());
        }
    }

    /// Total spendable value in satoshis, excluding reserved outputs.
    pub fn balance(&self) -> u64 {
        self.list_spendable(0).iter().map(|u| u.value).sum()
    }

    /// Outpoints currently reserved by in-flight transactions.
    pub fn pending_outpoints(&self) -> Vec<(String, u32)> {
        self.lock().pending.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_utxo(txid: &str, vout: u32, value: u64, confirmations: u32) -> Utxo {
        Utxo {
            txid: txid.repeat(64 / txid.len()),
            vout,
            value,
            script_pubkey: hex::decode(format!("0014{}", "ab".repeat(20))).unwrap(),
            address: "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4".into(),
            derivation_path: "m/84'/0'/0'/0/0".into(),
            script_type: ScriptType::P2wpkh,
            confirmations,
        }
    }

    #[test]
    fn empty_store_reads_empty() {
        let store = UtxoStore::new();
        assert!(store.list_spendable(0).is_empty());
        assert_eq!(store.balance(), 0);
    }

    #[test]
    fn confirmation_filter() {
        let store = UtxoStore::new();
        store.replace_all(vec![
            make_utxo("a", 0, 10_000, 0),
            make_utxo("b", 0, 20_000, 3),
        ]);
        assert_eq!(store.list_spendable(0).len(), 2);
        assert_eq!(store.list_spendable(1).len(), 1);
        assert_eq!(store.list_spendable(1)[0].value, 20_000);
    }

    #[test]
    fn pending_outputs_are_not_spendable() {
        let store = UtxoStore::new();
        let a = make_utxo("a", 0, 10_000, 1);
        let b = make_utxo("b", 1, 20_000, 1);
        store.replace_all(vec![a.clone(), b]);

        store.mark_pending(std::slice::from_ref(&a));
        let spendable = store.list_spendable(0);
        assert_eq!(spendable.len(), 1);
        assert_eq!(spendable[0].vout, 1);
        assert_eq!(store.balance(), 20_000);

        store.release(std::slice::from_ref(&a));
        assert_eq!(store.list_spendable(0).len(), 2);
    }

    #[test]
    fn refresh_keeps_reservations_for_known_outputs() {
        let store = UtxoStore::new();
        let a = make_utxo("a", 0, 10_000, 1);
        store.replace_all(vec![a.clone()]);
        store.mark_pending(std::slice::from_ref(&a));

        // Peer still reports the output unspent (tx not yet seen).
        store.replace_all(vec![a.clone()]);
        assert!(store.list_spendable(0).is_empty());

        // Once the spend confirms, the output disappears and so does the
        // reservation.
        store.replace_all(vec![make_utxo("b", 0, 5_000, 1)]);
        assert!(store.pending_outpoints().is_empty());
        assert_eq!(store.balance(), 5_000);
    }

    #[test]
    fn utxo_parses_from_peer_json() {
        let json = r#"{
            "txid": "71c61ef6dd1af0a06cb6040459c3b7b2cbe2ab8ec9f4d8abd73eba4931ab0e0c",
            "vout": 0,
            "value": 50000,
            "script_pubkey": [0, 20, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20],
            "address": "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4",
            "derivation_path": "m/84'/0'/0'/0/0",
            "script_type": "P2wpkh",
            "confirmations": 2
        }"#;
        let utxo: Utxo = serde_json::from_str(json).unwrap();
        assert_eq!(utxo.value, 50_000);
        assert_eq!(utxo.script_type, ScriptType::P2wpkh);
    }
}
