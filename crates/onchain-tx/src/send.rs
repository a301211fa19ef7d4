use log::{debug, error, warn};

use crate::builder::{build, SignedTransaction};
use crate::error::TxError;
use crate::fee::{FeePolicy, FeeRate};
use crate::gateway::{BroadcastGateway, Signer};
use crate::network::Network;
use crate::script::ScriptType;
use crate::select::{select, SelectionPolicy};
use crate::utxo::{OutputTarget, UtxoStore};
use crate::validate::validate;

/// Knobs for one send flow.
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub selection: SelectionPolicy,
    pub fee: FeePolicy,
    pub rbf: bool,
    /// Minimum confirmation depth for selectable inputs. 0 admits
    /// unconfirmed outputs (needed when bumping an RBF transaction).
    pub min_confirmations: u32,
}

impl Default for SendOptions {
    fn default() -> Self {
        SendOptions {
            selection: SelectionPolicy::LargestFirst,
            fee: FeePolicy::Normal,
            rbf: true,
            min_confirmations: 1,
        }
    }
}

/// Refresh the wallet's UTXO set from the network peer.
pub fn refresh_utxos(
    store: &UtxoStore,
    gateway: &dyn BroadcastGateway,
    addresses: &[String],
) -> Result<(), TxError> {
    let utxos = gateway.fetch_utxos(addresses)?;
    debug!("refreshed {} utxos from peer", utxos.len());
    store.replace_all(utxos);
    Ok(())
}

/// Run a complete send: resolve the fee rate, select coins, build and sign,
/// validate, then broadcast.
///
/// Inputs are reserved in the store the moment a transaction is built;
/// every failure path after that point releases them so the user can retry
/// without manual intervention. A successful broadcast leaves them reserved
/// until the spend confirms and the next sync drops them.
pub fn send(
    store: &UtxoStore,
    signer: &dyn Signer,
    gateway: &dyn BroadcastGateway,
    targets: &[OutputTarget],
    change_address: &str,
    network: Network,
    options: &SendOptions,
) -> Result<SignedTransaction, TxError> {
    let fee_rate = resolve_fee_rate(gateway, options.fee)?;
    let change_type = ScriptType::from_address_str(change_address).ok_or_else(|| {
        TxError::InvalidTarget(format!("unparseable change address: {change_address}"))
    })?;

    let spendable = store.list_spendable(options.min_confirmations);
    let selection = select(&spendable, targets, fee_rate, change_type, &options.selection)?;

    // Reserves the selected inputs on success.
    let (draft, signed) = build(
        &selection,
        targets,
        change_address,
        network,
        options.rbf,
        signer,
        store,
    )?;

    if let Err(e) = validate(&signed, &draft) {
        error!("built transaction failed validation: {e}");
        store.release(&draft.inputs);
        return Err(e.into());
    }

    match gateway.broadcast(&signed.hex) {
        Ok(network_txid) => {
            if network_txid != signed.txid {
                warn!(
                    "peer reported txid {network_txid}, expected {}",
                    signed.txid
                );
            }
            debug!("broadcast {} ({} sat fee)", signed.txid, draft.fee);
            Ok(signed)
        }
        Err(e) => {
            store.release(&draft.inputs);
            Err(e)
        }
    }
}

fn resolve_fee_rate(
    gateway: &dyn BroadcastGateway,
    policy: FeePolicy,
) -> Result<FeeRate, TxError> {
    match policy {
        FeePolicy::Custom(rate) => Ok(rate),
        preset => {
            let blocks = preset
                .target_blocks()
                .ok_or_else(|| TxError::Build("preset without a block target".into()))?;
            gateway.estimate_fee_rate(blocks)
        }
    }
}
