use crate::error::TxError;
use crate::fee::FeeRate;
use crate::script::ScriptType;
use crate::utxo::Utxo;

/// What the builder hands the external signer for one input.
#[derive(Debug, Clone)]
pub struct SignRequest {
    /// BIP-32 path of the key that owns the input.
    pub derivation_path: String,
    /// Script type of the input being spent; determines the signature
    /// algorithm (ECDSA vs Schnorr) on the signer side.
    pub script_type: ScriptType,
    /// The 32-byte sighash to sign.
    pub sighash: [u8; 32],
}

/// A signature produced by the external signer.
#[derive(Debug, Clone)]
pub struct SignatureData {
    /// DER-encoded ECDSA signature, or a 64-byte Schnorr signature for
    /// taproot inputs. The builder appends the sighash-type byte itself.
    pub signature: Vec<u8>,
    /// 33-byte compressed public key of the signing key. Unused for taproot
    /// key-spend inputs.
    pub public_key: Vec<u8>,
}

/// External signer collaborator. The engine never touches key material;
/// the embedding wallet implements this against its HD keystore.
pub trait Signer {
    fn sign(&self, request: &SignRequest) -> Result<SignatureData, TxError>;

    /// Compressed public key for a derivation path. Needed before the
    /// sighash can be computed for wrapped-segwit inputs, whose script code
    /// is derived from the key.
    fn public_key(&self, derivation_path: &str) -> Result<Vec<u8>, TxError>;
}

/// External network collaborator (in practice an Electrum client).
/// Implementations own their timeouts; failures surface as
/// [`TxError::Network`].
pub trait BroadcastGateway {
    /// Submit raw transaction hex; returns the network-accepted txid.
    fn broadcast(&self, tx_hex: &str) -> Result<String, TxError>;

    /// Fetch the current unspent outputs for the wallet's addresses.
    fn fetch_utxos(&self, addresses: &[String]) -> Result<Vec<Utxo>, TxError>;

    /// Fee-rate estimate for confirmation within `target_blocks` blocks.
    fn estimate_fee_rate(&self, target_blocks: u32) -> Result<FeeRate, TxError>;
}
