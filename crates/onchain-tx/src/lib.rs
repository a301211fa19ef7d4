//! On-chain transaction construction engine for a Bitcoin wallet.
//!
//! Given the wallet's UTXO set, a fee-rate policy, and the desired outputs,
//! this crate selects inputs, computes fees, builds and signs a transaction
//! through an injected signer, and validates the result before handing the
//! raw hex to an injected broadcast gateway. Key management and network
//! transport live in the embedding application behind the [`gateway::Signer`]
//! and [`gateway::BroadcastGateway`] traits.

pub mod builder;
pub mod error;
pub mod fee;
pub mod gateway;
pub mod network;
pub mod script;
pub mod select;
pub mod send;
pub mod utxo;
pub mod validate;

pub use builder::{build, build_draft, sign_draft, DraftTransaction, SignedTransaction};
pub use error::{TxError, ValidationError};
pub use fee::{estimate_fee, estimate_vsize, FeePolicy, FeeRate};
pub use gateway::{BroadcastGateway, SignRequest, SignatureData, Signer};
pub use network::Network;
pub use script::ScriptType;
pub use select::{select, SelectionPolicy, SelectionResult};
pub use send::{refresh_utxos, send, SendOptions};
pub use utxo::{OutputTarget, Utxo, UtxoStore};
pub use validate::validate;
