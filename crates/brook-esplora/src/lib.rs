//! # brook-esplora: Esplora REST implementation of `DataProvider`.
//!
//! Maps the engine's provider contract onto a Blockstream-style Esplora
//! API:
//!
//! - address info → `GET /address/{address}` (confirmed + mempool tx counts)
//! - unspent outputs → `GET /address/{address}/utxo`
//! - broadcast → `POST /tx` with the raw hex as body

pub mod client;
pub mod config;

pub use client::EsploraClient;
pub use config::{EsploraConfig, TESTNET_URL};
