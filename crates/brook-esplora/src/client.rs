//! HTTP client and response mapping.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use brook_core::error::ProviderError;
use brook_core::traits::DataProvider;
use brook_core::types::{AddressInfo, AddressLookup, BroadcastResponse, ProviderUtxo};

use crate::config::EsploraConfig;

/// Esplora HTTP client.
#[derive(Debug, Clone)]
pub struct EsploraClient {
    client: Client,
    base_url: String,
}

impl EsploraClient {
    pub fn new(config: &EsploraConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Client for Blockstream's public testnet instance.
    pub fn testnet() -> Result<Self, ProviderError> {
        Self::new(&EsploraConfig::default())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path: &str) -> Result<(u16, String), ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.get(&url).send().await.map_err(transport)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(transport)?;
        debug!(%url, status, "esplora GET");
        Ok((status, body))
    }
}

fn transport(e: reqwest::Error) -> ProviderError {
    ProviderError::Transport(e.to_string())
}

#[derive(Deserialize)]
struct TxStats {
    tx_count: u64,
}

#[derive(Deserialize)]
struct EsploraAddress {
    address: String,
    chain_stats: TxStats,
    mempool_stats: TxStats,
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// `GET /address/{a}`: usage counts confirmed and mempool transactions.
/// Esplora answers 400 for addresses it cannot parse.
pub(crate) fn address_lookup(status: u16, body: &str) -> Result<AddressLookup, ProviderError> {
    match status {
        s if is_success(s) => {
            let parsed: EsploraAddress =
                serde_json::from_str(body).map_err(|e| ProviderError::Decode(e.to_string()))?;
            Ok(AddressLookup::Found(AddressInfo {
                address: parsed.address,
                transaction_count: parsed
                    .chain_stats
                    .tx_count
                    .saturating_add(parsed.mempool_stats.tx_count),
            }))
        }
        400 => Ok(AddressLookup::Error {
            error: body.trim().to_string(),
        }),
        _ => Err(ProviderError::Status {
            status,
            body: body.to_string(),
        }),
    }
}

pub(crate) fn utxo_list(status: u16, body: &str) -> Result<Vec<ProviderUtxo>, ProviderError> {
    if !is_success(status) {
        return Err(ProviderError::Status {
            status,
            body: body.to_string(),
        });
    }
    serde_json::from_str(body).map_err(|e| ProviderError::Decode(e.to_string()))
}

/// `POST /tx`: success answers with the txid, failure with a plain-text
/// reason.
pub(crate) fn broadcast_response(status: u16, body: &str) -> BroadcastResponse {
    if is_success(status) {
        BroadcastResponse::accepted(body.trim())
    } else {
        BroadcastResponse::rejected(body.trim())
    }
}

#[async_trait]
impl DataProvider for EsploraClient {
    async fn address_info(&self, address: &str) -> Result<AddressLookup, ProviderError> {
        let (status, body) = self.get(&format!("/address/{address}")).await?;
        address_lookup(status, &body)
    }

    async fn utxos(&self, address: &str) -> Result<Vec<ProviderUtxo>, ProviderError> {
        let (status, body) = self.get(&format!("/address/{address}/utxo")).await?;
        utxo_list(status, &body)
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<BroadcastResponse, ProviderError> {
        let url = format!("{}/tx", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(raw_tx_hex.to_string())
            .send()
            .await
            .map_err(transport)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(transport)?;
        debug!(status, "esplora POST /tx");
        Ok(broadcast_response(status, &body))
    }
}
