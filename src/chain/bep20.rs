use std::str::FromStr;
use std::time::Duration;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{info, warn};

use super::{from_base_units, to_base_units, TokenClient, TransferReceipt, TxStatus};
use crate::config::{Config, Network};
use crate::error::ChainError;

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function transfer(address recipient, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
        function symbol() external view returns (string);
    }
}

/// BEP-20 token client backed by a JSON-RPC node. Transfers are signed with
/// the payout wallet's key; the wallet address doubles as the treasury.
#[derive(Debug)]
pub struct Bep20Client {
    provider: DynProvider,
    contract: IERC20::IERC20Instance<DynProvider>,
    treasury: Address,
    network: Network,
    symbol: String,
    decimals: u8,
    confirm_timeout: Duration,
}

impl Bep20Client {
    /// Connect to the node and pin the token metadata. Decimals and symbol
    /// are immutable on BEP-20 contracts, so one query at startup is enough.
    pub async fn connect(config: &Config) -> Result<Self, ChainError> {
        let key = config
            .admin_private_key
            .as_deref()
            .ok_or_else(|| ChainError::Connect("ADMIN_PRIVATE_KEY is not set".to_string()))?;
        let contract_address = config
            .contract_address
            .as_deref()
            .ok_or_else(|| ChainError::Connect("CONTRACT_ADDRESS is not set".to_string()))?;

        let signer = PrivateKeySigner::from_str(key.trim())
            .map_err(|e| ChainError::InvalidKey(e.to_string()))?;
        let treasury = signer.address();

        let url = config
            .bsc_node_url
            .parse()
            .map_err(|_| ChainError::Connect(format!("bad node url: {}", config.bsc_node_url)))?;

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();

        let token_address = Address::from_str(contract_address)
            .map_err(|_| ChainError::InvalidAddress(contract_address.to_string()))?;
        let contract = IERC20::new(token_address, provider.clone());

        let decimals = contract
            .decimals()
            .call()
            .await
            .map_err(|e| ChainError::Query(format!("decimals(): {e}")))?;
        let symbol = contract
            .symbol()
            .call()
            .await
            .map_err(|e| ChainError::Query(format!("symbol(): {e}")))?;

        let network = config.network();
        info!(
            "⛓️ Connected to {} — token {} ({} decimals), treasury {}",
            network.label(),
            symbol,
            decimals,
            treasury
        );

        Ok(Self {
            provider,
            contract,
            treasury,
            network,
            symbol,
            decimals,
            confirm_timeout: Duration::from_secs(config.confirm_timeout_secs),
        })
    }
}

#[async_trait]
impl TokenClient for Bep20Client {
    fn network(&self) -> Network {
        self.network
    }

    fn token_symbol(&self) -> &str {
        &self.symbol
    }

    async fn treasury_balance(&self) -> Result<Decimal, ChainError> {
        let raw = self
            .contract
            .balanceOf(self.treasury)
            .call()
            .await
            .map_err(|e| ChainError::Query(format!("balanceOf(): {e}")))?;
        from_base_units(raw, self.decimals)
    }

    async fn transfer(&self, to: &str, amount: Decimal) -> Result<TransferReceipt, ChainError> {
        let recipient =
            Address::from_str(to).map_err(|_| ChainError::InvalidAddress(to.to_string()))?;
        let units = to_base_units(amount, self.decimals)?;

        let pending = self
            .contract
            .transfer(recipient, units)
            .send()
            .await
            .map_err(|e| ChainError::Submit(e.to_string()))?;

        // Capture the hash before waiting: a timed-out wait must still be
        // attributable to a concrete transaction.
        let tx_hash = format!("{:#x}", pending.tx_hash());
        info!("📤 Transfer of {} {} to {} submitted: {}", amount, self.symbol, to, tx_hash);

        let receipt = pending
            .with_timeout(Some(self.confirm_timeout))
            .get_receipt()
            .await
            .map_err(|e| {
                warn!("⏱️ Confirmation wait for {} failed: {}", tx_hash, e);
                ChainError::ConfirmationTimeout {
                    tx_hash: tx_hash.clone(),
                }
            })?;

        if !receipt.status() {
            return Err(ChainError::Reverted { tx_hash });
        }
        Ok(TransferReceipt { tx_hash })
    }

    async fn receipt_status(&self, tx_hash: &str) -> Result<Option<TxStatus>, ChainError> {
        let hash = B256::from_str(tx_hash)
            .map_err(|_| ChainError::Query(format!("bad tx hash: {tx_hash}")))?;

        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| ChainError::Query(e.to_string()))?;

        Ok(receipt.map(|r| {
            if r.status() {
                TxStatus::Confirmed
            } else {
                TxStatus::Reverted
            }
        }))
    }
}
