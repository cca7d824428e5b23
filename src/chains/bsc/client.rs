//! BSC chain client
//!
//! Submits `purchaseFor` calls to the PackageManager contract, signing with
//! the treasury key. The treasury pre-funds USDT; the client tops up the
//! contract allowance before purchasing when needed.

use crate::chains::{ChainError, PackagePurchaser, PurchaseReceipt, PurchaseRequest};
use crate::config::BscConfig;
use alloy::{
    network::EthereumWallet,
    primitives::{Address, U256},
    providers::{Provider, ProviderBuilder},
    signers::local::PrivateKeySigner,
    sol,
    transports::http::Http,
};
use async_trait::async_trait;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

sol! {
    #[sol(rpc)]
    interface IPackageManager {
        function purchaseFor(address buyer, uint256 packageId, address referrer) external;
    }

    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }
}

/// BSC USDT carries 18 decimals. USD amounts arrive with cent precision,
/// so scale cents by 10^16 to avoid float error in token units.
fn usd_to_token_units(amount_usd: f64) -> U256 {
    let cents = (amount_usd * 100.0).round() as u128;
    U256::from(cents) * U256::from(10u64).pow(U256::from(16u64))
}

fn parse_address(raw: &str, what: &str) -> Result<Address, ChainError> {
    Address::from_str(raw).map_err(|e| ChainError::InvalidAddress {
        address: raw.to_string(),
        reason: format!("{}: {}", what, e),
    })
}

fn rpc_error(e: impl std::fmt::Display) -> ChainError {
    let message = e.to_string();
    // Reverts surface through the RPC transport as execution errors
    if message.contains("revert") || message.contains("execution reverted") {
        ChainError::Reverted { reason: message }
    } else {
        ChainError::Rpc {
            message,
            retryable: true,
        }
    }
}

pub struct BscClient {
    rpc_url: reqwest::Url,
    wallet: EthereumWallet,
    treasury_address: Address,
    package_manager: Address,
    usdt: Address,
    confirmation_timeout: Duration,
}

impl BscClient {
    pub fn new(config: &BscConfig) -> Result<Self, ChainError> {
        let rpc_url = reqwest::Url::parse(&config.rpc_url).map_err(|e| ChainError::Rpc {
            message: format!("invalid BSC_RPC_URL: {}", e),
            retryable: false,
        })?;

        let key = config
            .treasury_private_key
            .trim_start_matches("0x")
            .to_string();
        let signer = PrivateKeySigner::from_str(&key).map_err(|e| ChainError::InvalidKey {
            reason: e.to_string(),
        })?;
        let treasury_address = signer.address();
        let wallet = EthereumWallet::from(signer);

        Ok(Self {
            rpc_url,
            wallet,
            treasury_address,
            package_manager: parse_address(&config.package_manager_address, "PackageManager")?,
            usdt: parse_address(&config.usdt_address, "USDT")?,
            confirmation_timeout: Duration::from_secs(config.confirmation_timeout),
        })
    }

    fn provider(&self) -> impl Provider<Http<reqwest::Client>> + Clone {
        ProviderBuilder::new()
            .wallet(self.wallet.clone())
            .on_http(self.rpc_url.clone())
    }

    /// Raise the PackageManager allowance when it cannot cover `amount`.
    async fn ensure_allowance(
        &self,
        provider: &(impl Provider<Http<reqwest::Client>> + Clone),
        amount: U256,
    ) -> Result<(), ChainError> {
        let usdt = IERC20::new(self.usdt, provider.clone());

        let balance = usdt
            .balanceOf(self.treasury_address)
            .call()
            .await
            .map_err(rpc_error)?
            ._0;
        if balance < amount {
            return Err(ChainError::InsufficientTreasuryBalance {
                required: amount.to_string(),
            });
        }

        let allowance = usdt
            .allowance(self.treasury_address, self.package_manager)
            .call()
            .await
            .map_err(rpc_error)?
            ._0;
        if allowance >= amount {
            return Ok(());
        }

        info!(
            current = %allowance,
            required = %amount,
            "Topping up PackageManager allowance"
        );

        let pending = usdt
            .approve(self.package_manager, amount)
            .send()
            .await
            .map_err(rpc_error)?;
        let receipt = tokio::time::timeout(self.confirmation_timeout, pending.get_receipt())
            .await
            .map_err(|_| ChainError::ConfirmationTimeout {
                timeout_secs: self.confirmation_timeout.as_secs(),
            })?
            .map_err(rpc_error)?;

        if !receipt.status() {
            return Err(ChainError::Reverted {
                reason: "approve transaction reverted".to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl PackagePurchaser for BscClient {
    async fn execute_purchase(
        &self,
        request: PurchaseRequest,
    ) -> Result<PurchaseReceipt, ChainError> {
        let buyer = parse_address(&request.buyer_address, "buyer")?;
        let referrer = match request.referrer_address.as_deref() {
            Some(raw) => parse_address(raw, "referrer")?,
            None => Address::ZERO,
        };
        let amount = usd_to_token_units(request.amount_usd);

        let provider = self.provider();
        self.ensure_allowance(&provider, amount).await?;

        let manager = IPackageManager::new(self.package_manager, provider.clone());
        let pending = manager
            .purchaseFor(buyer, U256::from(request.package_id), referrer)
            .send()
            .await
            .map_err(rpc_error)?;

        let tx_hash = format!("{:#x}", *pending.tx_hash());
        info!(
            tx_hash = %tx_hash,
            buyer = %buyer,
            package_id = request.package_id,
            "purchaseFor submitted, awaiting confirmation"
        );

        let receipt = tokio::time::timeout(self.confirmation_timeout, pending.get_receipt())
            .await
            .map_err(|_| ChainError::ConfirmationTimeout {
                timeout_secs: self.confirmation_timeout.as_secs(),
            })?
            .map_err(rpc_error)?;

        if !receipt.status() {
            warn!(tx_hash = %tx_hash, "purchaseFor reverted on chain");
            return Err(ChainError::Reverted {
                reason: format!("purchaseFor reverted in tx {}", tx_hash),
            });
        }

        Ok(PurchaseReceipt {
            tx_hash,
            block_number: receipt.block_number,
        })
    }

    async fn health_check(&self) -> Result<u64, ChainError> {
        self.provider()
            .get_block_number()
            .await
            .map_err(rpc_error)
    }
}
