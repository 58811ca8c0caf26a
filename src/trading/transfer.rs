//! Cross-exchange asset transfer bridge
//!
//! Moves the purchased asset from the buy venue to the sell venue: resolve
//! the deposit address, withdraw, then poll the sell venue's deposit
//! records until the credit shows up or the budget runs out. The wait is
//! bounded and observable; the caller decides what a timeout means for the
//! trade.

use crate::exchanges::{DepositRecord, DepositStatus, ExchangeAdapter, WithdrawRequest};
use crate::utils::metric_names;
use crate::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{info, warn};

/// Withdrawal network fees shrink the credited amount, so the fallback
/// match accepts deposits within this fraction of the sent amount.
const AMOUNT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2); // 0.01

/// Outcome of a bounded transfer wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// The deposit was credited on the sell venue
    Completed,
    /// The wait budget elapsed without a matching deposit
    TimedOut,
}

/// Withdraw `amount` of `asset` from the buy venue and wait for it to be
/// credited on the sell venue.
///
/// Errors from the address lookup or the withdrawal itself propagate to
/// the caller; failed deposit polls are logged and retried until the
/// budget elapses.
pub async fn transfer_asset(
    buy: &dyn ExchangeAdapter,
    sell: &dyn ExchangeAdapter,
    asset: &str,
    amount: Decimal,
    timeout_ms: u64,
    poll_interval_ms: u64,
) -> Result<TransferStatus> {
    let address = sell.deposit_address(asset).await?;
    info!(
        asset,
        from = %buy.id(),
        to = %sell.id(),
        address = %address.address,
        "Resolved deposit address"
    );

    let receipt = buy
        .withdraw(&WithdrawRequest {
            asset: asset.to_string(),
            amount,
            address: address.address.clone(),
            tag: address.tag.clone(),
            network: None,
        })
        .await?;
    info!(
        asset,
        amount = %amount,
        withdrawal_id = %receipt.withdrawal_id,
        tx_id = receipt.tx_id.as_deref().unwrap_or("-"),
        "Withdrawal submitted, waiting for deposit"
    );

    let wait_start = Utc::now();
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    let poll_interval = Duration::from_millis(poll_interval_ms.max(1));

    loop {
        match sell.deposits(asset).await {
            Ok(records) => {
                let matched = records.iter().find(|record| {
                    matches_deposit(record, receipt.tx_id.as_deref(), amount, wait_start)
                });
                if let Some(record) = matched {
                    info!(
                        asset,
                        amount = %record.amount,
                        tx_id = record.tx_id.as_deref().unwrap_or("-"),
                        "Deposit credited on sell venue"
                    );
                    return Ok(TransferStatus::Completed);
                }
            }
            Err(e) => warn!(asset, error = %e, "Deposit poll failed, will retry"),
        }

        if tokio::time::Instant::now() + poll_interval >= deadline {
            metrics::increment_counter!(metric_names::TRANSFER_TIMEOUTS_TOTAL);
            warn!(
                asset,
                amount = %amount,
                timeout_ms,
                "Transfer wait budget elapsed without a matching deposit"
            );
            return Ok(TransferStatus::TimedOut);
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Whether a deposit record is the one our withdrawal produced.
///
/// Completed records matching the withdrawal's transaction id are taken
/// outright. Without a usable id on either side, a record qualifies when
/// its amount is within tolerance of the sent amount and it was credited
/// after the wait began.
fn matches_deposit(
    record: &DepositRecord,
    withdrawal_tx_id: Option<&str>,
    amount: Decimal,
    wait_start: DateTime<Utc>,
) -> bool {
    if record.status != DepositStatus::Completed {
        return false;
    }
    if let (Some(expected), Some(actual)) = (withdrawal_tx_id, record.tx_id.as_deref()) {
        return expected == actual;
    }
    let close_enough = (record.amount - amount).abs() <= amount * AMOUNT_TOLERANCE;
    close_enough && record.timestamp >= wait_start
}
