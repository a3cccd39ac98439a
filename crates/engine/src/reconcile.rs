use std::sync::Arc;

use core_types::{OrderStatus, Trade};
use database::{BotRepository, ConnectionRepository, OrderRepository, TradeRepository};
use jobs::{HandlerRegistry, JobError, parse_args};
use keystore::Cipher;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

use crate::manager::BotManager;

/// Everything the out-of-band handlers need.
#[derive(Clone)]
pub struct ReconcileDeps {
    pub orders: OrderRepository,
    pub trades: TradeRepository,
    pub bots: BotRepository,
    pub connections: ConnectionRepository,
    pub cipher: Cipher,
    pub manager: Arc<BotManager>,
}

/// Registers the platform's job handlers. Handler names are the job names
/// used by the scheduler registrations at startup.
pub fn register_handlers(registry: &mut HandlerRegistry, deps: ReconcileDeps) {
    let d = deps.clone();
    registry.register_fn("reconcile_orders", move |_args| {
        let d = d.clone();
        async move { reconcile_orders(&d).await }
    });

    let d = deps.clone();
    registry.register_fn("reconcile_bot_status", move |_args| {
        let d = d.clone();
        async move { reconcile_bot_status(&d).await }
    });

    let d = deps.clone();
    registry.register_fn("refresh_bot_stats", move |args| {
        let d = d.clone();
        async move { refresh_bot_stats(&d, args).await }
    });
}

/// Polls the exchange for every locally-active order and reapplies the
/// canonical status. Drift repair may promote `NEW` to `FILLED`
/// retroactively, which triggers the trade path idempotently.
async fn reconcile_orders(deps: &ReconcileDeps) -> Result<JsonValue, JobError> {
    let active = deps.orders.list_active().await.map_err(JobError::failed)?;
    let mut checked = 0usize;
    let mut repaired = 0usize;

    for mut order in active {
        let Some(exchange_order_id) = order.exchange_order_id.clone() else {
            // Never acknowledged; submission will retry or reject it.
            continue;
        };

        let connection = match deps.connections.get(order.connection_id).await {
            Ok(Some(connection)) => connection,
            Ok(None) => continue,
            Err(e) => return Err(JobError::failed(e)),
        };
        let credentials = deps
            .cipher
            .reveal(&connection.secrets, connection.is_testnet)
            .map_err(JobError::failed)?;
        let gateway = gateway::connect(
            connection.exchange_kind,
            &credentials.api_key,
            &credentials.api_secret,
            connection.is_testnet,
        )
        .map_err(JobError::failed)?;

        checked += 1;
        let report = match gateway.get_order(&order.symbol, &exchange_order_id).await {
            Ok(report) => report,
            Err(e) if e.is_transient() => return Err(JobError::failed(e)),
            Err(e) => {
                tracing::warn!(order_id = %order.id, error = %e, "Order lookup failed during reconciliation");
                continue;
            }
        };

        if report.status == order.status {
            continue;
        }
        repaired += 1;
        tracing::info!(
            order_id = %order.id,
            local = order.status.as_str(),
            exchange = report.status.as_str(),
            "Repairing order drift"
        );

        match report.status {
            OrderStatus::Filled | OrderStatus::PartiallyFilled => {
                let had_no_fills = order.execution.executed_quantity.is_zero();
                let delta = report.executed_quantity - order.execution.executed_quantity;
                if delta > Decimal::ZERO {
                    if let Some(price) = report.average_price {
                        order
                            .fill(delta, price, Decimal::ZERO, "USDT")
                            .map_err(JobError::failed)?;
                        deps.orders.update(&order).await.map_err(JobError::failed)?;

                        // Only synthesize a trade when nothing was recorded
                        // for this order yet; the stable id makes replays
                        // converge.
                        if had_no_fills {
                            let trade = Trade {
                                id: Uuid::new_v4(),
                                order_id: order.id,
                                bot_id: order.bot_id,
                                user_id: order.user_id,
                                symbol: order.symbol.clone(),
                                side: order.side,
                                price,
                                quantity: delta,
                                commission: Decimal::ZERO,
                                commission_asset: "USDT".to_string(),
                                realized_pnl: Decimal::ZERO,
                                exchange_trade_id: format!("recon:{}", exchange_order_id),
                                executed_at: report.updated_at.unwrap_or(order.updated_at),
                            };
                            let _ = deps.trades.record(&trade).await.map_err(JobError::failed)?;
                        }
                    }
                }
            }
            OrderStatus::Cancelled => {
                order
                    .cancel(Some("Cancelled on exchange"))
                    .map_err(JobError::failed)?;
                deps.orders.update(&order).await.map_err(JobError::failed)?;
            }
            OrderStatus::Rejected => {
                order
                    .reject("Rejected by exchange")
                    .map_err(JobError::failed)?;
                deps.orders.update(&order).await.map_err(JobError::failed)?;
            }
            OrderStatus::Expired => {
                order.expire().map_err(JobError::failed)?;
                deps.orders.update(&order).await.map_err(JobError::failed)?;
            }
            _ => {}
        }
    }

    Ok(json!({ "checked": checked, "repaired": repaired }))
}

/// Lowers `RUNNING` rows with no live engine back to `PAUSED`. This is how
/// bots orphaned by a crash become restartable again.
async fn reconcile_bot_status(deps: &ReconcileDeps) -> Result<JsonValue, JobError> {
    let running_rows = deps.bots.list_running_ids().await.map_err(JobError::failed)?;
    let live = deps.manager.running_ids().await;
    let mut lowered = 0usize;

    for bot_id in running_rows {
        if !live.contains(&bot_id) {
            tracing::warn!(bot_id = %bot_id, "RUNNING row without an engine, lowering to PAUSED");
            deps.bots.mark_paused(bot_id).await.map_err(JobError::failed)?;
            lowered += 1;
        }
    }

    Ok(json!({ "lowered": lowered }))
}

#[derive(Debug, Deserialize)]
struct RefreshStatsArgs {
    bot_id: Option<Uuid>,
}

/// Recomputes a bot's (or every bot's) cumulative stats from trade history.
async fn refresh_bot_stats(deps: &ReconcileDeps, args: JsonValue) -> Result<JsonValue, JobError> {
    let args: RefreshStatsArgs = parse_args(&args)?;
    let bot_ids = match args.bot_id {
        Some(id) => vec![id],
        None => deps.bots.list_all_ids().await.map_err(JobError::failed)?,
    };

    let mut refreshed = 0usize;
    for bot_id in bot_ids {
        deps.trades
            .recompute_stats(bot_id)
            .await
            .map_err(JobError::failed)?;
        refreshed += 1;
    }
    Ok(json!({ "refreshed": refreshed }))
}
