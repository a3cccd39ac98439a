use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use core_types::{
    MarginMode, Order, OrderSide, OrderStatus, OrderType, PositionSide, TimeInForce, WorkingType,
    order::NewOrder,
};
use database::OrderFilter;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub connection_id: Uuid,
    #[serde(default)]
    pub bot_id: Option<Uuid>,
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub quantity: Decimal,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub time_in_force: Option<TimeInForce>,
    #[serde(default)]
    pub position_side: Option<PositionSide>,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub working_type: Option<WorkingType>,
    #[serde(default)]
    pub leverage: Option<u32>,
    #[serde(default)]
    pub margin_mode: Option<MarginMode>,
}

impl CreateOrderRequest {
    fn into_order(self, user_id: Uuid) -> Result<Order, ApiError> {
        let params = NewOrder {
            user_id,
            connection_id: self.connection_id,
            bot_id: self.bot_id,
            symbol: self.symbol.to_uppercase(),
            side: self.side,
            quantity: self.quantity,
            position_side: self.position_side.unwrap_or(PositionSide::Both),
            reduce_only: self.reduce_only,
            leverage: self.leverage.unwrap_or(1),
            margin_mode: self.margin_mode.unwrap_or(MarginMode::Isolated),
        };

        let order = match self.order_type {
            OrderType::Market => Order::market(params)?,
            OrderType::Limit => {
                let price = self
                    .price
                    .ok_or_else(|| ApiError::validation("A limit order requires a price"))?;
                Order::limit(params, price, self.time_in_force.unwrap_or(TimeInForce::Gtc))?
            }
            OrderType::StopMarket | OrderType::TakeProfit => {
                let stop_price = self.stop_price.ok_or_else(|| {
                    ApiError::validation("A stop order requires a stop price")
                })?;
                let mut order = Order::stop_market(
                    params,
                    stop_price,
                    self.working_type.unwrap_or(WorkingType::ContractPrice),
                )?;
                order.order_type = self.order_type;
                order
            }
            OrderType::StopLimit => {
                let price = self
                    .price
                    .ok_or_else(|| ApiError::validation("A stop-limit order requires a price"))?;
                let stop_price = self.stop_price.ok_or_else(|| {
                    ApiError::validation("A stop-limit order requires a stop price")
                })?;
                let mut order =
                    Order::limit(params, price, self.time_in_force.unwrap_or(TimeInForce::Gtc))?;
                order.order_type = OrderType::StopLimit;
                order.stop_price = Some(stop_price);
                order.working_type = self.working_type.unwrap_or(WorkingType::ContractPrice);
                order
            }
            OrderType::TrailingStop => {
                return Err(ApiError::validation(
                    "Trailing stops are placed by strategies, not through this endpoint",
                ));
            }
        };
        Ok(order)
    }
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Json<Order>, ApiError> {
    let order = request.into_order(user.user_id)?;
    let order = state.order_service.create(order).await?;
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub bot_id: Option<Uuid>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    50
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let orders = state
        .orders
        .list_by_user(user.user_id, &OrderFilter {
            status: query.status,
            symbol: query.symbol.map(|s| s.to_uppercase()),
            bot_id: query.bot_id,
            page: query.page,
            page_size: query.page_size,
        })
        .await?;
    Ok(Json(orders))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, ApiError> {
    let order = state
        .orders
        .find_by_id(id)
        .await?
        .filter(|o| o.user_id == user.user_id)
        .ok_or_else(|| ApiError::not_found("Order"))?;
    Ok(Json(order))
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, ApiError> {
    let order = state.order_service.cancel(user.user_id, id).await?;
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
pub struct ModifyOrderRequest {
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
}

/// Modify is cancel-and-replace; the response is the replacement order.
pub async fn modify(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<ModifyOrderRequest>,
) -> Result<Json<Order>, ApiError> {
    let order = state
        .order_service
        .modify(
            user.user_id,
            id,
            request.quantity,
            request.price,
            request.stop_price,
        )
        .await?;
    Ok(Json(order))
}
