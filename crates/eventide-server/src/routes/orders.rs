//! Routes for the Orders context.
//!
//! Commands go through the event-sourced repository; reads come from the
//! order summary read model and lag behind writes until reconciled.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use eventide_orders::application::command_handlers::{self, OrderCommandResult};
use eventide_orders::application::projections::OrderSummary;
use eventide_orders::application::query_handlers;
use eventide_orders::domain::commands;

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /.
#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    /// Order identifier; a time-ordered UUID is generated when absent.
    pub order_id: Option<String>,
    /// Customer placing the order.
    pub customer_id: String,
    /// Items to add with the order.
    #[serde(default)]
    pub items: Vec<String>,
}

/// Request body for POST /{order_id}/items.
#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    /// The item to add.
    pub item: String,
}

/// Response body returned after a command is successfully handled.
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    /// The order affected.
    pub order_id: String,
    /// Version after the command.
    pub version: Option<i64>,
    /// Correlation ID stamped on the produced events.
    pub correlation_id: Uuid,
}

impl CommandResponse {
    fn new(result: OrderCommandResult, correlation_id: Uuid) -> Self {
        Self {
            order_id: result.order_id,
            version: result.version,
            correlation_id,
        }
    }
}

/// POST /
#[instrument(skip(state, request), fields(customer_id = %request.customer_id))]
async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CommandResponse>), ApiError> {
    let command = commands::CreateOrder {
        correlation_id: Uuid::new_v4(),
        order_id: request
            .order_id
            .unwrap_or_else(|| Uuid::now_v7().to_string()),
        customer_id: request.customer_id,
        items: request.items,
    };

    info!(correlation_id = %command.correlation_id, order_id = %command.order_id, "handling create_order command");

    let result = command_handlers::handle_create_order(&command, &state.orders).await?;

    Ok((
        StatusCode::CREATED,
        Json(CommandResponse::new(result, command.correlation_id)),
    ))
}

/// POST /{order_id}/items
#[instrument(skip(state, request))]
async fn add_item(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Json(request): Json<AddItemRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let command = commands::AddItem {
        correlation_id: Uuid::new_v4(),
        order_id,
        item: request.item,
    };

    info!(correlation_id = %command.correlation_id, "handling add_item command");

    let result = command_handlers::handle_add_item(&command, &state.orders).await?;

    Ok(Json(CommandResponse::new(result, command.correlation_id)))
}

/// DELETE /{order_id}/items/{item}
#[instrument(skip(state))]
async fn remove_item(
    State(state): State<AppState>,
    Path((order_id, item)): Path<(String, String)>,
) -> Result<Json<CommandResponse>, ApiError> {
    let command = commands::RemoveItem {
        correlation_id: Uuid::new_v4(),
        order_id,
        item,
    };

    info!(correlation_id = %command.correlation_id, "handling remove_item command");

    let result = command_handlers::handle_remove_item(&command, &state.orders).await?;

    Ok(Json(CommandResponse::new(result, command.correlation_id)))
}

/// DELETE /{order_id}
#[instrument(skip(state))]
async fn delete_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let command = commands::DeleteOrder {
        correlation_id: Uuid::new_v4(),
        order_id,
    };

    info!(correlation_id = %command.correlation_id, "handling delete_order command");

    command_handlers::handle_delete_order(&command, &state.orders).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /{order_id}
async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderSummary>, ApiError> {
    let summary = query_handlers::get_order_summary(&order_id, state.read_models.as_ref()).await?;
    Ok(Json(summary))
}

/// GET /
async fn list_orders(State(state): State<AppState>) -> Result<Json<Vec<OrderSummary>>, ApiError> {
    let summaries = query_handlers::list_order_summaries(state.read_models.as_ref()).await?;
    Ok(Json(summaries))
}

/// Returns the router for the orders context.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/{order_id}", get(get_order).delete(delete_order))
        .route("/{order_id}/items", post(add_item))
        .route("/{order_id}/items/{item}", delete(remove_item))
}
