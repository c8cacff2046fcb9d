//! Axum handlers for the webhook admin surface.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;
use validator::Validate;

use relay_db::models::WebhookDelivery;

use crate::error::{WebhookError, WebhookResult};
use crate::models::{
    event_type_catalog, AcknowledgeQuery, EventTypeInfo, ListDeliveriesQuery,
    ListSubscriptionsQuery, RegisterWebhookRequest, RegisterWebhookResponse,
    UpdateWebhookRequest, WebhookDeliveryResponse, WebhookSubscriptionResponse,
};
use crate::router::WebhooksState;
use crate::subscription::{RegisterSubscription, UpdateSubscription};

pub async fn register_webhook(
    State(state): State<WebhooksState>,
    Json(request): Json<RegisterWebhookRequest>,
) -> WebhookResult<(StatusCode, Json<RegisterWebhookResponse>)> {
    request
        .validate()
        .map_err(|e| WebhookError::Validation(e.to_string()))?;

    let (subscription, token) = state
        .subscriptions
        .register(RegisterSubscription {
            origin_system: request.origin_system,
            callback_url: request.callback_url,
            events: request.events,
            security_token: request.security_token,
            max_retries: request.max_retries,
            description: request.description,
            contact_email: request.contact_email,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterWebhookResponse {
            subscription: subscription.into(),
            security_token: token,
        }),
    ))
}

pub async fn list_webhooks(
    State(state): State<WebhooksState>,
    Query(query): Query<ListSubscriptionsQuery>,
) -> WebhookResult<Json<Vec<WebhookSubscriptionResponse>>> {
    let limit = query.limit.clamp(1, 100);
    let subscriptions = state
        .subscriptions
        .list(query.origin_system.as_deref(), limit, query.offset.max(0))
        .await?;
    Ok(Json(subscriptions.into_iter().map(Into::into).collect()))
}

pub async fn get_webhook(
    State(state): State<WebhooksState>,
    Path(id): Path<Uuid>,
) -> WebhookResult<Json<WebhookSubscriptionResponse>> {
    Ok(Json(state.subscriptions.get(id).await?.into()))
}

pub async fn update_webhook(
    State(state): State<WebhooksState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateWebhookRequest>,
) -> WebhookResult<Json<WebhookSubscriptionResponse>> {
    request
        .validate()
        .map_err(|e| WebhookError::Validation(e.to_string()))?;

    let updated = state
        .subscriptions
        .update(
            id,
            UpdateSubscription {
                callback_url: request.callback_url,
                events: request.events,
                security_token: request.security_token,
                is_active: request.is_active,
                max_retries: request.max_retries,
                description: request.description,
                contact_email: request.contact_email,
            },
        )
        .await?;

    Ok(Json(updated.into()))
}

pub async fn delete_webhook(
    State(state): State<WebhooksState>,
    Path(id): Path<Uuid>,
) -> WebhookResult<StatusCode> {
    state.subscriptions.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn send_test_event(
    State(state): State<WebhooksState>,
    Path(id): Path<Uuid>,
) -> WebhookResult<Json<WebhookDeliveryResponse>> {
    Ok(Json(state.delivery.send_test_event(id).await?.into()))
}

pub async fn list_deliveries(
    State(state): State<WebhooksState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListDeliveriesQuery>,
) -> WebhookResult<Json<Vec<WebhookDeliveryResponse>>> {
    // 404 for unknown subscriptions rather than an empty list.
    let _ = state.subscriptions.get(id).await?;

    let limit = query.limit.clamp(1, 100);
    let deliveries =
        WebhookDelivery::list_by_webhook(state.delivery.pool(), id, limit, query.offset.max(0))
            .await?;
    Ok(Json(deliveries.into_iter().map(Into::into).collect()))
}

pub async fn get_delivery(
    State(state): State<WebhooksState>,
    Path(delivery_id): Path<Uuid>,
) -> WebhookResult<Json<WebhookDeliveryResponse>> {
    let delivery = WebhookDelivery::find_by_id(state.delivery.pool(), delivery_id)
        .await?
        .ok_or(WebhookError::DeliveryNotFound(delivery_id))?;
    Ok(Json(delivery.into()))
}

pub async fn retry_delivery(
    State(state): State<WebhooksState>,
    Path(delivery_id): Path<Uuid>,
) -> WebhookResult<Json<WebhookDeliveryResponse>> {
    Ok(Json(state.delivery.retry_now(delivery_id).await?.into()))
}

pub async fn acknowledge_delivery(
    State(state): State<WebhooksState>,
    Query(query): Query<AcknowledgeQuery>,
) -> WebhookResult<Json<WebhookDeliveryResponse>> {
    let delivery = state
        .delivery
        .acknowledge(query.event_id, &query.status)
        .await?;
    Ok(Json(delivery.into()))
}

pub async fn list_event_types() -> Json<Vec<EventTypeInfo>> {
    Json(event_type_catalog())
}

pub async fn delivery_statistics(
    State(state): State<WebhooksState>,
) -> WebhookResult<Json<serde_json::Value>> {
    Ok(Json(state.delivery.statistics().await?))
}
