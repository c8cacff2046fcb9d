//! Router assembly for the webhook admin surface.

use axum::routing::{get, post};
use axum::Router;

use crate::delivery::DeliveryService;
use crate::handlers;
use crate::subscription::SubscriptionService;

/// Shared state for the webhook routes.
#[derive(Clone)]
pub struct WebhooksState {
    pub subscriptions: SubscriptionService,
    pub delivery: DeliveryService,
}

/// Build the `/api/webhooks` router.
pub fn webhooks_router(state: WebhooksState) -> Router {
    Router::new()
        .route(
            "/api/webhooks",
            post(handlers::register_webhook).get(handlers::list_webhooks),
        )
        .route("/api/webhooks/event-types", get(handlers::list_event_types))
        .route("/api/webhooks/statistics", get(handlers::delivery_statistics))
        .route("/api/webhooks/acknowledge", post(handlers::acknowledge_delivery))
        .route(
            "/api/webhooks/deliveries/:delivery_id",
            get(handlers::get_delivery),
        )
        .route(
            "/api/webhooks/deliveries/:delivery_id/retry",
            post(handlers::retry_delivery),
        )
        .route(
            "/api/webhooks/:id",
            get(handlers::get_webhook)
                .put(handlers::update_webhook)
                .delete(handlers::delete_webhook),
        )
        .route("/api/webhooks/:id/test", post(handlers::send_test_event))
        .route("/api/webhooks/:id/deliveries", get(handlers::list_deliveries))
        .with_state(state)
}
