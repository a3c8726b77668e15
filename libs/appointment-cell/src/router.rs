// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, AppointmentState};
use crate::services::booking::BookingService;

pub fn create_appointment_router(config: Arc<AppConfig>, booking: Arc<BookingService>) -> Router {
    let state = AppointmentState { booking };

    // Every appointment operation requires authentication
    Router::new()
        .route("/", post(handlers::create_appointment).get(handlers::list_appointments))
        .route("/async", post(handlers::create_appointment_async))
        .route("/all", get(handlers::list_all_appointments))
        .route("/slots", get(handlers::get_available_slots))
        .route(
            "/{appointment_id}",
            get(handlers::get_appointment)
                .put(handlers::update_appointment)
                .delete(handlers::delete_appointment),
        )
        .route("/{appointment_id}/status", put(handlers::update_appointment_status))
        .route("/{appointment_id}/cancel", put(handlers::cancel_appointment))
        .route("/{appointment_id}/reschedule", put(handlers::reschedule_appointment))
        .layer(middleware::from_fn_with_state(config, auth_middleware))
        .with_state(state)
}
