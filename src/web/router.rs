use axum::{
    Router,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};

use crate::web::{
    AppState, acknowledgements, ai_scales, auth, community, dashboard, subjects, templates, users,
};

const INDEX_BODY: &str = "Hello. You're at the ai scale app index.";

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/username/", get(users::user_details))
        .route("/auth/login/", post(auth::login))
        .route("/auth/register/", post(auth::register))
        .route("/logout/", get(auth::logout).post(auth::logout))
        .route("/session/", get(auth::session))
        .route("/token/", get(auth::csrf_token))
        .route("/info/taught_subjects/", get(subjects::taught_subjects))
        .route("/subject/enrol/", post(subjects::enrol))
        .route("/template/update/", post(templates::create_or_update_template))
        .route("/templateitem/update/", post(templates::update_template_item))
        .route("/template/summary/", get(templates::summary_templates))
        .route("/template/details/", get(templates::template_details))
        .route("/template/delete/", post(templates::delete_template))
        .route("/template/duplicate/", post(templates::duplicate_template))
        .route("/template/share/", post(templates::share_template))
        .route(
            "/acknowledgement/update/",
            post(acknowledgements::update_acknowledgement),
        )
        .route(
            "/acknowledgement/details/",
            get(acknowledgements::acknowledgement_details),
        )
        .route("/templates/community/", get(community::community_templates))
        .route("/scales/", get(ai_scales::list_scales))
        .route("/scales/create/", post(ai_scales::create_scale))
        .route("/scales/update/", post(ai_scales::update_scale))
        .route("/scales/history/", get(ai_scales::scale_history))
        .route("/system-overview/", get(dashboard::system_overview))
        .route("/recent-activity/", get(dashboard::recent_activity))
        .with_state(state)
}

async fn index() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        INDEX_BODY,
    )
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}
