use std::fmt::Write;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use crate::state::AppState;

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut out = String::with_capacity(1024);

    writeln!(out, "# TYPE rotv_cache_entries gauge").unwrap();
    writeln!(out, "# HELP rotv_cache_entries Number of live cache entries").unwrap();
    writeln!(out, "rotv_cache_entries {}", state.cache.len()).unwrap();

    let ids = state.registry.ids();
    writeln!(out, "# TYPE rotv_modules gauge").unwrap();
    writeln!(out, "# HELP rotv_modules Number of registered provider modules").unwrap();
    writeln!(out, "rotv_modules {}", ids.len()).unwrap();

    writeln!(out, "# TYPE rotv_module_authenticated gauge").unwrap();
    writeln!(
        out,
        "# HELP rotv_module_authenticated Whether a usable token is persisted per module"
    )
    .unwrap();
    for id in &ids {
        let authenticated = state.auth.load(id).has_token();
        writeln!(
            out,
            "rotv_module_authenticated{{module=\"{}\"}} {}",
            id,
            if authenticated { 1 } else { 0 }
        )
        .unwrap();
    }

    writeln!(out, "# EOF").unwrap();

    (
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        out,
    )
}
