//! Webhook endpoint: one URL per project connector

use axum::{
    body::Bytes,
    extract::{Path, State as AxumState},
    http::{HeaderMap, StatusCode},
};
use tracing::{debug, info, warn};

use crate::SharedState;
use crate::dispatch::{DispatchRequest, dispatch};
use crate::vcs::ProviderConfig;
use crate::webhook::{ChangeScope, Verdict, authenticate_and_normalize, fetch_changes};

/// POST /hook/{workspace}/{project}/{connector}
///
/// Always answers 200. The body says what happened, for the provider's delivery log.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    Path((workspace_id, project_id, connector_id)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let reply = process(&state, &workspace_id, &project_id, &connector_id, &headers, &body).await;
    debug!(project = %project_id, connector = %connector_id, "Webhook reply: {}", reply);
    (StatusCode::OK, reply)
}

async fn process(
    state: &SharedState,
    workspace_id: &str,
    project_id: &str,
    connector_id: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> String {
    let config = &state.config;
    if workspace_id != config.workspace.id {
        return format!("workspace {} not found", workspace_id);
    }
    let Some(project) = config.find_project(project_id) else {
        return format!("project {} not found", project_id);
    };
    let Some(connector) = project.find_connector(connector_id) else {
        return format!("connector {} not found in project {}", connector_id, project_id);
    };
    let Some(settings) = config.find_vcs_provider(&connector.vcs_provider) else {
        return format!("vcs provider {} not found", connector.vcs_provider);
    };

    let event = match authenticate_and_normalize(settings.vcs_type, headers, body, connector) {
        Ok(Verdict::Accept(event)) => event,
        Ok(Verdict::Skip(reason)) => {
            debug!(project = %project_id, connector = %connector_id, "{}", reason);
            return reason;
        }
        Err(e) => {
            warn!(project = %project_id, connector = %connector_id, "Rejected webhook: {}", e);
            return e.to_string();
        }
    };

    let stored = match state.services.tokens.load_token(&settings.id).await {
        Ok(token) => token,
        Err(e) => {
            warn!(provider = %settings.id, "Failed to load stored token, using configured one: {}", e);
            None
        }
    };
    let redirect_uri = (!config.server.external_url.is_empty()).then(|| {
        format!("{}/oauth/callback", config.server.external_url.trim_end_matches('/'))
    });
    let provider_config = ProviderConfig::from_settings(
        state.http.clone(),
        settings,
        stored,
        redirect_uri,
        Some(state.services.tokens.clone()),
    );
    let Some(provider) = state.registry.get(settings.vcs_type, provider_config) else {
        return format!("vcs type {} is not supported", settings.vcs_type);
    };

    let mut event = event;
    match fetch_changes(provider.as_ref(), connector, &event, ChangeScope::BaseDirectory).await {
        Ok(changes) if changes.is_empty() => {
            return format!(
                "nothing relevant in {}: no migration files under {}",
                event.info.url,
                if connector.base_directory.is_empty() { "/" } else { connector.base_directory.as_str() }
            );
        }
        Ok(changes) => event.info.changes = changes,
        Err(e) => {
            warn!(pr = %event.info.url, "Failed to list pull request changes: {}", e);
            return format!("failed to list pull request changes: {}", e);
        }
    }

    info!(
        project = %project_id,
        connector = %connector_id,
        pr = %event.info.url,
        action = ?event.action,
        files = event.info.changes.len(),
        "Dispatching webhook"
    );
    dispatch(
        DispatchRequest {
            provider,
            services: state.services.clone(),
            project_id: project.id.clone(),
            connector: connector.clone(),
            external_url: config.server.external_url.clone(),
            event,
        },
        &state.jobs,
    )
    .await
}
