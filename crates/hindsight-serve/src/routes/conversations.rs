//! Read-only conversation views over the document store.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use hindsight_core::{Conversation, ConversationKind};
use serde::{Deserialize, Serialize};

/// Messages per page in the conversation view.
const PAGE_SIZE: u64 = 50;

/// Default and maximum context-window half-widths.
const DEFAULT_CONTEXT_SIZE: u64 = 5;
const MAX_CONTEXT_SIZE: u64 = 25;

#[derive(Debug, Serialize)]
pub struct ConversationView {
    pub id: String,
    pub name: String,
    pub kind: ConversationKind,
    pub is_archived: bool,
    pub members: Vec<String>,
    pub message_count: u64,
}

/// `GET /conversations`
pub async fn list(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConversationView>>, ApiError> {
    let summaries = state.store.list_conversations().await?;
    Ok(Json(
        summaries
            .into_iter()
            .map(|s| ConversationView {
                id: s.conversation.id,
                name: s.conversation.name,
                kind: s.conversation.kind,
                is_archived: s.conversation.is_archived,
                members: s.conversation.members,
                message_count: s.message_count,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    /// Optional substring filter over message text.
    pub q: Option<String>,
    /// Zero-based page number.
    #[serde(default)]
    pub page: u64,
}

#[derive(Debug, Serialize)]
pub struct MessageView {
    pub id: String,
    pub username: Option<String>,
    pub text: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ConversationPage {
    pub conversation: Conversation,
    pub page: u64,
    pub page_size: u64,
    pub messages: Vec<MessageView>,
}

/// `GET /conversations/{id}?q=&page=`
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<PageQuery>,
) -> Result<Json<ConversationPage>, ApiError> {
    let conversation = state
        .store
        .get_conversation(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("conversation {id}")))?;

    let messages = state
        .store
        .conversation_page(&id, params.q.as_deref(), params.page, PAGE_SIZE)
        .await?;

    Ok(Json(ConversationPage {
        conversation,
        page: params.page,
        page_size: PAGE_SIZE,
        messages: messages.into_iter().map(message_view).collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ContextQuery {
    /// Pivot timestamp (RFC 3339), usually the `ts` of a search hit.
    pub ts: DateTime<Utc>,
    /// Messages to fetch on each side of the pivot.
    #[serde(default = "default_context_size")]
    pub size: u64,
}

fn default_context_size() -> u64 {
    DEFAULT_CONTEXT_SIZE
}

#[derive(Debug, Serialize)]
pub struct ContextResponse {
    pub conversation_id: String,
    pub ts: DateTime<Utc>,
    pub size: u64,
    pub messages: Vec<MessageView>,
}

/// `GET /conversations/{id}/context?ts=&size=`
///
/// The messages surrounding a pivot timestamp, merged and time-sorted,
/// for showing the discussion around a search hit.
pub async fn context(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ContextQuery>,
) -> Result<Json<ContextResponse>, ApiError> {
    if state.store.get_conversation(&id).await?.is_none() {
        return Err(ApiError::NotFound(format!("conversation {id}")));
    }

    let size = params.size.clamp(1, MAX_CONTEXT_SIZE);
    let messages = state.store.context_window(&id, params.ts, size).await?;

    Ok(Json(ContextResponse {
        conversation_id: id,
        ts: params.ts,
        size,
        messages: messages.into_iter().map(message_view).collect(),
    }))
}

fn message_view(m: hindsight_ingest::MessageHit) -> MessageView {
    MessageView {
        id: m.id,
        username: m.username,
        text: m.text,
        ts: m.ts,
    }
}
