//! Event CRUD tools.

use schemars::JsonSchema;
use serde::Deserialize;

use super::{event_result, events_result, now};
use crate::context::RequestContext;
use crate::error::Result;
use crate::protocol::CallToolResult;
use crate::store::{Event, parse_datetime};
use crate::tenancy::TenancyEnforcer;
use crate::tool::{Tool, ToolBuilder};

/// Completion bucket for [`ListEventsInput::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    /// status = 0
    NotStarted,
    /// 0 < status < 1
    InProgress,
    /// status = 1
    Completed,
}

impl StatusFilter {
    pub fn matches(self, status: f64) -> bool {
        match self {
            StatusFilter::NotStarted => status <= 0.0,
            StatusFilter::InProgress => status > 0.0 && status < 1.0,
            StatusFilter::Completed => status >= 1.0,
        }
    }
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListEventsInput {
    /// Only events in this category (case-insensitive)
    #[serde(default)]
    pub category: Option<String>,
    /// Only events with this completion state
    #[serde(default)]
    pub status: Option<StatusFilter>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EventIdInput {
    /// Event id
    pub sid: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateEventInput {
    pub name: String,
    #[serde(default)]
    pub content: String,
    /// e.g. Lecture, Lab, Meeting, Office Hours, Assignment, Seminar
    pub category: String,
    /// Priority 1 (low) to 3 (high), defaults to 2
    #[serde(default)]
    pub level: Option<u8>,
    /// YYYY-MM-DD HH:MM:SS
    pub start_time: String,
    /// YYYY-MM-DD HH:MM:SS, not before start_time
    pub end_time: String,
    /// Owner. Ignored unless the server runs without tenant isolation.
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateEventInput {
    pub sid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub level: Option<u8>,
    /// Completion between 0.0 and 1.0
    #[serde(default)]
    pub status: Option<f64>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ClaimUnownedInput {
    /// Tenant that takes ownership of every event without an owner
    pub owner: String,
}

const DEFAULT_LEVEL: u8 = 2;

/// `mcp-event-<unix millis>-<random>`; the suffix keeps ids created in the
/// same millisecond apart.
fn generate_sid() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "mcp-event-{}-{}",
        chrono::Utc::now().timestamp_millis(),
        &suffix[..8]
    )
}

pub(super) fn get_all_events(enforcer: TenancyEnforcer) -> Result<Tool> {
    ToolBuilder::new("get_all_events")
        .description("List calendar events, optionally filtered by category and completion status")
        .read_only()
        .handler_with_context(move |ctx: RequestContext, input: ListEventsInput| {
            let enforcer = enforcer.clone();
            async move {
                let scope = ctx.tenant_scope()?;
                let mut events = enforcer.with_scope(scope).list().await?;
                if let Some(category) = &input.category {
                    events.retain(|e| e.category.eq_ignore_ascii_case(category));
                }
                if let Some(status) = input.status {
                    events.retain(|e| status.matches(e.status));
                }
                events.sort_by(|a, b| a.start_time.cmp(&b.start_time));
                events_result(&events)
            }
        })
        .build()
}

pub(super) fn get_event(enforcer: TenancyEnforcer) -> Result<Tool> {
    ToolBuilder::new("get_event")
        .description("Get one calendar event by id")
        .read_only()
        .handler_with_context(move |ctx: RequestContext, input: EventIdInput| {
            let enforcer = enforcer.clone();
            async move {
                let scope = ctx.tenant_scope()?;
                let event = enforcer.with_scope(scope).get(&input.sid).await?;
                event_result(&event)
            }
        })
        .build()
}

pub(super) fn create_event(enforcer: TenancyEnforcer) -> Result<Tool> {
    ToolBuilder::new("create_event")
        .description("Create a calendar event owned by the calling user")
        .handler_with_context(move |ctx: RequestContext, input: CreateEventInput| {
            let enforcer = enforcer.clone();
            async move {
                let scope = ctx.tenant_scope()?;
                let event = Event {
                    sid: generate_sid(),
                    tenant_id: input.user_id,
                    name: input.name,
                    content: input.content,
                    category: input.category,
                    level: input.level.unwrap_or(DEFAULT_LEVEL),
                    status: 0.0,
                    creation_time: now(),
                    start_time: parse_datetime(&input.start_time)?,
                    end_time: parse_datetime(&input.end_time)?,
                };
                let created = enforcer.with_scope(scope).create(event).await?;
                event_result(&created)
            }
        })
        .build()
}

pub(super) fn update_event(enforcer: TenancyEnforcer) -> Result<Tool> {
    ToolBuilder::new("update_event")
        .description("Change fields of an existing calendar event")
        .idempotent()
        .handler_with_context(move |ctx: RequestContext, input: UpdateEventInput| {
            let enforcer = enforcer.clone();
            async move {
                let scope = ctx.tenant_scope()?;
                let calendar = enforcer.with_scope(scope);
                let mut event = calendar.get(&input.sid).await?;

                if let Some(name) = input.name {
                    event.name = name;
                }
                if let Some(content) = input.content {
                    event.content = content;
                }
                if let Some(category) = input.category {
                    event.category = category;
                }
                if let Some(level) = input.level {
                    event.level = level;
                }
                if let Some(status) = input.status {
                    event.status = status;
                }
                if let Some(start) = &input.start_time {
                    event.start_time = parse_datetime(start)?;
                }
                if let Some(end) = &input.end_time {
                    event.end_time = parse_datetime(end)?;
                }

                let updated = calendar.update(event).await?;
                event_result(&updated)
            }
        })
        .build()
}

pub(super) fn delete_event(enforcer: TenancyEnforcer) -> Result<Tool> {
    ToolBuilder::new("delete_event")
        .description("Delete a calendar event")
        .destructive()
        .handler_with_context(move |ctx: RequestContext, input: EventIdInput| {
            let enforcer = enforcer.clone();
            async move {
                let scope = ctx.tenant_scope()?;
                let removed = enforcer.with_scope(scope).delete(&input.sid).await?;
                Ok(CallToolResult::json(serde_json::json!({
                    "deleted": removed.sid,
                })))
            }
        })
        .build()
}

pub(super) fn claim_unowned_events(enforcer: TenancyEnforcer) -> Result<Tool> {
    ToolBuilder::new("claim_unowned_events")
        .description(
            "Assign every event without an owner to a user. Only available when the server \
             runs without tenant isolation.",
        )
        .destructive()
        .handler_with_context(move |ctx: RequestContext, input: ClaimUnownedInput| {
            let enforcer = enforcer.clone();
            async move {
                let scope = ctx.tenant_scope()?;
                let claimed = enforcer
                    .with_scope(scope)
                    .claim_unowned(&input.owner)
                    .await?;
                Ok(CallToolResult::json(serde_json::json!({
                    "owner": input.owner.trim(),
                    "claimed": claimed,
                })))
            }
        })
        .build()
}
