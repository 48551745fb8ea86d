//! The calendar tool surface.
//!
//! Both transports serve exactly these tools. Every handler pulls the
//! request's [`TenantScope`](crate::identity::TenantScope) out of its
//! [`RequestContext`](crate::RequestContext) and goes through the
//! [`TenancyEnforcer`]; no handler talks to a store directly.
//!
//! ```rust
//! use std::sync::Arc;
//! use calendar_mcp::oauth::ProtectedResourceMetadata;
//! use calendar_mcp::store::MemoryStore;
//! use calendar_mcp::tenancy::TenancyEnforcer;
//! use calendar_mcp::tools::calendar_router;
//!
//! let enforcer = TenancyEnforcer::new(Arc::new(MemoryStore::new()));
//! let metadata = ProtectedResourceMetadata::new("http://localhost:3000");
//! let router = calendar_router(enforcer, &metadata).unwrap();
//! ```

use chrono::NaiveDateTime;

use crate::error::Result;
use crate::oauth::ProtectedResourceMetadata;
use crate::protocol::CallToolResult;
use crate::resource::{Resource, ResourceBuilder};
use crate::router::McpRouter;
use crate::store::Event;
use crate::tenancy::TenancyEnforcer;
use crate::tool::Tool;

mod events;
mod queries;

pub use events::{
    ClaimUnownedInput, CreateEventInput, EventIdInput, ListEventsInput, StatusFilter,
    UpdateEventInput,
};
pub use queries::{EventsByDateInput, SearchEventsInput, UpcomingEventsInput};

/// URI of the resource exposing the protected resource metadata document.
pub const METADATA_RESOURCE_URI: &str = "oauth-protected-resource://metadata";

const INSTRUCTIONS: &str = "Calendar event management. All operations are limited to the \
calendar of the authenticated user. Timestamps use the format YYYY-MM-DD HH:MM:SS.";

/// Every calendar tool, bound to `enforcer`.
pub fn calendar_tools(enforcer: TenancyEnforcer) -> Result<Vec<Tool>> {
    Ok(vec![
        events::get_all_events(enforcer.clone())?,
        events::get_event(enforcer.clone())?,
        events::create_event(enforcer.clone())?,
        events::update_event(enforcer.clone())?,
        events::delete_event(enforcer.clone())?,
        events::claim_unowned_events(enforcer.clone())?,
        queries::search_events(enforcer.clone())?,
        queries::get_upcoming_events(enforcer.clone())?,
        queries::get_events_by_date(enforcer.clone())?,
        queries::get_calendar_statistics(enforcer)?,
    ])
}

/// The metadata document as a readable JSON resource.
pub fn metadata_resource(metadata: &ProtectedResourceMetadata) -> Resource {
    let document = serde_json::to_value(metadata).unwrap_or_else(|_| serde_json::json!({}));
    ResourceBuilder::new(METADATA_RESOURCE_URI)
        .name("OAuth Protected Resource Metadata")
        .description("Authorization servers and scopes this calendar server accepts")
        .json(document)
}

/// A router serving the full calendar surface.
pub fn calendar_router(
    enforcer: TenancyEnforcer,
    metadata: &ProtectedResourceMetadata,
) -> Result<McpRouter> {
    Ok(McpRouter::new()
        .server_info(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        .instructions(INSTRUCTIONS)
        .tools(calendar_tools(enforcer)?)
        .resource(metadata_resource(metadata)))
}

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

fn events_result(events: &[Event]) -> Result<CallToolResult> {
    Ok(CallToolResult::json(serde_json::json!({
        "count": events.len(),
        "events": events,
    })))
}

fn event_result(event: &Event) -> Result<CallToolResult> {
    Ok(CallToolResult::json(serde_json::to_value(event)?))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::context::RequestContext;
    use crate::identity::{TenantIdentity, TenantScope};
    use crate::protocol::{CallToolResult, RequestId};
    use crate::store::{Event, MemoryStore};
    use crate::tenancy::TenancyEnforcer;
    use crate::tool::Tool;

    pub fn tenant(subject: &str) -> TenantScope {
        TenantScope::from(TenantIdentity::from_header(subject).unwrap())
    }

    pub fn ctx(scope: TenantScope) -> RequestContext {
        let mut ctx = RequestContext::new(RequestId::Number(1));
        ctx.extensions_mut().insert(scope);
        ctx
    }

    pub fn tools_over(events: Vec<Event>) -> (Vec<Tool>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_events(events));
        let tools = super::calendar_tools(TenancyEnforcer::new(store.clone())).unwrap();
        (tools, store)
    }

    pub async fn call(
        tools: &[Tool],
        name: &str,
        scope: TenantScope,
        args: serde_json::Value,
    ) -> CallToolResult {
        let tool = tools.iter().find(|t| t.name == name).unwrap();
        tool.call_with_context(ctx(scope), args).await
    }

    pub fn sids(result: &CallToolResult) -> Vec<String> {
        let value = result.structured_content.as_ref().unwrap();
        value["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["sid"].as_str().unwrap().to_string())
            .collect()
    }
}
