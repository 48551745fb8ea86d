//! Tool definition and builder API
//!
//! Tools are Tower services internally. Every handler receives the
//! [`RequestContext`] so it can reach the caller's tenant scope:
//!
//! ```rust
//! use calendar_mcp::{CallToolResult, RequestContext, ToolBuilder};
//! use schemars::JsonSchema;
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize, JsonSchema)]
//! struct WhoAmIInput {}
//!
//! let tool = ToolBuilder::new("whoami")
//!     .description("Report the calling tenant")
//!     .read_only()
//!     .handler_with_context(|ctx: RequestContext, _input: WhoAmIInput| async move {
//!         let scope = ctx.tenant_scope()?;
//!         Ok(CallToolResult::text(scope.subject().unwrap_or("unscoped")))
//!     })
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(tool.name, "whoami");
//! ```

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tower::util::BoxCloneSyncService;
use tower_service::Service;

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::protocol::{CallToolResult, ToolAnnotations, ToolDefinition};

/// Request type for tool services.
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub ctx: RequestContext,
    /// Tool arguments as raw JSON
    pub args: Value,
}

impl ToolRequest {
    pub fn new(ctx: RequestContext, args: Value) -> Self {
        Self { ctx, args }
    }
}

/// A boxed, cloneable tool service with `Error = Infallible`.
pub type BoxToolService = BoxCloneSyncService<ToolRequest, CallToolResult, Infallible>;

/// Converts errors from the inner service into `CallToolResult::error()`.
///
/// Handler failures become tool-level results with `is_error: true` rather
/// than JSON-RPC errors.
pub struct ToolCatchError<S> {
    inner: S,
}

impl<S> ToolCatchError<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: Clone> Clone for ToolCatchError<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for ToolCatchError<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCatchError")
            .field("inner", &self.inner)
            .finish()
    }
}

impl<S> Service<ToolRequest> for ToolCatchError<S>
where
    S: Service<ToolRequest, Response = CallToolResult> + Clone + Send + 'static,
    S::Error: fmt::Display + Send,
    S::Future: Send,
{
    type Response = CallToolResult;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<CallToolResult, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        // Readiness errors resurface from `call`
        match self.inner.poll_ready(cx) {
            Poll::Ready(_) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }

    fn call(&mut self, req: ToolRequest) -> Self::Future {
        let fut = self.inner.call(req);

        Box::pin(async move {
            match fut.await {
                Ok(result) => Ok(result),
                Err(err) => Ok(CallToolResult::error(err.to_string())),
            }
        })
    }
}

/// Validates a tool name: 1-128 characters of `[A-Za-z0-9_.-]`.
pub fn validate_tool_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::tool("Tool name cannot be empty"));
    }
    if name.len() > 128 {
        return Err(Error::tool(format!(
            "Tool name '{}' exceeds maximum length of 128 characters (got {})",
            name,
            name.len()
        )));
    }
    if let Some(invalid_char) = name
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '_' && *c != '-' && *c != '.')
    {
        return Err(Error::tool(format!(
            "Tool name '{}' contains invalid character '{}'",
            name, invalid_char
        )));
    }
    Ok(())
}

/// A boxed future for tool handlers
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Tool handler trait - the core abstraction for tool execution
pub trait ToolHandler: Send + Sync {
    fn call_with_context(
        &self,
        ctx: RequestContext,
        args: Value,
    ) -> BoxFuture<'_, Result<CallToolResult>>;

    fn input_schema(&self) -> Value;
}

/// Adapts a `ToolHandler` to a Tower `Service<ToolRequest>`.
struct ToolHandlerService<H> {
    handler: Arc<H>,
}

impl<H> Clone for ToolHandlerService<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<H> Service<ToolRequest> for ToolHandlerService<H>
where
    H: ToolHandler + 'static,
{
    type Response = CallToolResult;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<CallToolResult, Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ToolRequest) -> Self::Future {
        let handler = self.handler.clone();
        Box::pin(async move { handler.call_with_context(req.ctx, req.args).await })
    }
}

/// A complete tool definition with service-based execution.
pub struct Tool {
    pub name: String,
    pub description: Option<String>,
    pub annotations: Option<ToolAnnotations>,
    service: BoxToolService,
    input_schema: Value,
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("annotations", &self.annotations)
            .finish_non_exhaustive()
    }
}

impl Tool {
    pub fn builder(name: impl Into<String>) -> ToolBuilder {
        ToolBuilder::new(name)
    }

    /// Definition for `tools/list`
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
            annotations: self.annotations.clone(),
        }
    }

    /// Call the tool.
    ///
    /// Errors from the handler come back as `CallToolResult::error()`.
    pub fn call_with_context(
        &self,
        ctx: RequestContext,
        args: Value,
    ) -> BoxFuture<'static, CallToolResult> {
        use tower::ServiceExt;
        let service = self.service.clone();
        Box::pin(async move {
            match service.oneshot(ToolRequest::new(ctx, args)).await {
                Ok(result) => result,
                Err(never) => match never {},
            }
        })
    }

    fn from_handler<H: ToolHandler + 'static>(
        name: String,
        description: Option<String>,
        annotations: Option<ToolAnnotations>,
        handler: H,
    ) -> Self {
        let input_schema = handler.input_schema();
        let handler_service = ToolHandlerService {
            handler: Arc::new(handler),
        };
        let service = BoxCloneSyncService::new(ToolCatchError::new(handler_service));

        Self {
            name,
            description,
            annotations,
            service,
            input_schema,
        }
    }
}

/// Builder for creating tools with a fluent API
pub struct ToolBuilder {
    name: String,
    description: Option<String>,
    annotations: Option<ToolAnnotations>,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            annotations: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the tool as not modifying any state.
    pub fn read_only(mut self) -> Self {
        self.annotations_mut().read_only_hint = true;
        self
    }

    /// Mark the tool as deleting or overwriting data.
    pub fn destructive(mut self) -> Self {
        self.annotations_mut().destructive_hint = true;
        self
    }

    pub fn idempotent(mut self) -> Self {
        self.annotations_mut().idempotent_hint = true;
        self
    }

    fn annotations_mut(&mut self) -> &mut ToolAnnotations {
        self.annotations.get_or_insert_with(ToolAnnotations::default)
    }

    /// Specify the input type and a handler that receives the request context.
    pub fn handler_with_context<I, F, Fut>(self, handler: F) -> ToolBuilderWithContextHandler<I, F>
    where
        I: JsonSchema + DeserializeOwned + Send + Sync + 'static,
        F: Fn(RequestContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult>> + Send + 'static,
    {
        ToolBuilderWithContextHandler {
            name: self.name,
            description: self.description,
            annotations: self.annotations,
            handler,
            _phantom: std::marker::PhantomData,
        }
    }
}

/// Builder state after a handler has been supplied.
pub struct ToolBuilderWithContextHandler<I, F> {
    name: String,
    description: Option<String>,
    annotations: Option<ToolAnnotations>,
    handler: F,
    _phantom: std::marker::PhantomData<I>,
}

impl<I, F, Fut> ToolBuilderWithContextHandler<I, F>
where
    I: JsonSchema + DeserializeOwned + Send + Sync + 'static,
    F: Fn(RequestContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CallToolResult>> + Send + 'static,
{
    /// Build the tool. Fails if the name is invalid.
    pub fn build(self) -> Result<Tool> {
        validate_tool_name(&self.name)?;
        Ok(Tool::from_handler(
            self.name,
            self.description,
            self.annotations,
            ContextAwareHandler {
                handler: self.handler,
                _phantom: std::marker::PhantomData,
            },
        ))
    }
}

struct ContextAwareHandler<I, F> {
    handler: F,
    _phantom: std::marker::PhantomData<I>,
}

impl<I, F, Fut> ToolHandler for ContextAwareHandler<I, F>
where
    I: JsonSchema + DeserializeOwned + Send + Sync + 'static,
    F: Fn(RequestContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CallToolResult>> + Send + 'static,
{
    fn call_with_context(
        &self,
        ctx: RequestContext,
        args: Value,
    ) -> BoxFuture<'_, Result<CallToolResult>> {
        Box::pin(async move {
            // Clients may omit `arguments` entirely
            let args = if args.is_null() {
                Value::Object(Default::default())
            } else {
                args
            };
            let input: I = serde_json::from_value(args)
                .map_err(|e| Error::tool(format!("Invalid input: {}", e)))?;
            (self.handler)(ctx, input).await
        })
    }

    fn input_schema(&self) -> Value {
        let schema = schemars::schema_for!(I);
        serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
    }
}
