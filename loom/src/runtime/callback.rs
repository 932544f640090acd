//! Callback Registry (component D): Before/After hook chains for Agent,
//! Model, and Tool operations.

use serde_json::Value;

use super::event::Response;
use super::tool_runtime::ToolResult;

/// Result of running a Before or After hook. `R` is the payload type a
/// Substitute carries — `Response` for the Agent/Model chains, `ToolResult`
/// for the Tool chain, since an After-Tool hook observes and may override a
/// tool's own result type, not a model response.
pub enum HookOutcome<R = Response> {
    /// Continue; the operation (or its result) is unchanged.
    Continue,
    /// Short-circuit a Before hook, or override an After hook's result, with
    /// this payload. For a Before hook the underlying operation is not called.
    Substitute(R),
    /// Abort the chain with this error message.
    Abort(String),
}

type BeforeHook<A, R> = Box<dyn Fn(&A) -> HookOutcome<R> + Send + Sync>;
type AfterHook<A, R> = Box<dyn Fn(&A, Option<&R>, Option<&str>) -> HookOutcome<R> + Send + Sync>;

/// One Before/After chain, run in registration order.
struct Chain<A, R = Response> {
    before: Vec<BeforeHook<A, R>>,
    after: Vec<AfterHook<A, R>>,
}

impl<A, R> Default for Chain<A, R> {
    fn default() -> Self {
        Self {
            before: Vec::new(),
            after: Vec::new(),
        }
    }
}

impl<A, R> Chain<A, R> {
    fn run_before(&self, arg: &A) -> HookOutcome<R> {
        for hook in &self.before {
            match hook(arg) {
                HookOutcome::Continue => continue,
                other => return other,
            }
        }
        HookOutcome::Continue
    }

    fn run_after(&self, arg: &A, result: Option<&R>, err: Option<&str>) -> HookOutcome<R> {
        let mut last = HookOutcome::Continue;
        for hook in &self.after {
            let outcome = hook(arg, result, err);
            if !matches!(outcome, HookOutcome::Continue) {
                last = outcome;
            }
        }
        last
    }
}

/// Opaque context passed to Agent-chain hooks: the agent name and the
/// invocation id it is running under.
pub struct AgentHookContext {
    pub agent_name: String,
    pub invocation_id: String,
}

/// Context passed to Model-chain hooks: the serialized request.
pub struct ModelHookContext {
    pub request: Value,
}

/// Context passed to Tool-chain hooks: the tool name and its arguments.
pub struct ToolHookContext {
    pub tool_name: String,
    pub args: Value,
}

/// Agent, Model, and Tool callback chains, registered once at agent-build time.
#[derive(Default)]
pub struct CallbackRegistry {
    agent: Chain<AgentHookContext, Response>,
    model: Chain<ModelHookContext, Response>,
    tool: Chain<ToolHookContext, ToolResult>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_before_agent<F>(&mut self, hook: F)
    where
        F: Fn(&AgentHookContext) -> HookOutcome<Response> + Send + Sync + 'static,
    {
        self.agent.before.push(Box::new(hook));
    }

    pub fn on_after_agent<F>(&mut self, hook: F)
    where
        F: Fn(&AgentHookContext, Option<&Response>, Option<&str>) -> HookOutcome<Response> + Send + Sync + 'static,
    {
        self.agent.after.push(Box::new(hook));
    }

    pub fn on_before_model<F>(&mut self, hook: F)
    where
        F: Fn(&ModelHookContext) -> HookOutcome<Response> + Send + Sync + 'static,
    {
        self.model.before.push(Box::new(hook));
    }

    pub fn on_after_model<F>(&mut self, hook: F)
    where
        F: Fn(&ModelHookContext, Option<&Response>, Option<&str>) -> HookOutcome<Response> + Send + Sync + 'static,
    {
        self.model.after.push(Box::new(hook));
    }

    pub fn on_before_tool<F>(&mut self, hook: F)
    where
        F: Fn(&ToolHookContext) -> HookOutcome<ToolResult> + Send + Sync + 'static,
    {
        self.tool.before.push(Box::new(hook));
    }

    pub fn on_after_tool<F>(&mut self, hook: F)
    where
        F: Fn(&ToolHookContext, Option<&ToolResult>, Option<&str>) -> HookOutcome<ToolResult> + Send + Sync + 'static,
    {
        self.tool.after.push(Box::new(hook));
    }

    pub fn run_before_agent(&self, ctx: &AgentHookContext) -> HookOutcome<Response> {
        self.agent.run_before(ctx)
    }

    pub fn run_after_agent(&self, ctx: &AgentHookContext, result: Option<&Response>, err: Option<&str>) -> HookOutcome<Response> {
        self.agent.run_after(ctx, result, err)
    }

    pub fn run_before_model(&self, ctx: &ModelHookContext) -> HookOutcome<Response> {
        self.model.run_before(ctx)
    }

    pub fn run_after_model(&self, ctx: &ModelHookContext, result: Option<&Response>, err: Option<&str>) -> HookOutcome<Response> {
        self.model.run_after(ctx, result, err)
    }

    pub fn run_before_tool(&self, ctx: &ToolHookContext) -> HookOutcome<ToolResult> {
        self.tool.run_before(ctx)
    }

    pub fn run_after_tool(&self, ctx: &ToolHookContext, result: Option<&ToolResult>, err: Option<&str>) -> HookOutcome<ToolResult> {
        self.tool.run_after(ctx, result, err)
    }
}
