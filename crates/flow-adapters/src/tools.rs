//! Tools deterministas de ejemplo.
//!
//! Todos son puros respecto de sus args (sin estado compartido), salvo
//! `SleepTool` (tiempo) y `AskUserTool` (suspende a la espera de input
//! externo). `register_demo_tools` arma un registro con el set completo y el
//! join fetch→summarize declarado.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use flow_core::context::ExecutionContext;
use flow_core::errors::FlowError;
use flow_core::tool::{SuspendSignal, Tool, ToolOutcome, ToolRegistry};

fn bad_args(tool_id: &str, message: &str) -> FlowError {
    FlowError::Tool { tool_id: tool_id.to_string(),
                      message: message.to_string(),
                      cause: None }
}

/// Devuelve sus args tal cual.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn id(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "returns its arguments unchanged"
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolOutcome, FlowError> {
        Ok(ToolOutcome::Value(args))
    }
}

/// Duplica `value` (o `item` si no hay `value`).
pub struct DoubleTool;

#[async_trait]
impl Tool for DoubleTool {
    fn id(&self) -> &str {
        "double"
    }

    fn description(&self) -> &str {
        "doubles a numeric argument"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": { "value": { "type": "number" } } })
    }

    fn output_schema(&self) -> Value {
        json!({ "type": "number" })
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolOutcome, FlowError> {
        let n = args.get("value")
                    .or_else(|| args.get("item"))
                    .and_then(Value::as_f64)
                    .ok_or_else(|| bad_args("double", "expected numeric 'value'"))?;
        Ok(ToolOutcome::Value(json!(n * 2.0)))
    }
}

/// Suma `a + b` (o acumulador + item para cuerpos de reduce).
pub struct SumTool;

#[async_trait]
impl Tool for SumTool {
    fn id(&self) -> &str {
        "sum"
    }

    fn description(&self) -> &str {
        "adds two numeric arguments"
    }

    fn output_schema(&self) -> Value {
        json!({ "type": "number" })
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolOutcome, FlowError> {
        let a = args.get("a").and_then(Value::as_f64).ok_or_else(|| bad_args("sum", "expected numeric 'a'"))?;
        let b = args.get("b").and_then(Value::as_f64).ok_or_else(|| bad_args("sum", "expected numeric 'b'"))?;
        Ok(ToolOutcome::Value(json!(a + b)))
    }
}

/// Pasa `text` a mayúsculas.
pub struct UppercaseTool;

#[async_trait]
impl Tool for UppercaseTool {
    fn id(&self) -> &str {
        "uppercase"
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolOutcome, FlowError> {
        let text = args.get("text")
                       .and_then(Value::as_str)
                       .ok_or_else(|| bad_args("uppercase", "expected string 'text'"))?;
        Ok(ToolOutcome::Value(json!(text.to_uppercase())))
    }
}

/// Concatena `parts` (array de strings) con separador opcional.
pub struct ConcatTool;

#[async_trait]
impl Tool for ConcatTool {
    fn id(&self) -> &str {
        "concat"
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolOutcome, FlowError> {
        let parts = args.get("parts")
                        .and_then(Value::as_array)
                        .ok_or_else(|| bad_args("concat", "expected array 'parts'"))?;
        let sep = args.get("separator").and_then(Value::as_str).unwrap_or("");
        let joined = parts.iter()
                          .map(|p| p.as_str().map(str::to_string).unwrap_or_else(|| p.to_string()))
                          .collect::<Vec<_>>()
                          .join(sep);
        Ok(ToolOutcome::Value(json!(joined)))
    }
}

/// Fetch simulado: produce un documento determinista a partir de la URL.
pub struct FetchTool;

#[async_trait]
impl Tool for FetchTool {
    fn id(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "fetches a document (deterministic stub)"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": { "url": { "type": "string" } } })
    }

    fn output_schema(&self) -> Value {
        json!({ "type": "object", "properties": { "url": {}, "body": {} } })
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolOutcome, FlowError> {
        let url = args.get("url")
                      .and_then(Value::as_str)
                      .ok_or_else(|| bad_args("fetch", "expected string 'url'"))?;
        Ok(ToolOutcome::Value(json!({
            "url": url,
            "status": 200,
            "body": format!("contents of {url}"),
        })))
    }
}

/// Resume un documento producido por `fetch`.
pub struct SummarizeTool;

#[async_trait]
impl Tool for SummarizeTool {
    fn id(&self) -> &str {
        "summarize"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "string" })
    }

    fn output_schema(&self) -> Value {
        json!({ "type": "string" })
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolOutcome, FlowError> {
        let doc = args.get("input").cloned().unwrap_or(args);
        let body = doc.get("body").and_then(Value::as_str).unwrap_or("");
        let summary: String = body.chars().take(32).collect();
        Ok(ToolOutcome::Value(json!(format!("summary: {summary}"))))
    }
}

/// Pide input humano: suspende el flujo con el prompt como mensaje.
pub struct AskUserTool;

#[async_trait]
impl Tool for AskUserTool {
    fn id(&self) -> &str {
        "ask_user"
    }

    fn description(&self) -> &str {
        "suspends the flow awaiting externally supplied input"
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolOutcome, FlowError> {
        let prompt = args.get("prompt").and_then(Value::as_str).unwrap_or("input required");
        Ok(ToolOutcome::Suspend(SuspendSignal { message: Some(prompt.to_string()),
                                                awaiting_input_schema: Some(json!({ "type": "string" })),
                                                default_value: args.get("default").cloned() }))
    }
}

/// Emite la señal de break del loop que lo encierra cuando `when` es true.
pub struct BreakIfTool;

#[async_trait]
impl Tool for BreakIfTool {
    fn id(&self) -> &str {
        "break_if"
    }

    fn description(&self) -> &str {
        "signals loop break when 'when' is truthy"
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolOutcome, FlowError> {
        // `when` booleano directo, o igualdad `left == right` sobre args ya
        // resueltos
        let when = match args.get("when").and_then(Value::as_bool) {
            Some(b) => b,
            None => match (args.get("left"), args.get("right")) {
                (Some(l), Some(r)) => l == r,
                _ => false,
            },
        };
        if when {
            ctx.control.signal_break("break_if")?;
        }
        Ok(ToolOutcome::Value(args.get("value").cloned().unwrap_or(Value::Null)))
    }
}

/// Pausa viva (no persistida): espera un valor entregado por
/// `ExecutionContext::pause::resume` desde afuera del flujo.
pub struct PauseTool;

#[async_trait]
impl Tool for PauseTool {
    fn id(&self) -> &str {
        "pause"
    }

    fn description(&self) -> &str {
        "blocks on the in-memory pause gate until resumed"
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolOutcome, FlowError> {
        let prompt = args.get("prompt").and_then(Value::as_str).unwrap_or("paused");
        let value = ctx.pause.pause(prompt).await?;
        Ok(ToolOutcome::Value(value))
    }
}

/// Falla siempre (tests de recovery y cancelación).
pub struct FailTool;

#[async_trait]
impl Tool for FailTool {
    fn id(&self) -> &str {
        "fail"
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolOutcome, FlowError> {
        let message = args.get("message").and_then(Value::as_str).unwrap_or("tool failed on purpose");
        Err(FlowError::Tool { tool_id: "fail".to_string(),
                              message: message.to_string(),
                              cause: None })
    }
}

/// Falla las primeras `fail_count` invocaciones y después devuelve `value`.
/// Sirve para ejercitar el retry por nodo y la estrategia `retry`.
pub struct FlakyTool {
    fail_count: std::sync::atomic::AtomicU32,
}

impl FlakyTool {
    pub fn new(fail_count: u32) -> Self {
        Self { fail_count: std::sync::atomic::AtomicU32::new(fail_count) }
    }
}

#[async_trait]
impl Tool for FlakyTool {
    fn id(&self) -> &str {
        "flaky"
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolOutcome, FlowError> {
        use std::sync::atomic::Ordering;
        let remaining = self.fail_count.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_count.store(remaining - 1, Ordering::SeqCst);
            return Err(FlowError::Tool { tool_id: "flaky".to_string(),
                                         message: format!("transient failure ({remaining} left)"),
                                         cause: None });
        }
        Ok(ToolOutcome::Value(args.get("value").cloned().unwrap_or(json!("ok"))))
    }
}

/// Duerme `ms` milisegundos y devuelve `value` (default 1).
pub struct SleepTool;

#[async_trait]
impl Tool for SleepTool {
    fn id(&self) -> &str {
        "sleep"
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolOutcome, FlowError> {
        let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(10);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(ToolOutcome::Value(args.get("value").cloned().unwrap_or(json!(1))))
    }
}

/// Registro con el set demo completo y el join fetch→summarize declarado.
pub fn register_demo_tools(registry: &ToolRegistry) {
    registry.register(Arc::new(EchoTool));
    registry.register(Arc::new(DoubleTool));
    registry.register(Arc::new(SumTool));
    registry.register(Arc::new(UppercaseTool));
    registry.register(Arc::new(ConcatTool));
    registry.register(Arc::new(FetchTool));
    registry.register(Arc::new(SummarizeTool));
    registry.register(Arc::new(AskUserTool));
    registry.register(Arc::new(BreakIfTool));
    registry.register(Arc::new(PauseTool));
    registry.register(Arc::new(FailTool));
    registry.register(Arc::new(SleepTool));
    registry.declare_join("fetch", "summarize");
}
