//! Intérprete del grafo IR.
//!
//! Rol en el flujo:
//! - Camina el IR bajo un `ExecutionContext`, resuelve argumentos, invoca
//!   tools, emite eventos y devuelve resultado terminal o descriptor de
//!   ejecución suspendida.
//! - Es clonable barato (puertos tras Arc): cada rama paralela lleva su clon
//!   y cada instancia de flujo es independiente de las demás.
//! - La suspensión no es una continuación implícita: un tool devuelve la
//!   señal, el intérprete la maneja en el call site, serializa estado vía el
//!   puerto de almacenamiento y devuelve el control. `resume_execution` es un
//!   entry point separado, no la continuación del stack original.

pub mod events;
pub mod exec;
pub mod resolve;
pub mod status;

pub use events::{EventSink, FlowEvent, FlowEventKind};
pub use status::FlowStatus;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::context::{CancelFlag, ExecutionContext, ScopeStack};
use crate::errors::FlowError;
use crate::ir::IrGraph;
use crate::suspend::{with_store_retry, CursorFrame, ExecutionPosition, PersistedEnvelope, StorageBackend,
                     SuspensionMetadata, SuspensionRecord, VariableSnapshot};
use crate::tool::{ChoiceService, SuspendSignal, Tool, ToolRegistry};

/// Opciones de una ejecución.
#[derive(Default)]
pub struct RunOptions {
    pub input: Option<Value>,
    /// Tools adicionales sólo para este run (se suman al registro base).
    pub tools: Vec<Arc<dyn Tool>>,
    pub flow_id: Option<Uuid>,
    pub session_id: Option<String>,
    /// Timeout global del flujo en milisegundos.
    pub timeout_ms: Option<u64>,
    pub trace: bool,
    /// Flag externo para cancelación cooperativa del run.
    pub cancel: Option<CancelFlag>,
}

/// Metadatos comunes a todo resultado de ejecución.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub duration_ms: u64,
    /// Tools completados, en orden de despacho sobre el camino interpretado.
    pub tools_executed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspended_at: Option<DateTime<Utc>>,
    pub status: FlowStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedExecution {
    pub output: Value,
    pub metadata: RunMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspendedExecution {
    pub suspension_key: String,
    pub message: String,
    pub resumption_instructions: String,
    pub metadata: RunMetadata,
}

/// Resultado de `run`/`resume_execution`: terminal o suspendido.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecutionOutcome {
    Suspended(SuspendedExecution),
    Completed(CompletedExecution),
}

impl ExecutionOutcome {
    pub fn is_suspended(&self) -> bool {
        matches!(self, ExecutionOutcome::Suspended(_))
    }

    /// Output del caso completado (None si quedó suspendido).
    pub fn output(&self) -> Option<&Value> {
        match self {
            ExecutionOutcome::Completed(c) => Some(&c.output),
            ExecutionOutcome::Suspended(_) => None,
        }
    }

    pub fn metadata(&self) -> &RunMetadata {
        match self {
            ExecutionOutcome::Completed(c) => &c.metadata,
            ExecutionOutcome::Suspended(s) => &s.metadata,
        }
    }
}

/// Estado compartido de un run (las ramas paralelas lo clonan vía Arc).
pub(crate) struct RunState {
    pub ir: Arc<IrGraph>,
    pub tools: Arc<ToolRegistry>,
    pub events: EventSink,
    pub tools_executed: StdMutex<Vec<String>>,
    pub node_outputs: StdMutex<HashMap<String, Value>>,
    pub trace: bool,
}

/// Resultado interno de caminar un nodo.
pub(crate) enum Control {
    Value(Value),
    Suspend(Box<SuspendUnwind>),
}

/// Carga acumulada al desenrollar una suspensión hacia el tope.
pub(crate) struct SuspendUnwind {
    /// Frames de cursor, del más interno al más externo.
    pub frames: Vec<CursorFrame>,
    pub signal: SuspendSignal,
    pub node_id: String,
    pub tool_id: String,
    pub variables: ScopeStack,
    pub node_outputs: HashMap<String, Value>,
}

/// Estado de replay al resumir: cursor pendiente + input externo.
pub(crate) struct ResumeState {
    pub frames: VecDeque<CursorFrame>,
    pub input: Option<Value>,
}

struct ResumeBundle {
    record: SuspensionRecord,
    input: Value,
}

/// Motor de ejecución de grafos IR.
#[derive(Clone)]
pub struct Interpreter {
    registry: Arc<ToolRegistry>,
    choice: Arc<dyn ChoiceService>,
    backend: Arc<dyn StorageBackend>,
    config: EngineConfig,
}

impl Interpreter {
    pub fn new(registry: Arc<ToolRegistry>, choice: Arc<dyn ChoiceService>, backend: Arc<dyn StorageBackend>) -> Self {
        Self { registry,
               choice,
               backend,
               config: EngineConfig::default() }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Ejecuta el grafo hasta terminar, fallar o suspender.
    pub async fn run(&self, ir: IrGraph, opts: RunOptions) -> Result<ExecutionOutcome, FlowError> {
        self.drive(Arc::new(ir), opts, None, None).await
    }

    /// Variante streaming: devuelve el stream de eventos y el handle del run.
    /// El consumidor lee hasta el evento terminal.
    pub fn run_streaming(&self,
                         ir: IrGraph,
                         opts: RunOptions)
                         -> (UnboundedReceiver<FlowEvent>, JoinHandle<Result<ExecutionOutcome, FlowError>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let this = self.clone();
        let handle = tokio::spawn(async move { this.drive(Arc::new(ir), opts, Some(tx), None).await });
        (rx, handle)
    }

    /// Entry point separado de reanudación: reconstruye estado desde el
    /// registro persistido y continúa desde la posición registrada.
    pub async fn resume_execution(&self, key: &str, input: Value) -> Result<ExecutionOutcome, FlowError> {
        let (record, ir) = self.load_record(key).await?;
        self.drive(Arc::new(ir),
                   RunOptions::default(),
                   None,
                   Some(ResumeBundle { record, input }))
            .await
    }

    /// Reanudación con stream de eventos.
    pub fn resume_streaming(&self,
                            key: &str,
                            input: Value)
                            -> (UnboundedReceiver<FlowEvent>, JoinHandle<Result<ExecutionOutcome, FlowError>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let this = self.clone();
        let key = key.to_string();
        let handle = tokio::spawn(async move {
            let (record, ir) = this.load_record(&key).await?;
            this.drive(Arc::new(ir),
                       RunOptions::default(),
                       Some(tx),
                       Some(ResumeBundle { record, input }))
                .await
        });
        (rx, handle)
    }

    async fn load_record(&self, key: &str) -> Result<(SuspensionRecord, IrGraph), FlowError> {
        let backend = Arc::clone(&self.backend);
        let envelope: Option<PersistedEnvelope> =
            with_store_retry(|| {
                let backend = Arc::clone(&backend);
                let key = key.to_string();
                async move { backend.retrieve(&key).await }
            }).await?;
        let Some(envelope) = envelope else {
            return Err(FlowError::Execution { node_id: key.to_string(),
                                              node_kind: "resume".to_string(),
                                              message: "suspension record not found or expired".to_string() });
        };
        // doble chequeo de expiración por encima del backend
        if envelope.is_expired(Utc::now()) {
            let _ = self.backend.delete(key).await;
            return Err(FlowError::Execution { node_id: key.to_string(),
                                              node_kind: "resume".to_string(),
                                              message: "suspension record not found or expired".to_string() });
        }
        envelope.open()
    }

    async fn drive(&self,
                   ir: Arc<IrGraph>,
                   opts: RunOptions,
                   tx: Option<tokio::sync::mpsc::UnboundedSender<FlowEvent>>,
                   resume: Option<ResumeBundle>)
                   -> Result<ExecutionOutcome, FlowError> {
        let started = Instant::now();
        let flow_id = resume.as_ref()
                            .map(|r| r.record.flow_id)
                            .or(opts.flow_id)
                            .unwrap_or_else(Uuid::new_v4);
        let events = EventSink::new(flow_id, tx);

        // máquina de estados: un resume parte de suspended, el resto de created
        let status = match &resume {
            Some(_) => FlowStatus::Suspended,
            None => FlowStatus::Created,
        };
        let status = status.advance(FlowStatus::Running)?;

        // registro efectivo del run: base + tools por-run
        let tools = Arc::new(ToolRegistry::new());
        tools.absorb(&self.registry);
        for t in &opts.tools {
            tools.register(Arc::clone(t));
        }

        let mut cx = ExecutionContext::new(flow_id, self.config.worker_pool.max_workers);
        cx.session_id = opts.session_id.clone().or_else(|| resume.as_ref().and_then(|r| r.record.session_id.clone()));
        let run_cancel = opts.cancel.clone().unwrap_or_default();
        cx.cancel = run_cancel.child();

        let rs = Arc::new(RunState { ir: Arc::clone(&ir),
                                     tools,
                                     events: events.clone(),
                                     tools_executed: StdMutex::new(Vec::new()),
                                     node_outputs: StdMutex::new(HashMap::new()),
                                     trace: opts.trace || self.config.interpreter.trace });

        // estado inicial: fresco o rehidratado del registro
        let (resume_state, entry_input, prior_key) = match resume {
            Some(bundle) => {
                let ResumeBundle { record, input } = bundle;
                cx.variables = record.variable_snapshot.scopes.clone();
                *rs.node_outputs.lock().expect("node outputs poisoned") =
                    record.variable_snapshot.node_outputs.clone();
                events.emit(FlowEventKind::FlowResumed { suspension_key: record.key.clone() });
                let frames: VecDeque<CursorFrame> = record.execution_position.cursor.clone().into();
                (Some(ResumeState { frames, input: Some(input) }), Value::Null, Some(record.key))
            }
            None => {
                let input = opts.input.clone().unwrap_or(Value::Null);
                cx.variables = ScopeStack::with_input(input.clone());
                (None, input, None)
            }
        };

        let entry = ir.entry.clone();
        let fut = self.exec_node(&rs, &entry, entry_input, &mut cx, resume_state);
        let result = match opts.timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), fut).await {
                Ok(r) => r,
                Err(_) => Err(FlowError::Timeout { operation: "flow".to_string(),
                                                   elapsed_ms: ms }),
            },
            None => fut.await,
        };

        let tools_executed = rs.tools_executed.lock().expect("tools executed poisoned").clone();
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(Control::Value(output)) => {
                if let Some(key) = prior_key {
                    self.consume_record(&key).await?;
                }
                let status = status.advance(FlowStatus::Completed)?;
                events.emit(FlowEventKind::FlowComplete { data: Some(output.clone()) });
                Ok(ExecutionOutcome::Completed(CompletedExecution { output,
                                                                    metadata: RunMetadata { duration_ms,
                                                                                            tools_executed,
                                                                                            suspended_at: None,
                                                                                            status } }))
            }
            Ok(Control::Suspend(unwind)) => {
                let status = status.advance(FlowStatus::Suspended)?;
                let outcome =
                    self.persist_suspension(&ir, &cx, *unwind, duration_ms, tools_executed, status, &events).await;
                match &outcome {
                    Ok(_) => {
                        if let Some(key) = prior_key {
                            // el registro anterior queda consumido por el nuevo
                            self.consume_record(&key).await?;
                        }
                    }
                    Err(e) => events.emit(FlowEventKind::FlowError { error: e.report() }),
                }
                outcome
            }
            Err(e) => {
                events.emit(FlowEventKind::FlowError { error: e.report() });
                Err(e)
            }
        }
    }

    /// Construye, sella y persiste el registro de suspensión. El resultado
    /// suspendido sólo se devuelve con el registro ya escrito (atómico): si
    /// el backend falla, la ejecución NO queda suspendida y el error aflora
    /// como `Persistence`.
    async fn persist_suspension(&self,
                                ir: &Arc<IrGraph>,
                                cx: &ExecutionContext,
                                unwind: SuspendUnwind,
                                duration_ms: u64,
                                tools_executed: Vec<String>,
                                status: FlowStatus,
                                events: &EventSink)
                                -> Result<ExecutionOutcome, FlowError> {
        let key = format!("susp_{}", Uuid::new_v4());
        let created_at = Utc::now();
        let ttl = self.config.suspension.default_ttl_secs;
        let expires_at = if ttl > 0 {
            Some(created_at + ChronoDuration::seconds(ttl as i64))
        } else {
            None
        };

        // cursor persistido: del más externo al más interno
        let mut cursor = unwind.frames;
        cursor.reverse();

        let record = SuspensionRecord { key: key.clone(),
                                        flow_id: cx.flow_id,
                                        step_id: unwind.node_id.clone(),
                                        session_id: cx.session_id.clone(),
                                        execution_position: ExecutionPosition { node_id: unwind.node_id.clone(),
                                                                                cursor },
                                        variable_snapshot: VariableSnapshot { scopes: unwind.variables,
                                                                              node_outputs: unwind.node_outputs },
                                        metadata: SuspensionMetadata { tool_id: unwind.tool_id.clone(),
                                                                       suspended_at: created_at,
                                                                       extra: HashMap::new() },
                                        awaiting_input_schema: unwind.signal.awaiting_input_schema.clone(),
                                        default_value: unwind.signal.default_value.clone(),
                                        created_at,
                                        expires_at,
                                        size: 0,
                                        checksum: None };

        let envelope = PersistedEnvelope::seal(record, ir)?;
        let backend = Arc::clone(&self.backend);
        let store_result = with_store_retry(|| {
                               let backend = Arc::clone(&backend);
                               let key = key.clone();
                               let envelope = envelope.clone();
                               async move { backend.store(&key, &envelope).await }
                           }).await;
        if let Err(e) = store_result {
            // suspensión parcial jamás observable: el fallo de storage aborta
            // el suspend y el flujo termina con error de persistencia
            return Err(FlowError::Persistence { key,
                                                message: format!("failed to persist suspension record: {e}") });
        }

        let message = unwind.signal
                            .message
                            .clone()
                            .unwrap_or_else(|| format!("flow suspended at tool '{}'", unwind.tool_id));
        events.emit(FlowEventKind::FlowSuspended { suspension_key: key.clone(),
                                                   message: Some(message.clone()) });
        log::debug!("flow {} suspended under key {key}", cx.flow_id);

        Ok(ExecutionOutcome::Suspended(SuspendedExecution {
            suspension_key: key.clone(),
            message,
            resumption_instructions: format!("call resume_execution(\"{key}\", input) with the awaited value to \
                                              continue this flow"),
            metadata: RunMetadata { duration_ms,
                                    tools_executed,
                                    suspended_at: Some(created_at),
                                    status },
        }))
    }

    /// Borra el registro consumido por un resume exitoso. Si el borrado
    /// falla, el resume no se considera exitoso (la clave no debe poder
    /// resumir dos veces).
    async fn consume_record(&self, key: &str) -> Result<(), FlowError> {
        let backend = Arc::clone(&self.backend);
        with_store_retry(|| {
            let backend = Arc::clone(&backend);
            let key = key.to_string();
            async move { backend.delete(&key).await }
        }).await
          .map(|_| ())
          .map_err(|e| FlowError::Persistence { key: key.to_string(),
                                                message: format!("failed to consume suspension record: {e}") })
    }
}
