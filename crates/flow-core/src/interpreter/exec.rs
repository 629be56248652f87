//! Despacho de nodos IR.
//!
//! Reglas de ejecución:
//! - `sequence`: hijos de izquierda a derecha; el resultado es el del último.
//! - `parallel`: cada rama corre como tarea propia a través del worker pool;
//!   el array resultado preserva el orden de declaración sin importar el de
//!   finalización; la primera rama fallida cancela a sus hermanas.
//! - `conditional`: rama vacía o ausente pasa el input sin cambios.
//! - `loop`: colección no-array es error; tope duro de iteraciones; cada
//!   iteración corre en frame hijo propio que se descarta al salir.
//! - `switch`: nodo tool marcado; la elección la hace el servicio de choice y
//!   la rama elegida corre como secuencia en frame hijo.
//!
//! Protocolo de cursor (suspensión): al desenrollar, cada nodo estructural en
//! el camino agrega un `CursorFrame`; al resumir, cada uno consume su frame,
//! avanza hasta el slot registrado sin re-ejecutar lo completado y sin
//! re-abrir el frame de scope en vuelo (el snapshot ya lo contiene), y el
//! nodo tool final consume el input de resume como su resultado.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use super::events::FlowEventKind;
use super::resolve::{resolve_args, resolve_ref};
use super::{Control, Interpreter, ResumeState, RunState, SuspendUnwind};
use crate::constants::{ACC_VAR, SWITCH_TOOL_ID};
use crate::context::ExecutionContext;
use crate::errors::FlowError;
use crate::expr::{eval_condition, truthy};
use crate::ir::{IrLoopType, IrNode, IrNodeKind};
use crate::model::{SwitchOption, ValueRef};
use crate::suspend::CursorFrame;
use crate::tool::{ChoiceOutcome, ToolOutcome};

pub(crate) type BoxFut<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

fn cursor_err(node_id: &str, message: &str) -> FlowError {
    FlowError::Execution { node_id: node_id.to_string(),
                           node_kind: "resume".to_string(),
                           message: message.to_string() }
}

impl Interpreter {
    /// Ejecuta un nodo: eventos, timeout por nodo, escritura de `output` y
    /// registro de salida de nodo. La recursión pasa por el box.
    pub(crate) fn exec_node<'a>(&'a self,
                                rs: &'a Arc<RunState>,
                                node_id: &'a str,
                                input: Value,
                                cx: &'a mut ExecutionContext,
                                resume: Option<ResumeState>)
                                -> BoxFut<'a, Result<Control, FlowError>> {
        Box::pin(async move {
            cx.cancel.ensure_active(node_id, "node")?;
            let node = rs.ir.require(node_id)?;
            cx.step_id = Some(node_id.to_string());
            rs.events.emit(FlowEventKind::NodeStart { node_id: node_id.to_string(),
                                                      node_type: node.kind_name().to_string() });
            if rs.trace {
                log::debug!("node-start {} ({})", node_id, node.kind_name());
            }

            let fut = self.dispatch(rs, node, input, cx, resume);
            let result = match node.timeout_ms {
                Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), fut).await {
                    Ok(r) => r,
                    Err(_) => Err(FlowError::Timeout { operation: node_id.to_string(),
                                                       elapsed_ms: ms }),
                },
                None => fut.await,
            };

            match result {
                Ok(Control::Value(v)) => {
                    if let Some(out) = &node.output {
                        cx.variables.set(out.clone(), v.clone());
                    }
                    rs.node_outputs
                      .lock()
                      .expect("node outputs poisoned")
                      .insert(node_id.to_string(), v.clone());
                    rs.events.emit(FlowEventKind::NodeComplete { node_id: node_id.to_string(),
                                                                 node_type: node.kind_name().to_string(),
                                                                 data: Some(v.clone()) });
                    Ok(Control::Value(v))
                }
                Ok(suspended @ Control::Suspend(_)) => Ok(suspended),
                Err(e) => {
                    rs.events.emit(FlowEventKind::NodeError { node_id: node_id.to_string(),
                                                              node_type: node.kind_name().to_string(),
                                                              error: e.report() });
                    Err(e)
                }
            }
        })
    }

    async fn dispatch(&self,
                      rs: &Arc<RunState>,
                      node: &IrNode,
                      input: Value,
                      cx: &mut ExecutionContext,
                      resume: Option<ResumeState>)
                      -> Result<Control, FlowError> {
        match &node.kind {
            IrNodeKind::Tool { tool_id, args } => self.exec_tool(rs, node, tool_id, args, cx, resume).await,
            IrNodeKind::Sequence { children } => {
                self.exec_list(rs, &node.id, None, children, input, cx, resume).await
            }
            IrNodeKind::Conditional { condition, then_branch, else_branch } => {
                self.exec_conditional(rs, node, condition, then_branch, else_branch.as_deref(), input, cx, resume)
                    .await
            }
            IrNodeKind::Parallel { branches, .. } => self.exec_parallel(rs, node, branches, cx, resume).await,
            IrNodeKind::Loop { .. } => self.exec_loop(rs, node, input, cx, resume).await,
        }
    }

    /// Secuencia inline de ids (hijos de sequence, ramas, cuerpos de loop).
    /// `label` distingue la lista dentro del nodo dueño (then/else/opción).
    async fn exec_list(&self,
                       rs: &Arc<RunState>,
                       owner: &str,
                       label: Option<&str>,
                       ids: &[String],
                       input: Value,
                       cx: &mut ExecutionContext,
                       resume: Option<ResumeState>)
                       -> Result<Control, FlowError> {
        let mut start = 0usize;
        let mut child_resume: Option<ResumeState> = None;
        if let Some(mut r) = resume {
            let frame = r.frames
                         .pop_front()
                         .ok_or_else(|| cursor_err(owner, "cursor exhausted before reaching the suspended node"))?;
            if frame.node_id != owner || frame.chosen.as_deref() != label {
                return Err(cursor_err(owner, "cursor frame does not match the executing list"));
            }
            start = frame.slot;
            child_resume = Some(r);
        }

        let mut last = input;
        for (i, id) in ids.iter().enumerate().skip(start) {
            let step_resume = if i == start { child_resume.take() } else { None };
            match self.exec_node(rs, id, last.clone(), cx, step_resume).await? {
                Control::Value(v) => last = v,
                Control::Suspend(mut s) => {
                    s.frames.push(CursorFrame { node_id: owner.to_string(),
                                                slot: i,
                                                partial: Vec::new(),
                                                acc: None,
                                                chosen: label.map(str::to_string) });
                    return Ok(Control::Suspend(s));
                }
            }
            // una señal pendiente corta la lista; la consume el loop de afuera
            if cx.control.pending() {
                break;
            }
        }
        Ok(Control::Value(last))
    }

    async fn exec_conditional(&self,
                              rs: &Arc<RunState>,
                              node: &IrNode,
                              condition: &str,
                              then_branch: &[String],
                              else_branch: Option<&[String]>,
                              input: Value,
                              cx: &mut ExecutionContext,
                              resume: Option<ResumeState>)
                              -> Result<Control, FlowError> {
        let in_flight = resume.is_some();
        let (label, ids): (&str, Option<&[String]>) = if let Some(r) = &resume {
            let front = r.frames
                         .front()
                         .ok_or_else(|| cursor_err(&node.id, "cursor exhausted at conditional"))?;
            match front.chosen.as_deref() {
                Some("then") => ("then", Some(then_branch)),
                Some("else") => ("else", else_branch),
                _ => return Err(cursor_err(&node.id, "cursor frame does not name a conditional branch")),
            }
        } else if eval_condition(condition, &cx.variables)? {
            ("then", Some(then_branch))
        } else {
            ("else", else_branch)
        };

        let ids = match ids {
            Some(list) if !list.is_empty() => list,
            // rama vacía o ausente: el input pasa sin cambios
            _ => return Ok(Control::Value(input)),
        };

        if !in_flight {
            cx.variables.push_child();
        }
        let result = self.exec_list(rs, &node.id, Some(label), ids, input, cx, resume).await;
        cx.variables.pop();
        result
    }

    async fn exec_parallel(&self,
                           rs: &Arc<RunState>,
                           node: &IrNode,
                           branches: &[Vec<String>],
                           cx: &mut ExecutionContext,
                           resume: Option<ResumeState>)
                           -> Result<Control, FlowError> {
        if resume.is_some() {
            return Err(cursor_err(&node.id, "a resume cursor cannot enter a parallel node"));
        }
        if branches.is_empty() {
            return Ok(Control::Value(Value::Array(Vec::new())));
        }

        let branch_cancel = cx.cancel.child();
        let mut join: JoinSet<(usize, Result<Control, FlowError>)> = JoinSet::new();
        for (idx, ids) in branches.iter().enumerate() {
            let interp = self.clone();
            let run = Arc::clone(rs);
            let ids = ids.clone();
            let owner = node.id.clone();
            let pool = Arc::clone(&cx.pool);
            let mut bcx = cx.branch_child(&branch_cancel);
            join.spawn(async move {
                let result = pool.submit(async {
                                     interp.exec_list(&run, &owner, None, &ids, Value::Null, &mut bcx, None).await
                                 })
                                 .await;
                (idx, result)
            });
        }

        let mut results: Vec<Option<Value>> = vec![None; branches.len()];
        let mut first_err: Option<FlowError> = None;
        while let Some(joined) = join.join_next().await {
            match joined {
                Ok((idx, Ok(Control::Value(v)))) => results[idx] = Some(v),
                Ok((_, Ok(Control::Suspend(_)))) => {
                    if first_err.is_none() {
                        first_err = Some(FlowError::Execution { node_id: node.id.clone(),
                                                                node_kind: "parallel".to_string(),
                                                                message: "suspension inside a parallel branch is not \
                                                                          supported"
                                                                         .to_string() });
                        branch_cancel.cancel();
                    }
                }
                Ok((_, Err(e))) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                        branch_cancel.cancel();
                    }
                }
                Err(join_err) => {
                    if first_err.is_none() {
                        first_err = Some(FlowError::Execution { node_id: node.id.clone(),
                                                                node_kind: "parallel".to_string(),
                                                                message: format!("branch task failed: {join_err}") });
                        branch_cancel.cancel();
                    }
                }
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }
        // orden de declaración, sin importar el de finalización
        Ok(Control::Value(Value::Array(results.into_iter().map(|v| v.unwrap_or(Value::Null)).collect())))
    }

    async fn exec_loop(&self,
                       rs: &Arc<RunState>,
                       node: &IrNode,
                       input: Value,
                       cx: &mut ExecutionContext,
                       resume: Option<ResumeState>)
                       -> Result<Control, FlowError> {
        let IrNodeKind::Loop { loop_type,
                               collection,
                               condition,
                               predicate,
                               iterator_var,
                               accumulator,
                               body,
                               max_iterations } = &node.kind
        else {
            unreachable!("exec_loop requires a loop node");
        };
        let max = (*max_iterations).min(self.config.loops.max_iterations).max(1);
        match loop_type {
            IrLoopType::While => {
                self.exec_while(rs, node, condition.as_deref(), body, max, input, cx, resume).await
            }
            _ => {
                self.exec_collection_loop(rs,
                                          node,
                                          *loop_type,
                                          collection.as_ref(),
                                          predicate.as_deref(),
                                          iterator_var,
                                          accumulator.clone(),
                                          body,
                                          max,
                                          cx,
                                          resume)
                    .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn exec_collection_loop(&self,
                                  rs: &Arc<RunState>,
                                  node: &IrNode,
                                  loop_type: IrLoopType,
                                  collection: Option<&ValueRef>,
                                  predicate: Option<&str>,
                                  iterator_var: &str,
                                  accumulator: Option<Value>,
                                  body: &[String],
                                  max: u64,
                                  cx: &mut ExecutionContext,
                                  resume: Option<ResumeState>)
                                  -> Result<Control, FlowError> {
        let coll_ref = collection.ok_or_else(|| FlowError::Execution { node_id: node.id.clone(),
                                                                       node_kind: "loop".to_string(),
                                                                       message: "loop requires a collection"
                                                                                .to_string() })?;
        let outputs = rs.node_outputs.lock().expect("node outputs poisoned").clone();
        let resolved = resolve_ref(&node.id, coll_ref, cx, &outputs)?;
        let Some(items) = resolved.as_array().cloned() else {
            return Err(FlowError::Execution { node_id: node.id.clone(),
                                              node_kind: "loop".to_string(),
                                              message: "collection did not resolve to an array".to_string() });
        };
        if items.len() as u64 > max {
            return Err(FlowError::Execution { node_id: node.id.clone(),
                                              node_kind: "loop".to_string(),
                                              message: format!("collection length {} exceeds max iterations {max}",
                                                               items.len()) });
        }

        let mut collected: Vec<Value> = Vec::new();
        let mut acc: Option<Value> = accumulator;
        let mut start = 0usize;
        let mut child_resume: Option<ResumeState> = None;
        if let Some(mut r) = resume {
            let frame = r.frames
                         .pop_front()
                         .ok_or_else(|| cursor_err(&node.id, "cursor exhausted at loop"))?;
            if frame.node_id != node.id || frame.chosen.is_some() {
                return Err(cursor_err(&node.id, "cursor frame does not match the loop"));
            }
            start = frame.slot;
            collected = frame.partial;
            if frame.acc.is_some() {
                acc = frame.acc;
            }
            child_resume = Some(r);
        }

        for (i, item) in items.iter().enumerate().skip(start) {
            cx.cancel.ensure_active(&node.id, "loop")?;
            let resume_here = child_resume.take();
            let in_flight = resume_here.is_some();
            if !in_flight {
                // frame propio por iteración; se descarta al salir sin merge
                cx.variables.push_child();
                cx.variables.set(iterator_var, item.clone());
                if matches!(loop_type, IrLoopType::Reduce) {
                    cx.variables.set(ACC_VAR, acc.clone().unwrap_or(Value::Null));
                }
            }

            let body_result = if body.is_empty() {
                // filter por predicado puro: el elemento pasa tal cual
                Ok(Control::Value(item.clone()))
            } else {
                self.exec_list(rs, &node.id, None, body, item.clone(), cx, resume_here).await
            };

            // el predicado se evalúa con el iterador aún ligado
            let keep = match (loop_type, predicate) {
                (IrLoopType::Filter, Some(p)) => match &body_result {
                    Ok(Control::Value(_)) => Some(eval_condition(p, &cx.variables)?),
                    _ => None,
                },
                _ => None,
            };

            cx.variables.pop();

            match body_result? {
                Control::Suspend(mut s) => {
                    s.frames.push(CursorFrame { node_id: node.id.clone(),
                                                slot: i,
                                                partial: collected.clone(),
                                                acc: acc.clone(),
                                                chosen: None });
                    return Ok(Control::Suspend(s));
                }
                Control::Value(v) => {
                    let continued = cx.control.take_continue();
                    let broke = cx.control.take_break();
                    if !continued && !broke {
                        match loop_type {
                            IrLoopType::For | IrLoopType::Map => collected.push(v),
                            IrLoopType::Filter => {
                                let passes = keep.unwrap_or_else(|| truthy(&v));
                                if passes {
                                    collected.push(item.clone());
                                }
                            }
                            IrLoopType::Reduce => acc = Some(v),
                            IrLoopType::While => unreachable!(),
                        }
                    }
                    if broke {
                        break;
                    }
                }
            }
        }

        match loop_type {
            IrLoopType::Reduce => Ok(Control::Value(acc.unwrap_or(Value::Null))),
            _ => Ok(Control::Value(Value::Array(collected))),
        }
    }

    async fn exec_while(&self,
                        rs: &Arc<RunState>,
                        node: &IrNode,
                        condition: Option<&str>,
                        body: &[String],
                        max: u64,
                        input: Value,
                        cx: &mut ExecutionContext,
                        resume: Option<ResumeState>)
                        -> Result<Control, FlowError> {
        let condition = condition.ok_or_else(|| FlowError::Execution { node_id: node.id.clone(),
                                                                       node_kind: "loop".to_string(),
                                                                       message: "while loop requires a condition"
                                                                                .to_string() })?;
        let mut iterations: u64 = 0;
        let mut child_resume: Option<ResumeState> = None;
        let mut in_flight = false;
        if let Some(mut r) = resume {
            let frame = r.frames
                         .pop_front()
                         .ok_or_else(|| cursor_err(&node.id, "cursor exhausted at while loop"))?;
            if frame.node_id != node.id {
                return Err(cursor_err(&node.id, "cursor frame does not match the loop"));
            }
            iterations = frame.slot as u64;
            child_resume = Some(r);
            in_flight = true;
        }

        let mut last = input;
        loop {
            cx.cancel.ensure_active(&node.id, "loop")?;
            if !in_flight {
                if !eval_condition(condition, &cx.variables)? {
                    break;
                }
                if iterations >= max {
                    return Err(FlowError::Execution { node_id: node.id.clone(),
                                                      node_kind: "loop".to_string(),
                                                      message: format!("loop exceeded max iterations {max}") });
                }
                cx.variables.push_child();
            }
            let body_result = self.exec_list(rs, &node.id, None, body, last.clone(), cx, child_resume.take()).await;
            cx.variables.pop();
            match body_result? {
                Control::Suspend(mut s) => {
                    s.frames.push(CursorFrame { node_id: node.id.clone(),
                                                slot: iterations as usize,
                                                partial: Vec::new(),
                                                acc: None,
                                                chosen: None });
                    return Ok(Control::Suspend(s));
                }
                Control::Value(v) => last = v,
            }
            in_flight = false;
            iterations += 1;
            // señales consumidas en el borde de iteración
            let _ = cx.control.take_continue();
            if cx.control.take_break() {
                break;
            }
        }
        Ok(Control::Value(last))
    }

    async fn exec_tool(&self,
                       rs: &Arc<RunState>,
                       node: &IrNode,
                       tool_id: &str,
                       args: &indexmap::IndexMap<String, ValueRef>,
                       cx: &mut ExecutionContext,
                       resume: Option<ResumeState>)
                       -> Result<Control, FlowError> {
        if tool_id == SWITCH_TOOL_ID {
            return self.exec_switch(rs, node, args, cx, resume).await;
        }

        let outputs = rs.node_outputs.lock().expect("node outputs poisoned").clone();
        let resolved = resolve_args(&node.id, args, cx, &outputs)?;

        // resume: el input externo ES el resultado del tool suspendido
        if let Some(mut r) = resume {
            if !r.frames.is_empty() {
                return Err(cursor_err(&node.id, "cursor frame does not terminate at the suspended tool"));
            }
            let value = r.input
                         .take()
                         .ok_or_else(|| cursor_err(&node.id, "resume input was already consumed"))?;
            rs.tools_executed
              .lock()
              .expect("tools executed poisoned")
              .push(tool_id.to_string());
            return Ok(Control::Value(value));
        }

        let tool = rs.tools.get(tool_id).ok_or_else(|| FlowError::Tool { tool_id: tool_id.to_string(),
                                                                         message: "tool not found in registry"
                                                                                  .to_string(),
                                                                         cause: None })?;
        let retries = node.retry.unwrap_or(0);
        let mut attempt: u32 = 0;
        let outcome = loop {
            cx.cancel.ensure_active(&node.id, "tool")?;
            match tool.execute(resolved.clone(), cx).await {
                Ok(o) => break o,
                Err(e) if attempt < retries => {
                    let factor = self.config.recovery.backoff_multiplier.powi(attempt as i32);
                    let delay = (self.config.recovery.retry_delay_ms as f64 * factor) as u64;
                    log::debug!("tool '{}' failed (attempt {}), retrying in {}ms: {e}", tool_id, attempt + 1, delay);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        match outcome {
            ToolOutcome::Value(v) => {
                rs.tools_executed
                  .lock()
                  .expect("tools executed poisoned")
                  .push(tool_id.to_string());
                Ok(Control::Value(v))
            }
            ToolOutcome::Suspend(signal) => {
                if cx.control.in_parallel() {
                    return Err(FlowError::Execution { node_id: node.id.clone(),
                                                      node_kind: "tool".to_string(),
                                                      message: "suspension inside a parallel branch is not supported"
                                                               .to_string() });
                }
                let node_outputs = rs.node_outputs.lock().expect("node outputs poisoned").clone();
                Ok(Control::Suspend(Box::new(SuspendUnwind { frames: Vec::new(),
                                                             signal,
                                                             node_id: node.id.clone(),
                                                             tool_id: tool_id.to_string(),
                                                             variables: cx.variables.clone(),
                                                             node_outputs })))
            }
        }
    }

    async fn exec_switch(&self,
                         rs: &Arc<RunState>,
                         node: &IrNode,
                         args: &indexmap::IndexMap<String, ValueRef>,
                         cx: &mut ExecutionContext,
                         resume: Option<ResumeState>)
                         -> Result<Control, FlowError> {
        let outputs = rs.node_outputs.lock().expect("node outputs poisoned").clone();
        let prompt = match args.get("prompt") {
            Some(r) => {
                let v = resolve_ref(&node.id, r, cx, &outputs)?;
                v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())
            }
            None => String::new(),
        };
        let options: Vec<SwitchOption> = match args.get("options") {
            Some(ValueRef::Literal { value }) => serde_json::from_value(value.clone()).map_err(|e| {
                                                    FlowError::Execution { node_id: node.id.clone(),
                                                                           node_kind: "switch".to_string(),
                                                                           message: format!("malformed options: {e}") }
                                                })?,
            _ => Vec::new(),
        };
        let branches: indexmap::IndexMap<String, Vec<String>> = match args.get("branches") {
            Some(ValueRef::Literal { value }) => serde_json::from_value(value.clone()).map_err(|e| {
                                                    FlowError::Execution { node_id: node.id.clone(),
                                                                           node_kind: "switch".to_string(),
                                                                           message: format!("malformed branches: {e}") }
                                                })?,
            _ => indexmap::IndexMap::new(),
        };

        let (chosen, branch_resume): (String, Option<ResumeState>) = match resume {
            Some(r) if !r.frames.is_empty() => {
                let front = r.frames
                             .front()
                             .ok_or_else(|| cursor_err(&node.id, "cursor exhausted at switch"))?;
                if front.node_id != node.id {
                    return Err(cursor_err(&node.id, "cursor frame does not match the switch"));
                }
                let opt = front.chosen
                               .clone()
                               .ok_or_else(|| cursor_err(&node.id, "cursor frame does not name a chosen option"))?;
                (opt, Some(r))
            }
            Some(mut r) => {
                // la elección misma estaba suspendida: el input es el id
                let v = r.input
                         .take()
                         .ok_or_else(|| cursor_err(&node.id, "resume input was already consumed"))?;
                let opt = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                (opt, None)
            }
            None => match self.choice.choose(&prompt, &options).await? {
                ChoiceOutcome::Selected(opt) => (opt, None),
                ChoiceOutcome::Suspend(signal) => {
                    if cx.control.in_parallel() {
                        return Err(FlowError::Execution { node_id: node.id.clone(),
                                                          node_kind: "switch".to_string(),
                                                          message: "suspension inside a parallel branch is not \
                                                                    supported"
                                                                   .to_string() });
                    }
                    let node_outputs = rs.node_outputs.lock().expect("node outputs poisoned").clone();
                    return Ok(Control::Suspend(Box::new(SuspendUnwind { frames: Vec::new(),
                                                                        signal,
                                                                        node_id: node.id.clone(),
                                                                        tool_id: SWITCH_TOOL_ID.to_string(),
                                                                        variables: cx.variables.clone(),
                                                                        node_outputs })));
                }
            },
        };

        let Some(ids) = branches.get(&chosen) else {
            return Err(FlowError::Execution { node_id: node.id.clone(),
                                              node_kind: "switch".to_string(),
                                              message: format!("choice returned unknown option id '{chosen}'") });
        };
        if ids.is_empty() {
            return Ok(Control::Value(Value::String(chosen)));
        }

        let in_flight = branch_resume.is_some();
        if !in_flight {
            cx.variables.push_child();
        }
        let result = self.exec_list(rs, &node.id, Some(chosen.as_str()), ids, Value::Null, cx, branch_resume).await;
        cx.variables.pop();
        result
    }
}
