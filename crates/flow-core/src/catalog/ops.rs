//! Operadores estándar y sus reglas de rebaje.
//!
//! Reglas clave (se reflejan en los tests de compilación):
//! - `tool`: args traducidos por la gramática de referencias; con registro
//!   presente, un `toolId` inexistente corta el rebaje.
//! - `conditional`: ramas como arrays de ids; else ausente queda `None`.
//! - `loop`: for/map/reduce fijan `collection` + iterador (default "item");
//!   reduce arrastra el acumulador como literal y rebindea `acc` por
//!   iteración; while fija `condition`. `max_iterations` siempre presente.
//! - `parallel`: siempre lista-de-listas con join `all`; la forma plana
//!   produce una rama por step.
//! - `switch`: nodo tool marcado (`__builtin_switch`) cuyos args llevan el
//!   prompt discriminador, las opciones y el mapa opción→ids de rama; el
//!   despacho lo hace el intérprete.

use indexmap::IndexMap;
use serde_json::json;

use super::{Operator, OperatorCatalog};
use crate::constants::{DEFAULT_ITERATOR_VAR, DEFAULT_MAX_ITERATIONS, SWITCH_TOOL_ID};
use crate::errors::FlowError;
use crate::ir::{IrBuilder, IrLoopType, IrNode, IrNodeKind, JoinStrategy};
use crate::model::{LoopType, Step, StepCommon, ValueRef};

fn invalid(step_id: &str, message: impl Into<String>) -> FlowError {
    FlowError::Validation { path: format!("steps.{step_id}"),
                            message: message.into() }
}

fn wrong_kind(op: &'static str, step: &Step) -> FlowError {
    FlowError::Compilation { node_id: Some(step.id().to_string()),
                             message: format!("operator '{op}' received step of kind '{}'", step.kind_name()) }
}

fn apply_common(node: &mut IrNode, common: &StepCommon) {
    node.output = common.output.clone();
    node.timeout_ms = common.timeout_ms;
    node.retry = common.retry;
    node.description = common.description.clone();
}

fn require_id(common: &StepCommon) -> Result<(), FlowError> {
    if common.id.trim().is_empty() {
        return Err(FlowError::Validation { path: "steps".to_string(),
                                           message: "step id must be non-empty".to_string() });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// tool
// ---------------------------------------------------------------------------

pub struct ToolOp;

impl Operator for ToolOp {
    fn kind(&self) -> &'static str {
        "tool"
    }

    fn validate(&self, step: &Step) -> Result<(), FlowError> {
        let Step::Tool { common, tool_id, .. } = step else {
            return Err(wrong_kind("tool", step));
        };
        require_id(common)?;
        if tool_id.trim().is_empty() {
            return Err(invalid(step.id(), "toolId must be non-empty"));
        }
        Ok(())
    }

    fn lower(&self, step: &Step, b: &mut IrBuilder, _catalog: &OperatorCatalog) -> Result<String, FlowError> {
        let Step::Tool { common, tool_id, args } = step else {
            return Err(wrong_kind("tool", step));
        };
        if b.validate_connections {
            if let Some(reg) = b.registry() {
                if !reg.contains(tool_id) {
                    return Err(FlowError::Tool { tool_id: tool_id.clone(),
                                                 message: "tool not found in registry".to_string(),
                                                 cause: None });
                }
            }
        }
        let lowered: IndexMap<String, ValueRef> =
            args.iter().map(|(k, v)| (k.clone(), ValueRef::from_value(v))).collect();
        let mut node = IrNode::new(common.id.clone(),
                                   IrNodeKind::Tool { tool_id: tool_id.clone(),
                                                      args: lowered });
        apply_common(&mut node, common);
        b.add_node(node)?;
        Ok(common.id.clone())
    }
}

// ---------------------------------------------------------------------------
// conditional
// ---------------------------------------------------------------------------

pub struct ConditionalOp;

impl Operator for ConditionalOp {
    fn kind(&self) -> &'static str {
        "conditional"
    }

    fn validate(&self, step: &Step) -> Result<(), FlowError> {
        let Step::Conditional { common, condition, .. } = step else {
            return Err(wrong_kind("conditional", step));
        };
        require_id(common)?;
        if condition.trim().is_empty() {
            return Err(invalid(step.id(), "condition must be non-empty"));
        }
        Ok(())
    }

    fn lower(&self, step: &Step, b: &mut IrBuilder, catalog: &OperatorCatalog) -> Result<String, FlowError> {
        let Step::Conditional { common, condition, then_steps, else_steps } = step else {
            return Err(wrong_kind("conditional", step));
        };
        let then_branch = catalog.lower_list(then_steps, b)?;
        let else_branch = match else_steps {
            Some(e) => Some(catalog.lower_list(e, b)?),
            None => None, // ausente ≠ vacío
        };
        if let Some(first) = then_branch.first() {
            b.add_edge(common.id.clone(), first.clone(), Some("then".to_string()));
        }
        if let Some(first) = else_branch.as_ref().and_then(|e| e.first()) {
            b.add_edge(common.id.clone(), first.clone(), Some("else".to_string()));
        }
        let mut node = IrNode::new(common.id.clone(),
                                   IrNodeKind::Conditional { condition: condition.clone(),
                                                             then_branch,
                                                             else_branch });
        apply_common(&mut node, common);
        b.add_node(node)?;
        Ok(common.id.clone())
    }
}

// ---------------------------------------------------------------------------
// loop (for | while | map | reduce)
// ---------------------------------------------------------------------------

pub struct LoopOp;

impl Operator for LoopOp {
    fn kind(&self) -> &'static str {
        "loop"
    }

    fn validate(&self, step: &Step) -> Result<(), FlowError> {
        let Step::Loop { common, loop_type, collection, condition, body, .. } = step else {
            return Err(wrong_kind("loop", step));
        };
        require_id(common)?;
        match loop_type {
            LoopType::While => {
                if condition.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    return Err(invalid(step.id(), "while loop requires a condition"));
                }
            }
            LoopType::For | LoopType::Map | LoopType::Reduce => {
                if collection.is_none() {
                    return Err(invalid(step.id(), "loop requires a collection"));
                }
            }
        }
        if body.is_empty() {
            return Err(invalid(step.id(), "loop body must not be empty"));
        }
        Ok(())
    }

    fn lower(&self, step: &Step, b: &mut IrBuilder, catalog: &OperatorCatalog) -> Result<String, FlowError> {
        let Step::Loop { common, loop_type, collection, condition, iterator_var, accumulator, body } = step else {
            return Err(wrong_kind("loop", step));
        };
        let body_ids = catalog.lower_list(body, b)?;
        if let Some(first) = body_ids.first() {
            b.add_edge(common.id.clone(), first.clone(), None);
        }
        let ir_type = match loop_type {
            LoopType::For => IrLoopType::For,
            LoopType::While => IrLoopType::While,
            LoopType::Map => IrLoopType::Map,
            LoopType::Reduce => IrLoopType::Reduce,
        };
        let mut node =
            IrNode::new(common.id.clone(),
                        IrNodeKind::Loop { loop_type: ir_type,
                                           collection: collection.as_ref().map(ValueRef::from_value),
                                           condition: condition.clone(),
                                           predicate: None,
                                           iterator_var: iterator_var.clone()
                                                                     .unwrap_or_else(|| DEFAULT_ITERATOR_VAR.to_string()),
                                           accumulator: accumulator.clone(),
                                           body: body_ids,
                                           max_iterations: DEFAULT_MAX_ITERATIONS });
        apply_common(&mut node, common);
        b.add_node(node)?;
        Ok(common.id.clone())
    }
}

// ---------------------------------------------------------------------------
// map / reduce / filter (operadores funcionales sobre colecciones)
// ---------------------------------------------------------------------------

pub struct MapOp;

impl Operator for MapOp {
    fn kind(&self) -> &'static str {
        "map"
    }

    fn validate(&self, step: &Step) -> Result<(), FlowError> {
        let Step::Map { common, collection, .. } = step else {
            return Err(wrong_kind("map", step));
        };
        require_id(common)?;
        if collection.is_null() {
            return Err(invalid(step.id(), "map requires a collection"));
        }
        Ok(())
    }

    fn lower(&self, step: &Step, b: &mut IrBuilder, catalog: &OperatorCatalog) -> Result<String, FlowError> {
        let Step::Map { common, collection, with } = step else {
            return Err(wrong_kind("map", step));
        };
        let body_id = catalog.lower_step(with, b)?;
        b.add_edge(common.id.clone(), body_id.clone(), None);
        let mut node = IrNode::new(common.id.clone(),
                                   IrNodeKind::Loop { loop_type: IrLoopType::Map,
                                                      collection: Some(ValueRef::from_value(collection)),
                                                      condition: None,
                                                      predicate: None,
                                                      iterator_var: DEFAULT_ITERATOR_VAR.to_string(),
                                                      accumulator: None,
                                                      body: vec![body_id],
                                                      max_iterations: DEFAULT_MAX_ITERATIONS });
        apply_common(&mut node, common);
        b.add_node(node)?;
        Ok(common.id.clone())
    }
}

pub struct ReduceOp;

impl Operator for ReduceOp {
    fn kind(&self) -> &'static str {
        "reduce"
    }

    fn validate(&self, step: &Step) -> Result<(), FlowError> {
        let Step::Reduce { common, collection, .. } = step else {
            return Err(wrong_kind("reduce", step));
        };
        require_id(common)?;
        if collection.is_null() {
            return Err(invalid(step.id(), "reduce requires a collection"));
        }
        Ok(())
    }

    fn lower(&self, step: &Step, b: &mut IrBuilder, catalog: &OperatorCatalog) -> Result<String, FlowError> {
        let Step::Reduce { common, collection, initial_value, with } = step else {
            return Err(wrong_kind("reduce", step));
        };
        let body_id = catalog.lower_step(with, b)?;
        b.add_edge(common.id.clone(), body_id.clone(), None);
        let mut node = IrNode::new(common.id.clone(),
                                   IrNodeKind::Loop { loop_type: IrLoopType::Reduce,
                                                      collection: Some(ValueRef::from_value(collection)),
                                                      condition: None,
                                                      predicate: None,
                                                      iterator_var: DEFAULT_ITERATOR_VAR.to_string(),
                                                      // el acumulador viaja como literal IR y se
                                                      // rebindea como `acc` en cada iteración
                                                      accumulator: Some(initial_value.clone()),
                                                      body: vec![body_id],
                                                      max_iterations: DEFAULT_MAX_ITERATIONS });
        apply_common(&mut node, common);
        b.add_node(node)?;
        Ok(common.id.clone())
    }
}

pub struct FilterOp;

impl Operator for FilterOp {
    fn kind(&self) -> &'static str {
        "filter"
    }

    fn validate(&self, step: &Step) -> Result<(), FlowError> {
        let Step::Filter { common, collection, predicate, with } = step else {
            return Err(wrong_kind("filter", step));
        };
        require_id(common)?;
        if collection.is_null() {
            return Err(invalid(step.id(), "filter requires a collection"));
        }
        if predicate.is_none() && with.is_none() {
            return Err(invalid(step.id(), "filter requires a predicate expression or a nested step"));
        }
        Ok(())
    }

    fn lower(&self, step: &Step, b: &mut IrBuilder, catalog: &OperatorCatalog) -> Result<String, FlowError> {
        let Step::Filter { common, collection, predicate, with } = step else {
            return Err(wrong_kind("filter", step));
        };
        let body = match with {
            Some(w) => {
                let id = catalog.lower_step(w, b)?;
                b.add_edge(common.id.clone(), id.clone(), None);
                vec![id]
            }
            None => vec![],
        };
        let mut node = IrNode::new(common.id.clone(),
                                   IrNodeKind::Loop { loop_type: IrLoopType::Filter,
                                                      collection: Some(ValueRef::from_value(collection)),
                                                      condition: None,
                                                      predicate: predicate.clone(),
                                                      iterator_var: DEFAULT_ITERATOR_VAR.to_string(),
                                                      accumulator: None,
                                                      body,
                                                      max_iterations: DEFAULT_MAX_ITERATIONS });
        apply_common(&mut node, common);
        b.add_node(node)?;
        Ok(common.id.clone())
    }
}

// ---------------------------------------------------------------------------
// parallel
// ---------------------------------------------------------------------------

pub struct ParallelOp;

impl Operator for ParallelOp {
    fn kind(&self) -> &'static str {
        "parallel"
    }

    fn validate(&self, step: &Step) -> Result<(), FlowError> {
        let Step::Parallel { common, branches, parallel } = step else {
            return Err(wrong_kind("parallel", step));
        };
        require_id(common)?;
        match (branches, parallel) {
            (None, None) => Err(invalid(step.id(), "parallel requires 'branches' or 'parallel'")),
            (Some(_), Some(_)) => Err(invalid(step.id(), "parallel accepts 'branches' or 'parallel', not both")),
            _ => Ok(()),
        }
    }

    fn lower(&self, step: &Step, b: &mut IrBuilder, catalog: &OperatorCatalog) -> Result<String, FlowError> {
        let Step::Parallel { common, branches, parallel } = step else {
            return Err(wrong_kind("parallel", step));
        };
        let mut groups: Vec<Vec<String>> = Vec::new();
        if let Some(explicit) = branches {
            for g in explicit {
                groups.push(catalog.lower_list(g, b)?);
            }
        } else if let Some(flat) = parallel {
            // forma plana: una rama por step
            for s in flat {
                groups.push(vec![catalog.lower_step(s, b)?]);
            }
        }
        for g in &groups {
            if let Some(first) = g.first() {
                b.add_edge(common.id.clone(), first.clone(), None);
            }
        }
        let mut node = IrNode::new(common.id.clone(),
                                   IrNodeKind::Parallel { branches: groups,
                                                          join: JoinStrategy::All });
        apply_common(&mut node, common);
        b.add_node(node)?;
        Ok(common.id.clone())
    }
}

// ---------------------------------------------------------------------------
// switch
// ---------------------------------------------------------------------------

pub struct SwitchOp;

impl Operator for SwitchOp {
    fn kind(&self) -> &'static str {
        "switch"
    }

    fn validate(&self, step: &Step) -> Result<(), FlowError> {
        let Step::Switch { common, discriminator, options, branches } = step else {
            return Err(wrong_kind("switch", step));
        };
        require_id(common)?;
        if discriminator.trim().is_empty() {
            return Err(invalid(step.id(), "switch requires a discriminator expression"));
        }
        if options.is_empty() {
            return Err(invalid(step.id(), "switch requires at least one option"));
        }
        for key in branches.keys() {
            if !options.iter().any(|o| &o.id == key) {
                return Err(invalid(step.id(), format!("branch '{key}' does not match any option id")));
            }
        }
        Ok(())
    }

    fn lower(&self, step: &Step, b: &mut IrBuilder, catalog: &OperatorCatalog) -> Result<String, FlowError> {
        let Step::Switch { common, discriminator, options, branches } = step else {
            return Err(wrong_kind("switch", step));
        };
        let mut branch_ids: IndexMap<String, Vec<String>> = IndexMap::new();
        for (opt, steps) in branches {
            let ids = catalog.lower_list(steps, b)?;
            if let Some(first) = ids.first() {
                b.add_edge(common.id.clone(), first.clone(), Some(opt.clone()));
            }
            branch_ids.insert(opt.clone(), ids);
        }

        // nodo tool marcado: el intérprete intercepta el id reservado y
        // despacha la rama que devuelva el servicio de choice
        let mut args: IndexMap<String, ValueRef> = IndexMap::new();
        args.insert("prompt".to_string(), ValueRef::Literal { value: json!(discriminator) });
        args.insert("options".to_string(),
                    ValueRef::Literal { value: serde_json::to_value(options).unwrap_or_default() });
        args.insert("branches".to_string(),
                    ValueRef::Literal { value: serde_json::to_value(&branch_ids).unwrap_or_default() });

        let mut node = IrNode::new(common.id.clone(),
                                   IrNodeKind::Tool { tool_id: SWITCH_TOOL_ID.to_string(),
                                                      args });
        apply_common(&mut node, common);
        b.add_node(node)?;
        Ok(common.id.clone())
    }
}
