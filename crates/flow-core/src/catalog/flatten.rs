//! Conversión bidireccional recursiva ↔ plana.
//!
//! Dos pasadas:
//! - `to_flat` recorre en preorden y emite cada step a una lista única,
//!   reescribiendo los atributos de hijos como arrays de ids.
//! - `from_flat` reconstruye los arrays de hijos a través de un resolver
//!   id→step, detectando referencias colgantes y ciclos.
//!
//! Ley requerida: `from_flat(to_flat(w)) ≡ w` (igualdad estructural).

use indexmap::IndexMap;
use std::collections::HashSet;

use crate::errors::FlowError;
use crate::model::{FlatStep, FlatWorkflow, Step, Workflow};

/// Aplana un workflow recursivo a la forma canónica on-the-wire.
pub fn to_flat(w: &Workflow) -> FlatWorkflow {
    let mut steps: Vec<FlatStep> = Vec::new();
    let root_ids = w.steps.iter().map(|s| flatten_step(s, &mut steps)).collect();
    FlatWorkflow { version: w.version.clone(),
                   metadata: w.metadata.clone(),
                   steps,
                   root_ids }
}

fn flatten_list(list: &[Step], out: &mut Vec<FlatStep>) -> Vec<String> {
    list.iter().map(|s| flatten_step(s, out)).collect()
}

fn flatten_step(step: &Step, out: &mut Vec<FlatStep>) -> String {
    let id = step.id().to_string();
    let flat = match step {
        Step::Tool { common, tool_id, args } => FlatStep::Tool { common: common.clone(),
                                                                tool_id: tool_id.clone(),
                                                                args: args.clone() },
        Step::Filter { common, collection, predicate, with } => {
            FlatStep::Filter { common: common.clone(),
                               collection: collection.clone(),
                               predicate: predicate.clone(),
                               with: with.as_ref().map(|s| flatten_step(s, out)) }
        }
        Step::Conditional { common, condition, then_steps, else_steps } => {
            FlatStep::Conditional { common: common.clone(),
                                    condition: condition.clone(),
                                    then_steps: flatten_list(then_steps, out),
                                    else_steps: else_steps.as_ref().map(|e| flatten_list(e, out)) }
        }
        Step::Loop { common, loop_type, collection, condition, iterator_var, accumulator, body } => {
            FlatStep::Loop { common: common.clone(),
                             loop_type: *loop_type,
                             collection: collection.clone(),
                             condition: condition.clone(),
                             iterator_var: iterator_var.clone(),
                             accumulator: accumulator.clone(),
                             body: flatten_list(body, out) }
        }
        Step::Map { common, collection, with } => FlatStep::Map { common: common.clone(),
                                                                 collection: collection.clone(),
                                                                 with: flatten_step(with, out) },
        Step::Reduce { common, collection, initial_value, with } => {
            FlatStep::Reduce { common: common.clone(),
                               collection: collection.clone(),
                               initial_value: initial_value.clone(),
                               with: flatten_step(with, out) }
        }
        Step::Parallel { common, branches, parallel } => {
            FlatStep::Parallel { common: common.clone(),
                                 branches: branches.as_ref()
                                                   .map(|groups| groups.iter().map(|g| flatten_list(g, out)).collect()),
                                 parallel: parallel.as_ref().map(|list| flatten_list(list, out)) }
        }
        Step::Switch { common, discriminator, options, branches } => {
            let mut flat_branches: IndexMap<String, Vec<String>> = IndexMap::new();
            for (opt, list) in branches {
                flat_branches.insert(opt.clone(), flatten_list(list, out));
            }
            FlatStep::Switch { common: common.clone(),
                               discriminator: discriminator.clone(),
                               options: options.clone(),
                               branches: flat_branches }
        }
    };
    out.push(flat);
    id
}

/// Reconstruye la forma recursiva desde la plana.
pub fn from_flat(fw: &FlatWorkflow) -> Result<Workflow, FlowError> {
    let mut index: IndexMap<&str, &FlatStep> = IndexMap::new();
    for s in &fw.steps {
        if index.insert(s.id(), s).is_some() {
            return Err(FlowError::Validation { path: format!("steps.{}", s.id()),
                                               message: "duplicate step id".to_string() });
        }
    }
    let mut in_progress: HashSet<String> = HashSet::new();
    let steps = fw.root_ids
                  .iter()
                  .map(|id| resolve(id, &index, &mut in_progress))
                  .collect::<Result<Vec<_>, _>>()?;
    Ok(Workflow { version: fw.version.clone(),
                  metadata: fw.metadata.clone(),
                  steps })
}

fn resolve_list(ids: &[String],
                index: &IndexMap<&str, &FlatStep>,
                in_progress: &mut HashSet<String>)
                -> Result<Vec<Step>, FlowError> {
    ids.iter().map(|id| resolve(id, index, in_progress)).collect()
}

fn resolve(id: &str,
           index: &IndexMap<&str, &FlatStep>,
           in_progress: &mut HashSet<String>)
           -> Result<Step, FlowError> {
    let flat = *index.get(id).ok_or_else(|| FlowError::Compilation { node_id: Some(id.to_string()),
                                                                     message: "child step id not present in flat list"
                                                                              .to_string() })?;
    if !in_progress.insert(id.to_string()) {
        return Err(FlowError::Compilation { node_id: Some(id.to_string()),
                                            message: "cyclic step reference".to_string() });
    }
    let step = match flat {
        FlatStep::Tool { common, tool_id, args } => Step::Tool { common: common.clone(),
                                                                 tool_id: tool_id.clone(),
                                                                 args: args.clone() },
        FlatStep::Filter { common, collection, predicate, with } => {
            Step::Filter { common: common.clone(),
                           collection: collection.clone(),
                           predicate: predicate.clone(),
                           with: match with {
                               Some(w) => Some(Box::new(resolve(w, index, in_progress)?)),
                               None => None,
                           } }
        }
        FlatStep::Conditional { common, condition, then_steps, else_steps } => {
            Step::Conditional { common: common.clone(),
                                condition: condition.clone(),
                                then_steps: resolve_list(then_steps, index, in_progress)?,
                                else_steps: match else_steps {
                                    Some(e) => Some(resolve_list(e, index, in_progress)?),
                                    None => None,
                                } }
        }
        FlatStep::Loop { common, loop_type, collection, condition, iterator_var, accumulator, body } => {
            Step::Loop { common: common.clone(),
                         loop_type: *loop_type,
                         collection: collection.clone(),
                         condition: condition.clone(),
                         iterator_var: iterator_var.clone(),
                         accumulator: accumulator.clone(),
                         body: resolve_list(body, index, in_progress)? }
        }
        FlatStep::Map { common, collection, with } => Step::Map { common: common.clone(),
                                                                  collection: collection.clone(),
                                                                  with: Box::new(resolve(with, index, in_progress)?) },
        FlatStep::Reduce { common, collection, initial_value, with } => {
            Step::Reduce { common: common.clone(),
                           collection: collection.clone(),
                           initial_value: initial_value.clone(),
                           with: Box::new(resolve(with, index, in_progress)?) }
        }
        FlatStep::Parallel { common, branches, parallel } => {
            Step::Parallel { common: common.clone(),
                             branches: match branches {
                                 Some(groups) => Some(groups.iter()
                                                            .map(|g| resolve_list(g, index, in_progress))
                                                            .collect::<Result<Vec<_>, _>>()?),
                                 None => None,
                             },
                             parallel: match parallel {
                                 Some(list) => Some(resolve_list(list, index, in_progress)?),
                                 None => None,
                             } }
        }
        FlatStep::Switch { common, discriminator, options, branches } => {
            let mut rec: IndexMap<String, Vec<Step>> = IndexMap::new();
            for (opt, ids) in branches {
                rec.insert(opt.clone(), resolve_list(ids, index, in_progress)?);
            }
            Step::Switch { common: common.clone(),
                           discriminator: discriminator.clone(),
                           options: options.clone(),
                           branches: rec }
        }
    };
    in_progress.remove(id);
    Ok(step)
}
