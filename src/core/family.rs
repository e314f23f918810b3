//! DS-004: Operators and operator families.
//!
//! An operator family is the chain of operators acting on one target. The
//! order of `operators` is execution order; each operator after the first
//! consumes the output of its predecessor.

use super::router::OperatorTemplate;
use super::types::{ArgMap, ArgValue, Edge};
use serde::Serialize;

/// One executable step. Arguments are captured at creation and never change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operator {
    pub task_id: String,
    pub template: OperatorTemplate,
    args: ArgMap,
}

impl Operator {
    pub fn new(task_id: String, template: OperatorTemplate, args: ArgMap) -> Self {
        Self {
            task_id,
            template,
            args,
        }
    }

    pub fn args(&self) -> &ArgMap {
        &self.args
    }

    pub fn arg(&self, name: &str) -> Option<&ArgValue> {
        self.args.get(name)
    }
}

/// Ordered chain of operators for one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorFamily {
    pub id: String,
    pub target: String,
    pub operators: Vec<Operator>,
}

impl OperatorFamily {
    pub fn new(id: String, target: &str, operators: Vec<Operator>) -> Self {
        Self {
            id,
            target: target.to_string(),
            operators,
        }
    }

    /// First task id (upstream end).
    pub fn first_task(&self) -> Option<&str> {
        self.operators.first().map(|o| o.task_id.as_str())
    }

    /// Last task id (downstream end).
    pub fn last_task(&self) -> Option<&str> {
        self.operators.last().map(|o| o.task_id.as_str())
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.operators.iter().map(|o| o.task_id.as_str())
    }

    /// `op[i] >> op[i+1]` for every consecutive pair.
    pub fn chain_edges(&self) -> Vec<Edge> {
        self.operators
            .windows(2)
            .map(|pair| Edge::new(pair[0].task_id.clone(), pair[1].task_id.clone()))
            .collect()
    }
}
