//! DS-003: Operator routing table and holistic follow-up table.
//!
//! The routing table maps a stage kind to the operator template(s) it emits,
//! the argument shape handed to those templates, and the task-tag rule used
//! to name them. Holistic follow-ups (stages implied by a kind but never
//! written by the user) live in a separate static table.

use super::error::{CompileError, Result};
use super::types::{ArgMap, ArgValue, OpRef, OperationMap, ParamMap};
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

/// Orchestrator-side callable an operator is rendered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OperatorTemplate {
    #[serde(rename = "split_operation")]
    Split,
    #[serde(rename = "read_data_operation")]
    ReadData,
    #[serde(rename = "bulk_data_operation")]
    BulkData,
    #[serde(rename = "evaluation_operation")]
    Evaluation,
    #[serde(rename = "fit_operation")]
    Fit,
    #[serde(rename = "predict_operation")]
    Predict,
    #[serde(rename = "col_data_operation")]
    ColData,
    #[serde(rename = "merge_data_operation")]
    MergeData,
}

impl OperatorTemplate {
    /// Python callable name in the operator converter module.
    pub fn callable(&self) -> &'static str {
        match self {
            Self::Split => "split_operation",
            Self::ReadData => "read_data_operation",
            Self::BulkData => "bulk_data_operation",
            Self::Evaluation => "evaluation_operation",
            Self::Fit => "fit_operation",
            Self::Predict => "predict_operation",
            Self::ColData => "col_data_operation",
            Self::MergeData => "merge_data_operation",
        }
    }
}

impl fmt::Display for OperatorTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.callable())
    }
}

/// Everything a route needs to shape one operation.
#[derive(Debug, Clone, Copy)]
pub struct RouteInput<'a> {
    pub layer_tag: &'a str,
    /// Target name of the family
    pub family: &'a str,
    pub op: &'a OpRef,
    pub params: &'a ParamMap,
    pub inherits: bool,
    pub branch: Option<&'a str>,
    /// Head of the merge-head sublayer (only filled for merge routes)
    pub merge_ids: &'a [String],
}

/// Registry side effect attached to a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteEffect {
    None,
    /// Record the kind's holistic merge request for the owning layer
    RequestMerge,
    /// Record a fitted model pending evaluation
    RegisterModel,
    /// Mark the model behind the active branch as evaluated
    EvaluateModel,
    /// Needs the merge-head sublayer's head as `merge_ids`
    ConsumeMergeHead,
}

/// One routing table entry.
#[derive(Clone)]
pub struct Route {
    /// Templates in emission order; a role suffix disambiguates multi-operator routes
    pub operators: Vec<(Option<&'static str>, OperatorTemplate)>,
    pub args: fn(&RouteInput<'_>) -> ArgMap,
    pub task_tag: fn(&RouteInput<'_>) -> Vec<String>,
    /// Arguments replaced by the preceding operator's task id within one route
    pub xcom_update: &'static [&'static str],
    /// Arguments replaced by the previous operation's task id within one family
    pub inherit_args: &'static [&'static str],
    /// Tag rule already names the branch
    pub tag_includes_branch: bool,
    pub effect: RouteEffect,
}

impl Route {
    fn single(
        template: OperatorTemplate,
        args: fn(&RouteInput<'_>) -> ArgMap,
        task_tag: fn(&RouteInput<'_>) -> Vec<String>,
    ) -> Self {
        Self {
            operators: vec![(None, template)],
            args,
            task_tag,
            xcom_update: &[],
            inherit_args: &[],
            tag_includes_branch: false,
            effect: RouteEffect::None,
        }
    }
}

fn func_params(input: &RouteInput<'_>) -> ArgMap {
    let mut args = ArgMap::new();
    args.insert("func".to_string(), ArgValue::Transform(input.op.clone()));
    args.insert("params".to_string(), ArgValue::Params(input.params.clone()));
    args
}

fn read_data_args(input: &RouteInput<'_>) -> ArgMap {
    let mut args = func_params(input);
    args.insert("filepath".to_string(), ArgValue::Text(input.family.to_string()));
    args
}

fn evaluation_args(input: &RouteInput<'_>) -> ArgMap {
    let mut args = func_params(input);
    let model_id = match input.branch {
        Some(b) => ArgValue::Task(b.to_string()),
        None => ArgValue::Null,
    };
    args.insert("model_id".to_string(), model_id);
    args
}

fn modeling_args(input: &RouteInput<'_>) -> ArgMap {
    let mut args = ArgMap::new();
    args.insert("model".to_string(), ArgValue::Transform(input.op.clone()));
    args.insert("params".to_string(), ArgValue::Params(input.params.clone()));
    args
}

fn column_args(input: &RouteInput<'_>) -> ArgMap {
    let mut args = func_params(input);
    args.insert("inherits".to_string(), ArgValue::Flag(input.inherits));
    args.insert(
        "column_data_id".to_string(),
        ArgValue::Text(input.family.to_string()),
    );
    args
}

fn merge_args(input: &RouteInput<'_>) -> ArgMap {
    let mut args = ArgMap::new();
    args.insert("params".to_string(), ArgValue::Params(input.params.clone()));
    args.insert(
        "merge_ids".to_string(),
        ArgValue::Tasks(input.merge_ids.to_vec()),
    );
    args
}

fn family_op_tag(input: &RouteInput<'_>) -> Vec<String> {
    vec![input.family.to_string(), input.op.name().to_string()]
}

fn branch_family_tag(input: &RouteInput<'_>) -> Vec<String> {
    input
        .branch
        .into_iter()
        .chain(std::iter::once(input.family))
        .map(str::to_string)
        .collect()
}

fn family_tag(input: &RouteInput<'_>) -> Vec<String> {
    vec![input.family.to_string()]
}

fn merge_tag(input: &RouteInput<'_>) -> Vec<String> {
    vec![input.layer_tag.to_string(), "merge_layer".to_string()]
}

/// Stage kind -> route.
#[derive(Clone)]
pub struct Router {
    routes: IndexMap<String, Route>,
}

impl Default for Router {
    fn default() -> Self {
        Self::standard()
    }
}

impl Router {
    /// Empty table.
    pub fn empty() -> Self {
        Self {
            routes: IndexMap::new(),
        }
    }

    /// The built-in ML pipeline stages.
    pub fn standard() -> Self {
        let mut router = Self::empty();
        router.register(
            "splitting",
            Route::single(OperatorTemplate::Split, func_params, family_op_tag),
        );
        router.register(
            "data_sources",
            Route::single(OperatorTemplate::ReadData, read_data_args, family_op_tag),
        );
        router.register(
            "preprocessing",
            Route::single(OperatorTemplate::BulkData, func_params, family_op_tag),
        );
        router.register(
            "evaluation",
            Route {
                tag_includes_branch: true,
                effect: RouteEffect::EvaluateModel,
                ..Route::single(OperatorTemplate::Evaluation, evaluation_args, branch_family_tag)
            },
        );
        router.register(
            "modeling",
            Route {
                operators: vec![
                    (Some("fit"), OperatorTemplate::Fit),
                    (Some("predict"), OperatorTemplate::Predict),
                ],
                args: modeling_args,
                task_tag: family_tag,
                xcom_update: &["model"],
                inherit_args: &[],
                tag_includes_branch: false,
                effect: RouteEffect::RegisterModel,
            },
        );
        router.register(
            "feature_engineering",
            Route {
                inherit_args: &["column_data_id"],
                effect: RouteEffect::RequestMerge,
                ..Route::single(OperatorTemplate::ColData, column_args, family_op_tag)
            },
        );
        router.register(
            "merge_layer",
            Route {
                effect: RouteEffect::ConsumeMergeHead,
                ..Route::single(OperatorTemplate::MergeData, merge_args, merge_tag)
            },
        );
        router
    }

    /// Add or replace a route.
    pub fn register(&mut self, kind: &str, route: Route) {
        self.routes.insert(kind.to_string(), route);
    }

    /// Look up a stage kind.
    pub fn route(&self, kind: &str) -> Result<&Route> {
        self.routes
            .get(kind)
            .ok_or_else(|| CompileError::UnknownStageKind(kind.to_string()))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.routes.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}

// ============================================================================
// Holistic follow-ups
// ============================================================================

/// A stage implied by another stage kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HolisticRule {
    /// Stage kind that triggers the follow-up
    pub trigger: &'static str,
    /// Follow-up stage kind (also its sublayer and family name)
    pub stage: &'static str,
    /// Operation run by the follow-up
    pub operation: &'static str,
    /// Parameter carrying the triggering layer's tag
    pub key_param: &'static str,
}

/// Feature engineering runs per column; the columns are merged back afterwards.
pub const HOLISTIC_RULES: &[HolisticRule] = &[HolisticRule {
    trigger: "feature_engineering",
    stage: "merge_layer",
    operation: "merge_cols",
    key_param: "merge_key",
}];

/// Rules triggered by a stage kind.
pub fn holistic_rules(kind: &str) -> impl Iterator<Item = &'static HolisticRule> + '_ {
    HOLISTIC_RULES.iter().filter(move |r| r.trigger == kind)
}

/// Holistic configuration for a layer: follow-up stage -> operation map.
/// `None` when the kind triggers nothing.
pub fn holistic_spec(kind: &str, layer_tag: &str) -> Option<IndexMap<String, OperationMap>> {
    let mut spec: IndexMap<String, OperationMap> = IndexMap::new();
    for rule in holistic_rules(kind) {
        let mut params = ParamMap::new();
        params.insert(
            rule.key_param.to_string(),
            serde_yaml_ng::Value::String(layer_tag.to_string()),
        );
        spec.entry(rule.stage.to_string())
            .or_default()
            .insert(rule.operation.to_string(), Some(params));
    }
    if spec.is_empty() {
        None
    } else {
        Some(spec)
    }
}
