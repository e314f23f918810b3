//! DS-002: Pipeline file schema and compiled graph types.
//!
//! The pipeline file is plain serde YAML. Layer bodies are kept as raw YAML
//! values here and converted to [`LayerConfig`] by the parser, which is where
//! structural errors are reported with the offending key.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Parameters attached to a single operation.
pub type ParamMap = IndexMap<String, serde_yaml_ng::Value>;

/// Resolved operator arguments, in declaration order.
pub type ArgMap = IndexMap<String, ArgValue>;

// ============================================================================
// Top-level dagsmith.yaml
// ============================================================================

/// Root configuration of one ML pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Pipeline name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Orchestrator DAG settings used by the renderer
    #[serde(default)]
    pub dag: DagSettings,

    /// Transform aliases: alias -> dotted Python path
    #[serde(default)]
    pub transforms: IndexMap<String, String>,

    /// Pipeline stages, in declaration order
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

/// One configured stage of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Stage kind, looked up in the routing table
    pub kind: String,

    /// Sub-concepts appended to the lineage (used in the layer tag)
    #[serde(default)]
    pub concepts: Vec<String>,

    /// Explicit base execution order (defaults to stage position)
    #[serde(default)]
    pub order: Option<u32>,

    /// Repeat parsing once per branch of the preceding layer
    #[serde(default)]
    pub conditional: bool,

    /// Layer bodies; more than one gives each a subrank
    #[serde(default)]
    pub layers: Vec<serde_yaml_ng::Value>,
}

/// Settings for the emitted orchestrator DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagSettings {
    /// DAG id (defaults to the pipeline name)
    #[serde(default)]
    pub dag_id: Option<String>,

    #[serde(default)]
    pub schedule_interval: Option<String>,

    /// Start date as YYYY-MM-DD
    #[serde(default)]
    pub start_date: Option<String>,

    #[serde(default = "default_owner")]
    pub owner: String,

    #[serde(default)]
    pub retries: u32,

    /// Python module providing the operator templates
    #[serde(default = "default_converter_module")]
    pub converter_module: String,
}

impl Default for DagSettings {
    fn default() -> Self {
        Self {
            dag_id: None,
            schedule_interval: None,
            start_date: None,
            owner: default_owner(),
            retries: 0,
            converter_module: default_converter_module(),
        }
    }
}

fn default_owner() -> String {
    "airflow".to_string()
}

fn default_converter_module() -> String {
    "ml_airflow.airflow.op_converter".to_string()
}

// ============================================================================
// Layer configuration tree
// ============================================================================

/// Key of a layer entry: one target, or a tuple of targets sharing one
/// operation mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FamilyKey {
    Single(String),
    Tuple(Vec<String>),
}

impl FamilyKey {
    /// Expand to the individual targets.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Self::Single(s) => vec![s.as_str()],
            Self::Tuple(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

impl fmt::Display for FamilyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(s) => write!(f, "{}", s),
            Self::Tuple(v) => write!(f, "({})", v.join(", ")),
        }
    }
}

/// Ordered operation-name -> parameters. `None` inherits the previous
/// operation's parameters.
pub type OperationMap = IndexMap<String, Option<ParamMap>>;

/// Value of a layer entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    /// YAML null: a target with no operations
    Leaf,
    OperationMap(OperationMap),
}

/// A validated layer body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LayerConfig {
    pub entries: IndexMap<FamilyKey, ConfigValue>,
}

impl LayerConfig {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Operation references and arguments
// ============================================================================

/// A transform known to the registry's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformRef {
    /// Dotted module path, e.g. `ml_airflow.static.feature_engineering`
    pub module: String,
    /// Function name inside the module
    pub name: String,
}

impl TransformRef {
    /// Split a dotted path into module and name.
    pub fn from_path(path: &str) -> Self {
        match path.rsplit_once('.') {
            Some((module, name)) => Self {
                module: module.to_string(),
                name: name.to_string(),
            },
            None => Self {
                module: String::new(),
                name: path.to_string(),
            },
        }
    }

    /// Fully qualified dotted path.
    pub fn path(&self) -> String {
        if self.module.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.module, self.name)
        }
    }
}

/// An operation as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpRef {
    /// Plain string, passed through to the operator by name
    Symbolic(String),
    /// Catalogued callable
    Direct(TransformRef),
}

impl OpRef {
    /// Canonical name used when composing task tags.
    pub fn name(&self) -> &str {
        match self {
            Self::Symbolic(s) => s,
            Self::Direct(t) => &t.name,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Self::Direct(_))
    }
}

/// One resolved operator argument.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ArgValue {
    Transform(OpRef),
    Params(ParamMap),
    /// Identifier of another task (pulled at run time)
    Task(String),
    Tasks(Vec<String>),
    Text(String),
    Flag(bool),
    Null,
}

// ============================================================================
// Compiled graph
// ============================================================================

/// Directed dependency `from >> to`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} >> {}", self.from, self.to)
    }
}

/// A model registered by a modeling stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelRecord {
    pub family: String,
    pub model: String,
    pub fit_task: String,
    pub predict_task: String,
    pub evaluated: bool,
}

/// A holistic merge requested by a layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeRequest {
    pub layer_tag: String,
    pub stage: String,
    pub operation: String,
    pub fulfilled: bool,
}

/// Serializable view of one sublayer (one per branch for a conditional core).
#[derive(Debug, Clone, Serialize)]
pub struct SubLayerDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub order: u32,
    pub head: Vec<String>,
    pub tail: Vec<String>,
    pub families: Vec<super::family::OperatorFamily>,
}

/// Serializable view of one compiled layer.
#[derive(Debug, Clone, Serialize)]
pub struct LayerDescriptor {
    pub tag: String,
    pub stage: String,
    pub lineage: Vec<String>,
    pub exec_order: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditional_mapping: Option<Vec<String>>,
    pub merge_head: String,
    pub sublayers: Vec<SubLayerDescriptor>,
    /// Edges inside this layer: operator chains, then sublayer links
    pub edges: Vec<Edge>,
}

/// Output of a full compilation run.
#[derive(Debug, Clone, Serialize)]
pub struct CompiledGraph {
    pub name: String,
    /// BLAKE3 over the canonical JSON of layers and edges
    pub fingerprint: String,
    pub layers: Vec<LayerDescriptor>,
    /// Edges between consecutive layers
    pub edges: Vec<Edge>,
    pub models: Vec<ModelRecord>,
    pub merge_requests: Vec<MergeRequest>,
}

impl CompiledGraph {
    /// Every task id, in emission order.
    pub fn task_ids(&self) -> Vec<&str> {
        self.layers
            .iter()
            .flat_map(|l| &l.sublayers)
            .flat_map(|s| &s.families)
            .flat_map(|f| &f.operators)
            .map(|o| o.task_id.as_str())
            .collect()
    }

    /// Every family id, in emission order.
    pub fn family_ids(&self) -> Vec<&str> {
        self.layers
            .iter()
            .flat_map(|l| &l.sublayers)
            .flat_map(|s| &s.families)
            .map(|f| f.id.as_str())
            .collect()
    }

    /// Intra-layer edges followed by inter-layer edges.
    pub fn all_edges(&self) -> Vec<&Edge> {
        self.layers
            .iter()
            .flat_map(|l| &l.edges)
            .chain(&self.edges)
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ds002_config_parse() {
        let yaml = r#"
version: "1.0"
name: churn
dag:
  schedule_interval: "@daily"
  owner: ml
transforms:
  scale: mylib.scaling.scale
stages:
  - kind: data_sources
    layers:
      - data/train.csv: { read_csv: ~ }
"#;
        let config: PipelineConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.name, "churn");
        assert_eq!(config.dag.owner, "ml");
        assert_eq!(config.dag.retries, 0);
        assert_eq!(config.stages.len(), 1);
        assert!(!config.stages[0].conditional);
        assert_eq!(config.transforms["scale"], "mylib.scaling.scale");
    }

    #[test]
    fn test_ds002_dag_defaults() {
        let d = DagSettings::default();
        assert_eq!(d.owner, "airflow");
        assert_eq!(d.converter_module, "ml_airflow.airflow.op_converter");
        assert!(d.dag_id.is_none());
    }

    #[test]
    fn test_ds002_family_key_targets() {
        let k = FamilyKey::Tuple(vec!["h".to_string(), "w".to_string()]);
        assert_eq!(k.targets(), vec!["h", "w"]);
        assert_eq!(k.to_string(), "(h, w)");
        assert_eq!(FamilyKey::Single("age".into()).targets(), vec!["age"]);
    }

    #[test]
    fn test_ds002_transform_ref_split() {
        let t = TransformRef::from_path("a.b.normalize_values");
        assert_eq!(t.module, "a.b");
        assert_eq!(t.name, "normalize_values");
        assert_eq!(t.path(), "a.b.normalize_values");
        let bare = TransformRef::from_path("len");
        assert_eq!(bare.module, "");
        assert_eq!(bare.path(), "len");
    }

    #[test]
    fn test_ds002_op_ref_name() {
        assert_eq!(OpRef::Symbolic("normalize".into()).name(), "normalize");
        let d = OpRef::Direct(TransformRef::from_path("m.create_ordinal_df"));
        assert_eq!(d.name(), "create_ordinal_df");
        assert!(d.is_direct());
    }

    #[test]
    fn test_ds002_arg_value_serde() {
        let mut args = ArgMap::new();
        args.insert("column_data_id".into(), ArgValue::Task("age_normalize".into()));
        args.insert("inherits".into(), ArgValue::Flag(true));
        args.insert("model_id".into(), ArgValue::Null);
        let json = serde_json::to_string(&args).unwrap();
        assert_eq!(
            json,
            r#"{"column_data_id":"age_normalize","inherits":true,"model_id":null}"#
        );
    }

    #[test]
    fn test_ds002_edge_display() {
        assert_eq!(Edge::new("a", "b").to_string(), "a >> b");
    }
}
