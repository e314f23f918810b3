//! DS-010: Pipeline assembly from stages to an ordered, connected graph.
//!
//! Every stage expands into one layer per configured body (with a subrank when
//! there is more than one). Layers are stable-sorted by execution order and
//! compiled in that order, because a conditional layer takes its branch set
//! from the layer compiled just before it.

use super::error::{CompileError, Result};
use super::fingerprint::fingerprint_graph;
use super::layer::{execution_order, Layer};
use super::parser::parse_layer_config;
use super::registry::Registry;
use super::types::*;
use tracing::{debug, info, warn};

/// A layer placed but not yet compiled.
#[derive(Debug, Clone)]
pub struct LayerPlan {
    pub stage_index: usize,
    pub lineage: Vec<String>,
    pub order: u32,
    pub subrank: Option<u32>,
    pub conditional: bool,
    pub config: LayerConfig,
    pub exec_order: f64,
}

/// Expand stages into layer plans sorted by execution order.
pub fn plan_layers(config: &PipelineConfig) -> Result<Vec<LayerPlan>> {
    let mut plans = Vec::new();

    for (index, stage) in config.stages.iter().enumerate() {
        let order = match stage.order {
            Some(o) => o,
            None => u32::try_from(index)
                .map_err(|_| CompileError::structure(&stage.kind, "too many stages"))?,
        };
        let mut lineage = vec![stage.kind.clone()];
        lineage.extend(stage.concepts.iter().cloned());

        let ranked = stage.layers.len() > 1;
        for (i, raw) in stage.layers.iter().enumerate() {
            let subrank = if ranked {
                Some(
                    u32::try_from(i)
                        .map_err(|_| CompileError::structure(&stage.kind, "too many layers"))?,
                )
            } else {
                None
            };
            plans.push(LayerPlan {
                stage_index: index,
                lineage: lineage.clone(),
                order,
                subrank,
                conditional: stage.conditional,
                config: parse_layer_config(raw)?,
                exec_order: execution_order(order, subrank),
            });
        }
    }

    plans.sort_by(|a, b| a.exec_order.total_cmp(&b.exec_order));
    Ok(plans)
}

/// Compile a pipeline with a registry built from its own transform aliases.
pub fn compile(config: &PipelineConfig) -> Result<CompiledGraph> {
    let mut registry = Registry::from_config(config);
    compile_with(config, &mut registry)
}

/// Compile a pipeline against an existing registry.
pub fn compile_with(config: &PipelineConfig, registry: &mut Registry) -> Result<CompiledGraph> {
    let plans = plan_layers(config)?;
    let mut layers: Vec<Layer> = Vec::with_capacity(plans.len());

    for plan in plans {
        let branches = if plan.conditional {
            Some(upstream_branches(&layers, &plan.lineage[0])?)
        } else {
            None
        };
        let mut layer = Layer::new(
            plan.config,
            plan.lineage,
            plan.order,
            plan.subrank,
            branches,
        )?;
        layer.parse(registry)?;
        debug!(
            layer = %layer.tag,
            stage = plan.stage_index,
            exec_order = layer.exec_order,
            "compiled layer"
        );
        layers.push(layer);
    }

    let edges = layer_edges(&layers);
    let descriptors: Vec<LayerDescriptor> = layers.iter().map(Layer::describe).collect();
    let fingerprint = fingerprint_graph(&descriptors, &edges)?;

    for model in registry.pending_models() {
        warn!(model = %model.fit_task, family = %model.family, "model is never evaluated");
    }
    for request in registry.merge_requests().filter(|r| !r.fulfilled) {
        warn!(layer = %request.layer_tag, stage = %request.stage, "merge request not fulfilled");
    }

    let graph = CompiledGraph {
        name: config.name.clone(),
        fingerprint,
        layers: descriptors,
        edges,
        models: registry.models().cloned().collect(),
        merge_requests: registry.merge_requests().cloned().collect(),
    };
    info!(
        pipeline = %graph.name,
        layers = graph.layers.len(),
        tasks = graph.task_ids().len(),
        edges = graph.all_edges().len(),
        "compiled pipeline"
    );
    Ok(graph)
}

/// Branch names for a conditional layer: the head of the last non-empty layer.
fn upstream_branches(layers: &[Layer], kind: &str) -> Result<Vec<String>> {
    let heads = layers
        .iter()
        .rev()
        .find(|l| !l.is_empty())
        .map(|l| l.refs().head())
        .unwrap_or_default();
    if heads.is_empty() {
        return Err(CompileError::structure(
            kind,
            "conditional stage has no upstream branches",
        ));
    }
    Ok(heads)
}

/// Edges between consecutive non-empty layers.
fn layer_edges(layers: &[Layer]) -> Vec<Edge> {
    let chain: Vec<&Layer> = layers.iter().filter(|l| !l.is_empty()).collect();
    let mut edges = Vec::new();

    for pair in chain.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        let next_refs = next.refs();
        match &next.conditional_mapping {
            Some(branches) => {
                for branch in branches {
                    for to in next_refs.tail(Some(branch)) {
                        edges.push(Edge::new(branch.clone(), to));
                    }
                }
            }
            None => {
                let tail = next_refs.tail(None);
                for from in prev.refs().head() {
                    for to in &tail {
                        edges.push(Edge::new(from.clone(), to.clone()));
                    }
                }
            }
        }
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_config;
    use proptest::prelude::*;
    use std::collections::HashSet;

    const FULL: &str = r#"
version: "1.0"
name: churn
stages:
  - kind: data_sources
    layers:
      - data/train.csv: { read_csv: { sep: "," } }
  - kind: preprocessing
    layers:
      - all: { dropna: ~ }
  - kind: feature_engineering
    concepts: [numeric]
    layers:
      - age: { normalize: ~ }
      - height: { normalize: ~ }
  - kind: splitting
    layers:
      - ? [fold1, fold2]
        : { kfold: { k: 2 } }
  - kind: modeling
    conditional: true
    layers:
      - rf: { random_forest: { n_estimators: 100 } }
  - kind: evaluation
    conditional: true
    layers:
      - auc: { roc_auc: ~ }
"#;

    fn full() -> CompiledGraph {
        compile(&parse_config(FULL).unwrap()).unwrap()
    }

    #[test]
    fn test_ds010_plan_order_and_subranks() {
        let config = parse_config(FULL).unwrap();
        let plans = plan_layers(&config).unwrap();
        let orders: Vec<f64> = plans.iter().map(|p| p.exec_order).collect();
        assert_eq!(orders.len(), 7);
        assert_eq!(plans[2].subrank, Some(0));
        assert_eq!(plans[3].subrank, Some(1));
        assert!((orders[3] - 2.1).abs() < 1e-9);
        assert!(plans[0].subrank.is_none());
    }

    #[test]
    fn test_ds010_explicit_order_stable_sort() {
        let yaml = r#"
version: "1.0"
name: t
stages:
  - kind: preprocessing
    order: 5
    layers:
      - late: { a: ~ }
  - kind: data_sources
    order: 1
    layers:
      - first.csv: { read: ~ }
  - kind: preprocessing
    order: 1
    layers:
      - tie: { b: ~ }
"#;
        let plans = plan_layers(&parse_config(yaml).unwrap()).unwrap();
        let kinds: Vec<usize> = plans.iter().map(|p| p.stage_index).collect();
        assert_eq!(kinds, vec![1, 2, 0]);
    }

    #[test]
    fn test_ds010_full_pipeline_tags() {
        let graph = full();
        let tags: Vec<&str> = graph.layers.iter().map(|l| l.tag.as_str()).collect();
        assert_eq!(
            tags,
            vec!["ds", "p", "fe_numeric_l0", "fe_numeric_l1", "s", "m", "e"]
        );
    }

    #[test]
    fn test_ds010_full_pipeline_edges() {
        let graph = full();
        let edges: Vec<String> = graph.all_edges().iter().map(|e| e.to_string()).collect();
        for expected in [
            "age_normalize >> fe_numeric_l0_merge_layer",
            "height_normalize >> fe_numeric_l1_merge_layer",
            "train_csv_read_csv >> all_dropna",
            "all_dropna >> age_normalize",
            "fe_numeric_l0_merge_layer >> height_normalize",
            "fe_numeric_l1_merge_layer >> fold1_kfold",
            "fe_numeric_l1_merge_layer >> fold2_kfold",
            "fold1_kfold >> fold1_kfold_rf_fit",
            "fold2_kfold >> fold2_kfold_rf_fit",
            "fold1_kfold_rf_predict >> fold1_kfold_rf_predict_auc",
            "fold2_kfold_rf_predict >> fold2_kfold_rf_predict_auc",
            "fold1_kfold_rf_fit >> fold1_kfold_rf_predict",
            "fold2_kfold_rf_fit >> fold2_kfold_rf_predict",
        ] {
            assert!(edges.contains(&expected.to_string()), "missing {}", expected);
        }
        assert_eq!(edges.len(), 13);
    }

    #[test]
    fn test_ds010_conditional_branches_and_models() {
        let graph = full();
        let modeling = &graph.layers[5];
        assert_eq!(
            modeling.conditional_mapping.as_deref(),
            Some(&["fold1_kfold".to_string(), "fold2_kfold".to_string()][..])
        );
        assert_eq!(modeling.sublayers.len(), 2);
        assert_eq!(graph.models.len(), 2);
        assert!(graph.models.iter().all(|m| m.evaluated));
        assert!(graph.merge_requests.iter().all(|r| r.fulfilled));
        assert_eq!(graph.merge_requests.len(), 2);
    }

    #[test]
    fn test_ds010_fingerprint_stable() {
        assert_eq!(full().fingerprint, full().fingerprint);
    }

    #[test]
    fn test_ds010_conditional_without_upstream() {
        let yaml = r#"
version: "1.0"
name: t
stages:
  - kind: modeling
    conditional: true
    layers:
      - rf: { random_forest: ~ }
"#;
        let err = compile(&parse_config(yaml).unwrap()).unwrap_err();
        assert!(matches!(err, CompileError::ConfigurationStructure { ref key, .. } if key == "modeling"));
    }

    #[test]
    fn test_ds010_empty_layers_skipped_in_chain() {
        let yaml = r#"
version: "1.0"
name: t
stages:
  - kind: data_sources
    layers:
      - a.csv: { read: ~ }
  - kind: preprocessing
    layers:
      - nothing: ~
  - kind: preprocessing
    layers:
      - all: { dropna: ~ }
"#;
        let graph = compile(&parse_config(yaml).unwrap()).unwrap();
        assert_eq!(graph.edges, vec![Edge::new("a_csv_read", "all_dropna")]);
    }

    #[test]
    fn test_ds010_conditional_path_keys_per_branch() {
        let yaml = r#"
version: "1.0"
name: t
stages:
  - kind: splitting
    layers:
      - ? [f1, f2]
        : { split: ~ }
  - kind: data_sources
    conditional: true
    layers:
      - data/extra.csv: { read_csv: ~ }
"#;
        let graph = compile(&parse_config(yaml).unwrap()).unwrap();
        assert_eq!(
            graph.edges,
            vec![
                Edge::new("f1_split", "f1_split_extra_csv_read_csv"),
                Edge::new("f2_split", "f2_split_extra_csv_read_csv"),
            ]
        );
    }

    #[test]
    fn test_ds010_operator_order_in_graph() {
        let yaml = r#"
version: "1.0"
name: t
stages:
  - kind: data_sources
    layers:
      - a.csv: { read: ~ }
  - kind: modeling
    layers:
      - rf: { random_forest: ~ }
"#;
        let graph = compile(&parse_config(yaml).unwrap()).unwrap();
        let edges: Vec<String> = graph.all_edges().iter().map(|e| e.to_string()).collect();
        assert_eq!(edges, vec!["rf_fit >> rf_predict", "a_csv_read >> rf_fit"]);
    }

    #[test]
    fn test_ds010_unknown_stage_aborts() {
        let yaml = r#"
version: "1.0"
name: t
stages:
  - kind: eda
    layers:
      - a: { describe: ~ }
"#;
        let err = compile(&parse_config(yaml).unwrap()).unwrap_err();
        assert_eq!(err, CompileError::UnknownStageKind("eda".into()));
    }

    fn feature_config(columns: &[String], ops: &[String], tuple: bool) -> PipelineConfig {
        use serde_yaml_ng::{Mapping, Value};
        let mut op_map = Mapping::new();
        for op in ops {
            op_map.insert(Value::String(op.clone()), Value::Null);
        }
        let mut body = Mapping::new();
        if tuple {
            let key = Value::Sequence(columns.iter().cloned().map(Value::String).collect());
            body.insert(key, Value::Mapping(op_map));
        } else {
            for col in columns {
                body.insert(Value::String(col.clone()), Value::Mapping(op_map.clone()));
            }
        }
        PipelineConfig {
            version: "1.0".into(),
            name: "prop".into(),
            description: None,
            dag: DagSettings::default(),
            transforms: Default::default(),
            stages: vec![StageConfig {
                kind: "feature_engineering".into(),
                concepts: vec![],
                order: None,
                conditional: false,
                layers: vec![Value::Mapping(body)],
            }],
        }
    }

    proptest! {
        #[test]
        fn prop_identifiers_unique(
            columns in prop::collection::btree_set("[a-z]{1,6}", 1..6),
            ops in prop::collection::btree_set("[a-z]{1,5}", 1..4),
        ) {
            let columns: Vec<String> = columns.into_iter().collect();
            let ops: Vec<String> = ops.into_iter().collect();
            let graph = compile(&feature_config(&columns, &ops, false)).unwrap();

            let tasks = graph.task_ids();
            let unique: HashSet<&str> = tasks.iter().copied().collect();
            prop_assert_eq!(unique.len(), tasks.len());
            prop_assert_eq!(tasks.len(), columns.len() * ops.len() + 1);

            let families = graph.family_ids();
            let unique: HashSet<&str> = families.iter().copied().collect();
            prop_assert_eq!(unique.len(), families.len());
        }

        #[test]
        fn prop_tuple_fan_out_matches_separate(
            columns in prop::collection::btree_set("[a-z]{1,6}", 1..5),
            ops in prop::collection::btree_set("[a-z]{1,5}", 1..4),
        ) {
            let columns: Vec<String> = columns.into_iter().collect();
            let ops: Vec<String> = ops.into_iter().collect();
            let tuple = compile(&feature_config(&columns, &ops, true)).unwrap();
            let separate = compile(&feature_config(&columns, &ops, false)).unwrap();
            prop_assert_eq!(tuple.fingerprint, separate.fingerprint);
        }
    }
}
