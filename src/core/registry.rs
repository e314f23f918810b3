//! DS-005: Compilation registry, the context threaded through every layer.
//!
//! Holds the identifier sets that guarantee uniqueness across a whole
//! compilation run, the routing table, the transform catalog, and the
//! records of models and holistic merges produced along the way.

use super::error::{CompileError, IdentifierKind, Result};
use super::router::{HolisticRule, Router};
use super::types::{MergeRequest, ModelRecord, OpRef, PipelineConfig, TransformRef};
use indexmap::{IndexMap, IndexSet};
use tracing::debug;

/// Module holding the stock column transforms.
pub const BUILTIN_TRANSFORM_MODULE: &str = "ml_airflow.static.feature_engineering";

const BUILTIN_TRANSFORMS: &[&str] = &[
    "normalize_values",
    "wmp_get_dummies",
    "wmp_linear_transformation",
    "convert_boolean_df",
    "create_ordinal_df",
];

/// Keep the last `/` segment and replace `.` with `_`.
pub fn sanitize(name: &str) -> String {
    name.rsplit('/').next().unwrap_or(name).replace('.', "_")
}

/// Known callables, addressable by alias or by full dotted path.
#[derive(Debug, Clone, Default)]
pub struct TransformCatalog {
    entries: IndexMap<String, TransformRef>,
}

impl TransformCatalog {
    /// Catalog holding the stock feature-engineering helpers.
    pub fn builtin() -> Self {
        let mut catalog = Self::default();
        for name in BUILTIN_TRANSFORMS {
            catalog.insert(name, &format!("{}.{}", BUILTIN_TRANSFORM_MODULE, name));
        }
        catalog
    }

    pub fn insert(&mut self, alias: &str, path: &str) {
        self.entries
            .insert(alias.to_string(), TransformRef::from_path(path));
    }

    pub fn get(&self, key: &str) -> Option<&TransformRef> {
        self.entries
            .get(key)
            .or_else(|| self.entries.values().find(|t| t.path() == key))
    }

    /// Whether an operation key names a callable rather than a plain string.
    pub fn is_callable(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Resolve an operation key once, at parse time.
    pub fn resolve(&self, key: &str) -> OpRef {
        match self.get(key) {
            Some(t) => OpRef::Direct(t.clone()),
            None => OpRef::Symbolic(key.to_string()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Process-wide state for one compilation run.
#[derive(Clone)]
pub struct Registry {
    tasks: IndexSet<String>,
    families: IndexSet<String>,
    router: Router,
    catalog: TransformCatalog,
    models: IndexMap<String, ModelRecord>,
    merge_requests: IndexMap<String, MergeRequest>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(Router::standard(), TransformCatalog::builtin())
    }
}

impl Registry {
    pub fn new(router: Router, catalog: TransformCatalog) -> Self {
        Self {
            tasks: IndexSet::new(),
            families: IndexSet::new(),
            router,
            catalog,
            models: IndexMap::new(),
            merge_requests: IndexMap::new(),
        }
    }

    /// Standard routes plus the builtin catalog extended by the config's aliases.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut catalog = TransformCatalog::builtin();
        for (alias, path) in &config.transforms {
            catalog.insert(alias, path);
        }
        Self::new(Router::standard(), catalog)
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    pub fn catalog(&self) -> &TransformCatalog {
        &self.catalog
    }

    pub fn resolve_op(&self, key: &str) -> OpRef {
        self.catalog.resolve(key)
    }

    // -- identifiers --

    /// Sanitize each tag component, join them into a task id and reserve it.
    pub fn allocate_task_id(&mut self, components: &[String]) -> Result<String> {
        let parts: Vec<String> = components.iter().map(|c| sanitize(c)).collect();
        let task_id = parts.join("_");
        if self.tasks.contains(&task_id) {
            return Err(CompileError::DuplicateIdentifier {
                kind: IdentifierKind::Task,
                id: task_id,
            });
        }
        debug!(task_id = %task_id, "allocated task id");
        self.tasks.insert(task_id.clone());
        Ok(task_id)
    }

    /// Reserve a family id across the whole run.
    pub fn register_family(&mut self, family_id: &str) -> Result<()> {
        if !self.families.insert(family_id.to_string()) {
            return Err(CompileError::DuplicateIdentifier {
                kind: IdentifierKind::Family,
                id: family_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn has_task(&self, task_id: &str) -> bool {
        self.tasks.contains(task_id)
    }

    pub fn has_family(&self, family_id: &str) -> bool {
        self.families.contains(family_id)
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(String::as_str)
    }

    pub fn family_ids(&self) -> impl Iterator<Item = &str> {
        self.families.iter().map(String::as_str)
    }

    // -- models --

    pub fn register_model(&mut self, family: &str, model: &OpRef, fit_task: &str, predict_task: &str) {
        self.models.insert(
            fit_task.to_string(),
            ModelRecord {
                family: family.to_string(),
                model: model.name().to_string(),
                fit_task: fit_task.to_string(),
                predict_task: predict_task.to_string(),
                evaluated: false,
            },
        );
    }

    /// Mark the model whose predict task is `predict_task` as evaluated.
    pub fn mark_evaluated(&mut self, predict_task: &str) -> bool {
        match self
            .models
            .values_mut()
            .find(|m| m.predict_task == predict_task)
        {
            Some(m) => {
                m.evaluated = true;
                true
            }
            None => false,
        }
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelRecord> {
        self.models.values()
    }

    pub fn pending_models(&self) -> impl Iterator<Item = &ModelRecord> {
        self.models.values().filter(|m| !m.evaluated)
    }

    // -- holistic merges --

    /// Record that `layer_tag` needs the follow-up described by `rule`.
    pub fn request_merge(&mut self, layer_tag: &str, rule: &HolisticRule) {
        self.merge_requests
            .entry(layer_tag.to_string())
            .or_insert_with(|| MergeRequest {
                layer_tag: layer_tag.to_string(),
                stage: rule.stage.to_string(),
                operation: rule.operation.to_string(),
                fulfilled: false,
            });
    }

    pub fn fulfil_merge(&mut self, layer_tag: &str, stage: &str) {
        if let Some(req) = self.merge_requests.get_mut(layer_tag) {
            if req.stage == stage {
                req.fulfilled = true;
            }
        }
    }

    pub fn merge_request(&self, layer_tag: &str) -> Option<&MergeRequest> {
        self.merge_requests.get(layer_tag)
    }

    pub fn merge_requests(&self) -> impl Iterator<Item = &MergeRequest> {
        self.merge_requests.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::router::HOLISTIC_RULES;

    fn strings(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_ds005_sanitize() {
        assert_eq!(sanitize("data/raw/train.csv"), "train_csv");
        assert_eq!(sanitize("age"), "age");
        assert_eq!(sanitize("a.b.c"), "a_b_c");
    }

    #[test]
    fn test_ds005_task_id_join_and_sanitize() {
        let mut reg = Registry::default();
        let id = reg
            .allocate_task_id(&strings(&["data/train.csv", "read_csv"]))
            .unwrap();
        assert_eq!(id, "train_csv_read_csv");
        assert!(reg.has_task("train_csv_read_csv"));
    }

    #[test]
    fn test_ds005_task_id_keeps_branch_before_path() {
        let mut reg = Registry::default();
        let a = reg
            .allocate_task_id(&strings(&["f1", "data/extra.csv", "read_csv"]))
            .unwrap();
        let b = reg
            .allocate_task_id(&strings(&["f2", "data/extra.csv", "read_csv"]))
            .unwrap();
        assert_eq!(a, "f1_extra_csv_read_csv");
        assert_eq!(b, "f2_extra_csv_read_csv");
    }

    #[test]
    fn test_ds005_task_id_duplicate() {
        let mut reg = Registry::default();
        reg.allocate_task_id(&strings(&["age", "normalize"])).unwrap();
        let err = reg
            .allocate_task_id(&strings(&["age", "normalize"]))
            .unwrap_err();
        assert_eq!(
            err,
            CompileError::DuplicateIdentifier {
                kind: IdentifierKind::Task,
                id: "age_normalize".into()
            }
        );
        assert_eq!(reg.task_ids().count(), 1);
    }

    #[test]
    fn test_ds005_family_duplicate() {
        let mut reg = Registry::default();
        reg.register_family("fe_age").unwrap();
        assert!(reg.register_family("fe_age").is_err());
        assert!(reg.has_family("fe_age"));
        assert_eq!(reg.family_ids().collect::<Vec<_>>(), vec!["fe_age"]);
    }

    #[test]
    fn test_ds005_catalog_builtin() {
        let cat = TransformCatalog::builtin();
        assert_eq!(cat.len(), 5);
        assert!(cat.is_callable("normalize_values"));
        assert!(cat.is_callable("ml_airflow.static.feature_engineering.create_ordinal_df"));
        assert!(!cat.is_callable("normalize"));
    }

    #[test]
    fn test_ds005_resolve_op() {
        let mut reg = Registry::default();
        assert_eq!(reg.resolve_op("normalize"), OpRef::Symbolic("normalize".into()));
        assert!(reg.resolve_op("wmp_get_dummies").is_direct());
        reg.catalog.insert("scale", "mylib.scale_cols");
        match reg.resolve_op("scale") {
            OpRef::Direct(t) => {
                assert_eq!(t.module, "mylib");
                assert_eq!(t.name, "scale_cols");
            }
            other => panic!("expected direct, got {:?}", other),
        }
    }

    #[test]
    fn test_ds005_from_config_aliases() {
        let yaml = r#"
version: "1.0"
name: t
transforms:
  rf: sklearn.ensemble.RandomForestClassifier
"#;
        let config: PipelineConfig = serde_yaml_ng::from_str(yaml).unwrap();
        let reg = Registry::from_config(&config);
        assert!(reg.catalog().is_callable("rf"));
        assert_eq!(reg.resolve_op("rf").name(), "RandomForestClassifier");
    }

    #[test]
    fn test_ds005_models_pending_and_evaluated() {
        let mut reg = Registry::default();
        let model = OpRef::Symbolic("random_forest".into());
        reg.register_model("rf", &model, "rf_fit", "rf_predict");
        assert_eq!(reg.pending_models().count(), 1);
        assert!(reg.mark_evaluated("rf_predict"));
        assert!(!reg.mark_evaluated("nope"));
        assert_eq!(reg.pending_models().count(), 0);
        assert_eq!(reg.models().next().unwrap().model, "random_forest");
    }

    #[test]
    fn test_ds005_merge_request_lifecycle() {
        let mut reg = Registry::default();
        reg.request_merge("fe", &HOLISTIC_RULES[0]);
        reg.request_merge("fe", &HOLISTIC_RULES[0]);
        assert_eq!(reg.merge_requests().count(), 1);
        let req = reg.merge_request("fe").unwrap();
        assert_eq!(req.stage, "merge_layer");
        assert_eq!(req.operation, "merge_cols");
        assert!(!req.fulfilled);
        reg.fulfil_merge("fe", "merge_layer");
        assert!(reg.merge_request("fe").unwrap().fulfilled);
    }
}
