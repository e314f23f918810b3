//! DS-008: Layer compilation from a configuration tree to sublayers and families.
//!
//! A layer is one stage of the pipeline. Parsing walks its configuration in
//! order, resolves every operation through the routing table, groups the
//! resulting families into sublayers, runs holistic augmentation for the
//! stage kind, and finally sequences the sublayers so they can be chained.
//!
//! Sublayer placement:
//! - plain parse: `core`
//! - conditional parse: `core` -> one bucket per branch
//! - holistic parse: a sublayer named after the holistic key, which becomes
//!   the layer's merge head

use super::error::{CompileError, IdentifierKind, Result};
use super::family::{Operator, OperatorFamily};
use super::registry::{sanitize, Registry};
use super::router::{holistic_rules, holistic_spec, RouteEffect, RouteInput};
use super::sublayer::{connect, SubLayer, SubLayerRefs, SubLayerSlot};
use super::types::*;
use indexmap::{IndexMap, IndexSet};
use tracing::debug;

const CORE: &str = "core";

/// Build a layer tag from its lineage.
///
/// The first lineage element contributes the first letter of each `_` token,
/// later elements are appended whole, and a subrank adds `_l{subrank}`.
pub fn generate_tag(lineage: &[String], subrank: Option<u32>) -> String {
    let mut tag = String::new();
    for (i, concept) in lineage.iter().enumerate() {
        if i == 0 {
            tag.extend(concept.split('_').filter_map(|t| t.chars().next()));
        } else {
            tag.push('_');
            tag.push_str(concept);
        }
    }
    if let Some(rank) = subrank {
        tag.push_str(&format!("_l{}", rank));
    }
    tag
}

/// Base order plus a tenth per subrank.
pub fn execution_order(order: u32, subrank: Option<u32>) -> f64 {
    let base = f64::from(order);
    match subrank {
        Some(rank) => base + f64::from(rank) / 10.0,
        None => base,
    }
}

/// Head/tail of a whole layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerRefs {
    Plain(SubLayerRefs),
    /// Per-branch head/tail of the core buckets
    Conditional(IndexMap<String, SubLayerRefs>),
}

impl LayerRefs {
    /// Head task ids, flattened across branches and de-duplicated.
    pub fn head(&self) -> Vec<String> {
        match self {
            Self::Plain(r) => r.head.clone(),
            Self::Conditional(branches) => {
                let set: IndexSet<String> = branches.values().flat_map(|r| r.head.clone()).collect();
                set.into_iter().collect()
            }
        }
    }

    /// Tail task ids, optionally for one branch.
    pub fn tail(&self, branch: Option<&str>) -> Vec<String> {
        match (self, branch) {
            (Self::Plain(r), _) => r.tail.clone(),
            (Self::Conditional(branches), Some(b)) => {
                branches.get(b).map(|r| r.tail.clone()).unwrap_or_default()
            }
            (Self::Conditional(branches), None) => {
                let set: IndexSet<String> = branches.values().flat_map(|r| r.tail.clone()).collect();
                set.into_iter().collect()
            }
        }
    }
}

/// One compiled stage of the pipeline.
#[derive(Debug, Clone)]
pub struct Layer {
    pub config: LayerConfig,
    /// Stage kind (first lineage element)
    pub parent: String,
    pub lineage: Vec<String>,
    pub tag: String,
    pub subrank: Option<u32>,
    pub exec_order: f64,
    /// Branch names inherited from the preceding layer
    pub conditional_mapping: Option<Vec<String>>,
    sublayers: IndexMap<String, SubLayerSlot>,
    sublayer_order: Vec<String>,
    family_ids: IndexSet<String>,
    merge_head: String,
    holistic_applied: IndexSet<String>,
}

impl Layer {
    /// Place a layer: lineage, order, subrank and optional branch set.
    ///
    /// `lineage` must not be empty; its first element is the stage kind.
    pub fn new(
        config: LayerConfig,
        lineage: Vec<String>,
        order: u32,
        subrank: Option<u32>,
        conditional_mapping: Option<Vec<String>>,
    ) -> Result<Self> {
        let parent = lineage
            .first()
            .cloned()
            .ok_or_else(|| CompileError::structure("<lineage>", "layer lineage is empty"))?;
        let tag = generate_tag(&lineage, subrank);
        Ok(Self {
            config,
            parent,
            tag,
            subrank,
            exec_order: execution_order(order, subrank),
            lineage,
            conditional_mapping,
            sublayers: IndexMap::new(),
            sublayer_order: Vec::new(),
            family_ids: IndexSet::new(),
            merge_head: CORE.to_string(),
            holistic_applied: IndexSet::new(),
        })
    }

    pub fn merge_head(&self) -> &str {
        &self.merge_head
    }

    pub fn sublayer(&self, name: &str) -> Option<&SubLayerSlot> {
        self.sublayers.get(name)
    }

    pub fn sublayer_order(&self) -> &[String] {
        &self.sublayer_order
    }

    pub fn family_ids(&self) -> impl Iterator<Item = &str> {
        self.family_ids.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.sublayers.is_empty()
    }

    // ========================================================================
    // Parsing
    // ========================================================================

    /// Parse the configuration into sublayers and families, run holistic
    /// augmentation, and sequence the sublayers.
    pub fn parse(&mut self, registry: &mut Registry) -> Result<()> {
        registry.router().route(&self.parent)?;

        match self.conditional_mapping.clone() {
            Some(branches) => {
                for branch in &branches {
                    self.parse_entries(registry, Some(branch))?;
                }
            }
            None => self.parse_entries(registry, None)?,
        }

        self.holistic_layer_parsing(registry)?;
        self.generate_sublayer_order();
        debug!(
            layer = %self.tag,
            sublayers = self.sublayer_order.len(),
            families = self.family_ids.len(),
            "parsed layer"
        );
        Ok(())
    }

    fn parse_entries(&mut self, registry: &mut Registry, branch: Option<&str>) -> Result<()> {
        let parent = self.parent.clone();
        let entries = self.config.entries.clone();
        for (key, value) in &entries {
            let ops = match value {
                ConfigValue::OperationMap(ops) => ops,
                ConfigValue::Leaf => {
                    debug!(layer = %self.tag, family = %key, "no operations; skipping");
                    continue;
                }
            };
            for target in key.targets() {
                self.parse_family(registry, &parent, target, ops, 0, branch)?;
            }
        }
        Ok(())
    }

    /// Operations implied by the stage kind. Each holistic key is parsed once;
    /// repeated calls add nothing.
    pub fn holistic_layer_parsing(&mut self, registry: &mut Registry) -> Result<()> {
        let Some(spec) = holistic_spec(&self.parent, &self.tag) else {
            return Ok(());
        };
        if !self.sublayers.contains_key(CORE) {
            debug!(layer = %self.tag, "no families to augment");
            return Ok(());
        }
        if self.conditional_mapping.is_some() {
            return Err(CompileError::ConditionalHolistic {
                layer: self.tag.clone(),
            });
        }

        let mut holistic_order = 0;
        for (key, ops) in &spec {
            holistic_order += 1;
            if self.holistic_applied.contains(key) {
                continue;
            }
            self.parse_family(registry, key, key, ops, holistic_order, None)?;
            self.holistic_applied.insert(key.clone());
            registry.fulfil_merge(&self.tag, key);
        }
        self.generate_sublayer_order();
        Ok(())
    }

    /// Turn one target's operation map into a family and file it.
    fn parse_family(
        &mut self,
        registry: &mut Registry,
        parent: &str,
        family: &str,
        operations: &OperationMap,
        holistic_order: u32,
        branch: Option<&str>,
    ) -> Result<()> {
        if operations.is_empty() {
            debug!(layer = %self.tag, family, "empty operation map; skipping");
            return Ok(());
        }

        let family_id = self.create_family_id(registry, family, branch)?;

        let mut params = ParamMap::new();
        let mut upstream: Option<String> = None;
        let mut operators: Vec<Operator> = Vec::new();

        for (op_key, declared) in operations {
            if let Some(p) = declared {
                params = p.clone();
            }
            let op = registry.resolve_op(op_key);
            let primed = self.prime_operators(
                registry,
                parent,
                family,
                upstream.as_deref(),
                &op,
                &params,
                branch,
            )?;
            if let Some(last) = primed.last() {
                upstream = Some(last.task_id.clone());
            }
            operators.extend(primed);
        }

        let op_family = OperatorFamily::new(family_id, family, operators);

        match (holistic_order, branch) {
            (_, Some(b)) => {
                let slot = self
                    .sublayers
                    .entry(CORE.to_string())
                    .or_insert_with(|| SubLayerSlot::Conditional(IndexMap::new()));
                if let SubLayerSlot::Conditional(buckets) = slot {
                    buckets
                        .entry(b.to_string())
                        .or_insert_with(|| SubLayer::new(b, holistic_order, Some(b)))
                        .add_family(op_family);
                }
            }
            (0, None) => {
                if let SubLayerSlot::Single(s) = self
                    .sublayers
                    .entry(CORE.to_string())
                    .or_insert_with(|| SubLayerSlot::Single(SubLayer::new(CORE, 0, None)))
                {
                    s.add_family(op_family);
                }
            }
            (order, None) => {
                if let SubLayerSlot::Single(s) = self
                    .sublayers
                    .entry(parent.to_string())
                    .or_insert_with(|| SubLayerSlot::Single(SubLayer::new(parent, order, None)))
                {
                    s.add_family(op_family);
                }
                self.merge_head = parent.to_string();
            }
        }
        Ok(())
    }

    /// Resolve one operation into its operators via the routing table.
    #[allow(clippy::too_many_arguments)]
    fn prime_operators(
        &self,
        registry: &mut Registry,
        parent: &str,
        family: &str,
        upstream: Option<&str>,
        op: &OpRef,
        params: &ParamMap,
        branch: Option<&str>,
    ) -> Result<Vec<Operator>> {
        let route = registry.router().route(parent)?.clone();

        let merge_ids = if route.effect == RouteEffect::ConsumeMergeHead {
            self.merge_head_refs()?
        } else {
            Vec::new()
        };

        let input = RouteInput {
            layer_tag: &self.tag,
            family,
            op,
            params,
            inherits: upstream.is_some(),
            branch,
            merge_ids: &merge_ids,
        };
        let mut base_args = (route.args)(&input);
        let base_tag = (route.task_tag)(&input);

        if let Some(prev) = upstream {
            for field in route.inherit_args {
                base_args.insert(field.to_string(), ArgValue::Task(prev.to_string()));
            }
        }

        let multi = route.operators.len() > 1;
        let mut operators: Vec<Operator> = Vec::with_capacity(route.operators.len());
        for (role, template) in &route.operators {
            let mut tag = base_tag.clone();
            if let (Some(b), false) = (branch, route.tag_includes_branch) {
                tag.insert(0, b.to_string());
            }
            if multi {
                if let Some(role) = role {
                    tag.push(role.to_string());
                }
            }

            let mut args = base_args.clone();
            if let Some(prev) = operators.last() {
                for field in route.xcom_update {
                    args.insert(field.to_string(), ArgValue::Task(prev.task_id.clone()));
                }
            }

            let task_id = registry.allocate_task_id(&tag)?;
            operators.push(Operator::new(task_id, *template, args));
        }

        match route.effect {
            RouteEffect::RequestMerge => {
                for rule in holistic_rules(parent) {
                    registry.request_merge(&self.tag, rule);
                }
            }
            RouteEffect::RegisterModel => {
                if let (Some(first), Some(last)) = (operators.first(), operators.last()) {
                    registry.register_model(family, op, &first.task_id, &last.task_id);
                }
            }
            RouteEffect::EvaluateModel => {
                if let Some(b) = branch {
                    registry.mark_evaluated(b);
                }
            }
            RouteEffect::ConsumeMergeHead | RouteEffect::None => {}
        }

        Ok(operators)
    }

    fn merge_head_refs(&self) -> Result<Vec<String>> {
        match self.sublayers.get(&self.merge_head) {
            Some(SubLayerSlot::Single(s)) => Ok(s.head()),
            Some(SubLayerSlot::Conditional(_)) => Err(CompileError::ConditionalHolistic {
                layer: self.tag.clone(),
            }),
            None => Ok(Vec::new()),
        }
    }

    /// `[branch_]tag_name`, unique within the layer and the registry.
    fn create_family_id(
        &mut self,
        registry: &mut Registry,
        family: &str,
        branch: Option<&str>,
    ) -> Result<String> {
        let mut family_id = format!("{}_{}", self.tag, sanitize(family));
        if let Some(b) = branch {
            family_id = format!("{}_{}", b, family_id);
        }
        if self.family_ids.contains(&family_id) {
            return Err(CompileError::DuplicateIdentifier {
                kind: IdentifierKind::Family,
                id: family_id,
            });
        }
        registry.register_family(&family_id)?;
        self.family_ids.insert(family_id.clone());
        Ok(family_id)
    }

    /// Sequence sublayer names by their order value (stable for ties).
    fn generate_sublayer_order(&mut self) {
        let mut names: Vec<(&String, u32)> = self
            .sublayers
            .iter()
            .map(|(name, slot)| (name, slot.order()))
            .collect();
        names.sort_by_key(|(_, order)| *order);
        self.sublayer_order = names.into_iter().map(|(n, _)| n.clone()).collect();
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// Sublayers in order, with conditional slots resolved for `branch`.
    fn chain(&self, branch: Option<&str>) -> Vec<&SubLayer> {
        self.sublayer_order
            .iter()
            .filter_map(|name| self.sublayers.get(name))
            .filter_map(|slot| slot.bucket(branch))
            .collect()
    }

    /// Head/tail of the whole layer.
    pub fn refs(&self) -> LayerRefs {
        if let Some(SubLayerSlot::Conditional(buckets)) = self.sublayers.get(CORE) {
            let branches = buckets
                .iter()
                .map(|(name, s)| (name.clone(), s.refs()))
                .collect();
            return LayerRefs::Conditional(branches);
        }
        let chain = self.chain(None);
        LayerRefs::Plain(SubLayerRefs {
            head: chain.last().map(|s| s.head()).unwrap_or_default(),
            tail: chain.first().map(|s| s.tail()).unwrap_or_default(),
        })
    }

    /// Edges between consecutive sublayers; once per branch when conditional.
    pub fn sublayer_edges(&self) -> Vec<Edge> {
        match &self.conditional_mapping {
            Some(branches) => branches
                .iter()
                .flat_map(|b| connect(&self.chain(Some(b))))
                .collect(),
            None => connect(&self.chain(None)),
        }
    }

    /// Operator order inside every family, across all buckets.
    pub fn family_edges(&self) -> Vec<Edge> {
        self.sublayer_order
            .iter()
            .filter_map(|name| self.sublayers.get(name))
            .flat_map(|slot| slot.buckets())
            .flat_map(SubLayer::family_edges)
            .collect()
    }

    /// Every edge inside the layer: family chains, then sublayer links.
    pub fn edges(&self) -> Vec<Edge> {
        let mut edges = self.family_edges();
        edges.extend(self.sublayer_edges());
        edges
    }

    pub fn describe(&self) -> LayerDescriptor {
        let sublayers = self
            .sublayer_order
            .iter()
            .filter_map(|name| self.sublayers.get(name))
            .flat_map(|slot| slot.buckets())
            .map(SubLayer::describe)
            .collect();
        LayerDescriptor {
            tag: self.tag.clone(),
            stage: self.parent.clone(),
            lineage: self.lineage.clone(),
            exec_order: self.exec_order,
            conditional_mapping: self.conditional_mapping.clone(),
            merge_head: self.merge_head.clone(),
            sublayers,
            edges: self.edges(),
        }
    }
}
