//! DS-007: Sublayers, the orderable buckets of operator families.
//!
//! A sublayer's head is the last task of each family (what downstream
//! sublayers wait on); its tail is the first task of each family (what
//! upstream sublayers feed).

use super::family::OperatorFamily;
use super::types::{Edge, SubLayerDescriptor};
use indexmap::IndexMap;

/// Head/tail task ids of a sublayer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubLayerRefs {
    pub head: Vec<String>,
    pub tail: Vec<String>,
}

/// Named group of families with a position inside its layer.
#[derive(Debug, Clone)]
pub struct SubLayer {
    pub name: String,
    pub order: u32,
    /// Conditional branch this bucket belongs to
    pub branch: Option<String>,
    families: IndexMap<String, OperatorFamily>,
}

impl SubLayer {
    pub fn new(name: &str, order: u32, branch: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            order,
            branch: branch.map(str::to_string),
            families: IndexMap::new(),
        }
    }

    pub fn add_family(&mut self, family: OperatorFamily) {
        self.families.insert(family.id.clone(), family);
    }

    pub fn family(&self, id: &str) -> Option<&OperatorFamily> {
        self.families.get(id)
    }

    pub fn families(&self) -> impl Iterator<Item = &OperatorFamily> {
        self.families.values()
    }

    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    pub fn head(&self) -> Vec<String> {
        self.families()
            .filter_map(OperatorFamily::last_task)
            .map(str::to_string)
            .collect()
    }

    pub fn tail(&self) -> Vec<String> {
        self.families()
            .filter_map(OperatorFamily::first_task)
            .map(str::to_string)
            .collect()
    }

    /// Operator order inside every family.
    pub fn family_edges(&self) -> Vec<Edge> {
        self.families().flat_map(OperatorFamily::chain_edges).collect()
    }

    pub fn refs(&self) -> SubLayerRefs {
        SubLayerRefs {
            head: self.head(),
            tail: self.tail(),
        }
    }

    pub fn describe(&self) -> SubLayerDescriptor {
        SubLayerDescriptor {
            name: self.name.clone(),
            branch: self.branch.clone(),
            order: self.order,
            head: self.head(),
            tail: self.tail(),
            families: self.families.values().cloned().collect(),
        }
    }
}

/// A layer's entry for one sublayer name. Under a conditional mapping the
/// core group holds one bucket per branch.
#[derive(Debug, Clone)]
pub enum SubLayerSlot {
    Single(SubLayer),
    Conditional(IndexMap<String, SubLayer>),
}

impl SubLayerSlot {
    /// Order used to sequence slots; a conditional slot takes its first bucket's order.
    pub fn order(&self) -> u32 {
        match self {
            Self::Single(s) => s.order,
            Self::Conditional(buckets) => buckets.values().next().map_or(0, |s| s.order),
        }
    }

    /// The sublayer for `branch`, or the single sublayer.
    pub fn bucket(&self, branch: Option<&str>) -> Option<&SubLayer> {
        match (self, branch) {
            (Self::Single(s), _) => Some(s),
            (Self::Conditional(buckets), Some(b)) => buckets.get(b),
            (Self::Conditional(_), None) => None,
        }
    }

    pub fn buckets(&self) -> Vec<&SubLayer> {
        match self {
            Self::Single(s) => vec![s],
            Self::Conditional(buckets) => buckets.values().collect(),
        }
    }
}

/// Edges from each sublayer's head to the next sublayer's tail.
pub fn connect(chain: &[&SubLayer]) -> Vec<Edge> {
    let mut edges = Vec::new();
    for pair in chain.windows(2) {
        for from in pair[0].head() {
            for to in pair[1].tail() {
                edges.push(Edge::new(from.clone(), to));
            }
        }
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::family::Operator;
    use crate::core::router::OperatorTemplate;
    use crate::core::types::ArgMap;

    fn family(id: &str, tasks: &[&str]) -> OperatorFamily {
        let ops = tasks
            .iter()
            .map(|t| Operator::new(t.to_string(), OperatorTemplate::ColData, ArgMap::new()))
            .collect();
        OperatorFamily::new(id.to_string(), id, ops)
    }

    #[test]
    fn test_ds007_head_tail() {
        let mut s = SubLayer::new("core", 0, None);
        s.add_family(family("fe_age", &["age_a", "age_b"]));
        s.add_family(family("fe_h", &["h_a"]));
        assert_eq!(s.head(), vec!["age_b", "h_a"]);
        assert_eq!(s.tail(), vec!["age_a", "h_a"]);
        assert_eq!(s.len(), 2);
        assert!(s.family("fe_h").is_some());
    }

    #[test]
    fn test_ds007_connect_chain() {
        let mut core = SubLayer::new("core", 0, None);
        core.add_family(family("fe_a", &["a1", "a2"]));
        core.add_family(family("fe_b", &["b1"]));
        let mut merge = SubLayer::new("merge_layer", 1, None);
        merge.add_family(family("fe_merge_layer", &["fe_merge_layer"]));
        let edges = connect(&[&core, &merge]);
        assert_eq!(
            edges,
            vec![
                Edge::new("a2", "fe_merge_layer"),
                Edge::new("b1", "fe_merge_layer")
            ]
        );
    }

    #[test]
    fn test_ds007_connect_single_is_empty() {
        let core = SubLayer::new("core", 0, None);
        assert!(connect(&[&core]).is_empty());
        assert!(connect(&[]).is_empty());
    }

    #[test]
    fn test_ds007_slot_order_and_bucket() {
        let mut buckets = IndexMap::new();
        buckets.insert("A".to_string(), SubLayer::new("A", 0, Some("A")));
        buckets.insert("B".to_string(), SubLayer::new("B", 0, Some("B")));
        let slot = SubLayerSlot::Conditional(buckets);
        assert_eq!(slot.order(), 0);
        assert_eq!(slot.bucket(Some("B")).unwrap().name, "B");
        assert!(slot.bucket(None).is_none());
        assert_eq!(slot.buckets().len(), 2);

        let single = SubLayerSlot::Single(SubLayer::new("merge_layer", 1, None));
        assert_eq!(single.order(), 1);
        assert_eq!(single.bucket(Some("A")).unwrap().name, "merge_layer");
    }

    #[test]
    fn test_ds007_describe() {
        let mut s = SubLayer::new("A", 0, Some("A"));
        s.add_family(family("A_fe_age", &["A_age_n"]));
        let d = s.describe();
        assert_eq!(d.branch.as_deref(), Some("A"));
        assert_eq!(d.families.len(), 1);
        assert_eq!(d.head, vec!["A_age_n"]);
    }
}
