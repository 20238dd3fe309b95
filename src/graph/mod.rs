//! Candidate graph construction.
//!
//! A batch resolves against a point-in-time [`ClusterView`] of current
//! assignments. [`CandidateGraph::build`] turns the batch, its surviving
//! candidate edges, and that view into connected components. Whenever a node
//! belongs to a live cluster, the whole cluster is pulled into the graph and
//! pre-unioned, so a component always sees every record of every cluster it
//! touches. That is what lets the resolver retire a cluster knowing no
//! member was left behind.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::cluster::ClusterId;
use crate::edge::CandidateEdge;
use crate::record::RecordId;

pub mod union_find;

use union_find::DisjointSets;

/// Point-in-time snapshot of live cluster assignments.
///
/// Holds the record-to-cluster map, the reverse member lists, and the next
/// unused cluster identifier. Built by the engine from the store before each
/// batch; the resolver reads it and never mutates stored state.
#[derive(Debug, Clone)]
pub struct ClusterView {
    by_record: HashMap<RecordId, ClusterId>,
    members: BTreeMap<ClusterId, Vec<RecordId>>,
    next_cluster: ClusterId,
}

impl ClusterView {
    /// Creates an empty view whose mint cursor starts at `next_cluster`.
    #[must_use]
    pub fn new(next_cluster: ClusterId) -> Self {
        Self {
            by_record: HashMap::new(),
            members: BTreeMap::new(),
            next_cluster,
        }
    }

    /// Records that `record` is currently assigned to `cluster`.
    ///
    /// Callers feed each record at most once; member lists keep insertion
    /// order.
    pub fn insert_member(&mut self, record: RecordId, cluster: ClusterId) {
        self.members.entry(cluster).or_default().push(record.clone());
        self.by_record.insert(record, cluster);
    }

    /// The cluster `record` is assigned to, if any.
    #[must_use]
    pub fn cluster_of(&self, record: &RecordId) -> Option<ClusterId> {
        self.by_record.get(record).copied()
    }

    /// All records assigned to `cluster`. Empty for unknown clusters.
    #[must_use]
    pub fn members_of(&self, cluster: ClusterId) -> &[RecordId] {
        self.members.get(&cluster).map_or(&[], Vec::as_slice)
    }

    /// Live cluster identifiers, ascending.
    pub fn clusters(&self) -> impl Iterator<Item = ClusterId> + '_ {
        self.members.keys().copied()
    }

    /// The smallest cluster identifier not yet in use.
    #[must_use]
    pub fn next_cluster(&self) -> ClusterId {
        self.next_cluster
    }

    /// Number of assigned records in the view.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.by_record.len()
    }

    /// Number of live clusters in the view.
    #[must_use]
    pub fn cluster_count(&self) -> usize {
        self.members.len()
    }
}

/// One connected component of the candidate graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    members: Vec<RecordId>,
    existing: BTreeSet<ClusterId>,
}

impl Component {
    /// Records in this component, sorted ascending.
    #[must_use]
    pub fn members(&self) -> &[RecordId] {
        &self.members
    }

    /// Live clusters the component touches, ascending.
    #[must_use]
    pub fn existing(&self) -> &BTreeSet<ClusterId> {
        &self.existing
    }

    /// Number of records in the component.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Components are never built empty, but the check keeps call sites
    /// honest.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Connected components over a batch, its candidate edges, and the members
/// of every cluster those nodes touch.
#[derive(Debug, Clone)]
pub struct CandidateGraph {
    components: Vec<Component>,
    node_count: usize,
    edges_applied: usize,
}

impl CandidateGraph {
    /// Builds the graph for one batch.
    ///
    /// Nodes are the batch records, both endpoints of every edge, and every
    /// member of every live cluster any of those records belong to. Edges
    /// with equal endpoints are dropped. Components come back sorted by
    /// their smallest member, and each component carries the set of live
    /// clusters it touches.
    #[must_use]
    pub fn build(batch: &[RecordId], edges: &[CandidateEdge], view: &ClusterView) -> Self {
        let mut builder = GraphBuilder {
            view,
            index: HashMap::with_capacity(batch.len()),
            nodes: Vec::with_capacity(batch.len()),
            sets: DisjointSets::with_capacity(batch.len()),
            expanded: BTreeSet::new(),
        };

        for record in batch {
            builder.intern_with_cluster(record);
        }

        let mut edges_applied = 0;
        for edge in edges {
            if edge.is_self_pair() {
                continue;
            }
            let low = builder.intern_with_cluster(edge.low());
            let high = builder.intern_with_cluster(edge.high());
            builder.sets.union(low, high);
            edges_applied += 1;
        }

        let node_count = builder.nodes.len();
        let mut grouped: BTreeMap<usize, Vec<RecordId>> = BTreeMap::new();
        for handle in 0..node_count {
            let root = builder.sets.find(handle);
            grouped
                .entry(root)
                .or_default()
                .push(builder.nodes[handle].clone());
        }

        let mut components: Vec<Component> = grouped
            .into_values()
            .map(|mut members| {
                members.sort();
                let existing = members
                    .iter()
                    .filter_map(|member| view.cluster_of(member))
                    .collect();
                Component { members, existing }
            })
            .collect();
        components.sort_by(|a, b| a.members.first().cmp(&b.members.first()));

        Self {
            components,
            node_count,
            edges_applied,
        }
    }

    /// Components sorted by smallest member.
    #[must_use]
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Total distinct records in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Edges that survived the self-pair filter and were applied.
    #[must_use]
    pub fn edges_applied(&self) -> usize {
        self.edges_applied
    }
}

struct GraphBuilder<'a> {
    view: &'a ClusterView,
    index: HashMap<RecordId, usize>,
    nodes: Vec<RecordId>,
    sets: DisjointSets,
    expanded: BTreeSet<ClusterId>,
}

impl GraphBuilder<'_> {
    fn intern(&mut self, record: &RecordId) -> usize {
        if let Some(&handle) = self.index.get(record) {
            return handle;
        }
        let handle = self.sets.push();
        self.nodes.push(record.clone());
        self.index.insert(record.clone(), handle);
        handle
    }

    /// Interns `record`; on first contact with its live cluster, interns and
    /// pre-unions every member of that cluster.
    fn intern_with_cluster(&mut self, record: &RecordId) -> usize {
        let handle = self.intern(record);
        let Some(cluster) = self.view.cluster_of(record) else {
            return handle;
        };
        if self.expanded.insert(cluster) {
            let view = self.view;
            for member in view.members_of(cluster) {
                let member_handle = self.intern(member);
                self.sets.union(handle, member_handle);
            }
        }
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: &str) -> RecordId {
        RecordId::from(id)
    }

    fn ids(component: &Component) -> Vec<&str> {
        component.members().iter().map(RecordId::as_str).collect()
    }

    #[test]
    fn test_view_lookup_and_members() {
        let mut view = ClusterView::new(ClusterId::new(5));
        view.insert_member(rec("a"), ClusterId::new(1));
        view.insert_member(rec("b"), ClusterId::new(1));
        view.insert_member(rec("c"), ClusterId::new(3));

        assert_eq!(view.cluster_of(&rec("a")), Some(ClusterId::new(1)));
        assert_eq!(view.cluster_of(&rec("z")), None);
        assert_eq!(view.members_of(ClusterId::new(1)), &[rec("a"), rec("b")]);
        assert!(view.members_of(ClusterId::new(9)).is_empty());
        assert_eq!(
            view.clusters().collect::<Vec<_>>(),
            vec![ClusterId::new(1), ClusterId::new(3)]
        );
        assert_eq!(view.next_cluster(), ClusterId::new(5));
        assert_eq!(view.record_count(), 3);
        assert_eq!(view.cluster_count(), 2);
    }

    #[test]
    fn test_isolated_records_form_singletons() {
        let view = ClusterView::new(ClusterId::new(1));
        let batch = vec![rec("c"), rec("a"), rec("b")];
        let graph = CandidateGraph::build(&batch, &[], &view);

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edges_applied(), 0);
        let members: Vec<Vec<&str>> = graph.components().iter().map(ids).collect();
        assert_eq!(members, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn test_edges_chain_batch_records_into_one_component() {
        let view = ClusterView::new(ClusterId::new(1));
        let batch = vec![rec("a"), rec("b"), rec("c")];
        let edges = vec![
            CandidateEdge::new(rec("a"), rec("b"), 0.95).unwrap(),
            CandidateEdge::new(rec("b"), rec("c"), 0.92).unwrap(),
        ];
        let graph = CandidateGraph::build(&batch, &edges, &view);

        assert_eq!(graph.components().len(), 1);
        assert_eq!(ids(&graph.components()[0]), vec!["a", "b", "c"]);
        assert_eq!(graph.edges_applied(), 2);
        assert!(graph.components()[0].existing().is_empty());
    }

    #[test]
    fn test_self_pair_edges_are_dropped() {
        let view = ClusterView::new(ClusterId::new(1));
        let batch = vec![rec("a")];
        let edges = vec![CandidateEdge::new(rec("a"), rec("a"), 0.99).unwrap()];
        let graph = CandidateGraph::build(&batch, &edges, &view);

        assert_eq!(graph.components().len(), 1);
        assert_eq!(graph.edges_applied(), 0);
    }

    #[test]
    fn test_touched_cluster_pulls_in_all_members() {
        let mut view = ClusterView::new(ClusterId::new(2));
        view.insert_member(rec("x"), ClusterId::new(1));
        view.insert_member(rec("y"), ClusterId::new(1));

        let batch = vec![rec("n")];
        let edges = vec![CandidateEdge::new(rec("n"), rec("x"), 0.91).unwrap()];
        let graph = CandidateGraph::build(&batch, &edges, &view);

        assert_eq!(graph.components().len(), 1);
        let component = &graph.components()[0];
        assert_eq!(ids(component), vec!["n", "x", "y"]);
        assert_eq!(
            component.existing().iter().copied().collect::<Vec<_>>(),
            vec![ClusterId::new(1)]
        );
    }

    #[test]
    fn test_edge_endpoint_outside_batch_is_a_node() {
        let view = ClusterView::new(ClusterId::new(1));
        let batch = vec![rec("n")];
        let edges = vec![CandidateEdge::new(rec("n"), rec("old"), 0.9).unwrap()];
        let graph = CandidateGraph::build(&batch, &edges, &view);

        assert_eq!(graph.node_count(), 2);
        assert_eq!(ids(&graph.components()[0]), vec!["n", "old"]);
    }

    #[test]
    fn test_bridge_collects_both_existing_clusters() {
        let mut view = ClusterView::new(ClusterId::new(3));
        view.insert_member(rec("a"), ClusterId::new(1));
        view.insert_member(rec("b"), ClusterId::new(2));

        let batch = vec![rec("n")];
        let edges = vec![
            CandidateEdge::new(rec("n"), rec("a"), 0.93).unwrap(),
            CandidateEdge::new(rec("n"), rec("b"), 0.94).unwrap(),
        ];
        let graph = CandidateGraph::build(&batch, &edges, &view);

        assert_eq!(graph.components().len(), 1);
        let component = &graph.components()[0];
        assert_eq!(ids(component), vec!["a", "b", "n"]);
        assert_eq!(
            component.existing().iter().copied().collect::<Vec<_>>(),
            vec![ClusterId::new(1), ClusterId::new(2)]
        );
    }

    #[test]
    fn test_untouched_cluster_stays_out_of_the_graph() {
        let mut view = ClusterView::new(ClusterId::new(3));
        view.insert_member(rec("far"), ClusterId::new(2));

        let batch = vec![rec("n")];
        let graph = CandidateGraph::build(&batch, &[], &view);

        assert_eq!(graph.node_count(), 1);
        assert_eq!(ids(&graph.components()[0]), vec!["n"]);
    }

    #[test]
    fn test_components_sorted_by_smallest_member() {
        let view = ClusterView::new(ClusterId::new(1));
        let batch = vec![rec("z"), rec("m"), rec("a"), rec("q")];
        let edges = vec![CandidateEdge::new(rec("z"), rec("m"), 0.9).unwrap()];
        let graph = CandidateGraph::build(&batch, &edges, &view);

        let firsts: Vec<&str> = graph
            .components()
            .iter()
            .filter_map(|c| c.members().first().map(RecordId::as_str))
            .collect();
        assert_eq!(firsts, vec!["a", "m", "q"]);
    }

    #[test]
    fn test_batch_member_already_clustered_expands_once() {
        let mut view = ClusterView::new(ClusterId::new(2));
        view.insert_member(rec("a"), ClusterId::new(1));
        view.insert_member(rec("b"), ClusterId::new(1));

        // Both cluster members appear in the batch; expansion must not
        // duplicate nodes.
        let batch = vec![rec("a"), rec("b")];
        let graph = CandidateGraph::build(&batch, &[], &view);

        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.components().len(), 1);
        assert_eq!(ids(&graph.components()[0]), vec!["a", "b"]);
    }
}
