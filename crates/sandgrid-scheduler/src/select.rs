//! Candidate selection for new sessions.
//!
//! Pure over a slice of node snapshots so the policy is unit-testable
//! without a registry. Policy:
//!
//! 1. Only `healthy` nodes with room for the request are candidates.
//! 2. Nodes with the template already cached form the affinity set; when
//!    non-empty, selection is restricted to it.
//! 3. Lowest load ratio (`session_count / max_sessions`) wins; ties
//!    break on lowest absolute CPU allocation, then node id.

use std::cmp::Ordering;

use sandgrid_core::{NodeHealth, ResourceLimit, RuntimeNode};

/// Pick the best node for a `(template, resources)` request.
///
/// Returns `None` when no healthy node can fit the request.
pub fn select_node<'a>(
    nodes: impl IntoIterator<Item = &'a RuntimeNode>,
    template_id: &str,
    resources: &ResourceLimit,
) -> Option<&'a RuntimeNode> {
    let candidates: Vec<&RuntimeNode> = nodes
        .into_iter()
        .filter(|n| n.health == NodeHealth::Healthy && n.can_fit(resources))
        .collect();

    if candidates.is_empty() {
        return None;
    }

    let affinity: Vec<&RuntimeNode> = candidates
        .iter()
        .copied()
        .filter(|n| n.has_template(template_id))
        .collect();

    let pool = if affinity.is_empty() {
        &candidates
    } else {
        &affinity
    };

    pool.iter().copied().min_by(|a, b| compare_load(a, b))
}

fn compare_load(a: &RuntimeNode, b: &RuntimeNode) -> Ordering {
    a.load_ratio()
        .partial_cmp(&b.load_ratio())
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            a.allocated_cpu
                .partial_cmp(&b.allocated_cpu)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use sandgrid_core::EngineKind;

    fn make_node(id: &str, sessions: u32, max: u32, allocated_cpu: f64) -> RuntimeNode {
        RuntimeNode {
            id: id.to_string(),
            engine: EngineKind::Stub,
            endpoint: "127.0.0.1:0".to_string(),
            health: NodeHealth::Healthy,
            total_cpu: 16.0,
            total_memory_mb: 32768,
            allocated_cpu,
            allocated_memory_mb: 0,
            session_count: sessions,
            max_sessions: max,
            cached_templates: BTreeSet::new(),
            last_heartbeat: 1000,
        }
    }

    fn limit() -> ResourceLimit {
        ResourceLimit::new(1.0, 512, 1024).unwrap()
    }

    #[test]
    fn empty_input_selects_nothing() {
        assert!(select_node([], "python-3.12", &limit()).is_none());
    }

    #[test]
    fn skips_non_healthy_nodes() {
        let mut unhealthy = make_node("n1", 0, 10, 0.0);
        unhealthy.health = NodeHealth::Unhealthy;
        let mut draining = make_node("n2", 0, 10, 0.0);
        draining.health = NodeHealth::Draining;

        let nodes = vec![unhealthy, draining];
        assert!(select_node(&nodes, "python-3.12", &limit()).is_none());
    }

    #[test]
    fn skips_full_nodes() {
        let full = make_node("n1", 10, 10, 0.0);
        let open = make_node("n2", 9, 10, 0.0);

        let nodes = vec![full, open];
        let picked = select_node(&nodes, "python-3.12", &limit()).unwrap();
        assert_eq!(picked.id, "n2");
    }

    #[test]
    fn lowest_load_ratio_wins() {
        let busy = make_node("n1", 8, 10, 0.0);
        let quiet = make_node("n2", 2, 10, 0.0);

        let nodes = vec![busy, quiet];
        let picked = select_node(&nodes, "python-3.12", &limit()).unwrap();
        assert_eq!(picked.id, "n2");
    }

    #[test]
    fn affinity_set_preferred_even_when_busier() {
        let mut cached = make_node("n1", 5, 10, 0.0);
        cached.cached_templates.insert("python-3.12".to_string());
        let cold = make_node("n2", 0, 10, 0.0);

        let nodes = vec![cached, cold];
        let picked = select_node(&nodes, "python-3.12", &limit()).unwrap();
        assert_eq!(picked.id, "n1");
    }

    #[test]
    fn full_affinity_node_falls_back_to_cold_set() {
        let mut cached = make_node("n1", 10, 10, 0.0);
        cached.cached_templates.insert("python-3.12".to_string());
        let cold = make_node("n2", 0, 10, 0.0);

        let nodes = vec![cached, cold];
        let picked = select_node(&nodes, "python-3.12", &limit()).unwrap();
        assert_eq!(picked.id, "n2");
    }

    #[test]
    fn tie_breaks_on_allocated_cpu_then_id() {
        // Same load ratio, different CPU allocation.
        let heavy = make_node("n1", 2, 10, 8.0);
        let light = make_node("n2", 2, 10, 2.0);
        let nodes = vec![heavy, light];
        assert_eq!(select_node(&nodes, "t", &limit()).unwrap().id, "n2");

        // Fully tied: lexicographic node id for determinism.
        let b = make_node("node-b", 2, 10, 2.0);
        let a = make_node("node-a", 2, 10, 2.0);
        let nodes = vec![b, a];
        assert_eq!(select_node(&nodes, "t", &limit()).unwrap().id, "node-a");
    }

    #[test]
    fn respects_resource_dimensions() {
        let mut small = make_node("n1", 0, 10, 0.0);
        small.total_memory_mb = 256;
        let big = make_node("n2", 5, 10, 0.0);

        let want = ResourceLimit::new(1.0, 512, 1024).unwrap();
        let nodes = vec![small, big];
        assert_eq!(select_node(&nodes, "t", &want).unwrap().id, "n2");
    }
}
