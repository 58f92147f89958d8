// [libs/domain/fleet/src/lib.rs]
/*!
 * =================================================================
 * APARATO: PLACEMENT ENGINE (V1.0 - MAXIMUM FREE CAPACITY)
 * CLASIFICACIÓN: DOMINIO DE FLOTA (ESTRATO L2)
 * RESPONSABILIDAD: SELECCIÓN PURA DE NODO OBJETIVO
 *
 * Sin efectos secundarios: no reserva capacidad, sólo lee. La reserva
 * real ocurre en la llamada subsiguiente a `add_node_capacity` contra
 * el Node Registry, que vive en el adaptador de infraestructura.
 * =================================================================
 */

use botplane_domain_models::{Node, NodeStatus};

pub const DEFAULT_REQUIRED_MB: i64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementChoice {
    pub node_id: String,
    pub host: String,
    pub available_mb: i64,
}

/// Elige, entre los nodos candidatos, el de mayor capacidad libre que
/// cumpla `required_mb` y no esté en `excluded_ids`. Sólo considera
/// nodos `active`. Los empates se resuelven por orden estable de id.
pub fn find_placement_excluding(
    nodes: &[Node],
    excluded_ids: &[String],
    required_mb: i64,
) -> Option<PlacementChoice> {
    nodes
        .iter()
        .filter(|node| node.status == NodeStatus::Active)
        .filter(|node| !excluded_ids.iter().any(|id| id == &node.id))
        .filter(|node| node.available_mb() >= required_mb)
        .max_by(|a, b| {
            a.available_mb()
                .cmp(&b.available_mb())
                .then_with(|| b.id.cmp(&a.id))
        })
        .map(|node| PlacementChoice {
            node_id: node.id.clone(),
            host: node.host.clone(),
            available_mb: node.available_mb(),
        })
}

pub fn find_placement(nodes: &[Node], required_mb: i64) -> Option<PlacementChoice> {
    find_placement_excluding(nodes, &[], required_mb)
}

/// Transiciones de estado válidas para un nodo, según el ciclo de vida
/// impulsado por drenado o por pérdida de latido.
pub fn is_valid_status_transition(from: NodeStatus, to: NodeStatus) -> bool {
    use NodeStatus::*;
    matches!(
        (from, to),
        (Active, Draining)
            | (Draining, Offline)
            | (Active, Unhealthy)
            | (Unhealthy, Recovering)
            | (Recovering, Active)
            | (Recovering, Offline)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn node(id: &str, status: NodeStatus, capacity_mb: i64, used_mb: i64) -> Node {
        Node {
            id: id.into(),
            host: format!("{id}.internal"),
            status,
            capacity_mb,
            used_mb,
            last_heartbeat_at: Utc::now(),
            registered_at: Utc::now(),
        }
    }

    #[test]
    fn picks_node_with_maximum_free_capacity() {
        let nodes = vec![
            node("node-1", NodeStatus::Active, 4096, 3000),
            node("node-2", NodeStatus::Active, 4096, 2596),
        ];
        let choice = find_placement(&nodes, 100).unwrap();
        assert_eq!(choice.node_id, "node-2");
        assert_eq!(choice.available_mb, 1500);
    }

    #[test]
    fn excludes_non_active_and_excluded_nodes() {
        let nodes = vec![
            node("node-1", NodeStatus::Draining, 4096, 0),
            node("node-2", NodeStatus::Active, 4096, 0),
            node("node-3", NodeStatus::Active, 8192, 0),
        ];
        let choice = find_placement_excluding(&nodes, &["node-3".to_string()], 100).unwrap();
        assert_eq!(choice.node_id, "node-2");
    }

    #[test]
    fn returns_none_when_no_node_qualifies() {
        let nodes = vec![node("node-1", NodeStatus::Active, 1024, 1000)];
        assert!(find_placement(&nodes, 100).is_none());
    }

    #[test]
    fn s2_new_node_with_ample_capacity_is_selected_after_dead_node_excluded() {
        let nodes = vec![node("new-node", NodeStatus::Active, 8192, 0)];
        let choice = find_placement_excluding(&nodes, &["dead-node".to_string()], 100).unwrap();
        assert_eq!(choice.node_id, "new-node");
        assert_eq!(choice.available_mb, 8192);
    }

    #[test]
    fn status_transition_matrix_matches_lifecycle_rules() {
        use NodeStatus::*;
        assert!(is_valid_status_transition(Active, Draining));
        assert!(is_valid_status_transition(Draining, Offline));
        assert!(is_valid_status_transition(Active, Unhealthy));
        assert!(is_valid_status_transition(Unhealthy, Recovering));
        assert!(is_valid_status_transition(Recovering, Active));
        assert!(is_valid_status_transition(Recovering, Offline));
        assert!(!is_valid_status_transition(Offline, Active));
        assert!(!is_valid_status_transition(Draining, Active));
    }
}
