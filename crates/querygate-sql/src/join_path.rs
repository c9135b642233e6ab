//! Shortest foreign-key join path between two tables.

use crate::schema::SchemaGraph;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Tables visited from source to target, plus one `a.col=b.col` predicate
/// per hop, oriented in the direction of travel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinPath {
    pub path: Vec<String>,
    pub joins: Vec<String>,
}

impl JoinPath {
    /// Left and right sides of each join predicate.
    pub fn predicates(&self) -> impl Iterator<Item = (&str, &str)> {
        self.joins.iter().filter_map(|j| j.split_once('='))
    }

    pub fn hops(&self) -> usize {
        self.joins.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinPathError {
    #[error("no foreign-key path from {from_table} to {to_table} in schema {schema}")]
    NoPathFound {
        schema: String,
        from_table: String,
        to_table: String,
    },
}

/// Breadth-first search over foreign keys treated as undirected edges.
///
/// Neighbours are explored in foreign-key declaration order and a node is
/// never enqueued twice, so the first path reaching `target` is returned.
pub fn resolve(graph: &SchemaGraph, source: &str, target: &str) -> Result<JoinPath, JoinPathError> {
    if source == target {
        return Ok(JoinPath {
            path: vec![source.to_string()],
            joins: Vec::new(),
        });
    }

    let mut adjacency: HashMap<&str, Vec<(&str, String)>> = HashMap::new();
    for fk in &graph.foreign_keys {
        let forward = format!(
            "{}.{}={}.{}",
            fk.child_table, fk.child_column, fk.parent_table, fk.parent_column
        );
        let backward = format!(
            "{}.{}={}.{}",
            fk.parent_table, fk.parent_column, fk.child_table, fk.child_column
        );
        adjacency
            .entry(fk.child_table.as_str())
            .or_default()
            .push((fk.parent_table.as_str(), forward));
        adjacency
            .entry(fk.parent_table.as_str())
            .or_default()
            .push((fk.child_table.as_str(), backward));
    }

    let mut seen: HashSet<&str> = HashSet::from([source]);
    let mut queue: VecDeque<(&str, Vec<String>, Vec<String>)> = VecDeque::new();
    queue.push_back((source, vec![source.to_string()], Vec::new()));

    while let Some((node, path, joins)) = queue.pop_front() {
        let Some(neighbours) = adjacency.get(node) else {
            continue;
        };
        for (next, predicate) in neighbours {
            if seen.contains(next) {
                continue;
            }
            let mut next_path = path.clone();
            next_path.push(next.to_string());
            let mut next_joins = joins.clone();
            next_joins.push(predicate.clone());
            if *next == target {
                return Ok(JoinPath {
                    path: next_path,
                    joins: next_joins,
                });
            }
            seen.insert(*next);
            queue.push_back((*next, next_path, next_joins));
        }
    }

    Err(JoinPathError::NoPathFound {
        schema: graph.schema.clone(),
        from_table: source.to_string(),
        to_table: target.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ForeignKey;
    use proptest::prelude::*;

    fn fk(child: &str, child_col: &str, parent: &str, parent_col: &str) -> ForeignKey {
        ForeignKey {
            child_table: child.into(),
            child_column: child_col.into(),
            parent_table: parent.into(),
            parent_column: parent_col.into(),
        }
    }

    fn graph(fks: Vec<ForeignKey>) -> SchemaGraph {
        SchemaGraph {
            schema: "public".into(),
            tables: Vec::new(),
            foreign_keys: fks,
        }
    }

    #[test]
    fn test_two_hop_chain() {
        let g = graph(vec![
            fk("order_items", "order_id", "orders", "id"),
            fk("orders", "customer_id", "customers", "id"),
        ]);
        let path = resolve(&g, "order_items", "customers").unwrap();
        assert_eq!(path.path, vec!["order_items", "orders", "customers"]);
        assert_eq!(
            path.joins,
            vec!["order_items.order_id=orders.id", "orders.customer_id=customers.id"]
        );
    }

    #[test]
    fn test_backward_edges_are_reversed() {
        let g = graph(vec![fk("orders", "customer_id", "customers", "id")]);
        let path = resolve(&g, "customers", "orders").unwrap();
        assert_eq!(path.joins, vec!["customers.id=orders.customer_id"]);
        let sides: Vec<_> = path.predicates().collect();
        assert_eq!(sides, vec![("customers.id", "orders.customer_id")]);
    }

    #[test]
    fn test_trivial_path() {
        let path = resolve(&graph(Vec::new()), "orders", "orders").unwrap();
        assert_eq!(path.path, vec!["orders"]);
        assert!(path.joins.is_empty());
    }

    #[test]
    fn test_no_path() {
        let g = graph(vec![fk("a", "b_id", "b", "id"), fk("c", "d_id", "d", "id")]);
        let err = resolve(&g, "a", "d").unwrap_err();
        assert_eq!(
            err,
            JoinPathError::NoPathFound {
                schema: "public".into(),
                from_table: "a".into(),
                to_table: "d".into(),
            }
        );
    }

    #[test]
    fn test_first_path_wins_among_equal_lengths() {
        // a-b-d and a-c-d are both two hops; a-b is declared first.
        let g = graph(vec![
            fk("a", "b_id", "b", "id"),
            fk("a", "c_id", "c", "id"),
            fk("b", "d_id", "d", "id"),
            fk("c", "d_id", "d", "id"),
        ]);
        assert_eq!(resolve(&g, "a", "d").unwrap().path, vec!["a", "b", "d"]);
    }

    #[test]
    fn test_cycles_terminate() {
        let g = graph(vec![
            fk("a", "b_id", "b", "id"),
            fk("b", "c_id", "c", "id"),
            fk("c", "a_id", "a", "id"),
        ]);
        assert!(resolve(&g, "a", "zzz").is_err());
        assert_eq!(resolve(&g, "a", "c").unwrap().hops(), 1);
    }

    proptest! {
        #[test]
        fn prop_chain_path_is_shortest(len in 2usize..12) {
            let fks = (0..len - 1)
                .map(|i| fk(&format!("t{i}"), "next_id", &format!("t{}", i + 1), "id"))
                .collect();
            let g = graph(fks);
            let path = resolve(&g, "t0", &format!("t{}", len - 1)).unwrap();
            prop_assert_eq!(path.path.len(), len);
            prop_assert_eq!(path.joins.len(), len - 1);
        }
    }
}
