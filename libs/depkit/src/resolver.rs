//! Dependency graph resolution.
//!
//! The graph is rebuilt on every request: nodes are component names plus a
//! synthetic root standing for the requester, edges point from a dependent to
//! its dependency. Cycles are reported during the DFS, so the topological
//! sort only ever sees acyclic input.

use std::collections::{HashMap, VecDeque};

use crate::error::{BrokerError, Kind};

/// Index of the synthetic root node.
const ROOT: usize = 0;

struct Graph<'a> {
    /// `nodes[ROOT]` is a placeholder and never looked up.
    nodes: Vec<&'a str>,
    index: HashMap<&'a str, usize>,
    adj: Vec<Vec<usize>>,
}

impl<'a> Graph<'a> {
    fn new() -> Self {
        Self {
            nodes: vec![""],
            index: HashMap::new(),
            adj: vec![Vec::new()],
        }
    }

    /// Returns the node index and whether it was just added.
    fn node(&mut self, name: &'a str) -> (usize, bool) {
        if let Some(&i) = self.index.get(name) {
            return (i, false);
        }
        let i = self.nodes.len();
        self.nodes.push(name);
        self.index.insert(name, i);
        self.adj.push(Vec::new());
        (i, true)
    }

    fn edge(&mut self, from: usize, to: usize) {
        if !self.adj[from].contains(&to) {
            self.adj[from].push(to);
        }
    }
}

/// Order `roots` and everything they transitively require so that each name
/// comes after all of its dependencies.
///
/// `lookup` returns the direct dependencies of a name, `None` if the name is
/// unknown. `on_discover` runs once per discovered name, before any edge of
/// that name is followed.
pub(crate) fn resolve_order<'a, L, C>(
    kind: Kind,
    requester: &str,
    roots: &'a [String],
    lookup: L,
    mut on_discover: C,
) -> Result<Vec<String>, BrokerError>
where
    L: Fn(&str) -> Option<&'a [String]>,
    C: FnMut(&str) -> Result<(), BrokerError>,
{
    let mut graph = Graph::new();
    let mut chain: Vec<&'a str> = Vec::new();

    fn visit<'a, L, C>(
        kind: Kind,
        parent: &str,
        name: &'a str,
        lookup: &L,
        on_discover: &mut C,
        graph: &mut Graph<'a>,
        chain: &mut Vec<&'a str>,
    ) -> Result<usize, BrokerError>
    where
        L: Fn(&str) -> Option<&'a [String]>,
        C: FnMut(&str) -> Result<(), BrokerError>,
    {
        if let Some(start) = chain.iter().position(|&n| n == name) {
            let mut path: Vec<String> = chain[start..].iter().map(|n| n.to_string()).collect();
            path.push(name.to_string());
            return Err(BrokerError::Cycle { kind, path });
        }

        let deps = lookup(name).ok_or_else(|| BrokerError::UnknownDependency {
            kind,
            component: parent.to_string(),
            depends_on_kind: kind,
            depends_on: name.to_string(),
        })?;

        let (u, fresh) = graph.node(name);
        if !fresh {
            return Ok(u);
        }
        on_discover(name)?;

        chain.push(name);
        for dep in deps {
            let v = visit(kind, name, dep.as_str(), lookup, on_discover, graph, chain)?;
            graph.edge(u, v);
        }
        chain.pop();

        Ok(u)
    }

    for root in roots {
        let v = visit(
            kind,
            requester,
            root.as_str(),
            &lookup,
            &mut on_discover,
            &mut graph,
            &mut chain,
        )?;
        graph.edge(ROOT, v);
    }

    let order = kahn(&graph.adj);
    let resolved: Vec<String> = order
        .into_iter()
        .rev()
        .filter(|&i| i != ROOT)
        .map(|i| graph.nodes[i].to_string())
        .collect();

    tracing::debug!(%kind, requester, order = ?resolved, "Dependency order resolved (topo)");
    Ok(resolved)
}

/// Kahn's algorithm over an acyclic adjacency list; ties keep insertion order.
fn kahn(adj: &[Vec<usize>]) -> Vec<usize> {
    let mut indeg = vec![0usize; adj.len()];
    for targets in adj {
        for &t in targets {
            indeg[t] += 1;
        }
    }

    let mut q: VecDeque<usize> = indeg
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(adj.len());
    while let Some(u) = q.pop_front() {
        order.push(u);
        for &w in &adj[u] {
            indeg[w] -= 1;
            if indeg[w] == 0 {
                q.push_back(w);
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Fixture(HashMap<String, Vec<String>>);

    impl Fixture {
        fn new(edges: &[(&str, &[&str])]) -> Self {
            Self(
                edges
                    .iter()
                    .map(|(n, deps)| (n.to_string(), deps.iter().map(|d| d.to_string()).collect()))
                    .collect(),
            )
        }

        fn resolve(&self, roots: &[&str]) -> Result<Vec<String>, BrokerError> {
            let roots: Vec<String> = roots.iter().map(|r| r.to_string()).collect();
            resolve_order(
                Kind::Singleton,
                "svc",
                &roots,
                |n| self.0.get(n).map(Vec::as_slice),
                |_| Ok(()),
            )
        }
    }

    fn pos(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn dependencies_come_first() {
        let f = Fixture::new(&[
            ("app", &["db", "cache"]),
            ("cache", &["config"]),
            ("db", &["config", "pool"]),
            ("pool", &[]),
            ("config", &[]),
        ]);
        let order = f.resolve(&["app"]).unwrap();
        assert_eq!(order.len(), 5);
        for (n, deps) in &f.0 {
            for d in deps {
                assert!(pos(&order, d) < pos(&order, n), "{d} must precede {n}: {order:?}");
            }
        }
        assert_eq!(order.last().map(String::as_str), Some("app"));
    }

    #[test]
    fn isolated_roots_are_included() {
        let f = Fixture::new(&[("a", &[]), ("b", &[]), ("c", &["a"])]);
        let order = f.resolve(&["b", "c"]).unwrap();
        assert_eq!(order.len(), 3);
        assert!(order.contains(&"b".to_string()));
        assert!(pos(&order, "a") < pos(&order, "c"));
    }

    #[test]
    fn unrequested_names_are_left_out() {
        let f = Fixture::new(&[("a", &[]), ("b", &["a"]), ("unused", &[])]);
        assert_eq!(f.resolve(&["b"]).unwrap(), vec!["a", "b"]);
        assert!(f.resolve(&[]).unwrap().is_empty());
    }

    #[test]
    fn diamond_resolves_each_name_once() {
        let f = Fixture::new(&[("top", &["l", "r"]), ("l", &["base"]), ("r", &["base"]), ("base", &[])]);
        let order = f.resolve(&["top", "l"]).unwrap();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], "base");
        assert_eq!(order[3], "top");
    }

    #[test]
    fn cycle_reports_the_chain() {
        let f = Fixture::new(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"]), ("d", &[])]);
        match f.resolve(&["d", "a"]).unwrap_err() {
            BrokerError::Cycle { kind, path } => {
                assert_eq!(kind, Kind::Singleton);
                assert_eq!(path, vec!["a", "b", "c", "a"]);
            }
            other => panic!("expected Cycle, got: {other:?}"),
        }
    }

    #[test]
    fn cycle_below_an_acyclic_prefix_lists_only_the_loop() {
        let f = Fixture::new(&[("entry", &["x"]), ("x", &["y"]), ("y", &["x"])]);
        let err = f.resolve(&["entry"]).unwrap_err();
        assert_eq!(err.to_string(), "cyclic singleton dependency detected: x -> y -> x");
    }

    #[test]
    fn self_loop_is_a_cycle_of_length_one() {
        let f = Fixture::new(&[("a", &["a"])]);
        match f.resolve(&["a"]).unwrap_err() {
            BrokerError::Cycle { path, .. } => assert_eq!(path, vec!["a", "a"]),
            other => panic!("expected Cycle, got: {other:?}"),
        }
    }

    #[test]
    fn unknown_name_names_its_dependent() {
        let f = Fixture::new(&[("a", &["ghost"])]);
        match f.resolve(&["a"]).unwrap_err() {
            BrokerError::UnknownDependency {
                component,
                depends_on,
                ..
            } => {
                assert_eq!(component, "a");
                assert_eq!(depends_on, "ghost");
            }
            other => panic!("expected UnknownDependency, got: {other:?}"),
        }
    }

    #[test]
    fn discover_hook_runs_once_per_name_and_can_abort() {
        let f = Fixture::new(&[("a", &["b", "c"]), ("b", &["c"]), ("c", &[])]);
        let roots = vec!["a".to_string(), "b".to_string()];
        let mut seen = Vec::new();
        resolve_order(
            Kind::Action,
            "svc",
            &roots,
            |n| f.0.get(n).map(Vec::as_slice),
            |n| {
                seen.push(n.to_string());
                Ok(())
            },
        )
        .unwrap();
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c"]);

        let err = resolve_order(
            Kind::Action,
            "svc",
            &roots,
            |n| f.0.get(n).map(Vec::as_slice),
            |n| {
                if n == "c" {
                    Err(BrokerError::ContractViolation { action: n.into() })
                } else {
                    Ok(())
                }
            },
        )
        .unwrap_err();
        assert!(matches!(err, BrokerError::ContractViolation { .. }));
    }
}
