//! Topological ordering of the combined task + service dependency graph.
//!
//! Nodes are visited in declaration order (tasks, then services) so the
//! result is deterministic. The walk uses an explicit stack instead of
//! recursion; a node found on the `visiting` set is a cycle.

use std::collections::{HashMap, HashSet};

use crate::config::ProjectConfig;
use crate::error::ResolveError;
use crate::types::EntityKind;

#[derive(Debug, Clone)]
struct Node {
	name: String,
	kind: EntityKind,
	deps: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
	nodes: Vec<Node>,
	index: HashMap<String, usize>,
}

impl DependencyGraph {
	/// Build the graph and check that every edge points at a declared name.
	pub fn new(config: &ProjectConfig) -> Result<Self, ResolveError> {
		let tasks = config.tasks.iter().map(|t| Node {
			name: t.name.clone(),
			kind: EntityKind::Task,
			deps: t.depends_on.clone(),
		});
		let services = config.services.iter().map(|s| Node {
			name: s.name.clone(),
			kind: EntityKind::Service,
			deps: s.depends_on.clone(),
		});
		let nodes: Vec<Node> = tasks.chain(services).collect();

		let index = nodes
			.iter()
			.enumerate()
			.map(|(i, n)| (n.name.clone(), i))
			.collect::<HashMap<_, _>>();

		for node in &nodes {
			for dep in &node.deps {
				if !index.contains_key(dep) {
					return Err(ResolveError::UnknownDependency {
						entity: node.name.clone(),
						dependency: dep.clone(),
					});
				}
			}
		}

		Ok(Self { nodes, index })
	}

	pub fn kind(&self, name: &str) -> Option<EntityKind> {
		self.index.get(name).map(|&i| self.nodes[i].kind)
	}

	pub fn dependencies(&self, name: &str) -> &[String] {
		self.index
			.get(name)
			.map(|&i| self.nodes[i].deps.as_slice())
			.unwrap_or(&[])
	}

	pub fn contains(&self, name: &str) -> bool {
		self.index.contains_key(name)
	}

	/// Start order for the whole graph, or for `target` plus everything it
	/// transitively depends on. Reverse it for shutdown.
	pub fn resolve_order(&self, target: Option<&str>) -> Result<Vec<String>, ResolveError> {
		let order = self.topological_order()?;

		let Some(target) = target else {
			return Ok(order);
		};
		let closure = self.closure(target)?;
		Ok(order.into_iter().filter(|n| closure.contains(n)).collect())
	}

	fn topological_order(&self) -> Result<Vec<String>, ResolveError> {
		let mut order = Vec::with_capacity(self.nodes.len());
		let mut visited = vec![false; self.nodes.len()];
		let mut visiting = vec![false; self.nodes.len()];

		for root in 0..self.nodes.len() {
			if visited[root] {
				continue;
			}

			// (node, index of the next dependency to look at)
			let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
			visiting[root] = true;

			while let Some(top) = stack.last_mut() {
				let (node, next) = *top;
				let deps = &self.nodes[node].deps;

				if next < deps.len() {
					top.1 += 1;
					let dep = self.index[&deps[next]];
					if visiting[dep] {
						return Err(ResolveError::Cycle(self.nodes[dep].name.clone()));
					}
					if !visited[dep] {
						visiting[dep] = true;
						stack.push((dep, 0));
					}
				} else {
					stack.pop();
					visiting[node] = false;
					visited[node] = true;
					order.push(self.nodes[node].name.clone());
				}
			}
		}

		Ok(order)
	}

	/// `target` and all of its transitive dependencies.
	pub fn closure(&self, target: &str) -> Result<HashSet<String>, ResolveError> {
		if !self.contains(target) {
			return Err(ResolveError::UnknownEntity(target.to_string()));
		}

		let mut seen = HashSet::new();
		let mut stack = vec![target.to_string()];
		while let Some(name) = stack.pop() {
			if !seen.insert(name.clone()) {
				continue;
			}
			for dep in self.dependencies(&name) {
				if !seen.contains(dep) {
					stack.push(dep.clone());
				}
			}
		}
		Ok(seen)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn graph(toml: &str) -> Result<DependencyGraph, ResolveError> {
		let config: ProjectConfig = toml::from_str(toml).unwrap();
		DependencyGraph::new(&config)
	}

	fn position(order: &[String], name: &str) -> usize {
		order.iter().position(|n| n == name).unwrap()
	}

	const DIAMOND: &str = r#"
[[tasks]]
name = "migrate"
command = "true"
depends_on = ["db"]

[[services]]
name = "web"
command = "true"
depends_on = ["api", "assets"]

[[services]]
name = "api"
command = "true"
depends_on = ["migrate", "db"]

[[services]]
name = "assets"
command = "true"

[[services]]
name = "db"
command = "true"

[[services]]
name = "worker"
command = "true"
"#;

	#[test]
	fn order_is_topological() {
		let g = graph(DIAMOND).unwrap();
		let order = g.resolve_order(None).unwrap();
		assert_eq!(order.len(), 6);
		for name in &order {
			for dep in g.dependencies(name) {
				assert!(
					position(&order, dep) < position(&order, name),
					"{dep} must come before {name} in {order:?}"
				);
			}
		}
	}

	#[test]
	fn order_is_deterministic() {
		let g = graph(DIAMOND).unwrap();
		assert_eq!(
			g.resolve_order(None).unwrap(),
			vec!["db", "migrate", "api", "assets", "web", "worker"]
		);
	}

	#[test]
	fn target_restricts_to_closure() {
		let g = graph(DIAMOND).unwrap();
		let order = g.resolve_order(Some("api")).unwrap();
		assert_eq!(order, vec!["db", "migrate", "api"]);
		assert!(!order.contains(&"worker".to_string()));
	}

	#[test]
	fn unknown_target_is_an_error() {
		let g = graph(DIAMOND).unwrap();
		assert_eq!(
			g.resolve_order(Some("nope")),
			Err(ResolveError::UnknownEntity("nope".into()))
		);
	}

	#[test]
	fn unknown_dependency_is_rejected() {
		let err = graph("[[services]]\nname = \"a\"\ncommand = \"x\"\ndepends_on = [\"ghost\"]\n").unwrap_err();
		assert_eq!(
			err,
			ResolveError::UnknownDependency { entity: "a".into(), dependency: "ghost".into() }
		);
	}

	#[test]
	fn cycle_names_a_member() {
		let g = graph(
			r#"
[[tasks]]
name = "setup"
command = "x"
depends_on = ["c"]

[[services]]
name = "a"
command = "x"
depends_on = ["b"]

[[services]]
name = "b"
command = "x"
depends_on = ["c"]

[[services]]
name = "c"
command = "x"
depends_on = ["a"]
"#,
		)
		.unwrap();
		match g.resolve_order(None) {
			Err(ResolveError::Cycle(name)) => {
				assert!(["a", "b", "c"].contains(&name.as_str()), "unexpected member {name}")
			}
			other => panic!("expected cycle, got {other:?}"),
		}
	}

	#[test]
	fn self_dependency_is_a_cycle() {
		let g = graph("[[services]]\nname = \"a\"\ncommand = \"x\"\ndepends_on = [\"a\"]\n").unwrap();
		assert_eq!(g.resolve_order(None), Err(ResolveError::Cycle("a".into())));
	}
}
