//! IG-031: Keyed dependency graph.
//!
//! An edge `a -> b` means `a` waits for `b`. Edges that would close a cycle
//! are refused, so the graph is acyclic by construction. Topological order
//! uses Kahn's algorithm with key tie-breaking.

use super::vertex::Key;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Clone)]
pub struct DepGraph<V> {
    nodes: BTreeMap<Key, V>,
    out: BTreeMap<Key, BTreeSet<Key>>,
    inc: BTreeMap<Key, BTreeSet<Key>>,
}

impl<V> Default for DepGraph<V> {
    fn default() -> Self {
        DepGraph {
            nodes: BTreeMap::new(),
            out: BTreeMap::new(),
            inc: BTreeMap::new(),
        }
    }
}

impl<V> DepGraph<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn get(&self, key: &Key) -> Option<&V> {
        self.nodes.get(key)
    }

    pub fn get_mut(&mut self, key: &Key) -> Option<&mut V> {
        self.nodes.get_mut(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.nodes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &V)> {
        self.nodes.iter()
    }

    pub fn add(&mut self, key: Key, value: V) -> Result<(), String> {
        if self.nodes.contains_key(&key) {
            return Err(format!("vertex {} already exists", key));
        }
        self.out.insert(key.clone(), BTreeSet::new());
        self.inc.insert(key.clone(), BTreeSet::new());
        self.nodes.insert(key, value);
        Ok(())
    }

    /// Swap the value stored under `key`, keeping its edges.
    pub fn replace(&mut self, key: &Key, value: V) -> Result<(), String> {
        let slot = self
            .nodes
            .get_mut(key)
            .ok_or_else(|| format!("vertex {} not found", key))?;
        *slot = value;
        Ok(())
    }

    /// Remove a vertex and every edge touching it.
    pub fn remove(&mut self, key: &Key) -> Option<V> {
        let value = self.nodes.remove(key)?;
        for t in self.out.remove(key).unwrap_or_default() {
            if let Some(set) = self.inc.get_mut(&t) {
                set.remove(key);
            }
        }
        for s in self.inc.remove(key).unwrap_or_default() {
            if let Some(set) = self.out.get_mut(&s) {
                set.remove(key);
            }
        }
        Some(value)
    }

    /// Move a vertex and its edges to a new key. Fails when `new` is taken.
    pub fn rekey(&mut self, old: &Key, new: Key) -> Result<(), String> {
        if old == &new {
            return Ok(());
        }
        if self.nodes.contains_key(&new) {
            return Err(format!("vertex {} already exists", new));
        }
        let value = self
            .nodes
            .remove(old)
            .ok_or_else(|| format!("vertex {} not found", old))?;
        let out = self.out.remove(old).unwrap_or_default();
        let inc = self.inc.remove(old).unwrap_or_default();
        for t in &out {
            if let Some(set) = self.inc.get_mut(t) {
                set.remove(old);
                set.insert(new.clone());
            }
        }
        for s in &inc {
            if let Some(set) = self.out.get_mut(s) {
                set.remove(old);
                set.insert(new.clone());
            }
        }
        self.out.insert(new.clone(), out);
        self.inc.insert(new.clone(), inc);
        self.nodes.insert(new, value);
        Ok(())
    }

    /// Add `source -> target`. Returns `Ok(false)` when the edge exists.
    pub fn add_edge(&mut self, source: &Key, target: &Key) -> Result<bool, String> {
        if !self.nodes.contains_key(source) {
            return Err(format!("source {} not found", source));
        }
        if !self.nodes.contains_key(target) {
            return Err(format!("target {} not found", target));
        }
        if self.has_edge(source, target) {
            return Ok(false);
        }
        if source == target || self.reaches(target, source) {
            return Err(format!("edge {} -> {} would create a cycle", source, target));
        }
        self.out.entry(source.clone()).or_default().insert(target.clone());
        self.inc.entry(target.clone()).or_default().insert(source.clone());
        Ok(true)
    }

    pub fn has_edge(&self, source: &Key, target: &Key) -> bool {
        self.out.get(source).is_some_and(|s| s.contains(target))
    }

    pub fn remove_edge(&mut self, source: &Key, target: &Key) {
        if let Some(set) = self.out.get_mut(source) {
            set.remove(target);
        }
        if let Some(set) = self.inc.get_mut(target) {
            set.remove(source);
        }
    }

    /// Drop every edge, keeping the vertices.
    pub fn clear_edges(&mut self) {
        for set in self.out.values_mut() {
            set.clear();
        }
        for set in self.inc.values_mut() {
            set.clear();
        }
    }

    /// Keys this vertex waits for.
    pub fn dependencies(&self, key: &Key) -> impl Iterator<Item = &Key> {
        self.out.get(key).into_iter().flatten()
    }

    /// Keys waiting for this vertex.
    pub fn dependents(&self, key: &Key) -> impl Iterator<Item = &Key> {
        self.inc.get(key).into_iter().flatten()
    }

    pub fn out_degree(&self, key: &Key) -> usize {
        self.out.get(key).map_or(0, BTreeSet::len)
    }

    pub fn in_degree(&self, key: &Key) -> usize {
        self.inc.get(key).map_or(0, BTreeSet::len)
    }

    pub fn edges(&self) -> impl Iterator<Item = (&Key, &Key)> {
        self.out
            .iter()
            .flat_map(|(s, ts)| ts.iter().map(move |t| (s, t)))
    }

    fn reaches(&self, from: &Key, to: &Key) -> bool {
        let mut seen = BTreeSet::new();
        let mut stack = vec![from];
        while let Some(cur) = stack.pop() {
            if cur == to {
                return true;
            }
            if !seen.insert(cur) {
                continue;
            }
            stack.extend(self.dependencies(cur));
        }
        false
    }

    /// Kahn's algorithm: dependents before their dependencies, ties broken
    /// by key order.
    pub fn topological_order(&self) -> Vec<Key> {
        let mut in_degree: BTreeMap<&Key, usize> =
            self.nodes.keys().map(|k| (k, self.in_degree(k))).collect();
        let mut queue: VecDeque<&Key> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(k, _)| *k)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(current) = queue.pop_front() {
            order.push(current.clone());
            let mut next_ready = Vec::new();
            for next in self.dependencies(current) {
                if let Some(d) = in_degree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        next_ready.push(next);
                    }
                }
            }
            next_ready.sort();
            queue.extend(next_ready);
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PropertyRef;

    fn key(s: &str) -> Key {
        Key::Property(PropertyRef::parse(s).unwrap())
    }

    #[test]
    fn test_ig031_refuses_cycles() {
        let mut g: DepGraph<()> = DepGraph::new();
        for k in ["p:a:x#A", "p:a:x#B", "p:a:x#C"] {
            g.add(key(k), ()).unwrap();
        }
        assert!(g.add_edge(&key("p:a:x#A"), &key("p:a:x#B")).unwrap());
        assert!(g.add_edge(&key("p:a:x#B"), &key("p:a:x#C")).unwrap());
        assert!(!g.add_edge(&key("p:a:x#A"), &key("p:a:x#B")).unwrap());
        assert!(g.add_edge(&key("p:a:x#C"), &key("p:a:x#A")).is_err());
        assert!(g.add_edge(&key("p:a:x#A"), &key("p:a:x#A")).is_err());
    }

    #[test]
    fn test_ig031_remove_drops_edges() {
        let mut g: DepGraph<u8> = DepGraph::new();
        g.add(key("p:a:x#A"), 1).unwrap();
        g.add(key("p:a:x#B"), 2).unwrap();
        g.add_edge(&key("p:a:x#A"), &key("p:a:x#B")).unwrap();
        assert_eq!(g.remove(&key("p:a:x#B")), Some(2));
        assert_eq!(g.out_degree(&key("p:a:x#A")), 0);
        assert_eq!(g.edges().count(), 0);
    }

    #[test]
    fn test_ig031_rekey_keeps_edges() {
        let mut g: DepGraph<u8> = DepGraph::new();
        for k in ["p:a:x#A", "p:a:x#B", "p:a:x#C"] {
            g.add(key(k), 0).unwrap();
        }
        g.add_edge(&key("p:a:x#A"), &key("p:a:x#B")).unwrap();
        g.add_edge(&key("p:a:x#B"), &key("p:a:x#C")).unwrap();
        g.rekey(&key("p:a:x#B"), key("p:a:y#B")).unwrap();
        assert!(!g.contains(&key("p:a:x#B")));
        assert!(g.has_edge(&key("p:a:x#A"), &key("p:a:y#B")));
        assert!(g.has_edge(&key("p:a:y#B"), &key("p:a:x#C")));
        assert_eq!(g.in_degree(&key("p:a:x#C")), 1);
        assert!(g.rekey(&key("p:a:y#B"), key("p:a:x#A")).is_err());
    }

    #[test]
    fn test_ig031_topological_order() {
        let mut g: DepGraph<()> = DepGraph::new();
        for k in ["p:a:x#D", "p:a:x#C", "p:a:x#B", "p:a:x#A"] {
            g.add(key(k), ()).unwrap();
        }
        // A waits for C, B waits for C, C waits for D
        g.add_edge(&key("p:a:x#A"), &key("p:a:x#C")).unwrap();
        g.add_edge(&key("p:a:x#B"), &key("p:a:x#C")).unwrap();
        g.add_edge(&key("p:a:x#C"), &key("p:a:x#D")).unwrap();
        let order: Vec<String> = g.topological_order().iter().map(|k| k.to_string()).collect();
        assert_eq!(order, vec!["p:a:x#A", "p:a:x#B", "p:a:x#C", "p:a:x#D"]);
    }
}
