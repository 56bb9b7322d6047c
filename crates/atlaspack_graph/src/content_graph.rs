use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use anyhow::anyhow;

use crate::{Graph, NodeId};

/// A [`Graph`] whose nodes can also be addressed by a string content key.
#[derive(Clone, Debug)]
pub struct ContentGraph<N, E> {
  graph: Graph<N, E>,
  content_key_to_node_id: HashMap<String, NodeId>,
  node_id_to_content_key: HashMap<NodeId, String>,
}

impl<N, E> Default for ContentGraph<N, E> {
  fn default() -> Self {
    Self {
      graph: Graph::default(),
      content_key_to_node_id: HashMap::new(),
      node_id_to_content_key: HashMap::new(),
    }
  }
}

impl<N, E> ContentGraph<N, E>
where
  E: Copy + PartialEq,
{
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_node_by_content_key(
    &mut self,
    content_key: impl Into<String>,
    node: N,
  ) -> anyhow::Result<NodeId> {
    let content_key = content_key.into();
    if self.content_key_to_node_id.contains_key(&content_key) {
      return Err(anyhow!("Graph already has content key {content_key}"));
    }

    let node_id = self.graph.add_node(node);
    self.node_id_to_content_key.insert(node_id, content_key.clone());
    self.content_key_to_node_id.insert(content_key, node_id);
    Ok(node_id)
  }

  /// Returns the existing node for `content_key`, otherwise adds `node`.
  pub fn add_node_by_content_key_if_needed(&mut self, content_key: &str, node: N) -> NodeId {
    if let Some(node_id) = self.content_key_to_node_id.get(content_key) {
      return *node_id;
    }

    let node_id = self.graph.add_node(node);
    self
      .node_id_to_content_key
      .insert(node_id, content_key.to_string());
    self
      .content_key_to_node_id
      .insert(content_key.to_string(), node_id);
    node_id
  }

  pub fn get_node_id_by_content_key(&self, content_key: &str) -> Option<NodeId> {
    self.content_key_to_node_id.get(content_key).copied()
  }

  pub fn get_node_by_content_key(&self, content_key: &str) -> Option<&N> {
    self
      .get_node_id_by_content_key(content_key)
      .and_then(|node_id| self.graph.get_node(node_id))
  }

  pub fn has_content_key(&self, content_key: &str) -> bool {
    self.content_key_to_node_id.contains_key(content_key)
  }

  pub fn get_content_key(&self, node_id: NodeId) -> Option<&str> {
    self.node_id_to_content_key.get(&node_id).map(String::as_str)
  }

  /// Removes a node and releases its content key.
  pub fn remove_node(&mut self, node_id: NodeId) -> anyhow::Result<N> {
    let node = self.graph.remove_node(node_id)?;
    if let Some(content_key) = self.node_id_to_content_key.remove(&node_id) {
      self.content_key_to_node_id.remove(&content_key);
    }
    Ok(node)
  }
}

impl<N, E> Deref for ContentGraph<N, E> {
  type Target = Graph<N, E>;

  fn deref(&self) -> &Self::Target {
    &self.graph
  }
}

impl<N, E> DerefMut for ContentGraph<N, E> {
  fn deref_mut(&mut self) -> &mut Self::Target {
    &mut self.graph
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use crate::EdgeFilter;

  use super::*;

  #[test]
  fn nodes_are_addressable_by_content_key() {
    let mut graph: ContentGraph<&str, ()> = ContentGraph::new();
    let a = graph.add_node_by_content_key("a", "first").unwrap();
    let b = graph.add_node_by_content_key_if_needed("b", "second");

    assert_eq!(graph.get_node_id_by_content_key("a"), Some(a));
    assert_eq!(graph.get_node_by_content_key("b"), Some(&"second"));
    assert_eq!(graph.get_content_key(b), Some("b"));
    assert!(graph.has_content_key("a"));
    assert!(!graph.has_content_key("c"));
  }

  #[test]
  fn add_if_needed_returns_existing_node() {
    let mut graph: ContentGraph<&str, ()> = ContentGraph::new();
    let a = graph.add_node_by_content_key_if_needed("a", "first");
    let again = graph.add_node_by_content_key_if_needed("a", "ignored");

    assert_eq!(a, again);
    assert_eq!(graph.get_node(a), Some(&"first"));
    assert_eq!(graph.node_count(), 1);
  }

  #[test]
  fn duplicate_content_keys_are_rejected() {
    let mut graph: ContentGraph<&str, ()> = ContentGraph::new();
    graph.add_node_by_content_key("a", "first").unwrap();

    assert!(graph.add_node_by_content_key("a", "second").is_err());
  }

  #[test]
  fn removing_a_node_releases_its_key() {
    let mut graph: ContentGraph<&str, ()> = ContentGraph::new();
    let a = graph.add_node_by_content_key("a", "first").unwrap();
    let b = graph.add_node_by_content_key("b", "second").unwrap();
    graph.add_edge(a, b, ()).unwrap();

    graph.remove_node(a).unwrap();

    assert!(!graph.has_content_key("a"));
    assert!(graph.get_node_ids_connected_to(b, EdgeFilter::All).is_empty());

    let replacement = graph.add_node_by_content_key("a", "third").unwrap();
    assert_ne!(replacement, a);
  }
}
