//! Graph Module
//!
//! In-memory topology graph guarded by a shared-read / exclusive-write lock.
//! Every committed mutation is announced to the registered listeners while
//! the exclusive lock is still held, so listeners observe mutations in
//! commit order. Listeners must not call back into the graph.

mod element;

pub use element::{Edge, Elements, Identifier, Metadata, Node};

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{RwLock, RwLockReadGuard};

use crate::error::{Error, Result};

/// Receives one callback per committed graph mutation
pub trait GraphListener: Send + Sync {
    fn on_node_added(&self, node: &Node);
    fn on_node_updated(&self, node: &Node);
    fn on_node_deleted(&self, node: &Node);
    fn on_edge_added(&self, edge: &Edge);
    fn on_edge_updated(&self, edge: &Edge);
    fn on_edge_deleted(&self, edge: &Edge);
}

#[derive(Default)]
struct Store {
    nodes: HashMap<Identifier, Node>,
    edges: HashMap<Identifier, Edge>,
}

/// Shared read access to the graph; the graph cannot change while held
pub struct GraphReadGuard<'a> {
    store: RwLockReadGuard<'a, Store>,
}

impl GraphReadGuard<'_> {
    /// Export every node and edge
    pub fn elements(&self) -> Elements {
        Elements::new(
            self.store.nodes.values().cloned().collect(),
            self.store.edges.values().cloned().collect(),
        )
    }

    pub fn node(&self, id: &Identifier) -> Option<&Node> {
        self.store.nodes.get(id)
    }

    pub fn edge(&self, id: &Identifier) -> Option<&Edge> {
        self.store.edges.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.store.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.store.edges.len()
    }
}

#[derive(Clone, Copy)]
enum Event<'a> {
    NodeAdded(&'a Node),
    NodeUpdated(&'a Node),
    NodeDeleted(&'a Node),
    EdgeAdded(&'a Edge),
    EdgeUpdated(&'a Edge),
    EdgeDeleted(&'a Edge),
}

/// Mutable node/edge store of one host
pub struct Graph {
    /// Host owning the elements created through this graph
    host: String,
    store: RwLock<Store>,
    listeners: RwLock<Vec<Weak<dyn GraphListener>>>,
}

impl Graph {
    /// Create an empty graph
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            store: RwLock::new(Store::default()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Register a listener. The graph keeps only a weak reference.
    pub fn add_listener(&self, listener: Weak<dyn GraphListener>) {
        self.listeners.write().push(listener);
    }

    /// Acquire the shared read lock
    pub fn read(&self) -> GraphReadGuard<'_> {
        GraphReadGuard {
            store: self.store.read(),
        }
    }

    /// Export a consistent snapshot of all elements
    pub fn elements(&self) -> Elements {
        self.read().elements()
    }

    pub fn get_node(&self, id: &Identifier) -> Option<Node> {
        self.read().node(id).cloned()
    }

    pub fn get_edge(&self, id: &Identifier) -> Option<Edge> {
        self.read().edge(id).cloned()
    }

    /// Add a node
    pub fn add_node(&self, id: Identifier, metadata: Metadata) -> Result<Node> {
        let mut store = self.store.write();
        if store.nodes.contains_key(&id) {
            return Err(Error::DuplicateElement(id));
        }

        let node = Node::new(id.clone(), self.host.clone(), metadata);
        store.nodes.insert(id, node.clone());
        self.notify(Event::NodeAdded(&node));
        Ok(node)
    }

    /// Update a node's metadata in place
    pub fn update_node<F>(&self, id: &Identifier, f: F) -> Result<Node>
    where
        F: FnOnce(&mut Metadata),
    {
        let mut store = self.store.write();
        let node = store
            .nodes
            .get_mut(id)
            .ok_or_else(|| Error::NodeNotFound(id.clone()))?;

        f(&mut node.metadata);
        node.touch();
        let node = node.clone();
        self.notify(Event::NodeUpdated(&node));
        Ok(node)
    }

    /// Delete a node along with every edge touching it
    pub fn delete_node(&self, id: &Identifier) -> Result<Node> {
        let mut store = self.store.write();
        if !store.nodes.contains_key(id) {
            return Err(Error::NodeNotFound(id.clone()));
        }

        let mut incident: Vec<Identifier> = store
            .edges
            .values()
            .filter(|edge| edge.touches(id))
            .map(|edge| edge.id.clone())
            .collect();
        incident.sort();

        for edge_id in incident {
            if let Some(edge) = store.edges.remove(&edge_id) {
                self.notify(Event::EdgeDeleted(&edge));
            }
        }

        let node = store
            .nodes
            .remove(id)
            .ok_or_else(|| Error::NodeNotFound(id.clone()))?;
        self.notify(Event::NodeDeleted(&node));
        Ok(node)
    }

    /// Add an edge between two existing nodes
    pub fn add_edge(
        &self,
        id: Identifier,
        parent: &Identifier,
        child: &Identifier,
        metadata: Metadata,
    ) -> Result<Edge> {
        let mut store = self.store.write();
        if store.edges.contains_key(&id) {
            return Err(Error::DuplicateElement(id));
        }
        for end in [parent, child] {
            if !store.nodes.contains_key(end) {
                return Err(Error::NodeNotFound(end.clone()));
            }
        }

        let edge = Edge::new(
            id.clone(),
            parent.clone(),
            child.clone(),
            self.host.clone(),
            metadata,
        );
        store.edges.insert(id, edge.clone());
        self.notify(Event::EdgeAdded(&edge));
        Ok(edge)
    }

    /// Update an edge's metadata in place
    pub fn update_edge<F>(&self, id: &Identifier, f: F) -> Result<Edge>
    where
        F: FnOnce(&mut Metadata),
    {
        let mut store = self.store.write();
        let edge = store
            .edges
            .get_mut(id)
            .ok_or_else(|| Error::EdgeNotFound(id.clone()))?;

        f(&mut edge.metadata);
        edge.touch();
        let edge = edge.clone();
        self.notify(Event::EdgeUpdated(&edge));
        Ok(edge)
    }

    /// Delete an edge
    pub fn delete_edge(&self, id: &Identifier) -> Result<Edge> {
        let mut store = self.store.write();
        let edge = store
            .edges
            .remove(id)
            .ok_or_else(|| Error::EdgeNotFound(id.clone()))?;
        self.notify(Event::EdgeDeleted(&edge));
        Ok(edge)
    }

    /// Dispatch an event to live listeners. Called with the store's write
    /// lock held.
    fn notify(&self, event: Event<'_>) {
        let listeners: Vec<Arc<dyn GraphListener>> = {
            let mut listeners = self.listeners.write();
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };

        for listener in listeners {
            match event {
                Event::NodeAdded(n) => listener.on_node_added(n),
                Event::NodeUpdated(n) => listener.on_node_updated(n),
                Event::NodeDeleted(n) => listener.on_node_deleted(n),
                Event::EdgeAdded(e) => listener.on_edge_added(e),
                Event::EdgeUpdated(e) => listener.on_edge_updated(e),
                Event::EdgeDeleted(e) => listener.on_edge_deleted(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records events as "<kind>:<id>" strings
    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<String>>,
    }

    impl RecordingListener {
        fn push(&self, kind: &str, id: &Identifier) {
            self.events.lock().push(format!("{}:{}", kind, id));
        }
    }

    impl GraphListener for RecordingListener {
        fn on_node_added(&self, node: &Node) {
            self.push("node_added", &node.id);
        }
        fn on_node_updated(&self, node: &Node) {
            self.push("node_updated", &node.id);
        }
        fn on_node_deleted(&self, node: &Node) {
            self.push("node_deleted", &node.id);
        }
        fn on_edge_added(&self, edge: &Edge) {
            self.push("edge_added", &edge.id);
        }
        fn on_edge_updated(&self, edge: &Edge) {
            self.push("edge_updated", &edge.id);
        }
        fn on_edge_deleted(&self, edge: &Edge) {
            self.push("edge_deleted", &edge.id);
        }
    }

    fn listen(graph: &Graph) -> Arc<RecordingListener> {
        let listener = Arc::new(RecordingListener::default());
        let weak = Arc::downgrade(&listener) as Weak<dyn GraphListener>;
        graph.add_listener(weak);
        listener
    }

    #[test]
    fn test_mutations_emit_events_in_order() {
        let graph = Graph::new("host-1");
        let listener = listen(&graph);

        graph.add_node("a".into(), Metadata::new()).unwrap();
        graph.add_node("b".into(), Metadata::new()).unwrap();
        graph
            .add_edge("a-b".into(), &"a".into(), &"b".into(), Metadata::new())
            .unwrap();
        graph
            .update_node(&"a".into(), |m| {
                m.insert("state".into(), "UP".into());
            })
            .unwrap();
        graph.delete_node(&"b".into()).unwrap();

        assert_eq!(
            *listener.events.lock(),
            vec![
                "node_added:a",
                "node_added:b",
                "edge_added:a-b",
                "node_updated:a",
                "edge_deleted:a-b",
                "node_deleted:b",
            ]
        );

        let elements = graph.elements();
        assert_eq!(elements.nodes.len(), 1);
        assert!(elements.edges.is_empty());
        assert_eq!(elements.nodes[0].revision, 1);
        assert_eq!(elements.nodes[0].host, "host-1");
    }

    #[test]
    fn test_invalid_mutations_emit_nothing() {
        let graph = Graph::new("host-1");
        let listener = listen(&graph);

        graph.add_node("a".into(), Metadata::new()).unwrap();
        assert!(matches!(
            graph.add_node("a".into(), Metadata::new()),
            Err(Error::DuplicateElement(_))
        ));
        assert!(matches!(
            graph.add_edge("e".into(), &"a".into(), &"missing".into(), Metadata::new()),
            Err(Error::NodeNotFound(_))
        ));
        assert!(matches!(
            graph.update_edge(&"e".into(), |_| {}),
            Err(Error::EdgeNotFound(_))
        ));
        assert!(matches!(
            graph.delete_node(&"missing".into()),
            Err(Error::NodeNotFound(_))
        ));

        assert_eq!(listener.events.lock().len(), 1);
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let graph = Graph::new("host-1");
        let listener = listen(&graph);
        drop(listener);

        graph.add_node("a".into(), Metadata::new()).unwrap();
        assert!(graph.listeners.read().is_empty());
    }

    #[test]
    fn test_read_guard_is_consistent() {
        let graph = Graph::new("host-1");
        graph.add_node("a".into(), Metadata::new()).unwrap();

        let guard = graph.read();
        assert_eq!(guard.node_count(), 1);
        assert_eq!(guard.edge_count(), 0);
        assert!(guard.node(&"a".into()).is_some());
        assert_eq!(guard.elements().len(), 1);
    }
}
