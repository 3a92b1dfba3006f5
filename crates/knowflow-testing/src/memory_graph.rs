//! In-memory graph store with snapshot transactions.
//!
//! `begin` clones the shared state; writes mutate the clone and `commit`
//! swaps it back in. Aborted transactions leave nothing behind. Concurrent
//! committers are last-write-wins, which is enough for tests exercising a
//! single sync runner per instance.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use knowflow::models::{AppUser, AppUserGroup, Record, RecordGroup};
use knowflow::storage::graph::{
    collections, edges, node_id, Edge, GraphStore, GraphTx, RelationType,
};
use knowflow::{Error, Result};
use parking_lot::RwLock;
use serde_json::Value;

const EDGE_COLLECTIONS: &[&str] = &[
    edges::IS_OF_TYPE,
    edges::RECORD_RELATIONS,
    edges::BELONGS_TO,
    edges::PERMISSIONS,
];

#[derive(Clone, Default)]
struct GraphData {
    nodes: HashMap<String, BTreeMap<String, Value>>,
    edges: HashMap<String, Vec<Edge>>,
}

impl GraphData {
    fn upsert_node(&mut self, collection: &str, doc: Value) -> Result<()> {
        let key = doc
            .get("_key")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::integrity(format!("node for {collection} has no _key")))?;
        self.nodes
            .entry(collection.to_string())
            .or_default()
            .insert(key, doc);
        Ok(())
    }

    fn upsert_edge(&mut self, collection: &str, edge: Edge) {
        let slot = self.edges.entry(collection.to_string()).or_default();
        match slot
            .iter_mut()
            .find(|existing| existing.from == edge.from && existing.to == edge.to)
        {
            Some(existing) => *existing = edge,
            None => slot.push(edge),
        }
    }

    fn find_node<T, F>(&self, collection: &str, predicate: F) -> Result<Option<T>>
    where
        T: serde::de::DeserializeOwned,
        F: Fn(&Value) -> bool,
    {
        let Some(docs) = self.nodes.get(collection) else {
            return Ok(None);
        };
        for doc in docs.values() {
            if predicate(doc) {
                let parsed = serde_json::from_value(doc.clone())
                    .map_err(|e| Error::serialization(e.to_string()))?;
                return Ok(Some(parsed));
            }
        }
        Ok(None)
    }
}

/// Shared handle to the in-memory graph.
#[derive(Clone, Default)]
pub struct MemoryGraphStore {
    data: Arc<RwLock<GraphData>>,
}

impl MemoryGraphStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with one organization node.
    #[must_use]
    pub fn with_org(org_key: &str) -> Self {
        let store = Self::new();
        {
            let mut data = store.data.write();
            data.upsert_node(
                collections::ORGS,
                serde_json::json!({
                    "_key": org_key,
                    "accountType": "enterprise",
                    "name": "Test Org",
                    "isActive": true,
                }),
            )
            .unwrap();
        }
        store
    }

    /// Seed an active user. Handy for permission tests.
    pub fn seed_user(&self, org_key: &str, email: &str) -> String {
        let key = uuid::Uuid::new_v4().to_string();
        let mut data = self.data.write();
        data.upsert_node(
            collections::USERS,
            serde_json::json!({
                "_key": key,
                "orgId": org_key,
                "appName": "TEST",
                "connectorId": "test",
                "sourceUserId": key,
                "email": email,
                "isActive": true,
                "createdAtTimestamp": 0,
                "updatedAtTimestamp": 0,
            }),
        )
        .unwrap();
        key
    }

    /// Snapshot of all nodes in a collection.
    #[must_use]
    pub fn nodes(&self, collection: &str) -> Vec<Value> {
        self.data
            .read()
            .nodes
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of one node.
    #[must_use]
    pub fn node(&self, collection: &str, key: &str) -> Option<Value> {
        self.data
            .read()
            .nodes
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned()
    }

    /// Snapshot of all edges in a collection.
    #[must_use]
    pub fn edges(&self, collection: &str) -> Vec<Edge> {
        self.data
            .read()
            .edges
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Edges in `collection` pointing at `to`.
    #[must_use]
    pub fn edges_to(&self, to: &str, collection: &str) -> Vec<Edge> {
        self.edges(collection)
            .into_iter()
            .filter(|edge| edge.to == to)
            .collect()
    }

    /// All edges (any collection) touching `node`.
    #[must_use]
    pub fn edges_touching(&self, node: &str) -> Vec<Edge> {
        let data = self.data.read();
        data.edges
            .values()
            .flatten()
            .filter(|edge| edge.from == node || edge.to == node)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn begin(&self) -> Result<Box<dyn GraphTx>> {
        let working = self.data.read().clone();
        Ok(Box::new(MemoryGraphTx {
            shared: self.data.clone(),
            working,
        }))
    }
}

struct MemoryGraphTx {
    shared: Arc<RwLock<GraphData>>,
    working: GraphData,
}

#[async_trait]
impl GraphTx for MemoryGraphTx {
    async fn batch_upsert_nodes(&mut self, docs: Vec<Value>, collection: &str) -> Result<()> {
        for doc in docs {
            self.working.upsert_node(collection, doc)?;
        }
        Ok(())
    }

    async fn batch_create_edges(&mut self, edge_docs: Vec<Edge>, collection: &str) -> Result<()> {
        for edge in edge_docs {
            self.working.upsert_edge(collection, edge);
        }
        Ok(())
    }

    async fn get_node(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .working
            .nodes
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned())
    }

    async fn get_record(&self, key: &str) -> Result<Option<Record>> {
        self.working.find_node(collections::RECORDS, |doc| {
            doc.get("_key").and_then(Value::as_str) == Some(key)
        })
    }

    async fn get_record_by_external_id(
        &self,
        connector_name: &str,
        external_id: &str,
    ) -> Result<Option<Record>> {
        self.working.find_node(collections::RECORDS, |doc| {
            doc.get("connectorName").and_then(Value::as_str) == Some(connector_name)
                && doc.get("externalRecordId").and_then(Value::as_str) == Some(external_id)
        })
    }

    async fn get_record_group_by_external_id(
        &self,
        connector_name: &str,
        external_id: &str,
    ) -> Result<Option<RecordGroup>> {
        self.working.find_node(collections::RECORD_GROUPS, |doc| {
            doc.get("connectorName").and_then(Value::as_str) == Some(connector_name)
                && doc.get("externalGroupId").and_then(Value::as_str) == Some(external_id)
        })
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<AppUser>> {
        self.working.find_node(collections::USERS, |doc| {
            doc.get("email").and_then(Value::as_str) == Some(email)
        })
    }

    async fn get_user_group_by_external_id(
        &self,
        connector_name: &str,
        external_id: &str,
    ) -> Result<Option<AppUserGroup>> {
        self.working.find_node(collections::GROUPS, |doc| {
            doc.get("appName").and_then(Value::as_str) == Some(connector_name)
                && doc.get("sourceUserGroupId").and_then(Value::as_str) == Some(external_id)
        })
    }

    async fn get_edge(&self, from: &str, to: &str, collection: &str) -> Result<Option<Edge>> {
        Ok(self
            .working
            .edges
            .get(collection)
            .and_then(|slot| slot.iter().find(|e| e.from == from && e.to == to))
            .cloned())
    }

    async fn get_edges_to(&self, to: &str, collection: &str) -> Result<Vec<Edge>> {
        Ok(self
            .working
            .edges
            .get(collection)
            .map(|slot| slot.iter().filter(|e| e.to == to).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_records_with_parent(&self) -> Result<Vec<Record>> {
        let Some(docs) = self.working.nodes.get(collections::RECORDS) else {
            return Ok(Vec::new());
        };
        let mut records = Vec::new();
        for doc in docs.values() {
            if doc
                .get("parentExternalRecordId")
                .and_then(Value::as_str)
                .is_some()
            {
                records.push(
                    serde_json::from_value(doc.clone())
                        .map_err(|e| Error::serialization(e.to_string()))?,
                );
            }
        }
        Ok(records)
    }

    async fn create_record_relation(
        &mut self,
        parent_key: &str,
        child_key: &str,
        relation: RelationType,
    ) -> Result<()> {
        let edge = Edge::new(
            node_id(collections::RECORDS, parent_key),
            node_id(collections::RECORDS, child_key),
        )
        .with_attrs(serde_json::json!({"relationType": relation}));
        self.working.upsert_edge(edges::RECORD_RELATIONS, edge);
        Ok(())
    }

    async fn create_record_group_relation(
        &mut self,
        record_key: &str,
        group_key: &str,
    ) -> Result<()> {
        let edge = Edge::new(
            node_id(collections::RECORDS, record_key),
            node_id(collections::RECORD_GROUPS, group_key),
        )
        .with_attrs(serde_json::json!({"entityType": "GROUP"}));
        self.working.upsert_edge(edges::BELONGS_TO, edge);
        Ok(())
    }

    async fn delete_edges_to(&mut self, to: &str, collection: &str) -> Result<usize> {
        let Some(slot) = self.working.edges.get_mut(collection) else {
            return Ok(0);
        };
        let before = slot.len();
        slot.retain(|edge| edge.to != to);
        Ok(before - slot.len())
    }

    async fn delete_edges_from(&mut self, from: &str, collection: &str) -> Result<usize> {
        let Some(slot) = self.working.edges.get_mut(collection) else {
            return Ok(0);
        };
        let before = slot.len();
        slot.retain(|edge| edge.from != from);
        Ok(before - slot.len())
    }

    async fn delete_edge(&mut self, from: &str, to: &str, collection: &str) -> Result<bool> {
        let Some(slot) = self.working.edges.get_mut(collection) else {
            return Ok(false);
        };
        let before = slot.len();
        slot.retain(|edge| !(edge.from == from && edge.to == to));
        Ok(slot.len() < before)
    }

    async fn delete_nodes_and_edges(&mut self, keys: Vec<String>, collection: &str) -> Result<()> {
        let ids: Vec<String> = keys.iter().map(|key| node_id(collection, key)).collect();
        if let Some(docs) = self.working.nodes.get_mut(collection) {
            for key in &keys {
                docs.remove(key);
            }
        }
        for edge_collection in EDGE_COLLECTIONS {
            if let Some(slot) = self.working.edges.get_mut(*edge_collection) {
                slot.retain(|edge| !ids.contains(&edge.from) && !ids.contains(&edge.to));
            }
        }
        Ok(())
    }

    async fn get_all_orgs(&self) -> Result<Vec<Value>> {
        Ok(self
            .working
            .nodes
            .get(collections::ORGS)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_users(&self, org_key: &str, active_only: bool) -> Result<Vec<AppUser>> {
        let Some(docs) = self.working.nodes.get(collections::USERS) else {
            return Ok(Vec::new());
        };
        let mut users = Vec::new();
        for doc in docs.values() {
            if doc.get("orgId").and_then(Value::as_str) != Some(org_key) {
                continue;
            }
            let user: AppUser = serde_json::from_value(doc.clone())
                .map_err(|e| Error::serialization(e.to_string()))?;
            if active_only && !user.is_active {
                continue;
            }
            users.push(user);
        }
        Ok(users)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        *self.shared.write() = self.working;
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
