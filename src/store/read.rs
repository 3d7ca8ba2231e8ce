// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reading values and materializing subtrees.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{Result, SummaError};
use crate::kv::Keyspace;
use crate::path::{self, Attr, TreePath};
use crate::revision::Rev;

use super::SummaDb;

/// Rev and tombstone state of one immediate child.
#[derive(Debug, Clone)]
pub struct ChildMeta {
    pub rev: Rev,
    pub deleted: bool,
}

/// Attributes of one node collected from a subtree scan.
#[derive(Debug, Default)]
struct NodeData {
    value: Option<Vec<u8>>,
    rev: Option<String>,
    deleted: bool,
}

impl SummaDb {
    /// Raw JSON scalar bytes at `p`.
    ///
    /// A trailing `_rev` segment reads the revision string, a trailing
    /// `_deleted` segment reads `true` from a tombstone, a trailing `_val`
    /// aliases the scalar itself. Tombstoned and absent paths are
    /// [`NotFound`](SummaError::NotFound).
    #[tracing::instrument(skip(self), fields(path = %p))]
    pub fn get_value_at(&self, p: &TreePath) -> Result<Vec<u8>> {
        let (base, attr) = p.split_attr_suffix();
        let read = |a: Attr| self.kv.get(Keyspace::Tree, &path::encode(&base, a));

        match attr {
            Some(Attr::Rev) => read(Attr::Rev)?.ok_or(SummaError::NotFound),
            Some(Attr::Deleted) => match read(Attr::Deleted)? {
                Some(_) => Ok(b"true".to_vec()),
                None => Err(SummaError::NotFound),
            },
            _ => {
                if read(Attr::Deleted)?.is_some() {
                    return Err(SummaError::NotFound);
                }
                read(Attr::Value)?.ok_or(SummaError::NotFound)
            }
        }
    }

    /// Materialize the subtree rooted at `p` as a nested mapping.
    ///
    /// Each level carries its rev under `_rev` and its scalar (when any)
    /// under `_val`; tombstoned nodes are filtered out. `NotFound` when `p`
    /// has no rev and no descendants, or is itself tombstoned.
    #[tracing::instrument(skip(self), fields(path = %p))]
    pub fn get_tree_at(&self, p: &TreePath) -> Result<Value> {
        let nodes = self.collect_subtree(p)?;
        if nodes.is_empty() {
            return Err(SummaError::NotFound);
        }
        if nodes.get(p).is_some_and(|n| n.deleted) {
            return Err(SummaError::NotFound);
        }

        // Children grouped under their parents; the scan guarantees every
        // parent inside the subtree is present as a node.
        let mut children: BTreeMap<TreePath, Vec<TreePath>> = BTreeMap::new();
        for node in nodes.keys() {
            if node == p {
                continue;
            }
            if let Some(parent) = node.parent() {
                children.entry(parent).or_default().push(node.clone());
            }
        }

        materialize(p, &nodes, &children)
            .map(Value::Object)
            .ok_or(SummaError::NotFound)
    }

    /// Immediate children of `p` with their rev and tombstone state.
    pub fn list_children(&self, p: &TreePath) -> Result<BTreeMap<String, ChildMeta>> {
        let (start, end) = path::children_range(p);
        let mut out: BTreeMap<String, ChildMeta> = BTreeMap::new();

        for (key, value) in self.kv.scan_range(Keyspace::Tree, &start, Some(&end))? {
            let (node, attr) = path::decode(&key)?;
            if node.depth() != p.depth() + 1 {
                continue;
            }
            let name = node.last().expect("child is below p").to_string();
            match attr {
                Attr::Rev => {
                    let rev = Rev::from_bytes(&value)?;
                    out.entry(name)
                        .and_modify(|m| m.rev = rev.clone())
                        .or_insert(ChildMeta { rev, deleted: false });
                }
                Attr::Deleted => {
                    out.entry(name)
                        .and_modify(|m| m.deleted = true)
                        .or_insert(ChildMeta {
                            rev: Rev::null(),
                            deleted: true,
                        });
                }
                _ => {}
            }
        }
        Ok(out)
    }

    fn collect_subtree(&self, p: &TreePath) -> Result<BTreeMap<TreePath, NodeData>> {
        let (start, end) = path::subtree_range(p);
        let mut nodes: BTreeMap<TreePath, NodeData> = BTreeMap::new();

        for (key, value) in self.kv.scan_range(Keyspace::Tree, &start, Some(&end))? {
            let (node, attr) = path::decode(&key)?;
            let data = nodes.entry(node).or_default();
            match attr {
                Attr::Value => data.value = Some(value),
                Attr::Rev => {
                    data.rev = Some(String::from_utf8(value).map_err(|e| {
                        SummaError::BadRequest(format!("stored rev is not UTF-8: {e}"))
                    })?);
                }
                Attr::Deleted => data.deleted = true,
                Attr::Seq | Attr::RevHistory => {}
            }
        }
        Ok(nodes)
    }
}

/// Assemble the nested mapping for one live node. Tombstoned nodes yield
/// `None` and disappear from their parent.
fn materialize(
    at: &TreePath,
    nodes: &BTreeMap<TreePath, NodeData>,
    children: &BTreeMap<TreePath, Vec<TreePath>>,
) -> Option<Map<String, Value>> {
    let data = nodes.get(at)?;
    if data.deleted {
        return None;
    }

    let mut map = Map::new();
    if let Some(rev) = &data.rev {
        map.insert("_rev".to_string(), Value::String(rev.clone()));
    }
    if let Some(bytes) = &data.value {
        if let Ok(scalar) = serde_json::from_slice::<Value>(bytes) {
            map.insert("_val".to_string(), scalar);
        }
    }

    if let Some(child_paths) = children.get(at) {
        for child in child_paths {
            let name = child.last().expect("child path is non-root");
            if let Some(child_map) = materialize(child, nodes, children) {
                map.insert(name.to_string(), Value::Object(child_map));
            }
        }
    }
    Some(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SummaConfig;
    use serde_json::json;

    fn open() -> SummaDb {
        SummaDb::open(SummaConfig::default()).unwrap()
    }

    fn p(raw: &str) -> TreePath {
        TreePath::parse(raw).unwrap()
    }

    #[test]
    fn value_read_of_branch_node_is_not_found() {
        let db = open();
        db.save_tree_at(&p("/fruits/banana"), &json!({"colour": "yellow"}))
            .unwrap();
        assert!(matches!(
            db.get_value_at(&p("/fruits")),
            Err(SummaError::NotFound)
        ));
    }

    #[test]
    fn rev_suffix_reads_the_revision() {
        let db = open();
        db.save_value_at(&p("/doc/v"), b"1".to_vec()).unwrap();
        let rev = db.get_value_at(&p("/doc/v/_rev")).unwrap();
        assert_eq!(rev, db.get_rev(&p("/doc/v")).unwrap().to_string().as_bytes());
    }

    #[test]
    fn tree_contains_nested_levels_with_rev_and_val() {
        let db = open();
        db.save_tree_at(
            &p("/fruits/banana"),
            &json!({"colour": "yellow", "_val": "a fruit."}),
        )
        .unwrap();

        let tree = db.get_tree_at(&p("/fruits")).unwrap();
        let banana = &tree["banana"];
        assert_eq!(banana["_val"], json!("a fruit."));
        assert_eq!(banana["colour"]["_val"], json!("yellow"));
        assert!(banana["_rev"].is_string());
        assert!(tree["_rev"].is_string());
    }

    #[test]
    fn tree_filters_tombstoned_children() {
        let db = open();
        db.save_tree_at(&p("/fruits"), &json!({"banana": "b", "mellon": "m"}))
            .unwrap();
        db.delete_at(&p("/fruits/mellon")).unwrap();

        let tree = db.get_tree_at(&p("/fruits")).unwrap();
        assert!(tree.get("banana").is_some());
        assert!(tree.get("mellon").is_none());
    }

    #[test]
    fn tree_of_missing_path_is_not_found() {
        let db = open();
        assert!(matches!(
            db.get_tree_at(&p("/nope")),
            Err(SummaError::NotFound)
        ));
    }

    #[test]
    fn tree_of_tombstoned_path_is_not_found() {
        let db = open();
        db.save_value_at(&p("/doc/v"), b"1".to_vec()).unwrap();
        db.delete_at(&p("/doc")).unwrap();
        assert!(matches!(
            db.get_tree_at(&p("/doc")),
            Err(SummaError::NotFound)
        ));
    }

    #[test]
    fn list_children_reports_tombstones() {
        let db = open();
        db.save_tree_at(&p("/db"), &json!({"a": "1", "b": "2"}))
            .unwrap();
        db.delete_at(&p("/db/b")).unwrap();

        let children = db.list_children(&p("/db")).unwrap();
        assert!(!children["a"].deleted);
        assert!(children["b"].deleted);
        assert_eq!(children["a"].rev.generation(), 1);
    }

    #[test]
    fn scalar_leaf_materializes_with_val_object() {
        let db = open();
        db.save_value_at(&p("/doc/name"), b"\"kafka\"".to_vec())
            .unwrap();
        let tree = db.get_tree_at(&p("/doc")).unwrap();
        assert_eq!(tree["name"]["_val"], json!("kafka"));
    }
}
