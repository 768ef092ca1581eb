//! The VFS namespace tree: directories and file pointers, as a CRDT document.
//!
//! Generalizes `crdt/workspace_doc.rs`'s `WorkspaceCrdt`, which
//! keeps a flat map of path → file metadata, into a real nested tree so that
//! two peers creating different entries under the same directory concurrently
//! merge independently, while two peers creating the *same* entry name
//! resolve via yrs's last-writer-wins slot semantics on that directory's
//! children map — this is the chosen resolution for the concurrent-create
//! collision case.
//!
//! Every directory, including the root, is represented by a `children` map
//! from child name to a nested node map carrying `kind` and either `docId`
//! (files) or another `children` map (directories). There is no separate
//! "ref" layer distinct from the node itself: the node's `kind` field is the
//! single source of truth for what it is.

use yrs::{Doc, Map, MapPrelim, MapRef, ReadTxn, StateVector, Transact, Update};
use yrs::updates::decoder::Decode;

use crate::document::DocumentId;
use crate::error::{Error, Result};

/// What kind of node a path resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A file, with content in its own [`crate::document::content::ContentDoc`].
    File,
    /// A directory, holding further children.
    Directory,
}

/// A resolved tree entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefNode {
    /// Whether this entry is a file or a directory.
    pub kind: NodeKind,
    /// For files, the id of the content document holding its data.
    pub doc_id: Option<DocumentId>,
}

impl RefNode {
    fn file(doc_id: DocumentId) -> Self {
        Self {
            kind: NodeKind::File,
            doc_id: Some(doc_id),
        }
    }

    fn directory() -> Self {
        Self {
            kind: NodeKind::Directory,
            doc_id: None,
        }
    }
}

/// The VFS namespace, as a single CRDT document.
pub struct TreeDoc {
    doc: Doc,
    root: MapRef,
    generation: std::sync::atomic::AtomicU64,
}

impl TreeDoc {
    /// A brand new, empty tree (just the root directory).
    pub fn new() -> Self {
        let doc = Doc::new();
        let root = doc.get_or_insert_map("root_children");
        Self {
            doc,
            root,
            generation: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Monotonically increasing counter, bumped on every local or remote
    /// mutation. The path resolver's cache uses this to invalidate entries
    /// without tracking which specific paths were touched.
    pub fn generation(&self) -> u64 {
        self.generation.load(std::sync::atomic::Ordering::Acquire)
    }

    fn bump_generation(&self) {
        self.generation
            .fetch_add(1, std::sync::atomic::Ordering::AcqRel);
    }

    /// Rehydrate from a full state snapshot.
    pub fn from_update(bytes: &[u8]) -> Result<Self> {
        let mut this = Self::new();
        this.apply_update(bytes)?;
        Ok(this)
    }

    /// Apply a (full or incremental) binary update.
    pub fn apply_update(&mut self, bytes: &[u8]) -> Result<()> {
        let update =
            Update::decode_v1(bytes).map_err(|e| Error::CorruptedDocument(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| Error::CorruptedDocument(e.to_string()))?;
        drop(txn);
        self.bump_generation();
        Ok(())
    }

    /// Current state vector.
    pub fn state_vector(&self) -> StateVector {
        self.doc.transact().state_vector()
    }

    /// Encode every update since `since`.
    pub fn encode_state_as_update(&self, since: &StateVector) -> Vec<u8> {
        self.doc.transact().encode_state_as_update_v1(since)
    }

    /// Resolve a normalized path (segments from [`crate::path_utils::normalize`])
    /// to its node. The empty path (root) always resolves to a directory with
    /// no doc id.
    pub fn resolve(&self, segments: &[String]) -> Result<Option<RefNode>> {
        let txn = self.doc.transact();
        if segments.is_empty() {
            return Ok(Some(RefNode::directory()));
        }
        let mut current = self.root.clone();
        for (i, seg) in segments.iter().enumerate() {
            let Some(node_map) = get_node_map(&current, &txn, seg)? else {
                return Ok(None);
            };
            if i == segments.len() - 1 {
                return Ok(Some(read_node(&node_map, &txn)?));
            }
            current = match node_map.get(&txn, "children") {
                Some(yrs::types::Out::YMap(children)) => children,
                _ => return Err(Error::NotADirectory(seg.clone())),
            };
        }
        unreachable!()
    }

    /// List the immediate children of a directory path.
    pub fn list_children(&self, segments: &[String]) -> Result<Vec<(String, RefNode)>> {
        let txn = self.doc.transact();
        let children_map = self.children_map_at(&txn, segments)?;
        let mut out = Vec::new();
        for (name, _) in children_map.iter(&txn) {
            let node_map = get_node_map(&children_map, &txn, name)?.expect("just iterated");
            out.push((name.to_string(), read_node(&node_map, &txn)?));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    /// Create a new file at `parent`/`name`. Errors if the slot is occupied.
    pub fn create_file(
        &mut self,
        parent: &[String],
        name: &str,
        doc_id: DocumentId,
    ) -> Result<Vec<u8>> {
        self.create_child(parent, name, RefNode::file(doc_id))
    }

    /// Create a new, empty directory at `parent`/`name`. Errors if the slot
    /// is occupied.
    pub fn create_directory(&mut self, parent: &[String], name: &str) -> Result<Vec<u8>> {
        self.create_child(parent, name, RefNode::directory())
    }

    fn create_child(&mut self, parent: &[String], name: &str, node: RefNode) -> Result<Vec<u8>> {
        let sv_before = self.state_vector();
        {
            let txn = self.doc.transact();
            let children_map = self.children_map_at(&txn, parent)?;
            drop(txn);
            let mut txn = self.doc.transact_mut();
            if children_map.get(&txn, name).is_some() {
                return Err(Error::AlreadyExists(name.to_string()));
            }
            write_node(&mut txn, &children_map, name, &node);
        }
        self.bump_generation();
        Ok(self.encode_state_as_update(&sv_before))
    }

    /// Remove a file. Errors `NotFound` if absent, `NotAFile` if the slot is
    /// a directory.
    pub fn remove_file(&mut self, parent: &[String], name: &str) -> Result<(DocumentId, Vec<u8>)> {
        let sv_before = self.state_vector();
        let doc_id;
        {
            let txn = self.doc.transact();
            let children_map = self.children_map_at(&txn, parent)?;
            let node = get_node_map(&children_map, &txn, name)?
                .ok_or_else(|| Error::NotFound(name.to_string()))?;
            let read = read_node(&node, &txn)?;
            if read.kind != NodeKind::File {
                return Err(Error::NotAFile(name.to_string()));
            }
            doc_id = read.doc_id.expect("file node always has a doc id");
            drop(txn);
            let mut txn = self.doc.transact_mut();
            children_map.remove(&mut txn, name);
        }
        self.bump_generation();
        Ok((doc_id, self.encode_state_as_update(&sv_before)))
    }

    /// Remove a directory. Errors `NotFound` if absent, `NotADirectory` if
    /// the slot is a file, `NotEmpty` if it has children and `recursive` is
    /// false. When recursive, returns the doc ids of every file removed
    /// beneath it (so the caller can decide whether to also drop their
    /// content documents).
    pub fn remove_directory(
        &mut self,
        parent: &[String],
        name: &str,
        recursive: bool,
    ) -> Result<(Vec<DocumentId>, Vec<u8>)> {
        let sv_before = self.state_vector();
        let mut removed_files = Vec::new();
        {
            let txn = self.doc.transact();
            let children_map = self.children_map_at(&txn, parent)?;
            let node = get_node_map(&children_map, &txn, name)?
                .ok_or_else(|| Error::NotFound(name.to_string()))?;
            let read = read_node(&node, &txn)?;
            if read.kind != NodeKind::Directory {
                return Err(Error::NotADirectory(name.to_string()));
            }
            let is_empty = node
                .get(&txn, "children")
                .map(|out| matches!(out, yrs::types::Out::YMap(m) if m.len(&txn) == 0))
                .unwrap_or(true);
            if !is_empty && !recursive {
                return Err(Error::NotEmpty(name.to_string()));
            }
            if !is_empty {
                collect_file_doc_ids(&node, &txn, &mut removed_files)?;
            }
            drop(txn);
            let mut txn = self.doc.transact_mut();
            children_map.remove(&mut txn, name);
        }
        self.bump_generation();
        Ok((removed_files, self.encode_state_as_update(&sv_before)))
    }

    /// Move/rename an entry from `src` to `dst` (parent segments + name
    /// each). Errors `NotFound` if the source is absent, `AlreadyExists` if
    /// the destination is occupied.
    pub fn rename(
        &mut self,
        src_parent: &[String],
        src_name: &str,
        dst_parent: &[String],
        dst_name: &str,
    ) -> Result<Vec<u8>> {
        let sv_before = self.state_vector();
        {
            let txn = self.doc.transact();
            let src_children = self.children_map_at(&txn, src_parent)?;
            let dst_children = self.children_map_at(&txn, dst_parent)?;
            let node = get_node_map(&src_children, &txn, src_name)?
                .ok_or_else(|| Error::NotFound(src_name.to_string()))?;
            if dst_children.get(&txn, dst_name).is_some() {
                return Err(Error::AlreadyExists(dst_name.to_string()));
            }
            let read = read_node(&node, &txn)?;
            drop(txn);
            let mut txn = self.doc.transact_mut();
            src_children.remove(&mut txn, src_name);
            write_node(&mut txn, &dst_children, dst_name, &read);
        }
        self.bump_generation();
        Ok(self.encode_state_as_update(&sv_before))
    }

    /// Every file document id reachable from the root, walked depth-first.
    /// Used by the bundle codec to know what it must snapshot, since a
    /// freshly opened store may not have every file loaded into memory yet.
    pub fn all_file_ids(&self) -> Result<Vec<DocumentId>> {
        let txn = self.doc.transact();
        let mut out = Vec::new();
        collect_children_file_ids(&self.root, &txn, &mut out)?;
        Ok(out)
    }

    /// The normalized path segments currently pointing at `doc_id`, if any.
    /// Used to translate a remote content delta back into a path for
    /// watcher notification (best-effort — the first match wins were the
    /// same document ever linked from two names, which this tree's
    /// one-name-per-doc creation/rename semantics do not produce).
    pub fn find_path(&self, doc_id: &DocumentId) -> Result<Option<Vec<String>>> {
        let txn = self.doc.transact();
        let mut path = Vec::new();
        if find_path_in(&self.root, &txn, doc_id, &mut path)? {
            Ok(Some(path))
        } else {
            Ok(None)
        }
    }

    fn children_map_at<T: ReadTxn>(&self, txn: &T, segments: &[String]) -> Result<MapRef> {
        let mut current = self.root.clone();
        for seg in segments {
            let node_map = get_node_map(&current, txn, seg)?
                .ok_or_else(|| Error::NotFound(seg.clone()))?;
            current = match node_map.get(txn, "children") {
                Some(yrs::types::Out::YMap(children)) => children,
                _ => return Err(Error::NotADirectory(seg.clone())),
            };
        }
        Ok(current)
    }
}

impl Default for TreeDoc {
    fn default() -> Self {
        Self::new()
    }
}

fn get_node_map<T: ReadTxn>(map: &MapRef, txn: &T, key: &str) -> Result<Option<MapRef>> {
    match map.get(txn, key) {
        None => Ok(None),
        Some(yrs::types::Out::YMap(node)) => Ok(Some(node)),
        Some(_) => Err(Error::CorruptedLink(
            key.to_string(),
            "unknown".to_string(),
            "non-map node".to_string(),
        )),
    }
}

fn read_node<T: ReadTxn>(node_map: &MapRef, txn: &T) -> Result<RefNode> {
    let kind_str = match node_map.get(txn, "kind") {
        Some(yrs::types::Out::Any(yrs::Any::String(s))) => s.to_string(),
        _ => {
            return Err(Error::CorruptedLink(
                "<node>".to_string(),
                "missing".to_string(),
                "kind".to_string(),
            ))
        }
    };
    match kind_str.as_str() {
        "file" => {
            let doc_id = match node_map.get(txn, "docId") {
                Some(yrs::types::Out::Any(yrs::Any::String(s))) => {
                    DocumentId::from_string(s.to_string())
                }
                _ => {
                    return Err(Error::CorruptedLink(
                        "<node>".to_string(),
                        "file".to_string(),
                        "missing docId".to_string(),
                    ))
                }
            };
            Ok(RefNode::file(doc_id))
        }
        "directory" => {
            if !matches!(node_map.get(txn, "children"), Some(yrs::types::Out::YMap(_))) {
                return Err(Error::CorruptedLink(
                    "<node>".to_string(),
                    "directory".to_string(),
                    "missing children".to_string(),
                ));
            }
            Ok(RefNode::directory())
        }
        other => Err(Error::CorruptedLink(
            "<node>".to_string(),
            other.to_string(),
            "unknown kind".to_string(),
        )),
    }
}

fn write_node(txn: &mut yrs::TransactionMut, parent: &MapRef, name: &str, node: &RefNode) {
    let node_map: MapRef = parent.insert(txn, name, MapPrelim::default());
    match node.kind {
        NodeKind::File => {
            node_map.insert(txn, "kind", "file");
            node_map.insert(
                txn,
                "docId",
                node.doc_id.as_ref().expect("file node has doc id").as_str().to_string(),
            );
        }
        NodeKind::Directory => {
            node_map.insert(txn, "kind", "directory");
            node_map.insert(txn, "children", MapPrelim::default());
        }
    }
}

fn collect_file_doc_ids<T: ReadTxn>(
    node_map: &MapRef,
    txn: &T,
    out: &mut Vec<DocumentId>,
) -> Result<()> {
    let Some(yrs::types::Out::YMap(children)) = node_map.get(txn, "children") else {
        return Ok(());
    };
    collect_children_file_ids(&children, txn, out)
}

/// Shared walk for a `children` map (either the tree root or a directory
/// node's nested map): recurse into subdirectories, collect file doc ids.
fn collect_children_file_ids<T: ReadTxn>(
    children: &MapRef,
    txn: &T,
    out: &mut Vec<DocumentId>,
) -> Result<()> {
    for (name, _) in children.iter(txn) {
        let child = get_node_map(children, txn, name)?.expect("just iterated");
        let read = read_node(&child, txn)?;
        match read.kind {
            NodeKind::File => out.push(read.doc_id.expect("file has doc id")),
            NodeKind::Directory => collect_file_doc_ids(&child, txn, out)?,
        }
    }
    Ok(())
}

fn find_path_in<T: ReadTxn>(
    children: &MapRef,
    txn: &T,
    doc_id: &DocumentId,
    path: &mut Vec<String>,
) -> Result<bool> {
    for (name, _) in children.iter(txn) {
        let child = get_node_map(children, txn, name)?.expect("just iterated");
        let read = read_node(&child, txn)?;
        path.push(name.to_string());
        match read.kind {
            NodeKind::File => {
                if read.doc_id.as_ref() == Some(doc_id) {
                    return Ok(true);
                }
            }
            NodeKind::Directory => {
                if let Some(yrs::types::Out::YMap(nested)) = child.get(txn, "children") {
                    if find_path_in(&nested, txn, doc_id, path)? {
                        return Ok(true);
                    }
                }
            }
        }
        path.pop();
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_resolve_file() {
        let mut tree = TreeDoc::new();
        let doc_id = DocumentId::from_string("abc123");
        tree.create_file(&[], "note.md", doc_id.clone()).unwrap();

        let node = tree.resolve(&["note.md".to_string()]).unwrap().unwrap();
        assert_eq!(node.kind, NodeKind::File);
        assert_eq!(node.doc_id, Some(doc_id));
    }

    #[test]
    fn create_directory_then_nested_file() {
        let mut tree = TreeDoc::new();
        tree.create_directory(&[], "notes").unwrap();
        tree.create_file(
            &["notes".to_string()],
            "a.md",
            DocumentId::from_string("id-a"),
        )
        .unwrap();

        let children = tree.list_children(&["notes".to_string()]).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].0, "a.md");
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let mut tree = TreeDoc::new();
        tree.create_directory(&[], "notes").unwrap();
        assert!(tree.create_directory(&[], "notes").is_err());
    }

    #[test]
    fn delete_nonempty_directory_requires_recursive() {
        let mut tree = TreeDoc::new();
        tree.create_directory(&[], "notes").unwrap();
        tree.create_file(
            &["notes".to_string()],
            "a.md",
            DocumentId::from_string("id-a"),
        )
        .unwrap();

        assert!(tree.remove_directory(&[], "notes", false).is_err());
        let (removed, _) = tree.remove_directory(&[], "notes", true).unwrap();
        assert_eq!(removed, vec![DocumentId::from_string("id-a")]);
        assert!(tree.resolve(&["notes".to_string()]).unwrap().is_none());
    }

    #[test]
    fn rename_moves_entry_and_preserves_doc_id() {
        let mut tree = TreeDoc::new();
        let doc_id = DocumentId::from_string("id-a");
        tree.create_file(&[], "a.md", doc_id.clone()).unwrap();
        tree.create_directory(&[], "archive").unwrap();

        tree.rename(&[], "a.md", &["archive".to_string()], "a.md").unwrap();

        assert!(tree.resolve(&["a.md".to_string()]).unwrap().is_none());
        let moved = tree
            .resolve(&["archive".to_string(), "a.md".to_string()])
            .unwrap()
            .unwrap();
        assert_eq!(moved.doc_id, Some(doc_id));
    }

    #[test]
    fn concurrent_same_name_create_resolves_via_lww() {
        let mut a = TreeDoc::new();
        let snapshot = a.encode_state_as_update(&StateVector::default());
        let mut b = TreeDoc::from_update(&snapshot).unwrap();

        let doc_a = DocumentId::from_string("from-a");
        let doc_b = DocumentId::from_string("from-b");
        let delta_a = a.create_file(&[], "note.md", doc_a.clone()).unwrap();
        let delta_b = b.create_file(&[], "note.md", doc_b.clone()).unwrap();

        a.apply_update(&delta_b).unwrap();
        b.apply_update(&delta_a).unwrap();

        let resolved_a = a.resolve(&["note.md".to_string()]).unwrap().unwrap();
        let resolved_b = b.resolve(&["note.md".to_string()]).unwrap().unwrap();
        assert_eq!(resolved_a, resolved_b, "both replicas converge to the same winner");
    }

    #[test]
    fn all_file_ids_walks_nested_directories() {
        let mut tree = TreeDoc::new();
        tree.create_file(&[], "a.md", DocumentId::from_string("id-a")).unwrap();
        tree.create_directory(&[], "notes").unwrap();
        tree.create_file(
            &["notes".to_string()],
            "b.md",
            DocumentId::from_string("id-b"),
        )
        .unwrap();

        let mut ids = tree.all_file_ids().unwrap();
        ids.sort();
        assert_eq!(
            ids,
            vec![DocumentId::from_string("id-a"), DocumentId::from_string("id-b")]
        );
    }

    #[test]
    fn find_path_locates_nested_file() {
        let mut tree = TreeDoc::new();
        tree.create_directory(&[], "notes").unwrap();
        let id = DocumentId::from_string("id-b");
        tree.create_file(&["notes".to_string()], "b.md", id.clone()).unwrap();

        assert_eq!(
            tree.find_path(&id).unwrap(),
            Some(vec!["notes".to_string(), "b.md".to_string()])
        );
        assert_eq!(tree.find_path(&DocumentId::from_string("missing")).unwrap(), None);
    }
}
