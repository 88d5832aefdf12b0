//! Remote-metadata cache
//!
//! In-memory view of the entity graph: a flat `FileId -> FileInfo` map
//! plus the derived `local path -> FileId` index. Remote files may carry
//! several parents, so one id can resolve to several local paths; path
//! resolution is a pure function of `(file_info, root_id, local_root)`
//! and the index is recomputed after every mutation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use gdsync_core::domain::{FileId, FileInfo};

/// Upper bound on parent-chain recursion.
///
/// The service is not expected to hand out cycles, but a malformed graph
/// must terminate: paths deeper than this are dropped, never looped.
const MAX_RESOLVE_DEPTH: usize = 64;

/// In-memory mapping of file-id to metadata and local path to file-id.
pub struct MetadataCache {
    root_id: FileId,
    local_root: PathBuf,
    infos: HashMap<FileId, FileInfo>,
    paths: HashMap<PathBuf, FileId>,
}

impl MetadataCache {
    /// Creates an empty cache for the given root mapping.
    pub fn new(root_id: FileId, local_root: PathBuf) -> Self {
        let mut cache = Self {
            root_id,
            local_root,
            infos: HashMap::new(),
            paths: HashMap::new(),
        };
        cache.recompute_paths();
        cache
    }

    /// Id of the remote folder mirrored at the local root.
    pub fn root_id(&self) -> &FileId {
        &self.root_id
    }

    /// The local root directory.
    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    /// Metadata for an id, if known.
    pub fn get_info(&self, id: &FileId) -> Option<&FileInfo> {
        self.infos.get(id)
    }

    /// Id mapped at a local path, if any.
    pub fn id_for_path(&self, path: &Path) -> Option<&FileId> {
        self.paths.get(path)
    }

    /// All known entities, in no particular order.
    pub fn all_infos(&self) -> impl Iterator<Item = &FileInfo> {
        self.infos.values()
    }

    /// Number of known entities.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// True when no entities are known.
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Inserts or replaces an entity and refreshes the path index.
    pub fn store_info(&mut self, info: FileInfo) {
        self.infos.insert(info.id.clone(), info);
        self.recompute_paths();
    }

    /// Bulk-replaces the entity map (used when hydrating persisted state).
    pub fn load_infos(&mut self, infos: HashMap<FileId, FileInfo>) {
        self.infos = infos;
        self.recompute_paths();
    }

    /// Clones the entity map (used when snapshotting state for a save).
    pub fn snapshot_infos(&self) -> HashMap<FileId, FileInfo> {
        self.infos.clone()
    }

    /// Removes an entity and every path index entry that resolved through
    /// it. Returns the paths at which the entity itself was materialized.
    pub fn remove_info(&mut self, id: &FileId) -> Vec<PathBuf> {
        let removed_paths = self
            .infos
            .get(id)
            .map(|info| self.paths_of(info))
            .unwrap_or_default();
        self.infos.remove(id);
        self.recompute_paths();
        removed_paths
    }

    /// Resolves every local path the entity materializes at.
    ///
    /// The root resolves to the local root; an entity with no parents
    /// lies outside the tracked tree and resolves to nothing; otherwise
    /// the result is the cross product of the parents' paths joined with
    /// the entity's name. Unknown parents contribute nothing.
    pub fn paths_of(&self, info: &FileInfo) -> Vec<PathBuf> {
        self.resolve(info, 0)
    }

    fn resolve(&self, info: &FileInfo, depth: usize) -> Vec<PathBuf> {
        if info.id == self.root_id {
            return vec![self.local_root.clone()];
        }
        if depth >= MAX_RESOLVE_DEPTH {
            return Vec::new();
        }
        if info.parents.is_empty() {
            return Vec::new();
        }

        let mut paths = Vec::new();
        for parent_id in &info.parents {
            let Some(parent) = self.infos.get(parent_id) else {
                continue;
            };
            for base in self.resolve(parent, depth + 1) {
                let path = base.join(&info.name);
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
        paths
    }

    /// Rebuilds the `path -> id` index from the entity map.
    pub fn recompute_paths(&mut self) {
        let mut paths = HashMap::new();
        paths.insert(self.local_root.clone(), self.root_id.clone());
        for info in self.infos.values() {
            if info.id == self.root_id {
                continue;
            }
            for path in self.paths_of(info) {
                paths.insert(path, info.id.clone());
            }
        }
        self.paths = paths;
    }
}

// ============================================================================
// Tests
// ============================================================================
