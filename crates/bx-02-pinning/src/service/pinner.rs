//! Pinner: persistent direct, recursive and internal pin sets.
//!
//! Pin state lives in memory and is written as one snapshot under
//! `/local/pins` on every `pin`, `unpin` and `update`. Callers of
//! [`Pinner::pin_with_mode`] / [`Pinner::remove_pin_with_mode`] batch their
//! changes and call [`Pinner::flush`] themselves.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bx_01_blockstore::GcLocker;
use parking_lot::RwLock;
use shared_types::{Cid, DagError, Datastore, LinkSource};
use tracing::{debug, info, warn};

use crate::domain::coloring::{ColoredSet, Strictness};
use crate::domain::entities::{pin_key, PinMode, PinSets, Pinned};
use crate::domain::errors::PinError;

pub type Result<T> = std::result::Result<T, PinError>;

pub struct Pinner {
    sets: RwLock<PinSets>,
    datastore: Arc<dyn Datastore>,
    links: Arc<dyn LinkSource>,
    locker: GcLocker,
}

impl Pinner {
    /// Pinner with empty pin sets.
    pub fn new(datastore: Arc<dyn Datastore>, links: Arc<dyn LinkSource>, locker: GcLocker) -> Self {
        Self {
            sets: RwLock::new(PinSets::default()),
            datastore,
            links,
            locker,
        }
    }

    /// Pinner restored from the snapshot in `datastore`, if one exists.
    pub fn load(
        datastore: Arc<dyn Datastore>,
        links: Arc<dyn LinkSource>,
        locker: GcLocker,
    ) -> Result<Self> {
        let sets = match datastore.get(&pin_key()) {
            Ok(bytes) => PinSets::decode(&bytes)?,
            Err(e) if e.is_not_found() => PinSets::default(),
            Err(e) => return Err(e.into()),
        };
        info!(
            recursive = sets.recursive.len(),
            direct = sets.direct.len(),
            internal = sets.internal.len(),
            "[pinning] pin sets loaded"
        );

        let pinner = Self::new(datastore, links, locker);
        *pinner.sets.write() = sets;
        Ok(pinner)
    }

    pub async fn pin(&self, cid: &Cid, recursive: bool) -> Result<()> {
        self.pin_named(cid, recursive, "").await
    }

    /// Pin `cid`, recording `name` with the pin.
    ///
    /// A recursive pin first fetches the whole DAG below `cid`, which both
    /// confirms availability and pulls missing blocks through the link
    /// source. Re-pinning an already recursive root is a no-op; a direct
    /// pin on a recursive root is `AlreadyPinned`.
    pub async fn pin_named(&self, cid: &Cid, recursive: bool, name: &str) -> Result<()> {
        let _guard = self.locker.pin_lock().await;

        if recursive {
            let already = self.sets.read().recursive.contains_key(cid);
            if already {
                return Ok(());
            }
            self.fetch_graph(cid).await?;

            let mut sets = self.sets.write();
            sets.direct.remove(cid);
            sets.recursive.insert(*cid, name.to_owned());
        } else {
            match self.links.get_links(cid).await {
                Ok(_) | Err(DagError::UnsupportedCodec { .. }) => {}
                Err(e) => return Err(e.into()),
            }

            let mut sets = self.sets.write();
            if sets.recursive.contains_key(cid) {
                return Err(PinError::AlreadyPinned { cid: *cid });
            }
            sets.direct.insert(*cid, name.to_owned());
        }

        debug!(cid = %cid, recursive, "[pinning] pinned");
        self.flush()
    }

    /// Remove a pin.
    ///
    /// ## Errors
    ///
    /// - `NotPinned`: the CID has no pin at all
    /// - `PinConflict`: recursive pin without `recursive`, or the CID is
    ///   only pinned indirectly or internally
    pub async fn unpin(&self, cid: &Cid, recursive: bool) -> Result<()> {
        let pinned = self.is_pinned(cid).await?;
        match pinned.mode {
            PinMode::Recursive if recursive => {
                self.sets.write().recursive.remove(cid);
            }
            PinMode::Recursive => {
                return Err(PinError::PinConflict {
                    cid: *cid,
                    reason: "is pinned recursively".into(),
                })
            }
            PinMode::Direct => {
                self.sets.write().direct.remove(cid);
            }
            PinMode::Indirect => {
                let via = pinned
                    .via
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "unknown root".into());
                return Err(PinError::PinConflict {
                    cid: *cid,
                    reason: format!("is pinned indirectly under {via}"),
                });
            }
            PinMode::Internal => {
                return Err(PinError::PinConflict {
                    cid: *cid,
                    reason: "is an internal pin".into(),
                })
            }
            PinMode::NotPinned | PinMode::Any => return Err(PinError::NotPinned),
        }

        debug!(cid = %cid, "[pinning] unpinned");
        self.flush()
    }

    /// Strongest pin holding `cid`.
    ///
    /// A CID that is both direct and reachable from a recursive root is
    /// reported as `Direct`.
    pub async fn is_pinned(&self, cid: &Cid) -> Result<Pinned> {
        self.is_pinned_with_type(cid, PinMode::Any).await
    }

    /// Whether `cid` is pinned with `mode`; `Any` checks every mode.
    pub async fn is_pinned_with_type(&self, cid: &Cid, mode: PinMode) -> Result<Pinned> {
        let pinned = |mode| Pinned {
            cid: *cid,
            mode,
            via: None,
        };

        let roots: Vec<Cid> = {
            let sets = self.sets.read();
            let any = mode == PinMode::Any;

            if (any || mode == PinMode::Recursive) && sets.recursive.contains_key(cid) {
                return Ok(pinned(PinMode::Recursive));
            }
            if (any || mode == PinMode::Direct) && sets.direct.contains_key(cid) {
                return Ok(pinned(PinMode::Direct));
            }
            if (any || mode == PinMode::Internal) && sets.internal.contains(cid) {
                return Ok(pinned(PinMode::Internal));
            }
            if !(any || mode == PinMode::Indirect) {
                return Ok(Pinned::not_pinned(*cid));
            }
            sets.recursive.keys().copied().collect()
        };

        let mut visited = HashSet::new();
        for root in roots {
            if self.reaches(&root, cid, &mut visited).await? {
                return Ok(Pinned {
                    cid: *cid,
                    mode: PinMode::Indirect,
                    via: Some(root),
                });
            }
        }
        Ok(Pinned::not_pinned(*cid))
    }

    /// Pin status of each CID, in input order, walking each recursive DAG
    /// at most once.
    pub async fn check_if_pinned(&self, cids: &[Cid]) -> Result<Vec<Pinned>> {
        let mut found: HashMap<Cid, Pinned> = HashMap::new();
        let mut pending: HashSet<Cid> = HashSet::new();

        let roots: Vec<Cid> = {
            let sets = self.sets.read();
            for cid in cids {
                let mode = if sets.recursive.contains_key(cid) {
                    PinMode::Recursive
                } else if sets.direct.contains_key(cid) {
                    PinMode::Direct
                } else if sets.internal.contains(cid) {
                    PinMode::Internal
                } else {
                    pending.insert(*cid);
                    continue;
                };
                found.insert(
                    *cid,
                    Pinned {
                        cid: *cid,
                        mode,
                        via: None,
                    },
                );
            }
            sets.recursive.keys().copied().collect()
        };

        let mut visited = HashSet::new();
        for root in roots {
            if pending.is_empty() {
                break;
            }
            let mut stack = vec![root];
            while let Some(node) = stack.pop() {
                for child in self.links.get_links(&node).await? {
                    if pending.remove(&child) {
                        found.insert(
                            child,
                            Pinned {
                                cid: child,
                                mode: PinMode::Indirect,
                                via: Some(root),
                            },
                        );
                    }
                    if visited.insert(child) {
                        stack.push(child);
                    }
                }
            }
        }

        Ok(cids
            .iter()
            .map(|cid| {
                found
                    .get(cid)
                    .cloned()
                    .unwrap_or_else(|| Pinned::not_pinned(*cid))
            })
            .collect())
    }

    /// Move the recursive pin on `from` to `to`, keeping its name.
    ///
    /// With `unpin` false both roots stay pinned.
    pub async fn update(&self, from: &Cid, to: &Cid, unpin: bool) -> Result<()> {
        let _guard = self.locker.pin_lock().await;

        let name = self.sets.read().recursive.get(from).cloned();
        let Some(name) = name else {
            return Err(PinError::PinConflict {
                cid: *from,
                reason: "is not pinned recursively".into(),
            });
        };
        if from == to {
            return Ok(());
        }

        self.fetch_graph(to).await?;
        {
            let mut sets = self.sets.write();
            sets.direct.remove(to);
            sets.recursive.insert(*to, name);
            if unpin {
                sets.recursive.remove(from);
            }
        }
        debug!(from = %from, to = %to, unpin, "[pinning] pin updated");
        self.flush()
    }

    /// Add a pin without fetching anything. Not persisted until `flush`.
    pub fn pin_with_mode(&self, cid: &Cid, mode: PinMode) {
        let mut sets = self.sets.write();
        match mode {
            PinMode::Recursive => {
                sets.recursive.entry(*cid).or_default();
            }
            PinMode::Direct => {
                sets.direct.entry(*cid).or_default();
            }
            PinMode::Internal => {
                sets.internal.insert(*cid);
            }
            other => warn!(cid = %cid, mode = %other, "[pinning] cannot pin with transient mode"),
        }
    }

    /// Remove a pin of exactly `mode`. Not persisted until `flush`.
    pub fn remove_pin_with_mode(&self, cid: &Cid, mode: PinMode) {
        let mut sets = self.sets.write();
        match mode {
            PinMode::Recursive => {
                sets.recursive.remove(cid);
            }
            PinMode::Direct => {
                sets.direct.remove(cid);
            }
            PinMode::Internal => {
                sets.internal.remove(cid);
            }
            other => warn!(cid = %cid, mode = %other, "[pinning] cannot remove transient mode"),
        }
    }

    /// Persist the pin sets.
    pub fn flush(&self) -> Result<()> {
        let bytes = self.sets.read().encode()?;
        self.datastore.put(&pin_key(), bytes.into())?;
        self.datastore.sync()?;
        Ok(())
    }

    pub fn direct_keys(&self) -> Vec<Cid> {
        self.sets.read().direct.keys().copied().collect()
    }

    pub fn recursive_keys(&self) -> Vec<Cid> {
        self.sets.read().recursive.keys().copied().collect()
    }

    pub fn internal_pins(&self) -> Vec<Cid> {
        self.sets.read().internal.iter().copied().collect()
    }

    /// Name recorded with a direct or recursive pin.
    pub fn pin_name(&self, cid: &Cid) -> Option<String> {
        let sets = self.sets.read();
        sets.recursive
            .get(cid)
            .or_else(|| sets.direct.get(cid))
            .cloned()
    }

    async fn fetch_graph(&self, root: &Cid) -> Result<()> {
        let mut set = ColoredSet::new();
        set.mark(&[*root], self.links.as_ref(), Strictness::Strict)
            .await
            .map_err(|(_, e)| PinError::Dag(e))
    }

    /// Depth-first search for `target` below `root`, skipping nodes already
    /// explored from another root.
    async fn reaches(&self, root: &Cid, target: &Cid, visited: &mut HashSet<Cid>) -> Result<bool> {
        let mut stack = vec![*root];
        while let Some(node) = stack.pop() {
            for child in self.links.get_links(&node).await? {
                if child == *target {
                    return Ok(true);
                }
                if visited.insert(child) {
                    stack.push(child);
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::OfflineLinks;
    use bx_01_blockstore::{BaseBlockstore, Blockstore};
    use shared_types::test_utils::{dag_node, raw_block};
    use shared_types::{Block, MemoryDatastore};

    struct Fixture {
        datastore: Arc<MemoryDatastore>,
        blockstore: Arc<dyn Blockstore>,
        pinner: Pinner,
    }

    fn fixture() -> Fixture {
        let datastore = Arc::new(MemoryDatastore::new());
        let blockstore: Arc<dyn Blockstore> = Arc::new(BaseBlockstore::new(datastore.clone()));
        let links = Arc::new(OfflineLinks::new(blockstore.clone()));
        let pinner = Pinner::new(datastore.clone(), links, GcLocker::new());
        Fixture {
            datastore,
            blockstore,
            pinner,
        }
    }

    /// root -> (l1, mid -> l2)
    fn small_dag(bs: &dyn Blockstore) -> (Block, Block, Block, Block) {
        let l1 = raw_block("leaf one");
        let l2 = raw_block("leaf two");
        let mid = dag_node("mid", &[&l2]);
        let root = dag_node("root", &[&l1, &mid]);
        bs.put_many(vec![l1.clone(), l2.clone(), mid.clone(), root.clone()])
            .unwrap();
        (root, mid, l1, l2)
    }

    // =========================================================================
    // Pin / unpin
    // =========================================================================

    #[tokio::test]
    async fn test_recursive_pin_makes_descendants_indirect() {
        let f = fixture();
        let (root, mid, l1, l2) = small_dag(f.blockstore.as_ref());

        f.pinner.pin(root.cid(), true).await.unwrap();

        assert_eq!(
            f.pinner.is_pinned(root.cid()).await.unwrap().mode,
            PinMode::Recursive
        );
        for child in [&mid, &l1, &l2] {
            let pinned = f.pinner.is_pinned(child.cid()).await.unwrap();
            assert_eq!(pinned.mode, PinMode::Indirect);
            assert_eq!(pinned.via, Some(*root.cid()));
        }
    }

    #[tokio::test]
    async fn test_recursive_pin_requires_whole_dag() {
        let f = fixture();
        let missing = raw_block("not stored");
        let root = dag_node("root", &[&missing]);
        f.blockstore.put(root.clone()).unwrap();

        let err = f.pinner.pin(root.cid(), true).await.unwrap_err();

        assert_eq!(err, PinError::Dag(DagError::NotFound { cid: *missing.cid() }));
        assert!(f.pinner.recursive_keys().is_empty());
    }

    #[tokio::test]
    async fn test_direct_pin_on_recursive_root_fails() {
        let f = fixture();
        let (root, ..) = small_dag(f.blockstore.as_ref());
        f.pinner.pin(root.cid(), true).await.unwrap();

        assert_eq!(
            f.pinner.pin(root.cid(), false).await,
            Err(PinError::AlreadyPinned { cid: *root.cid() })
        );
    }

    #[tokio::test]
    async fn test_recursive_pin_replaces_direct() {
        let f = fixture();
        let (root, ..) = small_dag(f.blockstore.as_ref());
        f.pinner.pin(root.cid(), false).await.unwrap();
        f.pinner.pin(root.cid(), true).await.unwrap();

        assert!(f.pinner.direct_keys().is_empty());
        assert_eq!(f.pinner.recursive_keys(), vec![*root.cid()]);
    }

    #[tokio::test]
    async fn test_direct_and_indirect_reports_direct() {
        let f = fixture();
        let (root, _, l1, _) = small_dag(f.blockstore.as_ref());
        f.pinner.pin(root.cid(), true).await.unwrap();
        f.pinner.pin(l1.cid(), false).await.unwrap();

        assert_eq!(
            f.pinner.is_pinned(l1.cid()).await.unwrap().mode,
            PinMode::Direct
        );
    }

    #[tokio::test]
    async fn test_unpin_rules() {
        let f = fixture();
        let (root, mid, ..) = small_dag(f.blockstore.as_ref());
        f.pinner.pin(root.cid(), true).await.unwrap();

        assert!(matches!(
            f.pinner.unpin(root.cid(), false).await,
            Err(PinError::PinConflict { .. })
        ));
        assert!(matches!(
            f.pinner.unpin(mid.cid(), true).await,
            Err(PinError::PinConflict { .. })
        ));

        f.pinner.unpin(root.cid(), true).await.unwrap();
        assert_eq!(
            f.pinner.unpin(root.cid(), true).await,
            Err(PinError::NotPinned)
        );
        assert!(!f.pinner.is_pinned(mid.cid()).await.unwrap().is_pinned());
    }

    // =========================================================================
    // Batch queries and updates
    // =========================================================================

    #[tokio::test]
    async fn test_check_if_pinned_preserves_order() {
        let f = fixture();
        let (root, mid, l1, _) = small_dag(f.blockstore.as_ref());
        let loose = raw_block("loose");
        f.blockstore.put(loose.clone()).unwrap();
        f.pinner.pin(root.cid(), true).await.unwrap();
        f.pinner.pin(loose.cid(), false).await.unwrap();

        let other = raw_block("other");
        let result = f
            .pinner
            .check_if_pinned(&[*l1.cid(), *other.cid(), *root.cid(), *loose.cid(), *mid.cid()])
            .await
            .unwrap();

        let modes: Vec<PinMode> = result.iter().map(|p| p.mode).collect();
        assert_eq!(
            modes,
            vec![
                PinMode::Indirect,
                PinMode::NotPinned,
                PinMode::Recursive,
                PinMode::Direct,
                PinMode::Indirect,
            ]
        );
        assert_eq!(result[0].via, Some(*root.cid()));
    }

    #[tokio::test]
    async fn test_update_moves_recursive_pin() {
        let f = fixture();
        let (root, ..) = small_dag(f.blockstore.as_ref());
        let leaf = raw_block("new leaf");
        let new_root = dag_node("new root", &[&leaf]);
        f.blockstore
            .put_many(vec![leaf.clone(), new_root.clone()])
            .unwrap();
        f.pinner.pin_named(root.cid(), true, "site").await.unwrap();

        f.pinner.update(root.cid(), new_root.cid(), true).await.unwrap();

        assert_eq!(f.pinner.recursive_keys(), vec![*new_root.cid()]);
        assert_eq!(f.pinner.pin_name(new_root.cid()).as_deref(), Some("site"));
        assert!(matches!(
            f.pinner.update(root.cid(), new_root.cid(), true).await,
            Err(PinError::PinConflict { .. })
        ));
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    #[tokio::test]
    async fn test_pins_survive_reload() {
        let f = fixture();
        let (root, ..) = small_dag(f.blockstore.as_ref());
        let internal = raw_block("internal");
        f.pinner.pin(root.cid(), true).await.unwrap();
        f.pinner.pin_with_mode(internal.cid(), PinMode::Internal);
        f.pinner.flush().unwrap();

        let links = Arc::new(OfflineLinks::new(f.blockstore.clone()));
        let reloaded = Pinner::load(f.datastore.clone(), links, GcLocker::new()).unwrap();

        assert_eq!(reloaded.recursive_keys(), vec![*root.cid()]);
        assert_eq!(reloaded.internal_pins(), vec![*internal.cid()]);
    }

    #[test]
    fn test_load_rejects_undecodable_snapshot() {
        let datastore = Arc::new(MemoryDatastore::new());
        datastore
            .put(&pin_key(), bytes::Bytes::from_static(b"\x07"))
            .unwrap();
        let blockstore: Arc<dyn Blockstore> = Arc::new(BaseBlockstore::new(datastore.clone()));
        let links = Arc::new(OfflineLinks::new(blockstore));

        assert!(matches!(
            Pinner::load(datastore, links, GcLocker::new()),
            Err(PinError::Corrupt(_))
        ));
    }
}
