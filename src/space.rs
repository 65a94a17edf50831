//! In-memory, multi-tenant AtomSpace shard.
//!
//! A shard serializes mutating access to its indexed store while letting
//! readers proceed in parallel, and multiplexes operations through four
//! bounded request channels (add, query, update, delete) drained by a pool
//! of worker tasks. The channel layer gives a uniform, bounded, cancellable
//! surface; the reader-writer lock underneath guarantees map safety.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, Mutex};

use crate::atom::{Atom, AtomId, AtomType};
use crate::error::{SpaceError, SpaceResult};

/// Predicate applied to atoms during queries. Shared so cross-shard fan-out
/// can hand the same filter to every shard.
pub type AtomFilter = Arc<dyn Fn(&Atom) -> bool + Send + Sync>;

/// One-shot mutation applied to an atom under the store's write lock.
///
/// Mutators may change truth and attention values; id, type, and tenant are
/// immutable by construction.
pub type AtomMutator = Box<dyn FnOnce(&Atom) -> SpaceResult<()> + Send>;

/// Bounded depth of each per-operation request queue. Producers block once
/// a queue is full.
const QUEUE_DEPTH: usize = 1000;

// ---------------------------------------------------------------------------
// Store abstraction
// ---------------------------------------------------------------------------

/// Per-tenant statistics for a store view.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SpaceStats {
    pub total_atoms: usize,
    pub atoms_by_type: HashMap<AtomType, usize>,
}

/// The atomspace operation surface.
///
/// Implemented by a single shard, by the shard manager (cross-shard), and by
/// tenant-scoped views. Inference, agents, and pipeline stages all speak
/// this trait so they are indifferent to how atoms are distributed.
#[async_trait]
pub trait AtomStore: Send + Sync {
    async fn add_atom(&self, atom: Arc<Atom>) -> SpaceResult<()>;
    async fn get_atom(&self, id: &AtomId, tenant_id: &str) -> SpaceResult<Arc<Atom>>;
    async fn query_atoms(
        &self,
        tenant_id: &str,
        filter: Option<AtomFilter>,
    ) -> SpaceResult<Vec<Arc<Atom>>>;
    async fn update_atom(
        &self,
        id: &AtomId,
        tenant_id: &str,
        mutator: AtomMutator,
    ) -> SpaceResult<()>;
    async fn delete_atom(&self, id: &AtomId, tenant_id: &str) -> SpaceResult<()>;
    async fn stats(&self, tenant_id: &str) -> SpaceResult<SpaceStats>;
}

// ---------------------------------------------------------------------------
// Request envelopes
// ---------------------------------------------------------------------------

struct AddRequest {
    atom: Arc<Atom>,
    reply: oneshot::Sender<SpaceResult<()>>,
}

struct QueryRequest {
    tenant_id: String,
    filter: Option<AtomFilter>,
    reply: oneshot::Sender<Vec<Arc<Atom>>>,
}

struct UpdateRequest {
    id: AtomId,
    tenant_id: String,
    mutator: AtomMutator,
    reply: oneshot::Sender<SpaceResult<()>>,
}

struct DeleteRequest {
    id: AtomId,
    tenant_id: String,
    reply: oneshot::Sender<SpaceResult<()>>,
}

// ---------------------------------------------------------------------------
// Indexed store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SpaceInner {
    /// Primary map: id -> atom.
    atoms: HashMap<AtomId, Arc<Atom>>,
    /// Tenant index: tenant -> id -> atom.
    by_tenant: HashMap<String, HashMap<AtomId, Arc<Atom>>>,
    /// Type index: type -> id -> atom.
    by_type: HashMap<AtomType, HashMap<AtomId, Arc<Atom>>>,
    /// Name index: name -> ids.
    by_name: HashMap<String, HashSet<AtomId>>,
}

impl SpaceInner {
    fn add(&mut self, atom: Arc<Atom>) -> SpaceResult<()> {
        let id = atom.id().clone();
        if self.atoms.contains_key(&id) {
            return Err(SpaceError::AlreadyExists { id: id.to_string() });
        }

        self.by_tenant
            .entry(atom.tenant_id().to_string())
            .or_default()
            .insert(id.clone(), Arc::clone(&atom));
        self.by_type
            .entry(atom.atom_type())
            .or_default()
            .insert(id.clone(), Arc::clone(&atom));
        self.by_name
            .entry(atom.name().to_string())
            .or_default()
            .insert(id.clone());
        self.atoms.insert(id, atom);
        Ok(())
    }

    fn get(&self, id: &AtomId, tenant_id: &str) -> SpaceResult<Arc<Atom>> {
        let atom = self.atoms.get(id).ok_or_else(|| SpaceError::NotFound {
            id: id.to_string(),
        })?;
        if atom.tenant_id() != tenant_id {
            return Err(SpaceError::TenantMismatch {
                id: id.to_string(),
                tenant_id: tenant_id.to_string(),
            });
        }
        Ok(Arc::clone(atom))
    }

    fn query(&self, tenant_id: &str, filter: Option<&AtomFilter>) -> Vec<Arc<Atom>> {
        let Some(tenant_atoms) = self.by_tenant.get(tenant_id) else {
            return Vec::new();
        };
        tenant_atoms
            .values()
            .filter(|atom| filter.map_or(true, |f| f(atom)))
            .cloned()
            .collect()
    }

    fn update(&self, id: &AtomId, tenant_id: &str, mutator: AtomMutator) -> SpaceResult<()> {
        let atom = self.get(id, tenant_id)?;
        mutator(&atom)?;
        atom.record_update();
        Ok(())
    }

    fn delete(&mut self, id: &AtomId, tenant_id: &str) -> SpaceResult<()> {
        let atom = self.get(id, tenant_id)?;

        self.atoms.remove(id);
        if let Some(tenant_atoms) = self.by_tenant.get_mut(tenant_id) {
            tenant_atoms.remove(id);
            if tenant_atoms.is_empty() {
                self.by_tenant.remove(tenant_id);
            }
        }
        if let Some(type_atoms) = self.by_type.get_mut(&atom.atom_type()) {
            type_atoms.remove(id);
            if type_atoms.is_empty() {
                self.by_type.remove(&atom.atom_type());
            }
        }
        if let Some(ids) = self.by_name.get_mut(atom.name()) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_name.remove(atom.name());
            }
        }
        Ok(())
    }

    fn stats(&self, tenant_id: &str) -> SpaceStats {
        let Some(tenant_atoms) = self.by_tenant.get(tenant_id) else {
            return SpaceStats::default();
        };
        let mut atoms_by_type: HashMap<AtomType, usize> = HashMap::new();
        for atom in tenant_atoms.values() {
            *atoms_by_type.entry(atom.atom_type()).or_insert(0) += 1;
        }
        SpaceStats {
            total_atoms: tenant_atoms.len(),
            atoms_by_type,
        }
    }
}

// ---------------------------------------------------------------------------
// AtomSpace
// ---------------------------------------------------------------------------

/// A single AtomSpace shard: indexed store plus request-multiplexing workers.
pub struct AtomSpace {
    inner: Arc<RwLock<SpaceInner>>,
    add_tx: mpsc::Sender<AddRequest>,
    query_tx: mpsc::Sender<QueryRequest>,
    update_tx: mpsc::Sender<UpdateRequest>,
    delete_tx: mpsc::Sender<DeleteRequest>,
    shutdown_tx: watch::Sender<bool>,
}

impl AtomSpace {
    /// Create a shard with `workers` request-handling tasks (minimum one).
    pub fn new(workers: usize) -> Self {
        let inner = Arc::new(RwLock::new(SpaceInner::default()));
        let (add_tx, add_rx) = mpsc::channel(QUEUE_DEPTH);
        let (query_tx, query_rx) = mpsc::channel(QUEUE_DEPTH);
        let (update_tx, update_rx) = mpsc::channel(QUEUE_DEPTH);
        let (delete_tx, delete_rx) = mpsc::channel(QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let add_rx = Arc::new(Mutex::new(add_rx));
        let query_rx = Arc::new(Mutex::new(query_rx));
        let update_rx = Arc::new(Mutex::new(update_rx));
        let delete_rx = Arc::new(Mutex::new(delete_rx));

        for _ in 0..workers.max(1) {
            let inner = Arc::clone(&inner);
            let add_rx = Arc::clone(&add_rx);
            let query_rx = Arc::clone(&query_rx);
            let update_rx = Arc::clone(&update_rx);
            let delete_rx = Arc::clone(&delete_rx);
            let mut shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                worker_loop(
                    inner,
                    add_rx,
                    query_rx,
                    update_rx,
                    delete_rx,
                    &mut shutdown_rx,
                )
                .await;
            });
        }

        Self {
            inner,
            add_tx,
            query_tx,
            update_tx,
            delete_tx,
            shutdown_tx,
        }
    }

    /// Insert an atom into the primary map and all secondary indices.
    pub async fn add_atom(&self, atom: Arc<Atom>) -> SpaceResult<()> {
        let (reply, rx) = oneshot::channel();
        self.add_tx
            .send(AddRequest { atom, reply })
            .await
            .map_err(|_| SpaceError::Closed)?;
        rx.await.map_err(|_| SpaceError::Closed)?
    }

    /// Fetch an atom by id, verifying tenant ownership.
    ///
    /// Point reads bypass the request queue and take the read lock directly.
    pub fn get_atom(&self, id: &AtomId, tenant_id: &str) -> SpaceResult<Arc<Atom>> {
        self.inner
            .read()
            .expect("atomspace lock poisoned")
            .get(id, tenant_id)
    }

    /// All atoms of a tenant that satisfy `filter` (or all, if absent).
    pub async fn query_atoms(
        &self,
        tenant_id: &str,
        filter: Option<AtomFilter>,
    ) -> SpaceResult<Vec<Arc<Atom>>> {
        let (reply, rx) = oneshot::channel();
        self.query_tx
            .send(QueryRequest {
                tenant_id: tenant_id.to_string(),
                filter,
                reply,
            })
            .await
            .map_err(|_| SpaceError::Closed)?;
        rx.await.map_err(|_| SpaceError::Closed)
    }

    /// Apply `mutator` to an atom under the store's write lock.
    pub async fn update_atom(
        &self,
        id: &AtomId,
        tenant_id: &str,
        mutator: AtomMutator,
    ) -> SpaceResult<()> {
        let (reply, rx) = oneshot::channel();
        self.update_tx
            .send(UpdateRequest {
                id: id.clone(),
                tenant_id: tenant_id.to_string(),
                mutator,
                reply,
            })
            .await
            .map_err(|_| SpaceError::Closed)?;
        rx.await.map_err(|_| SpaceError::Closed)?
    }

    /// Remove an atom from the primary map and every index. Empty index
    /// buckets are reaped.
    pub async fn delete_atom(&self, id: &AtomId, tenant_id: &str) -> SpaceResult<()> {
        let (reply, rx) = oneshot::channel();
        self.delete_tx
            .send(DeleteRequest {
                id: id.clone(),
                tenant_id: tenant_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| SpaceError::Closed)?;
        rx.await.map_err(|_| SpaceError::Closed)?
    }

    /// Atom count and per-type breakdown for one tenant.
    pub fn stats(&self, tenant_id: &str) -> SpaceStats {
        self.inner
            .read()
            .expect("atomspace lock poisoned")
            .stats(tenant_id)
    }

    /// All atoms of a tenant with the given type.
    pub async fn atoms_by_type(
        &self,
        tenant_id: &str,
        atom_type: AtomType,
    ) -> SpaceResult<Vec<Arc<Atom>>> {
        let filter: AtomFilter = Arc::new(move |a: &Atom| a.atom_type() == atom_type);
        self.query_atoms(tenant_id, Some(filter)).await
    }

    /// All atoms of a tenant with the given name, served by the name index.
    pub fn atoms_by_name(&self, tenant_id: &str, name: &str) -> Vec<Arc<Atom>> {
        let inner = self.inner.read().expect("atomspace lock poisoned");
        let Some(ids) = inner.by_name.get(name) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| inner.atoms.get(id))
            .filter(|atom| atom.tenant_id() == tenant_id)
            .cloned()
            .collect()
    }

    /// Total atoms in this shard, across all tenants.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .expect("atomspace lock poisoned")
            .atoms
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Signal the worker pool to stop. Requests after close fail with
    /// [`SpaceError::Closed`].
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn worker_loop(
    inner: Arc<RwLock<SpaceInner>>,
    add_rx: Arc<Mutex<mpsc::Receiver<AddRequest>>>,
    query_rx: Arc<Mutex<mpsc::Receiver<QueryRequest>>>,
    update_rx: Arc<Mutex<mpsc::Receiver<UpdateRequest>>>,
    delete_rx: Arc<Mutex<mpsc::Receiver<DeleteRequest>>>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    // tokio::select! polls branches in random order, which is what gives the
    // four queues fair service under load.
    loop {
        tokio::select! {
            req = recv(&add_rx) => {
                let Some(req) = req else { break };
                let result = inner.write().expect("atomspace lock poisoned").add(req.atom);
                let _ = req.reply.send(result);
            }
            req = recv(&query_rx) => {
                let Some(req) = req else { break };
                let atoms = inner
                    .read()
                    .expect("atomspace lock poisoned")
                    .query(&req.tenant_id, req.filter.as_ref());
                let _ = req.reply.send(atoms);
            }
            req = recv(&update_rx) => {
                let Some(req) = req else { break };
                let result = inner
                    .write()
                    .expect("atomspace lock poisoned")
                    .update(&req.id, &req.tenant_id, req.mutator);
                let _ = req.reply.send(result);
            }
            req = recv(&delete_rx) => {
                let Some(req) = req else { break };
                let result = inner
                    .write()
                    .expect("atomspace lock poisoned")
                    .delete(&req.id, &req.tenant_id);
                let _ = req.reply.send(result);
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

/// Receive from a shared channel. Cancel-safe: a message is consumed only by
/// the branch that wins the select.
async fn recv<T>(rx: &Mutex<mpsc::Receiver<T>>) -> Option<T> {
    rx.lock().await.recv().await
}

#[async_trait]
impl AtomStore for AtomSpace {
    async fn add_atom(&self, atom: Arc<Atom>) -> SpaceResult<()> {
        AtomSpace::add_atom(self, atom).await
    }

    async fn get_atom(&self, id: &AtomId, tenant_id: &str) -> SpaceResult<Arc<Atom>> {
        AtomSpace::get_atom(self, id, tenant_id)
    }

    async fn query_atoms(
        &self,
        tenant_id: &str,
        filter: Option<AtomFilter>,
    ) -> SpaceResult<Vec<Arc<Atom>>> {
        AtomSpace::query_atoms(self, tenant_id, filter).await
    }

    async fn update_atom(
        &self,
        id: &AtomId,
        tenant_id: &str,
        mutator: AtomMutator,
    ) -> SpaceResult<()> {
        AtomSpace::update_atom(self, id, tenant_id, mutator).await
    }

    async fn delete_atom(&self, id: &AtomId, tenant_id: &str) -> SpaceResult<()> {
        AtomSpace::delete_atom(self, id, tenant_id).await
    }

    async fn stats(&self, tenant_id: &str) -> SpaceResult<SpaceStats> {
        Ok(AtomSpace::stats(self, tenant_id))
    }
}
