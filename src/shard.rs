//! Hash-partitioned distribution of atoms across AtomSpace shards.
//!
//! Atoms route to shards by FNV-1a over `tenant_id:atom_id`, so the same
//! lookup always lands on the same shard and different tenants disperse
//! independently even for equal atom ids. Tenant-wide queries fan out to
//! every shard in parallel and concatenate. A monitor task watches shard
//! load imbalance and emits advisory rebalance decisions; atoms are never
//! migrated, which keeps lookups deterministic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, Mutex};

use crate::atom::{unix_now, Atom, AtomId, AtomType};
use crate::error::{ShardError, ShardResult, SpaceError, SpaceResult};
use crate::space::{AtomFilter, AtomMutator, AtomSpace, AtomStore, SpaceStats};

const ROUTE_QUEUE_DEPTH: usize = 1000;

/// FNV-1a 64-bit. Stable across processes; the routing identity of every
/// stored atom depends on these constants.
fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the shard manager.
#[derive(Debug, Clone)]
pub struct ShardManagerConfig {
    /// Number of shards (default: 8).
    pub num_shards: usize,
    /// Request workers per shard (default: 4).
    pub workers_per_shard: usize,
    /// Routing workers (default: 4).
    pub router_workers: usize,
    /// Load difference that triggers an advisory rebalance (default: 1000).
    pub rebalance_threshold: i64,
    /// Rebalance monitor tick (default: 30 s).
    pub rebalance_interval: Duration,
}

impl Default for ShardManagerConfig {
    fn default() -> Self {
        Self {
            num_shards: 8,
            workers_per_shard: 4,
            router_workers: 4,
            rebalance_threshold: 1000,
            rebalance_interval: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// Shard
// ---------------------------------------------------------------------------

/// One partition of the atomspace, with load tracking.
pub struct Shard {
    id: usize,
    space: AtomSpace,
    load: AtomicI64,
    last_used: RwLock<u64>,
}

impl Shard {
    fn new(id: usize, workers: usize) -> Self {
        Self {
            id,
            space: AtomSpace::new(workers),
            load: AtomicI64::new(0),
            last_used: RwLock::new(unix_now()),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn space(&self) -> &AtomSpace {
        &self.space
    }

    /// Current number of atoms in this shard.
    pub fn load(&self) -> i64 {
        self.load.load(Ordering::Relaxed)
    }

    pub fn last_used(&self) -> u64 {
        *self.last_used.read().expect("shard lock poisoned")
    }

    fn record_add(&self) {
        self.load.fetch_add(1, Ordering::Relaxed);
        *self.last_used.write().expect("shard lock poisoned") = unix_now();
    }

    fn record_delete(&self) {
        self.load.fetch_sub(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Rebalance planning
// ---------------------------------------------------------------------------

/// Advisory rebalance decision: which shards sit above/below the band around
/// the average load. No migration is performed.
#[derive(Debug, Clone, Serialize)]
pub struct RebalancePlan {
    pub average_load: i64,
    pub overloaded: Vec<usize>,
    pub underloaded: Vec<usize>,
}

/// Whether the load spread exceeds the threshold.
fn loads_need_rebalance(loads: &[i64], threshold: i64) -> bool {
    let Some(&first) = loads.first() else {
        return false;
    };
    let (min, max) = loads
        .iter()
        .fold((first, first), |(lo, hi), &l| (lo.min(l), hi.max(l)));
    max - min > threshold
}

/// Identify shards more than half a threshold away from the average.
fn plan_rebalance(loads: &[i64], threshold: i64) -> RebalancePlan {
    let average_load = if loads.is_empty() {
        0
    } else {
        loads.iter().sum::<i64>() / loads.len() as i64
    };
    let band = threshold / 2;
    let mut overloaded = Vec::new();
    let mut underloaded = Vec::new();
    for (id, &load) in loads.iter().enumerate() {
        if load > average_load + band {
            overloaded.push(id);
        } else if load < average_load - band {
            underloaded.push(id);
        }
    }
    RebalancePlan {
        average_load,
        overloaded,
        underloaded,
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Snapshot of one shard's load.
#[derive(Debug, Clone, Serialize)]
pub struct ShardLoad {
    pub shard_id: usize,
    pub load: i64,
    pub last_used: u64,
}

/// Load snapshot across all shards.
#[derive(Debug, Clone, Serialize)]
pub struct ShardStats {
    pub num_shards: usize,
    pub total_load: i64,
    pub average_load: i64,
    pub shards: Vec<ShardLoad>,
}

/// Tenant-wide statistics aggregated across shards.
#[derive(Debug, Clone, Serialize)]
pub struct TenantStats {
    pub tenant_id: String,
    pub total_atoms: usize,
    pub atoms_by_type: HashMap<AtomType, usize>,
    /// Shard id -> atoms of this tenant living there.
    pub shard_distribution: HashMap<usize, usize>,
}

// ---------------------------------------------------------------------------
// Shard manager
// ---------------------------------------------------------------------------

struct RouteRequest {
    atom_id: AtomId,
    tenant_id: String,
    reply: oneshot::Sender<usize>,
}

/// Routes operations to shards and fans tenant-wide queries across them.
pub struct ShardManager {
    shards: Arc<Vec<Arc<Shard>>>,
    route_tx: mpsc::Sender<RouteRequest>,
    shutdown_tx: watch::Sender<bool>,
    rebalance_threshold: i64,
}

impl ShardManager {
    /// Create the shard set, router workers, and the rebalance monitor.
    pub fn new(config: ShardManagerConfig) -> Self {
        let num_shards = config.num_shards.max(1);
        let shards: Arc<Vec<Arc<Shard>>> = Arc::new(
            (0..num_shards)
                .map(|id| Arc::new(Shard::new(id, config.workers_per_shard)))
                .collect(),
        );

        let (route_tx, route_rx) = mpsc::channel::<RouteRequest>(ROUTE_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let route_rx = Arc::new(Mutex::new(route_rx));
        for _ in 0..config.router_workers.max(1) {
            let route_rx = Arc::clone(&route_rx);
            let mut shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        req = async { route_rx.lock().await.recv().await } => {
                            let Some(req) = req else { break };
                            let index = route_index(&req.atom_id, &req.tenant_id, num_shards);
                            let _ = req.reply.send(index);
                        }
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            });
        }

        let monitor_shards = Arc::clone(&shards);
        let mut monitor_shutdown = shutdown_rx.clone();
        let threshold = config.rebalance_threshold;
        let tick = config.rebalance_interval;
        tokio::spawn(async move {
            // First check fires one full period after startup.
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let loads: Vec<i64> =
                            monitor_shards.iter().map(|s| s.load()).collect();
                        if loads_need_rebalance(&loads, threshold) {
                            let plan = plan_rebalance(&loads, threshold);
                            tracing::info!(
                                average_load = plan.average_load,
                                overloaded = ?plan.overloaded,
                                underloaded = ?plan.underloaded,
                                "shard load imbalance detected (advisory, no migration)",
                            );
                        }
                    }
                    _ = monitor_shutdown.changed() => {
                        if *monitor_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            shards,
            route_tx,
            shutdown_tx,
            rebalance_threshold: threshold,
        }
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// Shard index an atom routes to, computed by a router worker.
    pub async fn shard_index(&self, atom_id: &AtomId, tenant_id: &str) -> ShardResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.route_tx
            .send(RouteRequest {
                atom_id: atom_id.clone(),
                tenant_id: tenant_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| ShardError::Closed)?;
        rx.await.map_err(|_| ShardError::Closed)
    }

    async fn shard_for(&self, atom_id: &AtomId, tenant_id: &str) -> SpaceResult<Arc<Shard>> {
        let index = self
            .shard_index(atom_id, tenant_id)
            .await
            .map_err(|_| SpaceError::Closed)?;
        Ok(Arc::clone(&self.shards[index]))
    }

    /// Shard by explicit id.
    pub fn shard_by_id(&self, shard_id: usize) -> ShardResult<Arc<Shard>> {
        self.shards
            .get(shard_id)
            .cloned()
            .ok_or(ShardError::InvalidShard {
                shard_id,
                num_shards: self.shards.len(),
            })
    }

    /// Route an atom to its shard and insert it. Successful adds bump the
    /// shard's load.
    pub async fn add_atom(&self, atom: Arc<Atom>) -> SpaceResult<()> {
        let shard = self.shard_for(atom.id(), atom.tenant_id()).await?;
        shard.space.add_atom(atom).await?;
        shard.record_add();
        Ok(())
    }

    pub async fn get_atom(&self, id: &AtomId, tenant_id: &str) -> SpaceResult<Arc<Atom>> {
        let shard = self.shard_for(id, tenant_id).await?;
        shard.space.get_atom(id, tenant_id)
    }

    /// Query every shard in parallel and concatenate (order unspecified).
    pub async fn query_atoms(
        &self,
        tenant_id: &str,
        filter: Option<AtomFilter>,
    ) -> SpaceResult<Vec<Arc<Atom>>> {
        let mut handles = Vec::with_capacity(self.shards.len());
        for shard in self.shards.iter() {
            let shard = Arc::clone(shard);
            let tenant = tenant_id.to_string();
            let filter = filter.clone();
            handles.push(tokio::spawn(async move {
                shard.space.query_atoms(&tenant, filter).await
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            let atoms = handle.await.map_err(|_| SpaceError::Closed)??;
            all.extend(atoms);
        }
        Ok(all)
    }

    pub async fn update_atom(
        &self,
        id: &AtomId,
        tenant_id: &str,
        mutator: AtomMutator,
    ) -> SpaceResult<()> {
        let shard = self.shard_for(id, tenant_id).await?;
        shard.space.update_atom(id, tenant_id, mutator).await
    }

    pub async fn delete_atom(&self, id: &AtomId, tenant_id: &str) -> SpaceResult<()> {
        let shard = self.shard_for(id, tenant_id).await?;
        shard.space.delete_atom(id, tenant_id).await?;
        shard.record_delete();
        Ok(())
    }

    /// All atoms of a tenant with the given type, across shards.
    pub async fn atoms_by_type(
        &self,
        tenant_id: &str,
        atom_type: AtomType,
    ) -> SpaceResult<Vec<Arc<Atom>>> {
        let filter: AtomFilter = Arc::new(move |a: &Atom| a.atom_type() == atom_type);
        self.query_atoms(tenant_id, Some(filter)).await
    }

    /// All atoms of a tenant with the given name, across shards.
    pub async fn atoms_by_name(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> SpaceResult<Vec<Arc<Atom>>> {
        let name = name.to_string();
        let filter: AtomFilter = Arc::new(move |a: &Atom| a.name() == name);
        self.query_atoms(tenant_id, Some(filter)).await
    }

    /// Aggregate a tenant's statistics across all shards in parallel.
    pub async fn tenant_stats(&self, tenant_id: &str) -> SpaceResult<TenantStats> {
        let mut handles = Vec::with_capacity(self.shards.len());
        for shard in self.shards.iter() {
            let shard = Arc::clone(shard);
            let tenant = tenant_id.to_string();
            handles.push(tokio::spawn(async move {
                (shard.id(), shard.space.stats(&tenant))
            }));
        }

        let mut total_atoms = 0;
        let mut atoms_by_type: HashMap<AtomType, usize> = HashMap::new();
        let mut shard_distribution = HashMap::new();
        for handle in handles {
            let (shard_id, stats) = handle.await.map_err(|_| SpaceError::Closed)?;
            total_atoms += stats.total_atoms;
            shard_distribution.insert(shard_id, stats.total_atoms);
            for (atom_type, count) in stats.atoms_by_type {
                *atoms_by_type.entry(atom_type).or_insert(0) += count;
            }
        }

        Ok(TenantStats {
            tenant_id: tenant_id.to_string(),
            total_atoms,
            atoms_by_type,
            shard_distribution,
        })
    }

    /// Load snapshot for all shards.
    pub fn shard_stats(&self) -> ShardStats {
        let shards: Vec<ShardLoad> = self
            .shards
            .iter()
            .map(|s| ShardLoad {
                shard_id: s.id(),
                load: s.load(),
                last_used: s.last_used(),
            })
            .collect();
        let total_load: i64 = shards.iter().map(|s| s.load).sum();
        let average_load = if shards.is_empty() {
            0
        } else {
            total_load / shards.len() as i64
        };
        ShardStats {
            num_shards: self.shards.len(),
            total_load,
            average_load,
            shards,
        }
    }

    /// Whether the current load spread exceeds the rebalance threshold.
    pub fn needs_rebalance(&self) -> bool {
        let loads: Vec<i64> = self.shards.iter().map(|s| s.load()).collect();
        loads_need_rebalance(&loads, self.rebalance_threshold)
    }

    /// The advisory plan the monitor would log right now.
    pub fn rebalance_plan(&self) -> RebalancePlan {
        let loads: Vec<i64> = self.shards.iter().map(|s| s.load()).collect();
        plan_rebalance(&loads, self.rebalance_threshold)
    }

    /// Stop the router workers, the monitor, and every shard's worker pool.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        for shard in self.shards.iter() {
            shard.space.close();
        }
    }
}

fn route_index(atom_id: &AtomId, tenant_id: &str, num_shards: usize) -> usize {
    let key = format!("{tenant_id}:{atom_id}");
    (fnv1a64(key.as_bytes()) % num_shards as u64) as usize
}

#[async_trait]
impl AtomStore for ShardManager {
    async fn add_atom(&self, atom: Arc<Atom>) -> SpaceResult<()> {
        ShardManager::add_atom(self, atom).await
    }

    async fn get_atom(&self, id: &AtomId, tenant_id: &str) -> SpaceResult<Arc<Atom>> {
        ShardManager::get_atom(self, id, tenant_id).await
    }

    async fn query_atoms(
        &self,
        tenant_id: &str,
        filter: Option<AtomFilter>,
    ) -> SpaceResult<Vec<Arc<Atom>>> {
        ShardManager::query_atoms(self, tenant_id, filter).await
    }

    async fn update_atom(
        &self,
        id: &AtomId,
        tenant_id: &str,
        mutator: AtomMutator,
    ) -> SpaceResult<()> {
        ShardManager::update_atom(self, id, tenant_id, mutator).await
    }

    async fn delete_atom(&self, id: &AtomId, tenant_id: &str) -> SpaceResult<()> {
        ShardManager::delete_atom(self, id, tenant_id).await
    }

    async fn stats(&self, tenant_id: &str) -> SpaceResult<SpaceStats> {
        let tenant = self.tenant_stats(tenant_id).await?;
        Ok(SpaceStats {
            total_atoms: tenant.total_atoms,
            atoms_by_type: tenant.atoms_by_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(num_shards: usize) -> ShardManager {
        ShardManager::new(ShardManagerConfig {
            num_shards,
            workers_per_shard: 2,
            router_workers: 2,
            ..Default::default()
        })
    }

    fn concept(name: &str, tenant: &str) -> Arc<Atom> {
        Arc::new(Atom::node(AtomType::ConceptNode, name, tenant).unwrap())
    }

    #[test]
    fn fnv1a64_known_vectors() {
        // Reference values for the 64-bit FNV-1a parameters.
        assert_eq!(fnv1a64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a64(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn routing_is_deterministic_and_in_range() {
        let id = AtomId::derive(AtomType::ConceptNode, "Cat", &[]);
        let a = route_index(&id, "demo", 8);
        let b = route_index(&id, "demo", 8);
        assert_eq!(a, b);
        assert!(a < 8);
    }

    #[test]
    fn routing_disperses_by_tenant() {
        // Equal atom ids under many tenants should not all collapse onto one
        // shard: the tenant prefix participates in the hash.
        let id = AtomId::derive(AtomType::ConceptNode, "Cat", &[]);
        let shards: std::collections::HashSet<usize> = (0..64)
            .map(|i| route_index(&id, &format!("tenant-{i}"), 8))
            .collect();
        assert!(shards.len() > 1);
    }

    #[test]
    fn rebalance_plan_identifies_outliers() {
        assert!(!loads_need_rebalance(&[], 10));
        assert!(!loads_need_rebalance(&[5, 5, 5], 10));
        assert!(loads_need_rebalance(&[0, 50], 10));

        let plan = plan_rebalance(&[100, 0, 50, 50], 20);
        assert_eq!(plan.average_load, 50);
        assert_eq!(plan.overloaded, vec![0]);
        assert_eq!(plan.underloaded, vec![1]);
    }

    #[tokio::test]
    async fn add_get_roundtrip_through_routing() {
        let sm = manager(8);
        let cat = concept("Cat", "demo");
        sm.add_atom(Arc::clone(&cat)).await.unwrap();

        let fetched = sm.get_atom(cat.id(), "demo").await.unwrap();
        assert_eq!(fetched.id(), cat.id());
        sm.close();
    }

    #[tokio::test]
    async fn cross_shard_query_is_complete_and_duplicate_free() {
        let sm = manager(8);
        let mut ids = std::collections::HashSet::new();
        for i in 0..40 {
            let atom = concept(&format!("Concept{i}"), "demo");
            ids.insert(atom.id().clone());
            sm.add_atom(atom).await.unwrap();
        }

        let atoms = sm.query_atoms("demo", None).await.unwrap();
        assert_eq!(atoms.len(), 40);
        let returned: std::collections::HashSet<AtomId> =
            atoms.iter().map(|a| a.id().clone()).collect();
        assert_eq!(returned, ids);
        sm.close();
    }

    #[tokio::test]
    async fn load_tracks_adds_and_deletes() {
        let sm = manager(4);
        let cat = concept("Cat", "demo");
        sm.add_atom(Arc::clone(&cat)).await.unwrap();
        assert_eq!(sm.shard_stats().total_load, 1);

        // A failed duplicate add must not bump the load.
        let _ = sm.add_atom(concept("Cat", "demo")).await.unwrap_err();
        assert_eq!(sm.shard_stats().total_load, 1);

        sm.delete_atom(cat.id(), "demo").await.unwrap();
        assert_eq!(sm.shard_stats().total_load, 0);
        sm.close();
    }

    #[tokio::test]
    async fn tenant_stats_aggregate_across_shards() {
        let sm = manager(8);
        for i in 0..10 {
            sm.add_atom(concept(&format!("C{i}"), "demo")).await.unwrap();
        }
        sm.add_atom(concept("Other", "someone-else")).await.unwrap();

        let stats = sm.tenant_stats("demo").await.unwrap();
        assert_eq!(stats.total_atoms, 10);
        assert_eq!(stats.atoms_by_type[&AtomType::ConceptNode], 10);
        let distributed: usize = stats.shard_distribution.values().sum();
        assert_eq!(distributed, 10);
        sm.close();
    }

    #[tokio::test]
    async fn typed_and_named_queries_span_shards() {
        let sm = manager(8);
        for i in 0..8 {
            sm.add_atom(concept(&format!("C{i}"), "demo")).await.unwrap();
        }

        let concepts = sm
            .atoms_by_type("demo", AtomType::ConceptNode)
            .await
            .unwrap();
        assert_eq!(concepts.len(), 8);
        assert!(sm
            .atoms_by_type("demo", AtomType::SimilarityLink)
            .await
            .unwrap()
            .is_empty());

        let named = sm.atoms_by_name("demo", "C3").await.unwrap();
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].name(), "C3");
        sm.close();
    }

    #[tokio::test]
    async fn single_shard_behaves_like_plain_store() {
        let sm = manager(1);
        let cat = concept("Cat", "demo");
        sm.add_atom(Arc::clone(&cat)).await.unwrap();
        assert!(sm.get_atom(cat.id(), "demo").await.is_ok());
        assert_eq!(sm.query_atoms("demo", None).await.unwrap().len(), 1);
        assert_eq!(sm.shard_by_id(0).unwrap().load(), 1);
        assert!(sm.shard_by_id(1).is_err());
        sm.close();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn close_rejects_new_operations() {
        let sm = manager(2);
        sm.close();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = sm.add_atom(concept("Cat", "demo")).await.unwrap_err();
        assert!(matches!(err, SpaceError::Closed));
    }
}
