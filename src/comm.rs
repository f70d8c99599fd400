// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use tracing::debug;

use crate::decomposition::{Decomposition, Face, Neighbor};
use crate::error::{FdError, Result};

/// Rank that owns gathered results.
pub const ROOT: usize = 0;

/// Messages that may be in flight on one directed link at once.
const LINK_POOL: usize = 2;

/// Message passing between subdomain workers.
///
/// Every call is blocking and must be issued by all participating ranks in
/// the same order; there is no timeout.
pub trait Communicator {
    /// This worker's rank.
    fn rank(&self) -> usize;

    /// Number of workers.
    fn size(&self) -> usize;

    /// Send `buf` to the neighbor across `toward` and overwrite it with the
    /// message from the neighbor across the opposite face.
    ///
    /// A [`Neighbor::Boundary`] on either side skips that half of the
    /// exchange; `buf` is left untouched when nothing is received.
    fn sendrecv_replace(&mut self, buf: &mut [f32], toward: Face) -> Result<()>;

    /// Collect `data` from every rank on [`ROOT`], in rank order.
    /// Returns `Some` on the root and `None` elsewhere.
    fn gather(&mut self, data: &[f32]) -> Result<Option<Vec<Vec<f32>>>>;

    /// Replace `data` on every rank with the root's copy.
    fn broadcast(&mut self, data: &mut Vec<f32>) -> Result<()>;

    /// Signal every rank to stop; blocked calls return [`FdError::Aborted`].
    fn abort(&self);

    /// Global maximum of one value per rank.
    fn all_reduce_max(&mut self, value: f32) -> Result<f32> {
        let gathered = self.gather(&[value])?;
        let mut out = match gathered {
            Some(all) => vec![all
                .iter()
                .flat_map(|v| v.iter().copied())
                .fold(f32::NEG_INFINITY, f32::max)],
            None => Vec::new(),
        };
        self.broadcast(&mut out)?;
        out.first()
            .copied()
            .ok_or_else(|| FdError::Communication("empty reduction result".to_string()))
    }

    /// Wait until every rank reaches this point.
    fn barrier(&mut self) -> Result<()> {
        self.all_reduce_max(0.0).map(|_| ())
    }
}

struct Outgoing {
    data: Sender<Vec<f32>>,
    pool: Receiver<Vec<f32>>,
}

struct Incoming {
    data: Receiver<Vec<f32>>,
    pool: Sender<Vec<f32>>,
}

/// Cloneable handle that aborts every worker of a world.
#[derive(Clone)]
pub struct AbortHandle {
    peers: Vec<Sender<()>>,
}

impl AbortHandle {
    /// Wake every rank with an abort signal.
    pub fn abort(&self) {
        for p in &self.peers {
            let _ = p.send(());
        }
    }
}

/// In-process communicator: one worker thread per subdomain, connected by
/// bounded channels.
///
/// Each directed neighbor link owns a fixed pool of message buffers that
/// circulate between sender and receiver, so steady-state exchanges never
/// allocate and a sender can run at most [`LINK_POOL`] messages ahead.
pub struct ThreadComm {
    rank: usize,
    size: usize,
    outgoing: [Option<Outgoing>; 6],
    incoming: [Option<Incoming>; 6],
    to_root: Option<Sender<(usize, Vec<f32>)>>,
    root_inbox: Option<Receiver<(usize, Vec<f32>)>>,
    from_root: Option<Receiver<Vec<f32>>>,
    to_ranks: Vec<Option<Sender<Vec<f32>>>>,
    abort_handle: AbortHandle,
    abort_rx: Receiver<()>,
}

impl ThreadComm {
    /// Handle that can abort this world from outside the worker.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    fn recv<T>(&self, rx: &Receiver<T>, what: &str) -> Result<T> {
        select! {
            recv(rx) -> msg => msg.map_err(|_| {
                FdError::Communication(format!("rank {}: {} channel disconnected", self.rank, what))
            }),
            recv(self.abort_rx) -> _ => Err(FdError::Aborted),
        }
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn sendrecv_replace(&mut self, buf: &mut [f32], toward: Face) -> Result<()> {
        let i = toward.index();
        if let Some(out) = &self.outgoing[i] {
            let mut msg = self.recv(&out.pool, "message pool")?;
            msg.clear();
            msg.extend_from_slice(buf);
            out.data.send(msg).map_err(|_| {
                FdError::Communication(format!(
                    "rank {}: neighbor across {:?} is gone",
                    self.rank, toward
                ))
            })?;
        }
        if let Some(inc) = &self.incoming[i] {
            let msg = self.recv(&inc.data, "halo")?;
            if msg.len() != buf.len() {
                return Err(FdError::Communication(format!(
                    "rank {}: expected {} values toward {:?}, got {}",
                    self.rank,
                    buf.len(),
                    toward,
                    msg.len()
                )));
            }
            buf.copy_from_slice(&msg);
            // The sender may already have finished; its pool is then unused.
            let _ = inc.pool.send(msg);
        }
        Ok(())
    }

    fn gather(&mut self, data: &[f32]) -> Result<Option<Vec<Vec<f32>>>> {
        if self.rank == ROOT {
            let mut all: Vec<Option<Vec<f32>>> = vec![None; self.size];
            all[ROOT] = Some(data.to_vec());
            if let Some(inbox) = &self.root_inbox {
                for _ in 1..self.size {
                    let (from, msg) = self.recv(inbox, "gather")?;
                    all[from] = Some(msg);
                }
            }
            // Acknowledge so that gathers cannot interleave.
            for tx in self.to_ranks.iter().flatten() {
                tx.send(Vec::new())
                    .map_err(|_| FdError::Communication("rank vanished during gather".into()))?;
            }
            let all = all
                .into_iter()
                .enumerate()
                .map(|(r, v)| {
                    v.ok_or_else(|| FdError::Communication(format!("no gather data from rank {}", r)))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Some(all))
        } else {
            let tx = self
                .to_root
                .as_ref()
                .ok_or_else(|| FdError::Communication("no route to root".into()))?;
            tx.send((self.rank, data.to_vec()))
                .map_err(|_| FdError::Communication("root vanished during gather".into()))?;
            let rx = self
                .from_root
                .as_ref()
                .ok_or_else(|| FdError::Communication("no route from root".into()))?;
            self.recv(rx, "gather acknowledgement")?;
            Ok(None)
        }
    }

    fn broadcast(&mut self, data: &mut Vec<f32>) -> Result<()> {
        if self.rank == ROOT {
            for tx in self.to_ranks.iter().flatten() {
                tx.send(data.clone())
                    .map_err(|_| FdError::Communication("rank vanished during broadcast".into()))?;
            }
        } else {
            let rx = self
                .from_root
                .as_ref()
                .ok_or_else(|| FdError::Communication("no route from root".into()))?;
            *data = self.recv(rx, "broadcast")?;
        }
        Ok(())
    }

    fn abort(&self) {
        self.abort_handle.abort();
    }
}

fn pooled_buffer(capacity: usize) -> Result<Vec<f32>> {
    let mut v = Vec::new();
    v.try_reserve_exact(capacity)
        .map_err(|_| FdError::Allocation { elements: capacity })?;
    Ok(v)
}

/// Build one connected communicator per rank of `decomp`.
///
/// `message_capacity[a]` is the largest message (in values) exchanged across
/// a face normal to axis `a`; link pools are pre-sized to it.
pub fn create_world(decomp: &Decomposition, message_capacity: [usize; 3]) -> Result<Vec<ThreadComm>> {
    let size = decomp.num_ranks();
    let (abort_txs, abort_rxs): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();
    let handle = AbortHandle { peers: abort_txs };

    let (root_tx, root_rx) = unbounded();
    let mut to_ranks = vec![None; size];
    let mut comms: Vec<ThreadComm> = abort_rxs
        .into_iter()
        .enumerate()
        .map(|(rank, abort_rx)| {
            let (from_root, to_rank) = if rank == ROOT {
                (None, None)
            } else {
                let (tx, rx) = unbounded();
                (Some(rx), Some(tx))
            };
            to_ranks[rank] = to_rank;
            ThreadComm {
                rank,
                size,
                outgoing: Default::default(),
                incoming: Default::default(),
                to_root: (rank != ROOT).then(|| root_tx.clone()),
                root_inbox: None,
                from_root,
                to_ranks: Vec::new(),
                abort_handle: handle.clone(),
                abort_rx,
            }
        })
        .collect();
    drop(root_tx);
    comms[ROOT].root_inbox = Some(root_rx);
    comms[ROOT].to_ranks = to_ranks;

    let mut links = 0;
    for sub in decomp.subdomains() {
        for face in Face::ALL {
            if let Neighbor::Rank(dst) = sub.neighbor(face) {
                let (data_tx, data_rx) = bounded(LINK_POOL);
                let (pool_tx, pool_rx) = bounded(LINK_POOL);
                for _ in 0..LINK_POOL {
                    pool_tx
                        .send(pooled_buffer(message_capacity[face.axis()])?)
                        .map_err(|_| FdError::Communication("link pool closed".into()))?;
                }
                comms[sub.rank].outgoing[face.index()] = Some(Outgoing {
                    data: data_tx,
                    pool: pool_rx,
                });
                comms[dst].incoming[face.index()] = Some(Incoming {
                    data: data_rx,
                    pool: pool_tx,
                });
                links += 1;
            }
        }
    }
    debug!(ranks = size, links, "created in-process world");
    Ok(comms)
}

struct AbortOnDrop {
    handle: AbortHandle,
    armed: bool,
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.handle.abort();
        }
    }
}

/// Run `worker` once per rank of `decomp`, each on its own thread.
///
/// A worker that fails or panics aborts the whole world. The returned error
/// is the first root cause rather than an echo of the abort.
pub fn run_world<R, F>(decomp: &Decomposition, message_capacity: [usize; 3], worker: F) -> Result<Vec<R>>
where
    R: Send,
    F: Fn(ThreadComm) -> Result<R> + Sync,
{
    let comms = create_world(decomp, message_capacity)?;
    let world_abort = comms
        .first()
        .map(|c| c.abort_handle())
        .ok_or_else(|| FdError::Other("empty process grid".to_string()))?;

    let results: Vec<Result<R>> = std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(comms.len());
        for comm in comms {
            let worker = &worker;
            let rank = comm.rank();
            let spawned = std::thread::Builder::new()
                .name(format!("rank-{}", rank))
                .spawn_scoped(scope, move || {
                    let mut guard = AbortOnDrop {
                        handle: comm.abort_handle(),
                        armed: true,
                    };
                    let result = worker(comm);
                    guard.armed = result.is_err();
                    result
                });
            match spawned {
                Ok(h) => handles.push(Ok(h)),
                Err(e) => {
                    world_abort.abort();
                    handles.push(Err(FdError::Other(format!(
                        "failed to spawn worker for rank {}: {}",
                        rank, e
                    ))));
                }
            }
        }
        handles
            .into_iter()
            .map(|h| match h {
                Ok(h) => h
                    .join()
                    .unwrap_or_else(|_| Err(FdError::Other("worker panicked".to_string()))),
                Err(e) => Err(e),
            })
            .collect()
    });

    let mut ok = Vec::with_capacity(results.len());
    let mut first_err: Option<FdError> = None;
    for r in results {
        match r {
            Ok(v) => ok.push(v),
            Err(e) => {
                let replace = match &first_err {
                    None => true,
                    Some(prev) => prev.is_secondary() && !e.is_secondary(),
                };
                if replace {
                    first_err = Some(e);
                }
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(ok),
    }
}
