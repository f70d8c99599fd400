// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::Array2;
use tracing::{debug, info, warn};

use crate::checkpoint;
use crate::comm::{run_world, Communicator, ROOT};
use crate::config::{Absorbing, RunContext};
use crate::cpml::{Cpml, DampingFrame};
use crate::decomposition::{Decomposition, Subdomain};
use crate::error::{FdError, Result};
use crate::field::Extent3;
use crate::halo::{exchange_stress, exchange_velocity, HaloBuffers};
use crate::kernels::Scheme;
use crate::material::{build_material, Material};
use crate::receiver::{write_seismograms, Component, Seismograms};
use crate::snapshot::{write_snapshots, Snapshots};
use crate::source::LocalSources;
use crate::wavefield::Wavefield;

/// Values the material margin exchange moves per face.
const MARGIN_FIELDS: usize = 5;

/// Progress information passed to the optional callback.
pub struct ProgressInfo {
    /// Shot index, from zero.
    pub shot: usize,
    /// Last completed step.
    pub step: usize,
    /// Steps per shot.
    pub nt: usize,
    /// Elapsed time since the shot started.
    pub elapsed: Duration,
}

/// Accumulated wall time of the four phases of a time step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepTimings {
    /// Velocity update, sources and boundary correction.
    pub update_v: Duration,
    /// Velocity halo exchange.
    pub exchange_v: Duration,
    /// Stress update, sources and boundary correction.
    pub update_s: Duration,
    /// Stress halo exchange.
    pub exchange_s: Duration,
    /// Number of steps accumulated.
    pub steps: usize,
}

impl StepTimings {
    /// Mean milliseconds per step of each phase.
    pub fn mean_ms(&self) -> [f64; 4] {
        let n = self.steps.max(1) as f64;
        [self.update_v, self.exchange_v, self.update_s, self.exchange_s]
            .map(|d| d.as_secs_f64() * 1e3 / n)
    }
}

/// Seismograms of one shot.
#[derive(Debug, Clone)]
pub struct ShotOutput {
    /// Shot index, from zero.
    pub shot: usize,
    /// One `[receivers, samples]` array per recorded component.
    pub seismograms: Vec<(Component, Array2<f32>)>,
}

/// Results collected on the root rank.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Per-shot seismograms.
    pub shots: Vec<ShotOutput>,
    /// Root-rank phase timings.
    pub timings: StepTimings,
    /// Largest |v| anywhere at the end of the last shot.
    pub peak_velocity: f32,
    /// Bytes of wavefield and CPML state on the root rank.
    pub field_bytes: usize,
}

/// Parallel (visco)elastic finite-difference solver.
///
/// Runs one worker thread per subdomain of the configured process grid;
/// each worker may use several kernel threads.
pub struct Solver {
    ctx: Arc<RunContext>,
    kernel_threads: Option<usize>,
}

impl Solver {
    /// Create a solver for a validated run.
    pub fn new(ctx: RunContext) -> Self {
        Solver {
            ctx: Arc::new(ctx),
            kernel_threads: None,
        }
    }

    /// Set the number of kernel threads per subdomain worker (builder method).
    ///
    /// Results do not depend on this value.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.kernel_threads = Some(threads.max(1));
        self
    }

    /// The run being solved.
    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    fn get_kernel_threads(&self) -> usize {
        self.kernel_threads.unwrap_or_else(|| {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            (cores / self.ctx.num_ranks()).max(1)
        })
    }

    /// Run every shot to completion.
    ///
    /// # Errors
    /// Any failing worker aborts all others; the first root cause is returned,
    /// e.g. [`FdError::Unstable`] when the probe sees a non-finite velocity.
    pub fn solve(&self, progress: Option<&(dyn Fn(ProgressInfo) + Sync)>) -> Result<RunReport> {
        let ctx = &*self.ctx;
        let decomp = Decomposition::new(ctx.global, ctx.procs, ctx.num_ranks(), ctx.periodic)?;
        if let Some(dir) = &ctx.output_dir {
            std::fs::create_dir_all(dir).map_err(|e| FdError::file(dir, e))?;
        }
        let half = ctx.fd_order / 2;
        let stencil_msgs = HaloBuffers::message_sizes(decomp.local(), 3 * half, 0);
        let margin_msgs = HaloBuffers::message_sizes(decomp.local(), MARGIN_FIELDS, 1);
        let capacity = [0, 1, 2].map(|a| stencil_msgs[a].max(margin_msgs[a]));
        let threads = self.get_kernel_threads();

        info!(
            global = ?ctx.global,
            procs = ?ctx.procs,
            local = ?decomp.local(),
            fd_order = ctx.fd_order,
            time_order = ctx.time_order,
            nt = ctx.nt,
            dt = ctx.dt,
            model = %ctx.model.describe(),
            kernel_threads = threads,
            "starting run"
        );

        let reports = run_world(&decomp, capacity, |comm| {
            let mut worker = RankSolver::new(ctx, &decomp, comm, threads)?;
            worker.run(progress)
        })?;
        reports
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| FdError::Other("root rank returned no report".to_string()))
    }
}

/// State and step loop of one subdomain.
struct RankSolver<'a, C: Communicator> {
    ctx: &'a RunContext,
    decomp: &'a Decomposition,
    sub: Subdomain,
    comm: C,
    pool: rayon::ThreadPool,
    scheme: Scheme,
    wf: Wavefield,
    mat: Material,
    cpml: Cpml,
    damping: Option<DampingFrame>,
    buffers: HaloBuffers,
    seismo: Option<Seismograms>,
    snapshots: Option<Snapshots>,
    probe: [isize; 3],
    timings: StepTimings,
}

impl<'a, C: Communicator> RankSolver<'a, C> {
    fn new(ctx: &'a RunContext, decomp: &'a Decomposition, mut comm: C, threads: usize) -> Result<Self> {
        let rank = comm.rank();
        let sub = decomp.subdomain(rank);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("rank-{}-kernel-{}", rank, i))
            .build()
            .map_err(|e| FdError::Other(e.to_string()))?;

        let scheme = Scheme::new(ctx.fd_order, ctx.time_order, ctx.dh, ctx.dt)?;
        let extent = Extent3::with_halo(sub.local, ctx.halo());
        let (mat, vp_local, vs_local) = build_material(
            &mut comm,
            &sub,
            ctx.model.as_ref(),
            ctx.dh,
            ctx.dt,
            &ctx.frequencies,
            extent,
        )?;
        let vp_max = comm.all_reduce_max(vp_local)?;
        let vs_min = -comm.all_reduce_max(-vs_local.unwrap_or(f32::INFINITY))?;
        if rank == ROOT {
            check_stability(ctx, &scheme, vp_max, vs_min.is_finite().then_some(vs_min));
        }

        let cpml = match &ctx.absorbing {
            Absorbing::Cpml(settings) => {
                Cpml::new(&sub, &settings.params(vp_max), ctx.dh, ctx.dt, ctx.periodic)?
            }
            _ => Cpml::inactive(),
        };
        let damping = match ctx.absorbing {
            Absorbing::Damping { width, percent } => DampingFrame::new(&sub, width, percent, ctx.periodic)?,
            _ => None,
        };

        let wf = Wavefield::new(extent, ctx.time_order, ctx.frequencies.len())?;
        let buffers = HaloBuffers::new(sub.local, 3 * scheme.stencil.half_width(), 0)?;
        let seismo = ctx
            .seismo
            .map(|(kind, plan)| Seismograms::new(&ctx.receivers, &sub, kind, plan));
        let snapshots = ctx.snapshots.clone().map(|plan| Snapshots::new(plan, &sub));
        let probe = sub.local.map(|n| (n / 2).max(1) as isize);

        let bytes = wf.nbytes() + cpml.psi_fields().iter().map(|f| f.nbytes()).sum::<usize>();
        let mib = bytes as f64 / (1024.0 * 1024.0);
        if rank == ROOT {
            info!(rank, mib = %format!("{:.1}", mib), "field memory per rank");
        } else {
            debug!(rank, mib = %format!("{:.1}", mib), "field memory");
        }
        debug!(
            rank,
            receivers = seismo.as_ref().map_or(0, Seismograms::local_traces),
            cpml = cpml.is_active(),
            damping = damping.is_some(),
            "subdomain ready"
        );

        Ok(RankSolver {
            ctx,
            decomp,
            sub,
            comm,
            pool,
            scheme,
            wf,
            mat,
            cpml,
            damping,
            buffers,
            seismo,
            snapshots,
            probe,
            timings: StepTimings::default(),
        })
    }

    fn is_root(&self) -> bool {
        self.comm.rank() == ROOT
    }

    /// Advance from step `n - 1` to step `n`.
    fn step(&mut self, n: usize, sources: &LocalSources, shot: usize) -> Result<()> {
        let interior = self.sub.interior();
        let half = self.scheme.stencil.half_width();
        let dt = self.ctx.dt;
        let RankSolver {
            scheme,
            wf,
            mat,
            pool,
            cpml,
            damping,
            ..
        } = self;

        let start = Instant::now();
        pool.install(|| scheme.update_v(&interior, wf, mat));
        sources.inject_forces(&mut wf.v, mat, n);
        if let Some(frame) = damping {
            frame.apply_velocity(&mut wf.v);
        }
        cpml.correct_velocity(wf, mat, &scheme.stencil, dt);
        self.timings.update_v += start.elapsed();

        self.timings.exchange_v +=
            exchange_velocity(&mut self.comm, &self.sub, &mut self.buffers, &mut self.wf.v, half)?;

        let start = Instant::now();
        let RankSolver {
            scheme,
            wf,
            mat,
            pool,
            cpml,
            damping,
            ..
        } = self;
        pool.install(|| scheme.update_s(&interior, wf, mat))?;
        if let Some(frame) = damping {
            frame.apply_stress(&mut wf.s);
        }
        cpml.correct_stress(wf, mat, &scheme.stencil, dt);
        sources.inject_explosive(&mut wf.s, n);
        self.timings.update_s += start.elapsed();

        self.timings.exchange_s +=
            exchange_stress(&mut self.comm, &self.sub, &mut self.buffers, &mut self.wf.s, half)?;
        self.timings.steps += 1;

        if let Some(seismo) = &mut self.seismo {
            seismo.record(n, &self.wf, &self.mat, &self.scheme.stencil);
        }
        self.snapshot(n, shot)?;

        let [i, j, k] = self.probe;
        if !self.wf.v.y.get(i, j, k).is_finite() {
            warn!(rank = self.comm.rank(), step = n, "non-finite velocity at probe");
            return Err(FdError::Unstable {
                step: n,
                rank: self.comm.rank(),
            });
        }
        Ok(())
    }

    fn snapshot(&mut self, n: usize, shot: usize) -> Result<()> {
        let Some(snaps) = &self.snapshots else {
            return Ok(());
        };
        if !snaps.is_due(n) {
            return Ok(());
        }
        let volumes = snaps.gather(&mut self.comm, self.decomp, &self.wf)?;
        if let (Some(volumes), Some(dir)) = (volumes, &self.ctx.output_dir) {
            write_snapshots(dir, &self.ctx.stem, shot, n, &volumes)?;
            debug!(step = n, shot, "snapshot written");
        }
        Ok(())
    }

    fn run(&mut self, progress: Option<&(dyn Fn(ProgressInfo) + Sync)>) -> Result<Option<RunReport>> {
        let ctx = self.ctx;
        let rank = self.comm.rank();
        let mut shots = Vec::new();

        for (shot, records) in ctx.shots.iter().enumerate() {
            if shot > 0 {
                self.wf.zero();
                self.cpml.zero();
            }
            if let Some(seismo) = &mut self.seismo {
                seismo.reset();
            }
            let sources = LocalSources::new(records, &self.sub, &ctx.wavelet, ctx.nt, ctx.dt, ctx.dh);
            debug!(rank, shot, local_sources = sources.len(), "sources placed");

            let mut first = 1;
            if let Some(plan) = ctx.checkpoint.as_ref().filter(|p| p.restore) {
                first = checkpoint::restore(&plan.path, rank, &mut self.wf, &mut self.cpml)? + 1;
            }
            if self.is_root() {
                info!(
                    shot = shot + 1,
                    shots = ctx.shots.len(),
                    sources = records.len(),
                    first_step = first,
                    "starting shot"
                );
            }

            let start = Instant::now();
            for n in first..=ctx.nt {
                self.step(n, &sources, shot)?;
                if self.is_root() && n % ctx.log_interval == 0 {
                    info!(
                        shot = shot + 1,
                        step = n,
                        nt = ctx.nt,
                        elapsed = %format!("{:.2}s", start.elapsed().as_secs_f64()),
                        "time stepping"
                    );
                    if let Some(cb) = progress {
                        cb(ProgressInfo {
                            shot,
                            step: n,
                            nt: ctx.nt,
                            elapsed: start.elapsed(),
                        });
                    }
                }
            }

            if let Some(plan) = ctx.checkpoint.as_ref().filter(|p| p.save) {
                checkpoint::save(&plan.path, rank, ctx.nt, &self.wf, &self.cpml)?;
            }

            if let Some(seismo) = &self.seismo {
                if let Some(traces) = seismo.gather(&mut self.comm, self.decomp, &ctx.receivers)? {
                    if let Some(dir) = &ctx.output_dir {
                        let stem = format!("{}_shot{}", ctx.stem, shot + 1);
                        write_seismograms(dir, &stem, &traces)?;
                        info!(shot = shot + 1, dir = %dir.display(), "seismograms written");
                    }
                    shots.push(ShotOutput {
                        shot,
                        seismograms: traces,
                    });
                }
            }
        }

        let interior = self.sub.interior();
        let local_peak = self
            .wf
            .v
            .components()
            .iter()
            .map(|f| {
                let mut peak = 0.0f32;
                f.for_each_in(&interior, |_, x| peak = peak.max(x.abs()));
                peak
            })
            .fold(0.0, f32::max);
        let peak_velocity = self.comm.all_reduce_max(local_peak)?;

        if !self.is_root() {
            return Ok(None);
        }
        let [uv, xv, us, xs] = self.timings.mean_ms();
        info!(
            steps = self.timings.steps,
            update_v_ms = %format!("{:.3}", uv),
            exchange_v_ms = %format!("{:.3}", xv),
            update_s_ms = %format!("{:.3}", us),
            exchange_s_ms = %format!("{:.3}", xs),
            peak_velocity,
            "mean time per step"
        );
        Ok(Some(RunReport {
            shots,
            timings: self.timings,
            peak_velocity,
            field_bytes: self.wf.nbytes()
                + self.cpml.psi_fields().iter().map(|f| f.nbytes()).sum::<usize>(),
        }))
    }
}

/// Warn when the time step or grid spacing looks unstable or dispersive.
fn check_stability(ctx: &RunContext, scheme: &Scheme, vp_max: f32, vs_min: Option<f32>) {
    let limit = scheme.stencil.courant_limit(ctx.dh, vp_max);
    if ctx.dt > limit {
        warn!(
            dt = ctx.dt,
            limit, vp_max, "time step exceeds the Courant limit; the run will likely blow up"
        );
    } else {
        debug!(dt = ctx.dt, limit, "Courant check passed");
    }
    if let (Some(vs), Some(fmax)) = (vs_min, ctx.fmax()) {
        let dh_max = scheme.stencil.dispersion_limit(vs, fmax);
        if ctx.dh > dh_max {
            warn!(
                dh = ctx.dh,
                dh_max, vs_min = vs, fmax, "grid spacing too coarse; expect numerical dispersion"
            );
        }
    }
}
