// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::collections::HashSet;

use seisfd3d::comm::{run_world, Communicator};
use seisfd3d::config::{Config, RunContext};
use seisfd3d::decomposition::{Decomposition, Face};
use seisfd3d::field::Extent3;
use seisfd3d::halo::{exchange_stress, exchange_velocity, HaloBuffers, Layers};
use seisfd3d::receiver::{Component, SamplingPlan, SeismoKind};
use seisfd3d::source::{SourceKind, SourceRecord};
use seisfd3d::wavefield::Wavefield;
use seisfd3d::{FdError, RunReport, Solver};

/// Build a validated run with in-memory output only.
fn context(n: usize, procs: [usize; 3], duration: f32, dt: f32, extra: &str) -> RunContext {
    let text = format!(
        r#"
[domain]
size = [{n}, {n}, {n}]
spacing = 10.0
procs = [{px}, {py}, {pz}]

[time]
duration = {duration}
dt = {dt}

{extra}
"#,
        n = n,
        px = procs[0],
        py = procs[1],
        pz = procs[2],
        duration = duration,
        dt = dt,
        extra = extra
    );
    let mut ctx = Config::parse(&text).unwrap().validate().unwrap();
    ctx.output_dir = None;
    ctx
}

const ROCK: &str = r#"
[model]
kind = "homogeneous"
vp = 3000.0
vs = 1700.0
rho = 2000.0
"#;

fn with_shot(mut ctx: RunContext, cell: [usize; 3], kind: SourceKind, receivers: Vec<[usize; 3]>) -> RunContext {
    ctx.shots = vec![vec![SourceRecord {
        position: cell.map(|g| (g - 1) as f32 * ctx.dh),
        tshift: 0.0,
        fc: 100.0,
        amp: 1.0e6,
        kind,
    }]];
    ctx.receivers = receivers;
    ctx.seismo = Some((
        SeismoKind::All,
        SamplingPlan {
            nt: ctx.nt,
            ndt: 1,
            ndtshift: 0,
        },
    ));
    ctx
}

fn traces(report: &RunReport, comp: Component) -> &ndarray::Array2<f32> {
    &report.shots[0]
        .seismograms
        .iter()
        .find(|(c, _)| *c == comp)
        .unwrap()
        .1
}

fn max_abs_diff(a: &ndarray::Array2<f32>, b: &ndarray::Array2<f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
}

fn max_abs(a: &ndarray::Array2<f32>) -> f32 {
    a.iter().map(|x| x.abs()).fold(0.0, f32::max)
}

/// Without sources a quiet medium stays exactly quiet for every time order.
#[test]
fn zero_source_run_stays_zero() {
    for time_order in [2, 3, 4] {
        let extra = format!("{}\n[boundary]\nkind = \"cpml\"\nwidth = 4\nfpml = 10.0\n", ROCK);
        let mut ctx = context(16, [1, 1, 1], 0.03, 1e-3, &extra);
        ctx.time_order = time_order;
        ctx.receivers = vec![[8, 8, 8], [2, 3, 4]];
        ctx.seismo = Some((
            SeismoKind::All,
            SamplingPlan {
                nt: ctx.nt,
                ndt: 1,
                ndtshift: 0,
            },
        ));
        let report = Solver::new(ctx).with_threads(2).solve(None).unwrap();
        assert_eq!(report.peak_velocity, 0.0, "time order {}", time_order);
        for (_, arr) in &report.shots[0].seismograms {
            assert!(arr.iter().all(|&x| x == 0.0));
        }
    }
}

#[test]
fn zero_source_viscoelastic_run_stays_zero() {
    let extra = r#"
[model]
kind = "homogeneous"
vp = 3000.0
vs = 1700.0
rho = 2000.0
qp = 50.0
qs = 30.0
relaxation_frequencies = [5.0, 20.0]

[boundary]
kind = "damping"
width = 4
"#;
    let mut ctx = context(12, [1, 1, 1], 0.02, 1e-3, extra);
    ctx.time_order = 3;
    let report = Solver::new(ctx).solve(None).unwrap();
    assert_eq!(report.peak_velocity, 0.0);
}

/// Encode a global cell so every halo value identifies its origin.
fn tag(g: [isize; 3], global: [usize; 3], salt: f32) -> f32 {
    let w = |a: usize| g[a].rem_euclid(global[a] as isize) as f32;
    salt + w(0) * 10_000.0 + w(1) * 100.0 + w(2)
}

/// Every face receives exactly the neighbor's boundary layers, for both the
/// deep (nf1) and shallow (nf2) buffer variants.
#[test]
fn halo_exchange_round_trip_on_every_face() {
    let global = [8, 8, 8];
    let half = 2;
    let d = Decomposition::new(global, [2, 2, 2], 8, true).unwrap();
    let cap = HaloBuffers::message_sizes(d.local(), 3 * half, 0);
    let mismatches = run_world(&d, cap, |mut comm| {
        let sub = d.subdomain(comm.rank());
        let extent = Extent3::with_halo(sub.local, half);
        let mut wf = Wavefield::new(extent, 2, 0)?;
        let interior = sub.interior();
        for (c, f) in wf.v.components_mut().into_iter().enumerate() {
            f.update_region(&interior, |_, l, _| tag(sub.to_global(l), global, c as f32 * 0.125));
        }
        for (c, f) in wf.s.components_mut().into_iter().enumerate() {
            f.update_region(&interior, |_, l, _| tag(sub.to_global(l), global, 0.5 + c as f32 * 0.0625));
        }
        let mut buffers = HaloBuffers::new(sub.local, 3 * half, 0)?;
        exchange_velocity(&mut comm, &sub, &mut buffers, &mut wf.v, half)?;
        exchange_stress(&mut comm, &sub, &mut buffers, &mut wf.s, half)?;

        let n = sub.local.map(|x| x as isize);
        let mut bad = 0usize;
        let mut check = |f: &seisfd3d::Field3, salt: f32, axis: usize, layers: Layers| {
            for face in [Face::new(axis, true), Face::new(axis, false)] {
                // Data sent toward the low face fills the high-side halo.
                let depth = if face.is_low() {
                    layers.toward_high
                } else {
                    layers.toward_low
                } as isize;
                for layer in 1..=depth {
                    let p = if face.is_low() { 1 - layer } else { n[axis] + layer };
                    let mut region = interior;
                    region.lo[axis] = p;
                    region.hi[axis] = p;
                    f.for_each_in(&region, |l, v| {
                        if v != tag(sub.to_global(l), global, salt) {
                            bad += 1;
                        }
                    });
                }
            }
        };
        for axis in 0..3 {
            for c in 0..3 {
                check(
                    wf.v.component(c),
                    c as f32 * 0.125,
                    axis,
                    Layers::for_stencil(half, c == axis),
                );
            }
            // xx yy zz xy yz xz in storage order.
            let pairs = [(0, 0), (1, 1), (2, 2), (0, 1), (1, 2), (0, 2)];
            for (c, &(a, b)) in pairs.iter().enumerate() {
                let touches = a == axis || b == axis;
                if !touches {
                    continue;
                }
                check(
                    wf.s.component(a, b),
                    0.5 + c as f32 * 0.0625,
                    axis,
                    Layers::for_stencil(half, a != b),
                );
            }
        }
        Ok(bad)
    })
    .unwrap();
    assert_eq!(mismatches, vec![0; 8]);
}

#[test]
fn decomposition_tiles_global_grid() {
    let global = [12, 8, 6];
    for procs in [[1, 1, 1], [2, 2, 2], [3, 1, 2], [4, 2, 3], [1, 8, 1]] {
        let ranks: usize = procs.iter().product();
        let d = Decomposition::new(global, procs, ranks, false).unwrap();
        let mut seen = HashSet::new();
        for sub in d.subdomains() {
            for i in 1..=sub.local[0] as isize {
                for j in 1..=sub.local[1] as isize {
                    for k in 1..=sub.local[2] as isize {
                        let g = sub.to_global([i, j, k]);
                        assert!(seen.insert(g), "cell {:?} owned twice", g);
                        let gu = g.map(|x| x as usize);
                        assert_eq!(d.owner_of(gu), Some(sub.rank));
                    }
                }
            }
        }
        assert_eq!(seen.len(), global.iter().product::<usize>(), "procs {:?}", procs);
    }
    assert!(matches!(
        Decomposition::new(global, [5, 1, 1], 5, false),
        Err(FdError::InvalidDecomposition { .. })
    ));
    assert!(matches!(
        Decomposition::new(global, [2, 2, 2], 4, false),
        Err(FdError::InvalidDecomposition { .. })
    ));
}

fn rock_point_source(dt: f32, duration: f32) -> RunContext {
    let extra = format!("{}\n[boundary]\nkind = \"none\"\n", ROCK);
    let mut ctx = context(40, [1, 1, 1], duration, dt, &extra);
    ctx.shots = vec![vec![SourceRecord {
        position: [190.0, 190.0, 190.0],
        tshift: 0.0,
        fc: 10.0,
        amp: 1.0,
        kind: SourceKind::Explosive,
    }]];
    ctx
}

#[test]
fn stable_time_step_does_not_trigger_probe() {
    let report = Solver::new(rock_point_source(1e-3, 0.25))
        .solve(None)
        .unwrap();
    assert!(report.peak_velocity.is_finite());
    assert!(report.peak_velocity > 0.0);
}

#[test]
fn oversized_time_step_is_fatal() {
    let err = Solver::new(rock_point_source(1e-2, 2.0))
        .solve(None)
        .unwrap_err();
    assert!(matches!(err, FdError::Unstable { .. }), "got {:?}", err);
}

/// The same global run on 1 and on 2x2x2 subdomains records the same traces.
fn assert_decomposition_invariant(extra: &str, fd_order: usize, time_order: usize, kind: SourceKind) {
    let receivers = vec![[5, 9, 9], [12, 4, 10], [9, 9, 9], [8, 8, 8]];
    let build = |procs: [usize; 3]| {
        let mut ctx = context(16, procs, 0.03, 2e-4, extra);
        ctx.fd_order = fd_order;
        ctx.time_order = time_order;
        with_shot(ctx, [7, 8, 10], kind, receivers.clone())
    };
    let serial = Solver::new(build([1, 1, 1])).with_threads(1).solve(None).unwrap();
    let split = Solver::new(build([2, 2, 2])).with_threads(3).solve(None).unwrap();
    for comp in [Component::Vx, Component::Vy, Component::Vz, Component::Pressure, Component::Div, Component::Curl] {
        let a = traces(&serial, comp);
        let b = traces(&split, comp);
        assert_eq!(a.shape(), b.shape());
        let scale = max_abs(a).max(f32::MIN_POSITIVE);
        assert!(
            max_abs_diff(a, b) <= 1e-5 * scale,
            "{:?} differs by {} (scale {})",
            comp,
            max_abs_diff(a, b),
            scale
        );
    }
    assert!(max_abs(traces(&serial, Component::Vx)) > 0.0);
}

#[test]
fn elastic_cpml_results_independent_of_decomposition() {
    let extra = format!("{}\n[boundary]\nkind = \"cpml\"\nwidth = 4\nfpml = 100.0\n", ROCK);
    assert_decomposition_invariant(&extra, 4, 2, SourceKind::Explosive);
}

#[test]
fn adams_bashforth_cpml_second_order_independent_of_decomposition() {
    let extra = format!("{}\n[boundary]\nkind = \"cpml\"\nwidth = 4\nfpml = 100.0\n", ROCK);
    assert_decomposition_invariant(&extra, 2, 4, SourceKind::ForceY);
}

#[test]
fn viscoelastic_damping_results_independent_of_decomposition() {
    let extra = r#"
[model]
kind = "homogeneous"
vp = 3000.0
vs = 1700.0
rho = 2000.0
qp = 40.0
qs = 25.0
relaxation_frequencies = [10.0]

[boundary]
kind = "damping"
width = 4
"#;
    assert_decomposition_invariant(extra, 6, 3, SourceKind::ForceX);
}

/// Waves leaving one face re-enter through the opposite one identically for
/// every process grid.
#[test]
fn periodic_results_independent_of_decomposition() {
    let extra = format!("{}\n[boundary]\nkind = \"none\"\n", ROCK);
    let receivers = vec![[1, 1, 1], [16, 8, 3], [9, 16, 16], [2, 8, 14]];
    let run = |procs: [usize; 3]| {
        let mut ctx = context(16, procs, 0.03, 2e-4, &extra);
        ctx.periodic = true;
        let ctx = with_shot(ctx, [2, 8, 15], SourceKind::Explosive, receivers.clone());
        Solver::new(ctx).with_threads(1).solve(None).unwrap()
    };
    let serial = run([1, 1, 1]);
    assert!(max_abs(traces(&serial, Component::Vx)) > 0.0);
    for procs in [[2, 2, 2], [1, 2, 1], [4, 1, 2]] {
        let split = run(procs);
        for comp in [Component::Vx, Component::Vy, Component::Vz, Component::Pressure, Component::Div, Component::Curl] {
            let a = traces(&serial, comp);
            let b = traces(&split, comp);
            let scale = max_abs(a).max(f32::MIN_POSITIVE);
            assert!(
                max_abs_diff(a, b) <= 1e-5 * scale,
                "{:?} on {:?} differs by {}",
                comp,
                procs,
                max_abs_diff(a, b)
            );
        }
    }
}

#[test]
fn checkpoint_continuation_matches_uninterrupted_run() {
    let base = std::env::temp_dir().join(format!("seisfd3d_verify_{}", std::process::id()));
    let extra = format!("{}\n[boundary]\nkind = \"cpml\"\nwidth = 4\nfpml = 100.0\n", ROCK);
    let receivers = vec![[6, 6, 6], [13, 10, 4]];
    let build = |duration: f32| {
        let mut ctx = context(16, [2, 1, 1], duration, 2e-4, &extra);
        ctx.time_order = 3;
        with_shot(ctx, [8, 8, 8], SourceKind::Explosive, receivers.clone())
    };

    let full = Solver::new(build(0.03)).solve(None).unwrap();

    let mut first = build(0.015);
    let restart = first.nt;
    first.checkpoint = Some(seisfd3d::config::CheckpointPlan {
        path: base.clone(),
        save: true,
        restore: false,
    });
    Solver::new(first).solve(None).unwrap();

    let mut second = build(0.03);
    second.checkpoint = Some(seisfd3d::config::CheckpointPlan {
        path: base.clone(),
        save: false,
        restore: true,
    });
    let resumed = Solver::new(second).solve(None).unwrap();

    let a = traces(&full, Component::Vz);
    let b = traces(&resumed, Component::Vz);
    // Samples before the restart were never recorded by the resumed run.
    assert!(b.column(restart - 1).iter().all(|&x| x == 0.0));
    let scale = max_abs(a).max(f32::MIN_POSITIVE);
    for s in restart..a.ncols() {
        for r in 0..a.nrows() {
            assert!(
                (a[[r, s]] - b[[r, s]]).abs() <= 1e-6 * scale,
                "receiver {} sample {}",
                r,
                s
            );
        }
    }
    for rank in 0..2 {
        let _ = std::fs::remove_file(seisfd3d::checkpoint::rank_path(&base, rank));
    }
}

/// The current derivative buffer cycles through exactly one backing array
/// per Adams–Bashforth weight before repeating.
#[test]
fn history_ring_identity_cycle() {
    for (time_order, levels) in [(2, 1), (3, 3), (4, 4)] {
        let mut wf = Wavefield::new(Extent3::with_halo([2, 2, 2], 1), time_order, 0).unwrap();
        let first = wf.accel.current() as *const _;
        let mut seen = vec![first];
        loop {
            wf.rotate_velocity_history();
            let p = wf.accel.current() as *const _;
            if p == first {
                break;
            }
            assert!(!seen.contains(&p));
            seen.push(p);
        }
        assert_eq!(seen.len(), levels, "time order {}", time_order);
    }
}

#[test]
fn file_based_config_validates() {
    let dir = std::env::temp_dir().join(format!("seisfd3d_cfg_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("receivers.txt"), "# x y z\n10 20 30\n50 50 50\n").unwrap();
    std::fs::write(dir.join("sources.txt"), "40 40 40 0.0 12.0 1.0\n60 40 40 0.01 12.0 2.0 3\n").unwrap();
    let text = format!(
        r#"
[domain]
size = [12, 12, 12]
spacing = 10.0

[time]
duration = 0.01
dt = 0.001

{rock}

[boundary]
kind = "cpml"
width = 3

[sources]
file = "sources.txt"
multi_shot = true

[receivers]
file = "receivers.txt"
kind = "curl-div"
ndt = 2
"#,
        rock = ROCK
    );
    let cfg_path = dir.join("run.toml");
    std::fs::write(&cfg_path, text).unwrap();
    let ctx = Config::load(&cfg_path).unwrap().validate().unwrap();
    assert_eq!(ctx.shots.len(), 2);
    assert_eq!(ctx.shots[1][0].kind, SourceKind::ForceY);
    assert_eq!(ctx.receivers, vec![[2, 3, 4], [6, 6, 6]]);
    let (kind, plan) = ctx.seismo.unwrap();
    assert_eq!(kind, SeismoKind::CurlDiv);
    assert_eq!(plan.samples(), 5);
    let _ = std::fs::remove_dir_all(&dir);
}
