// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Per-rank binary checkpoints of the full time-stepping state.
//!
//! Each rank writes `<base>.<rank>`: a fixed header followed by raw
//! little-endian `f32` values of velocity, stress, the derivative and memory
//! histories (newest first) and the CPML memory fields. Restoring checks the
//! header against the live layout before touching any field.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::cpml::Cpml;
use crate::error::{FdError, Result};
use crate::field::Field3;
use crate::wavefield::Wavefield;

const MAGIC: &[u8; 8] = b"SFD3CKP1";

/// Layout description stored ahead of the field data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    step: u64,
    lo: [i64; 3],
    hi: [i64; 3],
    accel_depth: u64,
    strain_depth: u64,
    memory_depth: u64,
    mechanisms: u64,
    psi_fields: u64,
}

impl Header {
    fn describe(wf: &Wavefield, cpml: &Cpml, step: usize) -> Self {
        let e = wf.extent();
        let (memory_depth, mechanisms) = match &wf.memory {
            Some(m) => (m.depth() as u64, m.current().len() as u64),
            None => (0, 0),
        };
        Header {
            step: step as u64,
            lo: e.lo.map(|x| x as i64),
            hi: e.hi.map(|x| x as i64),
            accel_depth: wf.accel.depth() as u64,
            strain_depth: wf.strain.depth() as u64,
            memory_depth,
            mechanisms,
            psi_fields: cpml.psi_fields().len() as u64,
        }
    }

    fn words(&self) -> [u64; 12] {
        let mut w = [0u64; 12];
        w[0] = self.step;
        for a in 0..3 {
            w[1 + a] = self.lo[a] as u64;
            w[4 + a] = self.hi[a] as u64;
        }
        w[7] = self.accel_depth;
        w[8] = self.strain_depth;
        w[9] = self.memory_depth;
        w[10] = self.mechanisms;
        w[11] = self.psi_fields;
        w
    }

    fn from_words(w: [u64; 12]) -> Self {
        Header {
            step: w[0],
            lo: [w[1] as i64, w[2] as i64, w[3] as i64],
            hi: [w[4] as i64, w[5] as i64, w[6] as i64],
            accel_depth: w[7],
            strain_depth: w[8],
            memory_depth: w[9],
            mechanisms: w[10],
            psi_fields: w[11],
        }
    }

    /// First field of the live layout that disagrees with `self`, if any.
    fn mismatch(&self, live: &Header) -> Option<String> {
        if self.lo != live.lo || self.hi != live.hi {
            return Some(format!(
                "extent {:?}..{:?} differs from live {:?}..{:?}",
                self.lo, self.hi, live.lo, live.hi
            ));
        }
        let pairs = [
            ("derivative history depth", self.accel_depth, live.accel_depth),
            ("strain history depth", self.strain_depth, live.strain_depth),
            ("memory history depth", self.memory_depth, live.memory_depth),
            ("relaxation mechanisms", self.mechanisms, live.mechanisms),
            ("CPML memory fields", self.psi_fields, live.psi_fields),
        ];
        pairs
            .iter()
            .find(|(_, a, b)| a != b)
            .map(|(what, a, b)| format!("{} is {} but the run uses {}", what, a, b))
    }
}

/// File of `rank` for checkpoint base path `base`.
pub fn rank_path(base: &Path, rank: usize) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{}", rank));
    PathBuf::from(name)
}

fn state_fields<'a>(wf: &'a Wavefield, cpml: &'a Cpml) -> Vec<&'a Field3> {
    let mut out: Vec<&Field3> = Vec::new();
    out.extend(wf.v.components());
    out.extend(wf.s.components());
    for a in wf.accel.iter() {
        out.extend(a.components());
    }
    for s in wf.strain.iter() {
        out.extend(s.components());
    }
    if let Some(mem) = &wf.memory {
        for level in mem.iter() {
            for t in level {
                out.extend(t.components());
            }
        }
    }
    out.extend(cpml.psi_fields());
    out
}

fn state_fields_mut<'a>(wf: &'a mut Wavefield, cpml: &'a mut Cpml) -> Vec<&'a mut Field3> {
    let Wavefield {
        v,
        s,
        accel,
        strain,
        memory,
        ..
    } = wf;
    let mut out: Vec<&mut Field3> = Vec::new();
    out.extend(v.components_mut());
    out.extend(s.components_mut());
    for a in accel.iter_mut() {
        out.extend(a.components_mut());
    }
    for t in strain.iter_mut() {
        out.extend(t.components_mut());
    }
    if let Some(mem) = memory {
        for level in mem.iter_mut() {
            for t in level.iter_mut() {
                out.extend(t.components_mut());
            }
        }
    }
    out.extend(cpml.psi_fields_mut());
    out
}

/// Write this rank's state after `step` completed steps.
pub fn save(base: &Path, rank: usize, step: usize, wf: &Wavefield, cpml: &Cpml) -> Result<()> {
    let path = rank_path(base, rank);
    let file = File::create(&path).map_err(|e| FdError::file(&path, e))?;
    let mut w = BufWriter::new(file);
    let header = Header::describe(wf, cpml, step);

    let mut write = |bytes: &[u8]| w.write_all(bytes).map_err(|e| FdError::file(&path, e));
    write(MAGIC)?;
    for word in header.words() {
        write(&word.to_le_bytes())?;
    }
    let mut bytes = Vec::new();
    for field in state_fields(wf, cpml) {
        bytes.clear();
        bytes.extend(field.as_slice().iter().flat_map(|x| x.to_le_bytes()));
        write(&bytes)?;
    }
    w.flush().map_err(|e| FdError::file(&path, e))?;
    info!(rank, step, path = %path.display(), "checkpoint written");
    Ok(())
}

/// Restore this rank's state; returns the number of completed steps stored.
pub fn restore(base: &Path, rank: usize, wf: &mut Wavefield, cpml: &mut Cpml) -> Result<usize> {
    let path = rank_path(base, rank);
    let file = File::open(&path).map_err(|e| FdError::file(&path, e))?;
    let mut r = BufReader::new(file);
    let mismatch = |reason: String| FdError::CheckpointMismatch {
        path: path.clone(),
        reason,
    };

    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)
        .map_err(|_| mismatch("file is shorter than the header".to_string()))?;
    if &magic != MAGIC {
        return Err(mismatch("not a checkpoint file".to_string()));
    }
    let mut words = [0u64; 12];
    for w in words.iter_mut() {
        let mut b = [0u8; 8];
        r.read_exact(&mut b)
            .map_err(|_| mismatch("file is shorter than the header".to_string()))?;
        *w = u64::from_le_bytes(b);
    }
    let stored = Header::from_words(words);
    let live = Header::describe(wf, cpml, stored.step as usize);
    if let Some(reason) = stored.mismatch(&live) {
        return Err(mismatch(reason));
    }

    let mut bytes = Vec::new();
    for field in state_fields_mut(wf, cpml) {
        bytes.resize(field.as_slice().len() * 4, 0);
        r.read_exact(&mut bytes)
            .map_err(|_| mismatch("field data is truncated".to_string()))?;
        for (x, b) in field.as_mut_slice().iter_mut().zip(bytes.chunks_exact(4)) {
            *x = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        }
    }
    let mut extra = [0u8; 1];
    if r.read(&mut extra).map_err(|e| FdError::file(&path, e))? != 0 {
        return Err(mismatch("trailing data after the last field".to_string()));
    }
    info!(rank, step = stored.step, path = %path.display(), "checkpoint restored");
    Ok(stored.step as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpml::CpmlParams;
    use crate::decomposition::Decomposition;
    use crate::field::Extent3;

    fn params() -> CpmlParams {
        CpmlParams {
            width: 3,
            npower: 2.0,
            k_max: 1.0,
            fpml: 10.0,
            vppml: 3000.0,
            reflection: 1e-4,
        }
    }

    fn temp_base(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("seisfd3d_ckp_{}_{}", name, std::process::id()))
    }

    #[test]
    fn save_then_restore_reproduces_state() {
        let d = Decomposition::new([8, 8, 8], [1, 1, 1], 1, false).unwrap();
        let sub = d.subdomain(0);
        let e = Extent3::with_halo(sub.local, 2);
        let mut wf = Wavefield::new(e, 3, 1).unwrap();
        let mut cpml = Cpml::new(&sub, &params(), 10.0, 1e-3, false).unwrap();
        wf.v.y.set(3, 4, 5, 1.5);
        wf.s.xz.set(2, 2, 2, -2.0);
        wf.accel.rotate();
        wf.accel.current_mut().z.set(1, 1, 1, 7.0);
        for (n, f) in cpml.psi_fields_mut().into_iter().enumerate() {
            f.fill(n as f32);
        }

        let base = temp_base("roundtrip");
        save(&base, 0, 42, &wf, &cpml).unwrap();

        let mut wf2 = Wavefield::new(e, 3, 1).unwrap();
        let mut cpml2 = Cpml::new(&sub, &params(), 10.0, 1e-3, false).unwrap();
        let step = restore(&base, 0, &mut wf2, &mut cpml2).unwrap();
        assert_eq!(step, 42);
        assert_eq!(wf2.v.y.get(3, 4, 5), 1.5);
        assert_eq!(wf2.s.xz.get(2, 2, 2), -2.0);
        assert_eq!(wf2.accel.current().z.get(1, 1, 1), 7.0);
        for (n, f) in cpml2.psi_fields().into_iter().enumerate() {
            assert!(f.as_slice().iter().all(|&x| x == n as f32));
        }
        let _ = std::fs::remove_file(rank_path(&base, 0));
    }

    #[test]
    fn layout_mismatch_is_rejected() {
        let d = Decomposition::new([8, 8, 8], [1, 1, 1], 1, false).unwrap();
        let sub = d.subdomain(0);
        let e = Extent3::with_halo(sub.local, 2);
        let wf = Wavefield::new(e, 2, 0).unwrap();
        let cpml = Cpml::new(&sub, &params(), 10.0, 1e-3, false).unwrap();
        let base = temp_base("mismatch");
        save(&base, 0, 5, &wf, &cpml).unwrap();

        let mut other = Wavefield::new(e, 4, 0).unwrap();
        let mut cpml2 = Cpml::new(&sub, &params(), 10.0, 1e-3, false).unwrap();
        let err = restore(&base, 0, &mut other, &mut cpml2).unwrap_err();
        assert!(matches!(err, FdError::CheckpointMismatch { .. }));
        let _ = std::fs::remove_file(rank_path(&base, 0));
    }

    #[test]
    fn rank_suffix_is_appended() {
        assert_eq!(rank_path(Path::new("out/ckp"), 3), PathBuf::from("out/ckp.3"));
    }
}
