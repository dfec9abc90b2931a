// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Filter programs and the slots that hold them.
//!
//! The engine never interprets a program itself. Programs are opaque
//! instruction streams which the [`FilterEngine`] in the
//! [`crate::ExecCtx`] validates at install time and evaluates per
//! packet.

use super::packet::Packet;
use crate::api::CaptureError;
use crate::api::INSN_SIZE;
use crate::api::MAX_INSNS;
use std::sync::Arc;

/// The contract with a filter bytecode evaluator.
pub trait FilterEngine: Send + Sync {
    /// Reject a program which cannot be safely evaluated.
    fn validate(&self, program: &[u8]) -> Result<(), String>;

    /// Return the number of bytes of `pkt` to capture; zero rejects
    /// the packet.
    fn evaluate(&self, program: &FilterProgram, pkt: &Packet) -> u32;
}

/// A validated filter program.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FilterProgram(Arc<[u8]>);

impl FilterProgram {
    /// Validate `bytes` as a program. An empty program is valid and
    /// means "no filter".
    pub fn new(
        engine: &dyn FilterEngine,
        bytes: &[u8],
    ) -> Result<Option<Self>, CaptureError> {
        if bytes.is_empty() {
            return Ok(None);
        }

        if bytes.len() % INSN_SIZE != 0 {
            return Err(CaptureError::InvalidArgument(format!(
                "filter length {} is not a multiple of {INSN_SIZE}",
                bytes.len()
            )));
        }

        let ninsns = bytes.len() / INSN_SIZE;
        if ninsns > MAX_INSNS {
            return Err(CaptureError::InvalidArgument(format!(
                "filter has {ninsns} instructions, max {MAX_INSNS}"
            )));
        }

        engine.validate(bytes).map_err(CaptureError::InvalidArgument)?;
        Ok(Some(Self(bytes.into())))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn num_insns(&self) -> usize {
        self.0.len() / INSN_SIZE
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FilterKind {
    Read,
    Write,
}

/// A descriptor's read and write filters.
#[derive(Clone, Debug, Default)]
pub struct FilterSlot {
    read: Option<FilterProgram>,
    write: Option<FilterProgram>,
}

impl FilterSlot {
    pub fn get(&self, kind: FilterKind) -> Option<&FilterProgram> {
        match kind {
            FilterKind::Read => self.read.as_ref(),
            FilterKind::Write => self.write.as_ref(),
        }
    }

    /// Replace a filter, returning the previous one.
    pub fn set(
        &mut self,
        kind: FilterKind,
        prog: Option<FilterProgram>,
    ) -> Option<FilterProgram> {
        match kind {
            FilterKind::Read => core::mem::replace(&mut self.read, prog),
            FilterKind::Write => core::mem::replace(&mut self.write, prog),
        }
    }

    /// Run a filter. With no program installed every packet matches
    /// in full.
    pub fn evaluate(
        &self,
        engine: &dyn FilterEngine,
        kind: FilterKind,
        pkt: &Packet,
    ) -> u32 {
        match self.get(kind) {
            Some(prog) => engine.evaluate(prog, pkt),
            None => u32::MAX,
        }
    }
}

/// A filter engine whose only program is a snap length.
///
/// A program is a single instruction: the snap length as a
/// little-endian `u32` followed by four zero bytes. Every packet is
/// accepted.
#[derive(Clone, Copy, Debug, Default)]
pub struct Snaplen;

impl Snaplen {
    pub fn program(snaplen: u32) -> Vec<u8> {
        let mut prog = snaplen.to_le_bytes().to_vec();
        prog.extend_from_slice(&[0; 4]);
        prog
    }
}

impl FilterEngine for Snaplen {
    fn validate(&self, program: &[u8]) -> Result<(), String> {
        match program {
            [_, _, _, _, 0, 0, 0, 0] => Ok(()),
            _ => Err("not a snap length program".to_string()),
        }
    }

    fn evaluate(&self, program: &FilterProgram, _pkt: &Packet) -> u32 {
        let b = program.bytes();
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::Direction;

    #[test]
    fn program_validation() {
        let eng = Snaplen;
        assert_eq!(FilterProgram::new(&eng, &[]).unwrap(), None);
        assert!(matches!(
            FilterProgram::new(&eng, &[0; 7]),
            Err(CaptureError::InvalidArgument(_))
        ));
        assert!(matches!(
            FilterProgram::new(&eng, &vec![0; (MAX_INSNS + 1) * INSN_SIZE]),
            Err(CaptureError::InvalidArgument(_))
        ));
        // Rejected by the engine itself.
        assert!(FilterProgram::new(&eng, &[1; 8]).is_err());

        let prog = FilterProgram::new(&eng, &Snaplen::program(96))
            .unwrap()
            .unwrap();
        assert_eq!(prog.num_insns(), 1);
    }

    #[test]
    fn slot_evaluate() {
        let eng = Snaplen;
        let bytes = [0u8; 100];
        let pkt = Packet::new(&bytes, Direction::In);
        let mut slot = FilterSlot::default();
        assert_eq!(slot.evaluate(&eng, FilterKind::Read, &pkt), u32::MAX);

        let prog = FilterProgram::new(&eng, &Snaplen::program(64)).unwrap();
        assert!(slot.set(FilterKind::Read, prog).is_none());
        assert_eq!(slot.evaluate(&eng, FilterKind::Read, &pkt), 64);
        assert_eq!(slot.evaluate(&eng, FilterKind::Write, &pkt), u32::MAX);
    }
}
