//! The bio model. A bio carries its payload buffer and the original
//! completion as a concrete field; ownership moves through submission into
//! the completion exactly once.

use crate::device::SECTOR_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BioOp {
    Read,
    Write,
}

impl BioOp {
    pub fn is_write(&self) -> bool {
        matches!(self, BioOp::Write)
    }
}

/// Completion status seen by the original submitter. An error carries the
/// same semantics as the underlying device error; no wrapping, no retries
/// beyond the single auto-remap attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BioStatus {
    Ok,
    IoError,
    Shutdown,
}

/// Handed to the completion; returns buffer ownership to the submitter.
/// For reads the data is the filled payload.
pub struct BioResult {
    pub status: BioStatus,
    pub data: Vec<u8>,
}

pub type CompletionFn = Box<dyn FnOnce(BioResult) + Send + 'static>;

pub struct Bio {
    pub op: BioOp,
    pub sector: u64,
    pub(crate) data: Vec<u8>,
    completion: Option<CompletionFn>,
    /// One auto-remap attempt per bio; set on the resubmitted copy.
    pub(crate) retried: bool,
}

impl Bio {
    pub fn read(sector: u64, sectors: usize, completion: CompletionFn) -> Self {
        Self {
            op: BioOp::Read,
            sector,
            data: vec![0u8; sectors * SECTOR_SIZE],
            completion: Some(completion),
            retried: false,
        }
    }

    pub fn write(sector: u64, data: Vec<u8>, completion: CompletionFn) -> Self {
        Self {
            op: BioOp::Write,
            sector,
            data,
            completion: Some(completion),
            retried: false,
        }
    }

    pub fn sectors(&self) -> u64 {
        (self.data.len() / SECTOR_SIZE) as u64
    }

    pub(crate) fn complete(mut self, status: BioStatus) {
        let data = std::mem::take(&mut self.data);
        if let Some(completion) = self.completion.take() {
            completion(BioResult { status, data });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn completion_receives_status_and_buffer() {
        let (tx, rx) = mpsc::channel();
        let bio = Bio::write(
            4,
            vec![7u8; SECTOR_SIZE],
            Box::new(move |result| {
                tx.send(result).unwrap();
            }),
        );
        assert_eq!(1, bio.sectors());
        bio.complete(BioStatus::Ok);
        let result = rx.recv().unwrap();
        assert_eq!(BioStatus::Ok, result.status);
        assert_eq!(vec![7u8; SECTOR_SIZE], result.data);
    }
}
