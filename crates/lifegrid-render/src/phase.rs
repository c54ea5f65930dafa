// SPDX-License-Identifier: CEPL-1.0
use thiserror::Error;

/// Where a frame is in its acquire/record/submit/present cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FramePhase {
    #[default]
    Idle,
    Acquired,
    Recorded,
    Submitted,
    Presented,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("frame phase {from:?} cannot move to {to:?}")]
pub struct PhaseError {
    pub from: FramePhase,
    pub to: FramePhase,
}

impl FramePhase {
    fn allows(self, to: FramePhase) -> bool {
        use FramePhase::*;
        matches!(
            (self, to),
            (Idle, Acquired)
                | (Acquired, Recorded)
                | (Recorded, Submitted)
                | (Submitted, Presented)
                // present refused after submission; fence wait still follows
                | (Submitted, Idle)
                | (Presented, Idle)
                // acquired image abandoned before anything was recorded
                | (Acquired, Idle)
        )
    }

    pub fn advance(&mut self, to: FramePhase) -> Result<(), PhaseError> {
        if !self.allows(to) {
            return Err(PhaseError { from: *self, to });
        }
        *self = to;
        Ok(())
    }

    /// The fence has to be waited on before per-frame objects are touched again.
    pub fn in_flight(self) -> bool {
        matches!(self, FramePhase::Submitted | FramePhase::Presented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use FramePhase::*;

    #[test]
    fn full_cycle() {
        let mut p = FramePhase::default();
        for to in [Acquired, Recorded, Submitted, Presented, Idle] {
            p.advance(to).unwrap();
        }
        assert_eq!(p, Idle);
    }

    #[test]
    fn cannot_skip_submission() {
        let mut p = Acquired;
        assert_eq!(
            p.advance(Presented),
            Err(PhaseError {
                from: Acquired,
                to: Presented
            })
        );
        assert_eq!(p, Acquired);
        let mut q = Recorded;
        assert!(q.advance(Idle).is_err());
    }

    #[test]
    fn failed_present_returns_to_idle() {
        let mut p = Submitted;
        assert!(p.in_flight());
        p.advance(Idle).unwrap();
        assert!(!p.in_flight());
    }
}
