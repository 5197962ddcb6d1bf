//! Per-stage latency recorder for the relay's event loop.
//!
//! With the `record` feature **off** (the default), `PerfRecorder` is a
//! zero-sized type and every method is an `#[inline(always)]` no-op.
//!
//! With `record` **on**, each stage owns a pre-allocated sample buffer and
//! `begin`/`end` pairs store elapsed nanoseconds read from
//! `clock_gettime(CLOCK_MONOTONIC)`. Samples past the buffer size are dropped.

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PerfStage {
    /// Time parked in `poll(2)`.
    Poll = 0,
    Accept = 1,
    Read = 2,
    Broadcast = 3,
    Drain = 4,
    /// One whole loop turn, poll included.
    Iteration = 5,
}

pub const NUM_STAGES: usize = 6;
pub const MAX_SAMPLES: usize = 65_536;

#[cfg(feature = "record")]
mod inner {
    use super::*;

    #[inline(always)]
    pub fn now_ns() -> u64 {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        }
        (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64
    }

    struct StageBuf {
        samples: Vec<u64>,
        pending: u64,
    }

    impl StageBuf {
        fn new() -> Self {
            Self {
                samples: Vec::with_capacity(MAX_SAMPLES),
                pending: 0,
            }
        }
    }

    pub struct PerfRecorder {
        stages: [StageBuf; NUM_STAGES],
    }

    impl PerfRecorder {
        pub fn new() -> Self {
            Self {
                stages: std::array::from_fn(|_| StageBuf::new()),
            }
        }

        #[inline(always)]
        pub fn begin(&mut self, stage: PerfStage) {
            self.stages[stage as usize].pending = now_ns();
        }

        #[inline(always)]
        pub fn end(&mut self, stage: PerfStage) {
            let buf = &mut self.stages[stage as usize];
            let elapsed = now_ns().saturating_sub(buf.pending);
            if buf.samples.len() < MAX_SAMPLES {
                buf.samples.push(elapsed);
            }
        }

        pub fn samples(&self, stage: PerfStage) -> &[u64] {
            &self.stages[stage as usize].samples
        }

        pub fn count(&self, stage: PerfStage) -> usize {
            self.stages[stage as usize].samples.len()
        }

        pub fn reset(&mut self) {
            for buf in self.stages.iter_mut() {
                buf.samples.clear();
            }
        }
    }

    impl Default for PerfRecorder {
        fn default() -> Self {
            Self::new()
        }
    }
}

#[cfg(not(feature = "record"))]
mod inner {
    use super::*;

    #[inline(always)]
    pub fn now_ns() -> u64 {
        0
    }

    #[derive(Default)]
    pub struct PerfRecorder;

    impl PerfRecorder {
        #[inline(always)]
        pub fn new() -> Self {
            Self
        }
        #[inline(always)]
        pub fn begin(&mut self, _stage: PerfStage) {}
        #[inline(always)]
        pub fn end(&mut self, _stage: PerfStage) {}
        #[inline(always)]
        pub fn samples(&self, _stage: PerfStage) -> &[u64] {
            &[]
        }
        #[inline(always)]
        pub fn count(&self, _stage: PerfStage) -> usize {
            0
        }
        #[inline(always)]
        pub fn reset(&mut self) {}
    }
}

pub use inner::{PerfRecorder, now_ns};
