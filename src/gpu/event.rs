//! Events and profiling records.
//!
//! Grounded on `ocl_profiling_t` in `CL/ocl.h` (four timestamps, declared
//! op counts, derived Gflops) and on `ocl::Event`'s retain/release and
//! profiling-info queries in the teacher crate.

use crate::error::{Error, Result};

/// Declared operation counts for one kernel launch, used to derive Gflops
/// once the four timestamps are known.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpCounts {
    pub fops: u64,
    pub i32ops: u64,
    pub i64ops: u64,
    /// Number of invocations this record represents (usually 1; a rolled-up
    /// record after aggregation may represent many).
    pub count: u64,
}

/// Holds an event until finalized, then carries the derived metrics.
pub struct ProfilingRecord {
    event: ocl::Event,
    pub user: OpCounts,
    finalized: Option<FinalizedProfile>,
}

#[derive(Debug, Clone, Copy)]
pub struct FinalizedProfile {
    pub queued_ns: u64,
    pub submit_ns: u64,
    pub start_ns: u64,
    pub end_ns: u64,
    pub time_s: f64,
    pub gflops: f64,
    pub g32ops: f64,
    pub g64ops: f64,
}

impl ProfilingRecord {
    pub(crate) fn pending(event: ocl::Event) -> Self {
        ProfilingRecord { event, user: OpCounts::default(), finalized: None }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.is_some()
    }

    pub fn finalized(&self) -> Option<&FinalizedProfile> {
        self.finalized.as_ref()
    }

    /// Query the four timestamps, compute derived metrics, and release the
    /// event. Profiling rate formula from spec §4.3:
    /// `gflops = declared_fops * count / time_s / 1e9` (analogous for
    /// 32/64-bit integer ops).
    pub fn finalize(&mut self) -> Result<&FinalizedProfile> {
        use ocl::core::ProfilingInfo;

        let queued_ns = profiling_time(&self.event, ProfilingInfo::Queued)?;
        let submit_ns = profiling_time(&self.event, ProfilingInfo::Submit)?;
        let start_ns = profiling_time(&self.event, ProfilingInfo::Start)?;
        let end_ns = profiling_time(&self.event, ProfilingInfo::End)?;

        let time_s = (end_ns.saturating_sub(start_ns)) as f64 / 1e9;
        let count = self.user.count.max(1) as f64;
        let gflops = rate(self.user.fops, count, time_s);
        let g32ops = rate(self.user.i32ops, count, time_s);
        let g64ops = rate(self.user.i64ops, count, time_s);

        let finalized = FinalizedProfile { queued_ns, submit_ns, start_ns, end_ns, time_s, gflops, g32ops, g64ops };
        self.finalized = Some(finalized);
        Ok(self.finalized.as_ref().expect("just set"))
    }
}

fn rate(declared_ops: u64, count: f64, time_s: f64) -> f64 {
    if time_s <= 0.0 {
        return 0.0;
    }
    (declared_ops as f64) * count / time_s / 1e9
}

fn profiling_time(event: &ocl::Event, kind: ocl::core::ProfilingInfo) -> Result<u64> {
    ocl::core::get_event_profiling_info(event, kind)
        .map(|r| r.time().unwrap_or(0))
        .map_err(|e| Error::device(e.into()))
}

/// Roll up a set of finalized records into one: sum times/ops, average
/// Gflops across launches (spec §4.5 profiling accumulation).
pub fn aggregate(records: &[ProfilingRecord]) -> Option<FinalizedProfile> {
    let finalized: Vec<&FinalizedProfile> = records.iter().filter_map(|r| r.finalized()).collect();
    if finalized.is_empty() {
        return None;
    }
    let n = finalized.len() as f64;
    let time_s: f64 = finalized.iter().map(|f| f.time_s).sum();
    let gflops: f64 = finalized.iter().map(|f| f.gflops).sum::<f64>() / n;
    let g32ops: f64 = finalized.iter().map(|f| f.g32ops).sum::<f64>() / n;
    let g64ops: f64 = finalized.iter().map(|f| f.g64ops).sum::<f64>() / n;
    Some(FinalizedProfile {
        queued_ns: finalized.first().map(|f| f.queued_ns).unwrap_or(0),
        submit_ns: finalized.first().map(|f| f.submit_ns).unwrap_or(0),
        start_ns: finalized.first().map(|f| f.start_ns).unwrap_or(0),
        end_ns: finalized.last().map(|f| f.end_ns).unwrap_or(0),
        time_s,
        gflops,
        g32ops,
        g64ops,
    })
}
