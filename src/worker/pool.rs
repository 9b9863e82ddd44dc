use rayon::{prelude::*, ThreadPoolBuilder};
use tracing::{trace, warn};

use super::affinity;
use crate::{function::FunctionId, net::error::Error, net::wire::Assignment};

/// A compute unit's share of an assignment, in steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnitRange {
    /// Steps handed to earlier units
    pub offset: u64,
    pub count: u64,
}

/// Deals `step_count` steps out to `units` units in order. The first
/// `step_count % units` units get one extra step.
pub fn split_units(step_count: u64, units: usize) -> Vec<UnitRange> {
    let units = units.max(1) as u64;
    let base = step_count / units;
    let extra = step_count % units;
    let mut offset = 0;
    (0..units)
        .map(|unit| {
            let count = base + u64::from(unit < extra);
            let range = UnitRange { offset, count };
            offset += count;
            range
        })
        .collect()
}

/// Midpoint rule over `count` steps of `width` starting at `start`.
pub fn midpoint_sum(function: FunctionId, start: f64, width: f64, count: u64) -> f64 {
    let half = width / 2.;
    (0..count)
        .map(|step| width * function.eval(start + width * step as f64 + half))
        .sum()
}

/// Integrates an assignment on a pool of `cores` threads built for it, one
/// per unit, placed round robin over the processors this process may use.
/// Blocks until every unit has finished.
pub fn integrate(assignment: &Assignment, cores: u32) -> Result<f64, Error> {
    let processors = affinity::allowed_processors();
    if cores as usize > processors.len() {
        warn!(
            cores,
            processors = processors.len(),
            "more cores requested than available, units will share processors"
        );
    }
    let ranges = split_units(assignment.step_count, cores as usize);

    let pool = ThreadPoolBuilder::new()
        .num_threads(ranges.len())
        .thread_name(|unit| format!("quadrature-unit-{unit}"))
        .start_handler(move |unit| {
            let cpu = processors[unit % processors.len()];
            if !affinity::pin_current_thread(cpu) {
                trace!(unit, cpu, "could not pin compute unit");
            }
        })
        .build()?;

    Ok(pool.install(|| {
        ranges
            .par_iter()
            .with_max_len(1)
            .map(|range| {
                let start =
                    assignment.interval_start + assignment.step_width * range.offset as f64;
                midpoint_sum(assignment.function, start, assignment.step_width, range.count)
            })
            .sum::<f64>()
    }))
}
