//! Pure work partitioning: how fine the interval is cut, and how the cuts are
//! dealt out to workers. Nothing here touches the network.

use std::f64::consts::{FRAC_PI_2, PI};

use libm::{cbrt, ceil, exp, fabs, floor, sin};

use crate::{function::FunctionId, net::error::Error, net::wire::Assignment};

/// Extra steps on top of the analytic count, against rounding at the
/// interval's edges.
const SAFETY_STEPS: f64 = 2.;

/// Upper bound on `|f''|` over `[left, right]`.
pub fn second_derivative_bound(function: FunctionId, left: f64, right: f64) -> f64 {
    match function {
        // exp is its own second derivative and is increasing
        FunctionId::Exp => exp(right),
        FunctionId::Sin => {
            if right - left >= PI {
                return 1.;
            }
            // |sin| peaks at pi/2 + k*pi. Different k at the two edges means a
            // peak lies between them.
            let quarter = |x: f64| floor((x - FRAC_PI_2) / PI);
            if quarter(left) != quarter(right) {
                1.
            } else {
                fabs(sin(left)).max(fabs(sin(right)))
            }
        }
        FunctionId::Sqr => 1.,
    }
}

/// Widest midpoint-rule step that keeps the per-step error under `tolerance`
/// given a second derivative bound.
pub fn step_width(bound: f64, tolerance: f64) -> f64 {
    if bound == 0. {
        return 1.;
    }
    cbrt(24. * tolerance / bound)
}

/// The global cut of an interval into equal steps.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Discretization {
    pub step_width: f64,
    pub step_count: u64,
}

/// Derives the step count from the error bound, then shrinks the step so an
/// integer number of steps covers `[left, right]` exactly.
pub fn discretize(
    function: FunctionId,
    left: f64,
    right: f64,
    tolerance: f64,
) -> Result<Discretization, Error> {
    let width = step_width(second_derivative_bound(function, left, right), tolerance);
    let steps = ceil(fabs(right - left) / width) + SAFETY_STEPS;
    if !steps.is_finite() || steps >= u64::MAX as f64 {
        return Err(Error::InvalidTolerance(tolerance));
    }
    let step_count = steps as u64;
    Ok(Discretization {
        step_width: (right - left) / step_count as f64,
        step_count,
    })
}

/// Splits `step_count` proportionally to `loads`. Every worker but the last
/// gets the floor of its share; the last takes whatever rounding left over.
pub fn split(step_count: u64, loads: &[u64]) -> Result<Vec<u64>, Error> {
    let load_sum: u128 = loads.iter().map(|&load| u128::from(load)).sum();
    if load_sum == 0 {
        return Err(Error::NoCapacity);
    }

    let mut shares = Vec::with_capacity(loads.len());
    let mut assigned = 0u64;
    if let Some((_, head)) = loads.split_last() {
        for &load in head {
            // floor(step_count * load / load_sum), cannot exceed step_count
            let share = (u128::from(step_count) * u128::from(load) / load_sum) as u64;
            assigned += share;
            shares.push(share);
        }
        shares.push(step_count - assigned);
    }
    Ok(shares)
}

/// Builds one assignment per load. Slices are laid out in order, each
/// starting where the previous one ends.
pub fn assign(
    function: FunctionId,
    left: f64,
    discretization: &Discretization,
    loads: &[u64],
) -> Result<Vec<Assignment>, Error> {
    let shares = split(discretization.step_count, loads)?;
    let mut offset = 0u64;
    Ok(shares
        .into_iter()
        .map(|step_count| {
            let assignment = Assignment {
                function,
                interval_start: left + discretization.step_width * offset as f64,
                step_width: discretization.step_width,
                step_count,
            };
            offset += step_count;
            assignment
        })
        .collect())
}
