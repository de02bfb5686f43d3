//! Memory-driven tuning of concurrency and swap.

use crate::domain::config::Tuning;

/// Lowest `models_max` ever produced: one chat model plus one embedding model.
pub const MIN_MODELS_MAX: u32 = 2;
pub const MIN_PARALLEL: u32 = 1;

/// One change the tuner made to the baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjustment {
    pub field: &'static str,
    pub from: u32,
    pub to: u32,
}

impl std::fmt::Display for Adjustment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} -> {}", self.field, self.from, self.to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuningOutcome {
    pub tuning: Tuning,
    pub adjustments: Vec<Adjustment>,
}

fn models_max_ceiling(mem_gib: f64) -> u32 {
    let ceiling = if mem_gib < 16.0 {
        2
    } else if mem_gib < 32.0 {
        3
    } else {
        4
    };
    ceiling.max(MIN_MODELS_MAX)
}

fn parallel_ceiling(mem_gib: f64) -> u32 {
    if mem_gib < 12.0 {
        1
    } else if mem_gib < 24.0 {
        2
    } else if mem_gib < 48.0 {
        3
    } else {
        4
    }
}

fn swap_floor(mem_gib: f64) -> u32 {
    if mem_gib < 16.0 { 8 } else { 4 }
}

fn record(adjustments: &mut Vec<Adjustment>, field: &'static str, from: u32, to: u32) -> u32 {
    if from != to {
        adjustments.push(Adjustment { field, from, to });
    }
    to
}

/// Fit `baseline` to a host with `mem_gib` of memory.
///
/// Total over all inputs; non-finite or negative memory counts as zero.
#[must_use]
pub fn tune(mem_gib: f64, baseline: Tuning) -> TuningOutcome {
    let mem = if mem_gib.is_finite() { mem_gib.max(0.0) } else { 0.0 };
    let mut adjustments = Vec::new();

    let models_max = record(
        &mut adjustments,
        "models_max",
        baseline.models_max,
        baseline
            .models_max
            .clamp(MIN_MODELS_MAX, models_max_ceiling(mem)),
    );
    let parallel = record(
        &mut adjustments,
        "parallel",
        baseline.parallel,
        baseline.parallel.clamp(MIN_PARALLEL, parallel_ceiling(mem)),
    );
    let swap_gib = record(
        &mut adjustments,
        "swap_gib",
        baseline.swap_gib,
        baseline.swap_gib.max(swap_floor(mem)),
    );

    TuningOutcome {
        tuning: Tuning {
            swap_gib,
            models_max,
            parallel,
        },
        adjustments,
    }
}

/// Apply only the hard floors, for when memory cannot be detected.
#[must_use]
pub fn enforce_floors(baseline: Tuning) -> TuningOutcome {
    let mut adjustments = Vec::new();
    let models_max = record(
        &mut adjustments,
        "models_max",
        baseline.models_max,
        baseline.models_max.max(MIN_MODELS_MAX),
    );
    let parallel = record(
        &mut adjustments,
        "parallel",
        baseline.parallel,
        baseline.parallel.max(MIN_PARALLEL),
    );
    TuningOutcome {
        tuning: Tuning {
            models_max,
            parallel,
            ..baseline
        },
        adjustments,
    }
}
