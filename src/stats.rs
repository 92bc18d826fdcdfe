//! Per-function overhead ranking.

use serde::{Deserialize, Serialize};

use std::collections::HashMap;

use crate::Sample;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionStat {
    pub overhead_percent: f64,
    pub command: String,
    pub function: String,
    /// Samples whose leaf frame was this function.
    pub samples: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_samples: u64,
    pub top_functions: Vec<FunctionStat>,
}

/// Counts leaf frames per (command, function) and ranks them by share of all samples.
///
/// Samples without frames count toward the total but have no leaf to credit.
/// `top_k` of `None` keeps every function.
pub fn aggregate(samples: &[Sample], top_k: Option<usize>) -> Statistics {
    let total = samples.len() as u64;
    let mut counts = HashMap::<(&str, &str), u64>::new();
    for sample in samples {
        if let Some(leaf) = sample.leaf() {
            *counts.entry((sample.command.as_str(), leaf)).or_insert(0) += 1;
        }
    }

    let mut top_functions: Vec<FunctionStat> = counts
        .into_iter()
        .map(|((command, function), count)| FunctionStat {
            overhead_percent: overhead(count, total),
            command: command.to_string(),
            function: function.to_string(),
            samples: count,
        })
        .collect();
    // Sort on the integer count; it orders exactly like the derived percentage.
    top_functions.sort_by(|a, b| {
        b.samples
            .cmp(&a.samples)
            .then_with(|| a.function.cmp(&b.function))
            .then_with(|| a.command.cmp(&b.command))
    });
    if let Some(k) = top_k {
        top_functions.truncate(k);
    }

    Statistics {
        total_samples: total,
        top_functions,
    }
}

fn overhead(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    100.0 * count as f64 / total as f64
}
