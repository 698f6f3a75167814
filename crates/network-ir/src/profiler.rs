// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-layer execution profiling.
//!
//! A [`LayerProfiler`] attached to an execution context accumulates how long
//! each layer took across runs, which is the main tool for spotting the
//! expensive parts of a converted network.

use std::time::Duration;

/// Accumulated timing for one layer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LayerTiming {
    pub layer_name: String,
    /// Sum over all recorded runs.
    pub total_duration: Duration,
    pub invocations: usize,
}

impl LayerTiming {
    pub fn average(&self) -> Duration {
        if self.invocations == 0 {
            return Duration::ZERO;
        }
        self.total_duration / self.invocations as u32
    }
}

/// Collects layer timings reported by the execution context.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct LayerProfiler {
    /// Layers in first-reported order.
    pub layers: Vec<LayerTiming>,
    /// Wall-clock time of all recorded runs.
    pub total_duration: Duration,
    pub runs: usize,
}

impl LayerProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `duration` to the layer's running total.
    pub fn report_layer_time(&mut self, layer_name: &str, duration: Duration) {
        match self.layers.iter_mut().find(|l| l.layer_name == layer_name) {
            Some(timing) => {
                timing.total_duration += duration;
                timing.invocations += 1;
            }
            None => self.layers.push(LayerTiming {
                layer_name: layer_name.to_string(),
                total_duration: duration,
                invocations: 1,
            }),
        }
    }

    /// Records the end of one execution.
    pub fn finish_run(&mut self, total: Duration) {
        self.total_duration += total;
        self.runs += 1;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// The layer with the largest accumulated time.
    pub fn slowest(&self) -> Option<&LayerTiming> {
        self.layers.iter().max_by_key(|l| l.total_duration)
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        let avg_ms = if self.runs > 0 {
            self.total_duration.as_secs_f64() * 1000.0 / self.runs as f64
        } else {
            0.0
        };
        let mut s = format!(
            "Profile: {} runs, {:.3}ms average, {} layers",
            self.runs,
            avg_ms,
            self.layers.len()
        );
        if let Some(slowest) = self.slowest() {
            s.push_str(&format!(
                ", slowest '{}' ({:.3}ms avg)",
                slowest.layer_name,
                slowest.average().as_secs_f64() * 1000.0
            ));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_profiler() {
        let p = LayerProfiler::new();
        assert!(p.slowest().is_none());
        assert!(p.summary().contains("0 runs"));
    }

    #[test]
    fn test_accumulates_by_layer() {
        let mut p = LayerProfiler::new();
        p.report_layer_time("add", Duration::from_millis(2));
        p.report_layer_time("relu", Duration::from_millis(1));
        p.report_layer_time("add", Duration::from_millis(4));
        p.finish_run(Duration::from_millis(7));

        assert_eq!(p.layers.len(), 2);
        assert_eq!(p.layers[0].invocations, 2);
        assert_eq!(p.layers[0].average(), Duration::from_millis(3));
        assert_eq!(p.slowest().unwrap().layer_name, "add");
        assert!(p.summary().contains("slowest 'add'"));

        p.reset();
        assert_eq!(p.runs, 0);
    }
}
