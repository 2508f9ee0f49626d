use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseTiming {
    pub name: String,
    pub total_ms: f64,
    pub count: u64,
}

/// Per-node processing time, aggregated.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NodeTimings {
    pub count: u64,
    pub total_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl NodeTimings {
    pub fn record(&mut self, ms: f64) {
        if self.count == 0 {
            self.min_ms = ms;
            self.max_ms = ms;
        } else {
            self.min_ms = self.min_ms.min(ms);
            self.max_ms = self.max_ms.max(ms);
        }
        self.count += 1;
        self.total_ms += ms;
    }

    pub fn absorb(&mut self, other: &NodeTimings) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        self.count += other.count;
        self.total_ms += other.total_ms;
        self.min_ms = self.min_ms.min(other.min_ms);
        self.max_ms = self.max_ms.max(other.max_ms);
    }

    pub fn average_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StyleMetrics {
    pub phases: Vec<PhaseTiming>,
    pub nodes: NodeTimings,
    pub counters: BTreeMap<String, u64>,
}

impl StyleMetrics {
    pub fn phase_ms(&self, name: &str) -> Option<f64> {
        self.phases
            .iter()
            .find(|phase| phase.name == name)
            .map(|phase| phase.total_ms)
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn total_ms(&self) -> f64 {
        self.phases.iter().map(|phase| phase.total_ms).sum()
    }
}
