//! Capability-based device scoring and selection.

use crate::catalog::DeviceCatalog;
use crate::config::SelectionConfig;
use crate::error::{BootstrapError, Result};
use clboot_types::{CapabilityProfile, FP64_EXTENSION};
use tracing::{debug, info};

/// Score of one eligible device, addressed by catalog indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreResult {
    pub platform: usize,
    pub device: usize,
    pub score: u64,
}

/// `clock × compute units + global memory`, in exact integer arithmetic.
///
/// The product of two `u32`s always fits a `u64`; the memory term saturates
/// instead of wrapping.
pub fn score(profile: &CapabilityProfile) -> u64 {
    let throughput = u64::from(profile.clock_mhz) * u64::from(profile.compute_units);
    throughput.saturating_add(profile.global_memory_bytes)
}

/// Picks the best device that satisfies the eligibility policy.
#[derive(Debug, Clone)]
pub struct DeviceSelector {
    required_extension: String,
    require_available: bool,
}

impl Default for DeviceSelector {
    fn default() -> Self {
        Self::new(FP64_EXTENSION)
    }
}

impl DeviceSelector {
    pub fn new(required_extension: impl Into<String>) -> Self {
        Self {
            required_extension: required_extension.into(),
            require_available: false,
        }
    }

    pub fn from_config(config: &SelectionConfig) -> Self {
        Self::new(config.required_extension.clone()).require_available(config.require_available)
    }

    pub fn require_available(mut self, yes: bool) -> Self {
        self.require_available = yes;
        self
    }

    pub fn required_extension(&self) -> &str {
        &self.required_extension
    }

    pub fn is_eligible(&self, profile: &CapabilityProfile) -> bool {
        profile.supports(&self.required_extension) && (!self.require_available || profile.available)
    }

    /// Scores of every eligible device, in enumeration order.
    pub fn scores<P, D>(&self, catalog: &DeviceCatalog<P, D>) -> Vec<ScoreResult> {
        catalog
            .devices()
            .filter(|(_, _, device)| self.is_eligible(&device.profile))
            .map(|(platform, device_index, device)| ScoreResult {
                platform,
                device: device_index,
                score: score(&device.profile),
            })
            .collect()
    }

    /// The highest-scoring eligible device.
    ///
    /// Only a strictly greater score replaces the current best, so the
    /// earliest device wins a tie. An eligible device scoring zero is still a
    /// valid result; `NoEligibleDevice` means the eligible set was empty.
    pub fn select_best<P, D>(&self, catalog: &DeviceCatalog<P, D>) -> Result<ScoreResult> {
        let mut best: Option<ScoreResult> = None;
        for candidate in self.scores(catalog) {
            debug!(
                target: "clboot::selector",
                platform = candidate.platform,
                device = candidate.device,
                score = candidate.score,
                "eligible device"
            );
            if best.map_or(true, |b| candidate.score > b.score) {
                best = Some(candidate);
            }
        }

        match best {
            Some(best) => {
                info!(
                    target: "clboot::selector",
                    platform = best.platform,
                    device = best.device,
                    score = best.score,
                    "selected device"
                );
                Ok(best)
            }
            None => Err(BootstrapError::NoEligibleDevice {
                required: self.required_extension.clone(),
                scanned: catalog.device_count(),
            }),
        }
    }
}
