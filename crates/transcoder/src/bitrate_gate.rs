//! Bitrate gate deciding whether a candidate is worth compressing.
//!
//! The gate only ever skips on positive evidence: a measured bitrate below the
//! filter threshold. An unmeasurable bitrate proceeds as if no filter was set
//! for the threshold check, but still uses the compress bitrate.

use crate::filter::BitrateFlags;
use crate::probe::{MediaProbe, ProbeResult};
use log::warn;
use std::path::Path;

/// Outcome of the gate for one file.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Report the measured bitrate (Mbps, `None` if unknown) and do not transcode.
    ShowOnly(Option<f64>),
    /// Measured bitrate is below the filter threshold.
    Skip { measured_mbps: f64 },
    /// Transcode, optionally at an explicit target bitrate in Mbps.
    Proceed { target_bitrate: Option<f64> },
}

/// Pure decision given a bitrate measurement (`None` = unknown).
///
/// Kept separate from probing so the policy can be tested exhaustively.
pub fn decide_from_measurement(flags: &BitrateFlags, measured_mbps: Option<f64>) -> GateDecision {
    if flags.show_bitrate {
        return GateDecision::ShowOnly(measured_mbps);
    }

    match flags.filter_bitrate {
        Some(threshold) => match measured_mbps {
            Some(measured) if measured < threshold => GateDecision::Skip {
                measured_mbps: measured,
            },
            _ => GateDecision::Proceed {
                target_bitrate: flags.compress_bitrate,
            },
        },
        None => GateDecision::Proceed {
            target_bitrate: None,
        },
    }
}

/// Bitrate gate bound to validated command-line flags.
#[derive(Debug, Clone)]
pub struct BitrateGate {
    flags: BitrateFlags,
}

impl BitrateGate {
    /// `flags` must already have passed [`BitrateFlags::validate`].
    pub fn new(flags: BitrateFlags) -> Self {
        Self { flags }
    }

    /// Whether items are only inspected, never transcoded.
    pub fn show_only(&self) -> bool {
        self.flags.show_bitrate
    }

    /// Whether deciding requires a probe at all.
    pub fn needs_probe(&self) -> bool {
        self.flags.show_bitrate || self.flags.filter_bitrate.is_some()
    }

    /// Probes the file when needed and applies the policy.
    ///
    /// Probe failures are logged and treated as an unknown bitrate.
    pub async fn decide<P: MediaProbe + ?Sized>(&self, probe: &P, path: &Path) -> GateDecision {
        self.decide_probed(probe, path).await.0
    }

    /// Like [`decide`](Self::decide), also handing back the probe result for
    /// the job runner to reuse.
    pub async fn decide_probed<P: MediaProbe + ?Sized>(
        &self,
        probe: &P,
        path: &Path,
    ) -> (GateDecision, Option<ProbeResult>) {
        if !self.needs_probe() {
            return (decide_from_measurement(&self.flags, None), None);
        }

        let (probed, measured) = match probe.probe(path).await {
            Ok(probed) => {
                let measured = probed.bitrate_mbps();
                (Some(probed), measured)
            }
            Err(e) => (None, Err(e)),
        };
        let measured = match measured {
            Ok(mbps) => Some(mbps),
            Err(e) => {
                warn!(
                    "Could not measure bitrate of {}: {}; treating it as unknown",
                    path.display(),
                    e
                );
                None
            }
        };

        (decide_from_measurement(&self.flags, measured), probed)
    }
}
