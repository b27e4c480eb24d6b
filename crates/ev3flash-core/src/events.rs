//! Event system for UI decoupling.
//!
//! CLI/GUI layers subscribe to session events without tight coupling to the
//! protocol code. The core never prints; it emits.

use std::fmt;

/// Firmware-transfer phases, in the order a successful write passes through
/// them. `Failed` is terminal and reachable from every non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferPhase {
    /// No transfer running.
    #[default]
    Idle,
    /// Erasing flash and opening the download.
    EraseAndBegin,
    /// Streaming image chunks.
    WriteChunks,
    /// Comparing the device checksum against the precomputed one.
    Verify,
    /// Restarting into the new firmware.
    Restart,
    /// Transfer finished successfully.
    Complete,
    /// Transfer aborted.
    Failed,
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferPhase::Idle => write!(f, "Idle"),
            TransferPhase::EraseAndBegin => write!(f, "Erase and Begin Download"),
            TransferPhase::WriteChunks => write!(f, "Write Chunks"),
            TransferPhase::Verify => write!(f, "Verify Checksum"),
            TransferPhase::Restart => write!(f, "Restart"),
            TransferPhase::Complete => write!(f, "Complete"),
            TransferPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress stages reported during a firmware write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStage {
    DownloadWithEraseStart,
    DownloadWithEraseEnd,
    WriteStart,
    WriteProcess,
    WriteEnd,
    VerifyStart,
    VerifyEnd,
    RestartStart,
    RestartEnd,
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProgressStage::DownloadWithEraseStart => "download_with_erase/start",
            ProgressStage::DownloadWithEraseEnd => "download_with_erase/end",
            ProgressStage::WriteStart => "write/start",
            ProgressStage::WriteProcess => "write/process",
            ProgressStage::WriteEnd => "write/end",
            ProgressStage::VerifyStart => "verify/start",
            ProgressStage::VerifyEnd => "verify/end",
            ProgressStage::RestartStart => "restart/start",
            ProgressStage::RestartEnd => "restart/end",
        };
        write!(f, "{s}")
    }
}

/// Events emitted by a session.
#[derive(Debug, Clone)]
pub enum UpgradeEvent {
    /// Session created.
    Init,
    /// Device opened.
    Connected,
    /// Device closed, or lost with an error.
    Disconnected { error: Option<String> },
    /// A command frame is being exchanged; emitted before the send
    /// (`in_flight: false`) and again once the report is out.
    Message { count: u64, in_flight: bool },
    /// Firmware write started.
    TransferStarted,
    /// Progress update for the running write.
    Progress {
        stage: ProgressStage,
        bytes_sent: Option<u32>,
        expected_size: Option<u32>,
    },
    /// Firmware write finished successfully.
    TransferEnded,
    /// Firmware write aborted.
    TransferFailed { message: String },
}

/// Observer trait for receiving session events.
///
/// Implement this in the UI layer; events arrive in the order the state
/// transitions occur.
pub trait UpgradeObserver: Send + Sync {
    /// Called for each event.
    fn on_event(&self, event: &UpgradeEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl UpgradeObserver for NullObserver {
    fn on_event(&self, _event: &UpgradeEvent) {
        // Do nothing
    }
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl UpgradeObserver for TracingObserver {
    fn on_event(&self, event: &UpgradeEvent) {
        match event {
            UpgradeEvent::Init => {
                tracing::debug!("Session initialized");
            }
            UpgradeEvent::Connected => {
                tracing::info!("Device connected");
            }
            UpgradeEvent::Disconnected { error } => match error {
                Some(err) => tracing::warn!(error = %err, "Device disconnected"),
                None => tracing::info!("Device disconnected"),
            },
            UpgradeEvent::Message { count, in_flight } => {
                tracing::trace!(count, in_flight, "Message");
            }
            UpgradeEvent::TransferStarted => {
                tracing::info!("Firmware transfer started");
            }
            UpgradeEvent::Progress {
                stage,
                bytes_sent,
                expected_size,
            } => match (bytes_sent, expected_size) {
                (Some(sent), Some(total)) if *total > 0 => {
                    let pct = (u64::from(*sent) * 100) / u64::from(*total);
                    tracing::info!(stage = %stage, sent, total, progress = %format!("{pct}%"), "Progress");
                }
                (Some(sent), _) => {
                    tracing::info!(stage = %stage, sent, "Progress");
                }
                _ => {
                    tracing::info!(stage = %stage, "Progress");
                }
            },
            UpgradeEvent::TransferEnded => {
                tracing::info!("Firmware transfer complete");
            }
            UpgradeEvent::TransferFailed { message } => {
                tracing::error!("Firmware transfer failed: {}", message);
            }
        }
    }
}
