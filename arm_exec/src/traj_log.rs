//! # Trajectory log
//!
//! Per-tick snapshots of the arm, collected by a `TickSink` which the servo controller calls once
//! every control tick. The recorder keeps the snapshots in memory until they are flushed to JSON.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::BufWriter,
    path::Path,
    sync::{Arc, Mutex},
};

use crate::{
    backend::JointCommand,
    kinematics::{JointVector, Pose},
};
use util::session::Session;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Observer invoked once per control tick.
pub trait TickSink: Send {
    /// If false the servo controller skips computing link frames for the records.
    fn wants_frames(&self) -> bool {
        true
    }

    fn record(&mut self, record: TickRecord);
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One control tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickRecord {
    /// Tick index since the recorder's servo controller was created.
    pub tick: u64,

    /// Units: seconds
    pub time_s: f64,

    /// Joint positions at the start of the tick.
    ///
    /// Units: radians
    pub q: JointVector,

    /// Command applied during the tick.
    pub cmd: JointCommand,

    /// Link frames, base first, end effector last. Empty if the sink did not want frames.
    pub frames: Vec<FrameSnapshot>,
}

/// Position and orientation of a link frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FrameSnapshot {
    /// Units: meters,
    /// Frame: World
    pub position_m: [f64; 3],

    /// Orientation quaternion, ordered `[w, x, y, z]`.
    pub quaternion_wxyz: [f64; 4],
}

/// In-memory trajectory recorder.
///
/// Clones share the same record buffer, so a clone can be handed to the servo controller while
/// the caller keeps one to flush the records.
#[derive(Debug, Clone, Default)]
pub struct TrajRecorder {
    records: Arc<Mutex<Vec<TickRecord>>>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TrajLogError {
    #[error("Could not create the trajectory file: {0}")]
    FileError(std::io::Error),

    #[error("Could not serialise the trajectory: {0}")]
    SerializationError(serde_json::Error),

    #[error("The record buffer lock is poisoned")]
    Poisoned,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl From<&Pose> for FrameSnapshot {
    fn from(pose: &Pose) -> Self {
        let t = pose.translation.vector;
        let r = pose.rotation;

        Self {
            position_m: [t.x, t.y, t.z],
            quaternion_wxyz: [r.w, r.i, r.j, r.k],
        }
    }
}

impl TrajRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the records currently held.
    pub fn records(&self) -> Vec<TickRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Take all held records, leaving the buffer empty.
    pub fn take(&self) -> Result<Vec<TickRecord>, TrajLogError> {
        self.records
            .lock()
            .map(|mut r| std::mem::take(&mut *r))
            .map_err(|_| TrajLogError::Poisoned)
    }

    /// Write the held records to the given path as a JSON array and clear the buffer.
    pub fn flush_to_path<P: AsRef<Path>>(&self, path: P) -> Result<usize, TrajLogError> {
        let records = self.take()?;

        let file = File::create(path.as_ref()).map_err(TrajLogError::FileError)?;
        serde_json::to_writer(BufWriter::new(file), &records)
            .map_err(TrajLogError::SerializationError)?;

        info!(
            "Wrote {} trajectory records to {:?}",
            records.len(),
            path.as_ref()
        );

        Ok(records.len())
    }

    /// Hand the held records to the session's save thread, which writes them into the session
    /// directory under a timestamped name.
    pub fn flush_to_session(&self, session: &Session, name: &str) {
        match self.take() {
            Ok(records) if records.is_empty() => (),
            Ok(records) => {
                info!("Saving {} trajectory records", records.len());
                session.save_with_timestamp(format!("traj/{}.json", name), records);
            }
            Err(e) => warn!("Could not flush the trajectory: {}", e),
        }
    }
}

impl TickSink for TrajRecorder {
    fn record(&mut self, record: TickRecord) {
        match self.records.lock() {
            Ok(mut r) => r.push(record),
            Err(_) => warn!("Trajectory buffer poisoned, dropping tick {}", record.tick),
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
