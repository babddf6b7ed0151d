use ndarray::s;
use serde::Serialize;
use std::collections::BTreeMap;

use super::error::MonitorError;
use super::frame::{Frame, TimestreamMap};

// Rates measured from sample times carry rounding error; 199 / 0.995 is not quite 200
const RATE_TOLERANCE: f64 = 1.0e-6;

/// Readout channel name for a channel number, e.g. 12 -> r0012
pub fn readout_channel_name(channel: u32) -> String {
    format!("r{channel:04}")
}

/// Which channels to watch, and the rate to downsample them to
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MonitorSpec {
    pub channels: Vec<String>,
    pub target_rate: f64,
}

impl MonitorSpec {
    pub fn new(channels: Vec<String>, target_rate: f64) -> Self {
        Self {
            channels,
            target_rate,
        }
    }

    pub fn from_readout_channels(channels: &[u32], target_rate: f64) -> Self {
        Self::new(
            channels.iter().map(|c| readout_channel_name(*c)).collect(),
            target_rate,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// One telemetry record: a downsampled time series for one channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamBlock {
    pub block_name: String,
    pub timestamps: Vec<f64>,
    pub data: BTreeMap<String, Vec<f64>>,
}

impl StreamBlock {
    fn new(channel: &str) -> Self {
        let mut data = BTreeMap::new();
        data.insert(String::from(channel), Vec::new());
        Self {
            block_name: String::from(channel),
            timestamps: Vec::new(),
            data,
        }
    }

    pub fn n_samples(&self) -> usize {
        self.timestamps.len()
    }
}

/// Downsampling stride for a block of samples.
///
/// The stride is the whole number of native samples per target sample, never less than
/// one. When the native rate can't be computed (a single sample) the block is treated as
/// already at the target rate. If the stride would skip everything after the first
/// sample, it is shortened so the last sample is kept too.
pub fn downsample_factor(native_rate: Option<f64>, target_rate: f64, n_samples: usize) -> usize {
    let mut ds_factor = match native_rate {
        Some(rate) => ((rate / target_rate + RATE_TOLERANCE).floor() as usize).max(1),
        None => 1,
    };
    if 1 < n_samples && n_samples <= ds_factor {
        ds_factor = n_samples - 1;
    }
    ds_factor
}

/// ChannelMonitor pulls a few channels out of the data stream for live display.
///
/// Each batch of frames is downsampled and appended to per channel accumulators, which
/// are drained once per recorder iteration.
#[derive(Debug, Default)]
pub struct ChannelMonitor {
    spec: MonitorSpec,
    blocks: BTreeMap<String, StreamBlock>,
}

impl ChannelMonitor {
    pub fn new(spec: MonitorSpec) -> Self {
        Self {
            spec,
            blocks: BTreeMap::new(),
        }
    }

    pub fn spec(&self) -> &MonitorSpec {
        &self.spec
    }

    pub fn is_active(&self) -> bool {
        !self.spec.is_empty()
    }

    /// Replace the monitored channels. Anything accumulated so far is discarded.
    pub fn set_spec(&mut self, spec: MonitorSpec) {
        self.spec = spec;
        self.blocks.clear();
    }

    /// Downsample the monitored channels of every scan frame in the batch
    pub fn extract(&mut self, frames: &[Frame]) -> Result<(), MonitorError> {
        if self.spec.is_empty() {
            return Ok(());
        }
        let target_rate = self.spec.target_rate;
        if !(target_rate.is_finite() && target_rate > 0.0) {
            return Err(MonitorError::BadTargetRate(target_rate));
        }

        for block in frames.iter().filter_map(|f| f.timestreams()) {
            self.extract_block(block, target_rate);
        }
        Ok(())
    }

    fn extract_block(&mut self, block: &TimestreamMap, target_rate: f64) {
        if block.n_samples() == 0 {
            return;
        }
        let ds_factor = downsample_factor(block.sample_rate(), target_rate, block.n_samples());
        let times: Vec<f64> = block.times().iter().step_by(ds_factor).copied().collect();

        for channel in self.spec.channels.iter() {
            // Channels come and go (e.g. while retuning); missing ones are skipped
            let samples = match block.get(channel) {
                Some(samples) => samples,
                None => continue,
            };
            let entry = self
                .blocks
                .entry(channel.clone())
                .or_insert_with(|| StreamBlock::new(channel));
            entry.timestamps.extend_from_slice(&times);
            if let Some(data) = entry.data.get_mut(channel) {
                data.extend(samples.slice(s![..;ds_factor]).iter().copied());
            }
        }
    }

    /// Hand over the accumulated blocks, in monitored channel order, and reset.
    ///
    /// Channels which received no samples are left out.
    pub fn drain(&mut self) -> Vec<StreamBlock> {
        let mut blocks = std::mem::take(&mut self.blocks);
        self.spec
            .channels
            .iter()
            .filter_map(|c| blocks.remove(c))
            .filter(|b| b.n_samples() > 0)
            .collect()
    }
}
