//! ECG telemetry decoding.
//!
//! A notification frame carries a little-endian `u32` timestamp followed by
//! little-endian `i16` voltages. The timestamp belongs to the *last* sample;
//! earlier samples are spaced backwards by the current interval.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{FrameError, StreamError, TransportError};
use crate::options::ECG_VOLTAGE_CHARACTERISTIC_UUID;
use crate::recording::Recording;
use crate::transport::{FrameHandler, Transport};

pub const FRAME_HEADER_LEN: usize = 4;
const SAMPLE_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub timestamp: i64,
    pub value: i16,
}

pub fn decode_frame(frame: &[u8], interval: Option<u16>) -> Result<Vec<Sample>, FrameError> {
    if frame.len() <= FRAME_HEADER_LEN {
        return Err(FrameError::TooShort(frame.len()));
    }
    let interval = i64::from(interval.ok_or(FrameError::UnknownInterval)?);

    let time = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
    let voltages = frame[FRAME_HEADER_LEN..].chunks_exact(SAMPLE_LEN);
    let n = voltages.len() as i64;

    Ok(voltages
        .enumerate()
        .map(|(k, bytes)| Sample {
            timestamp: i64::from(time) - (n - k as i64 - 1) * interval,
            value: i16::from_le_bytes([bytes[0], bytes[1]]),
        })
        .collect())
}

pub fn encode_frame(timestamp: u32, values: &[i16]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + SAMPLE_LEN * values.len());
    frame.extend_from_slice(&timestamp.to_le_bytes());
    for value in values {
        frame.extend_from_slice(&value.to_le_bytes());
    }
    frame
}

/// Live series and recording fed by the notification callback.
#[derive(Debug, Default)]
pub struct EcgChannel {
    live: Vec<Sample>,
    recording: Recording,
}

impl EcgChannel {
    /// Decode `frame` and append its samples. Bad frames are dropped.
    pub fn ingest(&mut self, frame: &[u8], interval: Option<u16>) -> usize {
        let samples = match decode_frame(frame, interval) {
            Ok(samples) => samples,
            Err(err) => {
                warn!("dropping ECG frame: {err}");
                return 0;
            }
        };

        for sample in &samples {
            self.live.push(*sample);
            self.recording.push(*sample);
        }
        debug!(count = samples.len(), "decoded ECG frame");
        samples.len()
    }

    pub fn live(&self) -> &[Sample] {
        &self.live
    }

    /// Hand out the pending live samples, leaving the series empty.
    pub fn take_live(&mut self) -> Vec<Sample> {
        std::mem::take(&mut self.live)
    }

    pub fn recording(&self) -> &Recording {
        &self.recording
    }

    pub fn recording_mut(&mut self) -> &mut Recording {
        &mut self.recording
    }
}

/// ECG voltage subscription on the activity service.
pub struct EcgStream<T: Transport> {
    transport: T,
    service: T::Service,
    characteristic: Option<T::Characteristic>,
    subscription: Option<T::Subscription>,
    channel: Arc<Mutex<EcgChannel>>,
    interval: watch::Receiver<Option<u16>>,
}

impl<T: Transport> EcgStream<T> {
    pub fn new(transport: T, service: T::Service, interval: watch::Receiver<Option<u16>>) -> Self {
        EcgStream {
            transport,
            service,
            characteristic: None,
            subscription: None,
            channel: Arc::new(Mutex::new(EcgChannel::default())),
            interval,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.subscription.is_some()
    }

    pub async fn start(&mut self) -> Result<(), StreamError> {
        if self.is_streaming() {
            return Ok(());
        }

        match self.subscribe().await {
            Ok(()) => {
                info!("ECG started");
                Ok(())
            }
            Err(err) => {
                error!("failed to connect to ECG data characteristic: {err}");
                self.stop().await;
                Err(StreamError::StartFailed(err))
            }
        }
    }

    async fn subscribe(&mut self) -> Result<(), TransportError> {
        let characteristic = self
            .transport
            .resolve_characteristic(&self.service, ECG_VOLTAGE_CHARACTERISTIC_UUID)
            .await?;
        self.characteristic = Some(characteristic.clone());

        let channel = Arc::clone(&self.channel);
        let interval = self.interval.clone();
        let on_frame: FrameHandler = Box::new(move |frame: &[u8]| {
            let current = *interval.borrow();
            lock(&channel).ingest(frame, current);
        });

        let subscription = self.transport.subscribe(&characteristic, on_frame).await?;
        self.subscription = Some(subscription);
        Ok(())
    }

    /// Release the subscription and characteristic. No-op when idle.
    pub async fn stop(&mut self) {
        let Some(_characteristic) = self.characteristic.take() else {
            return;
        };

        if let Some(subscription) = self.subscription.take() {
            if let Err(err) = self.transport.unsubscribe(subscription).await {
                warn!("failed to stop ECG notifications: {err}");
            }
            info!("ECG stopped");
        }
    }

    pub fn start_recording(&self) {
        lock(&self.channel).recording_mut().start();
    }

    pub fn stop_recording(&self) {
        lock(&self.channel).recording_mut().stop();
    }

    pub fn is_recording(&self) -> bool {
        lock(&self.channel).recording().is_active()
    }

    /// Snapshot of the recording buffer.
    pub fn recording(&self) -> Recording {
        lock(&self.channel).recording().clone()
    }

    pub fn live_len(&self) -> usize {
        lock(&self.channel).live().len()
    }

    /// Live samples decoded since the last call.
    pub fn take_live(&self) -> Vec<Sample> {
        lock(&self.channel).take_live()
    }
}

fn lock(channel: &Mutex<EcgChannel>) -> MutexGuard<'_, EcgChannel> {
    channel.lock().unwrap_or_else(PoisonError::into_inner)
}
