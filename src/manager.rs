use std::path::PathBuf;
use std::sync::mpsc::{Receiver as StdReceiver, TryRecvError};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc::Sender as TokioSender;
use tracing::{info, warn};

use crate::ecg::EcgStream;
use crate::interval::IntervalController;
use crate::options::{SensorOptions, ACTIVITY_SERVICE_UUID};
use crate::session::{connect_sensor, Session};
use crate::signal::{GuiSignal, MonitorSignal};
use crate::transport::Transport;

const POLL_PERIOD: Duration = Duration::from_millis(20);

/// Drives one sensor on behalf of the GUI.
pub struct MonitorManager<T: Transport> {
    transport: T,
    options: SensorOptions,
    export_dir: PathBuf,
    tx_to_gui: TokioSender<MonitorSignal>,
    rx_from_gui: StdReceiver<GuiSignal>,
    session: Option<Session<T>>,
    interval: IntervalController<T>,
    stream: Option<EcgStream<T>>,
}

impl<T: Transport> MonitorManager<T> {
    pub fn new(
        transport: T,
        options: SensorOptions,
        export_dir: PathBuf,
        tx_to_gui: TokioSender<MonitorSignal>,
        rx_from_gui: StdReceiver<GuiSignal>,
    ) -> Self {
        MonitorManager {
            interval: IntervalController::new(transport.clone()),
            transport,
            options,
            export_dir,
            tx_to_gui,
            rx_from_gui,
            session: None,
            stream: None,
        }
    }

    /// Serve GUI commands until `Quit` or until the GUI goes away.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            match self.rx_from_gui.try_recv() {
                Ok(GuiSignal::Quit) | Err(TryRecvError::Disconnected) => break,
                Ok(signal) => self.handle(signal).await,
                Err(TryRecvError::Empty) => {}
            }

            self.forward_samples().await;
            tokio::time::sleep(POLL_PERIOD).await;
        }

        if self.session.is_some() {
            self.disconnect().await;
        }
        info!("monitor stopped");
        Ok(())
    }

    pub async fn handle(&mut self, signal: GuiSignal) {
        match signal {
            GuiSignal::Connect => self.connect().await,
            GuiSignal::Disconnect => self.disconnect().await,
            GuiSignal::StartStreaming => self.start_streaming().await,
            GuiSignal::StopStreaming => self.stop_streaming().await,
            GuiSignal::StartRecording => self.set_recording(true).await,
            GuiSignal::StopRecording => self.set_recording(false).await,
            GuiSignal::SetInterval(input) => self.set_interval(&input).await,
            GuiSignal::Export => self.export().await,
            GuiSignal::Quit => {}
        }
    }

    async fn connect(&mut self) {
        if self.session.is_some() {
            self.send(MonitorSignal::Error("Sensor already connected".to_string()))
                .await;
            return;
        }

        let session = match connect_sensor(&self.transport, &self.options).await {
            Ok(session) => session,
            Err(err) => {
                let err = anyhow::Error::new(err);
                self.send(MonitorSignal::Error(format!("Connection failed: {err:#}")))
                    .await;
                return;
            }
        };

        let name = session.name().map(str::to_string);
        let activity_service = session.service(&ACTIVITY_SERVICE_UUID);
        self.session = Some(session);
        self.send(MonitorSignal::Connected { name }).await;

        let Some(service) = activity_service else {
            return;
        };
        match self.interval.attach(&service).await {
            Ok(interval) => self.send(MonitorSignal::Interval(Some(interval))).await,
            Err(err) => {
                self.send(MonitorSignal::Error(format!("Failed to connect ECG: {err}")))
                    .await
            }
        }
        self.stream = Some(EcgStream::new(
            self.transport.clone(),
            service,
            self.interval.watch(),
        ));
    }

    async fn disconnect(&mut self) {
        let Some(mut session) = self.session.take() else {
            self.send(MonitorSignal::Error("Sensor already disconnected".to_string()))
                .await;
            return;
        };

        if let Some(mut stream) = self.stream.take() {
            stream.stop().await;
        }
        self.interval.detach();

        let report = session.disconnect().await;
        if !report.is_clean() {
            warn!(?report, "sensor teardown was incomplete");
        }
        self.send(MonitorSignal::Disconnected).await;
    }

    async fn start_streaming(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            self.send(MonitorSignal::Error(
                "Failed to start ECG: Device not connected".to_string(),
            ))
            .await;
            return;
        };

        match stream.start().await {
            Ok(()) => self.send(MonitorSignal::Streaming(true)).await,
            Err(err) => self.send(MonitorSignal::Error(err.to_string())).await,
        }
    }

    async fn stop_streaming(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            stream.stop().await;
        }
        self.send(MonitorSignal::Streaming(false)).await;
    }

    async fn set_recording(&mut self, active: bool) {
        let Some(stream) = &self.stream else {
            self.send(MonitorSignal::Error(
                "Failed to record ECG: Device not connected".to_string(),
            ))
            .await;
            return;
        };

        if active {
            stream.start_recording();
        } else {
            stream.stop_recording();
        }
        self.report_recording().await;
    }

    async fn set_interval(&mut self, input: &str) {
        let Ok(value) = input.trim().parse::<i64>() else {
            self.send(MonitorSignal::Error(format!(
                "Changing ECG interval failed: \"{input}\" is not a number"
            )))
            .await;
            return;
        };

        match self.interval.write(value).await {
            Ok(()) => {
                self.send(MonitorSignal::Interval(self.interval.value()))
                    .await
            }
            Err(err) => {
                self.send(MonitorSignal::Error(format!(
                    "Changing ECG interval failed: {err}"
                )))
                .await
            }
        }
    }

    async fn export(&mut self) {
        let Some(stream) = &self.stream else {
            self.send(MonitorSignal::Error("Nothing recorded yet".to_string()))
                .await;
            return;
        };

        let signal = match stream.recording().save(&self.export_dir) {
            Ok(path) => {
                info!("recording exported to {}", path.display());
                MonitorSignal::Exported(path)
            }
            Err(err) => MonitorSignal::Error(format!("Export failed: {err}")),
        };
        self.send(signal).await;
    }

    async fn forward_samples(&mut self) {
        let Some(stream) = &self.stream else {
            return;
        };

        let fresh = stream.take_live();
        if fresh.is_empty() {
            return;
        }
        let recording = stream.is_recording();

        self.send(MonitorSignal::Samples(fresh)).await;
        if recording {
            self.report_recording().await;
        }
    }

    async fn report_recording(&self) {
        let Some(stream) = &self.stream else {
            return;
        };

        let recording = stream.recording();
        self.send(MonitorSignal::Recording {
            active: recording.is_active(),
            samples: recording.len(),
            duration: recording.duration(),
        })
        .await;
    }

    async fn send(&self, signal: MonitorSignal) {
        let _ = self.tx_to_gui.send(signal).await;
    }
}
