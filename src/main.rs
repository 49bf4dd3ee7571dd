use std::path::PathBuf;
use std::sync::mpsc::Sender as StdSender;
use std::thread::{self, sleep};
use std::time::{Duration, SystemTime};

use anyhow::Result;
use clap::Parser;
use eframe::egui;
use tokio::sync::mpsc::{Receiver as TokioReceiver, Sender as TokioSender};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use btecg::btle::BtleTransport;
use btecg::ecg::Sample;
use btecg::manager::MonitorManager;
use btecg::options::SensorOptions;
use btecg::signal::{GuiSignal, MonitorSignal};
use btecg::sim::SimTransport;

mod widget;

const MAX_FPS: f64 = 165.0;

/// Bluetooth ECG sensor monitor
#[derive(Parser, Debug)]
#[command(name = "btecg")]
#[command(version, about = "Stream, record and export ECG from a Bluetooth LE sensor", long_about = None)]
struct Cli {
    /// Logging verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Use a simulated sensor instead of the Bluetooth adapter
    #[arg(long)]
    simulate: bool,

    /// Only connect to sensors whose name starts with this
    #[arg(long)]
    name_prefix: Option<String>,

    /// Seconds to scan before giving up
    #[arg(long, default_value_t = 10)]
    scan_timeout: u64,

    /// Directory the recording is exported to
    #[arg(long, default_value = ".")]
    export_dir: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("btecg v{}", env!("CARGO_PKG_VERSION"));

    let mut options =
        SensorOptions::default().with_scan_timeout(Duration::from_secs(cli.scan_timeout));
    if let Some(prefix) = cli.name_prefix {
        options = options.with_name_prefix(prefix);
    }

    let (tx, rx) = tokio::sync::mpsc::channel(128);
    let (tx_from_gui, rx_to_gui) = std::sync::mpsc::channel();

    let simulate = cli.simulate;
    let export_dir = cli.export_dir;
    let worker = thread::spawn(move || -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(run_monitor(simulate, options, export_dir, tx, rx_to_gui))
    });

    let native_options = eframe::NativeOptions::default();
    eframe::run_native(
        "btecg",
        native_options,
        Box::new(|cc| Ok(Box::new(MyApp::new(cc, rx, tx_from_gui)))),
    )
    .map_err(|err| anyhow::anyhow!("{err}"))?;

    match worker.join() {
        Ok(result) => result,
        Err(_) => anyhow::bail!("monitor thread panicked"),
    }
}

async fn run_monitor(
    simulate: bool,
    options: SensorOptions,
    export_dir: PathBuf,
    tx: TokioSender<MonitorSignal>,
    rx_to_gui: std::sync::mpsc::Receiver<GuiSignal>,
) -> Result<()> {
    if simulate {
        info!("using a simulated sensor");
        let transport = SimTransport::demo();
        let mut manager = MonitorManager::new(transport, options, export_dir, tx, rx_to_gui);
        return manager.run().await;
    }

    let transport = match BtleTransport::new().await {
        Ok(transport) => transport,
        Err(err) => {
            error!("Bluetooth is not available: {err}");
            let _ = tx.send(MonitorSignal::Error(err.to_string())).await;
            return Err(err.into());
        }
    };
    let mut manager = MonitorManager::new(transport, options, export_dir, tx, rx_to_gui);
    manager.run().await
}

struct Status {
    message: String,
    is_error: bool,
}

struct MyApp {
    rx_from_monitor: TokioReceiver<MonitorSignal>,
    tx_from_gui: StdSender<GuiSignal>,
    frame_time: Duration,
    device: Option<Option<String>>,
    interval: Option<u16>,
    interval_input: String,
    streaming: bool,
    latest: Option<Sample>,
    sample_count: usize,
    recording: bool,
    recorded_samples: usize,
    recorded_duration: i64,
    status: Option<Status>,
}

impl MyApp {
    fn new(
        _cc: &eframe::CreationContext<'_>,
        rx_from_monitor: TokioReceiver<MonitorSignal>,
        tx_from_gui: StdSender<GuiSignal>,
    ) -> Self {
        MyApp {
            rx_from_monitor,
            tx_from_gui,
            frame_time: Duration::from_secs_f64(1.0 / MAX_FPS),
            device: None,
            interval: None,
            interval_input: String::new(),
            streaming: false,
            latest: None,
            sample_count: 0,
            recording: false,
            recorded_samples: 0,
            recorded_duration: 0,
            status: None,
        }
    }

    fn read_channel(&mut self) {
        while let Ok(signal) = self.rx_from_monitor.try_recv() {
            match signal {
                MonitorSignal::Connected { name } => {
                    let label = name.clone().unwrap_or("unknown sensor".to_string());
                    self.set_status(format!("Connected to sensor \"{label}\""), false);
                    self.device = Some(name);
                    self.sample_count = 0;
                    self.latest = None;
                }
                MonitorSignal::Disconnected => {
                    self.set_status("Disconnected from sensor".to_string(), false);
                    self.device = None;
                    self.interval = None;
                    self.streaming = false;
                    self.recording = false;
                }
                MonitorSignal::Interval(interval) => {
                    self.interval = interval;
                    if let Some(interval) = interval {
                        self.interval_input = interval.to_string();
                    }
                }
                MonitorSignal::Streaming(streaming) => {
                    let message = if streaming { "ECG started" } else { "ECG stopped" };
                    self.set_status(message.to_string(), false);
                    self.streaming = streaming;
                }
                MonitorSignal::Samples(samples) => {
                    self.sample_count += samples.len();
                    self.latest = samples.last().copied().or(self.latest);
                }
                MonitorSignal::Recording {
                    active,
                    samples,
                    duration,
                } => {
                    self.recording = active;
                    self.recorded_samples = samples;
                    self.recorded_duration = duration;
                }
                MonitorSignal::Exported(path) => {
                    self.set_status(format!("Recording saved to {}", path.display()), false)
                }
                MonitorSignal::Error(message) => self.set_status(message, true),
            }
        }
    }

    fn set_status(&mut self, message: String, is_error: bool) {
        self.status = Some(Status { message, is_error });
    }

    fn send(&self, signal: GuiSignal) {
        let _unused_res = self.tx_from_gui.send(signal);
    }
}

impl eframe::App for MyApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = SystemTime::now();

        self.read_channel();

        let mut outgoing = vec![];
        let central_panel = egui::CentralPanel::default();
        central_panel.show(ctx, |ui| {
            ui.add(widget::get_ecg_value_label(self.latest.map(|s| s.value)));

            match &self.device {
                Some(name) => {
                    let name = name.as_deref().unwrap_or("unknown sensor");
                    ui.horizontal(|ui| {
                        ui.add(widget::get_active_device_frame(name));
                        if ui.add(widget::get_disconnect_device_button()).clicked() {
                            outgoing.push(GuiSignal::Disconnect);
                        }
                    });
                }
                None => {
                    if ui.add(widget::get_control_button("Connect sensor")).clicked() {
                        outgoing.push(GuiSignal::Connect);
                    }
                }
            }

            if self.device.is_some() {
                ui.horizontal(|ui| {
                    let interval = self
                        .interval
                        .map(|i| format!("{i} ms"))
                        .unwrap_or("unknown".to_string());
                    ui.label(format!("Interval: {interval}"));
                    ui.text_edit_singleline(&mut self.interval_input);
                    if ui.add(widget::get_control_button("Set")).clicked() {
                        outgoing.push(GuiSignal::SetInterval(self.interval_input.clone()));
                    }
                });

                ui.horizontal(|ui| {
                    let (text, signal) = if self.streaming {
                        ("Stop ECG", GuiSignal::StopStreaming)
                    } else {
                        ("Start ECG", GuiSignal::StartStreaming)
                    };
                    if ui.add(widget::get_control_button(text)).clicked() {
                        outgoing.push(signal);
                    }

                    let (text, signal) = if self.recording {
                        ("Stop recording", GuiSignal::StopRecording)
                    } else {
                        ("Record", GuiSignal::StartRecording)
                    };
                    if ui.add(widget::get_control_button(text)).clicked() {
                        outgoing.push(signal);
                    }

                    if ui.add(widget::get_control_button("Export")).clicked() {
                        outgoing.push(GuiSignal::Export);
                    }
                });

                ui.label(format!("Samples received: {}", self.sample_count));
                ui.label(format!(
                    "Recorded: {} samples, {} ms",
                    self.recorded_samples, self.recorded_duration
                ));
            }

            if let Some(status) = &self.status {
                ui.add(widget::get_status_label(&status.message, status.is_error));
            }
        });

        for signal in outgoing {
            self.send(signal);
        }

        let elapsed = now.elapsed().unwrap_or(Duration::from_micros(300));

        ctx.request_repaint();
        if elapsed < self.frame_time {
            sleep(self.frame_time - elapsed);
        }
    }
}
