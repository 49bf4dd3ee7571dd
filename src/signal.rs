use std::path::PathBuf;

use crate::ecg::Sample;

/// Worker -> GUI.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorSignal {
    Connected { name: Option<String> },
    Disconnected,
    Interval(Option<u16>),
    Streaming(bool),
    Samples(Vec<Sample>),
    Recording {
        active: bool,
        samples: usize,
        duration: i64,
    },
    Exported(PathBuf),
    Error(String),
}

/// GUI -> worker.
#[derive(Debug, Clone, PartialEq)]
pub enum GuiSignal {
    Connect,
    Disconnect,
    StartStreaming,
    StopStreaming,
    StartRecording,
    StopRecording,
    SetInterval(String),
    Export,
    Quit,
}
