//! Controller <-> worker protocol: stdout events and side-channel files.

pub mod event;
pub mod parent;
pub mod signals;

pub use event::{EventLog, EventSink, StdoutSink, WorkerEvent, parse_hex_address};
pub use parent::{ParentWatch, process_exists};
pub use signals::{
    ScannerSignals, SignalPaths, SignalSender, WriterSignals, config_blob_path,
    parse_address_update, take_marker, take_message,
};
