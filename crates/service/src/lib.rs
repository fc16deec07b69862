pub mod service;

pub use service::{
    cancel_scan, doctor, get_scan_report, get_scan_session, load_report, plan_session_action,
    poll_scan_events, start_scan, CancelScanResponse, ScanRequest, ScanSessionSnapshot,
    ScanSessionStatus,
};
