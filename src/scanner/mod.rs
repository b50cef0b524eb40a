mod walk;

pub use walk::{scan, scan_roots, ScanOptions, ScanOutcome, ScannedFile};
