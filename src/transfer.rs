//! Abstract syntaxes (SOP classes) accepted by the SCP (`spec.md` §4.6).
//!
//! The teacher's own `transfer.rs` (declared in its `lib.rs`, grounded on
//! `dicom-rs`'s `storescp` example) lists the standard storage SOP classes
//! plus Verification; this carries the same list forward, plus the
//! Query/Retrieve Find and Move classes the spec's finder/mover need that
//! a plain storage SCP does not.

/// SOP classes this SCP will negotiate a presentation context for.
pub const ABSTRACT_SYNTAXES: &[&str] = &[
    // Verification
    "1.2.840.10008.1.1",
    // Query/Retrieve
    "1.2.840.10008.5.1.4.1.2.1.1", // Patient Root Q/R Find
    "1.2.840.10008.5.1.4.1.2.1.2", // Patient Root Q/R Move
    "1.2.840.10008.5.1.4.1.2.2.1", // Study Root Q/R Find
    "1.2.840.10008.5.1.4.1.2.2.2", // Study Root Q/R Move
    // Storage: common imaging modalities
    "1.2.840.10008.5.1.4.1.1.1",       // CR Image Storage
    "1.2.840.10008.5.1.4.1.1.1.1",     // Digital X-Ray Image Storage - For Presentation
    "1.2.840.10008.5.1.4.1.1.1.1.1",   // Digital X-Ray Image Storage - For Processing
    "1.2.840.10008.5.1.4.1.1.2",       // CT Image Storage
    "1.2.840.10008.5.1.4.1.1.2.1",     // Enhanced CT Image Storage
    "1.2.840.10008.5.1.4.1.1.3.1",     // Ultrasound Multi-frame Image Storage
    "1.2.840.10008.5.1.4.1.1.4",       // MR Image Storage
    "1.2.840.10008.5.1.4.1.1.4.1",     // Enhanced MR Image Storage
    "1.2.840.10008.5.1.4.1.1.6.1",     // Ultrasound Image Storage
    "1.2.840.10008.5.1.4.1.1.7",       // Secondary Capture Image Storage
    "1.2.840.10008.5.1.4.1.1.12.1",    // X-Ray Angiographic Image Storage
    "1.2.840.10008.5.1.4.1.1.20",      // Nuclear Medicine Image Storage
    "1.2.840.10008.5.1.4.1.1.128",     // PET Image Storage
    "1.2.840.10008.5.1.4.1.1.481.1",   // RT Image Storage
    "1.2.840.10008.5.1.4.1.1.66",      // Raw Data Storage
    "1.2.840.10008.5.1.4.1.1.104.1",   // Encapsulated PDF Storage
    // Structured report / presentation state
    "1.2.840.10008.5.1.4.1.1.88.11", // Basic Text SR Storage
    "1.2.840.10008.5.1.4.1.1.11.1",  // Grayscale Softcopy Presentation State Storage
];
