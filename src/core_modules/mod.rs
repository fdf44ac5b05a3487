// Vision layers, leaves first: raw frame, per-pixel background statistics, spatial grouping,
// per-frame detection, then zones, association and tracking across frames.

pub mod frame;
pub mod background_model;
pub mod motion_event;
pub mod blob_detector;
pub mod motion_detector;
pub mod zone;
pub mod association;
pub mod tracker;
pub mod detection_filter;
