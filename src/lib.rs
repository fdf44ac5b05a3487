// THEORY:
// This file is the main entry point for the `nocturnal_eye` library crate. It defines the
// public API used by the bundled runner and by any other host (a camera service, a notebook
// exporter, a test harness).
//
// The engine is layered:
// 1.  `core_modules`: per-frame vision (background model, blobs, motion events), zones and the
//     multi-object tracker. Pure, synchronous, deterministic.
// 2.  `pipeline`: one `VisionPipeline` that owns all live state and turns a frame into records.
// 3.  `store`: the persistence seam. `EventSink` for writes, `EventStore` for reads.
// 4.  `analytics` and `heatmap`: read-only queries over a store.
// 5.  `runtime`: the async live loop that ties a frame source to the pipeline and a sink.
//     `snapshot` saves annotated stills of what it published.

pub mod analytics;
pub mod config;
pub mod core_modules;
pub mod error;
pub mod heatmap;
pub mod pipeline;
pub mod runtime;
pub mod snapshot;
pub mod store;
