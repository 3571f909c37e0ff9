//! delview: a terminal viewer for large delimited text files.
//!
//! Files are parsed on a background thread and streamed into the viewer in
//! batches. Filtering runs on its own worker and only the rows inside the
//! visible window are ever turned into widgets.

pub mod config;
pub mod controller;
pub mod delimiter;
pub mod domain;
pub mod filter;
pub mod ingest;
pub mod inputter;
pub mod logging;
pub mod model;
pub mod splitter;
pub mod stream;
pub mod table;
pub mod ui;
pub mod window;
