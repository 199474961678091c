// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Over-the-air firmware updates with observable progress.
//!
//! [`DownloadFirmwareService`] accepts a download request, runs the transfer
//! on a background tokio task and reports each stage as a [`FirmwareStatus`]
//! document on an [`EventSink`](crate::event::EventSink). The transfer itself
//! goes through the [`FirmwareTransport`] trait; [`HttpUpdater`] is the
//! reqwest-based implementation (requires the `http` feature) and writes the
//! image through a [`FirmwareWriter`].
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use statebridge::config::FirmwareConfig;
//! use statebridge::event::EventBus;
//! use statebridge::firmware::{DownloadFirmwareService, FirmwareStatus, HttpUpdater, MemoryWriter};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FirmwareConfig::new();
//! let bus = EventBus::new();
//! let mut events = bus.subscribe();
//!
//! let updater = HttpUpdater::new(&config, Arc::new(MemoryWriter::new()))?;
//! let service = DownloadFirmwareService::new(updater, bus, || println!("restart"), &config);
//!
//! service.download_update(&serde_json::json!({
//!     "download_url": "https://example.com/firmware.bin"
//! }))?;
//!
//! while let Ok(notification) = events.recv().await {
//!     let status: FirmwareStatus = serde_json::from_str(&notification.payload)?;
//!     println!("{status:?}");
//!     if status.is_terminal() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "http")]
mod http_updater;
mod job_id;
mod memory_writer;
mod progress;
mod service;
mod status;
mod transport;

#[cfg(feature = "http")]
pub use http_updater::HttpUpdater;
pub use job_id::JobId;
pub use memory_writer::MemoryWriter;
pub use progress::ProgressTracker;
pub use service::{ACCEPTED, DownloadFirmwareService, NO_UPDATES_MESSAGE, RestartHandler};
pub use status::FirmwareStatus;
pub use transport::{FirmwareTransport, FirmwareWriter, TransferObserver, TransferOutcome};
