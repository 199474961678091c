// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transport and flash-target contracts used by the firmware worker.

use std::future::Future;
use std::io;

/// Terminal result of one update attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The image was written and verified; the device should restart.
    Ok,
    /// The server reports the running firmware is current.
    NoUpdates,
    /// The attempt failed with the transport's last error text.
    Failed(String),
}

/// Callbacks a transport drives while an update is in flight.
pub trait TransferObserver: Send {
    /// Called after each chunk is written.
    fn on_progress(&mut self, current: u64, total: u64);

    /// Called once the whole image is written, before the transport
    /// returns [`TransferOutcome::Ok`].
    fn on_end(&mut self);
}

/// Downloads an image and writes it to the flash target.
///
/// Implementations follow redirects, bound connect and read times, and
/// report every written chunk to the observer.
pub trait FirmwareTransport: Send + Sync + 'static {
    /// Runs one update from `url`.
    fn update(
        &self,
        url: &str,
        observer: &mut dyn TransferObserver,
    ) -> impl Future<Output = TransferOutcome> + Send;
}

/// Destination of the firmware image, typically the inactive flash
/// partition.
///
/// Calls arrive in order: one `begin`, any number of `write`, then either
/// `finish` or `abort`. Only one job writes at a time.
pub trait FirmwareWriter: Send + Sync {
    /// Prepares to receive an image of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the target cannot hold the image.
    fn begin(&self, size: u64) -> io::Result<()>;

    /// Appends a chunk of the image.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk cannot be written.
    fn write(&self, chunk: &[u8]) -> io::Result<()>;

    /// Validates the written image and marks it bootable.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is incomplete or invalid.
    fn finish(&self) -> io::Result<()>;

    /// Discards a partially written image.
    fn abort(&self);
}
