// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory firmware target.

use std::io;

use parking_lot::Mutex;

use super::FirmwareWriter;

#[derive(Debug, Default)]
struct Image {
    expected: u64,
    data: Vec<u8>,
    complete: bool,
}

/// A [`FirmwareWriter`] that keeps the image in memory.
///
/// Useful for dry runs and hosts without a flash partition. An optional
/// capacity rejects images that would not fit the real target.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    capacity: Option<u64>,
    image: Mutex<Image>,
}

impl MemoryWriter {
    /// Creates a writer without a size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a writer that refuses images larger than `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            capacity: Some(capacity),
            image: Mutex::default(),
        }
    }

    /// Returns a copy of the bytes written so far.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.image.lock().data.clone()
    }

    /// Returns whether the last image was finished successfully.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.image.lock().complete
    }
}

impl FirmwareWriter for MemoryWriter {
    fn begin(&self, size: u64) -> io::Result<()> {
        if self.capacity.is_some_and(|capacity| size > capacity) {
            return Err(io::Error::new(
                io::ErrorKind::StorageFull,
                format!("image of {size} bytes does not fit"),
            ));
        }
        *self.image.lock() = Image {
            expected: size,
            ..Image::default()
        };
        Ok(())
    }

    fn write(&self, chunk: &[u8]) -> io::Result<()> {
        self.image.lock().data.extend_from_slice(chunk);
        Ok(())
    }

    fn finish(&self) -> io::Result<()> {
        let mut image = self.image.lock();
        let written = image.data.len() as u64;
        if written != image.expected {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("wrote {written} of {} bytes", image.expected),
            ));
        }
        image.complete = true;
        Ok(())
    }

    fn abort(&self) {
        *self.image.lock() = Image::default();
    }
}
