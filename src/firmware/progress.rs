// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Progress coalescing for a single firmware job.

/// Turns byte counters into strictly increasing percentages.
///
/// Each job owns its own tracker. A percentage is reported only when it is
/// greater than the last reported one, so observers never see duplicates or
/// regressions. `0` is the starting point and is never reported.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    last: u8,
}

impl ProgressTracker {
    /// Creates a tracker for a new job.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `current` of `total` bytes and returns the percentage to
    /// emit, if any.
    ///
    /// The percentage is `floor(current * 100 / total)`, clamped to 100.
    /// A `total` of zero reports nothing.
    pub fn advance(&mut self, current: u64, total: u64) -> Option<u8> {
        if total == 0 {
            return None;
        }
        let percent = (u128::from(current) * 100 / u128::from(total)).min(100);
        let percent = u8::try_from(percent).unwrap_or(100);
        if percent > self.last {
            self.last = percent;
            Some(percent)
        } else {
            None
        }
    }

    /// Returns the last reported percentage.
    #[must_use]
    pub fn last(&self) -> u8 {
        self.last
    }
}
