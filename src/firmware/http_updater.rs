// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP(S) firmware transport.

use std::sync::Arc;

use reqwest::{Client, Response, StatusCode, redirect};

use crate::config::FirmwareConfig;
use crate::error::FirmwareError;

use super::{FirmwareTransport, FirmwareWriter, TransferObserver, TransferOutcome};

/// Downloads firmware images over HTTP(S) and streams them to a
/// [`FirmwareWriter`].
///
/// TLS certificates are verified against the bundled web PKI roots.
/// Redirects are followed up to the configured limit.
///
/// | Server response | Outcome |
/// |---|---|
/// | `200` with `Content-Length` | image written, [`TransferOutcome::Ok`] |
/// | `304 Not Modified` | [`TransferOutcome::NoUpdates`] |
/// | any other status | `Failed("HTTP error code: N")` |
/// | `200` without size | `Failed("server did not report size")` |
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use statebridge::config::FirmwareConfig;
/// use statebridge::firmware::{HttpUpdater, MemoryWriter};
///
/// let config = FirmwareConfig::new().with_current_version("1.0.0");
/// let updater = HttpUpdater::new(&config, Arc::new(MemoryWriter::new()))?;
/// # Ok::<(), statebridge::error::FirmwareError>(())
/// ```
#[derive(Clone)]
pub struct HttpUpdater {
    client: Client,
    writer: Arc<dyn FirmwareWriter>,
    current_version: Option<String>,
}

impl HttpUpdater {
    /// Creates an updater writing images to `writer`.
    ///
    /// # Errors
    ///
    /// Returns [`FirmwareError::Transport`] if the HTTP client cannot be
    /// created.
    pub fn new(
        config: &FirmwareConfig,
        writer: Arc<dyn FirmwareWriter>,
    ) -> Result<Self, FirmwareError> {
        let client = Client::builder()
            .use_rustls_tls()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .redirect(redirect::Policy::limited(config.redirect_limit()))
            .user_agent(config.user_agent())
            .build()
            .map_err(|e| FirmwareError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            writer,
            current_version: config.current_version().map(str::to_string),
        })
    }

    async fn run(
        &self,
        url: &str,
        observer: &mut dyn TransferObserver,
    ) -> Result<TransferOutcome, String> {
        let mut request = self.client.get(url);
        if let Some(version) = &self.current_version {
            request = request.header(FirmwareConfig::VERSION_HEADER, version);
        }
        let mut response = request
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(TransferOutcome::NoUpdates);
        }
        if status != StatusCode::OK {
            return Err(format!("HTTP error code: {}", status.as_u16()));
        }

        let total = match response.content_length() {
            Some(size) if size > 0 => size,
            _ => return Err("server did not report size".to_string()),
        };
        tracing::debug!(url = %response.url(), bytes = total, "Firmware image found");

        self.writer
            .begin(total)
            .map_err(|e| format!("not enough space: {e}"))?;
        if let Err(message) = self.stream(&mut response, total, observer).await {
            self.writer.abort();
            return Err(message);
        }
        observer.on_end();
        Ok(TransferOutcome::Ok)
    }

    async fn stream(
        &self,
        response: &mut Response,
        total: u64,
        observer: &mut dyn TransferObserver,
    ) -> Result<(), String> {
        let mut current: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| format!("download interrupted: {e}"))?
        {
            current = current.saturating_add(chunk.len() as u64);
            if current > total {
                return Err(format!("received more than the reported {total} bytes"));
            }
            self.writer
                .write(&chunk)
                .map_err(|e| format!("write failed: {e}"))?;
            observer.on_progress(current, total);
        }

        if current != total {
            return Err(format!("size mismatch: received {current} of {total} bytes"));
        }
        self.writer
            .finish()
            .map_err(|e| format!("image rejected: {e}"))
    }
}

impl FirmwareTransport for HttpUpdater {
    async fn update(&self, url: &str, observer: &mut dyn TransferObserver) -> TransferOutcome {
        match self.run(url, observer).await {
            Ok(outcome) => outcome,
            Err(message) => TransferOutcome::Failed(message),
        }
    }
}

impl std::fmt::Debug for HttpUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpUpdater")
            .field("current_version", &self.current_version)
            .finish_non_exhaustive()
    }
}
