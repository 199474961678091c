// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the firmware worker using wiremock.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use statebridge::config::FirmwareConfig;
use statebridge::error::FirmwareError;
use statebridge::event::{EventBus, Notification};
use statebridge::firmware::{
    DownloadFirmwareService, FirmwareStatus, HttpUpdater, MemoryWriter, NO_UPDATES_MESSAGE,
};
use tokio::sync::broadcast;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Fixture {
    service: DownloadFirmwareService<HttpUpdater>,
    writer: Arc<MemoryWriter>,
    events: broadcast::Receiver<Notification>,
    restarts: Arc<AtomicUsize>,
}

fn fixture(config: &FirmwareConfig) -> Fixture {
    let bus = EventBus::with_capacity(1024);
    let events = bus.subscribe();
    let writer = Arc::new(MemoryWriter::new());
    let updater = HttpUpdater::new(config, writer.clone()).unwrap();
    let restarts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&restarts);
    let service = DownloadFirmwareService::new(
        updater,
        bus,
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        config,
    );
    Fixture {
        service,
        writer,
        events,
        restarts,
    }
}

fn quick_config() -> FirmwareConfig {
    FirmwareConfig::new().with_restart_delay(Duration::ZERO)
}

fn statuses(events: &mut broadcast::Receiver<Notification>) -> Vec<FirmwareStatus> {
    let mut out = Vec::new();
    while let Ok(notification) = events.try_recv() {
        assert_eq!(notification.event, "download_ota");
        out.push(serde_json::from_str(&notification.payload).unwrap());
    }
    out
}

async fn serve_image(server: &MockServer, route: &str, image: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(image))
        .mount(server)
        .await;
}

// ============================================================================
// Successful Updates
// ============================================================================

mod successful_update {
    use super::*;

    #[tokio::test]
    async fn download_reports_progress_finishes_and_restarts() {
        let server = MockServer::start().await;
        let image: Vec<u8> = (0..=255).cycle().take(256 * 1024).collect();
        serve_image(&server, "/firmware.bin", image.clone()).await;

        let mut f = fixture(&quick_config());
        f.service
            .download_update(&json!({ "download_url": format!("{}/firmware.bin", server.uri()) }))
            .unwrap();
        f.service.wait_idle().await;

        let statuses = statuses(&mut f.events);
        assert_eq!(statuses.first(), Some(&FirmwareStatus::Preparing));
        assert_eq!(statuses.last(), Some(&FirmwareStatus::Finished));

        let progress: Vec<u8> = statuses
            .iter()
            .filter_map(|s| match s {
                FirmwareStatus::Progress { progress } => Some(*progress),
                _ => None,
            })
            .collect();
        assert!(!progress.is_empty());
        assert!(progress.windows(2).all(|w| w[0] < w[1]), "{progress:?}");
        assert_eq!(progress.last(), Some(&100));

        assert_eq!(f.writer.data(), image);
        assert!(f.writer.is_complete());
        assert_eq!(f.restarts.load(Ordering::SeqCst), 1);
        assert!(!f.service.is_busy());
    }

    #[tokio::test]
    async fn redirects_are_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", format!("{}/v2/firmware.bin", server.uri())),
            )
            .mount(&server)
            .await;
        serve_image(&server, "/v2/firmware.bin", vec![7_u8; 2048]).await;

        let mut f = fixture(&quick_config());
        f.service
            .download_update(&json!({ "download_url": format!("{}/latest", server.uri()) }))
            .unwrap();
        f.service.wait_idle().await;

        assert_eq!(statuses(&mut f.events).last(), Some(&FirmwareStatus::Finished));
        assert_eq!(f.writer.data().len(), 2048);
        assert_eq!(f.restarts.load(Ordering::SeqCst), 1);
    }
}

// ============================================================================
// Failed Updates
// ============================================================================

mod failed_update {
    use super::*;

    #[tokio::test]
    async fn not_modified_reports_same_version() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let mut f = fixture(&quick_config().with_current_version("1.2.3"));
        f.service
            .download_update(&json!({ "download_url": server.uri() }))
            .unwrap();
        f.service.wait_idle().await;

        assert_eq!(
            statuses(&mut f.events),
            vec![
                FirmwareStatus::Preparing,
                FirmwareStatus::Error {
                    error: NO_UPDATES_MESSAGE.to_string()
                },
            ]
        );
        assert_eq!(f.restarts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_image_reports_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut f = fixture(&quick_config());
        f.service
            .download_update(&json!({ "download_url": format!("{}/missing.bin", server.uri()) }))
            .unwrap();
        f.service.wait_idle().await;

        assert_eq!(
            statuses(&mut f.events),
            vec![
                FirmwareStatus::Preparing,
                FirmwareStatus::Error {
                    error: "HTTP error code: 404".to_string()
                },
            ]
        );
        assert_eq!(f.restarts.load(Ordering::SeqCst), 0);
        assert!(!f.service.is_busy());
    }

    #[tokio::test]
    async fn redirect_loop_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loop"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("Location", format!("{}/loop", server.uri())),
            )
            .mount(&server)
            .await;

        let mut f = fixture(&quick_config().with_redirect_limit(3));
        f.service
            .download_update(&json!({ "download_url": format!("{}/loop", server.uri()) }))
            .unwrap();
        f.service.wait_idle().await;

        let statuses = statuses(&mut f.events);
        assert!(matches!(statuses.last(), Some(FirmwareStatus::Error { .. })));
        assert_eq!(f.restarts.load(Ordering::SeqCst), 0);
    }
}

// ============================================================================
// Request Handling
// ============================================================================

mod request_handling {
    use super::*;

    #[tokio::test]
    async fn second_request_is_busy_while_downloading() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![1_u8; 1024])
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let mut f = fixture(&quick_config());
        let body = json!({ "download_url": format!("{}/firmware.bin", server.uri()) });

        let job = f.service.download_update(&body).unwrap();
        assert_eq!(f.service.active_job(), Some(job));
        assert_eq!(f.service.download_update(&body), Err(FirmwareError::Busy));
        assert_eq!(f.service.reply_status(&body), 409);

        f.service.wait_idle().await;
        let statuses = statuses(&mut f.events);
        let preparing = statuses
            .iter()
            .filter(|s| **s == FirmwareStatus::Preparing)
            .count();
        assert_eq!(preparing, 1);
        assert_eq!(f.restarts.load(Ordering::SeqCst), 1);

        // The slot is free again.
        assert_eq!(f.service.reply_status(&body), 202);
        f.service.wait_idle().await;
        assert_eq!(f.restarts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected_before_any_event() {
        let mut f = fixture(&quick_config());

        assert_eq!(f.service.reply_status(&json!(["not", "an", "object"])), 400);
        assert_eq!(f.service.reply_status(&json!({ "url": "http://x" })), 400);
        assert!(statuses(&mut f.events).is_empty());
        assert!(!f.service.is_busy());
    }
}
