//! Request/response over the watchdog serial client with a scripted link.

use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use kvmd::infrastructure::serial::mock::MockSerialLink;
use kvmd::infrastructure::serial::watchdog::{WatchdogConfig, WatchdogSerialClient};
use kvmd::infrastructure::serial::SerialError;

fn client(link: &MockSerialLink) -> WatchdogSerialClient {
    WatchdogSerialClient::new(Box::new(link.clone()), WatchdogConfig::default())
}

#[tokio::test(start_paused = true)]
async fn test_boot_order_command_returns_ok_and_closes_link() {
    // Arrange
    let link = MockSerialLink::new();
    link.reply_to("bcfg boot mv 2 0", "OK\r\n");
    let mut client = client(&link);

    // Act
    let response = client.request("bcfg boot mv 2 0").await;

    // Assert
    assert_eq!(assert_ok!(response), "OK");
    assert!(!link.currently_open());
    assert_eq!(link.open_count(), 1);
    assert_eq!(link.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_next_request_reopens_the_link() {
    let link = MockSerialLink::new();
    link.reply_to("ver", "UEFI v2.70\r\n");
    let mut client = client(&link);

    assert_ok!(client.request("ver").await);
    assert_ok!(client.request("ver").await);

    assert_eq!(link.open_count(), 2);
    assert!(!link.currently_open());
}

#[tokio::test(start_paused = true)]
async fn test_default_settle_window_collects_late_output() {
    // Arrange: the reply arrives in two chunks, with heartbeats in between
    let link = MockSerialLink::new();
    link.reply_to("map -r", "FS0: Alias(s):HD0b\r\n");
    let mut client = client(&link);
    let writer = link.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        writer.push_read("Heartbeat\r\nBLK1: Alias(s):\r\n");
    });

    // Act
    let response = assert_ok!(client.request("map -r").await);

    // Assert
    assert!(response.starts_with("FS0: Alias(s):HD0b"));
    assert!(response.ends_with("BLK1: Alias(s):"));
}

#[tokio::test(start_paused = true)]
async fn test_silent_target_is_no_response() {
    let link = MockSerialLink::new();
    let mut client = client(&link);

    let result = client.request("ver").await;

    assert!(matches!(assert_err!(result), SerialError::NoResponse));
    assert!(!link.currently_open());
}
