//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Messages**: counts of decoded stream frames by type
//! - **Session**: streaming connection state
//! - **Subscriptions**: active subscription count
//! - **Publications**: order books and tick prices published
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "b2c2_adapter_messages_received_total",
        "Total decoded frames received from the quote stream"
    );
    describe_counter!(
        "b2c2_adapter_frames_unrecognized_total",
        "Total inbound frames dropped as unrecognized"
    );
    describe_counter!(
        "b2c2_adapter_order_books_published_total",
        "Total order books published to the sink"
    );
    describe_counter!(
        "b2c2_adapter_tick_prices_published_total",
        "Total tick prices published to the sink"
    );

    describe_gauge!(
        "b2c2_adapter_session_connected",
        "Whether the streaming session is open (1) or closed (0)"
    );
    describe_gauge!(
        "b2c2_adapter_active_subscriptions",
        "Number of instruments with an installed price handler"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for decoded frame types.
#[derive(Debug, Clone, Copy)]
pub enum MessageType {
    /// Connection announcement with the instrument list.
    Announcement,
    /// Subscribe acknowledgement.
    SubscribeAck,
    /// Unsubscribe acknowledgement.
    UnsubscribeAck,
    /// Price update.
    Price,
}

impl MessageType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Announcement => "tradable_instruments",
            Self::SubscribeAck => "subscribe_ack",
            Self::UnsubscribeAck => "unsubscribe_ack",
            Self::Price => "price",
        }
    }
}

/// Record a decoded frame received from the quote stream.
pub fn record_message_received(msg_type: MessageType) {
    counter!(
        "b2c2_adapter_messages_received_total",
        "message_type" => msg_type.as_str()
    )
    .increment(1);
}

/// Record an inbound frame dropped as unrecognized.
pub fn record_unrecognized_frame() {
    counter!("b2c2_adapter_frames_unrecognized_total").increment(1);
}

/// Record an order book published to the sink.
pub fn record_order_book_published() {
    counter!("b2c2_adapter_order_books_published_total").increment(1);
}

/// Record a tick price published to the sink.
pub fn record_tick_price_published() {
    counter!("b2c2_adapter_tick_prices_published_total").increment(1);
}

/// Update the streaming session state gauge.
pub fn set_session_connected(connected: bool) {
    gauge!("b2c2_adapter_session_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Update the active subscription count.
pub fn set_active_subscriptions(count: f64) {
    gauge!("b2c2_adapter_active_subscriptions").set(count);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_as_str() {
        assert_eq!(MessageType::Announcement.as_str(), "tradable_instruments");
        assert_eq!(MessageType::SubscribeAck.as_str(), "subscribe_ack");
        assert_eq!(MessageType::UnsubscribeAck.as_str(), "unsubscribe_ack");
        assert_eq!(MessageType::Price.as_str(), "price");
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        // Safe to call before init_metrics; the metrics crate falls back
        // to a no-op recorder.
        record_message_received(MessageType::Price);
        record_unrecognized_frame();
        set_session_connected(true);
        set_active_subscriptions(2.0);
    }
}
