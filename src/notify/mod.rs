//! Fire-and-forget event notifications.
//!
//! Events post as JSON to a configured webhook from a detached task.
//! Delivery failure is logged and swallowed; the trading pipeline never
//! blocks on or fails from notification delivery.

use crate::config::NotifyConfig;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Events published to the notification channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotifyEvent {
    SessionStart {
        date: String,
        equity: Decimal,
    },
    SessionStop {
        date: String,
        daily_pnl: Decimal,
        trades: u32,
    },
    TradeOpened {
        symbol: String,
        strategy: String,
        direction: String,
        entry_price: Decimal,
        quantity: Decimal,
    },
    TradeClosed {
        symbol: String,
        strategy: String,
        exit_price: Decimal,
        pnl: Decimal,
        reason: String,
    },
    RiskHalt {
        daily_pnl: Decimal,
    },
}

/// Posts events without ever propagating failure.
#[derive(Clone)]
pub struct Notifier {
    http: Client,
    webhook_url: Option<String>,
}

impl Notifier {
    pub fn new(config: &NotifyConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self {
            http,
            webhook_url: config.webhook_url.clone(),
        }
    }

    /// Dispatch an event on a detached task.
    pub fn notify(&self, event: NotifyEvent) {
        let Some(url) = self.webhook_url.clone() else {
            debug!(?event, "Notification skipped (no webhook configured)");
            return;
        };

        let http = self.http.clone();
        tokio::spawn(async move {
            match http.post(&url).json(&event).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(?event, "Notification delivered");
                }
                Ok(response) => {
                    warn!(status = %response.status(), ?event, "Notification rejected");
                }
                Err(e) => {
                    warn!(error = %e, ?event, "Notification delivery failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_notify_posts_event_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::new(&NotifyConfig {
            webhook_url: Some(format!("{}/hook", server.uri())),
        });
        notifier.notify(NotifyEvent::RiskHalt {
            daily_pnl: dec!(-101),
        });

        // Detached delivery: give the spawned task a beat to run
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn test_notify_without_webhook_is_a_no_op() {
        let notifier = Notifier::new(&NotifyConfig { webhook_url: None });
        notifier.notify(NotifyEvent::SessionStart {
            date: "2024-03-04".to_string(),
            equity: dec!(10000),
        });
    }

    #[tokio::test]
    async fn test_delivery_failure_never_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = Notifier::new(&NotifyConfig {
            webhook_url: Some(server.uri()),
        });
        notifier.notify(NotifyEvent::RiskHalt {
            daily_pnl: dec!(-50),
        });
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}
