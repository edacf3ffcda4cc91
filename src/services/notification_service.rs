use crate::common::config::PushConfig;
use crate::common::error::ApiResult;
use crate::common::types::PrayerTimings;
use crate::services::push::{
    is_expo_push_token, DeliveryStatus, PushMessage, PushTicket, PushTransport,
};
use crate::storage::push_token::{token_preview, TokenStore};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub const NOTIFICATION_TITLE: &str = "Prayer Timings Updated!";
const NOTIFICATION_CHANNEL: &str = "prayer-timings";

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub chunk_size: usize,
    pub receipt_chunk_size: usize,
    pub receipt_delay: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            receipt_chunk_size: 300,
            receipt_delay: Duration::from_secs(900),
        }
    }
}

impl From<&PushConfig> for DispatchSettings {
    fn from(config: &PushConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            receipt_chunk_size: config.receipt_chunk_size,
            receipt_delay: Duration::from_secs(config.receipt_delay_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    pub sent: usize,
    pub tickets: usize,
}

/// Fans a mosque timing update out to every valid subscribed token,
/// interprets the gateway's synchronous tickets, and schedules the
/// deferred receipt check.
#[derive(Clone)]
pub struct NotificationService {
    tokens: Arc<dyn TokenStore>,
    transport: Arc<dyn PushTransport>,
    settings: DispatchSettings,
}

impl NotificationService {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        transport: Arc<dyn PushTransport>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            tokens,
            transport,
            settings,
        }
    }

    pub async fn dispatch_mosque_update(
        &self,
        mosque_id: &str,
        mosque_name: &str,
        timings: &PrayerTimings,
    ) -> ApiResult<DispatchResult> {
        let subscribers = self.tokens.find_by_mosque(mosque_id).await?;

        if subscribers.is_empty() {
            info!("No subscribers found for mosque {}", mosque_id);
            return Ok(DispatchResult { sent: 0, tickets: 0 });
        }

        info!(
            "Sending notifications to {} subscribers of mosque {}",
            subscribers.len(),
            mosque_id
        );

        // Defensive re-validation: records that drifted into a bad format
        // are retired here instead of poisoning the whole batch.
        let mut recipients = Vec::with_capacity(subscribers.len());
        for record in &subscribers {
            if !is_expo_push_token(&record.token) {
                warn!(
                    "Invalid push token in store: {}",
                    token_preview(&record.token)
                );
                if let Err(e) = self.tokens.mark_invalid(&record.token).await {
                    error!("Error marking token invalid: {}", e);
                }
                continue;
            }
            recipients.push(record.token.clone());
        }

        let data = json!({
            "mosqueId": mosque_id,
            "timings": timings,
            "type": "timing_update",
        });

        let messages: Vec<PushMessage> = recipients
            .iter()
            .map(|token| PushMessage {
                to: token.clone(),
                sound: "default".to_string(),
                title: NOTIFICATION_TITLE.to_string(),
                body: format!(
                    "Assalamualaikum! The prayer timings for {} have been updated.",
                    mosque_name
                ),
                data: data.clone(),
                priority: "high".to_string(),
                channel_id: NOTIFICATION_CHANNEL.to_string(),
            })
            .collect();

        // Chunks go out sequentially. A chunk that the gateway refuses
        // outright loses its tickets; pairing is tracked per accepted
        // chunk so later tickets still line up with their tokens.
        let mut tickets: Vec<PushTicket> = Vec::new();
        let mut ticket_tokens: Vec<String> = Vec::new();

        for (chunk_messages, chunk_tokens) in messages
            .chunks(self.settings.chunk_size)
            .zip(recipients.chunks(self.settings.chunk_size))
        {
            match self.transport.submit(chunk_messages).await {
                Ok(chunk_tickets) => {
                    if chunk_tickets.len() != chunk_messages.len() {
                        warn!(
                            "Gateway returned {} tickets for {} messages",
                            chunk_tickets.len(),
                            chunk_messages.len()
                        );
                    }
                    let paired = chunk_tickets.len().min(chunk_tokens.len());
                    ticket_tokens.extend_from_slice(&chunk_tokens[..paired]);
                    tickets.extend(chunk_tickets);
                }
                Err(e) => {
                    error!("Error sending notification chunk: {}", e);
                }
            }
        }

        self.process_tickets(&tickets, &ticket_tokens).await;
        self.schedule_receipt_check(tickets.clone());

        Ok(DispatchResult {
            sent: messages.len(),
            tickets: tickets.len(),
        })
    }

    /// Synchronous pass over submission tickets. Ticket `i` pairs with
    /// `tokens[i]`. Only a permanently unreachable destination retires
    /// the token; every other error is transient and just logged.
    pub async fn process_tickets(&self, tickets: &[PushTicket], tokens: &[String]) {
        for (ticket, token) in tickets.iter().zip(tokens) {
            if ticket.status == DeliveryStatus::Error {
                error!(
                    "Push notification error for {}: {:?} {:?}",
                    token_preview(token),
                    ticket.message,
                    ticket.details
                );

                if ticket.is_device_not_registered() {
                    if let Err(e) = self.tokens.mark_invalid(token).await {
                        error!("Error marking token invalid: {}", e);
                    }
                }
            }
        }
    }

    /// Deferred pass over delivery receipts. Receipts carry only the
    /// ticket id, not the originating token, so a receipt-level
    /// permanent failure cannot retire the token here; the ticket pass
    /// and the janitor remain the cleanup paths.
    pub async fn check_receipts(&self, tickets: &[PushTicket]) {
        let receipt_ids: Vec<String> = tickets
            .iter()
            .filter(|t| t.status == DeliveryStatus::Ok)
            .filter_map(|t| t.id.clone())
            .collect();

        if receipt_ids.is_empty() {
            return;
        }

        for chunk in receipt_ids.chunks(self.settings.receipt_chunk_size) {
            match self.transport.fetch_receipts(chunk).await {
                Ok(receipts) => {
                    for (receipt_id, receipt) in &receipts {
                        if receipt.status == DeliveryStatus::Error {
                            error!(
                                "Push receipt error for {}: {:?} {:?}",
                                receipt_id, receipt.message, receipt.details
                            );

                            if receipt.is_device_not_registered() {
                                warn!("Device not registered for receipt {}", receipt_id);
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("Error fetching receipts: {}", e);
                }
            }
        }
    }

    /// One-shot deferred check. Not persisted: a restart before the
    /// delay elapses loses the check and the janitor picks up the slack.
    fn schedule_receipt_check(&self, tickets: Vec<PushTicket>) {
        let service = self.clone();
        let delay = self.settings.receipt_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            service.check_receipts(&tickets).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::ApiError;
    use crate::services::push::{PushErrorCode, PushReceipt};
    use crate::storage::memory::MemoryTokenStorage;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use tokio::sync::Notify;
    use tokio::time::Instant;

    fn timings() -> PrayerTimings {
        PrayerTimings {
            fajr: "05:30 AM".to_string(),
            dhuhr: "01:15 PM".to_string(),
            asr: "04:45 PM".to_string(),
            maghrib: "06:50 PM".to_string(),
            isha: "08:10 PM".to_string(),
            jummah: "01:30 PM".to_string(),
        }
    }

    fn ok_ticket(id: &str) -> PushTicket {
        PushTicket {
            status: DeliveryStatus::Ok,
            id: Some(id.to_string()),
            message: None,
            details: None,
        }
    }

    fn error_ticket(code: PushErrorCode) -> PushTicket {
        PushTicket {
            status: DeliveryStatus::Error,
            id: None,
            message: Some("delivery failed".to_string()),
            details: Some(crate::services::push::gateway::PushErrorDetails { error: Some(code) }),
        }
    }

    /// Scripted transport: pops one canned response per submitted chunk;
    /// with no script it acknowledges every message.
    #[derive(Default)]
    struct FakeTransport {
        scripted: Mutex<VecDeque<ApiResult<Vec<PushTicket>>>>,
        submitted: Mutex<Vec<Vec<PushMessage>>>,
        receipt_requests: Mutex<Vec<Vec<String>>>,
        receipts: Mutex<HashMap<String, PushReceipt>>,
        receipt_fetched: Notify,
        started: Mutex<Option<Instant>>,
        receipt_elapsed: Mutex<Option<Duration>>,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self::default()
        }

        fn script(&self, response: ApiResult<Vec<PushTicket>>) {
            self.scripted.lock().unwrap().push_back(response);
        }

        fn mark_started(&self) {
            *self.started.lock().unwrap() = Some(Instant::now());
        }

        fn submitted_chunks(&self) -> Vec<Vec<PushMessage>> {
            self.submitted.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl PushTransport for FakeTransport {
        async fn submit(&self, messages: &[PushMessage]) -> ApiResult<Vec<PushTicket>> {
            self.submitted.lock().unwrap().push(messages.to_vec());

            if let Some(response) = self.scripted.lock().unwrap().pop_front() {
                return response;
            }

            Ok(messages
                .iter()
                .enumerate()
                .map(|(i, _)| ok_ticket(&format!("ticket-{}", i)))
                .collect())
        }

        async fn fetch_receipts(
            &self,
            ids: &[String],
        ) -> ApiResult<HashMap<String, PushReceipt>> {
            self.receipt_requests.lock().unwrap().push(ids.to_vec());

            if let Some(started) = *self.started.lock().unwrap() {
                *self.receipt_elapsed.lock().unwrap() = Some(started.elapsed());
            }
            self.receipt_fetched.notify_one();

            let receipts = self.receipts.lock().unwrap();
            Ok(ids
                .iter()
                .filter_map(|id| receipts.get(id).map(|r| (id.clone(), r.clone())))
                .collect())
        }
    }

    fn setup() -> (NotificationService, Arc<MemoryTokenStorage>, Arc<FakeTransport>) {
        setup_with(DispatchSettings::default())
    }

    fn setup_with(
        settings: DispatchSettings,
    ) -> (NotificationService, Arc<MemoryTokenStorage>, Arc<FakeTransport>) {
        let tokens = Arc::new(MemoryTokenStorage::new());
        let transport = Arc::new(FakeTransport::new());
        let service = NotificationService::new(tokens.clone(), transport.clone(), settings);
        (service, tokens, transport)
    }

    #[tokio::test]
    async fn test_zero_subscribers_is_a_noop() {
        let (service, _tokens, transport) = setup();

        let result = service
            .dispatch_mosque_update("mosque-a", "Al-Noor Mosque", &timings())
            .await
            .unwrap();

        assert_eq!(result, DispatchResult { sent: 0, tickets: 0 });
        assert!(transport.submitted_chunks().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_token_excluded_and_retired() {
        let (service, tokens, transport) = setup();
        tokens.insert(MemoryTokenStorage::record(
            "ExponentPushToken[device-1]",
            &["mosque-a"],
        ));
        tokens.insert(MemoryTokenStorage::record(
            "ExponentPushToken[device-2]",
            &["mosque-a"],
        ));
        tokens.insert(MemoryTokenStorage::record("garbled-token", &["mosque-a"]));

        let result = service
            .dispatch_mosque_update("mosque-a", "Al-Noor Mosque", &timings())
            .await
            .unwrap();

        assert_eq!(result.sent, 2);

        let chunks = transport.submitted_chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 2);
        assert_eq!(chunks[0][0].title, NOTIFICATION_TITLE);
        assert!(chunks[0][0].body.contains("Al-Noor Mosque"));
        assert_eq!(chunks[0][0].data["type"], "timing_update");
        assert_eq!(chunks[0][0].data["mosqueId"], "mosque-a");
        assert_eq!(chunks[0][0].priority, "high");
        assert_eq!(chunks[0][0].channel_id, "prayer-timings");

        // The malformed token is retired without a gateway round trip.
        let garbled = tokens.get("garbled-token").unwrap();
        assert!(!garbled.is_valid);
        assert_eq!(garbled.failure_count, 1);
    }

    #[tokio::test]
    async fn test_only_valid_subscribers_are_targeted() {
        let (service, tokens, transport) = setup();
        tokens.insert(MemoryTokenStorage::record(
            "ExponentPushToken[device-1]",
            &["mosque-a"],
        ));
        tokens.insert(MemoryTokenStorage::record(
            "ExponentPushToken[other]",
            &["mosque-b"],
        ));
        let mut dead = MemoryTokenStorage::record("ExponentPushToken[dead]", &["mosque-a"]);
        dead.is_valid = false;
        tokens.insert(dead);

        let result = service
            .dispatch_mosque_update("mosque-a", "Al-Noor Mosque", &timings())
            .await
            .unwrap();

        assert_eq!(result.sent, 1);
        assert_eq!(
            transport.submitted_chunks()[0][0].to,
            "ExponentPushToken[device-1]"
        );
    }

    #[tokio::test]
    async fn test_permanent_failure_invalidates_exactly_once() {
        let (service, tokens, _transport) = setup();
        tokens.insert(MemoryTokenStorage::record(
            "ExponentPushToken[dead]",
            &["mosque-a"],
        ));
        tokens.insert(MemoryTokenStorage::record(
            "ExponentPushToken[alive]",
            &["mosque-a"],
        ));

        let tickets = vec![
            error_ticket(PushErrorCode::DeviceNotRegistered),
            error_ticket(PushErrorCode::MessageRateExceeded),
        ];
        let targets = vec![
            "ExponentPushToken[dead]".to_string(),
            "ExponentPushToken[alive]".to_string(),
        ];

        service.process_tickets(&tickets, &targets).await;

        let dead = tokens.get("ExponentPushToken[dead]").unwrap();
        assert!(!dead.is_valid);
        assert_eq!(dead.failure_count, 1);

        // Transient errors leave the token alone.
        let alive = tokens.get("ExponentPushToken[alive]").unwrap();
        assert!(alive.is_valid);
        assert_eq!(alive.failure_count, 0);
    }

    #[tokio::test]
    async fn test_ticket_alignment_survives_a_failed_chunk() {
        let settings = DispatchSettings {
            chunk_size: 2,
            ..DispatchSettings::default()
        };
        let (service, tokens, transport) = setup_with(settings);

        // Sorted token order: device-a..device-e.
        for name in ["a", "b", "c", "d", "e"] {
            tokens.insert(MemoryTokenStorage::record(
                &format!("ExponentPushToken[device-{}]", name),
                &["mosque-a"],
            ));
        }

        // Chunk 1 (a, b) accepted, chunk 2 (c, d) refused by the gateway,
        // chunk 3 (e) comes back as permanently unreachable.
        transport.script(Ok(vec![ok_ticket("t-a"), ok_ticket("t-b")]));
        transport.script(Err(ApiError::internal("gateway unreachable")));
        transport.script(Ok(vec![error_ticket(PushErrorCode::DeviceNotRegistered)]));

        let result = service
            .dispatch_mosque_update("mosque-a", "Al-Noor Mosque", &timings())
            .await
            .unwrap();

        assert_eq!(result.sent, 5);
        assert_eq!(result.tickets, 3);
        assert_eq!(transport.submitted_chunks().len(), 3);

        // The failing ticket belonged to device-e; the tokens of the lost
        // chunk must not absorb it.
        assert!(!tokens.get("ExponentPushToken[device-e]").unwrap().is_valid);
        assert!(tokens.get("ExponentPushToken[device-c]").unwrap().is_valid);
        assert!(tokens.get("ExponentPushToken[device-d]").unwrap().is_valid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receipt_check_runs_after_the_configured_delay() {
        let (service, tokens, transport) = setup();
        tokens.insert(MemoryTokenStorage::record(
            "ExponentPushToken[device-1]",
            &["mosque-a"],
        ));
        transport.receipts.lock().unwrap().insert(
            "ticket-0".to_string(),
            PushReceipt {
                status: DeliveryStatus::Error,
                message: Some("device gone".to_string()),
                details: Some(crate::services::push::gateway::PushErrorDetails {
                    error: Some(PushErrorCode::DeviceNotRegistered),
                }),
            },
        );
        transport.mark_started();

        service
            .dispatch_mosque_update("mosque-a", "Al-Noor Mosque", &timings())
            .await
            .unwrap();

        transport.receipt_fetched.notified().await;

        assert_eq!(
            *transport.receipt_elapsed.lock().unwrap(),
            Some(Duration::from_secs(900))
        );
        assert_eq!(
            transport.receipt_requests.lock().unwrap().as_slice(),
            &[vec!["ticket-0".to_string()]]
        );

        // Receipts cannot reach back to the token; it stays valid.
        assert!(tokens.get("ExponentPushToken[device-1]").unwrap().is_valid);
    }

    #[tokio::test]
    async fn test_receipt_check_skips_error_tickets_and_chunks_ids() {
        let settings = DispatchSettings {
            receipt_chunk_size: 2,
            ..DispatchSettings::default()
        };
        let (service, _tokens, transport) = setup_with(settings);

        let tickets = vec![
            ok_ticket("t-1"),
            error_ticket(PushErrorCode::MessageRateExceeded),
            ok_ticket("t-2"),
            ok_ticket("t-3"),
        ];

        service.check_receipts(&tickets).await;

        let requests = transport.receipt_requests.lock().unwrap().clone();
        assert_eq!(
            requests,
            vec![
                vec!["t-1".to_string(), "t-2".to_string()],
                vec!["t-3".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn test_receipt_check_with_no_ok_tickets_is_silent() {
        let (service, _tokens, transport) = setup();

        service
            .check_receipts(&[error_ticket(PushErrorCode::MessageRateExceeded)])
            .await;

        assert!(transport.receipt_requests.lock().unwrap().is_empty());
    }
}
