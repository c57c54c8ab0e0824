//! Core Engine orchestration
//!
//! Owns the durable stores and every state mutation. HTTP handlers stay
//! thin: they authenticate, deserialize, and call one engine operation.
//! All side-effecting work leaves through the command queue (or the
//! synchronous classification dispatch) and comes back as canonical
//! events.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

use aro_adapters::{CalendlyAdapter, NormalizedBooking, NormalizedInboundMessage, StripeAdapter, TwilioAdapter};
use aro_adapters::{ResilientSender, NormalizedPaymentEvent};
use aro_contracts::{
    event_types, validate, Aggregate, CommandEnvelope, CommandHeaders, EventEnvelope,
    ExecutorCommand, ExecutorRunStatus, ProfilePack, ReplayCursor,
};
use aro_resilience::{
    dispatch_backoff, CircuitBreaker, CircuitBreakerConfig, KeyedTokenBucket, ProviderDomain,
    RetryConfig, TokenBucket, TokenBucketConfig,
};
use aro_state::{
    Appointment, AppointmentStatus, CommandQueue, Consent, Customer, DeadLetter, EventLog,
    FallbackQueue, InboundIdempotencyStore, JsonFileStore, ReminderKind, ReminderLog, ReplyIntent,
    StateStore, WorkflowInstance, WorkflowState,
};

use crate::audit::AuditChain;
use crate::classify::{heuristic_intent, intent_from_output};
use crate::config::CoreConfig;
use crate::dispatch::ExecutorDispatch;
use crate::error::{CoreError, CoreResult};
use crate::guardrails::{self, Actor};
use crate::risk::apply_risk;
use crate::triggers::{effective_timezone, ReminderSchedule};

/// Inbound API rate limit: 100 requests per rolling 60 s per source key
const INBOUND_RATE_LIMIT: u32 = 100;
/// Safety bound on entries drained per worker tick
const WORKER_DRAIN_BOUND: usize = 100;
/// Admin tokens live this long
const ADMIN_TOKEN_TTL_MINUTES: i64 = 60;

/// A registered event-stream subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Manual override actions accepted from admins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideAction {
    MarkConfirmed,
    MarkCancelled,
    RetryWorkflow,
}

/// The stateless authority itself (all durable state lives in the stores)
pub struct CoreEngine {
    config: CoreConfig,
    state: StateStore,
    events: EventLog,
    inbound_idempotency: InboundIdempotencyStore,
    queue: CommandQueue,
    fallback: FallbackQueue,
    audit: AuditChain,
    dispatcher: Arc<dyn ExecutorDispatch>,
    breakers: HashMap<ProviderDomain, Arc<CircuitBreaker>>,
    inbound_limiter: KeyedTokenBucket,
    calendly: CalendlyAdapter,
    twilio: TwilioAdapter,
    stripe: StripeAdapter,
    profiles: HashMap<String, ProfilePack>,
    subscriptions_file: JsonFileStore,
    subscriptions: Mutex<HashMap<Uuid, Subscription>>,
    admin_tokens: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl CoreEngine {
    /// Open every store and wire the adapters
    pub fn new(config: CoreConfig, dispatcher: Arc<dyn ExecutorDispatch>) -> CoreResult<Self> {
        let state = StateStore::open(config.state_db_path())?;
        let events = EventLog::open(config.event_log_path())?;
        let inbound_idempotency = InboundIdempotencyStore::open(config.idempotency_db_path())?;
        let queue = CommandQueue::open(&config.command_queue_file)?;
        let fallback = FallbackQueue::open(&config.fallback_queue_file)?;
        let audit = AuditChain::open(&config.audit_log_file)?;

        let mut breakers = HashMap::new();
        for domain in [
            ProviderDomain::Messaging,
            ProviderDomain::Booking,
            ProviderDomain::Payment,
        ] {
            breakers.insert(
                domain,
                Arc::new(CircuitBreaker::new(domain, CircuitBreakerConfig::default())),
            );
        }

        let messaging_sender = ResilientSender::new(
            Arc::new(TokenBucket::new(TokenBucketConfig::per_minute(60))),
            breakers[&ProviderDomain::Messaging].clone(),
            RetryConfig::default(),
        );
        let payment_sender = ResilientSender::new(
            Arc::new(TokenBucket::new(TokenBucketConfig::per_minute(60))),
            breakers[&ProviderDomain::Payment].clone(),
            RetryConfig::default(),
        );

        let subscriptions_file = JsonFileStore::new(&config.subscriptions_file);
        let subscriptions: HashMap<Uuid, Subscription> =
            subscriptions_file.load_or(HashMap::new)?;

        Ok(Self {
            calendly: CalendlyAdapter::new(config.booking_webhook_secret.clone().into_bytes()),
            twilio: TwilioAdapter::new(
                config.messaging_webhook_secret.clone().into_bytes(),
                messaging_sender,
            ),
            stripe: StripeAdapter::new(
                config.payment_webhook_secret.clone().into_bytes(),
                payment_sender,
            ),
            inbound_limiter: KeyedTokenBucket::new(TokenBucketConfig::per_minute(
                INBOUND_RATE_LIMIT,
            )),
            profiles: HashMap::new(),
            subscriptions: Mutex::new(subscriptions),
            admin_tokens: Mutex::new(HashMap::new()),
            config,
            state,
            events,
            inbound_idempotency,
            queue,
            fallback,
            audit,
            dispatcher,
            breakers,
            subscriptions_file,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Install tenant profile packs (additive; Core schemas untouched)
    pub fn with_profiles(mut self, packs: Vec<ProfilePack>) -> Self {
        for pack in packs {
            self.profiles.insert(pack.tenant_id.clone(), pack);
        }
        self
    }

    /// Inbound limiter for the request pipeline
    pub fn inbound_limiter(&self) -> &KeyedTokenBucket {
        &self.inbound_limiter
    }

    pub fn audit_chain(&self) -> &AuditChain {
        &self.audit
    }

    pub fn event_log(&self) -> &EventLog {
        &self.events
    }

    pub fn state_store(&self) -> &StateStore {
        &self.state
    }

    pub fn command_queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn fallback_queue(&self) -> &FallbackQueue {
        &self.fallback
    }

    fn profile(&self, tenant_id: &str) -> ProfilePack {
        self.profiles
            .get(tenant_id)
            .cloned()
            .unwrap_or_else(|| ProfilePack::minimal(tenant_id, "general"))
    }

    fn deposit_threshold(&self, tenant_id: &str) -> u8 {
        self.profile(tenant_id).policies.deposit_threshold
    }

    /// Default message templates; profile packs override by name
    fn template(&self, tenant_id: &str, name: &str) -> String {
        if let Some(body) = self.profile(tenant_id).template(name) {
            return body.to_string();
        }
        match name {
            "reminder_48h" => {
                "Reminder: your {service} appointment is on {date}. Reply YES to confirm.".to_string()
            }
            "reminder_24h" => {
                "See you tomorrow for your {service} appointment at {date}. Reply YES to confirm.".to_string()
            }
            "review_request" => {
                "Thanks for visiting! We would love your feedback on your {service} appointment.".to_string()
            }
            "no_show_recovery" => {
                "We missed you at your last {service} appointment. Reply to rebook.".to_string()
            }
            _ => "{service} appointment update: {date}".to_string(),
        }
    }

    fn render(&self, template: &str, appointment: &Appointment) -> String {
        template
            .replace("{service}", &appointment.service_type)
            .replace("{date}", &appointment.scheduled_at.to_rfc3339())
    }

    // ---- commands ----

    /// `POST /v1/commands`
    pub fn submit_command(
        &self,
        headers: &CommandHeaders,
        envelope: &CommandEnvelope,
    ) -> CoreResult<serde_json::Value> {
        headers
            .validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        envelope
            .validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;

        if let Some(stored) = self
            .inbound_idempotency
            .claim("commands", &headers.idempotency_key)?
        {
            if let Some(response) = stored.response {
                info!(idempotency_key = %headers.idempotency_key, "duplicate command, serving cached response");
                return Ok(response);
            }
        }

        let response = if envelope.is_integration() {
            let command = ExecutorCommand::authorize(
                envelope,
                &headers.tenant_id,
                &headers.correlation_id,
                &self.config.permission_manifest_version,
            );
            if let Err(e) = guardrails::check_outbound_command(&command) {
                self.inbound_idempotency
                    .release("commands", &headers.idempotency_key)?;
                self.audit.append(
                    "system",
                    "guardrail.rejected_command",
                    serde_json::json!({"commandType": envelope.command_type}),
                )?;
                return Err(e);
            }
            let execution_id = command.execution_id;
            self.queue.enqueue(command)?;
            self.append_event(
                EventEnvelope::new(
                    event_types::COMMAND_ACCEPTED,
                    &headers.tenant_id,
                    Aggregate::new("command", execution_id.to_string()),
                    serde_json::json!({
                        "commandType": envelope.command_type,
                        "idempotencyKey": headers.idempotency_key,
                    }),
                    &headers.correlation_id,
                ),
            )?;
            serde_json::json!({
                "status": "accepted",
                "executionId": execution_id,
                "dispatchStatus": "enqueued",
            })
        } else {
            self.append_event(
                EventEnvelope::new(
                    event_types::COMMAND_ACCEPTED,
                    &headers.tenant_id,
                    Aggregate::new("command", &headers.idempotency_key),
                    serde_json::json!({
                        "commandType": envelope.command_type,
                        "idempotencyKey": headers.idempotency_key,
                    }),
                    &headers.correlation_id,
                ),
            )?;
            serde_json::json!({"status": "accepted"})
        };

        self.inbound_idempotency
            .complete("commands", &headers.idempotency_key, response.clone())?;
        Ok(response)
    }

    fn append_event(&self, event: EventEnvelope) -> CoreResult<Option<EventEnvelope>> {
        Ok(self.events.append(event)?)
    }

    // ---- booking webhook ----

    /// `POST /v1/webhooks/booking`
    pub fn ingest_booking(
        &self,
        tenant_id: &str,
        correlation_id: &str,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> CoreResult<serde_json::Value> {
        let booking = if self.config.booking_webhook_secret.is_empty() {
            self.calendly.normalize(raw_body)
        } else {
            self.calendly.handle_webhook(raw_body, signature)
        }
        .map_err(map_adapter_err)?;

        validate::validate_phone(&booking.customer_phone)
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        if booking.appointment_date <= Utc::now() {
            return Err(CoreError::Validation(
                "appointmentDate must be in the future".to_string(),
            ));
        }
        if let Some(minutes) = booking.duration_minutes {
            if !(aro_state::MIN_DURATION_MINUTES..=aro_state::MAX_DURATION_MINUTES)
                .contains(&minutes)
            {
                return Err(CoreError::Validation(format!(
                    "durationMinutes must be within [{}, {}]",
                    aro_state::MIN_DURATION_MINUTES,
                    aro_state::MAX_DURATION_MINUTES
                )));
            }
        }

        if let Some(stored) = self
            .inbound_idempotency
            .claim(CalendlyAdapter::SOURCE, &booking.idempotency_key)?
        {
            if let Some(response) = stored.response {
                info!(external_id = %booking.external_id, "duplicate booking delivery");
                return Ok(response);
            }
        }

        match self.ingest_booking_inner(tenant_id, correlation_id, &booking) {
            Ok(response) => {
                self.inbound_idempotency.complete(
                    CalendlyAdapter::SOURCE,
                    &booking.idempotency_key,
                    response.clone(),
                )?;
                Ok(response)
            }
            Err(e) => {
                // Non-final failure: release so the provider's retry can land
                self.inbound_idempotency
                    .release(CalendlyAdapter::SOURCE, &booking.idempotency_key)?;
                Err(e)
            }
        }
    }

    fn ingest_booking_inner(
        &self,
        tenant_id: &str,
        correlation_id: &str,
        booking: &NormalizedBooking,
    ) -> CoreResult<serde_json::Value> {
        // Customer, created lazily on first booking. Booking with a phone
        // number records messaging consent with method "booking".
        let mut customer = match self
            .state
            .customer_by_phone(tenant_id, &booking.customer_phone)?
        {
            Some(existing) => existing,
            None => {
                let customer = Customer::new(tenant_id, &booking.customer_phone);
                self.state.save_customer(&customer)?;
                self.state.save_consent(&Consent {
                    phone: customer.phone.clone(),
                    customer_id: customer.id,
                    granted: true,
                    granted_at: Some(Utc::now()),
                    method: Some("booking".to_string()),
                    opted_out_at: None,
                    ip: None,
                })?;
                self.audit.append(
                    "system",
                    "consent.granted",
                    serde_json::json!({"customerId": customer.id, "method": "booking"}),
                )?;
                customer
            }
        };
        if customer.email.is_none() {
            customer.email = booking.customer_email.clone();
        }
        if customer.name.is_none() {
            customer.name = booking.customer_name.clone();
        }

        let timezone = effective_timezone(
            booking.timezone.as_deref(),
            customer.timezone.as_deref(),
            self.profile(tenant_id)
                .policies
                .business_timezone
                .as_deref(),
        );

        let existing = self
            .state
            .appointment_by_external_id(tenant_id, &booking.external_id)?;
        let rescheduled = existing.is_some();
        let mut appointment = match existing {
            Some(mut appointment) => {
                if appointment.scheduled_at != booking.appointment_date {
                    // Time triggers are recomputed off the new time below
                    if matches!(
                        appointment.status,
                        AppointmentStatus::Booked | AppointmentStatus::Confirmed
                    ) {
                        appointment.transition(AppointmentStatus::Rescheduled)?;
                        appointment.transition(AppointmentStatus::Booked)?;
                    }
                    appointment.scheduled_at = booking.appointment_date;
                    customer.reschedule_count += 1;
                }
                appointment
            }
            None => {
                customer.total_appointments += 1;
                let now = Utc::now();
                Appointment {
                    id: Uuid::new_v4(),
                    tenant_id: tenant_id.to_string(),
                    customer_id: customer.id,
                    external_id: Some(booking.external_id.clone()),
                    scheduled_at: booking.appointment_date,
                    timezone: timezone.name().to_string(),
                    duration_minutes: booking.duration_minutes.unwrap_or(30),
                    service_type: booking.service_type.clone(),
                    service_cost: booking.service_cost,
                    status: AppointmentStatus::PendingConfirm,
                    status_history: Vec::new(),
                    confirmed: false,
                    confirmed_at: None,
                    confirmation_intent: None,
                    deposit_required: false,
                    deposit_amount: None,
                    deposit_paid: false,
                    deposit_payment_id: None,
                    created_at: now,
                    updated_at: now,
                }
            }
        };

        customer.updated_at = Utc::now();
        let risk = apply_risk(&mut customer, self.deposit_threshold(tenant_id));
        self.state.save_customer(&customer)?;

        let mut dispatched = Vec::new();

        // Deposit gating for high-risk customers
        if risk.requires_deposit && !appointment.deposit_required {
            appointment.deposit_required = true;
            appointment.deposit_amount = booking.service_cost.map(|cost| cost * 0.25);
            let command = ExecutorCommand::authorize(
                &CommandEnvelope {
                    command_type: "integration.stripe.create_payment_link".to_string(),
                    payload: serde_json::json!({
                        "appointmentId": appointment.id,
                        "customerId": customer.id,
                        "amount": appointment.deposit_amount,
                        "to": customer.phone,
                    }),
                },
                tenant_id,
                correlation_id,
                &self.config.permission_manifest_version,
            );
            dispatched.push(serde_json::json!({
                "commandType": command.command_type,
                "executionId": command.execution_id,
                "dispatchStatus": "enqueued",
            }));
            self.queue.enqueue(command)?;
        }

        self.state.save_appointment(&appointment)?;

        let booking_event = self.append_event(
            EventEnvelope::new(
                event_types::BOOKING_RECEIVED,
                tenant_id,
                Aggregate::appointment(appointment.id.to_string()),
                serde_json::json!({
                    "externalId": booking.external_id,
                    "customerId": customer.id,
                    "scheduledAt": appointment.scheduled_at,
                    "serviceType": appointment.service_type,
                    "rescheduled": rescheduled,
                }),
                correlation_id,
            ),
        )?;

        let reminders = ReminderSchedule::for_appointment(appointment.scheduled_at);
        let template = self.template(tenant_id, "reminder_48h");
        let body = self.render(&template, &appointment);
        let command = ExecutorCommand::authorize(
            &CommandEnvelope {
                command_type: "integration.twilio.send_sms".to_string(),
                payload: serde_json::json!({
                    "to": customer.phone,
                    "template": "reminder_48h",
                    "body": body,
                    "appointmentId": appointment.id,
                    "customerId": customer.id,
                    "sendAt": reminders.reminder_48h_at,
                }),
            },
            tenant_id,
            correlation_id,
            &self.config.permission_manifest_version,
        );
        dispatched.push(serde_json::json!({
            "commandType": command.command_type,
            "executionId": command.execution_id,
            "dispatchStatus": "enqueued",
        }));
        self.queue.enqueue(command)?;

        let mut workflow = WorkflowInstance::new(tenant_id, "reminder_sequence", 1);
        workflow.appointment_id = Some(appointment.id);
        workflow.state = WorkflowState::Waiting;
        workflow.data = serde_json::json!({
            "reminder48hAt": reminders.reminder_48h_at,
            "reminder24hAt": reminders.reminder_24h_at,
        });
        self.state.save_workflow(&workflow)?;

        Ok(serde_json::json!({
            "status": "accepted",
            "appointment": {
                "id": appointment.id,
                "status": appointment.status,
                "externalId": appointment.external_id,
                "customerId": customer.id,
                "scheduledAt": appointment.scheduled_at,
                "timezone": appointment.timezone,
                "depositRequired": appointment.deposit_required,
            },
            "reminders": {
                "reminder48hAt": reminders.reminder_48h_at,
                "reminder24hAt": reminders.reminder_24h_at,
            },
            "dispatchedCommands": dispatched,
            "eventId": booking_event.map(|e| e.event_id),
        }))
    }

    // ---- inbound reply webhook ----

    /// `POST /v1/webhooks/inbound-reply`
    ///
    /// The classification dispatch is synchronous: the intent drives the
    /// next transition, so it bypasses the queue. The `reply_classified`
    /// event is appended before any follow-up command is enqueued.
    pub async fn ingest_inbound_reply(
        &self,
        tenant_id: &str,
        correlation_id: &str,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> CoreResult<serde_json::Value> {
        let message = if self.config.messaging_webhook_secret.is_empty() {
            self.twilio.normalize(raw_body)
        } else {
            self.twilio.handle_webhook(raw_body, signature)
        }
        .map_err(map_adapter_err)?;

        if let Some(stored) = self
            .inbound_idempotency
            .claim(TwilioAdapter::SOURCE, &message.idempotency_key)?
        {
            if let Some(response) = stored.response {
                return Ok(response);
            }
        }

        match self
            .ingest_inbound_reply_inner(tenant_id, correlation_id, &message)
            .await
        {
            Ok(response) => {
                self.inbound_idempotency.complete(
                    TwilioAdapter::SOURCE,
                    &message.idempotency_key,
                    response.clone(),
                )?;
                Ok(response)
            }
            Err(e) => {
                self.inbound_idempotency
                    .release(TwilioAdapter::SOURCE, &message.idempotency_key)?;
                Err(e)
            }
        }
    }

    async fn ingest_inbound_reply_inner(
        &self,
        tenant_id: &str,
        correlation_id: &str,
        message: &NormalizedInboundMessage,
    ) -> CoreResult<serde_json::Value> {
        let mut customer = self
            .state
            .customer_by_phone(tenant_id, &message.from_phone)?
            .ok_or_else(|| CoreError::AppointmentNotFound(message.from_phone.clone()))?;

        let mut appointment = self
            .state
            .appointments_for_customer(customer.id)?
            .into_iter()
            .filter(|a| {
                matches!(
                    a.status,
                    AppointmentStatus::PendingConfirm
                        | AppointmentStatus::Booked
                        | AppointmentStatus::Confirmed
                )
            })
            .max_by_key(|a| a.scheduled_at)
            .ok_or_else(|| CoreError::AppointmentNotFound(message.from_phone.clone()))?;

        let inbound_event = self
            .append_event(
                EventEnvelope::new(
                    event_types::INBOUND_REPLY_RECEIVED,
                    tenant_id,
                    Aggregate::appointment(appointment.id.to_string()),
                    serde_json::json!({
                        "from": message.from_phone,
                        "text": message.text,
                        "providerMessageId": message.provider_message_id,
                    }),
                    correlation_id,
                ),
            )?
            .map(|e| e.event_id);

        // Synchronous classification: the result drives the transition
        let classify = ExecutorCommand::authorize(
            &CommandEnvelope {
                command_type: "integration.nlp.classify_reply".to_string(),
                payload: serde_json::json!({
                    "text": message.text,
                    "appointmentId": appointment.id,
                }),
            },
            tenant_id,
            correlation_id,
            &self.config.permission_manifest_version,
        );
        let intent = match self.dispatcher.execute(&classify).await {
            Ok(result) => {
                let parsed = if result.status == ExecutorRunStatus::Succeeded {
                    intent_from_output(&result.payload)
                } else {
                    None
                };
                self.append_event(result.into_envelope())?;
                parsed.unwrap_or_else(|| heuristic_intent(&message.text))
            }
            Err(e) => {
                warn!("classification dispatch failed, falling back to heuristic: {}", e);
                heuristic_intent(&message.text)
            }
        };

        self.append_event(
            EventEnvelope::new(
                event_types::REPLY_CLASSIFIED,
                tenant_id,
                Aggregate::appointment(appointment.id.to_string()),
                serde_json::json!({"intent": intent, "text": message.text}),
                correlation_id,
            )
            .caused_by(
                inbound_event
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
            ),
        )?;

        match intent {
            ReplyIntent::Confirm => {
                appointment.confirm(ReplyIntent::Confirm)?;
                self.state.save_appointment(&appointment)?;
                self.record_confirmation(&mut customer)?;
                self.append_event(
                    EventEnvelope::new(
                        event_types::APPOINTMENT_CONFIRMED,
                        tenant_id,
                        Aggregate::appointment(appointment.id.to_string()),
                        serde_json::json!({"confirmedAt": appointment.confirmed_at}),
                        correlation_id,
                    ),
                )?;
            }
            ReplyIntent::Reschedule => {
                let command = ExecutorCommand::authorize(
                    &CommandEnvelope {
                        command_type: "integration.booking.request_reschedule_link".to_string(),
                        payload: serde_json::json!({
                            "appointmentId": appointment.id,
                            "customerId": customer.id,
                            "to": customer.phone,
                        }),
                    },
                    tenant_id,
                    correlation_id,
                    &self.config.permission_manifest_version,
                );
                self.queue.enqueue(command)?;
            }
            ReplyIntent::Cancel => {
                // No auto-cancel: record the request, a human closes it out
                self.append_event(
                    EventEnvelope::new(
                        event_types::APPOINTMENT_CANCEL_REQUESTED,
                        tenant_id,
                        Aggregate::appointment(appointment.id.to_string()),
                        serde_json::json!({"requestedBy": "customer"}),
                        correlation_id,
                    ),
                )?;
            }
            ReplyIntent::Unknown => {}
        }

        Ok(serde_json::json!({
            "status": "processed",
            "intent": intent,
            "appointmentId": appointment.id,
        }))
    }

    fn record_confirmation(&self, customer: &mut Customer) -> CoreResult<()> {
        let total = customer.total_appointments.max(1) as f64;
        customer.confirmation_rate =
            ((customer.confirmation_rate * (total - 1.0)) + 1.0) / total;
        customer.updated_at = Utc::now();
        apply_risk(customer, self.deposit_threshold(&customer.tenant_id));
        self.state.save_customer(customer)?;
        Ok(())
    }

    // ---- payment webhook ----

    /// `POST /v1/webhooks/payment`
    pub fn ingest_payment(
        &self,
        tenant_id: &str,
        correlation_id: &str,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> CoreResult<serde_json::Value> {
        let payment: NormalizedPaymentEvent = if self.config.payment_webhook_secret.is_empty() {
            self.stripe.normalize(raw_body)
        } else {
            self.stripe.handle_webhook(raw_body, signature)
        }
        .map_err(map_adapter_err)?;

        if let Some(stored) = self
            .inbound_idempotency
            .claim(StripeAdapter::SOURCE, &payment.idempotency_key)?
        {
            if let Some(response) = stored.response {
                return Ok(response);
            }
        }

        self.append_event(
            EventEnvelope::new(
                "payment.received",
                tenant_id,
                Aggregate::new("payment", &payment.payment_id),
                serde_json::json!({
                    "paymentId": payment.payment_id,
                    "status": payment.status,
                    "amount": payment.amount,
                }),
                correlation_id,
            ),
        )?;

        let mut settled_appointment = None;
        if payment.status == "paid" {
            let appointment_id = payment
                .appointment_id
                .as_deref()
                .and_then(|s| Uuid::parse_str(s).ok());
            if let Some(mut appointment) =
                appointment_id.and_then(|id| self.state.appointment(id).ok().flatten())
            {
                appointment.deposit_paid = true;
                appointment.deposit_payment_id = Some(payment.payment_id.clone());
                self.state.save_appointment(&appointment)?;
                settled_appointment = Some(appointment.id);
                self.append_event(
                    EventEnvelope::new(
                        "appointment.deposit_paid",
                        tenant_id,
                        Aggregate::appointment(appointment.id.to_string()),
                        serde_json::json!({"paymentId": payment.payment_id}),
                        correlation_id,
                    ),
                )?;
            }
        }

        let response = serde_json::json!({
            "status": "accepted",
            "paymentId": payment.payment_id,
            "appointmentId": settled_appointment,
        });
        self.inbound_idempotency.complete(
            StripeAdapter::SOURCE,
            &payment.idempotency_key,
            response.clone(),
        )?;
        Ok(response)
    }

    // ---- events & subscriptions ----

    /// `GET /v1/events`
    pub fn events_after(
        &self,
        tenant_id: &str,
        after: Option<u64>,
        limit: Option<usize>,
    ) -> CoreResult<serde_json::Value> {
        let limit = validate::clamp_event_limit(limit);
        let after = ReplayCursor(after.unwrap_or(0));
        let (events, next) = self.events.events_after(tenant_id, after, limit)?;
        Ok(serde_json::json!({
            "events": events,
            "nextCursor": next,
        }))
    }

    /// `POST /v1/subscriptions`
    pub fn create_subscription(
        &self,
        tenant_id: &str,
        callback_url: Option<String>,
    ) -> CoreResult<serde_json::Value> {
        let subscription = Subscription {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            callback_url,
            created_at: Utc::now(),
        };
        let mut subscriptions = self.subscriptions.lock();
        subscriptions.insert(subscription.id, subscription.clone());
        self.subscriptions_file.store(&*subscriptions)?;
        Ok(serde_json::json!({"subscriptionId": subscription.id}))
    }

    /// `POST /v1/subscriptions/{id}/replay`
    pub fn replay_subscription(
        &self,
        subscription_id: Uuid,
        after: Option<u64>,
    ) -> CoreResult<serde_json::Value> {
        let tenant_id = {
            let subscriptions = self.subscriptions.lock();
            subscriptions
                .get(&subscription_id)
                .map(|s| s.tenant_id.clone())
                .ok_or_else(|| {
                    CoreError::Validation(format!("unknown subscription {}", subscription_id))
                })?
        };
        self.events_after(&tenant_id, after, Some(500))
    }

    // ---- admin ----

    /// `POST /v1/admin/auth/token`
    pub fn admin_login(&self, username: &str, password: &str) -> CoreResult<serde_json::Value> {
        let user_ok = bool::from(
            username
                .as_bytes()
                .ct_eq(self.config.admin_username.as_bytes()),
        );
        let pass_ok = bool::from(
            password
                .as_bytes()
                .ct_eq(self.config.admin_password.as_bytes()),
        );
        if !(user_ok && pass_ok) {
            self.audit.append(
                "system",
                "admin.login_failed",
                serde_json::json!({"username": username}),
            )?;
            return Err(CoreError::Unauthorized);
        }
        let token = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + Duration::minutes(ADMIN_TOKEN_TTL_MINUTES);
        self.admin_tokens.lock().insert(token.clone(), expires_at);
        self.audit.append(
            format!("admin:{}", username),
            "admin.login",
            serde_json::json!({}),
        )?;
        Ok(serde_json::json!({"token": token, "expiresAt": expires_at}))
    }

    /// Gate for admin endpoints
    pub fn require_admin(&self, bearer: Option<&str>) -> CoreResult<()> {
        let token = bearer.ok_or(CoreError::Unauthorized)?;
        let tokens = self.admin_tokens.lock();
        match tokens.get(token) {
            Some(expiry) if *expiry > Utc::now() => Ok(()),
            _ => Err(CoreError::Unauthorized),
        }
    }

    /// `GET /v1/admin/audit/logs`
    pub fn audit_logs(&self) -> serde_json::Value {
        serde_json::json!({
            "entries": self.audit.entries(),
            "integrity": self.audit.verify(),
        })
    }

    /// `POST /v1/admin/manual-overrides`
    pub fn manual_override(
        &self,
        admin: &str,
        action: OverrideAction,
        appointment_id: Uuid,
        reason: &str,
    ) -> CoreResult<serde_json::Value> {
        self.audit.append(
            format!("admin:{}", admin),
            "manual_override",
            serde_json::json!({
                "action": action,
                "appointmentId": appointment_id,
                "reason": reason,
            }),
        )?;

        match action {
            OverrideAction::MarkConfirmed => {
                self.apply_transition(appointment_id, AppointmentStatus::Confirmed, Actor::Admin)?;
            }
            OverrideAction::MarkCancelled => {
                self.apply_transition(appointment_id, AppointmentStatus::Cancelled, Actor::Admin)?;
            }
            OverrideAction::RetryWorkflow => {
                let mut retried = 0;
                for letter in self.state.dead_letters(false)? {
                    let matches = letter
                        .command
                        .payload
                        .get("appointmentId")
                        .and_then(|v| v.as_str())
                        .map(|id| id == appointment_id.to_string())
                        .unwrap_or(false);
                    if matches {
                        self.queue.enqueue(letter.command.clone())?;
                        self.state.remove_dead_letter(letter.id)?;
                        retried += 1;
                    }
                }
                for mut workflow in self.state.workflows_for_appointment(appointment_id)? {
                    if workflow.state == WorkflowState::Failed {
                        workflow.state = WorkflowState::Retrying;
                        workflow.updated_at = Utc::now();
                        self.state.save_workflow(&workflow)?;
                    }
                }
                return Ok(serde_json::json!({"status": "ok", "retried": retried}));
            }
        }
        Ok(serde_json::json!({"status": "ok"}))
    }

    /// Transition an appointment with guardrails and trigger follow-ups
    pub fn apply_transition(
        &self,
        appointment_id: Uuid,
        to: AppointmentStatus,
        actor: Actor,
    ) -> CoreResult<Appointment> {
        guardrails::check_transition_actor(to, actor)?;

        let mut appointment = self
            .state
            .appointment(appointment_id)?
            .ok_or_else(|| CoreError::AppointmentNotFound(appointment_id.to_string()))?;
        appointment.transition(to)?;
        if to == AppointmentStatus::Confirmed {
            appointment.confirmed = true;
            appointment.confirmed_at = Some(Utc::now());
        }
        self.state.save_appointment(&appointment)?;

        let correlation_id = Uuid::new_v4().to_string();
        self.append_event(
            EventEnvelope::new(
                format!("appointment.{}", to),
                &appointment.tenant_id,
                Aggregate::appointment(appointment.id.to_string()),
                serde_json::json!({"actor": actor.to_string()}),
                &correlation_id,
            ),
        )?;

        let mut customer = self
            .state
            .customer(appointment.customer_id)?
            .ok_or_else(|| CoreError::Internal("appointment without customer".to_string()))?;

        match to {
            AppointmentStatus::NoShow => {
                customer.no_show_count += 1;
                customer.updated_at = Utc::now();
                let threshold = self.deposit_threshold(&customer.tenant_id);
                apply_risk(&mut customer, threshold);
                self.state.save_customer(&customer)?;
                // Pattern trigger: repeated no-shows start the win-back flow
                if customer.no_show_count >= 2 {
                    self.enqueue_templated_sms(
                        &appointment,
                        &customer,
                        "no_show_recovery",
                        &correlation_id,
                    )?;
                }
            }
            AppointmentStatus::Cancelled => {
                customer.cancel_count += 1;
                customer.updated_at = Utc::now();
                let threshold = self.deposit_threshold(&customer.tenant_id);
                apply_risk(&mut customer, threshold);
                self.state.save_customer(&customer)?;
            }
            AppointmentStatus::Completed => {
                self.enqueue_templated_sms(
                    &appointment,
                    &customer,
                    "review_request",
                    &correlation_id,
                )?;
            }
            _ => {}
        }

        Ok(appointment)
    }

    fn enqueue_templated_sms(
        &self,
        appointment: &Appointment,
        customer: &Customer,
        template_name: &str,
        correlation_id: &str,
    ) -> CoreResult<()> {
        let template = self.template(&appointment.tenant_id, template_name);
        let body = self.render(&template, appointment);
        let command = ExecutorCommand::authorize(
            &CommandEnvelope {
                command_type: "integration.twilio.send_sms".to_string(),
                payload: serde_json::json!({
                    "to": customer.phone,
                    "template": template_name,
                    "body": body,
                    "appointmentId": appointment.id,
                    "customerId": customer.id,
                }),
            },
            &appointment.tenant_id,
            correlation_id,
            &self.config.permission_manifest_version,
        );
        self.queue.enqueue(command)?;
        Ok(())
    }

    // ---- DLQ admin ----

    pub fn dlq_list(&self, include_archived: bool) -> CoreResult<serde_json::Value> {
        Ok(serde_json::json!({
            "entries": self.state.dead_letters(include_archived)?,
        }))
    }

    pub fn dlq_retry(&self, id: Uuid) -> CoreResult<serde_json::Value> {
        let letter = self
            .state
            .dead_letter(id)?
            .ok_or_else(|| CoreError::Validation(format!("unknown dead letter {}", id)))?;
        self.queue.enqueue(letter.command.clone())?;
        self.state.remove_dead_letter(id)?;
        Ok(serde_json::json!({"status": "requeued"}))
    }

    pub fn dlq_archive(&self, id: Uuid) -> CoreResult<serde_json::Value> {
        let mut letter = self
            .state
            .dead_letter(id)?
            .ok_or_else(|| CoreError::Validation(format!("unknown dead letter {}", id)))?;
        letter.archived = true;
        self.state.save_dead_letter(&letter)?;
        Ok(serde_json::json!({"status": "archived"}))
    }

    // ---- privacy ----

    /// `POST /v1/privacy/consent`
    pub fn privacy_consent(
        &self,
        tenant_id: &str,
        phone: &str,
        method: Option<String>,
        ip: Option<String>,
    ) -> CoreResult<serde_json::Value> {
        validate::validate_phone(phone).map_err(|e| CoreError::Validation(e.to_string()))?;
        let customer = self
            .state
            .customer_by_phone(tenant_id, phone)?
            .ok_or_else(|| CoreError::AppointmentNotFound(phone.to_string()))?;
        self.state.save_consent(&Consent {
            phone: phone.to_string(),
            customer_id: customer.id,
            granted: true,
            granted_at: Some(Utc::now()),
            method,
            opted_out_at: None,
            ip,
        })?;
        self.audit.append(
            "system",
            "consent.granted",
            serde_json::json!({"customerId": customer.id}),
        )?;
        Ok(serde_json::json!({"status": "granted"}))
    }

    /// `POST /v1/privacy/opt-out`
    pub fn privacy_opt_out(&self, tenant_id: &str, phone: &str) -> CoreResult<serde_json::Value> {
        validate::validate_phone(phone).map_err(|e| CoreError::Validation(e.to_string()))?;
        let mut consent = match self.state.consent(phone)? {
            Some(consent) => consent,
            None => {
                let customer = self
                    .state
                    .customer_by_phone(tenant_id, phone)?
                    .ok_or_else(|| CoreError::AppointmentNotFound(phone.to_string()))?;
                Consent {
                    phone: phone.to_string(),
                    customer_id: customer.id,
                    granted: false,
                    granted_at: None,
                    method: None,
                    opted_out_at: None,
                    ip: None,
                }
            }
        };
        consent.opted_out_at = Some(Utc::now());
        self.state.save_consent(&consent)?;
        self.audit.append(
            "system",
            "consent.opted_out",
            serde_json::json!({"customerId": consent.customer_id}),
        )?;
        Ok(serde_json::json!({"status": "opted_out"}))
    }

    /// `GET /v1/privacy/export/:id`
    pub fn privacy_export(
        &self,
        tenant_id: &str,
        customer_id: Uuid,
    ) -> CoreResult<serde_json::Value> {
        let customer = self
            .state
            .customer(customer_id)?
            .filter(|c| c.tenant_id == tenant_id)
            .ok_or_else(|| CoreError::AppointmentNotFound(customer_id.to_string()))?;
        let appointments = self.state.appointments_for_customer(customer_id)?;
        let mut reminder_logs = Vec::new();
        let mut events = Vec::new();
        for appointment in &appointments {
            reminder_logs.extend(self.state.reminder_logs(appointment.id)?);
            events.extend(self.events.events_for_aggregate(&appointment.id.to_string())?);
        }
        let consent = self.state.consent(&customer.phone)?;
        self.audit.append(
            "system",
            "privacy.export",
            serde_json::json!({"customerId": customer_id}),
        )?;
        Ok(serde_json::json!({
            "customer": customer,
            "appointments": appointments,
            "reminderLogs": reminder_logs,
            "consent": consent,
            "events": events,
        }))
    }

    /// `DELETE /v1/privacy/delete/:id`
    pub fn privacy_delete(
        &self,
        tenant_id: &str,
        customer_id: Uuid,
    ) -> CoreResult<serde_json::Value> {
        self.state
            .customer(customer_id)?
            .filter(|c| c.tenant_id == tenant_id)
            .ok_or_else(|| CoreError::AppointmentNotFound(customer_id.to_string()))?;
        self.state.delete_customer_cascade(customer_id)?;
        self.audit.append(
            "system",
            "privacy.delete",
            serde_json::json!({"customerId": customer_id}),
        )?;
        Ok(serde_json::json!({"status": "deleted"}))
    }

    // ---- dispatch worker ----

    fn domain_for(command_type: &str) -> Option<ProviderDomain> {
        if command_type.starts_with("integration.twilio.") {
            Some(ProviderDomain::Messaging)
        } else if command_type.starts_with("integration.booking.") {
            Some(ProviderDomain::Booking)
        } else if command_type.starts_with("integration.stripe.") {
            Some(ProviderDomain::Payment)
        } else {
            None
        }
    }

    fn outbound_guardrails(&self, command: &ExecutorCommand) -> CoreResult<()> {
        guardrails::check_outbound_command(command)?;
        if command.command_type.starts_with("integration.twilio.") {
            let to = command
                .payload
                .get("to")
                .and_then(|v| v.as_str())
                .ok_or_else(|| CoreError::Validation("send_sms payload missing 'to'".to_string()))?;
            guardrails::check_consent(self.state.consent(to)?.as_ref())?;
            if let Some(customer_id) = command
                .payload
                .get("customerId")
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            {
                guardrails::check_message_cap(&self.state, customer_id)?;
            }
            if let Some(body) = command.payload.get("body").and_then(|v| v.as_str()) {
                guardrails::check_phi(body)?;
            }
        }
        Ok(())
    }

    fn dead_letter_command(
        &self,
        command: ExecutorCommand,
        attempts: u32,
        reason: &str,
    ) -> CoreResult<()> {
        let tenant_id = command.tenant_id.clone();
        let correlation_id = command.correlation_id.clone();
        let execution_id = command.execution_id;
        let command_type = command.command_type.clone();
        self.state
            .save_dead_letter(&DeadLetter::new(command, reason, attempts))?;
        self.append_event(
            EventEnvelope::new(
                event_types::COMMAND_DISPATCH_DLQ,
                &tenant_id,
                Aggregate::new("command", execution_id.to_string()),
                serde_json::json!({
                    "commandType": command_type,
                    "reason": reason,
                    "attempts": attempts,
                }),
                &correlation_id,
            ),
        )?;
        Ok(())
    }

    /// One worker pass: re-admit due fallback entries, then drain the queue
    pub async fn worker_tick(&self) -> CoreResult<()> {
        let now = Utc::now();
        for entry in self.fallback.drain_due(now)? {
            info!(execution_id = %entry.command.execution_id, "re-admitting deferred send");
            self.queue.enqueue(entry.command)?;
        }

        let due = self.queue.due(now);
        for entry in due.into_iter().take(WORKER_DRAIN_BOUND) {
            let command = entry.command.clone();
            let execution_id = command.execution_id;

            // Guardrails run before any outbound effect; violations are
            // terminal and admin-actionable.
            if let Err(violation) = self.outbound_guardrails(&command) {
                warn!(execution_id = %execution_id, "outbound suppressed: {}", violation);
                self.audit.append(
                    "worker",
                    "guardrail.suppressed_send",
                    serde_json::json!({
                        "executionId": execution_id,
                        "commandType": command.command_type,
                        "reason": violation.to_string(),
                    }),
                )?;
                self.queue.remove(execution_id)?;
                self.dead_letter_command(command, entry.attempts, &violation.to_string())?;
                continue;
            }

            // Circuit breaker per provider domain
            let breaker = Self::domain_for(&command.command_type)
                .and_then(|domain| self.breakers.get(&domain).cloned());
            if let Some(breaker) = &breaker {
                if let Err(retry_after) = breaker.admit().await {
                    if breaker.domain() == ProviderDomain::Messaging {
                        // Outbound messaging falls back rather than burning
                        // retries against an open circuit; admin notified.
                        warn!(execution_id = %execution_id, "messaging circuit open, deferring send");
                        self.queue.remove(execution_id)?;
                        self.fallback.defer(
                            command.clone(),
                            "CIRCUIT_BREAKER_OPEN",
                            now + Duration::from_std(retry_after)
                                .unwrap_or_else(|_| Duration::seconds(60)),
                        )?;
                        self.audit.append(
                            "worker",
                            "fallback.deferred",
                            serde_json::json!({
                                "executionId": execution_id,
                                "retryAfterSecs": retry_after.as_secs(),
                            }),
                        )?;
                    } else {
                        self.queue.mark_failed(
                            execution_id,
                            now + Duration::from_std(retry_after)
                                .unwrap_or_else(|_| Duration::seconds(60)),
                        )?;
                    }
                    continue;
                }
            }

            match self.dispatcher.execute(&command).await {
                Ok(result) => {
                    if let Some(breaker) = &breaker {
                        breaker.record_success().await;
                    }
                    let succeeded = result.status == ExecutorRunStatus::Succeeded;
                    let result_event_id = result.event_id;
                    self.append_event(result.into_envelope())?;

                    if succeeded && command.command_type == "integration.twilio.send_sms" {
                        self.record_message_sent(&command, result_event_id)?;
                    }
                    self.queue.mark_success(execution_id)?;
                }
                Err(e) if e.is_transient() => {
                    if let Some(breaker) = &breaker {
                        breaker.record_failure().await;
                    }
                    let attempts = entry.attempts + 1;
                    if attempts >= self.config.dispatch_worker_max_attempts {
                        warn!(execution_id = %execution_id, attempts, "dispatch exhausted, dead-lettering");
                        self.queue.remove(execution_id)?;
                        self.dead_letter_command(command, attempts, &e.to_string())?;
                    } else {
                        let backoff = dispatch_backoff(attempts);
                        self.queue.mark_failed(
                            execution_id,
                            now + Duration::from_std(backoff)
                                .unwrap_or_else(|_| Duration::seconds(30)),
                        )?;
                    }
                }
                Err(e) => {
                    if let Some(breaker) = &breaker {
                        breaker.record_failure().await;
                    }
                    warn!(execution_id = %execution_id, "terminal dispatch failure: {}", e);
                    self.queue.remove(execution_id)?;
                    self.dead_letter_command(command, entry.attempts + 1, &e.to_string())?;
                }
            }
        }
        Ok(())
    }

    fn record_message_sent(
        &self,
        command: &ExecutorCommand,
        causation_id: Uuid,
    ) -> CoreResult<()> {
        let appointment_id = command
            .payload
            .get("appointmentId")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());
        let customer_id = command
            .payload
            .get("customerId")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());
        let template = command
            .payload
            .get("template")
            .and_then(|v| v.as_str())
            .unwrap_or("custom");

        self.append_event(
            EventEnvelope::new(
                event_types::MESSAGE_SENT,
                &command.tenant_id,
                appointment_id
                    .map(|id| Aggregate::appointment(id.to_string()))
                    .unwrap_or_else(|| {
                        Aggregate::new("command", command.execution_id.to_string())
                    }),
                serde_json::json!({
                    "template": template,
                    "to": command.payload.get("to"),
                }),
                &command.correlation_id,
            )
            .caused_by(causation_id.to_string()),
        )?;

        if let (Some(appointment_id), Some(customer_id)) = (appointment_id, customer_id) {
            let kind = match template {
                "reminder_48h" => ReminderKind::Hours48,
                "reminder_24h" => ReminderKind::Hours24,
                "reminder_6h" => ReminderKind::Hours6,
                _ => ReminderKind::Custom,
            };
            self.state.append_reminder_log(&ReminderLog {
                id: Uuid::new_v4(),
                appointment_id,
                customer_id,
                sent_at: Utc::now(),
                kind,
                channel: "sms".to_string(),
                provider_message_id: None,
                delivered: true,
                read: false,
            })?;
        }
        Ok(())
    }

    // ---- maintenance ----

    /// Daily sweep: recompute risk for recently touched customers
    pub fn recompute_daily_risk(&self) -> CoreResult<usize> {
        let since = Utc::now() - Duration::hours(24);
        let mut updated = 0;
        for mut customer in self.state.customers_updated_since(since)? {
            let threshold = self.deposit_threshold(&customer.tenant_id);
            apply_risk(&mut customer, threshold);
            self.state.save_customer(&customer)?;
            updated += 1;
        }
        Ok(updated)
    }

    /// Readiness probes for `/ready`
    pub fn readiness(&self) -> (bool, serde_json::Value) {
        let state_ok = self.state.flush().is_ok();
        let events_ok = self.events.flush().is_ok();
        let checks = serde_json::json!({
            "stateStore": if state_ok { "up" } else { "down" },
            "eventLog": if events_ok { "up" } else { "down" },
            "commandQueue": "up",
        });
        (state_ok && events_ok, checks)
    }
}

fn map_adapter_err(e: aro_adapters::AdapterError) -> CoreError {
    match e {
        aro_adapters::AdapterError::SignatureInvalid(_) => CoreError::Unauthorized,
        aro_adapters::AdapterError::MalformedPayload(m) => CoreError::Validation(m),
        aro_adapters::AdapterError::Unavailable { retry_after_secs } => CoreError::CircuitOpen {
            domain: "messaging",
            retry_after_secs,
        },
        other => CoreError::Internal(other.to_string()),
    }
}
