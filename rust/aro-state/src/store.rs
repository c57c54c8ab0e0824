//! Durable state store for Core entities
//!
//! One sled database with typed key prefixes per entity. Uniqueness
//! invariants (customer phone, appointment external id) are enforced with
//! secondary index keys written in the same operation.

use sled::Db;
use std::path::Path;
use uuid::Uuid;

use crate::error::{StateError, StateResult};
use crate::model::{
    Appointment, Consent, Customer, DeadLetter, ReminderLog, WorkflowInstance,
};

/// State store for Core entities
pub struct StateStore {
    db: Db,
}

impl StateStore {
    /// Open (or create) the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> StateResult<Self> {
        let db = sled::open(path)
            .map_err(|e| StateError::Database(format!("Failed to open database: {}", e)))?;
        Ok(Self { db })
    }

    /// In-memory store for tests
    pub fn temporary() -> StateResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StateError::Database(format!("Failed to open database: {}", e)))?;
        Ok(Self { db })
    }

    fn put<T: serde::Serialize>(&self, key: String, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    fn get<T: serde::de::DeserializeOwned>(&self, key: String) -> StateResult<Option<T>> {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: serde::de::DeserializeOwned>(&self, prefix: &str) -> StateResult<Vec<T>> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    // ---- customers ----

    /// Insert or update a customer; the phone index is kept in step.
    ///
    /// A different customer already holding the phone is a conflict.
    pub fn save_customer(&self, customer: &Customer) -> StateResult<()> {
        let phone_key = format!("customer_phone:{}:{}", customer.tenant_id, customer.phone);
        if let Some(existing) = self.db.get(phone_key.as_bytes())? {
            let existing_id = String::from_utf8_lossy(&existing).to_string();
            if existing_id != customer.id.to_string() {
                return Err(StateError::Conflict(format!(
                    "phone {} already belongs to customer {}",
                    customer.phone, existing_id
                )));
            }
        }
        self.put(format!("customer:{}", customer.id), customer)?;
        self.db
            .insert(phone_key.as_bytes(), customer.id.to_string().as_bytes())?;
        Ok(())
    }

    pub fn customer(&self, id: Uuid) -> StateResult<Option<Customer>> {
        self.get(format!("customer:{}", id))
    }

    pub fn customer_by_phone(&self, tenant_id: &str, phone: &str) -> StateResult<Option<Customer>> {
        let key = format!("customer_phone:{}:{}", tenant_id, phone);
        match self.db.get(key.as_bytes())? {
            Some(id_bytes) => {
                let id = Uuid::parse_str(&String::from_utf8_lossy(&id_bytes))
                    .map_err(|e| StateError::Database(format!("Corrupt phone index: {}", e)))?;
                self.customer(id)
            }
            None => Ok(None),
        }
    }

    /// Customers updated since `since`, for the daily risk recompute
    pub fn customers_updated_since(
        &self,
        since: chrono::DateTime<chrono::Utc>,
    ) -> StateResult<Vec<Customer>> {
        let all: Vec<Customer> = self.scan("customer:")?;
        Ok(all.into_iter().filter(|c| c.updated_at >= since).collect())
    }

    /// Cascade-delete a customer and everything owned by them (privacy op)
    pub fn delete_customer_cascade(&self, id: Uuid) -> StateResult<()> {
        let customer = self
            .customer(id)?
            .ok_or(StateError::NotFound { kind: "customer", id: id.to_string() })?;
        for appt in self.appointments_for_customer(id)? {
            if let Some(external_id) = &appt.external_id {
                self.db.remove(
                    format!("appt_external:{}:{}", appt.tenant_id, external_id).as_bytes(),
                )?;
            }
            self.db.remove(format!("appt:{}", appt.id).as_bytes())?;
            for log in self.reminder_logs(appt.id)? {
                self.db
                    .remove(format!("reminder:{}:{}", appt.id, log.id).as_bytes())?;
            }
            for workflow in self.workflows_for_appointment(appt.id)? {
                self.db
                    .remove(format!("workflow:{}", workflow.id).as_bytes())?;
            }
        }
        self.db.remove(
            format!("customer_phone:{}:{}", customer.tenant_id, customer.phone).as_bytes(),
        )?;
        self.db
            .remove(format!("consent:{}", customer.phone).as_bytes())?;
        self.db.remove(format!("customer:{}", id).as_bytes())?;
        Ok(())
    }

    // ---- appointments ----

    /// Insert or update an appointment; external id index is unique per
    /// tenant+provider id.
    pub fn save_appointment(&self, appt: &Appointment) -> StateResult<()> {
        if let Some(external_id) = &appt.external_id {
            let ext_key = format!("appt_external:{}:{}", appt.tenant_id, external_id);
            if let Some(existing) = self.db.get(ext_key.as_bytes())? {
                let existing_id = String::from_utf8_lossy(&existing).to_string();
                if existing_id != appt.id.to_string() {
                    return Err(StateError::Conflict(format!(
                        "external id {} already mapped to appointment {}",
                        external_id, existing_id
                    )));
                }
            }
            self.db
                .insert(ext_key.as_bytes(), appt.id.to_string().as_bytes())?;
        }
        self.put(format!("appt:{}", appt.id), appt)
    }

    pub fn appointment(&self, id: Uuid) -> StateResult<Option<Appointment>> {
        self.get(format!("appt:{}", id))
    }

    pub fn appointment_by_external_id(
        &self,
        tenant_id: &str,
        external_id: &str,
    ) -> StateResult<Option<Appointment>> {
        let key = format!("appt_external:{}:{}", tenant_id, external_id);
        match self.db.get(key.as_bytes())? {
            Some(id_bytes) => {
                let id = Uuid::parse_str(&String::from_utf8_lossy(&id_bytes))
                    .map_err(|e| StateError::Database(format!("Corrupt external index: {}", e)))?;
                self.appointment(id)
            }
            None => Ok(None),
        }
    }

    pub fn appointments_for_customer(&self, customer_id: Uuid) -> StateResult<Vec<Appointment>> {
        let all: Vec<Appointment> = self.scan("appt:")?;
        Ok(all
            .into_iter()
            .filter(|a| a.customer_id == customer_id)
            .collect())
    }

    // ---- reminder logs ----

    /// Append a reminder log entry; entries are never updated.
    pub fn append_reminder_log(&self, log: &ReminderLog) -> StateResult<()> {
        self.put(format!("reminder:{}:{}", log.appointment_id, log.id), log)
    }

    pub fn reminder_logs(&self, appointment_id: Uuid) -> StateResult<Vec<ReminderLog>> {
        self.scan(&format!("reminder:{}:", appointment_id))
    }

    /// Messages sent to a customer within the rolling window, across all of
    /// their appointments. Used by the outbound message cap.
    pub fn messages_in_window(
        &self,
        customer_id: Uuid,
        window: chrono::Duration,
    ) -> StateResult<usize> {
        let cutoff = chrono::Utc::now() - window;
        let all: Vec<ReminderLog> = self.scan("reminder:")?;
        Ok(all
            .iter()
            .filter(|l| l.customer_id == customer_id && l.sent_at >= cutoff)
            .count())
    }

    // ---- consents ----

    pub fn save_consent(&self, consent: &Consent) -> StateResult<()> {
        self.put(format!("consent:{}", consent.phone), consent)
    }

    pub fn consent(&self, phone: &str) -> StateResult<Option<Consent>> {
        self.get(format!("consent:{}", phone))
    }

    // ---- workflow instances ----

    pub fn save_workflow(&self, instance: &WorkflowInstance) -> StateResult<()> {
        self.put(format!("workflow:{}", instance.id), instance)
    }

    pub fn workflow(&self, id: Uuid) -> StateResult<Option<WorkflowInstance>> {
        self.get(format!("workflow:{}", id))
    }

    pub fn workflows_for_appointment(
        &self,
        appointment_id: Uuid,
    ) -> StateResult<Vec<WorkflowInstance>> {
        let all: Vec<WorkflowInstance> = self.scan("workflow:")?;
        Ok(all
            .into_iter()
            .filter(|w| w.appointment_id == Some(appointment_id))
            .collect())
    }

    // ---- dead letters ----

    pub fn save_dead_letter(&self, letter: &DeadLetter) -> StateResult<()> {
        self.put(format!("dlq:{}", letter.id), letter)
    }

    pub fn dead_letter(&self, id: Uuid) -> StateResult<Option<DeadLetter>> {
        self.get(format!("dlq:{}", id))
    }

    pub fn dead_letters(&self, include_archived: bool) -> StateResult<Vec<DeadLetter>> {
        let all: Vec<DeadLetter> = self.scan("dlq:")?;
        Ok(all
            .into_iter()
            .filter(|d| include_archived || !d.archived)
            .collect())
    }

    pub fn remove_dead_letter(&self, id: Uuid) -> StateResult<()> {
        self.db.remove(format!("dlq:{}", id).as_bytes())?;
        Ok(())
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> StateResult<()> {
        self.db.flush()?;
        Ok(())
    }
}
