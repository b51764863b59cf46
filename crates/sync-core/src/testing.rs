//! In-memory source and store doubles for unit tests

use crate::models::Record;
use crate::source::{PageRequest, RecordSource};
use crate::store::{RecordStore, UpsertCounts};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Something that goes wrong on one call
#[derive(Debug, Clone)]
pub enum Fault {
    /// Never answers within any sane timeout
    Hang,
    Fail(String),
}

pub fn order(id: u64) -> Record {
    Record::from_value(json!({
        "id": id,
        "order_number": format!("SO-{:05}", id),
        "date_ordered": "2024-03-01T09:30:00Z",
        "status": "shipped",
    }))
    .expect("object literal")
}

pub fn orders(count: u64) -> Vec<Record> {
    (1..=count).map(order).collect()
}

#[derive(Default)]
pub struct MockSource {
    records: Vec<Record>,
    faults: Mutex<HashMap<u32, VecDeque<Fault>>>,
    requests: Mutex<Vec<PageRequest>>,
    gate: Option<Arc<Semaphore>>,
    unhealthy: Option<String>,
}

impl MockSource {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            ..Default::default()
        }
    }

    /// Queue a fault for the next request of `page`
    pub fn fault(self, page: u32, fault: Fault) -> Self {
        self.faults
            .lock()
            .unwrap()
            .entry(page)
            .or_default()
            .push_back(fault);
        self
    }

    /// Block every request until the semaphore hands out a permit
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn unhealthy(mut self, message: &str) -> Self {
        self.unhealthy = Some(message.to_string());
        self
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requested_pages(&self) -> Vec<u32> {
        self.requests().iter().map(|r| r.page).collect()
    }
}

#[async_trait]
impl RecordSource for MockSource {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Record>> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }

        let fault = self
            .faults
            .lock()
            .unwrap()
            .get_mut(&request.page)
            .and_then(VecDeque::pop_front);
        match fault {
            Some(Fault::Hang) => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                anyhow::bail!("hung request finished")
            }
            Some(Fault::Fail(message)) => anyhow::bail!(message),
            None => {}
        }

        let start = (request.page.max(1) as usize - 1) * request.page_size;
        Ok(self
            .records
            .iter()
            .skip(start)
            .take(request.page_size)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<()> {
        match &self.unhealthy {
            Some(message) => anyhow::bail!(message.clone()),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<String, Record>>,
    faults: Mutex<VecDeque<Fault>>,
    calls: Mutex<usize>,
    delete_gate: Option<Arc<Semaphore>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fault for the next upsert call
    pub fn fault(self, fault: Fault) -> Self {
        self.faults.lock().unwrap().push_back(fault);
        self
    }

    /// Block deletes until the semaphore hands out a permit
    pub fn gated_deletes(mut self, gate: Arc<Semaphore>) -> Self {
        self.delete_gate = Some(gate);
        self
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        self.rows.lock().unwrap().get(id).cloned()
    }

    pub fn upsert_calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert_many(&self, records: &[Record]) -> Result<UpsertCounts> {
        *self.calls.lock().unwrap() += 1;

        let fault = self.faults.lock().unwrap().pop_front();
        match fault {
            Some(Fault::Hang) => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                anyhow::bail!("hung write finished")
            }
            Some(Fault::Fail(message)) => anyhow::bail!(message),
            None => {}
        }

        let mut rows = self.rows.lock().unwrap();
        let mut counts = UpsertCounts::default();
        for record in records {
            match record.key("id") {
                Some(id) => {
                    rows.insert(id, record.clone());
                    counts.written += 1;
                }
                None => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        if let Some(gate) = &self.delete_gate {
            gate.acquire().await?.forget();
        }
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|_, record| {
            record
                .get("date_ordered")
                .and_then(|v| v.as_str())
                .and_then(crate::models::parse_timestamp)
                .map_or(true, |ts| ts >= cutoff)
        });
        Ok((before - rows.len()) as u64)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
