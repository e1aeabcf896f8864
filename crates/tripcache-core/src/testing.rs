//! Fixtures shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::clock::Clock;
use crate::error::DataError;
use crate::models::{Booking, Location, OriginDestination, Segment};
use crate::source::{DataSource, Fetched};

pub(crate) const SAMPLE_JSON: &str = r#"{
    "shipReference": "ABCDEF",
    "shipToken": "AAAABBBCCCCDDD",
    "canIssueTicketChecking": false,
    "expiryTime": "1722409261",
    "duration": 2430,
    "segments": [
        {
            "id": 1,
            "originAndDestinationPair": {
                "destination": {"code": "BBB", "displayName": "BBB DisplayName", "url": "www.ship.com"},
                "destinationCity": "AAA",
                "origin": {"code": "AAA", "displayName": "AAA DisplayName", "url": "www.ship.com"},
                "originCity": "BBB"
            }
        }
    ]
}"#;

fn location(code: &str) -> Location {
    Location {
        code: code.to_string(),
        display_name: format!("{} DisplayName", code),
        url: "www.ship.com".to_string(),
    }
}

pub(crate) fn segment(id: i64) -> Segment {
    Segment {
        id,
        pair: OriginDestination {
            origin: location("AAA"),
            origin_city: "BBB".to_string(),
            destination: location("BBB"),
            destination_city: "AAA".to_string(),
        },
    }
}

pub(crate) fn booking(reference: &str, expiry_time: DateTime<Utc>) -> Booking {
    Booking {
        reference: reference.to_string(),
        token: "AAAABBBCCCCDDD".to_string(),
        can_issue_ticket: false,
        expiry_time,
        duration: 2430,
        segments: vec![segment(1)],
    }
}

/// Replays queued responses in order; the last one repeats forever.
/// With a gate, every fetch waits for a permit after being counted.
pub(crate) struct ScriptedSource {
    responses: Mutex<VecDeque<Result<Booking, DataError>>>,
    calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    clock: Arc<dyn Clock>,
}

impl ScriptedSource {
    pub(crate) fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            gate: None,
            clock,
        }
    }

    pub(crate) fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn respond(&self, response: Result<Booking, DataError>) {
        self.responses.lock().push_back(response);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> Option<Result<Booking, DataError>> {
        let mut responses = self.responses.lock();
        if responses.len() > 1 {
            responses.pop_front()
        } else {
            responses.front().cloned()
        }
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    async fn fetch(&self) -> Result<Fetched, DataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| DataError::Network("gate closed".to_string()))?
                .forget();
        }
        match self.next_response() {
            Some(response) => response.map(|booking| Fetched {
                booking,
                fetched_at: self.clock.now(),
            }),
            None => Err(DataError::NotFound("no scripted response".to_string())),
        }
    }
}
