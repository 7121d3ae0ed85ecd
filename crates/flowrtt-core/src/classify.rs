//! Application-protocol classification.
//!
//! A [`Classifier`] is a registry of named [`Decoder`]s built once at startup
//! and shared by every session. Decoders are tried in registration order and
//! the first one that understands a payload wins.

use std::sync::Arc;

use thiserror::Error;
use time::Duration;

use crate::segment::Timestamp;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("decoder already registered: {name}")]
    Duplicate { name: String },
}

/// Why a decoder rejected a payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload not recognized")]
    NotRecognized,
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Request observed by a decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRequest {
    pub protocol: &'static str,
    pub method: String,
    pub target: String,
    pub host: Option<String>,
    pub seen: Timestamp,
}

/// Response observed by a decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppResponse {
    pub protocol: &'static str,
    pub status: u16,
    pub reason: String,
    pub seen: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationEvent {
    Unknown,
    Request(AppRequest),
    Response(AppResponse),
}

/// A request paired with its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub protocol: &'static str,
    pub method: String,
    pub host: Option<String>,
    pub target: String,
    pub status: u16,
    pub requested_at: Timestamp,
    pub latency: Duration,
}

impl Exchange {
    pub fn compose(request: AppRequest, response: &AppResponse) -> Self {
        Self {
            protocol: request.protocol,
            requested_at: request.seen,
            latency: response.seen - request.seen,
            method: request.method,
            host: request.host,
            target: request.target,
            status: response.status,
        }
    }
}

/// Content decoder for one application protocol.
pub trait Decoder: Send + Sync {
    fn decode(&self, payload: &[u8], seen: Timestamp) -> Result<ClassificationEvent, DecodeError>;

    /// Keep feeding payloads to this decoder after the session is classified.
    fn refines(&self) -> bool {
        false
    }
}

/// Ordered registry of named decoders.
#[derive(Default, Clone)]
pub struct Classifier {
    decoders: Vec<(String, Arc<dyn Decoder>)>,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in decoders (`http`).
    pub fn with_defaults() -> Self {
        let mut classifier = Self::new();
        classifier.decoders.push((
            "http".to_string(),
            Arc::new(crate::protocols::http::HttpDecoder),
        ));
        classifier
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        decoder: Arc<dyn Decoder>,
    ) -> Result<(), ClassifierError> {
        let name = name.into();
        if self.decoders.iter().any(|(existing, _)| *existing == name) {
            return Err(ClassifierError::Duplicate { name });
        }
        self.decoders.push((name, decoder));
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.decoders.iter().map(|(name, _)| name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    pub fn refines(&self, name: &str) -> bool {
        self.get(name).is_some_and(|decoder| decoder.refines())
    }

    /// Try every decoder until one accepts `payload`.
    ///
    /// On success `emit` receives the decoder name and its event and `true`
    /// is returned; when no decoder accepts the payload nothing is emitted.
    pub fn classify<F>(&self, payload: &[u8], seen: Timestamp, mut emit: F) -> bool
    where
        F: FnMut(&str, ClassificationEvent),
    {
        for (name, decoder) in &self.decoders {
            if let Ok(event) = decoder.decode(payload, seen) {
                emit(name, event);
                return true;
            }
        }
        false
    }

    /// Feed `payload` to the decoder registered as `name` only.
    pub fn classify_with<F>(&self, name: &str, payload: &[u8], seen: Timestamp, mut emit: F) -> bool
    where
        F: FnMut(&str, ClassificationEvent),
    {
        match self.get(name).map(|decoder| decoder.decode(payload, seen)) {
            Some(Ok(event)) => {
                emit(name, event);
                true
            }
            _ => false,
        }
    }

    fn get(&self, name: &str) -> Option<&Arc<dyn Decoder>> {
        self.decoders
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, decoder)| decoder)
    }
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
