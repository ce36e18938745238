//! Sender-side upload scheduling.
//!
//! Two trailing-edge debounce channels, data and metadata, feed a single
//! upload slot. A new data submission cancels any pending metadata
//! submission. While an upload is in flight nothing else is released; a
//! timer that expires meanwhile fires as soon as the slot frees up.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::Result;
use crate::model::{Converter, Layer, ObjectProperties, TypedObject, WireObject};
use crate::storage::ContentCache;
use super::debounce::Debouncer;
use super::payload::{check_payload_size, compress_json, CompressedBody};
use super::protocol::{DataUpdateBody, MetadataUpdateBody};

/// Objects, layers and name to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSubmission<N> {
    pub objects: Vec<N>,
    pub layers: Vec<Layer>,
    pub name: String,
}

/// Layers and name only.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataSubmission {
    pub layers: Vec<Layer>,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Data,
    Metadata,
}

/// A compressed body cleared for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub kind: UploadKind,
    pub body: CompressedBody,
    pub object_count: usize,
    /// Slots sent as references instead of full objects.
    pub references: usize,
}

pub struct UpdateCoordinator<C: Converter> {
    converter: Arc<C>,
    cache: Arc<ContentCache<TypedObject>>,
    data: Debouncer<DataSubmission<C::Native>>,
    metadata: Debouncer<MetadataSubmission>,
    max_payload: usize,
    in_flight: Option<UploadKind>,
}

impl<C: Converter> UpdateCoordinator<C> {
    pub fn new(
        converter: Arc<C>,
        cache: Arc<ContentCache<TypedObject>>,
        data_interval: Duration,
        metadata_interval: Duration,
        max_payload: usize,
    ) -> Self {
        Self {
            converter,
            cache,
            data: Debouncer::new(data_interval),
            metadata: Debouncer::new(metadata_interval),
            max_payload,
            in_flight: None,
        }
    }

    pub fn submit_data(&mut self, submission: DataSubmission<C::Native>, now: Instant) {
        if self.metadata.cancel().is_some() {
            debug!("pending metadata update superseded by data update");
        }
        self.data.submit(submission, now);
    }

    pub fn submit_metadata(&mut self, submission: MetadataSubmission, now: Instant) {
        self.metadata.submit(submission, now);
    }

    pub fn in_flight(&self) -> Option<UploadKind> {
        self.in_flight
    }

    pub fn has_pending(&self) -> bool {
        self.data.is_pending() || self.metadata.is_pending()
    }

    /// Earliest time [`poll`](Self::poll) may release something. `None`
    /// while an upload is in flight.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.in_flight.is_some() {
            return None;
        }
        match (self.data.deadline(), self.metadata.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Releases the next due upload. An `Err` means the due submission was
    /// dropped without sending (oversized payload); the slot stays free.
    pub fn poll(&mut self, now: Instant) -> Option<Result<Upload>> {
        if self.in_flight.is_some() {
            return None;
        }

        let prepared = if let Some(submission) = self.data.poll(now) {
            self.prepare_data(&submission)
        } else if let Some(submission) = self.metadata.poll(now) {
            self.prepare_metadata(&submission)
        } else {
            return None;
        };

        if let Ok(upload) = &prepared {
            self.in_flight = Some(upload.kind);
        }
        Some(prepared)
    }

    /// Frees the upload slot. Staged objects are promoted only when a data
    /// upload succeeded; otherwise they stay staged.
    pub fn complete(&mut self, kind: UploadKind, succeeded: bool) {
        self.in_flight = None;
        if kind == UploadKind::Data && succeeded {
            let promoted = self.cache.commit();
            debug!(promoted, "committed uploaded objects");
        }
    }

    /// Drops both pending submissions.
    pub fn cancel_all(&mut self) {
        self.data.cancel();
        self.metadata.cancel();
    }

    fn prepare_data(&self, submission: &DataSubmission<C::Native>) -> Result<Upload> {
        let converted = self.converter.convert(&submission.objects);
        let object_properties: Vec<ObjectProperties> =
            self.converter.object_properties(&submission.objects);

        let mut to_stage: Vec<TypedObject> = Vec::new();
        let wire: Vec<WireObject> = converted
            .into_iter()
            .map(|object| match object {
                None => WireObject::Placeholder,
                Some(object) => match object.reference() {
                    None => WireObject::Full(object),
                    Some(reference) if self.cache.is_committed(&reference.hash) => {
                        WireObject::Reference(reference)
                    }
                    Some(_) => {
                        if object.is_heavy() {
                            to_stage.push(object.clone());
                        }
                        WireObject::Full(object)
                    }
                },
            })
            .collect();

        let body = compress_json(&DataUpdateBody {
            objects: &wire,
            object_properties: &object_properties,
            layers: &submission.layers,
            stream_name: &submission.name,
        })?;
        check_payload_size(body.len(), self.max_payload)?;

        for object in to_stage {
            if let Some(hash) = object.hash().map(str::to_string) {
                self.cache.stage(&hash, object);
            }
        }

        let references = wire.iter().filter(|w| w.is_reference()).count();
        info!(
            objects = wire.len(),
            references,
            size = body.len(),
            "data update ready"
        );
        Ok(Upload {
            kind: UploadKind::Data,
            body,
            object_count: wire.len(),
            references,
        })
    }

    fn prepare_metadata(&self, submission: &MetadataSubmission) -> Result<Upload> {
        let body = compress_json(&MetadataUpdateBody {
            layers: &submission.layers,
            stream_name: &submission.name,
        })?;
        check_payload_size(body.len(), self.max_payload)?;
        Ok(Upload {
            kind: UploadKind::Metadata,
            body,
            object_count: 0,
            references: 0,
        })
    }
}
