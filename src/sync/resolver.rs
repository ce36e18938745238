//! Receiver-side object resolution.
//!
//! Light objects are decoded inline. Heavy objects are taken from the cache
//! or fetched by hash, each unique hash at most once per batch, with several
//! fetches in flight at a time. Results land in pre-allocated slots so the
//! output order is the input order, whatever order fetches finish in.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::api::StreamApi;
use crate::error::SyncError;
use crate::model::{properties_for, Converter, ObjectDescriptor, ObjectProperties};
use crate::storage::ContentCache;

/// One output slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved<N> {
    Object(N),
    /// The slot could not be fetched or decoded. Other slots are unaffected.
    Failed { hash: String, reason: String },
}

impl<N> Resolved<N> {
    pub fn object(&self) -> Option<&N> {
        match self {
            Resolved::Object(object) => Some(object),
            Resolved::Failed { .. } => None,
        }
    }

    pub fn into_object(self) -> Option<N> {
        match self {
            Resolved::Object(object) => Some(object),
            Resolved::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Resolved::Failed { .. })
    }

    /// The failure as a [`SyncError::Resolution`], for hosts that report it.
    pub fn error(&self) -> Option<SyncError> {
        match self {
            Resolved::Object(_) => None,
            Resolved::Failed { hash, reason } => Some(SyncError::Resolution {
                hash: hash.clone(),
                reason: reason.clone(),
            }),
        }
    }
}

struct PendingFetch {
    hash: String,
    form: &'static str,
    indices: Vec<usize>,
}

pub struct ObjectResolver<C: Converter> {
    api: Arc<dyn StreamApi>,
    converter: Arc<C>,
    cache: Arc<ContentCache<C::Native>>,
    concurrency: usize,
}

impl<C: Converter> ObjectResolver<C> {
    pub fn new(
        api: Arc<dyn StreamApi>,
        converter: Arc<C>,
        cache: Arc<ContentCache<C::Native>>,
        concurrency: usize,
    ) -> Self {
        Self {
            api,
            converter,
            cache,
            concurrency: concurrency.max(1),
        }
    }

    pub fn cache(&self) -> &Arc<ContentCache<C::Native>> {
        &self.cache
    }

    /// Resolves every descriptor. The result always has one slot per
    /// descriptor.
    pub async fn resolve(
        &self,
        descriptors: &[ObjectDescriptor],
        properties: &[ObjectProperties],
    ) -> Vec<Resolved<C::Native>> {
        if descriptors.is_empty() {
            return Vec::new();
        }

        let mut slots: Vec<Option<Resolved<C::Native>>> = Vec::with_capacity(descriptors.len());
        slots.resize_with(descriptors.len(), || None);

        let mut pending: Vec<PendingFetch> = Vec::new();
        let mut pending_by_hash: HashMap<String, usize> = HashMap::new();

        for (index, descriptor) in descriptors.iter().enumerate() {
            if !descriptor.is_typed() {
                debug!(index, "skipping untyped object");
                slots[index] = Some(Resolved::Failed {
                    hash: descriptor.hash().unwrap_or_default().to_string(),
                    reason: "object has no type".to_string(),
                });
                continue;
            }

            let hash = match descriptor.hash() {
                Some(hash) if descriptor.is_heavy() => hash,
                _ => {
                    slots[index] = Some(self.decode_inline(descriptor, index, properties));
                    continue;
                }
            };

            if let Some(cached) = self.cache.get(hash) {
                slots[index] = Some(Resolved::Object(cached));
                continue;
            }

            match pending_by_hash.get(hash) {
                Some(&position) => pending[position].indices.push(index),
                None => {
                    pending_by_hash.insert(hash.to_string(), pending.len());
                    pending.push(PendingFetch {
                        hash: hash.to_string(),
                        form: descriptor.fetch_form(),
                        indices: vec![index],
                    });
                }
            }
        }

        debug!(
            total = descriptors.len(),
            fetches = pending.len(),
            "resolving objects"
        );

        let fetched: Vec<_> = stream::iter(pending)
            .map(|fetch| {
                let api = self.api.clone();
                async move {
                    let result = api.get_geometry(&fetch.hash, fetch.form).await;
                    (fetch, result)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (fetch, result) in fetched {
            let object = match result {
                Ok(object) => object,
                Err(e) => {
                    warn!(hash = %fetch.hash, error = %e, "object fetch failed");
                    for index in fetch.indices {
                        slots[index] = Some(Resolved::Failed {
                            hash: fetch.hash.clone(),
                            reason: e.to_string(),
                        });
                    }
                    continue;
                }
            };

            for index in fetch.indices {
                let decoded = self
                    .converter
                    .decode(&object, properties_for(properties, index));
                slots[index] = Some(match decoded {
                    Ok(native) => {
                        self.cache.store(&fetch.hash, native.clone());
                        Resolved::Object(native)
                    }
                    Err(e) => {
                        warn!(hash = %fetch.hash, error = %e, "object decode failed");
                        Resolved::Failed {
                            hash: fetch.hash.clone(),
                            reason: format!("{e:#}"),
                        }
                    }
                });
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| Resolved::Failed {
                    hash: String::new(),
                    reason: "unresolved".to_string(),
                })
            })
            .collect()
    }

    fn decode_inline(
        &self,
        descriptor: &ObjectDescriptor,
        index: usize,
        properties: &[ObjectProperties],
    ) -> Resolved<C::Native> {
        match self
            .converter
            .decode(&descriptor.to_value(), properties_for(properties, index))
        {
            Ok(native) => Resolved::Object(native),
            Err(e) => Resolved::Failed {
                hash: descriptor.hash().unwrap_or_default().to_string(),
                reason: format!("{e:#}"),
            },
        }
    }
}
