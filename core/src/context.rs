//! Job context handed to handlers
//!
//! A [`JobContext`] is built by the host once per claimed job and is
//! read-only for the handler. Arguments keep the order in which they
//! arrived so that handlers can log them deterministically.

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::error::JobError;
use crate::types::{JobId, RawJob};

/// Argument mapping of a job, in arrival order, with unique names
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    entries: Vec<(String, JsonValue)>,
}

impl Arguments {
    /// Decode an encoded argument mapping.
    ///
    /// `null` decodes to an empty mapping. Anything other than a JSON object,
    /// or an object repeating a name, is rejected.
    pub fn decode(encoded: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(encoded)
    }

    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn as_slice(&self) -> &[(String, JsonValue)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'de> Deserialize<'de> for Arguments {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ArgumentsVisitor;

        impl<'de> Visitor<'de> for ArgumentsVisitor {
            type Value = Arguments;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of argument names to values")
            }

            fn visit_unit<E: de::Error>(self) -> Result<Arguments, E> {
                Ok(Arguments::default())
            }

            fn visit_map<A>(self, mut map: A) -> Result<Arguments, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut seen = HashSet::new();
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));

                while let Some((name, value)) = map.next_entry::<String, JsonValue>()? {
                    if !seen.insert(name.clone()) {
                        return Err(de::Error::custom(format_args!(
                            "duplicate argument `{}`",
                            name
                        )));
                    }
                    entries.push((name, value));
                }

                Ok(Arguments { entries })
            }
        }

        deserializer.deserialize_any(ArgumentsVisitor)
    }
}

impl<K: Into<String>, V: Into<JsonValue>> FromIterator<(K, V)> for Arguments {
    /// Later entries replace earlier ones with the same name, keeping the
    /// first position.
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut arguments = Arguments::default();
        for (name, value) in iter {
            let name = name.into();
            let value = value.into();
            match arguments.entries.iter_mut().find(|(key, _)| *key == name) {
                Some(entry) => entry.1 = value,
                None => arguments.entries.push((name, value)),
            }
        }
        arguments
    }
}

/// Immutable view of one claimed job
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: JobId,
    handler: String,
    attempt: i32,
    arguments: Arguments,
    service: Arc<ServiceConfig>,
}

impl JobContext {
    pub fn new(
        job_id: impl Into<JobId>,
        handler: impl Into<String>,
        arguments: Arguments,
        service: Arc<ServiceConfig>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            handler: handler.into(),
            attempt: 1,
            arguments,
            service,
        }
    }

    /// Build the context for a claimed job.
    ///
    /// Fails with [`JobError::MalformedJob`] when the argument mapping cannot
    /// be decoded; such a job must not be dispatched.
    pub fn from_raw(raw: RawJob, service: Arc<ServiceConfig>) -> Result<Self, JobError> {
        let arguments = match raw.args.as_deref() {
            None => Arguments::default(),
            Some(encoded) => Arguments::decode(encoded).map_err(|e| JobError::MalformedJob {
                job_id: raw.id.clone(),
                reason: format!("undecodable argument mapping: {}", e),
            })?,
        };

        if raw.handler.trim().is_empty() {
            return Err(JobError::MalformedJob {
                job_id: raw.id,
                reason: "missing handler name".to_string(),
            });
        }

        Ok(Self {
            job_id: raw.id,
            handler: raw.handler,
            attempt: raw.attempt,
            arguments,
            service,
        })
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Name of the handler the job was enqueued for
    pub fn handler(&self) -> &str {
        &self.handler
    }

    /// 1-based attempt counter as reported by the queue
    pub fn attempt(&self) -> i32 {
        self.attempt
    }

    /// Look up one argument; `None` when the job does not carry it
    pub fn argument(&self, name: &str) -> Option<&JsonValue> {
        self.arguments.get(name)
    }

    /// Every argument, in arrival order
    pub fn all_arguments(&self) -> &[(String, JsonValue)] {
        self.arguments.as_slice()
    }

    pub fn service_name(&self) -> &str {
        &self.service.name
    }

    /// Look up a value in the owning service's configuration
    pub fn config_value(&self, name: &str) -> Option<&JsonValue> {
        self.service.get(name)
    }
}
