#![forbid(unsafe_code)]

//! Options for backend-computed enum fields.
//!
//! A `StatefulComputeEnum` field names a backend method and the key of the
//! option list in its result. The options are fetched with
//! `POST /stateful-compute`, repeated at the poll interval while the backend
//! answers `pending` or `running`.
//!
//! The option list may hold plain scalars, `[value, label]` pairs, or records
//! with `value`/`displayName` (or `simulationId`/`name`) keys.

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use simform_core::{ComputeSource, EnumEntry, ResolvedField, value_text};

use crate::api::ApiClient;
use crate::config::ClientConfig;
use crate::poll::{PollError, PollOutcome, classify};
use crate::retry::RetryPolicy;
use crate::stop::StopSignal;

/// Failure to fetch computed options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputeError {
    /// The computation failed, was cancelled, or could not be reached.
    Poll(PollError),
    /// The finished result has no entry under the expected key.
    MissingResult { result_name: String },
    /// The entry under the expected key is not a usable option list.
    BadOptions { result_name: String, value: String },
}

impl fmt::Display for ComputeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Poll(e) => write!(f, "{e}"),
            Self::MissingResult { result_name } => {
                write!(f, "computation result has no {result_name:?}")
            }
            Self::BadOptions { result_name, value } => {
                write!(f, "{result_name:?} is not an option list: {value}")
            }
        }
    }
}

impl std::error::Error for ComputeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Poll(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PollError> for ComputeError {
    fn from(e: PollError) -> Self {
        Self::Poll(e)
    }
}

/// Fetches the options of one computed enum field.
#[derive(Debug, Clone)]
pub struct ComputedOptionsClient {
    api: ApiClient,
    source: ComputeSource,
    interval: Duration,
    retry: RetryPolicy,
}

impl ComputedOptionsClient {
    /// A client for `source`, polling at the configured interval.
    #[must_use]
    pub fn new(api: ApiClient, config: &ClientConfig, source: ComputeSource) -> Self {
        Self {
            api,
            source,
            interval: config.poll_interval,
            retry: config.retry.clone(),
        }
    }

    /// A client for a bound field, if its type is a computed enum.
    #[must_use]
    pub fn for_field(api: ApiClient, config: &ClientConfig, field: &ResolvedField) -> Option<Self> {
        let source = field.field_type.compute_source()?.clone();
        Some(Self::new(api, config, source))
    }

    /// The computation this client runs.
    #[must_use]
    pub fn source(&self) -> &ComputeSource {
        &self.source
    }

    /// Run the computation for a simulation and return its options.
    ///
    /// Blocks until the backend finishes, fails, or `stop` fires.
    pub fn fetch(&self, simulation_id: &str, stop: &StopSignal) -> Result<Vec<EnumEntry>, ComputeError> {
        let span = tracing::debug_span!("stateful_compute", method = %self.source.method);
        let _guard = span.enter();
        let mut polls = 0u32;
        let result = loop {
            polls += 1;
            let response = self
                .retry
                .run(stop, || self.api.stateful_compute(&self.source.method, simulation_id))
                .map_err(PollError::from)?;
            if response.get("state").is_none() {
                break response;
            }
            match classify(&response)? {
                PollOutcome::Completed(data) => break data,
                PollOutcome::Pending | PollOutcome::Running(_) => {
                    if stop.wait_timeout(self.interval) {
                        return Err(PollError::Cancelled.into());
                    }
                }
            }
        };

        let result_name = &self.source.result_name;
        let Some(raw) = result.get(result_name.as_str()) else {
            return Err(ComputeError::MissingResult {
                result_name: result_name.clone(),
            });
        };
        let options = parse_options(raw).ok_or_else(|| ComputeError::BadOptions {
            result_name: result_name.clone(),
            value: raw.to_string(),
        })?;
        tracing::debug!(polls, options = options.len(), "computed options fetched");
        Ok(options)
    }
}

fn parse_options(raw: &Value) -> Option<Vec<EnumEntry>> {
    raw.as_array()?.iter().map(parse_option).collect()
}

fn parse_option(item: &Value) -> Option<EnumEntry> {
    let text = |v: &Value| value_text(v).map(|t| t.into_owned());
    match item {
        Value::Array(pair) => match pair.as_slice() {
            [value, label] => Some(EnumEntry::new(text(value)?, text(label)?)),
            _ => None,
        },
        Value::Object(record) => {
            let value = record.get("value").or_else(|| record.get("simulationId"))?;
            let value = text(value)?;
            let label = record
                .get("displayName")
                .or_else(|| record.get("name"))
                .and_then(text)
                .unwrap_or_else(|| value.clone());
            Some(EnumEntry::new(value, label))
        }
        scalar => {
            let value = text(scalar)?;
            Some(EnumEntry::new(value.clone(), value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockTransport, Reply};
    use serde_json::json;
    use std::sync::Arc;

    fn client(mock: &Arc<MockTransport>) -> ComputedOptionsClient {
        let config = ClientConfig::default()
            .with_app_name("cebaf")
            .with_poll_interval(Duration::from_millis(1))
            .with_retry(RetryPolicy::none());
        ComputedOptionsClient::new(
            ApiClient::new(Arc::<MockTransport>::clone(mock), "cebaf"),
            &config,
            ComputeSource {
                method: "get_madx_sim_list".into(),
                result_name: "simList".into(),
            },
        )
    }

    #[test]
    fn polls_until_finished_and_reads_records() {
        let mock = Arc::new(MockTransport::new());
        mock.on_post(
            "/stateful-compute",
            [
                Reply::json(json!({ "state": "pending" })),
                Reply::json(json!({
                    "state": "completed",
                    "simList": [
                        { "name": "Injector", "simulationId": "s1", "invalidMsg": null },
                        { "name": "Arc", "simulationId": "s2" }
                    ]
                })),
            ],
        );
        let options = client(&mock).fetch("abc", &StopSignal::never()).unwrap();
        assert_eq!(
            options,
            vec![EnumEntry::new("s1", "Injector"), EnumEntry::new("s2", "Arc")]
        );
        assert_eq!(mock.count("/stateful-compute"), 2);
    }

    #[test]
    fn schema_declared_field_gets_a_client() {
        let schema = simform_core::Schema::from_value(json!({
            "types": {
                "MadxSim": {
                    "base": "StatefulComputeEnum",
                    "config": { "computeMethod": "get_madx_sim_list", "resultName": "simList" }
                }
            },
            "models": {
                "dataFile": {
                    "madxSirepo": { "displayName": "MAD-X Simulation", "type": "MadxSim" },
                    "label": { "displayName": "Label", "type": "String" }
                }
            }
        }))
        .unwrap();
        let collector = simform_core::DependencyCollector::new(Arc::new(schema));
        let api = ApiClient::new(Arc::new(MockTransport::new()), "cebaf");
        let config = ClientConfig::default();

        let field = collector.resolve("dataFile.madxSirepo").unwrap();
        let c = ComputedOptionsClient::for_field(api.clone(), &config, &field).unwrap();
        assert_eq!(c.source().method, "get_madx_sim_list");

        let plain = collector.resolve("dataFile.label").unwrap();
        assert!(ComputedOptionsClient::for_field(api, &config, &plain).is_none());
    }

    #[test]
    fn stateless_response_is_the_result() {
        let mock = Arc::new(MockTransport::new());
        mock.on_post(
            "/stateful-compute",
            [Reply::json(json!({ "simList": ["a", ["b", "Bee"], 3] }))],
        );
        let options = client(&mock).fetch("abc", &StopSignal::never()).unwrap();
        assert_eq!(
            options,
            vec![
                EnumEntry::new("a", "a"),
                EnumEntry::new("b", "Bee"),
                EnumEntry::new("3", "3"),
            ]
        );
    }

    #[test]
    fn missing_or_malformed_result_is_reported() {
        let mock = Arc::new(MockTransport::new());
        mock.on_post(
            "/stateful-compute",
            [
                Reply::json(json!({ "state": "completed" })),
                Reply::json(json!({ "state": "completed", "simList": { "a": 1 } })),
            ],
        );
        let c = client(&mock);
        assert_eq!(
            c.fetch("abc", &StopSignal::never()),
            Err(ComputeError::MissingResult {
                result_name: "simList".into()
            })
        );
        assert!(matches!(
            c.fetch("abc", &StopSignal::never()),
            Err(ComputeError::BadOptions { .. })
        ));
    }

    #[test]
    fn backend_error_and_stop_end_the_fetch() {
        let mock = Arc::new(MockTransport::new());
        mock.on_post(
            "/stateful-compute",
            [Reply::json(json!({ "state": "error", "error": "no lattice" }))],
        );
        assert_eq!(
            client(&mock).fetch("abc", &StopSignal::never()),
            Err(ComputeError::Poll(PollError::BackendError("no lattice".into())))
        );

        let mock = Arc::new(MockTransport::new());
        mock.on_post("/stateful-compute", [Reply::json(json!({ "state": "running" }))]);
        let (signal, trigger) = StopSignal::new();
        trigger.stop();
        assert_eq!(
            client(&mock).fetch("abc", &signal),
            Err(ComputeError::Poll(PollError::Cancelled))
        );
    }
}
