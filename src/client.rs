//! High-level Xcom client: the request/response correlation engine and the
//! multi-value batching layer on top of it.
//!
//! # Architecture
//!
//! One client owns one transport. A logical operation serializes its
//! request package, sends it while holding the connection lock, then reads
//! packages off the stream, discarding anything that is not the response to
//! this request, until the matching response arrives or the per-attempt
//! deadline passes. A bounded retry loop wraps each attempt; only the last
//! attempt's failure is surfaced.
//!
//! Concurrent callers are allowed: the connection lock serializes them, so
//! requests are processed strictly FIFO per connection. The lock is not
//! held across retries, so a concurrent `close()` can interleave between
//! attempts.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use voltage_xcom::{TcpTransport, XcomClient, XcomDatapoint, XcomFormat, XcomLevel};
//!
//! #[tokio::main]
//! async fn main() -> voltage_xcom::XcomResult<()> {
//!     // the Moxa gateway connects to us on port 4001
//!     let transport = TcpTransport::accept(4001, Duration::from_secs(30)).await?;
//!     let client = XcomClient::new(transport);
//!
//!     let output_power = XcomDatapoint::new(
//!         3023, "Output power", "xt", XcomLevel::Info, XcomFormat::Float, "kW",
//!     );
//!     let value = client.request_value(&output_power, "XT1").await?;
//!     println!("XT1 output power: {value}");
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::constants::{
    addr, object_id, ObjectType, PropertyId, ServiceId, XcomCategory, MULTI_INFO_REQ_MAX,
    REQUEST_BURST_PAUSE, REQUEST_BURST_SIZE, REQ_RETRIES, REQ_TIMEOUT,
};
use crate::data::MessageRsp;
use crate::datapoints::XcomDatapoint;
use crate::error::{XcomError, XcomResult};
use crate::families::{DeviceSelector, XcomDeviceFamilies};
use crate::messages::{XcomMessage, XcomMessageSet};
use crate::protocol::XcomPackage;
use crate::transport::XcomTransport;
use crate::value::{self, XcomValue};
use crate::values::{XcomValues, XcomValuesItem};

/// Per-connection request statistics, purely observational.
///
/// Two monotonically accumulating histograms: how many retries requests
/// needed before succeeding (or exhausting), and how long individual
/// attempts took, rounded to 0.1s.
#[derive(Debug, Clone, Default)]
pub struct XcomDiagnostics {
    retries: BTreeMap<u32, u64>,
    durations: BTreeMap<u64, u64>,
}

impl XcomDiagnostics {
    fn note_retries(&mut self, retries: u32) {
        *self.retries.entry(retries).or_insert(0) += 1;
    }

    fn note_duration(&mut self, duration: Duration) {
        let deciseconds = (duration.as_millis() as u64 + 50) / 100;
        *self.durations.entry(deciseconds).or_insert(0) += 1;
    }

    /// Histogram of retry counts at completion, keyed by retry count
    pub fn retries(&self) -> &BTreeMap<u32, u64> {
        &self.retries
    }

    /// Histogram of attempt durations, keyed by tenths of a second
    pub fn durations_deciseconds(&self) -> &BTreeMap<u64, u64> {
        &self.durations
    }

    /// Total number of wire attempts, successful or not
    pub fn attempts(&self) -> u64 {
        self.durations.values().sum()
    }
}

/// Generic Xcom client over any [`XcomTransport`]
pub struct XcomClient<T: XcomTransport> {
    transport: Mutex<T>,
    families: Arc<XcomDeviceFamilies>,
    retries: u32,
    request_timeout: Duration,
    src_addr: u32,
    diagnostics: StdMutex<XcomDiagnostics>,
}

impl<T: XcomTransport> XcomClient<T> {
    /// Create a client with its own family lookup tables
    pub fn new(transport: T) -> Self {
        Self::with_families(transport, Arc::new(XcomDeviceFamilies::new()))
    }

    /// Create a client sharing family lookup tables built at startup
    pub fn with_families(transport: T, families: Arc<XcomDeviceFamilies>) -> Self {
        XcomClient {
            transport: Mutex::new(transport),
            families,
            retries: REQ_RETRIES,
            request_timeout: REQ_TIMEOUT,
            src_addr: addr::SOURCE,
            diagnostics: StdMutex::new(XcomDiagnostics::default()),
        }
    }

    /// Override the retry count and per-attempt timeout
    pub fn with_policy(mut self, retries: u32, request_timeout: Duration) -> Self {
        self.retries = retries.max(1);
        self.request_timeout = request_timeout;
        self
    }

    pub fn families(&self) -> &Arc<XcomDeviceFamilies> {
        &self.families
    }

    pub async fn connected(&self) -> bool {
        self.transport.lock().await.is_connected()
    }

    /// Peer description of the underlying transport
    pub async fn peer(&self) -> Option<String> {
        self.transport.lock().await.peer()
    }

    /// Close the connection. Waits for an in-flight attempt to release the
    /// connection lock; a retrying request fails on its next attempt.
    pub async fn close(&self) -> XcomResult<()> {
        self.transport.lock().await.close().await
    }

    /// Snapshot of the per-connection request statistics
    pub fn diagnostics(&self) -> XcomDiagnostics {
        self.diagnostics.lock().expect("diagnostics lock").clone()
    }

    /// Read the current value of a datapoint.
    ///
    /// Parameters are read with UNSAVED_VALUE (the live, possibly not yet
    /// flash-persisted value); infos with VALUE.
    pub async fn request_value(
        &self,
        datapoint: &XcomDatapoint,
        destination: impl Into<DeviceSelector>,
    ) -> XcomResult<XcomValue> {
        let dst_addr = self.resolve_destination(&destination.into())?;

        let property_id = match datapoint.category() {
            XcomCategory::Parameter => PropertyId::UnsavedValue,
            XcomCategory::Info => PropertyId::Value,
        };

        let request = XcomPackage::request(
            ServiceId::Read,
            datapoint.object_type(),
            datapoint.nr,
            property_id,
            Vec::new(),
            self.src_addr,
            dst_addr,
        );

        self.execute(&request, |response| {
            value::unpack(&response.frame.service_data.property_data, datapoint.format)
        })
        .await
    }

    /// Write a parameter's value.
    ///
    /// Writing an INFO-category datapoint is rejected locally; infos are
    /// read-only telemetry and no wire traffic is emitted for them.
    pub async fn update_value(
        &self,
        datapoint: &XcomDatapoint,
        new_value: impl Into<XcomValue>,
        destination: impl Into<DeviceSelector>,
    ) -> XcomResult<()> {
        if datapoint.category() != XcomCategory::Parameter {
            return Err(XcomError::invalid_parameter(format!(
                "Cannot update readonly info {} ({})",
                datapoint.name, datapoint.nr
            )));
        }

        let dst_addr = self.resolve_destination(&destination.into())?;
        let property_data = value::pack(&new_value.into(), datapoint.format)?;

        debug!("Update value {} on addr {dst_addr}", datapoint.nr);

        let request = XcomPackage::request(
            ServiceId::Write,
            ObjectType::Parameter,
            datapoint.nr,
            PropertyId::UnsavedValue,
            property_data,
            self.src_addr,
            dst_addr,
        );

        self.execute(&request, |_| Ok(())).await
    }

    /// Read the installation GUID from the RCC
    pub async fn request_guid(&self) -> XcomResult<uuid::Uuid> {
        let request = XcomPackage::request(
            ServiceId::Read,
            ObjectType::Guid,
            object_id::NONE,
            PropertyId::None,
            Vec::new(),
            self.src_addr,
            addr::RCC,
        );

        self.execute(&request, |response| {
            match value::unpack(
                &response.frame.service_data.property_data,
                crate::value::XcomFormat::Guid,
            )? {
                XcomValue::Guid(guid) => Ok(guid),
                other => Err(XcomError::unpack(format!("Expected GUID, got {other:?}"))),
            }
        })
        .await
    }

    /// Read one pending message from the RCC by its queue index
    pub async fn request_message(
        &self,
        message_index: u32,
        catalog: Option<&XcomMessageSet>,
    ) -> XcomResult<XcomMessage> {
        let request = XcomPackage::request(
            ServiceId::Read,
            ObjectType::Message,
            message_index,
            PropertyId::None,
            Vec::new(),
            self.src_addr,
            addr::RCC,
        );

        let rsp: MessageRsp = self
            .execute(&request, |response| {
                MessageRsp::unpack(&response.frame.service_data.property_data)
            })
            .await?;

        Ok(XcomMessage::from_response(rsp, catalog))
    }

    /// Read up to 76 info datapoints in one multi-info round trip.
    ///
    /// Every item must be INFO category; selectors may be per-device slots,
    /// MASTER, AVERAGE or SUM. The request goes to the RCC, which answers
    /// with one float per item.
    pub async fn request_infos(&self, items: &[XcomValuesItem]) -> XcomResult<XcomValues> {
        if items.is_empty() {
            return Err(XcomError::invalid_parameter("No value items passed"));
        }
        if items.len() > MULTI_INFO_REQ_MAX {
            return Err(XcomError::invalid_parameter(format!(
                "Too many value items passed, maximum is {MULTI_INFO_REQ_MAX} in one request"
            )));
        }
        for item in items {
            if item.datapoint.category() != XcomCategory::Info {
                return Err(XcomError::invalid_parameter(format!(
                    "Invalid datapoint passed to request_infos; must be INFO category. \
                     Violated by datapoint '{}' ({})",
                    item.datapoint.name, item.datapoint.nr
                )));
            }
        }

        let request = XcomPackage::request(
            ServiceId::Read,
            ObjectType::MultiInfo,
            object_id::MULTI_INFO,
            PropertyId::MultiInfo,
            XcomValues::pack_request(items),
            self.src_addr,
            addr::RCC,
        );

        self.execute(&request, |response| {
            XcomValues::unpack_response(&response.frame.service_data.property_data, items)
        })
        .await
    }

    /// Read an arbitrary set of datapoints with the minimum number of wire
    /// round trips.
    ///
    /// Info items addressed by a per-device slot are aggregated into
    /// multi-info batches of up to 76; parameters (and infos that resolve
    /// to no slot) go through the single-item path. All batches are issued
    /// first, then the singles. After every 10 requests the layer pauses
    /// for a second so the retrieval does not starve the gateway's own
    /// periodic uplink traffic.
    ///
    /// Items given as an explicit MASTER/AVERAGE/SUM constant are rejected
    /// up front; those selectors belong to [`Self::request_infos`].
    ///
    /// The result mirrors the input order and identity. Each item carries
    /// `value` or `error`, never both: a timed-out batch marks its items
    /// failed without one-by-one retries (those would time out identically),
    /// while any other batch failure re-queues the items into the
    /// single-item path.
    pub async fn request_values(&self, items: Vec<XcomValuesItem>) -> XcomResult<XcomValues> {
        // partition into batchable and single-item indexes
        let mut multi: Vec<usize> = Vec::new();
        let mut singles: Vec<usize> = Vec::new();

        for (index, item) in items.iter().enumerate() {
            if item.datapoint.category() == XcomCategory::Info {
                if let DeviceSelector::Aggregation(aggr) = &item.selector {
                    if !aggr.is_device_slot() {
                        return Err(XcomError::invalid_parameter(format!(
                            "Aggregation selector {aggr} is only valid in request_infos \
                             (datapoint {})",
                            item.datapoint.nr
                        )));
                    }
                }
                if item.aggregation.is_device_slot() {
                    multi.push(index);
                    continue;
                }
            }
            singles.push(index);
        }

        let mut results = items;
        let mut flags = None;
        let mut datetime = None;
        let mut issued = 0usize;

        // all multi-info batches first
        for chunk in multi.chunks(MULTI_INFO_REQ_MAX) {
            let batch: Vec<XcomValuesItem> =
                chunk.iter().map(|&index| results[index].clone()).collect();

            issued += 1;
            match self.request_infos(&batch).await {
                Ok(response) => {
                    flags = response.flags.or(flags);
                    datetime = response.datetime.or(datetime);

                    for rsp_item in response.items {
                        let slot = chunk.iter().copied().find(|&index| {
                            results[index].datapoint.nr == rsp_item.datapoint.nr
                                && results[index].value.is_none()
                        });
                        if let Some(index) = slot {
                            results[index].value = rsp_item.value;
                            results[index].error = None;
                        }
                    }
                    for &index in chunk {
                        if results[index].value.is_none() {
                            results[index].error =
                                Some("No value in multi-info response".to_string());
                        }
                    }
                }
                Err(err) if err.is_timeout() => {
                    // one-by-one retries would time out just the same
                    debug!("Multi-info batch timed out: {err}");
                    for &index in chunk {
                        results[index].error = Some(err.to_string());
                    }
                }
                Err(err) => {
                    // e.g. service unsupported on old firmware; fall back to
                    // individual requests
                    warn!("Multi-info batch failed, falling back to single requests: {err}");
                    singles.extend_from_slice(chunk);
                }
            }

            if issued % REQUEST_BURST_SIZE == 0 {
                sleep(REQUEST_BURST_PAUSE).await;
            }
        }

        // then the single-item path
        for index in singles {
            let outcome = match results[index].address {
                Some(address) => {
                    issued += 1;
                    self.request_value(&results[index].datapoint, address).await
                }
                None => Err(XcomError::invalid_parameter(format!(
                    "Item {} ({}) resolves to no device address",
                    results[index].datapoint.nr,
                    results[index].target_name()
                ))),
            };

            match outcome {
                Ok(value) => {
                    results[index].value = Some(value);
                    results[index].error = None;
                }
                Err(err) => {
                    results[index].value = None;
                    results[index].error = Some(err.to_string());
                }
            }

            if issued % REQUEST_BURST_SIZE == 0 {
                sleep(REQUEST_BURST_PAUSE).await;
            }
        }

        Ok(XcomValues {
            items: results,
            flags,
            datetime,
        })
    }

    /// Resolve a destination into a raw bus address. Aggregation selectors
    /// have no single address and are rejected here.
    fn resolve_destination(&self, destination: &DeviceSelector) -> XcomResult<u32> {
        match destination {
            DeviceSelector::Code(code) => self.families.address_by_code(code),
            DeviceSelector::Address(address) => Ok(*address),
            DeviceSelector::Aggregation(aggr) => Err(XcomError::invalid_parameter(format!(
                "Aggregation selector {aggr} is not a destination address"
            ))),
        }
    }

    /// Bounded retry wrapper around one request/response exchange.
    ///
    /// Error responses and decode failures are retried alongside transport
    /// failures; the gateway is documented to produce transient busy errors
    /// and occasional bad byte lengths. Diagnostics accumulate after every
    /// attempt; only the last failure is surfaced.
    async fn execute<R, F>(&self, request: &XcomPackage, decode: F) -> XcomResult<R>
    where
        F: Fn(&XcomPackage) -> XcomResult<R>,
    {
        let mut last_error: Option<XcomError> = None;

        for attempt in 0..self.retries {
            let started = Instant::now();

            let outcome = async {
                let response = self.send_once(request).await?;
                if response.is_error() {
                    return Err(XcomError::response_is_error(response.error_code()?));
                }
                // decode inside the attempt: bad byte lengths are transient
                decode(&response)
            }
            .await;

            {
                let mut diag = self.diagnostics.lock().expect("diagnostics lock");
                diag.note_duration(started.elapsed());
                if outcome.is_ok() {
                    diag.note_retries(attempt);
                }
            }

            match outcome {
                Ok(result) => return Ok(result),
                Err(err) => {
                    debug!(
                        "Attempt {}/{} for object {} failed: {err}",
                        attempt + 1,
                        self.retries,
                        request.frame.service_data.object_id
                    );
                    last_error = Some(err);
                }
            }
        }

        self.diagnostics
            .lock()
            .expect("diagnostics lock")
            .note_retries(self.retries);

        Err(last_error
            .unwrap_or_else(|| XcomError::timeout("waiting for response", self.request_timeout)))
    }

    /// One attempt: send the request and read packages until the matching
    /// response arrives or the deadline passes. The connection lock is held
    /// for the whole attempt so concurrent requests cannot interleave their
    /// wire traffic.
    async fn send_once(&self, request: &XcomPackage) -> XcomResult<XcomPackage> {
        let mut transport = self.transport.lock().await;

        if !transport.is_connected() {
            return Err(XcomError::connection("No gateway connection"));
        }

        transport.send(request).await?;

        let read_until_match = async {
            loop {
                let response = transport
                    .receive()
                    .await
                    .map_err(|e| XcomError::read(format!("While receiving response: {e}")))?;

                if response.is_response() && response.matches_request(request) {
                    return Ok(response);
                }

                // unrelated traffic on the shared bus
                debug!("Discarding non-matching package: {response}");
            }
        };

        match timeout(self.request_timeout, read_until_match).await {
            Ok(result) => result,
            Err(_) => Err(XcomError::timeout(
                "listening for response package",
                self.request_timeout,
            )),
        }
    }
}
