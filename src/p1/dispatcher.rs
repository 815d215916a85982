use super::error::ParseError;
use super::reader::P1Reader;
use super::telegram::{parse_telegram, TelegramRecord};
use crate::error::{GatewayError, GatewayResult};
use log::{info, warn};

/// Bytes read per call to [`ByteSource::read_available`].
const READ_CHUNK: usize = 64;

/// Serial line carrying the meter's telegrams.
pub trait ByteSource {
    /// Copies whatever has arrived into `buf` without waiting; returns the count.
    fn read_available(&mut self, buf: &mut [u8]) -> usize;

    /// Drives the P1 data-request line.
    fn set_request(&mut self, active: bool);
}

/// Receiver of parsed telegrams.
pub trait RecordHandler {
    fn on_record(&mut self, record: &TelegramRecord);
}

impl<F> RecordHandler for F
where
    F: FnMut(&TelegramRecord),
{
    fn on_record(&mut self, record: &TelegramRecord) {
        self(record)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub parsed: u32,
    pub failed: u32,
}

/// Pulls bytes from a [`ByteSource`], frames and parses them, and hands
/// every good record to the registered handler.
///
/// Reading is on demand: bytes that arrive while no read is pending are
/// discarded, and [`trigger_read`](Self::trigger_read) lets exactly one
/// checksum-valid frame through. Frames that fail their checksum keep the
/// read pending. A frame that fails to parse is counted and logged and
/// ends the read; the next read is processed normally. The very first
/// telegram after power-up commonly fails with a duplicate-field error and
/// is skipped the same way.
pub struct TelegramDispatcher<S> {
    source: S,
    reader: P1Reader,
    handler: Option<Box<dyn RecordHandler>>,
    initialized: bool,
    read_pending: bool,
    debug: bool,
    stats: DispatchStats,
    last_error: Option<ParseError>,
}

impl<S: ByteSource> TelegramDispatcher<S> {
    pub fn new(source: S, debug: bool) -> Self {
        Self {
            source,
            reader: P1Reader::new(),
            handler: None,
            initialized: false,
            read_pending: false,
            debug,
            stats: DispatchStats::default(),
            last_error: None,
        }
    }

    /// Prepares the port. Must be called once before [`pump`](Self::pump).
    pub fn begin(&mut self) {
        self.reader.reset();
        self.source.set_request(false);
        self.read_pending = false;
        self.initialized = true;
        info!("✅ P1: reader ready");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn set_handler<H>(&mut self, handler: H)
    where
        H: RecordHandler + 'static,
    {
        self.handler = Some(Box::new(handler));
    }

    pub fn is_handler_set(&self) -> bool {
        self.handler.is_some()
    }

    /// Asks the meter for one telegram and accepts the next valid frame.
    ///
    /// The request is released once that frame has arrived. Triggering
    /// while a read is already pending keeps any partial frame.
    pub fn trigger_read(&mut self) {
        if !self.read_pending {
            self.reader.reset();
        }
        self.source.set_request(true);
        self.read_pending = true;
    }

    pub fn is_read_pending(&self) -> bool {
        self.read_pending
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn last_error(&self) -> Option<&ParseError> {
        self.last_error.as_ref()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Processes every byte that has arrived; returns the number of records dispatched.
    ///
    /// Without a pending read the bytes are drained and dropped. Never waits
    /// for more input. Fails only on misuse: before [`begin`](Self::begin)
    /// or without a registered handler.
    pub fn pump(&mut self) -> GatewayResult<usize> {
        if !self.initialized {
            return Err(GatewayError::NotInitialized("telegram dispatcher"));
        }
        let Some(handler) = self.handler.as_mut() else {
            return Err(GatewayError::HandlerNotSet);
        };

        let mut dispatched = 0;
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = self.source.read_available(&mut buf);
            if n == 0 {
                break;
            }

            for &byte in &buf[..n] {
                if !self.read_pending {
                    break;
                }
                let Some(frame) = self.reader.feed(byte) else {
                    continue;
                };

                // Only a frame that passed its checksum answers the request
                if frame.is_ok() {
                    self.source.set_request(false);
                    self.read_pending = false;
                }

                match frame.and_then(|text| parse_telegram(&text)) {
                    Ok(record) => {
                        self.stats.parsed += 1;
                        if self.debug {
                            log_record(&record);
                        }
                        handler.on_record(&record);
                        dispatched += 1;
                    }
                    Err(e) => {
                        self.stats.failed += 1;
                        warn!("⚠️ P1: telegram skipped: {}", e);
                        self.last_error = Some(e);
                    }
                }
            }
        }

        Ok(dispatched)
    }
}

fn log_record(record: &TelegramRecord) {
    fn show<T: core::fmt::Display>(value: &Option<T>) -> String {
        value
            .as_ref()
            .map_or_else(|| "-".to_string(), |v| v.to_string())
    }

    info!("📊 P1 telegram '{}':", record.identification);
    info!("  timestamp: {}", show(&record.timestamp));
    info!(
        "  energy delivered T1/T2 (kWh): {} / {}",
        show(&record.energy_delivered_tariff1),
        show(&record.energy_delivered_tariff2)
    );
    info!(
        "  energy returned T1/T2 (kWh): {} / {}",
        show(&record.energy_returned_tariff1),
        show(&record.energy_returned_tariff2)
    );
    info!(
        "  power delivered/returned (kW): {} / {}",
        show(&record.power_delivered),
        show(&record.power_returned)
    );
    info!(
        "  voltage L1/L2/L3 (V): {} / {} / {}",
        show(&record.voltage_l1),
        show(&record.voltage_l2),
        show(&record.voltage_l3)
    );
    info!(
        "  current L1/L2/L3 (A): {} / {} / {}",
        show(&record.current_l1),
        show(&record.current_l2),
        show(&record.current_l3)
    );
    if let Some(gas) = &record.gas_m3 {
        info!("  gas (m3): {} at {}", gas.value, gas.timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meter::simulator::{fluvius_sample, TelegramBuilder};
    use crate::testing::MockByteSource;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn dispatcher(source: MockByteSource) -> (TelegramDispatcher<MockByteSource>, Rc<RefCell<Vec<TelegramRecord>>>) {
        let mut dispatcher = TelegramDispatcher::new(source, false);
        dispatcher.begin();
        let records = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&records);
        dispatcher.set_handler(move |record: &TelegramRecord| sink.borrow_mut().push(record.clone()));
        (dispatcher, records)
    }

    #[test]
    fn pump_before_begin_is_rejected() {
        let mut dispatcher = TelegramDispatcher::new(MockByteSource::new(), false);
        dispatcher.set_handler(|_: &TelegramRecord| {});
        assert_eq!(
            dispatcher.pump(),
            Err(GatewayError::NotInitialized("telegram dispatcher"))
        );
    }

    #[test]
    fn pump_without_handler_is_rejected() {
        let mut dispatcher = TelegramDispatcher::new(MockByteSource::new(), false);
        dispatcher.begin();
        assert!(!dispatcher.is_handler_set());
        assert_eq!(dispatcher.pump(), Err(GatewayError::HandlerNotSet));
    }

    #[test]
    fn complete_frame_reaches_handler() {
        let source = MockByteSource::new();
        let (mut dispatcher, records) = dispatcher(source.clone());

        dispatcher.trigger_read();
        source.push(fluvius_sample().as_bytes());

        assert_eq!(dispatcher.pump(), Ok(1));
        assert_eq!(records.borrow()[0].meter_id_electr.as_deref(), Some("50217"));
        assert_eq!(dispatcher.stats(), DispatchStats { parsed: 1, failed: 0 });
    }

    #[test]
    fn frames_without_a_read_are_discarded() {
        let source = MockByteSource::new();
        let (mut dispatcher, records) = dispatcher(source.clone());

        source.push(fluvius_sample().as_bytes());
        assert_eq!(dispatcher.pump(), Ok(0));
        source.push(fluvius_sample().as_bytes());
        assert_eq!(dispatcher.pump(), Ok(0));

        assert!(records.borrow().is_empty());
        assert_eq!(dispatcher.stats(), DispatchStats::default());
    }

    #[test]
    fn one_read_yields_one_frame() {
        let source = MockByteSource::new();
        let (mut dispatcher, records) = dispatcher(source.clone());

        dispatcher.trigger_read();
        source.push(fluvius_sample().as_bytes());
        source.push(fluvius_sample().as_bytes());

        assert_eq!(dispatcher.pump(), Ok(1));
        assert!(!dispatcher.is_read_pending());

        // The second frame was dropped with the rest of the backlog
        dispatcher.trigger_read();
        assert_eq!(dispatcher.pump(), Ok(0));
        source.push(fluvius_sample().as_bytes());
        assert_eq!(dispatcher.pump(), Ok(1));
        assert_eq!(records.borrow().len(), 2);
    }

    #[test]
    fn read_started_mid_frame_waits_for_next_header() {
        let source = MockByteSource::new();
        let (mut dispatcher, records) = dispatcher(source.clone());
        let telegram = fluvius_sample();
        let (head, tail) = telegram.as_bytes().split_at(100);

        source.push(head);
        dispatcher.pump().unwrap();
        dispatcher.trigger_read();
        source.push(tail);
        assert_eq!(dispatcher.pump(), Ok(0));
        assert!(dispatcher.is_read_pending());

        source.push(telegram.as_bytes());
        assert_eq!(dispatcher.pump(), Ok(1));
        assert_eq!(records.borrow().len(), 1);
    }

    #[test]
    fn frame_split_across_pumps_is_reassembled() {
        let source = MockByteSource::new();
        let (mut dispatcher, records) = dispatcher(source.clone());
        let telegram = fluvius_sample();
        let (head, tail) = telegram.as_bytes().split_at(100);

        dispatcher.trigger_read();
        source.push(head);
        assert_eq!(dispatcher.pump(), Ok(0));
        source.push(tail);
        assert_eq!(dispatcher.pump(), Ok(1));
        assert_eq!(records.borrow().len(), 1);
    }

    #[test]
    fn corrupted_frame_keeps_the_read_pending() {
        let source = MockByteSource::new();
        let (mut dispatcher, records) = dispatcher(source.clone());
        let mut corrupted = fluvius_sample().into_bytes();
        corrupted[40] ^= 0x01;

        dispatcher.trigger_read();
        source.push(&corrupted);
        source.push(fluvius_sample().as_bytes());

        assert_eq!(dispatcher.pump(), Ok(1));
        assert_eq!(records.borrow().len(), 1);
        assert_eq!(dispatcher.stats(), DispatchStats { parsed: 1, failed: 1 });
        assert!(matches!(
            dispatcher.last_error(),
            Some(ParseError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn bad_frame_does_not_block_the_next_one() {
        let source = MockByteSource::new();
        let (mut dispatcher, records) = dispatcher(source.clone());

        let duplicate = TelegramBuilder::new("FLU5\\253769484_A")
            .line("0-0:96.1.4", "50217")
            .line("0-0:96.1.4", "50217")
            .build();
        dispatcher.trigger_read();
        source.push(duplicate.as_bytes());
        assert_eq!(dispatcher.pump(), Ok(0));
        assert!(matches!(
            dispatcher.last_error(),
            Some(ParseError::DuplicateField { .. })
        ));

        dispatcher.trigger_read();
        source.push(fluvius_sample().as_bytes());
        assert_eq!(dispatcher.pump(), Ok(1));
        assert_eq!(records.borrow().len(), 1);
        assert_eq!(dispatcher.stats(), DispatchStats { parsed: 1, failed: 1 });
    }

    #[test]
    fn trigger_read_is_released_after_a_frame() {
        let source = MockByteSource::new();
        let (mut dispatcher, _) = dispatcher(source.clone());

        dispatcher.trigger_read();
        assert!(source.request_active());

        source.push(fluvius_sample().as_bytes());
        dispatcher.pump().unwrap();
        assert!(!source.request_active());
    }
}
