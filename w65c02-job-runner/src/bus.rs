//! The system bus and run monitor.
//!
//! `SystemBus` owns the 64 KiB address space, the serial ports, the trace
//! ring, and the termination predicates. Because the core performs exactly
//! one bus access per tick, everything observable about a run funnels
//! through the three `BusInterface` callbacks below, in bus order; the run
//! loop checks `running()` after every tick, so no bus cycle ever happens
//! after the terminating one.

use crate::job::{decode_tagged, JobDescription, JobError, SerialOutFormat};
use crate::report::{encode_tagged, RunReport};
use crate::sched::{self, Pin, PinFlip};
use serde::Serialize;
use std::ops::RangeInclusive;
use w65c02_emu::bus::{BusInterface, ReadKind, WriteKind};

pub const MEMORY_LEN: usize = 64 * 1024;
pub const DEFAULT_CYCLE_LIMIT: u32 = 10_000_000;

const SERIAL_OUT_LIMIT: usize = 131_072;
const TRACE_SLOTS: u32 = 1000;

// The reset sequence spends five cycles before the vector pull; they are
// never reported, so the counter starts past them.
const STARTUP_CYCLES: u32 = 5;

// Trace record type nibbles
const CYCLE_OPCODE_FETCH: u8 = 0xF;
const CYCLE_READ: u8 = 0x7;
const CYCLE_LOCKED_READ: u8 = 0x3;
const CYCLE_VECTOR_FETCH: u8 = 0x5;
const CYCLE_WRITE: u8 = 0x6;
const CYCLE_LOCKED_WRITE: u8 = 0x2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationCause {
    Limit,
    Brk,
    InfiniteLoop,
    ZeroFetch,
    StackFetch,
    VectorFetch,
    BadWrite,
}

#[derive(Debug, Clone, Copy)]
struct TerminationPredicates {
    brk: bool,
    infinite_loop: bool,
    zero_fetch: bool,
    stack_fetch: bool,
    vector_fetch: bool,
    bad_write: bool,
}

impl Default for TerminationPredicates {
    fn default() -> Self {
        Self {
            brk: true,
            infinite_loop: true,
            zero_fetch: true,
            stack_fetch: true,
            vector_fetch: true,
            bad_write: true,
        }
    }
}

#[derive(Debug)]
struct SerialIn {
    addr: u16,
    data: Vec<u8>,
    pos: usize,
}

#[derive(Debug)]
struct SerialOut {
    addr: u16,
    buffer: Vec<u8>,
}

#[derive(Debug)]
pub struct SystemBus {
    memory: Box<[u8; MEMORY_LEN]>,
    writable_ranges: Vec<RangeInclusive<u16>>,
    serial_in: Option<SerialIn>,
    serial_out: Option<SerialOut>,
    serial_out_fmt: Option<SerialOutFormat>,
    predicates: TerminationPredicates,
    cycle_limit: u32,
    num_cycles: u32,
    trace: Vec<u32>,
    trace_slots: u32,
    last_pc: u16,
    last_pc_valid: bool,
    vector_pulled: bool,
    flips: Vec<PinFlip>,
    next_flip: usize,
    pending_pins: Vec<(Pin, bool)>,
    so_pulse: bool,
    stop: Option<TerminationCause>,
}

impl SystemBus {
    pub fn from_job(job: &JobDescription) -> Result<Self, JobError> {
        let mut memory: Box<[u8; MEMORY_LEN]> =
            vec![0; MEMORY_LEN].into_boxed_slice().try_into().unwrap();

        // Default reset vector: $0200
        memory[0xFFFD] = 0x02;

        for record in &job.init {
            let data = decode_tagged(&record.data)?;
            if data.is_empty() {
                return Err(JobError::EmptyInitRecord { base: record.base });
            }

            let count = record.size.map_or(data.len(), |size| size as usize);
            let mut address = record.base;
            for i in 0..count {
                memory[usize::from(address)] = data[i % data.len()];
                address = address.wrapping_add(1);
            }
        }

        let writable_ranges = match &job.rwmap {
            Some(ranges) => ranges.iter().map(|&(begin, end)| begin..=end).collect(),
            None => vec![0x0000..=0x01FF],
        };

        let serial_in = job
            .serial_in_addr
            .map(|addr| -> Result<SerialIn, JobError> {
                let data = match &job.serial_in_data {
                    Some(tagged) => decode_tagged(tagged)?,
                    None => Vec::new(),
                };
                Ok(SerialIn { addr, data, pos: 0 })
            })
            .transpose()?;

        let serial_out = job.serial_out_addr.map(|addr| SerialOut { addr, buffer: Vec::new() });

        let mut predicates = TerminationPredicates::default();
        if job.terminate_on_brk == Some(false) {
            predicates.brk = false;
        }
        if job.terminate_on_infinite_loop == Some(false) {
            predicates.infinite_loop = false;
        }
        if job.terminate_on_zero_fetch == Some(false) {
            predicates.zero_fetch = false;
        }
        if job.terminate_on_stack_fetch == Some(false) {
            predicates.stack_fetch = false;
        }
        if job.terminate_on_vector_fetch == Some(false) {
            predicates.vector_fetch = false;
        }
        if job.terminate_on_bad_write == Some(false) {
            predicates.bad_write = false;
        }

        let flips = sched::build_schedule(
            job.so.as_deref().unwrap_or(&[]),
            job.nmi.as_deref().unwrap_or(&[]),
            job.irq.as_deref().unwrap_or(&[]),
        );

        Ok(Self {
            memory,
            writable_ranges,
            serial_in,
            serial_out,
            serial_out_fmt: job.serial_out_fmt,
            predicates,
            cycle_limit: job.max_cycles.unwrap_or(DEFAULT_CYCLE_LIMIT),
            num_cycles: STARTUP_CYCLES,
            trace: Vec::new(),
            trace_slots: if job.show_cycles { TRACE_SLOTS } else { 0 },
            last_pc: 0,
            last_pc_valid: false,
            vector_pulled: false,
            flips,
            next_flip: 0,
            pending_pins: Vec::new(),
            so_pulse: false,
            stop: None,
        })
    }

    /// True while no termination has fired and the cycle budget remains.
    #[must_use]
    pub fn running(&self) -> bool {
        self.stop.is_none() && self.num_cycles < self.cycle_limit
    }

    #[must_use]
    pub fn num_cycles(&self) -> u32 {
        self.num_cycles
    }

    /// Take the pending drain/overflow SO pulse request, if any.
    pub fn take_so_pulse(&mut self) -> bool {
        std::mem::take(&mut self.so_pulse)
    }

    /// Take the pin flips that became due during the last cycle.
    pub fn drain_pin_changes(&mut self) -> Vec<(Pin, bool)> {
        std::mem::take(&mut self.pending_pins)
    }

    /// Record one bus cycle: trace it while slots remain, advance the cycle
    /// counter, check the budget, and queue any pin flips that became due.
    /// A budget stop suppresses the flip drain, and the caller must perform
    /// no further side effects for this cycle.
    fn report_cycle(&mut self, cycle_type: u8, address: u16, data: u8) {
        if self.trace_slots > 0 {
            self.trace.push(
                (u32::from(cycle_type) << 24) | (u32::from(address) << 8) | u32::from(data),
            );
            self.trace_slots -= 1;
        }

        self.num_cycles += 1;
        if self.num_cycles == self.cycle_limit {
            self.stop = Some(TerminationCause::Limit);
            return;
        }

        while let Some(&flip) = self.flips.get(self.next_flip) {
            if flip.cycle > self.num_cycles {
                break;
            }
            self.pending_pins.push((flip.pin, flip.state));
            self.next_flip += 1;
        }
    }

    /// The opcode-fetch monitor path: trace, then the termination predicates
    /// in their fixed order. `last_pc` is updated between the infinite-loop
    /// check and the address-range checks.
    fn opcode_fetch(&mut self, address: u16, data: u8) {
        self.report_cycle(CYCLE_OPCODE_FETCH, address, data);
        if self.stop.is_some() {
            return;
        }

        if self.predicates.infinite_loop && self.last_pc_valid && address == self.last_pc {
            self.stop = Some(TerminationCause::InfiniteLoop);
            return;
        }

        self.last_pc_valid = true;
        self.last_pc = address;

        if self.predicates.zero_fetch && address < 0x0100 {
            self.stop = Some(TerminationCause::ZeroFetch);
            return;
        }
        if self.predicates.stack_fetch && (0x0100..0x0200).contains(&address) {
            self.stop = Some(TerminationCause::StackFetch);
            return;
        }
        if self.predicates.vector_fetch && address >= 0xFFFA {
            self.stop = Some(TerminationCause::VectorFetch);
            return;
        }
        if self.predicates.brk && data == 0x00 {
            self.stop = Some(TerminationCause::Brk);
        }
    }

    /// Memory-or-serial read, without any monitoring. Draining the serial
    /// input requests an SO pulse and returns zero.
    fn raw_read(&mut self, address: u16) -> u8 {
        if let Some(serial_in) = &mut self.serial_in {
            if address == serial_in.addr {
                return match serial_in.data.get(serial_in.pos) {
                    Some(&byte) => {
                        serial_in.pos += 1;
                        byte
                    }
                    None => {
                        self.so_pulse = true;
                        0x00
                    }
                };
            }
        }

        self.memory[usize::from(address)]
    }

    pub fn into_report(self) -> RunReport {
        let cycles = (!self.trace.is_empty()).then(|| {
            self.trace.iter().map(|&record| format!("{:07X}", record & 0x0FFF_FFFF)).collect()
        });

        let serial_out_data = self.serial_out_fmt.map(|format| {
            let buffer = self.serial_out.as_ref().map_or(&[][..], |out| &out.buffer);
            encode_tagged(format, buffer)
        });

        RunReport {
            last_pc: self.last_pc_valid.then_some(self.last_pc),
            num_cycles: self.num_cycles,
            termination_cause: self.stop.unwrap_or(TerminationCause::Limit),
            cycles,
            serial_out_data,
        }
    }
}

impl BusInterface for SystemBus {
    fn read(&mut self, address: u16, kind: ReadKind) -> u8 {
        let data = self.raw_read(address);

        // Nothing is reported until the reset vector has been pulled
        match kind {
            ReadKind::Opcode | ReadKind::Preempted => {
                if self.vector_pulled {
                    self.opcode_fetch(address, data);
                }
            }
            ReadKind::DataLocked | ReadKind::IopLocked => {
                if self.vector_pulled {
                    self.report_cycle(CYCLE_LOCKED_READ, address, data);
                }
            }
            ReadKind::Data | ReadKind::Stack => {
                if self.vector_pulled {
                    self.report_cycle(CYCLE_READ, address, data);
                }
            }
        }

        data
    }

    fn read_vector(&mut self, address: u16) -> u8 {
        let data = self.raw_read(address);
        self.vector_pulled = true;
        self.report_cycle(CYCLE_VECTOR_FETCH, address, data);
        data
    }

    fn write(&mut self, address: u16, value: u8, kind: WriteKind) {
        let cycle_type = match kind {
            WriteKind::Data | WriteKind::Push => CYCLE_WRITE,
            WriteKind::DataLocked => CYCLE_LOCKED_WRITE,
        };
        self.report_cycle(cycle_type, address, value);
        if self.stop.is_some() {
            // A write cycle that trips the budget never lands
            return;
        }

        if let Some(serial_out) = &mut self.serial_out {
            if address == serial_out.addr {
                if serial_out.buffer.len() >= SERIAL_OUT_LIMIT {
                    self.so_pulse = true;
                } else {
                    serial_out.buffer.push(value);
                }
                return;
            }
        }

        if self.writable_ranges.iter().any(|range| range.contains(&address)) {
            self.memory[usize::from(address)] = value;
        } else if self.predicates.bad_write {
            self.stop = Some(TerminationCause::BadWrite);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::InitRecord;

    fn bus_for(job: &JobDescription) -> SystemBus {
        SystemBus::from_job(job).unwrap()
    }

    #[test]
    fn init_records_tile_cyclically_to_the_requested_size() {
        let job = JobDescription {
            init: vec![InitRecord {
                base: 0x1000,
                data: "utf8:abc".into(),
                size: Some(8),
            }],
            ..JobDescription::default()
        };
        let bus = bus_for(&job);

        assert_eq!(&bus.memory[0x1000..0x1008], b"abcabcab");
        assert_eq!(bus.memory[0x1008], 0);
    }

    #[test]
    fn init_size_smaller_than_data_is_authoritative() {
        let job = JobDescription {
            init: vec![InitRecord {
                base: 0x1000,
                data: "utf8:abcdef".into(),
                size: Some(2),
            }],
            ..JobDescription::default()
        };
        let bus = bus_for(&job);

        assert_eq!(&bus.memory[0x1000..0x1003], b"ab\0");
    }

    #[test]
    fn empty_init_data_is_a_configuration_error() {
        let job = JobDescription {
            init: vec![InitRecord { base: 0, data: "utf8:".into(), size: Some(4) }],
            ..JobDescription::default()
        };
        assert!(matches!(
            SystemBus::from_job(&job),
            Err(JobError::EmptyInitRecord { base: 0 })
        ));
    }

    #[test]
    fn default_reset_vector_points_to_0200() {
        let bus = bus_for(&JobDescription::default());
        assert_eq!(bus.memory[0xFFFC], 0x00);
        assert_eq!(bus.memory[0xFFFD], 0x02);
    }

    #[test]
    fn writes_outside_every_range_are_dropped_when_the_predicate_is_off() {
        let job = JobDescription {
            terminate_on_bad_write: Some(false),
            ..JobDescription::default()
        };
        let mut bus = bus_for(&job);
        bus.vector_pulled = true;

        bus.write(0x4000, 0xAA, WriteKind::Data);

        assert_eq!(bus.memory[0x4000], 0x00);
        assert!(bus.stop.is_none());
        // The cycle is still counted
        assert_eq!(bus.num_cycles, STARTUP_CYCLES + 1);
    }

    #[test]
    fn out_of_range_write_terminates_when_the_predicate_is_on() {
        let mut bus = bus_for(&JobDescription::default());
        bus.vector_pulled = true;

        bus.write(0x4000, 0xAA, WriteKind::Data);

        assert_eq!(bus.stop, Some(TerminationCause::BadWrite));
        assert_eq!(bus.memory[0x4000], 0x00);
    }

    #[test]
    fn serial_out_writes_bypass_the_writable_ranges() {
        let job = JobDescription {
            serial_out_addr: Some(0xF001),
            serial_out_fmt: Some(SerialOutFormat::Utf8),
            ..JobDescription::default()
        };
        let mut bus = bus_for(&job);
        bus.vector_pulled = true;

        bus.write(0xF001, b'!', WriteKind::Data);

        assert!(bus.stop.is_none());
        assert_eq!(bus.serial_out.as_ref().unwrap().buffer, b"!");
    }

    #[test]
    fn drained_serial_in_reads_zero_and_requests_an_so_pulse() {
        let job = JobDescription {
            serial_in_addr: Some(0xF004),
            serial_in_data: Some("utf8:A".into()),
            ..JobDescription::default()
        };
        let mut bus = bus_for(&job);
        bus.vector_pulled = true;

        assert_eq!(bus.read(0xF004, ReadKind::Data), b'A');
        assert!(!bus.take_so_pulse());

        assert_eq!(bus.read(0xF004, ReadKind::Data), 0x00);
        assert!(bus.take_so_pulse());
    }

    #[test]
    fn cycles_before_the_vector_pull_go_unreported() {
        let mut bus = bus_for(&JobDescription::default());

        bus.read(0x1234, ReadKind::Data);
        bus.read(0x1234, ReadKind::Opcode);
        assert_eq!(bus.num_cycles, STARTUP_CYCLES);

        bus.read_vector(0xFFFC);
        assert_eq!(bus.num_cycles, STARTUP_CYCLES + 1);
        assert!(bus.vector_pulled);
    }

    #[test]
    fn limit_stop_suppresses_predicates_and_last_pc_update() {
        let job = JobDescription { max_cycles: Some(6), ..JobDescription::default() };
        let mut bus = bus_for(&job);
        bus.vector_pulled = true;

        // This opcode fetch is the sixth cycle: the budget fires first, so
        // neither the BRK predicate nor last_pc sees it
        bus.read(0x0200, ReadKind::Opcode);

        assert_eq!(bus.stop, Some(TerminationCause::Limit));
        assert!(!bus.last_pc_valid);
    }

    #[test]
    fn infinite_loop_fires_before_the_last_pc_update() {
        let mut bus = bus_for(&JobDescription::default());
        bus.vector_pulled = true;
        bus.memory[0x0205] = 0xEA;

        bus.read(0x0205, ReadKind::Opcode);
        assert!(bus.stop.is_none());
        bus.read(0x0205, ReadKind::Opcode);

        assert_eq!(bus.stop, Some(TerminationCause::InfiniteLoop));
        assert_eq!(bus.last_pc, 0x0205);
    }

    #[test]
    fn trace_records_pack_type_address_and_data() {
        let job = JobDescription { show_cycles: true, ..JobDescription::default() };
        let mut bus = bus_for(&job);
        bus.vector_pulled = true;

        bus.read(0x1234, ReadKind::Data);
        bus.write(0x0056, 0x78, WriteKind::DataLocked);

        assert_eq!(bus.trace, vec![0x712_3400, 0x200_5678]);
    }
}
