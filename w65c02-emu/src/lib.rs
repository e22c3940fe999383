//! Cycle-accurate W65C02S core.
//!
//! The core is driven one bus cycle at a time via [`W65c02::tick`]; every
//! tick performs exactly one access through the host's
//! [`bus::BusInterface`], classified so the host can distinguish opcode
//! fetches, locked read-modify-write halves, vector pulls, and stack
//! traffic. The instruction set is the full W65C02S: the CMOS additions,
//! the Rockwell bit instructions (`BBRx`/`BBSx`/`RMBx`/`SMBx`), `WAI`/`STP`,
//! decimal-mode `ADC`/`SBC` with their extra cycle, and defined NOP behavior
//! for every remaining opcode.

pub mod bus;
mod instructions;
pub mod num;

use crate::bus::{BusInterface, ReadKind};
use crate::instructions::InstructionState;
use crate::num::GetBit;
use bincode::{Decode, Encode};

pub const NMI_VECTOR: u16 = 0xFFFA;
pub const RESET_VECTOR: u16 = 0xFFFC;
pub const IRQ_VECTOR: u16 = 0xFFFE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum StatusReadContext {
    HardwareInterruptHandler,
    Brk,
    PushStack,
}

#[derive(Debug, Clone, Copy, Encode, Decode)]
pub struct StatusFlags {
    pub negative: bool,
    pub overflow: bool,
    pub decimal: bool,
    pub interrupt_disable: bool,
    pub zero: bool,
    pub carry: bool,
}

impl StatusFlags {
    #[must_use]
    pub fn new() -> Self {
        // I defaults to 1, everything else to 0
        Self {
            negative: false,
            overflow: false,
            decimal: false,
            interrupt_disable: true,
            zero: false,
            carry: false,
        }
    }

    pub fn set_negative(&mut self, negative: bool) -> &mut Self {
        self.negative = negative;
        self
    }

    pub fn set_overflow(&mut self, overflow: bool) -> &mut Self {
        self.overflow = overflow;
        self
    }

    pub fn set_zero(&mut self, zero: bool) -> &mut Self {
        self.zero = zero;
        self
    }

    pub fn set_carry(&mut self, carry: bool) -> &mut Self {
        self.carry = carry;
        self
    }

    #[must_use]
    pub fn to_byte(self, read_ctx: StatusReadContext) -> u8 {
        // B reads as 1 during BRK and pushes, 0 inside NMI/IRQ handlers
        let b_flag = match read_ctx {
            StatusReadContext::Brk | StatusReadContext::PushStack => 0x10,
            StatusReadContext::HardwareInterruptHandler => 0x00,
        };

        // Bit 5 is hardwired to 1
        (u8::from(self.negative) << 7)
            | (u8::from(self.overflow) << 6)
            | 0x20
            | b_flag
            | (u8::from(self.decimal) << 3)
            | (u8::from(self.interrupt_disable) << 2)
            | (u8::from(self.zero) << 1)
            | u8::from(self.carry)
    }

    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        Self {
            negative: byte.bit(7),
            overflow: byte.bit(6),
            decimal: byte.bit(3),
            interrupt_disable: byte.bit(2),
            zero: byte.bit(1),
            carry: byte.bit(0),
        }
    }
}

impl Default for StatusFlags {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct CpuRegisters {
    pub accumulator: u8,
    pub x: u8,
    pub y: u8,
    pub status: StatusFlags,
    pub pc: u16,
    pub sp: u8,
}

impl CpuRegisters {
    /// Register state of a freshly powered-on part: the reset sequence has
    /// not run yet, so everything sits in the all-ones pattern.
    fn new() -> Self {
        Self { accumulator: 0xFF, x: 0xFF, y: 0xFF, status: StatusFlags::new(), pc: 0xFFFF, sp: 0xFF }
    }
}

/// Coarse operating state, as visible between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum CpuMode {
    /// Reset asserted; the next ticks run the 7-cycle reset sequence.
    Reset,
    /// Normal instruction execution.
    Running,
    /// A `WAI` instruction has executed and no interrupt has arrived yet.
    AwaitingInterrupt,
    /// A `STP` instruction has executed; only `reset` leaves this state.
    Stopped,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct W65c02 {
    registers: CpuRegisters,
    state: InstructionState,
    mode: CpuMode,
    irq: bool,
    irq_pending: bool,
    nmi: bool,
    nmi_edge: bool,
    nmi_pending: bool,
    so: bool,
    so_edge: bool,
}

impl W65c02 {
    /// Create a core in the freshly-reset state. The first `tick`s will
    /// execute the reset sequence and pull the reset vector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registers: CpuRegisters::new(),
            state: InstructionState::default(),
            mode: CpuMode::Reset,
            irq: false,
            irq_pending: false,
            nmi: false,
            nmi_edge: false,
            nmi_pending: false,
            so: false,
            so_edge: false,
        }
    }

    /// Re-assert reset: abandon any in-flight instruction, unfreeze a
    /// stopped core, and run the reset sequence at the next ticks.
    pub fn reset(&mut self) {
        self.state = InstructionState::default();
        self.mode = CpuMode::Reset;
        self.irq_pending = false;
        self.nmi_pending = false;
    }

    /// Run the CPU for exactly one bus cycle.
    #[inline]
    pub fn tick<B: BusInterface>(&mut self, bus: &mut B) {
        // A rising SO edge sets V at the next cycle boundary
        if self.so_edge {
            self.so_edge = false;
            self.registers.status.overflow = true;
        }

        match self.mode {
            CpuMode::Stopped => {
                bus.read(self.registers.pc, ReadKind::Data);
            }
            CpuMode::AwaitingInterrupt => instructions::await_interrupt_cycle(self, bus),
            CpuMode::Reset => instructions::reset_cycle(self, bus),
            CpuMode::Running => {
                if self.state.instruction_complete {
                    self.begin_instruction(bus);
                } else {
                    instructions::execute_cycle(self, bus);
                }
            }
        }
    }

    /// Run the CPU through one whole instruction (or one dormant cycle when
    /// stopped or waiting). The harness drives `tick` directly instead so it
    /// can observe every cycle boundary.
    pub fn step<B: BusInterface>(&mut self, bus: &mut B) {
        self.tick(bus);
        while self.is_mid_instruction() {
            self.tick(bus);
        }
    }

    fn begin_instruction<B: BusInterface>(&mut self, bus: &mut B) {
        let pc = self.registers.pc;

        if self.nmi_pending || self.irq_pending {
            // The preempted opcode is fetched and discarded
            bus.read(pc, ReadKind::Preempted);
            self.state.interrupt_vector = if self.nmi_pending {
                self.nmi_pending = false;
                self.nmi_edge = false;
                NMI_VECTOR
            } else {
                IRQ_VECTOR
            };
            self.state.executing_interrupt = true;
            self.state.instruction_complete = false;
            self.state.cycle = 0;
            return;
        }

        let opcode = bus.read(pc, ReadKind::Opcode);
        self.registers.pc = pc.wrapping_add(1);
        self.state.opcode = opcode;
        self.state.executing_interrupt = false;
        self.state.instruction_complete = false;
        self.state.cycle = 0;

        if instructions::is_single_cycle(opcode) {
            // The undefined single-cycle NOPs retire with the fetch itself
            self.check_irq_edge();
            self.state.instruction_complete = true;
        }
    }

    /// Sample the interrupt inputs; called at each instruction's final cycle.
    pub(crate) fn check_irq_edge(&mut self) {
        self.irq_pending = self.irq && !self.registers.status.interrupt_disable;
        self.nmi_pending = self.nmi_edge;
    }

    #[inline]
    #[must_use]
    pub fn pc(&self) -> u16 {
        self.registers.pc
    }

    #[must_use]
    pub fn is_mid_instruction(&self) -> bool {
        !self.state.instruction_complete
    }

    #[inline]
    #[must_use]
    pub fn mode(&self) -> CpuMode {
        self.mode
    }

    pub(crate) fn set_mode(&mut self, mode: CpuMode) {
        self.mode = mode;
    }

    #[must_use]
    pub fn registers(&self) -> &CpuRegisters {
        &self.registers
    }

    pub fn set_registers(&mut self, registers: CpuRegisters) {
        self.registers = registers;
    }

    /// Set the logical state of the IRQB input. Level-sensitive; serviced at
    /// the next instruction boundary while I is clear.
    pub fn set_irq(&mut self, irq: bool) {
        self.irq = irq;
    }

    /// Set the logical state of the NMIB input. A false→true transition
    /// latches an NMI that is serviced at the next instruction boundary.
    pub fn set_nmi(&mut self, nmi: bool) {
        if nmi && !self.nmi {
            self.nmi_edge = true;
        }
        self.nmi = nmi;
    }

    /// Set the logical state of the SOB input. A false→true transition sets
    /// the V flag at the next cycle boundary.
    pub fn set_so(&mut self, so: bool) {
        if so && !self.so {
            self.so_edge = true;
        }
        self.so = so;
    }
}

impl Default for W65c02 {
    fn default() -> Self {
        Self::new()
    }
}
