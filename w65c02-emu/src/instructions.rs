use crate::bus::{BusInterface, ReadKind, WriteKind};
use crate::num::{GetBit, U16Ext};
use crate::{CpuMode, StatusFlags, StatusReadContext, W65c02, IRQ_VECTOR, NMI_VECTOR, RESET_VECTOR};
use bincode::{Decode, Encode};

#[cfg(test)]
mod tests;

// Dormant WAI ticks stay at cycle 0; the wake handshake takes one extra
// cycle marked with this sentinel. Real instructions never reach it.
const WAI_WAKE_CYCLE: u8 = u8::MAX;

#[derive(Debug, Clone, Encode, Decode)]
pub struct InstructionState {
    pub opcode: u8,
    pub executing_interrupt: bool,
    pub cycle: u8,
    pub operand_first_byte: u8,
    pub operand_second_byte: u8,
    pub target_first_byte: u8,
    pub target_second_byte: u8,
    pub indirect_byte: u8,
    pub interrupt_vector: u16,
    pub instruction_complete: bool,
}

impl Default for InstructionState {
    fn default() -> Self {
        Self {
            opcode: 0,
            executing_interrupt: false,
            cycle: 0,
            operand_first_byte: 0,
            operand_second_byte: 0,
            target_first_byte: 0,
            target_second_byte: 0,
            indirect_byte: 0,
            interrupt_vector: 0,
            instruction_complete: true,
        }
    }
}

#[inline]
fn final_cycle(cpu: &mut W65c02) {
    cpu.check_irq_edge();
    cpu.state.instruction_complete = true;
}

#[inline]
fn fetch_operand<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) -> u8 {
    let operand = bus.read(cpu.registers.pc, ReadKind::Data);
    cpu.registers.pc = cpu.registers.pc.wrapping_add(1);
    operand
}

/// Address of the last instruction byte; the W65C02S re-reads it during
/// indexed address fix-up cycles.
#[inline]
fn last_instruction_byte_addr(cpu: &W65c02) -> u16 {
    cpu.registers.pc.wrapping_sub(1)
}

macro_rules! invalid_cycle {
    ($cpu:expr) => {
        panic!("Invalid cycle for opcode {:02X}: {}", $cpu.state.opcode, $cpu.state.cycle)
    };
}

macro_rules! impl_read_immediate {
    ($cpu:expr, $bus:expr, |$operand:ident, $registers_param:ident| $body:block) => {{
        final_cycle($cpu);

        let $operand = fetch_operand($cpu, $bus);
        let $registers_param = &mut $cpu.registers;
        $body
    }};
}

macro_rules! impl_read_zero_page {
    ($cpu:expr, $bus:expr, |$operand:ident, $registers_param:ident| $body:block) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                final_cycle($cpu);

                let $operand = $bus.read($cpu.state.operand_first_byte.into(), ReadKind::Data);
                let $registers_param = &mut $cpu.registers;
                $body
            }
            _ => invalid_cycle!($cpu),
        }
    };
}

macro_rules! impl_read_zero_page_indexed {
    (index: $index:ident, $cpu:expr, $bus:expr, |$operand:ident, $registers_param:ident| $body:block) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                $bus.read($cpu.state.operand_first_byte.into(), ReadKind::Data);
            }
            2 => {
                final_cycle($cpu);

                let index = $cpu.registers.$index;
                let address = $cpu.state.operand_first_byte.wrapping_add(index);
                let $operand = $bus.read(address.into(), ReadKind::Data);
                let $registers_param = &mut $cpu.registers;
                $body
            }
            _ => invalid_cycle!($cpu),
        }
    };
}

macro_rules! impl_read_absolute {
    ($cpu:expr, $bus:expr, |$operand:ident, $registers_param:ident| $body:block) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                $cpu.state.operand_second_byte = fetch_operand($cpu, $bus);
            }
            2 => {
                final_cycle($cpu);

                let address = u16::from_le_bytes([
                    $cpu.state.operand_first_byte,
                    $cpu.state.operand_second_byte,
                ]);
                let $operand = $bus.read(address, ReadKind::Data);
                let $registers_param = &mut $cpu.registers;
                $body
            }
            _ => invalid_cycle!($cpu),
        }
    };
}

macro_rules! impl_read_absolute_indexed {
    (index: $index:ident, $cpu:expr, $bus:expr, |$operand:ident, $registers_param:ident| $body:block) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                $cpu.state.operand_second_byte = fetch_operand($cpu, $bus);
            }
            2 => {
                let (address_lsb, overflowed) =
                    $cpu.state.operand_first_byte.overflowing_add($cpu.registers.$index);

                if overflowed {
                    // Page crossing; the fix-up cycle re-reads the last
                    // instruction byte
                    $bus.read(last_instruction_byte_addr($cpu), ReadKind::Data);
                } else {
                    final_cycle($cpu);

                    let address = u16::from_le_bytes([address_lsb, $cpu.state.operand_second_byte]);
                    let $operand = $bus.read(address, ReadKind::Data);
                    let $registers_param = &mut $cpu.registers;
                    $body
                }
            }
            3 => {
                final_cycle($cpu);

                let address = u16::from_le_bytes([$cpu.state.operand_first_byte, $cpu.state.operand_second_byte])
                    .wrapping_add($cpu.registers.$index.into());
                let $operand = $bus.read(address, ReadKind::Data);
                let $registers_param = &mut $cpu.registers;
                $body
            }
            _ => invalid_cycle!($cpu)
        }
    }
}

macro_rules! impl_read_indirect {
    ($cpu:expr, $bus:expr, |$operand:ident, $registers_param:ident| $body:block) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                $cpu.state.target_first_byte =
                    $bus.read($cpu.state.operand_first_byte.into(), ReadKind::Data);
            }
            2 => {
                let address = $cpu.state.operand_first_byte.wrapping_add(1);
                $cpu.state.target_second_byte = $bus.read(address.into(), ReadKind::Data);
            }
            3 => {
                final_cycle($cpu);

                let address = u16::from_le_bytes([
                    $cpu.state.target_first_byte,
                    $cpu.state.target_second_byte,
                ]);
                let $operand = $bus.read(address, ReadKind::Data);
                let $registers_param = &mut $cpu.registers;
                $body
            }
            _ => invalid_cycle!($cpu),
        }
    };
}

macro_rules! impl_read_indirect_x {
    ($cpu:expr, $bus:expr, |$operand:ident, $registers_param:ident| $body:block) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                $bus.read($cpu.state.operand_first_byte.into(), ReadKind::Data);
            }
            2 => {
                let address = $cpu.state.operand_first_byte.wrapping_add($cpu.registers.x);
                $cpu.state.target_first_byte = $bus.read(address.into(), ReadKind::Data);
            }
            3 => {
                let address =
                    $cpu.state.operand_first_byte.wrapping_add($cpu.registers.x).wrapping_add(1);
                $cpu.state.target_second_byte = $bus.read(address.into(), ReadKind::Data);
            }
            4 => {
                final_cycle($cpu);

                let address = u16::from_le_bytes([
                    $cpu.state.target_first_byte,
                    $cpu.state.target_second_byte,
                ]);
                let $operand = $bus.read(address, ReadKind::Data);
                let $registers_param = &mut $cpu.registers;
                $body
            }
            _ => invalid_cycle!($cpu),
        }
    };
}

macro_rules! impl_read_indirect_y {
    ($cpu:expr, $bus:expr, |$operand:ident, $registers_param:ident| $body:block) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                $cpu.state.target_first_byte =
                    $bus.read($cpu.state.operand_first_byte.into(), ReadKind::Data);
            }
            2 => {
                let address = $cpu.state.operand_first_byte.wrapping_add(1);
                $cpu.state.target_second_byte = $bus.read(address.into(), ReadKind::Data);
            }
            3 => {
                let (address_lsb, overflowed) =
                    $cpu.state.target_first_byte.overflowing_add($cpu.registers.y);

                if overflowed {
                    $bus.read(last_instruction_byte_addr($cpu), ReadKind::Data);
                } else {
                    final_cycle($cpu);

                    let address = u16::from_le_bytes([address_lsb, $cpu.state.target_second_byte]);
                    let $operand = $bus.read(address, ReadKind::Data);
                    let $registers_param = &mut $cpu.registers;
                    $body
                }
            }
            4 => {
                final_cycle($cpu);

                let address = u16::from_le_bytes([$cpu.state.target_first_byte, $cpu.state.target_second_byte])
                    .wrapping_add($cpu.registers.y.into());
                let $operand = $bus.read(address, ReadKind::Data);
                let $registers_param = &mut $cpu.registers;
                $body
            }
            _ => invalid_cycle!($cpu)
        }
    }
}

macro_rules! impl_read_instruction {
    (immediate, $($rest:tt)*) => {
        impl_read_immediate!($($rest)*)
    };
    (zero_page, $($rest:tt)*) => {
        impl_read_zero_page!($($rest)*)
    };
    (zero_page_x, $($rest:tt)*) => {
        impl_read_zero_page_indexed!(index: x, $($rest)*)
    };
    (zero_page_y, $($rest:tt)*) => {
        impl_read_zero_page_indexed!(index: y, $($rest)*)
    };
    (absolute, $($rest:tt)*) => {
        impl_read_absolute!($($rest)*)
    };
    (absolute_x, $($rest:tt)*) => {
        impl_read_absolute_indexed!(index: x, $($rest)*)
    };
    (absolute_y, $($rest:tt)*) => {
        impl_read_absolute_indexed!(index: y, $($rest)*)
    };
    (indirect, $($rest:tt)*) => {
        impl_read_indirect!($($rest)*)
    };
    (indirect_x, $($rest:tt)*) => {
        impl_read_indirect_x!($($rest)*)
    };
    (indirect_y, $($rest:tt)*) => {
        impl_read_indirect_y!($($rest)*)
    };
}

macro_rules! impl_read_fn {
    ($name:ident, $addressing_mode:tt, |$operand:ident, $registers:ident| $body:block) => {
        fn $name<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
            impl_read_instruction!($addressing_mode, cpu, bus, |$operand, $registers| $body);
        }
    };
}

macro_rules! store_value {
    (accumulator, $registers:expr) => {
        $registers.accumulator
    };
    (x, $registers:expr) => {
        $registers.x
    };
    (y, $registers:expr) => {
        $registers.y
    };
    (zero, $registers:expr) => {
        0
    };
}

macro_rules! impl_store_zero_page {
    ($cpu:expr, $bus:expr, $register:tt) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                final_cycle($cpu);

                let address = $cpu.state.operand_first_byte.into();
                let value = store_value!($register, $cpu.registers);
                $bus.write(address, value, WriteKind::Data);
            }
            _ => invalid_cycle!($cpu),
        }
    };
}

macro_rules! impl_store_zero_page_indexed {
    (index: $index:ident, $cpu:expr, $bus:expr, $register:tt) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                $bus.read($cpu.state.operand_first_byte.into(), ReadKind::Data);
            }
            2 => {
                final_cycle($cpu);

                let address =
                    $cpu.state.operand_first_byte.wrapping_add($cpu.registers.$index).into();
                let value = store_value!($register, $cpu.registers);
                $bus.write(address, value, WriteKind::Data);
            }
            _ => invalid_cycle!($cpu),
        }
    };
}

macro_rules! impl_store_absolute {
    ($cpu:expr, $bus:expr, $register:tt) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                $cpu.state.operand_second_byte = fetch_operand($cpu, $bus);
            }
            2 => {
                final_cycle($cpu);

                let address = u16::from_le_bytes([
                    $cpu.state.operand_first_byte,
                    $cpu.state.operand_second_byte,
                ]);
                let value = store_value!($register, $cpu.registers);
                $bus.write(address, value, WriteKind::Data);
            }
            _ => invalid_cycle!($cpu),
        }
    };
}

// Indexed stores always spend the fix-up cycle, page crossing or not
macro_rules! impl_store_absolute_indexed {
    (index: $index:ident, $cpu:expr, $bus:expr, $register:tt) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                $cpu.state.operand_second_byte = fetch_operand($cpu, $bus);
            }
            2 => {
                $bus.read(last_instruction_byte_addr($cpu), ReadKind::Data);
            }
            3 => {
                final_cycle($cpu);

                let address = u16::from_le_bytes([
                    $cpu.state.operand_first_byte,
                    $cpu.state.operand_second_byte,
                ])
                .wrapping_add($cpu.registers.$index.into());
                let value = store_value!($register, $cpu.registers);
                $bus.write(address, value, WriteKind::Data);
            }
            _ => invalid_cycle!($cpu),
        }
    };
}

macro_rules! impl_store_indirect {
    ($cpu:expr, $bus:expr, $register:tt) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                $cpu.state.target_first_byte =
                    $bus.read($cpu.state.operand_first_byte.into(), ReadKind::Data);
            }
            2 => {
                let address = $cpu.state.operand_first_byte.wrapping_add(1);
                $cpu.state.target_second_byte = $bus.read(address.into(), ReadKind::Data);
            }
            3 => {
                final_cycle($cpu);

                let address = u16::from_le_bytes([
                    $cpu.state.target_first_byte,
                    $cpu.state.target_second_byte,
                ]);
                let value = store_value!($register, $cpu.registers);
                $bus.write(address, value, WriteKind::Data);
            }
            _ => invalid_cycle!($cpu),
        }
    };
}

macro_rules! impl_store_indirect_x {
    ($cpu:expr, $bus:expr, $register:tt) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                $bus.read($cpu.state.operand_first_byte.into(), ReadKind::Data);
            }
            2 => {
                let address = $cpu.state.operand_first_byte.wrapping_add($cpu.registers.x);
                $cpu.state.target_first_byte = $bus.read(address.into(), ReadKind::Data);
            }
            3 => {
                let address =
                    $cpu.state.operand_first_byte.wrapping_add($cpu.registers.x).wrapping_add(1);
                $cpu.state.target_second_byte = $bus.read(address.into(), ReadKind::Data);
            }
            4 => {
                final_cycle($cpu);

                let address = u16::from_le_bytes([
                    $cpu.state.target_first_byte,
                    $cpu.state.target_second_byte,
                ]);
                let value = store_value!($register, $cpu.registers);
                $bus.write(address, value, WriteKind::Data);
            }
            _ => invalid_cycle!($cpu),
        }
    };
}

macro_rules! impl_store_indirect_y {
    ($cpu:expr, $bus:expr, $register:tt) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                $cpu.state.target_first_byte =
                    $bus.read($cpu.state.operand_first_byte.into(), ReadKind::Data);
            }
            2 => {
                let address = $cpu.state.operand_first_byte.wrapping_add(1);
                $cpu.state.target_second_byte = $bus.read(address.into(), ReadKind::Data);
            }
            3 => {
                $bus.read(last_instruction_byte_addr($cpu), ReadKind::Data);
            }
            4 => {
                final_cycle($cpu);

                let address = u16::from_le_bytes([
                    $cpu.state.target_first_byte,
                    $cpu.state.target_second_byte,
                ])
                .wrapping_add($cpu.registers.y.into());
                let value = store_value!($register, $cpu.registers);
                $bus.write(address, value, WriteKind::Data);
            }
            _ => invalid_cycle!($cpu),
        }
    };
}

macro_rules! impl_store {
    (zero_page, $($rest:tt)*) => {
        impl_store_zero_page!($($rest)*)
    };
    (zero_page_x, $($rest:tt)*) => {
        impl_store_zero_page_indexed!(index: x, $($rest)*)
    };
    (zero_page_y, $($rest:tt)*) => {
        impl_store_zero_page_indexed!(index: y, $($rest)*)
    };
    (absolute, $($rest:tt)*) => {
        impl_store_absolute!($($rest)*)
    };
    (absolute_x, $($rest:tt)*) => {
        impl_store_absolute_indexed!(index: x, $($rest)*)
    };
    (absolute_y, $($rest:tt)*) => {
        impl_store_absolute_indexed!(index: y, $($rest)*)
    };
    (indirect, $($rest:tt)*) => {
        impl_store_indirect!($($rest)*)
    };
    (indirect_x, $($rest:tt)*) => {
        impl_store_indirect_x!($($rest)*)
    };
    (indirect_y, $($rest:tt)*) => {
        impl_store_indirect_y!($($rest)*)
    };
}

// STA, STX, STY, STZ
macro_rules! impl_store_fn {
    ($name:ident, $register:tt, $addressing_mode:tt) => {
        fn $name<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
            impl_store!($addressing_mode, cpu, bus, $register);
        }
    };
}

impl_store_fn!(sta_zero_page, accumulator, zero_page);
impl_store_fn!(sta_zero_page_x, accumulator, zero_page_x);
impl_store_fn!(sta_absolute, accumulator, absolute);
impl_store_fn!(sta_absolute_x, accumulator, absolute_x);
impl_store_fn!(sta_absolute_y, accumulator, absolute_y);
impl_store_fn!(sta_indirect, accumulator, indirect);
impl_store_fn!(sta_indirect_x, accumulator, indirect_x);
impl_store_fn!(sta_indirect_y, accumulator, indirect_y);

impl_store_fn!(stx_zero_page, x, zero_page);
impl_store_fn!(stx_zero_page_y, x, zero_page_y);
impl_store_fn!(stx_absolute, x, absolute);

impl_store_fn!(sty_zero_page, y, zero_page);
impl_store_fn!(sty_zero_page_x, y, zero_page_x);
impl_store_fn!(sty_absolute, y, absolute);

impl_store_fn!(stz_zero_page, zero, zero_page);
impl_store_fn!(stz_zero_page_x, zero, zero_page_x);
impl_store_fn!(stz_absolute, zero, absolute);
impl_store_fn!(stz_absolute_x, zero, absolute_x);

macro_rules! impl_modify_accumulator {
    ($cpu:expr, $bus:expr, |$operand:ident, $registers_param:ident| $body:block) => {{
        final_cycle($cpu);

        $bus.read($cpu.registers.pc, ReadKind::Data);

        let $operand = $cpu.registers.accumulator;
        let $registers_param = &mut $cpu.registers;
        $registers_param.accumulator = $body;
    }};
}

macro_rules! impl_modify_zero_page {
    ($cpu:expr, $bus:expr, |$operand:ident, $registers_param:ident| $body:block) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                $cpu.state.target_first_byte =
                    $bus.read($cpu.state.operand_first_byte.into(), ReadKind::DataLocked);
            }
            2 => {
                $bus.read($cpu.state.operand_first_byte.into(), ReadKind::IopLocked);
            }
            3 => {
                final_cycle($cpu);

                let $operand = $cpu.state.target_first_byte;
                let $registers_param = &mut $cpu.registers;
                let value = $body;
                $bus.write($cpu.state.operand_first_byte.into(), value, WriteKind::DataLocked);
            }
            _ => invalid_cycle!($cpu),
        }
    };
}

macro_rules! impl_modify_zero_page_x {
    ($cpu:expr, $bus:expr, |$operand:ident, $registers_param:ident| $body:block) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                $bus.read($cpu.state.operand_first_byte.into(), ReadKind::Data);
            }
            2 => {
                let address = $cpu.state.operand_first_byte.wrapping_add($cpu.registers.x).into();
                $cpu.state.target_first_byte = $bus.read(address, ReadKind::DataLocked);
            }
            3 => {
                let address = $cpu.state.operand_first_byte.wrapping_add($cpu.registers.x).into();
                $bus.read(address, ReadKind::IopLocked);
            }
            4 => {
                final_cycle($cpu);

                let address = $cpu.state.operand_first_byte.wrapping_add($cpu.registers.x).into();

                let $operand = $cpu.state.target_first_byte;
                let $registers_param = &mut $cpu.registers;
                let value = $body;

                $bus.write(address, value, WriteKind::DataLocked);
            }
            _ => invalid_cycle!($cpu),
        }
    };
}

macro_rules! impl_modify_absolute {
    ($cpu:expr, $bus:expr, |$operand:ident, $registers_param:ident| $body:block) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                $cpu.state.operand_second_byte = fetch_operand($cpu, $bus);
            }
            2 => {
                let address = u16::from_le_bytes([
                    $cpu.state.operand_first_byte,
                    $cpu.state.operand_second_byte,
                ]);
                $cpu.state.target_first_byte = $bus.read(address, ReadKind::DataLocked);
            }
            3 => {
                let address = u16::from_le_bytes([
                    $cpu.state.operand_first_byte,
                    $cpu.state.operand_second_byte,
                ]);
                $bus.read(address, ReadKind::IopLocked);
            }
            4 => {
                final_cycle($cpu);

                let $operand = $cpu.state.target_first_byte;
                let $registers_param = &mut $cpu.registers;
                let value = $body;

                let address = u16::from_le_bytes([
                    $cpu.state.operand_first_byte,
                    $cpu.state.operand_second_byte,
                ]);
                $bus.write(address, value, WriteKind::DataLocked);
            }
            _ => invalid_cycle!($cpu),
        }
    };
}

// The shifts skip the fix-up cycle when no page is crossed; INC/DEC always
// spend it (the `always_fixup` variant)
macro_rules! impl_modify_absolute_x {
    ($fixup:tt, $cpu:expr, $bus:expr, |$operand:ident, $registers_param:ident| $body:block) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                $cpu.state.operand_second_byte = fetch_operand($cpu, $bus);
                modify_absolute_x_after_operands!($fixup, $cpu);
            }
            2 => {
                $bus.read(last_instruction_byte_addr($cpu), ReadKind::Data);
            }
            3 => {
                let address = u16::from_le_bytes([
                    $cpu.state.operand_first_byte,
                    $cpu.state.operand_second_byte,
                ])
                .wrapping_add($cpu.registers.x.into());
                $cpu.state.target_first_byte = $bus.read(address, ReadKind::DataLocked);
            }
            4 => {
                let address = u16::from_le_bytes([
                    $cpu.state.operand_first_byte,
                    $cpu.state.operand_second_byte,
                ])
                .wrapping_add($cpu.registers.x.into());
                $bus.read(address, ReadKind::IopLocked);
            }
            5 => {
                final_cycle($cpu);

                let address = u16::from_le_bytes([
                    $cpu.state.operand_first_byte,
                    $cpu.state.operand_second_byte,
                ])
                .wrapping_add($cpu.registers.x.into());

                let $operand = $cpu.state.target_first_byte;
                let $registers_param = &mut $cpu.registers;
                let value = $body;

                $bus.write(address, value, WriteKind::DataLocked);
            }
            _ => invalid_cycle!($cpu),
        }
    };
}

macro_rules! modify_absolute_x_after_operands {
    (skip_fixup_in_page, $cpu:expr) => {
        let (_, overflowed) = $cpu.state.operand_first_byte.overflowing_add($cpu.registers.x);
        if !overflowed {
            $cpu.state.cycle += 1;
        }
    };
    (always_fixup, $cpu:expr) => {};
}

macro_rules! impl_modify_instruction {
    (accumulator, $($rest:tt)*) => {
        impl_modify_accumulator!($($rest)*)
    };
    (zero_page, $($rest:tt)*) => {
        impl_modify_zero_page!($($rest)*)
    };
    (zero_page_x, $($rest:tt)*) => {
        impl_modify_zero_page_x!($($rest)*)
    };
    (absolute, $($rest:tt)*) => {
        impl_modify_absolute!($($rest)*)
    };
    (absolute_x, $($rest:tt)*) => {
        impl_modify_absolute_x!(skip_fixup_in_page, $($rest)*)
    };
    (absolute_x_slower, $($rest:tt)*) => {
        impl_modify_absolute_x!(always_fixup, $($rest)*)
    };
}

macro_rules! impl_modify_fn {
    ($name:ident, $addressing_mode:tt, |$operand:ident, $registers:ident| $body:block) => {
        fn $name<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
            impl_modify_instruction!($addressing_mode, cpu, bus, |$operand, $registers| $body);
        }
    };
}

macro_rules! impl_registers_only_fn {
    ($name:ident, |$registers:ident| $body:block) => {
        fn $name<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
            final_cycle(cpu);

            // Spurious operand read
            bus.read(cpu.registers.pc, ReadKind::Data);

            let $registers = &mut cpu.registers;
            $body
        }
    };
}

// LDA, LDX, LDY
macro_rules! impl_load {
    ($name:ident, $register:ident, $addressing_mode:tt) => {
        impl_read_fn!($name, $addressing_mode, |operand, registers| {
            registers.$register = operand;
            registers.status.set_negative(operand.bit(7)).set_zero(operand == 0);
        });
    };
}

impl_load!(lda_immediate, accumulator, immediate);
impl_load!(lda_zero_page, accumulator, zero_page);
impl_load!(lda_zero_page_x, accumulator, zero_page_x);
impl_load!(lda_absolute, accumulator, absolute);
impl_load!(lda_absolute_x, accumulator, absolute_x);
impl_load!(lda_absolute_y, accumulator, absolute_y);
impl_load!(lda_indirect, accumulator, indirect);
impl_load!(lda_indirect_x, accumulator, indirect_x);
impl_load!(lda_indirect_y, accumulator, indirect_y);

impl_load!(ldx_immediate, x, immediate);
impl_load!(ldx_zero_page, x, zero_page);
impl_load!(ldx_zero_page_y, x, zero_page_y);
impl_load!(ldx_absolute, x, absolute);
impl_load!(ldx_absolute_y, x, absolute_y);

impl_load!(ldy_immediate, y, immediate);
impl_load!(ldy_zero_page, y, zero_page);
impl_load!(ldy_zero_page_x, y, zero_page_x);
impl_load!(ldy_absolute, y, absolute);
impl_load!(ldy_absolute_x, y, absolute_x);

fn add(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    let existing_carry = flags.carry;

    let (result, carry1) = accumulator.overflowing_add(value);
    let (result, carry2) = result.overflowing_add(existing_carry.into());
    let new_carry = carry1 || carry2;

    let bit_6_carry = (accumulator & 0x7F) + (value & 0x7F) + u8::from(existing_carry) >= 0x80;
    let overflow = new_carry ^ bit_6_carry;

    flags
        .set_negative(result.bit(7))
        .set_overflow(overflow)
        .set_zero(result == 0)
        .set_carry(new_carry);

    result
}

fn add_decimal(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    let a = u16::from(accumulator);
    let v = u16::from(value);

    let mut sum_lo = (a & 0x0F) + (v & 0x0F) + u16::from(flags.carry);
    let mut sum_hi = (a & 0xF0) + (v & 0xF0);
    if sum_lo > 0x09 {
        sum_lo += 0x06;
        sum_hi += 0x10;
    }

    // V is evaluated before the high digit is corrected
    let overflow = (a ^ v) & 0x80 == 0 && (a ^ sum_hi) & 0x80 != 0;

    if sum_hi > 0x90 {
        sum_hi += 0x60;
    }

    let result = ((sum_hi & 0xF0) | (sum_lo & 0x0F)) as u8;
    flags
        .set_negative(result.bit(7))
        .set_overflow(overflow)
        .set_zero(result == 0)
        .set_carry(sum_hi > 0xFF);

    result
}

fn subtract(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    // Carry flag is inverted in subtraction
    let existing_borrow = u8::from(!flags.carry);

    let (result, borrowed1) = accumulator.overflowing_sub(value);
    let (result, borrowed2) = result.overflowing_sub(existing_borrow);
    let borrowed = borrowed1 || borrowed2;

    let bit_6_borrowed = accumulator & 0x7F < (value & 0x7F) + existing_borrow;
    let overflow = borrowed ^ bit_6_borrowed;

    flags
        .set_negative(result.bit(7))
        .set_overflow(overflow)
        .set_zero(result == 0)
        .set_carry(!borrowed);

    result
}

fn subtract_decimal(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    let borrow = i16::from(!flags.carry);
    let a = i16::from(accumulator);
    let v = i16::from(value);

    // C and V come from the binary subtraction
    let binary = a - v - borrow;
    let overflow = (accumulator ^ value) & 0x80 != 0 && (a ^ binary) & 0x80 != 0;

    let lo = (a & 0x0F) - (v & 0x0F) - borrow;
    let mut result = binary;
    if result < 0 {
        result -= 0x60;
    }
    if lo < 0 {
        result -= 0x06;
    }

    let result = result as u8;
    flags
        .set_negative(result.bit(7))
        .set_overflow(overflow)
        .set_zero(result == 0)
        .set_carry(binary >= 0);

    result
}

// The operand cycle of an ADC/SBC: binary mode retires here; decimal mode
// stashes the operand and spends one more cycle on the adjusted result.
// `$skip` accounts for indexed modes whose crossed-page read cycle must be
// jumped over when no crossing happened.
macro_rules! arith_operand_cycle {
    ($cpu:expr, $bus:expr, $value:expr, $binary_op:ident, skip_next) => {{
        let value = $value;
        if $cpu.registers.status.decimal {
            $cpu.state.indirect_byte = value;
            $cpu.state.cycle += 1;
        } else {
            final_cycle($cpu);
            let registers = &mut $cpu.registers;
            registers.accumulator = $binary_op(registers.accumulator, value, &mut registers.status);
        }
    }};
    ($cpu:expr, $bus:expr, $value:expr, $binary_op:ident) => {{
        let value = $value;
        if $cpu.registers.status.decimal {
            $cpu.state.indirect_byte = value;
        } else {
            final_cycle($cpu);
            let registers = &mut $cpu.registers;
            registers.accumulator = $binary_op(registers.accumulator, value, &mut registers.status);
        }
    }};
}

macro_rules! arith_decimal_cycle {
    ($cpu:expr, $bus:expr, $decimal_op:ident) => {{
        final_cycle($cpu);

        $bus.read($cpu.registers.pc, ReadKind::Data);

        let value = $cpu.state.indirect_byte;
        let registers = &mut $cpu.registers;
        registers.accumulator = $decimal_op(registers.accumulator, value, &mut registers.status);
    }};
}

macro_rules! impl_arith_immediate {
    ($cpu:expr, $bus:expr, $binary_op:ident, $decimal_op:ident) => {
        match $cpu.state.cycle {
            0 => {
                let value = fetch_operand($cpu, $bus);
                arith_operand_cycle!($cpu, $bus, value, $binary_op);
            }
            1 => arith_decimal_cycle!($cpu, $bus, $decimal_op),
            _ => invalid_cycle!($cpu),
        }
    };
}

macro_rules! impl_arith_zero_page {
    ($cpu:expr, $bus:expr, $binary_op:ident, $decimal_op:ident) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                let value = $bus.read($cpu.state.operand_first_byte.into(), ReadKind::Data);
                arith_operand_cycle!($cpu, $bus, value, $binary_op);
            }
            2 => arith_decimal_cycle!($cpu, $bus, $decimal_op),
            _ => invalid_cycle!($cpu),
        }
    };
}

macro_rules! impl_arith_zero_page_x {
    ($cpu:expr, $bus:expr, $binary_op:ident, $decimal_op:ident) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                $bus.read($cpu.state.operand_first_byte.into(), ReadKind::Data);
            }
            2 => {
                let address = $cpu.state.operand_first_byte.wrapping_add($cpu.registers.x);
                let value = $bus.read(address.into(), ReadKind::Data);
                arith_operand_cycle!($cpu, $bus, value, $binary_op);
            }
            3 => arith_decimal_cycle!($cpu, $bus, $decimal_op),
            _ => invalid_cycle!($cpu),
        }
    };
}

macro_rules! impl_arith_absolute {
    ($cpu:expr, $bus:expr, $binary_op:ident, $decimal_op:ident) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                $cpu.state.operand_second_byte = fetch_operand($cpu, $bus);
            }
            2 => {
                let address = u16::from_le_bytes([
                    $cpu.state.operand_first_byte,
                    $cpu.state.operand_second_byte,
                ]);
                let value = $bus.read(address, ReadKind::Data);
                arith_operand_cycle!($cpu, $bus, value, $binary_op);
            }
            3 => arith_decimal_cycle!($cpu, $bus, $decimal_op),
            _ => invalid_cycle!($cpu),
        }
    };
}

macro_rules! impl_arith_absolute_indexed {
    (index: $index:ident, $cpu:expr, $bus:expr, $binary_op:ident, $decimal_op:ident) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                $cpu.state.operand_second_byte = fetch_operand($cpu, $bus);
            }
            2 => {
                let (address_lsb, overflowed) =
                    $cpu.state.operand_first_byte.overflowing_add($cpu.registers.$index);

                if overflowed {
                    $bus.read(last_instruction_byte_addr($cpu), ReadKind::Data);
                } else {
                    let address = u16::from_le_bytes([address_lsb, $cpu.state.operand_second_byte]);
                    let value = $bus.read(address, ReadKind::Data);
                    arith_operand_cycle!($cpu, $bus, value, $binary_op, skip_next);
                }
            }
            3 => {
                let address = u16::from_le_bytes([
                    $cpu.state.operand_first_byte,
                    $cpu.state.operand_second_byte,
                ])
                .wrapping_add($cpu.registers.$index.into());
                let value = $bus.read(address, ReadKind::Data);
                arith_operand_cycle!($cpu, $bus, value, $binary_op);
            }
            4 => arith_decimal_cycle!($cpu, $bus, $decimal_op),
            _ => invalid_cycle!($cpu),
        }
    };
}

macro_rules! impl_arith_indirect {
    ($cpu:expr, $bus:expr, $binary_op:ident, $decimal_op:ident) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                $cpu.state.target_first_byte =
                    $bus.read($cpu.state.operand_first_byte.into(), ReadKind::Data);
            }
            2 => {
                let address = $cpu.state.operand_first_byte.wrapping_add(1);
                $cpu.state.target_second_byte = $bus.read(address.into(), ReadKind::Data);
            }
            3 => {
                let address = u16::from_le_bytes([
                    $cpu.state.target_first_byte,
                    $cpu.state.target_second_byte,
                ]);
                let value = $bus.read(address, ReadKind::Data);
                arith_operand_cycle!($cpu, $bus, value, $binary_op);
            }
            4 => arith_decimal_cycle!($cpu, $bus, $decimal_op),
            _ => invalid_cycle!($cpu),
        }
    };
}

macro_rules! impl_arith_indirect_x {
    ($cpu:expr, $bus:expr, $binary_op:ident, $decimal_op:ident) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                $bus.read($cpu.state.operand_first_byte.into(), ReadKind::Data);
            }
            2 => {
                let address = $cpu.state.operand_first_byte.wrapping_add($cpu.registers.x);
                $cpu.state.target_first_byte = $bus.read(address.into(), ReadKind::Data);
            }
            3 => {
                let address =
                    $cpu.state.operand_first_byte.wrapping_add($cpu.registers.x).wrapping_add(1);
                $cpu.state.target_second_byte = $bus.read(address.into(), ReadKind::Data);
            }
            4 => {
                let address = u16::from_le_bytes([
                    $cpu.state.target_first_byte,
                    $cpu.state.target_second_byte,
                ]);
                let value = $bus.read(address, ReadKind::Data);
                arith_operand_cycle!($cpu, $bus, value, $binary_op);
            }
            5 => arith_decimal_cycle!($cpu, $bus, $decimal_op),
            _ => invalid_cycle!($cpu),
        }
    };
}

macro_rules! impl_arith_indirect_y {
    ($cpu:expr, $bus:expr, $binary_op:ident, $decimal_op:ident) => {
        match $cpu.state.cycle {
            0 => {
                $cpu.state.operand_first_byte = fetch_operand($cpu, $bus);
            }
            1 => {
                $cpu.state.target_first_byte =
                    $bus.read($cpu.state.operand_first_byte.into(), ReadKind::Data);
            }
            2 => {
                let address = $cpu.state.operand_first_byte.wrapping_add(1);
                $cpu.state.target_second_byte = $bus.read(address.into(), ReadKind::Data);
            }
            3 => {
                let (address_lsb, overflowed) =
                    $cpu.state.target_first_byte.overflowing_add($cpu.registers.y);

                if overflowed {
                    $bus.read(last_instruction_byte_addr($cpu), ReadKind::Data);
                } else {
                    let address = u16::from_le_bytes([address_lsb, $cpu.state.target_second_byte]);
                    let value = $bus.read(address, ReadKind::Data);
                    arith_operand_cycle!($cpu, $bus, value, $binary_op, skip_next);
                }
            }
            4 => {
                let address = u16::from_le_bytes([
                    $cpu.state.target_first_byte,
                    $cpu.state.target_second_byte,
                ])
                .wrapping_add($cpu.registers.y.into());
                let value = $bus.read(address, ReadKind::Data);
                arith_operand_cycle!($cpu, $bus, value, $binary_op);
            }
            5 => arith_decimal_cycle!($cpu, $bus, $decimal_op),
            _ => invalid_cycle!($cpu),
        }
    };
}

macro_rules! impl_arith_instruction {
    (immediate, $($rest:tt)*) => {
        impl_arith_immediate!($($rest)*)
    };
    (zero_page, $($rest:tt)*) => {
        impl_arith_zero_page!($($rest)*)
    };
    (zero_page_x, $($rest:tt)*) => {
        impl_arith_zero_page_x!($($rest)*)
    };
    (absolute, $($rest:tt)*) => {
        impl_arith_absolute!($($rest)*)
    };
    (absolute_x, $($rest:tt)*) => {
        impl_arith_absolute_indexed!(index: x, $($rest)*)
    };
    (absolute_y, $($rest:tt)*) => {
        impl_arith_absolute_indexed!(index: y, $($rest)*)
    };
    (indirect, $($rest:tt)*) => {
        impl_arith_indirect!($($rest)*)
    };
    (indirect_x, $($rest:tt)*) => {
        impl_arith_indirect_x!($($rest)*)
    };
    (indirect_y, $($rest:tt)*) => {
        impl_arith_indirect_y!($($rest)*)
    };
}

// ADC, SBC
macro_rules! impl_arith_fn {
    ($name:ident, $addressing_mode:tt, $binary_op:ident, $decimal_op:ident) => {
        fn $name<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
            impl_arith_instruction!($addressing_mode, cpu, bus, $binary_op, $decimal_op);
        }
    };
}

impl_arith_fn!(adc_immediate, immediate, add, add_decimal);
impl_arith_fn!(adc_zero_page, zero_page, add, add_decimal);
impl_arith_fn!(adc_zero_page_x, zero_page_x, add, add_decimal);
impl_arith_fn!(adc_absolute, absolute, add, add_decimal);
impl_arith_fn!(adc_absolute_x, absolute_x, add, add_decimal);
impl_arith_fn!(adc_absolute_y, absolute_y, add, add_decimal);
impl_arith_fn!(adc_indirect, indirect, add, add_decimal);
impl_arith_fn!(adc_indirect_x, indirect_x, add, add_decimal);
impl_arith_fn!(adc_indirect_y, indirect_y, add, add_decimal);

impl_arith_fn!(sbc_immediate, immediate, subtract, subtract_decimal);
impl_arith_fn!(sbc_zero_page, zero_page, subtract, subtract_decimal);
impl_arith_fn!(sbc_zero_page_x, zero_page_x, subtract, subtract_decimal);
impl_arith_fn!(sbc_absolute, absolute, subtract, subtract_decimal);
impl_arith_fn!(sbc_absolute_x, absolute_x, subtract, subtract_decimal);
impl_arith_fn!(sbc_absolute_y, absolute_y, subtract, subtract_decimal);
impl_arith_fn!(sbc_indirect, indirect, subtract, subtract_decimal);
impl_arith_fn!(sbc_indirect_x, indirect_x, subtract, subtract_decimal);
impl_arith_fn!(sbc_indirect_y, indirect_y, subtract, subtract_decimal);

fn and(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    let result = accumulator & value;
    flags.set_negative(result.bit(7)).set_zero(result == 0);
    result
}

// AND
macro_rules! impl_and {
    ($name:ident, $addressing_mode:tt) => {
        impl_read_fn!($name, $addressing_mode, |operand, registers| {
            registers.accumulator = and(registers.accumulator, operand, &mut registers.status);
        });
    };
}

impl_and!(and_immediate, immediate);
impl_and!(and_zero_page, zero_page);
impl_and!(and_zero_page_x, zero_page_x);
impl_and!(and_absolute, absolute);
impl_and!(and_absolute_x, absolute_x);
impl_and!(and_absolute_y, absolute_y);
impl_and!(and_indirect, indirect);
impl_and!(and_indirect_x, indirect_x);
impl_and!(and_indirect_y, indirect_y);

fn bit_test(accumulator: u8, value: u8, flags: &mut StatusFlags) {
    flags.set_negative(value.bit(7)).set_overflow(value.bit(6)).set_zero(accumulator & value == 0);
}

// BIT
macro_rules! impl_bit_test {
    ($name:ident, $addressing_mode:tt) => {
        impl_read_fn!($name, $addressing_mode, |operand, registers| {
            bit_test(registers.accumulator, operand, &mut registers.status);
        });
    };
}

impl_bit_test!(bit_zero_page, zero_page);
impl_bit_test!(bit_zero_page_x, zero_page_x);
impl_bit_test!(bit_absolute, absolute);
impl_bit_test!(bit_absolute_x, absolute_x);

// BIT # only affects Z; N and V are untouched
impl_read_fn!(bit_immediate, immediate, |operand, registers| {
    registers.status.set_zero(registers.accumulator & operand == 0);
});

fn compare(register: u8, value: u8, flags: &mut StatusFlags) {
    flags
        .set_negative(register.wrapping_sub(value).bit(7))
        .set_zero(register == value)
        .set_carry(register >= value);
}

// CMP, CPX, CPY
macro_rules! impl_compare {
    ($name:ident, $register:ident, $addressing_mode:tt) => {
        impl_read_fn!($name, $addressing_mode, |operand, registers| {
            compare(registers.$register, operand, &mut registers.status);
        });
    };
}

impl_compare!(cmp_immediate, accumulator, immediate);
impl_compare!(cmp_zero_page, accumulator, zero_page);
impl_compare!(cmp_zero_page_x, accumulator, zero_page_x);
impl_compare!(cmp_absolute, accumulator, absolute);
impl_compare!(cmp_absolute_x, accumulator, absolute_x);
impl_compare!(cmp_absolute_y, accumulator, absolute_y);
impl_compare!(cmp_indirect, accumulator, indirect);
impl_compare!(cmp_indirect_x, accumulator, indirect_x);
impl_compare!(cmp_indirect_y, accumulator, indirect_y);

impl_compare!(cpx_immediate, x, immediate);
impl_compare!(cpx_zero_page, x, zero_page);
impl_compare!(cpx_absolute, x, absolute);

impl_compare!(cpy_immediate, y, immediate);
impl_compare!(cpy_zero_page, y, zero_page);
impl_compare!(cpy_absolute, y, absolute);

fn xor(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    let result = accumulator ^ value;
    flags.set_negative(result.bit(7)).set_zero(result == 0);
    result
}

// EOR
macro_rules! impl_xor {
    ($name:ident, $addressing_mode:tt) => {
        impl_read_fn!($name, $addressing_mode, |operand, registers| {
            registers.accumulator = xor(registers.accumulator, operand, &mut registers.status);
        });
    };
}

impl_xor!(eor_immediate, immediate);
impl_xor!(eor_zero_page, zero_page);
impl_xor!(eor_zero_page_x, zero_page_x);
impl_xor!(eor_absolute, absolute);
impl_xor!(eor_absolute_x, absolute_x);
impl_xor!(eor_absolute_y, absolute_y);
impl_xor!(eor_indirect, indirect);
impl_xor!(eor_indirect_x, indirect_x);
impl_xor!(eor_indirect_y, indirect_y);

fn or(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    let result = accumulator | value;
    flags.set_negative(result.bit(7)).set_zero(result == 0);
    result
}

// ORA
macro_rules! impl_or {
    ($name:ident, $addressing_mode:tt) => {
        impl_read_fn!($name, $addressing_mode, |operand, registers| {
            registers.accumulator = or(registers.accumulator, operand, &mut registers.status);
        });
    };
}

impl_or!(ora_immediate, immediate);
impl_or!(ora_zero_page, zero_page);
impl_or!(ora_zero_page_x, zero_page_x);
impl_or!(ora_absolute, absolute);
impl_or!(ora_absolute_x, absolute_x);
impl_or!(ora_absolute_y, absolute_y);
impl_or!(ora_indirect, indirect);
impl_or!(ora_indirect_x, indirect_x);
impl_or!(ora_indirect_y, indirect_y);

fn shift_left(value: u8, flags: &mut StatusFlags) -> u8 {
    let shifted = value << 1;
    flags.set_carry(value.bit(7)).set_negative(shifted.bit(7)).set_zero(shifted == 0);
    shifted
}

// ASL
macro_rules! impl_shift_left {
    ($name:ident, $addressing_mode:tt) => {
        impl_modify_fn!($name, $addressing_mode, |operand, registers| {
            shift_left(operand, &mut registers.status)
        });
    };
}

impl_shift_left!(asl_accumulator, accumulator);
impl_shift_left!(asl_zero_page, zero_page);
impl_shift_left!(asl_zero_page_x, zero_page_x);
impl_shift_left!(asl_absolute, absolute);
impl_shift_left!(asl_absolute_x, absolute_x);

fn decrement(value: u8, flags: &mut StatusFlags) -> u8 {
    let decremented = value.wrapping_sub(1);
    flags.set_negative(decremented.bit(7)).set_zero(decremented == 0);
    decremented
}

// DEC
macro_rules! impl_decrement {
    ($name:ident, $addressing_mode:tt) => {
        impl_modify_fn!($name, $addressing_mode, |operand, registers| {
            decrement(operand, &mut registers.status)
        });
    };
}

impl_decrement!(dec_accumulator, accumulator);
impl_decrement!(dec_zero_page, zero_page);
impl_decrement!(dec_zero_page_x, zero_page_x);
impl_decrement!(dec_absolute, absolute);
impl_decrement!(dec_absolute_x, absolute_x_slower);

fn increment(value: u8, flags: &mut StatusFlags) -> u8 {
    let incremented = value.wrapping_add(1);
    flags.set_negative(incremented.bit(7)).set_zero(incremented == 0);
    incremented
}

// INC
macro_rules! impl_increment {
    ($name:ident, $addressing_mode:tt) => {
        impl_modify_fn!($name, $addressing_mode, |operand, registers| {
            increment(operand, &mut registers.status)
        });
    };
}

impl_increment!(inc_accumulator, accumulator);
impl_increment!(inc_zero_page, zero_page);
impl_increment!(inc_zero_page_x, zero_page_x);
impl_increment!(inc_absolute, absolute);
impl_increment!(inc_absolute_x, absolute_x_slower);

fn logical_shift_right(value: u8, flags: &mut StatusFlags) -> u8 {
    let shifted = value >> 1;
    flags.set_carry(value.bit(0)).set_negative(false).set_zero(shifted == 0);
    shifted
}

// LSR
macro_rules! impl_logical_shift_right {
    ($name:ident, $addressing_mode:tt) => {
        impl_modify_fn!($name, $addressing_mode, |operand, registers| {
            logical_shift_right(operand, &mut registers.status)
        });
    };
}

impl_logical_shift_right!(lsr_accumulator, accumulator);
impl_logical_shift_right!(lsr_zero_page, zero_page);
impl_logical_shift_right!(lsr_zero_page_x, zero_page_x);
impl_logical_shift_right!(lsr_absolute, absolute);
impl_logical_shift_right!(lsr_absolute_x, absolute_x);

fn rotate_left(value: u8, flags: &mut StatusFlags) -> u8 {
    let rotated = (value << 1) | u8::from(flags.carry);
    flags.set_carry(value.bit(7)).set_negative(rotated.bit(7)).set_zero(rotated == 0);
    rotated
}

// ROL
macro_rules! impl_rotate_left {
    ($name:ident, $addressing_mode:tt) => {
        impl_modify_fn!($name, $addressing_mode, |operand, registers| {
            rotate_left(operand, &mut registers.status)
        });
    };
}

impl_rotate_left!(rol_accumulator, accumulator);
impl_rotate_left!(rol_zero_page, zero_page);
impl_rotate_left!(rol_zero_page_x, zero_page_x);
impl_rotate_left!(rol_absolute, absolute);
impl_rotate_left!(rol_absolute_x, absolute_x);

fn rotate_right(value: u8, flags: &mut StatusFlags) -> u8 {
    let rotated = (value >> 1) | (u8::from(flags.carry) << 7);
    flags.set_carry(value.bit(0)).set_negative(rotated.bit(7)).set_zero(rotated == 0);
    rotated
}

// ROR
macro_rules! impl_rotate_right {
    ($name:ident, $addressing_mode:tt) => {
        impl_modify_fn!($name, $addressing_mode, |operand, registers| {
            rotate_right(operand, &mut registers.status)
        });
    };
}

impl_rotate_right!(ror_accumulator, accumulator);
impl_rotate_right!(ror_zero_page, zero_page);
impl_rotate_right!(ror_zero_page_x, zero_page_x);
impl_rotate_right!(ror_absolute, absolute);
impl_rotate_right!(ror_absolute_x, absolute_x);

// TSB: Z from A & M before setting the accumulator bits in memory
macro_rules! impl_test_and_set_bits {
    ($name:ident, $addressing_mode:tt) => {
        impl_modify_fn!($name, $addressing_mode, |operand, registers| {
            registers.status.set_zero(registers.accumulator & operand == 0);
            operand | registers.accumulator
        });
    };
}

impl_test_and_set_bits!(tsb_zero_page, zero_page);
impl_test_and_set_bits!(tsb_absolute, absolute);

// TRB
macro_rules! impl_test_and_reset_bits {
    ($name:ident, $addressing_mode:tt) => {
        impl_modify_fn!($name, $addressing_mode, |operand, registers| {
            registers.status.set_zero(registers.accumulator & operand == 0);
            operand & !registers.accumulator
        });
    };
}

impl_test_and_reset_bits!(trb_zero_page, zero_page);
impl_test_and_reset_bits!(trb_absolute, absolute);

// RMB/SMB read and rewrite a zero page byte without touching the flags;
// unlike the other read-modify-write instructions they do not assert MLB
fn zero_page_bit_modify<B: BusInterface>(cpu: &mut W65c02, bus: &mut B, mask: u8, set: bool) {
    match cpu.state.cycle {
        0 => {
            cpu.state.operand_first_byte = fetch_operand(cpu, bus);
        }
        1 => {
            cpu.state.target_first_byte =
                bus.read(cpu.state.operand_first_byte.into(), ReadKind::Data);
        }
        2 => {
            bus.read(cpu.state.operand_first_byte.into(), ReadKind::Data);
        }
        3 => {
            final_cycle(cpu);

            let value = if set {
                cpu.state.target_first_byte | mask
            } else {
                cpu.state.target_first_byte & !mask
            };
            bus.write(cpu.state.operand_first_byte.into(), value, WriteKind::Data);
        }
        _ => invalid_cycle!(cpu),
    }
}

fn rmb<B: BusInterface>(cpu: &mut W65c02, bus: &mut B, mask: u8) {
    zero_page_bit_modify(cpu, bus, mask, false);
}

fn smb<B: BusInterface>(cpu: &mut W65c02, bus: &mut B, mask: u8) {
    zero_page_bit_modify(cpu, bus, mask, true);
}

// CLC, CLD, CLI, CLV, SEC, SED, SEI
macro_rules! impl_set_status_flag {
    ($name:ident, $flag:ident = $value:expr) => {
        impl_registers_only_fn!($name, |registers| {
            registers.status.$flag = $value;
        });
    };
}

impl_set_status_flag!(clc, carry = false);
impl_set_status_flag!(cld, decimal = false);
impl_set_status_flag!(cli, interrupt_disable = false);
impl_set_status_flag!(clv, overflow = false);
impl_set_status_flag!(sec, carry = true);
impl_set_status_flag!(sed, decimal = true);
impl_set_status_flag!(sei, interrupt_disable = true);

// INX, INY
macro_rules! impl_increment_register {
    ($name:ident, $register:ident) => {
        impl_registers_only_fn!($name, |registers| {
            let value = registers.$register.wrapping_add(1);
            registers.$register = value;
            registers.status.set_negative(value.bit(7)).set_zero(value == 0);
        });
    };
}

impl_increment_register!(inx, x);
impl_increment_register!(iny, y);

// DEX, DEY
macro_rules! impl_decrement_register {
    ($name:ident, $register:ident) => {
        impl_registers_only_fn!($name, |registers| {
            let value = registers.$register.wrapping_sub(1);
            registers.$register = value;
            registers.status.set_negative(value.bit(7)).set_zero(value == 0);
        });
    };
}

impl_decrement_register!(dex, x);
impl_decrement_register!(dey, y);

macro_rules! set_transfer_flags {
    (sp, $registers:expr, $value:expr) => {};
    ($to:ident, $registers:expr, $value:expr) => {
        $registers.status.set_negative($value.bit(7)).set_zero($value == 0);
    };
}

// TAX, TAY, TSX, TXA, TXS, TYA
macro_rules! impl_register_transfer {
    ($name:ident, $from:ident -> $to:ident) => {
        impl_registers_only_fn!($name, |registers| {
            let value = registers.$from;
            registers.$to = value;
            set_transfer_flags!($to, registers, value);
        });
    };
}

impl_register_transfer!(tax, accumulator -> x);
impl_register_transfer!(tay, accumulator -> y);
impl_register_transfer!(tsx, sp -> x);
impl_register_transfer!(txa, x -> accumulator);
impl_register_transfer!(txs, x -> sp);
impl_register_transfer!(tya, y -> accumulator);

// NOP
impl_registers_only_fn!(nop, |_registers| {});

// 2-byte NOPs on the undefined immediate encodings
fn nop_immediate<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
    final_cycle(cpu);

    fetch_operand(cpu, bus);
}

impl_read_fn!(nop_zero_page, zero_page, |_operand, _registers| {});
impl_read_fn!(nop_zero_page_x, zero_page_x, |_operand, _registers| {});
impl_read_fn!(nop_absolute, absolute, |_operand, _registers| {});

// $5C is in a class of its own: 3 bytes, 8 cycles, wanders off to $FFFF
fn nop_5c<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
    match cpu.state.cycle {
        0 => {
            cpu.state.operand_first_byte = fetch_operand(cpu, bus);
        }
        1 => {
            cpu.state.operand_second_byte = fetch_operand(cpu, bus);
        }
        2 => {
            let address = u16::from_le_bytes([cpu.state.operand_first_byte, 0xFF]);
            bus.read(address, ReadKind::Data);
        }
        3 | 4 | 5 => {
            bus.read(0xFFFF, ReadKind::Data);
        }
        6 => {
            final_cycle(cpu);

            bus.read(0xFFFF, ReadKind::Data);
        }
        _ => invalid_cycle!(cpu),
    }
}

// BCC, BCS, BEQ, BMI, BNE, BPL, BVC, BVS, BRA
macro_rules! impl_branch {
    ($name:ident, $cond:expr) => {
        fn $name<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
            match cpu.state.cycle {
                0 => {
                    cpu.state.operand_first_byte = fetch_operand(cpu, bus);

                    let taken: fn(&StatusFlags) -> bool = $cond;
                    if !taken(&cpu.registers.status) {
                        final_cycle(cpu);
                    }
                }
                1 => {
                    let offset = cpu.state.operand_first_byte as i8;
                    let target = cpu.registers.pc.wrapping_add_signed(offset.into());

                    if cpu.registers.pc & 0xFF00 == target & 0xFF00 {
                        final_cycle(cpu);
                        bus.read(cpu.registers.pc, ReadKind::Data);
                        cpu.registers.pc = target;
                    } else {
                        bus.read(cpu.registers.pc, ReadKind::Data);
                    }
                }
                2 => {
                    final_cycle(cpu);

                    let offset = cpu.state.operand_first_byte as i8;
                    let target = cpu.registers.pc.wrapping_add_signed(offset.into());

                    bus.read((cpu.registers.pc & 0xFF00) | (target & 0x00FF), ReadKind::Data);

                    cpu.registers.pc = target;
                }
                _ => invalid_cycle!(cpu),
            }
        }
    };
}

impl_branch!(bcc, |status| !status.carry);
impl_branch!(bcs, |status| status.carry);
impl_branch!(beq, |status| status.zero);
impl_branch!(bmi, |status| status.negative);
impl_branch!(bne, |status| !status.zero);
impl_branch!(bpl, |status| !status.negative);
impl_branch!(bvc, |status| !status.overflow);
impl_branch!(bvs, |status| status.overflow);
impl_branch!(bra, |_status| true);

// BBR/BBS: test a zero page bit, then branch. 5 cycles untaken, plus the
// usual 1 or 2 to take the branch.
fn zero_page_bit_branch<B: BusInterface>(cpu: &mut W65c02, bus: &mut B, mask: u8, branch_on_set: bool) {
    match cpu.state.cycle {
        0 => {
            cpu.state.operand_first_byte = fetch_operand(cpu, bus);
        }
        1 => {
            cpu.state.target_first_byte =
                bus.read(cpu.state.operand_first_byte.into(), ReadKind::Data);
        }
        2 => {
            bus.read(cpu.state.operand_first_byte.into(), ReadKind::Data);
        }
        3 => {
            cpu.state.operand_second_byte = fetch_operand(cpu, bus);

            let bit_set = cpu.state.target_first_byte & mask != 0;
            if bit_set != branch_on_set {
                final_cycle(cpu);
            }
        }
        4 => {
            let offset = cpu.state.operand_second_byte as i8;
            let target = cpu.registers.pc.wrapping_add_signed(offset.into());

            if cpu.registers.pc & 0xFF00 == target & 0xFF00 {
                final_cycle(cpu);
                bus.read(cpu.registers.pc, ReadKind::Data);
                cpu.registers.pc = target;
            } else {
                bus.read(cpu.registers.pc, ReadKind::Data);
            }
        }
        5 => {
            final_cycle(cpu);

            let offset = cpu.state.operand_second_byte as i8;
            let target = cpu.registers.pc.wrapping_add_signed(offset.into());

            bus.read((cpu.registers.pc & 0xFF00) | (target & 0x00FF), ReadKind::Data);

            cpu.registers.pc = target;
        }
        _ => invalid_cycle!(cpu),
    }
}

fn bbr<B: BusInterface>(cpu: &mut W65c02, bus: &mut B, mask: u8) {
    zero_page_bit_branch(cpu, bus, mask, false);
}

fn bbs<B: BusInterface>(cpu: &mut W65c02, bus: &mut B, mask: u8) {
    zero_page_bit_branch(cpu, bus, mask, true);
}

// JMP
fn jmp_absolute<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
    match cpu.state.cycle {
        0 => {
            cpu.state.operand_first_byte = fetch_operand(cpu, bus);
        }
        1 => {
            final_cycle(cpu);

            let address_msb = bus.read(cpu.registers.pc, ReadKind::Data);
            cpu.registers.pc = u16::from_le_bytes([cpu.state.operand_first_byte, address_msb]);
        }
        _ => invalid_cycle!(cpu),
    }
}

// JMP ($nnnn); the CMOS part spends an extra cycle and reads the pointer
// correctly across a page boundary
fn jmp_indirect<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
    match cpu.state.cycle {
        0 => {
            cpu.state.operand_first_byte = fetch_operand(cpu, bus);
        }
        1 => {
            cpu.state.operand_second_byte = fetch_operand(cpu, bus);
        }
        2 => {
            bus.read(last_instruction_byte_addr(cpu), ReadKind::Data);
        }
        3 => {
            let address =
                u16::from_le_bytes([cpu.state.operand_first_byte, cpu.state.operand_second_byte]);
            cpu.state.target_first_byte = bus.read(address, ReadKind::Data);
        }
        4 => {
            final_cycle(cpu);

            let address =
                u16::from_le_bytes([cpu.state.operand_first_byte, cpu.state.operand_second_byte])
                    .wrapping_add(1);
            let pc_msb = bus.read(address, ReadKind::Data);

            cpu.registers.pc = u16::from_le_bytes([cpu.state.target_first_byte, pc_msb]);
        }
        _ => invalid_cycle!(cpu),
    }
}

// JMP ($nnnn,X)
fn jmp_indirect_x<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
    match cpu.state.cycle {
        0 => {
            cpu.state.operand_first_byte = fetch_operand(cpu, bus);
        }
        1 => {
            cpu.state.operand_second_byte = fetch_operand(cpu, bus);
        }
        2 => {
            bus.read(last_instruction_byte_addr(cpu), ReadKind::Data);
        }
        3 => {
            let address =
                u16::from_le_bytes([cpu.state.operand_first_byte, cpu.state.operand_second_byte])
                    .wrapping_add(cpu.registers.x.into());
            cpu.state.target_first_byte = bus.read(address, ReadKind::Data);
        }
        4 => {
            final_cycle(cpu);

            let address =
                u16::from_le_bytes([cpu.state.operand_first_byte, cpu.state.operand_second_byte])
                    .wrapping_add(cpu.registers.x.into())
                    .wrapping_add(1);
            let pc_msb = bus.read(address, ReadKind::Data);

            cpu.registers.pc = u16::from_le_bytes([cpu.state.target_first_byte, pc_msb]);
        }
        _ => invalid_cycle!(cpu),
    }
}

macro_rules! read_register_for_push {
    (accumulator, $registers:expr) => {
        $registers.accumulator
    };
    (x, $registers:expr) => {
        $registers.x
    };
    (y, $registers:expr) => {
        $registers.y
    };
    (p, $registers:expr) => {
        $registers.status.to_byte(StatusReadContext::PushStack)
    };
}

// PHA, PHP, PHX, PHY
macro_rules! impl_push_stack {
    ($name:ident, $register:tt) => {
        fn $name<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
            match cpu.state.cycle {
                0 => {
                    bus.read(cpu.registers.pc, ReadKind::Data);
                }
                1 => {
                    final_cycle(cpu);

                    let address = u16::from_be_bytes([0x01, cpu.registers.sp]);
                    let value = read_register_for_push!($register, cpu.registers);
                    bus.write(address, value, WriteKind::Push);
                    cpu.registers.sp = cpu.registers.sp.wrapping_sub(1);
                }
                _ => invalid_cycle!(cpu),
            }
        }
    };
}

impl_push_stack!(pha, accumulator);
impl_push_stack!(php, p);
impl_push_stack!(phx, x);
impl_push_stack!(phy, y);

macro_rules! write_register_for_pull {
    (accumulator, $registers:expr, $value:expr) => {{
        let value = $value;
        $registers.accumulator = value;
        $registers.status.set_negative(value.bit(7)).set_zero(value == 0);
    }};
    (x, $registers:expr, $value:expr) => {{
        let value = $value;
        $registers.x = value;
        $registers.status.set_negative(value.bit(7)).set_zero(value == 0);
    }};
    (y, $registers:expr, $value:expr) => {{
        let value = $value;
        $registers.y = value;
        $registers.status.set_negative(value.bit(7)).set_zero(value == 0);
    }};
    (p, $registers:expr, $value:expr) => {
        $registers.status = StatusFlags::from_byte($value);
    };
}

// PLA, PLP, PLX, PLY
macro_rules! impl_pull_stack {
    ($name:ident, $register:tt) => {
        fn $name<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
            match cpu.state.cycle {
                0 => {
                    bus.read(cpu.registers.pc, ReadKind::Data);
                }
                1 => {
                    bus.read(u16::from_be_bytes([0x01, cpu.registers.sp]), ReadKind::Stack);
                }
                2 => {
                    final_cycle(cpu);

                    cpu.registers.sp = cpu.registers.sp.wrapping_add(1);
                    let value =
                        bus.read(u16::from_be_bytes([0x01, cpu.registers.sp]), ReadKind::Stack);
                    write_register_for_pull!($register, cpu.registers, value);
                }
                _ => invalid_cycle!(cpu),
            }
        }
    };
}

impl_pull_stack!(pla, accumulator);
impl_pull_stack!(plp, p);
impl_pull_stack!(plx, x);
impl_pull_stack!(ply, y);

#[inline]
fn push_pc_msb<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
    let address = u16::from_be_bytes([0x01, cpu.registers.sp]);
    bus.write(address, cpu.registers.pc.msb(), WriteKind::Push);
    cpu.registers.sp = cpu.registers.sp.wrapping_sub(1);
}

#[inline]
fn push_pc_lsb<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
    let address = u16::from_be_bytes([0x01, cpu.registers.sp]);
    bus.write(address, cpu.registers.pc.lsb(), WriteKind::Push);
    cpu.registers.sp = cpu.registers.sp.wrapping_sub(1);
}

#[inline]
fn pull_pc_lsb<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
    cpu.registers.sp = cpu.registers.sp.wrapping_add(1);
    cpu.registers.pc =
        bus.read(u16::from_be_bytes([0x01, cpu.registers.sp]), ReadKind::Stack).into();
}

#[inline]
fn pull_pc_msb<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
    cpu.registers.sp = cpu.registers.sp.wrapping_add(1);
    let pc_msb = bus.read(u16::from_be_bytes([0x01, cpu.registers.sp]), ReadKind::Stack);
    cpu.registers.pc.set_msb(pc_msb);
}

// JSR (jump to subroutine)
fn jsr<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
    match cpu.state.cycle {
        0 => {
            cpu.state.operand_first_byte = fetch_operand(cpu, bus);
        }
        1 => {
            // Spurious stack read
            bus.read(u16::from_be_bytes([0x01, cpu.registers.sp]), ReadKind::Stack);
        }
        2 => {
            push_pc_msb(cpu, bus);
        }
        3 => {
            push_pc_lsb(cpu, bus);
        }
        4 => {
            final_cycle(cpu);

            let address_msb = bus.read(cpu.registers.pc, ReadKind::Data);
            cpu.registers.pc = u16::from_le_bytes([cpu.state.operand_first_byte, address_msb]);
        }
        _ => invalid_cycle!(cpu),
    }
}

// RTS (return from subroutine)
fn rts<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
    match cpu.state.cycle {
        0 => {
            // Spurious operand read
            bus.read(cpu.registers.pc, ReadKind::Data);
        }
        1 => {
            // Spurious stack read
            bus.read(u16::from_be_bytes([0x01, cpu.registers.sp]), ReadKind::Stack);
        }
        2 => {
            pull_pc_lsb(cpu, bus);
        }
        3 => {
            pull_pc_msb(cpu, bus);
        }
        4 => {
            final_cycle(cpu);

            // Fetch operand and increment PC, ignore fetch result
            fetch_operand(cpu, bus);
        }
        _ => invalid_cycle!(cpu),
    }
}

// RTI (return from interrupt)
fn rti<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
    match cpu.state.cycle {
        0 => {
            // Spurious operand read
            bus.read(cpu.registers.pc, ReadKind::Data);
        }
        1 => {
            // Spurious stack read
            bus.read(u16::from_be_bytes([0x01, cpu.registers.sp]), ReadKind::Stack);
        }
        2 => {
            cpu.registers.sp = cpu.registers.sp.wrapping_add(1);
            let value = bus.read(u16::from_be_bytes([0x01, cpu.registers.sp]), ReadKind::Stack);
            cpu.registers.status = StatusFlags::from_byte(value);
        }
        3 => {
            pull_pc_lsb(cpu, bus);
        }
        4 => {
            final_cycle(cpu);

            pull_pc_msb(cpu, bus);
        }
        _ => invalid_cycle!(cpu),
    }
}

// BRK (force interrupt); an NMI edge arriving before the vector cycles
// hijacks the vector
fn brk<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
    match cpu.state.cycle {
        0 => {
            // Signature byte
            fetch_operand(cpu, bus);
        }
        1 => {
            push_pc_msb(cpu, bus);
        }
        2 => {
            push_pc_lsb(cpu, bus);
        }
        3 => {
            let address = u16::from_be_bytes([0x01, cpu.registers.sp]);
            let status = cpu.registers.status.to_byte(StatusReadContext::Brk);
            bus.write(address, status, WriteKind::Push);
            cpu.registers.sp = cpu.registers.sp.wrapping_sub(1);

            cpu.registers.status.decimal = false;
            cpu.registers.status.interrupt_disable = true;

            cpu.state.interrupt_vector = if cpu.nmi_edge {
                cpu.nmi_edge = false;
                cpu.nmi_pending = false;
                NMI_VECTOR
            } else {
                IRQ_VECTOR
            };
        }
        4 => {
            cpu.state.target_first_byte = bus.read_vector(cpu.state.interrupt_vector);
        }
        5 => {
            final_cycle(cpu);

            let pc_msb = bus.read_vector(cpu.state.interrupt_vector + 1);
            cpu.registers.pc = u16::from_le_bytes([cpu.state.target_first_byte, pc_msb]);
        }
        _ => invalid_cycle!(cpu),
    }
}

// Hardware interrupt servicing routine; the preempted opcode fetch has
// already happened
fn interrupt_service_routine<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
    match cpu.state.cycle {
        0 => {
            // Spurious operand read
            bus.read(cpu.registers.pc, ReadKind::Data);
        }
        1 => {
            push_pc_msb(cpu, bus);
        }
        2 => {
            push_pc_lsb(cpu, bus);
        }
        3 => {
            let address = u16::from_be_bytes([0x01, cpu.registers.sp]);
            let status = cpu.registers.status.to_byte(StatusReadContext::HardwareInterruptHandler);
            bus.write(address, status, WriteKind::Push);
            cpu.registers.sp = cpu.registers.sp.wrapping_sub(1);

            cpu.registers.status.decimal = false;
            if cpu.state.interrupt_vector == IRQ_VECTOR {
                cpu.registers.status.interrupt_disable = true;
            }
        }
        4 => {
            cpu.state.target_first_byte = bus.read_vector(cpu.state.interrupt_vector);
        }
        5 => {
            final_cycle(cpu);

            cpu.state.executing_interrupt = false;
            let pc_msb = bus.read_vector(cpu.state.interrupt_vector + 1);
            cpu.registers.pc = u16::from_le_bytes([cpu.state.target_first_byte, pc_msb]);
        }
        _ => invalid_cycle!(cpu),
    }
}

// WAI
fn wai<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
    match cpu.state.cycle {
        0 => {
            bus.read(cpu.registers.pc, ReadKind::Data);
        }
        1 => {
            final_cycle(cpu);

            bus.read(cpu.registers.pc, ReadKind::Data);
            cpu.set_mode(CpuMode::AwaitingInterrupt);
        }
        _ => invalid_cycle!(cpu),
    }
}

// STP
fn stp<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
    match cpu.state.cycle {
        0 => {
            bus.read(cpu.registers.pc, ReadKind::Data);
        }
        1 => {
            final_cycle(cpu);

            bus.read(cpu.registers.pc, ReadKind::Data);
            cpu.set_mode(CpuMode::Stopped);
        }
        _ => invalid_cycle!(cpu),
    }
}

/// The 7-cycle reset sequence: two spurious fetches, three spurious stack
/// reads, then the reset vector pull.
pub(crate) fn reset_cycle<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
    match cpu.state.cycle {
        0 => {
            cpu.state.instruction_complete = false;
            bus.read(cpu.registers.pc, ReadKind::Preempted);
        }
        1 => {
            bus.read(cpu.registers.pc, ReadKind::Data);
        }
        2 | 3 | 4 => {
            bus.read(u16::from_be_bytes([0x01, cpu.registers.sp]), ReadKind::Stack);
            cpu.registers.sp = cpu.registers.sp.wrapping_sub(1);
        }
        5 => {
            cpu.registers.status.decimal = false;
            cpu.registers.status.interrupt_disable = true;
            cpu.state.target_first_byte = bus.read_vector(RESET_VECTOR);
        }
        6 => {
            let pc_msb = bus.read_vector(RESET_VECTOR + 1);
            cpu.registers.pc = u16::from_le_bytes([cpu.state.target_first_byte, pc_msb]);
            cpu.set_mode(CpuMode::Running);
            final_cycle(cpu);
        }
        _ => invalid_cycle!(cpu),
    }

    cpu.state.cycle += 1;
}

/// One dormant or waking cycle while the CPU sits in `WAI`. Waking takes two
/// cycles; the interrupt (if unmasked) is serviced at the following
/// instruction boundary.
pub(crate) fn await_interrupt_cycle<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
    if cpu.state.cycle == WAI_WAKE_CYCLE {
        cpu.check_irq_edge();
        bus.read(cpu.registers.pc, ReadKind::Data);
        cpu.set_mode(CpuMode::Running);
        cpu.state.cycle = 0;
        return;
    }

    if cpu.irq || cpu.nmi_edge {
        bus.read(cpu.registers.pc, ReadKind::Data);
        cpu.state.cycle = WAI_WAKE_CYCLE;
        return;
    }

    cpu.check_irq_edge();
    bus.read(cpu.registers.pc, ReadKind::Data);
}

/// The undefined opcodes on the $x3 and $xB columns are single-cycle NOPs:
/// they retire with their own fetch cycle.
pub(crate) fn is_single_cycle(opcode: u8) -> bool {
    match opcode & 0x0F {
        0x03 => true,
        0x0B => !matches!(opcode, 0xCB | 0xDB),
        _ => false,
    }
}

pub(crate) fn execute_cycle<B: BusInterface>(cpu: &mut W65c02, bus: &mut B) {
    if cpu.state.executing_interrupt {
        interrupt_service_routine(cpu, bus);
        cpu.state.cycle += 1;
        return;
    }

    match cpu.state.opcode {
        0x00 => brk(cpu, bus),
        0x01 => ora_indirect_x(cpu, bus),
        0x02 | 0x22 | 0x42 | 0x62 | 0x82 | 0xC2 | 0xE2 => nop_immediate(cpu, bus),
        0x04 => tsb_zero_page(cpu, bus),
        0x05 => ora_zero_page(cpu, bus),
        0x06 => asl_zero_page(cpu, bus),
        0x07 => rmb(cpu, bus, 0x01),
        0x08 => php(cpu, bus),
        0x09 => ora_immediate(cpu, bus),
        0x0A => asl_accumulator(cpu, bus),
        0x0C => tsb_absolute(cpu, bus),
        0x0D => ora_absolute(cpu, bus),
        0x0E => asl_absolute(cpu, bus),
        0x0F => bbr(cpu, bus, 0x01),
        0x10 => bpl(cpu, bus),
        0x11 => ora_indirect_y(cpu, bus),
        0x12 => ora_indirect(cpu, bus),
        0x14 => trb_zero_page(cpu, bus),
        0x15 => ora_zero_page_x(cpu, bus),
        0x16 => asl_zero_page_x(cpu, bus),
        0x17 => rmb(cpu, bus, 0x02),
        0x18 => clc(cpu, bus),
        0x19 => ora_absolute_y(cpu, bus),
        0x1A => inc_accumulator(cpu, bus),
        0x1C => trb_absolute(cpu, bus),
        0x1D => ora_absolute_x(cpu, bus),
        0x1E => asl_absolute_x(cpu, bus),
        0x1F => bbr(cpu, bus, 0x02),
        0x20 => jsr(cpu, bus),
        0x21 => and_indirect_x(cpu, bus),
        0x24 => bit_zero_page(cpu, bus),
        0x25 => and_zero_page(cpu, bus),
        0x26 => rol_zero_page(cpu, bus),
        0x27 => rmb(cpu, bus, 0x04),
        0x28 => plp(cpu, bus),
        0x29 => and_immediate(cpu, bus),
        0x2A => rol_accumulator(cpu, bus),
        0x2C => bit_absolute(cpu, bus),
        0x2D => and_absolute(cpu, bus),
        0x2E => rol_absolute(cpu, bus),
        0x2F => bbr(cpu, bus, 0x04),
        0x30 => bmi(cpu, bus),
        0x31 => and_indirect_y(cpu, bus),
        0x32 => and_indirect(cpu, bus),
        0x34 => bit_zero_page_x(cpu, bus),
        0x35 => and_zero_page_x(cpu, bus),
        0x36 => rol_zero_page_x(cpu, bus),
        0x37 => rmb(cpu, bus, 0x08),
        0x38 => sec(cpu, bus),
        0x39 => and_absolute_y(cpu, bus),
        0x3A => dec_accumulator(cpu, bus),
        0x3C => bit_absolute_x(cpu, bus),
        0x3D => and_absolute_x(cpu, bus),
        0x3E => rol_absolute_x(cpu, bus),
        0x3F => bbr(cpu, bus, 0x08),
        0x40 => rti(cpu, bus),
        0x41 => eor_indirect_x(cpu, bus),
        0x44 => nop_zero_page(cpu, bus),
        0x45 => eor_zero_page(cpu, bus),
        0x46 => lsr_zero_page(cpu, bus),
        0x47 => rmb(cpu, bus, 0x10),
        0x48 => pha(cpu, bus),
        0x49 => eor_immediate(cpu, bus),
        0x4A => lsr_accumulator(cpu, bus),
        0x4C => jmp_absolute(cpu, bus),
        0x4D => eor_absolute(cpu, bus),
        0x4E => lsr_absolute(cpu, bus),
        0x4F => bbr(cpu, bus, 0x10),
        0x50 => bvc(cpu, bus),
        0x51 => eor_indirect_y(cpu, bus),
        0x52 => eor_indirect(cpu, bus),
        0x54 | 0xD4 | 0xF4 => nop_zero_page_x(cpu, bus),
        0x55 => eor_zero_page_x(cpu, bus),
        0x56 => lsr_zero_page_x(cpu, bus),
        0x57 => rmb(cpu, bus, 0x20),
        0x58 => cli(cpu, bus),
        0x59 => eor_absolute_y(cpu, bus),
        0x5A => phy(cpu, bus),
        0x5C => nop_5c(cpu, bus),
        0x5D => eor_absolute_x(cpu, bus),
        0x5E => lsr_absolute_x(cpu, bus),
        0x5F => bbr(cpu, bus, 0x20),
        0x60 => rts(cpu, bus),
        0x61 => adc_indirect_x(cpu, bus),
        0x64 => stz_zero_page(cpu, bus),
        0x65 => adc_zero_page(cpu, bus),
        0x66 => ror_zero_page(cpu, bus),
        0x67 => rmb(cpu, bus, 0x40),
        0x68 => pla(cpu, bus),
        0x69 => adc_immediate(cpu, bus),
        0x6A => ror_accumulator(cpu, bus),
        0x6C => jmp_indirect(cpu, bus),
        0x6D => adc_absolute(cpu, bus),
        0x6E => ror_absolute(cpu, bus),
        0x6F => bbr(cpu, bus, 0x40),
        0x70 => bvs(cpu, bus),
        0x71 => adc_indirect_y(cpu, bus),
        0x72 => adc_indirect(cpu, bus),
        0x74 => stz_zero_page_x(cpu, bus),
        0x75 => adc_zero_page_x(cpu, bus),
        0x76 => ror_zero_page_x(cpu, bus),
        0x77 => rmb(cpu, bus, 0x80),
        0x78 => sei(cpu, bus),
        0x79 => adc_absolute_y(cpu, bus),
        0x7A => ply(cpu, bus),
        0x7C => jmp_indirect_x(cpu, bus),
        0x7D => adc_absolute_x(cpu, bus),
        0x7E => ror_absolute_x(cpu, bus),
        0x7F => bbr(cpu, bus, 0x80),
        0x80 => bra(cpu, bus),
        0x81 => sta_indirect_x(cpu, bus),
        0x84 => sty_zero_page(cpu, bus),
        0x85 => sta_zero_page(cpu, bus),
        0x86 => stx_zero_page(cpu, bus),
        0x87 => smb(cpu, bus, 0x01),
        0x88 => dey(cpu, bus),
        0x89 => bit_immediate(cpu, bus),
        0x8A => txa(cpu, bus),
        0x8C => sty_absolute(cpu, bus),
        0x8D => sta_absolute(cpu, bus),
        0x8E => stx_absolute(cpu, bus),
        0x8F => bbs(cpu, bus, 0x01),
        0x90 => bcc(cpu, bus),
        0x91 => sta_indirect_y(cpu, bus),
        0x92 => sta_indirect(cpu, bus),
        0x94 => sty_zero_page_x(cpu, bus),
        0x95 => sta_zero_page_x(cpu, bus),
        0x96 => stx_zero_page_y(cpu, bus),
        0x97 => smb(cpu, bus, 0x02),
        0x98 => tya(cpu, bus),
        0x99 => sta_absolute_y(cpu, bus),
        0x9A => txs(cpu, bus),
        0x9C => stz_absolute(cpu, bus),
        0x9D => sta_absolute_x(cpu, bus),
        0x9E => stz_absolute_x(cpu, bus),
        0x9F => bbs(cpu, bus, 0x02),
        0xA0 => ldy_immediate(cpu, bus),
        0xA1 => lda_indirect_x(cpu, bus),
        0xA2 => ldx_immediate(cpu, bus),
        0xA4 => ldy_zero_page(cpu, bus),
        0xA5 => lda_zero_page(cpu, bus),
        0xA6 => ldx_zero_page(cpu, bus),
        0xA7 => smb(cpu, bus, 0x04),
        0xA8 => tay(cpu, bus),
        0xA9 => lda_immediate(cpu, bus),
        0xAA => tax(cpu, bus),
        0xAC => ldy_absolute(cpu, bus),
        0xAD => lda_absolute(cpu, bus),
        0xAE => ldx_absolute(cpu, bus),
        0xAF => bbs(cpu, bus, 0x04),
        0xB0 => bcs(cpu, bus),
        0xB1 => lda_indirect_y(cpu, bus),
        0xB2 => lda_indirect(cpu, bus),
        0xB4 => ldy_zero_page_x(cpu, bus),
        0xB5 => lda_zero_page_x(cpu, bus),
        0xB6 => ldx_zero_page_y(cpu, bus),
        0xB7 => smb(cpu, bus, 0x08),
        0xB8 => clv(cpu, bus),
        0xB9 => lda_absolute_y(cpu, bus),
        0xBA => tsx(cpu, bus),
        0xBC => ldy_absolute_x(cpu, bus),
        0xBD => lda_absolute_x(cpu, bus),
        0xBE => ldx_absolute_y(cpu, bus),
        0xBF => bbs(cpu, bus, 0x08),
        0xC0 => cpy_immediate(cpu, bus),
        0xC1 => cmp_indirect_x(cpu, bus),
        0xC4 => cpy_zero_page(cpu, bus),
        0xC5 => cmp_zero_page(cpu, bus),
        0xC6 => dec_zero_page(cpu, bus),
        0xC7 => smb(cpu, bus, 0x10),
        0xC8 => iny(cpu, bus),
        0xC9 => cmp_immediate(cpu, bus),
        0xCA => dex(cpu, bus),
        0xCB => wai(cpu, bus),
        0xCC => cpy_absolute(cpu, bus),
        0xCD => cmp_absolute(cpu, bus),
        0xCE => dec_absolute(cpu, bus),
        0xCF => bbs(cpu, bus, 0x10),
        0xD0 => bne(cpu, bus),
        0xD1 => cmp_indirect_y(cpu, bus),
        0xD2 => cmp_indirect(cpu, bus),
        0xD5 => cmp_zero_page_x(cpu, bus),
        0xD6 => dec_zero_page_x(cpu, bus),
        0xD7 => smb(cpu, bus, 0x20),
        0xD8 => cld(cpu, bus),
        0xD9 => cmp_absolute_y(cpu, bus),
        0xDA => phx(cpu, bus),
        0xDB => stp(cpu, bus),
        0xDC | 0xFC => nop_absolute(cpu, bus),
        0xDD => cmp_absolute_x(cpu, bus),
        0xDE => dec_absolute_x(cpu, bus),
        0xDF => bbs(cpu, bus, 0x20),
        0xE0 => cpx_immediate(cpu, bus),
        0xE1 => sbc_indirect_x(cpu, bus),
        0xE4 => cpx_zero_page(cpu, bus),
        0xE5 => sbc_zero_page(cpu, bus),
        0xE6 => inc_zero_page(cpu, bus),
        0xE7 => smb(cpu, bus, 0x40),
        0xE8 => inx(cpu, bus),
        0xE9 => sbc_immediate(cpu, bus),
        0xEA => nop(cpu, bus),
        0xEC => cpx_absolute(cpu, bus),
        0xED => sbc_absolute(cpu, bus),
        0xEE => inc_absolute(cpu, bus),
        0xEF => bbs(cpu, bus, 0x40),
        0xF0 => beq(cpu, bus),
        0xF1 => sbc_indirect_y(cpu, bus),
        0xF2 => sbc_indirect(cpu, bus),
        0xF5 => sbc_zero_page_x(cpu, bus),
        0xF6 => inc_zero_page_x(cpu, bus),
        0xF7 => smb(cpu, bus, 0x80),
        0xF8 => sed(cpu, bus),
        0xF9 => sbc_absolute_y(cpu, bus),
        0xFA => plx(cpu, bus),
        0xFE => inc_absolute_x(cpu, bus),
        0xFF => bbs(cpu, bus, 0x80),
        // Single-cycle NOPs retire with their fetch and never get here
        _ => invalid_cycle!(cpu),
    }

    cpu.state.cycle += 1;
}
