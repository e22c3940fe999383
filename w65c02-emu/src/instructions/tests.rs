use crate::bus::{BusInterface, ReadKind, WriteKind};
use crate::{CpuMode, StatusReadContext, W65c02};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BusOp {
    Read(u16, u8),
    Write(u16, u8),
    Vector(u16, u8),
}

struct TestBus {
    ram: Vec<u8>,
    ops: Vec<BusOp>,
}

impl TestBus {
    fn new() -> Self {
        Self { ram: vec![0; 64 * 1024], ops: Vec::new() }
    }

    fn load(&mut self, base: u16, program_hex: &str) {
        assert_eq!(program_hex.len() % 2, 0, "program must be whole bytes");
        for (i, chunk) in program_hex.as_bytes().chunks_exact(2).enumerate() {
            let hex = std::str::from_utf8(chunk).unwrap();
            self.ram[usize::from(base) + i] = u8::from_str_radix(hex, 16).unwrap();
        }
    }
}

impl BusInterface for TestBus {
    fn read(&mut self, address: u16, _kind: ReadKind) -> u8 {
        let value = self.ram[usize::from(address)];
        self.ops.push(BusOp::Read(address, value));
        value
    }

    fn read_vector(&mut self, address: u16) -> u8 {
        let value = self.ram[usize::from(address)];
        self.ops.push(BusOp::Vector(address, value));
        value
    }

    fn write(&mut self, address: u16, value: u8, _kind: WriteKind) {
        self.ram[usize::from(address)] = value;
        self.ops.push(BusOp::Write(address, value));
    }
}

const PROGRAM_BASE: u16 = 0x0200;

#[derive(Default)]
struct ExpectedState {
    a: Option<u8>,
    x: Option<u8>,
    y: Option<u8>,
    p: Option<u8>,
    s: Option<u8>,
    pc: Option<u16>,
    memory: HashMap<u16, u8>,
    cycles: Option<u32>,
}

impl ExpectedState {
    fn assert_eq(&self, cpu: &W65c02, bus: &TestBus, cycle_count: u32) {
        let registers = cpu.registers();
        let mut errors: Vec<String> = Vec::new();

        let checks: [(&str, Option<u16>, u16); 7] = [
            ("A", self.a.map(u16::from), registers.accumulator.into()),
            ("X", self.x.map(u16::from), registers.x.into()),
            ("Y", self.y.map(u16::from), registers.y.into()),
            (
                "P",
                self.p.map(u16::from),
                registers.status.to_byte(StatusReadContext::PushStack).into(),
            ),
            ("S", self.s.map(u16::from), registers.sp.into()),
            ("PC", self.pc, registers.pc),
            ("Cycles", self.cycles.map(|c| c as u16), cycle_count as u16),
        ];
        for (name, expected, actual) in checks {
            if let Some(expected) = expected {
                if expected != actual {
                    errors.push(format!("[{name}: expected={expected:04X}, actual={actual:04X}]"));
                }
            }
        }

        for (&address, &value) in &self.memory {
            let actual = bus.ram[usize::from(address)];
            if value != actual {
                errors.push(format!(
                    "[memory {address:04X}: expected={value:02X}, actual={actual:02X}]"
                ));
            }
        }

        if !errors.is_empty() {
            panic!("Expected state mismatch: {}", errors.join(", "));
        }
    }
}

fn prepare(program_hex: &str) -> (W65c02, TestBus) {
    let mut bus = TestBus::new();
    bus.load(PROGRAM_BASE, program_hex);
    bus.ram[0xFFFC] = 0x00;
    bus.ram[0xFFFD] = 0x02;

    let mut cpu = W65c02::new();
    cpu.tick(&mut bus);
    while cpu.is_mid_instruction() {
        cpu.tick(&mut bus);
    }
    bus.ops.clear();

    (cpu, bus)
}

fn run_test(program_hex: &str, expected: ExpectedState) {
    let (mut cpu, mut bus) = prepare(program_hex);

    let program_end = PROGRAM_BASE + (program_hex.len() / 2) as u16;
    let mut cycles = 0;
    while cpu.pc() < program_end || cpu.is_mid_instruction() {
        cpu.tick(&mut bus);
        cycles += 1;
        assert!(cycles < 10_000, "runaway test program");
    }

    expected.assert_eq(&cpu, &bus, cycles);
}

mod load_store {
    use super::*;

    #[test]
    fn lda_immediate() {
        run_test(
            // LDA #$78
            "A978",
            ExpectedState {
                a: Some(0x78),
                p: Some(0x34),
                cycles: Some(2),
                ..ExpectedState::default()
            },
        );

        run_test(
            // LDA #$DD
            "A9DD",
            ExpectedState { a: Some(0xDD), p: Some(0xB4), ..ExpectedState::default() },
        );

        run_test(
            // LDA #$00
            "A900",
            ExpectedState { a: Some(0x00), p: Some(0x36), ..ExpectedState::default() },
        );
    }

    #[test]
    fn lda_absolute_x_page_cross_costs_a_cycle() {
        // LDX #$01; LDA $03FF,X
        run_test(
            "A201BDFF03",
            ExpectedState { a: Some(0x00), cycles: Some(2 + 5), ..ExpectedState::default() },
        );

        // LDX #$01; LDA $0300,X
        run_test(
            "A201BD0003",
            ExpectedState { a: Some(0x00), cycles: Some(2 + 4), ..ExpectedState::default() },
        );
    }

    #[test]
    fn lda_zero_page_indirect() {
        let (mut cpu, mut bus) = prepare("B240");
        bus.ram[0x0040] = 0x34;
        bus.ram[0x0041] = 0x12;
        bus.ram[0x1234] = 0x5A;

        let mut cycles = 0;
        cpu.tick(&mut bus);
        cycles += 1;
        while cpu.is_mid_instruction() {
            cpu.tick(&mut bus);
            cycles += 1;
        }

        assert_eq!(cycles, 5);
        assert_eq!(cpu.registers().accumulator, 0x5A);
    }

    #[test]
    fn sta_absolute_x_always_pays_the_index_cycle() {
        // LDA #$42; LDX #$01; STA $0300,X
        run_test(
            "A942A2019D0003",
            ExpectedState {
                memory: HashMap::from([(0x0301, 0x42)]),
                cycles: Some(2 + 2 + 5),
                ..ExpectedState::default()
            },
        );
    }

    #[test]
    fn stz_clears_memory() {
        // LDA #$42; STA $0280; STZ $0280
        let mut memory = HashMap::new();
        memory.insert(0x0280, 0x00);
        run_test(
            "A9428D80029C8002",
            ExpectedState { memory, cycles: Some(2 + 4 + 4), ..ExpectedState::default() },
        );
    }
}

mod arithmetic {
    use super::*;

    #[test]
    fn adc_binary() {
        // CLC; LDA #$40; ADC #$45
        run_test(
            "18A9406945",
            ExpectedState { a: Some(0x85), p: Some(0xF4), ..ExpectedState::default() },
        );

        // SEC; LDA #$FF; ADC #$01
        run_test(
            "38A9FF6901",
            ExpectedState { a: Some(0x01), p: Some(0x35), ..ExpectedState::default() },
        );
    }

    #[test]
    fn adc_decimal_adjusts_and_takes_an_extra_cycle() {
        // SED; CLC; LDA #$19; ADC #$28
        run_test(
            "F818A9196928",
            ExpectedState {
                a: Some(0x47),
                p: Some(0x3C),
                cycles: Some(2 + 2 + 2 + 3),
                ..ExpectedState::default()
            },
        );

        // SED; CLC; LDA #$99; ADC #$01 -> 00, carry out
        run_test(
            "F818A9996901",
            ExpectedState { a: Some(0x00), p: Some(0x3F), ..ExpectedState::default() },
        );
    }

    #[test]
    fn sbc_decimal() {
        // SED; SEC; LDA #$40; SBC #$13
        run_test(
            "F838A940E913",
            ExpectedState {
                a: Some(0x27),
                p: Some(0x3D),
                cycles: Some(2 + 2 + 2 + 3),
                ..ExpectedState::default()
            },
        );

        // SED; SEC; LDA #$00; SBC #$01 -> 99, borrow out
        run_test(
            "F838A900E901",
            ExpectedState { a: Some(0x99), p: Some(0xBC), ..ExpectedState::default() },
        );
    }

    #[test]
    fn cmp_sets_flags_without_modifying_a() {
        // LDA #$50; CMP #$51
        run_test(
            "A950C951",
            ExpectedState { a: Some(0x50), p: Some(0xB4), ..ExpectedState::default() },
        );
    }
}

mod bits {
    use super::*;

    #[test]
    fn tsb_sets_bits_and_z_from_the_old_value() {
        // LDA #$03; TSB $40  (with $40 = $41)
        let (mut cpu, mut bus) = prepare("A9030440");
        bus.ram[0x0040] = 0x41;

        let mut cycles = 0;
        for _ in 0..2 {
            cpu.tick(&mut bus);
            cycles += 1;
            while cpu.is_mid_instruction() {
                cpu.tick(&mut bus);
                cycles += 1;
            }
        }

        assert_eq!(cycles, 2 + 5);
        assert_eq!(bus.ram[0x0040], 0x43);
        // A & old M == 0x01, so Z is clear
        assert!(!cpu.registers().status.zero);
    }

    #[test]
    fn trb_clears_bits() {
        let (mut cpu, mut bus) = prepare("A9031440");
        bus.ram[0x0040] = 0x41;

        for _ in 0..2 {
            cpu.tick(&mut bus);
            while cpu.is_mid_instruction() {
                cpu.tick(&mut bus);
            }
        }

        assert_eq!(bus.ram[0x0040], 0x40);
        assert!(!cpu.registers().status.zero);
    }

    #[test]
    fn rmb_smb_rewrite_single_bits() {
        // SMB4 $40; RMB0 $40  (with $40 = $01)
        let (mut cpu, mut bus) = prepare("C7400740");
        bus.ram[0x0040] = 0x01;

        let mut cycles = 0;
        for _ in 0..2 {
            cpu.tick(&mut bus);
            cycles += 1;
            while cpu.is_mid_instruction() {
                cpu.tick(&mut bus);
                cycles += 1;
            }
        }

        assert_eq!(cycles, 5 + 5);
        assert_eq!(bus.ram[0x0040], 0x10);
        // Flags are untouched
        assert_eq!(cpu.registers().status.to_byte(StatusReadContext::PushStack), 0x34);
    }

    #[test]
    fn bit_immediate_only_touches_z() {
        // LDA #$C0; BIT $40 (sets N and V from $C0); LDA #$0F; BIT #$F0
        let (mut cpu, mut bus) = prepare("A9C02440A90F89F0");
        bus.ram[0x0040] = 0xC0;

        for _ in 0..4 {
            cpu.tick(&mut bus);
            while cpu.is_mid_instruction() {
                cpu.tick(&mut bus);
            }
        }

        let status = cpu.registers().status;
        assert!(status.zero, "0x0F & 0xF0 == 0");
        assert!(status.negative, "N must survive BIT #");
        assert!(status.overflow, "V must survive BIT #");
    }
}

mod flow {
    use super::*;

    #[test]
    fn bra_branches_unconditionally() {
        // BRA +2; (skipped: LDA #$FF); LDA #$01
        run_test(
            "8002A9FFA901",
            ExpectedState { a: Some(0x01), cycles: Some(3 + 2), ..ExpectedState::default() },
        );
    }

    #[test]
    fn branch_not_taken_is_two_cycles() {
        // SEC; BCC +2; LDA #$01
        run_test(
            "389002A901",
            ExpectedState { a: Some(0x01), cycles: Some(2 + 2 + 2), ..ExpectedState::default() },
        );
    }

    #[test]
    fn branch_across_page_costs_two_extra_cycles() {
        let (mut cpu, mut bus) = prepare("");
        // BEQ +$20 at $02F0; target $0312 crosses into page $03
        bus.load(0x02F0, "F020");
        let mut registers = cpu.registers().clone();
        registers.pc = 0x02F0;
        registers.status.zero = true;
        cpu.set_registers(registers);

        let mut cycles = 0;
        cpu.tick(&mut bus);
        cycles += 1;
        while cpu.is_mid_instruction() {
            cpu.tick(&mut bus);
            cycles += 1;
        }

        assert_eq!(cycles, 4);
        assert_eq!(cpu.pc(), 0x0312);
    }

    #[test]
    fn bbr_branches_when_the_bit_is_clear() {
        // BBR4 $40, +2; (skipped: LDA #$FF); LDA #$01  (with $40 = $00)
        run_test(
            "4F4002A9FFA901",
            ExpectedState { a: Some(0x01), cycles: Some(6 + 2), ..ExpectedState::default() },
        );

        // BBS4 $40, +2 does not branch on a clear bit: both LDAs run
        run_test(
            "CF4002A9FFA901",
            ExpectedState { a: Some(0x01), cycles: Some(5 + 2 + 2), ..ExpectedState::default() },
        );
    }

    #[test]
    fn jmp_indirect_crosses_the_pointer_page_correctly() {
        let (mut cpu, mut bus) = prepare("6CFF02");
        bus.ram[0x02FF] = 0x03;
        bus.ram[0x0300] = 0x02;

        let mut cycles = 0;
        cpu.tick(&mut bus);
        cycles += 1;
        while cpu.is_mid_instruction() {
            cpu.tick(&mut bus);
            cycles += 1;
        }

        assert_eq!(cycles, 6);
        assert_eq!(cpu.pc(), 0x0203);
    }

    #[test]
    fn jsr_rts_round_trip() {
        // JSR $0280; LDA #$01 / at $0280: LDX #$05; RTS
        let (mut cpu, mut bus) = prepare("200280A901");
        bus.load(0x0280, "A20560");

        let mut cycles = 0;
        for _ in 0..4 {
            cpu.tick(&mut bus);
            cycles += 1;
            while cpu.is_mid_instruction() {
                cpu.tick(&mut bus);
                cycles += 1;
            }
        }

        assert_eq!(cycles, 6 + 2 + 6 + 2);
        assert_eq!(cpu.registers().x, 0x05);
        assert_eq!(cpu.registers().accumulator, 0x01);
        assert_eq!(cpu.registers().sp, 0xFC);
        assert_eq!(cpu.pc(), 0x0205);
    }
}

mod stack {
    use super::*;

    #[test]
    fn phx_plx_round_trip() {
        // LDX #$7F; PHX; LDX #$00; PLX
        run_test(
            "A27FDAA200FA",
            ExpectedState {
                x: Some(0x7F),
                s: Some(0xFC),
                cycles: Some(2 + 3 + 2 + 4),
                ..ExpectedState::default()
            },
        );
    }

    #[test]
    fn phy_ply_round_trip() {
        // LDY #$80; PHY; LDY #$01; PLY
        run_test(
            "A0805AA0017A",
            ExpectedState { y: Some(0x80), p: Some(0xB4), ..ExpectedState::default() },
        );
    }
}

mod interrupts {
    use super::*;

    #[test]
    fn reset_sequence_is_seven_cycles_ending_in_vector_pulls() {
        let mut bus = TestBus::new();
        bus.ram[0xFFFC] = 0x00;
        bus.ram[0xFFFD] = 0x02;

        let mut cpu = W65c02::new();
        cpu.tick(&mut bus);
        while cpu.is_mid_instruction() {
            cpu.tick(&mut bus);
        }

        assert_eq!(
            bus.ops,
            vec![
                BusOp::Read(0xFFFF, 0x00),
                BusOp::Read(0xFFFF, 0x00),
                BusOp::Read(0x01FF, 0x00),
                BusOp::Read(0x01FE, 0x00),
                BusOp::Read(0x01FD, 0x00),
                BusOp::Vector(0xFFFC, 0x00),
                BusOp::Vector(0xFFFD, 0x02),
            ]
        );
        assert_eq!(cpu.pc(), 0x0200);
        assert_eq!(cpu.registers().sp, 0xFC);
        assert_eq!(cpu.mode(), CpuMode::Running);
    }

    #[test]
    fn nmi_service_pushes_state_and_pulls_the_vector() {
        // NOPs at $0200; NMI handler at $0300
        let (mut cpu, mut bus) = prepare("EAEAEAEA");
        bus.ram[0xFFFA] = 0x00;
        bus.ram[0xFFFB] = 0x03;

        // Execute one NOP, then raise NMI mid-way through the next
        cpu.tick(&mut bus);
        cpu.tick(&mut bus);
        cpu.set_nmi(true);
        cpu.tick(&mut bus);
        cpu.tick(&mut bus);
        assert!(!cpu.is_mid_instruction());

        bus.ops.clear();
        let mut cycles = 0;
        cpu.tick(&mut bus);
        cycles += 1;
        while cpu.is_mid_instruction() {
            cpu.tick(&mut bus);
            cycles += 1;
        }

        assert_eq!(cycles, 7);
        assert_eq!(cpu.pc(), 0x0300);
        // PC $0202 and P pushed, B clear in the pushed copy
        assert_eq!(
            &bus.ops[2..5],
            &[
                BusOp::Write(0x01FC, 0x02),
                BusOp::Write(0x01FB, 0x02),
                BusOp::Write(0x01FA, 0x24),
            ]
        );
        assert_eq!(&bus.ops[5..], &[BusOp::Vector(0xFFFA, 0x00), BusOp::Vector(0xFFFB, 0x03)]);
    }

    #[test]
    fn irq_is_masked_while_i_is_set() {
        let (mut cpu, mut bus) = prepare("EAEA");
        cpu.set_irq(true);

        for _ in 0..2 {
            cpu.tick(&mut bus);
            while cpu.is_mid_instruction() {
                cpu.tick(&mut bus);
            }
        }

        // I is set after reset, so both NOPs execute with no service routine
        assert_eq!(cpu.pc(), 0x0204);
    }

    #[test]
    fn brk_vectors_through_fffe_and_sets_b_in_the_pushed_status() {
        let (mut cpu, mut bus) = prepare("00");
        bus.ram[0xFFFE] = 0x00;
        bus.ram[0xFFFF] = 0x03;

        let mut cycles = 0;
        cpu.tick(&mut bus);
        cycles += 1;
        while cpu.is_mid_instruction() {
            cpu.tick(&mut bus);
            cycles += 1;
        }

        assert_eq!(cycles, 7);
        assert_eq!(cpu.pc(), 0x0300);
        // Return address is PC+2 ($0202); pushed P has B set
        assert_eq!(
            &bus.ops[2..5],
            &[
                BusOp::Write(0x01FC, 0x02),
                BusOp::Write(0x01FB, 0x02),
                BusOp::Write(0x01FA, 0x34),
            ]
        );
        assert!(cpu.registers().status.interrupt_disable);
    }
}

mod wai_stp {
    use super::*;

    #[test]
    fn wai_waits_and_wakes_on_a_masked_irq_without_vectoring() {
        // WAI; LDA #$01
        let (mut cpu, mut bus) = prepare("CBA901");

        cpu.tick(&mut bus);
        while cpu.is_mid_instruction() {
            cpu.tick(&mut bus);
        }
        assert_eq!(cpu.mode(), CpuMode::AwaitingInterrupt);

        // Dormant ticks spin in place
        for _ in 0..5 {
            cpu.tick(&mut bus);
        }
        assert_eq!(cpu.mode(), CpuMode::AwaitingInterrupt);

        // I is set after reset: the IRQ wakes the core but is not serviced
        cpu.set_irq(true);
        cpu.tick(&mut bus);
        cpu.tick(&mut bus);
        assert_eq!(cpu.mode(), CpuMode::Running);

        cpu.tick(&mut bus);
        while cpu.is_mid_instruction() {
            cpu.tick(&mut bus);
        }
        assert_eq!(cpu.registers().accumulator, 0x01);
        assert_eq!(cpu.pc(), 0x0203);
    }

    #[test]
    fn stp_stops_the_core_until_reset() {
        let (mut cpu, mut bus) = prepare("DBA901");

        cpu.tick(&mut bus);
        while cpu.is_mid_instruction() {
            cpu.tick(&mut bus);
        }
        assert_eq!(cpu.mode(), CpuMode::Stopped);

        let pc = cpu.pc();
        bus.ops.clear();
        for _ in 0..4 {
            cpu.tick(&mut bus);
        }
        assert_eq!(cpu.mode(), CpuMode::Stopped);
        assert_eq!(bus.ops, vec![BusOp::Read(pc, 0xA9); 4]);

        cpu.reset();
        cpu.tick(&mut bus);
        while cpu.is_mid_instruction() {
            cpu.tick(&mut bus);
        }
        assert_eq!(cpu.mode(), CpuMode::Running);
        assert_eq!(cpu.pc(), 0x0200);
    }
}

mod decimal_alu {
    use super::super::{add_decimal, subtract_decimal};
    use crate::StatusFlags;

    #[test]
    fn bcd_addition_table_spots() {
        let cases = [
            // (a, operand, carry_in, result, carry_out)
            (0x00, 0x00, false, 0x00, false),
            (0x05, 0x05, false, 0x10, false),
            (0x09, 0x01, false, 0x10, false),
            (0x50, 0x49, true, 0x00, true),
            (0x99, 0x99, true, 0x99, true),
        ];

        for (a, operand, carry_in, result, carry_out) in cases {
            let mut flags = StatusFlags::new();
            flags.carry = carry_in;
            let actual = add_decimal(a, operand, &mut flags);
            assert_eq!(actual, result, "{a:02X} + {operand:02X} (C={carry_in})");
            assert_eq!(flags.carry, carry_out, "carry for {a:02X} + {operand:02X}");
            assert_eq!(flags.zero, result == 0);
        }
    }

    #[test]
    fn bcd_subtraction_table_spots() {
        let cases = [
            (0x00, 0x00, true, 0x00, true),
            (0x46, 0x12, true, 0x34, true),
            (0x40, 0x13, true, 0x27, true),
            (0x00, 0x01, true, 0x99, false),
            (0x32, 0x02, false, 0x29, true),
        ];

        for (a, operand, carry_in, result, carry_out) in cases {
            let mut flags = StatusFlags::new();
            flags.carry = carry_in;
            let actual = subtract_decimal(a, operand, &mut flags);
            assert_eq!(actual, result, "{a:02X} - {operand:02X} (C={carry_in})");
            assert_eq!(flags.carry, carry_out, "carry for {a:02X} - {operand:02X}");
        }
    }
}
