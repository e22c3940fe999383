//! Deterministic job harness around the W65C02S core.
//!
//! Reads a JSON job description (memory image, serial ports, termination
//! predicates, pin-edge schedule), runs the modeled CPU until a termination
//! event, and prints a JSON report of the run. Exit code 0 for any completed
//! run, 1 for configuration errors.

mod bus;
mod job;
mod report;
mod sched;

use crate::bus::SystemBus;
use crate::job::{JobDescription, JobError};
use crate::report::RunReport;
use crate::sched::Pin;
use clap::Parser;
use env_logger::Env;
use std::fs;
use std::io::Read;
use w65c02_emu::W65c02;

#[derive(Debug, Parser)]
struct Args {
    /// Path to a JSON job file; the job is read from stdin when omitted
    #[arg(short = 'f', long)]
    file_path: Option<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let json = match &args.file_path {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let job = JobDescription::from_json(&json)?;
    let report = run_job(&job)?;

    println!("{}", serde_json::to_string(&report)?);

    Ok(())
}

/// Run one job to termination.
///
/// The CPU is ticked one bus cycle at a time so that the monitor's stop
/// flag, the serial SO pulse, and due pin-edge flips are all honored at the
/// exact cycle boundary they belong to. The drain/overflow SO pulse is
/// deasserted at the first instruction boundary after it was raised.
fn run_job(job: &JobDescription) -> Result<RunReport, JobError> {
    let mut bus = SystemBus::from_job(job)?;
    let mut cpu = W65c02::new();
    let mut clear_so_pending = false;

    while bus.running() {
        cpu.tick(&mut bus);

        if bus.take_so_pulse() {
            cpu.set_so(true);
            clear_so_pending = true;
        }

        for (pin, state) in bus.drain_pin_changes() {
            match pin {
                Pin::So => cpu.set_so(state),
                Pin::Nmi => cpu.set_nmi(state),
                Pin::Irq => cpu.set_irq(state),
            }
        }

        if clear_so_pending && !cpu.is_mid_instruction() {
            cpu.set_so(false);
            clear_so_pending = false;
        }
    }

    log::debug!("run finished after {} cycles at pc {:04X}", bus.num_cycles(), cpu.pc());

    Ok(bus.into_report())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::TerminationCause;

    fn run(json: &str) -> RunReport {
        run_job(&JobDescription::from_json(json).unwrap()).unwrap()
    }

    #[test]
    fn empty_job_hits_brk_at_the_default_reset_target() {
        let report = run("{}");

        // 5 startup cycles, two vector pulls, one opcode fetch of $00
        assert_eq!(report.num_cycles, 8);
        assert_eq!(report.termination_cause, TerminationCause::Brk);
        assert_eq!(report.last_pc, Some(0x0200));
        assert!(report.cycles.is_none());
        assert!(report.serial_out_data.is_none());
    }

    #[test]
    fn reset_vector_below_page_one_terminates_as_zero_fetch() {
        // Point the reset vector at $0000
        let report = run(r#"{"init": [{"base": 65533, "data": "base64:AA=="}]}"#);

        assert_eq!(report.termination_cause, TerminationCause::ZeroFetch);
        assert_eq!(report.num_cycles, 8);
        assert_eq!(report.last_pc, Some(0x0000));
    }

    #[test]
    fn tight_jmp_loop_terminates_as_infinite_loop() {
        // $0200: JMP $0200
        let report = run(r#"{"init": [{"base": 512, "data": "base64:TAACAA=="}]}"#);

        assert_eq!(report.termination_cause, TerminationCause::InfiniteLoop);
        assert_eq!(report.last_pc, Some(0x0200));
        assert_eq!(report.num_cycles, 11);
    }

    #[test]
    fn jmp_to_a_brk_terminates_as_brk_not_infinite_loop() {
        // $0200: JMP $0210; $0210: BRK
        let report = run(
            r#"{"init": [{"base": 512, "data": "base64:TBAC"},
                         {"base": 528, "data": "base64:AA=="}]}"#,
        );

        assert_eq!(report.termination_cause, TerminationCause::Brk);
        assert_eq!(report.last_pc, Some(0x0210));
    }

    #[test]
    fn serial_echo_copies_input_to_output_and_stops_on_drain() {
        // $0200: LDA $F004 / BVS $020B / STA $F001 / JMP $0200 / $020B: BRK
        let report = run(
            r#"{
                "init": [{"base": 512, "data": "base64:rQTwcAaNAfBMAAIA"}],
                "serial_in_addr": 61444,
                "serial_in_data": "utf8:Hi",
                "serial_out_addr": 61441,
                "serial_out_fmt": "base64"
            }"#,
        );

        assert_eq!(report.termination_cause, TerminationCause::Brk);
        assert_eq!(report.last_pc, Some(0x020B));
        assert_eq!(report.serial_out_data.as_deref(), Some("base64:SGk="));
    }

    #[test]
    fn serial_output_in_utf8_format() {
        // $0200: LDA #$21 / STA $F001 / BRK
        let report = run(
            r#"{
                "init": [{"base": 512, "data": "base64:qSGNAfAA"}],
                "serial_out_addr": 61441,
                "serial_out_fmt": "utf8"
            }"#,
        );

        assert_eq!(report.termination_cause, TerminationCause::Brk);
        assert_eq!(report.serial_out_data.as_deref(), Some("utf8:!"));
    }

    #[test]
    fn trace_records_are_seven_uppercase_hex_digits() {
        let report = run(r#"{"show_cycles": true}"#);

        let cycles = report.cycles.unwrap();
        assert_eq!(cycles, vec!["5FFFC00", "5FFFD02", "F020000"]);
        for record in &cycles {
            assert_eq!(record.len(), 7);
            assert!(record.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        }
    }

    #[test]
    fn cycle_limit_fires_before_the_predicates_on_the_same_cycle() {
        let report = run(r#"{"show_cycles": true, "max_cycles": 8}"#);

        // The eighth cycle is the opcode fetch of $00; the budget wins
        assert_eq!(report.termination_cause, TerminationCause::Limit);
        assert_eq!(report.num_cycles, 8);
        assert_eq!(report.last_pc, None);
        assert_eq!(report.cycles.unwrap().len(), 3);
    }

    #[test]
    fn limit_below_the_startup_count_stops_immediately() {
        let report = run(r#"{"max_cycles": 3}"#);

        assert_eq!(report.termination_cause, TerminationCause::Limit);
        assert_eq!(report.num_cycles, 5);
        assert_eq!(report.last_pc, None);
    }

    #[test]
    fn scheduled_nmi_vectors_through_fffa() {
        // A page of NOPs at $0200; the NMI vector is $0000, so servicing the
        // NMI lands in page zero and trips the zero-fetch predicate
        let report = run(
            r#"{
                "init": [{"base": 512, "data": "base64:6g==", "size": 256}],
                "nmi": [100, 200],
                "show_cycles": true
            }"#,
        );

        assert_eq!(report.termination_cause, TerminationCause::ZeroFetch);
        assert_eq!(report.last_pc, Some(0x0000));

        let cycles = report.cycles.unwrap();
        assert!(cycles.iter().any(|record| record == "5FFFA00"));
        assert!(cycles.iter().any(|record| record == "5FFFB00"));
        // The vector pull happens soon after the edge at cycle 100
        let position = cycles.iter().position(|record| record == "5FFFA00").unwrap();
        let vector_cycle = 5 + position as u32 + 1;
        assert!((100..115).contains(&vector_cycle));
    }

    #[test]
    fn out_of_range_store_terminates_as_bad_write() {
        // $0200: LDA #$41 / STA $4000
        let report = run(r#"{"init": [{"base": 512, "data": "base64:qUGNAEA="}]}"#);

        assert_eq!(report.termination_cause, TerminationCause::BadWrite);
        assert_eq!(report.num_cycles, 13);
        assert_eq!(report.last_pc, Some(0x0202));
    }

    #[test]
    fn disabling_the_bad_write_predicate_drops_the_store() {
        let report = run(
            r#"{
                "init": [{"base": 512, "data": "base64:qUGNAEA="}],
                "terminate_on_bad_write": false
            }"#,
        );

        // The store is silently dropped and execution runs into the $00 at
        // $0205
        assert_eq!(report.termination_cause, TerminationCause::Brk);
        assert_eq!(report.last_pc, Some(0x0205));
        assert_eq!(report.num_cycles, 14);
    }

    #[test]
    fn widened_rwmap_allows_stores_outside_the_default_window() {
        // $0200: LDA #$41 / STA $4000 / BRK
        let report = run(
            r#"{
                "init": [{"base": 512, "data": "base64:qUGNAEAA"}],
                "rwmap": [[0, 511], [16384, 16384]]
            }"#,
        );

        assert_eq!(report.termination_cause, TerminationCause::Brk);
        assert_eq!(report.last_pc, Some(0x0205));
    }

    #[test]
    fn disabling_brk_lets_execution_fall_through_the_break() {
        // BRK pushes and vectors through $FFFE, which still holds zero, so
        // the handler fetch at $0000 trips zero-fetch instead
        let report = run(r#"{"terminate_on_brk": false}"#);

        assert_eq!(report.termination_cause, TerminationCause::ZeroFetch);
        assert_eq!(report.last_pc, Some(0x0000));
    }

    #[test]
    fn stopped_core_runs_out_the_cycle_budget() {
        // $0200: STP; the stopped core spins spurious reads until the limit
        let report = run(r#"{"init": [{"base": 512, "data": "base64:2w=="}], "max_cycles": 50}"#);

        assert_eq!(report.termination_cause, TerminationCause::Limit);
        assert_eq!(report.num_cycles, 50);
        assert_eq!(report.last_pc, Some(0x0200));
    }

    #[test]
    fn scheduled_so_edge_sets_v_and_releases_a_bvc_spin() {
        // $0200: BVC $0200; the branch spins on itself until the scheduled
        // SO edge sets V, then falls through into the $00 at $0202
        let report = run(
            r#"{
                "init": [{"base": 512, "data": "base64:UP4="}],
                "terminate_on_infinite_loop": false,
                "so": [20]
            }"#,
        );

        assert_eq!(report.termination_cause, TerminationCause::Brk);
        assert_eq!(report.last_pc, Some(0x0202));
    }

    #[test]
    fn scheduled_irq_is_serviced_once_i_is_cleared() {
        // $0200: CLI, then a page of NOPs; the IRQ vector is $0000, so the
        // service routine lands in page zero
        let report = run(
            r#"{
                "init": [
                    {"base": 512, "data": "base64:WA=="},
                    {"base": 513, "data": "base64:6g==", "size": 255}
                ],
                "irq": [100]
            }"#,
        );

        assert_eq!(report.termination_cause, TerminationCause::ZeroFetch);
        assert_eq!(report.last_pc, Some(0x0000));
    }

    #[test]
    fn identical_jobs_produce_byte_identical_reports() {
        let json = r#"{
            "init": [{"base": 512, "data": "base64:TAACAA=="}],
            "show_cycles": true
        }"#;

        let first = serde_json::to_string(&run(json)).unwrap();
        let second = serde_json::to_string(&run(json)).unwrap();
        assert_eq!(first, second);
    }
}
