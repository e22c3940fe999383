//! The pin-edge schedule: job-supplied cycle numbers at which the SO, NMI,
//! and IRQ inputs toggle.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pin {
    So,
    Nmi,
    Irq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinFlip {
    pub cycle: u32,
    pub pin: Pin,
    pub state: bool,
}

/// Expand the per-pin cycle lists into one merged schedule.
///
/// Each pin's list is sorted and assigned states by alternating parity: the
/// first entry asserts, the second deasserts, and so on. The merge is stable,
/// so entries sharing a cycle apply in SO, NMI, IRQ order.
pub fn build_schedule(so: &[u32], nmi: &[u32], irq: &[u32]) -> Vec<PinFlip> {
    let mut flips = Vec::with_capacity(so.len() + nmi.len() + irq.len());

    for (pin, cycles) in [(Pin::So, so), (Pin::Nmi, nmi), (Pin::Irq, irq)] {
        let mut cycles = cycles.to_vec();
        cycles.sort_unstable();

        let mut state = false;
        for cycle in cycles {
            state = !state;
            flips.push(PinFlip { cycle, pin, state });
        }
    }

    flips.sort_by_key(|flip| flip.cycle);

    flips
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parity_alternates_per_pin_after_sorting() {
        let schedule = build_schedule(&[300, 100, 200], &[], &[]);

        assert_eq!(
            schedule,
            vec![
                PinFlip { cycle: 100, pin: Pin::So, state: true },
                PinFlip { cycle: 200, pin: Pin::So, state: false },
                PinFlip { cycle: 300, pin: Pin::So, state: true },
            ]
        );
    }

    #[test]
    fn same_cycle_entries_keep_pin_priority_order() {
        let schedule = build_schedule(&[50], &[50], &[50, 20]);

        assert_eq!(
            schedule,
            vec![
                PinFlip { cycle: 20, pin: Pin::Irq, state: true },
                PinFlip { cycle: 50, pin: Pin::So, state: true },
                PinFlip { cycle: 50, pin: Pin::Nmi, state: true },
                PinFlip { cycle: 50, pin: Pin::Irq, state: false },
            ]
        );
    }

    #[test]
    fn empty_lists_build_an_empty_schedule() {
        assert!(build_schedule(&[], &[], &[]).is_empty());
    }
}
