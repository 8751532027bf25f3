//! Per-CPU table orchestration
//!
//! Spreads generated templates across every possible CPU of the
//! `tx_override_map` and zeroes `seq_state_map` before a run. CPU *i*
//! transmits template `i mod k`.

use std::io;

use crate::error::TableError;
use crate::template::{PacketTemplate, PktTemplate, MAX_TEMPLATE_SIZE};

/// Map names in the kernel object
pub const TX_OVERRIDE_MAP: &str = "tx_override_map";
pub const SEQ_STATE_MAP: &str = "seq_state_map";

/// The two per-CPU tables a run needs, each updated at key 0 with one
/// value per possible CPU.
pub trait KernelTables {
    fn possible_cpus(&self) -> io::Result<usize>;

    fn write_seq_state(&mut self, values: Vec<u32>) -> Result<(), TableError>;

    fn write_tx_override(&mut self, slots: Vec<PktTemplate>) -> Result<(), TableError>;
}

fn slot_for(index: usize, template: &PacketTemplate) -> Result<PktTemplate, TableError> {
    let available = template.data.len();
    if template.length == 0 || template.length as usize >= available {
        return Err(TableError::InvalidLength {
            index,
            length: template.length,
            available,
        });
    }
    if available > MAX_TEMPLATE_SIZE {
        return Err(TableError::TemplateTooLarge {
            index,
            size: available,
            max: MAX_TEMPLATE_SIZE,
        });
    }

    let mut slot = PktTemplate {
        len: u32::from(template.length),
        ..PktTemplate::default()
    };
    slot.data[..available].copy_from_slice(&template.data);
    Ok(slot)
}

/// Build one slot per CPU, round-robin over `templates`.
///
/// Fails before producing anything if a selected template is invalid.
pub fn build_slots(
    templates: &[PacketTemplate],
    cpus: usize,
) -> Result<Vec<PktTemplate>, TableError> {
    if templates.is_empty() {
        return Err(TableError::NoTemplates);
    }
    (0..cpus)
        .map(|cpu| {
            let index = cpu % templates.len();
            slot_for(index, &templates[index])
        })
        .collect()
}

/// Install `templates` for a run. Returns the number of CPUs written.
pub fn install<T: KernelTables + ?Sized>(
    tables: &mut T,
    templates: &[PacketTemplate],
) -> Result<usize, TableError> {
    if templates.is_empty() {
        return Err(TableError::NoTemplates);
    }
    let cpus = tables.possible_cpus().map_err(TableError::PossibleCpus)?;
    let slots = build_slots(templates, cpus)?;

    tables.write_seq_state(vec![0; cpus])?;
    tables.write_tx_override(slots)?;

    tracing::info!(cpus, templates = templates.len(), "installed per-CPU packet templates");
    Ok(cpus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Default)]
    struct FakeTables {
        cpus: usize,
        fail_cpus: bool,
        writes: Vec<&'static str>,
        seq: Option<Vec<u32>>,
        slots: Option<Vec<PktTemplate>>,
    }

    impl FakeTables {
        fn with_cpus(cpus: usize) -> Self {
            Self {
                cpus,
                ..Default::default()
            }
        }
    }

    impl KernelTables for FakeTables {
        fn possible_cpus(&self) -> io::Result<usize> {
            if self.fail_cpus {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no sysfs"));
            }
            Ok(self.cpus)
        }

        fn write_seq_state(&mut self, values: Vec<u32>) -> Result<(), TableError> {
            self.writes.push(SEQ_STATE_MAP);
            self.seq = Some(values);
            Ok(())
        }

        fn write_tx_override(&mut self, slots: Vec<PktTemplate>) -> Result<(), TableError> {
            self.writes.push(TX_OVERRIDE_MAP);
            self.slots = Some(slots);
            Ok(())
        }
    }

    fn template(tag: u8, size: usize) -> PacketTemplate {
        PacketTemplate::new(vec![tag; size], (size - 1) as u16)
    }

    #[test]
    fn test_install_round_robin() {
        let mut tables = FakeTables::with_cpus(5);
        let templates = vec![template(1, 60), template(2, 70)];

        assert_eq!(install(&mut tables, &templates).unwrap(), 5);
        assert_eq!(tables.writes, vec![SEQ_STATE_MAP, TX_OVERRIDE_MAP]);
        assert_eq!(tables.seq.unwrap(), vec![0; 5]);

        let slots = tables.slots.unwrap();
        let tags: Vec<u8> = slots.iter().map(|s| s.data[0]).collect();
        assert_eq!(tags, vec![1, 2, 1, 2, 1]);
        assert_eq!(slots[1].len, 69);
        assert_eq!(slots[1].data[69], 2);
        assert_eq!(slots[1].data[70], 0);
    }

    #[test]
    fn test_empty_templates() {
        let mut tables = FakeTables::with_cpus(4);
        assert!(matches!(install(&mut tables, &[]), Err(TableError::NoTemplates)));
        assert!(tables.writes.is_empty());
    }

    #[test]
    fn test_invalid_length_writes_nothing() {
        let mut tables = FakeTables::with_cpus(4);
        let bad = PacketTemplate::new(vec![0; 60], 60);
        let templates = vec![template(1, 60), bad];

        let err = install(&mut tables, &templates).unwrap_err();
        assert!(matches!(err, TableError::InvalidLength { index: 1, length: 60, available: 60 }));
        assert!(err.to_string().contains("60"));
        assert!(tables.writes.is_empty());
    }

    #[test]
    fn test_zero_length_rejected() {
        let mut tables = FakeTables::with_cpus(1);
        let err = install(&mut tables, &[PacketTemplate::new(vec![0; 10], 0)]).unwrap_err();
        assert!(matches!(err, TableError::InvalidLength { length: 0, .. }));
    }

    #[test]
    fn test_oversized_template() {
        let mut tables = FakeTables::with_cpus(2);
        let err = install(&mut tables, &[template(9, MAX_TEMPLATE_SIZE + 1)]).unwrap_err();
        assert!(matches!(err, TableError::TemplateTooLarge { size: 2049, .. }));
        assert!(tables.writes.is_empty());
    }

    #[test]
    fn test_full_slot_fits() {
        let slots = build_slots(&[template(3, MAX_TEMPLATE_SIZE)], 1).unwrap();
        assert_eq!(slots[0].len as usize, MAX_TEMPLATE_SIZE - 1);
        assert_eq!(slots[0].data[MAX_TEMPLATE_SIZE - 1], 3);
    }

    #[test]
    fn test_possible_cpus_failure() {
        let mut tables = FakeTables {
            fail_cpus: true,
            ..Default::default()
        };
        let err = install(&mut tables, &[template(1, 10)]).unwrap_err();
        assert!(matches!(err, TableError::PossibleCpus(_)));
    }

    proptest! {
        #[test]
        fn prop_cpu_gets_template_index_mod_k(k in 1usize..8, cpus in 1usize..64) {
            let templates: Vec<_> = (0..k).map(|i| template(i as u8 + 1, 32 + i)).collect();
            let slots = build_slots(&templates, cpus).unwrap();

            prop_assert_eq!(slots.len(), cpus);
            for (cpu, slot) in slots.iter().enumerate() {
                let expected = &templates[cpu % k];
                prop_assert_eq!(slot.len, u32::from(expected.length));
                prop_assert_eq!(&slot.data[..expected.data.len()], &expected.data[..]);
            }
        }
    }
}
