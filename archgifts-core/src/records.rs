use std::collections::HashSet;

use serde::Serialize;

use crate::diagnostics::{Diagnostic, DiagnosticsSink, Severity};
use crate::host::{HostError, RecordDirectory, RecordHandle};
use crate::rules::{FieldOverride, OverrideRule, OverrideRuleSet, Phase};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RecordOutcome {
    pub id: i32,
    pub droppable: bool,
    pub fragment_requirement: i32,
    /// False when the record already had the overridden values.
    pub changed: bool,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct MutationReport {
    pub updated: Vec<RecordOutcome>,
    pub failures: Vec<Diagnostic>,
}

impl MutationReport {
    pub fn changed(&self) -> usize {
        self.updated.iter().filter(|o| o.changed).count()
    }
}

fn apply_field<D: RecordDirectory + ?Sized>(
    directory: &mut D,
    handle: RecordHandle,
    field: FieldOverride,
    outcome: &mut RecordOutcome,
) -> Result<(), HostError> {
    match field {
        FieldOverride::Droppable(wanted) => {
            if outcome.droppable != wanted {
                directory.set_droppable(handle, wanted)?;
                outcome.droppable = wanted;
                outcome.changed = true;
            }
        }
        FieldOverride::MinFragmentRequirement(threshold) => {
            let wanted = outcome.fragment_requirement.max(threshold);
            if wanted != outcome.fragment_requirement {
                outcome.fragment_requirement = directory.set_fragment_requirement(handle, wanted)?;
                outcome.changed = true;
            }
        }
    }
    Ok(())
}

fn mutate_one<D: RecordDirectory + ?Sized>(
    id: i32,
    fields: &[(&[i32], FieldOverride)],
    directory: &mut D,
) -> Result<RecordOutcome, Diagnostic> {
    let handle = directory
        .find_record(id)
        .map_err(|_| Diagnostic::RecordNotFound { id })?;

    let unreadable = |e: HostError| Diagnostic::MutationFailed {
        id,
        reason: e.to_string(),
    };
    let mut outcome = RecordOutcome {
        id,
        droppable: directory.droppable(handle).map_err(unreadable)?,
        fragment_requirement: directory.fragment_requirement(handle).map_err(unreadable)?,
        changed: false,
    };

    for (ids, field) in fields {
        if !ids.contains(&id) {
            continue;
        }
        apply_field(directory, handle, *field, &mut outcome).map_err(|e| Diagnostic::MutationFailed {
            id,
            reason: format!("{}: {e}", field.field_name()),
        })?;
    }

    Ok(outcome)
}

/// Applies the records-ready field overrides to every gift template. Each
/// record is handled on its own: a missing or locked template is reported and
/// the pass moves on. Running it again converges to the same values.
pub fn mutate_records<D: RecordDirectory + ?Sized>(
    rules: &OverrideRuleSet,
    directory: &mut D,
    sink: &dyn DiagnosticsSink,
) -> MutationReport {
    let mut fields: Vec<(&[i32], FieldOverride)> = Vec::new();
    for rule in rules.for_phase(Phase::RecordsReady) {
        if let OverrideRule::RecordFieldOverride { record_ids, field } = rule {
            fields.push((record_ids.as_slice(), *field));
        }
    }

    let mut seen = HashSet::new();
    let ids: Vec<i32> = fields
        .iter()
        .flat_map(|(ids, _)| ids.iter().copied())
        .filter(|id| seen.insert(*id))
        .collect();

    let mut report = MutationReport::default();
    if ids.is_empty() {
        return report;
    }

    for id in ids {
        match mutate_one(id, &fields, directory) {
            Ok(outcome) => report.updated.push(outcome),
            Err(diagnostic) => {
                diagnostic.report(sink);
                report.failures.push(diagnostic);
            }
        }
    }

    sink.emit(
        Severity::Info,
        &format!(
            "Updated {} archaeology cache gift item templates.",
            report.updated.len()
        ),
    );
    let threshold = fields.iter().find_map(|(_, f)| match f {
        FieldOverride::MinFragmentRequirement(n) => Some(*n),
        FieldOverride::Droppable(_) => None,
    });
    if let Some(threshold) = threshold {
        sink.emit(
            Severity::Info,
            &format!(
                "Gift items are now droppable and require at least {threshold} fragments to complete."
            ),
        );
    }
    if !report.failures.is_empty() {
        sink.emit(
            Severity::Warning,
            &format!("{} gift item templates were skipped.", report.failures.len()),
        );
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use crate::sim::{HostSnapshot, RecordSpec, SimulatedHost};

    fn record(id: i32, droppable: bool, fragment_requirement: i32, locked: bool) -> RecordSpec {
        RecordSpec {
            id,
            name: format!("statue {id}"),
            droppable,
            fragment_requirement,
            locked,
        }
    }

    fn gift_rules(ids: &[i32], threshold: i32) -> OverrideRuleSet {
        OverrideRuleSet::from_rules(vec![
            OverrideRule::RecordFieldOverride {
                record_ids: ids.to_vec(),
                field: FieldOverride::Droppable(true),
            },
            OverrideRule::RecordFieldOverride {
                record_ids: ids.to_vec(),
                field: FieldOverride::MinFragmentRequirement(threshold),
            },
        ])
    }

    fn host(records: Vec<RecordSpec>) -> SimulatedHost {
        SimulatedHost::from_snapshot(HostSnapshot {
            records,
            ..HostSnapshot::default()
        })
    }

    #[test]
    fn never_lowers_a_higher_requirement() {
        let mut host = host(vec![record(1, false, 3, false), record(2, false, 50, false)]);
        let report = mutate_records(&gift_rules(&[1, 2], 10), &mut host, &MemorySink::new());

        assert_eq!(report.updated.len(), 2);
        assert_eq!(host.record(1).map(|r| r.fragment_requirement), Some(10));
        assert_eq!(host.record(2).map(|r| r.fragment_requirement), Some(50));
        assert!(host.record(2).map(|r| r.droppable).unwrap_or(false));
    }

    #[test]
    fn missing_record_is_isolated() {
        let mut host = host(vec![record(5, false, 0, false), record(7, false, 0, false)]);
        let sink = MemorySink::new();
        let report = mutate_records(&gift_rules(&[5, 6, 7], 10), &mut host, &sink);

        assert_eq!(report.failures, vec![Diagnostic::RecordNotFound { id: 6 }]);
        assert_eq!(report.updated.iter().map(|o| o.id).collect::<Vec<_>>(), vec![5, 7]);
        assert!(sink.contains("Updated 2 archaeology cache gift item templates."));
    }

    #[test]
    fn locked_record_is_mutation_failed() {
        let mut host = host(vec![record(5, false, 0, true), record(6, false, 0, false)]);
        let report = mutate_records(&gift_rules(&[5, 6], 10), &mut host, &MemorySink::new());

        assert!(matches!(
            report.failures.as_slice(),
            [Diagnostic::MutationFailed { id: 5, .. }]
        ));
        assert_eq!(report.updated.len(), 1);
    }

    #[test]
    fn second_pass_changes_nothing() {
        let mut host = host(vec![record(5, false, 4, false), record(6, true, 20, false)]);
        let rules = gift_rules(&[5, 6, 5], 10);

        let first = mutate_records(&rules, &mut host, &MemorySink::new());
        let second = mutate_records(&rules, &mut host, &MemorySink::new());

        assert_eq!(first.changed(), 1);
        assert_eq!(second.changed(), 0);
        assert_eq!(
            first.updated.iter().map(|o| (o.droppable, o.fragment_requirement)).collect::<Vec<_>>(),
            second.updated.iter().map(|o| (o.droppable, o.fragment_requirement)).collect::<Vec<_>>()
        );
    }

    /// Directory that caps fragment requirements, like a host clamping to a
    /// byte.
    struct CappedDirectory {
        cap: i32,
        requirement: i32,
        droppable: bool,
    }

    impl RecordDirectory for CappedDirectory {
        fn find_record(&self, id: i32) -> Result<RecordHandle, HostError> {
            Ok(RecordHandle(id))
        }

        fn droppable(&self, _: RecordHandle) -> Result<bool, HostError> {
            Ok(self.droppable)
        }

        fn fragment_requirement(&self, _: RecordHandle) -> Result<i32, HostError> {
            Ok(self.requirement)
        }

        fn set_droppable(&mut self, _: RecordHandle, droppable: bool) -> Result<(), HostError> {
            self.droppable = droppable;
            Ok(())
        }

        fn set_fragment_requirement(&mut self, _: RecordHandle, amount: i32) -> Result<i32, HostError> {
            self.requirement = amount.min(self.cap);
            Ok(self.requirement)
        }
    }

    #[test]
    fn outcome_reports_the_requirement_the_host_kept() {
        let mut directory = CappedDirectory {
            cap: 100,
            requirement: 4,
            droppable: false,
        };
        let report = mutate_records(&gift_rules(&[9], 127), &mut directory, &MemorySink::new());

        assert_eq!(
            report.updated,
            vec![RecordOutcome {
                id: 9,
                droppable: true,
                fragment_requirement: 100,
                changed: true,
            }]
        );
    }

    #[test]
    fn no_record_rules_is_a_quiet_no_op() {
        let mut host = host(vec![record(5, false, 0, false)]);
        let sink = MemorySink::new();
        let report = mutate_records(&OverrideRuleSet::default(), &mut host, &sink);
        assert!(report.updated.is_empty());
        assert!(sink.lines().is_empty());
    }
}
