use serde::Serialize;

use crate::diagnostics::{Diagnostic, DiagnosticsSink, Severity};
use crate::host::{HostError, HostRewriter};
use crate::rules::{OverrideRule, OverrideRuleSet, Phase};

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct PatchReport {
    pub attempted: usize,
    pub applied: Vec<String>,
    pub failures: Vec<Diagnostic>,
}

impl PatchReport {
    pub fn all_applied(&self) -> bool {
        self.failures.is_empty()
    }
}

fn not_found_or_failed(rule: &OverrideRule, target: &str, err: HostError) -> Diagnostic {
    match err {
        HostError::NotFound(_) => Diagnostic::TargetNotFound {
            rule: rule.label(),
            target: target.to_string(),
        },
        other => Diagnostic::PatchFailed {
            rule: rule.label(),
            reason: other.to_string(),
        },
    }
}

fn patch_failed(rule: &OverrideRule, err: HostError) -> Diagnostic {
    Diagnostic::PatchFailed {
        rule: rule.label(),
        reason: err.to_string(),
    }
}

fn apply_rule<H: HostRewriter + ?Sized>(rule: &OverrideRule, host: &mut H) -> Result<(), Diagnostic> {
    match rule {
        OverrideRule::FunctionReplacement { target, body } => {
            let handle = host
                .find_function(target)
                .map_err(|e| not_found_or_failed(rule, target.as_str(), e))?;
            host.replace_body(handle, body)
                .map_err(|e| patch_failed(rule, e))
        }
        OverrideRule::CallSiteRewrite {
            target,
            called_method,
            replacement,
        } => {
            let handle = host
                .find_function(target)
                .map_err(|e| not_found_or_failed(rule, target.as_str(), e))?;
            let rewritten = host
                .rewrite_calls(handle, called_method, replacement)
                .map_err(|e| patch_failed(rule, e))?;
            if rewritten == 0 {
                return Err(Diagnostic::PatchFailed {
                    rule: rule.label(),
                    reason: format!("no calls to {called_method} in {target}"),
                });
            }
            Ok(())
        }
        OverrideRule::InitializerSplice {
            target_type,
            appended,
        } => host
            .append_to_initializer(target_type, appended)
            .map_err(|e| not_found_or_failed(rule, target_type.as_str(), e)),
        // Record overrides belong to the records-ready phase.
        OverrideRule::RecordFieldOverride { .. } => Ok(()),
    }
}

/// Applies every pre-init rule once, in order. A failing rule is reported and
/// skipped; it never stops the rules after it.
pub fn apply_patches<H: HostRewriter + ?Sized>(
    rules: &OverrideRuleSet,
    host: &mut H,
    sink: &dyn DiagnosticsSink,
) -> PatchReport {
    let mut report = PatchReport::default();
    let mut bugfixes = (0usize, 0usize);
    let mut gift_count = None;

    for rule in rules.for_phase(Phase::PreInit) {
        report.attempted += 1;
        if rule.is_bugfix() {
            bugfixes.0 += 1;
        }

        match apply_rule(rule, host) {
            Ok(()) => {
                log::debug!(target: crate::diagnostics::LOG_TARGET, "applied: {}", rule.label());
                if rule.is_bugfix() {
                    bugfixes.1 += 1;
                }
                if let OverrideRule::InitializerSplice { appended, .. } = rule {
                    gift_count = Some(appended.parameters().len());
                }
                report.applied.push(rule.label());
            }
            Err(diagnostic) => {
                diagnostic.report(sink);
                report.failures.push(diagnostic);
            }
        }
    }

    let (bugfix_total, bugfix_applied) = bugfixes;
    if bugfix_total > 0 && bugfix_applied == bugfix_total {
        sink.emit(Severity::Info, "Archaeology bug fixes applied.");
    } else if bugfix_total > 0 {
        sink.emit(
            Severity::Warning,
            &format!("Only {bugfix_applied} of {bugfix_total} archaeology bug fixes applied."),
        );
    }
    if let Some(count) = gift_count {
        sink.emit(
            Severity::Info,
            &format!("{count} gift fragments added to archaeology cache loot tables."),
        );
    }

    sink.emit(
        if report.all_applied() { Severity::Info } else { Severity::Warning },
        &format!(
            "{} of {} pre-init override rules applied, {} failed.",
            report.applied.len(),
            report.attempted,
            report.failures.len()
        ),
    );

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use crate::rules::{BehaviorDescriptor, QualifiedName, FRAGMENT_UTILITIES};
    use crate::sim::{FunctionSpec, HostSnapshot, SimulatedHost};

    fn replacement(target: &str) -> OverrideRule {
        OverrideRule::FunctionReplacement {
            target: QualifiedName::new(target),
            body: BehaviorDescriptor::new("{ return 1; }"),
        }
    }

    #[test]
    fn missing_target_does_not_block_later_rules() {
        let mut host = SimulatedHost::from_snapshot(HostSnapshot::stock_server());
        let alloy = format!("{FRAGMENT_UTILITIES}.getMetalAlloyMaterial");
        let rules = OverrideRuleSet::from_rules(vec![
            replacement("com.example.Nowhere.nothing"),
            replacement(&alloy),
        ]);
        let sink = MemorySink::new();

        let report = apply_patches(&rules, &mut host, &sink);

        assert_eq!(report.attempted, 2);
        assert_eq!(report.applied.len(), 1);
        assert!(matches!(
            &report.failures[0],
            Diagnostic::TargetNotFound { target, .. } if target == "com.example.Nowhere.nothing"
        ));
        assert!(host.installed_body(&alloy).is_some());
        assert_eq!(sink.count(Severity::Error), 1);
    }

    #[test]
    fn compile_failure_is_patch_failed() {
        let mut snapshot = HostSnapshot::default();
        snapshot.functions.push(FunctionSpec {
            name: "a.B.locked".to_string(),
            calls: Vec::new(),
            locked: true,
        });
        snapshot.functions.push(FunctionSpec {
            name: "a.B.open".to_string(),
            calls: Vec::new(),
            locked: false,
        });
        let mut host = SimulatedHost::from_snapshot(snapshot);
        let rules = OverrideRuleSet::from_rules(vec![replacement("a.B.locked"), replacement("a.B.open")]);

        let report = apply_patches(&rules, &mut host, &MemorySink::new());

        assert!(matches!(report.failures.as_slice(), [Diagnostic::PatchFailed { .. }]));
        assert_eq!(report.applied, vec!["replace a.B.open".to_string()]);
    }

    #[test]
    fn call_rewrite_without_call_sites_fails() {
        let mut snapshot = HostSnapshot::default();
        snapshot.functions.push(FunctionSpec {
            name: "a.B.identify".to_string(),
            calls: vec!["sendUpdate".to_string()],
            locked: false,
        });
        let mut host = SimulatedHost::from_snapshot(snapshot);
        let rules = OverrideRuleSet::from_rules(vec![OverrideRule::CallSiteRewrite {
            target: QualifiedName::new("a.B.identify"),
            called_method: "setData1".to_string(),
            replacement: BehaviorDescriptor::new("{ $_ = $proceed($$); }"),
        }]);

        let report = apply_patches(&rules, &mut host, &MemorySink::new());
        assert!(matches!(report.failures.as_slice(), [Diagnostic::PatchFailed { .. }]));
    }

    #[test]
    fn splice_into_type_without_initializer_is_target_not_found() {
        let mut host = SimulatedHost::from_snapshot(HostSnapshot::default());
        let rules = OverrideRuleSet::from_rules(vec![OverrideRule::InitializerSplice {
            target_type: QualifiedName::new(FRAGMENT_UTILITIES),
            appended: BehaviorDescriptor::with_parameters("{ }", vec![1]),
        }]);
        let report = apply_patches(&rules, &mut host, &MemorySink::new());
        assert!(matches!(report.failures.as_slice(), [Diagnostic::TargetNotFound { .. }]));
    }
}
