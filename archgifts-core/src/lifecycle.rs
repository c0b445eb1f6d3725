use serde::Serialize;
use thiserror::Error;

use crate::config::{validate, Configuration, Settings};
use crate::diagnostics::{Diagnostic, DiagnosticsSink, LogSink};
use crate::gifts::ItemIdResolver;
use crate::host::{HostRewriter, RecordDirectory};
use crate::patch::{apply_patches, PatchReport};
use crate::records::{mutate_records, MutationReport};
use crate::rules::OverrideRuleSet;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecyclePhase {
    Uninitialized,
    RulesBuilt,
    PrePatched,
    RecordsMutated,
}

impl LifecyclePhase {
    pub fn can_transition_to(&self, target: LifecyclePhase) -> bool {
        matches!(
            (self, target),
            (LifecyclePhase::Uninitialized, LifecyclePhase::RulesBuilt)
                | (LifecyclePhase::RulesBuilt, LifecyclePhase::PrePatched)
                | (LifecyclePhase::PrePatched, LifecyclePhase::RecordsMutated)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecyclePhase::RecordsMutated)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum LifecycleError {
    #[error("{callback} called while {phase:?}; expected to move to {expected:?}")]
    OutOfOrder {
        callback: &'static str,
        phase: LifecyclePhase,
        expected: LifecyclePhase,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct LifecycleSummary {
    pub version: &'static str,
    pub phase: LifecyclePhase,
    pub configuration: Option<Configuration>,
    pub rules: Option<OverrideRuleSet>,
    pub config_warnings: Vec<Diagnostic>,
    pub patches: Option<PatchReport>,
    pub records: Option<MutationReport>,
}

/// Drives configuration, pre-init patching and record mutation in order, each
/// exactly once.
#[derive(Debug)]
pub struct LifecycleCoordinator<S: DiagnosticsSink = LogSink> {
    phase: LifecyclePhase,
    config: Option<Configuration>,
    rules: Option<OverrideRuleSet>,
    config_warnings: Vec<Diagnostic>,
    patches: Option<PatchReport>,
    records: Option<MutationReport>,
    sink: S,
}

impl Default for LifecycleCoordinator<LogSink> {
    fn default() -> Self {
        Self::new(LogSink)
    }
}

impl<S: DiagnosticsSink> LifecycleCoordinator<S> {
    pub fn new(sink: S) -> Self {
        Self {
            phase: LifecyclePhase::Uninitialized,
            config: None,
            rules: None,
            config_warnings: Vec::new(),
            patches: None,
            records: None,
            sink,
        }
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn configuration(&self) -> Option<&Configuration> {
        self.config.as_ref()
    }

    pub fn rules(&self) -> Option<&OverrideRuleSet> {
        self.rules.as_ref()
    }

    pub fn config_warnings(&self) -> &[Diagnostic] {
        &self.config_warnings
    }

    pub fn patch_report(&self) -> Option<&PatchReport> {
        self.patches.as_ref()
    }

    pub fn mutation_report(&self) -> Option<&MutationReport> {
        self.records.as_ref()
    }

    fn advance(&self, callback: &'static str, target: LifecyclePhase) -> Result<(), LifecycleError> {
        if !self.phase.can_transition_to(target) {
            return Err(LifecycleError::OutOfOrder {
                callback,
                phase: self.phase,
                expected: target,
            });
        }
        Ok(())
    }

    pub fn configure(
        &mut self,
        settings: &Settings,
        resolver: &dyn ItemIdResolver,
    ) -> Result<&Configuration, LifecycleError> {
        self.advance("configure", LifecyclePhase::RulesBuilt)?;

        let validated = validate(settings, resolver, &self.sink);
        self.rules = Some(OverrideRuleSet::build(&validated.config));
        self.config_warnings = validated.warnings;
        self.phase = LifecyclePhase::RulesBuilt;
        Ok(&*self.config.insert(validated.config))
    }

    /// Host pre-init callback. Rejected rather than re-applied when called a
    /// second time.
    pub fn pre_init<H: HostRewriter + ?Sized>(&mut self, host: &mut H) -> Result<&PatchReport, LifecycleError> {
        self.advance("pre_init", LifecyclePhase::PrePatched)?;

        let report = match &self.rules {
            Some(rules) => apply_patches(rules, host, &self.sink),
            None => PatchReport::default(),
        };
        self.phase = LifecyclePhase::PrePatched;
        Ok(&*self.patches.insert(report))
    }

    /// Host callback once every item template has been constructed.
    pub fn on_records_ready<D: RecordDirectory + ?Sized>(
        &mut self,
        directory: &mut D,
    ) -> Result<&MutationReport, LifecycleError> {
        self.advance("on_records_ready", LifecyclePhase::RecordsMutated)?;

        let report = match &self.rules {
            Some(rules) => mutate_records(rules, directory, &self.sink),
            None => MutationReport::default(),
        };
        self.phase = LifecyclePhase::RecordsMutated;
        Ok(&*self.records.insert(report))
    }

    pub fn summary(&self) -> LifecycleSummary {
        LifecycleSummary {
            version: crate::VERSION,
            phase: self.phase,
            configuration: self.config.clone(),
            rules: self.rules.clone(),
            config_warnings: self.config_warnings.clone(),
            patches: self.patches.clone(),
            records: self.records.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use crate::gifts::NumericResolver;
    use crate::sim::{HostSnapshot, SimulatedHost};

    fn settings() -> Settings {
        [("giftList", "5 6")].into_iter().collect()
    }

    #[test]
    fn transitions_are_forward_only() {
        use LifecyclePhase::*;
        assert!(Uninitialized.can_transition_to(RulesBuilt));
        assert!(RulesBuilt.can_transition_to(PrePatched));
        assert!(PrePatched.can_transition_to(RecordsMutated));
        assert!(!PrePatched.can_transition_to(PrePatched));
        assert!(!RecordsMutated.can_transition_to(Uninitialized));
        assert!(!Uninitialized.can_transition_to(PrePatched));
        assert!(RecordsMutated.is_terminal());
    }

    #[test]
    fn second_pre_init_is_rejected_without_reapplying() {
        let mut coordinator = LifecycleCoordinator::new(MemorySink::new());
        let mut host = SimulatedHost::from_snapshot(HostSnapshot::stock_server());

        coordinator.configure(&settings(), &NumericResolver).unwrap();
        coordinator.pre_init(&mut host).unwrap();
        let splices = host.initializer_splices(crate::rules::FRAGMENT_UTILITIES).len();

        let err = coordinator.pre_init(&mut host).unwrap_err();
        assert_eq!(
            err,
            LifecycleError::OutOfOrder {
                callback: "pre_init",
                phase: LifecyclePhase::PrePatched,
                expected: LifecyclePhase::PrePatched,
            }
        );
        assert_eq!(host.initializer_splices(crate::rules::FRAGMENT_UTILITIES).len(), splices);
        assert_eq!(splices, 1);
    }

    #[test]
    fn callbacks_out_of_order_are_rejected() {
        let mut coordinator = LifecycleCoordinator::new(MemorySink::new());
        let mut host = SimulatedHost::from_snapshot(HostSnapshot::stock_server());

        assert!(coordinator.pre_init(&mut host).is_err());
        assert!(coordinator.on_records_ready(&mut host).is_err());
        assert_eq!(coordinator.phase(), LifecyclePhase::Uninitialized);

        coordinator.configure(&settings(), &NumericResolver).unwrap();
        assert!(coordinator.on_records_ready(&mut host).is_err());
        assert!(coordinator.configure(&settings(), &NumericResolver).is_err());
        assert_eq!(coordinator.phase(), LifecyclePhase::RulesBuilt);
    }

    #[test]
    fn summary_serializes() {
        let mut coordinator = LifecycleCoordinator::new(MemorySink::new());
        coordinator.configure(&settings(), &NumericResolver).unwrap();
        let json = serde_json::to_value(coordinator.summary()).unwrap();
        assert_eq!(json["phase"], "RULES_BUILT");
        assert_eq!(json["configuration"]["gift_item_ids"], serde_json::json!([5, 6]));
        assert_eq!(json["rules"].as_array().map(Vec::len), Some(6));
    }
}
