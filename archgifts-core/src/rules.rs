use std::fmt;

use serde::Serialize;

use crate::config::Configuration;

pub const FRAGMENT_UTILITIES: &str = "com.wurmonline.server.items.FragmentUtilities";
pub const ITEM_BEHAVIOUR: &str = "com.wurmonline.server.behaviours.ItemBehaviour";

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct QualifiedName(String);

impl QualifiedName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn member(&self, member: &str) -> Self {
        Self(format!("{}.{member}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn owner_and_member(&self) -> Option<(&str, &str)> {
        self.0.rsplit_once('.')
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct BehaviorDescriptor {
    source: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    parameters: Vec<i32>,
}

impl BehaviorDescriptor {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters(source: impl Into<String>, parameters: Vec<i32>) -> Self {
        Self {
            source: source.into(),
            parameters,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn parameters(&self) -> &[i32] {
        &self.parameters
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOverride {
    Droppable(bool),
    /// Raise the fragment requirement to at least this value; never lowers it.
    MinFragmentRequirement(i32),
}

impl FieldOverride {
    pub fn field_name(&self) -> &'static str {
        match self {
            FieldOverride::Droppable(_) => "droppable",
            FieldOverride::MinFragmentRequirement(_) => "fragmentRequirement",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    PreInit,
    RecordsReady,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OverrideRule {
    FunctionReplacement {
        target: QualifiedName,
        body: BehaviorDescriptor,
    },
    CallSiteRewrite {
        target: QualifiedName,
        called_method: String,
        replacement: BehaviorDescriptor,
    },
    InitializerSplice {
        target_type: QualifiedName,
        appended: BehaviorDescriptor,
    },
    RecordFieldOverride {
        record_ids: Vec<i32>,
        field: FieldOverride,
    },
}

impl OverrideRule {
    pub fn phase(&self) -> Phase {
        match self {
            OverrideRule::FunctionReplacement { .. }
            | OverrideRule::CallSiteRewrite { .. }
            | OverrideRule::InitializerSplice { .. } => Phase::PreInit,
            OverrideRule::RecordFieldOverride { .. } => Phase::RecordsReady,
        }
    }

    pub fn is_bugfix(&self) -> bool {
        matches!(
            self,
            OverrideRule::FunctionReplacement { .. } | OverrideRule::CallSiteRewrite { .. }
        )
    }

    pub fn label(&self) -> String {
        match self {
            OverrideRule::FunctionReplacement { target, .. } => format!("replace {target}"),
            OverrideRule::CallSiteRewrite {
                target,
                called_method,
                ..
            } => format!("rewrite {called_method} calls in {target}"),
            OverrideRule::InitializerSplice { target_type, .. } => {
                format!("splice static initializer of {target_type}")
            }
            OverrideRule::RecordFieldOverride { record_ids, field } => format!(
                "override {} on {} gift templates",
                field.field_name(),
                record_ids.len()
            ),
        }
    }
}

fn alloy_material_fix() -> OverrideRule {
    OverrideRule::FunctionReplacement {
        target: QualifiedName::new(FRAGMENT_UTILITIES).member("getMetalAlloyMaterial"),
        body: BehaviorDescriptor::new(
            "{ switch (com.wurmonline.server.Server.rand.nextInt(Math.max(3, 75 - $1))) { \
             case 0: { return 30; } case 1: { return 31; } case 2: { return 96; } \
             default: { return 9; } } }",
        ),
    }
}

fn moon_material_fix() -> OverrideRule {
    OverrideRule::FunctionReplacement {
        target: QualifiedName::new(FRAGMENT_UTILITIES).member("getMetalMoonMaterial"),
        body: BehaviorDescriptor::new(
            "{ switch (com.wurmonline.server.Server.rand.nextInt(Math.max(2, 90 - $1))) { \
             case 0: { return 67; } case 1: { return 56; } default: { return 57; } } }",
        ),
    }
}

/// Identified metal lumps keep a stale material and never combine; reset it
/// before the original `setData1` call goes through.
fn metal_lump_identify_fix() -> OverrideRule {
    OverrideRule::CallSiteRewrite {
        target: QualifiedName::new(ITEM_BEHAVIOUR).member("identifyFragment"),
        called_method: "setData1".to_string(),
        replacement: BehaviorDescriptor::new(
            "{ if (target.getRealTemplate().isMetalLump()) \
             { target.setMaterial((byte) 0); target.sendUpdate(); } $_ = $proceed($$); }",
        ),
    }
}

pub(crate) fn render_gift_array(ids: &[i32]) -> String {
    let joined = ids
        .iter()
        .map(i32::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{ {FRAGMENT_UTILITIES}.justStatues = new int[] {{ {joined} }}; }}")
}

fn gift_splice(ids: &[i32]) -> OverrideRule {
    OverrideRule::InitializerSplice {
        target_type: QualifiedName::new(FRAGMENT_UTILITIES),
        appended: BehaviorDescriptor::with_parameters(render_gift_array(ids), ids.to_vec()),
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct OverrideRuleSet {
    rules: Vec<OverrideRule>,
}

impl OverrideRuleSet {
    pub fn build(config: &Configuration) -> Self {
        let mut rules = Vec::new();

        if config.apply_bugfixes() {
            rules.push(alloy_material_fix());
            rules.push(moon_material_fix());
            rules.push(metal_lump_identify_fix());
        }

        if config.inject_gifts() {
            let ids = config.gift_item_ids();
            rules.push(gift_splice(ids));
            rules.push(OverrideRule::RecordFieldOverride {
                record_ids: ids.to_vec(),
                field: FieldOverride::Droppable(true),
            });
            rules.push(OverrideRule::RecordFieldOverride {
                record_ids: ids.to_vec(),
                field: FieldOverride::MinFragmentRequirement(config.gift_fragment_threshold()),
            });
        }

        Self { rules }
    }

    pub fn from_rules(rules: Vec<OverrideRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[OverrideRule] {
        &self.rules
    }

    pub fn for_phase(&self, phase: Phase) -> impl Iterator<Item = &OverrideRule> + '_ {
        self.rules.iter().filter(move |r| r.phase() == phase)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
