use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::gifts::{ItemIdResolver, ItemNameTable, ResolveError};
use crate::host::{FunctionHandle, HostError, HostRewriter, RecordDirectory, RecordHandle};
use crate::rules::{BehaviorDescriptor, QualifiedName, FRAGMENT_UTILITIES, ITEM_BEHAVIOUR};
use crate::Result;

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    /// Methods called from the body, one entry per call site.
    #[serde(default)]
    pub calls: Vec<String>,
    /// Refuses any rewrite, as a body the host cannot recompile would.
    #[serde(default)]
    pub locked: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TypeSpec {
    pub name: String,
    #[serde(default = "default_true")]
    pub has_initializer: bool,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct RecordSpec {
    pub id: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub droppable: bool,
    #[serde(default)]
    pub fragment_requirement: i32,
    /// Fields cannot be overridden.
    #[serde(default)]
    pub locked: bool,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct HostSnapshot {
    #[serde(default)]
    pub functions: Vec<FunctionSpec>,
    #[serde(default)]
    pub types: Vec<TypeSpec>,
    #[serde(default)]
    pub records: Vec<RecordSpec>,
}

impl HostSnapshot {
    pub fn stock_server() -> Self {
        let fragments = QualifiedName::new(FRAGMENT_UTILITIES);
        let behaviour = QualifiedName::new(ITEM_BEHAVIOUR);
        Self {
            functions: vec![
                FunctionSpec {
                    name: fragments.member("getMetalAlloyMaterial").to_string(),
                    ..FunctionSpec::default()
                },
                FunctionSpec {
                    name: fragments.member("getMetalMoonMaterial").to_string(),
                    ..FunctionSpec::default()
                },
                FunctionSpec {
                    name: behaviour.member("identifyFragment").to_string(),
                    calls: vec![
                        "getRealTemplate".to_string(),
                        "setData1".to_string(),
                        "sendUpdate".to_string(),
                    ],
                    locked: false,
                },
            ],
            types: vec![
                TypeSpec {
                    name: FRAGMENT_UTILITIES.to_string(),
                    has_initializer: true,
                },
                TypeSpec {
                    name: ITEM_BEHAVIOUR.to_string(),
                    has_initializer: false,
                },
            ],
            records: Vec::new(),
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

#[derive(Clone, Debug)]
struct SimFunction {
    name: String,
    calls: Vec<String>,
    locked: bool,
    body: Option<BehaviorDescriptor>,
    call_rewrites: Vec<(String, BehaviorDescriptor)>,
}

#[derive(Clone, Debug)]
struct SimType {
    has_initializer: bool,
    splices: Vec<BehaviorDescriptor>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RecordView {
    pub droppable: bool,
    pub fragment_requirement: i32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GiftTable {
    ids: Vec<i32>,
}

impl GiftTable {
    pub fn new(ids: Vec<i32>) -> Option<Self> {
        if ids.is_empty() {
            None
        } else {
            Some(Self { ids })
        }
    }

    pub fn ids(&self) -> &[i32] {
        &self.ids
    }

    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> i32 {
        // `new` refuses empty tables.
        self.ids[rng.gen_range(0..self.ids.len())]
    }
}

#[derive(Clone, Debug)]
struct SimRecord {
    view: RecordView,
    locked: bool,
}

#[derive(Clone, Debug)]
pub struct SimulatedHost {
    functions: Vec<SimFunction>,
    by_name: HashMap<String, usize>,
    types: HashMap<String, SimType>,
    records: BTreeMap<i32, SimRecord>,
    names: ItemNameTable,
}

/// Rough structural check standing in for the host compiler.
fn check_compiles(target: &str, code: &BehaviorDescriptor) -> std::result::Result<(), HostError> {
    let source = code.source().trim();
    let fail = |reason: &str| HostError::CannotCompile {
        target: target.to_string(),
        reason: reason.to_string(),
    };

    if !(source.starts_with('{') && source.ends_with('}')) {
        return Err(fail("body must be a block"));
    }

    let mut depth = 0i32;
    for c in source.chars() {
        match c {
            '{' | '(' => depth += 1,
            '}' | ')' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return Err(fail("unbalanced brackets"));
        }
    }
    if depth != 0 {
        return Err(fail("unbalanced brackets"));
    }
    Ok(())
}

impl SimulatedHost {
    pub fn from_snapshot(snapshot: HostSnapshot) -> Self {
        let mut functions = Vec::new();
        let mut by_name = HashMap::new();
        for spec in snapshot.functions {
            by_name.entry(spec.name.clone()).or_insert(functions.len());
            functions.push(SimFunction {
                name: spec.name,
                calls: spec.calls,
                locked: spec.locked,
                body: None,
                call_rewrites: Vec::new(),
            });
        }

        let types = snapshot
            .types
            .into_iter()
            .map(|t| {
                (
                    t.name,
                    SimType {
                        has_initializer: t.has_initializer,
                        splices: Vec::new(),
                    },
                )
            })
            .collect();

        let mut names = ItemNameTable::new();
        let mut records = BTreeMap::new();
        for r in snapshot.records {
            if !r.name.is_empty() {
                names.insert(&r.name, r.id);
            }
            records.insert(
                r.id,
                SimRecord {
                    view: RecordView {
                        droppable: r.droppable,
                        fragment_requirement: r.fragment_requirement,
                    },
                    locked: r.locked,
                },
            );
        }

        Self {
            functions,
            by_name,
            types,
            records,
            names,
        }
    }

    pub fn installed_body(&self, function: &str) -> Option<&BehaviorDescriptor> {
        let idx = *self.by_name.get(function)?;
        self.functions[idx].body.as_ref()
    }

    pub fn call_rewrites(&self, function: &str) -> usize {
        self.by_name
            .get(function)
            .map(|&idx| self.functions[idx].call_rewrites.len())
            .unwrap_or(0)
    }

    pub fn initializer_splices(&self, type_name: &str) -> &[BehaviorDescriptor] {
        self.types
            .get(type_name)
            .map(|t| t.splices.as_slice())
            .unwrap_or(&[])
    }

    pub fn record(&self, id: i32) -> Option<RecordView> {
        self.records.get(&id).map(|r| r.view)
    }

    pub fn record_ids(&self) -> impl Iterator<Item = i32> + '_ {
        self.records.keys().copied()
    }

    /// The statue table the cache loot code sees once the initializer has
    /// run: the last spliced array wins, as in the host's static init.
    pub fn gift_table(&self) -> Option<GiftTable> {
        let splice = self.initializer_splices(FRAGMENT_UTILITIES).last()?;
        GiftTable::new(splice.parameters().to_vec())
    }

    fn function_mut(&mut self, handle: FunctionHandle) -> std::result::Result<&mut SimFunction, HostError> {
        self.functions
            .get_mut(handle.0)
            .ok_or_else(|| HostError::NotFound(format!("function handle {}", handle.0)))
    }

    fn record_mut(&mut self, handle: RecordHandle) -> std::result::Result<&mut SimRecord, HostError> {
        self.records
            .get_mut(&handle.0)
            .ok_or_else(|| HostError::NotFound(format!("item template {}", handle.0)))
    }

    fn record_ref(&self, handle: RecordHandle) -> std::result::Result<&SimRecord, HostError> {
        self.records
            .get(&handle.0)
            .ok_or_else(|| HostError::NotFound(format!("item template {}", handle.0)))
    }
}

impl HostRewriter for SimulatedHost {
    fn find_function(&self, name: &QualifiedName) -> std::result::Result<FunctionHandle, HostError> {
        self.by_name
            .get(name.as_str())
            .map(|&idx| FunctionHandle(idx))
            .ok_or_else(|| HostError::NotFound(name.to_string()))
    }

    fn replace_body(
        &mut self,
        handle: FunctionHandle,
        body: &BehaviorDescriptor,
    ) -> std::result::Result<(), HostError> {
        let function = self.function_mut(handle)?;
        if function.locked {
            return Err(HostError::CannotCompile {
                target: function.name.clone(),
                reason: "method body is not rewritable".to_string(),
            });
        }
        check_compiles(&function.name, body)?;
        function.body = Some(body.clone());
        Ok(())
    }

    fn rewrite_calls(
        &mut self,
        handle: FunctionHandle,
        method: &str,
        replacement: &BehaviorDescriptor,
    ) -> std::result::Result<usize, HostError> {
        let function = self.function_mut(handle)?;
        if function.locked {
            return Err(HostError::CannotCompile {
                target: function.name.clone(),
                reason: "method body is not rewritable".to_string(),
            });
        }
        check_compiles(&function.name, replacement)?;

        let sites = function.calls.iter().filter(|c| c.as_str() == method).count();
        for _ in 0..sites {
            function
                .call_rewrites
                .push((method.to_string(), replacement.clone()));
        }
        Ok(sites)
    }

    fn append_to_initializer(
        &mut self,
        type_name: &QualifiedName,
        code: &BehaviorDescriptor,
    ) -> std::result::Result<(), HostError> {
        let ty = self
            .types
            .get_mut(type_name.as_str())
            .filter(|t| t.has_initializer)
            .ok_or_else(|| HostError::NotFound(format!("static initializer of {type_name}")))?;
        check_compiles(type_name.as_str(), code)?;
        ty.splices.push(code.clone());
        Ok(())
    }
}

impl RecordDirectory for SimulatedHost {
    fn find_record(&self, id: i32) -> std::result::Result<RecordHandle, HostError> {
        if self.records.contains_key(&id) {
            Ok(RecordHandle(id))
        } else {
            Err(HostError::NotFound(format!("item template {id}")))
        }
    }

    fn droppable(&self, handle: RecordHandle) -> std::result::Result<bool, HostError> {
        Ok(self.record_ref(handle)?.view.droppable)
    }

    fn fragment_requirement(&self, handle: RecordHandle) -> std::result::Result<i32, HostError> {
        Ok(self.record_ref(handle)?.view.fragment_requirement)
    }

    fn set_droppable(&mut self, handle: RecordHandle, droppable: bool) -> std::result::Result<(), HostError> {
        let record = self.record_mut(handle)?;
        if record.locked {
            return Err(HostError::FieldLocked {
                id: handle.0,
                field: "nodrop",
            });
        }
        record.view.droppable = droppable;
        Ok(())
    }

    fn set_fragment_requirement(
        &mut self,
        handle: RecordHandle,
        amount: i32,
    ) -> std::result::Result<i32, HostError> {
        let record = self.record_mut(handle)?;
        if record.locked {
            return Err(HostError::FieldLocked {
                id: handle.0,
                field: "fragmentAmount",
            });
        }
        record.view.fragment_requirement = amount;
        Ok(amount)
    }
}

impl ItemIdResolver for SimulatedHost {
    fn resolve(&self, token: &str) -> std::result::Result<i32, ResolveError> {
        self.names.resolve(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    const SNAPSHOT: &str = r#"{
        "records": [
            { "id": 101, "name": "statuette of Fo", "fragment_requirement": 4 },
            { "id": 102, "name": "statuette of Magranon", "droppable": true, "locked": true }
        ]
    }"#;

    #[test]
    fn loads_json_snapshot_with_defaults() {
        let snapshot = HostSnapshot::from_json(SNAPSHOT).unwrap();
        assert!(snapshot.functions.is_empty());
        assert_eq!(snapshot.records.len(), 2);
        assert!(!snapshot.records[0].droppable);
        assert!(snapshot.records[1].locked);

        let host = SimulatedHost::from_snapshot(snapshot);
        assert_eq!(host.resolve("statuetteOfFo"), Ok(101));
        assert_eq!(host.resolve("102"), Ok(102));
        assert_eq!(
            host.record(101),
            Some(RecordView {
                droppable: false,
                fragment_requirement: 4
            })
        );
    }

    #[test]
    fn bad_json_is_an_error() {
        assert!(HostSnapshot::from_json("{ records: ").is_err());
    }

    #[test]
    fn unbalanced_body_cannot_compile() {
        let mut host = SimulatedHost::from_snapshot(HostSnapshot::stock_server());
        let name = QualifiedName::new(FRAGMENT_UTILITIES).member("getMetalMoonMaterial");
        let handle = host.find_function(&name).unwrap();

        let err = host
            .replace_body(handle, &BehaviorDescriptor::new("{ return (57; }"))
            .unwrap_err();
        assert!(matches!(err, HostError::CannotCompile { .. }));
        assert!(host.installed_body(name.as_str()).is_none());
    }

    #[test]
    fn gift_table_follows_last_splice() {
        let mut host = SimulatedHost::from_snapshot(HostSnapshot::stock_server());
        assert!(host.gift_table().is_none());

        let ty = QualifiedName::new(FRAGMENT_UTILITIES);
        host.append_to_initializer(&ty, &BehaviorDescriptor::with_parameters("{ }", vec![1]))
            .unwrap();
        host.append_to_initializer(&ty, &BehaviorDescriptor::with_parameters("{ }", vec![2, 3]))
            .unwrap();
        assert_eq!(host.gift_table().map(|t| t.ids().to_vec()), Some(vec![2, 3]));
    }

    #[test]
    fn gift_table_picks_members() {
        assert!(GiftTable::new(Vec::new()).is_none());
        let table = GiftTable::new(vec![101, 102]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            assert!(table.ids().contains(&table.pick(&mut rng)));
        }
    }

    #[test]
    fn stock_server_has_one_set_data_call() {
        let mut host = SimulatedHost::from_snapshot(HostSnapshot::stock_server());
        let name = QualifiedName::new(ITEM_BEHAVIOUR).member("identifyFragment");
        let handle = host.find_function(&name).unwrap();
        let sites = host
            .rewrite_calls(handle, "setData1", &BehaviorDescriptor::new("{ $_ = $proceed($$); }"))
            .unwrap();
        assert_eq!(sites, 1);
        assert_eq!(host.call_rewrites(name.as_str()), 1);
    }
}
