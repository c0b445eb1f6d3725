use thiserror::Error;

use crate::rules::{BehaviorDescriptor, QualifiedName};

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum HostError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("cannot compile into {target}: {reason}")]
    CannotCompile { target: String, reason: String },

    #[error("field {field} of template {id} cannot be overridden")]
    FieldLocked { id: i32, field: &'static str },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct FunctionHandle(pub usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct RecordHandle(pub i32);

pub trait HostRewriter {
    fn find_function(&self, name: &QualifiedName) -> Result<FunctionHandle, HostError>;

    fn replace_body(
        &mut self,
        handle: FunctionHandle,
        body: &BehaviorDescriptor,
    ) -> Result<(), HostError>;

    /// Wraps every call to `method` inside the function. Returns how many call
    /// sites were rewritten.
    fn rewrite_calls(
        &mut self,
        handle: FunctionHandle,
        method: &str,
        replacement: &BehaviorDescriptor,
    ) -> Result<usize, HostError>;

    /// Appends code to the end of the type's static initializer. A type
    /// without an initializer reports `NotFound`.
    fn append_to_initializer(
        &mut self,
        type_name: &QualifiedName,
        code: &BehaviorDescriptor,
    ) -> Result<(), HostError>;
}

pub trait RecordDirectory {
    fn find_record(&self, id: i32) -> Result<RecordHandle, HostError>;

    fn droppable(&self, handle: RecordHandle) -> Result<bool, HostError>;

    fn fragment_requirement(&self, handle: RecordHandle) -> Result<i32, HostError>;

    fn set_droppable(&mut self, handle: RecordHandle, droppable: bool) -> Result<(), HostError>;

    /// Returns the requirement now in effect.
    fn set_fragment_requirement(
        &mut self,
        handle: RecordHandle,
        amount: i32,
    ) -> Result<i32, HostError>;
}
