//! Narrow interfaces to the external collaborators: the language compiler,
//! the bytecode enhancer, the host's class definition and redefinition
//! facilities, and the packaged resource loader.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::class::RuntimeClass;
use crate::diagnostics::CompileDiagnostic;

/// One unit handed to the compiler
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub name: String,
    pub source: Arc<str>,
}

/// Raw (pre-enhancement) compiler output for one unit.
///
/// The compiler may emit extra units for nested types declared in the same
/// file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledUnit {
    pub name: String,
    pub bytecode: Vec<u8>,
    pub dependencies: BTreeSet<String>,
}

pub trait CompileAdapter: Send + Sync {
    /// Compile a batch, stopping at the first error
    fn compile(&self, units: &[CompileRequest]) -> Result<Vec<CompiledUnit>, CompileDiagnostic>;
}

#[derive(Debug, Clone, Copy)]
pub struct EnhanceRequest<'a> {
    pub name: &'a str,
    pub bytecode: &'a [u8],
    pub source: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enhanced {
    pub bytecode: Vec<u8>,
    /// Hash over the externally observable shape (members, annotations)
    pub signature_checksum: u32,
    /// Hash over compile-time-constant values only; 0 when there are none
    pub static_final_checksum: u32,
}

pub trait EnhanceAdapter: Send + Sync {
    /// Pure function of (raw bytecode, source)
    fn enhance(&self, request: &EnhanceRequest<'_>) -> Result<Enhanced, CompileDiagnostic>;

    /// Static-final checksum recomputed from a compiled constant pool
    fn constant_checksum(&self, bytecode: &[u8]) -> u32;
}

/// A batch member for [`HotSwapFacility::redefine`]
#[derive(Debug, Clone)]
pub struct Redefinition {
    pub class: Arc<RuntimeClass>,
    pub bytecode: Arc<[u8]>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct HotSwapRejection {
    pub reason: String,
}

impl HotSwapRejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

pub trait HotSwapFacility: Send + Sync {
    /// Atomically redefine every class in the batch, or none of them
    fn redefine(&self, batch: &[Redefinition]) -> Result<(), HotSwapRejection>;
}

/// Facility for hosts without live redefinition: every change restarts
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedHotSwap;

impl HotSwapFacility for UnsupportedHotSwap {
    fn redefine(&self, _batch: &[Redefinition]) -> Result<(), HotSwapRejection> {
        Err(HotSwapRejection::new(
            "live redefinition is not supported by this runtime",
        ))
    }
}

/// Reflective shape the host reports for a defined class
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassShape {
    /// Every supertype, transitively
    pub supertypes: Vec<String>,
    pub annotations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot define {name}: {reason}")]
pub struct DefineError {
    pub name: String,
    pub reason: String,
}

pub trait ClassDefiner: Send + Sync {
    fn define_package(&self, package: &str);

    fn define_class(&self, name: &str, bytecode: &[u8]) -> Result<ClassShape, DefineError>;
}

/// Packaged/default resource loader consulted after the live source roots
pub trait ResourceProvider: Send + Sync {
    fn find_resource(&self, name: &str) -> Option<PathBuf>;
}
