//! Fake compiler, enhancer, definer and hot-swap facility.
//!
//! Sources are line oriented:
//!
//! ```text
//! class Foo extends app.Base, app.Named   # supertypes (signature)
//! @Entity                                 # annotation (signature)
//! public name()                           # member (signature)
//! const LIMIT = 10                        # static-final constant
//! uses app.Bar                            # dependency
//! nested Address                          # emits `Foo$Address`
//! error: message                          # compile error on this line
//! # comment, anything else is body
//! ```
//!
//! Raw bytecode is `BC:<name>\n<source>`; enhanced bytecode prefixes `ENH:`.

use hotreload_core::adapters::{
    ClassDefiner, ClassShape, CompileAdapter, CompileRequest, CompiledUnit, DefineError,
    EnhanceAdapter, EnhanceRequest, Enhanced, HotSwapFacility, HotSwapRejection, Redefinition,
};
use hotreload_core::diagnostics::CompileDiagnostic;
use hotreload_core::hash::checksum32;
use parking_lot::Mutex;
use std::collections::BTreeSet;

const RAW_PREFIX: &str = "BC:";
const ENHANCED_PREFIX: &str = "ENH:";

/// Source text embedded in raw or enhanced bytecode
pub fn embedded_source(bytecode: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytecode);
    let text = text.strip_prefix(ENHANCED_PREFIX).unwrap_or(&*text);
    match text.split_once('\n') {
        Some((_, source)) => source.to_string(),
        None => String::new(),
    }
}

fn lines(source: &str) -> impl Iterator<Item = &str> {
    source.lines().map(str::trim).filter(|l| !l.is_empty())
}

fn signature_lines(source: &str) -> Vec<&str> {
    lines(source)
        .filter(|l| l.starts_with("class ") || l.starts_with('@') || l.starts_with("public "))
        .collect()
}

/// Checksum over `const` lines; 0 when there are none
pub fn static_final_of(source: &str) -> u32 {
    let constants: Vec<&str> = lines(source).filter(|l| l.starts_with("const ")).collect();
    if constants.is_empty() {
        0
    } else {
        checksum32(constants.join("\n").as_bytes())
    }
}

pub fn signature_of(source: &str) -> u32 {
    checksum32(signature_lines(source).join("\n").as_bytes())
}

/// Compiler for the line language; counts every unit it compiles
#[derive(Debug, Default)]
pub struct ScriptedCompiler {
    compiled: Mutex<Vec<String>>,
}

impl ScriptedCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of every request compiled so far, in order
    pub fn compiled(&self) -> Vec<String> {
        self.compiled.lock().clone()
    }

    pub fn compile_count(&self) -> usize {
        self.compiled.lock().len()
    }

    pub fn reset(&self) {
        self.compiled.lock().clear();
    }

    fn compile_one(&self, request: &CompileRequest) -> Result<Vec<CompiledUnit>, CompileDiagnostic> {
        let mut dependencies = BTreeSet::new();
        let mut nested = Vec::new();

        for (index, raw) in request.source.lines().enumerate() {
            let line = raw.trim();
            if let Some(message) = line.strip_prefix("error:") {
                let column = raw.len() - raw.trim_start().len() + 1;
                return Err(CompileDiagnostic::new(
                    request.name.clone(),
                    index as u32 + 1,
                    column as u32,
                    message.trim(),
                ));
            }
            if let Some(dep) = line.strip_prefix("uses ") {
                dependencies.insert(dep.trim().to_string());
            }
            if let Some(inner) = line.strip_prefix("nested ") {
                nested.push(format!("{}${}", request.name, inner.trim()));
            }
        }

        let mut units = vec![CompiledUnit {
            name: request.name.clone(),
            bytecode: format!("{}{}\n{}", RAW_PREFIX, request.name, request.source).into_bytes(),
            dependencies,
        }];
        units.extend(nested.into_iter().map(|name| CompiledUnit {
            bytecode: format!("{}{}\n", RAW_PREFIX, name).into_bytes(),
            name,
            dependencies: BTreeSet::new(),
        }));
        Ok(units)
    }
}

impl CompileAdapter for ScriptedCompiler {
    fn compile(&self, units: &[CompileRequest]) -> Result<Vec<CompiledUnit>, CompileDiagnostic> {
        let mut outputs = Vec::new();
        for request in units {
            self.compiled.lock().push(request.name.clone());
            outputs.extend(self.compile_one(request)?);
        }
        Ok(outputs)
    }
}

/// Enhancer deriving checksums from the source embedded in the bytecode
#[derive(Debug, Default)]
pub struct FakeEnhancer {
    enhanced: Mutex<Vec<String>>,
}

impl FakeEnhancer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enhanced(&self) -> Vec<String> {
        self.enhanced.lock().clone()
    }
}

impl EnhanceAdapter for FakeEnhancer {
    fn enhance(&self, request: &EnhanceRequest<'_>) -> Result<Enhanced, CompileDiagnostic> {
        self.enhanced.lock().push(request.name.to_string());
        let source = embedded_source(request.bytecode);

        let mut bytecode = ENHANCED_PREFIX.as_bytes().to_vec();
        bytecode.extend_from_slice(request.bytecode);
        Ok(Enhanced {
            bytecode,
            signature_checksum: signature_of(&source),
            static_final_checksum: static_final_of(&source),
        })
    }

    fn constant_checksum(&self, bytecode: &[u8]) -> u32 {
        static_final_of(&embedded_source(bytecode))
    }
}

/// Definer that reads the class shape back out of enhanced bytecode
#[derive(Debug, Default)]
pub struct FakeDefiner {
    packages: Mutex<Vec<String>>,
    classes: Mutex<Vec<String>>,
}

impl FakeDefiner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packages in definition order
    pub fn packages(&self) -> Vec<String> {
        self.packages.lock().clone()
    }

    /// Classes in definition order
    pub fn classes(&self) -> Vec<String> {
        self.classes.lock().clone()
    }
}

impl ClassDefiner for FakeDefiner {
    fn define_package(&self, package: &str) {
        self.packages.lock().push(package.to_string());
    }

    fn define_class(&self, name: &str, bytecode: &[u8]) -> Result<ClassShape, DefineError> {
        if !bytecode.starts_with(ENHANCED_PREFIX.as_bytes()) {
            return Err(DefineError {
                name: name.to_string(),
                reason: "bytecode was not enhanced".to_string(),
            });
        }

        let source = embedded_source(bytecode);
        let mut shape = ClassShape::default();
        for line in lines(&source) {
            if let Some(rest) = line.strip_prefix("class ") {
                if let Some((_, supers)) = rest.split_once(" extends ") {
                    shape.supertypes = supers.split(',').map(|s| s.trim().to_string()).collect();
                }
            } else if let Some(annotation) = line.strip_prefix('@') {
                shape.annotations.push(annotation.trim().to_string());
            }
        }
        self.classes.lock().push(name.to_string());
        Ok(shape)
    }
}

/// Hot-swap facility that accepts or rejects every batch and records it
#[derive(Debug)]
pub struct RecordingHotSwap {
    rejection: Option<String>,
    batches: Mutex<Vec<Vec<String>>>,
}

impl RecordingHotSwap {
    pub fn accepting() -> Self {
        Self {
            rejection: None,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting(reason: impl Into<String>) -> Self {
        Self {
            rejection: Some(reason.into()),
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Class names of every batch offered, accepted or not
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().clone()
    }
}

impl HotSwapFacility for RecordingHotSwap {
    fn redefine(&self, batch: &[Redefinition]) -> Result<(), HotSwapRejection> {
        self.batches
            .lock()
            .push(batch.iter().map(|r| r.class.name().to_string()).collect());
        match &self.rejection {
            Some(reason) => Err(HotSwapRejection::new(reason.clone())),
            None => Ok(()),
        }
    }
}
