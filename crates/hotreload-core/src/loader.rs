//! Name-to-class resolution for the request layer.

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::adapters::{
    ClassDefiner, CompileAdapter, CompileRequest, EnhanceAdapter, EnhanceRequest,
    ResourceProvider,
};
use crate::cache::BytecodeCache;
use crate::class::{ClassOrigin, ClassTable, RuntimeClass};
use crate::errors::{ReloadError, Result};
use crate::fs::{outer_name, package_of};
use crate::generation::WorldGeneration;
use crate::registry::{SourceRegistry, SourceUnit};

#[derive(Debug, Default)]
struct QueryMemo {
    generation: u64,
    by_type: FxHashMap<String, Vec<Arc<RuntimeClass>>>,
    by_annotation: FxHashMap<String, Vec<Arc<RuntimeClass>>>,
}

pub struct ClassLoaderOrchestrator {
    registry: Arc<SourceRegistry>,
    cache: Arc<BytecodeCache>,
    classes: Arc<ClassTable>,
    generation: Arc<WorldGeneration>,
    compiler: Arc<dyn CompileAdapter>,
    enhancer: Arc<dyn EnhanceAdapter>,
    definer: Arc<dyn ClassDefiner>,
    resources: Option<Arc<dyn ResourceProvider>>,

    /// Read side held while resolving; a detection pass holds the write side
    pass_lock: Arc<RwLock<()>>,
    /// Serializes definition; holds the packages defined so far
    define_lock: Mutex<FxHashSet<String>>,
    memo: Mutex<QueryMemo>,
}

impl ClassLoaderOrchestrator {
    pub fn new(
        registry: Arc<SourceRegistry>,
        cache: Arc<BytecodeCache>,
        classes: Arc<ClassTable>,
        generation: Arc<WorldGeneration>,
        compiler: Arc<dyn CompileAdapter>,
        enhancer: Arc<dyn EnhanceAdapter>,
        definer: Arc<dyn ClassDefiner>,
    ) -> Self {
        Self {
            registry,
            cache,
            classes,
            generation,
            compiler,
            enhancer,
            definer,
            resources: None,
            pass_lock: Arc::new(RwLock::new(())),
            define_lock: Mutex::new(FxHashSet::default()),
            memo: Mutex::new(QueryMemo::default()),
        }
    }

    pub fn with_resources(mut self, resources: Arc<dyn ResourceProvider>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Share the detector's pass lock so loads wait for a running pass
    pub fn with_pass_lock(mut self, pass_lock: Arc<RwLock<()>>) -> Self {
        self.pass_lock = pass_lock;
        self
    }

    /// Resolve a name to a defined class, compiling it if the cache misses
    pub fn load(&self, name: &str) -> Result<Arc<RuntimeClass>> {
        let _pass = self.pass_lock.read_recursive();
        if let Some(class) = self.classes.get(name) {
            return Ok(class);
        }

        let mut packages = self.define_lock.lock();
        if let Some(class) = self.classes.get(name) {
            return Ok(class);
        }

        let bytecode = self.prepare(name)?;

        if let Some(package) = package_of(name) {
            if packages.insert(package.to_string()) {
                debug!("Defining package {}", package);
                self.definer.define_package(package);
            }
        }
        let shape = self.definer.define_class(name, &bytecode)?;
        let mut class = RuntimeClass::new(name, shape, bytecode);
        if let Some(origin) = self
            .registry
            .get(name)
            .and_then(|unit| ClassOrigin::of_unit(&unit, self.cache.salt()))
        {
            class = class.with_origin(origin);
        }
        let class = Arc::new(class);
        self.classes.insert(Arc::clone(&class));
        self.generation.advance();
        debug!("Defined {}", name);
        Ok(class)
    }

    /// Enhanced bytecode for `name` without defining it: in memory, from the
    /// cache, or freshly compiled
    fn prepare(&self, name: &str) -> Result<Arc<[u8]>> {
        let unit = self
            .registry
            .get_or_create(name)
            .ok_or_else(|| ReloadError::ClassNotFound {
                name: name.to_string(),
            })?;
        if self.registry.is_stale(&unit) {
            self.registry.refresh(&unit);
        }
        if let Some(bytecode) = unit.enhanced_bytecode() {
            return Ok(bytecode);
        }

        let source = self.registry.load_source(&unit).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ReloadError::ClassNotFound {
                name: name.to_string(),
            },
            _ => ReloadError::Io {
                path: unit.path().to_path_buf(),
                source: e,
            },
        })?;

        match self.cache.lookup(name, Some(&*source)) {
            Some(cached) => {
                let cached: Arc<[u8]> = cached.into();
                unit.set_cached(&source, Arc::clone(&cached));
                Ok(cached)
            }
            None => self.compile(&unit, &source),
        }
    }

    /// Compile, enhance and store one unit. A compile error purges it.
    ///
    /// Dependencies are prepared before the store so their static-final
    /// checksums are known; the unit is already enhanced by then, which
    /// ends dependency cycles.
    fn compile(&self, unit: &SourceUnit, source: &Arc<str>) -> Result<Arc<[u8]>> {
        let name = unit.name();
        let request = CompileRequest {
            name: outer_name(name).to_string(),
            source: Arc::clone(source),
        };
        let output = match self.compiler.compile(std::slice::from_ref(&request)) {
            Ok(outputs) => outputs.into_iter().find(|o| o.name == name),
            Err(diagnostic) => {
                self.registry.remove(name);
                return Err(diagnostic.into());
            }
        };
        let Some(output) = output else {
            self.registry.remove(name);
            return Err(ReloadError::ClassNotFound {
                name: name.to_string(),
            });
        };

        let enhanced = self
            .enhancer
            .enhance(&EnhanceRequest {
                name,
                bytecode: &output.bytecode,
                source,
            })
            .inspect_err(|_| {
                self.registry.remove(name);
            })?;

        unit.set_compiled(source, output.bytecode, output.dependencies);
        unit.set_enhanced(
            source,
            enhanced.bytecode.clone(),
            enhanced.signature_checksum,
            enhanced.static_final_checksum,
        );
        for dep in unit.dependencies() {
            if dep != name {
                if let Err(e) = self.prepare(&dep) {
                    debug!("Dependency {} of {} unavailable: {}", dep, name, e);
                }
            }
        }
        if let Err(e) = self.cache.store(name, &enhanced.bytecode, source) {
            warn!("Failed to cache {}: {}", name, e);
        }
        Ok(enhanced.bytecode.into())
    }

    /// An already-defined class
    pub fn find(&self, name: &str) -> Option<Arc<RuntimeClass>> {
        self.classes.get(name)
    }

    pub fn loaded_classes(&self) -> Vec<Arc<RuntimeClass>> {
        self.classes.all()
    }

    /// Load every top-level unit under the source roots
    pub fn load_all(&self) -> Result<Vec<Arc<RuntimeClass>>> {
        let _pass = self.pass_lock.read_recursive();
        self.registry
            .locator()
            .list_units()
            .iter()
            .map(|name| self.load(name))
            .collect()
    }

    /// Every loaded class assignable to `type_name`, excluding the type
    /// itself
    pub fn by_assignable_type(&self, type_name: &str) -> Result<Vec<Arc<RuntimeClass>>> {
        self.query(type_name, |memo| &mut memo.by_type, |class| {
            class.name() != type_name && class.is_assignable_to(type_name)
        })
    }

    pub fn by_annotation(&self, annotation: &str) -> Result<Vec<Arc<RuntimeClass>>> {
        self.query(annotation, |memo| &mut memo.by_annotation, |class| {
            class.has_annotation(annotation)
        })
    }

    fn query(
        &self,
        key: &str,
        slot: impl Fn(&mut QueryMemo) -> &mut FxHashMap<String, Vec<Arc<RuntimeClass>>>,
        predicate: impl Fn(&RuntimeClass) -> bool,
    ) -> Result<Vec<Arc<RuntimeClass>>> {
        let _pass = self.pass_lock.read_recursive();
        {
            let mut memo = self.memo.lock();
            if memo.generation == self.generation.current() {
                if let Some(hit) = slot(&mut *memo).get(key) {
                    return Ok(hit.clone());
                }
            }
        }

        self.load_all()?;
        // loading may advance the generation; memoize against the settled value
        let generation = self.generation.current();
        let result: Vec<Arc<RuntimeClass>> = self
            .classes
            .all()
            .into_iter()
            .filter(|class| predicate(&**class))
            .collect();

        let mut memo = self.memo.lock();
        if memo.generation != generation {
            memo.by_type.clear();
            memo.by_annotation.clear();
            memo.generation = generation;
        }
        slot(&mut *memo).insert(key.to_string(), result.clone());
        Ok(result)
    }

    /// Resolve a non-code resource, preferring the live source roots
    pub fn resource(&self, name: &str) -> Option<PathBuf> {
        self.registry.locator().find_resource(name).or_else(|| {
            self.resources
                .as_ref()
                .and_then(|provider| provider.find_resource(name))
        })
    }
}
