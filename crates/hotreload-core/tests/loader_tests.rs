use hotreload_core::adapters::ResourceProvider;
use hotreload_core::errors::ReloadError;
use hotreload_core::ReloadContext;
use hotreload_test_helpers::fixtures::Harness;
use indoc::indoc;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const BASE: &str = "class Base";

const DOG: &str = indoc! {"
    class Dog extends app.Base
    @Pet
    public bark()
"};

const CAT: &str = indoc! {"
    class Cat extends app.Base
    @Pet
    public purr()
"};

fn names(classes: &[Arc<hotreload_core::RuntimeClass>]) -> Vec<String> {
    classes.iter().map(|c| c.name().to_string()).collect()
}

// ============================================================================
// LOADING
// ============================================================================

#[test]
fn test_load_twice_returns_same_instance() {
    let h = Harness::new();
    h.write("app.Foo", "class Foo\npublic run()");
    let ctx = h.context();

    let first = ctx.load("app.Foo").unwrap();
    let second = ctx.load("app.Foo").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(h.compiler.compile_count(), 1);
}

#[test]
fn test_loaded_class_carries_enhanced_bytecode_and_shape() {
    let h = Harness::new();
    h.write("app.Base", BASE);
    h.write("app.Dog", DOG);
    let ctx = h.context();

    let dog = ctx.load("app.Dog").unwrap();
    assert!(dog.bytecode().starts_with(b"ENH:"));
    assert_eq!(dog.package(), Some("app"));
    assert_eq!(dog.supertypes(), ["app.Base".to_string()]);
    assert!(dog.has_annotation("Pet"));
    assert!(dog.is_assignable_to("app.Base"));
}

#[test]
fn test_missing_unit_is_class_not_found() {
    let h = Harness::new();
    let ctx = h.context();

    let err = ctx.load("app.Missing").unwrap_err();
    assert!(matches!(err, ReloadError::ClassNotFound { ref name } if name == "app.Missing"));
}

#[test]
fn test_malformed_name_is_class_not_found() {
    let h = Harness::new();
    let ctx = h.context();

    assert!(matches!(
        ctx.load("../etc/passwd"),
        Err(ReloadError::ClassNotFound { .. })
    ));
}

#[test]
fn test_compile_error_purges_unit() {
    let h = Harness::new();
    h.write("app.Foo", "class Foo\nerror: unexpected token");
    let ctx = h.context();

    let err = ctx.load("app.Foo").unwrap_err();
    let ReloadError::Compile(diagnostic) = err else {
        panic!("expected compile error, got {:?}", err);
    };
    assert_eq!(diagnostic.unit, "app.Foo");
    assert_eq!(diagnostic.line, 2);
    assert_eq!(diagnostic.column, 1);
    assert_eq!(diagnostic.message, "unexpected token");
    assert!(ctx.registry().get("app.Foo").is_none());
    assert!(ctx.find("app.Foo").is_none());
}

#[test]
fn test_package_defined_once_before_classes() {
    let h = Harness::new();
    h.write("app.Base", BASE);
    h.write("app.Dog", DOG);
    h.write("app.Cat", CAT);
    h.write("lib.Util", "class Util");
    let ctx = h.context();

    ctx.load("app.Dog").unwrap();
    ctx.load("app.Cat").unwrap();
    ctx.load("lib.Util").unwrap();

    assert_eq!(h.definer.packages(), vec!["app", "lib"]);
}

#[test]
fn test_nested_unit_loads_from_outer_file() {
    let h = Harness::new();
    h.write("app.Outer", "class Outer\nnested Inner");
    let ctx = h.context();

    let inner = ctx.load("app.Outer$Inner").unwrap();
    assert_eq!(inner.name(), "app.Outer$Inner");
    assert_eq!(inner.package(), Some("app"));
    assert_eq!(h.compiler.compiled(), vec!["app.Outer"]);
}

#[test]
fn test_load_all_defines_every_top_level_unit() {
    let h = Harness::new();
    h.write("app.Base", BASE);
    h.write("app.Dog", DOG);
    h.write("app.Cat", CAT);
    let ctx = h.context();

    let loaded = ctx.loader().load_all().unwrap();
    assert_eq!(names(&loaded), vec!["app.Base", "app.Cat", "app.Dog"]);
}

// ============================================================================
// WARM CACHE (cold start against a populated cache)
// ============================================================================

#[test]
fn test_warm_cache_cold_start_compiles_nothing() {
    let h = Harness::new();
    h.write("app.A", "class A\nuses app.B\npublic run()");
    h.write("app.B", "class B\nconst LIMIT = 10");

    {
        let ctx = h.context();
        ctx.load("app.A").unwrap();
        ctx.load("app.B").unwrap();
    }
    assert_eq!(h.compiler.compile_count(), 2);
    h.compiler.reset();

    let ctx = h.context();
    let a = ctx.load("app.A").unwrap();
    ctx.load("app.B").unwrap();

    assert_eq!(h.compiler.compile_count(), 0);
    assert!(a.bytecode().starts_with(b"ENH:"));
    assert_eq!(ctx.cache().stats().hits, 2);
}

#[test]
fn test_cold_start_after_edit_recompiles_only_the_edit() {
    let h = Harness::new();
    h.write("app.A", "class A");
    h.write("app.B", "class B");
    {
        let ctx = h.context();
        ctx.loader().load_all().unwrap();
    }
    h.compiler.reset();

    h.write("app.B", "class B\n# edited while stopped");
    let ctx = h.context();
    ctx.loader().load_all().unwrap();

    assert_eq!(h.compiler.compiled(), vec!["app.B"]);
}

// ============================================================================
// QUERIES
// ============================================================================

#[test]
fn test_by_assignable_type_excludes_the_type_itself() {
    let h = Harness::new();
    h.write("app.Base", BASE);
    h.write("app.Dog", DOG);
    h.write("app.Cat", CAT);
    h.write("app.Rock", "class Rock");
    let ctx = h.context();

    let found = ctx.loader().by_assignable_type("app.Base").unwrap();
    assert_eq!(names(&found), vec!["app.Cat", "app.Dog"]);
}

#[test]
fn test_by_annotation() {
    let h = Harness::new();
    h.write("app.Base", BASE);
    h.write("app.Dog", DOG);
    h.write("app.Rock", "class Rock\n@Mineral");
    let ctx = h.context();

    let pets = ctx.loader().by_annotation("Pet").unwrap();
    assert_eq!(names(&pets), vec!["app.Dog"]);
    assert!(ctx.loader().by_annotation("Unknown").unwrap().is_empty());
}

#[test]
fn test_queries_are_memoized_until_generation_advances() {
    let h = Harness::new();
    h.write("app.Base", BASE);
    h.write("app.Dog", DOG);
    let ctx = h.context();

    let first = ctx.loader().by_assignable_type("app.Base").unwrap();
    let second = ctx.loader().by_assignable_type("app.Base").unwrap();
    assert!(Arc::ptr_eq(&first[0], &second[0]));

    // a hot swap advances the generation; the memo is rebuilt, identities kept
    let before = ctx.generation();
    h.write("app.Dog", &format!("{}\n# tweak", DOG));
    ctx.before_request().unwrap();
    assert!(ctx.generation() > before);

    let third = ctx.loader().by_assignable_type("app.Base").unwrap();
    assert!(Arc::ptr_eq(&first[0], &third[0]));
    assert_eq!(third[0].redefinition_count(), 1);
}

// ============================================================================
// RESOURCES
// ============================================================================

struct PackagedResources;

impl ResourceProvider for PackagedResources {
    fn find_resource(&self, name: &str) -> Option<PathBuf> {
        Some(Path::new("/packaged").join(name))
    }
}

#[test]
fn test_resource_prefers_live_roots() {
    let h = Harness::new();
    h.fs.write_file("/app/src/templates/index.html", "<html/>");
    let adapters = h.adapters().with_resources(Arc::new(PackagedResources));
    let ctx = ReloadContext::new(h.config(), adapters).unwrap();

    assert_eq!(
        ctx.resource("templates/index.html"),
        Some(PathBuf::from("/app/src/templates/index.html"))
    );
    assert_eq!(
        ctx.resource("templates/other.html"),
        Some(PathBuf::from("/packaged/templates/other.html"))
    );
}

#[test]
fn test_resource_without_provider() {
    let h = Harness::new();
    let ctx = h.context();

    assert_eq!(ctx.resource("missing.txt"), None);
    assert_eq!(ctx.resource("../outside.txt"), None);
}
