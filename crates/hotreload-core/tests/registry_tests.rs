use hotreload_core::fs::{MockFileSystem, SourceLocator};
use hotreload_core::registry::SourceRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

fn registry(fs: Arc<MockFileSystem>) -> Arc<SourceRegistry> {
    let locator = SourceLocator::new(fs, vec![PathBuf::from("/src")], "src");
    Arc::new(SourceRegistry::new(Arc::new(locator)))
}

#[test]
fn test_concurrent_get_or_create_yields_one_unit() {
    let fs = Arc::new(MockFileSystem::new());
    fs.write_file("/src/app/Foo.src", "class Foo");
    let registry = registry(fs);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.get_or_create("app.Foo").unwrap())
        })
        .collect();
    let units: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(units.iter().all(|u| Arc::ptr_eq(u, &units[0])));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_first_root_wins() {
    let fs = Arc::new(MockFileSystem::new());
    fs.write_file("/override/app/Foo.src", "class Foo # patched");
    fs.write_file("/src/app/Foo.src", "class Foo");
    let locator = SourceLocator::new(
        fs,
        vec![PathBuf::from("/override"), PathBuf::from("/src")],
        "src",
    );
    let registry = SourceRegistry::new(Arc::new(locator));

    let unit = registry.get_or_create("app.Foo").unwrap();
    assert_eq!(unit.path(), PathBuf::from("/override/app/Foo.src"));
    assert_eq!(&*registry.load_source(&unit).unwrap(), "class Foo # patched");
}

#[test]
fn test_units_snapshot_is_sorted() {
    let fs = Arc::new(MockFileSystem::new());
    fs.write_file("/src/b/Two.src", "");
    fs.write_file("/src/a/One.src", "");
    let registry = registry(fs);
    registry.get_or_create("b.Two").unwrap();
    registry.get_or_create("a.One").unwrap();

    let names: Vec<String> = registry
        .units()
        .iter()
        .map(|u| u.name().to_string())
        .collect();
    assert_eq!(names, vec!["a.One", "b.Two"]);
}

#[test]
fn test_content_hash_is_cached_until_refresh() {
    let fs = Arc::new(MockFileSystem::new());
    fs.write_file("/src/Foo.src", "v1");
    let registry = registry(Arc::clone(&fs));
    let unit = registry.get_or_create("Foo").unwrap();
    registry.load_source(&unit).unwrap();
    let first = unit.content_hash("salt").unwrap();

    fs.write_file("/src/Foo.src", "v2");
    assert_eq!(unit.content_hash("salt"), Some(first), "no reread without refresh");

    registry.refresh(&unit);
    registry.load_source(&unit).unwrap();
    assert_ne!(unit.content_hash("salt"), Some(first));
}
