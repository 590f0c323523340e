use hotreload_core::PassReport;
use hotreload_test_helpers::fixtures::Harness;
use indoc::indoc;
use std::thread;
use std::time::Duration;

const FOO: &str = indoc! {"
    class Foo
    public greet()
    return 1
"};

const FOO_NEW_BODY: &str = indoc! {"
    class Foo
    public greet()
    return 2
"};

// ============================================================================
// PASS SERIALIZATION
// ============================================================================

#[test]
fn test_concurrent_requests_run_a_single_pass() {
    let h = Harness::new();
    h.write("app.Foo", FOO);
    let ctx = h.context();
    let foo = ctx.load("app.Foo").unwrap();

    h.write("app.Foo", FOO_NEW_BODY);
    let compiles = h.compiler.compile_count();

    let reports: Vec<PassReport> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| ctx.before_request().unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(h.compiler.compile_count(), compiles + 1);
    assert_eq!(reports.iter().filter(|r| !r.is_unchanged()).count(), 1);
    assert_eq!(foo.redefinition_count(), 1);
    assert_eq!(h.hot_swap.batches().len(), 1);
}

#[test]
fn test_load_waits_for_running_pass() {
    let h = Harness::new();
    h.write("app.Foo", FOO);
    let ctx = h.context();
    let pass_lock = ctx.detector().pass_lock();

    thread::scope(|s| {
        let pass = pass_lock.write();
        let loader = s.spawn(|| ctx.load("app.Foo").map(|class| class.name().to_string()));

        thread::sleep(Duration::from_millis(50));
        assert!(!loader.is_finished(), "load must block while a pass runs");

        drop(pass);
        assert_eq!(loader.join().unwrap().unwrap(), "app.Foo");
    });
}
