mod common;

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{float, float_catalog, sgemm, Harness, Layout, ARCH};
use gemm_rs::catalog::format::{OverrideFile, OverrideRecord};
use gemm_rs::problem::Operation;
use gemm_rs::{DispatchOutcome, Handle, InitError, SelectionMode, Status};
use gemm_rs_backend_ref::fixtures::{code_object_name, write_overrides};
use gemm_rs_backend_ref::{SimulatedDevice, SimulatedPlatform};

#[test]
fn concurrent_first_resolves_load_the_catalog_once() {
    let h = Harness::new(
        &float_catalog(4),
        Layout::Eager,
        SimulatedPlatform::single(ARCH).with_init_delay(Duration::from_millis(25)),
    );

    let contexts: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| h.registry.resolve(0).expect("resolve device 0")))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("resolver thread"))
            .collect()
    });

    let first = &contexts[0];
    for context in &contexts[1..] {
        assert!(Arc::ptr_eq(first, context));
        assert!(Arc::ptr_eq(first.catalog(), context.catalog()));
    }
    let stats = h.registry.stats();
    assert_eq!(stats.catalog_loads, 1);
    assert_eq!(stats.devices_initialized, 1);
    assert_eq!(h.platform.property_queries(), 1);
    assert_eq!(h.platform.launchers_created(), 1);
}

#[test]
fn devices_of_one_architecture_share_a_catalog() {
    let platform = SimulatedPlatform::new(vec![
        SimulatedDevice::new("gfx90a:xnack-", 104),
        SimulatedDevice::new("gfx90a:xnack-", 104),
    ]);
    let h = Harness::new(&float_catalog(2), Layout::Eager, platform);

    let zero = h.registry.resolve(0).expect("device 0");
    let one = h.registry.resolve(1).expect("device 1");
    assert!(!Arc::ptr_eq(&zero, &one));
    assert!(Arc::ptr_eq(zero.catalog(), one.catalog()));
    assert_eq!(h.registry.stats().catalog_loads, 1);
    assert_eq!(h.registry.device_count().expect("device count"), 2);
}

#[test]
fn a_failing_device_does_not_affect_its_neighbour() {
    let platform = SimulatedPlatform::new(vec![
        SimulatedDevice::new(ARCH, 104),
        SimulatedDevice::new("gfx942", 304),
    ])
    .with_init_delay(Duration::from_millis(10));
    let h = Harness::new(&float_catalog(2), Layout::Eager, platform);

    let (zero, one) = thread::scope(|scope| {
        let zero = scope.spawn(|| {
            let mut handle = Handle::new(0);
            h.engine
                .run(&sgemm(64, 64, 64), &mut handle, SelectionMode::BestFit)
        });
        let one = scope.spawn(|| {
            let mut handle = Handle::new(1);
            h.engine
                .run(&sgemm(64, 64, 64), &mut handle, SelectionMode::BestFit)
        });
        (
            zero.join().expect("device 0 thread"),
            one.join().expect("device 1 thread"),
        )
    });

    assert!(matches!(zero, Ok(DispatchOutcome::Launched { .. })));
    let err = one.expect_err("no gfx942 catalog");
    assert_eq!(err.status(), Status::InternalError);

    // The failure is cached rather than retried.
    let queries = h.platform.property_queries();
    match h.registry.resolve(1) {
        Err(InitError::Catalog { arch, .. }) => assert_eq!(arch, "gfx942"),
        other => panic!("unexpected resolution: {other:?}"),
    }
    assert_eq!(h.platform.property_queries(), queries);
    assert!(h.registry.resolve(0).is_ok());
}

#[test]
fn missing_catalog_is_returned_under_the_report_policy() {
    let h = Harness::new(
        &float_catalog(1),
        Layout::Empty,
        SimulatedPlatform::single(ARCH),
    );
    let err = h.registry.resolve(0).expect_err("no catalog on disk");
    assert!(matches!(err, InitError::Catalog { .. }));
    assert!(!h.registry.is_initialized());
}

#[test]
fn enumeration_and_range_failures_are_reported() {
    let h = Harness::new(
        &float_catalog(1),
        Layout::Eager,
        SimulatedPlatform::single(ARCH).with_failing_enumeration(),
    );
    assert!(matches!(
        h.registry.resolve(0),
        Err(InitError::DeviceQuery(_))
    ));

    let h = Harness::new(&float_catalog(1), Layout::Eager, SimulatedPlatform::single(ARCH));
    assert!(matches!(
        h.registry.resolve(3),
        Err(InitError::DeviceOutOfRange { device: 3, count: 1 })
    ));
}

#[test]
fn launcher_failures_stay_on_their_device() {
    let platform = SimulatedPlatform::new(vec![
        SimulatedDevice::new(ARCH, 104),
        SimulatedDevice::new(ARCH, 104),
    ])
    .with_failing_launcher(0);
    let h = Harness::new(&float_catalog(1), Layout::Eager, platform);
    assert!(matches!(
        h.registry.resolve(0),
        Err(InitError::Launcher { device: 0, .. })
    ));
    assert!(h.registry.resolve(1).is_ok());
}

#[test]
fn eager_catalogs_register_matching_binaries() {
    let platform = SimulatedPlatform::new(vec![SimulatedDevice::new("gfx90a:xnack-", 104)]);
    let catalog = float_catalog(2).general(float(), Operation::Transpose, Operation::None, 1);
    let h = Harness::new(&catalog, Layout::Eager, platform);
    for name in [
        "Extra_gfx90a-xnack+.co",
        "Extra_gfx90a-xnack-.co",
        "Experimental_gfx90a.co",
        "Kernels_gfx908.co",
    ] {
        fs::write(h.dir.path().join(name), b"").expect("write binary");
    }

    let context = h.registry.resolve(0).expect("device 0");
    // Two catalog binaries plus the matching xnack- extra.
    assert_eq!(h.registry.stats().code_objects_registered, 3);
    assert_eq!(context.launcher().loaded_code_objects(), 3);
    assert_eq!(h.platform.log().lazy_initializations(), 0);
}

/// Replaces the generic NN float binary with one build per xnack mode.
fn ship_only_xnack_builds(h: &Harness) -> String {
    let name = code_object_name(ARCH, float(), Operation::None, Operation::None);
    fs::remove_file(h.dir.path().join(format!("{name}.co"))).expect("remove generic binary");
    for tag in ["xnack-", "xnack+"] {
        fs::write(h.dir.path().join(format!("{name}-{tag}.co")), b"").expect("write binary");
    }
    name
}

#[test]
fn xnack_specific_binaries_serve_their_catalog_name() {
    for layout in [Layout::Eager, Layout::Lazy] {
        let platform = SimulatedPlatform::new(vec![SimulatedDevice::new("gfx90a:xnack-", 104)]);
        let h = Harness::new(&float_catalog(2), layout, platform);
        let name = ship_only_xnack_builds(&h);

        let mut handle = Handle::new(0);
        let outcome = h
            .engine
            .run(&sgemm(64, 64, 64), &mut handle, SelectionMode::BestFit)
            .unwrap_or_else(|err| panic!("{layout:?} dispatch failed: {err}"));
        assert!(matches!(outcome, DispatchOutcome::Launched { .. }));

        let launch = h.platform.log().last_launch().expect("recorded launch");
        assert_eq!(launch.kernels[0].code_object, name);
        let loaded = h.platform.log().code_objects();
        assert!(loaded
            .iter()
            .any(|path| path.ends_with(format!("{name}-xnack-.co"))));
        assert!(!loaded
            .iter()
            .any(|path| path.to_string_lossy().contains("xnack+")));
    }
}

#[test]
fn lazy_catalogs_defer_binaries_until_warm_up() {
    let catalog = float_catalog(2).general(float(), Operation::None, Operation::Transpose, 2);

    let h = Harness::new(&catalog, Layout::Lazy, SimulatedPlatform::single(ARCH));
    let context = h.registry.resolve(0).expect("lazy device");
    assert_eq!(h.registry.stats().code_objects_registered, 0);
    assert_eq!(h.platform.log().lazy_initializations(), 1);
    assert!(context.catalog().solution_by_index(3).is_none());

    let h = Harness::new(&catalog, Layout::Lazy, SimulatedPlatform::single(ARCH));
    let context = h.registry.warm_up(0).expect("warm up");
    assert_eq!(h.registry.stats().code_objects_registered, 2);
    assert_eq!(h.platform.log().lazy_initializations(), 0);
    assert!(context.catalog().solution_by_index(3).is_some());

    let again = h.registry.warm_up(0).expect("second warm up");
    assert!(Arc::ptr_eq(&context, &again));
    assert_eq!(h.registry.stats().catalog_loads, 1);
}

#[test]
fn eager_kernel_load_switch_overrides_lazy_catalogs() {
    let h = Harness::with_config(
        &float_catalog(2),
        Layout::Lazy,
        SimulatedPlatform::single(ARCH),
        |config| config.with_eager_kernel_load(true).with_background_load(false),
    );
    let context = h.registry.resolve(0).expect("device 0");
    assert_eq!(h.registry.stats().code_objects_registered, 1);
    assert!(context.catalog().solution_by_index(1).is_some());
}

#[test]
fn override_file_pins_a_problem_to_a_solution() {
    let dir = tempfile::tempdir().expect("override dir");
    let overrides = dir.path().join("overrides.json");
    write_overrides(
        &overrides,
        &OverrideFile {
            overrides: vec![OverrideRecord {
                types: float(),
                trans_a: Operation::None,
                trans_b: Operation::None,
                m: 128,
                n: 128,
                k: 128,
                batch: 1,
                solution: 2,
            }],
        },
    )
    .expect("write overrides");

    let h = Harness::with_config(
        &float_catalog(5),
        Layout::Eager,
        SimulatedPlatform::single(ARCH),
        |config| config.with_override_path(&overrides),
    );
    let mut handle = Handle::new(0);
    let pinned = h
        .engine
        .run(&sgemm(128, 128, 128), &mut handle, SelectionMode::BestFit)
        .expect("pinned dispatch");
    assert_eq!(pinned.solution(), Some(2));

    let other = h
        .engine
        .run(&sgemm(256, 128, 128), &mut handle, SelectionMode::BestFit)
        .expect("unpinned dispatch");
    assert_eq!(other.solution(), Some(5));
}

#[test]
fn unreadable_override_file_only_warns() {
    let h = Harness::with_config(
        &float_catalog(2),
        Layout::Eager,
        SimulatedPlatform::single(ARCH),
        |config| config.with_override_path("/nonexistent/overrides.json"),
    );
    let mut handle = Handle::new(0);
    let outcome = h
        .engine
        .run(&sgemm(64, 64, 64), &mut handle, SelectionMode::BestFit)
        .expect("dispatch still works");
    assert_eq!(outcome.solution(), Some(2));
}
