mod common;

use std::sync::Arc;

use common::{float, float_catalog, sgemm, Harness, Layout, ARCH};
use gemm_rs::catalog::format::{SizeRange, WorkspaceModel};
use gemm_rs::device::{EventHandle, StreamHandle, TimingEvents};
use gemm_rs::problem::{
    ArithmeticUnit, ContractionArgs, DataType, GemmFlags, Operation, TypeSignature,
};
use gemm_rs::{AtomicsMode, DispatchError, DispatchOutcome, Handle, SelectionMode, Status};
use gemm_rs_backend_ref::fixtures::{general_solution, CatalogBuilder};
use gemm_rs_backend_ref::{ArenaWorkspace, SimulatedPlatform};

fn harness(catalog: &CatalogBuilder, layout: Layout) -> Harness {
    Harness::new(catalog, layout, SimulatedPlatform::single(ARCH))
}

#[test]
fn k_zero_problems_are_served_by_general_kernels() {
    let h = harness(&float_catalog(4), Layout::Eager);
    let mut handle = Handle::new(0);
    let outcome = h
        .engine
        .run(&sgemm(64, 64, 0), &mut handle, SelectionMode::BestFit)
        .expect("dispatch");
    assert!(matches!(outcome, DispatchOutcome::Launched { .. }));
    assert_eq!(h.launches(), 1);
}

#[test]
fn best_fit_picks_the_fastest_eligible_solution() {
    let h = harness(&float_catalog(10), Layout::Eager);
    let mut handle = Handle::new(0);
    let outcome = h
        .engine
        .run(&sgemm(128, 128, 128), &mut handle, SelectionMode::BestFit)
        .expect("dispatch");
    assert_eq!(
        outcome,
        DispatchOutcome::Launched {
            solution: 10,
            workspace_bytes: 0
        }
    );
    let record = h.platform.log().last_launch().expect("one launch");
    assert_eq!(record.kernels.len(), 1);
    assert_eq!(record.kernels[0].kernel_name, "Cijk_NN_sss_MT64x64_SN9");
}

#[test]
fn unknown_explicit_index_is_invalid_after_enumeration() {
    let h = harness(&float_catalog(10), Layout::Eager);
    let mut handle = Handle::new(0);
    let err = h
        .engine
        .run(
            &sgemm(128, 128, 128),
            &mut handle,
            SelectionMode::SolutionIndex(999_999),
        )
        .expect_err("index out of range");
    assert!(matches!(err, DispatchError::UnresolvedIndex(999_999)));
    assert_eq!(err.status(), Status::InvalidValue);
    assert_eq!(h.launches(), 0);
}

#[test]
fn non_positive_indices_are_rejected_before_any_work() {
    let h = harness(&float_catalog(2), Layout::Eager);
    let mut handle = Handle::new(0);
    for index in [0, -1, i32::MIN] {
        let err = h
            .engine
            .run(
                &sgemm(64, 64, 64),
                &mut handle,
                SelectionMode::SolutionIndex(index),
            )
            .expect_err("non-positive index");
        assert_eq!(err.status(), Status::InvalidValue);
    }
    assert_eq!(h.registry.stats().devices_initialized, 0);
    assert_eq!(h.platform.property_queries(), 0);
}

#[test]
fn explicit_index_in_an_unloaded_lazy_group_resolves_after_enumeration() {
    let catalog = float_catalog(3).general(float(), Operation::Transpose, Operation::None, 3);
    let h = harness(&catalog, Layout::Lazy);
    let mut handle = Handle::new(0);

    let outcome = h
        .engine
        .run(
            &sgemm(64, 64, 64),
            &mut handle,
            SelectionMode::SolutionIndex(2),
        )
        .expect("index resolves once the group is loaded");
    assert_eq!(outcome.solution(), Some(2));

    let context = h.registry.resolve(0).expect("context");
    assert!(context.catalog().solution_by_index(1).is_some());
    // The transposed group was never searched.
    assert!(context.catalog().solution_by_index(4).is_none());
}

#[test]
fn workspace_is_rounded_to_granularity_for_queries_and_launches() {
    let mut split = general_solution(0, ARCH, float(), Operation::None, Operation::None, 2_000.0);
    split.workspace = WorkspaceModel {
        global_split_u: 4,
        fixed_bytes: 10,
    };
    let h = harness(&CatalogBuilder::new(ARCH).push(split), Layout::Eager);
    let raw = 100 * 60 * 4 * 4 + 10;

    let mut handle = Handle::new(0);
    handle.start_memory_size_query();
    let outcome = h
        .engine
        .run(&sgemm(100, 60, 32), &mut handle, SelectionMode::BestFit)
        .expect("size query");
    let DispatchOutcome::WorkspaceQueried { bytes } = outcome else {
        panic!("expected a workspace query, got {outcome:?}");
    };
    assert_eq!(bytes % 256, 0);
    assert!(bytes >= raw);
    assert_eq!(bytes, 96_256);
    assert_eq!(handle.stop_memory_size_query(), Some(bytes));
    assert_eq!(h.launches(), 0);

    let arena = Arc::new(ArenaWorkspace::new(1 << 20));
    let mut handle = Handle::new(0).with_workspace(arena.clone());
    let outcome = h
        .engine
        .run(&sgemm(100, 60, 32), &mut handle, SelectionMode::BestFit)
        .expect("launch");
    assert_eq!(
        outcome,
        DispatchOutcome::Launched {
            solution: 1,
            workspace_bytes: bytes
        }
    );
    assert_eq!(arena.requests(), vec![bytes]);
    assert_eq!(arena.released(), 1);
    let record = h.platform.log().last_launch().expect("launch recorded");
    assert_eq!(record.kernels.len(), 2);
    assert!(record.kernels[1].kernel_name.ends_with("_PostGSU4"));
}

#[test]
fn unroundable_workspace_requirements_are_never_reported() {
    let mut huge = general_solution(0, ARCH, float(), Operation::None, Operation::None, 5_000.0);
    huge.workspace.fixed_bytes = usize::MAX - 10;
    let modest = general_solution(1, ARCH, float(), Operation::None, Operation::None, 1_000.0);
    let h = harness(&CatalogBuilder::new(ARCH).push(huge).push(modest), Layout::Eager);

    let mut handle = Handle::new(0);
    handle.start_memory_size_query();
    let outcome = h
        .engine
        .run(&sgemm(64, 64, 64), &mut handle, SelectionMode::BestFit)
        .expect("size query");
    assert_eq!(outcome, DispatchOutcome::WorkspaceQueried { bytes: 0 });
    assert_eq!(outcome.solution(), None);

    let err = h
        .engine
        .run(&sgemm(64, 64, 64), &mut handle, SelectionMode::SolutionIndex(1))
        .expect_err("explicit index with unroundable workspace");
    assert!(matches!(err, DispatchError::Declined { index: 1, .. }), "{err:?}");
    assert_eq!(err.status(), Status::InvalidValue);
    assert_eq!(h.launches(), 0);
}

#[test]
fn solutions_needing_more_workspace_than_available_are_skipped() {
    let mut split = general_solution(0, ARCH, float(), Operation::None, Operation::None, 2_000.0);
    split.workspace = WorkspaceModel {
        global_split_u: 4,
        fixed_bytes: 0,
    };
    let h = harness(&CatalogBuilder::new(ARCH).push(split), Layout::Eager);
    let mut handle = Handle::new(0).with_workspace(Arc::new(ArenaWorkspace::new(1024)));
    let err = h
        .engine
        .run(&sgemm(100, 60, 32), &mut handle, SelectionMode::BestFit)
        .expect_err("workspace limit excludes the only solution");
    assert_eq!(err.status(), Status::NotImplemented);
}

#[test]
fn fitness_queries_never_launch() {
    let h = harness(&float_catalog(10), Layout::Eager);
    let mut handle = Handle::new(0);
    handle.begin_fitness_query();
    let outcome = h
        .engine
        .run(&sgemm(128, 128, 128), &mut handle, SelectionMode::BestFit)
        .expect("fitness query");
    let DispatchOutcome::FitnessQueried { solution, fitness } = outcome else {
        panic!("expected a fitness query, got {outcome:?}");
    };
    assert_eq!(solution, 10);
    assert!(fitness > 0.0);
    assert_eq!(handle.end_fitness_query(), Some(fitness));
    assert_eq!(h.launches(), 0);

    handle.begin_fitness_query();
    let mut transposed = sgemm(128, 128, 128);
    transposed.trans_a = Operation::Transpose;
    let err = h
        .engine
        .run(&transposed, &mut handle, SelectionMode::BestFit)
        .expect_err("nothing eligible");
    assert_eq!(err.status(), Status::NotImplemented);
    assert_eq!(handle.end_fitness_query(), None);
    assert_eq!(h.launches(), 0);
}

#[test]
fn check_solution_index_validates_without_launching() {
    let h = harness(&float_catalog(3), Layout::Eager);
    let mut handle = Handle::new(0);
    let args = sgemm(64, 64, 64).with_flags(GemmFlags {
        check_solution_index: true,
        ..GemmFlags::default()
    });
    let outcome = h
        .engine
        .run(&args, &mut handle, SelectionMode::SolutionIndex(2))
        .expect("check");
    assert_eq!(outcome, DispatchOutcome::Checked { solution: 2 });
    assert_eq!(h.launches(), 0);
}

#[test]
fn disallowing_atomics_restricts_selection_to_deterministic_solutions() {
    let mut deterministic =
        general_solution(1, ARCH, float(), Operation::None, Operation::None, 500.0);
    deterministic.predicates.deterministic = true;
    let catalog = CatalogBuilder::new(ARCH)
        .push(general_solution(0, ARCH, float(), Operation::None, Operation::None, 900.0))
        .push(deterministic)
        .push(general_solution(2, ARCH, float(), Operation::None, Operation::None, 1_000.0));
    let h = harness(&catalog, Layout::Eager);

    let mut handle = Handle::new(0);
    let outcome = h
        .engine
        .run(&sgemm(256, 256, 256), &mut handle, SelectionMode::BestFit)
        .expect("dispatch");
    assert_eq!(outcome.solution(), Some(3));

    let mut handle = Handle::new(0).with_atomics_mode(AtomicsMode::NotAllowed);
    let outcome = h
        .engine
        .run(&sgemm(256, 256, 256), &mut handle, SelectionMode::BestFit)
        .expect("deterministic dispatch");
    assert_eq!(outcome.solution(), Some(2));
}

#[test]
fn solution_that_declines_the_problem_is_invalid_value() {
    let mut small = general_solution(1, ARCH, float(), Operation::None, Operation::None, 5_000.0);
    small.predicates.m = SizeRange {
        min: 0,
        max: Some(32),
    };
    let catalog = float_catalog(1).push(small);
    let h = harness(&catalog, Layout::Eager);
    let mut handle = Handle::new(0);

    let err = h
        .engine
        .run(
            &sgemm(64, 64, 64),
            &mut handle,
            SelectionMode::SolutionIndex(2),
        )
        .expect_err("solution 2 only handles M <= 32");
    assert!(matches!(err, DispatchError::Declined { index: 2, .. }));
    assert_eq!(err.status(), Status::InvalidValue);

    let outcome = h
        .engine
        .run(&sgemm(64, 64, 64), &mut handle, SelectionMode::BestFit)
        .expect("best fit skips the restricted solution");
    assert_eq!(outcome.solution(), Some(1));
}

#[test]
fn missing_solutions_are_reported_once() {
    let h = harness(&float_catalog(2), Layout::Eager);
    let mut handle = Handle::new(0);
    let mut args = sgemm(64, 64, 64);
    args.trans_b = Operation::Transpose;
    for _ in 0..3 {
        let err = h
            .engine
            .run(&args, &mut handle, SelectionMode::BestFit)
            .expect_err("no NT solutions");
        assert!(matches!(err, DispatchError::NoSolution { .. }));
        assert_eq!(err.status(), Status::NotImplemented);
    }
    assert_eq!(h.registry.diagnostics().emitted(), 1);
}

#[test]
fn unsupported_type_combinations_are_not_implemented() {
    let h = harness(&float_catalog(1), Layout::Eager);
    let mut handle = Handle::new(0);
    let mut args = sgemm(16, 16, 16);
    args.types = TypeSignature::new(DataType::Float, DataType::Half, DataType::Double);
    let err = h
        .engine
        .run(&args, &mut handle, SelectionMode::BestFit)
        .expect_err("unsupported signature");
    assert_eq!(err.status(), Status::NotImplemented);
}

#[test]
fn launcher_panics_become_internal_errors() {
    let h = Harness::new(
        &float_catalog(1),
        Layout::Eager,
        SimulatedPlatform::single(ARCH).with_panicking_launches(0),
    );
    let mut handle = Handle::new(0);
    let err = h
        .engine
        .run(&sgemm(64, 64, 64), &mut handle, SelectionMode::BestFit)
        .expect_err("launcher panics");
    match &err {
        DispatchError::Internal(message) => assert!(message.contains("simulated launcher fault")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.status(), Status::InternalError);
}

#[test]
fn launches_carry_the_handle_stream_and_events() {
    let h = harness(&float_catalog(1), Layout::Eager);
    let mut handle = Handle::new(0)
        .with_stream(StreamHandle(42))
        .with_timing(TimingEvents {
            start: EventHandle(1),
            stop: EventHandle(2),
        });
    h.engine
        .run(&sgemm(64, 64, 64), &mut handle, SelectionMode::BestFit)
        .expect("dispatch");
    let record = h.platform.log().last_launch().expect("launch recorded");
    assert_eq!(record.stream, StreamHandle(42));
    assert!(record.timed);
    assert_eq!(record.device, 0);
}

#[test]
fn lazy_dispatch_loads_only_the_binary_it_needs() {
    let catalog = float_catalog(2).general(float(), Operation::None, Operation::Transpose, 2);
    let h = harness(&catalog, Layout::Lazy);
    let mut handle = Handle::new(0);
    h.engine
        .run(&sgemm(64, 64, 64), &mut handle, SelectionMode::BestFit)
        .expect("dispatch");
    let loaded = h.platform.log().code_objects();
    assert_eq!(loaded.len(), 1);
    assert!(loaded[0].to_string_lossy().contains("sss_NN"));
    assert_eq!(h.registry.stats().code_objects_registered, 0);
}

#[test]
fn double_precision_can_be_forced_onto_valu_kernels() {
    let double = TypeSignature::uniform(DataType::Double);
    let mut valu = general_solution(0, ARCH, double, Operation::None, Operation::None, 100.0);
    valu.predicates.arithmetic_unit = ArithmeticUnit::Valu;
    let mut mfma = general_solution(1, ARCH, double, Operation::None, Operation::None, 900.0);
    mfma.predicates.arithmetic_unit = ArithmeticUnit::Mfma;
    let catalog = CatalogBuilder::new(ARCH).push(valu).push(mfma);

    let args = ContractionArgs::gemm(double, Operation::None, Operation::None, 64, 64, 64)
        .expect("double gemm");
    let h = Harness::with_config(
        &catalog,
        Layout::Eager,
        SimulatedPlatform::single(ARCH),
        |mut config| {
            config.force_valu_for_dgemm = true;
            config
        },
    );
    let mut handle = Handle::new(0);
    handle.begin_fitness_query();
    let outcome = h
        .engine
        .run(&args, &mut handle, SelectionMode::BestFit)
        .expect("valu solution");
    assert_eq!(outcome.solution(), Some(1));
}
