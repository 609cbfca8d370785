use std::fs;

use gemm_rs::catalog::format::CatalogFile;
use gemm_rs::config::CatalogEncoding;
use gemm_rs::device::{
    KernelArgs, KernelInvocation, KernelLauncher, Platform, StreamHandle, XnackMode,
};
use gemm_rs::handle::WorkspaceProvider;
use gemm_rs::problem::{DataType, Operation, TypeSignature};
use gemm_rs_backend_ref::fixtures::{code_object_name, temp_library, CatalogBuilder};
use gemm_rs_backend_ref::{ArenaWorkspace, SimulatedDevice, SimulatedPlatform};

fn invocation(code_object: &str) -> KernelInvocation {
    KernelInvocation {
        kernel_name: "Cijk_NN_sss_MT64x64_SN0".into(),
        code_object: code_object.into(),
        grid: [1, 1, 1],
        workgroup: [256, 1, 1],
        shared_mem_bytes: 0,
        args: KernelArgs::new(),
    }
}

#[test]
fn simulated_devices_report_target_properties() {
    let platform = SimulatedPlatform::new(vec![
        SimulatedDevice::new("gfx90a:sramecc+:xnack-", 104),
        SimulatedDevice::new("gfx942:xnack+", 304),
    ]);
    assert_eq!(platform.device_count().expect("count"), 2);
    let props = platform.device_properties(1).expect("device 1");
    assert_eq!(props.arch, "gfx942");
    assert_eq!(props.xnack, XnackMode::Enabled);
    assert_eq!(props.compute_units, 304);
    assert!(platform.device_properties(2).is_err());
}

#[test]
fn lazy_launcher_loads_binaries_on_first_launch() {
    let dir = temp_library().expect("tempdir");
    let float = TypeSignature::uniform(DataType::Float);
    CatalogBuilder::new("gfx90a")
        .general(float, Operation::None, Operation::None, 1)
        .write_code_objects(dir.path())
        .expect("write binaries");

    let platform = SimulatedPlatform::single("gfx90a");
    let mut launcher = platform.new_launcher(0).expect("launcher");
    launcher
        .initialize_lazy_loading("gfx90a", XnackMode::Unspecified, dir.path())
        .expect("lazy init");
    assert_eq!(launcher.loaded_code_objects(), 0);

    let present = code_object_name("gfx90a", float, Operation::None, Operation::None);
    launcher
        .launch_kernels(&[invocation(&present)], StreamHandle(7), None)
        .expect("launch");
    launcher
        .launch_kernels(&[invocation(&present)], StreamHandle(7), None)
        .expect("second launch");
    assert_eq!(launcher.loaded_code_objects(), 1);
    assert_eq!(platform.log().code_objects().len(), 1);
    assert_eq!(platform.log().launch_count(), 2);

    let err = launcher
        .launch_kernels(&[invocation("Kernels_missing_gfx90a")], StreamHandle(7), None)
        .expect_err("missing binary");
    assert!(err.to_string().contains("not found"));
}

#[test]
fn eager_launcher_rejects_unregistered_kernels() {
    let platform = SimulatedPlatform::single("gfx90a");
    let launcher = platform.new_launcher(0).expect("launcher");
    assert!(launcher
        .launch_kernels(&[invocation("Kernels_sss_NN_gfx90a")], StreamHandle::default(), None)
        .is_err());
    assert_eq!(platform.log().launch_count(), 0);
}

#[test]
fn mode_specific_builds_register_under_the_generic_name() {
    let dir = temp_library().expect("tempdir");
    let tagged = dir.path().join("Kernels_sss_NN_gfx90a-xnack-.co");
    let generic = dir.path().join("Kernels_sss_NN_gfx90a.co");
    fs::write(&tagged, b"").expect("tagged binary");
    fs::write(&generic, b"").expect("generic binary");

    let platform = SimulatedPlatform::single("gfx90a:xnack-");
    let mut launcher = platform.new_launcher(0).expect("launcher");
    launcher.load_code_object_file(&tagged).expect("register tagged");
    launcher.load_code_object_file(&generic).expect("register generic");
    assert_eq!(launcher.loaded_code_objects(), 1);
    launcher
        .launch_kernels(&[invocation("Kernels_sss_NN_gfx90a")], StreamHandle::default(), None)
        .expect("launch by catalog name");

    let mut lazy = platform.new_launcher(0).expect("lazy launcher");
    lazy.initialize_lazy_loading("gfx90a", XnackMode::Enabled, dir.path())
        .expect("lazy init");
    lazy.launch_kernels(&[invocation("Kernels_sss_NN_gfx90a")], StreamHandle::default(), None)
        .expect("generic build serves xnack+");
    assert_eq!(platform.log().code_objects().last(), Some(&generic));
}

#[test]
fn failing_launcher_is_reported_per_device() {
    let platform = SimulatedPlatform::new(vec![
        SimulatedDevice::new("gfx90a", 104),
        SimulatedDevice::new("gfx90a", 104),
    ])
    .with_failing_launcher(1);
    assert!(platform.new_launcher(0).is_ok());
    assert!(platform.new_launcher(1).is_err());
    assert_eq!(platform.launchers_created(), 1);
}

#[test]
fn lazy_fixture_writes_one_group_per_signature() {
    let dir = temp_library().expect("tempdir");
    let float = TypeSignature::uniform(DataType::Float);
    let manifest = CatalogBuilder::new("gfx90a")
        .with_encoding(CatalogEncoding::Json)
        .general(float, Operation::None, Operation::None, 3)
        .general(float, Operation::Transpose, Operation::None, 2)
        .write_lazy(dir.path())
        .expect("write lazy catalog");

    assert!(manifest.ends_with("GemmLibrary_lazy_gfx90a.json"));
    let loaded = CatalogFile::load(&manifest).expect("load manifest");
    assert_eq!(loaded.placeholders.len(), 2);
    assert!(loaded.solutions.is_empty());

    let group = CatalogFile::load(&dir.path().join("GemmLibrary_gfx90a_sss_TN.json"))
        .expect("load transposed group");
    let indices: Vec<_> = group.solutions.iter().map(|record| record.index).collect();
    assert_eq!(indices, vec![3, 4]);

    let binaries = fs::read_dir(dir.path())
        .expect("list dir")
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "co"))
        .count();
    assert_eq!(binaries, 2);
}

#[test]
fn arena_grants_requests_within_capacity() {
    let arena = ArenaWorkspace::new(4096);
    assert_eq!(arena.available(), 4096);
    let granted = arena.allocate(1024).expect("fits");
    assert_eq!(granted.bytes, 1024);
    assert!(arena.allocate(8192).is_none());
    arena.release(granted);
    assert_eq!(arena.requests(), vec![1024, 8192]);
    assert_eq!(arena.released(), 1);
}
