use std::env;

fn main() {
    println!("cargo:rerun-if-changed=src/arch/entry.S");
    println!("cargo:rerun-if-changed=src/arch/boot.S");
    println!("cargo:rerun-if-changed=linker.ld");

    // The entry stubs are 32-bit x86 assembly; skip them when building for
    // any other target (the host test workspace never links them).
    let target_arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    if target_arch != "x86" {
        return;
    }

    let manifest_dir = env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR is set by cargo");
    println!("cargo:rustc-link-arg=-T{}/linker.ld", manifest_dir);

    cc::Build::new()
        .file("src/arch/boot.S")
        .file("src/arch/entry.S")
        .flag("-m32")
        .flag_if_supported("-fno-asynchronous-unwind-tables")
        .compile("entry");
}
