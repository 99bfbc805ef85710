use which::which;

/// Rebuild the probes when bpf-linker changes, since cargo does not track it.
fn main() {
    match which("bpf-linker") {
        Ok(bpf_linker) => println!("cargo:rerun-if-changed={}", bpf_linker.display()),
        Err(e) => println!("cargo:warning=bpf-linker not found: {}", e),
    }
}
