use anyhow::{Context as _, anyhow};
use aya_build::cargo_metadata;
use aya_build::cargo_metadata::Package;

fn main() -> anyhow::Result<()> {
    let cargo_metadata::Metadata { packages, .. } = cargo_metadata::MetadataCommand::new()
        .no_deps()
        .exec()
        .context("MetadataCommand::exec")?;

    let ebpf_package: Package = packages
        .iter()
        .find(|Package { name, .. }| name == "rlimit-watch-ebpf")
        .ok_or_else(|| anyhow!("rlimit-watch-ebpf package not found"))?
        .clone();

    aya_build::build_ebpf([ebpf_package])
}
