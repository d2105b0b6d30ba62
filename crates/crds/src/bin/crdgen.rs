//! Prints the CRD manifests as YAML.

use crds::BareMetalHost;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&BareMetalHost::crd())?);
    Ok(())
}
