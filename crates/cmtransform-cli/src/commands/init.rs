//! Initialize a new controller directory

use anyhow::Result;
use cmtransform_core::config::CONFIG_FILE_NAME;
use std::fs;
use std::path::Path;

/// Run the init command
pub async fn run(path: &str, name: Option<&str>) -> Result<()> {
    let project_dir = Path::new(path);

    if !project_dir.exists() {
        fs::create_dir_all(project_dir)?;
    }

    let abs_path = project_dir.canonicalize()?;

    // Derive controller name from directory name if not provided
    let controller_name = match name {
        Some(n) => n.to_string(),
        None => abs_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Could not determine controller name from path"))?,
    };

    if project_dir.join(CONFIG_FILE_NAME).exists() {
        anyhow::bail!(
            "Directory '{}' already contains a {}",
            project_dir.display(),
            CONFIG_FILE_NAME
        );
    }

    tracing::info!("Creating new controller: {}", controller_name);

    fs::create_dir_all(project_dir.join("manifests/configmaps"))?;
    fs::create_dir_all(project_dir.join("manifests/transforms"))?;

    let config = format!(
        r#"# cmtransform controller configuration
name: {controller_name}
default_namespace: default

manifests_dir: manifests
state_dir: state

controller:
  poll_interval_ms: 1000
  max_retries: 5
  retry_backoff_ms: 200
  max_backoff_ms: 10000
"#
    );
    fs::write(project_dir.join(CONFIG_FILE_NAME), config)?;

    let source = r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: app-config
  namespace: default
data:
  user: alice
  region: eu-west-2
"#;
    fs::write(project_dir.join("manifests/configmaps/app-config.yaml"), source)?;

    let transform = r#"# Keeps app-config-encoded in sync with app-config
apiVersion: xlscsde.nhs.uk/v1
kind: ConfigMapTransform
metadata:
  name: app-config-encoded
  namespace: default
spec:
  sourceRef:
    name: app-config
    namespace: default
  targetConfigMap: app-config-encoded
  transforms:
    - key: user
      type: base64
"#;
    fs::write(
        project_dir.join("manifests/transforms/app-config-encoded.yaml"),
        transform,
    )?;

    let gitignore = r#"# Derived ConfigMaps and transform status
state/

# IDE
.idea/
.vscode/
*.swp
"#;
    fs::write(project_dir.join(".gitignore"), gitignore)?;

    tracing::info!(
        "✓ Created controller '{}' at {}",
        controller_name,
        abs_path.display()
    );
    tracing::info!("");
    tracing::info!("Next steps:");
    if path != "." {
        tracing::info!("  cd {}", project_dir.display());
    }
    tracing::info!("  cmtransform validate manifests/transforms/app-config-encoded.yaml");
    tracing::info!("  cmtransform run");

    Ok(())
}
