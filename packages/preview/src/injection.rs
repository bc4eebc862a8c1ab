// ABOUTME: Direct injection of the component picker script into a cloned repository
// ABOUTME: Backs up every modified entry file and records a manifest so rollback can restore it

use crate::error::{InjectionError, InjectionResult};
use crate::types::{AnchorRule, Framework};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use splitlab_sandbox::{BestEffortReport, SandboxError, SandboxManager, WORKSPACE_DIR};
use std::sync::Arc;
use tracing::{debug, info};

/// Manifest recording what an injection changed
pub const INJECTION_MANIFEST: &str = "/workspace/.splitlab-injection.json";

/// Suffix of the sibling file holding a modified file's original content
pub const BACKUP_SUFFIX: &str = ".splitlab-backup";

/// Attribute present on every injected script tag
pub const INJECTION_MARKER: &str = "data-splitlab-picker";

/// Directory created under the framework's static dir for the picker asset
pub const ASSET_DIR_NAME: &str = "splitlab-picker";

/// Picker script served to previews
pub const PICKER_SCRIPT: &str = include_str!("../assets/picker.js");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectionManifest {
    pub framework: Framework,
    pub modified_files: Vec<String>,
    pub asset_dir: String,
    pub injected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum InjectionStatus {
    /// The script tag was inserted into `file`, matched at the `level` framework
    Injected { file: String, level: Framework },
    /// `file` already carries the marker
    AlreadyInjected { file: String },
    /// No candidate along the fallback chain had a usable anchor
    NoEntryPoint,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectionOutcome {
    #[serde(flatten)]
    pub status: InjectionStatus,
    pub asset_path: String,
    pub script_url: String,
}

/// Whether picker injection can work for a session, and whether it is active
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PickerStatus {
    pub supported: bool,
    pub injected: bool,
    pub framework: Framework,
    pub entry_file: Option<String>,
    pub script_url: String,
}

/// Installs and removes the picker inside session sandboxes
pub struct Injector {
    sandbox: Arc<SandboxManager>,
}

impl Injector {
    pub fn new(sandbox: Arc<SandboxManager>) -> Self {
        Self { sandbox }
    }

    /// Copy the picker asset and insert its script tag into the first usable entry file
    pub async fn inject(
        &self,
        session_id: &str,
        repo_dir: &str,
        framework: Framework,
    ) -> InjectionResult<InjectionOutcome> {
        let repo_dir = repo_dir.trim_end_matches('/');
        let strategy = framework.strategy();
        let asset_dir = format!("{}/{}/{}", repo_dir, strategy.static_dir, ASSET_DIR_NAME);
        let asset_path = format!("{}/picker.js", asset_dir);
        let script_url = script_url(framework);

        self.sandbox
            .write_file(session_id, &asset_path, PICKER_SCRIPT.as_bytes())
            .await
            .map_err(|source| InjectionError::AssetInstall {
                path: asset_path.clone(),
                source,
            })?;

        let tag = script_tag(&script_url);
        let mut status = InjectionStatus::NoEntryPoint;

        for level in framework.fallback_chain() {
            let level_strategy = level.strategy();
            let Some((path, original)) = self
                .first_existing(session_id, repo_dir, level_strategy.entry_candidates)
                .await?
            else {
                continue;
            };

            let content = String::from_utf8_lossy(&original);
            if content.contains(INJECTION_MARKER) {
                info!("Picker already injected into {} for session {}", path, session_id);
                status = InjectionStatus::AlreadyInjected { file: path };
                break;
            }

            let Some(updated) = insert_script(&content, level_strategy.anchor, &tag) else {
                debug!("No anchor in {} at level {}, falling back", path, level);
                continue;
            };

            let backup = format!("{}{}", path, BACKUP_SUFFIX);
            self.sandbox
                .write_file(session_id, &backup, &original)
                .await?;
            self.sandbox
                .write_file(session_id, &path, updated.as_bytes())
                .await?;

            info!("Injected picker into {} for session {}", path, session_id);
            status = InjectionStatus::Injected { file: path, level };
            break;
        }

        let modified_files = match &status {
            InjectionStatus::Injected { file, .. } => vec![file.clone()],
            InjectionStatus::NoEntryPoint => Vec::new(),
            InjectionStatus::AlreadyInjected { .. } => {
                return Ok(InjectionOutcome {
                    status,
                    asset_path,
                    script_url,
                });
            }
        };

        let manifest = InjectionManifest {
            framework,
            modified_files,
            asset_dir,
            injected_at: Utc::now(),
        };
        self.sandbox
            .write_file(
                session_id,
                INJECTION_MANIFEST,
                &serde_json::to_vec_pretty(&manifest)?,
            )
            .await?;

        Ok(InjectionOutcome {
            status,
            asset_path,
            script_url,
        })
    }

    /// Restore every file recorded in the manifest and remove the asset and manifest
    ///
    /// Only an unknown session is an error; everything else is reported step by step.
    pub async fn rollback(&self, session_id: &str) -> InjectionResult<BestEffortReport> {
        let mut report = BestEffortReport::new();

        let raw = match self.sandbox.read_file(session_id, INJECTION_MANIFEST).await {
            Ok(raw) => raw,
            Err(SandboxError::FileNotFound(_)) => {
                debug!("No injection manifest for session {}, nothing to restore", session_id);
                return Ok(report);
            }
            Err(e @ SandboxError::SandboxNotFound(_)) => return Err(e.into()),
            Err(e) => {
                report.degraded("read manifest", e);
                return Ok(report);
            }
        };

        let manifest = match serde_json::from_slice::<InjectionManifest>(&raw) {
            Ok(manifest) => manifest,
            Err(e) => {
                report.degraded("parse manifest", e);
                report.record(
                    "remove manifest",
                    self.sandbox
                        .remove_paths(session_id, &[INJECTION_MANIFEST.to_string()])
                        .await,
                );
                return Ok(report);
            }
        };

        for file in &manifest.modified_files {
            let backup = format!("{}{}", file, BACKUP_SUFFIX);
            let original = match self.sandbox.read_file(session_id, &backup).await {
                Ok(original) => original,
                Err(SandboxError::FileNotFound(_)) => {
                    debug!("No backup for {} in session {}, leaving it as is", file, session_id);
                    continue;
                }
                Err(e) => {
                    report.degraded(format!("read backup {}", backup), e);
                    continue;
                }
            };

            let restored = report.record(
                format!("restore {}", file),
                self.sandbox.write_file(session_id, file, &original).await,
            );
            if restored.is_some() {
                report.record(
                    format!("remove backup {}", backup),
                    self.sandbox.remove_paths(session_id, &[backup.clone()]).await,
                );
            }
        }

        if is_removable_asset_dir(&manifest.asset_dir) {
            report.record(
                "remove asset dir",
                self.sandbox
                    .remove_paths(session_id, &[manifest.asset_dir.clone()])
                    .await,
            );
        } else {
            report.degraded(
                "remove asset dir",
                format!("refusing to remove {}", manifest.asset_dir),
            );
        }

        report.record(
            "remove manifest",
            self.sandbox
                .remove_paths(session_id, &[INJECTION_MANIFEST.to_string()])
                .await,
        );

        info!(
            "Rolled back picker injection for session {} ({} files)",
            session_id,
            manifest.modified_files.len()
        );
        Ok(report)
    }

    /// Report picker support without changing anything
    pub async fn status(
        &self,
        session_id: &str,
        repo_dir: &str,
        framework: Framework,
    ) -> InjectionResult<PickerStatus> {
        let repo_dir = repo_dir.trim_end_matches('/');
        let injected = self.sandbox.file_exists(session_id, INJECTION_MANIFEST).await?;

        let mut entry_file = None;
        'levels: for level in framework.fallback_chain() {
            for candidate in level.strategy().entry_candidates {
                let path = format!("{}/{}", repo_dir, candidate);
                if self.sandbox.file_exists(session_id, &path).await? {
                    entry_file = Some(path);
                    break 'levels;
                }
            }
        }

        Ok(PickerStatus {
            supported: entry_file.is_some(),
            injected,
            framework,
            entry_file,
            script_url: script_url(framework),
        })
    }

    async fn first_existing(
        &self,
        session_id: &str,
        repo_dir: &str,
        candidates: &[&str],
    ) -> InjectionResult<Option<(String, Vec<u8>)>> {
        for candidate in candidates {
            let path = format!("{}/{}", repo_dir, candidate);
            match self.sandbox.read_file(session_id, &path).await {
                Ok(content) => return Ok(Some((path, content))),
                Err(SandboxError::FileNotFound(_)) | Err(SandboxError::NotAFile(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }
}

/// URL the preview loads the picker from
pub fn script_url(framework: Framework) -> String {
    format!(
        "{}/{}/picker.js",
        framework.strategy().static_url_prefix,
        ASSET_DIR_NAME
    )
}

pub fn script_tag(src: &str) -> String {
    format!(
        r#"<script src="{}" defer {}="injected"></script>"#,
        src, INJECTION_MARKER
    )
}

/// Insert `tag` after the opening head tag, or inside a new head after the opening html tag
pub fn insert_script(content: &str, rule: AnchorRule, tag: &str) -> Option<String> {
    let (head, html) = match rule {
        AnchorRule::Document => (
            find_open_tag(content, "head", true),
            find_open_tag(content, "html", true),
        ),
        AnchorRule::Jsx => (
            earliest(
                find_open_tag(content, "head", false),
                find_open_tag(content, "Head", false),
            ),
            earliest(
                find_open_tag(content, "html", false),
                find_open_tag(content, "Html", false),
            ),
        ),
    };

    let (at, insertion) = match (head, html) {
        (Some(at), _) => (at, tag.to_string()),
        (None, Some(at)) => (at, format!("<head>{}</head>", tag)),
        (None, None) => return None,
    };

    let mut updated = String::with_capacity(content.len() + insertion.len());
    updated.push_str(&content[..at]);
    updated.push_str(&insertion);
    updated.push_str(&content[at..]);
    Some(updated)
}

/// Byte offset just past the `>` of the first non-self-closing `<name ...>` tag
fn find_open_tag(content: &str, name: &str, ignore_case: bool) -> Option<usize> {
    let haystack = if ignore_case {
        content.to_ascii_lowercase()
    } else {
        content.to_string()
    };
    let needle = format!("<{}", name);

    let mut from = 0;
    while let Some(offset) = haystack[from..].find(&needle) {
        let start = from + offset;
        let after_name = start + needle.len();
        from = after_name;

        let boundary = haystack[after_name..].chars().next();
        if !matches!(boundary, Some(c) if c == '>' || c.is_whitespace()) {
            continue;
        }

        let close = after_name + haystack[after_name..].find('>')?;
        if haystack[..close].ends_with('/') {
            continue;
        }
        return Some(close + 1);
    }
    None
}

fn earliest(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Rollback never deletes outside the workspace
fn is_removable_asset_dir(path: &str) -> bool {
    path.starts_with(&format!("{}/", WORKSPACE_DIR))
        && path.ends_with(ASSET_DIR_NAME)
        && !path.split('/').any(|segment| segment == "..")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TAG: &str = "<script data-splitlab-picker></script>";

    #[test]
    fn test_inserts_after_head_with_attributes() {
        let html = "<!doctype html>\n<HTML lang=\"en\">\n<Head data-x=\"1\">\n<title>x</title>";
        let updated = insert_script(html, AnchorRule::Document, TAG).unwrap();
        assert_eq!(
            updated,
            "<!doctype html>\n<HTML lang=\"en\">\n<Head data-x=\"1\"><script data-splitlab-picker></script>\n<title>x</title>"
        );
    }

    #[test]
    fn test_header_element_is_not_a_head() {
        let html = "<html><body><header>nav</header></body></html>";
        let updated = insert_script(html, AnchorRule::Document, TAG).unwrap();
        assert_eq!(
            updated,
            "<html><head><script data-splitlab-picker></script></head><body><header>nav</header></body></html>"
        );
    }

    #[test]
    fn test_jsx_head_component_and_self_closing() {
        let jsx = "return (<Html><Head /><Head>\n<meta /></Head></Html>)";
        let updated = insert_script(jsx, AnchorRule::Jsx, TAG).unwrap();
        assert_eq!(
            updated,
            "return (<Html><Head /><Head><script data-splitlab-picker></script>\n<meta /></Head></Html>)"
        );
    }

    #[test]
    fn test_jsx_is_case_sensitive_for_lowercase_html() {
        let jsx = "export default function Layout({ children }) {\n  return <html lang=\"en\"><body>{children}</body></html>\n}";
        let updated = insert_script(jsx, AnchorRule::Jsx, TAG).unwrap();
        assert!(updated.contains("<html lang=\"en\"><head><script data-splitlab-picker></script></head><body>"));
    }

    #[test]
    fn test_no_anchor() {
        assert_eq!(
            insert_script("export default () => children", AnchorRule::Jsx, TAG),
            None
        );
    }

    #[test]
    fn test_script_url_follows_static_prefix() {
        assert_eq!(script_url(Framework::Vite), "/splitlab-picker/picker.js");
        assert_eq!(script_url(Framework::Angular), "/assets/splitlab-picker/picker.js");
    }

    #[test]
    fn test_asset_dir_guard() {
        assert!(is_removable_asset_dir("/workspace/repo/public/splitlab-picker"));
        assert!(!is_removable_asset_dir("/"));
        assert!(!is_removable_asset_dir("/workspace/../etc/splitlab-picker"));
    }
}
