use crate::error::DetectionError;
use crate::types::{BuildConfiguration, Framework, PackageManager, FRAMEWORK_SIGNATURES, LOCK_FILES};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use splitlab_sandbox::SandboxManager;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Script names tried, in order, for the dev server
const DEV_SCRIPTS: [&str; 3] = ["dev", "start", "serve"];

static PORT_FLAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"((?:^|\s)(?:--port(?:\s+|=)|-p\s+))(\d{1,5})\b").expect("valid port regex")
});

/// Infers how to install, build and serve a repository cloned into a sandbox
pub struct BuildDetector;

impl BuildDetector {
    /// Detect the build configuration of `repo_dir` inside the session's sandbox
    ///
    /// Detection is advisory: any read or parse failure yields the safe default.
    pub async fn detect(
        sandbox: &SandboxManager,
        session_id: &str,
        repo_dir: &str,
    ) -> BuildConfiguration {
        match Self::try_detect(sandbox, session_id, repo_dir).await {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Build detection failed for session {}, using defaults: {}",
                    session_id, e
                );
                BuildConfiguration::default()
            }
        }
    }

    async fn try_detect(
        sandbox: &SandboxManager,
        session_id: &str,
        repo_dir: &str,
    ) -> Result<BuildConfiguration, DetectionError> {
        let manifest_path = format!("{}/package.json", repo_dir.trim_end_matches('/'));
        let content = sandbox
            .read_text(session_id, &manifest_path)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    DetectionError::MissingManifest(manifest_path.clone())
                } else {
                    DetectionError::Sandbox(e)
                }
            })?;
        let manifest: Value = serde_json::from_str(&content)?;

        let mut package_manager = PackageManager::Npm;
        for (lock_file, manager) in LOCK_FILES {
            let path = format!("{}/{}", repo_dir.trim_end_matches('/'), lock_file);
            if sandbox.file_exists(session_id, &path).await? {
                package_manager = *manager;
                break;
            }
        }

        let config = Self::from_manifest(&manifest, package_manager);
        debug!("Detected build configuration for {}: {:?}", session_id, config);
        Ok(config)
    }

    /// Derive the configuration from a parsed `package.json` and a known package manager
    pub fn from_manifest(manifest: &Value, package_manager: PackageManager) -> BuildConfiguration {
        let framework = Self::detect_framework(manifest);
        let strategy = framework.strategy();
        let scripts = Self::scripts(manifest);

        let dev_script = DEV_SCRIPTS
            .iter()
            .find(|name| scripts.contains_key(**name))
            .copied()
            .unwrap_or(strategy.default_script);

        let script_body = scripts.get(dev_script).cloned();
        let port = script_body
            .as_deref()
            .and_then(Self::extract_port)
            .unwrap_or(strategy.default_port);

        let pm = package_manager.as_str();
        BuildConfiguration {
            framework,
            package_manager,
            install_command: format!("{} install", pm),
            build_command: scripts
                .contains_key("build")
                .then(|| format!("{} run build", pm)),
            dev_command: format!("{} run {}", pm, dev_script),
            dev_script: script_body,
            port,
        }
    }

    /// First framework whose signature appears in `dependencies` or `devDependencies`
    pub fn detect_framework(manifest: &Value) -> Framework {
        let has_dependency = |name: &str| {
            ["dependencies", "devDependencies"].iter().any(|section| {
                manifest
                    .get(section)
                    .and_then(Value::as_object)
                    .is_some_and(|deps| deps.contains_key(name))
            })
        };

        FRAMEWORK_SIGNATURES
            .iter()
            .find(|(dependency, _)| has_dependency(*dependency))
            .map(|(_, framework)| *framework)
            .unwrap_or(Framework::Unknown)
    }

    /// Extract an explicit `--port N`, `--port=N` or `-p N` from a script body
    pub fn extract_port(script: &str) -> Option<u16> {
        PORT_FLAG
            .captures(script)
            .and_then(|captures| captures.get(2))
            .and_then(|port| port.as_str().parse::<u16>().ok())
            .filter(|port| *port > 0)
    }

    /// Replace every explicit port flag value in a script body with `port`
    pub fn rewrite_port(script: &str, port: u16) -> String {
        PORT_FLAG
            .replace_all(script, format!("${{1}}{}", port).as_str())
            .into_owned()
    }

    fn scripts(manifest: &Value) -> HashMap<String, String> {
        manifest
            .get("scripts")
            .and_then(Value::as_object)
            .map(|scripts| {
                scripts
                    .iter()
                    .filter_map(|(name, body)| Some((name.clone(), body.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn test_next_without_scripts_or_lock_files() {
        let manifest = json!({ "dependencies": { "next": "14.0.0" } });
        let config = BuildDetector::from_manifest(&manifest, PackageManager::Npm);

        assert_eq!(
            config,
            BuildConfiguration {
                framework: Framework::NextJs,
                package_manager: PackageManager::Npm,
                install_command: "npm install".to_string(),
                build_command: None,
                dev_command: "npm run dev".to_string(),
                dev_script: None,
                port: 3000,
            }
        );
    }

    #[rstest]
    #[case(json!({"dependencies": {"react": "18", "next": "14"}}), Framework::NextJs)]
    #[case(json!({"devDependencies": {"vite": "5"}, "dependencies": {"vue": "3"}}), Framework::Vite)]
    #[case(json!({"dependencies": {"react": "18", "react-scripts": "5"}}), Framework::CreateReactApp)]
    #[case(json!({"dependencies": {"@sveltejs/kit": "2"}, "devDependencies": {"vite": "5"}}), Framework::SvelteKit)]
    #[case(json!({"dependencies": {"@remix-run/react": "2", "react": "18"}}), Framework::Remix)]
    #[case(json!({"dependencies": {"express": "4"}}), Framework::Unknown)]
    #[case(json!({}), Framework::Unknown)]
    fn test_detect_framework_first_match_wins(#[case] manifest: Value, #[case] expected: Framework) {
        assert_eq!(BuildDetector::detect_framework(&manifest), expected);
    }

    #[rstest]
    #[case("vite --port 4000", Some(4000))]
    #[case("next dev --port=3100", Some(3100))]
    #[case("gatsby develop -p 9000", Some(9000))]
    #[case("vite", None)]
    #[case("serve --port 99999", None)]
    #[case("node server.js --report-port 7", None)]
    fn test_extract_port(#[case] script: &str, #[case] expected: Option<u16>) {
        assert_eq!(BuildDetector::extract_port(script), expected);
    }

    #[rstest]
    #[case("webpack serve --port 8080", "webpack serve --port 3000")]
    #[case("next dev --port=3100 --turbo", "next dev --port=3000 --turbo")]
    #[case("gatsby develop -p 9000 && echo done", "gatsby develop -p 3000 && echo done")]
    #[case("node server.js --report-port 7", "node server.js --report-port 7")]
    fn test_rewrite_port(#[case] script: &str, #[case] expected: &str) {
        assert_eq!(BuildDetector::rewrite_port(script, 3000), expected);
    }

    #[test]
    fn test_script_priority_and_port_from_chosen_script() {
        let manifest = json!({
            "scripts": {
                "serve": "vue-cli-service serve --port 9999",
                "start": "vite --port 4100",
                "build": "vite build"
            },
            "devDependencies": { "vite": "5" }
        });
        let config = BuildDetector::from_manifest(&manifest, PackageManager::Pnpm);

        assert_eq!(config.dev_command, "pnpm run start");
        assert_eq!(config.dev_script.as_deref(), Some("vite --port 4100"));
        assert_eq!(config.port, 4100);
        assert_eq!(config.install_command, "pnpm install");
        assert_eq!(config.build_command.as_deref(), Some("pnpm run build"));
    }

    #[rstest]
    #[case(Framework::Gatsby, "yarn run develop", 8000)]
    #[case(Framework::Angular, "yarn run start", 4200)]
    #[case(Framework::Astro, "yarn run dev", 4321)]
    fn test_framework_defaults_without_scripts(
        #[case] framework: Framework,
        #[case] dev_command: &str,
        #[case] port: u16,
    ) {
        let dependency = FRAMEWORK_SIGNATURES
            .iter()
            .find(|(_, f)| *f == framework)
            .map(|(name, _)| *name)
            .unwrap();
        let mut dependencies = serde_json::Map::new();
        dependencies.insert(dependency.to_string(), json!("1.0.0"));
        let manifest = json!({ "dependencies": dependencies });
        let config = BuildDetector::from_manifest(&manifest, PackageManager::Yarn);

        assert_eq!(config.framework, framework);
        assert_eq!(config.dev_command, dev_command);
        assert_eq!(config.port, port);
    }
}
