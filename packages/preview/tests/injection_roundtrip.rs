use pretty_assertions::assert_eq;
use splitlab_preview::{
    BuildDetector, Framework, InjectionStatus, Injector, PackageManager, INJECTION_MANIFEST,
    INJECTION_MARKER,
};
use splitlab_sandbox::testing::FakeProvider;
use splitlab_sandbox::{SandboxManager, SandboxSettings};
use std::sync::Arc;

const SESSION: &str = "s1";
const CONTAINER: &str = "splitlab-session-s1";
const REPO: &str = "/workspace/repo";

const VITE_INDEX: &str = "<!doctype html>\n<html lang=\"en\">\n  <head>\n    <meta charset=\"UTF-8\" />\n  </head>\n  <body><div id=\"app\"></div></body>\n</html>\n";

async fn sandbox_with(files: &[(&str, &str)]) -> (Arc<FakeProvider>, Arc<SandboxManager>) {
    let fake = Arc::new(FakeProvider::new());
    let manager = Arc::new(SandboxManager::new(fake.clone(), SandboxSettings::default()));
    manager.create_sandbox(SESSION, Vec::new()).await.unwrap();
    for (path, content) in files {
        fake.seed_file(CONTAINER, &format!("{}/{}", REPO, path), content);
    }
    (fake, manager)
}

#[tokio::test]
async fn test_inject_then_rollback_restores_original() {
    let (fake, manager) = sandbox_with(&[
        ("package.json", r#"{"devDependencies":{"vite":"5"}}"#),
        ("index.html", VITE_INDEX),
    ])
    .await;
    let before = fake.file_paths(CONTAINER);
    let injector = Injector::new(manager.clone());

    let outcome = injector.inject(SESSION, REPO, Framework::Vite).await.unwrap();

    assert_eq!(
        outcome.status,
        InjectionStatus::Injected {
            file: "/workspace/repo/index.html".to_string(),
            level: Framework::Vite,
        }
    );
    let injected = fake.file(CONTAINER, "/workspace/repo/index.html").unwrap();
    assert!(injected.contains(r#"<head><script src="/splitlab-picker/picker.js" defer data-splitlab-picker="injected"></script>"#));
    assert!(fake
        .file(CONTAINER, "/workspace/repo/public/splitlab-picker/picker.js")
        .is_some());
    assert_eq!(
        fake.file(CONTAINER, "/workspace/repo/index.html.splitlab-backup")
            .as_deref(),
        Some(VITE_INDEX)
    );
    assert!(fake.file(CONTAINER, INJECTION_MANIFEST).is_some());

    let report = injector.rollback(SESSION).await.unwrap();

    assert!(report.is_clean(), "{:?}", report);
    assert_eq!(
        fake.file(CONTAINER, "/workspace/repo/index.html").as_deref(),
        Some(VITE_INDEX)
    );
    assert_eq!(fake.file_paths(CONTAINER), before);
}

#[tokio::test]
async fn test_rollback_skips_files_whose_backup_is_gone() {
    let (fake, manager) = sandbox_with(&[("index.html", VITE_INDEX)]).await;
    let injector = Injector::new(manager.clone());
    injector.inject(SESSION, REPO, Framework::Vite).await.unwrap();
    let injected = fake.file(CONTAINER, "/workspace/repo/index.html").unwrap();

    manager
        .remove_paths(
            SESSION,
            &["/workspace/repo/index.html.splitlab-backup".to_string()],
        )
        .await
        .unwrap();
    let report = injector.rollback(SESSION).await.unwrap();

    assert!(report.is_clean(), "{:?}", report);
    assert_eq!(
        fake.file(CONTAINER, "/workspace/repo/index.html"),
        Some(injected)
    );
    assert!(fake.file(CONTAINER, INJECTION_MANIFEST).is_none());
}

#[tokio::test]
async fn test_second_injection_is_a_no_op() {
    let (fake, manager) = sandbox_with(&[("index.html", VITE_INDEX)]).await;
    let injector = Injector::new(manager);

    injector.inject(SESSION, REPO, Framework::Vite).await.unwrap();
    let once = fake.file(CONTAINER, "/workspace/repo/index.html").unwrap();

    let outcome = injector.inject(SESSION, REPO, Framework::Vite).await.unwrap();

    assert_eq!(
        outcome.status,
        InjectionStatus::AlreadyInjected {
            file: "/workspace/repo/index.html".to_string()
        }
    );
    let twice = fake.file(CONTAINER, "/workspace/repo/index.html").unwrap();
    assert_eq!(once, twice);
    assert_eq!(twice.matches(INJECTION_MARKER).count(), 1);
}

#[tokio::test]
async fn test_next_layout_without_anchor_falls_back_to_document() {
    let (fake, manager) = sandbox_with(&[
        ("app/layout.tsx", "export default function Root({ children }) { return children }\n"),
        ("public/index.html", "<html><body></body></html>"),
    ])
    .await;
    let injector = Injector::new(manager);

    let outcome = injector.inject(SESSION, REPO, Framework::NextJs).await.unwrap();

    assert_eq!(
        outcome.status,
        InjectionStatus::Injected {
            file: "/workspace/repo/public/index.html".to_string(),
            level: Framework::React,
        }
    );
    assert_eq!(
        fake.file(CONTAINER, "/workspace/repo/app/layout.tsx").as_deref(),
        Some("export default function Root({ children }) { return children }\n")
    );
    assert!(fake
        .file(CONTAINER, "/workspace/repo/public/index.html")
        .unwrap()
        .starts_with("<html><head><script"));
}

#[tokio::test]
async fn test_no_entry_point_still_cleans_up_asset() {
    let (fake, manager) = sandbox_with(&[("package.json", "{}")]).await;
    let injector = Injector::new(manager);

    let outcome = injector.inject(SESSION, REPO, Framework::Unknown).await.unwrap();
    assert_eq!(outcome.status, InjectionStatus::NoEntryPoint);

    let status = injector.status(SESSION, REPO, Framework::Unknown).await.unwrap();
    assert!(!status.supported);
    assert!(status.injected);

    injector.rollback(SESSION).await.unwrap();
    assert_eq!(fake.file_paths(CONTAINER), vec!["/workspace/repo/package.json"]);
}

#[tokio::test]
async fn test_rollback_without_manifest_and_unknown_session() {
    let (_fake, manager) = sandbox_with(&[]).await;
    let injector = Injector::new(manager);

    let report = injector.rollback(SESSION).await.unwrap();
    assert!(report.steps.is_empty());

    let err = injector.rollback("ghost").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_detect_reads_manifest_and_lock_files() {
    let (_fake, manager) = sandbox_with(&[
        (
            "package.json",
            r#"{"scripts":{"dev":"vite --port 5180","build":"vite build"},"devDependencies":{"vite":"5"}}"#,
        ),
        ("yarn.lock", ""),
    ])
    .await;

    let config = BuildDetector::detect(&manager, SESSION, REPO).await;

    assert_eq!(config.framework, Framework::Vite);
    assert_eq!(config.package_manager, PackageManager::Yarn);
    assert_eq!(config.dev_command, "yarn run dev");
    assert_eq!(config.build_command.as_deref(), Some("yarn run build"));
    assert_eq!(config.port, 5180);
}

#[tokio::test]
async fn test_detect_degrades_to_defaults() {
    let (_fake, manager) = sandbox_with(&[("package.json", "{ not json")]).await;

    let config = BuildDetector::detect(&manager, SESSION, REPO).await;
    assert_eq!(config, Default::default());

    let config = BuildDetector::detect(&manager, "ghost", REPO).await;
    assert_eq!(config.dev_command, "npm run dev");
}
