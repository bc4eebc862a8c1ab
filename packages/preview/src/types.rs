use serde::{Deserialize, Serialize};
use std::fmt;

/// Front-end framework detected from a repository manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Framework {
    #[serde(rename = "Next.js")]
    NextJs,
    Nuxt,
    Remix,
    Gatsby,
    SvelteKit,
    Astro,
    Angular,
    Vite,
    #[serde(rename = "Create React App")]
    CreateReactApp,
    Vue,
    React,
    Unknown,
}

/// Ordered dependency signatures, first match wins
pub const FRAMEWORK_SIGNATURES: &[(&str, Framework)] = &[
    ("next", Framework::NextJs),
    ("nuxt", Framework::Nuxt),
    ("@remix-run/react", Framework::Remix),
    ("gatsby", Framework::Gatsby),
    ("@sveltejs/kit", Framework::SvelteKit),
    ("astro", Framework::Astro),
    ("@angular/core", Framework::Angular),
    ("vite", Framework::Vite),
    ("react-scripts", Framework::CreateReactApp),
    ("vue", Framework::Vue),
    ("react", Framework::React),
];

/// How the script tag is anchored inside an entry file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorRule {
    /// Plain HTML document: `<head>` matched case-insensitively
    Document,
    /// JSX/TSX component: also accepts the `<Head>` component
    Jsx,
}

/// Per-framework behavior used by detection, injection and dev server launch
#[derive(Debug, Clone, Copy)]
pub struct FrameworkStrategy {
    /// Directory (relative to the repository) served as static assets
    pub static_dir: &'static str,
    /// URL prefix under which `static_dir` is served
    pub static_url_prefix: &'static str,
    /// Entry-point candidates in priority order
    pub entry_candidates: &'static [&'static str],
    pub anchor: AnchorRule,
    /// Next, less specific level tried when no anchor is found
    pub fallback: Option<Framework>,
    pub default_port: u16,
    /// Script run when the manifest declares none of `dev`, `start`, `serve`
    pub default_script: &'static str,
    pub host_flag: Option<&'static str>,
    pub port_flag: Option<&'static str>,
}

const GENERIC_DOCUMENTS: &[&str] = &["index.html", "public/index.html", "src/index.html"];

impl Framework {
    pub const ALL: [Framework; 12] = [
        Framework::NextJs,
        Framework::Nuxt,
        Framework::Remix,
        Framework::Gatsby,
        Framework::SvelteKit,
        Framework::Astro,
        Framework::Angular,
        Framework::Vite,
        Framework::CreateReactApp,
        Framework::Vue,
        Framework::React,
        Framework::Unknown,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            Framework::NextJs => "Next.js",
            Framework::Nuxt => "Nuxt",
            Framework::Remix => "Remix",
            Framework::Gatsby => "Gatsby",
            Framework::SvelteKit => "SvelteKit",
            Framework::Astro => "Astro",
            Framework::Angular => "Angular",
            Framework::Vite => "Vite",
            Framework::CreateReactApp => "Create React App",
            Framework::Vue => "Vue",
            Framework::React => "React",
            Framework::Unknown => "Unknown",
        }
    }

    /// Inverse of `display_name`; unrecognized names map to `Unknown`
    pub fn from_name(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|f| f.display_name().eq_ignore_ascii_case(name))
            .unwrap_or(Framework::Unknown)
    }

    pub fn strategy(&self) -> FrameworkStrategy {
        match self {
            Framework::NextJs => FrameworkStrategy {
                static_dir: "public",
                static_url_prefix: "",
                entry_candidates: &[
                    "app/layout.tsx",
                    "app/layout.jsx",
                    "app/layout.js",
                    "src/app/layout.tsx",
                    "src/app/layout.jsx",
                    "src/app/layout.js",
                    "pages/_document.tsx",
                    "pages/_document.jsx",
                    "pages/_document.js",
                    "src/pages/_document.tsx",
                    "src/pages/_document.js",
                ],
                anchor: AnchorRule::Jsx,
                fallback: Some(Framework::React),
                default_port: 3000,
                default_script: "dev",
                host_flag: Some("--hostname"),
                port_flag: Some("--port"),
            },
            Framework::Nuxt => FrameworkStrategy {
                static_dir: "public",
                static_url_prefix: "",
                entry_candidates: &["app.html", "src/app.html"],
                anchor: AnchorRule::Document,
                fallback: Some(Framework::Vue),
                default_port: 3000,
                default_script: "dev",
                host_flag: Some("--host"),
                port_flag: Some("--port"),
            },
            Framework::Remix => FrameworkStrategy {
                static_dir: "public",
                static_url_prefix: "",
                entry_candidates: &["app/root.tsx", "app/root.jsx", "app/root.js"],
                anchor: AnchorRule::Jsx,
                fallback: Some(Framework::React),
                default_port: 3000,
                default_script: "dev",
                host_flag: Some("--host"),
                port_flag: Some("--port"),
            },
            Framework::Gatsby => FrameworkStrategy {
                static_dir: "static",
                static_url_prefix: "",
                entry_candidates: &["src/html.js", "src/html.jsx", "src/html.tsx"],
                anchor: AnchorRule::Jsx,
                fallback: Some(Framework::React),
                default_port: 8000,
                default_script: "develop",
                host_flag: Some("-H"),
                port_flag: Some("-p"),
            },
            Framework::SvelteKit => FrameworkStrategy {
                static_dir: "static",
                static_url_prefix: "",
                entry_candidates: &["src/app.html"],
                anchor: AnchorRule::Document,
                fallback: Some(Framework::Unknown),
                default_port: 5173,
                default_script: "dev",
                host_flag: Some("--host"),
                port_flag: Some("--port"),
            },
            Framework::Astro => FrameworkStrategy {
                static_dir: "public",
                static_url_prefix: "",
                entry_candidates: &[
                    "src/layouts/Layout.astro",
                    "src/layouts/BaseLayout.astro",
                    "src/pages/index.astro",
                ],
                anchor: AnchorRule::Document,
                fallback: Some(Framework::Unknown),
                default_port: 4321,
                default_script: "dev",
                host_flag: Some("--host"),
                port_flag: Some("--port"),
            },
            Framework::Angular => FrameworkStrategy {
                static_dir: "src/assets",
                static_url_prefix: "/assets",
                entry_candidates: &["src/index.html"],
                anchor: AnchorRule::Document,
                fallback: Some(Framework::Unknown),
                default_port: 4200,
                default_script: "start",
                host_flag: Some("--host"),
                port_flag: Some("--port"),
            },
            Framework::Vite => FrameworkStrategy {
                static_dir: "public",
                static_url_prefix: "",
                entry_candidates: &["index.html"],
                anchor: AnchorRule::Document,
                fallback: Some(Framework::Unknown),
                default_port: 5173,
                default_script: "dev",
                host_flag: Some("--host"),
                port_flag: Some("--port"),
            },
            Framework::CreateReactApp => FrameworkStrategy {
                static_dir: "public",
                static_url_prefix: "",
                entry_candidates: &["public/index.html"],
                anchor: AnchorRule::Document,
                fallback: Some(Framework::React),
                default_port: 3000,
                default_script: "start",
                host_flag: None,
                port_flag: None,
            },
            Framework::Vue => FrameworkStrategy {
                static_dir: "public",
                static_url_prefix: "",
                entry_candidates: &["index.html", "public/index.html"],
                anchor: AnchorRule::Document,
                fallback: Some(Framework::Unknown),
                default_port: 8080,
                default_script: "serve",
                host_flag: Some("--host"),
                port_flag: Some("--port"),
            },
            Framework::React => FrameworkStrategy {
                static_dir: "public",
                static_url_prefix: "",
                entry_candidates: &["index.html", "public/index.html"],
                anchor: AnchorRule::Document,
                fallback: Some(Framework::Unknown),
                default_port: 3000,
                default_script: "dev",
                host_flag: None,
                port_flag: None,
            },
            Framework::Unknown => FrameworkStrategy {
                static_dir: "public",
                static_url_prefix: "",
                entry_candidates: GENERIC_DOCUMENTS,
                anchor: AnchorRule::Document,
                fallback: None,
                default_port: 3000,
                default_script: "dev",
                host_flag: None,
                port_flag: None,
            },
        }
    }

    /// This framework followed by its fallbacks, always ending with `Unknown`
    pub fn fallback_chain(&self) -> Vec<Framework> {
        let mut chain = vec![*self];
        let mut current = *self;
        while let Some(next) = current.strategy().fallback {
            if chain.contains(&next) {
                break;
            }
            chain.push(next);
            current = next;
        }
        if !chain.contains(&Framework::Unknown) {
            chain.push(Framework::Unknown);
        }
        chain
    }

    /// Extra dev-server arguments binding it to all interfaces on `port`
    pub fn dev_server_args(&self, port: u16) -> Vec<String> {
        let strategy = self.strategy();
        let mut args = Vec::new();
        if let Some(flag) = strategy.host_flag {
            args.push(flag.to_string());
            args.push("0.0.0.0".to_string());
        }
        if let Some(flag) = strategy.port_flag {
            args.push(flag.to_string());
            args.push(port.to_string());
        }
        args
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Package manager chosen from the repository's lock files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
}

impl PackageManager {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Yarn => "yarn",
            PackageManager::Pnpm => "pnpm",
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock files in probe order; the first one present decides the package manager
pub const LOCK_FILES: &[(&str, PackageManager)] = &[
    ("pnpm-lock.yaml", PackageManager::Pnpm),
    ("yarn.lock", PackageManager::Yarn),
];

/// How to install, build and serve a cloned repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfiguration {
    pub framework: Framework,
    pub package_manager: PackageManager,
    pub install_command: String,
    pub build_command: Option<String>,
    pub dev_command: String,
    /// Body of the script `dev_command` runs, when the manifest defines it
    pub dev_script: Option<String>,
    /// Port the dev server listens on unless told otherwise
    pub port: u16,
}

impl Default for BuildConfiguration {
    fn default() -> Self {
        Self {
            framework: Framework::Unknown,
            package_manager: PackageManager::Npm,
            install_command: "npm install".to_string(),
            build_command: None,
            dev_command: "npm run dev".to_string(),
            dev_script: None,
            port: 3000,
        }
    }
}
