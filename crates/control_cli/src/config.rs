use std::path::{Path, PathBuf};

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_SEND_ATTEMPTS: u32 = 3;

/// Paths and defaults for one `hitl-control` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitlSettings {
    pub data_dir: PathBuf,
    pub audit_path: PathBuf,
    pub store_path: PathBuf,
    pub template_dir: Option<PathBuf>,
    pub operator_email: Option<String>,
    pub admin_email: Option<String>,
    pub send_attempts: u32,
}

impl HitlSettings {
    /// Read `HITL_*` variables. `data_dir` (the `--data-dir` flag) beats `HITL_DATA_DIR`.
    pub fn from_env(data_dir: Option<PathBuf>) -> Self {
        Self::from_vars(|k| std::env::var(k).ok(), data_dir)
    }

    pub fn from_vars(get: impl Fn(&str) -> Option<String>, data_dir: Option<PathBuf>) -> Self {
        let non_empty = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = data_dir
            .or_else(|| non_empty("HITL_DATA_DIR").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        Self {
            audit_path: non_empty("HITL_AUDIT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("audit.jsonl")),
            store_path: non_empty("HITL_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("hitl.jsonl")),
            template_dir: non_empty("HITL_TEMPLATE_DIR").map(PathBuf::from),
            operator_email: non_empty("HITL_OPERATOR_EMAIL"),
            admin_email: non_empty("HITL_ADMIN_EMAIL"),
            send_attempts: non_empty("HITL_SEND_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_SEND_ATTEMPTS),
            data_dir,
        }
    }
}

/// Best-effort `.env` loading: `<data dir>/.env`, else `./.env`.
/// Returns the file that was loaded.
pub fn load_dotenv(data_dir: Option<&Path>) -> Option<PathBuf> {
    let data_dir = data_dir
        .map(Path::to_path_buf)
        .or_else(|| std::env::var("HITL_DATA_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

    [data_dir.join(".env"), PathBuf::from(".env")]
        .into_iter()
        .find(|p| p.is_file() && dotenvy::from_path(p).is_ok())
}
