use super::registry::Registries;
use super::steps::utils::join_path;
use crate::cloud::{SharedCompute, SharedStorage};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// 시리얼 로그 조회 기본 간격이다.
pub const DEFAULT_SERIAL_LOG_INTERVAL: Duration = Duration::from_secs(3);

/// WorkflowContext를 만들 때 필요한 설정 값이다.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// 워크플로 이름.
    pub name: String,
    /// 기본 프로젝트.
    pub project: String,
    /// 기본 존.
    pub zone: String,
    /// `gs://bucket[/prefix]` 형식의 스크래치 경로.
    pub gcs_path: String,
    /// 논리 경로 → 로컬 경로로 선언된 소스 파일.
    pub sources: HashMap<String, String>,
    /// 워크플로 ID. 없으면 무작위로 생성한다.
    pub id: Option<String>,
    /// 설명에 기록할 사용자 이름. 없으면 환경 변수에서 읽는다.
    pub username: Option<String>,
    /// 시리얼 로그 조회 간격.
    pub serial_log_interval: Duration,
}

impl WorkflowSettings {
    pub fn new(
        name: impl Into<String>,
        project: impl Into<String>,
        zone: impl Into<String>,
        gcs_path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            project: project.into(),
            zone: zone.into(),
            gcs_path: gcs_path.into(),
            sources: HashMap::new(),
            id: None,
            username: None,
            serial_log_interval: DEFAULT_SERIAL_LOG_INTERVAL,
        }
    }
}

/// 워크플로 실행 동안 모든 Step이 공유하는 상태이다.
pub struct WorkflowContext {
    name: String,
    id: String,
    project: String,
    zone: String,
    username: String,
    bucket: String,
    sources_path: String,
    logs_path: String,
    outs_path: String,
    sources: HashMap<String, String>,
    serial_log_interval: Duration,
    compute: SharedCompute,
    storage: SharedStorage,
    registries: Registries,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl WorkflowContext {
    /// 설정과 원격 클라이언트로 컨텍스트를 생성한다.
    pub fn new(
        settings: WorkflowSettings,
        compute: SharedCompute,
        storage: SharedStorage,
    ) -> anyhow::Result<Self> {
        let (bucket, prefix) = split_gcs_path(&settings.gcs_path)?;
        let id = settings.id.unwrap_or_else(random_id);
        let username = settings.username.unwrap_or_else(|| {
            std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "unknown".to_string())
        });
        let scratch = join_path(&[&prefix, &format!("daisy-{}-{}", settings.name, id)]);
        Ok(Self {
            sources_path: join_path(&[&scratch, "sources"]),
            logs_path: join_path(&[&scratch, "logs"]),
            outs_path: join_path(&[&scratch, "outs"]),
            name: settings.name,
            id,
            project: settings.project,
            zone: settings.zone,
            username,
            bucket,
            sources: settings.sources,
            serial_log_interval: settings.serial_log_interval,
            registries: Registries::new(compute.clone()),
            compute,
            storage,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn logs_path(&self) -> &str {
        &self.logs_path
    }

    pub fn serial_log_interval(&self) -> Duration {
        self.serial_log_interval
    }

    pub fn compute(&self) -> &SharedCompute {
        &self.compute
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    /// 모든 동시 태스크가 관찰하는 취소 신호이다.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 백그라운드 태스크를 추적하는 트래커이다.
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// 기본 이름에 워크플로 이름과 ID를 붙여 고유한 실제 이름을 만든다.
    ///
    /// `<base>-<워크플로 이름>`은 56자, 전체는 63자로 자른다.
    pub fn gen_name(&self, base: &str) -> String {
        let mut prefix = format!("{base}-{}", self.name);
        truncate_chars(&mut prefix, 56);
        let mut result = format!("{prefix}-{}", self.id);
        truncate_chars(&mut result, 63);
        result.to_lowercase()
    }

    /// 소스 파일이 선언되어 있는지 확인한다.
    pub fn source_exists(&self, path: &str) -> bool {
        self.sources.contains_key(path)
    }

    /// 선언된 소스의 논리 경로를 정렬해 반환한다.
    pub fn source_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// 버킷 내 경로를 `gs://` URL로 만든다.
    pub fn gcs_url(&self, path: &str) -> String {
        format!("gs://{}", join_path(&[&self.bucket, path]))
    }

    pub fn sources_url(&self) -> String {
        self.gcs_url(&self.sources_path)
    }

    pub fn logs_url(&self) -> String {
        self.gcs_url(&self.logs_path)
    }

    pub fn outs_url(&self) -> String {
        self.gcs_url(&self.outs_path)
    }

    /// 업로드된 소스 파일의 URL이다.
    pub fn source_url(&self, path: &str) -> String {
        self.gcs_url(&join_path(&[&self.sources_path, path]))
    }

    /// 워크플로를 종료한다. 취소 신호를 보낸 뒤 추적 중인 태스크가 모두 끝날 때까지 기다린다.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// `gs://bucket/prefix`를 (bucket, prefix)로 나눈다.
fn split_gcs_path(path: &str) -> anyhow::Result<(String, String)> {
    let rest = path
        .strip_prefix("gs://")
        .ok_or_else(|| anyhow::anyhow!("GCS 경로는 gs://로 시작해야 합니다: {path}"))?;
    let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        anyhow::bail!("GCS 경로에 버킷이 없습니다: {path}");
    }
    Ok((bucket.to_string(), prefix.trim_matches('/').to_string()))
}

fn random_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(5)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

fn truncate_chars(value: &mut String, max: usize) {
    if let Some((idx, _)) = value.char_indices().nth(max) {
        value.truncate(idx);
    }
}
