use crate::engine::{CreateInstances, Step, WorkflowSettings};
use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}").expect("정규식 컴파일 실패"));

/// StepKind는 워크플로가 수행할 Step 유형을 표현한다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    /// 인스턴스 여러 개를 동시에 생성한다.
    CreateInstances {
        /// 인스턴스 설명자 목록.
        #[serde(rename = "create_instances")]
        instances: CreateInstances,
    },
}

/// 워크플로 내 Step 하나의 정의이다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// 고유 Step ID.
    pub id: String,
    /// Step에서 실행할 Kind 정보.
    #[serde(flatten)]
    pub kind: StepKind,
    /// 선행 Step ID 목록.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// 실행 제한 시간(초 단위).
    #[serde(default = "default_timeout")]
    pub timeout_sec: u64,
}

/// YAML로 작성된 워크플로 전체 정의이다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// 워크플로 이름. 리소스 실제 이름에 들어간다.
    pub name: String,
    /// 기본 프로젝트.
    pub project: String,
    /// 기본 존.
    pub zone: String,
    /// `gs://bucket[/prefix]` 형식의 스크래치 경로.
    pub gcs_path: String,
    /// 논리 경로 → 로컬 경로 소스 목록.
    #[serde(default)]
    pub sources: HashMap<String, String>,
    /// `${VAR}` 치환에 쓰는 변수.
    #[serde(default)]
    pub vars: HashMap<String, String>,
    /// 시리얼 로그 조회 간격(초 단위).
    #[serde(default = "default_serial_log_interval")]
    pub serial_log_interval_sec: u64,
    /// Step 목록.
    pub steps: Vec<StepConfig>,
}

impl WorkflowDefinition {
    /// 컨텍스트 생성용 설정으로 변환한다.
    pub fn to_settings(&self) -> WorkflowSettings {
        let mut settings = WorkflowSettings::new(
            self.name.clone(),
            self.project.clone(),
            self.zone.clone(),
            self.gcs_path.clone(),
        );
        settings.sources = self.sources.clone();
        settings.serial_log_interval = Duration::from_secs(self.serial_log_interval_sec.max(1));
        settings
    }

    /// Step 정의를 실행 가능한 Step 목록으로 바꾼다.
    pub fn into_steps(self) -> Vec<Step> {
        self.steps.into_iter().map(Step::from_config).collect()
    }
}

fn default_timeout() -> u64 {
    600
}

fn default_serial_log_interval() -> u64 {
    3
}

/// `vars`만 먼저 읽기 위한 보조 구조체이다.
#[derive(Deserialize)]
struct VarsOnly {
    #[serde(default)]
    vars: HashMap<String, String>,
}

/// `${VAR}`를 `vars` 값, 없으면 환경 변수 값으로 치환한다.
fn expand_placeholders(template: &str, vars: &HashMap<String, String>) -> anyhow::Result<String> {
    let mut missing: Vec<String> = Vec::new();
    let result = PLACEHOLDER.replace_all(template, |caps: &regex::Captures| {
        let key = &caps[1];
        if let Some(val) = vars.get(key) {
            return val.clone();
        }
        if let Ok(env_val) = std::env::var(key) {
            return env_val;
        }
        missing.push(key.to_string());
        format!("${{{key}}}")
    });
    if !missing.is_empty() {
        anyhow::bail!("플레이스홀더 치환 실패: {}", missing.join(", "));
    }
    Ok(result.into_owned())
}

/// YAML 파일을 읽어 WorkflowDefinition으로 역직렬화한다.
pub fn load_workflow_from_file(path: &Path) -> anyhow::Result<WorkflowDefinition> {
    let mut file =
        File::open(path).with_context(|| format!("워크플로 파일을 열 수 없습니다: {}", path.display()))?;
    load_workflow_from_reader(&mut file)
        .with_context(|| format!("워크플로 파일을 읽을 수 없습니다: {}", path.display()))
}

/// Reader에서 YAML을 읽어 플레이스홀더를 치환한 뒤 파싱한다.
pub fn load_workflow_from_reader<R: Read>(reader: &mut R) -> anyhow::Result<WorkflowDefinition> {
    let mut buf = String::new();
    reader.read_to_string(&mut buf)?;
    let vars: VarsOnly = serde_yaml::from_str(&buf).context("vars 파싱 실패")?;
    let expanded = expand_placeholders(&buf, &vars.vars)?;
    let definition: WorkflowDefinition = serde_yaml::from_str(&expanded)?;
    Ok(definition)
}
